//! EtherCAT datagram commands and their addressing forms.

/// Read commands.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reads {
    /// APRD.
    Aprd {
        /// Auto increment counter.
        address: u16,

        /// Memory location to read from.
        register: u16,
    },
    /// FPRD.
    Fprd {
        /// Configured station address.
        address: u16,

        /// Memory location to read from.
        register: u16,
    },
    /// BRD.
    Brd {
        /// Autoincremented by each SubDevice visited.
        address: u16,

        /// Memory location to read from.
        register: u16,
    },
    /// LRD.
    Lrd {
        /// Logical address.
        address: u32,
    },
    /// ARMW.
    Armw {
        /// Auto increment counter.
        address: u16,

        /// Memory location to read from.
        register: u16,
    },
    /// FRMW.
    Frmw {
        /// Configured station address.
        address: u16,

        /// Memory location to read from.
        register: u16,
    },
}

/// Write commands.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Writes {
    /// BWR.
    Bwr {
        /// Autoincremented by each SubDevice visited.
        address: u16,

        /// Memory location to write to.
        register: u16,
    },
    /// APWR.
    Apwr {
        /// Auto increment counter.
        address: u16,

        /// Memory location to write to.
        register: u16,
    },
    /// FPWR.
    Fpwr {
        /// Configured station address.
        address: u16,

        /// Memory location to write to.
        register: u16,
    },
    /// LWR.
    Lwr {
        /// Logical address.
        address: u32,
    },
    /// LRW.
    Lrw {
        /// Logical address.
        address: u32,
    },
}

/// PDU command.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// No operation.
    #[default]
    Nop,

    /// Read commands.
    Read(Reads),

    /// Write commands.
    Write(Writes),
}

impl core::fmt::Display for Command {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Command::Nop => f.write_str("NOP"),

            Command::Read(read) => match read {
                Reads::Aprd { address, register } => {
                    write!(f, "APRD(addr {}, register {:#06x})", address, register)
                }
                Reads::Fprd { address, register } => {
                    write!(f, "FPRD(addr {}, register {:#06x})", address, register)
                }
                Reads::Brd { address, register } => {
                    write!(f, "BRD(addr {}, register {:#06x})", address, register)
                }
                Reads::Lrd { address } => write!(f, "LRD(addr {:#010x})", address),
                Reads::Armw { address, register } => {
                    write!(f, "ARMW(addr {}, register {:#06x})", address, register)
                }
                Reads::Frmw { address, register } => {
                    write!(f, "FRMW(addr {}, register {:#06x})", address, register)
                }
            },

            Command::Write(write) => match write {
                Writes::Bwr { address, register } => {
                    write!(f, "BWR(addr {}, register {:#06x})", address, register)
                }
                Writes::Apwr { address, register } => {
                    write!(f, "APWR(addr {}, register {:#06x})", address, register)
                }
                Writes::Fpwr { address, register } => {
                    write!(f, "FPWR(addr {}, register {:#06x})", address, register)
                }
                Writes::Lwr { address } => write!(f, "LWR(addr {:#010x})", address),
                Writes::Lrw { address } => write!(f, "LRW(addr {:#010x})", address),
            },
        }
    }
}

impl Command {
    /// Create a broadcast read (`BRD`) command to the given register address.
    pub const fn brd(register: u16) -> Self {
        Self::Read(Reads::Brd {
            // This is a broadcast, so the address is always zero when sent
            address: 0,
            register,
        })
    }

    /// Create a broadcast write (`BWR`) command to the given register address.
    pub const fn bwr(register: u16) -> Self {
        Self::Write(Writes::Bwr {
            // This is a broadcast, so the address is always zero when sent
            address: 0,
            register,
        })
    }

    /// Create an auto increment physical read (`APRD`) command.
    pub const fn aprd(address: u16, register: u16) -> Self {
        Self::Read(Reads::Aprd { address, register })
    }

    /// Create an auto increment physical write (`APWR`) command.
    pub const fn apwr(address: u16, register: u16) -> Self {
        Self::Write(Writes::Apwr { address, register })
    }

    /// Create a configured station read (`FPRD`) command.
    pub const fn fprd(address: u16, register: u16) -> Self {
        Self::Read(Reads::Fprd { address, register })
    }

    /// Create a configured station write (`FPWR`) command.
    pub const fn fpwr(address: u16, register: u16) -> Self {
        Self::Write(Writes::Fpwr { address, register })
    }

    /// Create a logical read (`LRD`) command.
    pub const fn lrd(address: u32) -> Self {
        Self::Read(Reads::Lrd { address })
    }

    /// Create a logical write (`LWR`) command.
    pub const fn lwr(address: u32) -> Self {
        Self::Write(Writes::Lwr { address })
    }

    /// Create a logical read/write (`LRW`) command.
    pub const fn lrw(address: u32) -> Self {
        Self::Write(Writes::Lrw { address })
    }

    /// Create an auto increment read/multiple write (`ARMW`) command.
    pub const fn armw(address: u16, register: u16) -> Self {
        Self::Read(Reads::Armw { address, register })
    }

    /// Create a configured address read/multiple write (`FRMW`) command.
    pub const fn frmw(address: u16, register: u16) -> Self {
        Self::Read(Reads::Frmw { address, register })
    }

    /// The command code sent in the first byte of a PDU header.
    pub const fn code(&self) -> u8 {
        match self {
            Command::Nop => 0x00,

            Command::Read(read) => match read {
                Reads::Aprd { .. } => 0x01,
                Reads::Fprd { .. } => 0x04,
                Reads::Brd { .. } => 0x07,
                Reads::Lrd { .. } => 0x0a,
                Reads::Armw { .. } => 0x0d,
                Reads::Frmw { .. } => 0x0e,
            },

            Command::Write(write) => match write {
                Writes::Apwr { .. } => 0x02,
                Writes::Fpwr { .. } => 0x05,
                Writes::Bwr { .. } => 0x08,
                Writes::Lwr { .. } => 0x0b,
                Writes::Lrw { .. } => 0x0c,
            },
        }
    }

    /// The four address bytes of the PDU header as they appear on the wire.
    ///
    /// Physical addressing forms occupy them with the (position or station, register) pair, both
    /// little-endian; logical addressing spreads a 32 bit address over all four.
    pub(crate) fn address(&self) -> [u8; 4] {
        let mut raw = [0u8; 4];

        let (position, offset) = match *self {
            Command::Nop => (0, 0),

            Command::Read(Reads::Aprd { address, register })
            | Command::Read(Reads::Fprd { address, register })
            | Command::Read(Reads::Brd { address, register })
            | Command::Read(Reads::Armw { address, register })
            | Command::Read(Reads::Frmw { address, register })
            | Command::Write(Writes::Bwr { address, register })
            | Command::Write(Writes::Apwr { address, register })
            | Command::Write(Writes::Fpwr { address, register }) => (address, register),

            Command::Read(Reads::Lrd { address })
            | Command::Write(Writes::Lwr { address })
            | Command::Write(Writes::Lrw { address }) => {
                ((address & 0xffff) as u16, (address >> 16) as u16)
            }
        };

        raw[0..2].copy_from_slice(&position.to_le_bytes());
        raw[2..4].copy_from_slice(&offset.to_le_bytes());

        raw
    }

    /// Whether the payload of this command is zeroed before transmission.
    ///
    /// Pure reads carry no outgoing data; the payload region is cleared so stale buffer contents
    /// never reach the wire. `ARMW`/`FRMW` are excluded: the read value is rewritten to following
    /// SubDevices, so their outgoing payload is significant.
    pub(crate) const fn payload_is_zeroed(&self) -> bool {
        matches!(
            self,
            Command::Nop
                | Command::Read(Reads::Aprd { .. })
                | Command::Read(Reads::Fprd { .. })
                | Command::Read(Reads::Brd { .. })
                | Command::Read(Reads::Lrd { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes() {
        // Codes from ETG1000.4 Table 42
        assert_eq!(Command::Nop.code(), 0x00);
        assert_eq!(Command::aprd(0, 0).code(), 0x01);
        assert_eq!(Command::apwr(0, 0).code(), 0x02);
        assert_eq!(Command::fprd(0, 0).code(), 0x04);
        assert_eq!(Command::fpwr(0, 0).code(), 0x05);
        assert_eq!(Command::brd(0).code(), 0x07);
        assert_eq!(Command::bwr(0).code(), 0x08);
        assert_eq!(Command::lrd(0).code(), 0x0a);
        assert_eq!(Command::lwr(0).code(), 0x0b);
        assert_eq!(Command::lrw(0).code(), 0x0c);
        assert_eq!(Command::armw(0, 0).code(), 0x0d);
        assert_eq!(Command::frmw(0, 0).code(), 0x0e);
    }

    #[test]
    fn physical_address_is_le_pair() {
        let command = Command::fpwr(0x1001, 0x0120);

        assert_eq!(command.address(), [0x01, 0x10, 0x20, 0x01]);
    }

    #[test]
    fn logical_address_split() {
        // The low and high halves of a logical address land in the position/offset slots
        let command = Command::lrw(0x0004_0000);

        assert_eq!(command.address(), [0x00, 0x00, 0x04, 0x00]);
    }

    #[test]
    fn zeroed_payloads() {
        assert!(Command::Nop.payload_is_zeroed());
        assert!(Command::brd(0x0130).payload_is_zeroed());
        assert!(Command::lrd(0).payload_is_zeroed());

        assert!(!Command::bwr(0x0120).payload_is_zeroed());
        assert!(!Command::frmw(0x1000, 0x0910).payload_is_zeroed());
        assert!(!Command::lrw(0).payload_is_zeroed());
    }
}
