//! An EtherCAT PDU (datagram) header.

use crate::command::Command;
use crate::pdu_loop::pdu_flags::PduFlags;
use ethercrab_wire::{EtherCrabWireRead, EtherCrabWireSized, EtherCrabWireWrite, WireError};

/// The 10 byte header preceding every PDU payload in an EtherCAT frame.
///
/// Wire layout, all multi-byte fields little-endian:
///
/// ```text
/// offset  size  field
///   0      1    command code
///   1      1    index
///   2      4    address (position/offset pair, or 32 bit logical address)
///   6      2    flags (low 11 bits payload length, bit 15 "more follows")
///   8      2    IRQ
/// ```
///
/// The payload follows immediately, then the 2 byte working counter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct PduHeader {
    pub(crate) command_code: u8,
    pub(crate) index: u8,
    pub(crate) command_raw: [u8; 4],
    pub(crate) flags: PduFlags,
    pub(crate) irq: u16,
}

impl PduHeader {
    /// Byte offset of the flags word within the header.
    pub(crate) const FLAGS_OFFSET: usize = 6;

    /// Byte offset of the PDU index within the header.
    pub(crate) const INDEX_OFFSET: usize = 1;

    pub(crate) fn new(command: Command, index: u8, flags: PduFlags) -> Self {
        Self {
            command_code: command.code(),
            index,
            command_raw: command.address(),
            flags,
            // Zeroed on transmit; SubDevices may set event request bits on the way back
            irq: 0,
        }
    }
}

impl EtherCrabWireSized for PduHeader {
    const PACKED_LEN: usize = 10;

    type Buffer = [u8; 10];

    fn buffer() -> Self::Buffer {
        [0u8; 10]
    }
}

impl EtherCrabWireWrite for PduHeader {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        buf[0] = self.command_code;
        buf[1] = self.index;
        buf[2..6].copy_from_slice(&self.command_raw);

        self.flags.pack_to_slice_unchecked(&mut buf[6..8]);

        buf[8..10].copy_from_slice(&self.irq.to_le_bytes());

        &buf[0..Self::PACKED_LEN]
    }

    fn packed_len(&self) -> usize {
        Self::PACKED_LEN
    }
}

impl EtherCrabWireRead for PduHeader {
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError> {
        let buf = buf
            .get(0..Self::PACKED_LEN)
            .ok_or(WireError::ReadBufferTooShort)?;

        Ok(Self {
            command_code: buf[0],
            index: buf[1],
            command_raw: [buf[2], buf[3], buf[4], buf[5]],
            flags: PduFlags::unpack_from_slice(&buf[6..8])?,
            irq: u16::from_le_bytes([buf[8], buf[9]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fpwr_layout() {
        // FPWR to station 0x1001, register 0x0120, 2 byte payload
        let header = PduHeader::new(Command::fpwr(0x1001, 0x0120), 0x0a, PduFlags::new(2, false));

        let mut buf = [0u8; 10];

        header.pack_to_slice_unchecked(&mut buf);

        assert_eq!(
            buf,
            [0x05, 0x0a, 0x01, 0x10, 0x20, 0x01, 0x02, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn round_trip() {
        let header = PduHeader::new(Command::lrw(0x0001_0000), 0x42, PduFlags::new(8, true));

        let mut buf = [0u8; 10];

        header.pack_to_slice_unchecked(&mut buf);

        let decoded = PduHeader::unpack_from_slice(&buf).unwrap();

        assert_eq!(decoded, header);

        // Logical address low/high halves land in the 4 address bytes
        assert_eq!(&buf[2..6], &[0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn short_buffer() {
        assert_eq!(
            PduHeader::unpack_from_slice(&[0u8; 4]),
            Err(WireError::ReadBufferTooShort)
        );
    }
}
