//! Ethernet II frame and address types.
//!
//! Adapted from smoltcp's `wire::ethernet` module: EtherCAT only ever needs the 14 byte Ethernet
//! II header, so the handful of accessors used by this crate are carried here instead of the
//! whole TCP/IP stack.

use ethercrab_wire::WireError;

/// A six-octet Ethernet II address (MAC address).
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EthernetAddress(pub [u8; 6]);

impl EthernetAddress {
    /// The broadcast address.
    pub const BROADCAST: EthernetAddress = EthernetAddress([0xff; 6]);

    /// Construct an Ethernet address from a sequence of octets.
    ///
    /// # Panics
    ///
    /// The function panics if `data` is not six octets long.
    pub fn from_bytes(data: &[u8]) -> EthernetAddress {
        let mut bytes = [0; 6];
        bytes.copy_from_slice(data);

        EthernetAddress(bytes)
    }

    /// Return an Ethernet address as a sequence of octets.
    pub const fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl core::fmt::Display for EthernetAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let bytes = self.0;

        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
        )
    }
}

mod field {
    use core::ops::{Range, RangeFrom};

    pub const DESTINATION: Range<usize> = 0..6;
    pub const SOURCE: Range<usize> = 6..12;
    pub const ETHERTYPE: Range<usize> = 12..14;
    pub const PAYLOAD: RangeFrom<usize> = 14..;
}

/// The Ethernet II header length.
pub const HEADER_LEN: usize = field::PAYLOAD.start;

/// A read/write wrapper around an Ethernet II frame buffer.
#[derive(Debug, Clone)]
pub struct EthernetFrame<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> EthernetFrame<T> {
    /// Imbue a raw octet buffer with Ethernet frame structure.
    pub const fn new_unchecked(buffer: T) -> EthernetFrame<T> {
        EthernetFrame { buffer }
    }

    /// Shorthand for a combination of [`new_unchecked`](Self::new_unchecked) and
    /// [`check_len`](Self::check_len).
    pub fn new_checked(buffer: T) -> Result<EthernetFrame<T>, WireError> {
        let frame = Self::new_unchecked(buffer);

        frame.check_len()?;

        Ok(frame)
    }

    /// Ensure that no accessor method will panic if called.
    pub fn check_len(&self) -> Result<(), WireError> {
        if self.buffer.as_ref().len() < HEADER_LEN {
            Err(WireError::ReadBufferTooShort)
        } else {
            Ok(())
        }
    }

    /// Consume the frame, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    /// Return the header length, in octets.
    pub const fn header_len() -> usize {
        HEADER_LEN
    }

    /// Return the length of a frame buffer required to hold a payload of `payload_len` octets.
    pub const fn buffer_len(payload_len: usize) -> usize {
        HEADER_LEN + payload_len
    }

    /// Return the destination address field.
    pub fn dst_addr(&self) -> EthernetAddress {
        let data = self.buffer.as_ref();

        EthernetAddress::from_bytes(&data[field::DESTINATION])
    }

    /// Return the source address field.
    pub fn src_addr(&self) -> EthernetAddress {
        let data = self.buffer.as_ref();

        EthernetAddress::from_bytes(&data[field::SOURCE])
    }

    /// Return the EtherType field, in host byte order.
    pub fn ethertype(&self) -> u16 {
        let data = self.buffer.as_ref();

        u16::from_be_bytes([data[field::ETHERTYPE.start], data[field::ETHERTYPE.start + 1]])
    }

    /// Return the frame payload.
    pub fn payload(&self) -> &[u8] {
        let data = self.buffer.as_ref();

        &data[field::PAYLOAD]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> EthernetFrame<T> {
    /// Set the destination address field.
    pub fn set_dst_addr(&mut self, value: EthernetAddress) {
        let data = self.buffer.as_mut();

        data[field::DESTINATION].copy_from_slice(value.as_bytes())
    }

    /// Set the source address field.
    pub fn set_src_addr(&mut self, value: EthernetAddress) {
        let data = self.buffer.as_mut();

        data[field::SOURCE].copy_from_slice(value.as_bytes())
    }

    /// Set the EtherType field. `value` is given in host byte order.
    pub fn set_ethertype(&mut self, value: u16) {
        let data = self.buffer.as_mut();

        data[field::ETHERTYPE].copy_from_slice(&value.to_be_bytes())
    }

    /// Return a mutable view of the frame payload.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let data = self.buffer.as_mut();

        &mut data[field::PAYLOAD]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ETHERCAT_ETHERTYPE;

    #[test]
    fn header_round_trip() {
        let mut buf = [0u8; 64];

        let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);

        frame.set_dst_addr(EthernetAddress::BROADCAST);
        frame.set_src_addr(crate::MASTER_ADDR);
        frame.set_ethertype(ETHERCAT_ETHERTYPE);

        assert_eq!(frame.dst_addr(), EthernetAddress::BROADCAST);
        assert_eq!(frame.src_addr(), crate::MASTER_ADDR);
        assert_eq!(frame.ethertype(), ETHERCAT_ETHERTYPE);

        // EtherType is big-endian on the wire
        assert_eq!(&buf[12..14], &[0x88, 0xa4]);
    }

    #[test]
    fn payload_starts_after_header() {
        let mut buf = [0u8; 32];

        buf[14] = 0xaa;

        let frame = EthernetFrame::new_checked(&buf[..]).unwrap();

        assert_eq!(frame.payload()[0], 0xaa);
        assert_eq!(frame.payload().len(), 32 - 14);
    }

    #[test]
    fn too_short() {
        let buf = [0u8; 10];

        assert_eq!(
            EthernetFrame::new_checked(&buf[..]).err(),
            Some(WireError::ReadBufferTooShort)
        );
    }
}
