//! An EtherCAT frame header.

use crate::LEN_MASK;
use ethercrab_wire::{EtherCrabWireRead, EtherCrabWireSized, EtherCrabWireWrite, WireError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub(crate) enum ProtocolType {
    DlPdu = 0x01u8,
    // Network variable (0x04) and mailbox (0x05) EAP frames are not supported.
}

impl TryFrom<u8> for ProtocolType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::DlPdu),
            _ => Err(WireError::InvalidValue),
        }
    }
}

/// An EtherCAT frame header.
///
/// An EtherCAT frame can contain one or more PDUs after this header, each starting with a
/// [`PduHeader`](crate::pdu_loop::pdu_header::PduHeader).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct EthercatFrameHeader {
    /// Length in bytes of the PDU area of the frame: all PDU headers, payloads and working
    /// counters, excluding this header itself.
    pub(crate) payload_len: u16,
    pub(crate) protocol: ProtocolType,
}

impl EtherCrabWireSized for EthercatFrameHeader {
    const PACKED_LEN: usize = 2;

    type Buffer = [u8; 2];

    fn buffer() -> Self::Buffer {
        [0u8; 2]
    }
}

impl EtherCrabWireRead for EthercatFrameHeader {
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError> {
        let raw = u16::unpack_from_slice(buf)?;

        Ok(Self {
            payload_len: raw & LEN_MASK,
            protocol: ProtocolType::try_from((raw >> 12) as u8)?,
        })
    }
}

impl EtherCrabWireWrite for EthercatFrameHeader {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        // Protocol type in the upper 4 bits
        let raw = self.payload_len | (self.protocol as u16) << 12;

        raw.pack_to_slice_unchecked(buf)
    }

    fn packed_len(&self) -> usize {
        Self::PACKED_LEN
    }
}

impl EthercatFrameHeader {
    /// Create a new PDU frame header.
    pub fn pdu(len: u16) -> Self {
        debug_assert!(
            len <= LEN_MASK,
            "Frame length may not exceed {} bytes",
            LEN_MASK
        );

        Self {
            payload_len: len & LEN_MASK,
            protocol: ProtocolType::DlPdu,
        }
    }

    /// Convenience method for naming consistency.
    pub(crate) const fn header_len() -> usize {
        Self::PACKED_LEN
    }
}
