//! Crate error types.

use ethercrab_wire::WireError;

/// EtherCAT communication error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No response frame for this transaction arrived before the timeout expired.
    ///
    /// This is the only failure mode of a healthy bus: the frame was either lost, or no device is
    /// connected at all. The transaction slot is released before this error is returned, so the
    /// caller may simply reissue the primitive.
    Timeout,

    /// A PDU or frame level error.
    Pdu(PduError),

    /// Failed to encode or decode a wire data type.
    Wire(WireError),

    /// The network interface rejected a frame transmission.
    SendFrame,

    /// The network interface failed while waiting for a response frame.
    ReceiveFrame,

    /// The network interface accepted only part of a frame.
    PartialSend {
        /// The length of the frame in bytes.
        len: usize,

        /// The number of bytes actually sent.
        sent: usize,
    },

    /// An internal invariant was violated.
    ///
    /// This error should never occur in normal operation and indicates a bug in this crate.
    Internal,
}

/// Errors raised while assembling a frame or decoding a response PDU.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PduError {
    /// The PDU and its payload do not fit in the remaining space of the frame buffer.
    TooLong,

    /// Failed to decode a response PDU from a received frame.
    Decode,

    /// A frame slot was not in the expected state.
    ///
    /// Raised by slot allocation when every slot holds an in-flight transaction (slow the rate
    /// of transactions down, or increase the number of elements in
    /// [`PduStorage`](crate::PduStorage)), and by the receive path when a response arrives for
    /// a slot whose transaction has already given up waiting.
    SwapState,

    /// A received frame maps to a storage slot that does not exist.
    InvalidIndex(u8),

    /// The PDU index in the response does not match the transaction it was routed to.
    Validation,
}

impl From<PduError> for Error {
    fn from(value: PduError) -> Self {
        Self::Pdu(value)
    }
}

impl From<WireError> for Error {
    fn from(value: WireError) -> Self {
        Self::Wire(value)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Timeout => f.write_str("request timed out"),
            Error::Pdu(e) => write!(f, "PDU error: {}", e),
            Error::Wire(e) => write!(f, "wire encode/decode error: {}", e),
            Error::SendFrame => f.write_str("failed to transmit frame"),
            Error::ReceiveFrame => f.write_str("failed to receive frame"),
            Error::PartialSend { len, sent } => {
                write!(f, "partial send: {} of {} bytes", sent, len)
            }
            Error::Internal => f.write_str("internal error"),
        }
    }
}

impl core::fmt::Display for PduError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PduError::TooLong => f.write_str("data too long to fit in frame"),
            PduError::Decode => f.write_str("failed to decode response PDU"),
            PduError::SwapState => f.write_str("no frame slot available"),
            PduError::InvalidIndex(index) => write!(f, "invalid frame slot index {}", index),
            PduError::Validation => f.write_str("response PDU failed validation"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl std::error::Error for PduError {}
