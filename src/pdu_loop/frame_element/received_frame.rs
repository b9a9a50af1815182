use crate::{
    error::{Error, PduError},
    pdu_loop::{
        frame_element::{FrameBox, FrameState},
        frame_element::created_frame::{CreatedFrame, PduHandle},
        pdu_header::PduHeader,
    },
};
use ethercrab_wire::{EtherCrabWireRead, EtherCrabWireSized};

/// A response frame, exclusively owned by the transaction that sent it.
///
/// Dropping this struct releases the underlying storage slot for reuse.
#[derive(Debug)]
pub struct ReceivedFrame<'sto> {
    inner: FrameBox<'sto>,
}

impl<'sto> ReceivedFrame<'sto> {
    pub(in crate::pdu_loop) fn new(inner: FrameBox<'sto>) -> Self {
        Self { inner }
    }

    /// Retrieve the response to one PDU of this frame by the handle
    /// [`push_pdu`](crate::CreatedFrame::push_pdu) returned for it.
    ///
    /// The PDU index echoed by the bus is checked against the handle; the command code is not,
    /// as individual primitives decide for themselves whether a command mismatch voids the
    /// payload (see [`Port::lrd`](crate::Port::lrd) etc.).
    pub fn pdu(&self, handle: &PduHandle) -> Result<ReceivedPdu<'_>, Error> {
        let buf = self.inner.pdu_buf();

        let pdu = buf
            .get(handle.buf_start..handle.buf_start + handle.alloc_size)
            .ok_or(PduError::Decode)?;

        let header = PduHeader::unpack_from_slice(pdu)?;

        if header.index != handle.pdu_idx {
            return Err(Error::Pdu(PduError::Validation));
        }

        let payload_len = handle.alloc_size - CreatedFrame::PDU_OVERHEAD_BYTES;

        let payload = &pdu[PduHeader::PACKED_LEN..][..payload_len];

        let working_counter =
            u16::unpack_from_slice(&pdu[PduHeader::PACKED_LEN + payload_len..][..2])?;

        Ok(ReceivedPdu {
            payload,
            working_counter,
            command_code: header.command_code,
        })
    }
}

impl Drop for ReceivedFrame<'_> {
    fn drop(&mut self) {
        // Make the slot available for reuse. Stale arrivals for the completed transaction must
        // not find it by PDU index, so the sentinel is restored first.
        self.inner.clear_first_pdu();
        self.inner.set_state(FrameState::None);
    }
}

// SAFETY: As for the other typestates, the `'sto` lifetime held by `FrameBox` ties this struct
// to the backing storage, so sending it to another thread cannot outlive the buffers.
unsafe impl Send for ReceivedFrame<'_> {}

/// The response to a single PDU: its payload as rewritten by the bus, and its working counter.
#[derive(Debug)]
pub struct ReceivedPdu<'frame> {
    payload: &'frame [u8],
    working_counter: u16,
    command_code: u8,
}

impl ReceivedPdu<'_> {
    /// The working counter of this PDU, incremented by every SubDevice that processed it.
    pub fn working_counter(&self) -> u16 {
        self.working_counter
    }

    /// The command code echoed in the response header.
    pub fn command_code(&self) -> u8 {
        self.command_code
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl core::ops::Deref for ReceivedPdu<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.payload
    }
}
