use crate::{
    error::PduError,
    fmt,
    pdu_loop::frame_element::{
        received_frame::ReceivedFrame, FrameBox, FrameElement, FrameState,
    },
};
use core::{ptr::NonNull, sync::atomic::AtomicU8};

/// A frame whose response has just arrived from the network and is being copied into its slot.
///
/// This state may only be entered from `Sent`, i.e. while a transaction is blocked waiting on
/// the slot.
#[derive(Debug)]
pub(crate) struct ReceivingFrame<'sto> {
    inner: FrameBox<'sto>,
}

impl<'sto> ReceivingFrame<'sto> {
    pub(in crate::pdu_loop) fn claim_receiving(
        frame: NonNull<FrameElement<0>>,
        pdu_idx: &'sto AtomicU8,
        frame_data_len: usize,
    ) -> Option<Self> {
        let frame = unsafe { FrameElement::claim_receiving(frame)? };

        Some(Self {
            inner: FrameBox::new(frame, pdu_idx, frame_data_len),
        })
    }

    /// Mark the frame as fully received.
    ///
    /// This method may only be called once the frame response (header and data) has been
    /// validated and stored in the frame element. The blocked transaction observes the state
    /// change on its next claim attempt.
    pub(in crate::pdu_loop) fn mark_received(&self) -> Result<(), PduError> {
        // The state set by `claim_receiving` while the incoming frame is parsed, so the previous
        // state here must be RxBusy.
        self.inner
            .swap_state(FrameState::RxBusy, FrameState::RxDone)
            .map_err(|bad| {
                fmt::error!(
                    "Failed to set frame {:#04x} state from RxBusy -> RxDone, got {:?}",
                    self.storage_slot_index(),
                    bad
                );

                PduError::Validation
            })
    }

    pub(in crate::pdu_loop) fn buf_mut(&mut self) -> &mut [u8] {
        self.inner.pdu_buf_mut()
    }

    /// Put the frame back into the waiting state after a failed receive, so the blocked
    /// transaction can keep waiting for a retransmission or time out normally.
    pub(in crate::pdu_loop) fn release(self) {
        let _ = self.inner.swap_state(FrameState::RxBusy, FrameState::Sent);
    }

    /// Ethernet frame index.
    fn storage_slot_index(&self) -> u8 {
        self.inner.storage_slot_index()
    }
}

/// A frame that has been written to the network and is waiting for its response.
///
/// The blocking replacement for a response future: the owning transaction polls
/// [`try_claim_received`](SentFrame::try_claim_received) between reads of the network interface,
/// and releases the slot through [`abandon`](SentFrame::abandon) when its deadline passes.
#[derive(Debug)]
pub(crate) struct SentFrame<'sto> {
    inner: FrameBox<'sto>,
}

// SAFETY: This unsafe impl is required due to `FrameBox` containing a `NonNull`, however this
// impl is ok because `FrameBox` also holds the lifetime `'sto` of the backing store, which is
// where the `NonNull<FrameElement>` comes from.
unsafe impl Send for SentFrame<'_> {}

impl<'sto> SentFrame<'sto> {
    pub(in crate::pdu_loop) fn new(inner: FrameBox<'sto>) -> Self {
        Self { inner }
    }

    /// Take the response if it has been fully routed into this frame's slot.
    pub(crate) fn try_claim_received(&self) -> Option<ReceivedFrame<'sto>> {
        // RxDone is set by `mark_received` when the incoming packet has been parsed and stored
        self.inner
            .swap_state(FrameState::RxDone, FrameState::RxProcessing)
            .ok()
            .map(|_| ReceivedFrame::new(self.inner))
    }

    /// Give up waiting and release the slot for reuse.
    ///
    /// If the response arrived at the same moment, it wins: it is returned instead of being
    /// thrown away, so a deadline race never discards a valid frame.
    pub(crate) fn abandon(self) -> Option<ReceivedFrame<'sto>> {
        loop {
            match self.inner.swap_state(FrameState::Sent, FrameState::None) {
                Ok(()) => {
                    // No response will be accepted for this slot any more; stale arrivals fail
                    // their `Sent` -> `RxBusy` claim and are dropped by the receive path.
                    self.inner.clear_first_pdu();

                    break None;
                }
                // Receipt is already in progress on another thread
                Err(FrameState::RxBusy) => core::hint::spin_loop(),
                Err(FrameState::RxDone) => {
                    if let Some(received) = self.try_claim_received() {
                        break Some(received);
                    }
                }
                Err(other) => {
                    // Nothing sane to do: leak the slot rather than risk freeing a claim some
                    // other state holds.
                    fmt::error!("Abandoned frame is in invalid state {:?}", other);

                    break None;
                }
            }
        }
    }
}
