pub mod created_frame;
mod frame_box;
pub mod received_frame;
pub(crate) mod receiving_frame;

use crate::{ethernet::EthernetFrame, fmt, pdu_loop::frame_header::EthercatFrameHeader};
use core::{
    ptr::{addr_of, addr_of_mut, NonNull},
    sync::atomic::{AtomicU16, Ordering},
};

pub(crate) use frame_box::FrameBox;

/// A marker value for empty frames with no pushed PDUs.
///
/// The upper byte must be non-zero for sentinel comparisons to work.
pub(crate) const FIRST_PDU_EMPTY: u16 = 0xff00;

/// Frame state.
#[atomic_enum::atomic_enum]
#[derive(PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum FrameState {
    // SAFETY: Because we create a bunch of `FrameElement`s with `MaybeUninit::zeroed`, the `None`
    // state MUST be equal to zero. All other fields in the element are overwritten when it is
    // claimed, so there is no UB there.
    /// The frame is available ready to be claimed.
    #[default]
    None = 0,
    /// The frame is claimed with a zeroed data buffer and can be filled with command, data, etc
    /// ready for sending.
    Created = 1,
    /// The frame is being written to the network interface.
    Sending = 2,
    /// The frame was successfully sent, and is now waiting for a response from the network.
    Sent = 3,
    /// A frame response has been received and is being copied into the slot.
    RxBusy = 4,
    /// The response is stored in the slot, ready for the waiting transaction to claim.
    RxDone = 5,
    /// The response data is owned by calling code and the slot must not be touched.
    RxProcessing = 6,
}

/// An individual frame state, bookkeeping and Ethernet frame buffer.
///
/// A slot travels `None` -> `Created` (claimed and zeroed, PDUs pushed in) -> `Sending` ->
/// `Sent` (on the wire, waiting) -> `RxBusy` (response being copied in by the receiving thread)
/// -> `RxDone` -> `RxProcessing` (response borrowed by the caller) -> `None` again when the
/// response is dropped. A timed out transaction short-circuits `Sent` -> `None`.
#[derive(Debug)]
#[repr(C)]
pub(crate) struct FrameElement<const N: usize> {
    /// Ethernet frame index in storage. Has nothing to do with the PDU header index field.
    storage_slot_index: u8,

    status: AtomicFrameState,

    /// Keeps track of how much of the PDU data buffer has been consumed.
    pdu_payload_len: usize,

    /// Stores the PDU index of the first PDU written into this frame (if any).
    ///
    /// Used by the receive path to do a linear search in the frame storage to find the slot
    /// behind a received frame. The lower byte stores the PDU index, the upper byte a sentinel
    /// signifying whether any PDU has been pushed at all.
    first_pdu: AtomicU16,

    // MUST be the last element otherwise pointer arithmetic doesn't work for
    // `NonNull<FrameElement<0>>`.
    ethernet_frame: [u8; N],
}

impl<const N: usize> Default for FrameElement<N> {
    fn default() -> Self {
        Self {
            storage_slot_index: 0,
            status: AtomicFrameState::new(FrameState::None),
            pdu_payload_len: 0,
            first_pdu: AtomicU16::new(FIRST_PDU_EMPTY),
            ethernet_frame: [0; N],
        }
    }
}

impl<const N: usize> FrameElement<N> {
    /// Get a pointer to the start of the Ethernet frame buffer.
    unsafe fn ptr(this: NonNull<FrameElement<N>>) -> NonNull<u8> {
        let buf_ptr: *mut [u8; N] = unsafe { addr_of_mut!((*this.as_ptr()).ethernet_frame) };
        let buf_ptr: *mut u8 = buf_ptr.cast();

        // SAFETY: `buf_ptr` is derived from a `NonNull` so can never itself be null
        unsafe { NonNull::new_unchecked(buf_ptr) }
    }

    /// Get a pointer to the area of the buffer where PDUs (header and payload) go, i.e. just
    /// after the EtherCAT frame header.
    unsafe fn ethercat_payload_ptr(this: NonNull<FrameElement<N>>) -> NonNull<u8> {
        // SAFETY: Offsets stay well within the buffer as `PduStorage` asserts a minimum size that
        // covers all headers
        unsafe {
            Self::ptr(this)
                .byte_add(EthernetFrame::<&[u8]>::header_len())
                .byte_add(EthercatFrameHeader::header_len())
        }
    }

    /// Set the frame's state without checking its current state.
    pub(in crate::pdu_loop) unsafe fn set_state(this: NonNull<FrameElement<N>>, state: FrameState) {
        let fptr = this.as_ptr();

        // SAFETY: `addr_of_mut!` takes the field address without creating an intermediate
        // reference to possibly uninitialised data
        unsafe { (*addr_of_mut!((*fptr).status)).store(state, Ordering::Release) };
    }

    /// Atomically swap the frame state from `from` to `to`.
    ///
    /// If the frame is not currently in the given `from` state, this method will return an error
    /// with the actual current frame state.
    unsafe fn swap_state(
        this: NonNull<FrameElement<N>>,
        from: FrameState,
        to: FrameState,
    ) -> Result<NonNull<FrameElement<N>>, FrameState> {
        let fptr = this.as_ptr();

        // SAFETY: As above, `addr_of_mut!` creates no intermediate reference
        unsafe {
            (*addr_of_mut!((*fptr).status)).compare_exchange(
                from,
                to,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
        }?;

        Ok(this)
    }

    /// Attempt to claim a frame element as `Created`. Succeeds if the selected element is
    /// currently in the `None` state.
    unsafe fn claim_created(
        this: NonNull<FrameElement<N>>,
        frame_index: u8,
    ) -> Result<NonNull<FrameElement<N>>, ()> {
        // It is imperative that the existing state is checked when claiming a frame as created.
        // It matters slightly less for all other state transitions because once a frame is
        // created, nothing else can take it unless it is put back into the `None` state.
        let this =
            unsafe { Self::swap_state(this, FrameState::None, FrameState::Created) }.map_err(
                |e| {
                    fmt::trace!(
                        "Failed to claim frame {}: status is {:?}, expected {:?}",
                        frame_index,
                        e,
                        FrameState::None
                    );
                },
            )?;

        // SAFETY: The atomic swap above gives this thread exclusive ownership of the element
        unsafe {
            (*addr_of_mut!((*this.as_ptr()).storage_slot_index)) = frame_index;
            (*addr_of_mut!((*this.as_ptr()).pdu_payload_len)) = 0;
        }

        Ok(this)
    }

    /// Attempt to mark a frame in the `Sent` state as `RxBusy`, i.e. claim it for reception of
    /// the response that just arrived.
    unsafe fn claim_receiving(this: NonNull<FrameElement<N>>) -> Option<NonNull<FrameElement<N>>> {
        unsafe { Self::swap_state(this, FrameState::Sent, FrameState::RxBusy) }
            .map_err(|actual_state| {
                // A slot in any other state means the transaction gave up waiting; the response
                // is stale and will be dropped by the caller.
                fmt::trace!(
                    "Failed to claim receiving frame: expected state {:?}, but got {:?}",
                    FrameState::Sent,
                    actual_state
                );
            })
            .ok()
    }

    unsafe fn storage_slot_index(this: NonNull<FrameElement<0>>) -> u8 {
        // SAFETY: The field is only ever written while the element is exclusively claimed
        unsafe { *addr_of!((*this.as_ptr()).storage_slot_index) }
    }

    /// Check whether the first PDU index of this frame equals `search`.
    pub(in crate::pdu_loop) unsafe fn first_pdu_is(
        this: NonNull<FrameElement<0>>,
        search: u8,
    ) -> bool {
        // SAFETY: `first_pdu` is atomic so may be read from any thread
        let raw = unsafe { (*addr_of!((*this.as_ptr()).first_pdu)).load(Ordering::Acquire) };

        // The unused sentinel value occupies the upper byte, so this equality never holds for
        // empty frames
        u16::from(search) == raw
    }

    /// If no PDUs are present in the frame, set the first PDU index to the given value.
    unsafe fn set_first_pdu(this: NonNull<FrameElement<0>>, value: u8) {
        // SAFETY: `first_pdu` is atomic so may be written from any thread
        let first_pdu = unsafe { &*addr_of!((*this.as_ptr()).first_pdu) };

        // Only set the first PDU index if the frame is empty, as denoted by the
        // `FIRST_PDU_EMPTY` sentinel. Failures are ignored as we want a noop when the first PDU
        // value was already set.
        let _ = first_pdu.compare_exchange(
            FIRST_PDU_EMPTY,
            u16::from(value),
            Ordering::Release,
            Ordering::Relaxed,
        );
    }

    /// Clear first PDU.
    unsafe fn clear_first_pdu(this: NonNull<FrameElement<0>>) {
        // SAFETY: `first_pdu` is atomic so may be written from any thread
        let first_pdu = unsafe { &*addr_of!((*this.as_ptr()).first_pdu) };

        first_pdu.store(FIRST_PDU_EMPTY, Ordering::Release);
    }
}
