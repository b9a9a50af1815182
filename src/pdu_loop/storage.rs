use crate::{
    error::PduError,
    ethernet::{EthernetAddress, EthernetFrame},
    fmt,
    pdu_loop::{
        frame_element::{
            created_frame::CreatedFrame, receiving_frame::ReceivingFrame, FrameElement,
        },
        frame_header::EthercatFrameHeader,
        pdu_flags::PduFlags,
        pdu_header::PduHeader,
    },
};
use core::{
    alloc::Layout,
    cell::UnsafeCell,
    marker::PhantomData,
    mem::MaybeUninit,
    ptr::NonNull,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
};
use ethercrab_wire::EtherCrabWireSized;

/// Smallest element size: all frame headers with a PDU data payload of zero length.
const MIN_DATA: usize = EthernetFrame::<&[u8]>::buffer_len(
    EthercatFrameHeader::header_len()
        + PduHeader::PACKED_LEN
        + PduFlags::const_default().len() as usize
        // Working counter
        + 2,
);

/// Stores EtherCAT frames that are currently being assembled, in flight, or holding received
/// response data.
///
/// The storage is the owner of all transaction buffers; everything else in this crate borrows
/// from it, so it must outlive the [`Port`](crate::Port) created over it (a `static` is the
/// usual home). The number of storage elements `N` must be a power of 2, at most 256.
pub struct PduStorage<const N: usize, const DATA: usize> {
    frames: UnsafeCell<MaybeUninit<[FrameElement<DATA>; N]>>,
    frame_idx: AtomicU8,
    pdu_idx: AtomicU8,
    is_split: AtomicBool,
}

// SAFETY: Frame elements are claimed atomically before any of their data is touched, so
// concurrent shared access never aliases a buffer.
unsafe impl<const N: usize, const DATA: usize> Sync for PduStorage<N, DATA> {}

impl PduStorage<0, 0> {
    /// Calculate the size of a `PduStorage` buffer element to hold the given number of PDU
    /// payload bytes.
    ///
    /// This computes the additional overhead of the Ethernet, EtherCAT frame and EtherCAT PDU
    /// headers.
    ///
    /// # Examples
    ///
    /// Create a `PduStorage` able to carry a full-length datagram in every slot:
    ///
    /// ```rust
    /// use ethergram::PduStorage;
    ///
    /// const NUM_FRAMES: usize = 8;
    /// const FRAME_SIZE: usize = PduStorage::element_size(1486);
    ///
    /// // 28 bytes overhead: a maximum size standard Ethernet frame
    /// assert_eq!(FRAME_SIZE, 1514);
    ///
    /// let storage = PduStorage::<NUM_FRAMES, FRAME_SIZE>::new();
    /// ```
    pub const fn element_size(data_len: usize) -> usize {
        MIN_DATA + data_len
    }
}

impl<const N: usize, const DATA: usize> PduStorage<N, DATA> {
    /// Create a new `PduStorage` instance.
    ///
    /// It is recommended to use [`element_size`](PduStorage::element_size) to correctly compute
    /// the overhead required to hold a given PDU payload size.
    ///
    /// # Panics
    ///
    /// This method will panic if
    ///
    /// - `N` is larger than `u8::MAX`, zero, or not a power of two, or
    /// - `DATA` is less than 28, the minimum required to hold an EtherCAT frame with a zero
    ///   length PDU.
    pub const fn new() -> Self {
        // NOTE: Keep max frames in flight at 256 or under. This way, we can guarantee the first
        // PDU in any frame has a unique index.
        assert!(
            N <= u8::MAX as usize,
            "Packet indexes are u8s, so the frame array cannot be any bigger than u8::MAX"
        );
        assert!(N > 0, "Storage must contain at least one element");

        assert!(
            DATA >= MIN_DATA,
            "DATA must be at least 28 bytes large to hold all frame headers"
        );

        // Index wrapping limitations require a power of 2 number of storage elements.
        if N > 1 {
            assert!(
                N.count_ones() == 1,
                "The number of storage elements must be a power of 2"
            );
        }

        // SAFETY: `FrameState::None` must be equal to zero so zeroed memory is a valid array of
        // idle frame elements.
        let frames = UnsafeCell::new(MaybeUninit::zeroed());

        Self {
            frames,
            frame_idx: AtomicU8::new(0),
            pdu_idx: AtomicU8::new(0),
            is_split: AtomicBool::new(false),
        }
    }

    /// Open a [`Port`](crate::Port) over this storage with the given link-layer transport.
    ///
    /// # Errors
    ///
    /// To maintain ownership and lifetime invariants, `try_port` will return an error if called
    /// more than once on any given `PduStorage`.
    #[cfg(feature = "std")]
    #[allow(clippy::result_unit_err)]
    pub fn try_port<S: crate::Transport>(
        &self,
        socket: S,
        config: crate::PortConfig,
    ) -> Result<crate::Port<'_, S>, ()> {
        self.is_split
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .map_err(|_| ())?;

        Ok(crate::Port::new(self.as_ref(), socket, config))
    }

    pub(crate) fn as_ref(&self) -> PduStorageRef {
        PduStorageRef {
            // SAFETY: The pointer is taken from a live reference so can never be null
            frames: unsafe { NonNull::new_unchecked(self.frames.get().cast()) },
            frame_element_stride: Layout::array::<FrameElement<DATA>>(N).unwrap().size() / N,
            num_frames: N,
            frame_data_len: DATA,
            frame_idx: &self.frame_idx,
            pdu_idx: &self.pdu_idx,
            _lifetime: PhantomData,
        }
    }
}

impl<const N: usize, const DATA: usize> Default for PduStorage<N, DATA> {
    fn default() -> Self {
        Self::new()
    }
}

/// A type-erased view over a [`PduStorage`], cheap to clone and share.
#[derive(Debug, Clone)]
pub(crate) struct PduStorageRef<'sto> {
    frames: NonNull<FrameElement<0>>,
    /// Stride in bytes used to calculate frame element index pointer offsets.
    frame_element_stride: usize,
    pub num_frames: usize,
    pub frame_data_len: usize,
    frame_idx: &'sto AtomicU8,
    pub pdu_idx: &'sto AtomicU8,
    _lifetime: PhantomData<&'sto ()>,
}

impl<'sto> PduStorageRef<'sto> {
    /// Allocate a frame slot, claiming it for a new transaction.
    ///
    /// Walks the slot ring at most twice looking for an idle element; two full passes finding
    /// nothing means every slot holds an in-flight transaction, and the caller should either
    /// slow down or enlarge the storage.
    pub(crate) fn alloc_frame(
        &self,
        source_mac: EthernetAddress,
    ) -> Option<CreatedFrame<'sto>> {
        for _ in 0..(self.num_frames * 2) {
            let frame_idx = self.frame_idx.fetch_add(1, Ordering::Relaxed) % self.num_frames as u8;

            fmt::trace!("Try to allocate frame {}", frame_idx);

            // Claim the frame so it has a unique owner until its response data is dropped. It
            // must be claimed before initialisation to avoid other threads claiming the same
            // frame; the race is settled by the atomic state variable in the element.
            let frame = self.frame_at_index(usize::from(frame_idx));

            let frame = CreatedFrame::claim_created(
                frame,
                frame_idx,
                self.pdu_idx,
                self.frame_data_len,
                source_mac,
            );

            if let Ok(f) = frame {
                return Some(f);
            }
        }

        fmt::error!("No available frames in {} slots", self.num_frames);

        None
    }

    /// Update a slot's state from `Sent` to `RxBusy`, claiming it for response storage.
    ///
    /// Fails with [`PduError::InvalidIndex`] if `frame_idx` does not name a slot at all, or
    /// [`PduError::SwapState`] if the slot exists but its transaction is no longer waiting for
    /// a response.
    pub(in crate::pdu_loop) fn claim_receiving(
        &self,
        frame_idx: u8,
    ) -> Result<ReceivingFrame<'sto>, PduError> {
        let idx = usize::from(frame_idx);

        if idx >= self.num_frames {
            return Err(PduError::InvalidIndex(frame_idx));
        }

        fmt::trace!("--> Claim receiving frame index {}", frame_idx);

        ReceivingFrame::claim_receiving(self.frame_at_index(idx), self.pdu_idx, self.frame_data_len)
            .ok_or(PduError::SwapState)
    }

    /// Find the slot holding the in-flight frame whose first PDU has the given index.
    pub(in crate::pdu_loop) fn frame_index_by_first_pdu_index(
        &self,
        search_pdu_idx: u8,
    ) -> Option<u8> {
        for frame_index in 0..self.num_frames {
            let frame = self.frame_at_index(frame_index);

            if unsafe { FrameElement::<0>::first_pdu_is(frame, search_pdu_idx) } {
                return Some(frame_index as u8);
            }
        }

        None
    }

    /// Retrieve a pointer to the frame element at the given index.
    pub(crate) fn frame_at_index(&self, idx: usize) -> NonNull<FrameElement<0>> {
        assert!(idx < self.num_frames);

        // SAFETY: `self.frames` was created from a live `PduStorage` and the index is checked
        // against the length of the storage array above, so as long as
        // `self.frame_element_stride` is computed correctly this offset stays in bounds.
        unsafe {
            NonNull::new_unchecked(
                self.frames
                    .as_ptr()
                    .byte_add(idx * self.frame_element_stride),
            )
        }
    }
}

// SAFETY: The reference only hands out frame elements through atomic claims, so it may be moved
// to and shared between threads freely.
unsafe impl<'sto> Send for PduStorageRef<'sto> {}
unsafe impl<'sto> Sync for PduStorageRef<'sto> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{command::Command, MASTER_ADDR};

    #[test]
    fn zeroed_data() {
        crate::test_logger();

        let storage: PduStorage<1, { PduStorage::element_size(8) }> = PduStorage::new();
        let s = storage.as_ref();

        let mut frame = s.alloc_frame(MASTER_ADDR).expect("Allocate first frame");

        frame
            .push_pdu(Command::bwr(0x1000), [0xaa, 0xbb, 0xcc, 0xdd], None)
            .unwrap();

        // Drop the claim to reset the slot state so it can be reused
        drop(frame);

        let mut frame = s.alloc_frame(MASTER_ADDR).expect("Allocate second frame");

        const LEN: u16 = 8;

        let handle = frame.push_pdu(Command::Nop, (), Some(LEN)).unwrap();

        // 10 byte PDU header, then a payload zeroed despite the first transaction's leftovers,
        // plus a zeroed working counter
        assert_eq!(handle.buf_start, 0);
        assert_eq!(
            &frame.pdu_buf()[PduHeader::PACKED_LEN..][..usize::from(LEN) + 2],
            &[0u8; { LEN as usize + 2 }]
        );
    }

    #[test]
    fn no_spare_frames() {
        crate::test_logger();

        const NUM_FRAMES: usize = 16;
        const DATA: usize = PduStorage::element_size(128);

        let storage: PduStorage<NUM_FRAMES, DATA> = PduStorage::new();
        let s = storage.as_ref();

        let frames = (0..NUM_FRAMES)
            .map(|_| s.alloc_frame(MASTER_ADDR).expect("should have free frames"))
            .collect::<Vec<_>>();

        assert!(
            s.alloc_frame(MASTER_ADDR).is_none(),
            "there should be no frame slots available"
        );

        // Dropping a claim frees its slot again
        drop(frames);

        for _ in 0..NUM_FRAMES {
            let f = s.alloc_frame(MASTER_ADDR).expect("should have free frames");

            core::mem::forget(f);
        }

        assert!(s.alloc_frame(MASTER_ADDR).is_none());
    }

    #[test]
    fn claim_receiving_rejects_bad_slots() {
        crate::test_logger();

        let storage: PduStorage<2, { PduStorage::element_size(16) }> = PduStorage::new();
        let s = storage.as_ref();

        // Slot 0 exists but holds no transaction waiting for a response
        assert_eq!(s.claim_receiving(0).err(), Some(PduError::SwapState));

        // Slot 9 does not exist at all
        assert_eq!(s.claim_receiving(9).err(), Some(PduError::InvalidIndex(9)));
    }

    #[test]
    fn split_once() {
        struct NullTransport;

        impl crate::Transport for NullTransport {
            fn send(&self, frame: &[u8]) -> std::io::Result<usize> {
                Ok(frame.len())
            }

            fn recv_timeout(
                &self,
                _buf: &mut [u8],
                _timeout: core::time::Duration,
            ) -> std::io::Result<usize> {
                Err(std::io::ErrorKind::TimedOut.into())
            }
        }

        let storage: PduStorage<2, { PduStorage::element_size(16) }> = PduStorage::new();

        assert!(storage
            .try_port(NullTransport, crate::PortConfig::default())
            .is_ok());
        assert!(storage
            .try_port(NullTransport, crate::PortConfig::default())
            .is_err());
    }
}
