use crate::{
    ethernet::{EthernetAddress, EthernetFrame},
    pdu_loop::{
        frame_element::{FrameElement, FrameState, FIRST_PDU_EMPTY},
        frame_header::EthercatFrameHeader,
    },
    ETHERCAT_ETHERTYPE,
};
use core::{
    fmt::Debug,
    marker::PhantomData,
    ptr::{addr_of, addr_of_mut, NonNull},
    sync::atomic::{AtomicU8, Ordering},
};
use ethercrab_wire::EtherCrabWireSized;

/// Frame data common to all typestates.
#[derive(Copy, Clone)]
pub(crate) struct FrameBox<'sto> {
    frame: NonNull<FrameElement<0>>,
    pdu_idx: &'sto AtomicU8,
    max_len: usize,
    _lifetime: PhantomData<&'sto mut FrameElement<0>>,
}

impl Debug for FrameBox<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let data = self.pdu_buf();

        f.debug_struct("FrameBox")
            .field("state", unsafe {
                // SAFETY: `self.frame` is a `NonNull`, so `addr_of` will always point to valid
                // data
                &(*addr_of!((*self.frame.as_ptr()).status))
            })
            .field("frame_index", &self.storage_slot_index())
            .field("data_hex", &format_args!("{:02x?}", data))
            .finish()
    }
}

impl<'sto> FrameBox<'sto> {
    /// Wrap a [`FrameElement`] pointer in a `FrameBox` without modifying the underlying data.
    pub(in crate::pdu_loop) fn new(
        frame: NonNull<FrameElement<0>>,
        pdu_idx: &'sto AtomicU8,
        max_len: usize,
    ) -> FrameBox<'sto> {
        Self {
            frame,
            max_len,
            pdu_idx,
            _lifetime: PhantomData,
        }
    }

    /// Reset Ethernet and EtherCAT headers, zero out the Ethernet frame payload data.
    pub(in crate::pdu_loop) fn init(&mut self, source_mac: EthernetAddress) {
        // SAFETY: We hold the only claim on this element, made with an atomic state swap
        unsafe {
            (*addr_of_mut!((*self.frame.as_ptr()).first_pdu))
                .store(FIRST_PDU_EMPTY, Ordering::Relaxed);

            addr_of_mut!((*self.frame.as_ptr()).pdu_payload_len).write(0);
        }

        let mut ethernet_frame = self.ethernet_frame_mut();

        ethernet_frame.set_src_addr(source_mac);
        ethernet_frame.set_dst_addr(EthernetAddress::BROADCAST);
        ethernet_frame.set_ethertype(ETHERCAT_ETHERTYPE);
        ethernet_frame.payload_mut().fill(0);
    }

    pub(in crate::pdu_loop) fn next_pdu_idx(&self) -> u8 {
        self.pdu_idx.fetch_add(1, Ordering::Relaxed)
    }

    pub(in crate::pdu_loop) fn storage_slot_index(&self) -> u8 {
        unsafe { FrameElement::<0>::storage_slot_index(self.frame) }
    }

    /// Get the EtherCAT frame header buffer.
    pub(in crate::pdu_loop) fn ecat_frame_header_mut(&mut self) -> &mut [u8] {
        // SAFETY: We hold the only claim on this element so no other reference to its buffer can
        // exist
        let ptr = unsafe { FrameElement::<0>::ptr(self.frame) };

        let ethercat_header_start = EthernetFrame::<&[u8]>::header_len();

        // SAFETY: The buffer is at least `MIN_DATA` bytes long, which covers both headers
        unsafe {
            core::slice::from_raw_parts_mut(
                ptr.as_ptr().byte_add(ethercat_header_start),
                EthercatFrameHeader::PACKED_LEN,
            )
        }
    }

    /// Get the frame area PDUs are written into: everything after the EtherCAT frame header.
    pub(in crate::pdu_loop) fn pdu_buf_mut(&mut self) -> &mut [u8] {
        // SAFETY: We hold the only claim on this element so no other reference to its buffer can
        // exist
        let ptr = unsafe { FrameElement::<0>::ethercat_payload_ptr(self.frame) };

        let pdu_payload_start =
            EthernetFrame::<&[u8]>::header_len() + EthercatFrameHeader::header_len();

        // SAFETY: The allocation is `max_len` bytes long of which `pdu_payload_start` are the
        // headers before `ptr`
        unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), self.max_len - pdu_payload_start) }
    }

    /// Get the area of the frame holding one or more PDUs, after the EtherCAT frame header.
    pub(in crate::pdu_loop) fn pdu_buf(&self) -> &[u8] {
        let ptr = unsafe { FrameElement::<0>::ethercat_payload_ptr(self.frame) };

        let pdu_payload_start =
            EthernetFrame::<&[u8]>::header_len() + EthercatFrameHeader::header_len();

        // SAFETY: As for `pdu_buf_mut`
        unsafe { core::slice::from_raw_parts(ptr.as_ptr(), self.max_len - pdu_payload_start) }
    }

    fn ethernet_frame_mut(&mut self) -> EthernetFrame<&mut [u8]> {
        // SAFETY: We hold a mutable reference to the containing `FrameBox`. A `FrameBox` can only
        // be created from a successful unique acquisition of a frame element.
        unsafe {
            EthernetFrame::new_unchecked(core::slice::from_raw_parts_mut(
                FrameElement::<0>::ptr(self.frame).as_ptr(),
                self.max_len,
            ))
        }
    }

    pub(in crate::pdu_loop) fn ethernet_frame(&self) -> EthernetFrame<&[u8]> {
        // SAFETY: As for `ethernet_frame_mut`
        unsafe {
            EthernetFrame::new_unchecked(core::slice::from_raw_parts(
                FrameElement::<0>::ptr(self.frame).as_ptr(),
                self.max_len,
            ))
        }
    }

    /// Get the number of bytes consumed in the region of the frame used to store one or more
    /// PDUs.
    pub(in crate::pdu_loop) fn pdu_payload_len(&self) -> usize {
        // SAFETY: Only written while exclusively claimed
        unsafe { *addr_of!((*self.frame.as_ptr()).pdu_payload_len) }
    }

    pub(in crate::pdu_loop) fn set_state(&self, to: FrameState) {
        // SAFETY: The state field is atomic
        unsafe { FrameElement::set_state(self.frame, to) };
    }

    pub(in crate::pdu_loop) fn swap_state(
        &self,
        from: FrameState,
        to: FrameState,
    ) -> Result<(), FrameState> {
        // SAFETY: The state field is atomic
        unsafe { FrameElement::swap_state(self.frame, from, to) }.map(|_| ())
    }

    pub(in crate::pdu_loop) fn clear_first_pdu(&self) {
        // SAFETY: The first PDU field is atomic
        unsafe {
            FrameElement::<0>::clear_first_pdu(self.frame);
        }
    }

    /// Add the given number of bytes in `alloc_size` to the consumed bytes counter in the frame.
    ///
    /// Also sets the first PDU index if it hasn't already been set.
    pub(in crate::pdu_loop) fn add_pdu(&mut self, alloc_size: usize, pdu_idx: u8) {
        // SAFETY: We hold the only claim on this element
        unsafe { *addr_of_mut!((*self.frame.as_ptr()).pdu_payload_len) += alloc_size };

        // SAFETY: The first PDU field is atomic
        unsafe { FrameElement::<0>::set_first_pdu(self.frame, pdu_idx) };
    }
}
