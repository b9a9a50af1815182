use crate::{
    command::Command,
    error::{Error, PduError},
    ethernet::{EthernetAddress, EthernetFrame},
    fmt,
    pdu_loop::{
        frame_element::{receiving_frame::SentFrame, FrameBox, FrameElement, FrameState},
        frame_header::EthercatFrameHeader,
        pdu_flags::PduFlags,
        pdu_header::PduHeader,
    },
};
use core::{ptr::NonNull, sync::atomic::AtomicU8};
use ethercrab_wire::{EtherCrabWireRead, EtherCrabWireSized, EtherCrabWireWrite};

/// Pack `value` into the beginning of `buf`, returning the remaining unwritten tail.
fn write_packed(value: impl EtherCrabWireWrite, buf: &mut [u8]) -> &mut [u8] {
    let len = value.packed_len();

    value.pack_to_slice_unchecked(buf);

    &mut buf[len..]
}

/// A frame in a freshly allocated state, ready for one or more PDUs to be pushed into it.
///
/// This typestate may only be created by
/// [`Port::alloc_frame`](crate::Port::alloc_frame). Dropping it without sending releases the
/// slot.
#[derive(Debug)]
pub struct CreatedFrame<'sto> {
    inner: FrameBox<'sto>,
    pdu_count: u8,
    /// Position of the most recently pushed PDU's header in the payload.
    ///
    /// Used for updating the `more_follows` flag when pushing a new PDU.
    last_header_location: Option<usize>,
}

impl<'sto> CreatedFrame<'sto> {
    /// The size of a completely empty PDU.
    ///
    /// Includes the header and 2 bytes for the working counter.
    pub const PDU_OVERHEAD_BYTES: usize = PduHeader::PACKED_LEN + 2;

    pub(in crate::pdu_loop) fn claim_created(
        frame: NonNull<FrameElement<0>>,
        frame_index: u8,
        pdu_idx: &'sto AtomicU8,
        frame_data_len: usize,
        source_mac: EthernetAddress,
    ) -> Result<Self, ()> {
        let frame = unsafe { FrameElement::claim_created(frame, frame_index)? };

        let mut inner = FrameBox::new(frame, pdu_idx, frame_data_len);

        inner.init(source_mac);

        Ok(Self {
            inner,
            pdu_count: 0,
            last_header_location: None,
        })
    }

    /// The index of the storage slot this frame occupies.
    pub fn storage_slot_index(&self) -> u8 {
        self.inner.storage_slot_index()
    }

    /// Whether any PDUs have been pushed into this frame yet.
    pub fn is_empty(&self) -> bool {
        self.pdu_count == 0
    }

    /// Push a PDU into this frame.
    ///
    /// The first call initialises the frame with a single datagram; each subsequent call chains
    /// another datagram onto it, setting the "more PDUs follow" flag of the previous one. The
    /// returned [`PduHandle`] locates this PDU's payload and working counter in the response
    /// frame; pass it to [`ReceivedFrame::pdu`](crate::ReceivedFrame::pdu).
    ///
    /// For pure read commands the payload region is left zeroed no matter what `data` contains,
    /// so stale buffer contents never reach the wire. `len_override` reserves payload space
    /// beyond (never below) the packed length of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`PduError::TooLong`] if the remaining space in the frame is not enough to hold
    /// the new PDU.
    pub fn push_pdu(
        &mut self,
        command: Command,
        data: impl EtherCrabWireWrite,
        len_override: Option<u16>,
    ) -> Result<PduHandle, PduError> {
        let data_length_usize =
            len_override.map_or(data.packed_len(), |l| usize::from(l).max(data.packed_len()));

        let flags = PduFlags::new(data_length_usize as u16, false);

        // PDU header + data + working counter (space is required for the response value - we
        // never actually write it)
        let alloc_size = data_length_usize + Self::PDU_OVERHEAD_BYTES;

        // The number of payload bytes already consumed in this frame (e.g. from prior PDU
        // insertions). This is the start byte of the current PDU we want to push.
        let start_byte = self.inner.pdu_payload_len();

        // Comprises PDU header, body, working counter
        let buf_range = start_byte..(start_byte + alloc_size);

        // Establish the mapping between this PDU index and the Ethernet frame it's being put in
        let pdu_idx = self.inner.next_pdu_idx();

        fmt::trace!(
            "Write PDU {:#04x} into frame index {} ({}, {} bytes at {:?})",
            pdu_idx,
            self.inner.storage_slot_index(),
            command,
            data_length_usize,
            buf_range
        );

        let l = self.inner.pdu_buf_mut().len();

        let pdu_buf = self
            .inner
            .pdu_buf_mut()
            .get_mut(buf_range.clone())
            .ok_or_else(|| {
                fmt::trace!(
                    "Push PDU buf range too long: wanted {:?} from {:?}",
                    buf_range,
                    0..l
                );

                PduError::TooLong
            })?;

        let header = PduHeader::new(command, pdu_idx, flags);

        let pdu_buf = write_packed(header, pdu_buf);

        // Payload. Read commands carry none; their region stays zeroed from slot claim time.
        if !command.payload_is_zeroed() {
            let _pdu_buf = write_packed(data, pdu_buf);
        }

        // The next two bytes are the working counter, but it is always zero on send (and the
        // buffer is zero-initialised) so there's nothing to do.

        // Don't need to check length here as we do that with `pdu_buf_mut().get_mut()` above.
        self.inner.add_pdu(alloc_size, pdu_idx);

        let index_in_frame = self.pdu_count;

        self.pdu_count += 1;

        // The new PDU was added successfully, so the previous PDU's `more_follows` flag can now
        // be set.
        if let Some(last_header_location) = self.last_header_location.as_mut() {
            let flags_offset = PduHeader::FLAGS_OFFSET;

            let last_flags_buf = fmt::unwrap_opt!(self
                .inner
                .pdu_buf_mut()
                .get_mut((*last_header_location + flags_offset)..));

            let mut last_flags = fmt::unwrap!(PduFlags::unpack_from_slice(last_flags_buf));

            last_flags.more_follows = true;

            last_flags.pack_to_slice_unchecked(last_flags_buf);

            // Previous header is now the one we just inserted
            *last_header_location = buf_range.start;
        } else {
            self.last_header_location = Some(start_byte);
        }

        Ok(PduHandle {
            index_in_frame,
            pdu_idx,
            command_code: command.code(),
            buf_start: start_byte,
            alloc_size,
        })
    }

    /// Whether a PDU with a payload of `packed_len` bytes still fits in this frame.
    pub fn can_push_pdu_payload(&self, packed_len: usize) -> bool {
        let alloc_size = packed_len + Self::PDU_OVERHEAD_BYTES;

        let start_byte = self.inner.pdu_payload_len();

        start_byte + alloc_size <= self.inner.pdu_buf().len()
    }

    /// The length in bytes of this frame as it will appear on the wire.
    pub fn wire_len(&self) -> usize {
        EthernetFrame::<&[u8]>::buffer_len(
            EthercatFrameHeader::PACKED_LEN + self.inner.pdu_payload_len(),
        )
    }

    /// Finalise the EtherCAT frame header and transmit the frame with the given blocking
    /// callback.
    ///
    /// The closure must return the number of bytes written to the network interface. On success
    /// the slot moves into the waiting-for-response state and a [`SentFrame`] tracking it is
    /// returned; on any failure the slot is released.
    pub(crate) fn send_via(
        self,
        send: impl FnOnce(&[u8]) -> Result<usize, Error>,
    ) -> Result<SentFrame<'sto>, Error> {
        let mut inner = self.inner;

        EthercatFrameHeader::pdu(inner.pdu_payload_len() as u16)
            .pack_to_slice_unchecked(inner.ecat_frame_header_mut());

        // This claim is exclusively owned, so the slot must still be in the created state
        inner
            .swap_state(FrameState::Created, FrameState::Sending)
            .map_err(|bad| {
                fmt::error!("Frame to send was claimed in state {:?}", bad);

                Error::Internal
            })?;

        let len = self.wire_len();

        let bytes = &inner.ethernet_frame().into_inner()[0..len];

        match send(bytes) {
            Ok(bytes_sent) if bytes_sent == len => {
                fmt::trace!("Frame index {} is sent", inner.storage_slot_index());

                inner.set_state(FrameState::Sent);

                Ok(SentFrame::new(inner))
            }
            Ok(bytes_sent) => {
                Self::release_failed_send(&inner);

                Err(Error::PartialSend {
                    len,
                    sent: bytes_sent,
                })
            }
            Err(res) => {
                Self::release_failed_send(&inner);

                Err(res)
            }
        }
    }

    fn release_failed_send(inner: &FrameBox<'_>) {
        inner.clear_first_pdu();
        inner.set_state(FrameState::None);
    }

    /// Get the PDU area of the frame buffer. Only really useful for assertions in tests.
    #[cfg(test)]
    pub(crate) fn pdu_buf(&self) -> &[u8] {
        self.inner.pdu_buf()
    }
}

impl Drop for CreatedFrame<'_> {
    fn drop(&mut self) {
        // ONLY free the frame if it's still in the created state. If it's been moved into
        // sending/sent/receiving/etc, we must leave it alone.
        if self
            .inner
            .swap_state(FrameState::Created, FrameState::None)
            .is_ok()
        {
            self.inner.clear_first_pdu();
        }
    }
}

// SAFETY: This unsafe impl is required due to `FrameBox` containing a `NonNull`, however this
// impl is ok because `FrameBox` also holds the lifetime `'sto` of the backing store, which is
// where the `NonNull<FrameElement>` comes from.
//
// For example, if the backing storage is `'static`, we can send things between threads. If it's
// not, the associated lifetime will prevent the framebox from being used in anything that
// requires a 'static bound.
unsafe impl Send for CreatedFrame<'_> {}

/// Locates one PDU inside a sent frame so its response payload and working counter can be
/// retrieved once the frame returns.
#[derive(Debug, Clone)]
#[cfg_attr(test, derive(Eq, PartialEq))]
pub struct PduHandle {
    /// Position of this PDU within its frame, 0 for the first.
    pub index_in_frame: u8,

    /// PDU wire index, used to validate that a response matches the request.
    pub(crate) pdu_idx: u8,

    /// The command code this PDU was sent with.
    pub(crate) command_code: u8,

    /// Byte offset of this PDU within the PDU area of the response frame.
    pub(crate) buf_start: usize,

    /// The number of bytes allocated for the PDU header, payload and working counter.
    pub(crate) alloc_size: usize,
}
