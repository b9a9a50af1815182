use crate::{
    error::PduError,
    ethernet::{EthernetAddress, EthernetFrame},
    fmt,
    pdu_loop::{
        frame_header::EthercatFrameHeader, pdu_header::PduHeader, storage::PduStorageRef,
    },
    ETHERCAT_ETHERTYPE,
};
use ethercrab_wire::{EtherCrabWireRead, EtherCrabWireSized};

/// Scratch buffer size for received frames: one maximum length Ethernet frame with headroom.
const RX_BUF_LEN: usize = 1530;

/// What happened to a received Ethernet frame.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) enum ReceiveAction {
    /// The frame was ignored.
    ///
    /// Caused by other, non-EtherCAT traffic on the chosen network interface (e.g. when sending
    /// EtherCAT packets through a switch), by reflections of our own transmissions, or by
    /// responses arriving after their transaction already timed out.
    Ignored,

    /// The frame was successfully routed into the slot of the transaction that sent it.
    Processed,
}

/// EtherCAT frame receive adapter.
///
/// One per port. Whichever transaction currently holds the port's receive lock reads frames from
/// the interface into [`buf_mut`](PduRx::buf_mut) and routes each through
/// [`receive_frame`](PduRx::receive_frame); responses for *other* transactions land in their
/// slots as a side effect, which is what lets any number of threads block on one interface.
#[derive(Debug)]
pub(crate) struct PduRx<'sto> {
    storage: PduStorageRef<'sto>,
    source_mac: EthernetAddress,
    buf: [u8; RX_BUF_LEN],
}

impl<'sto> PduRx<'sto> {
    pub(crate) fn new(storage: PduStorageRef<'sto>, source_mac: EthernetAddress) -> Self {
        Self {
            storage,
            source_mac,
            buf: [0u8; RX_BUF_LEN],
        }
    }

    /// The scratch buffer incoming frames are read into.
    pub(crate) fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Given a complete Ethernet II frame of `len` bytes in the scratch buffer, parse a response
    /// out of it and copy it into the slot of the transaction waiting for it.
    ///
    /// Malformed or foreign traffic is never an error, only `Ignored`: a bad frame on the wire
    /// must not abort the unrelated transaction that happened to be holding the receive lock.
    // NOTE: &mut self so this struct can only be used in one place at a time.
    pub(crate) fn receive_frame(&mut self, len: usize) -> ReceiveAction {
        let Some(ethernet_frame) = self.buf.get(0..len) else {
            fmt::trace!("Received frame longer than scratch buffer, ignoring");

            return ReceiveAction::Ignored;
        };

        let Ok(raw_packet) = EthernetFrame::new_checked(ethernet_frame) else {
            fmt::trace!("Received runt frame, ignoring");

            return ReceiveAction::Ignored;
        };

        // Look for EtherCAT packets whilst ignoring broadcast packets sent from self. As per
        // <https://github.com/OpenEtherCATsociety/SOEM/issues/585#issuecomment-1013688786>, the
        // first SubDevice will set the second bit of the MSB of the MAC address (U/L bit). This
        // means if we send e.g. 10:10:10:10:10:10, we receive 12:10:10:10:10:10 which passes
        // through this filter.
        if raw_packet.ethertype() != ETHERCAT_ETHERTYPE || raw_packet.src_addr() == self.source_mac
        {
            fmt::trace!("Ignore frame");

            return ReceiveAction::Ignored;
        }

        let i = raw_packet.payload();

        let Ok(frame_header) = EthercatFrameHeader::unpack_from_slice(i).inspect_err(|&e| {
            fmt::error!("Failed to parse frame header: {}", e);
        }) else {
            return ReceiveAction::Ignored;
        };

        if frame_header.payload_len == 0 {
            fmt::trace!("Ignoring empty frame");

            return ReceiveAction::Ignored;
        }

        // Skip EtherCAT header and get the PDU(s) payload
        let Some(i) = i.get(
            EthercatFrameHeader::PACKED_LEN
                ..(EthercatFrameHeader::PACKED_LEN + usize::from(frame_header.payload_len)),
        ) else {
            fmt::error!("Received frame is too short");

            return ReceiveAction::Ignored;
        };

        // `i` now contains the EtherCAT frame payload, consisting of one or more PDUs including
        // their headers and payloads.

        // The second byte of the first PDU header is its index. All PDUs in a frame share the
        // slot of the first, so it identifies the transaction.
        let Some(pdu_idx) = i.get(PduHeader::INDEX_OFFSET).copied() else {
            return ReceiveAction::Ignored;
        };

        // The PDU has its own EtherCAT index. This needs mapping back to the original frame.
        let Some(frame_index) = self.storage.frame_index_by_first_pdu_index(pdu_idx) else {
            // No transaction is waiting on this index (any more): either a response crossed its
            // deadline, or something else on the segment speaks EtherCAT.
            fmt::trace!("Received frame for unknown PDU index {:#04x}, ignoring", pdu_idx);

            return ReceiveAction::Ignored;
        };

        fmt::trace!(
            "Receiving frame index {} (found from PDU {:#04x})",
            frame_index,
            pdu_idx
        );

        let mut frame = match self.storage.claim_receiving(frame_index) {
            Ok(frame) => frame,
            Err(PduError::InvalidIndex(index)) => {
                fmt::error!("Received frame maps to nonexistent slot {}", index);

                return ReceiveAction::Ignored;
            }
            Err(_) => {
                // The transaction released the slot between the index lookup and now
                fmt::trace!("Frame slot {} is no longer waiting, ignoring", frame_index);

                return ReceiveAction::Ignored;
            }
        };

        let frame_data = frame.buf_mut();

        let Some(dest) = frame_data.get_mut(0..i.len()) else {
            fmt::error!("Received frame too long for slot buffer, ignoring");

            // Put the slot back into its waiting state so the transaction can time out normally
            frame.release();

            return ReceiveAction::Ignored;
        };

        dest.copy_from_slice(i);

        if frame.mark_received().is_err() {
            return ReceiveAction::Ignored;
        }

        ReceiveAction::Processed
    }
}
