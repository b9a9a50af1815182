//! The blocking EtherCAT datagram primitives.

use crate::{
    command::{Command, Reads, Writes},
    error::{Error, PduError},
    fmt,
    pdu_loop::{CreatedFrame, PduHandle, PduRx, PduStorageRef, ReceivedFrame, SentFrame},
    register::RegisterAddress,
    transport::Transport,
    PortConfig,
};
use core::time::Duration;
use ethercrab_wire::EtherCrabWireRead;
use std::sync::Mutex;
use std::time::Instant;

/// An open EtherCAT MainDevice port: a pool of transaction slots over one link-layer transport.
///
/// All primitives are blocking and one-shot: each claims a slot, assembles a frame, transmits
/// it, and waits until the response returns or `timeout` expires. On success the working counter
/// is returned; [`Error::Timeout`] is the sole failure mode of a healthy segment. There is no
/// retry at this layer - reissuing a primitive is the caller's decision.
///
/// A `Port` may be shared between any number of threads. Slot claims are lock-free; the receive
/// path of the transport is serialised internally, and whichever thread holds it routes incoming
/// frames to the transactions they belong to.
#[derive(Debug)]
pub struct Port<'sto, S> {
    storage: PduStorageRef<'sto>,
    socket: S,
    rx: Mutex<PduRx<'sto>>,
    config: PortConfig,
}

impl<'sto, S> Port<'sto, S>
where
    S: Transport,
{
    pub(crate) fn new(storage: PduStorageRef<'sto>, socket: S, config: PortConfig) -> Self {
        let rx = Mutex::new(PduRx::new(storage.clone(), config.source_mac));

        Self {
            storage,
            socket,
            rx,
            config,
        }
    }

    /// The number of transactions that can be in flight at once.
    pub fn capacity(&self) -> usize {
        self.storage.num_frames
    }

    /// Claim a free transaction slot to compose a custom (e.g. multi-datagram) frame in.
    ///
    /// Push one or more PDUs into the returned frame with
    /// [`push_pdu`](CreatedFrame::push_pdu), then pass it to [`exchange`](Port::exchange).
    /// Dropping the frame without sending it releases the slot.
    pub fn alloc_frame(&self) -> Result<CreatedFrame<'sto>, Error> {
        self.storage
            .alloc_frame(self.config.source_mac)
            .ok_or(Error::Pdu(PduError::SwapState))
    }

    /// Transmit an assembled frame and block until its response frame returns or `timeout`
    /// expires.
    ///
    /// The slot is always released by the time this returns an error, so a timed out transaction
    /// leaves no residue.
    pub fn exchange(
        &self,
        frame: CreatedFrame<'sto>,
        timeout: Duration,
    ) -> Result<ReceivedFrame<'sto>, Error> {
        let deadline = Instant::now().checked_add(timeout);

        let sent = frame.send_via(|bytes| {
            self.socket.send(bytes).map_err(|e| {
                fmt::error!("Failed to transmit frame: {}", e);

                Error::SendFrame
            })
        })?;

        self.wait_for_response(sent, deadline)
    }

    /// Drain the interface until the given transaction's response arrives or the deadline
    /// passes.
    ///
    /// This is the sole suspension point of every primitive. Frames for other transactions
    /// received along the way are routed into their slots, unblocking whoever waits on them.
    fn wait_for_response(
        &self,
        sent: SentFrame<'sto>,
        deadline: Option<Instant>,
    ) -> Result<ReceivedFrame<'sto>, Error> {
        loop {
            // Fast path: another thread already routed our response while draining the interface
            // for its own transaction.
            if let Some(received) = sent.try_claim_received() {
                return Ok(received);
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());

                    if remaining.is_zero() {
                        // Give the response one final chance: it may have arrived between the
                        // claim attempt above and now.
                        return sent.abandon().ok_or(Error::Timeout);
                    }

                    remaining
                }
                None => Duration::MAX,
            };

            let mut rx = self
                .rx
                .lock()
                // The slot pool stays coherent through a panic on another thread; keep draining.
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            // Our response may have been routed while waiting for the receive lock
            if let Some(received) = sent.try_claim_received() {
                return Ok(received);
            }

            match self.socket.recv_timeout(rx.buf_mut(), remaining) {
                Ok(len) => {
                    rx.receive_frame(len);
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    // Loop back round to the deadline check
                }
                Err(e) => {
                    fmt::error!("Failed to receive frame: {}", e);

                    drop(rx);

                    // Release the slot; a response that won the race is superseded by the
                    // interface failure and dropped.
                    let _ = sent.abandon();

                    return Err(Error::ReceiveFrame);
                }
            }
        }
    }

    /// The shared skeleton of all single-datagram primitives.
    fn single_pdu(
        &self,
        command: Command,
        data: impl ethercrab_wire::EtherCrabWireWrite,
        len_override: Option<u16>,
        timeout: Duration,
    ) -> Result<(ReceivedFrame<'sto>, PduHandle), Error> {
        let mut frame = self.alloc_frame()?;

        let handle = frame.push_pdu(command, data, len_override)?;

        let frame = self.exchange(frame, timeout)?;

        Ok((frame, handle))
    }

    fn pdu_write(
        &self,
        command: Command,
        data: &[u8],
        timeout: Duration,
    ) -> Result<u16, Error> {
        let (frame, handle) = self.single_pdu(command, data, None, timeout)?;

        Ok(frame.pdu(&handle)?.working_counter())
    }

    /// Reads copy the response payload back out if any SubDevice processed the datagram.
    ///
    /// `data` also provides the outgoing payload where the command carries one (`ARMW`/`FRMW`
    /// distribute it to SubDevices ahead of the addressed one; `LRW` writes it); pure reads go
    /// out zeroed regardless.
    ///
    /// When `check_command` is set (logical addressing), a response echoing a different command
    /// code leaves `data` untouched but still yields the working counter: the slot is shared
    /// with whatever was chained into the frame, so the payload cannot be trusted, while the
    /// counter still tells the caller how much of the bus is alive.
    fn pdu_read(
        &self,
        command: Command,
        data: &mut [u8],
        check_command: bool,
        timeout: Duration,
    ) -> Result<u16, Error> {
        let len = chunk_len(data)?;

        let (frame, handle) = self.single_pdu(command, &*data, Some(len), timeout)?;

        let pdu = frame.pdu(&handle)?;

        if pdu.working_counter() > 0 && (!check_command || pdu.command_code() == command.code()) {
            data.copy_from_slice(&pdu);
        }

        Ok(pdu.working_counter())
    }

    /// `BWR`: broadcast write. Blocking.
    ///
    /// `address` is the auto increment counter, normally 0 for a broadcast; `register` the
    /// SubDevice memory address. Returns the working counter: the number of SubDevices that
    /// accepted the write.
    pub fn bwr(
        &self,
        address: u16,
        register: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<u16, Error> {
        self.pdu_write(Command::Write(Writes::Bwr { address, register }), data, timeout)
    }

    /// `BRD`: broadcast read. Blocking.
    ///
    /// Every SubDevice ORs `data.len()` bytes at `register` into the frame and increments the
    /// working counter, making this the canonical "how many SubDevices are alive" probe.
    pub fn brd(
        &self,
        address: u16,
        register: u16,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<u16, Error> {
        self.pdu_read(
            Command::Read(Reads::Brd { address, register }),
            data,
            false,
            timeout,
        )
    }

    /// `APRD`: auto increment address read. Blocking.
    ///
    /// Each SubDevice increments `address`; the one that sees zero executes the read.
    pub fn aprd(
        &self,
        address: u16,
        register: u16,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<u16, Error> {
        self.pdu_read(
            Command::Read(Reads::Aprd { address, register }),
            data,
            false,
            timeout,
        )
    }

    /// `APWR`: auto increment address write. Blocking.
    pub fn apwr(
        &self,
        address: u16,
        register: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<u16, Error> {
        self.pdu_write(Command::Write(Writes::Apwr { address, register }), data, timeout)
    }

    /// `ARMW`: auto increment address read, multiple write. Blocking.
    ///
    /// The SubDevice at position `address` reads; every following SubDevice writes the read
    /// value. Used for e.g. propagating clock values along the segment.
    pub fn armw(
        &self,
        address: u16,
        register: u16,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<u16, Error> {
        self.pdu_read(
            Command::Read(Reads::Armw { address, register }),
            data,
            false,
            timeout,
        )
    }

    /// `FRMW`: configured address read, multiple write. Blocking.
    pub fn frmw(
        &self,
        address: u16,
        register: u16,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<u16, Error> {
        self.pdu_read(
            Command::Read(Reads::Frmw { address, register }),
            data,
            false,
            timeout,
        )
    }

    /// `FPRD`: configured station address read. Blocking.
    pub fn fprd(
        &self,
        address: u16,
        register: u16,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<u16, Error> {
        self.pdu_read(
            Command::Read(Reads::Fprd { address, register }),
            data,
            false,
            timeout,
        )
    }

    /// `FPWR`: configured station address write. Blocking.
    pub fn fpwr(
        &self,
        address: u16,
        register: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<u16, Error> {
        self.pdu_write(Command::Write(Writes::Fpwr { address, register }), data, timeout)
    }

    /// `APRD` returning one word. Blocking.
    ///
    /// The two response payload bytes are reinterpreted in host byte order exactly as they
    /// appeared on the (little-endian) wire; no conversion is performed. A timeout is an error;
    /// a working counter of zero yields `0`.
    pub fn aprdw(&self, address: u16, register: u16, timeout: Duration) -> Result<u16, Error> {
        let mut w = [0u8; 2];

        self.aprd(address, register, &mut w, timeout)?;

        Ok(u16::from_ne_bytes(w))
    }

    /// `FPRD` returning one word. Blocking.
    ///
    /// See [`aprdw`](Port::aprdw) for the byte order caveat.
    pub fn fprdw(&self, address: u16, register: u16, timeout: Duration) -> Result<u16, Error> {
        let mut w = [0u8; 2];

        self.fprd(address, register, &mut w, timeout)?;

        Ok(u16::from_ne_bytes(w))
    }

    /// `APWR` of one word, passed in host byte order. Blocking.
    pub fn apwrw(
        &self,
        address: u16,
        register: u16,
        value: u16,
        timeout: Duration,
    ) -> Result<u16, Error> {
        self.apwr(address, register, &value.to_ne_bytes(), timeout)
    }

    /// `FPWR` of one word, passed in host byte order. Blocking.
    pub fn fpwrw(
        &self,
        address: u16,
        register: u16,
        value: u16,
        timeout: Duration,
    ) -> Result<u16, Error> {
        self.fpwr(address, register, &value.to_ne_bytes(), timeout)
    }

    /// `LRD`: logical memory read. Blocking.
    ///
    /// The response payload is only copied back when the echoed command code matches `LRD`; a
    /// mismatched response still yields its working counter and the caller must treat the stale
    /// `data` as an application level anomaly.
    pub fn lrd(&self, address: u32, data: &mut [u8], timeout: Duration) -> Result<u16, Error> {
        self.pdu_read(Command::Read(Reads::Lrd { address }), data, true, timeout)
    }

    /// `LWR`: logical memory write. Blocking.
    pub fn lwr(&self, address: u32, data: &[u8], timeout: Duration) -> Result<u16, Error> {
        self.pdu_write(Command::Write(Writes::Lwr { address }), data, timeout)
    }

    /// `LRW`: logical memory read/write. Blocking.
    ///
    /// `data` is written to the bus and overwritten with the response payload. The same command
    /// code check as [`lrd`](Port::lrd) guards the copy back.
    pub fn lrw(&self, address: u32, data: &mut [u8], timeout: Duration) -> Result<u16, Error> {
        self.pdu_read(Command::Write(Writes::Lrw { address }), data, true, timeout)
    }

    /// `LRW` plus Distributed Clocks reference read, in a single frame. Blocking.
    ///
    /// The frame chains two datagrams: the process data `LRW`, then an `FRMW` that reads the
    /// reference SubDevice's system time register (`0x0910`) and distributes it along the rest
    /// of the segment - one round trip for both the cyclic exchange and clock synchronisation.
    ///
    /// `dc_reference` is the configured station address of the reference SubDevice. `dc_time` is
    /// written to the bus as the previous reference time and overwritten with the newly read
    /// one.
    ///
    /// The working counter returned is that of the `LRW` datagram alone, i.e. the process data
    /// SubDevice count the caller expects, not the frame aggregate including the clock read.
    pub fn lrwdc(
        &self,
        address: u32,
        data: &mut [u8],
        dc_reference: u16,
        dc_time: &mut i64,
        timeout: Duration,
    ) -> Result<u16, Error> {
        let lrw_command = Command::Write(Writes::Lrw { address });

        let mut frame = self.alloc_frame()?;

        let lrw_handle = frame.push_pdu(lrw_command, &*data, None)?;

        // The system time register is 8 bytes; `u64` packs little-endian as the wire wants it
        let dc_handle = frame.push_pdu(
            Command::Read(Reads::Frmw {
                address: dc_reference,
                register: RegisterAddress::DcSystemTime.into(),
            }),
            *dc_time as u64,
            None,
        )?;

        let frame = self.exchange(frame, timeout)?;

        let lrw_pdu = frame.pdu(&lrw_handle)?;
        let dc_pdu = frame.pdu(&dc_handle)?;

        if lrw_pdu.working_counter() > 0 && lrw_pdu.command_code() == lrw_command.code() {
            data.copy_from_slice(&lrw_pdu);

            *dc_time = u64::unpack_from_slice(&dc_pdu)? as i64;

            // The WKC of the process data exchange, not the chained clock read
            Ok(lrw_pdu.working_counter())
        } else {
            Ok(dc_pdu.working_counter())
        }
    }
}

/// Bound a buffer length to what a PDU length field can express.
fn chunk_len(data: &[u8]) -> Result<u16, Error> {
    u16::try_from(data.len()).map_err(|_| Error::Pdu(PduError::TooLong))
}
