//! Drive every datagram primitive end to end against a mock link layer.
//!
//! The mock echoes each transmitted frame back the way an EtherCAT segment would: source MAC
//! U/L bit set, working counters stamped, and read payloads replaced with per-command canned
//! data.

use ethergram::{
    error::{Error, PduError},
    PduStorage, PortConfig, RegisterAddress, Transport,
};
use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::Mutex,
    time::{Duration, Instant},
};

const FRAME_SIZE: usize = PduStorage::element_size(1486);
const TIMEOUT: Duration = Duration::from_millis(50);

const CMD_APRD: u8 = 0x01;
const CMD_FPRD: u8 = 0x04;
const CMD_BRD: u8 = 0x07;
const CMD_LRD: u8 = 0x0a;
const CMD_LRW: u8 = 0x0c;
const CMD_ARMW: u8 = 0x0d;
const CMD_FRMW: u8 = 0x0e;

/// Byte offset of the first PDU header in an Ethernet frame.
const PDU_START: usize = 14 + 2;

#[derive(Default)]
struct MockBus {
    /// Working counter stamped into every PDU, unless overridden per command.
    wkc: u16,
    wkc_by_command: HashMap<u8, u16>,
    /// Payload bytes stamped into PDUs of the given command code.
    read_data: HashMap<u8, Vec<u8>>,
    /// Rewrite the command code of matching PDUs in the response, simulating a mangled reply.
    corrupt_command: Option<(u8, u8)>,
    /// When `false` the bus swallows every frame, causing timeouts.
    respond: bool,
    sent: Mutex<Vec<Vec<u8>>>,
    pending: Mutex<VecDeque<Vec<u8>>>,
}

impl MockBus {
    fn new(wkc: u16) -> Self {
        Self {
            wkc,
            respond: true,
            ..Self::default()
        }
    }

    fn with_read_data(mut self, command: u8, data: &[u8]) -> Self {
        self.read_data.insert(command, data.to_vec());

        self
    }

    fn with_wkc_for(mut self, command: u8, wkc: u16) -> Self {
        self.wkc_by_command.insert(command, wkc);

        self
    }

    fn silent() -> Self {
        Self {
            respond: false,
            ..Self::default()
        }
    }

    fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    /// Walk the PDUs of a sent frame and build the response a bus segment would return.
    fn build_reply(&self, frame: &[u8]) -> Vec<u8> {
        let mut reply = frame.to_vec();

        // The first SubDevice sets the U/L bit of the source MAC on the way round
        reply[6] |= 0x02;

        let mut offset = PDU_START;

        loop {
            let command = reply[offset];
            let flags = u16::from_le_bytes([reply[offset + 6], reply[offset + 7]]);
            let len = usize::from(flags & 0x07ff);
            let more = flags & 0x8000 != 0;

            if let Some((from, to)) = self.corrupt_command {
                if command == from {
                    reply[offset] = to;
                }
            }

            let payload = offset + 10;

            if let Some(data) = self.read_data.get(&command) {
                let n = len.min(data.len());

                reply[payload..payload + n].copy_from_slice(&data[..n]);
            }

            let wkc = self.wkc_by_command.get(&command).copied().unwrap_or(self.wkc);

            reply[payload + len..payload + len + 2].copy_from_slice(&wkc.to_le_bytes());

            if !more {
                break;
            }

            offset = payload + len + 2;
        }

        reply
    }
}

impl Transport for MockBus {
    fn send(&self, frame: &[u8]) -> io::Result<usize> {
        self.sent.lock().unwrap().push(frame.to_vec());

        if self.respond {
            let reply = self.build_reply(frame);

            self.pending.lock().unwrap().push_back(reply);
        }

        Ok(frame.len())
    }

    fn recv_timeout(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if let Some(frame) = self.pending.lock().unwrap().pop_front() {
            buf[..frame.len()].copy_from_slice(&frame);

            return Ok(frame.len());
        }

        std::thread::sleep(timeout.min(Duration::from_millis(1)));

        Err(io::ErrorKind::TimedOut.into())
    }
}

#[test]
fn brd_counts_subdevices() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bus = MockBus::new(3).with_read_data(CMD_BRD, &[0x08, 0x00]);

    let storage: PduStorage<8, FRAME_SIZE> = PduStorage::new();
    let port = storage.try_port(&bus, PortConfig::default()).unwrap();

    // Prefilled with junk the response must overwrite
    let mut al_status = [0xffu8; 2];

    let wkc = port
        .brd(0, RegisterAddress::AlStatus.into(), &mut al_status, TIMEOUT)
        .unwrap();

    assert_eq!(wkc, 3);
    assert_eq!(al_status, [0x08, 0x00]);

    let sent = bus.sent_frames();

    assert_eq!(sent.len(), 1);

    let frame = &sent[0];

    // Broadcast destination, master source, EtherCAT EtherType (big-endian)
    assert_eq!(&frame[0..6], &[0xff; 6]);
    assert_eq!(&frame[6..12], &[0x10; 6]);
    assert_eq!(&frame[12..14], &[0x88, 0xa4]);

    // EtherCAT frame header: PDU area of 10 + 2 + 2 bytes, protocol type 1
    assert_eq!(&frame[14..16], &[0x0e, 0x10]);

    // BRD to (0, 0x0130), 2 bytes, no more PDUs follow
    assert_eq!(frame[16], CMD_BRD);
    assert_eq!(&frame[18..22], &[0x00, 0x00, 0x30, 0x01]);
    assert_eq!(&frame[22..24], &[0x02, 0x00]);

    // Outgoing payload of a read is zeroed no matter what the caller's buffer held, and the
    // working counter goes out as zero
    assert_eq!(&frame[26..30], &[0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn read_primitive_round_trips() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bus = MockBus::new(3)
        .with_read_data(CMD_APRD, &[0x11, 0x22])
        .with_read_data(CMD_FPRD, &[0x33, 0x44])
        .with_read_data(CMD_ARMW, &[0x55, 0x66])
        .with_read_data(CMD_FRMW, &[0x77, 0x88])
        .with_read_data(CMD_LRD, &[0x99, 0xaa]);

    let storage: PduStorage<8, FRAME_SIZE> = PduStorage::new();
    let port = storage.try_port(&bus, PortConfig::default()).unwrap();

    let mut buf = [0u8; 2];

    assert_eq!(port.aprd(0, 0x0000, &mut buf, TIMEOUT).unwrap(), 3);
    assert_eq!(buf, [0x11, 0x22]);

    assert_eq!(port.fprd(0x1001, 0x0130, &mut buf, TIMEOUT).unwrap(), 3);
    assert_eq!(buf, [0x33, 0x44]);

    assert_eq!(port.armw(0, 0x0910, &mut buf, TIMEOUT).unwrap(), 3);
    assert_eq!(buf, [0x55, 0x66]);

    assert_eq!(port.frmw(0x1000, 0x0910, &mut buf, TIMEOUT).unwrap(), 3);
    assert_eq!(buf, [0x77, 0x88]);

    assert_eq!(port.lrd(0x0001_0000, &mut buf, TIMEOUT).unwrap(), 3);
    assert_eq!(buf, [0x99, 0xaa]);
}

#[test]
fn aprdw_returns_wire_word() {
    let _ = env_logger::builder().is_test(true).try_init();

    // 0x1234 little-endian on the wire
    let bus = MockBus::new(1).with_read_data(CMD_APRD, &[0x34, 0x12]);

    let storage: PduStorage<8, FRAME_SIZE> = PduStorage::new();
    let port = storage.try_port(&bus, PortConfig::default()).unwrap();

    let word = port.aprdw(0, 0x0000, TIMEOUT).unwrap();

    // The word primitives return the raw payload bytes reinterpreted in host byte order
    assert_eq!(word, u16::from_ne_bytes([0x34, 0x12]));

    #[cfg(target_endian = "little")]
    assert_eq!(word, 0x1234);
}

#[test]
fn fpwr_wire_layout() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bus = MockBus::new(1);

    let storage: PduStorage<8, FRAME_SIZE> = PduStorage::new();
    let port = storage.try_port(&bus, PortConfig::default()).unwrap();

    let wkc = port
        .fpwr(0x1001, 0x0120, &[0x04, 0x00], TIMEOUT)
        .unwrap();

    assert_eq!(wkc, 1);

    let sent = bus.sent_frames();
    let frame = &sent[0];

    let idx = frame[17];

    // PDU header for FPWR to station 0x1001, register 0x0120, 2 byte payload, then the payload
    // itself and a zeroed WKC
    assert_eq!(
        &frame[16..30],
        &[
            0x05, idx, 0x01, 0x10, 0x20, 0x01, 0x02, 0x00, 0x00, 0x00, // header
            0x04, 0x00, // payload
            0x00, 0x00, // WKC
        ]
    );
}

#[test]
fn word_writes_pass_host_bytes_through() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bus = MockBus::new(1);

    let storage: PduStorage<8, FRAME_SIZE> = PduStorage::new();
    let port = storage.try_port(&bus, PortConfig::default()).unwrap();

    port.fpwrw(0x1001, 0x0010, 0x1234, TIMEOUT).unwrap();
    port.apwrw(0, 0x0010, 0xabcd, TIMEOUT).unwrap();

    let sent = bus.sent_frames();

    assert_eq!(&sent[0][26..28], &0x1234u16.to_ne_bytes());
    assert_eq!(&sent[1][26..28], &0xabcdu16.to_ne_bytes());
}

#[test]
fn lrw_writes_and_reads_back() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bus = MockBus::new(2).with_read_data(CMD_LRW, &[0xde, 0xad, 0xbe, 0xef]);

    let storage: PduStorage<8, FRAME_SIZE> = PduStorage::new();
    let port = storage.try_port(&bus, PortConfig::default()).unwrap();

    let mut data = [0x01, 0x02, 0x03, 0x04];

    let wkc = port.lrw(0x0004_0000, &mut data, TIMEOUT).unwrap();

    assert_eq!(wkc, 2);
    assert_eq!(data, [0xde, 0xad, 0xbe, 0xef]);

    // The outgoing frame must carry the original process data
    let sent = bus.sent_frames();

    assert_eq!(&sent[0][26..30], &[0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn logical_read_skips_copy_on_command_mismatch() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut bus = MockBus::new(2).with_read_data(CMD_LRD, &[0xde, 0xad]);

    // The reply comes back claiming to be an LRW
    bus.corrupt_command = Some((CMD_LRD, CMD_LRW));

    let storage: PduStorage<8, FRAME_SIZE> = PduStorage::new();
    let port = storage.try_port(&bus, PortConfig::default()).unwrap();

    let mut data = [0x00, 0x00];

    // The working counter is still reported, but the stale buffer is left alone
    let wkc = port.lrd(0x0001_0000, &mut data, TIMEOUT).unwrap();

    assert_eq!(wkc, 2);
    assert_eq!(data, [0x00, 0x00]);
}

#[test]
fn lrwdc_exchanges_process_data_and_clock() {
    let _ = env_logger::builder().is_test(true).try_init();

    let now: u64 = 0x0011_2233_4455_6677;

    let bus = MockBus::new(0)
        .with_wkc_for(CMD_LRW, 5)
        .with_wkc_for(CMD_FRMW, 1)
        .with_read_data(CMD_LRW, &[0xaa; 8])
        .with_read_data(CMD_FRMW, &now.to_le_bytes());

    let storage: PduStorage<8, FRAME_SIZE> = PduStorage::new();
    let port = storage.try_port(&bus, PortConfig::default()).unwrap();

    let mut data = [0x55u8; 8];
    let mut dc_time: i64 = 0x0102_0304;

    let wkc = port
        .lrwdc(0x0001_0000, &mut data, 0x1000, &mut dc_time, TIMEOUT)
        .unwrap();

    // The working counter of the LRW datagram alone, not the frame aggregate
    assert_eq!(wkc, 5);
    assert_eq!(data, [0xaa; 8]);
    assert_eq!(dc_time, now as i64);

    let sent = bus.sent_frames();
    let frame = &sent[0];

    // Two chained datagrams of 8 bytes each: EtherCAT header length 2 * (10 + 8 + 2)
    assert_eq!(&frame[14..16], &[0x28, 0x10]);

    // First PDU is the LRW with the more-follows bit set
    assert_eq!(frame[16], CMD_LRW);
    assert_eq!(&frame[22..24], &[0x08, 0x80]);

    // Second is the FRMW to the reference SubDevice's DC system time register, last in frame,
    // carrying the previous time little-endian
    assert_eq!(frame[36], CMD_FRMW);
    assert_eq!(&frame[38..42], &[0x00, 0x10, 0x10, 0x09]);
    assert_eq!(&frame[42..44], &[0x08, 0x00]);
    assert_eq!(&frame[46..54], &0x0102_0304u64.to_le_bytes());
}

#[test]
fn lrwdc_mismatch_returns_aggregate_wkc() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut bus = MockBus::new(0)
        .with_wkc_for(CMD_LRW, 5)
        .with_wkc_for(CMD_FRMW, 9)
        .with_read_data(CMD_FRMW, &0xffff_ffff_ffff_ffffu64.to_le_bytes());

    bus.corrupt_command = Some((CMD_LRW, CMD_LRD));

    let storage: PduStorage<8, FRAME_SIZE> = PduStorage::new();
    let port = storage.try_port(&bus, PortConfig::default()).unwrap();

    let mut data = [0x55u8; 8];
    let mut dc_time: i64 = 42;

    let wkc = port
        .lrwdc(0x0001_0000, &mut data, 0x1000, &mut dc_time, TIMEOUT)
        .unwrap();

    // On a command mismatch the frame-final working counter is returned and nothing is copied
    assert_eq!(wkc, 9);
    assert_eq!(data, [0x55u8; 8]);
    assert_eq!(dc_time, 42);
}

#[test]
fn max_length_datagram() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bus = MockBus::new(1);

    let storage: PduStorage<8, FRAME_SIZE> = PduStorage::new();
    let port = storage.try_port(&bus, PortConfig::default()).unwrap();

    let data = [0xa5u8; 1486];

    let wkc = port.lwr(0, &data, TIMEOUT).unwrap();

    assert_eq!(wkc, 1);

    let sent = bus.sent_frames();

    // A full 1514 byte frame: 14 + 2 + 10 + 1486 + 2
    assert_eq!(sent[0].len(), 1514);
}

#[test]
fn oversized_datagram_is_rejected() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bus = MockBus::new(1);

    let storage: PduStorage<8, FRAME_SIZE> = PduStorage::new();
    let port = storage.try_port(&bus, PortConfig::default()).unwrap();

    let data = [0xa5u8; 1487];

    assert_eq!(
        port.lwr(0, &data, TIMEOUT),
        Err(Error::Pdu(PduError::TooLong))
    );

    // Nothing must have reached the wire
    assert!(bus.sent_frames().is_empty());
}

#[test]
fn timeout_releases_slot() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bus = MockBus::silent();

    let storage: PduStorage<8, FRAME_SIZE> = PduStorage::new();
    let port = storage.try_port(&bus, PortConfig::default()).unwrap();

    let mut buf = [0u8; 2];

    let start = Instant::now();

    let result = port.fprd(0x1001, 0x0130, &mut buf, TIMEOUT);

    assert_eq!(result, Err(Error::Timeout));
    assert!(start.elapsed() >= TIMEOUT);

    // Every slot must be claimable again: the timed out transaction left no residue
    let frames = (0..port.capacity())
        .map(|_| port.alloc_frame().expect("slot should be free"))
        .collect::<Vec<_>>();

    drop(frames);
}

#[test]
fn concurrent_primitives_share_one_interface() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bus = MockBus::new(3)
        .with_read_data(CMD_BRD, &[0x08, 0x00])
        .with_read_data(CMD_FPRD, &[0x01, 0x02]);

    let storage: PduStorage<8, FRAME_SIZE> = PduStorage::new();
    let port = storage.try_port(&bus, PortConfig::default()).unwrap();

    std::thread::scope(|s| {
        let handles = (0..4)
            .map(|i| {
                let port = &port;

                s.spawn(move || {
                    let mut buf = [0u8; 2];

                    if i % 2 == 0 {
                        let wkc = port.brd(0, 0x0130, &mut buf, TIMEOUT).unwrap();

                        (wkc, buf, [0x08, 0x00])
                    } else {
                        let wkc = port.fprd(0x1001, 0x0130, &mut buf, TIMEOUT).unwrap();

                        (wkc, buf, [0x01, 0x02])
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            let (wkc, got, expected) = handle.join().unwrap();

            assert_eq!(wkc, 3);
            assert_eq!(got, expected);
        }
    });
}

#[test]
fn custom_multi_pdu_frame() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bus = MockBus::new(2).with_read_data(CMD_BRD, &[0xab, 0xcd]);

    let storage: PduStorage<8, FRAME_SIZE> = PduStorage::new();
    let port = storage.try_port(&bus, PortConfig::default()).unwrap();

    // Compose a frame reading two registers in one round trip
    let mut frame = port.alloc_frame().unwrap();

    let status = frame
        .push_pdu(ethergram::Command::brd(0x0130), (), Some(2))
        .unwrap();
    let control = frame
        .push_pdu(ethergram::Command::brd(0x0120), (), Some(2))
        .unwrap();

    let response = port.exchange(frame, TIMEOUT).unwrap();

    let status = response.pdu(&status).unwrap();
    let control = response.pdu(&control).unwrap();

    assert_eq!(status.working_counter(), 2);
    assert_eq!(control.working_counter(), 2);
    assert_eq!(&*status, &[0xab, 0xcd]);
    assert_eq!(&*control, &[0xab, 0xcd]);
}
