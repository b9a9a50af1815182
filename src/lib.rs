//! A blocking EtherCAT base datagram layer.
//!
//! This crate implements the lowest layer of an EtherCAT MainDevice (master): assembling one or
//! more EtherCAT PDUs (datagrams) in place inside a pool of preallocated Ethernet frame buffers,
//! transmitting them over a raw link-layer transport, and blocking until the response frame
//! returns with the working counters filled in by the SubDevices on the bus.
//!
//! It deliberately stops there. SubDevice discovery, state machines, mailbox protocols (CoE, FoE,
//! ...), EEPROM/SII access and Distributed Clocks synchronisation algorithms belong to higher
//! layers; all of them are expressible as sequences of the primitives exported here.
//!
//! ## Features
//!
//! - [`PduStorage`]: a caller-owned, fixed-size pool of transaction slots. No allocation occurs
//!   in the datagram path.
//! - [`Port`]: the blocking primitive set - broadcast (`BWR`/`BRD`), auto increment
//!   (`APRD`/`APWR`/`ARMW`), configured station (`FPRD`/`FPWR`/`FRMW`) and logical
//!   (`LRD`/`LWR`/`LRW`) addressing, word-return convenience variants, and the compound
//!   [`lrwdc`](Port::lrwdc) frame that exchanges process data and reads the reference clock in a
//!   single round trip.
//! - Frame composition: [`Port::alloc_frame`] and [`CreatedFrame::push_pdu`] are public, so
//!   higher layers can chain their own multi-datagram frames and send them with
//!   [`Port::exchange`].
//! - A [`Transport`] trait as the seam to the NIC, with a Linux `AF_PACKET` implementation in
//!   [`std::RawSocket`](crate::std::RawSocket).
//!
//! Concurrent use is supported: any number of threads may call primitives on one shared [`Port`].
//! Slot claims are lock-free atomic state transitions; whichever thread is blocked on the
//! interface drains incoming frames and routes each one to the slot it belongs to.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ethergram::{PduStorage, PortConfig, RegisterAddress, TIMEOUT_RET, std::RawSocket};
//!
//! const MAX_FRAMES: usize = 8;
//! const FRAME_SIZE: usize = PduStorage::element_size(1486);
//!
//! static STORAGE: PduStorage<MAX_FRAMES, FRAME_SIZE> = PduStorage::new();
//!
//! fn main() -> Result<(), ethergram::error::Error> {
//!     let socket = RawSocket::new("eth0").expect("open interface");
//!
//!     let port = STORAGE
//!         .try_port(socket, PortConfig::default())
//!         .expect("storage can only be split once");
//!
//!     // Count SubDevices on the bus: every SubDevice increments the working counter of a
//!     // broadcast read.
//!     let mut al_status = [0u8; 2];
//!     let subdevices = port.brd(0, RegisterAddress::AlStatus.into(), &mut al_status, TIMEOUT_RET)?;
//!
//!     println!("{} SubDevices responded", subdevices);
//!
//!     Ok(())
//! }
//! ```
#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

mod fmt;

pub mod command;
pub mod error;
pub mod ethernet;
mod pdu_loop;
#[cfg(feature = "std")]
mod port;
#[cfg(feature = "std")]
mod port_config;
pub mod register;
#[cfg(feature = "std")]
pub mod std;
#[cfg(feature = "std")]
mod transport;

pub use command::{Command, Reads, Writes};
pub use pdu_loop::{CreatedFrame, PduHandle, PduStorage, ReceivedFrame, ReceivedPdu};
#[cfg(feature = "std")]
pub use port::Port;
#[cfg(feature = "std")]
pub use port_config::PortConfig;
pub use register::RegisterAddress;
#[cfg(feature = "std")]
pub use transport::Transport;

use ethernet::EthernetAddress;

/// EtherType of EtherCAT frames as registered with IEEE, big-endian on the wire.
pub const ETHERCAT_ETHERTYPE: u16 = 0x88a4;

/// Source MAC address written into every transmitted frame.
///
/// The first SubDevice on the bus sets the locally administered (U/L) bit of returned frames, so
/// responses arrive from `12:10:10:10:10:10` and are distinguishable from our own transmissions.
pub(crate) const MASTER_ADDR: EthernetAddress = EthernetAddress([0x10, 0x10, 0x10, 0x10, 0x10, 0x10]);

/// Mask of the length bits in EtherCAT frame and PDU headers: both are 11 bits long.
pub(crate) const LEN_MASK: u16 = 0b0000_0111_1111_1111;

/// Maximum PDU payload length a single datagram may carry in a standard Ethernet frame.
///
/// 1518 byte frame, minus Ethernet (14) and EtherCAT (2) headers, PDU header (10), working
/// counter (2) and FCS (4).
pub const MAX_PDU_LEN: usize = 1486;

/// The default PDU response timeout of 2ms, plenty for a full-length frame on 100BASE-TX.
pub const TIMEOUT_RET: core::time::Duration = core::time::Duration::from_micros(2000);

#[cfg(test)]
pub(crate) fn test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
