//! The transaction slot pool and in-place EtherCAT frame assembly.
//!
//! Each slot owns one preallocated Ethernet frame buffer. A transaction claims a slot
//! ([`CreatedFrame`]), writes one or more PDUs into it, transmits the buffer, and blocks until
//! the response frame is routed back into the same slot by whichever thread is currently
//! draining the network interface. Slot states are tracked with a single atomic per slot, so
//! claims and releases never take a lock.

pub(crate) mod frame_element;
mod frame_header;
mod pdu_flags;
mod pdu_header;
mod pdu_rx;
mod storage;

pub use frame_element::created_frame::{CreatedFrame, PduHandle};
pub use frame_element::received_frame::{ReceivedFrame, ReceivedPdu};
pub(crate) use frame_element::receiving_frame::SentFrame;
pub(crate) use pdu_rx::PduRx;
pub use storage::PduStorage;
pub(crate) use storage::PduStorageRef;
