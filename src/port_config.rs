//! Configuration passed to [`Port`](crate::Port).

use crate::ethernet::EthernetAddress;

/// Configuration passed to [`Port`](crate::Port).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PortConfig {
    /// Source MAC address written into every transmitted frame.
    ///
    /// Received frames carrying this exact source address are discarded as reflections of our own
    /// transmissions; the first SubDevice on the bus sets the locally administered bit, so real
    /// responses always differ in the first octet.
    pub source_mac: EthernetAddress,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            source_mac: crate::MASTER_ADDR,
        }
    }
}
