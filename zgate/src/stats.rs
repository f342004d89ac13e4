//! Gate statistics

use std::time::Duration;

/// Packet counters of one gate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateStats {
    /// Outbound media packets handed to the wire
    pub media_sent: u64,
    /// Inbound media packets delivered to the application
    pub media_received: u64,
    /// Outbound media bytes after protection
    pub bytes_sent: u64,
    /// Inbound media bytes after unprotection
    pub bytes_received: u64,
    /// Control packets written to the connector
    pub control_sent: u64,
    /// Control packets received from the peer
    pub control_received: u64,
    /// Control packets dropped for a bad checksum
    pub crc_failures: u64,
    /// Inbound media packets rejected by the keyed transform
    pub auth_failures: u64,
    /// Control packets that could not be written
    pub control_send_failures: u64,
    /// Time since the gate was created
    pub uptime: Duration,
}
