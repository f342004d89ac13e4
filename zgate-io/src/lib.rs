//! zgate I/O and platform abstraction
//!
//! This crate provides the outbound channel control packets are written to,
//! the single-slot retransmission timer, and the persistent endpoint
//! identity file.

pub mod connector;
pub mod identity;
pub mod timer;

pub use connector::{ChannelConnector, Connector, ConnectorError, UdpConnector};
pub use identity::{IdentityError, ZidFile};
pub use timer::{TimeoutHandler, TimeoutProvider};
