//! zgate - media-path key negotiation gateway
//!
//! [`SecurityGate`] sits between a media pipeline and the wire. It separates
//! key-negotiation control packets from media, hands the former to a
//! pluggable negotiation engine, and protects media once the engine reports
//! negotiated secrets.

mod callbacks;
pub mod config;
pub mod events;
pub mod gate;
pub mod stats;

pub use zgate_crypto as crypto;
pub use zgate_io as io;
pub use zgate_protocol as protocol;

pub use config::{GateConfig, DEFAULT_CLIENT_ID};
pub use events::{EventSink, SecurityEvent};
pub use gate::{GatePhase, InitError, SecurityGate};
pub use stats::GateStats;

// Re-export commonly used types
pub use protocol::{
    Direction, EngineCallbacks, EngineContext, EngineError, EngineFactory, NegotiatedSecrets,
    NegotiationEngine, Role, RoleKeys, StatusCode,
};
