//! zgate Protocol Core
//!
//! This crate implements the wire-level pieces of the media-path key
//! negotiation gateway: control/media packet classification, the control
//! packet format with its CRC trailer, control sequence numbers, negotiated
//! key material, status codes, and the negotiation engine boundary.

pub mod engine;
pub mod packet;
pub mod secrets;
pub mod sequence;
pub mod status;

pub use engine::{
    EngineCallbacks, EngineContext, EngineError, EngineFactory, NegotiationEngine, Zid, ZID_SIZE,
};
pub use packet::{
    classify, is_control, verify_checksum, ControlHeader, ControlPacket, MediaHeader, PacketError,
    PacketKind,
};
pub use secrets::{Direction, NegotiatedSecrets, Role, RoleKeys};
pub use sequence::ControlSeq;
pub use status::{ErrorCode, InfoCode, Severity, SevereCode, StatusCode, WarningCode};
