//! Negotiation engine boundary
//!
//! The key-negotiation state machine is an external collaborator. It is
//! driven through [`NegotiationEngine`] and talks back through
//! [`EngineCallbacks`], which the session gate implements.

use crate::secrets::{Direction, NegotiatedSecrets, Role};
use crate::status::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Size of an endpoint identifier (ZID) in bytes
pub const ZID_SIZE: usize = 12;

/// Long-term endpoint identifier
pub type Zid = [u8; ZID_SIZE];

/// Operations the gate invokes on the negotiation engine
///
/// All methods may be called concurrently from the packet path and from the
/// timer thread.
pub trait NegotiationEngine: Send + Sync {
    /// Begin negotiation (typically sends the first Hello)
    fn start(&self);

    /// Stop negotiation and release engine resources
    fn stop(&self);

    /// Process one negotiation message (control packet body without header and CRC)
    fn process_message(&self, message: &[u8]);

    /// Handle expiry of the timer requested through [`EngineCallbacks::activate_timer`]
    fn on_timeout(&self);

    /// Whether the engine reached its secure state
    fn in_secure_state(&self) -> bool;

    /// Acknowledge the final confirmation implicitly, after media decrypted
    /// successfully with the new keys
    fn confirm_secure_ack(&self);

    /// This endpoint's identifier
    fn zid(&self) -> Zid;

    /// Identifier announced by the peer, once known
    ///
    /// Used to look up SAS verification state for the peer.
    fn peer_zid(&self) -> Option<Zid> {
        None
    }

    /// Role negotiated in the current round, if any
    fn role(&self) -> Option<Role> {
        None
    }

    fn sas_verified(&self) {}

    fn reset_sas_verified(&self) {}

    fn accept_enrollment(&self, _accepted: bool) {}

    fn set_pbx_enrollment(&self, _enabled: bool) {}

    /// Store SAS signature data; returns false if the engine rejects it
    fn set_signature_data(&self, _data: &[u8]) -> bool {
        false
    }

    fn signature_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn signature_length(&self) -> usize {
        0
    }

    fn hello_hash(&self) -> String {
        String::new()
    }

    fn set_srtps_secret(&self, _secret: &[u8]) {}

    fn set_other_secret(&self, _secret: &[u8]) {}
}

/// Primitives and notifications the engine calls back into
pub trait EngineCallbacks: Send + Sync {
    /// Send a negotiation message to the peer; false if the write failed
    fn send_data(&self, message: &[u8]) -> bool;

    /// Install the keys for one direction; false aborts negotiation completion
    fn secrets_ready(&self, secrets: &NegotiatedSecrets, part: Direction) -> bool;

    /// Both directions are secured
    fn secrets_on(&self, cipher: &str, sas: Option<&str>, verified: bool);

    /// Security for one direction was switched off
    fn secrets_off(&self, part: Direction);

    /// Arm the single retransmission timer, replacing a pending one
    fn activate_timer(&self, delay: Duration) -> bool;

    /// Cancel the pending timer, if any
    fn cancel_timer(&self) -> bool;

    fn send_info(&self, code: StatusCode);

    fn negotiation_failed(&self, code: StatusCode);

    /// The peer does not speak the negotiation protocol
    fn not_supported_by_other(&self);

    fn ask_enrollment(&self, info: &str);

    fn inform_enrollment(&self, info: &str);

    fn sign_sas(&self, sas: &str);

    fn check_sas_signature(&self, sas: &str) -> bool;
}

/// Everything an engine needs at construction time
#[derive(Clone)]
pub struct EngineContext {
    /// This endpoint's identifier
    pub zid: Zid,
    /// Client identification string announced to the peer
    pub client_id: String,
    /// Callback sink for the engine
    pub callbacks: Arc<dyn EngineCallbacks>,
}

/// Engine construction errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine setup failed: {0}")]
    Setup(String),

    #[error("Unsupported configuration: {0}")]
    Unsupported(String),
}

/// Creates negotiation engines during gate initialization
pub trait EngineFactory: Send + Sync {
    fn create(&self, context: EngineContext) -> Result<Arc<dyn NegotiationEngine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn(EngineContext) -> Result<Arc<dyn NegotiationEngine>, EngineError> + Send + Sync,
{
    fn create(&self, context: EngineContext) -> Result<Arc<dyn NegotiationEngine>, EngineError> {
        self(context)
    }
}
