//! Engine callback bridge
//!
//! The engine holds this bridge, which refers back to the gate weakly so the
//! gate and its engine do not keep each other alive. Callbacks arriving after
//! the gate is gone are ignored.

use crate::events::SecurityEvent;
use crate::gate::{GateInner, SecurityGate};
use std::sync::{Arc, Weak};
use std::time::Duration;
use zgate_io::TimeoutHandler;
use zgate_protocol::{Direction, EngineCallbacks, NegotiatedSecrets, StatusCode};

pub(crate) struct GateCallbacks {
    gate: Weak<GateInner>,
}

impl GateCallbacks {
    pub(crate) fn new(gate: Weak<GateInner>) -> Self {
        GateCallbacks { gate }
    }

    fn gate(&self) -> Option<SecurityGate> {
        self.gate.upgrade().map(SecurityGate::from_inner)
    }

    fn emit(&self, event: SecurityEvent) {
        if let Some(gate) = self.gate.upgrade() {
            gate.emit(event);
        }
    }
}

impl EngineCallbacks for GateCallbacks {
    fn send_data(&self, message: &[u8]) -> bool {
        self.gate()
            .map(|gate| gate.send_control(message))
            .unwrap_or(false)
    }

    fn secrets_ready(&self, secrets: &NegotiatedSecrets, part: Direction) -> bool {
        self.gate()
            .map(|gate| gate.install_secrets(secrets, part))
            .unwrap_or(false)
    }

    fn secrets_on(&self, cipher: &str, sas: Option<&str>, verified: bool) {
        tracing::info!("Media secured with {}", cipher);
        self.emit(SecurityEvent::SecureOn {
            cipher: cipher.to_string(),
        });
        if let Some(sas) = sas {
            self.emit(SecurityEvent::ShowSas {
                sas: sas.to_string(),
                verified,
            });
        }
    }

    fn secrets_off(&self, part: Direction) {
        if let Some(gate) = self.gate() {
            gate.remove_secrets(part);
        }
        self.emit(SecurityEvent::SecureOff { direction: part });
    }

    fn activate_timer(&self, delay: Duration) -> bool {
        let Some(gate) = self.gate.upgrade() else {
            return false;
        };
        let Some(timer) = gate.timer() else {
            return false;
        };
        let target = Arc::new(GateCallbacks::new(self.gate.clone()));
        tracing::trace!("Timer requested in {:?}", delay);
        timer.request(delay, target)
    }

    fn cancel_timer(&self) -> bool {
        self.gate
            .upgrade()
            .and_then(|gate| gate.timer())
            .map(|timer| timer.cancel())
            .unwrap_or(false)
    }

    fn send_info(&self, code: StatusCode) {
        tracing::debug!("Negotiation {}", code);
        self.emit(SecurityEvent::Message { code });
    }

    fn negotiation_failed(&self, code: StatusCode) {
        tracing::warn!("Negotiation failed: {}", code);
        self.emit(SecurityEvent::NegotiationFailed { code });
    }

    fn not_supported_by_other(&self) {
        tracing::info!("Peer does not support key negotiation");
        self.emit(SecurityEvent::NotSupportedByOther);
    }

    fn ask_enrollment(&self, info: &str) {
        self.emit(SecurityEvent::AskEnrollment {
            info: info.to_string(),
        });
    }

    fn inform_enrollment(&self, info: &str) {
        self.emit(SecurityEvent::InformEnrollment {
            info: info.to_string(),
        });
    }

    fn sign_sas(&self, sas: &str) {
        self.emit(SecurityEvent::SignSas {
            sas: sas.to_string(),
        });
    }

    fn check_sas_signature(&self, sas: &str) -> bool {
        self.gate
            .upgrade()
            .and_then(|gate| gate.sink())
            .map(|sink| sink.check_sas_signature(sas))
            .unwrap_or(false)
    }
}

impl TimeoutHandler for GateCallbacks {
    fn on_timeout(&self) {
        let engine = self.gate.upgrade().and_then(|gate| gate.engine());
        if let Some(engine) = engine {
            engine.on_timeout();
        }
    }
}
