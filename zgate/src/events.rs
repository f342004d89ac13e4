//! Application notifications
//!
//! Negotiation lifecycle callbacks are forwarded to one registered
//! [`EventSink`]. Without a sink, events are dropped.

use crossbeam::channel::Sender;
use zgate_protocol::{Direction, StatusCode};

/// Notification delivered to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    /// The gate finished initialization
    Initialized,
    /// Both directions are secured with `cipher`
    SecureOn { cipher: String },
    /// Short authentication string to show the user
    ShowSas { sas: String, verified: bool },
    /// Security for one direction was switched off
    SecureOff { direction: Direction },
    /// Informational, warning or error message
    Message { code: StatusCode },
    /// Negotiation failed and will not complete
    NegotiationFailed { code: StatusCode },
    /// The peer does not support key negotiation
    NotSupportedByOther,
    /// The peer asks this endpoint to enroll
    AskEnrollment { info: String },
    /// Enrollment result
    InformEnrollment { info: String },
    /// The SAS should be signed
    SignSas { sas: String },
}

/// Receiver of [`SecurityEvent`]s
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: SecurityEvent);

    /// Check the peer's SAS signature; sinks that cannot verify reject it
    fn check_sas_signature(&self, _sas: &str) -> bool {
        false
    }
}

impl EventSink for Sender<SecurityEvent> {
    fn on_event(&self, event: SecurityEvent) {
        // a dropped receiver means nobody is listening any more
        let _ = self.send(event);
    }
}
