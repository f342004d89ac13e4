//! Pre-shared key negotiation engine
//!
//! For static deployments where both relays are provisioned with the same
//! key material. Starting the engine installs the configured secrets right
//! away, then sends the peer Hello messages until it answers with
//! HelloAck. A peer that never answers is reported as not supporting the
//! protocol; media stays protected either way.

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use zgate::crypto::SrtpPolicy;
use zgate::protocol::packet::MESSAGE_PREAMBLE;
use zgate::protocol::{InfoCode, SevereCode, Zid, ZID_SIZE};
use zgate::{
    Direction, EngineCallbacks, EngineContext, EngineError, NegotiatedSecrets, NegotiationEngine,
    Role, StatusCode,
};

const TYPE_HELLO: &[u8; 8] = b"Hello   ";
const TYPE_HELLO_ACK: &[u8; 8] = b"HelloACK";

/// Hello retransmission interval
pub const HELLO_INTERVAL: Duration = Duration::from_millis(150);

/// Hello transmissions before giving up on the peer
pub const MAX_HELLO_RETRIES: u32 = 20;

#[derive(Debug, Default)]
struct HelloState {
    running: bool,
    secured: bool,
    peer_seen: bool,
    retries: u32,
    peer_zid: Option<Zid>,
}

/// Negotiation engine backed by pre-shared secrets
pub struct PresharedEngine {
    zid: Zid,
    client_id: String,
    secrets: NegotiatedSecrets,
    callbacks: Arc<dyn EngineCallbacks>,
    state: Mutex<HelloState>,
}

impl PresharedEngine {
    pub fn new(context: EngineContext, secrets: NegotiatedSecrets) -> Self {
        PresharedEngine {
            zid: context.zid,
            client_id: context.client_id,
            secrets,
            callbacks: context.callbacks,
            state: Mutex::new(HelloState::default()),
        }
    }

    /// Engine factory for use with [`zgate::SecurityGate::initialize`]
    pub fn factory(
        secrets: NegotiatedSecrets,
    ) -> impl Fn(EngineContext) -> Result<Arc<dyn NegotiationEngine>, EngineError> + Send + Sync
    {
        move |context| {
            let engine: Arc<dyn NegotiationEngine> =
                Arc::new(PresharedEngine::new(context, secrets.clone()));
            Ok(engine)
        }
    }

    pub fn peer_seen(&self) -> bool {
        self.state.lock().peer_seen
    }

    fn message(&self, kind: &[u8; 8]) -> BytesMut {
        let body_len = 4 + kind.len() + ZID_SIZE;
        let mut buf = BytesMut::with_capacity(body_len);
        buf.put_u16(MESSAGE_PREAMBLE);
        buf.put_u16((body_len / 4) as u16);
        buf.put_slice(kind);
        buf.put_slice(&self.zid);
        buf
    }

    fn send_hello(&self) {
        if !self.callbacks.send_data(&self.message(TYPE_HELLO)) {
            tracing::debug!("Hello not sent, will retry");
        }
        if !self.callbacks.activate_timer(HELLO_INTERVAL) {
            self.callbacks
                .negotiation_failed(StatusCode::Severe(SevereCode::NoTimer));
        }
    }

    fn install_secrets(&self) -> bool {
        let sender = self.callbacks.secrets_ready(&self.secrets, Direction::Sender);
        let receiver = self.callbacks.secrets_ready(&self.secrets, Direction::Receiver);
        if !(sender && receiver) {
            self.callbacks
                .negotiation_failed(StatusCode::Severe(SevereCode::ProtocolError));
            return false;
        }

        let own = self.secrets.keys_for(self.secrets.role);
        let policy =
            SrtpPolicy::aes_cm_hmac_sha1(own.key_len(), self.secrets.auth_tag_len(), own.salt_len());
        self.callbacks.secrets_on(&policy.to_string(), None, true);
        true
    }
}

impl NegotiationEngine for PresharedEngine {
    fn start(&self) {
        {
            let mut state = self.state.lock();
            if state.running {
                return;
            }
            state.running = true;
            state.retries = 0;
        }
        tracing::info!("Pre-shared engine starting as {} ({})", self.secrets.role, self.client_id);

        let secured = self.install_secrets();
        self.state.lock().secured = secured;
        self.send_hello();
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        state.running = false;
        drop(state);
        self.callbacks.cancel_timer();
    }

    fn process_message(&self, message: &[u8]) {
        if message.len() < 4 + 8 + ZID_SIZE {
            tracing::debug!("Short negotiation message ({} bytes)", message.len());
            return;
        }
        let kind = &message[4..12];
        let mut peer_zid = [0u8; ZID_SIZE];
        peer_zid.copy_from_slice(&message[12..12 + ZID_SIZE]);

        if kind == TYPE_HELLO {
            self.state.lock().peer_zid = Some(peer_zid);
            self.callbacks.send_data(&self.message(TYPE_HELLO_ACK));
            self.callbacks
                .send_info(StatusCode::Info(InfoCode::HelloReceived));
        } else if kind == TYPE_HELLO_ACK {
            let first = {
                let mut state = self.state.lock();
                let first = !state.peer_seen;
                state.peer_seen = true;
                state.peer_zid = Some(peer_zid);
                first
            };
            if first {
                self.callbacks.cancel_timer();
                tracing::info!("Peer answered Hello");
            }
        } else {
            tracing::debug!("Ignoring negotiation message {:?}", String::from_utf8_lossy(kind));
        }
    }

    fn on_timeout(&self) {
        let retry = {
            let mut state = self.state.lock();
            if !state.running || state.peer_seen {
                return;
            }
            state.retries += 1;
            state.retries < MAX_HELLO_RETRIES
        };
        if retry {
            self.send_hello();
        } else {
            tracing::warn!("Peer did not answer {} Hello messages", MAX_HELLO_RETRIES);
            self.callbacks.not_supported_by_other();
        }
    }

    fn in_secure_state(&self) -> bool {
        self.state.lock().secured
    }

    fn confirm_secure_ack(&self) {
        self.state.lock().secured = true;
    }

    fn zid(&self) -> Zid {
        self.zid
    }

    fn peer_zid(&self) -> Option<Zid> {
        self.state.lock().peer_zid
    }

    fn role(&self) -> Option<Role> {
        Some(self.secrets.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Vec<u8>>>,
        installed: Mutex<Vec<Direction>>,
        cipher: Mutex<Option<String>>,
        timers: AtomicUsize,
        cancels: AtomicUsize,
        not_supported: AtomicUsize,
    }

    impl EngineCallbacks for Recorder {
        fn send_data(&self, message: &[u8]) -> bool {
            self.sent.lock().push(message.to_vec());
            true
        }
        fn secrets_ready(&self, _secrets: &NegotiatedSecrets, part: Direction) -> bool {
            self.installed.lock().push(part);
            true
        }
        fn secrets_on(&self, cipher: &str, _sas: Option<&str>, _verified: bool) {
            *self.cipher.lock() = Some(cipher.to_string());
        }
        fn secrets_off(&self, _part: Direction) {}
        fn activate_timer(&self, _delay: Duration) -> bool {
            self.timers.fetch_add(1, Ordering::SeqCst);
            true
        }
        fn cancel_timer(&self) -> bool {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            true
        }
        fn send_info(&self, _code: StatusCode) {}
        fn negotiation_failed(&self, _code: StatusCode) {}
        fn not_supported_by_other(&self) {
            self.not_supported.fetch_add(1, Ordering::SeqCst);
        }
        fn ask_enrollment(&self, _info: &str) {}
        fn inform_enrollment(&self, _info: &str) {}
        fn sign_sas(&self, _sas: &str) {}
        fn check_sas_signature(&self, _sas: &str) -> bool {
            false
        }
    }

    fn engine(recorder: &Arc<Recorder>, zid: u8) -> PresharedEngine {
        let secrets = crate::config::RelayConfig::example(crate::config::RoleConfig::Initiator)
            .secrets()
            .unwrap()
            .unwrap();
        let callbacks: Arc<dyn EngineCallbacks> = recorder.clone();
        PresharedEngine::new(
            EngineContext {
                zid: [zid; ZID_SIZE],
                client_id: "test".into(),
                callbacks,
            },
            secrets,
        )
    }

    #[test]
    fn test_start_installs_and_sends_hello() {
        let recorder = Arc::new(Recorder::default());
        let engine = engine(&recorder, 1);
        engine.start();
        engine.start();

        assert_eq!(
            recorder.installed.lock().as_slice(),
            &[Direction::Sender, Direction::Receiver]
        );
        assert_eq!(
            recorder.cipher.lock().as_deref(),
            Some("AES_CM_128_HMAC_SHA1_80")
        );
        assert!(engine.in_secure_state());

        let sent = recorder.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][..2], &[0x50, 0x5A]);
        assert_eq!(&sent[0][4..12], TYPE_HELLO);
        assert_eq!(recorder.timers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hello_answered_with_ack() {
        let recorder = Arc::new(Recorder::default());
        let a = engine(&recorder, 1);
        let peer = engine(&Arc::new(Recorder::default()), 2);

        a.process_message(&peer.message(TYPE_HELLO));
        let sent = recorder.sent.lock();
        assert_eq!(&sent[0][4..12], TYPE_HELLO_ACK);
        assert_eq!(a.peer_zid(), Some([2; ZID_SIZE]));
        assert!(!a.peer_seen());
    }

    #[test]
    fn test_ack_stops_probing() {
        let recorder = Arc::new(Recorder::default());
        let a = engine(&recorder, 1);
        let peer = engine(&Arc::new(Recorder::default()), 2);
        a.start();

        a.process_message(&peer.message(TYPE_HELLO_ACK));
        assert!(a.peer_seen());
        assert_eq!(a.peer_zid(), Some([2; ZID_SIZE]));
        assert_eq!(recorder.cancels.load(Ordering::SeqCst), 1);

        a.on_timeout();
        assert_eq!(recorder.sent.lock().len(), 1);
    }

    #[test]
    fn test_silent_peer_reported() {
        let recorder = Arc::new(Recorder::default());
        let a = engine(&recorder, 1);
        a.start();
        for _ in 0..MAX_HELLO_RETRIES {
            a.on_timeout();
        }

        assert_eq!(recorder.not_supported.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.sent.lock().len(), MAX_HELLO_RETRIES as usize);
    }
}
