//! Session gate
//!
//! The gate sits between the media pipeline and the wire. Outbound media is
//! protected with the sender transform once one is installed; inbound wire
//! data is split into control packets, which go to the negotiation engine,
//! and media, which is unprotected with the receiver transform.
//!
//! Lock discipline: no gate lock is held while calling into the engine, the
//! keyed transforms, the connector or the event sink. Those calls may come
//! back into the gate from the same thread.

use crate::callbacks::GateCallbacks;
use crate::config::GateConfig;
use crate::events::{EventSink, SecurityEvent};
use crate::stats::GateStats;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use zgate_crypto::{CryptoError, KeyManager, KeyedTransform};
use zgate_io::{Connector, IdentityError, TimeoutProvider, ZidFile};
use zgate_protocol::packet::media_ssrc;
use zgate_protocol::{
    is_control, ControlPacket, ControlSeq, Direction, EngineContext, EngineError, EngineFactory,
    NegotiatedSecrets, NegotiationEngine, PacketError, Role, StatusCode, WarningCode, Zid,
};

/// Lifecycle phase of a gate
///
/// Per-direction security is tracked separately, see
/// [`SecurityGate::is_secured`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    /// No engine yet; media passes through, control packets are dropped
    Uninitialized,
    /// Engine created, negotiation not started
    Initialized,
    /// Engine told to start
    Negotiating,
    /// Terminal; engine discarded, media passes through
    Stopped,
}

impl fmt::Display for GatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatePhase::Uninitialized => write!(f, "uninitialized"),
            GatePhase::Initialized => write!(f, "initialized"),
            GatePhase::Negotiating => write!(f, "negotiating"),
            GatePhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Gate initialization errors
#[derive(Error, Debug)]
pub enum InitError {
    #[error("Gate is {0}, cannot initialize")]
    InvalidPhase(GatePhase),

    #[error("No crypto backend configured")]
    NoBackend,

    #[error("Identity store unavailable: {0}")]
    Identity(#[from] IdentityError),

    #[error("Failed to start timer: {0}")]
    Timer(#[source] io::Error),

    #[error("Negotiation engine unavailable: {0}")]
    Engine(#[from] EngineError),
}

struct SessionState {
    phase: GatePhase,
    /// Auto-sensing and control packet processing
    enabled: bool,
    /// Outbound stream SSRC, learned from the first outbound media packet
    ssrc: Option<u32>,
    media_counted: u64,
}

impl SessionState {
    /// Move to `Negotiating` if auto-sensing allows it
    fn try_auto_start(&mut self) -> bool {
        if self.enabled && self.phase == GatePhase::Initialized && self.media_counted >= 1 {
            self.phase = GatePhase::Negotiating;
            true
        } else {
            false
        }
    }
}

pub(crate) struct GateInner {
    state: Mutex<SessionState>,
    engine: RwLock<Option<Arc<dyn NegotiationEngine>>>,
    keys: RwLock<Option<Arc<KeyManager>>>,
    timer: RwLock<Option<Arc<TimeoutProvider>>>,
    connector: RwLock<Option<Arc<dyn Connector>>>,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
    /// Held across the connector write so packets leave in sequence order
    control_seq: Mutex<ControlSeq>,
    stats: Mutex<GateStats>,
    created_at: Instant,
}

impl GateInner {
    pub(crate) fn engine(&self) -> Option<Arc<dyn NegotiationEngine>> {
        self.engine.read().clone()
    }

    pub(crate) fn keys(&self) -> Option<Arc<KeyManager>> {
        self.keys.read().clone()
    }

    pub(crate) fn timer(&self) -> Option<Arc<TimeoutProvider>> {
        self.timer.read().clone()
    }

    pub(crate) fn sink(&self) -> Option<Arc<dyn EventSink>> {
        self.sink.read().clone()
    }

    pub(crate) fn emit(&self, event: SecurityEvent) {
        match self.sink() {
            Some(sink) => sink.on_event(event),
            None => tracing::trace!("No event sink, dropping {:?}", event),
        }
    }

    /// Enter `Stopped` and release the engine, keys and timer
    ///
    /// Returns false if the gate was already stopped.
    fn shutdown(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.phase == GatePhase::Stopped {
                return false;
            }
            state.phase = GatePhase::Stopped;
        }

        let keys = self.keys.write().take();
        let engine = self.engine.write().take();
        let timer = self.timer.write().take();

        if let Some(keys) = keys {
            keys.teardown_sender();
            keys.teardown_receiver();
        }
        if let Some(engine) = engine {
            engine.stop();
        }
        if let Some(timer) = timer {
            timer.stop();
        }
        true
    }
}

impl Drop for GateInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Media-path security gate for one media stream
///
/// Cloning yields another handle to the same gate.
#[derive(Clone)]
pub struct SecurityGate {
    inner: Arc<GateInner>,
}

impl SecurityGate {
    /// Create an uninitialized gate
    pub fn new() -> Self {
        SecurityGate {
            inner: Arc::new(GateInner {
                state: Mutex::new(SessionState {
                    phase: GatePhase::Uninitialized,
                    enabled: false,
                    ssrc: None,
                    media_counted: 0,
                }),
                engine: RwLock::new(None),
                keys: RwLock::new(None),
                timer: RwLock::new(None),
                connector: RwLock::new(None),
                sink: RwLock::new(None),
                control_seq: Mutex::new(ControlSeq::random()),
                stats: Mutex::new(GateStats::default()),
                created_at: Instant::now(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<GateInner>) -> Self {
        SecurityGate { inner }
    }

    /// Open the identity store, start the timer and create the engine
    ///
    /// On failure the gate stays uninitialized and keeps passing media
    /// through unmodified.
    pub fn initialize(
        &self,
        config: GateConfig,
        factory: &dyn EngineFactory,
    ) -> Result<(), InitError> {
        let phase = self.phase();
        if phase != GatePhase::Uninitialized {
            return Err(InitError::InvalidPhase(phase));
        }

        let backend = config.backend.ok_or(InitError::NoBackend)?;
        let identity = ZidFile::open(&config.identity_file)?;
        let timer = TimeoutProvider::new(&config.thread_name).map_err(InitError::Timer)?;

        let context = EngineContext {
            zid: identity.zid(),
            client_id: config.client_id.clone(),
            callbacks: Arc::new(GateCallbacks::new(Arc::downgrade(&self.inner))),
        };
        let engine = factory.create(context)?;

        *self.inner.keys.write() = Some(Arc::new(KeyManager::new(Arc::clone(&backend))));
        *self.inner.timer.write() = Some(Arc::new(timer));
        *self.inner.engine.write() = Some(engine);
        {
            let mut state = self.inner.state.lock();
            state.phase = GatePhase::Initialized;
            state.enabled = config.auto_enable;
        }

        tracing::info!(
            "Gate initialized (client {:?}, backend {}, auto-enable {})",
            config.client_id,
            backend.name(),
            config.auto_enable
        );
        self.inner.emit(SecurityEvent::Initialized);
        Ok(())
    }

    /// Set the channel control packets are written to
    pub fn set_connector(&self, connector: Arc<dyn Connector>) {
        *self.inner.connector.write() = Some(connector);
    }

    /// Register the application notification sink, replacing any previous one
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.inner.sink.write() = Some(sink);
    }

    pub fn clear_event_sink(&self) {
        self.inner.sink.write().take();
    }

    /// Start negotiation explicitly
    ///
    /// Returns false unless the gate was initialized and not yet started.
    pub fn start(&self) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.phase != GatePhase::Initialized {
                return false;
            }
            state.phase = GatePhase::Negotiating;
        }
        self.start_engine();
        true
    }

    fn start_engine(&self) {
        if let Some(engine) = self.inner.engine() {
            tracing::info!("Starting negotiation");
            engine.start();
        }
    }

    /// Stop negotiation for good
    ///
    /// Tears down both directions, stops and discards the engine and halts
    /// the timer. Later media passes through; control packets are dropped.
    pub fn stop(&self) {
        if self.inner.shutdown() {
            tracing::info!("Gate stopped");
        }
    }

    /// Outbound transform
    ///
    /// Control packets pass unmodified. Media is protected when a sender
    /// transform is installed, otherwise returned unmodified. Returns `None`
    /// when the transform rejects the packet.
    pub fn send_media(&self, packet: Bytes) -> Option<Bytes> {
        if is_control(&packet) {
            return Some(packet);
        }

        let auto_start = {
            let mut state = self.inner.state.lock();
            if state.enabled && state.ssrc.is_none() {
                state.ssrc = media_ssrc(&packet);
            }
            state.media_counted += 1;
            state.try_auto_start()
        };
        if auto_start {
            self.start_engine();
        }

        let transform = self.inner.keys().and_then(|keys| keys.sender());
        let out = match transform {
            None => packet,
            Some(transform) => match transform.apply(&packet) {
                Ok(protected) => protected,
                Err(e) => {
                    tracing::debug!("Dropping outbound media packet: {}", e);
                    return None;
                }
            },
        };

        let mut stats = self.inner.stats.lock();
        stats.media_sent += 1;
        stats.bytes_sent += out.len() as u64;
        Some(out)
    }

    /// Inbound transform
    ///
    /// Control packets are handed to the engine and never produce media.
    /// Media is unprotected when a receiver transform is installed, otherwise
    /// returned unmodified.
    pub fn receive_media(&self, packet: Bytes) -> Option<Bytes> {
        if is_control(&packet) {
            self.receive_control(&packet);
            return None;
        }

        let auto_start = self.inner.state.lock().try_auto_start();
        if auto_start {
            self.start_engine();
        }

        let transform = self.inner.keys().and_then(|keys| keys.receiver());
        let out = match transform {
            None => packet,
            Some(transform) => match transform.apply(&packet) {
                Ok(plain) => {
                    self.confirm_secure();
                    plain
                }
                Err(CryptoError::AuthenticationFailed) => {
                    tracing::debug!("Inbound media failed authentication");
                    self.inner.stats.lock().auth_failures += 1;
                    return None;
                }
                Err(e) => {
                    tracing::debug!("Dropping inbound media packet: {}", e);
                    return None;
                }
            },
        };

        let mut stats = self.inner.stats.lock();
        stats.media_received += 1;
        stats.bytes_received += out.len() as u64;
        Some(out)
    }

    /// First media decrypted with the new keys stands in for the final
    /// confirmation acknowledgment
    fn confirm_secure(&self) {
        if let Some(engine) = self.inner.engine() {
            if !engine.in_secure_state() {
                tracing::debug!("Media decrypted before secure state, acknowledging confirmation");
                engine.confirm_secure_ack();
            }
        }
    }

    fn receive_control(&self, packet: &[u8]) {
        self.inner.stats.lock().control_received += 1;

        if !self.inner.state.lock().enabled {
            tracing::trace!("Negotiation disabled, dropping control packet");
            return;
        }
        let Some(engine) = self.inner.engine() else {
            tracing::trace!("No engine, dropping control packet");
            return;
        };

        let control = match ControlPacket::from_bytes(packet) {
            Ok(control) => control,
            Err(PacketError::ChecksumMismatch { carried, computed }) => {
                tracing::warn!(
                    "Control packet checksum mismatch: carried {:#010x}, computed {:#010x}",
                    carried,
                    computed
                );
                self.inner.stats.lock().crc_failures += 1;
                self.inner.emit(SecurityEvent::Message {
                    code: StatusCode::Warning(WarningCode::CrcMismatch),
                });
                return;
            }
            Err(e) => {
                tracing::debug!("Dropping malformed control packet: {}", e);
                return;
            }
        };

        if !control.has_message_magic() {
            tracing::debug!("Control packet without message preamble, dropping");
            return;
        }

        tracing::trace!(
            "Control packet seq {} ({} bytes)",
            control.header.seq,
            control.message.len()
        );
        engine.process_message(&control.message);
    }

    /// Frame `message` as a control packet and write it to the connector
    ///
    /// Returns false if no connector is set or the write failed.
    pub fn send_control(&self, message: &[u8]) -> bool {
        let connector = self.inner.connector.read().clone();
        let Some(connector) = connector else {
            tracing::debug!("No connector, cannot send control packet");
            self.inner.stats.lock().control_send_failures += 1;
            return false;
        };
        let ssrc = self.inner.state.lock().ssrc.unwrap_or(0);

        let result = {
            let mut seq = self.inner.control_seq.lock();
            let packet = ControlPacket::new(seq.take_next(), ssrc, Bytes::copy_from_slice(message));
            connector.write(&packet.to_bytes())
        };

        let mut stats = self.inner.stats.lock();
        match result {
            Ok(_) => {
                stats.control_sent += 1;
                true
            }
            Err(e) => {
                tracing::warn!("Failed to send control packet: {}", e);
                stats.control_send_failures += 1;
                false
            }
        }
    }

    /// Install the keyed transform for one direction
    ///
    /// Refused once the gate is stopped.
    pub(crate) fn install_secrets(
        &self,
        secrets: &NegotiatedSecrets,
        direction: Direction,
    ) -> bool {
        let Some(keys) = self.inner.keys() else {
            tracing::debug!("No key manager, refusing {} secrets", direction);
            return false;
        };
        keys.install(direction, secrets).is_ok()
    }

    pub(crate) fn remove_secrets(&self, direction: Direction) {
        if let Some(keys) = self.inner.keys() {
            keys.teardown(direction);
        }
    }

    pub fn phase(&self) -> GatePhase {
        self.inner.state.lock().phase
    }

    /// Whether negotiation has been started
    pub fn is_started(&self) -> bool {
        self.phase() == GatePhase::Negotiating
    }

    /// Whether `direction` currently uses a keyed transform
    pub fn is_secured(&self, direction: Direction) -> bool {
        self.inner
            .keys()
            .map(|keys| keys.is_secured(direction))
            .unwrap_or(false)
    }

    /// Active keyed transform for `direction`
    pub fn transform(&self, direction: Direction) -> Option<Arc<dyn KeyedTransform>> {
        let keys = self.inner.keys()?;
        match direction {
            Direction::Sender => keys.sender(),
            Direction::Receiver => keys.receiver(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().enabled
    }

    /// Enable or disable auto-sensing and control packet processing
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.state.lock().enabled = enabled;
    }

    /// Outbound SSRC, once learned
    pub fn ssrc(&self) -> Option<u32> {
        self.inner.state.lock().ssrc
    }

    /// This endpoint's identifier, while an engine is running
    pub fn zid(&self) -> Option<Zid> {
        self.inner.engine().map(|engine| engine.zid())
    }

    /// The peer's identifier, once the engine learned it
    pub fn peer_zid(&self) -> Option<Zid> {
        self.inner.engine().and_then(|engine| engine.peer_zid())
    }

    /// Role negotiated by the engine, if known
    pub fn role(&self) -> Option<Role> {
        self.inner.engine().and_then(|engine| engine.role())
    }

    pub fn stats(&self) -> GateStats {
        let mut stats = self.inner.stats.lock().clone();
        stats.uptime = self.inner.created_at.elapsed();
        stats
    }

    pub fn sas_verified(&self) {
        if let Some(engine) = self.inner.engine() {
            engine.sas_verified();
        }
    }

    pub fn reset_sas_verified(&self) {
        if let Some(engine) = self.inner.engine() {
            engine.reset_sas_verified();
        }
    }

    pub fn accept_enrollment(&self, accepted: bool) {
        if let Some(engine) = self.inner.engine() {
            engine.accept_enrollment(accepted);
        }
    }

    pub fn set_pbx_enrollment(&self, enabled: bool) {
        if let Some(engine) = self.inner.engine() {
            engine.set_pbx_enrollment(enabled);
        }
    }

    /// Store SAS signature data in the engine
    pub fn set_signature_data(&self, data: &[u8]) -> bool {
        self.inner
            .engine()
            .map(|engine| engine.set_signature_data(data))
            .unwrap_or(false)
    }

    pub fn signature_data(&self) -> Option<Vec<u8>> {
        self.inner.engine().map(|engine| engine.signature_data())
    }

    pub fn signature_length(&self) -> usize {
        self.inner
            .engine()
            .map(|engine| engine.signature_length())
            .unwrap_or(0)
    }

    pub fn hello_hash(&self) -> Option<String> {
        self.inner.engine().map(|engine| engine.hello_hash())
    }

    pub fn set_srtps_secret(&self, secret: &[u8]) {
        if let Some(engine) = self.inner.engine() {
            engine.set_srtps_secret(secret);
        }
    }

    pub fn set_other_secret(&self, secret: &[u8]) {
        if let Some(engine) = self.inner.engine() {
            engine.set_other_secret(secret);
        }
    }
}

impl Default for SecurityGate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SecurityGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityGate")
            .field("phase", &self.phase())
            .field("sender_secured", &self.is_secured(Direction::Sender))
            .field("receiver_secured", &self.is_secured(Direction::Receiver))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{self, Receiver};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use zgate_io::ChannelConnector;
    use zgate_protocol::{EngineCallbacks, RoleKeys};

    struct MockEngine {
        callbacks: Arc<dyn EngineCallbacks>,
        zid: Zid,
        starts: AtomicUsize,
        stops: AtomicUsize,
        timeouts: AtomicUsize,
        acks: AtomicUsize,
        secure: AtomicBool,
        messages: Mutex<Vec<Vec<u8>>>,
    }

    impl NegotiationEngine for MockEngine {
        fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn process_message(&self, message: &[u8]) {
            self.messages.lock().push(message.to_vec());
        }

        fn on_timeout(&self) {
            // re-arm once from inside the timer callback
            if self.timeouts.fetch_add(1, Ordering::SeqCst) == 0 {
                self.callbacks.activate_timer(Duration::from_millis(5));
            }
        }

        fn in_secure_state(&self) -> bool {
            self.secure.load(Ordering::SeqCst)
        }

        fn confirm_secure_ack(&self) {
            self.acks.fetch_add(1, Ordering::SeqCst);
        }

        fn zid(&self) -> Zid {
            self.zid
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        gate: SecurityGate,
        engine: Arc<MockEngine>,
        wire: Receiver<Bytes>,
        events: Receiver<SecurityEvent>,
    }

    fn harness(auto_enable: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let gate = SecurityGate::new();
        let (events_tx, events) = channel::unbounded();
        gate.set_event_sink(Arc::new(events_tx));
        let (connector, wire) = ChannelConnector::new();
        gate.set_connector(Arc::new(connector));

        let slot: Arc<Mutex<Option<Arc<MockEngine>>>> = Arc::new(Mutex::new(None));
        let factory_slot = Arc::clone(&slot);
        let factory = move |ctx: EngineContext| -> Result<Arc<dyn NegotiationEngine>, EngineError> {
            let engine = Arc::new(MockEngine {
                callbacks: ctx.callbacks,
                zid: ctx.zid,
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                timeouts: AtomicUsize::new(0),
                acks: AtomicUsize::new(0),
                secure: AtomicBool::new(false),
                messages: Mutex::new(Vec::new()),
            });
            *factory_slot.lock() = Some(Arc::clone(&engine));
            Ok(engine)
        };

        let config = GateConfig::new(dir.path().join("zid")).with_auto_enable(auto_enable);
        gate.initialize(config, &factory).unwrap();
        let engine = slot.lock().take().unwrap();

        Harness {
            dir,
            gate,
            engine,
            wire,
            events,
        }
    }

    fn media(seq: u16) -> Bytes {
        let mut packet = vec![0x80, 0x00];
        packet.extend_from_slice(&seq.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 0, 160]);
        packet.extend_from_slice(&0xCAFE_F00Du32.to_be_bytes());
        packet.extend_from_slice(b"payload bytes");
        Bytes::from(packet)
    }

    fn control(message: &[u8]) -> Bytes {
        ControlPacket::new(ControlSeq::new(7), 1, Bytes::copy_from_slice(message))
            .to_bytes()
            .freeze()
    }

    fn secrets(role: Role) -> NegotiatedSecrets {
        NegotiatedSecrets {
            initiator: RoleKeys::new(vec![0x01; 16], vec![0x02; 14]),
            responder: RoleKeys::new(vec![0x03; 16], vec![0x04; 14]),
            auth_tag_bits: 80,
            role,
        }
    }

    #[test]
    fn test_uninitialized_passthrough() {
        let gate = SecurityGate::new();
        assert_eq!(gate.phase(), GatePhase::Uninitialized);
        assert_eq!(gate.send_media(media(1)), Some(media(1)));
        assert_eq!(gate.receive_media(media(2)), Some(media(2)));
        assert_eq!(gate.receive_media(control(&[0x50, 0x5A, 1, 2])), None);
        assert!(!gate.start());
    }

    #[test]
    fn test_initialize_reports_and_sets_identity() {
        let h = harness(true);
        assert_eq!(h.gate.phase(), GatePhase::Initialized);
        assert_eq!(h.events.try_recv().unwrap(), SecurityEvent::Initialized);

        let stored = std::fs::read(h.dir.path().join("zid")).unwrap();
        assert_eq!(h.gate.zid().unwrap().to_vec(), stored);
        assert_eq!(h.gate.peer_zid(), None);

        let again = GateConfig::new(h.dir.path().join("zid"));
        let refuse = |_: EngineContext| -> Result<Arc<dyn NegotiationEngine>, EngineError> {
            Err(EngineError::Setup("unused".into()))
        };
        assert!(matches!(
            h.gate.initialize(again, &refuse),
            Err(InitError::InvalidPhase(GatePhase::Initialized))
        ));
    }

    #[test]
    fn test_initialize_without_backend_stays_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let gate = SecurityGate::new();
        let mut config = GateConfig::new(dir.path().join("zid"));
        config.backend = None;
        let factory = |_: EngineContext| -> Result<Arc<dyn NegotiationEngine>, EngineError> {
            Err(EngineError::Setup("not reached".into()))
        };

        assert!(matches!(
            gate.initialize(config, &factory),
            Err(InitError::NoBackend)
        ));
        assert_eq!(gate.phase(), GatePhase::Uninitialized);
        assert_eq!(gate.send_media(media(1)), Some(media(1)));
    }

    #[test]
    fn test_engine_failure_stays_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let gate = SecurityGate::new();
        let factory = |_: EngineContext| -> Result<Arc<dyn NegotiationEngine>, EngineError> {
            Err(EngineError::Unsupported("no hash".into()))
        };

        let err = gate
            .initialize(GateConfig::new(dir.path().join("zid")), &factory)
            .unwrap_err();
        assert!(matches!(err, InitError::Engine(_)));
        assert_eq!(gate.phase(), GatePhase::Uninitialized);
    }

    #[test]
    fn test_auto_start_once() {
        let h = harness(true);
        for seq in 0..5 {
            assert_eq!(h.gate.send_media(media(seq)), Some(media(seq)));
        }
        assert_eq!(h.engine.starts.load(Ordering::SeqCst), 1);
        assert!(h.gate.is_started());
        assert_eq!(h.gate.ssrc(), Some(0xCAFE_F00D));
    }

    #[test]
    fn test_receive_waits_for_outbound_traffic() {
        let h = harness(true);
        h.gate.receive_media(media(1));
        assert_eq!(h.engine.starts.load(Ordering::SeqCst), 0);

        h.gate.send_media(media(1));
        h.gate.receive_media(media(2));
        assert_eq!(h.engine.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disabled_gate_does_not_auto_start() {
        let h = harness(false);
        h.gate.send_media(media(1));
        h.gate.receive_media(control(&[0x50, 0x5A, 0, 1]));
        assert!(!h.gate.is_started());
        assert!(h.engine.messages.lock().is_empty());
        assert_eq!(h.gate.ssrc(), None);

        assert!(h.gate.start());
        assert!(!h.gate.start());
        assert_eq!(h.engine.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_control_packet_reaches_engine() {
        let h = harness(true);
        let message = [0x50, 0x5A, 0x00, 0x03, b'H', b'e', b'l', b'o'];
        assert_eq!(h.gate.receive_media(control(&message)), None);
        assert_eq!(h.engine.messages.lock().as_slice(), &[message.to_vec()]);
    }

    #[test]
    fn test_outbound_control_not_transformed() {
        let h = harness(true);
        let packet = control(&[0x50, 0x5A, 0, 1]);
        assert_eq!(h.gate.send_media(packet.clone()), Some(packet));
        assert_eq!(h.gate.stats().media_sent, 0);
    }

    #[test]
    fn test_checksum_mismatch_raises_one_warning() {
        let h = harness(true);
        h.events.try_recv().unwrap(); // Initialized

        let mut packet = control(&[0x50, 0x5A, 0, 1]).to_vec();
        let last = packet.len() - 1;
        packet[last] ^= 0xFF;

        assert_eq!(h.gate.receive_media(Bytes::from(packet)), None);
        assert_eq!(
            h.events.try_recv().unwrap(),
            SecurityEvent::Message {
                code: StatusCode::Warning(WarningCode::CrcMismatch)
            }
        );
        assert!(h.events.try_recv().is_err());
        assert!(h.engine.messages.lock().is_empty());
        assert_eq!(h.gate.stats().crc_failures, 1);
    }

    #[test]
    fn test_missing_preamble_dropped_silently() {
        let h = harness(true);
        h.events.try_recv().unwrap();

        assert_eq!(h.gate.receive_media(control(b"no preamble")), None);
        assert!(h.events.try_recv().is_err());
        assert!(h.engine.messages.lock().is_empty());
    }

    #[test]
    fn test_send_control_framing_and_sequence() {
        let h = harness(true);
        h.gate.send_media(media(1));

        for _ in 0..3 {
            assert!(h.engine.callbacks.send_data(&[0x50, 0x5A, 0, 1]));
        }

        let packets: Vec<_> = h
            .wire
            .try_iter()
            .map(|p| ControlPacket::from_bytes(&p).unwrap())
            .collect();
        assert_eq!(packets.len(), 3);
        for pair in packets.windows(2) {
            assert_eq!(pair[1].header.seq, pair[0].header.seq.next());
        }
        assert!(packets.iter().all(|p| p.header.ssrc == 0xCAFE_F00D));
        assert_eq!(h.gate.stats().control_sent, 3);
    }

    #[test]
    fn test_send_control_without_connector() {
        let gate = SecurityGate::new();
        assert!(!gate.send_control(&[0x50, 0x5A]));
        assert_eq!(gate.stats().control_send_failures, 1);
    }

    #[test]
    fn test_secured_media_and_confirmation() {
        let h = harness(true);
        let callbacks = Arc::clone(&h.engine.callbacks);
        let own = secrets(Role::Initiator);
        assert!(callbacks.secrets_ready(&own, Direction::Sender));
        assert!(callbacks.secrets_ready(&own, Direction::Receiver));
        assert!(h.gate.is_secured(Direction::Sender));
        assert!(h.gate.is_secured(Direction::Receiver));

        let protected = h.gate.send_media(media(10)).unwrap();
        assert_ne!(protected, media(10));

        // the peer protects with the responder keys
        let peer = KeyManager::new(Arc::new(zgate_crypto::SrtpBackend::new()));
        peer.install_sender(&own.mirrored()).unwrap();
        let from_peer = peer.sender().unwrap().apply(&media(20)).unwrap();

        assert_eq!(h.gate.receive_media(from_peer.clone()), Some(media(20)));
        assert_eq!(h.engine.acks.load(Ordering::SeqCst), 1);

        h.engine.secure.store(true, Ordering::SeqCst);
        let next = peer.sender().unwrap().apply(&media(21)).unwrap();
        assert_eq!(h.gate.receive_media(next), Some(media(21)));
        assert_eq!(h.engine.acks.load(Ordering::SeqCst), 1);

        // replaying a modified packet fails authentication
        let mut tampered = from_peer.to_vec();
        tampered[14] ^= 1;
        assert_eq!(h.gate.receive_media(Bytes::from(tampered)), None);
        assert_eq!(h.gate.stats().auth_failures, 1);
    }

    #[test]
    fn test_rejected_secrets_leave_passthrough() {
        let h = harness(true);
        let mut bad = secrets(Role::Responder);
        bad.responder = RoleKeys::new(vec![0x03; 20], vec![0x04; 14]);

        assert!(!h.engine.callbacks.secrets_ready(&bad, Direction::Sender));
        assert!(!h.gate.is_secured(Direction::Sender));
        assert_eq!(h.gate.send_media(media(1)), Some(media(1)));
    }

    #[test]
    fn test_secure_on_then_sas_then_off() {
        let h = harness(true);
        h.events.try_recv().unwrap();
        let callbacks = Arc::clone(&h.engine.callbacks);

        callbacks.secrets_ready(&secrets(Role::Initiator), Direction::Sender);
        callbacks.secrets_on("AES_CM_128_HMAC_SHA1_80", Some("k3x9"), false);
        callbacks.secrets_off(Direction::Sender);

        let events: Vec<_> = h.events.try_iter().collect();
        assert_eq!(
            events,
            vec![
                SecurityEvent::SecureOn {
                    cipher: "AES_CM_128_HMAC_SHA1_80".into()
                },
                SecurityEvent::ShowSas {
                    sas: "k3x9".into(),
                    verified: false
                },
                SecurityEvent::SecureOff {
                    direction: Direction::Sender
                },
            ]
        );
        assert!(!h.gate.is_secured(Direction::Sender));
    }

    #[test]
    fn test_stop_reverts_to_passthrough() {
        let h = harness(true);
        let callbacks = Arc::clone(&h.engine.callbacks);
        callbacks.secrets_ready(&secrets(Role::Initiator), Direction::Sender);
        assert_ne!(h.gate.send_media(media(1)).unwrap(), media(1));

        h.gate.stop();
        h.gate.stop();
        assert_eq!(h.gate.phase(), GatePhase::Stopped);
        assert_eq!(h.engine.stops.load(Ordering::SeqCst), 1);
        assert_eq!(h.gate.send_media(media(2)), Some(media(2)));
        assert_eq!(h.gate.receive_media(control(&[0x50, 0x5A, 0, 1])), None);
        assert!(h.engine.messages.lock().is_empty());

        assert!(!callbacks.secrets_ready(&secrets(Role::Initiator), Direction::Sender));
        assert!(!callbacks.activate_timer(Duration::from_millis(1)));
        assert!(!h.gate.start());
        assert_eq!(h.gate.zid(), None);
        assert_eq!(h.gate.role(), None);
    }

    #[test]
    fn test_timer_drives_engine() {
        let h = harness(true);
        assert!(h.engine.callbacks.activate_timer(Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(200));
        // first expiry re-arms, second one does not
        assert_eq!(h.engine.timeouts.load(Ordering::SeqCst), 2);
    }
}
