//! Gate configuration
//!
//! Everything the gate needs at initialization time is passed in explicitly;
//! nothing is looked up from global state.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use zgate_crypto::{CryptoBackend, SrtpBackend};

/// Client identification announced to the peer by default
pub const DEFAULT_CLIENT_ID: &str = concat!("zgate ", env!("CARGO_PKG_VERSION"));

/// Session gate configuration
#[derive(Clone)]
pub struct GateConfig {
    /// File holding this endpoint's identifier; created if missing
    pub identity_file: PathBuf,
    /// Client identification string handed to the negotiation engine
    pub client_id: String,
    /// Enable auto-sensing and control packet processing from the start
    pub auto_enable: bool,
    /// Crypto backend used to build keyed transforms
    pub backend: Option<Arc<dyn CryptoBackend>>,
    /// Name prefix for the timer worker thread
    pub thread_name: String,
}

impl GateConfig {
    /// Configuration with the default backend and auto-sensing enabled
    pub fn new(identity_file: impl Into<PathBuf>) -> Self {
        GateConfig {
            identity_file: identity_file.into(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            auto_enable: true,
            backend: Some(Arc::new(SrtpBackend::new())),
            thread_name: "zgate".to_string(),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_auto_enable(mut self, auto_enable: bool) -> Self {
        self.auto_enable = auto_enable;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn CryptoBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl fmt::Debug for GateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateConfig")
            .field("identity_file", &self.identity_file)
            .field("client_id", &self.client_id)
            .field("auto_enable", &self.auto_enable)
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("thread_name", &self.thread_name)
            .finish()
    }
}
