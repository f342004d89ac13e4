//! zgate Media Encryption
//!
//! This crate turns negotiated secrets into directional keyed transforms
//! using a pluggable backend architecture. The default backend implements
//! AES counter mode with HMAC-SHA1 authentication (AES via the RustCrypto
//! block ciphers, HMAC via Ring).

pub mod backend;
pub mod keys;
pub mod srtp;

pub use backend::{AuthMode, CipherMode, CryptoBackend, CryptoError, KeyedTransform, SrtpPolicy};
pub use keys::{resolve, DirectionTransform, KeyManager, ResolvedKeys};
pub use srtp::{SrtpBackend, SrtpTransform};
