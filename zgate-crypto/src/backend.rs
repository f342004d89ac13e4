//! Crypto backend abstraction
//!
//! A backend builds [`KeyedTransform`]s from resolved key material and an
//! [`SrtpPolicy`]. The gate never looks inside a transform; it only applies
//! it to whole packets.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use zgate_protocol::{Direction, PacketError};

/// Authentication key length used for every transform, regardless of the
/// negotiated cipher key length
pub const AUTH_KEY_LEN: usize = 20;

/// Cipher applied to media payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CipherMode {
    /// AES in counter mode
    AesCounter,
}

/// Message authentication applied to media packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthMode {
    /// HMAC-SHA1, truncated to the negotiated tag length
    HmacSha1,
}

/// Parameters of one keyed transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrtpPolicy {
    pub cipher: CipherMode,
    /// Cipher key length in bytes
    pub enc_key_len: usize,
    pub auth: AuthMode,
    /// Authentication key length in bytes
    pub auth_key_len: usize,
    /// Authentication tag length in bytes
    pub auth_tag_len: usize,
    /// Salt length in bytes
    pub salt_len: usize,
}

impl SrtpPolicy {
    /// Counter-mode AES with HMAC-SHA1 and the fixed 20-byte auth key
    pub fn aes_cm_hmac_sha1(enc_key_len: usize, auth_tag_len: usize, salt_len: usize) -> Self {
        SrtpPolicy {
            cipher: CipherMode::AesCounter,
            enc_key_len,
            auth: AuthMode::HmacSha1,
            auth_key_len: AUTH_KEY_LEN,
            auth_tag_len,
            salt_len,
        }
    }
}

impl fmt::Display for SrtpPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AES_CM_{}_HMAC_SHA1_{}",
            self.enc_key_len * 8,
            self.auth_tag_len * 8
        )
    }
}

/// Directional encrypt+authenticate or verify+decrypt function
pub trait KeyedTransform: Send + Sync {
    /// Direction this transform was built for
    fn direction(&self) -> Direction;

    /// Policy the transform was built with
    fn policy(&self) -> &SrtpPolicy;

    /// Protect (sender) or unprotect (receiver) one packet
    fn apply(&self, packet: &[u8]) -> Result<Bytes, CryptoError>;
}

/// Factory for keyed transforms
pub trait CryptoBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Build a transform for `direction` from a resolved key and salt
    fn create_transform(
        &self,
        direction: Direction,
        key: &[u8],
        salt: &[u8],
        policy: &SrtpPolicy,
    ) -> Result<Arc<dyn KeyedTransform>, CryptoError>;
}

/// Crypto errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Unsupported cipher key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("Unsupported salt length: {0} bytes")]
    InvalidSaltLength(usize),

    #[error("Unsupported authentication parameters: key {key_len} bytes, tag {tag_len} bytes")]
    InvalidAuthParameters { key_len: usize, tag_len: usize },

    #[error("Key material too short for {what}: need {needed} bytes, have {available}")]
    KeyMaterialTooShort {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Malformed media packet: {0}")]
    MalformedPacket(#[from] PacketError),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Backend failure: {0}")]
    Backend(String),
}
