//! Key Material Manager
//!
//! Converts negotiated secrets into the outbound and inbound keyed
//! transforms. Which half of the secrets a direction uses depends on the
//! role this endpoint played:
//!
//! | direction | own role  | key/salt used |
//! |-----------|-----------|---------------|
//! | sender    | Initiator | Initiator     |
//! | sender    | Responder | Responder     |
//! | receiver  | Initiator | Responder     |
//! | receiver  | Responder | Initiator     |
//!
//! Each direction lives in its own slot. Installing or tearing down swaps the
//! slot content under a write lock; packet processing clones the `Arc` under
//! a read lock, so an in-flight packet finishes with the transform that was
//! active when it started.

use crate::backend::{CryptoBackend, CryptoError, KeyedTransform, SrtpPolicy};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use zgate_protocol::{Direction, NegotiatedSecrets, Role};

/// State of one media direction
#[derive(Clone, Default)]
pub enum DirectionTransform {
    /// Packets pass unmodified
    #[default]
    Passthrough,
    /// Packets go through the keyed transform
    Keyed(Arc<dyn KeyedTransform>),
}

impl DirectionTransform {
    /// Whether this direction is secured
    pub fn is_secured(&self) -> bool {
        matches!(self, DirectionTransform::Keyed(_))
    }

    /// The active transform, if any
    pub fn transform(&self) -> Option<Arc<dyn KeyedTransform>> {
        match self {
            DirectionTransform::Passthrough => None,
            DirectionTransform::Keyed(t) => Some(Arc::clone(t)),
        }
    }
}

impl fmt::Debug for DirectionTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectionTransform::Passthrough => write!(f, "Passthrough"),
            DirectionTransform::Keyed(t) => write!(f, "Keyed({})", t.policy()),
        }
    }
}

/// Key material selected for one direction
#[derive(Debug, Clone, Copy)]
pub struct ResolvedKeys<'a> {
    /// Role whose key/salt pair was selected
    pub role: Role,
    pub key: &'a [u8],
    pub salt: &'a [u8],
    pub policy: SrtpPolicy,
}

/// Select the key/salt pair and policy for `direction`
pub fn resolve(
    secrets: &NegotiatedSecrets,
    direction: Direction,
) -> Result<ResolvedKeys<'_>, CryptoError> {
    let role = match direction {
        Direction::Sender => secrets.role,
        Direction::Receiver => secrets.role.opposite(),
    };
    let keys = secrets.keys_for(role);

    let key = keys
        .key
        .get(..keys.key_len())
        .ok_or(CryptoError::KeyMaterialTooShort {
            what: "cipher key",
            needed: keys.key_len(),
            available: keys.key.len(),
        })?;
    let salt = keys
        .salt
        .get(..keys.salt_len())
        .ok_or(CryptoError::KeyMaterialTooShort {
            what: "salt",
            needed: keys.salt_len(),
            available: keys.salt.len(),
        })?;

    Ok(ResolvedKeys {
        role,
        key,
        salt,
        policy: SrtpPolicy::aes_cm_hmac_sha1(
            keys.key_len(),
            secrets.auth_tag_len(),
            keys.salt_len(),
        ),
    })
}

/// Owner of the outbound and inbound transform slots
pub struct KeyManager {
    backend: Arc<dyn CryptoBackend>,
    sender: RwLock<DirectionTransform>,
    receiver: RwLock<DirectionTransform>,
}

impl KeyManager {
    /// Create a key manager with both directions in pass-through
    pub fn new(backend: Arc<dyn CryptoBackend>) -> Self {
        KeyManager {
            backend,
            sender: RwLock::new(DirectionTransform::Passthrough),
            receiver: RwLock::new(DirectionTransform::Passthrough),
        }
    }

    fn slot(&self, direction: Direction) -> &RwLock<DirectionTransform> {
        match direction {
            Direction::Sender => &self.sender,
            Direction::Receiver => &self.receiver,
        }
    }

    /// Build and install the transform for `direction`
    ///
    /// On failure the direction is left in pass-through.
    pub fn install(
        &self,
        direction: Direction,
        secrets: &NegotiatedSecrets,
    ) -> Result<(), CryptoError> {
        let built = resolve(secrets, direction).and_then(|resolved| {
            self.backend
                .create_transform(direction, resolved.key, resolved.salt, &resolved.policy)
                .map(|t| (resolved.role, t))
        });

        match built {
            Ok((role, transform)) => {
                tracing::info!(
                    "Installed {} transform ({}, {} keys, backend {})",
                    direction,
                    transform.policy(),
                    role,
                    self.backend.name()
                );
                *self.slot(direction).write() = DirectionTransform::Keyed(transform);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to install {} transform: {}", direction, e);
                *self.slot(direction).write() = DirectionTransform::Passthrough;
                Err(e)
            }
        }
    }

    pub fn install_sender(&self, secrets: &NegotiatedSecrets) -> Result<(), CryptoError> {
        self.install(Direction::Sender, secrets)
    }

    pub fn install_receiver(&self, secrets: &NegotiatedSecrets) -> Result<(), CryptoError> {
        self.install(Direction::Receiver, secrets)
    }

    /// Revert `direction` to pass-through
    pub fn teardown(&self, direction: Direction) {
        let previous = std::mem::take(&mut *self.slot(direction).write());
        if previous.is_secured() {
            tracing::info!("Removed {} transform", direction);
        }
    }

    pub fn teardown_sender(&self) {
        self.teardown(Direction::Sender)
    }

    pub fn teardown_receiver(&self) {
        self.teardown(Direction::Receiver)
    }

    /// Current state of `direction`
    pub fn state(&self, direction: Direction) -> DirectionTransform {
        self.slot(direction).read().clone()
    }

    /// Active outbound transform
    pub fn sender(&self) -> Option<Arc<dyn KeyedTransform>> {
        self.sender.read().transform()
    }

    /// Active inbound transform
    pub fn receiver(&self) -> Option<Arc<dyn KeyedTransform>> {
        self.receiver.read().transform()
    }

    pub fn is_secured(&self, direction: Direction) -> bool {
        self.slot(direction).read().is_secured()
    }
}
