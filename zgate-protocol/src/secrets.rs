//! Negotiated key material
//!
//! A completed negotiation round yields one key/salt pair per role plus the
//! authentication tag length and the role this endpoint played. Lengths are
//! reported in bits, the way negotiation engines publish them.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Position an endpoint held in the key-agreement handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    /// The role the peer played
    pub fn opposite(self) -> Self {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

/// Media direction a key or a security state change applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Outbound media (encrypt + authenticate)
    Sender,
    /// Inbound media (verify + decrypt)
    Receiver,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sender => write!(f, "sender"),
            Direction::Receiver => write!(f, "receiver"),
        }
    }
}

/// Key and salt negotiated for one role
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RoleKeys {
    /// Master key
    pub key: Vec<u8>,
    /// Master key length in bits
    pub key_bits: usize,
    /// Master salt
    pub salt: Vec<u8>,
    /// Master salt length in bits
    pub salt_bits: usize,
}

impl RoleKeys {
    /// Create role keys whose lengths match the supplied buffers
    pub fn new(key: Vec<u8>, salt: Vec<u8>) -> Self {
        let key_bits = key.len() * 8;
        let salt_bits = salt.len() * 8;
        RoleKeys {
            key,
            key_bits,
            salt,
            salt_bits,
        }
    }

    /// Key length in bytes
    pub fn key_len(&self) -> usize {
        self.key_bits / 8
    }

    /// Salt length in bytes
    pub fn salt_len(&self) -> usize {
        self.salt_bits / 8
    }
}

impl fmt::Debug for RoleKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleKeys")
            .field("key_bits", &self.key_bits)
            .field("salt_bits", &self.salt_bits)
            .finish_non_exhaustive()
    }
}

/// Secrets produced by a completed negotiation round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedSecrets {
    /// Key material the initiator encrypts with
    pub initiator: RoleKeys,
    /// Key material the responder encrypts with
    pub responder: RoleKeys,
    /// Authentication tag length in bits
    pub auth_tag_bits: usize,
    /// Role this endpoint played
    pub role: Role,
}

impl NegotiatedSecrets {
    /// Key material negotiated for `role`
    pub fn keys_for(&self, role: Role) -> &RoleKeys {
        match role {
            Role::Initiator => &self.initiator,
            Role::Responder => &self.responder,
        }
    }

    /// Authentication tag length in bytes
    pub fn auth_tag_len(&self) -> usize {
        self.auth_tag_bits / 8
    }

    /// The same secrets as seen by the peer
    pub fn mirrored(&self) -> Self {
        NegotiatedSecrets {
            initiator: self.initiator.clone(),
            responder: self.responder.clone(),
            auth_tag_bits: self.auth_tag_bits,
            role: self.role.opposite(),
        }
    }
}
