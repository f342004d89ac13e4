//! Configuration file support for the zgate relay

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zgate::{GateConfig, NegotiatedSecrets, Role, RoleKeys};

/// Network endpoints of the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Local address of the wire-side socket
    pub bind: SocketAddr,
    /// Remote relay all wire traffic goes to
    pub peer: SocketAddr,
    /// Where the local application sends cleartext media
    pub local_listen: SocketAddr,
    /// Where decrypted inbound media is delivered
    pub local_dest: SocketAddr,
    /// Maximum datagram size
    #[serde(default = "default_mtu")]
    pub mtu: usize,
}

fn default_mtu() -> usize {
    1500
}

/// Role as written in the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleConfig {
    Initiator,
    Responder,
}

impl From<RoleConfig> for Role {
    fn from(role: RoleConfig) -> Self {
        match role {
            RoleConfig::Initiator => Role::Initiator,
            RoleConfig::Responder => Role::Responder,
        }
    }
}

/// Pre-shared key material, hex encoded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Role this relay plays
    pub role: RoleConfig,
    pub initiator_key: String,
    pub initiator_salt: String,
    pub responder_key: String,
    pub responder_salt: String,
    /// Authentication tag length in bits
    #[serde(default = "default_auth_tag_bits")]
    pub auth_tag_bits: usize,
}

fn default_auth_tag_bits() -> usize {
    80
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Endpoint identity file
    #[serde(default = "default_identity_file")]
    pub identity_file: PathBuf,
    /// Client identification announced to the peer
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Start negotiation on the first media packet
    #[serde(default = "default_auto_enable")]
    pub auto_enable: bool,
    /// Statistics interval in seconds (0 disables)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    pub network: NetworkConfig,
    /// Pre-shared keys; required by the built-in engine
    pub keys: Option<KeysConfig>,
}

fn default_identity_file() -> PathBuf {
    PathBuf::from("zgate.zid")
}

fn default_client_id() -> String {
    "zgate-relay".to_string()
}

fn default_auto_enable() -> bool {
    true
}

fn default_stats_interval() -> u64 {
    5
}

impl RelayConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Check values serde cannot check
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.mtu < 64 {
            return Err(ConfigError::Invalid(format!(
                "mtu {} is too small",
                self.network.mtu
            )));
        }
        if self.network.bind.is_ipv4() != self.network.peer.is_ipv4() {
            return Err(ConfigError::Invalid(
                "bind and peer addresses must use the same IP version".to_string(),
            ));
        }
        self.secrets().map(|_| ())
    }

    /// Decode the pre-shared keys, if configured
    pub fn secrets(&self) -> Result<Option<NegotiatedSecrets>, ConfigError> {
        let Some(keys) = &self.keys else {
            return Ok(None);
        };
        if keys.auth_tag_bits == 0 || keys.auth_tag_bits % 8 != 0 {
            return Err(ConfigError::Invalid(format!(
                "auth_tag_bits must be a positive multiple of 8, got {}",
                keys.auth_tag_bits
            )));
        }

        Ok(Some(NegotiatedSecrets {
            initiator: RoleKeys::new(
                decode("initiator_key", &keys.initiator_key)?,
                decode("initiator_salt", &keys.initiator_salt)?,
            ),
            responder: RoleKeys::new(
                decode("responder_key", &keys.responder_key)?,
                decode("responder_salt", &keys.responder_salt)?,
            ),
            auth_tag_bits: keys.auth_tag_bits,
            role: keys.role.into(),
        }))
    }

    /// Gate configuration derived from this file
    pub fn gate_config(&self) -> GateConfig {
        GateConfig::new(&self.identity_file)
            .with_client_id(self.client_id.clone())
            .with_auto_enable(self.auto_enable)
            .with_thread_name("zgate-relay")
    }

    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    /// Create example configuration
    pub fn example(role: RoleConfig) -> Self {
        let peer = match role {
            RoleConfig::Initiator => [192, 168, 1, 20],
            RoleConfig::Responder => [192, 168, 1, 10],
        };
        RelayConfig {
            identity_file: default_identity_file(),
            client_id: default_client_id(),
            auto_enable: true,
            stats_interval_secs: default_stats_interval(),
            network: NetworkConfig {
                bind: SocketAddr::from(([0, 0, 0, 0], 7000)),
                peer: SocketAddr::from((peer, 7000)),
                local_listen: SocketAddr::from(([127, 0, 0, 1], 5004)),
                local_dest: SocketAddr::from(([127, 0, 0, 1], 5006)),
                mtu: default_mtu(),
            },
            keys: Some(KeysConfig {
                role,
                initiator_key: "000102030405060708090a0b0c0d0e0f".to_string(),
                initiator_salt: "101112131415161718191a1b1c1d".to_string(),
                responder_key: "202122232425262728292a2b2c2d2e2f".to_string(),
                responder_salt: "303132333435363738393a3b3c3d".to_string(),
                auth_tag_bits: default_auth_tag_bits(),
            }),
        }
    }
}

fn decode(field: &str, value: &str) -> Result<Vec<u8>, ConfigError> {
    let bytes = hex::decode(value.trim())
        .map_err(|e| ConfigError::Invalid(format!("{} is not valid hex: {}", field, e)))?;
    if bytes.is_empty() {
        return Err(ConfigError::Invalid(format!("{} is empty", field)));
    }
    Ok(bytes)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_is_valid() {
        let config = RelayConfig::example(RoleConfig::Initiator);
        config.validate().unwrap();

        let secrets = config.secrets().unwrap().unwrap();
        assert_eq!(secrets.role, Role::Initiator);
        assert_eq!(secrets.initiator.key_len(), 16);
        assert_eq!(secrets.responder.salt_len(), 14);
        assert_eq!(secrets.auth_tag_len(), 10);
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = RelayConfig::example(RoleConfig::Responder);
        let toml = toml::to_string(&config).unwrap();
        let parsed: RelayConfig = toml::from_str(&toml).unwrap();

        assert_eq!(parsed.keys.unwrap().role, RoleConfig::Responder);
        assert_eq!(parsed.network.peer, config.network.peer);
    }

    #[test]
    fn test_defaults() {
        let parsed: RelayConfig = toml::from_str(
            r#"
            [network]
            bind = "0.0.0.0:7000"
            peer = "10.0.0.2:7000"
            local_listen = "127.0.0.1:5004"
            local_dest = "127.0.0.1:5006"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.identity_file, PathBuf::from("zgate.zid"));
        assert!(parsed.auto_enable);
        assert_eq!(parsed.network.mtu, 1500);
        assert!(parsed.keys.is_none());
        assert!(parsed.secrets().unwrap().is_none());
        assert_eq!(parsed.stats_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_bad_hex_rejected() {
        let mut config = RelayConfig::example(RoleConfig::Initiator);
        if let Some(keys) = config.keys.as_mut() {
            keys.responder_salt = "zz".to_string();
        }
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");

        RelayConfig::example(RoleConfig::Initiator)
            .to_file(&path)
            .unwrap();
        let loaded = RelayConfig::from_file(&path).unwrap();
        assert_eq!(loaded.client_id, "zgate-relay");
    }
}
