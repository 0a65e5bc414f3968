//! Configuration system for smrpc.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SMRPC_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/smrpc/config.toml
//!   3. ~/.config/smrpc/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::TransportType;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmrpcConfig {
    /// Remote runtime instances to connect to at start-up.
    pub peers: Vec<PeerConfig>,
    pub identity: IdentityConfig,
    pub limits: LimitsConfig,
    pub control: ControlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Hostname advertised in session endpoints. Empty = $HOSTNAME or "localhost".
    pub hostname: String,
    /// Runtime-instance id, unique per host.
    pub rpc_id: u8,
    /// Physical fabric port managed by this instance.
    pub phy_port: u16,
    /// NUMA node session buffers are reserved on.
    pub numa_node: usize,
    pub transport: TransportType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Upper bound on live sessions per runtime instance.
    pub max_sessions: usize,
    /// Receive credits reserved per session.
    pub session_credits: usize,
    /// Total receive credits available to this instance.
    pub num_recvs: usize,
    /// Size of one session buffer in bytes.
    pub mtu: usize,
    /// Allocator budget per NUMA node in bytes. 0 = unlimited.
    pub alloc_budget: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// UDP port of the control channel. Same on every host.
    pub udp_port: u16,
    /// Interval between retransmissions of pending requests.
    pub retransmit_ms: u64,
    /// Maximum packets drained from the inbox per batch.
    pub batch_size: usize,
    /// Outbound drop probability for fault injection. 0.0 = never.
    pub drop_prob: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub hostname: String,
    pub rpc_id: u8,
    #[serde(default)]
    pub phy_port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for SmrpcConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            identity: IdentityConfig::default(),
            limits: LimitsConfig::default(),
            control: ControlConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            rpc_id: 0,
            phy_port: 0,
            numa_node: 0,
            transport: TransportType::InfiniBand,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions: 256,
            session_credits: 32,
            num_recvs: 4096,
            mtu: 4096,
            alloc_budget: 0,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            udp_port: 31850,
            retransmit_ms: 50,
            batch_size: 32,
            drop_prob: 0.0,
        }
    }
}

impl IdentityConfig {
    /// Hostname to advertise, falling back to $HOSTNAME then "localhost".
    pub fn resolved_hostname(&self) -> String {
        if !self.hostname.is_empty() {
            return self.hostname.clone();
        }
        std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("smrpc")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SmrpcConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            SmrpcConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SMRPC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&SmrpcConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the session manager cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_sessions == 0
            || self.limits.max_sessions >= crate::wire::INVALID_SESSION_NUM as usize
        {
            return Err(ConfigError::Invalid(
                "limits.max_sessions",
                format!("must be in 1..{}", crate::wire::INVALID_SESSION_NUM),
            ));
        }
        if self.limits.session_credits == 0 {
            return Err(ConfigError::Invalid(
                "limits.session_credits",
                "must be non-zero".into(),
            ));
        }
        if self.identity.phy_port == crate::wire::INVALID_PHY_PORT {
            return Err(ConfigError::Invalid(
                "identity.phy_port",
                "reserved value".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.control.drop_prob) {
            return Err(ConfigError::Invalid(
                "control.drop_prob",
                "must be within 0.0..=1.0".into(),
            ));
        }
        if self.identity.resolved_hostname().len() > crate::wire::MAX_HOSTNAME_LEN {
            return Err(ConfigError::Invalid(
                "identity.hostname",
                format!("longer than {} bytes", crate::wire::MAX_HOSTNAME_LEN),
            ));
        }
        Ok(())
    }

    /// Apply SMRPC_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SMRPC_IDENTITY__HOSTNAME") {
            self.identity.hostname = v;
        }
        if let Ok(v) = std::env::var("SMRPC_IDENTITY__RPC_ID") {
            if let Ok(id) = v.parse() {
                self.identity.rpc_id = id;
            }
        }
        if let Ok(v) = std::env::var("SMRPC_CONTROL__UDP_PORT") {
            if let Ok(p) = v.parse() {
                self.control.udp_port = p;
            }
        }
        if let Ok(v) = std::env::var("SMRPC_LIMITS__MAX_SESSIONS") {
            if let Ok(n) = v.parse() {
                self.limits.max_sessions = n;
            }
        }
        if let Ok(v) = std::env::var("SMRPC_CONTROL__DROP_PROB") {
            if let Ok(p) = v.parse() {
                self.control.drop_prob = p;
            }
        }
    }
}
