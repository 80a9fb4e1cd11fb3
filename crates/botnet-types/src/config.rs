//! Node configuration, deserialized from `config.toml`.
//!
//! Every section has working defaults so an empty file (or no file) yields a
//! runnable node.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's own identifier, as peers know it.
    pub node_id: String,
    /// Address the JSON-RPC server binds.
    pub listen_addr: SocketAddr,
    /// SQLite database file. `None` resolves to `~/.botnet/botnet.db`.
    pub database_path: Option<PathBuf>,
    /// Prefix that marks a dotted identifier as part of the federation namespace.
    pub federation_prefix: String,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    pub tokens: TokenConfig,
    pub challenge: ChallengeConfig,
    pub rate_limits: RateLimitConfig,
    pub sweep: SweepConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "botnet.localhost".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8420)),
            database_path: None,
            federation_prefix: "botnet.".to_string(),
            log_level: "info".to_string(),
            tokens: TokenConfig::default(),
            challenge: ChallengeConfig::default(),
            rate_limits: RateLimitConfig::default(),
            sweep: SweepConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Resolved database path.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| botnet_home().join("botnet.db"))
    }
}

/// `~/.botnet`, or `./.botnet` when no home directory is known.
pub fn botnet_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".botnet"))
        .unwrap_or_else(|| PathBuf::from(".botnet"))
}

/// Token lifetimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Negotiation token lifetime (seconds).
    pub negotiation_ttl_secs: u64,
    /// Session lifetime from issuance or last renewal (seconds).
    pub session_ttl_secs: u64,
    /// Hard cap on a session's total lifetime (seconds).
    pub session_max_lifetime_secs: u64,
    /// Revoking a permanent credential also deletes the sessions minted from it.
    pub cascade_session_revocation: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            negotiation_ttl_secs: 24 * 60 * 60,
            session_ttl_secs: 4 * 60 * 60,
            session_max_lifetime_secs: 24 * 60 * 60,
            cascade_session_revocation: true,
        }
    }
}

/// Domain challenge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Challenge lifetime (seconds).
    pub ttl_secs: u64,
    /// Total verification attempts, the first try included.
    pub max_attempts: u32,
    /// Timeout for fetching the published proof (seconds).
    pub fetch_timeout_secs: u64,
    /// Path under the challenged domain where proofs are published.
    pub well_known_path: String,
    /// URL scheme used to fetch proofs.
    pub scheme: String,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60 * 60,
            max_attempts: 2,
            fetch_timeout_secs: 10,
            well_known_path: "/.well-known/botnet-challenge".to_string(),
            scheme: "https".to_string(),
        }
    }
}

impl ChallengeConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Calls admitted per window, per caller, for each method class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window length (seconds).
    pub window_secs: u64,
    pub public: u32,
    pub friendship_request: u32,
    pub negotiation: u32,
    pub login: u32,
    pub message_send: u32,
    pub session_read: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            public: 60,
            friendship_request: 5,
            negotiation: 20,
            login: 10,
            message_send: 60,
            session_read: 120,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Background sweep intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Token expiry sweep interval (seconds).
    pub token_interval_secs: u64,
    /// Challenge expiry sweep interval (seconds).
    pub challenge_interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            token_interval_secs: 5 * 60,
            challenge_interval_secs: 60,
        }
    }
}
