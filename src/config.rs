//! Pool bootstrap configuration.
//!
//! Mirrors the teacher's nested `NodeConfig`/`HttpConfig` pattern
//! (`core/types.rs`): a serde + `toml` struct that can be loaded from a file
//! on disk, separate from anything that ever goes out on the wire.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CommError, Result};

/// Local, file-backed bootstrap configuration for a [`crate::pool::Pool`].
///
/// This has no wire format of its own — it only describes how to build a
/// pool locally. It is additive convenience over the programmatic
/// constructor, matching the teacher's `NodeConfig::from_file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// This party's own listening configuration, if it runs a server.
    #[serde(default)]
    pub server: Option<ServerConfig>,
    /// Static peer table: name -> how to reach that peer.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    /// Retry delay, in milliseconds, between failed send attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Maximum send retries. Negative means unbounded, matching the Python
    /// default of `max_retries = -1`.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retries() -> i64 {
    -1
}

/// This party's own HTTP(S) server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the listening socket to.
    pub addr: String,
    /// Port to bind to.
    pub port: u16,
    /// Port advertised to peers, when different from `port` (e.g. behind a
    /// NAT or reverse proxy). Superseded in practice by certificate-based
    /// identity; kept for plaintext deployments only.
    #[serde(default)]
    pub external_port: Option<u16>,
    /// Paths to a PEM certificate chain and private key, for mutual TLS.
    /// Absent means plaintext HTTP.
    #[serde(default)]
    pub tls: Option<TlsFiles>,
}

/// PEM file paths for mutual TLS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsFiles {
    /// This party's certificate chain.
    pub cert_chain: String,
    /// This party's private key.
    pub private_key: String,
    /// CA bundle used to verify peer certificates.
    pub ca_bundle: String,
}

/// A single statically configured peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// The name this peer is addressed by within the pool.
    pub name: String,
    /// Base URL, e.g. `https://10.0.0.2:8443`.
    pub url: String,
}

impl PoolConfig {
    /// Loads a [`PoolConfig`] from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| CommError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_python_pool_defaults() {
        let toml = r#"
            [[peers]]
            name = "alice"
            url = "http://127.0.0.1:8080"
        "#;
        let cfg: PoolConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.retry_delay_ms, 1000);
        assert_eq!(cfg.max_retries, -1);
        assert_eq!(cfg.peers.len(), 1);
        assert!(cfg.server.is_none());
    }
}
