//! Scan configuration and the context handed to every component

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{ConfigError, EvidenceStore, Protocol};

/// Tor proxy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorConfig {
    /// SOCKS5 proxy address, host:port (default: 127.0.0.1:9050)
    pub socks_addr: String,
    /// Per-connection timeout in seconds
    pub timeout_secs: u64,
    /// Maximum retries per HTTP request
    pub max_retries: u32,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            socks_addr: "127.0.0.1:9050".to_string(),
            timeout_secs: 45,
            max_retries: 3,
        }
    }
}

impl TorConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    /// Proxy URL for HTTP clients (DNS resolved by Tor)
    pub fn proxy_url(&self) -> String {
        format!("socks5h://{}", self.socks_addr)
    }
}

/// Spider limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Maximum pages fetched per hidden service
    pub max_pages: usize,
    /// Maximum link hops from the service root
    pub max_depth: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 100,
            max_depth: 3,
        }
    }
}

/// Run-wide scan configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub tor: TorConfig,
    /// Evidence store directory
    pub db_dir: PathBuf,
    /// Crawl records newer than this are reused instead of refetched
    pub rescan_window_secs: i64,
    pub crawl: CrawlConfig,
    /// Protocols to probe
    pub protocols: Vec<Protocol>,
    /// Hidden services scanned at once in batch mode
    pub batch_concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            tor: TorConfig::default(),
            db_dir: PathBuf::from("hsrecon-db"),
            rescan_window_secs: 24 * 60 * 60,
            crawl: CrawlConfig::default(),
            protocols: Protocol::ALL.to_vec(),
            batch_concurrency: 4,
        }
    }
}

impl ScanConfig {
    /// Load from a TOML file; missing keys take their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Age limit for `has_recent_crawl_record` (negative: looks back)
    pub fn rescan_max_age(&self) -> Duration {
        Duration::seconds(-self.rescan_window_secs.abs())
    }

    pub fn is_enabled(&self, protocol: Protocol) -> bool {
        self.protocols.contains(&protocol)
    }
}

/// Explicit handles passed to scanners, passes and the crawler
#[derive(Clone)]
pub struct ScanContext {
    pub config: ScanConfig,
    pub store: Arc<EvidenceStore>,
}

impl ScanContext {
    pub fn new(config: ScanConfig, store: Arc<EvidenceStore>) -> Self {
        Self { config, store }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert!(config.tor.socks_addr.contains("9050"));
        assert_eq!(config.tor.timeout_secs, 45);
        assert_eq!(config.protocols.len(), 3);
        assert_eq!(config.tor.proxy_url(), "socks5h://127.0.0.1:9050");
    }

    #[test]
    fn test_rescan_age_looks_back() {
        let mut config = ScanConfig::default();
        config.rescan_window_secs = 3600;
        assert_eq!(config.rescan_max_age(), Duration::seconds(-3600));
    }

    #[test]
    fn test_partial_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hsrecon.toml");
        std::fs::write(
            &path,
            r#"
            protocols = ["vnc"]

            [tor]
            socks_addr = "127.0.0.1:9150"
            timeout_secs = 10
            "#,
        )
        .unwrap();

        let config = ScanConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.tor.socks_addr, "127.0.0.1:9150");
        assert_eq!(config.tor.timeout_secs, 10);
        assert_eq!(config.tor.max_retries, 3);
        assert_eq!(config.protocols, vec![Protocol::Vnc]);
        assert_eq!(config.crawl, CrawlConfig::default());
    }

    #[test]
    fn test_unreadable_config() {
        let err = ScanConfig::from_toml_file(Path::new("/nonexistent/hsrecon.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
