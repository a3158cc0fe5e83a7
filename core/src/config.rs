//! Watchdog configuration.
//!
//! Defaults match the CI setup this tool was written for: tests are allowed
//! to bind UDP ports 2000-3000, and a handful of well-known service ports
//! are always tolerated. A JSON config file can override any field.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Error, Result};

/// Ports below this value are well-known service ports and never flagged.
pub const WELL_KNOWN_LIMIT: u16 = 1024;

/// Watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Lower bound of the allowed port range (inclusive).
    #[serde(default = "default_min_port", rename = "minPort")]
    pub min_port: u16,

    /// Upper bound of the allowed port range (inclusive).
    #[serde(default = "default_max_port", rename = "maxPort")]
    pub max_port: u16,

    /// Ports tolerated regardless of range (DNS, mDNS, SSH, CUPS, fixed
    /// inter-process ports).
    #[serde(default = "default_ignore_ports", rename = "ignorePorts")]
    pub ignore_ports: HashSet<u16>,

    /// Seconds to sleep between iterations. Zero polls continuously.
    #[serde(default = "default_poll_interval", rename = "pollIntervalSecs")]
    pub poll_interval_secs: u64,

    /// Wall-clock bound on one test-command run, in seconds.
    #[serde(default = "default_test_timeout", rename = "testTimeoutSecs")]
    pub test_timeout_secs: u64,
}

fn default_min_port() -> u16 {
    2000
}

fn default_max_port() -> u16 {
    3000
}

fn default_ignore_ports() -> HashSet<u16> {
    // 22 SSH, 53 DNS, 631 IPP/CUPS, 1488/1489 fixed inter-process ports,
    // 5353 mDNS
    [22, 53, 631, 1488, 1489, 5353].into_iter().collect()
}

fn default_poll_interval() -> u64 {
    10
}

fn default_test_timeout() -> u64 {
    300
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            min_port: default_min_port(),
            max_port: default_max_port(),
            ignore_ports: default_ignore_ports(),
            poll_interval_secs: default_poll_interval(),
            test_timeout_secs: default_test_timeout(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults; a present but unreadable or
    /// malformed file is a configuration error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        Ok(config)
    }

    /// Check whether a port falls inside the allowed range.
    pub fn in_range(&self, port: u16) -> bool {
        port >= self.min_port && port <= self.max_port
    }
}
