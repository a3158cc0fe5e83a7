//! UDP socket sampling via the `ss` command.
//!
//! One sample is the list of local UDP ports reported by a single `ss`
//! invocation. The sample is raw: no deduplication across socket families
//! and no ordering guarantee.

use std::process::Stdio;

use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Trait for sources of UDP port samples.
///
/// The production implementation shells out to `ss`; tests substitute fakes
/// to drive the watchdog loop deterministically.
pub trait Sampler: Send + Sync {
    /// Take one sample of currently bound UDP ports.
    fn sample(&self) -> impl std::future::Future<Output = Result<Vec<u16>>> + Send;
}

/// Samples UDP sockets by running `ss`.
pub struct SsSampler {
    port_regex: Regex,
}

/// Arguments to `ss`:
///
/// -O, --oneline       print each socket's data on a single line
/// -H, --no-header     suppress header line
/// -p, --processes     show process using socket
/// -n, --numeric       don't resolve service names
/// -u, --udp           display UDP sockets
/// -a, --all           display both listening and non-listening sockets
const SS_ARGS: [&str; 6] = ["-O", "-H", "-p", "-n", "-u", "-a"];

impl SsSampler {
    /// Create a new sampler.
    pub fn new() -> Self {
        Self {
            // Trailing ":<digits>" of a local address, e.g. "127.0.0.1:2021"
            // or "*:2021"
            port_regex: Regex::new(r":(\d+)$").unwrap(),
        }
    }

    /// Parse `ss` output into the list of local ports.
    ///
    /// Expected line format (columns are whitespace-separated):
    /// ```text
    /// UNCONN 0 0 127.0.0.1:2021 0.0.0.0:* users:(("test",pid=1234,fd=7))
    /// ```
    ///
    /// Lines with fewer than four fields (headers, truncated rows) are
    /// skipped, as is any local-address field without a trailing port.
    fn parse_output(&self, output: &str) -> Vec<u16> {
        let mut ports = Vec::new();

        for line in output.lines() {
            if line.trim().is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                continue;
            }

            let local_addr = fields[3];
            let Some(caps) = self.port_regex.captures(local_addr) else {
                continue;
            };

            if let Ok(port) = caps[1].parse::<u16>() {
                ports.push(port);
            }
        }

        ports
    }
}

impl Default for SsSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SsSampler {
    async fn sample(&self) -> Result<Vec<u16>> {
        debug!("running ss {}", SS_ARGS.join(" "));

        let output = Command::new("ss")
            .args(SS_ARGS)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::CommandFailed(format!("Failed to run ss: {}", e)))?;

        if !output.status.success() {
            return Err(Error::CommandFailed(format!(
                "ss exited with status {}",
                output.status
            )));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| Error::ParseError(format!("Invalid UTF-8 in ss output: {}", e)))?;

        Ok(self.parse_output(&stdout))
    }
}
