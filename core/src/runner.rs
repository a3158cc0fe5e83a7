//! Bounded execution of the monitored test command.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs the configured test command once per watchdog iteration and captures
/// its combined output.
///
/// `run` never fails: launch errors and timeouts come back as sentinel
/// strings so the watchdog can still attach *something* to a diagnostic log.
/// The runner knows nothing about ports.
pub struct TestRunner {
    command: Vec<String>,
    timeout: Duration,
}

impl TestRunner {
    /// Create a runner for the given command line (program plus arguments).
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    /// Run the command to completion, returning stdout and stderr joined.
    pub async fn run(&self) -> String {
        let Some((program, args)) = self.command.split_first() else {
            return "ERROR: no test command configured".to_string();
        };

        debug!(command = %self.command.join(" "), "running test command");

        let output_future = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // On timeout the pending future is dropped; this makes the drop
            // take the child down with it
            .kill_on_drop(true)
            .output();

        match timeout(self.timeout, output_future).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                format!("{}\n{}", stdout, stderr)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed to run test command");
                format!("ERROR: failed to run test command: {}", e)
            }
            Err(_) => {
                warn!(secs = self.timeout.as_secs(), "test command timed out");
                format!(
                    "ERROR: test command timed out after {} seconds",
                    self.timeout.as_secs()
                )
            }
        }
    }
}
