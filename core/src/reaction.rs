//! Reaction policies for violating ports.
//!
//! Two mutually exclusive policies exist: kill the test runner outright, or
//! persist a diagnostic log and suppress further reports for that port.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;

use chrono::Local;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Trait for per-violation reactions.
///
/// The runtime ignore set is owned by the watchdog loop and handed in by
/// mutable reference; only the log policy touches it.
pub trait Reaction: Send + Sync {
    /// React to one violating port.
    ///
    /// `test_output` is the combined output of the most recent test run, if
    /// the watchdog is driving one.
    fn react(
        &self,
        port: u16,
        test_output: Option<&str>,
        runtime_ignored: &mut HashSet<u16>,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Kill policy: terminate every process matching the test runner's
/// executable name.
///
/// This is deliberately blunt. `killall` is not scoped to the process that
/// owns the offending socket, and one call is issued per violating port.
/// The call's outcome is not inspected.
pub struct KillReaction {
    process_name: String,
}

impl KillReaction {
    /// Create a kill reaction targeting the given executable name.
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
        }
    }
}

impl Reaction for KillReaction {
    async fn react(
        &self,
        port: u16,
        _test_output: Option<&str>,
        _runtime_ignored: &mut HashSet<u16>,
    ) -> Result<()> {
        debug!(port = port, target = %self.process_name, "issuing killall");

        match Command::new("killall")
            .arg(&self.process_name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => debug!(target = %self.process_name, %status, "killall finished"),
            Err(e) => debug!(target = %self.process_name, error = %e, "killall failed to spawn"),
        }

        Ok(())
    }
}

/// Log-and-suppress policy: persist the captured test output once per port,
/// then never report that port again for the life of the process.
pub struct LogReaction {
    output_dir: PathBuf,
}

impl LogReaction {
    /// Create a log reaction writing into the given directory.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn render_log(port: u16, test_output: Option<&str>) -> String {
        let separator = "=".repeat(80);
        let mut contents = String::new();
        contents.push_str(&format!("Disallowed port detected: {}\n", port));
        contents.push_str(&format!(
            "Timestamp: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        contents.push_str(&separator);
        contents.push('\n');
        contents.push_str("TEST RUNNER OUTPUT:\n");
        contents.push_str(&separator);
        contents.push('\n');
        contents.push_str(test_output.unwrap_or("(no test output captured)"));
        contents
    }
}

impl Reaction for LogReaction {
    async fn react(
        &self,
        port: u16,
        test_output: Option<&str>,
        runtime_ignored: &mut HashSet<u16>,
    ) -> Result<()> {
        if runtime_ignored.contains(&port) {
            return Ok(());
        }

        let filename = format!(
            "disallowed_port_{}_{}.log",
            port,
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let path = self.output_dir.join(filename);

        match fs::write(&path, Self::render_log(port, test_output)).await {
            Ok(()) => info!(port = port, path = %path.display(), "diagnostic log saved"),
            Err(e) => warn!(port = port, path = %path.display(), error = %e, "failed to save diagnostic log"),
        }

        // The port is suppressed even when the write failed; repeating a
        // broken write every iteration helps nobody.
        runtime_ignored.insert(port);
        info!(port = port, "port added to runtime ignore list");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_files(dir: &std::path::Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_log_reaction_writes_one_file_and_suppresses() {
        let dir = tempfile::tempdir().unwrap();
        let reaction = LogReaction::new(dir.path());
        let mut ignored = HashSet::new();

        reaction
            .react(40000, Some("test output here"), &mut ignored)
            .await
            .unwrap();

        let files = log_files(dir.path());
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("disallowed_port_40000_"));
        assert!(name.ends_with(".log"));

        let contents = std::fs::read_to_string(&files[0]).unwrap();
        assert!(contents.starts_with("Disallowed port detected: 40000\n"));
        assert!(contents.contains("TEST RUNNER OUTPUT:"));
        assert!(contents.ends_with("test output here"));

        assert!(ignored.contains(&40000));

        // Second report of the same port writes nothing new
        reaction
            .react(40000, Some("later output"), &mut ignored)
            .await
            .unwrap();
        assert_eq!(log_files(dir.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_log_reaction_without_test_output() {
        let dir = tempfile::tempdir().unwrap();
        let reaction = LogReaction::new(dir.path());
        let mut ignored = HashSet::new();

        reaction.react(50000, None, &mut ignored).await.unwrap();

        let files = log_files(dir.path());
        let contents = std::fs::read_to_string(&files[0]).unwrap();
        assert!(contents.ends_with("(no test output captured)"));
    }

    #[tokio::test]
    async fn test_log_reaction_write_failure_still_suppresses() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let reaction = LogReaction::new(&missing);
        let mut ignored = HashSet::new();

        reaction.react(40000, Some("out"), &mut ignored).await.unwrap();
        assert!(ignored.contains(&40000));
    }
}
