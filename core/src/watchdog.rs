//! The watchdog loop: sample, filter, react, sleep, repeat.
//!
//! Strictly sequential and single-threaded; every external command blocks
//! the loop until it finishes. The loop never stops on its own — the
//! operator interrupts it from outside.
//!
//! When a test runner is configured it executes before each sample, so a
//! violation is attributed to "whatever ran during the most recent test
//! run" rather than to the socket's owning process. That imprecision is
//! accepted; this is a coarse watchdog, not a profiler.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Local;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::WatchConfig;
use crate::error::Result;
use crate::filter::find_violations;
use crate::reaction::Reaction;
use crate::runner::TestRunner;
use crate::sampler::Sampler;

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// The watchdog loop controller.
///
/// Owns the configuration, the runtime ignore set, and the components of one
/// iteration. Status lines go to stdout; they are the operator's audit
/// trail, meant to be redirected to a file.
pub struct Watchdog<S: Sampler, R: Reaction> {
    config: WatchConfig,
    sampler: S,
    reaction: R,
    runner: Option<TestRunner>,
    runtime_ignored: HashSet<u16>,
    halt_on_sample_error: bool,
    iteration: u64,
}

impl<S: Sampler, R: Reaction> Watchdog<S, R> {
    /// Create a watchdog over the given sampler and reaction policy.
    pub fn new(config: WatchConfig, sampler: S, reaction: R) -> Self {
        Self {
            config,
            sampler,
            reaction,
            runner: None,
            runtime_ignored: HashSet::new(),
            halt_on_sample_error: false,
            iteration: 0,
        }
    }

    /// Run the given test command before each sample.
    pub fn with_runner(mut self, runner: TestRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Treat sampler failures as fatal instead of as an empty sample.
    pub fn halt_on_sample_error(mut self, halt: bool) -> Self {
        self.halt_on_sample_error = halt;
        self
    }

    /// Ports suppressed after their first reported violation.
    pub fn runtime_ignored(&self) -> &HashSet<u16> {
        &self.runtime_ignored
    }

    /// Number of completed iterations.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Run one iteration: test command (if configured), sample, filter,
    /// react per violation, status line. Returns the violations found.
    pub async fn tick(&mut self) -> Result<Vec<u16>> {
        self.iteration += 1;
        debug!(iteration = self.iteration, "starting iteration");

        let test_output = match &self.runner {
            Some(runner) => {
                println!("Running test command...");
                Some(runner.run().await)
            }
            None => None,
        };

        let sample = match self.sampler.sample().await {
            Ok(sample) => sample,
            Err(e) if self.halt_on_sample_error => return Err(e),
            Err(e) => {
                warn!(error = %e, "socket sampling failed, treating as empty sample");
                Vec::new()
            }
        };

        let violations = find_violations(&sample, &self.config, &self.runtime_ignored);

        if violations.is_empty() {
            println!("[{}] All ports in allowed range", timestamp());
        } else {
            let ts = timestamp();
            for &port in &violations {
                println!("[{}] ERROR: Detected disallowed UDP port {}", ts, port);
                self.reaction
                    .react(port, test_output.as_deref(), &mut self.runtime_ignored)
                    .await?;
            }
        }

        Ok(violations)
    }

    /// Run forever with the configured delay between iterations.
    ///
    /// Returns only when an iteration fails fatally (sampler failure under
    /// `halt_on_sample_error`).
    pub async fn run(&mut self) -> Result<()> {
        println!("[{}] Port watchdog started", timestamp());
        println!(
            "Monitoring for UDP ports outside range {}-{}",
            self.config.min_port, self.config.max_port
        );
        let mut ignored: Vec<u16> = self.config.ignore_ports.iter().copied().collect();
        ignored.sort_unstable();
        println!("Statically ignored ports: {:?}", ignored);

        loop {
            self.tick().await?;

            let interval = self.config.poll_interval_secs;
            if interval > 0 {
                println!("Waiting {} seconds before next check...", interval);
                sleep(Duration::from_secs(interval)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::reaction::LogReaction;
    use std::sync::Mutex;

    /// Replays a scripted sequence of samples, then repeats the last one.
    struct FakeSampler {
        samples: Mutex<Vec<Vec<u16>>>,
    }

    impl FakeSampler {
        fn new(samples: Vec<Vec<u16>>) -> Self {
            Self {
                samples: Mutex::new(samples),
            }
        }
    }

    impl Sampler for FakeSampler {
        async fn sample(&self) -> Result<Vec<u16>> {
            let mut samples = self.samples.lock().unwrap();
            if samples.len() > 1 {
                Ok(samples.remove(0))
            } else {
                Ok(samples.first().cloned().unwrap_or_default())
            }
        }
    }

    struct FailingSampler;

    impl Sampler for FailingSampler {
        async fn sample(&self) -> Result<Vec<u16>> {
            Err(Error::CommandFailed("ss not found".to_string()))
        }
    }

    /// Records every react call without touching the ignore set, like the
    /// kill policy.
    struct CountingReaction {
        calls: Mutex<Vec<u16>>,
    }

    impl CountingReaction {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Reaction for CountingReaction {
        async fn react(
            &self,
            port: u16,
            _test_output: Option<&str>,
            _runtime_ignored: &mut HashSet<u16>,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(port);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_one_react_call_per_violating_port() {
        let sampler = FakeSampler::new(vec![vec![80, 40000, 50000, 2021]]);
        let mut watchdog =
            Watchdog::new(WatchConfig::default(), sampler, CountingReaction::new());

        let violations = watchdog.tick().await.unwrap();
        assert_eq!(violations, vec![40000, 50000]);
        assert_eq!(*watchdog.reaction.calls.lock().unwrap(), vec![40000, 50000]);
    }

    #[tokio::test]
    async fn test_counting_policy_rereports_every_iteration() {
        // Without runtime suppression the same port fires again next round
        let sampler = FakeSampler::new(vec![vec![40000]]);
        let mut watchdog =
            Watchdog::new(WatchConfig::default(), sampler, CountingReaction::new());

        assert_eq!(watchdog.tick().await.unwrap(), vec![40000]);
        assert_eq!(watchdog.tick().await.unwrap(), vec![40000]);
        assert_eq!(watchdog.reaction.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_log_policy_suppresses_after_first_violation() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = FakeSampler::new(vec![vec![40000], vec![40000]]);
        let mut watchdog = Watchdog::new(
            WatchConfig::default(),
            sampler,
            LogReaction::new(dir.path()),
        );

        let first = watchdog.tick().await.unwrap();
        assert_eq!(first, vec![40000]);
        assert!(watchdog.runtime_ignored().contains(&40000));
        let count = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 1);

        // Second iteration: all clear, no new file
        let second = watchdog.tick().await.unwrap();
        assert!(second.is_empty());
        let count = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_sampler_failure_is_fatal_when_halting() {
        let mut watchdog =
            Watchdog::new(WatchConfig::default(), FailingSampler, CountingReaction::new())
                .halt_on_sample_error(true);

        let err = watchdog.tick().await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed(_)));
    }

    #[tokio::test]
    async fn test_sampler_failure_is_empty_sample_by_default() {
        let mut watchdog =
            Watchdog::new(WatchConfig::default(), FailingSampler, CountingReaction::new());

        let violations = watchdog.tick().await.unwrap();
        assert!(violations.is_empty());
        assert!(watchdog.reaction.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_iteration_counter_advances() {
        let sampler = FakeSampler::new(vec![Vec::new()]);
        let mut watchdog =
            Watchdog::new(WatchConfig::default(), sampler, CountingReaction::new());
        assert_eq!(watchdog.iteration(), 0);
        watchdog.tick().await.unwrap();
        watchdog.tick().await.unwrap();
        assert_eq!(watchdog.iteration(), 2);
    }
}
