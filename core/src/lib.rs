//! PortWatch Core Library
//!
//! Watchdog for UDP sockets leaked by test suites during CI runs.
//! Provides functionality to:
//! - Sample bound UDP ports via the `ss` command
//! - Filter samples against an allowed range and ignore lists
//! - React to violations by killing the test runner or persisting
//!   diagnostic logs
//! - Drive the monitored test command with a wall-clock timeout
//!
//! # Architecture
//! One single-threaded loop ([`Watchdog`]) runs each iteration in strict
//! sequence: test driver (optional) → [`Sampler`] → [`filter`] →
//! [`Reaction`] per violation → status line → sleep. The loop favors
//! continuing over crashing; only a sampler failure under
//! `halt_on_sample_error` is fatal.
//!
//! # Platform Support
//! Linux only: sampling shells out to `ss`, the kill policy to `killall`.

pub mod config;
pub mod error;
pub mod filter;
pub mod reaction;
pub mod runner;
pub mod sampler;
pub mod watchdog;

// Re-export the primary API
pub use config::{WatchConfig, WELL_KNOWN_LIMIT};
pub use error::{Error, Result};
pub use filter::{find_violations, is_violation};
pub use reaction::{KillReaction, LogReaction, Reaction};
pub use runner::TestRunner;
pub use sampler::{Sampler, SsSampler};
pub use watchdog::Watchdog;
