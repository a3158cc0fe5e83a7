//! Violation filtering.
//!
//! Pure logic: no side effects, no I/O. A port from a sample is a violation
//! iff it is at or above the well-known limit, not in either ignore set, and
//! outside the allowed range.

use std::collections::HashSet;

use crate::config::{WatchConfig, WELL_KNOWN_LIMIT};

/// Check whether a single sampled port counts as a violation.
pub fn is_violation(port: u16, config: &WatchConfig, runtime_ignored: &HashSet<u16>) -> bool {
    if port < WELL_KNOWN_LIMIT {
        return false;
    }
    if config.ignore_ports.contains(&port) {
        return false;
    }
    if runtime_ignored.contains(&port) {
        return false;
    }
    !config.in_range(port)
}

/// Filter a sample down to its violating ports.
///
/// Duplicates in the sample pass through; the caller decides how to react to
/// repeats.
pub fn find_violations(
    sample: &[u16],
    config: &WatchConfig,
    runtime_ignored: &HashSet<u16>,
) -> Vec<u16> {
    sample
        .iter()
        .copied()
        .filter(|&port| is_violation(port, config, runtime_ignored))
        .collect()
}
