//! Thread identity.
//!
//! A thread is one independent conversation/task stream. Identifiers are a
//! fixed-width hex millisecond timestamp followed by a random suffix, so they
//! sort by creation time without any central coordinator.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Last time component handed out in this process.
static LAST_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Unique, time-sortable identifier for a thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    /// Generate a fresh identifier.
    ///
    /// The time component never goes backwards within a process, even if the
    /// wall clock does or two ids are minted in the same millisecond.
    pub fn new() -> Self {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let millis = next_millis(now);
        let suffix: u32 = rand::rng().random();
        Self(format!("th_{millis:012x}{suffix:08x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn next_millis(now: u64) -> u64 {
    let mut prev = LAST_MILLIS.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(prev + 1);
        match LAST_MILLIS.compare_exchange_weak(prev, candidate, Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => return candidate,
            Err(actual) => prev = actual,
        }
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
