//! Per-series counter state for delta computation.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Uniquely identifies a counter observation: device identity, metric
/// attribute name, and table instance. State is isolated per object row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub device: String,
    pub attribute: String,
    pub instance: String,
}

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    value: u64,
    seen_at: DateTime<Utc>,
}

/// Result of a [`CounterState::delta`] call. `delta` and `elapsed` are
/// meaningful only when `valid` is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaResult {
    /// Increase in counter value since the last sample, wrap-corrected,
    /// always ≥ 0.
    pub delta: u64,
    /// Time between the previous sample and this one. Rate = delta / elapsed.
    pub elapsed: Duration,
    /// False on the first observation of a key, or when the clock did not
    /// advance between samples.
    pub valid: bool,
}

impl DeltaResult {
    fn invalid() -> Self {
        Self {
            delta: 0,
            elapsed: Duration::zero(),
            valid: false,
        }
    }
}

/// Wrap boundary for Counter32 attributes.
pub const WRAP_COUNTER32: u64 = u32::MAX as u64;
/// Wrap boundary for Counter64 attributes.
pub const WRAP_COUNTER64: u64 = u64::MAX;

/// True for syntaxes representing monotonically increasing counters that
/// benefit from delta computation.
pub fn is_counter_syntax(syntax: &str) -> bool {
    matches!(syntax, "Counter32" | "Counter64")
}

/// Rollover boundary for the given syntax. Counter32 wraps at the u32 max;
/// everything else uses the u64 max.
pub fn wrap_for_syntax(syntax: &str) -> u64 {
    if syntax == "Counter32" {
        WRAP_COUNTER32
    } else {
        WRAP_COUNTER64
    }
}

/// Tracks the last observed value for every counter series so the producer
/// can compute per-interval deltas. Safe for concurrent use; the critical
/// section is one lookup and two writes.
#[derive(Debug, Default)]
pub struct CounterState {
    entries: Mutex<HashMap<CounterKey, CounterEntry>>,
}

impl CounterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `current` under `key` and, when a previous sample exists,
    /// returns the delta and elapsed time.
    ///
    /// On first observation the value is stored and `valid` is false. If
    /// `current < previous` the counter is assumed to have rolled over once:
    /// `delta = (wrap − previous) + current + 1`. Multiple wraps within one
    /// interval are not detected.
    pub fn delta(
        &self,
        key: CounterKey,
        current: u64,
        now: DateTime<Utc>,
        wrap: u64,
    ) -> DeltaResult {
        let mut entries = self.entries.lock().unwrap();
        let prev = entries.insert(
            key,
            CounterEntry {
                value: current,
                seen_at: now,
            },
        );

        let Some(prev) = prev else {
            return DeltaResult::invalid();
        };

        let elapsed = now - prev.seen_at;
        if elapsed <= Duration::zero() {
            return DeltaResult::invalid();
        }

        let delta = if current >= prev.value {
            current - prev.value
        } else {
            (wrap - prev.value) + current + 1
        };

        DeltaResult {
            delta,
            elapsed,
            valid: true,
        }
    }

    /// Deletes the stored state for `key`. Call when a device or table row
    /// is retired so stale state does not accumulate. The next observation
    /// of the key re-seeds.
    pub fn remove(&self, key: &CounterKey) {
        self.entries.lock().unwrap().remove(key);
    }

    /// Removes every entry whose last observation is older than
    /// `now − max_age`, returning how many were deleted. Run this on a slow
    /// timer to reclaim memory for devices that have gone away.
    pub fn purge(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - max_age;
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| e.seen_at >= cutoff);
        before - entries.len()
    }

    /// Number of tracked series (for monitoring and tests).
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
