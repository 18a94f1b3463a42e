//! Per-second rates over cumulative OS counters.
//!
//! A [`RateTracker`] keeps the previous [`CounterSample`] of one counter family
//! and turns each new sample into deltas and rates. A counter that goes
//! backwards (process restart, driver reset, wraparound) reports a zero delta
//! for that tick and becomes the new baseline; the wraparound distance is not
//! reconstructed because the counter width is platform specific.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

/// Values of one counter family captured at a monotonic instant.
#[derive(Debug, Clone)]
pub struct CounterSample<K> {
    values: HashMap<K, u64>,
    timestamp: Instant,
}

impl<K: Eq + Hash> CounterSample<K> {
    pub fn new(values: HashMap<K, u64>, timestamp: Instant) -> Self {
        Self { values, timestamp }
    }

    /// Capture `values` at the current instant.
    pub fn now(values: HashMap<K, u64>) -> Self {
        Self::new(values, Instant::now())
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn get(&self, key: &K) -> Option<u64> {
        self.values.get(key).copied()
    }
}

impl<K: Eq + Hash> FromIterator<(K, u64)> for CounterSample<K> {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        Self::now(iter.into_iter().collect())
    }
}

/// Delta of one counter over the last interval and its per-second rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterRate {
    pub delta: u64,
    pub rate_per_sec: f64,
}

/// Rates for every key of the latest sample.
///
/// Keys that were not in the baseline map to `None`: they are new this tick
/// and have no rate yet.
#[derive(Debug, Clone)]
pub struct RateResult<K> {
    entries: HashMap<K, Option<CounterRate>>,
}

impl<K: Eq + Hash> RateResult<K> {
    /// Rate for `key`, `None` when the key is unknown or new this tick.
    pub fn get(&self, key: &K) -> Option<CounterRate> {
        self.entries.get(key).copied().flatten()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether `key` appeared for the first time in the latest sample.
    pub fn is_new(&self, key: &K) -> bool {
        matches!(self.entries.get(key), Some(None))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, Option<CounterRate>)> {
        self.entries.iter().map(|(k, v)| (k, *v))
    }
}

/// Stateful converter from cumulative counters to rates.
///
/// Timestamps fed to one tracker must be non-decreasing. The tracker is
/// mutated through `&mut self`, so a single owner serializes access.
#[derive(Debug)]
pub struct RateTracker<K> {
    previous: Option<CounterSample<K>>,
}

impl<K> Default for RateTracker<K> {
    fn default() -> Self {
        Self { previous: None }
    }
}

impl<K: Eq + Hash + Clone> RateTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sample the next update will be compared against.
    pub fn baseline(&self) -> Option<&CounterSample<K>> {
        self.previous.as_ref()
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Feed the next sample.
    ///
    /// Returns `None` on the first call (baseline only) and whenever the
    /// sample's timestamp does not advance past the baseline; the baseline is
    /// left untouched in the latter case.
    pub fn update(&mut self, sample: CounterSample<K>) -> Option<RateResult<K>> {
        if self.previous.is_none() {
            self.previous = Some(sample);
            return None;
        }
        let previous = self.previous.as_ref()?;

        let elapsed = sample
            .timestamp
            .checked_duration_since(previous.timestamp)
            .filter(|elapsed| !elapsed.is_zero())?;
        let seconds = elapsed.as_secs_f64();

        let entries = sample
            .values
            .iter()
            .map(|(key, &current)| {
                let rate = previous.values.get(key).map(|&before| {
                    // A counter that went backwards was reset.
                    let delta = current.checked_sub(before).unwrap_or(0);
                    CounterRate {
                        delta,
                        rate_per_sec: delta as f64 / seconds,
                    }
                });
                (key.clone(), rate)
            })
            .collect();

        self.previous = Some(sample);
        Some(RateResult { entries })
    }
}
