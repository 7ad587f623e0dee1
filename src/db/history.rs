//! Per-key check history with rolling-window statistics.
//!
//! Entries are appended as checks complete and filtered by age when queried.
//! Pruning exists only to bound memory; correctness never depends on it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Default window for rolling statistics.
pub const DEFAULT_WINDOW_HOURS: u32 = 24;

/// One recorded check outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub latency_ms: Option<f64>,
}

/// Aggregates over the entries inside a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoricalStats {
    pub uptime_percent: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub checks_passed: u32,
    pub checks_failed: u32,
}

/// Append-only history keyed by device IP or (gateway, test IP).
#[derive(Debug)]
pub struct HistoryStore<K> {
    entries: HashMap<K, VecDeque<HistoryEntry>>,
}

impl<K> Default for HistoryStore<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> HistoryStore<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_at(
        &mut self,
        key: &K,
        timestamp: DateTime<Utc>,
        success: bool,
        latency_ms: Option<f64>,
    ) {
        self.entries
            .entry(key.clone())
            .or_default()
            .push_back(HistoryEntry {
                timestamp,
                success,
                latency_ms,
            });
    }

    /// Statistics over the `window_hours` ending at `now`.
    pub fn stats_at(&self, key: &K, window_hours: u32, now: DateTime<Utc>) -> HistoricalStats {
        let mut stats = HistoricalStats::default();
        let mut latency_sum = 0.0;
        let mut latency_count = 0u32;

        for entry in self.window(key, window_hours, now) {
            if entry.success {
                stats.checks_passed += 1;
                if let Some(latency) = entry.latency_ms {
                    latency_sum += latency;
                    latency_count += 1;
                }
            } else {
                stats.checks_failed += 1;
            }
        }

        let total = stats.checks_passed + stats.checks_failed;
        if total > 0 {
            stats.uptime_percent = Some(100.0 * stats.checks_passed as f64 / total as f64);
        }
        if latency_count > 0 {
            stats.avg_latency_ms = Some(latency_sum / latency_count as f64);
        }

        stats
    }

    /// Entries inside the `window_hours` ending at `now`, oldest first.
    pub fn history_at(&self, key: &K, window_hours: u32, now: DateTime<Utc>) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self.window(key, window_hours, now).cloned().collect();
        entries.sort_by_key(|e| e.timestamp);
        entries
    }

    /// Drop entries older than `cutoff`. Returns the number removed.
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| e.timestamp >= cutoff);
            removed += before - entries.len();
            !entries.is_empty()
        });
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self, key: &K) -> usize {
        self.entries.get(key).map_or(0, VecDeque::len)
    }

    fn window<'a>(
        &'a self,
        key: &K,
        window_hours: u32,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a HistoryEntry> + 'a
    where
        K: 'a,
    {
        let cutoff = now - ChronoDuration::hours(window_hours as i64);
        self.entries
            .get(key)
            .into_iter()
            .flatten()
            .filter(move |e| e.timestamp >= cutoff && e.timestamp <= now)
    }
}
