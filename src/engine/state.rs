//! Mutable per-key monitoring state.
//!
//! A `Keyspace` couples the failure counter, history and cache of one kind of
//! key so that a check outcome is applied to all three in one step.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::hash::Hash;

use crate::db::{
    HealthSnapshot, HealthStatus, HistoricalStats, HistoryEntry, HistoryStore, PingResult,
    DeviceMetrics, TestIPMetrics, DEFAULT_WINDOW_HOURS,
};
use crate::health;

/// Key of a gateway test IP: (gateway IP, test IP).
pub type TestIpKey = (String, String);

#[derive(Debug)]
pub struct Keyspace<K, M> {
    history: HistoryStore<K>,
    consecutive_failures: HashMap<K, u32>,
    last_seen_online: HashMap<K, DateTime<Utc>>,
    cache: HashMap<K, M>,
}

impl<K, M> Default for Keyspace<K, M> {
    fn default() -> Self {
        Self {
            history: HistoryStore::default(),
            consecutive_failures: HashMap::new(),
            last_seen_online: HashMap::new(),
            cache: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, M: Clone> Keyspace<K, M> {
    /// Classify a probe round and fold it into the counter and history.
    pub fn record(&mut self, key: &K, ping: &PingResult, at: DateTime<Utc>) -> HealthSnapshot {
        let status = health::classify(ping);

        let previous = self.consecutive_failures.get(key).copied().unwrap_or(0);
        let failures = health::next_consecutive_failures(previous, ping.success);
        self.consecutive_failures.insert(key.clone(), failures);

        if ping.success {
            self.last_seen_online.insert(key.clone(), at);
        }

        let latency = if ping.success { ping.avg_latency_ms } else { None };
        self.history.record_at(key, at, ping.success, latency);

        self.snapshot(key, status, at)
    }

    /// Current counters and rolling stats under `status`, without recording.
    pub fn snapshot(&self, key: &K, status: HealthStatus, at: DateTime<Utc>) -> HealthSnapshot {
        let stats = self.history.stats_at(key, DEFAULT_WINDOW_HOURS, at);
        HealthSnapshot {
            status,
            uptime_percent_24h: stats.uptime_percent,
            avg_latency_24h_ms: stats.avg_latency_ms,
            checks_passed_24h: stats.checks_passed,
            checks_failed_24h: stats.checks_failed,
            consecutive_failures: self.consecutive_failures.get(key).copied().unwrap_or(0),
            last_seen_online: self.last_seen_online.get(key).copied(),
            last_check: at,
        }
    }

    pub fn store(&mut self, key: K, metrics: M) {
        self.cache.insert(key, metrics);
    }

    pub fn cached(&self, key: &K) -> Option<M> {
        self.cache.get(key).cloned()
    }

    pub fn all_cached(&self) -> HashMap<K, M> {
        self.cache.clone()
    }

    pub fn history(&self, key: &K, window_hours: u32, now: DateTime<Utc>) -> Vec<HistoryEntry> {
        self.history.history_at(key, window_hours, now)
    }

    pub fn stats(&self, key: &K, window_hours: u32, now: DateTime<Utc>) -> HistoricalStats {
        self.history.stats_at(key, window_hours, now)
    }

    /// Drop history older than `retention_hours`, never inside the stats window.
    pub fn prune_older_than(&mut self, retention_hours: u32, now: DateTime<Utc>) -> usize {
        let hours = retention_hours.max(DEFAULT_WINDOW_HOURS);
        self.history
            .prune_before(now - ChronoDuration::hours(hours as i64))
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.consecutive_failures.clear();
        self.last_seen_online.clear();
        self.cache.clear();
    }
}

/// Everything the engine mutates per check, behind one lock.
#[derive(Debug, Default)]
pub struct MonitorState {
    pub devices: Keyspace<String, DeviceMetrics>,
    pub test_ips: Keyspace<TestIpKey, TestIPMetrics>,
}
