//! Configuration module for nethealth.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::db::MonitoringConfig;

/// Network id assigned to bootstrap devices listed without one.
pub const DEFAULT_NETWORK_ID: &str = "default";

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the persisted JSON stores (default: "data")
    pub data_dir: PathBuf,
    /// Seconds between monitoring passes (default: 60)
    pub check_interval_seconds: u64,
    /// Resolve names during monitoring passes (default: false)
    pub include_dns: bool,
    /// Start the scheduler at startup (default: true)
    pub monitoring_enabled: bool,
    /// Echo requests per ping probe (default: 3)
    pub ping_count: u32,
    pub ping_timeout: Duration,
    pub port_timeout: Duration,
    pub dns_timeout: Duration,
    /// History older than this is pruned after each pass (default: 168).
    /// Values under 24 still keep the 24h stats window intact.
    pub history_retention_hours: u32,
    pub hosts_file: PathBuf,
    pub speedtest_url: String,
    /// Bytes transferred in each speed-test direction (default: 10 MB)
    pub speedtest_bytes: u64,
    /// Overall limit on one speed test (default: 60s)
    pub speedtest_timeout: Duration,
    /// Devices registered at startup, IP -> network id
    pub bootstrap_devices: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            check_interval_seconds: 60,
            include_dns: false,
            monitoring_enabled: true,
            ping_count: 3,
            ping_timeout: Duration::from_secs(2),
            port_timeout: Duration::from_millis(1000),
            dns_timeout: Duration::from_secs(2),
            history_retention_hours: 168,
            hosts_file: PathBuf::from("/etc/hosts"),
            speedtest_url: "https://speed.cloudflare.com".to_string(),
            speedtest_bytes: 10_000_000,
            speedtest_timeout: Duration::from_secs(60),
            bootstrap_devices: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NETHEALTH_DATA_DIR`: persisted state directory (default: "data")
    /// - `NETHEALTH_CHECK_INTERVAL`: seconds between passes (default: 60)
    /// - `NETHEALTH_INCLUDE_DNS`: resolve names during passes (default: false)
    /// - `NETHEALTH_MONITORING_ENABLED`: start monitoring at startup (default: true)
    /// - `NETHEALTH_PING_COUNT`: echo requests per probe (default: 3)
    /// - `NETHEALTH_PING_TIMEOUT`: per-reply wait in seconds (default: 2)
    /// - `NETHEALTH_PORT_TIMEOUT_MS`: TCP connect timeout (default: 1000)
    /// - `NETHEALTH_DNS_TIMEOUT`: reverse lookup timeout in seconds (default: 2)
    /// - `NETHEALTH_HISTORY_RETENTION_HOURS`: history kept in memory (default: 168)
    /// - `NETHEALTH_HOSTS_FILE`: hosts table path (default: "/etc/hosts")
    /// - `NETHEALTH_SPEEDTEST_URL`: speed test endpoint (default: Cloudflare)
    /// - `NETHEALTH_SPEEDTEST_BYTES`: transfer size per direction (default: 10000000)
    /// - `NETHEALTH_SPEEDTEST_TIMEOUT`: speed test limit in seconds (default: 60)
    /// - `NETHEALTH_DEVICES`: bootstrap devices as `ip=network,ip=network`
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(dir) = env::var("NETHEALTH_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse_var("NETHEALTH_CHECK_INTERVAL") {
            cfg.check_interval_seconds = secs;
        }
        if let Some(flag) = bool_var("NETHEALTH_INCLUDE_DNS") {
            cfg.include_dns = flag;
        }
        if let Some(flag) = bool_var("NETHEALTH_MONITORING_ENABLED") {
            cfg.monitoring_enabled = flag;
        }
        if let Some(count) = parse_var("NETHEALTH_PING_COUNT") {
            cfg.ping_count = count;
        }
        if let Some(secs) = parse_var("NETHEALTH_PING_TIMEOUT") {
            cfg.ping_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var("NETHEALTH_PORT_TIMEOUT_MS") {
            cfg.port_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var("NETHEALTH_DNS_TIMEOUT") {
            cfg.dns_timeout = Duration::from_secs(secs);
        }
        if let Some(hours) = parse_var("NETHEALTH_HISTORY_RETENTION_HOURS") {
            cfg.history_retention_hours = hours;
        }
        if let Ok(path) = env::var("NETHEALTH_HOSTS_FILE") {
            cfg.hosts_file = PathBuf::from(path);
        }
        if let Ok(url) = env::var("NETHEALTH_SPEEDTEST_URL") {
            cfg.speedtest_url = url;
        }
        if let Some(bytes) = parse_var("NETHEALTH_SPEEDTEST_BYTES") {
            cfg.speedtest_bytes = bytes;
        }
        if let Some(secs) = parse_var("NETHEALTH_SPEEDTEST_TIMEOUT") {
            cfg.speedtest_timeout = Duration::from_secs(secs);
        }
        if let Ok(devices) = env::var("NETHEALTH_DEVICES") {
            cfg.bootstrap_devices = parse_device_list(&devices);
        }

        cfg
    }

    /// Initial scheduler settings.
    pub fn monitoring_config(&self) -> MonitoringConfig {
        MonitoringConfig {
            enabled: self.monitoring_enabled,
            check_interval_seconds: self.check_interval_seconds.max(1),
            include_dns: self.include_dns,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", name, value);
            None
        }
    }
}

fn bool_var(name: &str) -> Option<bool> {
    let value = env::var(name).ok()?;
    parse_bool(&value)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `ip=network,ip` pairs; entries without a network get the default id.
pub fn parse_device_list(value: &str) -> HashMap<String, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((ip, network)) => (ip.trim().to_string(), network.trim().to_string()),
            None => (entry.to_string(), DEFAULT_NETWORK_ID.to_string()),
        })
        .collect()
}
