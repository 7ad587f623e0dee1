//! The monitoring engine.
//!
//! One `MonitorEngine` owns the metrics cache, check history and device
//! registry. The scheduler, the direct-check API and the agent-sync path all
//! share it through an `Arc`, so a check looks the same no matter who ran it.

mod agent;
mod gateway;
mod registry;
mod speed;
mod state;

pub use registry::DeviceRegistry;
pub use state::{Keyspace, MonitorState, TestIpKey};

use std::any::Any;
use std::collections::HashMap;
use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::config::EngineConfig;
use crate::db::{
    DeviceMetrics, DnsResult, HealthStatus, HistoricalStats, HistoryEntry, PersistenceGateway,
    PingResult, PortCheckResult, SpeedTestResult,
};
use crate::probe::{HttpSpeedTestBackend, ProbeError, ProbeSettings, Prober, SpeedTestBackend, SystemProber};

/// Per-key failures of the check pipeline itself.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),
    #[error("check task failed: {0}")]
    TaskFailed(String),
}

/// Engine tunables that are fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub ping_count: u32,
    pub history_retention_hours: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            ping_count: 3,
            history_retention_hours: 168,
        }
    }
}

pub struct MonitorEngine {
    prober: Arc<dyn Prober>,
    speed_backend: Arc<dyn SpeedTestBackend>,
    persistence: PersistenceGateway,
    settings: EngineSettings,
    registry: RwLock<DeviceRegistry>,
    state: RwLock<MonitorState>,
    speed_tests: RwLock<HashMap<String, SpeedTestResult>>,
    /// Serializes speed tests; concurrent runs would skew each other.
    speed_test_lock: Mutex<()>,
    /// Serializes writes to the persisted files.
    persist_lock: Mutex<()>,
}

impl MonitorEngine {
    pub fn new(
        prober: Arc<dyn Prober>,
        speed_backend: Arc<dyn SpeedTestBackend>,
        persistence: PersistenceGateway,
        settings: EngineSettings,
    ) -> Self {
        Self {
            prober,
            speed_backend,
            persistence,
            settings,
            registry: RwLock::new(DeviceRegistry::default()),
            state: RwLock::new(MonitorState::default()),
            speed_tests: RwLock::new(HashMap::new()),
            speed_test_lock: Mutex::new(()),
            persist_lock: Mutex::new(()),
        }
    }

    /// Build an engine backed by the system prober and the HTTP speed test.
    pub fn from_config(cfg: &EngineConfig) -> Result<Self, ProbeError> {
        let prober = SystemProber::new(ProbeSettings::from(cfg));
        let backend =
            HttpSpeedTestBackend::new(&cfg.speedtest_url, cfg.speedtest_bytes, cfg.speedtest_timeout)?;

        Ok(Self::new(
            Arc::new(prober),
            Arc::new(backend),
            PersistenceGateway::new(&cfg.data_dir),
            EngineSettings {
                ping_count: cfg.ping_count,
                history_retention_hours: cfg.history_retention_hours,
            },
        ))
    }

    /// Load persisted gateway configuration and speed tests.
    pub async fn load_persisted(&self) {
        let gateways = self.persistence.load_gateway_test_ips().await;
        let speed_tests = self.persistence.load_speed_tests().await;

        tracing::info!(
            "Loaded {} gateway test-IP configs and {} speed test results from {}",
            gateways.len(),
            speed_tests.len(),
            self.persistence.data_dir().display()
        );

        self.registry.write().await.replace_gateways(gateways);
        *self.speed_tests.write().await = speed_tests;
    }

    // --- Direct device checks ---

    /// Probe one device. Always returns metrics; pipeline faults become `Unknown`.
    pub async fn check_device_health(
        &self,
        ip: &str,
        include_ports: bool,
        include_dns: bool,
    ) -> DeviceMetrics {
        self.guarded_device_check(ip, include_ports, include_dns).await
    }

    /// Probe many devices concurrently with per-IP fault isolation.
    pub async fn check_multiple_devices(
        &self,
        ips: &[String],
        include_dns: bool,
    ) -> HashMap<String, DeviceMetrics> {
        self.check_batch(ips, include_dns, None).await
    }

    /// Batch check; each check first sleeps a random slice of `stagger`.
    pub(crate) async fn check_batch(
        &self,
        ips: &[String],
        include_dns: bool,
        stagger: Option<Duration>,
    ) -> HashMap<String, DeviceMetrics> {
        let checks = ips.iter().map(|ip| async move {
            if let Some(spread) = stagger {
                tokio::time::sleep(random_delay(spread)).await;
            }
            let metrics = self.guarded_device_check(ip, false, include_dns).await;
            (ip.clone(), metrics)
        });

        join_all(checks).await.into_iter().collect()
    }

    async fn guarded_device_check(
        &self,
        ip: &str,
        include_ports: bool,
        include_dns: bool,
    ) -> DeviceMetrics {
        let outcome = AssertUnwindSafe(self.probe_device(ip, include_ports, include_dns))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(MonitorError::TaskFailed(panic_message(panic))));

        match outcome {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::warn!("Device check for {} faulted: {}", ip, e);
                self.unknown_device_metrics(ip, e.to_string()).await
            }
        }
    }

    async fn probe_device(
        &self,
        ip: &str,
        include_ports: bool,
        include_dns: bool,
    ) -> Result<DeviceMetrics, MonitorError> {
        validate_ip(ip)?;

        let ping = self.prober.ping(ip, self.settings.ping_count);
        let dns = async {
            if include_dns {
                Some(self.prober.resolve_dns(ip).await)
            } else {
                None
            }
        };
        let ports = async {
            if include_ports {
                self.prober.scan_common_ports(ip).await
            } else {
                Vec::new()
            }
        };

        let (ping, dns, open_ports) = tokio::join!(ping, dns, ports);
        Ok(self.apply_device_check(ip, ping, dns, open_ports).await)
    }

    /// Fold one probe outcome into counter, history and cache atomically.
    pub(crate) async fn apply_device_check(
        &self,
        ip: &str,
        ping: PingResult,
        dns: Option<DnsResult>,
        open_ports: Vec<PortCheckResult>,
    ) -> DeviceMetrics {
        let key = ip.to_string();
        let mut state = self.state.write().await;
        let health = state.devices.record(&key, &ping, Utc::now());

        let metrics = DeviceMetrics {
            ip: key.clone(),
            health,
            ping,
            dns,
            open_ports,
            error_message: None,
        };
        state.devices.store(key, metrics.clone());
        metrics
    }

    async fn unknown_device_metrics(&self, ip: &str, cause: String) -> DeviceMetrics {
        let state = self.state.read().await;
        let health = state
            .devices
            .snapshot(&ip.to_string(), HealthStatus::Unknown, Utc::now());

        DeviceMetrics {
            ip: ip.to_string(),
            health,
            ping: PingResult::failed(),
            dns: None,
            open_ports: Vec::new(),
            error_message: Some(cause),
        }
    }

    // --- Cached state ---

    pub async fn get_cached_metrics(&self, ip: &str) -> Option<DeviceMetrics> {
        self.state.read().await.devices.cached(&ip.to_string())
    }

    pub async fn get_all_cached_metrics(&self) -> HashMap<String, DeviceMetrics> {
        self.state.read().await.devices.all_cached()
    }

    pub async fn get_device_history(&self, ip: &str, window_hours: u32) -> Vec<HistoryEntry> {
        self.state
            .read()
            .await
            .devices
            .history(&ip.to_string(), window_hours, Utc::now())
    }

    pub async fn get_device_stats(&self, ip: &str, window_hours: u32) -> HistoricalStats {
        self.state
            .read()
            .await
            .devices
            .stats(&ip.to_string(), window_hours, Utc::now())
    }

    /// Drop all cached metrics, history and failure counters.
    pub async fn clear_cache(&self) {
        let mut state = self.state.write().await;
        state.devices.clear();
        state.test_ips.clear();
        tracing::info!("Cleared cached metrics and check history");
    }

    /// Prune history older than the retention window. Returns entries removed.
    pub async fn prune_history(&self) -> usize {
        let retention = self.settings.history_retention_hours;
        let now = Utc::now();
        let mut state = self.state.write().await;
        state.devices.prune_older_than(retention, now) + state.test_ips.prune_older_than(retention, now)
    }

    // --- Registry ---

    pub async fn register_devices(&self, devices: HashMap<String, String>) {
        let count = devices.len();
        self.registry.write().await.register_devices(devices);
        tracing::info!("Registered {} devices for monitoring", count);
    }

    pub async fn unregister_devices(&self, ips: &[String]) -> usize {
        let removed = self.registry.write().await.unregister_devices(ips);
        tracing::info!("Unregistered {} devices from monitoring", removed);
        removed
    }

    pub async fn set_monitored_devices(&self, devices: HashMap<String, String>) {
        let count = devices.len();
        self.registry.write().await.set_monitored_devices(devices);
        tracing::info!("Monitored device set replaced ({} devices)", count);
    }

    pub async fn get_monitored_devices(&self) -> HashMap<String, String> {
        self.registry.read().await.monitored_devices().clone()
    }

    pub(crate) async fn enabled_gateway_ips(&self) -> Vec<String> {
        self.registry.read().await.enabled_gateway_ips()
    }
}

fn validate_ip(ip: &str) -> Result<IpAddr, MonitorError> {
    ip.parse()
        .map_err(|_| MonitorError::InvalidAddress(ip.to_string()))
}

fn random_delay(spread: Duration) -> Duration {
    let max_ms = spread.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::random::<u64>() % max_ms)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "check panicked".to_string()
    }
}
