//! Model types shared by the probes, the engine and the persisted stores.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health classification of a device or test IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// The check pipeline itself faulted; never produced by classification.
    Unknown,
}

/// Outcome of one round of reachability probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    pub success: bool,
    pub packet_loss_percent: f64,
    pub latency_ms: Option<f64>,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    /// Sample standard deviation of the observed round-trip times.
    pub jitter_ms: Option<f64>,
}

impl PingResult {
    /// A round in which nothing came back.
    pub fn failed() -> Self {
        Self {
            success: false,
            packet_loss_percent: 100.0,
            latency_ms: None,
            min_latency_ms: None,
            max_latency_ms: None,
            avg_latency_ms: None,
            jitter_ms: None,
        }
    }

    /// Build a result from parsed round-trip samples.
    ///
    /// An empty sample set is a failure regardless of the reported loss.
    pub fn from_samples(samples: &[f64], packet_loss_percent: f64) -> Self {
        if samples.is_empty() {
            return Self::failed();
        }

        let count = samples.len() as f64;
        let avg = samples.iter().sum::<f64>() / count;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let jitter = if samples.len() < 2 {
            0.0
        } else {
            let variance =
                samples.iter().map(|s| (s - avg).powi(2)).sum::<f64>() / (count - 1.0);
            variance.sqrt()
        };

        Self {
            success: true,
            packet_loss_percent: packet_loss_percent.clamp(0.0, 100.0),
            latency_ms: Some(avg),
            min_latency_ms: Some(min),
            max_latency_ms: Some(max),
            avg_latency_ms: Some(avg),
            jitter_ms: Some(jitter),
        }
    }

    /// Synthesize a result from reachability measured by an external agent.
    pub fn from_agent_report(reachable: bool, response_time_ms: Option<f64>) -> Self {
        if !reachable {
            return Self::failed();
        }

        Self {
            success: true,
            packet_loss_percent: 0.0,
            latency_ms: response_time_ms,
            min_latency_ms: response_time_ms,
            max_latency_ms: response_time_ms,
            avg_latency_ms: response_time_ms,
            jitter_ms: response_time_ms.map(|_| 0.0),
        }
    }
}

/// Outcome of reverse and host-table name resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsResult {
    pub success: bool,
    pub resolved_hostname: Option<String>,
    pub reverse_dns: Option<String>,
    pub resolution_time_ms: f64,
}

/// Outcome of a single TCP connect attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortCheckResult {
    pub port: u16,
    pub open: bool,
    pub service: Option<String>,
    pub response_time_ms: Option<f64>,
}

/// Health fields common to device and test-IP metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub uptime_percent_24h: Option<f64>,
    pub avg_latency_24h_ms: Option<f64>,
    pub checks_passed_24h: u32,
    pub checks_failed_24h: u32,
    pub consecutive_failures: u32,
    pub last_seen_online: Option<DateTime<Utc>>,
    pub last_check: DateTime<Utc>,
}

/// Latest known state of a monitored device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetrics {
    pub ip: String,
    #[serde(flatten)]
    pub health: HealthSnapshot,
    pub ping: PingResult,
    pub dns: Option<DnsResult>,
    #[serde(default)]
    pub open_ports: Vec<PortCheckResult>,
    /// Set only when the check pipeline faulted, not on probe failure.
    pub error_message: Option<String>,
}

/// Latest known state of one gateway test IP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestIPMetrics {
    pub gateway_ip: String,
    pub test_ip: String,
    pub label: String,
    #[serde(flatten)]
    pub health: HealthSnapshot,
    pub ping: PingResult,
    pub error_message: Option<String>,
}

/// An address checked from a gateway to gauge uplink health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestIp {
    pub ip: String,
    pub label: String,
}

/// Test-IP configuration for one gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayTestIPConfig {
    pub gateway_ip: String,
    pub test_ips: Vec<TestIp>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Result of checking every test IP of a gateway.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayTestIPsResult {
    pub gateway_ip: String,
    pub test_ips: Vec<TestIPMetrics>,
    pub last_check: DateTime<Utc>,
}

/// Outcome of a throughput measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestResult {
    pub success: bool,
    #[serde(with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub ping_ms: Option<f64>,
    pub server_name: Option<String>,
    pub server_location: Option<String>,
    pub client_ip: Option<String>,
    pub gateway_ip: Option<String>,
    pub error_message: Option<String>,
}

impl SpeedTestResult {
    pub fn failed(gateway_ip: Option<&str>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            timestamp: Utc::now(),
            download_mbps: None,
            upload_mbps: None,
            ping_ms: None,
            server_name: None,
            server_location: None,
            client_ip: None,
            gateway_ip: gateway_ip.map(str::to_string),
            error_message: Some(error.into()),
        }
    }
}

/// Scheduler settings that can be changed at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub check_interval_seconds: u64,
    pub include_dns: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: 60,
            include_dns: false,
        }
    }
}

/// Snapshot of the scheduler for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringStatus {
    pub enabled: bool,
    pub running: bool,
    pub pass_in_progress: bool,
    pub check_interval_seconds: u64,
    pub include_dns: bool,
    pub monitored_devices: usize,
    pub gateway_configs: usize,
    pub last_check_time: Option<DateTime<Utc>>,
}

/// Parse an ISO-8601 timestamp, with or without an offset.
///
/// Timestamps without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Serde adapter writing RFC 3339 and reading ISO-8601 strings or epoch seconds.
pub mod flexible_timestamp {
    use super::parse_timestamp;
    use chrono::{DateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Text(String),
        Epoch(f64),
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Text(text) => parse_timestamp(&text)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", text))),
            RawTimestamp::Epoch(secs) => {
                let nanos = (secs.fract() * 1e9).round() as u32;
                DateTime::from_timestamp(secs.trunc() as i64, nanos.min(999_999_999))
                    .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", secs)))
            }
        }
    }
}
