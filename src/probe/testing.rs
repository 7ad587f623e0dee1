//! Scripted probes for exercising the engine without touching the network.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ProbeError, Prober, SpeedMeasurement, SpeedTestBackend};
use crate::db::{DnsResult, PingResult, PortCheckResult};

/// A successful round with a single latency.
pub(crate) fn reply(avg_ms: f64) -> PingResult {
    PingResult::from_samples(&[avg_ms], 0.0)
}

/// Answers pings from per-IP queues, falling back to a 10 ms reply.
#[derive(Default)]
pub(crate) struct ScriptedProber {
    scripts: Mutex<HashMap<String, VecDeque<PingResult>>>,
    panic_on: Mutex<HashSet<String>>,
    ping_delay: Mutex<Duration>,
    pings: AtomicUsize,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, ip: &str, results: Vec<PingResult>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(ip.to_string())
            .or_default()
            .extend(results);
    }

    pub fn panic_on(&self, ip: &str) {
        self.panic_on.lock().unwrap().insert(ip.to_string());
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        *self.ping_delay.lock().unwrap() = delay;
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn ping(&self, ip: &str, _count: u32) -> PingResult {
        if self.panic_on.lock().unwrap().contains(ip) {
            panic!("scripted probe failure for {}", ip);
        }
        self.pings.fetch_add(1, Ordering::SeqCst);

        let delay = *self.ping_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(ip)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| reply(10.0))
    }

    async fn resolve_dns(&self, ip: &str) -> DnsResult {
        let name = format!("host-{}.lan", ip.replace('.', "-"));
        DnsResult {
            success: true,
            resolved_hostname: Some(name.clone()),
            reverse_dns: Some(name),
            resolution_time_ms: 1.0,
        }
    }

    async fn check_port(&self, _ip: &str, port: u16, _timeout: Duration) -> PortCheckResult {
        let open = matches!(port, 22 | 443);
        PortCheckResult {
            port,
            open,
            service: super::service_name(port).map(str::to_string),
            response_time_ms: open.then_some(0.5),
        }
    }
}

/// Returns a fixed measurement, or a fixed error when `failure` is set.
pub(crate) struct FixedSpeedBackend {
    pub failure: Option<String>,
    pub calls: AtomicUsize,
}

impl FixedSpeedBackend {
    pub fn succeeding() -> Self {
        Self {
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SpeedTestBackend for FixedSpeedBackend {
    async fn measure(&self) -> Result<SpeedMeasurement, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(ProbeError::Network(message.clone()));
        }
        Ok(SpeedMeasurement {
            download_mbps: 250.0,
            upload_mbps: 40.0,
            ping_ms: 12.0,
            server_name: Some("speed.example.net".to_string()),
            server_location: Some("AMS".to_string()),
            client_ip: Some("203.0.113.10".to_string()),
        })
    }
}
