//! Probe module for network health checks.
//!
//! Supports ping, name resolution, TCP port and throughput probes. Every probe
//! reports failure as data; `ProbeError` never escapes a public probe call.

mod dns;
mod ping;
mod port;
mod speedtest;

#[cfg(test)]
pub(crate) mod testing;

pub use dns::*;
pub use ping::*;
pub use port::*;
pub use speedtest::*;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::db::{DnsResult, PingResult, PortCheckResult};

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Timeout used by the default common-port scan.
pub const DEFAULT_PORT_TIMEOUT: Duration = Duration::from_millis(1000);

/// The probing primitives the engine depends on.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn ping(&self, ip: &str, count: u32) -> PingResult;

    async fn resolve_dns(&self, ip: &str) -> DnsResult;

    async fn check_port(&self, ip: &str, port: u16, timeout: Duration) -> PortCheckResult;

    /// Connect timeout used by `scan_common_ports`.
    fn port_timeout(&self) -> Duration {
        DEFAULT_PORT_TIMEOUT
    }

    /// Check the well-known port table concurrently, returning only open ports.
    async fn scan_common_ports(&self, ip: &str) -> Vec<PortCheckResult> {
        let timeout = self.port_timeout();
        let checks: Vec<_> = WELL_KNOWN_PORTS
            .iter()
            .map(|(port, _)| self.check_port(ip, *port, timeout))
            .collect();
        collect_open_ports(checks).await
    }
}

/// Probe timeouts and lookup sources.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub ping_timeout: Duration,
    pub port_timeout: Duration,
    pub dns_timeout: Duration,
    pub hosts_file: PathBuf,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_secs(2),
            port_timeout: DEFAULT_PORT_TIMEOUT,
            dns_timeout: Duration::from_secs(2),
            hosts_file: PathBuf::from("/etc/hosts"),
        }
    }
}

impl From<&EngineConfig> for ProbeSettings {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            ping_timeout: cfg.ping_timeout,
            port_timeout: cfg.port_timeout,
            dns_timeout: cfg.dns_timeout,
            hosts_file: cfg.hosts_file.clone(),
        }
    }
}

/// Probes using the host's `ping` binary, resolver and TCP stack.
#[derive(Debug, Clone, Default)]
pub struct SystemProber {
    settings: ProbeSettings,
}

impl SystemProber {
    pub fn new(settings: ProbeSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Prober for SystemProber {
    async fn ping(&self, ip: &str, count: u32) -> PingResult {
        run_ping_probe(ip, count, self.settings.ping_timeout).await
    }

    async fn resolve_dns(&self, ip: &str) -> DnsResult {
        run_dns_probe(ip, &self.settings.hosts_file, self.settings.dns_timeout).await
    }

    async fn check_port(&self, ip: &str, port: u16, timeout: Duration) -> PortCheckResult {
        run_port_probe(ip, port, timeout).await
    }

    fn port_timeout(&self) -> Duration {
        self.settings.port_timeout
    }
}
