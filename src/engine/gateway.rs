//! Per-gateway test-IP configuration and fan-out checks.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;

use super::{panic_message, validate_ip, MonitorEngine, MonitorError, TestIpKey};
use crate::db::{
    GatewayTestIPConfig, GatewayTestIPsResult, HealthStatus, HistoryEntry, PingResult, TestIPMetrics,
    TestIp,
};

impl MonitorEngine {
    /// Create or replace the test-IP configuration of a gateway and persist it.
    pub async fn set_gateway_test_ips(
        &self,
        gateway_ip: &str,
        test_ips: Vec<TestIp>,
        enabled: bool,
    ) -> GatewayTestIPConfig {
        let config = GatewayTestIPConfig {
            gateway_ip: gateway_ip.to_string(),
            test_ips,
            enabled,
        };
        self.registry.write().await.set_gateway(config.clone());

        tracing::info!(
            "Gateway {}: {} test IPs configured (enabled: {})",
            gateway_ip,
            config.test_ips.len(),
            enabled
        );
        self.persist_gateway_configs().await;
        config
    }

    pub async fn get_gateway_test_ips(&self, gateway_ip: &str) -> Option<GatewayTestIPConfig> {
        self.registry.read().await.gateway(gateway_ip).cloned()
    }

    pub async fn get_all_gateway_test_ips(&self) -> HashMap<String, GatewayTestIPConfig> {
        self.registry.read().await.gateways().clone()
    }

    /// Returns false when the gateway had no configuration.
    pub async fn remove_gateway_test_ips(&self, gateway_ip: &str) -> bool {
        let removed = self.registry.write().await.remove_gateway(gateway_ip).is_some();
        if removed {
            tracing::info!("Gateway {}: test IP configuration removed", gateway_ip);
            self.persist_gateway_configs().await;
        }
        removed
    }

    async fn persist_gateway_configs(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.registry.read().await.gateways().clone();
        if let Err(e) = self.persistence.save_gateway_test_ips(&snapshot).await {
            tracing::error!("Failed to persist gateway test IPs: {}", e);
        }
    }

    /// Check every test IP of `gateway_ip` concurrently.
    ///
    /// A missing or disabled configuration yields an empty result.
    pub async fn check_gateway_test_ips(&self, gateway_ip: &str) -> GatewayTestIPsResult {
        let config = self.get_gateway_test_ips(gateway_ip).await;

        let test_ips = match config {
            Some(cfg) if cfg.enabled => {
                let checks = cfg
                    .test_ips
                    .iter()
                    .map(|test_ip| self.guarded_test_ip_check(gateway_ip, test_ip));
                join_all(checks).await
            }
            _ => Vec::new(),
        };

        GatewayTestIPsResult {
            gateway_ip: gateway_ip.to_string(),
            test_ips,
            last_check: Utc::now(),
        }
    }

    async fn guarded_test_ip_check(&self, gateway_ip: &str, test_ip: &TestIp) -> TestIPMetrics {
        let outcome = AssertUnwindSafe(self.probe_test_ip(gateway_ip, test_ip))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(MonitorError::TaskFailed(panic_message(panic))));

        match outcome {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::warn!(
                    "Test IP {} ({}) via gateway {} faulted: {}",
                    test_ip.ip,
                    test_ip.label,
                    gateway_ip,
                    e
                );
                let key = (gateway_ip.to_string(), test_ip.ip.clone());
                let health = self
                    .state
                    .read()
                    .await
                    .test_ips
                    .snapshot(&key, HealthStatus::Unknown, Utc::now());
                TestIPMetrics {
                    gateway_ip: gateway_ip.to_string(),
                    test_ip: test_ip.ip.clone(),
                    label: test_ip.label.clone(),
                    health,
                    ping: PingResult::failed(),
                    error_message: Some(e.to_string()),
                }
            }
        }
    }

    async fn probe_test_ip(
        &self,
        gateway_ip: &str,
        test_ip: &TestIp,
    ) -> Result<TestIPMetrics, MonitorError> {
        validate_ip(&test_ip.ip)?;
        let ping = self.prober.ping(&test_ip.ip, self.settings.ping_count).await;

        let key: TestIpKey = (gateway_ip.to_string(), test_ip.ip.clone());
        let mut state = self.state.write().await;
        let health = state.test_ips.record(&key, &ping, Utc::now());

        let metrics = TestIPMetrics {
            gateway_ip: gateway_ip.to_string(),
            test_ip: test_ip.ip.clone(),
            label: test_ip.label.clone(),
            health,
            ping,
            error_message: None,
        };
        state.test_ips.store(key, metrics.clone());
        Ok(metrics)
    }

    /// Cached metrics of a gateway's test IPs, in configuration order.
    pub async fn get_cached_test_ip_metrics(&self, gateway_ip: &str) -> Vec<TestIPMetrics> {
        let Some(config) = self.get_gateway_test_ips(gateway_ip).await else {
            return Vec::new();
        };

        let state = self.state.read().await;
        config
            .test_ips
            .iter()
            .filter_map(|t| {
                state
                    .test_ips
                    .cached(&(gateway_ip.to_string(), t.ip.clone()))
            })
            .collect()
    }

    pub async fn get_test_ip_history(
        &self,
        gateway_ip: &str,
        test_ip: &str,
        window_hours: u32,
    ) -> Vec<HistoryEntry> {
        let key = (gateway_ip.to_string(), test_ip.to_string());
        self.state
            .read()
            .await
            .test_ips
            .history(&key, window_hours, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::db::{HealthStatus, PersistenceGateway, PingResult, TestIp};
    use crate::engine::tests::engine_with;
    use crate::probe::testing::{reply, ScriptedProber};

    fn test_ip(ip: &str, label: &str) -> TestIp {
        TestIp {
            ip: ip.to_string(),
            label: label.to_string(),
        }
    }

    #[tokio::test]
    async fn test_enable_disable_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let prober = Arc::new(ScriptedProber::new());
        prober.script("8.8.8.8", vec![reply(18.0)]);
        let engine = engine_with(prober.clone(), dir.path());

        engine
            .set_gateway_test_ips("192.168.1.1", vec![test_ip("8.8.8.8", "Google DNS")], true)
            .await;

        let result = engine.check_gateway_test_ips("192.168.1.1").await;
        assert_eq!(result.gateway_ip, "192.168.1.1");
        assert_eq!(result.test_ips.len(), 1);
        let metrics = &result.test_ips[0];
        assert_eq!(metrics.label, "Google DNS");
        assert_eq!(metrics.health.status, HealthStatus::Healthy);
        assert_eq!(metrics.ping.avg_latency_ms, Some(18.0));

        engine
            .set_gateway_test_ips("192.168.1.1", vec![test_ip("8.8.8.8", "Google DNS")], false)
            .await;
        let result = engine.check_gateway_test_ips("192.168.1.1").await;
        assert!(result.test_ips.is_empty());
        assert_eq!(prober.ping_count(), 1);

        // Cached metrics from the enabled run remain readable
        let cached = engine.get_cached_test_ip_metrics("192.168.1.1").await;
        assert_eq!(cached.len(), 1);
        assert_eq!(engine.get_test_ip_history("192.168.1.1", "8.8.8.8", 24).await.len(), 1);

        engine
            .set_gateway_test_ips("192.168.1.1", vec![test_ip("8.8.8.8", "Google DNS")], true)
            .await;
        let result = engine.check_gateway_test_ips("192.168.1.1").await;
        assert_eq!(result.test_ips.len(), 1);
        assert_eq!(result.test_ips[0].test_ip, "8.8.8.8");
        assert_eq!(result.test_ips[0].label, "Google DNS");
        assert_eq!(prober.ping_count(), 2);
        assert_eq!(engine.get_test_ip_history("192.168.1.1", "8.8.8.8", 24).await.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_gateway_then_reenabled() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(Arc::new(ScriptedProber::new()), dir.path());
        let configured = vec![test_ip("8.8.8.8", "Google DNS"), test_ip("1.1.1.1", "Cloudflare")];

        engine
            .set_gateway_test_ips("192.168.1.1", configured.clone(), false)
            .await;
        assert!(engine.check_gateway_test_ips("192.168.1.1").await.test_ips.is_empty());

        engine.set_gateway_test_ips("192.168.1.1", configured, true).await;
        let result = engine.check_gateway_test_ips("192.168.1.1").await;
        let checked: Vec<&str> = result.test_ips.iter().map(|m| m.test_ip.as_str()).collect();
        assert_eq!(checked, vec!["8.8.8.8", "1.1.1.1"]);
    }

    #[tokio::test]
    async fn test_unknown_gateway_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(Arc::new(ScriptedProber::new()), dir.path());

        let result = engine.check_gateway_test_ips("10.9.9.1").await;
        assert!(result.test_ips.is_empty());
        assert!(engine.get_cached_test_ip_metrics("10.9.9.1").await.is_empty());
        assert!(!engine.remove_gateway_test_ips("10.9.9.1").await);
    }

    #[tokio::test]
    async fn test_same_test_ip_is_tracked_per_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let prober = Arc::new(ScriptedProber::new());
        prober.script("1.1.1.1", vec![PingResult::failed(), reply(9.0)]);
        let engine = engine_with(prober, dir.path());

        engine
            .set_gateway_test_ips("192.168.1.1", vec![test_ip("1.1.1.1", "Cloudflare")], true)
            .await;
        engine
            .set_gateway_test_ips("192.168.2.1", vec![test_ip("1.1.1.1", "Cloudflare")], true)
            .await;

        let first = engine.check_gateway_test_ips("192.168.1.1").await;
        let second = engine.check_gateway_test_ips("192.168.2.1").await;
        assert_eq!(first.test_ips[0].health.status, HealthStatus::Unhealthy);
        assert_eq!(first.test_ips[0].health.consecutive_failures, 1);
        assert_eq!(second.test_ips[0].health.status, HealthStatus::Healthy);
        assert_eq!(second.test_ips[0].health.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_faulted_test_ip_does_not_affect_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let prober = Arc::new(ScriptedProber::new());
        prober.panic_on("9.9.9.9");
        let engine = engine_with(prober, dir.path());

        engine
            .set_gateway_test_ips(
                "192.168.1.1",
                vec![
                    test_ip("8.8.8.8", "Google DNS"),
                    test_ip("9.9.9.9", "Quad9"),
                    test_ip("bogus", "Typo"),
                ],
                true,
            )
            .await;

        let result = engine.check_gateway_test_ips("192.168.1.1").await;
        let statuses: Vec<HealthStatus> = result.test_ips.iter().map(|m| m.health.status).collect();
        assert_eq!(
            statuses,
            vec![HealthStatus::Healthy, HealthStatus::Unknown, HealthStatus::Unknown]
        );
        assert!(result.test_ips[1].error_message.is_some());
        assert!(result.test_ips[2].error_message.is_some());

        let cached = engine.get_cached_test_ip_metrics("192.168.1.1").await;
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].test_ip, "8.8.8.8");
    }

    #[tokio::test]
    async fn test_gateway_configs_persist_across_engines() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = engine_with(Arc::new(ScriptedProber::new()), dir.path());
            engine
                .set_gateway_test_ips("192.168.1.1", vec![test_ip("8.8.8.8", "Google DNS")], true)
                .await;
            engine
                .set_gateway_test_ips("192.168.5.1", vec![test_ip("1.1.1.1", "Cloudflare")], false)
                .await;
            assert!(engine.remove_gateway_test_ips("192.168.5.1").await);
        }

        let on_disk = PersistenceGateway::new(dir.path()).load_gateway_test_ips().await;
        assert_eq!(on_disk.len(), 1);

        let engine = engine_with(Arc::new(ScriptedProber::new()), dir.path());
        engine.load_persisted().await;
        let config = engine.get_gateway_test_ips("192.168.1.1").await.unwrap();
        assert!(config.enabled);
        assert_eq!(config.test_ips, vec![test_ip("8.8.8.8", "Google DNS")]);
        assert_eq!(engine.enabled_gateway_ips().await, vec!["192.168.1.1"]);
    }
}
