//! Health reports pushed by remote agents.

use crate::db::PingResult;

use super::{validate_ip, MonitorEngine};

impl MonitorEngine {
    /// Fold an agent's reachability report into the device's state.
    ///
    /// The report goes through the same counter, history and cache path as a
    /// direct check. When `network_id` is given and the device is not yet
    /// registered, it is registered under that network. Returns false for an
    /// invalid address.
    pub async fn update_from_agent_health(
        &self,
        ip: &str,
        reachable: bool,
        response_time_ms: Option<f64>,
        network_id: Option<&str>,
    ) -> bool {
        if validate_ip(ip).is_err() {
            tracing::warn!("Agent health report for invalid address {:?} ignored", ip);
            return false;
        }

        if let Some(network) = network_id {
            let mut registry = self.registry.write().await;
            if !registry.is_registered(ip) {
                registry.register(ip, network);
                tracing::info!("Agent registered device {} on network {}", ip, network);
            }
        }

        let ping = PingResult::from_agent_report(reachable, response_time_ms);
        let metrics = self.apply_device_check(ip, ping, None, Vec::new()).await;
        tracing::debug!(
            "Agent health for {}: {:?} (failures: {})",
            ip,
            metrics.health.status,
            metrics.health.consecutive_failures
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::db::{HealthStatus, PingResult};
    use crate::engine::tests::engine_with;
    use crate::probe::testing::ScriptedProber;

    #[tokio::test]
    async fn test_agent_report_updates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(Arc::new(ScriptedProber::new()), dir.path());

        assert!(engine.update_from_agent_health("10.0.0.5", true, Some(42.0), None).await);
        let cached = engine.get_cached_metrics("10.0.0.5").await.unwrap();
        assert_eq!(cached.health.status, HealthStatus::Healthy);
        assert_eq!(cached.ping.avg_latency_ms, Some(42.0));
        assert!(cached.dns.is_none());
        // Not registered without a network id
        assert!(engine.get_monitored_devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_agent_and_direct_checks_share_counter() {
        let dir = tempfile::tempdir().unwrap();
        let prober = Arc::new(ScriptedProber::new());
        prober.script("10.0.0.6", vec![PingResult::failed()]);
        let engine = engine_with(prober, dir.path());

        engine.update_from_agent_health("10.0.0.6", false, None, None).await;
        let direct = engine.check_device_health("10.0.0.6", false, false).await;
        assert_eq!(direct.health.consecutive_failures, 2);

        engine.update_from_agent_health("10.0.0.6", false, None, None).await;
        let cached = engine.get_cached_metrics("10.0.0.6").await.unwrap();
        assert_eq!(cached.health.consecutive_failures, 3);
        assert_eq!(cached.health.status, HealthStatus::Unhealthy);

        engine.update_from_agent_health("10.0.0.6", true, None, None).await;
        let cached = engine.get_cached_metrics("10.0.0.6").await.unwrap();
        assert_eq!(cached.health.consecutive_failures, 0);
        assert_eq!(cached.health.checks_failed_24h, 3);
        assert_eq!(cached.health.checks_passed_24h, 1);
    }

    #[tokio::test]
    async fn test_agent_registers_with_network_id() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(Arc::new(ScriptedProber::new()), dir.path());

        assert!(engine
            .update_from_agent_health("10.0.0.7", true, Some(3.0), Some("branch-office"))
            .await);
        // An existing registration keeps its network
        assert!(engine
            .update_from_agent_health("10.0.0.7", true, Some(3.0), Some("other"))
            .await);

        let monitored = engine.get_monitored_devices().await;
        assert_eq!(monitored["10.0.0.7"], "branch-office");
    }

    #[tokio::test]
    async fn test_agent_rejects_invalid_address() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(Arc::new(ScriptedProber::new()), dir.path());

        assert!(!engine.update_from_agent_health("10.0.0", true, None, Some("net")).await);
        assert!(engine.get_all_cached_metrics().await.is_empty());
        assert!(engine.get_monitored_devices().await.is_empty());
    }
}
