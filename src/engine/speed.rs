//! Throughput tests, one at a time, with the latest result kept per gateway.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use chrono::Utc;
use futures::FutureExt;

use super::{panic_message, MonitorEngine};
use crate::db::SpeedTestResult;

impl MonitorEngine {
    /// Run a speed test, waiting for any test already in progress.
    ///
    /// Failures are returned as `success: false` results. Successful results
    /// with a gateway are cached and persisted under that gateway.
    pub async fn run_speed_test(&self, gateway_ip: Option<&str>) -> SpeedTestResult {
        let _running = self.speed_test_lock.lock().await;
        tracing::info!("Starting speed test (gateway: {:?})", gateway_ip);

        let outcome = AssertUnwindSafe(self.speed_backend.measure())
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(m)) => SpeedTestResult {
                success: true,
                timestamp: Utc::now(),
                download_mbps: Some(m.download_mbps),
                upload_mbps: Some(m.upload_mbps),
                ping_ms: Some(m.ping_ms),
                server_name: m.server_name,
                server_location: m.server_location,
                client_ip: m.client_ip,
                gateway_ip: gateway_ip.map(str::to_string),
                error_message: None,
            },
            Ok(Err(e)) => SpeedTestResult::failed(gateway_ip, e.to_string()),
            Err(panic) => SpeedTestResult::failed(gateway_ip, panic_message(panic)),
        };

        if !result.success {
            tracing::warn!(
                "Speed test failed: {}",
                result.error_message.as_deref().unwrap_or("unknown error")
            );
            return result;
        }

        tracing::info!(
            "Speed test complete: {:.1} Mbps down, {:.1} Mbps up",
            result.download_mbps.unwrap_or_default(),
            result.upload_mbps.unwrap_or_default()
        );

        if let Some(gateway) = gateway_ip {
            self.speed_tests
                .write()
                .await
                .insert(gateway.to_string(), result.clone());
            self.persist_speed_tests().await;
        }

        result
    }

    pub async fn get_last_speed_test(&self, gateway_ip: &str) -> Option<SpeedTestResult> {
        self.speed_tests.read().await.get(gateway_ip).cloned()
    }

    pub async fn get_all_speed_tests(&self) -> HashMap<String, SpeedTestResult> {
        self.speed_tests.read().await.clone()
    }

    async fn persist_speed_tests(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.speed_tests.read().await.clone();
        if let Err(e) = self.persistence.save_speed_tests(&snapshot).await {
            tracing::error!("Failed to persist speed test results: {}", e);
        }
    }
}
