//! JSON-file persistence for gateway test-IP configuration and speed tests.
//!
//! Loading never fails: a missing file is an empty store and a corrupt one is
//! logged and treated as empty. Saving returns an error that callers log and
//! discard; the in-memory engine stays authoritative.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::models::{GatewayTestIPConfig, SpeedTestResult};

pub const GATEWAY_TEST_IPS_FILE: &str = "gateway_test_ips.json";
pub const SPEED_TEST_RESULTS_FILE: &str = "speed_test_results.json";

/// Persistence error types.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable storage rooted at a data directory.
#[derive(Debug, Clone)]
pub struct PersistenceGateway {
    data_dir: PathBuf,
}

impl PersistenceGateway {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub async fn load_gateway_test_ips(&self) -> HashMap<String, GatewayTestIPConfig> {
        self.load_map(GATEWAY_TEST_IPS_FILE).await
    }

    pub async fn save_gateway_test_ips(
        &self,
        configs: &HashMap<String, GatewayTestIPConfig>,
    ) -> Result<(), PersistError> {
        self.save_map(GATEWAY_TEST_IPS_FILE, configs).await
    }

    pub async fn load_speed_tests(&self) -> HashMap<String, SpeedTestResult> {
        self.load_map(SPEED_TEST_RESULTS_FILE).await
    }

    pub async fn save_speed_tests(
        &self,
        results: &HashMap<String, SpeedTestResult>,
    ) -> Result<(), PersistError> {
        self.save_map(SPEED_TEST_RESULTS_FILE, results).await
    }

    async fn load_map<T: DeserializeOwned>(&self, file_name: &str) -> HashMap<String, T> {
        let path = self.data_dir.join(file_name);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                tracing::warn!("Persistence: Failed to read {}: {}", path.display(), e);
                return HashMap::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(
                    "Persistence: Ignoring malformed {} ({}), starting empty",
                    path.display(),
                    e
                );
                HashMap::new()
            }
        }
    }

    /// Write via a temporary sibling file and rename it into place.
    async fn save_map<T: Serialize>(
        &self,
        file_name: &str,
        map: &HashMap<String, T>,
    ) -> Result<(), PersistError> {
        tokio::fs::create_dir_all(&self.data_dir).await?;

        let ordered: BTreeMap<&String, &T> = map.iter().collect();
        let content = serde_json::to_string_pretty(&ordered)?;

        let path = self.data_dir.join(file_name);
        let tmp_path = self.data_dir.join(format!("{}.tmp", file_name));
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        tracing::debug!("Persistence: Wrote {} entries to {}", map.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::TestIp;
    use chrono::{TimeZone, Utc};
    use tokio_test::assert_ok;

    fn sample_configs() -> HashMap<String, GatewayTestIPConfig> {
        let mut configs = HashMap::new();
        configs.insert(
            "192.168.1.1".to_string(),
            GatewayTestIPConfig {
                gateway_ip: "192.168.1.1".to_string(),
                test_ips: vec![
                    TestIp { ip: "8.8.8.8".to_string(), label: "Google DNS".to_string() },
                    TestIp { ip: "1.1.1.1".to_string(), label: "Cloudflare".to_string() },
                ],
                enabled: true,
            },
        );
        configs.insert(
            "10.0.0.1".to_string(),
            GatewayTestIPConfig {
                gateway_ip: "10.0.0.1".to_string(),
                test_ips: vec![TestIp { ip: "9.9.9.9".to_string(), label: "Quad9".to_string() }],
                enabled: false,
            },
        );
        configs
    }

    #[tokio::test]
    async fn test_gateway_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let configs = sample_configs();

        let writer = PersistenceGateway::new(dir.path());
        assert_ok!(writer.save_gateway_test_ips(&configs).await);

        let reader = PersistenceGateway::new(dir.path());
        assert_eq!(reader.load_gateway_test_ips().await, configs);
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = PersistenceGateway::new(dir.path().join("does-not-exist"));
        assert!(gateway.load_gateway_test_ips().await.is_empty());
        assert!(gateway.load_speed_tests().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(GATEWAY_TEST_IPS_FILE), "{ not json").unwrap();

        let gateway = PersistenceGateway::new(dir.path());
        assert!(gateway.load_gateway_test_ips().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let gateway = PersistenceGateway::new(&nested);

        assert_ok!(gateway.save_gateway_test_ips(&sample_configs()).await);
        assert!(nested.join(GATEWAY_TEST_IPS_FILE).exists());
        assert!(!nested.join(format!("{}.tmp", GATEWAY_TEST_IPS_FILE)).exists());
    }

    #[tokio::test]
    async fn test_save_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the data directory should be
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "x").unwrap();

        let gateway = PersistenceGateway::new(&blocker);
        let result = gateway.save_gateway_test_ips(&sample_configs()).await;
        assert!(matches!(result, Err(PersistError::Io(_))));
    }

    #[tokio::test]
    async fn test_speed_tests_read_back_naive_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{
            "192.168.1.1": {
                "success": true,
                "timestamp": "2024-05-01T12:30:00.500000",
                "download_mbps": 310.5,
                "upload_mbps": 42.0,
                "ping_ms": 11.2,
                "server_name": "speed.example.net"
            }
        }"#;
        std::fs::write(dir.path().join(SPEED_TEST_RESULTS_FILE), json).unwrap();

        let gateway = PersistenceGateway::new(dir.path());
        let results = gateway.load_speed_tests().await;
        let result = &results["192.168.1.1"];
        assert!(result.success);
        assert_eq!(result.upload_mbps, Some(42.0));
        assert_eq!(
            result.timestamp.timestamp(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap().timestamp()
        );

        // Saved results come back identical
        assert_ok!(gateway.save_speed_tests(&results).await);
        assert_eq!(gateway.load_speed_tests().await, results);
    }
}
