//! Throughput measurement against an HTTP speed-test endpoint.
//!
//! The backend speaks the Cloudflare-style protocol: `GET /__down?bytes=N`
//! streams N bytes back and `POST /__up` accepts an arbitrary body.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Url;

use super::ProbeError;

const LATENCY_SAMPLES: usize = 3;

/// Raw numbers produced by one measurement run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeedMeasurement {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub server_name: Option<String>,
    pub server_location: Option<String>,
    pub client_ip: Option<String>,
}

/// A swappable source of throughput measurements.
#[async_trait]
pub trait SpeedTestBackend: Send + Sync {
    async fn measure(&self) -> Result<SpeedMeasurement, ProbeError>;
}

/// Measures against an HTTP endpoint with reqwest.
#[derive(Debug)]
pub struct HttpSpeedTestBackend {
    client: reqwest::Client,
    base_url: Url,
    transfer_bytes: u64,
    timeout: Duration,
}

impl HttpSpeedTestBackend {
    pub fn new(base_url: &str, transfer_bytes: u64, timeout: Duration) -> Result<Self, ProbeError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| ProbeError::Config(format!("invalid speed test URL {}: {}", base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            transfer_bytes: transfer_bytes.max(1),
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProbeError> {
        self.base_url
            .join(path)
            .map_err(|e| ProbeError::Config(format!("invalid endpoint {}: {}", path, e)))
    }

    fn map_error(&self, e: reqwest::Error) -> ProbeError {
        if e.is_timeout() {
            ProbeError::Timeout(self.timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    }

    /// Best of several empty downloads, plus the metadata headers of the first.
    async fn measure_latency(&self) -> Result<(f64, HeaderMap), ProbeError> {
        let url = self.endpoint("__down?bytes=0")?;
        let mut best: Option<f64> = None;
        let mut headers = HeaderMap::new();

        for i in 0..LATENCY_SAMPLES {
            let start = Instant::now();
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| self.map_error(e))?
                .error_for_status()
                .map_err(|e| self.map_error(e))?;
            let elapsed = start.elapsed().as_secs_f64() * 1000.0;

            if i == 0 {
                headers = response.headers().clone();
            }
            response.bytes().await.map_err(|e| self.map_error(e))?;

            best = Some(best.map_or(elapsed, |b| b.min(elapsed)));
        }

        Ok((best.unwrap_or_default(), headers))
    }

    async fn measure_download(&self) -> Result<f64, ProbeError> {
        let url = self.endpoint(&format!("__down?bytes={}", self.transfer_bytes))?;

        let start = Instant::now();
        let body = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?
            .error_for_status()
            .map_err(|e| self.map_error(e))?
            .bytes()
            .await
            .map_err(|e| self.map_error(e))?;

        Ok(megabits_per_second(body.len() as u64, start.elapsed()))
    }

    async fn measure_upload(&self) -> Result<f64, ProbeError> {
        let url = self.endpoint("__up")?;
        let payload = vec![0u8; self.transfer_bytes as usize];

        let start = Instant::now();
        self.client
            .post(url)
            .body(payload)
            .send()
            .await
            .map_err(|e| self.map_error(e))?
            .error_for_status()
            .map_err(|e| self.map_error(e))?;

        Ok(megabits_per_second(self.transfer_bytes, start.elapsed()))
    }
}

#[async_trait]
impl SpeedTestBackend for HttpSpeedTestBackend {
    async fn measure(&self) -> Result<SpeedMeasurement, ProbeError> {
        let (ping_ms, headers) = self.measure_latency().await?;
        let download_mbps = self.measure_download().await?;
        let upload_mbps = self.measure_upload().await?;

        Ok(SpeedMeasurement {
            download_mbps,
            upload_mbps,
            ping_ms,
            server_name: self.base_url.host_str().map(str::to_string),
            server_location: header_value(&headers, "cf-meta-colo"),
            client_ip: header_value(&headers, "cf-meta-ip"),
        })
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Convert a transfer of `bytes` over `elapsed` into Mbit/s.
pub fn megabits_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0) / secs / 1_000_000.0
}
