//! Scheduler module for periodic monitoring passes.
//!
//! A single background loop ticks at the configured interval. Each tick runs
//! one pass over registered devices and enabled gateway test IPs; a tick that
//! lands while a pass is still running is skipped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{broadcast, Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::db::{HealthStatus, MonitoringConfig, MonitoringStatus};
use crate::engine::MonitorEngine;

/// Upper bound of the random delay spreading device checks within a pass.
pub const DEFAULT_PASS_STAGGER: Duration = Duration::from_millis(500);

/// Counts from one completed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub devices_checked: usize,
    pub test_ips_checked: usize,
    /// Checks that ended `Unknown` because the pipeline faulted.
    pub faults: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass held the guard; nothing was checked.
    Skipped,
    Completed(PassSummary),
}

struct LoopHandle {
    stop_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

/// Drives periodic monitoring passes against a shared engine.
pub struct MonitoringScheduler {
    engine: Arc<MonitorEngine>,
    config: RwLock<MonitoringConfig>,
    /// One permit; held for the duration of a pass.
    in_flight: Arc<Semaphore>,
    last_check_time: RwLock<Option<DateTime<Utc>>>,
    pass_stagger: Duration,
    task: Mutex<Option<LoopHandle>>,
}

impl MonitoringScheduler {
    pub fn new(engine: Arc<MonitorEngine>, config: MonitoringConfig) -> Arc<Self> {
        Self::with_pass_stagger(engine, config, DEFAULT_PASS_STAGGER)
    }

    pub fn with_pass_stagger(
        engine: Arc<MonitorEngine>,
        config: MonitoringConfig,
        pass_stagger: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            config: RwLock::new(normalize(config)),
            in_flight: Arc::new(Semaphore::new(1)),
            last_check_time: RwLock::new(None),
            pass_stagger,
            task: Mutex::new(None),
        })
    }

    /// Start the background loop. Returns false if it was already running.
    pub async fn start_monitoring(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return false;
        }

        self.config.write().await.enabled = true;
        *task = Some(self.spawn_loop().await);
        true
    }

    /// Stop the background loop. Returns false if it was not running.
    pub async fn stop_monitoring(&self) -> bool {
        let mut task = self.task.lock().await;
        self.config.write().await.enabled = false;

        match task.take() {
            Some(handle) => {
                halt_loop(handle).await;
                tracing::info!("Monitoring stopped");
                true
            }
            None => false,
        }
    }

    /// Replace the runtime settings, restarting the loop when it must change.
    pub async fn set_monitoring_config(self: &Arc<Self>, config: MonitoringConfig) -> MonitoringConfig {
        let config = normalize(config);
        let mut task = self.task.lock().await;
        *self.config.write().await = config.clone();

        if let Some(handle) = task.take() {
            halt_loop(handle).await;
        }
        if config.enabled {
            *task = Some(self.spawn_loop().await);
        }

        tracing::info!(
            "Monitoring config updated: enabled={}, interval={}s, include_dns={}",
            config.enabled,
            config.check_interval_seconds,
            config.include_dns
        );
        config
    }

    pub async fn get_monitoring_config(&self) -> MonitoringConfig {
        self.config.read().await.clone()
    }

    pub async fn get_monitoring_status(&self) -> MonitoringStatus {
        let config = self.get_monitoring_config().await;
        let running = self.task.lock().await.is_some();

        MonitoringStatus {
            enabled: config.enabled,
            running,
            pass_in_progress: self.in_flight.available_permits() == 0,
            check_interval_seconds: config.check_interval_seconds,
            include_dns: config.include_dns,
            monitored_devices: self.engine.get_monitored_devices().await.len(),
            gateway_configs: self.engine.get_all_gateway_test_ips().await.len(),
            last_check_time: *self.last_check_time.read().await,
        }
    }

    /// Run one pass now unless one is already in progress.
    pub async fn perform_monitoring_pass(&self) -> PassOutcome {
        match self.in_flight.clone().try_acquire_owned() {
            Ok(permit) => PassOutcome::Completed(self.run_pass(permit).await),
            Err(_) => {
                tracing::debug!("Monitoring pass already in progress, skipping");
                PassOutcome::Skipped
            }
        }
    }

    async fn run_pass(&self, permit: OwnedSemaphorePermit) -> PassSummary {
        let _permit = permit;
        let started = Instant::now();
        let include_dns = self.config.read().await.include_dns;

        let mut devices: Vec<String> = self.engine.get_monitored_devices().await.into_keys().collect();
        devices.sort();
        let stagger = (!self.pass_stagger.is_zero()).then_some(self.pass_stagger);
        let device_results = self.engine.check_batch(&devices, include_dns, stagger).await;

        let gateways = self.engine.enabled_gateway_ips().await;
        let gateway_results =
            join_all(gateways.iter().map(|gw| self.engine.check_gateway_test_ips(gw))).await;

        let test_ips_checked = gateway_results.iter().map(|r| r.test_ips.len()).sum();
        let faults = device_results
            .values()
            .map(|m| m.health.status)
            .chain(
                gateway_results
                    .iter()
                    .flat_map(|r| r.test_ips.iter().map(|m| m.health.status)),
            )
            .filter(|s| *s == HealthStatus::Unknown)
            .count();

        let pruned = self.engine.prune_history().await;
        *self.last_check_time.write().await = Some(Utc::now());

        let summary = PassSummary {
            devices_checked: device_results.len(),
            test_ips_checked,
            faults,
        };
        tracing::info!(
            "Monitoring pass: {} devices, {} test IPs across {} gateways, {} faults, {} history entries pruned in {:?}",
            summary.devices_checked,
            summary.test_ips_checked,
            gateways.len(),
            summary.faults,
            pruned,
            started.elapsed()
        );
        summary
    }

    async fn spawn_loop(self: &Arc<Self>) -> LoopHandle {
        let interval_secs = self.config.read().await.check_interval_seconds;
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let join = tokio::spawn(run_monitoring_loop(self.clone(), interval_secs, stop_rx));

        tracing::info!("Monitoring started (interval: {}s)", interval_secs);
        LoopHandle { stop_tx, join }
    }
}

fn normalize(mut config: MonitoringConfig) -> MonitoringConfig {
    config.check_interval_seconds = config.check_interval_seconds.max(1);
    config
}

async fn halt_loop(handle: LoopHandle) {
    let _ = handle.stop_tx.send(());
    if let Err(e) = handle.join.await {
        tracing::error!("Monitoring loop ended abnormally: {}", e);
    }
}

async fn run_monitoring_loop(
    scheduler: Arc<MonitoringScheduler>,
    interval_secs: u64,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut current_pass: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                break;
            }
            _ = interval.tick() => {
                let permit = match scheduler.in_flight.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        tracing::warn!("Skipping monitoring pass: previous pass still running");
                        continue;
                    }
                };

                let scheduler = scheduler.clone();
                current_pass = Some(tokio::spawn(async move {
                    scheduler.run_pass(permit).await;
                }));
            }
        }
    }

    // The aborted pass drops its permit before the handle resolves
    if let Some(pass) = current_pass {
        pass.abort();
        if let Err(e) = pass.await {
            if !e.is_cancelled() {
                tracing::error!("Monitoring pass ended abnormally: {}", e);
            }
        }
    }
}
