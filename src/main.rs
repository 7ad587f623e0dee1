//! nethealth - network health monitoring daemon.

use nethealth::config::EngineConfig;
use nethealth::engine::MonitorEngine;
use nethealth::scheduler::MonitoringScheduler;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("nethealth=info".parse()?))
        .init();

    // Load configuration
    let cfg = EngineConfig::load();
    tracing::info!("Starting nethealth (data dir: {})", cfg.data_dir.display());

    // Build the engine and restore persisted state
    let engine = Arc::new(MonitorEngine::from_config(&cfg)?);
    engine.load_persisted().await;

    if !cfg.bootstrap_devices.is_empty() {
        engine.register_devices(cfg.bootstrap_devices.clone()).await;
    }

    // Start scheduler
    let monitoring = cfg.monitoring_config();
    let scheduler = MonitoringScheduler::new(engine.clone(), monitoring.clone());
    if monitoring.enabled {
        scheduler.start_monitoring().await;
    } else {
        tracing::info!("Monitoring disabled at startup");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    scheduler.stop_monitoring().await;

    Ok(())
}
