//! Health classification rules.

use crate::db::{HealthStatus, PingResult};

/// Packet loss above this percentage marks a reachable target degraded.
pub const DEGRADED_PACKET_LOSS_PERCENT: f64 = 50.0;

/// Average latency above this many milliseconds marks a reachable target degraded.
pub const DEGRADED_LATENCY_MS: f64 = 200.0;

/// Classify a probe round. DNS and port results never affect the outcome.
pub fn classify(ping: &PingResult) -> HealthStatus {
    if !ping.success {
        return HealthStatus::Unhealthy;
    }

    let lossy = ping.packet_loss_percent > DEGRADED_PACKET_LOSS_PERCENT;
    let slow = ping
        .avg_latency_ms
        .is_some_and(|avg| avg > DEGRADED_LATENCY_MS);

    if lossy || slow {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Next value of the consecutive-failure counter after a check.
pub fn next_consecutive_failures(previous: u32, success: bool) -> u32 {
    if success {
        0
    } else {
        previous.saturating_add(1)
    }
}
