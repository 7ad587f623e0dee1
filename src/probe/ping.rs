//! Ping probe implementation via the system `ping` command.
//!
//! Output from both the iputils (Linux) and BSD/macOS variants is parsed for
//! per-reply round-trip times and the packet-loss summary.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;

use super::ProbeError;
use crate::db::PingResult;

/// Extra time granted to the `ping` process beyond its per-packet budget.
const PROCESS_GRACE: Duration = Duration::from_secs(2);

/// Send `count` echo requests to `address`.
///
/// Never fails: spawn errors and deadline overruns become a failed result.
pub async fn run_ping_probe(address: &str, count: u32, timeout: Duration) -> PingResult {
    match run_ping_command(address, count, timeout).await {
        Ok(output) => parse_ping_output(&output),
        Err(e) => {
            tracing::debug!("Ping probe for {} failed: {}", address, e);
            PingResult::failed()
        }
    }
}

/// Run the `ping` binary and return its stdout.
async fn run_ping_command(address: &str, count: u32, timeout: Duration) -> Result<String, ProbeError> {
    let count = count.max(1);
    let deadline = timeout * count + PROCESS_GRACE;

    let mut command = Command::new("ping");
    command
        .args(ping_args(address, count, timeout))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(deadline, command.output())
        .await
        .map_err(|_| ProbeError::Timeout(deadline))?
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(target_os = "macos")]
fn ping_args(address: &str, count: u32, timeout: Duration) -> Vec<String> {
    // BSD ping takes the per-reply wait in milliseconds
    let wait_ms = timeout.as_millis().max(1);
    vec![
        "-c".to_string(),
        count.to_string(),
        "-W".to_string(),
        wait_ms.to_string(),
        address.to_string(),
    ]
}

#[cfg(not(target_os = "macos"))]
fn ping_args(address: &str, count: u32, timeout: Duration) -> Vec<String> {
    let wait_secs = timeout.as_secs().max(1);
    vec![
        "-c".to_string(),
        count.to_string(),
        "-W".to_string(),
        wait_secs.to_string(),
        address.to_string(),
    ]
}

/// Parse ping command output into a result.
pub fn parse_ping_output(output: &str) -> PingResult {
    // Per-reply "time=X.XXX ms" or "time<1 ms"
    static RE_TIME: OnceLock<Regex> = OnceLock::new();
    let re_time =
        RE_TIME.get_or_init(|| Regex::new(r"time[=<]\s*(?P<val>[0-9.]+)\s*ms").unwrap());

    // "3 packets transmitted, 2 received" (Linux) or "2 packets received" (BSD)
    static RE_COUNTS: OnceLock<Regex> = OnceLock::new();
    let re_counts = RE_COUNTS.get_or_init(|| {
        Regex::new(r"(?P<tx>\d+)\s+packets transmitted,\s+(?P<rx>\d+)\s+(?:packets\s+)?received")
            .unwrap()
    });

    static RE_LOSS: OnceLock<Regex> = OnceLock::new();
    let re_loss =
        RE_LOSS.get_or_init(|| Regex::new(r"(?P<loss>[0-9.]+)%\s+packet loss").unwrap());

    let samples: Vec<f64> = re_time
        .captures_iter(output)
        .filter_map(|caps| caps.name("val")?.as_str().parse().ok())
        .collect();

    let counts = re_counts.captures(output).and_then(|caps| {
        let tx = caps.name("tx")?.as_str().parse::<u32>().ok()?;
        let rx = caps.name("rx")?.as_str().parse::<u32>().ok()?;
        Some((tx, rx))
    });

    if matches!(counts, Some((_, 0))) {
        return PingResult::failed();
    }

    let reported_loss = re_loss
        .captures(output)
        .and_then(|caps| caps.name("loss")?.as_str().parse::<f64>().ok());

    let loss = match (reported_loss, counts) {
        (Some(loss), _) => loss,
        (None, Some((tx, rx))) if tx > 0 => 100.0 * (tx.saturating_sub(rx)) as f64 / tx as f64,
        _ => 0.0,
    };

    PingResult::from_samples(&samples, loss)
}
