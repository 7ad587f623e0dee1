//! TCP port reachability probe.

use std::future::Future;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::net::TcpStream;

use crate::db::PortCheckResult;

/// Well-known services; also the candidate list for a common-port scan.
pub const WELL_KNOWN_PORTS: &[(u16, &str)] = &[
    (21, "ftp"),
    (22, "ssh"),
    (23, "telnet"),
    (25, "smtp"),
    (53, "dns"),
    (80, "http"),
    (110, "pop3"),
    (139, "netbios"),
    (143, "imap"),
    (443, "https"),
    (445, "smb"),
    (3306, "mysql"),
    (3389, "rdp"),
    (5432, "postgresql"),
    (5900, "vnc"),
    (8080, "http-alt"),
    (8443, "https-alt"),
];

pub fn service_name(port: u16) -> Option<&'static str> {
    WELL_KNOWN_PORTS
        .iter()
        .find(|(p, _)| *p == port)
        .map(|(_, name)| *name)
}

/// Attempt a TCP connection. Refusal, timeout and OS errors all read as closed.
pub async fn run_port_probe(ip: &str, port: u16, timeout: Duration) -> PortCheckResult {
    let start = Instant::now();
    let connect = TcpStream::connect((ip, port));

    let open = match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            tracing::trace!("Port {}:{} closed: {}", ip, port, e);
            false
        }
        Err(_) => false,
    };

    PortCheckResult {
        port,
        open,
        service: service_name(port).map(str::to_string),
        response_time_ms: open.then(|| start.elapsed().as_secs_f64() * 1000.0),
    }
}

/// Run port checks concurrently and keep the open ones, in input order.
pub async fn collect_open_ports<I>(checks: I) -> Vec<PortCheckResult>
where
    I: IntoIterator,
    I::Item: Future<Output = PortCheckResult>,
{
    join_all(checks)
        .await
        .into_iter()
        .filter(|r| r.open)
        .collect()
}
