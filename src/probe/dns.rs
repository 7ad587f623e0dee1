//! Name resolution probe: reverse DNS plus a hosts-table lookup.
//!
//! The two strategies run independently; either producing a name counts as
//! success.

use std::net::IpAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use super::ProbeError;
use crate::db::DnsResult;

/// Resolve a hostname for `ip`.
pub async fn run_dns_probe(ip: &str, hosts_file: &Path, timeout: Duration) -> DnsResult {
    let start = Instant::now();

    let reverse_dns = match reverse_lookup(ip, timeout).await {
        Ok(name) => Some(name),
        Err(e) => {
            tracing::debug!("Reverse DNS for {} failed: {}", ip, e);
            None
        }
    };

    let host_entry = match lookup_hosts_file(hosts_file, ip).await {
        Ok(name) => name,
        Err(e) => {
            tracing::debug!("Hosts lookup for {} failed: {}", ip, e);
            None
        }
    };

    let resolved_hostname = reverse_dns.clone().or(host_entry);

    DnsResult {
        success: resolved_hostname.is_some(),
        resolved_hostname,
        reverse_dns,
        resolution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    }
}

/// PTR lookup through the system resolver, bounded by `timeout`.
async fn reverse_lookup(ip: &str, timeout: Duration) -> Result<String, ProbeError> {
    let addr: IpAddr = ip
        .parse()
        .map_err(|_| ProbeError::Network(format!("not an IP address: {}", ip)))?;

    let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&addr));
    let name = tokio::time::timeout(timeout, lookup)
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(format!("lookup task failed: {}", e)))?
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    // Some resolvers echo the numeric address back instead of failing
    if name.is_empty() || name == ip {
        return Err(ProbeError::Network(format!("no PTR record for {}", ip)));
    }
    Ok(name)
}

async fn lookup_hosts_file(path: &Path, ip: &str) -> Result<Option<String>, ProbeError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to read {}: {}", path.display(), e)))?;
    Ok(parse_hosts_table(&content, ip))
}

/// First hostname mapped to `ip` in hosts(5) format.
pub fn parse_hosts_table(content: &str, ip: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        if fields.next()? != ip {
            return None;
        }
        fields.next().map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOSTS: &str = "\
127.0.0.1   localhost
# 192.168.1.20 commented.lan
192.168.1.10    nas.lan nas   # storage
192.168.1.11
::1 ip6-localhost ip6-loopback
";

    #[test]
    fn test_parse_hosts_table() {
        assert_eq!(parse_hosts_table(HOSTS, "192.168.1.10"), Some("nas.lan".to_string()));
        assert_eq!(parse_hosts_table(HOSTS, "::1"), Some("ip6-localhost".to_string()));
        assert_eq!(parse_hosts_table(HOSTS, "192.168.1.20"), None);
        assert_eq!(parse_hosts_table(HOSTS, "192.168.1.11"), None);
        assert_eq!(parse_hosts_table(HOSTS, "10.9.9.9"), None);
    }

    #[tokio::test]
    async fn test_hosts_table_alone_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = dir.path().join("hosts");
        // TEST-NET-3 has no PTR records
        std::fs::write(&hosts, "203.0.113.7 printer.lan\n").unwrap();

        let result = run_dns_probe("203.0.113.7", &hosts, Duration::from_secs(2)).await;
        assert!(result.success);
        assert_eq!(result.resolved_hostname.as_deref(), Some("printer.lan"));
    }

    #[tokio::test]
    async fn test_invalid_address_is_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_dns_probe("not-an-ip", &dir.path().join("missing"), Duration::from_millis(100)).await;
        assert!(!result.success);
        assert!(result.resolved_hostname.is_none());
        assert!(result.reverse_dns.is_none());
    }
}
