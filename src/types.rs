use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// Longest banner kept on a port result.
pub const MAX_BANNER_CHARS: usize = 200;

static HOSTNAME_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_](?:[A-Za-z0-9_-]{0,61}[A-Za-z0-9_])?$")
        .expect("hostname label regex is valid")
});

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PortStatus {
    Open,
    Closed,
    Filtered,
}

impl PortStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortStatus::Open => "open",
            PortStatus::Closed => "closed",
            PortStatus::Filtered => "filtered",
        }
    }
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Simulated outcome for one TCP port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortResult {
    pub port: u16,
    pub status: PortStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vulnerabilities: Option<Vec<String>>,
}

impl PortResult {
    pub fn closed(port: u16) -> Self {
        Self {
            port,
            status: PortStatus::Closed,
            service: None,
            version: None,
            banner: None,
            vulnerabilities: None,
        }
    }

    pub fn filtered(port: u16) -> Self {
        Self {
            port,
            status: PortStatus::Filtered,
            service: Some("unknown".to_string()),
            version: None,
            banner: None,
            vulnerabilities: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PortStatus::Open
    }

    /// Set the banner, truncated to `MAX_BANNER_CHARS` characters.
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(truncate_banner(banner.into()));
        self
    }
}

pub(crate) fn truncate_banner(banner: String) -> String {
    match banner.char_indices().nth(MAX_BANNER_CHARS) {
        Some((idx, _)) => banner[..idx].to_string(),
        None => banner,
    }
}

/// A validated scan request: trimmed target and a sorted, deduplicated port set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    target: String,
    ports: Vec<u16>,
}

impl ScanRequest {
    pub fn new(target: &str, ports: impl IntoIterator<Item = u16>) -> ScanResult<Self> {
        let target = target.trim();
        validate_target(target)?;

        let set: BTreeSet<u16> = ports.into_iter().collect();
        if set.is_empty() {
            return Err(ScanError::InvalidInput("port set is empty".into()));
        }
        if set.contains(&0) {
            return Err(ScanError::InvalidInput("port 0 is not scannable".into()));
        }

        Ok(Self {
            target: target.to_string(),
            ports: set.into_iter().collect(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Ports in ascending order.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }
}

fn validate_target(target: &str) -> ScanResult<()> {
    if target.is_empty() {
        return Err(ScanError::InvalidInput("target is empty".into()));
    }
    if target.chars().any(char::is_whitespace) {
        return Err(ScanError::InvalidInput(format!(
            "target contains whitespace: {target:?}"
        )));
    }
    if target.parse::<Ipv4Addr>().is_ok() {
        return Ok(());
    }

    let host = target.strip_suffix('.').unwrap_or(target);
    let looks_numeric = host.chars().all(|c| c.is_ascii_digit() || c == '.');
    if host.len() > 253
        || looks_numeric
        || !host.split('.').all(|label| HOSTNAME_LABEL.is_match(label))
    {
        return Err(ScanError::InvalidInput(format!(
            "target is neither a hostname nor an IPv4 address: {target}"
        )));
    }
    Ok(())
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

/// One run of the simulator from start to completion or failure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanSession {
    pub id: String,
    pub target: String,
    pub requested_ports: Vec<u16>,
    pub status: SessionStatus,
    pub start_time: String,
    pub end_time: Option<String>,
    pub results: Vec<PortResult>,
    pub raw_output: Vec<String>,
    pub intelligence_data: Option<IntelligenceReport>,
    pub from_cache: bool,
}

impl ScanSession {
    pub(crate) fn start(id: String, request: &ScanRequest, start_time: String) -> Self {
        Self {
            id,
            target: request.target().to_string(),
            requested_ports: request.ports().to_vec(),
            status: SessionStatus::Running,
            start_time,
            end_time: None,
            results: Vec::new(),
            raw_output: Vec::new(),
            intelligence_data: None,
            from_cache: false,
        }
    }

    /// Move a running session into a terminal state. Terminal sessions never change.
    pub(crate) fn finish(&mut self, status: SessionStatus, end_time: String) -> bool {
        if self.status.is_finished() || !status.is_finished() {
            return false;
        }
        self.status = status;
        self.end_time = Some(end_time);
        true
    }

    pub fn open_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_open()).count()
    }
}

/// Notifications delivered to the consumer of a `ScanHandle`.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Output(String),
    Completed(ScanSession),
    Failed(ScanSession),
}

/// Per-service hint reported by an intelligence source.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceHint {
    pub port: u16,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default)]
    pub vulns: Vec<String>,
}

/// Host intelligence returned by a lookup.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct IntelligenceReport {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub open_ports: BTreeSet<u16>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub vulns: Vec<String>,
    #[serde(default)]
    pub services: Vec<ServiceHint>,
    #[serde(default)]
    pub last_update: Option<String>,
}

impl IntelligenceReport {
    pub fn service_hint(&self, port: u16) -> Option<&ServiceHint> {
        self.services.iter().find(|s| s.port == port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_sorts_and_dedups_ports() {
        let req = ScanRequest::new("  example.com ", [443, 22, 80, 22]).unwrap();
        assert_eq!(req.target(), "example.com");
        assert_eq!(req.ports(), &[22, 80, 443]);
    }

    #[test]
    fn request_rejects_bad_targets() {
        for t in ["", "   ", "exa mple.com", "-bad.com", "999.1.1.1", "a..b"] {
            assert!(
                matches!(ScanRequest::new(t, [80]), Err(ScanError::InvalidInput(_))),
                "{t:?} should be rejected"
            );
        }
    }

    #[test]
    fn request_accepts_hosts_and_ipv4() {
        for t in ["localhost", "scanme.nmap.org", "10.0.0.1", "my-host.internal.", "my_host.lan"] {
            assert!(ScanRequest::new(t, [80]).is_ok(), "{t:?} should be accepted");
        }
    }

    #[test]
    fn request_rejects_port_zero() {
        assert!(ScanRequest::new("example.com", [0, 80]).is_err());
    }

    #[test]
    fn banner_is_truncated_on_char_boundary() {
        let long = "é".repeat(250);
        let r = PortResult::closed(80).with_banner(long);
        assert_eq!(r.banner.unwrap().chars().count(), MAX_BANNER_CHARS);
    }

    #[test]
    fn finished_session_is_frozen() {
        let req = ScanRequest::new("example.com", [80]).unwrap();
        let mut s = ScanSession::start("scan_1".into(), &req, "t0".into());
        assert!(s.finish(SessionStatus::Completed, "t1".into()));
        assert!(!s.finish(SessionStatus::Failed, "t2".into()));
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.end_time.as_deref(), Some("t1"));
    }
}
