//! Best-effort host intelligence lookups.
//!
//! A lookup happens at most once per live scan. Any failure is reported as
//! `ScanError::IntelligenceUnavailable` and the scan carries on without it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ScanError, ScanResult};
use crate::types::{truncate_banner, IntelligenceReport};

#[async_trait]
pub trait IntelligenceSource: Send + Sync {
    /// Human-readable source name used in output lines and banners.
    fn name(&self) -> &str;

    async fn lookup(&self, target: &str) -> ScanResult<IntelligenceReport>;
}

/// Fixed, in-memory reports keyed by target.
#[derive(Debug, Clone, Default)]
pub struct StaticIntelligence {
    name: String,
    reports: HashMap<String, IntelligenceReport>,
}

impl StaticIntelligence {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reports: HashMap::new(),
        }
    }

    pub fn with_report(mut self, target: impl Into<String>, report: IntelligenceReport) -> Self {
        self.reports.insert(target.into(), normalize(report));
        self
    }

    /// Load `{ "<target>": { ...report... } }` from JSON.
    pub fn from_json(name: impl Into<String>, json: &str) -> serde_json::Result<Self> {
        let reports: HashMap<String, IntelligenceReport> = serde_json::from_str(json)?;
        Ok(Self {
            name: name.into(),
            reports: reports
                .into_iter()
                .map(|(target, report)| (target, normalize(report)))
                .collect(),
        })
    }
}

#[async_trait]
impl IntelligenceSource for StaticIntelligence {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, target: &str) -> ScanResult<IntelligenceReport> {
        self.reports.get(target).cloned().ok_or_else(|| {
            ScanError::IntelligenceUnavailable(format!("no data available for {target}"))
        })
    }
}

#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    target: &'a str,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(flatten)]
    report: IntelligenceReport,
}

/// Client for a hosted lookup function: `POST { target }` returning an
/// `IntelligenceReport`-shaped body, or `{ error }` when it cannot answer.
#[derive(Debug, Clone)]
pub struct HttpIntelligence {
    name: String,
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpIntelligence {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> ScanResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("portsim-rs/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ScanError::IntelligenceUnavailable(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            token,
            client,
        })
    }
}

#[async_trait]
impl IntelligenceSource for HttpIntelligence {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, target: &str) -> ScanResult<IntelligenceReport> {
        info!(target, endpoint = %self.endpoint, "querying intelligence relay");

        let mut req = self.client.post(&self.endpoint).json(&LookupRequest { target });
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| {
            warn!(target, error = %e, "intelligence request failed");
            ScanError::IntelligenceUnavailable(e.to_string())
        })?;

        let status = resp.status();
        let body: LookupResponse = resp.json().await.map_err(|e| {
            ScanError::IntelligenceUnavailable(format!("unreadable response ({status}): {e}"))
        })?;

        if let Some(err) = body.error {
            return Err(ScanError::IntelligenceUnavailable(err));
        }
        if !status.is_success() {
            return Err(ScanError::IntelligenceUnavailable(format!(
                "relay returned {status}"
            )));
        }
        interpret(body.report, body.message)
    }
}

fn interpret(report: IntelligenceReport, message: Option<String>) -> ScanResult<IntelligenceReport> {
    if is_empty(&report) {
        debug!(?message, "relay answered without data");
        return Err(ScanError::IntelligenceUnavailable(
            message.unwrap_or_else(|| "no data available for this target".into()),
        ));
    }
    Ok(normalize(report))
}

fn is_empty(report: &IntelligenceReport) -> bool {
    report.ip.is_none()
        && report.open_ports.is_empty()
        && report.services.is_empty()
        && report.vulns.is_empty()
}

/// Fold service ports into the open-port set and cap banner length.
fn normalize(mut report: IntelligenceReport) -> IntelligenceReport {
    for service in &mut report.services {
        report.open_ports.insert(service.port);
        service.banner = service.banner.take().map(truncate_banner);
    }
    report
}
