use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::SERVER;
use tokio::time;
use tracing::debug;

use crate::error::{ScanError, ScanResult};

/// Banner used when a web port answers but its `Server` header is unreadable.
pub const GENERIC_BANNER: &str = "HTTP service detected";

/// Outcome of a successful reachability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub banner: String,
}

/// Best-effort reachability check for web ports.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Ports this prober is willing to look at.
    fn applies_to(&self, port: u16) -> bool {
        port == 80 || port == 443
    }

    async fn probe(&self, target: &str, port: u16) -> ScanResult<ProbeOutcome>;
}

/// Sends a `HEAD` request to `http://target:80` or `https://target:443`, bounded by a timeout.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> ScanResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("portsim-rs/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| ScanError::ProbeFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &str, port: u16) -> ScanResult<ProbeOutcome> {
        let scheme = if port == 443 { "https" } else { "http" };
        let url = format!("{scheme}://{target}:{port}");
        let timeout_ms = self.timeout.as_millis() as u64;

        let resp = match time::timeout(self.timeout, self.client.head(&url).send()).await {
            Err(_) => return Err(ScanError::ProbeTimeout(timeout_ms)),
            Ok(Err(e)) if e.is_timeout() => return Err(ScanError::ProbeTimeout(timeout_ms)),
            Ok(Err(e)) => return Err(ScanError::ProbeFailed(e.to_string())),
            Ok(Ok(resp)) => resp,
        };

        let banner = resp
            .headers()
            .get(SERVER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| GENERIC_BANNER.to_string());
        debug!(target, port, status = %resp.status(), banner = %banner, "probe answered");
        Ok(ProbeOutcome { banner })
    }
}
