//! Scan orchestration: one active session per `Scanner`, ports processed in
//! ascending order, output streamed to the caller over a channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};
use tokio::sync::{mpsc, RwLock};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::config::ScannerConfig;
use crate::derive::{derive_port_result, open_result, DerivationContext};
use crate::error::{ScanError, ScanResult};
use crate::intel::{HttpIntelligence, IntelligenceSource};
use crate::output;
use crate::probe::{HttpProber, Prober};
use crate::types::{
    IntelligenceReport, PortResult, ScanEvent, ScanRequest, ScanSession, SessionStatus,
};

static LAST_SESSION_MS: AtomicU64 = AtomicU64::new(0);

/// The caller's end of a running scan.
///
/// Yields every output line in order, then exactly one `Completed` or
/// `Failed` event, then `None`.
#[derive(Debug)]
pub struct ScanHandle {
    pub id: String,
    events: mpsc::UnboundedReceiver<ScanEvent>,
}

impl ScanHandle {
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }

    /// Drain the stream and return the final session snapshot.
    pub async fn wait(mut self) -> Option<ScanSession> {
        while let Some(event) = self.events.recv().await {
            match event {
                ScanEvent::Completed(session) | ScanEvent::Failed(session) => return Some(session),
                ScanEvent::Output(_) => {}
            }
        }
        None
    }

    pub fn into_events(self) -> mpsc::UnboundedReceiver<ScanEvent> {
        self.events
    }
}

#[derive(Debug)]
struct ActiveScan {
    session: ScanSession,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct ScannerState {
    active: Option<ActiveScan>,
    /// Last session that completed; cleared by a stop.
    completed: Option<ScanSession>,
    history: Vec<ScanSession>,
}

impl ScannerState {
    /// Finalise the active session as failed and move it into history.
    fn abandon_active(&mut self) -> Option<ScanSession> {
        let mut active = self.active.take()?;
        self.completed = None;
        active.cancel.cancel();
        active.session.finish(SessionStatus::Failed, now_rfc3339());
        warn!(
            session = %active.session.id,
            error = %ScanError::SessionAbandoned(active.session.id.clone()),
            "scan stopped before completion"
        );
        self.history.push(active.session.clone());
        Some(active.session)
    }

    fn active_mut(&mut self, id: &str) -> ScanResult<&mut ScanSession> {
        match self.active.as_mut() {
            Some(a) if a.session.id == id && !a.cancel.is_cancelled() => Ok(&mut a.session),
            _ => Err(ScanError::SessionAbandoned(id.to_string())),
        }
    }
}

/// Deterministic scan simulator.
///
/// Cheap to clone; clones share the result cache, history and active session.
#[derive(Clone)]
pub struct Scanner {
    config: Arc<ScannerConfig>,
    cache: ResultCache,
    intelligence: Option<Arc<dyn IntelligenceSource>>,
    prober: Option<Arc<dyn Prober>>,
    state: Arc<RwLock<ScannerState>>,
}

impl Scanner {
    /// A scanner with no intelligence source and no reachability probe.
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config: Arc::new(config),
            cache: ResultCache::new(),
            intelligence: None,
            prober: None,
            state: Arc::new(RwLock::new(ScannerState::default())),
        }
    }

    /// Build the HTTP intelligence client and web prober the config asks for.
    pub fn from_config(config: ScannerConfig) -> ScanResult<Self> {
        let intelligence = match &config.intelligence {
            Some(intel) => Some(Arc::new(HttpIntelligence::new(
                intel.name.clone(),
                intel.endpoint.clone(),
                intel.token(),
                intel.timeout(),
            )?) as Arc<dyn IntelligenceSource>),
            None => None,
        };
        let prober = if config.probe_web_ports {
            Some(Arc::new(HttpProber::new(config.probe_timeout())?) as Arc<dyn Prober>)
        } else {
            None
        };

        let mut scanner = Self::new(config);
        scanner.intelligence = intelligence;
        scanner.prober = prober;
        Ok(scanner)
    }

    pub fn with_intelligence(mut self, source: Arc<dyn IntelligenceSource>) -> Self {
        self.intelligence = Some(source);
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Validate the request and start a new session, abandoning any running one.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start_scan(
        &self,
        target: &str,
        ports: impl IntoIterator<Item = u16>,
    ) -> ScanResult<ScanHandle> {
        let request = ScanRequest::new(target, ports)?;
        let id = next_session_id();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut state = self.state.write().await;
            state.abandon_active();
            state.active = Some(ActiveScan {
                session: ScanSession::start(id.clone(), &request, now_rfc3339()),
                cancel: cancel.clone(),
            });
        }
        info!(session = %id, target = request.target(), ports = request.ports().len(), "scan started");

        let worker = Worker {
            scanner: self.clone(),
            id: id.clone(),
            cancel,
            tx,
        };
        tokio::spawn(worker.run(request));

        Ok(ScanHandle { id, events: rx })
    }

    /// Stop the active session, if any, returning its final (failed) snapshot.
    pub async fn stop_scan(&self) -> Option<ScanSession> {
        self.state.write().await.abandon_active()
    }

    /// The running session, or the last completed one when idle.
    ///
    /// `None` before any run and after `stop_scan`.
    pub async fn current_scan(&self) -> Option<ScanSession> {
        let state = self.state.read().await;
        state
            .active
            .as_ref()
            .map(|a| a.session.clone())
            .or_else(|| state.completed.clone())
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.active.is_some()
    }

    /// Finished sessions in the order they finished.
    pub async fn scan_history(&self) -> Vec<ScanSession> {
        self.state.read().await.history.clone()
    }
}

/// Drives a single session. Every mutation re-checks that the session is
/// still the active one, so a stopped worker cannot touch shared state.
struct Worker {
    scanner: Scanner,
    id: String,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<ScanEvent>,
}

impl Worker {
    async fn run(self, request: ScanRequest) {
        match self.drive(&request).await {
            Ok(()) => self.complete().await,
            Err(e) => {
                debug!(session = %self.id, error = %e, "worker exiting early");
                self.report_failed().await;
            }
        }
    }

    async fn drive(&self, request: &ScanRequest) -> ScanResult<()> {
        let target = request.target();
        let ports = request.ports();
        let source = self.scanner.intelligence.as_ref().map(|s| s.name().to_string());

        self.emit(output::starting_line(target)).await?;
        self.emit(output::port_count_line(ports.len(), source.as_deref()))
            .await?;

        let key = ResultCache::key(target, ports);
        let report = match self.scanner.cache.get(&key) {
            Some(cached) => {
                debug!(session = %self.id, key = %key, "cache hit");
                self.update(|s| s.from_cache = true).await?;
                self.emit(output::replay_line(target)).await?;
                for result in cached.iter() {
                    self.pause(self.scanner.config.replay_delay()).await?;
                    self.record(result.clone()).await?;
                }
                None
            }
            None => {
                let report = self.query_intelligence(target).await?;
                let mut ctx = DerivationContext::new(target);
                if let (Some(name), Some(report)) = (source.as_deref(), report.as_ref()) {
                    ctx = ctx.with_intelligence(name, report);
                }

                let mut results = Vec::with_capacity(ports.len());
                for &port in ports {
                    self.pause(self.scanner.config.line_delay()).await?;
                    let result = self.resolve(&ctx, port).await?;
                    self.record(result.clone()).await?;
                    results.push(result);
                }

                self.ensure_active().await?;
                self.scanner.cache.insert(key, results);
                report
            }
        };

        let open = self.update(|s| s.open_count()).await?;
        self.emit(output::summary_line(open)).await?;
        if let (Some(name), Some(report)) = (source.as_deref(), report.as_ref()) {
            if !report.vulns.is_empty() {
                self.emit(output::vulnerabilities_line(name, report.vulns.len()))
                    .await?;
            }
        }
        Ok(())
    }

    /// One lookup per live scan; failures only produce a warning line.
    async fn query_intelligence(&self, target: &str) -> ScanResult<Option<IntelligenceReport>> {
        let Some(source) = self.scanner.intelligence.clone() else {
            return Ok(None);
        };
        let name = source.name().to_string();
        self.emit(output::querying_line(&name, target)).await?;

        let lookup = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ScanError::SessionAbandoned(self.id.clone())),
            res = source.lookup(target) => res,
        };

        match lookup {
            Ok(report) => {
                info!(session = %self.id, source = %name, known_open = report.open_ports.len(), "intelligence retrieved");
                self.emit(output::intelligence_ok_line(&name, report.open_ports.len()))
                    .await?;
                let stored = report.clone();
                self.update(move |s| s.intelligence_data = Some(stored))
                    .await?;
                Ok(Some(report))
            }
            Err(e) => {
                warn!(session = %self.id, source = %name, error = %e, "continuing without intelligence");
                let reason = match &e {
                    ScanError::IntelligenceUnavailable(reason) => reason.clone(),
                    other => other.to_string(),
                };
                self.emit(output::intelligence_failed_line(&name, &reason))
                    .await?;
                Ok(None)
            }
        }
    }

    /// Intelligence first, then the optional web probe, then the heuristic.
    async fn resolve(&self, ctx: &DerivationContext<'_>, port: u16) -> ScanResult<PortResult> {
        let prober = self
            .scanner
            .prober
            .as_ref()
            .filter(|p| p.applies_to(port) && !ctx.intelligence_confirms(port));

        if let Some(prober) = prober {
            let probed = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ScanError::SessionAbandoned(self.id.clone())),
                res = prober.probe(ctx.target, port) => res,
            };
            match probed {
                Ok(outcome) => {
                    return Ok(open_result(ctx.target_hash, port).with_banner(outcome.banner));
                }
                Err(e) => debug!(port, error = %e, "probe fell back to heuristic"),
            }
        }

        Ok(derive_port_result(ctx, port))
    }

    async fn pause(&self, delay: Duration) -> ScanResult<()> {
        if !delay.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = time::sleep(delay) => {}
            }
        }
        if self.cancel.is_cancelled() {
            return Err(ScanError::SessionAbandoned(self.id.clone()));
        }
        Ok(())
    }

    async fn update<T>(&self, f: impl FnOnce(&mut ScanSession) -> T) -> ScanResult<T> {
        let mut state = self.scanner.state.write().await;
        Ok(f(state.active_mut(&self.id)?))
    }

    async fn ensure_active(&self) -> ScanResult<()> {
        self.update(|_| ()).await
    }

    async fn emit(&self, line: String) -> ScanResult<()> {
        let mut state = self.scanner.state.write().await;
        let session = state.active_mut(&self.id)?;
        session.raw_output.push(line.clone());
        let _ = self.tx.send(ScanEvent::Output(line));
        Ok(())
    }

    async fn record(&self, result: PortResult) -> ScanResult<()> {
        debug!(session = %self.id, port = result.port, status = %result.status, "port resolved");
        let line = output::format_port_line(&result);
        let mut state = self.scanner.state.write().await;
        let session = state.active_mut(&self.id)?;
        session.results.push(result);
        session.raw_output.push(line.clone());
        let _ = self.tx.send(ScanEvent::Output(line));
        Ok(())
    }

    async fn complete(&self) {
        let mut state = self.scanner.state.write().await;
        match state.active.take() {
            Some(mut active) if active.session.id == self.id && !active.cancel.is_cancelled() => {
                active.session.finish(SessionStatus::Completed, now_rfc3339());
                info!(
                    session = %self.id,
                    open = active.session.open_count(),
                    from_cache = active.session.from_cache,
                    "scan completed"
                );
                state.history.push(active.session.clone());
                state.completed = Some(active.session.clone());
                let _ = self.tx.send(ScanEvent::Completed(active.session));
            }
            other => {
                state.active = other;
                drop(state);
                self.report_failed().await;
            }
        }
    }

    async fn report_failed(&self) {
        let state = self.scanner.state.read().await;
        if let Some(session) = state.history.iter().rev().find(|s| s.id == self.id) {
            let _ = self.tx.send(ScanEvent::Failed(session.clone()));
        }
    }
}

/// `scan_<unix millis>`, strictly increasing within the process.
fn next_session_id() -> String {
    let now = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64;
    let prev = LAST_SESSION_MS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    format!("scan_{}", now.max(prev + 1))
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
