//! Deterministic per-port result derivation.
//!
//! Every simulated finding is seeded only by a rolling hash of the target, so
//! re-scanning the same target and ports reproduces the same results.

use tracing::warn;

use crate::error::{ScanError, ScanResult};
use crate::ports::{is_common_port, service_name, version_candidates};
use crate::types::{IntelligenceReport, PortResult, PortStatus};

/// Rolling 31-multiplier hash over the UTF-16 code units of `target`,
/// wrapped to a signed 32-bit value and returned as its absolute value.
pub fn target_hash(target: &str) -> u32 {
    target
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
        .unsigned_abs()
}

pub fn port_hash(target_hash: u32, port: u16) -> u32 {
    ((target_hash as u64 + port as u64) % 1000) as u32
}

/// Percentage chance (out of 100) that the heuristic reports `port` open.
pub fn open_threshold(port: u16) -> u32 {
    match port {
        80 | 443 => 70,
        22 => 60,
        p if is_common_port(p) => 40,
        _ => 15,
    }
}

pub fn is_open_by_heuristic(target_hash: u32, port: u16) -> bool {
    port_hash(target_hash, port) % 100 < open_threshold(port)
}

/// Version picked from the per-port candidate list; never re-rolled for the same target.
pub fn deterministic_version(target_hash: u32, port: u16) -> Option<String> {
    let candidates = version_candidates(port);
    if candidates.is_empty() {
        return None;
    }
    let idx = ((target_hash as u64 + port as u64) % candidates.len() as u64) as usize;
    Some(candidates[idx].to_string())
}

/// Everything the derivation of a single port depends on.
#[derive(Debug, Clone, Copy)]
pub struct DerivationContext<'a> {
    pub target: &'a str,
    pub target_hash: u32,
    pub intelligence: Option<&'a IntelligenceReport>,
    pub source: &'a str,
}

impl<'a> DerivationContext<'a> {
    pub fn new(target: &'a str) -> Self {
        Self {
            target,
            target_hash: target_hash(target),
            intelligence: None,
            source: "",
        }
    }

    pub fn with_intelligence(mut self, source: &'a str, report: &'a IntelligenceReport) -> Self {
        self.source = source;
        self.intelligence = Some(report);
        self
    }

    /// True when the intelligence report lists `port` as open for this target.
    pub fn intelligence_confirms(&self, port: u16) -> bool {
        self.intelligence
            .is_some_and(|report| report.open_ports.contains(&port))
    }
}

/// Derive the result for `port`. Internal failures degrade to `filtered`.
pub fn derive_port_result(ctx: &DerivationContext<'_>, port: u16) -> PortResult {
    match try_derive(ctx, port) {
        Ok(result) => result,
        Err(e) => {
            warn!(target = ctx.target, port, error = %e, "derivation failed; marking filtered");
            PortResult::filtered(port)
        }
    }
}

fn try_derive(ctx: &DerivationContext<'_>, port: u16) -> ScanResult<PortResult> {
    if port == 0 {
        return Err(ScanError::InvalidInput("port 0 has no derivation".into()));
    }

    if let Some(report) = ctx.intelligence.filter(|_| ctx.intelligence_confirms(port)) {
        return Ok(confirmed_by_intelligence(ctx, report, port));
    }

    if is_open_by_heuristic(ctx.target_hash, port) {
        Ok(open_result(ctx.target_hash, port))
    } else {
        Ok(PortResult::closed(port))
    }
}

/// An open result with service and deterministic version filled in.
pub fn open_result(target_hash: u32, port: u16) -> PortResult {
    PortResult {
        port,
        status: PortStatus::Open,
        service: Some(service_name(port).to_string()),
        version: deterministic_version(target_hash, port),
        banner: None,
        vulnerabilities: None,
    }
}

fn confirmed_by_intelligence(
    ctx: &DerivationContext<'_>,
    report: &IntelligenceReport,
    port: u16,
) -> PortResult {
    let hint = report.service_hint(port);
    let mut result = open_result(ctx.target_hash, port)
        .with_banner(format!("Confirmed by {} intelligence", ctx.source));
    if let Some(version) = hint.and_then(|h| h.version.clone()) {
        result.version = Some(version);
    }
    result.vulnerabilities = hint.filter(|h| !h.vulns.is_empty()).map(|h| h.vulns.clone());
    result
}
