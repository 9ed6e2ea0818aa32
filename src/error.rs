use thiserror::Error;

/// Errors produced by the scan simulator.
///
/// Only `InvalidInput` ever reaches the caller of `Scanner::start_scan`; the
/// other variants are recovered inside the worker and show up as output lines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("reachability probe timed out after {0} ms")]
    ProbeTimeout(u64),

    #[error("reachability probe failed: {0}")]
    ProbeFailed(String),

    #[error("intelligence unavailable: {0}")]
    IntelligenceUnavailable(String),

    #[error("session {0} was abandoned")]
    SessionAbandoned(String),
}

pub type ScanResult<T> = Result<T, ScanError>;
