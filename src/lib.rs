//! Library crate for portsim-rs: a deterministic, cache-consistent port scan simulator.
pub mod cache;
pub mod config;
pub mod derive;
pub mod error;
pub mod intel;
pub mod logging;
pub mod output;
pub mod ports;
pub mod probe;
pub mod scanner;
pub mod server;
pub mod types;

pub use error::{ScanError, ScanResult};
pub use scanner::{ScanHandle, Scanner};
