use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Scanner tuning, loadable from TOML. Missing keys fall back to defaults.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Pause between per-port lines on a live scan.
    pub line_delay_ms: u64,
    /// Pause between per-port lines when replaying cached results.
    pub replay_delay_ms: u64,
    /// Try a real HEAD request on ports 80/443 before the heuristic.
    pub probe_web_ports: bool,
    pub probe_timeout_ms: u64,
    pub intelligence: Option<IntelligenceConfig>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct IntelligenceConfig {
    pub endpoint: String,
    #[serde(default = "default_source_name")]
    pub name: String,
    /// Environment variable holding the bearer token, if the relay needs one.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_intel_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_source_name() -> String {
    "relay".to_string()
}

fn default_intel_timeout_ms() -> u64 {
    8_000
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            line_delay_ms: 200,
            replay_delay_ms: 300,
            probe_web_ports: false,
            probe_timeout_ms: 4_000,
            intelligence: None,
        }
    }
}

impl ScannerConfig {
    /// No artificial pauses and no network probes.
    pub fn instant() -> Self {
        Self {
            line_delay_ms: 0,
            replay_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("invalid scanner config")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
        Self::from_toml_str(&content)
    }

    pub fn line_delay(&self) -> Duration {
        Duration::from_millis(self.line_delay_ms)
    }

    pub fn replay_delay(&self) -> Duration {
        Duration::from_millis(self.replay_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl IntelligenceConfig {
    pub fn token(&self) -> Option<String> {
        self.token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
