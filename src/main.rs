use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

use portsim_rs::config::{IntelligenceConfig, ScannerConfig};
use portsim_rs::intel::StaticIntelligence;
use portsim_rs::types::{ScanEvent, ScanSession};
use portsim_rs::{logging, ports, server, Scanner};

/// portsim-rs — deterministic, cache-consistent port scan simulator with an optional HTTP API.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "portsim-rs",
    version,
    about = "Deterministic, cache-consistent port scan simulator with an optional HTTP API.",
    long_about = None
)]
struct Cli {
    /// Hostname or IPv4 address to simulate scanning.
    #[arg(long)]
    target: Option<String>,

    /// Ports to scan: comma-separated ports and ranges, e.g. `22,80,443,8000-8010`.
    #[arg(long, default_value = "22,80,443")]
    ports: String,

    /// Read ports from a file instead (one port or range per line, `#` comments).
    #[arg(long = "ports-file")]
    ports_file: Option<PathBuf>,

    /// TOML scanner config (delays, probe, intelligence relay).
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON file of intelligence reports keyed by target, used instead of a relay.
    #[arg(long = "intel-file")]
    intel_file: Option<PathBuf>,

    /// Intelligence relay endpoint; the bearer token is read from PORTSIM_INTEL_TOKEN.
    #[arg(long = "intel-endpoint")]
    intel_endpoint: Option<String>,

    /// Probe ports 80/443 with a real HEAD request before falling back to the heuristic.
    #[arg(long, default_value_t = false)]
    probe: bool,

    /// Write the finished session as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Start the HTTP API server.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Address for the HTTP API server.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Debug-level logging for this crate (overridden by RUST_LOG).
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let mut config = match cli.config.as_deref() {
        Some(path) => ScannerConfig::load(path)?,
        None => ScannerConfig::default(),
    };
    if cli.probe {
        config.probe_web_ports = true;
    }
    if let Some(endpoint) = cli.intel_endpoint.clone() {
        config.intelligence = Some(IntelligenceConfig {
            endpoint,
            name: "relay".to_string(),
            token_env: Some("PORTSIM_INTEL_TOKEN".to_string()),
            timeout_ms: 8_000,
        });
    }

    let mut scanner = Scanner::from_config(config.clone())?;
    if let Some(path) = cli.intel_file.as_deref() {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read intelligence file: {}", path.display()))?;
        let source = StaticIntelligence::from_json("intel-file", &json)
            .with_context(|| format!("invalid intelligence file: {}", path.display()))?;
        scanner = scanner.with_intelligence(Arc::new(source));
    }

    let port_list = match cli.ports_file.as_deref() {
        Some(path) => ports::load_ports_from_path(path)?,
        None => ports::parse_ports_str(&cli.ports)?,
    };

    println!("portsim-rs configuration:");
    println!("  target       : {}", cli.target.as_deref().unwrap_or("<none>"));
    println!("  ports        : {}", port_list.len());
    println!("  line delay   : {} ms", config.line_delay_ms);
    println!("  probe        : {}", config.probe_web_ports);
    println!(
        "  intelligence : {}",
        config
            .intelligence
            .as_ref()
            .map(|i| i.endpoint.clone())
            .or_else(|| cli.intel_file.as_ref().map(|p| p.display().to_string()))
            .unwrap_or_else(|| "<none>".to_string())
    );
    println!("  serve_ui     : {}", cli.serve_ui);

    if cli.serve_ui {
        let bind = cli.bind.clone();
        let api_scanner = scanner.clone();
        tokio::spawn(async move {
            if let Err(e) = server::spawn_server(&bind, api_scanner).await {
                warn!(error = %e, "HTTP API server error");
            }
        });
        println!("API server starting at http://{}/api (Ctrl+C to stop)", cli.bind);
    }

    if let Some(target) = cli.target.as_deref() {
        println!();
        if let Some(session) = run_scan(&scanner, target, port_list).await? {
            print_results_table(&session);
            if let Some(path) = cli.output.as_deref() {
                if let Err(e) = write_session_json(path, &session) {
                    eprintln!("Failed to write JSON to {}: {}", path.display(), e);
                } else {
                    println!("Wrote JSON results to {}", path.display());
                }
            }
        }
    }

    if cli.serve_ui {
        println!("Press Ctrl+C to stop the server...");
        let _ = tokio::signal::ctrl_c().await;
    }

    Ok(())
}

/// Stream output lines until the session finishes; Ctrl-C stops the scan.
async fn run_scan(scanner: &Scanner, target: &str, ports: Vec<u16>) -> Result<Option<ScanSession>> {
    let mut handle = scanner.start_scan(target, ports).await?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stopping = false;

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(ScanEvent::Output(line)) => println!("{line}"),
                Some(ScanEvent::Completed(s)) => return Ok(Some(s)),
                Some(ScanEvent::Failed(s)) => {
                    eprintln!("Scan {} stopped before completion", s.id);
                    return Ok(Some(s));
                }
                None => return Ok(None),
            },
            _ = &mut ctrl_c, if !stopping => {
                stopping = true;
                scanner.stop_scan().await;
            }
        }
    }
}

fn print_results_table(session: &ScanSession) {
    let port_w = 5usize;
    let status_w = 8usize;
    let mut service_w = "service".len();
    let mut version_w = "version".len();
    for r in &session.results {
        service_w = service_w.max(r.service.as_deref().map_or(0, str::len));
        version_w = version_w.max(r.version.as_deref().map_or(0, str::len));
    }

    println!(
        "\n{}: {} open of {} ports ({}{})",
        session.target,
        session.open_count(),
        session.results.len(),
        session.status.as_str(),
        if session.from_cache { ", cached" } else { "" }
    );
    println!(
        "{:>port_w$}  {:<status_w$}  {:<service_w$}  {:<version_w$}  banner",
        "port", "status", "service", "version",
    );
    println!(
        "{:-<port_w$}  {:-<status_w$}  {:-<service_w$}  {:-<version_w$}  {:-<6}",
        "", "", "", "", "",
    );
    for r in &session.results {
        let mut bsnip = r.banner.clone().unwrap_or_default();
        if let Some((idx, _)) = bsnip.char_indices().nth(60) {
            bsnip.truncate(idx);
        }
        println!(
            "{:>port_w$}  {:<status_w$}  {:<service_w$}  {:<version_w$}  {}",
            r.port,
            r.status.as_str(),
            r.service.as_deref().unwrap_or(""),
            r.version.as_deref().unwrap_or(""),
            bsnip,
        );
    }
}

fn write_session_json(path: &std::path::Path, session: &ScanSession) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, session)?;
    Ok(())
}
