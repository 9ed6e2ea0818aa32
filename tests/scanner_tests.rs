use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use portsim_rs::config::ScannerConfig;
use portsim_rs::intel::{IntelligenceSource, StaticIntelligence};
use portsim_rs::probe::{ProbeOutcome, Prober};
use portsim_rs::types::{IntelligenceReport, PortStatus, ScanEvent, SessionStatus};
use portsim_rs::{ScanError, ScanResult, Scanner};

struct CountingIntel {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingIntel {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail,
        })
    }
}

#[async_trait]
impl IntelligenceSource for CountingIntel {
    fn name(&self) -> &str {
        "counting"
    }

    async fn lookup(&self, _target: &str) -> ScanResult<IntelligenceReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ScanError::IntelligenceUnavailable("network unreachable".into()));
        }
        Ok(IntelligenceReport {
            open_ports: [22].into_iter().collect(),
            vulns: vec!["CVE-2023-38408".into(), "CVE-2024-6387".into()],
            ..Default::default()
        })
    }
}

struct FixedProber(ScanResult<ProbeOutcome>);

#[async_trait]
impl Prober for FixedProber {
    async fn probe(&self, _target: &str, _port: u16) -> ScanResult<ProbeOutcome> {
        self.0.clone()
    }
}

fn instant() -> Scanner {
    Scanner::new(ScannerConfig::instant())
}

fn port_lines(lines: &[String]) -> Vec<u16> {
    lines
        .iter()
        .filter(|l| l.starts_with("[+] Port") || l.starts_with("[-] Port"))
        .map(|l| l[9..14].trim().parse().unwrap())
        .collect()
}

#[tokio::test]
async fn example_scenario_completes_in_port_order() {
    let scanner = instant();
    let session = scanner
        .start_scan("example.com", [443, 22, 80])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.end_time.is_some());
    let ports: Vec<u16> = session.results.iter().map(|r| r.port).collect();
    assert_eq!(ports, vec![22, 80, 443]);
    assert_eq!(port_lines(&session.raw_output), vec![22, 80, 443]);
    assert_eq!(session.open_count(), 2);
    assert_eq!(
        session.raw_output.last().map(String::as_str),
        Some("[+] Scan completed: 2 open ports found")
    );
    assert_eq!(scanner.scan_history().await, vec![session]);
}

#[tokio::test]
async fn events_end_with_completion_after_all_lines() {
    let scanner = instant();
    let mut rx = scanner
        .start_scan("scanme.nmap.org", [8080, 21, 3306, 25])
        .await
        .unwrap()
        .into_events();

    let mut lines = Vec::new();
    let mut terminal = None;
    while let Some(event) = rx.recv().await {
        match event {
            ScanEvent::Output(line) => {
                assert!(terminal.is_none(), "output after completion");
                lines.push(line);
            }
            other => terminal = Some(other),
        }
    }

    let Some(ScanEvent::Completed(session)) = terminal else {
        panic!("expected completion event");
    };
    assert_eq!(session.raw_output, lines);
    assert_eq!(port_lines(&lines), vec![21, 25, 3306, 8080]);
}

#[tokio::test]
async fn second_scan_replays_from_cache() {
    let intel = CountingIntel::new(false);
    let scanner = instant().with_intelligence(intel.clone());

    let first = scanner
        .start_scan("example.com", [22, 80, 443])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    let second = scanner
        .start_scan("example.com", [443, 80, 22])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.results, second.results);
    assert_eq!(intel.calls.load(Ordering::SeqCst), 1);
    assert!(second
        .raw_output
        .iter()
        .any(|l| l == "[*] Replaying cached results for example.com"));
    assert_eq!(scanner.cache().len(), 1);
    assert_eq!(scanner.scan_history().await.len(), 2);
}

#[tokio::test]
async fn fresh_instances_agree_without_sharing_cache() {
    let a = instant()
        .start_scan("10.0.0.1", [21, 22, 80, 443, 5432])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    let b = instant()
        .start_scan("10.0.0.1", [21, 22, 80, 443, 5432])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(a.results, b.results);
    assert!(!b.from_cache);
}

#[tokio::test]
async fn intelligence_confirms_port_and_reports_vulns() {
    let intel = CountingIntel::new(false);
    let scanner = instant().with_intelligence(intel);

    // Heuristic alone closes 22 for example.com (port hash 81 >= 60).
    let session = scanner
        .start_scan("example.com", [22])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let r = &session.results[0];
    assert_eq!(r.status, PortStatus::Open);
    assert_eq!(r.banner.as_deref(), Some("Confirmed by counting intelligence"));
    assert!(session.intelligence_data.is_some());
    assert!(session
        .raw_output
        .contains(&"[+] counting data retrieved: 1 known open ports".to_string()));
    assert_eq!(
        session.raw_output.last().map(String::as_str),
        Some("[!] counting reported 2 known vulnerabilities")
    );
}

#[tokio::test]
async fn failed_lookup_degrades_gracefully() {
    let intel = CountingIntel::new(true);
    let scanner = instant().with_intelligence(intel.clone());

    let session = scanner
        .start_scan("example.com", [22, 80, 443, 8080])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.results.len(), 4);
    assert!(session.intelligence_data.is_none());
    assert!(session
        .raw_output
        .contains(&"[!] counting lookup failed: network unreachable".to_string()));
    assert_eq!(intel.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_target_in_static_source_is_not_fatal() {
    let scanner = instant().with_intelligence(Arc::new(StaticIntelligence::new("fixture")));
    let session = scanner
        .start_scan("example.com", [80])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn successful_probe_forces_open_with_banner() {
    let prober = FixedProber(Ok(ProbeOutcome {
        banner: "nginx".into(),
    }));
    let scanner = instant().with_prober(Arc::new(prober));

    // 22 is closed for example.com and is never probed.
    let session = scanner
        .start_scan("example.com", [22, 80])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(session.results[0].status, PortStatus::Closed);
    assert_eq!(session.results[1].status, PortStatus::Open);
    assert_eq!(session.results[1].banner.as_deref(), Some("nginx"));
}

#[tokio::test]
async fn probe_timeout_falls_back_to_heuristic() {
    let prober = FixedProber(Err(ScanError::ProbeTimeout(4_000)));
    let probed = instant()
        .with_prober(Arc::new(prober))
        .start_scan("a", [80, 443])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    let plain = instant()
        .start_scan("a", [80, 443])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(probed.results, plain.results);
}

#[tokio::test]
async fn invalid_requests_create_no_session() {
    let scanner = instant();
    assert!(matches!(
        scanner.start_scan("example.com", Vec::<u16>::new()).await,
        Err(ScanError::InvalidInput(_))
    ));
    assert!(matches!(
        scanner.start_scan("", [80]).await,
        Err(ScanError::InvalidInput(_))
    ));
    assert!(scanner.current_scan().await.is_none());
    assert!(scanner.scan_history().await.is_empty());
}

#[tokio::test]
async fn stop_scan_fails_session_and_skips_cache() {
    let config = ScannerConfig {
        line_delay_ms: 60_000,
        ..ScannerConfig::instant()
    };
    let scanner = Scanner::new(config);
    let handle = scanner.start_scan("example.com", [22, 80, 443]).await.unwrap();
    assert!(scanner.is_running().await);

    let stopped = scanner.stop_scan().await.expect("active session");
    assert_eq!(stopped.status, SessionStatus::Failed);
    assert!(stopped.end_time.is_some());
    assert!(!scanner.is_running().await);
    assert!(scanner.current_scan().await.is_none());

    let reported = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("worker exits promptly")
        .unwrap();
    assert_eq!(reported.status, SessionStatus::Failed);
    assert_eq!(reported.id, stopped.id);
    assert!(scanner.cache().is_empty());
    assert_eq!(scanner.scan_history().await.len(), 1);
    assert!(scanner.stop_scan().await.is_none());
}

#[tokio::test]
async fn new_scan_abandons_running_one() {
    let config = ScannerConfig {
        line_delay_ms: 60_000,
        ..ScannerConfig::instant()
    };
    let scanner = Scanner::new(config);
    let first = scanner.start_scan("example.com", [22]).await.unwrap();
    let second = scanner.start_scan("example.com", [80]).await.unwrap();
    assert_ne!(first.id, second.id);

    let abandoned = tokio::time::timeout(Duration::from_secs(5), first.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(abandoned.status, SessionStatus::Failed);

    let current = scanner.current_scan().await.unwrap();
    assert_eq!(current.id, second.id);
    assert_eq!(current.status, SessionStatus::Running);
    scanner.stop_scan().await;
}

#[tokio::test]
async fn completed_scan_stays_current_until_a_stop() {
    let scanner = instant();
    let finished = scanner
        .start_scan("example.com", [80])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(scanner.current_scan().await, Some(finished));
    assert!(scanner.stop_scan().await.is_none());
    assert!(scanner.current_scan().await.is_some());

    // The worker has not been polled yet on the current-thread runtime.
    scanner.start_scan("example.com", [443]).await.unwrap();
    assert!(scanner.stop_scan().await.is_some());
    assert!(scanner.current_scan().await.is_none());
}
