use crate::types::PortResult;

/// `[+] Port 22    | OPEN     | ssh (OpenSSH 8.2p1)`
pub fn format_port_line(result: &PortResult) -> String {
    let marker = if result.is_open() { '+' } else { '-' };
    let status = result.status.as_str().to_uppercase();
    let mut line = format!("[{marker}] Port {:<5} | {:<8}", result.port, status);
    if let Some(service) = &result.service {
        line.push_str(" | ");
        line.push_str(service);
    }
    if let Some(version) = &result.version {
        line.push_str(&format!(" ({version})"));
    }
    line
}

pub fn starting_line(target: &str) -> String {
    format!("[*] Starting port scan on {target}")
}

pub fn port_count_line(count: usize, source: Option<&str>) -> String {
    match source {
        Some(name) => format!("[*] Scanning {count} ports with {name} intelligence"),
        None => format!("[*] Scanning {count} ports with deterministic heuristics only"),
    }
}

pub fn replay_line(target: &str) -> String {
    format!("[*] Replaying cached results for {target}")
}

pub fn querying_line(source: &str, target: &str) -> String {
    format!("[*] Querying {source} for intelligence on {target}")
}

pub fn intelligence_ok_line(source: &str, known_open: usize) -> String {
    format!("[+] {source} data retrieved: {known_open} known open ports")
}

pub fn intelligence_failed_line(source: &str, reason: &str) -> String {
    format!("[!] {source} lookup failed: {reason}")
}

pub fn summary_line(open: usize) -> String {
    format!("[+] Scan completed: {open} open ports found")
}

pub fn vulnerabilities_line(source: &str, count: usize) -> String {
    format!("[!] {source} reported {count} known vulnerabilities")
}
