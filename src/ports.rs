use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Ports that get the elevated "common service" open tier.
pub const COMMON_PORTS: &[u16] = &[22, 25, 53, 80, 110, 143, 443, 993, 995];

/// Parse a port list into deduplicated TCP ports (1..=65535), keeping first-seen order.
///
/// Entries are separated by newlines or commas:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` on a line is ignored
/// - whitespace and blank entries are ignored
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");

        for item in line.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if let Some((a, b)) = item.split_once('-') {
                let start = parse_port_str(a.trim())
                    .with_context(|| format!("line {line_no}: invalid start in range: {a}"))?;
                let end = parse_port_str(b.trim())
                    .with_context(|| format!("line {line_no}: invalid end in range: {b}"))?;
                if start > end {
                    bail!("line {line_no}: invalid range {start}-{end} (start > end)");
                }
                out.extend((start..=end).filter(|p| seen.insert(*p)));
                continue;
            }

            let p = parse_port_str(item)
                .with_context(|| format!("line {line_no}: invalid port value: {item}"))?;
            if seen.insert(p) {
                out.push(p);
            }
        }
    }

    Ok(out)
}

/// Load a ports list from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

/// The port picker offered when a request names no ports.
pub fn default_ports() -> Vec<u16> {
    vec![21, 22, 23, 25, 53, 80, 443, 3306, 3389, 5432]
}

pub fn is_common_port(port: u16) -> bool {
    COMMON_PORTS.contains(&port)
}

/// Static port to service-name table; unknown ports map to `"unknown"`.
pub fn service_name(port: u16) -> &'static str {
    match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "dns",
        80 => "http",
        110 => "pop3",
        143 => "imap",
        443 => "https",
        993 => "imaps",
        995 => "pop3s",
        3306 => "mysql",
        3389 => "rdp",
        5432 => "postgresql",
        6379 => "redis",
        8080 => "http-proxy",
        27017 => "mongodb",
        _ => "unknown",
    }
}

/// Plausible version strings per port. Empty for ports with no known candidates.
pub fn version_candidates(port: u16) -> &'static [&'static str] {
    match port {
        21 => &["vsftpd 3.0.3", "ProFTPD 1.3.6", "Pure-FTPd 1.0.49"],
        22 => &["OpenSSH 7.4", "OpenSSH 8.2p1", "OpenSSH 8.9p1", "OpenSSH 9.3"],
        25 => &["Postfix smtpd", "Exim 4.94", "Sendmail 8.15.2"],
        53 => &["BIND 9.16.1", "dnsmasq 2.85", "Unbound 1.13.1"],
        80 | 8080 => &["Apache/2.4.41", "nginx/1.18.0", "nginx/1.24.0", "Microsoft-IIS/10.0"],
        110 | 995 => &["Dovecot pop3d", "Courier pop3d"],
        143 | 993 => &["Dovecot imapd", "Courier imapd"],
        443 => &["nginx/1.18.0", "Apache/2.4.57", "cloudflare"],
        3306 => &["MySQL 5.7.33", "MySQL 8.0.28", "MariaDB 10.6.12"],
        3389 => &["Microsoft Terminal Services"],
        5432 => &["PostgreSQL 12.9", "PostgreSQL 14.5", "PostgreSQL 15.2"],
        6379 => &["Redis 6.0.16", "Redis 7.0.11"],
        27017 => &["MongoDB 4.4.6", "MongoDB 6.0.5"],
        _ => &[],
    }
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
