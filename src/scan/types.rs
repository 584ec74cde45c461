//! Scan result and diagnostics records

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// TCP ports every host is probed on, ascending.
pub const PROBE_PORTS: [u16; 9] = [80, 443, 554, 2020, 8080, 8443, 8554, 9999, 20002];

/// Scan parameters
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Upper bound on concurrent per-host probes, >= 1
    pub max_parallelism: usize,
    /// Cooperative cancellation; trip it to abort the sweep
    pub cancel: CancellationToken,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_parallelism: 64,
            cancel: CancellationToken::new(),
        }
    }
}

/// Everything one sweep learned about a single responsive address.
///
/// Hosts that produced no evidence of any kind get no record at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProbeResult {
    pub ip: Ipv4Addr,
    /// Open TCP ports, strictly ascending, subset of [`PROBE_PORTS`]
    pub open_ports: Vec<u16>,
    /// Concatenated HTTP banner fragments, if any web port answered
    pub http_fingerprint: Option<String>,
    pub seen_via_onvif: bool,
    pub seen_via_tapo_broadcast: bool,
    pub seen_via_tapo_unicast: bool,
}

impl HostProbeResult {
    /// True when the record carries any evidence worth keeping
    pub fn has_evidence(&self, ping_ok: bool) -> bool {
        ping_ok
            || !self.open_ports.is_empty()
            || self.seen_via_onvif
            || self.seen_via_tapo_broadcast
            || self.seen_via_tapo_unicast
    }
}

/// Classifier verdict for one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEvaluation {
    pub is_likely: bool,
    /// Algebraic evidence score, rounded to 2 decimals
    pub score: f64,
    /// "; "-joined justification clauses, never empty
    pub reason: String,
}

/// A host classified as a likely Tapo camera
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub ip: Ipv4Addr,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub open_ports: Vec<u16>,
    pub confidence: f64,
    pub reason: String,
}

/// Per-candidate diagnostics row, emitted for every responsive host
/// regardless of verdict.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateDiagnostics {
    pub ip: Ipv4Addr,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub open_ports: Vec<u16>,
    pub seen_via_onvif: bool,
    pub seen_via_tapo_broadcast: bool,
    pub seen_via_tapo_unicast: bool,
    pub http_fingerprint: Option<String>,
    pub is_likely: bool,
    pub confidence: f64,
    pub reason: String,
}

/// Sweep-level diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ScanDiagnostics {
    /// Scanned subnets, formatted, ordered by (network, prefix)
    pub subnets_scanned: Vec<String>,
    pub enumerated_host_count: usize,
    pub arp_seed_count: usize,
    pub onvif_hint_count: usize,
    pub tapo_broadcast_hint_count: usize,
    pub tapo_unicast_hint_count: usize,
    pub responsive_host_count: usize,
    /// Ordered by (is_likely desc, confidence desc, ip asc)
    pub candidates: Vec<CandidateDiagnostics>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScanDiagnostics {
    /// Apply the candidate ordering contract.
    pub fn sort_candidates(&mut self) {
        self.candidates.sort_by(|a, b| {
            b.is_likely
                .cmp(&a.is_likely)
                .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.ip.cmp(&b.ip))
        });
    }
}

/// Facade return record: detections plus the diagnostics behind them
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    /// Likely Tapo cameras, ordered by ip
    pub detections: Vec<Detection>,
    pub diagnostics: ScanDiagnostics,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ip: &str, likely: bool, confidence: f64) -> CandidateDiagnostics {
        CandidateDiagnostics {
            ip: ip.parse().unwrap(),
            hostname: None,
            mac: None,
            open_ports: vec![],
            seen_via_onvif: false,
            seen_via_tapo_broadcast: false,
            seen_via_tapo_unicast: false,
            http_fingerprint: None,
            is_likely: likely,
            confidence,
            reason: String::new(),
        }
    }

    #[test]
    fn candidate_ordering() {
        let mut diag = ScanDiagnostics {
            subnets_scanned: vec![],
            enumerated_host_count: 0,
            arp_seed_count: 0,
            onvif_hint_count: 0,
            tapo_broadcast_hint_count: 0,
            tapo_unicast_hint_count: 0,
            responsive_host_count: 4,
            candidates: vec![
                row("192.168.1.40", false, 9.0),
                row("192.168.1.20", true, 3.5),
                row("192.168.1.30", true, 4.5),
                row("192.168.1.10", true, 4.5),
            ],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        diag.sort_candidates();

        let ips: Vec<String> = diag.candidates.iter().map(|c| c.ip.to_string()).collect();
        // likely first, then confidence descending, then ip ascending
        assert_eq!(
            ips,
            vec!["192.168.1.10", "192.168.1.30", "192.168.1.20", "192.168.1.40"]
        );
    }

    #[test]
    fn probe_ports_are_sorted_unique() {
        let mut sorted = PROBE_PORTS.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted, PROBE_PORTS.to_vec());
    }
}
