//! ARP table resolver and TP-Link OUI lookup
//!
//! Reads the OS neighbor table by spawning `arp -a` with captured stdout
//! (no shell). Hosts where the tool is missing, needs elevation, or prints
//! an unexpected layout degrade to an empty map; the scan still completes.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::OnceLock;

use regex::Regex;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::probes::with_cancel;
use crate::error::Result;

/// OUI prefixes (first 24 bits, uppercase hex) assigned to TP-Link
pub const TPLINK_OUIS: [&str; 27] = [
    "0846EA", "14CC20", "1C61B4", "246F28", "2C3AF2", "30B5C2", "488F5A", "50C7BF", "60E327",
    "74DA38", "84D81B", "8C3BA5", "98DA60", "A0F3C1", "AC84C6", "B0487A", "B09575", "C04A00",
    "C05627", "C46E1F", "D067E5", "D85D4C", "DC9FDB", "E894F6", "EC086B", "F4F26D", "FCECDA",
];

fn arp_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?P<ip>\d{1,3}(?:\.\d{1,3}){3})\s+(?P<mac>[0-9a-fA-F\-:]{17})\s+\w+")
            .expect("static regex")
    })
}

/// Read the neighbor table: `ip -> normalized MAC`.
///
/// Every failure mode except cancellation yields an empty map.
pub async fn read_arp_table(cancel: &CancellationToken) -> Result<HashMap<Ipv4Addr, String>> {
    let output = with_cancel(cancel, async {
        Command::new("arp")
            .arg("-a")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
    })
    .await?;

    let output = match output {
        Ok(o) => o,
        Err(e) => {
            tracing::warn!(error = %e, "arp spawn failed, neighbor table unavailable");
            return Ok(HashMap::new());
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_arp_output(&stdout))
}

fn parse_arp_output(stdout: &str) -> HashMap<Ipv4Addr, String> {
    let mut table = HashMap::new();
    for line in stdout.lines() {
        let Some(caps) = arp_line_regex().captures(line) else {
            continue;
        };
        let Ok(ip) = caps["ip"].parse::<Ipv4Addr>() else {
            continue;
        };
        if let Some(mac) = normalize_mac(&caps["mac"]) {
            table.insert(ip, mac);
        }
    }
    table
}

/// Normalize a 17-character `:`/`-` separated MAC to uppercase colon form.
pub fn normalize_mac(raw: &str) -> Option<String> {
    if raw.len() != 17 {
        return None;
    }
    let mut pairs = Vec::with_capacity(6);
    for group in raw.split(|c| c == ':' || c == '-') {
        if group.len() != 2 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        pairs.push(group.to_ascii_uppercase());
    }
    if pairs.len() != 6 {
        return None;
    }
    Some(pairs.join(":"))
}

/// True when the MAC's first three octets match a known TP-Link OUI.
pub fn is_tplink_oui(mac: &str) -> bool {
    let digits: String = mac
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(6)
        .collect::<String>()
        .to_ascii_uppercase();
    digits.len() == 6 && TPLINK_OUIS.contains(&digits.as_str())
}
