//! Candidate classification
//!
//! Pure weighted scoring over the evidence a sweep gathered for one host.
//! Each contribution appends a justification clause in a fixed order so the
//! reason string reads the same for the same evidence.

use super::arp::is_tplink_oui;
use super::types::{CandidateEvaluation, HostProbeResult};

const RTSP_PORTS: [u16; 2] = [554, 8554];
const ONVIF_PORT: u16 = 2020;
const CONTROL_PORTS: [u16; 2] = [20002, 9999];
const WEB_PORTS: [u16; 4] = [80, 443, 8080, 8443];

const BRAND_MARKERS: [&str; 3] = ["tapo", "tp-link", "tplink"];
const REPEATER_MARKERS: [&str; 3] = ["tplinkrepeater", "mwlogin", "repeater"];

const NO_MARKERS_REASON: &str = "No Tapo-specific markers were found.";

/// Classify one responsive host from its probe record plus enrichment data.
pub fn evaluate(
    probe: &HostProbeResult,
    hostname: Option<&str>,
    mac: Option<&str>,
) -> CandidateEvaluation {
    let open = |port: u16| probe.open_ports.contains(&port);
    let rtsp = RTSP_PORTS.iter().any(|p| open(*p));
    let onvif_port = open(ONVIF_PORT);
    let control = CONTROL_PORTS.iter().any(|p| open(*p));
    let web = WEB_PORTS.iter().any(|p| open(*p));

    let fingerprint = probe
        .http_fingerprint
        .as_deref()
        .map(str::to_lowercase)
        .unwrap_or_default();
    let fp_tapo = fingerprint.contains("tapo");
    let fp_brand = BRAND_MARKERS.iter().any(|m| fingerprint.contains(m));
    let fp_repeater = REPEATER_MARKERS.iter().any(|m| fingerprint.contains(m));

    let hostname_lower = hostname.map(str::to_lowercase).unwrap_or_default();
    let host_brand = BRAND_MARKERS.iter().any(|m| hostname_lower.contains(m));

    let oui_tplink = mac.map(is_tplink_oui).unwrap_or(false);

    fn add(score: &mut f64, clauses: &mut Vec<String>, delta: f64, clause: String) {
        *score += delta;
        clauses.push(clause);
    }

    let mut score = 0.0f64;
    let mut clauses: Vec<String> = Vec::new();

    if rtsp {
        add(&mut score, &mut clauses, 2.0, "RTSP service port is open".into());
    }
    if onvif_port {
        add(&mut score, &mut clauses, 1.5, "ONVIF port 2020 is open".into());
    }
    if probe.seen_via_onvif {
        add(
            &mut score,
            &mut clauses,
            2.0,
            "Responded to ONVIF WS-Discovery probe".into(),
        );
    }
    if probe.seen_via_tapo_broadcast {
        add(
            &mut score,
            &mut clauses,
            2.0,
            "Responded to TP-Link/Tapo local discovery probe".into(),
        );
    }
    if probe.seen_via_tapo_unicast {
        add(
            &mut score,
            &mut clauses,
            2.5,
            "Responded to direct TP-Link/Tapo UDP probe".into(),
        );
    }
    if control {
        add(
            &mut score,
            &mut clauses,
            1.0,
            "TP-Link/Tapo control port is open (20002/9999)".into(),
        );
    }
    if web {
        add(&mut score, &mut clauses, 0.5, "Web management port is open".into());
    }
    if fp_brand && !fp_repeater {
        add(
            &mut score,
            &mut clauses,
            3.0,
            "HTTP endpoint reports Tapo/TP-Link markers".into(),
        );
    }
    if fp_repeater {
        add(
            &mut score,
            &mut clauses,
            -3.0,
            "HTTP endpoint looks like TP-Link repeater/router UI".into(),
        );
    }
    if host_brand {
        add(
            &mut score,
            &mut clauses,
            2.0,
            format!("Hostname \"{}\" matches a TP-Link device", hostname.unwrap_or_default()),
        );
    }
    if oui_tplink {
        add(&mut score, &mut clauses, 1.0, "MAC OUI is assigned to TP-Link".into());
    }

    let tplink_signal = oui_tplink || host_brand || fp_brand;
    let camera_service = rtsp
        || onvif_port
        || control
        || probe.seen_via_onvif
        || probe.seen_via_tapo_broadcast
        || probe.seen_via_tapo_unicast;

    let mut is_likely = fp_tapo
        || host_brand
        || (camera_service && tplink_signal)
        || (rtsp && onvif_port)
        || (probe.seen_via_onvif && rtsp)
        || (probe.seen_via_tapo_broadcast && (rtsp || onvif_port || web))
        || (probe.seen_via_tapo_unicast && (rtsp || onvif_port || web || tplink_signal))
        || (control && tplink_signal && !fp_repeater)
        || (rtsp && web && score >= 2.5);

    // Negative override: repeater UI with no camera-grade evidence at all
    if fp_repeater
        && !(rtsp || onvif_port || probe.seen_via_onvif || probe.seen_via_tapo_unicast)
    {
        is_likely = false;
    }

    let reason = if clauses.is_empty() {
        NO_MARKERS_REASON.to_string()
    } else {
        clauses.join("; ")
    };

    CandidateEvaluation {
        is_likely,
        score: (score * 100.0).round() / 100.0,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn probe(ip: &str) -> HostProbeResult {
        HostProbeResult {
            ip: ip.parse::<Ipv4Addr>().unwrap(),
            open_ports: vec![],
            http_fingerprint: None,
            seen_via_onvif: false,
            seen_via_tapo_broadcast: false,
            seen_via_tapo_unicast: false,
        }
    }

    #[test]
    fn rtsp_and_onvif_port_with_tplink_oui_is_likely() {
        let mut p = probe("192.168.1.9");
        p.open_ports = vec![554, 2020];

        let eval = evaluate(&p, None, Some("AC:84:C6:11:22:33"));
        assert!(eval.is_likely);
        assert_eq!(eval.score, 4.5);
        assert!(eval.reason.contains("RTSP service port is open"));
        assert!(eval.reason.contains("ONVIF port 2020 is open"));
        assert!(eval.reason.contains("MAC OUI is assigned to TP-Link"));
    }

    #[test]
    fn repeater_ui_overrides_tplink_signals() {
        let mut p = probe("192.168.1.11");
        p.open_ports = vec![80, 443];
        p.http_fingerprint = Some("TPLinkRepeater/MWLOGIN".to_string());

        let eval = evaluate(&p, None, Some("14:CC:20:AA:BB:CC"));
        assert!(!eval.is_likely);
        assert_eq!(eval.score, -1.5);
        assert!(eval.reason.contains("repeater/router UI"));
    }

    #[test]
    fn unicast_hit_with_tplink_oui_is_likely() {
        let mut p = probe("10.0.0.5");
        p.seen_via_tapo_unicast = true;

        let eval = evaluate(&p, None, Some("D8:5D:4C:00:11:22"));
        assert!(eval.is_likely);
        assert_eq!(eval.score, 3.5);

        // Without the OUI there is no corroborating signal
        let bare = evaluate(&p, None, None);
        assert!(!bare.is_likely);
        assert_eq!(bare.score, 2.5);
    }

    #[test]
    fn no_evidence_gets_fallback_reason() {
        let eval = evaluate(&probe("192.168.1.77"), None, None);
        assert!(!eval.is_likely);
        assert_eq!(eval.score, 0.0);
        assert_eq!(eval.reason, NO_MARKERS_REASON);
    }

    #[test]
    fn tapo_fingerprint_alone_is_a_strong_brand_signal() {
        let mut p = probe("192.168.1.30");
        p.open_ports = vec![443];
        p.http_fingerprint = Some("Tapo C210 web service".to_string());

        let eval = evaluate(&p, None, None);
        assert!(eval.is_likely);
        assert_eq!(eval.score, 3.5); // web 0.5 + brand markers 3.0
    }

    #[test]
    fn repeater_with_rtsp_evidence_keeps_camera_verdict() {
        let mut p = probe("192.168.1.31");
        p.open_ports = vec![80, 554];
        p.http_fingerprint = Some("tplinkrepeater".to_string());

        let eval = evaluate(&p, None, Some("AC:84:C6:00:00:01"));
        // camera service + TP-Link signal; the override needs RTSP absent
        assert!(eval.is_likely);
        assert_eq!(eval.score, 0.5); // rtsp 2.0 + web 0.5 - repeater 3.0 + oui 1.0
    }

    #[test]
    fn hostname_clause_quotes_the_name() {
        let mut p = probe("192.168.1.12");
        p.open_ports = vec![554];

        let eval = evaluate(&p, Some("Tapo-C200.lan"), None);
        assert!(eval.is_likely);
        assert_eq!(eval.score, 4.0);
        assert!(eval.reason.contains("\"Tapo-C200.lan\""));
    }

    #[test]
    fn scores_round_to_two_decimals() {
        let mut p = probe("192.168.1.13");
        p.open_ports = vec![80];
        let eval = evaluate(&p, None, None);
        assert_eq!((eval.score * 100.0).round(), eval.score * 100.0);
    }
}
