//! Discovery beacons: ONVIF WS-Discovery and TP-Link/Tapo UDP probes
//!
//! Beacons are best-effort hint gatherers. A beacon that cannot bind or
//! send simply contributes no hints; only cancellation aborts a sweep.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::probes::{udp_probe, with_cancel};
use super::subnet::{is_routable_host, Subnet};
use crate::error::Result;

/// ONVIF WS-Discovery multicast endpoint
const ONVIF_MULTICAST: &str = "239.255.255.250:3702";
/// ONVIF response collection window
const ONVIF_WINDOW: Duration = Duration::from_millis(1800);

/// Tapo discovery port (plain JSON)
pub const TAPO_PORT: u16 = 20002;
/// TP-Link legacy discovery port (obfuscated JSON)
pub const TPLINK_LEGACY_PORT: u16 = 9999;
/// Broadcast response collection window
const TAPO_BROADCAST_WINDOW: Duration = Duration::from_millis(2200);
/// Per-host unicast receive window
const TAPO_UNICAST_WINDOW: Duration = Duration::from_millis(260);

/// Discovery payloads understood by different Tapo/TP-Link firmware lines
pub const TAPO_PAYLOADS: [&str; 3] = [
    r#"{"system":{"get_sysinfo":{}}}"#,
    r#"{"method":"getDeviceInfo","params":null}"#,
    r#"{"method":"multipleRequest","params":{"requests":[{"method":"getDeviceInfo","params":null}]}}"#,
];

/// TP-Link legacy stream cipher: each byte is XORed with the previous
/// ciphertext byte, starting from 0xAB.
pub fn obfuscate(data: &[u8]) -> Vec<u8> {
    let mut key = 0xABu8;
    data.iter()
        .map(|b| {
            key ^= b;
            key
        })
        .collect()
}

/// Inverse of [`obfuscate`]: the previous ciphertext byte is the next key.
pub fn deobfuscate(data: &[u8]) -> Vec<u8> {
    let mut key = 0xABu8;
    data.iter()
        .map(|c| {
            let b = c ^ key;
            key = *c;
            b
        })
        .collect()
}

/// WS-Discovery Probe envelope with a fresh MessageID
fn ws_discovery_probe() -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<e:Envelope xmlns:e="http://www.w3.org/2003/05/soap-envelope" "#,
            r#"xmlns:w="http://schemas.xmlsoap.org/ws/2004/08/addressing" "#,
            r#"xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery" "#,
            r#"xmlns:dn="http://www.onvif.org/ver10/network/wsdl">"#,
            r#"<e:Header>"#,
            r#"<w:MessageID>uuid:{}</w:MessageID>"#,
            r#"<w:To e:mustUnderstand="true">urn:schemas-xmlsoap-org:ws:2005:04:discovery</w:To>"#,
            r#"<w:Action e:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</w:Action>"#,
            r#"</e:Header>"#,
            r#"<e:Body><d:Probe><d:Types>dn:NetworkVideoTransmitter</d:Types></d:Probe></e:Body>"#,
            r#"</e:Envelope>"#,
        ),
        Uuid::new_v4()
    )
}

fn ipv4_literal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").expect("static regex"))
}

/// Add a datagram's evidence to the hint set: the sender address when it is
/// routable, plus every IPv4 literal in the payload text (unconditionally,
/// even off-subnet ones).
pub(crate) fn collect_hints(sender: IpAddr, payload: &[u8], hints: &mut BTreeSet<Ipv4Addr>) {
    if let IpAddr::V4(v4) = sender {
        if is_routable_host(v4) {
            hints.insert(v4);
        }
    }
    let text = String::from_utf8_lossy(payload);
    for m in ipv4_literal_regex().find_iter(&text) {
        if let Ok(ip) = m.as_str().parse::<Ipv4Addr>() {
            hints.insert(ip);
        }
    }
}

/// ONVIF WS-Discovery sweep: one probe per subnet from its local address,
/// then collect responders for the full window.
pub async fn onvif_sweep(
    subnets: &[Subnet],
    cancel: &CancellationToken,
) -> Result<BTreeSet<Ipv4Addr>> {
    let mut hints = BTreeSet::new();
    for subnet in subnets {
        let local = subnet.local_address;
        with_cancel(cancel, async {
            sweep_one_onvif(local, &mut hints).await;
        })
        .await?;
    }
    Ok(hints)
}

async fn sweep_one_onvif(local: Ipv4Addr, hints: &mut BTreeSet<Ipv4Addr>) {
    let socket = match UdpSocket::bind(SocketAddr::new(IpAddr::V4(local), 0)).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(local = %local, error = %e, "ONVIF beacon bind failed");
            return;
        }
    };
    let probe = ws_discovery_probe();
    if let Err(e) = socket.send_to(probe.as_bytes(), ONVIF_MULTICAST).await {
        tracing::debug!(local = %local, error = %e, "ONVIF probe send failed");
        return;
    }
    drain_responses(&socket, ONVIF_WINDOW, hints).await;
}

/// Tapo/TP-Link broadcast sweep: from each subnet's local address, fire all
/// payloads at the global and directed broadcast on both discovery ports,
/// then collect responders.
pub async fn tapo_broadcast_sweep(
    subnets: &[Subnet],
    cancel: &CancellationToken,
) -> Result<BTreeSet<Ipv4Addr>> {
    let mut hints = BTreeSet::new();
    for subnet in subnets {
        with_cancel(cancel, async {
            sweep_one_tapo(subnet, &mut hints).await;
        })
        .await?;
    }
    Ok(hints)
}

async fn sweep_one_tapo(subnet: &Subnet, hints: &mut BTreeSet<Ipv4Addr>) {
    let local = subnet.local_address;
    let socket = match UdpSocket::bind(SocketAddr::new(IpAddr::V4(local), 0)).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(local = %local, error = %e, "Tapo beacon bind failed");
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        tracing::warn!(local = %local, error = %e, "Tapo beacon broadcast flag failed");
        return;
    }

    let broadcasts = [Ipv4Addr::BROADCAST, subnet.broadcast()];
    for payload in TAPO_PAYLOADS {
        let obfuscated = obfuscate(payload.as_bytes());
        for dest in broadcasts {
            let plain_target = SocketAddr::new(IpAddr::V4(dest), TAPO_PORT);
            let legacy_target = SocketAddr::new(IpAddr::V4(dest), TPLINK_LEGACY_PORT);
            let _ = socket.send_to(payload.as_bytes(), plain_target).await;
            let _ = socket.send_to(&obfuscated, legacy_target).await;
        }
    }

    drain_responses(&socket, TAPO_BROADCAST_WINDOW, hints).await;
}

/// Per-host Tapo probe: plain JSON to 20002 and the obfuscated form to the
/// legacy port, per payload, short-circuiting on the first response whose
/// source is the probed address.
pub async fn tapo_unicast_probe(ip: Ipv4Addr, cancel: &CancellationToken) -> Result<bool> {
    for payload in TAPO_PAYLOADS {
        let plain_target = SocketAddr::new(IpAddr::V4(ip), TAPO_PORT);
        if responds_from(ip, plain_target, payload.as_bytes(), cancel).await? {
            return Ok(true);
        }
        let legacy_target = SocketAddr::new(IpAddr::V4(ip), TPLINK_LEGACY_PORT);
        let obfuscated = obfuscate(payload.as_bytes());
        if responds_from(ip, legacy_target, &obfuscated, cancel).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn responds_from(
    ip: Ipv4Addr,
    target: SocketAddr,
    payload: &[u8],
    cancel: &CancellationToken,
) -> Result<bool> {
    match udp_probe(target, payload, TAPO_UNICAST_WINDOW, cancel).await? {
        Some((from, _)) => Ok(from.ip() == IpAddr::V4(ip)),
        None => Ok(false),
    }
}

async fn drain_responses(socket: &UdpSocket, window: Duration, hints: &mut BTreeSet<Ipv4Addr>) {
    let deadline = Instant::now() + window;
    let mut buf = [0u8; 2048];
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match timeout(deadline - now, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => collect_hints(from.ip(), &buf[..len], hints),
            Ok(Err(_)) | Err(_) => break,
        }
    }
}
