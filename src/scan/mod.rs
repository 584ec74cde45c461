//! Tapo camera discovery engine
//!
//! One sweep runs in phases: subnet enumeration, host expansion, ARP cache
//! priming, discovery beacons plus the first ARP read, a bounded per-host
//! probe fan-out, an ARP re-read, and finally a strictly ordered
//! classification pass. Every phase observes the cancellation token; all
//! other network failures degrade evidence instead of failing the sweep.

mod arp;
mod beacons;
mod classify;
mod hosts;
mod interfaces;
mod probes;
mod subnet;
mod types;

pub use beacons::{deobfuscate, obfuscate, TAPO_PAYLOADS};
pub use classify::evaluate;
pub use subnet::Subnet;
pub use types::{
    CandidateDiagnostics, CandidateEvaluation, Detection, HostProbeResult, ScanDiagnostics,
    ScanOptions, ScanReport, PROBE_PORTS,
};

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use trust_dns_resolver::TokioAsyncResolver;

use crate::error::{Error, Result};
use probes::with_cancel;

/// At most this many hosts get an ARP-priming ping
const ARP_PRIME_LIMIT: usize = 2048;
/// ARP priming fan-out
const ARP_PRIME_FANOUT: usize = 192;
/// Reverse DNS budget per host
const DNS_TIMEOUT: Duration = Duration::from_millis(700);

/// Web ports in HTTP fingerprint priority order, with their TLS flag
const FINGERPRINT_PORTS: [(u16, bool); 4] = [(80, false), (8080, false), (443, true), (8443, true)];

/// Run one discovery sweep and return detections plus diagnostics.
///
/// Fails with [`Error::InvalidArgument`] for `max_parallelism < 1` before
/// any I/O, and with [`Error::Cancelled`] when the token trips mid-scan; a
/// cancelled sweep returns no partial results.
pub async fn scan(options: ScanOptions) -> Result<ScanReport> {
    if options.max_parallelism < 1 {
        return Err(Error::InvalidArgument(format!(
            "max_parallelism must be >= 1, got {}",
            options.max_parallelism
        )));
    }
    let cancel = options.cancel.clone();
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let started_at = Utc::now();

    // Phase 1: subnets and host expansion
    let subnets = interfaces::enumerate_subnets(&cancel).await?;
    let hosts = hosts::enumerate_hosts(&subnets);
    tracing::info!(
        subnets = subnets.len(),
        hosts = hosts.len(),
        "Subnet enumeration complete"
    );

    // Phase 2: prime the OS neighbor cache, best effort
    arp_prime(&hosts, &cancel).await?;

    // Phase 3: discovery beacons and the seed ARP read
    let (onvif_hints, tapo_hints) = tokio::try_join!(
        beacons::onvif_sweep(&subnets, &cancel),
        beacons::tapo_broadcast_sweep(&subnets, &cancel),
    )?;
    let arp_seed = arp::read_arp_table(&cancel).await?;
    tracing::info!(
        onvif_hints = onvif_hints.len(),
        tapo_hints = tapo_hints.len(),
        arp_seeds = arp_seed.len(),
        "Beacon sweep complete"
    );

    // Phase 4: target union
    let mut targets = hosts.clone();
    {
        let mut known: std::collections::HashSet<Ipv4Addr> = targets.iter().copied().collect();
        let mut arp_ips: Vec<Ipv4Addr> = arp_seed.keys().copied().collect();
        arp_ips.sort_unstable();
        for ip in arp_ips
            .into_iter()
            .chain(onvif_hints.iter().copied())
            .chain(tapo_hints.iter().copied())
        {
            if known.insert(ip) {
                targets.push(ip);
            }
        }
    }

    // Phase 5: bounded per-host fan-out
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(probes::HTTP_BUDGET)
        .user_agent("LocalCam/1.0")
        .build()
        .ok();
    if client.is_none() {
        tracing::warn!("HTTP client construction failed, skipping banner fingerprints");
    }

    let semaphore = Arc::new(Semaphore::new(options.max_parallelism));
    let mut handles = Vec::with_capacity(targets.len());
    for ip in &targets {
        let ip = *ip;
        let permit = with_cancel(&cancel, semaphore.clone().acquire_owned())
            .await?
            .map_err(|e| Error::Internal(format!("semaphore closed: {}", e)))?;
        let cancel = cancel.clone();
        let client = client.clone();
        let seen_via_onvif = onvif_hints.contains(&ip);
        let seen_via_tapo_broadcast = tapo_hints.contains(&ip);
        let handle = tokio::spawn(async move {
            let result =
                probe_host(ip, seen_via_onvif, seen_via_tapo_broadcast, client, &cancel).await;
            drop(permit);
            result
        });
        handles.push(handle);
    }

    let mut results: Vec<HostProbeResult> = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Ok(Some(result))) => results.push(result),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => return Err(e),
            Err(e) => return Err(Error::Internal(format!("probe task failed: {}", e))),
        }
    }
    tracing::info!(
        targets = targets.len(),
        responsive = results.len(),
        "Host probing complete"
    );

    // Phase 6: re-read the neighbor table; post-probe entries win
    let mut macs = arp_seed.clone();
    macs.extend(arp::read_arp_table(&cancel).await?);

    // Phase 7: ordered classification
    results.sort_by_key(|r| r.ip);
    let resolver = TokioAsyncResolver::tokio_from_system_conf().ok();

    let tapo_unicast_hint_count = results.iter().filter(|r| r.seen_via_tapo_unicast).count();
    let mut detections: Vec<Detection> = Vec::new();
    let mut candidates: Vec<CandidateDiagnostics> = Vec::new();

    for result in &results {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let hostname = reverse_lookup(resolver.as_ref(), result.ip).await;
        let mac = macs.get(&result.ip).cloned();
        let eval = classify::evaluate(result, hostname.as_deref(), mac.as_deref());

        tracing::debug!(
            ip = %result.ip,
            likely = eval.is_likely,
            score = eval.score,
            "Candidate classified"
        );

        if eval.is_likely {
            detections.push(Detection {
                ip: result.ip,
                hostname: hostname.clone(),
                mac: mac.clone(),
                open_ports: result.open_ports.clone(),
                confidence: eval.score,
                reason: eval.reason.clone(),
            });
        }
        candidates.push(CandidateDiagnostics {
            ip: result.ip,
            hostname,
            mac,
            open_ports: result.open_ports.clone(),
            seen_via_onvif: result.seen_via_onvif,
            seen_via_tapo_broadcast: result.seen_via_tapo_broadcast,
            seen_via_tapo_unicast: result.seen_via_tapo_unicast,
            http_fingerprint: result.http_fingerprint.clone(),
            is_likely: eval.is_likely,
            confidence: eval.score,
            reason: eval.reason,
        });
    }

    let mut diagnostics = ScanDiagnostics {
        subnets_scanned: subnets.iter().map(Subnet::to_string).collect(),
        enumerated_host_count: targets.len(),
        arp_seed_count: arp_seed.len(),
        onvif_hint_count: onvif_hints.len(),
        tapo_broadcast_hint_count: tapo_hints.len(),
        tapo_unicast_hint_count,
        responsive_host_count: results.len(),
        candidates,
        started_at,
        finished_at: Utc::now(),
    };
    diagnostics.sort_candidates();

    tracing::info!(
        detections = detections.len(),
        candidates = diagnostics.candidates.len(),
        "Scan complete"
    );

    Ok(ScanReport {
        detections,
        diagnostics,
    })
}

/// Convenience variant returning only the likely cameras.
pub async fn scan_detections(options: ScanOptions) -> Result<Vec<Detection>> {
    Ok(scan(options).await?.detections)
}

/// Probe one address: ICMP, all TCP ports, and the Tapo unicast probe run
/// concurrently; the HTTP fingerprint is fetched afterwards for open web
/// ports in priority order. Returns `None` when nothing responded.
async fn probe_host(
    ip: Ipv4Addr,
    seen_via_onvif: bool,
    seen_via_tapo_broadcast: bool,
    client: Option<reqwest::Client>,
    cancel: &CancellationToken,
) -> Result<Option<HostProbeResult>> {
    let ping_fut = probes::icmp_echo(ip, probes::PING_HOST_TIMEOUT, cancel);
    let ports_fut = join_all(
        PROBE_PORTS
            .iter()
            .map(|port| probes::tcp_connect_probe(ip, *port, cancel)),
    );
    let unicast_fut = beacons::tapo_unicast_probe(ip, cancel);

    let (ping, port_results, unicast) = tokio::join!(ping_fut, ports_fut, unicast_fut);
    let ping = ping?;
    let seen_via_tapo_unicast = unicast?;

    let mut open_ports = Vec::new();
    for (port, open) in PROBE_PORTS.iter().zip(port_results) {
        if open? {
            open_ports.push(*port);
        }
    }

    let mut http_fingerprint = None;
    if let Some(client) = &client {
        for (port, tls) in FINGERPRINT_PORTS {
            if !open_ports.contains(&port) {
                continue;
            }
            if let Some(fp) = probes::http_fingerprint(client, ip, port, tls, cancel).await? {
                if !fp.is_empty() {
                    http_fingerprint = Some(fp);
                    break;
                }
            }
        }
    }

    let result = HostProbeResult {
        ip,
        open_ports,
        http_fingerprint,
        seen_via_onvif,
        seen_via_tapo_broadcast,
        seen_via_tapo_unicast,
    };
    Ok(result.has_evidence(ping).then_some(result))
}

/// Ping the first [`ARP_PRIME_LIMIT`] routable hosts so the neighbor cache
/// is warm before the first ARP read. Probe errors are ignored.
async fn arp_prime(hosts: &[Ipv4Addr], cancel: &CancellationToken) -> Result<()> {
    let targets: Vec<Ipv4Addr> = hosts
        .iter()
        .copied()
        .filter(|ip| subnet::is_routable_host(*ip))
        .take(ARP_PRIME_LIMIT)
        .collect();
    if targets.is_empty() {
        return Ok(());
    }
    tracing::debug!(targets = targets.len(), "Priming ARP cache");

    let semaphore = Arc::new(Semaphore::new(ARP_PRIME_FANOUT));
    let mut handles = Vec::with_capacity(targets.len());
    for ip in targets {
        let permit = with_cancel(cancel, semaphore.clone().acquire_owned())
            .await?
            .map_err(|e| Error::Internal(format!("semaphore closed: {}", e)))?;
        let cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = probes::icmp_echo(ip, probes::PING_PRIME_TIMEOUT, &cancel).await;
            drop(permit);
            result
        });
        handles.push(handle);
    }
    for handle in handles {
        if let Ok(Err(Error::Cancelled)) = handle.await {
            return Err(Error::Cancelled);
        }
    }
    Ok(())
}

async fn reverse_lookup(resolver: Option<&TokioAsyncResolver>, ip: Ipv4Addr) -> Option<String> {
    let resolver = resolver?;
    match timeout(DNS_TIMEOUT, resolver.reverse_lookup(IpAddr::V4(ip))).await {
        Ok(Ok(lookup)) => lookup
            .iter()
            .next()
            .map(|name| name.to_string().trim_end_matches('.').to_string()),
        _ => None,
    }
}
