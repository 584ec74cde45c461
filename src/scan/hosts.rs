//! Host enumeration
//!
//! Small subnets are walked exhaustively. Large subnets are sampled: up to
//! 16 /24-aligned chunks biased toward the /24s around the local address
//! and the gateways, with the remainder spread evenly across the range.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use super::subnet::Subnet;

/// Full expansion threshold: subnets with more hosts than this are sampled
const FULL_EXPANSION_LIMIT: u32 = 4096;

/// Maximum sampled /24 chunks per large subnet
const MAX_CHUNKS: usize = 16;

/// Expand subnets into the probe target sequence, deduplicated globally,
/// with each subnet's local address skipped.
pub fn enumerate_hosts(subnets: &[Subnet]) -> Vec<Ipv4Addr> {
    let mut seen: HashSet<Ipv4Addr> = HashSet::new();
    let mut hosts = Vec::new();

    for subnet in subnets {
        if subnet.host_count() <= FULL_EXPANSION_LIMIT {
            expand_full(subnet, &mut seen, &mut hosts);
        } else {
            expand_sampled(subnet, &mut seen, &mut hosts);
        }
    }

    hosts
}

fn expand_full(subnet: &Subnet, seen: &mut HashSet<Ipv4Addr>, out: &mut Vec<Ipv4Addr>) {
    let first = u32::from(subnet.first_host());
    let last = u32::from(subnet.last_host());
    let local = u32::from(subnet.local_address);

    for raw in first..=last {
        if raw == local {
            continue;
        }
        let ip = Ipv4Addr::from(raw);
        if seen.insert(ip) {
            out.push(ip);
        }
    }
}

fn expand_sampled(subnet: &Subnet, seen: &mut HashSet<Ipv4Addr>, out: &mut Vec<Ipv4Addr>) {
    let first = u32::from(subnet.first_host());
    let last = u32::from(subnet.last_host());
    let local = u32::from(subnet.local_address);

    for chunk in select_chunks(subnet) {
        let lo = (chunk + 1).max(first);
        let hi = (chunk + 254).min(last);
        for raw in lo..=hi {
            if raw == local {
                continue;
            }
            let ip = Ipv4Addr::from(raw);
            if seen.insert(ip) {
                out.push(ip);
            }
        }
    }
}

/// Pick up to [`MAX_CHUNKS`] /24-aligned chunk starts for a large subnet.
///
/// Seed chunks come from the local address, the gateways, and the first and
/// last host; each seed then contributes its ±1/±2 neighboring /24s; any
/// remaining slots are filled with evenly strided /24s. Known quirk: as
/// soon as one seed's neighbor batch would push past the cap the selection
/// returns immediately, skipping both that batch and the strided fill, so
/// fewer than 16 chunks can come back even when more are available.
pub(crate) fn select_chunks(subnet: &Subnet) -> Vec<u32> {
    let first = u32::from(subnet.first_host());
    let last = u32::from(subnet.last_host());
    let chunk_of = |raw: u32| raw & 0xFFFF_FF00;
    let in_range = |chunk: u32| chunk + 1 <= last && chunk + 254 >= first;

    let mut chunks: Vec<u32> = Vec::new();
    let push = |chunks: &mut Vec<u32>, chunk: u32| {
        if chunks.len() < MAX_CHUNKS && in_range(chunk) && !chunks.contains(&chunk) {
            chunks.push(chunk);
        }
    };

    push(&mut chunks, chunk_of(u32::from(subnet.local_address)));
    for gw in &subnet.gateways {
        push(&mut chunks, chunk_of(u32::from(*gw)));
    }
    push(&mut chunks, chunk_of(first));
    push(&mut chunks, chunk_of(last));

    let seeds = chunks.clone();
    for seed in &seeds {
        let mut batch: Vec<u32> = Vec::new();
        for offset in [256i64, -256, 512, -512] {
            let candidate = *seed as i64 + offset;
            if !(0..=u32::MAX as i64).contains(&candidate) {
                continue;
            }
            let candidate = candidate as u32;
            if in_range(candidate) && !chunks.contains(&candidate) && !batch.contains(&candidate) {
                batch.push(candidate);
            }
        }
        if chunks.len() + batch.len() > MAX_CHUNKS {
            return chunks;
        }
        chunks.extend(batch);
    }

    // Evenly strided fill across the whole /24 span
    let total_blocks = (chunk_of(last) - chunk_of(first)) / 256 + 1;
    let remaining = (MAX_CHUNKS - chunks.len()) as u32;
    if remaining > 0 {
        let step = (total_blocks / remaining).max(1);
        let mut block = 0u32;
        while block < total_blocks && chunks.len() < MAX_CHUNKS {
            push(&mut chunks, chunk_of(first) + block * 256);
            block += step;
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet(local: &str, prefix: u8, gateways: &[&str]) -> Subnet {
        Subnet::new(
            local.parse().unwrap(),
            prefix,
            gateways.iter().map(|g| g.parse().unwrap()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn small_subnet_is_walked_fully() {
        let hosts = enumerate_hosts(&[subnet("192.168.1.57", 24, &["192.168.1.1"])]);
        assert_eq!(hosts.len(), 253); // 254 hosts minus ourselves
        assert!(!hosts.contains(&"192.168.1.57".parse().unwrap()));
        assert!(!hosts.contains(&"192.168.1.0".parse().unwrap()));
        assert!(!hosts.contains(&"192.168.1.255".parse().unwrap()));
        assert_eq!(hosts[0], "192.168.1.1".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn slash_20_still_expands_fully() {
        let hosts = enumerate_hosts(&[subnet("10.1.0.9", 20, &[])]);
        assert_eq!(hosts.len(), 4093);
    }

    #[test]
    fn large_subnet_is_sampled() {
        let s = subnet("192.168.0.50", 16, &["192.168.0.1"]);
        let hosts = enumerate_hosts(&[s]);

        assert!(hosts.len() <= 16 * 254);
        assert!(hosts.contains(&"192.168.0.2".parse().unwrap()));
        assert!(hosts.contains(&"192.168.0.254".parse().unwrap()));
        assert!(!hosts.contains(&"192.168.0.50".parse().unwrap()));

        // Deterministic for identical inputs
        let again = enumerate_hosts(&[subnet("192.168.0.50", 16, &["192.168.0.1"])]);
        assert_eq!(hosts, again);
    }

    #[test]
    fn sampled_chunks_cover_near_and_far() {
        let s = subnet("192.168.0.50", 16, &["192.168.0.1"]);
        let chunks = select_chunks(&s);
        assert_eq!(chunks.len(), 16);
        // local/gateway /24, its neighbors, and the tail of the range
        assert!(chunks.contains(&u32::from("192.168.0.0".parse::<Ipv4Addr>().unwrap())));
        assert!(chunks.contains(&u32::from("192.168.1.0".parse::<Ipv4Addr>().unwrap())));
        assert!(chunks.contains(&u32::from("192.168.255.0".parse::<Ipv4Addr>().unwrap())));
    }

    #[test]
    fn chunk_selection_short_circuits_on_overflow() {
        // 13 seed chunks (local + 11 gateway /24s + last-host /24); the first
        // seed's neighbor batch fits (15 total) but the second seed's batch
        // of four would overflow the cap of 16, so selection stops at 15
        // chunks even though plenty of /24s remain unsampled.
        let gateways: Vec<String> = (1..=11).map(|i| format!("10.0.{}.1", i * 10)).collect();
        let gateway_refs: Vec<&str> = gateways.iter().map(|s| s.as_str()).collect();
        let s = subnet("10.0.0.10", 16, &gateway_refs);

        let chunks = select_chunks(&s);
        assert_eq!(chunks.len(), 15);

        let hosts = enumerate_hosts(&[s]);
        let distinct_slash24: HashSet<u32> =
            hosts.iter().map(|ip| u32::from(*ip) & 0xFFFF_FF00).collect();
        assert_eq!(distinct_slash24.len(), 15);
    }

    #[test]
    fn overlapping_subnets_deduplicate() {
        let a = subnet("192.168.1.10", 24, &[]);
        let b = subnet("192.168.1.20", 24, &[]);
        let hosts = enumerate_hosts(&[a, b]);
        // Second pass only adds the first subnet's skipped local address;
        // .20 was already yielded while walking the first subnet
        assert_eq!(hosts.len(), 254);
        assert!(hosts.contains(&"192.168.1.10".parse().unwrap()));
        assert!(hosts.contains(&"192.168.1.20".parse().unwrap()));
    }
}
