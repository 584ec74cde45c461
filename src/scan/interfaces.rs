//! Interface enumeration
//!
//! Candidate subnets come from operationally-up, non-loopback, non-tunnel
//! interfaces that sit behind at least one IPv4 default gateway. Interface
//! flags and prefixes come from the datalink layer; gateways come from the
//! OS routing table (`ip route show default`, captured stdout, no shell).

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::probes::with_cancel;
use super::subnet::{is_apipa, Subnet};
use crate::error::Result;

/// Enumerate the subnets a scan should sweep, deduplicated by
/// `(network, prefix)` and sorted the same way.
pub async fn enumerate_subnets(cancel: &CancellationToken) -> Result<Vec<Subnet>> {
    let gateways = default_gateways(cancel).await?;
    let mut subnets: Vec<Subnet> = Vec::new();

    for iface in pnet::datalink::interfaces() {
        if !iface.is_up() || iface.is_loopback() || iface.is_point_to_point() {
            continue;
        }
        let Some(iface_gateways) = gateways.get(&iface.name) else {
            continue;
        };

        let addresses: Vec<(Ipv4Addr, u8)> = iface
            .ips
            .iter()
            .filter_map(|net| match net.ip() {
                IpAddr::V4(ip) => Some((ip, net.prefix())),
                IpAddr::V6(_) => None,
            })
            .collect();

        for subnet in subnet_candidates(&addresses, iface_gateways) {
            tracing::debug!(interface = %iface.name, subnet = %subnet, "Subnet candidate");
            subnets.push(subnet);
        }
    }

    subnets.sort_by_key(Subnet::dedup_key);
    subnets.dedup_by_key(|s| s.dedup_key());
    Ok(subnets)
}

/// Apply the address selection rules for one interface's unicast IPv4s.
fn subnet_candidates(addresses: &[(Ipv4Addr, u8)], gateways: &[Ipv4Addr]) -> Vec<Subnet> {
    let gateways: Vec<Ipv4Addr> = gateways
        .iter()
        .copied()
        .filter(|gw| !gw.is_unspecified())
        .collect();
    if gateways.is_empty() {
        return Vec::new();
    }

    addresses
        .iter()
        .filter(|(ip, _)| !ip.is_loopback() && !is_apipa(*ip))
        .filter_map(|(ip, prefix)| Subnet::new(*ip, *prefix, gateways.clone()))
        .collect()
}

/// Read IPv4 default routes: interface name -> gateways in routing order.
///
/// Any spawn or parse failure degrades to an empty map.
async fn default_gateways(cancel: &CancellationToken) -> Result<HashMap<String, Vec<Ipv4Addr>>> {
    let output = with_cancel(cancel, async {
        Command::new("ip")
            .args(["route", "show", "default"])
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
            tracing::warn!(error = %e, "ip route spawn failed, no default gateways");
            return Ok(HashMap::new());
        }
    };

    Ok(parse_default_routes(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `ip route show default` lines:
/// `default via 192.168.1.1 dev wlan0 proto dhcp metric 600`
fn parse_default_routes(stdout: &str) -> HashMap<String, Vec<Ipv4Addr>> {
    let mut routes: HashMap<String, Vec<Ipv4Addr>> = HashMap::new();
    for line in stdout.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() != Some(&"default") {
            continue;
        }
        let gateway = tokens
            .windows(2)
            .find(|w| w[0] == "via")
            .and_then(|w| w[1].parse::<Ipv4Addr>().ok());
        let device = tokens
            .windows(2)
            .find(|w| w[0] == "dev")
            .map(|w| w[1].to_string());
        if let (Some(gw), Some(dev)) = (gateway, device) {
            let list = routes.entry(dev).or_default();
            if !list.contains(&gw) {
                list.push(gw);
            }
        }
    }
    routes
}
