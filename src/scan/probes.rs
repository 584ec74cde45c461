//! Low-level probe primitives
//!
//! Every primitive is bounded by an explicit timeout and reports transient
//! network failures as negative evidence (`false` / `None`) rather than
//! errors. Cancellation is the only condition that escapes.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Primary TCP connect timeout
const TCP_PRIMARY: Duration = Duration::from_millis(450);
/// Pause before the single TCP retry
const TCP_RETRY_PAUSE: Duration = Duration::from_millis(40);
/// TCP retry timeout
const TCP_RETRY: Duration = Duration::from_millis(1300);

/// ICMP echo timeout during host probing
pub const PING_HOST_TIMEOUT: Duration = Duration::from_millis(450);
/// ICMP echo timeout during ARP cache priming
pub const PING_PRIME_TIMEOUT: Duration = Duration::from_millis(170);

/// Per-host HTTP fingerprint budget (also the shared client's timeout)
pub const HTTP_BUDGET: Duration = Duration::from_millis(2600);

/// Paths tried for the HTTP banner, in order
const HTTP_PATHS: [&str; 4] = ["/", "/index.html", "/mainFrame.htm", "/error.html"];

/// Body bytes kept per HTTP response
const HTTP_BODY_LIMIT: usize = 8192;

/// Run `fut` unless the token trips first.
pub(crate) async fn with_cancel<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        out = fut => Ok(out),
    }
}

/// TCP connect probe: one 450 ms attempt, then a single 1300 ms retry after
/// a 40 ms pause. Open means the handshake completed; everything else
/// (refused, RST, timeout) is closed/filtered.
pub async fn tcp_connect_probe(
    ip: Ipv4Addr,
    port: u16,
    cancel: &CancellationToken,
) -> Result<bool> {
    let addr = SocketAddr::new(IpAddr::V4(ip), port);
    with_cancel(cancel, async move {
        if tcp_attempt(addr, TCP_PRIMARY).await {
            return true;
        }
        tokio::time::sleep(TCP_RETRY_PAUSE).await;
        tcp_attempt(addr, TCP_RETRY).await
    })
    .await
}

async fn tcp_attempt(addr: SocketAddr, dur: Duration) -> bool {
    matches!(timeout(dur, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

/// Single ICMP echo; any error or missing reply is `false`.
pub async fn icmp_echo(ip: Ipv4Addr, dur: Duration, cancel: &CancellationToken) -> Result<bool> {
    with_cancel(cancel, async move {
        let payload = [0u8; 56];
        matches!(
            timeout(dur, surge_ping::ping(IpAddr::V4(ip), &payload)).await,
            Ok(Ok(_))
        )
    })
    .await
}

/// Fire one UDP datagram and wait up to `window` for any response.
///
/// Returns the responder's address and payload, or `None` on silence or any
/// socket error.
pub async fn udp_probe(
    target: SocketAddr,
    payload: &[u8],
    window: Duration,
    cancel: &CancellationToken,
) -> Result<Option<(SocketAddr, Vec<u8>)>> {
    with_cancel(cancel, async move {
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(_) => return None,
        };
        if socket.send_to(payload, target).await.is_err() {
            return None;
        }
        let mut buf = [0u8; 2048];
        match timeout(window, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => Some((from, buf[..len].to_vec())),
            _ => None,
        }
    })
    .await
}

/// Fetch the HTTP banner for one host port.
///
/// Tries `/`, `/index.html`, `/mainFrame.htm`, `/error.html`; for each
/// response keeps the Server header, the WWW-Authenticate header, and up to
/// 8192 body bytes, then joins all non-empty fragments with single spaces.
/// The whole fetch shares one 2.6 s budget; `None` when nothing answered.
pub async fn http_fingerprint(
    client: &reqwest::Client,
    ip: Ipv4Addr,
    port: u16,
    tls: bool,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    with_cancel(cancel, async move {
        match timeout(HTTP_BUDGET, fetch_banner(client, ip, port, tls)).await {
            Ok(banner) => banner,
            Err(_) => None,
        }
    })
    .await
}

async fn fetch_banner(
    client: &reqwest::Client,
    ip: Ipv4Addr,
    port: u16,
    tls: bool,
) -> Option<String> {
    let scheme = if tls { "https" } else { "http" };
    let mut fragments: Vec<String> = Vec::new();

    for path in HTTP_PATHS {
        let url = format!("{}://{}:{}{}", scheme, ip, port, path);
        let resp = match client.get(&url).send().await {
            Ok(r) => r,
            Err(_) => continue,
        };

        for header in ["server", "www-authenticate"] {
            if let Some(value) = resp.headers().get(header).and_then(|v| v.to_str().ok()) {
                if !value.trim().is_empty() {
                    fragments.push(value.trim().to_string());
                }
            }
        }

        if let Ok(body) = resp.bytes().await {
            let kept = &body[..body.len().min(HTTP_BODY_LIMIT)];
            let text = String::from_utf8_lossy(kept);
            let text = text.trim();
            if !text.is_empty() {
                fragments.push(text.to_string());
            }
        }
    }

    if fragments.is_empty() {
        None
    } else {
        Some(fragments.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_probe_sees_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let cancel = CancellationToken::new();

        let open = tcp_connect_probe("127.0.0.1".parse().unwrap(), port, &cancel)
            .await
            .unwrap();
        assert!(open);
        drop(listener);
    }

    #[tokio::test]
    async fn tcp_probe_reports_refused_as_closed() {
        // Grab a free port, then close it so the connect is refused
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let cancel = CancellationToken::new();
        let open = tcp_connect_probe("127.0.0.1".parse().unwrap(), port, &cancel)
            .await
            .unwrap();
        assert!(!open);
    }

    #[tokio::test]
    async fn udp_probe_round_trip() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = responder.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            if let Ok((len, from)) = responder.recv_from(&mut buf).await {
                let _ = responder.send_to(&buf[..len], from).await;
            }
        });

        let cancel = CancellationToken::new();
        let reply = udp_probe(target, b"hello", Duration::from_millis(500), &cancel)
            .await
            .unwrap();
        let (from, payload) = reply.expect("responder answered");
        assert_eq!(from, target);
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn udp_probe_times_out_quietly() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = silent.local_addr().unwrap();

        let cancel = CancellationToken::new();
        let reply = udp_probe(target, b"ping", Duration::from_millis(50), &cancel)
            .await
            .unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn cancellation_escapes_probe() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = tcp_connect_probe("127.0.0.1".parse().unwrap(), 1, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
