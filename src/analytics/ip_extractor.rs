//! Client IP extraction with trusted-proxy validation.
//!
//! Forwarding headers are honored only when the socket peer is inside one of
//! the configured trusted networks; otherwise the socket address wins. The
//! X-Forwarded-For chain is walked right to left, skipping trusted hops;
//! X-Real-IP is the last header consulted.

use std::net::IpAddr;

use axum::http::HeaderMap;
use ipnet::IpNet;

pub fn extract_client_ip(headers: &HeaderMap, socket_addr: IpAddr, trusted: &[IpNet]) -> IpAddr {
    if trusted.is_empty() || !is_trusted(socket_addr, trusted) {
        return socket_addr;
    }

    extract_from_forwarded(headers)
        .or_else(|| extract_from_x_forwarded_for(headers, trusted))
        .or_else(|| extract_from_x_real_ip(headers))
        .unwrap_or(socket_addr)
}

fn is_trusted(ip: IpAddr, trusted: &[IpNet]) -> bool {
    trusted.iter().any(|net| net.contains(&ip))
}

/// RFC 7239 `Forwarded: for=...` — first element is the original client.
fn extract_from_forwarded(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    for element in forwarded.split(',') {
        for param in element.split(';') {
            let param = param.trim();
            if let Some(value) = param.strip_prefix("for=") {
                let value = value.trim_matches('"');
                // Bracketed IPv6 with optional port, or bare IPv4[:port].
                let ip_str = if let Some(rest) = value.strip_prefix('[') {
                    rest.split(']').next().unwrap_or(rest)
                } else {
                    value.split(':').next().unwrap_or(value)
                };
                if let Ok(ip) = ip_str.parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    None
}

/// Rightmost entry not belonging to a trusted network; if every hop is
/// trusted, the leftmost entry is the client.
fn extract_from_x_forwarded_for(headers: &HeaderMap, trusted: &[IpNet]) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let ips: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    ips.iter()
        .rev()
        .find(|ip| !is_trusted(**ip, trusted))
        .or(ips.first())
        .copied()
}

fn extract_from_x_real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-real-ip")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
