//! Client IP resolution for visit logging
//!
//! The visitor's address comes from the socket unless the deployment sits
//! behind proxies that are explicitly trusted:
//! - `cloudflare`: `CF-Connecting-IP`
//! - `standard`: the RFC 7239 `Forwarded` chain, or `X-Forwarded-For` when
//!   that is absent. Headers are only read when the socket peer is a trusted
//!   proxy (or a fixed hop count is configured), and the chain is walked from
//!   the right while hops are trusted.
//! - `none`: socket address only

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

use crate::config::{AnalyticsConfig, TrustedProxyMode};

/// Resolve the client address, or `None` when neither the socket nor a
/// trusted header provides one
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_ip: Option<IpAddr>,
    config: &AnalyticsConfig,
) -> Option<IpAddr> {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_ip
        }),
        TrustedProxyMode::Standard => {
            let trusted = parse_trusted_proxies(&config.trusted_proxies);
            extract_proxied_ip(headers, socket_ip, &trusted, config.num_trusted_proxies)
        }
        TrustedProxyMode::None => socket_ip,
    }
}

fn parse_trusted_proxies(entries: &[String]) -> Vec<IpNet> {
    entries
        .iter()
        .filter_map(|entry| {
            entry
                .parse::<IpNet>()
                .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                .map_err(|_| warn!("Ignoring invalid trusted proxy entry '{entry}'"))
                .ok()
        })
        .collect()
}

fn is_trusted(ip: &IpAddr, trusted: &[IpNet]) -> bool {
    trusted.iter().any(|net| net.contains(ip))
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Client address behind `standard` proxies.
///
/// With `num_trusted` set, exactly that many right-most hops are skipped and
/// a shorter chain yields the socket address. Otherwise the headers count
/// only when the socket peer is inside a trusted CIDR, and every hop inside
/// a trusted CIDR is skipped.
fn extract_proxied_ip(
    headers: &HeaderMap,
    socket_ip: Option<IpAddr>,
    trusted: &[IpNet],
    num_trusted: Option<usize>,
) -> Option<IpAddr> {
    let peer_trusted = socket_ip.is_some_and(|ip| is_trusted(&ip, trusted));
    if num_trusted.is_none() && !peer_trusted {
        if forwarding_chain(headers).is_some() {
            debug!(socket = ?socket_ip, "ignoring forwarding headers from untrusted peer");
        }
        return socket_ip;
    }

    let Some(hops) = forwarding_chain(headers) else {
        return socket_ip;
    };

    if let Some(num_trusted) = num_trusted {
        return if hops.len() > num_trusted {
            Some(hops[hops.len() - num_trusted - 1])
        } else {
            socket_ip
        };
    }

    hops.iter()
        .rev()
        .find(|ip| !is_trusted(ip, trusted))
        .or_else(|| hops.first())
        .copied()
}

/// Hop addresses, left (client side) to right, from `Forwarded` or else
/// `X-Forwarded-For`
fn forwarding_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let hops = forwarded_hops(headers).or_else(|| x_forwarded_for_hops(headers))?;
    (!hops.is_empty()).then_some(hops)
}

/// Every `for=` address of an RFC 7239 `Forwarded` header
fn forwarded_hops(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    let hops: Vec<IpAddr> = forwarded
        .split(',')
        .flat_map(|element| element.split(';'))
        .filter_map(|param| {
            let (key, value) = param.trim().split_once('=')?;
            key.eq_ignore_ascii_case("for").then_some(value)
        })
        .filter_map(parse_forwarded_node)
        .collect();

    (!hops.is_empty()).then_some(hops)
}

/// `for=` values: `1.2.3.4`, `"1.2.3.4:80"`, `"[2001:db8::1]:443"`
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');

    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }

    value
        .parse::<IpAddr>()
        .ok()
        .or_else(|| value.rsplit_once(':')?.0.parse::<Ipv4Addr>().ok().map(IpAddr::V4))
}

fn x_forwarded_for_hops(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    Some(
        xff.split(',')
            .filter_map(|s| s.trim().parse::<IpAddr>().ok())
            .collect(),
    )
}

/// Truncate an address to its network prefix (/24 for IPv4, /48 for IPv6)
pub fn anonymize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(addr) => {
            let [a, b, c, _] = addr.octets();
            IpAddr::V4(Ipv4Addr::new(a, b, c, 0))
        }
        IpAddr::V6(addr) => {
            let s = addr.segments();
            IpAddr::V6(Ipv6Addr::new(s[0], s[1], s[2], 0, 0, 0, 0, 0))
        }
    }
}
