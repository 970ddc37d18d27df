use crate::error::ProxyError;
use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Parse and vet the `url` query parameter before anything is fetched.
///
/// Accepts only absolute `http://` and `https://` URLs with a host. Unless
/// `allow_private` is set, IP literals in loopback, private or link-local
/// ranges are refused so the proxy cannot be pointed at internal services.
///
/// **Hostnames** are accepted without DNS resolution; a hostname that resolves
/// to a private address is not caught here.
///
/// # Errors
/// Returns [`ProxyError::InvalidUrl`] for:
/// - Invalid or relative URLs
/// - Non-HTTP(S) schemes
/// - Blocked IPv4/IPv6 literals (when `allow_private` is false)
pub fn parse_upstream_url(raw: &str, allow_private: bool) -> Result<Url, ProxyError> {
    let parsed = Url::parse(raw.trim())
        .map_err(|e| ProxyError::InvalidUrl(format!("{raw}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ProxyError::InvalidUrl(format!(
                "scheme '{scheme}' not allowed, only http/https"
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| ProxyError::InvalidUrl(format!("no host in {raw}")))?;

    if !allow_private {
        let blocked = match &host {
            Host::Ipv4(ip) => is_blocked_ipv4(*ip),
            Host::Ipv6(ip) => is_blocked_ipv6(*ip),
            Host::Domain(_) => false,
        };
        if blocked {
            return Err(ProxyError::InvalidUrl(format!(
                "private or reserved address not allowed: {host}"
            )));
        }
    }

    Ok(parsed)
}

/// Loopback, RFC 1918, link-local (cloud metadata) and the `0.0.0.0/8` network.
fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.octets()[0] == 0
}

/// Loopback, unspecified, link-local `fe80::/10` and unique-local `fc00::/7`.
fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback() || ip.is_unspecified() || (first & 0xffc0) == 0xfe80 || (first & 0xfe00) == 0xfc00
}
