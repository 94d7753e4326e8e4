//! Validates that a route's upstream target does not resolve to an address
//! the proxy should never be tricked into reaching on the operator's behalf.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum SsrfRejection {
    #[error("upstream url '{0}' could not be parsed")]
    InvalidUrl(String),
    #[error("upstream url '{0}' has no host")]
    MissingHost(String),
    #[error("upstream url scheme must be http or https, got '{0}'")]
    UnsupportedScheme(String),
    #[error("host '{host}' did not resolve to any address")]
    NoResolution { host: String },
    #[error("host '{host}' resolves to disallowed address {addr}")]
    DeniedAddress { host: String, addr: IpAddr },
    #[error("dns resolution for '{host}' failed: {source}")]
    ResolutionFailed {
        host: String,
        #[source]
        source: std::io::Error,
    },
}

/// The outcome of validating a route: the addresses it is currently allowed
/// to connect to, kept alongside the route for the optional pinned-connect
/// hardening mode.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub addrs: Vec<SocketAddr>,
}

/// True if `addr` falls in a range the proxy must never be directed at by a
/// route's upstream URL: loopback, private, link-local, multicast,
/// documentation/reserved, or unspecified.
pub fn is_denied(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_denied_v4(v4),
        IpAddr::V6(v6) => is_denied_v6(v6),
    }
}

fn is_denied_v4(addr: Ipv4Addr) -> bool {
    addr.is_loopback()
        || addr.is_private()
        || addr.is_link_local()
        || addr.is_multicast()
        || addr.is_unspecified()
        || addr.is_broadcast()
        || addr.is_documentation()
        // 100.64.0.0/10 carrier-grade NAT
        || (addr.octets()[0] == 100 && (64..=127).contains(&addr.octets()[1]))
}

fn is_denied_v6(addr: Ipv6Addr) -> bool {
    if addr.is_loopback() || addr.is_multicast() || addr.is_unspecified() {
        return true;
    }
    if let Some(v4) = addr.to_ipv4_mapped() {
        return is_denied_v4(v4);
    }
    let segments = addr.segments();
    // fc00::/7 unique local addresses
    if (segments[0] & 0xfe00) == 0xfc00 {
        return true;
    }
    // fe80::/10 link-local
    if (segments[0] & 0xffc0) == 0xfe80 {
        return true;
    }
    false
}

/// Resolve and validate an upstream URL at config-install time. Resolution
/// happens once here, not per request; the caller decides whether to pin the
/// resulting addresses (documented DNS-rebinding tradeoff).
pub async fn validate(url: &str) -> Result<ResolvedTarget, SsrfRejection> {
    let parsed = Url::parse(url).map_err(|_| SsrfRejection::InvalidUrl(url.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(SsrfRejection::UnsupportedScheme(other.to_string())),
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| SsrfRejection::MissingHost(url.to_string()))?
        .to_string();

    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| SsrfRejection::MissingHost(url.to_string()))?;

    // If the host is already a literal IP, validate it directly without DNS.
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_denied(ip) {
            return Err(SsrfRejection::DeniedAddress { host, addr: ip });
        }
        return Ok(ResolvedTarget {
            addrs: vec![SocketAddr::new(ip, port)],
        });
    }

    let lookup = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|source| SsrfRejection::ResolutionFailed {
            host: host.clone(),
            source,
        })?;

    let addrs: Vec<SocketAddr> = lookup.collect();
    if addrs.is_empty() {
        return Err(SsrfRejection::NoResolution { host });
    }

    for addr in &addrs {
        if is_denied(addr.ip()) {
            return Err(SsrfRejection::DeniedAddress {
                host,
                addr: addr.ip(),
            });
        }
    }

    Ok(ResolvedTarget { addrs })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_loopback_and_private_v4() {
        assert!(is_denied("127.0.0.1".parse().unwrap()));
        assert!(is_denied("10.0.0.5".parse().unwrap()));
        assert!(is_denied("192.168.1.1".parse().unwrap()));
        assert!(is_denied("169.254.1.1".parse().unwrap()));
        assert!(is_denied("100.64.0.1".parse().unwrap()));
    }

    #[test]
    fn denies_ula_and_link_local_v6() {
        assert!(is_denied("::1".parse().unwrap()));
        assert!(is_denied("fc00::1".parse().unwrap()));
        assert!(is_denied("fe80::1".parse().unwrap()));
    }

    #[test]
    fn allows_public_addresses() {
        assert!(!is_denied("93.184.216.34".parse().unwrap()));
        assert!(!is_denied("2606:2800:220:1:248:1893:25c8:1946".parse().unwrap()));
    }

    #[tokio::test]
    async fn rejects_literal_private_ip_upstream() {
        let err = validate("http://127.0.0.1:9000/").await.unwrap_err();
        assert!(matches!(err, SsrfRejection::DeniedAddress { .. }));
    }

    #[tokio::test]
    async fn rejects_unsupported_scheme() {
        let err = validate("ftp://example.com/").await.unwrap_err();
        assert!(matches!(err, SsrfRejection::UnsupportedScheme(_)));
    }
}
