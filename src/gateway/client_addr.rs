//! Caller address resolution.
//!
//! Priority: first hop of `X-Forwarded-For`, then `X-Real-IP`, then the
//! transport peer address without its port. Nothing is validated here;
//! a malformed result is rejected later by the allowlist matcher.

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Standard proxy header carrying the client chain
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Single-address header set by nginx-style proxies
pub const X_REAL_IP: &str = "x-real-ip";

/// Resolve the caller's address from forwarding headers or the peer address.
///
/// Returns an empty string when no source is available; the allowlist
/// treats that as a non-match.
#[must_use]
pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(xff) = header_text(headers, X_FORWARDED_FOR) {
        return xff.split(',').next().unwrap_or_default().trim().to_string();
    }

    if let Some(real_ip) = header_text(headers, X_REAL_IP) {
        return real_ip.trim().to_string();
    }

    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

/// Non-empty header value as text
///
/// Non-ASCII bytes are decoded lossily rather than skipped, so a present
/// header still takes priority and fails the allowlist match.
fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<Cow<'a, str>> {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()))
        .filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("192.0.2.50:51234".parse().unwrap())
    }

    #[test]
    fn test_forwarded_for_first_hop_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static(" 198.51.100.9 , 203.0.113.5"),
        );
        headers.insert(X_REAL_IP, HeaderValue::from_static("10.0.0.1"));
        assert_eq!(resolve(&headers, peer()), "198.51.100.9");
    }

    #[test]
    fn test_real_ip_used_without_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REAL_IP, HeaderValue::from_static("  10.0.0.1 "));
        assert_eq!(resolve(&headers, peer()), "10.0.0.1");
    }

    #[test]
    fn test_empty_headers_fall_through() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("   "));
        headers.insert(X_REAL_IP, HeaderValue::from_static(""));
        assert_eq!(resolve(&headers, peer()), "192.0.2.50");
    }

    #[test]
    fn test_peer_address_port_stripped() {
        assert_eq!(resolve(&HeaderMap::new(), peer()), "192.0.2.50");
        let v6: SocketAddr = "[2001:db8::7]:443".parse().unwrap();
        assert_eq!(resolve(&HeaderMap::new(), Some(v6)), "2001:db8::7");
    }

    #[test]
    fn test_no_source_yields_empty() {
        assert_eq!(resolve(&HeaderMap::new(), None), "");
    }

    #[test]
    fn test_undecodable_forwarded_for_still_takes_priority() {
        let mut headers = HeaderMap::new();
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_bytes(b"\xff10.0.0.1, 203.0.113.5").unwrap(),
        );
        headers.insert(X_REAL_IP, HeaderValue::from_static("10.0.0.1"));

        let resolved = resolve(&headers, peer());
        assert_eq!(resolved, "\u{FFFD}10.0.0.1");
        assert!(!crate::gateway::allowlist::matches(
            &resolved,
            &["10.0.0.1".to_string()]
        ));
    }

    #[test]
    fn test_no_validation_performed() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("unknown"));
        assert_eq!(resolve(&headers, peer()), "unknown");
    }
}
