//! Client identity extraction for rate limiting
//!
//! The identity is the first globally-routable address found in a prioritized
//! list of proxy/forwarding headers, falling back to the direct connection
//! address. Header-derived identity is advisory: anything before the last
//! trusted proxy hop is trivially spoofable. It is used only to key the rate
//! limiter, never for authentication.

use axum::http::HeaderMap;
use std::net::IpAddr;

/// Forwarding headers in priority order
const FORWARD_HEADERS: &[&str] = &["x-forwarded-for", "x-real-ip", "client-ip"];

/// Derive the rate-limit key for a request
///
/// Returns the textual address of the first routable forwarded IP, else the
/// peer address, else `"unknown"`.
pub fn client_key(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    for header in FORWARD_HEADERS {
        let Some(value) = headers.get(*header).and_then(|v| v.to_str().ok()) else {
            continue;
        };

        // X-Forwarded-For carries a comma-separated chain; the client is first.
        let Some(first) = value.split(',').next() else {
            continue;
        };

        if let Ok(ip) = first.trim().parse::<IpAddr>() {
            if is_routable(&ip) {
                return ip.to_string();
            }
        }
    }

    match peer {
        Some(ip) => ip.to_string(),
        None => "unknown".to_string(),
    }
}

/// Reject loopback, private, link-local and unspecified addresses so a header
/// cannot alias every internal caller onto one bucket
fn is_routable(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !v4.is_loopback() && !v4.is_private() && !v4.is_link_local() && !v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            // fc00::/7 unique-local, fe80::/10 link-local
            let segments = v6.segments();
            let unique_local = (segments[0] & 0xfe00) == 0xfc00;
            let link_local = (segments[0] & 0xffc0) == 0xfe80;
            !v6.is_loopback() && !v6.is_unspecified() && !unique_local && !link_local
        }
    }
}
