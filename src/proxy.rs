//! Trusted-proxy header resolution (`[NEW]` C11, `SPEC_FULL.md` §4.11):
//! when `Config::proxy_headers` is set and the connecting peer is in
//! `Config::trusted_hosts`, the scope's `scheme`/`client`/`server` fields
//! are derived from `X-Forwarded-Proto`/`X-Forwarded-For`/`X-Forwarded-Port`
//! instead of the raw socket addressing, per `spec.md` §6's "Proxy header
//! honoring (optional, configurable)".
//!
//! Modeled on uvicorn's `ProxyHeadersMiddleware` (referenced but not itself
//! vendored into `original_source`; `uvicorn/config.py` wraps the app in it
//! when `proxy_headers` is set) — trust is host-based, `"*"` trusts every
//! peer, and only the first `X-Forwarded-For` entry (the original client)
//! is honored.

use crate::ai::{Address, HeaderList};

/// Returns `true` if `host` may set forwarding headers for this connection.
fn is_trusted(host: &str, trusted_hosts: &[String]) -> bool {
    trusted_hosts.iter().any(|h| h == "*" || h == host)
}

fn header(headers: &HeaderList, name: &[u8]) -> Option<String> {
    headers.iter().find_map(|(n, v)| {
        n.as_ref()
            .eq_ignore_ascii_case(name)
            .then(|| std::str::from_utf8(v).ok().map(str::to_owned))
            .flatten()
    })
}

/// Derives the `(scheme, client, server)` scope fields to report to the
/// application. Returns the connection's own addressing unchanged unless
/// `proxy_headers` is enabled and `peer` is a trusted host.
pub(crate) fn resolve(
    headers: &HeaderList,
    peer: &Address,
    server: &Address,
    secure: bool,
    proxy_headers: bool,
    trusted_hosts: &[String],
) -> (String, Address, Address) {
    let default_scheme = if secure { "https" } else { "http" }.to_string();
    if !proxy_headers || !is_trusted(&peer.0, trusted_hosts) {
        return (default_scheme, peer.clone(), server.clone());
    }

    let scheme = header(headers, b"x-forwarded-proto").unwrap_or(default_scheme);

    let client = header(headers, b"x-forwarded-for")
        .and_then(|v| v.split(',').next().map(str::trim).map(str::to_owned))
        .map(|host| (host, peer.1))
        .unwrap_or_else(|| peer.clone());

    let server = match header(headers, b"x-forwarded-port").and_then(|v| v.trim().parse().ok()) {
        Some(port) => (server.0.clone(), port),
        None => server.clone(),
    };

    (scheme, client, server)
}
