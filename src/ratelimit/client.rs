//! Client key resolution.

use std::net::SocketAddr;

/// Key used when neither the forwarded chain nor the peer address yields anything.
const UNKNOWN_CLIENT: &str = "unknown";

/// A key that identifies one rate limit bucket.
///
/// The key is derived from network metadata only: the first address of the
/// forwarded-address chain, or the host part of the transport peer address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Wrap an already-resolved key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Resolve a key from a forwarded-address header value and a peer address.
    ///
    /// The forwarded value lists addresses from the originating client to the
    /// nearest proxy, separated by commas and/or whitespace; its first entry
    /// wins. Without one, the port is stripped from `peer`. Resolution never
    /// fails: an address that does not parse is used as-is.
    pub fn resolve(forwarded: Option<&str>, peer: &str) -> Self {
        if let Some(first) = forwarded.and_then(first_forwarded) {
            return Self(first.to_string());
        }

        Self(strip_port(peer))
    }

    /// Resolve from raw header bytes and an optional socket address.
    ///
    /// Header bytes that are not valid UTF-8 are read lossily rather than
    /// dropped, so a malformed header still maps to a stable key.
    pub fn from_parts(forwarded: Option<&[u8]>, peer: Option<SocketAddr>) -> Self {
        let forwarded = forwarded.map(String::from_utf8_lossy);
        let peer = peer.map(|addr| addr.to_string()).unwrap_or_default();
        Self::resolve(forwarded.as_deref(), &peer)
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn first_forwarded(value: &str) -> Option<&str> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .find(|part| !part.is_empty())
}

fn strip_port(peer: &str) -> String {
    let peer = peer.trim();

    if let Ok(addr) = peer.parse::<SocketAddr>() {
        return addr.ip().to_string();
    }

    match peer.rsplit_once(':') {
        Some((host, _)) if !host.is_empty() => host.to_string(),
        _ if !peer.is_empty() => peer.to_string(),
        _ => UNKNOWN_CLIENT.to_string(),
    }
}
