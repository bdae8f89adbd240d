//! Client identifier extraction shared by the rate limiter and audit logger.
//!
//! # Resolution Order
//!
//! 1. `X-Forwarded-For` (first hop), then `X-Real-IP`, but only when the
//!    socket peer is a trusted proxy (or no trusted proxies are configured)
//! 2. The socket peer address from axum's `ConnectInfo<SocketAddr>`
//! 3. [`UNKNOWN_IP`]
//!
//! # Security Warning: IP Spoofing Risk
//!
//! With an empty trusted-proxy list every forwarding header is believed.
//! Deploy behind a reverse proxy that overwrites `X-Forwarded-For`, or
//! configure `TRUSTED_PROXIES` so headers from other peers are ignored.
//! All requests without any identifier share the `"unknown"` bucket.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Fallback identifier when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse `10.0.0.0/8`, `::1/128`, or a bare address (implicit /32, /128).
    pub fn parse(cidr: &str) -> Option<Self> {
        let (addr, prefix) = match cidr.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr.trim(), None),
        };
        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = if network.is_ipv4() { 32 } else { 128 };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max_prefix)?,
            None => max_prefix,
        };
        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Proxies whose forwarding headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Invalid CIDR strings are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();
        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// With no ranges configured every peer is trusted.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Extraction
// =============================================================================

fn forwarded_ip<B>(req: &Request<B>) -> Option<&str> {
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next().map(str::trim)
        && !first.is_empty()
    {
        return Some(first);
    }

    req.headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn peer_addr<B>(req: &Request<B>) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Resolve the client identifier, honouring forwarding headers only from
/// trusted peers.
pub fn extract_client_ip_with_validation<B>(
    req: &Request<B>,
    trusted_proxies: &TrustedProxyConfig,
) -> Cow<'static, str> {
    let peer = peer_addr(req);
    let peer_trusted = match peer {
        Some(addr) => trusted_proxies.is_trusted(&addr.ip()),
        // No socket info: only believe headers when nothing is restricted
        None => !trusted_proxies.is_enabled(),
    };

    if let Some(ip) = forwarded_ip(req) {
        if peer_trusted {
            return Cow::Owned(ip.to_string());
        }
        debug!(
            forwarded = %ip,
            peer = ?peer,
            "Ignoring forwarding header from untrusted peer"
        );
    }

    match peer {
        Some(addr) => Cow::Owned(addr.ip().to_string()),
        None => Cow::Borrowed(UNKNOWN_IP),
    }
}

/// Resolve the client identifier trusting any forwarding header.
pub fn extract_client_ip<B>(req: &Request<B>) -> Cow<'static, str> {
    extract_client_ip_with_validation(req, &TrustedProxyConfig::default())
}
