//! Client IP extraction shared by the request adapter, auth and rate limiting.
//!
//! # Header Priority
//!
//! 1. `X-Forwarded-For` (first IP in the comma-separated list)
//! 2. `X-Real-IP`
//! 3. The TCP peer address, when the server was started with connect info
//! 4. [`UNKNOWN_IP`]
//!
//! # IP Spoofing
//!
//! Forwarding headers are client-controlled. When trusted proxies are
//! configured, [`extract_client_ip_with_validation`] only honours them if
//! the TCP peer is inside one of the trusted CIDR ranges; otherwise the peer
//! address itself is used.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Fallback IP value when no client IP can be determined.
///
/// All requests without identifiable IPs share this key for rate limiting.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// A bare IP is accepted as a /32 or /128. Returns `None` if invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let parts: Vec<&str> = cidr.trim().split('/').collect();

        if parts.len() != 2 {
            if let Ok(ip) = parts.first()?.parse::<IpAddr>() {
                let prefix_len = match ip {
                    IpAddr::V4(_) => 32,
                    IpAddr::V6(_) => 128,
                };
                return Some(Self {
                    network: ip,
                    prefix_len,
                });
            }
            return None;
        }

        let ip: IpAddr = parts.first()?.parse().ok()?;
        let prefix_len: u8 = parts.get(1)?.parse().ok()?;

        let max_prefix = match ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        if prefix_len > max_prefix {
            return None;
        }

        Some(Self {
            network: ip,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Trusted reverse proxy ranges.
///
/// Empty means every peer is trusted, which is the historical behaviour of
/// header-based extraction.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings; invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in trustedProxies, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// `true` if the IP is in a configured range, or if none are configured.
    pub fn is_trusted(&self, ip_str: &str) -> bool {
        if self.ranges.is_empty() {
            return true;
        }

        match ip_str.parse::<IpAddr>() {
            Ok(ip) => self.ranges.iter().any(|range| range.contains(&ip)),
            Err(_) => false,
        }
    }
}

// =============================================================================
// Extraction
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    FromXff(&'a str),
    FromRealIp(&'a str),
    NotFound,
}

#[inline]
fn extract_ip_from_headers<B>(req: &Request<B>) -> ExtractedIp<'_> {
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
    {
        return ExtractedIp::FromXff(first_ip.trim());
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
    {
        return ExtractedIp::FromRealIp(value.trim());
    }

    ExtractedIp::NotFound
}

/// TCP peer address, available when served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
#[inline]
pub fn peer_addr<B>(req: &Request<B>) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

fn peer_or_unknown<B>(req: &Request<B>) -> Cow<'static, str> {
    match peer_addr(req) {
        Some(addr) => Cow::Owned(addr.ip().to_string()),
        None => Cow::Borrowed(UNKNOWN_IP),
    }
}

/// Extract the client IP, honouring forwarding headers only from trusted peers.
///
/// Returns `Cow::Borrowed(UNKNOWN_IP)` without allocating when nothing is known.
#[inline]
pub fn extract_client_ip_with_validation<B>(
    req: &Request<B>,
    trusted_proxies: &TrustedProxyConfig,
) -> Cow<'static, str> {
    if trusted_proxies.is_enabled()
        && let Some(peer) = peer_addr(req)
    {
        let peer_ip = peer.ip().to_string();
        if !trusted_proxies.is_trusted(&peer_ip) {
            if extract_ip_from_headers(req) != ExtractedIp::NotFound {
                debug!(
                    peer = %peer_ip,
                    "Ignoring forwarding headers from untrusted peer"
                );
            }
            return Cow::Owned(peer_ip);
        }
    }

    match extract_ip_from_headers(req) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => Cow::Owned(ip.to_string()),
        ExtractedIp::NotFound => peer_or_unknown(req),
    }
}

/// Extract the client IP without trusted proxy validation.
#[inline]
pub fn extract_client_ip<B>(req: &Request<B>) -> Cow<'static, str> {
    match extract_ip_from_headers(req) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => Cow::Owned(ip.to_string()),
        ExtractedIp::NotFound => peer_or_unknown(req),
    }
}
