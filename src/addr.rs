//! Peer endpoint representation: a tagged `V4`/`V6` form so equality is
//! structural rather than comparing OS-level socket-address blobs (spec.md
//! section 9 "Address representation").

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// A resolved peer endpoint. Two endpoints compare equal iff family and the
/// family-sized address+port bytes match (spec.md section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerAddr {
    V4(Ipv4Addr, u16),
    V6(Ipv6Addr, u16, u32, u32),
}

impl PeerAddr {
    pub fn port(&self) -> u16 {
        match self {
            PeerAddr::V4(_, port) => *port,
            PeerAddr::V6(_, port, _, _) => *port,
        }
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(a) => PeerAddr::V4(*a.ip(), a.port()),
            SocketAddr::V6(a) => PeerAddr::V6(*a.ip(), a.port(), a.flowinfo(), a.scope_id()),
        }
    }
}

impl From<PeerAddr> for SocketAddr {
    fn from(addr: PeerAddr) -> Self {
        match addr {
            PeerAddr::V4(ip, port) => SocketAddr::new(IpAddr::V4(ip), port),
            PeerAddr::V6(ip, port, flowinfo, scope_id) => {
                SocketAddr::V6(std::net::SocketAddrV6::new(ip, port, flowinfo, scope_id))
            }
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::V4(ip, port) => write!(f, "{ip}:{port}"),
            PeerAddr::V6(ip, port, _, _) => write!(f, "[{ip}]:{port}"),
        }
    }
}

/// Parse a `host` or `host:port` dial string where `host` is a numeric IPv4
/// or IPv6 literal — no DNS lookup is ever performed (spec.md section 4.1:
/// "run numeric-only address resolution (no DNS)").
///
/// Splits on the *last* `:` so bare IPv6 literals without brackets still
/// parse as host-only (falling back to the default port) rather than
/// misreading a trailing hex group as a port.
pub fn parse_dial_address(input: &str, default_port: u16) -> Option<PeerAddr> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Bracketed IPv6 with an explicit port: "[::1]:1234"
    if let Some(rest) = trimmed.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let ip = Ipv6Addr::from_str(host).ok()?;
        let port = match after.strip_prefix(':') {
            Some(p) => p.parse::<u16>().ok()?,
            None if after.is_empty() => default_port,
            None => return None,
        };
        return Some(PeerAddr::V6(ip, port, 0, 0));
    }

    // Bare IPv6 (multiple colons, no brackets): whole string is the host.
    if trimmed.matches(':').count() > 1 {
        let ip = Ipv6Addr::from_str(trimmed).ok()?;
        return Some(PeerAddr::V6(ip, default_port, 0, 0));
    }

    // IPv4, optionally with a trailing ":port".
    match trimmed.rsplit_once(':') {
        Some((host, port_str)) => {
            let ip = Ipv4Addr::from_str(host).ok()?;
            let port = port_str.parse::<u16>().ok()?;
            Some(PeerAddr::V4(ip, port))
        }
        None => {
            let ip = Ipv4Addr::from_str(trimmed).ok()?;
            Some(PeerAddr::V4(ip, default_port))
        }
    }
}
