use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;
use tungstenite::http::Request;

/// Errors parsing a CIDR block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CidrError {
    /// Missing `/prefix` part.
    #[error("missing prefix length in {0:?}")]
    MissingPrefix(String),
    /// The address part is not an IP address.
    #[error("invalid address in {0:?}")]
    Address(String),
    /// The prefix is not a number or too long for the address family.
    #[error("invalid prefix length in {0:?}")]
    Prefix(String),
}

/// An IPv4 or IPv6 network such as `10.0.0.0/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Returns `true` if `ip` lies inside this network.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (ip, self.addr) {
            (IpAddr::V4(ip), IpAddr::V4(net)) => {
                // prefix 0 would overflow the shift
                let mask = if self.prefix == 0 {
                    0
                } else {
                    !((1u32 << (32 - self.prefix)) - 1)
                };
                (u32::from(ip) & mask) == (u32::from(net) & mask)
            }
            (IpAddr::V6(ip), IpAddr::V6(net)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    !((1u128 << (128 - self.prefix)) - 1)
                };
                (u128::from(ip) & mask) == (u128::from(net) & mask)
            }
            _ => false,
        }
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| CidrError::MissingPrefix(s.to_owned()))?;
        let addr: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| CidrError::Address(s.to_owned()))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|_| CidrError::Prefix(s.to_owned()))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(CidrError::Prefix(s.to_owned()));
        }
        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Resolves the client IP of an upgrade request.
///
/// `X-Forwarded-For` is only honoured when the peer is one of `trusted`;
/// its first hop is the original client. Anything else falls back to the
/// peer address.
pub fn extract_client_ip<B>(request: &Request<B>, peer: &SocketAddr, trusted: &[Cidr]) -> IpAddr {
    let peer_ip = peer.ip();
    if !trusted.iter().any(|net| net.contains(peer_ip)) {
        return peer_ip;
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|hop| hop.trim().parse::<IpAddr>().ok())
        .unwrap_or(peer_ip)
}
