//! Trusted-proxy predicate and client address resolution.

use crate::error::WorkerError;
use std::net::IpAddr;
use std::str::FromStr;

/// Decides whether an address belongs to a proxy allowed to report the
/// client's address in `X-Forwarded-For`.
pub trait ProxyTrust: Send + Sync {
    fn is_trusted(&self, ip: &str) -> bool;
}

impl<F> ProxyTrust for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_trusted(&self, ip: &str) -> bool {
        self(ip)
    }
}

/// An address range in CIDR notation. A bare address is a single-host range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for IpRange {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WorkerError::InvalidProxyRange(s.to_string());
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s.trim(), None),
        };
        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }
}

/// The configured set of trusted proxy ranges.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    ranges: Vec<IpRange>,
}

impl TrustedProxies {
    pub fn parse<S: AsRef<str>>(ranges: &[S]) -> Result<Self, WorkerError> {
        let ranges = ranges
            .iter()
            .map(|r| r.as_ref().parse())
            .collect::<Result<Vec<IpRange>, _>>()?;
        Ok(Self { ranges })
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl ProxyTrust for TrustedProxies {
    fn is_trusted(&self, ip: &str) -> bool {
        match ip.parse::<IpAddr>() {
            Ok(ip) => self.ranges.iter().any(|range| range.contains(ip)),
            Err(_) => false,
        }
    }
}

/// Resolves the externally visible address of a client.
///
/// If the direct peer is a trusted proxy, `X-Forwarded-For` is walked from the
/// most recently appended entry backwards and the first untrusted entry is the
/// client. Blank entries are skipped. If every entry is trusted the direct
/// address is kept.
pub fn resolve_client_ip(direct: &str, forwarded_for: Option<&str>, trust: &dyn ProxyTrust) -> String {
    if !trust.is_trusted(direct) {
        return direct.to_string();
    }
    forwarded_for
        .unwrap_or_default()
        .split(',')
        .rev()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .find(|ip| !trust.is_trusted(ip))
        .unwrap_or(direct)
        .to_string()
}
