//! Inclusive IPv4/IPv6 address ranges.

use ipnet::{IpNet, Ipv4Subnets, Ipv6Subnets};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::IpRangeError;

/// Address family of an [`IpRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Number of bits in an address.
    pub fn max_bits(self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }

    fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    fn addr(self, num: u128) -> IpAddr {
        match self {
            IpVersion::V4 => IpAddr::V4(Ipv4Addr::from(num as u32)),
            IpVersion::V6 => IpAddr::V6(Ipv6Addr::from(num)),
        }
    }
}

fn ip_to_num(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn parse_ip(text: &str) -> Result<IpAddr, IpRangeError> {
    let trimmed = text.trim();
    trimmed
        .parse::<IpAddr>()
        .map_err(|_| IpRangeError::InvalidAddress(trimmed.to_string()))
}

/// An inclusive range of addresses within one address family.
///
/// # Examples
/// ```
/// use ahrules::IpRange;
///
/// let net: IpRange = "10.0.0.0/8".parse().unwrap();
/// let host: IpRange = "10.1.2.3".parse().unwrap();
/// assert!(net.contains(&host));
/// assert_eq!(net.to_string(), "10.0.0.0/8");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpRange {
    version: IpVersion,
    first: u128,
    last: u128,
}

impl IpRange {
    /// Single-address range.
    pub fn from_ip(ip: IpAddr) -> Self {
        let num = ip_to_num(ip);
        Self {
            version: IpVersion::of(&ip),
            first: num,
            last: num,
        }
    }

    /// CIDR block containing `ip`. Host bits of `ip` are ignored.
    pub fn from_cidr(ip: IpAddr, bits: u32) -> Result<Self, IpRangeError> {
        let version = IpVersion::of(&ip);
        let max = version.max_bits();
        let out_of_range = IpRangeError::BitsOutOfRange { bits, max };
        if bits > u32::from(max) {
            return Err(out_of_range);
        }
        let net = IpNet::new(ip, bits as u8).map_err(|_| out_of_range)?;
        Ok(Self {
            version,
            first: ip_to_num(net.network()),
            last: ip_to_num(net.broadcast()),
        })
    }

    /// Range between two addresses of the same family, in either order.
    pub fn from_range(a: IpAddr, b: IpAddr) -> Result<Self, IpRangeError> {
        let version = IpVersion::of(&a);
        if version != IpVersion::of(&b) {
            return Err(IpRangeError::MismatchedVersions(a.to_string(), b.to_string()));
        }
        let (a, b) = (ip_to_num(a), ip_to_num(b));
        Ok(Self {
            version,
            first: a.min(b),
            last: a.max(b),
        })
    }

    /// Parse a bare address.
    pub fn from_ip_str(text: &str) -> Result<Self, IpRangeError> {
        parse_ip(text).map(Self::from_ip)
    }

    /// Parse `ip/bits`.
    pub fn from_cidr_str(text: &str) -> Result<Self, IpRangeError> {
        let Some((ip, bits)) = text.split_once('/') else {
            return Err(IpRangeError::InvalidAddress(text.trim().to_string()));
        };
        let bits = bits.trim();
        let bits: u32 = bits
            .parse()
            .map_err(|_| IpRangeError::InvalidBitmask(bits.to_string()))?;
        Self::from_cidr(parse_ip(ip)?, bits)
    }

    /// Parse `first-last`.
    pub fn from_range_str(text: &str) -> Result<Self, IpRangeError> {
        let Some((a, b)) = text.split_once('-') else {
            return Err(IpRangeError::InvalidAddress(text.trim().to_string()));
        };
        Self::from_range(parse_ip(a)?, parse_ip(b)?)
    }

    /// Parse an address, a CIDR block or a range, detected from the text.
    pub fn autodetect(text: &str) -> Result<Self, IpRangeError> {
        if text.contains('-') {
            Self::from_range_str(text)
        } else if text.contains('/') {
            Self::from_cidr_str(text)
        } else {
            Self::from_ip_str(text)
        }
    }

    pub fn version(&self) -> IpVersion {
        self.version
    }

    /// First address as a number.
    pub fn first(&self) -> u128 {
        self.first
    }

    /// Last address as a number.
    pub fn last(&self) -> u128 {
        self.last
    }

    pub fn first_addr(&self) -> IpAddr {
        self.version.addr(self.first)
    }

    pub fn last_addr(&self) -> IpAddr {
        self.version.addr(self.last)
    }

    /// Whether `other` lies fully inside this range. Ranges of different
    /// families never contain each other.
    pub fn contains(&self, other: &IpRange) -> bool {
        self.version == other.version && self.first <= other.first && other.last <= self.last
    }

    fn single_block(&self) -> Option<IpNet> {
        match (self.first_addr(), self.last_addr()) {
            (IpAddr::V4(first), IpAddr::V4(last)) => {
                let mut nets = Ipv4Subnets::new(first, last, 0);
                match (nets.next(), nets.next()) {
                    (Some(net), None) => Some(IpNet::V4(net)),
                    _ => None,
                }
            }
            (IpAddr::V6(first), IpAddr::V6(last)) => {
                let mut nets = Ipv6Subnets::new(first, last, 0);
                match (nets.next(), nets.next()) {
                    (Some(net), None) => Some(IpNet::V6(net)),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            return write!(f, "{}", self.first_addr());
        }
        match self.single_block() {
            Some(net) => write!(f, "{}", net),
            None => write!(f, "{}-{}", self.first_addr(), self.last_addr()),
        }
    }
}

impl FromStr for IpRange {
    type Err = IpRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::autodetect(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(text: &str) -> IpRange {
        text.parse().unwrap()
    }

    #[test]
    fn test_containment() {
        assert!(range("10.0.0.0/8").contains(&range("10.1.2.3")));
        assert!(!range("10.0.0.0/8").contains(&range("11.0.0.0/8")));
        assert!(range("10.0.0.0/8").contains(&range("10.0.0.0/8")));
        assert!(!range("10.0.0.0/16").contains(&range("10.0.0.0/8")));
        assert!(range("192.0.2.0-192.0.2.10").contains(&range("192.0.2.3-192.0.2.4")));
    }

    #[test]
    fn test_mixed_families_never_contain() {
        assert!(!range("::/0").contains(&range("10.0.0.1")));
        assert!(!range("0.0.0.0/0").contains(&range("::1")));
        assert!(!range("0.0.0.0/0").contains(&range("::ffff:10.0.0.1")));
    }

    #[test]
    fn test_cidr_ignores_host_bits() {
        let r = range("10.1.2.3/8");
        assert_eq!(r, range("10.0.0.0/8"));
        assert_eq!(r.first_addr().to_string(), "10.0.0.0");
        assert_eq!(r.last_addr().to_string(), "10.255.255.255");
    }

    #[test]
    fn test_range_is_sorted() {
        assert_eq!(range("192.0.2.10-192.0.2.1"), range("192.0.2.1-192.0.2.10"));
    }

    #[test]
    fn test_whitespace_around_separators() {
        assert_eq!(range(" 10.0.0.0 / 8 "), range("10.0.0.0/8"));
        assert_eq!(range("10.0.0.1 - 10.0.0.5"), range("10.0.0.1-10.0.0.5"));
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            IpRange::autodetect("10.0.0.0/33"),
            Err(IpRangeError::BitsOutOfRange { bits: 33, max: 32 })
        );
        assert_eq!(
            IpRange::autodetect("::/129"),
            Err(IpRangeError::BitsOutOfRange { bits: 129, max: 128 })
        );
        assert!(matches!(
            IpRange::autodetect("10.0.0.0/x"),
            Err(IpRangeError::InvalidBitmask(_))
        ));
        assert!(matches!(
            IpRange::autodetect("10.0.0.1-::1"),
            Err(IpRangeError::MismatchedVersions(_, _))
        ));
        assert!(matches!(
            IpRange::autodetect("example.com"),
            Err(IpRangeError::InvalidAddress(_))
        ));
        assert!(IpRange::autodetect("1.2.3.256").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(range("192.0.2.1").to_string(), "192.0.2.1");
        assert_eq!(range("192.0.2.0-192.0.2.255").to_string(), "192.0.2.0/24");
        assert_eq!(range("192.0.2.1-192.0.2.2").to_string(), "192.0.2.1-192.0.2.2");
        assert_eq!(range("192.0.2.0-192.0.2.2").to_string(), "192.0.2.0-192.0.2.2");
        assert_eq!(range("0.0.0.0/0").to_string(), "0.0.0.0/0");
        assert_eq!(range("10.0.0.0/32").to_string(), "10.0.0.0");
    }

    #[test]
    fn test_ipv6() {
        let net = range("2001:DB8::/32");
        assert_eq!(net.version(), IpVersion::V6);
        assert_eq!(net.to_string(), "2001:db8::/32");
        assert!(net.contains(&range("2001:db8:1::1")));
        assert!(!net.contains(&range("2001:db9::1")));
        assert_eq!(range("::/0").to_string(), "::/0");
        assert_eq!(range("::1-::3").to_string(), "::1-::3");
    }
}
