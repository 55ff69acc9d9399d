//! Addresses and endpoints of the IP substrate.
//!
//! The engine never parses IP headers, it only needs addresses to key connections and to sum
//! the pseudo header.
use core::fmt;

/// The family of an address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Version {
    /// Family of the wildcard address, compatible with both.
    Unspecified,
    /// Internet protocol version 4.
    Ipv4,
    /// Internet protocol version 6.
    Ipv6,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Version::Unspecified => "IPv?",
            Version::Ipv4 => "IPv4",
            Version::Ipv6 => "IPv6",
        })
    }
}

enum_with_unknown! {
    /// Protocol numbers of the next header field.
    pub enum Protocol(u8) {
        Icmp = 1,
        Tcp = 6,
        Udp = 17,
        Icmpv6 = 58
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Protocol::Icmp => "ICMP",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmpv6 => "ICMPv6",
            Protocol::Unknown(number) => return write!(f, "protocol {}", number),
        };
        f.write_str(name)
    }
}

/// An IPv4 address in network order.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Ipv4Address(pub [u8; 4]);

impl Ipv4Address {
    /// `0.0.0.0`
    pub const UNSPECIFIED: Ipv4Address = Ipv4Address([0; 4]);

    /// The address `a0.a1.a2.a3`.
    pub const fn new(a0: u8, a1: u8, a2: u8, a3: u8) -> Ipv4Address {
        Ipv4Address([a0, a1, a2, a3])
    }

    /// The four octets.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Read the octets as one big-endian word.
    pub fn to_network_integer(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Whether this is `0.0.0.0`.
    pub fn is_unspecified(&self) -> bool {
        *self == Ipv4Address::UNSPECIFIED
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

/// An IPv6 address in network order.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Ipv6Address(pub [u8; 16]);

impl Ipv6Address {
    /// `::`
    pub const UNSPECIFIED: Ipv6Address = Ipv6Address([0; 16]);

    /// The address with these eight groups, most significant first.
    #[allow(clippy::too_many_arguments)]
    pub fn new(a0: u16, a1: u16, a2: u16, a3: u16, a4: u16, a5: u16, a6: u16, a7: u16)
        -> Ipv6Address
    {
        let groups = [a0, a1, a2, a3, a4, a5, a6, a7];
        let mut octets = [0u8; 16];
        octets.chunks_mut(2)
            .zip(groups.iter())
            .for_each(|(pair, group)| pair.copy_from_slice(&group.to_be_bytes()));
        Ipv6Address(octets)
    }

    /// The sixteen octets.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this is `::`.
    pub fn is_unspecified(&self) -> bool {
        *self == Ipv6Address::UNSPECIFIED
    }

    fn groups(&self) -> impl Iterator<Item=u16> + '_ {
        self.0.chunks(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
    }
}

/// Groups in hex without compressing zero runs.
impl fmt::Display for Ipv6Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut groups = self.groups();
        if let Some(first) = groups.next() {
            write!(f, "{:x}", first)?;
        }
        groups.try_for_each(|group| write!(f, ":{:x}", group))
    }
}

/// An address of either family, or the wildcard.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Address {
    /// No address yet, or any address when listening.
    Unspecified,
    /// An IPv4 address.
    Ipv4(Ipv4Address),
    /// An IPv6 address.
    Ipv6(Ipv6Address),
}

impl Address {
    /// Shorthand for an IPv4 address.
    pub const fn v4(a0: u8, a1: u8, a2: u8, a3: u8) -> Address {
        Address::Ipv4(Ipv4Address::new(a0, a1, a2, a3))
    }

    /// Shorthand for an IPv6 address.
    #[allow(clippy::too_many_arguments)]
    pub fn v6(a0: u16, a1: u16, a2: u16, a3: u16, a4: u16, a5: u16, a6: u16, a7: u16) -> Address {
        Address::Ipv6(Ipv6Address::new(a0, a1, a2, a3, a4, a5, a6, a7))
    }

    /// The octets in network order, empty for the wildcard.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Address::Unspecified => &[],
            Address::Ipv4(addr) => addr.as_bytes(),
            Address::Ipv6(addr) => addr.as_bytes(),
        }
    }

    /// The wildcard and the all zero address of each family.
    pub fn is_unspecified(&self) -> bool {
        match self {
            Address::Unspecified => true,
            Address::Ipv4(addr) => addr.is_unspecified(),
            Address::Ipv6(addr) => addr.is_unspecified(),
        }
    }

    /// The family of the address.
    pub fn version(&self) -> Version {
        match self {
            Address::Unspecified => Version::Unspecified,
            Address::Ipv4(_) => Version::Ipv4,
            Address::Ipv6(_) => Version::Ipv6,
        }
    }
}

impl Default for Address {
    fn default() -> Address {
        Address::Unspecified
    }
}

impl From<Ipv4Address> for Address {
    fn from(addr: Ipv4Address) -> Self {
        Address::Ipv4(addr)
    }
}

impl From<Ipv6Address> for Address {
    fn from(addr: Ipv6Address) -> Self {
        Address::Ipv6(addr)
    }
}

#[cfg(feature = "std")]
impl From<std::net::IpAddr> for Address {
    fn from(addr: std::net::IpAddr) -> Address {
        match addr {
            std::net::IpAddr::V4(v4) => Ipv4Address(v4.octets()).into(),
            std::net::IpAddr::V6(v6) => Ipv6Address(v6.octets()).into(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Unspecified => f.write_str("*"),
            Address::Ipv4(addr) => fmt::Display::fmt(addr, f),
            Address::Ipv6(addr) => fmt::Display::fmt(addr, f),
        }
    }
}

/// Address and port of one side of a connection.
///
/// In a listening configuration an unspecified address or port zero matches anything.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Endpoint {
    /// The address.
    pub addr: Address,
    /// The port, zero when not chosen.
    pub port: u16,
}

impl Endpoint {
    /// The full wildcard.
    pub const UNSPECIFIED: Endpoint = Endpoint { addr: Address::Unspecified, port: 0 };

    /// Pair an address with a port.
    pub fn new(addr: Address, port: u16) -> Endpoint {
        Endpoint { addr, port }
    }

    /// Neither part is a wildcard.
    pub fn is_specified(&self) -> bool {
        self.wildcards() == 0
    }

    /// Whether `concrete` matches, each wildcard part matching anything.
    pub fn accepts(&self, concrete: &Endpoint) -> bool {
        let port = self.port == 0 || self.port == concrete.port;
        let addr = self.addr.is_unspecified() || self.addr == concrete.addr;
        port && addr
    }

    /// How many of address and port are wildcards.
    ///
    /// Lookups prefer the listener with fewer wildcards.
    pub fn wildcards(&self) -> usize {
        usize::from(self.addr.is_unspecified()) + usize::from(self.port == 0)
    }
}

#[cfg(feature = "std")]
impl From<std::net::SocketAddr> for Endpoint {
    fn from(addr: std::net::SocketAddr) -> Endpoint {
        Endpoint::new(addr.ip().into(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Address::Ipv6(_) = self.addr {
            write!(f, "[{}]:{}", self.addr, self.port)
        } else {
            write!(f, "{}:{}", self.addr, self.port)
        }
    }
}

/// The internet checksum of RFC 1071.
///
/// All sums here are one's complement sums before the final inversion.
pub(crate) mod checksum {
    use super::{Address, Protocol};

    fn fold(mut sum: u32) -> u16 {
        while sum > 0xffff {
            sum = (sum >> 16) + (sum & 0xffff);
        }
        sum as u16
    }

    /// Sum of the data as big-endian words, an odd trailing octet padded with zero.
    pub(crate) fn data(data: &[u8]) -> u16 {
        let sum = data.chunks(2)
            .map(|word| match *word {
                [hi, lo] => u32::from(u16::from_be_bytes([hi, lo])),
                [hi] => u32::from(hi) << 8,
                _ => 0,
            })
            .sum();
        fold(sum)
    }

    /// Sum of partial sums.
    pub(crate) fn combine(sums: &[u16]) -> u16 {
        fold(sums.iter().map(|&sum| u32::from(sum)).sum())
    }

    /// Sum of the pseudo header preceding an upper layer segment of `length` octets.
    ///
    /// Panics unless both addresses are IPv4 or both are IPv6.
    pub(crate) fn pseudo_header(src_addr: &Address, dst_addr: &Address,
                                protocol: Protocol, length: u32) -> u16
    {
        let protocol = u8::from(protocol);
        let mut trailer = [0u8; 8];
        let trailer: &[u8] = match (src_addr, dst_addr) {
            (Address::Ipv4(_), Address::Ipv4(_)) => {
                trailer[1] = protocol;
                trailer[2..4].copy_from_slice(&(length as u16).to_be_bytes());
                &trailer[..4]
            },
            (Address::Ipv6(_), Address::Ipv6(_)) => {
                trailer[..4].copy_from_slice(&length.to_be_bytes());
                trailer[7] = protocol;
                &trailer[..]
            },
            _ => panic!("no pseudo header for {} and {}", src_addr, dst_addr),
        };
        combine(&[data(src_addr.as_bytes()), data(dst_addr.as_bytes()), data(trailer)])
    }
}
