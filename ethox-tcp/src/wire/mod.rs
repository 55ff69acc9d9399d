//! Low-level packet access and construction.
//!
//! The `wire` module deals with the packet *representation*. It provides two levels of
//! functionality.
//!
//!  * First, it provides functions to extract fields from sequences of octets, and to insert
//!    fields into sequences of octets. This happens in the `Packet` family of structures, e.g.
//!    [`TcpPacket`].
//!  * Second, in cases where the space of valid field values is much smaller than the space of
//!    possible field values, it provides a compact, high-level representation of packet data
//!    that can be parsed from and emitted into a sequence of octets. This happens through the
//!    `Repr` family of structs, e.g. [`TcpRepr`].
//!
//! The tcp engine never sees link layer or IP headers. The substrate hands it the tcp segment
//! together with the pair of addresses from the IP header, which is all that is needed for the
//! pseudo header checksum.
//!
//! [`TcpPacket`]: struct.TcpPacket.html
//! [`TcpRepr`]: struct.TcpRepr.html
mod error;
pub mod icmp;
pub mod ip;
pub mod tcp;

pub use self::error::{Error, Result};

pub use self::icmp::IcmpError;

pub use self::ip::{
    Address as IpAddress,
    Endpoint as IpEndpoint,
    Ipv4Address,
    Ipv6Address,
    Protocol as IpProtocol,
    Version as IpVersion};

pub use self::tcp::{
    Flags as TcpFlags,
    Options as TcpOptions,
    Packet as TcpPacket,
    Repr as TcpRepr,
    SeqNumber as TcpSeqNumber,
    Timestamp as TcpTimestamp,
    TcpOption};

/// Abstraction for checksum behaviour.
///
/// The checksum requires calculating a pseudo header for the upper layer protocol consisting of
/// src and dst address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    /// Always fill the checksum and check if it exists.
    Manual {
        /// The source address of the enclosing IP packet.
        src_addr: IpAddress,
        /// The destination address of the enclosing IP packet.
        dst_addr: IpAddress,
    },

    /// Never inspect the checksum.
    ///
    /// This assumes that some layer below has already performed the necessary checks.
    Ignored,
}

pub(crate) mod field {
    pub type Field = ::core::ops::Range<usize>;
}
