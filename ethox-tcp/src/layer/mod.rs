//! The process logic of the protocol.
//!
//! ## Layering
//!
//! The packet logic lives in `wire` while this module holds the processing part. Three layers
//! cooperate here:
//!
//! * [`ip`] is the contract towards the substrate that moves segments between hosts. The engine
//!   never parses IP headers, it only hands out finished tcp segments together with the address
//!   pair for the pseudo header.
//! * [`socket`] holds everything the application sees: configuration, buffered byte streams and
//!   the queues of outstanding asynchronous requests.
//! * [`tcp`] holds the connection state machine and drives the other two.
//!
//! ## Errors
//!
//! Every application visible status is one variant of [`Error`]. Failures inside segment
//! processing never escape to the caller of [`tcp::Endpoint::segment_arrived`]. Instead a
//! terminating condition is recorded on the socket and delivered to its pending requests.
//!
//! [`Error`]: enum.Error.html
use core::fmt;

pub mod ip;
pub mod socket;
pub mod tcp;

/// The result type of every engine operation.
pub type Result<T> = core::result::Result<T, Error>;

/// Status of a failed operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The socket has not been configured yet.
    NotStarted,

    /// The socket waits for the station address to be assigned.
    NoMapping,

    /// The requested local endpoint is already in use.
    AccessDenied,

    /// The action could not be completed because there were not enough resources.
    ///
    /// Returned when a buffer is full, the backlog of a listener is exhausted or no ephemeral port
    /// is left.
    OutOfResources,

    /// An argument was not valid for the operation or the state of the socket.
    InvalidParameter,

    /// The referenced request or socket does not exist.
    NotFound,

    /// The request was cancelled or the socket was destroyed before it completed.
    Aborted,

    /// The peer did not respond in time.
    Timeout,

    /// The peer has closed its sending side and no more data will arrive.
    ConnectionFin,

    /// The peer reset the connection.
    ConnectionReset,

    /// The peer refused the connection attempt.
    ConnectionRefused,

    /// An ICMP error reported the destination network as unreachable.
    NetworkUnreachable,

    /// An ICMP error reported the destination host as unreachable.
    HostUnreachable,

    /// An ICMP error reported that the remote does not speak tcp.
    ProtocolUnreachable,

    /// An ICMP error reported that no one listens on the remote port.
    PortUnreachable,

    /// Some other ICMP error was reported for the connection.
    IcmpError,

    /// The operation is not implemented by this engine or its substrate.
    Unsupported,

    /// The IP substrate failed to transmit a segment.
    Device,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            Error::NotStarted => "socket not configured",
            Error::NoMapping => "station address not yet assigned",
            Error::AccessDenied => "endpoint already in use",
            Error::OutOfResources => "out of resources",
            Error::InvalidParameter => "invalid parameter",
            Error::NotFound => "not found",
            Error::Aborted => "aborted",
            Error::Timeout => "connection timed out",
            Error::ConnectionFin => "connection closed by peer",
            Error::ConnectionReset => "connection reset",
            Error::ConnectionRefused => "connection refused",
            Error::NetworkUnreachable => "network unreachable",
            Error::HostUnreachable => "host unreachable",
            Error::ProtocolUnreachable => "protocol unreachable",
            Error::PortUnreachable => "port unreachable",
            Error::IcmpError => "icmp error",
            Error::Unsupported => "unsupported",
            Error::Device => "device error",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error { }

/// Can convert from a wire error.
///
/// This indicates the engine tried to operate on a packet but failed.
impl From<crate::wire::Error> for Error {
    fn from(err: crate::wire::Error) -> Self {
        use crate::wire::Error as WireError;
        match err {
            WireError::Unsupported => Error::Unsupported,
            WireError::Truncated
            | WireError::WrongChecksum
            | WireError::Unrecognized
            | WireError::Malformed => Error::InvalidParameter,
        }
    }
}
