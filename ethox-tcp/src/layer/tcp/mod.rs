//! The TCP layer.
//!
//! Implements the connection state machine of RFC793 with the congestion control of RFC5681 and
//! RFC6582 (NewReno), the retransmission timer of RFC6298 and the window scale and timestamp
//! options of RFC7323.
//!
//! ## Structure
//!
//! The [`Endpoint`] owns every socket in one slotmap. Each socket embeds the control block of its
//! connection, so a [`Key`] identifies both. Two tables index the control blocks: the active
//! table maps a four tuple of local and remote endpoints to a key, the listen table holds
//! listeners whose endpoints may contain wildcards. An incoming segment is looked up by its four
//! tuple first. Only a SYN falls back to the listener with the fewest wildcards.
//!
//! [`Endpoint`]: struct.Endpoint.html
//! [`Key`]: ../../managed/struct.Key.html
//!
//! Processing of one connection works on an `Operator`, a bundle of the socket, the IP substrate,
//! the current tick and the completion queue. Effects that touch another socket, such as waking
//! the accept request of a listener when its child became established, are collected as deferred
//! actions and applied by the endpoint once the connection is done. No borrow of a socket is ever
//! held while another one is modified.
//!
//! ## Timers
//!
//! Six timers exist per connection: connection establishment, retransmission, zero window probe,
//! keepalive, FIN_WAIT_2 and TIME_WAIT. Arming a timer only records its expiry tick. The user
//! calls [`Endpoint::tick`] five times per second, which is the only place handlers run. Each
//! timer is disabled before its handler so that the handler may arm it again.
//!
//! [`Endpoint::tick`]: struct.Endpoint.html#method.tick
//!
//! ## Deviations
//!
//! An incoming packet without a matching connection is answered with a RST unless it carries a
//! RST itself. RFC793 is clear about this [in section Reset
//! Generation](https://tools.ietf.org/html/rfc793#page-36):
//!
//! > 1.  If the connection does not exist (CLOSED) then a reset is sent in response to any
//! incoming segment except another reset.
//!
//! A second FIN, or data following a FIN, resets the connection instead of being ignored. Data in
//! a SYN is queued and delivered once the connection is established.
//!
//! The window retraction rule of RFC7323 is applied with a slack of `2^scale` bytes, the exponent
//! can be raised with [`EngineConfig::retraction_slack`].
//!
//! [`EngineConfig::retraction_slack`]: struct.EngineConfig.html#structfield.retraction_slack
mod congestion;
mod connection;
mod dispatch;
mod endpoint;
mod icmp;
mod input;
mod operator;
mod option;
mod output;
mod siphash;
mod table;
mod timer;

#[cfg(test)]
mod tests;

pub(crate) use connection::{Cb, Segment};
pub(crate) use dispatch::Request;
pub(crate) use operator::Operator;

pub use connection::{
    Congestion,
    State,
    Timer};

pub use endpoint::{
    Endpoint,
    EngineConfig};

pub use icmp::{
    IcmpAction,
    IcmpPolicy,
    DefaultIcmpPolicy};

pub use table::FourTuple;

// publically exposed for initialization.
pub use siphash::IsnGenerator;

/// The maximum segment size assumed when the peer announces none.
pub const DEFAULT_MSS: u16 = 536;

/// The smallest maximum segment size accepted from a peer.
pub const MIN_MSS: u16 = 64;

/// The largest window that fits the header field.
pub const MAX_WINDOW: u32 = 0xffff;

/// Shift of the fixed point smoothed round trip time and variance.
pub const RTT_SHIFT: u32 = 3;

/// Consecutive timeouts after which the round trip estimate is discarded.
pub const FOLD_RTT: u32 = 4;

/// Initial retransmission timeout, in ticks.
pub const RTO_DEFAULT: u32 = 3 * crate::time::TICK_HZ;

/// Lower bound of the retransmission timeout, in ticks.
pub const RTO_MIN: u32 = crate::time::TICK_HZ;

/// Upper bound of the retransmission timeout, in ticks.
pub const RTO_MAX: u32 = 60 * crate::time::TICK_HZ;
