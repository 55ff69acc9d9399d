//! Buffers from which segments are built.
//!
//! A segment may be referenced at the same time from the retransmission queue and from a packet
//! that is currently handed to the IP substrate, and a received segment is shared between the
//! reassembly queue and the socket receive buffer. Instead of counting references by hand the
//! [`NetBuf`] shares its bytes behind an `Arc` and every trimming operation returns a new view of
//! the same storage. Nothing ever mutates bytes that another view might observe.
mod netbuf;
mod queue;

pub use self::netbuf::NetBuf;
pub use self::queue::BufQueue;
