//! A standalone tcp protocol engine.
//!
//! The crate implements the connection state machine, segment processing, congestion control,
//! retransmission and flow control of TCP on top of an unreliable IP substrate that the user
//! provides. It also carries the socket layer that bridges asynchronous application requests to
//! the engine: buffered send and receive queues with watermarks and the completion tokens of
//! connect, accept, send, receive and close operations.
//!
//! ## Structure
//!
//! The engine follows the same split as the `ethox` network stack:
//!
//! * [`wire`] contains the packet formats, the tcp header and option codec and the internet
//!   checksum.
//! * [`layer`] contains the protocol logic. [`layer::tcp::Endpoint`] owns every socket and
//!   connection, the tables used to look them up and the tick counter. All entry points, both
//!   from the application and from the IP substrate, are methods on this one value.
//! * [`storage`] provides the reference counted buffers from which segments are built.
//! * [`managed`] contains the arena holding the sockets.
//! * [`time`] contains the tick clock that drives all timers.
//!
//! ## Driving the engine
//!
//! The user supplies an implementation of [`layer::ip::Network`] that transmits fully formed
//! segments. Inbound segments are handed to [`layer::tcp::Endpoint::segment_arrived`], and the
//! user calls [`layer::tcp::Endpoint::tick`] every 200 milliseconds. Completed application
//! requests are collected with [`layer::tcp::Endpoint::completions`].
//!
//! ## Logging
//!
//! With the `log` feature enabled, state transitions, dropped segments and timer events are
//! reported through the `log` crate. Without it the logging statements compile to nothing.
#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

extern crate alloc;

#[macro_use]
mod macros;

pub mod layer;
pub mod managed;
pub mod storage;
pub mod time;
pub mod wire;
