//! Asynchronous requests and their completions.
//!
//! Every request the application hands to a socket carries an [`EventId`] chosen by the
//! application. When the request finishes, successfully or not, a [`Completion`] with the same id
//! is queued on the engine. The id also serves as identity for cancellation, which is why a socket
//! rejects a request whose id already appears in one of its queues.
//!
//! [`EventId`]: struct.EventId.html
//! [`Completion`]: struct.Completion.html
use alloc::collections::VecDeque;

use crate::layer::{Error, Result};
use crate::managed::Key;
use crate::storage::NetBuf;

/// Identifies a request and its completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

/// Request to open a connection actively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectToken {
    /// Identity of the completion.
    pub event: EventId,
}

/// Request to accept the next incoming connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenToken {
    /// Identity of the completion.
    pub event: EventId,
}

/// Request to transmit data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxToken {
    /// Identity of the completion.
    pub event: EventId,
    /// The bytes to send. Must not be empty.
    pub data: NetBuf,
    /// Ask the peer to deliver everything up to the end of this data without delay.
    pub push: bool,
    /// Mark the data as urgent.
    pub urgent: bool,
}

/// Request to receive data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxToken {
    /// Identity of the completion.
    pub event: EventId,
    /// The maximum number of bytes to deliver. Must not be zero.
    pub capacity: usize,
}

/// Request to close the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseToken {
    /// Identity of the completion.
    pub event: EventId,
    /// Reset the connection instead of closing it gracefully.
    pub abort: bool,
}

/// Data handed to a receive request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Received {
    /// The bytes, at most the requested capacity.
    pub data: NetBuf,
    /// Whether the bytes were sent as urgent data.
    ///
    /// Urgent and normal data are never mixed in one completion.
    pub urgent: bool,
}

/// The result of a finished request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A connect request finished.
    Connect(Result<()>),
    /// An accept request finished with the key of the new socket.
    Accept(Result<Key>),
    /// A send request finished, all of its data was acknowledged.
    Send(Result<()>),
    /// A receive request finished.
    Receive(Result<Received>),
    /// A close request finished.
    Close(Result<()>),
}

/// A finished request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    /// The socket the request was made on.
    pub socket: Key,
    /// The identity the application chose for the request.
    pub event: EventId,
    /// What happened.
    pub outcome: Outcome,
}

impl Outcome {
    /// The error, if the request failed.
    pub fn error(&self) -> Option<Error> {
        match self {
            Outcome::Connect(Err(err))
            | Outcome::Send(Err(err))
            | Outcome::Close(Err(err)) => Some(*err),
            Outcome::Accept(Err(err)) => Some(*err),
            Outcome::Receive(Err(err)) => Some(*err),
            _ => None,
        }
    }
}

/// A send request whose data is not yet fully acknowledged.
#[derive(Clone, Debug)]
pub(crate) struct Pending {
    pub token: TxToken,
    /// Bytes of the request still waiting for acknowledgement.
    pub remaining: usize,
}

/// Where a socket puts its completions.
pub(crate) struct Sink<'a> {
    pub socket: Key,
    pub out: &'a mut VecDeque<Completion>,
}

impl Sink<'_> {
    pub fn signal(&mut self, event: EventId, outcome: Outcome) {
        net_trace!("socket {:?}: completing event {}", self.socket, event.0);
        self.out.push_back(Completion {
            socket: self.socket,
            event,
            outcome,
        });
    }
}
