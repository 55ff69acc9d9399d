//! The application facing half of a connection.
//!
//! A socket buffers the byte streams in both directions and keeps the asynchronous requests of the
//! application until the protocol can complete them. It never inspects segments. The tcp layer
//! calls its notifications when data was acknowledged or delivered and when the connection
//! changed its state, which are the only places where buffer occupancy changes and where requests
//! are woken.
//!
//! ## Request queues
//!
//! Connect and close requests occupy a single slot each. Accept, receive and send requests are
//! kept in FIFO queues. Send requests move through two queues: they wait in the first until the
//! send buffer has room above its low water mark, then their data is appended to the buffer and
//! they wait in the second until all of that data was acknowledged.
//!
//! ## Configuration
//!
//! A fresh socket is unconfigured and refuses every operation except configuration. A socket
//! configured to use the station address while the engine has none is address pending, its
//! operations fail with `NoMapping` until the address is assigned.
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::layer::{Error, Result};
use crate::layer::tcp::Cb;
use crate::managed::Key;

mod buffer;
mod config;
mod interface;
mod notify;
mod token;

pub(crate) use self::buffer::{RecvBuffer, SendBuffer};
pub(crate) use self::notify::Deferred;
pub(crate) use self::token::{Pending, Sink};

pub use self::config::{
    Bound,
    Config,
    Options,
    Resolved,
    BACKLOG,
    CONNECTION_TIMEOUT,
    DATA_RETRIES,
    FIN_WAIT2_TIMEOUT,
    KEEPALIVE_INTERVAL,
    KEEPALIVE_PROBES,
    KEEPALIVE_TIME,
    RECEIVE_BUFFER,
    SEND_BUFFER,
    TIME_WAIT_TIMEOUT};

pub use self::interface::ModeData;

pub use self::token::{
    CloseToken,
    Completion,
    ConnectToken,
    EventId,
    ListenToken,
    Outcome,
    Received,
    RxToken,
    TxToken};

/// The life cycle of a socket as seen by the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketState {
    /// Not configured.
    Unconfigured,
    /// Configured but without a connection.
    Closed,
    /// Waiting for incoming connections.
    Listening,
    /// Opening a connection.
    Connecting,
    /// The connection is established.
    Connected,
    /// Closing the connection.
    Disconnecting,
}

/// Which operations a socket permits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConfigMode {
    /// No configuration yet.
    Unconfigured,
    /// Configured to connect.
    Active,
    /// Configured to listen.
    Passive,
    /// Configured but waiting for the station address.
    AddressPending,
}

/// A socket and the control block of its connection.
#[derive(Debug)]
pub(crate) struct Socket {
    pub state: SocketState,
    pub mode: ConfigMode,
    pub config: Option<Config>,
    pub options: Resolved,
    pub snd: SendBuffer,
    pub rcv: RecvBuffer,
    /// The listener this socket was spawned from, until it is accepted.
    pub parent: Option<Key>,
    /// Spawned sockets not yet accepted.
    pub children: Vec<Key>,
    pub connect_token: Option<ConnectToken>,
    pub close_token: Option<CloseToken>,
    pub listen_queue: VecDeque<ListenToken>,
    pub rcv_queue: VecDeque<RxToken>,
    pub snd_queue: VecDeque<TxToken>,
    pub processing: VecDeque<Pending>,
    /// The last error, reported to requests failed by a flush.
    pub error: Option<Error>,
    /// The peer closed its side.
    pub no_more_data: bool,
    pub in_destroy: bool,
    pub cb: Cb,
}

impl Socket {
    pub fn new() -> Self {
        let options = Resolved::default();
        Socket {
            state: SocketState::Unconfigured,
            mode: ConfigMode::Unconfigured,
            config: None,
            options,
            snd: SendBuffer::new(options.send_buffer),
            rcv: RecvBuffer::new(options.receive_buffer),
            parent: None,
            children: Vec::new(),
            connect_token: None,
            close_token: None,
            listen_queue: VecDeque::new(),
            rcv_queue: VecDeque::new(),
            snd_queue: VecDeque::new(),
            processing: VecDeque::new(),
            error: None,
            no_more_data: false,
            in_destroy: false,
            cb: Cb::new(),
        }
    }

    /// Create the socket of a connection requested at a listener.
    ///
    /// Only the options are inherited, queues and buffers start empty.
    pub fn spawn(&self, parent: Key) -> Self {
        let mut child = Socket::new();
        child.state = SocketState::Connecting;
        // An accepted connection behaves like one opened actively.
        child.mode = ConfigMode::Active;
        child.config = self.config.map(|config| Config { active: true, ..config });
        child.apply(self.options);
        child.parent = Some(parent);
        child.cb = self.cb.spawn();
        child
    }

    /// Install resolved options.
    pub fn apply(&mut self, options: Resolved) {
        self.options = options;
        self.snd = SendBuffer::new(options.send_buffer);
        self.rcv = RecvBuffer::new(options.receive_buffer);
        self.cb.apply(&options);
    }

    /// Check that the configuration permits application requests.
    pub fn check_configured(&self) -> Result<()> {
        match self.mode {
            ConfigMode::Unconfigured => Err(Error::NotStarted),
            ConfigMode::AddressPending => Err(Error::NoMapping),
            ConfigMode::Active | ConfigMode::Passive => Ok(()),
        }
    }

    /// Whether a request with this identity is outstanding.
    pub fn has_event(&self, event: EventId) -> bool {
        self.connect_token.map_or(false, |token| token.event == event)
            || self.close_token.map_or(false, |token| token.event == event)
            || self.listen_queue.iter().any(|token| token.event == event)
            || self.rcv_queue.iter().any(|token| token.event == event)
            || self.snd_queue.iter().any(|token| token.event == event)
            || self.processing.iter().any(|pending| pending.token.event == event)
    }

    /// Record the error reported to requests failed from now on.
    pub fn set_error(&mut self, error: Error) {
        self.error = Some(error);
    }

    /// Fail every outstanding request with the last error.
    ///
    /// A close that completed successfully has already taken its token.
    pub fn flush_tokens(&mut self, sink: &mut Sink) {
        let error = self.error.unwrap_or(Error::Aborted);
        if let Some(token) = self.connect_token.take() {
            sink.signal(token.event, Outcome::Connect(Err(error)));
        }
        if let Some(token) = self.close_token.take() {
            sink.signal(token.event, Outcome::Close(Err(error)));
        }
        for token in self.listen_queue.drain(..) {
            sink.signal(token.event, Outcome::Accept(Err(error)));
        }
        for token in self.rcv_queue.drain(..) {
            sink.signal(token.event, Outcome::Receive(Err(error)));
        }
        for token in self.snd_queue.drain(..) {
            sink.signal(token.event, Outcome::Send(Err(error)));
        }
        for pending in self.processing.drain(..) {
            sink.signal(pending.token.event, Outcome::Send(Err(error)));
        }
    }

    /// Fail requests and drop all buffered data.
    pub fn flush(&mut self, sink: &mut Sink) {
        self.flush_tokens(sink);
        self.snd.clear();
        self.rcv.clear();
    }

    /// Cancel one or all outstanding requests.
    ///
    /// Searches the connect slot, then the accept, receive, send and processing queues. Without
    /// an event every request found is aborted and the call always succeeds. With an event only
    /// the first match is aborted.
    pub fn cancel(&mut self, event: Option<EventId>, sink: &mut Sink) -> Result<()> {
        let matches = |candidate: EventId| event.map_or(true, |event| event == candidate);
        let mut found = false;

        if let Some(token) = self.connect_token {
            if matches(token.event) {
                self.connect_token = None;
                sink.signal(token.event, Outcome::Connect(Err(Error::Aborted)));
                found = true;
            }
        }

        if !found || event.is_none() {
            found |= cancel_in(&mut self.listen_queue, |t| t.event, &matches, event.is_some(),
                |t| sink.signal(t.event, Outcome::Accept(Err(Error::Aborted))));
        }
        if !found || event.is_none() {
            found |= cancel_in(&mut self.rcv_queue, |t| t.event, &matches, event.is_some(),
                |t| sink.signal(t.event, Outcome::Receive(Err(Error::Aborted))));
        }
        if !found || event.is_none() {
            found |= cancel_in(&mut self.snd_queue, |t| t.event, &matches, event.is_some(),
                |t| sink.signal(t.event, Outcome::Send(Err(Error::Aborted))));
        }
        if !found || event.is_none() {
            found |= cancel_in(&mut self.processing, |p| p.token.event, &matches, event.is_some(),
                |p| sink.signal(p.token.event, Outcome::Send(Err(Error::Aborted))));
        }

        match event {
            Some(_) if !found => Err(Error::NotFound),
            _ => Ok(()),
        }
    }

    /// Whether the socket has been synchronized with a peer at some point.
    pub fn is_connected(&self) -> bool {
        self.state == SocketState::Connected
    }
}

/// Remove matching entries of a queue, stopping after the first if `single`.
fn cancel_in<T>(
    queue: &mut VecDeque<T>,
    event_of: impl Fn(&T) -> EventId,
    matches: &impl Fn(EventId) -> bool,
    single: bool,
    mut signal: impl FnMut(T),
) -> bool {
    let mut found = false;
    let mut idx = 0;
    while idx < queue.len() {
        if !matches(event_of(&queue[idx])) {
            idx += 1;
            continue;
        }
        if let Some(item) = queue.remove(idx) {
            signal(item);
        }
        found = true;
        if single {
            break;
        }
    }
    found
}
