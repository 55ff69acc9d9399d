//! The operations of the application on its sockets.
//!
//! Every method takes the endpoint mutably and addresses the socket by its key. Requests that
//! cannot complete at once are queued on the socket, their outcome arrives later as a
//! `Completion` from `Endpoint::completions`.
use alloc::vec::Vec;

use crate::layer::{Error, Result};
use crate::layer::ip::{Network, Route, RouteChange};
use crate::layer::tcp::{Cb, Congestion, Endpoint, FourTuple, Request, State};
use crate::managed::Key;
use crate::wire::{IpAddress, IpEndpoint, IpVersion};

use super::{
    CloseToken,
    Config,
    ConfigMode,
    ConnectToken,
    EventId,
    ListenToken,
    Outcome,
    Resolved,
    RxToken,
    Sink,
    Socket,
    SocketState,
    TxToken};

/// First port of the ephemeral range.
const EPHEMERAL_START: u16 = 1024;
/// Number of ports in the ephemeral range.
const EPHEMERAL_PORTS: u32 = 65536 - EPHEMERAL_START as u32;

/// A snapshot of a socket and its connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModeData {
    /// The configuration, `None` if unconfigured.
    pub config: Option<Config>,
    pub mode: ConfigMode,
    pub socket_state: SocketState,
    /// The connection state.
    pub state: State,
    /// The bound local endpoint.
    pub local: IpEndpoint,
    pub remote: IpEndpoint,
    /// Largest segment sent to the peer.
    pub snd_mss: u16,
    /// Largest segment announced to the peer.
    pub rcv_mss: u16,
    pub snd_wnd_scale: u8,
    pub rcv_wnd_scale: u8,
    /// The send window, in bytes.
    pub snd_wnd: u32,
    /// The receive window, in bytes.
    pub rcv_wnd: u32,
    /// Current retransmission timeout, in ticks.
    pub rto: u32,
    pub cwnd: u32,
    pub ssthresh: u32,
    pub congestion: Congestion,
    /// The last error reported for the connection without closing it.
    pub soft_error: Option<Error>,
    pub options: Resolved,
}

impl<N: Network> Endpoint<N> {
    /// Create an unconfigured socket.
    pub fn create(&mut self) -> Key {
        let key = self.sockets.insert(Socket::new());
        net_debug!("socket {:?}: created", key);
        key
    }

    /// Destroy a socket.
    ///
    /// Resets a live connection, fails every outstanding request and destroys the connections of
    /// a listener that were not yet accepted.
    pub fn destroy(&mut self, socket: Key) -> Result<()> {
        let sock = self.sockets.get_mut(socket).ok_or(Error::NotFound)?;
        if sock.in_destroy {
            return Ok(());
        }
        sock.in_destroy = true;
        let parent = sock.parent;

        self.quiesce(socket);
        if let Some(parent) = parent.and_then(|parent| self.sockets.get_mut(parent)) {
            parent.children.retain(|key| *key != socket);
        }
        self.sockets.remove(socket);
        net_debug!("socket {:?}: destroyed", socket);
        Ok(())
    }

    /// Configure a socket, or reset it to unconfigured with `None`.
    ///
    /// A configured socket must be reset before it can be configured again. A passive socket
    /// listens at once, an active one waits for `connect`. Port zero binds a free port from
    /// the ephemeral range.
    pub fn configure(&mut self, socket: Key, config: Option<Config>) -> Result<()> {
        let config = match config {
            Some(config) => config,
            None => return self.unconfigure(socket),
        };

        let sock = self.sockets.get_mut(socket).ok_or(Error::NotFound)?;
        if sock.mode != ConfigMode::Unconfigured {
            return Err(Error::AccessDenied);
        }
        if config.active && !config.remote.is_specified() {
            return Err(Error::InvalidParameter);
        }
        if let Some(station) = config.station {
            if !same_family(station, config.remote.addr) {
                return Err(Error::InvalidParameter);
            }
        }

        sock.config = Some(config);
        sock.apply(config.options.resolve());

        let local = match config.station.or(self.station) {
            Some(local) => local,
            None => {
                net_debug!("socket {:?}: waiting for the station address", socket);
                sock.mode = ConfigMode::AddressPending;
                sock.state = SocketState::Closed;
                return Ok(());
            },
        };

        let result = self.bind(socket, local);
        if result.is_err() {
            if let Some(sock) = self.sockets.get_mut(socket) {
                sock.config = None;
            }
        }
        result
    }

    /// Assign the default local address, completing sockets configured without one.
    pub fn set_station_address(&mut self, addr: IpAddress) {
        self.station = Some(addr);
        let pending: Vec<Key> = self.sockets.iter()
            .filter(|(_, sock)| sock.mode == ConfigMode::AddressPending)
            .map(|(key, _)| key)
            .collect();

        for key in pending {
            if let Err(err) = self.bind(key, addr) {
                net_warn!("socket {:?}: configuration with station {} failed: {}", key, addr, err);
                if let Some(sock) = self.sockets.get_mut(key) {
                    sock.mode = ConfigMode::Unconfigured;
                    sock.state = SocketState::Unconfigured;
                    sock.config = None;
                    sock.set_error(err);
                }
            }
        }
    }

    /// Open the connection of an active socket.
    pub fn connect(&mut self, socket: Key, token: ConnectToken) -> Result<()> {
        let sock = self.sockets.get_mut(socket).ok_or(Error::NotFound)?;
        sock.check_configured()?;
        if sock.mode != ConfigMode::Active
            || sock.state != SocketState::Closed
            || sock.has_event(token.event)
        {
            return Err(Error::AccessDenied);
        }

        // Start from a clean connection, a previous one may have left its flags behind.
        sock.cb = sock.cb.spawn();
        sock.error = None;
        sock.no_more_data = false;
        let tuple = FourTuple::new(sock.cb.local, sock.cb.remote);
        if !self.table.contains(socket) {
            self.table.insert_active(tuple, socket)?;
        }

        if let Some(sock) = self.sockets.get_mut(socket) {
            sock.connect_token = Some(token);
            sock.state = SocketState::Connecting;
        }

        let result = self.operate(socket, |op| op.dispatch(Request::Connect))
            .unwrap_or(Err(Error::NotFound));
        if result.is_err() {
            if let Some(sock) = self.sockets.get_mut(socket) {
                if sock.connect_token == Some(token) {
                    sock.connect_token = None;
                }
                if sock.state == SocketState::Connecting {
                    sock.state = SocketState::Closed;
                }
            }
        }
        result
    }

    /// Wait for the next connection of a listening socket.
    ///
    /// A connection that finished its handshake before is handed out immediately.
    pub fn accept(&mut self, socket: Key, token: ListenToken) -> Result<()> {
        let sock = self.sockets.get(socket).ok_or(Error::NotFound)?;
        sock.check_configured()?;
        if sock.mode != ConfigMode::Passive
            || sock.state != SocketState::Listening
            || sock.has_event(token.event)
        {
            return Err(Error::AccessDenied);
        }

        let sockets = &self.sockets;
        let ready = sock.children.iter()
            .copied()
            .find(|child| sockets.get(*child).map_or(false, Socket::is_connected));

        match ready {
            Some(child) => {
                if let Some(sock) = self.sockets.get_mut(socket) {
                    sock.children.retain(|key| *key != child);
                }
                if let Some(sock) = self.sockets.get_mut(child) {
                    sock.parent = None;
                }
                net_debug!("socket {:?}: accepted {:?}", socket, child);
                Sink { socket, out: &mut self.completions }
                    .signal(token.event, Outcome::Accept(Ok(child)));
            },
            None => if let Some(sock) = self.sockets.get_mut(socket) {
                sock.listen_queue.push_back(token);
            },
        }
        Ok(())
    }

    /// Queue data for transmission.
    ///
    /// The request completes once the peer acknowledged all of its data.
    pub fn send(&mut self, socket: Key, token: TxToken) -> Result<()> {
        let sock = self.sockets.get_mut(socket).ok_or(Error::NotFound)?;
        sock.check_configured()?;
        if token.data.is_empty() {
            return Err(Error::InvalidParameter);
        }
        if sock.has_event(token.event) {
            return Err(Error::AccessDenied);
        }

        match sock.state {
            SocketState::Connecting => {
                sock.snd_queue.push_back(token);
                Ok(())
            },
            SocketState::Connected => {
                sock.snd_queue.push_back(token);
                self.operate(socket, |op| op.process_send_tokens());
                Ok(())
            },
            SocketState::Disconnecting => Err(Error::ConnectionFin),
            SocketState::Listening => Err(Error::AccessDenied),
            SocketState::Closed | SocketState::Unconfigured => {
                Err(sock.error.unwrap_or(Error::NotStarted))
            },
        }
    }

    /// Ask for received data.
    ///
    /// Completes at once when data is buffered. Fails with `ConnectionFin` once the peer closed
    /// and everything was read.
    pub fn receive(&mut self, socket: Key, token: RxToken) -> Result<()> {
        let sock = self.sockets.get_mut(socket).ok_or(Error::NotFound)?;
        sock.check_configured()?;
        if token.capacity == 0 {
            return Err(Error::InvalidParameter);
        }
        if sock.state == SocketState::Listening || sock.has_event(token.event) {
            return Err(Error::AccessDenied);
        }

        if !sock.rcv.is_empty() {
            sock.rcv_queue.push_back(token);
            self.operate(socket, |op| {
                op.wake_receive_tokens();
                op.dispatch(Request::Consumed)
            }).unwrap_or(Err(Error::NotFound))
        } else if sock.no_more_data {
            Err(Error::ConnectionFin)
        } else if sock.state == SocketState::Closed {
            Err(sock.error.unwrap_or(Error::NotStarted))
        } else {
            sock.rcv_queue.push_back(token);
            Ok(())
        }
    }

    /// Close the connection gracefully, or reset it if the token asks to abort.
    pub fn close(&mut self, socket: Key, token: CloseToken) -> Result<()> {
        let sock = self.sockets.get_mut(socket).ok_or(Error::NotFound)?;
        sock.check_configured()?;
        if sock.close_token.is_some() || sock.has_event(token.event) {
            return Err(Error::AccessDenied);
        }

        sock.close_token = Some(token);
        sock.state = SocketState::Disconnecting;
        let request = if token.abort { Request::Abort } else { Request::Close };
        self.operate(socket, |op| op.dispatch(request))
            .unwrap_or(Err(Error::NotFound))
    }

    /// Abort one outstanding request, or all of them with `None`.
    pub fn cancel(&mut self, socket: Key, event: Option<EventId>) -> Result<()> {
        let sock = self.sockets.get_mut(socket).ok_or(Error::NotFound)?;
        sock.check_configured()?;
        sock.cancel(event, &mut Sink { socket, out: &mut self.completions })
    }

    /// Drop the connection and fail all requests, keeping the configuration.
    ///
    /// A passive socket listens again afterwards, an active one may connect again.
    pub fn flush(&mut self, socket: Key) -> Result<()> {
        self.sockets.get(socket).ok_or(Error::NotFound)?.check_configured()?;
        self.quiesce(socket);

        let sock = self.sockets.get_mut(socket).ok_or(Error::NotFound)?;
        sock.cb = sock.cb.spawn();
        sock.error = None;
        sock.no_more_data = false;
        let mode = sock.mode;
        match mode {
            ConfigMode::Passive => {
                let tuple = FourTuple::new(sock.cb.local, sock.cb.remote);
                sock.state = SocketState::Closed;
                self.table.insert_listen(tuple, socket)?;
                if let Some(sock) = self.sockets.get_mut(socket) {
                    sock.cb.state = State::Listen;
                    sock.state = SocketState::Listening;
                }
            },
            _ => sock.state = SocketState::Closed,
        }
        Ok(())
    }

    /// A snapshot of the socket.
    pub fn mode(&self, socket: Key) -> Result<ModeData> {
        let sock = self.sockets.get(socket).ok_or(Error::NotFound)?;
        let cb: &Cb = &sock.cb;
        Ok(ModeData {
            config: sock.config,
            mode: sock.mode,
            socket_state: sock.state,
            state: cb.state,
            local: cb.local,
            remote: cb.remote,
            snd_mss: cb.snd_mss,
            rcv_mss: cb.rcv_mss,
            snd_wnd_scale: cb.snd_wnd_scale,
            rcv_wnd_scale: cb.rcv_wnd_scale,
            snd_wnd: cb.snd_wnd,
            rcv_wnd: cb.rcv_wnd,
            rto: cb.rto,
            cwnd: cb.cwnd,
            ssthresh: cb.ssthresh,
            congestion: cb.congestion,
            soft_error: cb.soft_error,
            options: sock.options,
        })
    }

    /// Let the substrate process pending work.
    pub fn poll(&mut self, socket: Key) -> Result<()> {
        if !self.sockets.contains(socket) {
            return Err(Error::NotFound);
        }
        self.net.poll()
    }

    /// Install or remove a route in the substrate.
    pub fn route(&mut self, socket: Key, change: RouteChange, route: Route) -> Result<()> {
        self.sockets.get(socket).ok_or(Error::NotFound)?.check_configured()?;
        self.net.route(change, route)
    }

    /// Reset a socket to the unconfigured state.
    fn unconfigure(&mut self, socket: Key) -> Result<()> {
        if !self.sockets.contains(socket) {
            return Err(Error::NotFound);
        }
        self.quiesce(socket);

        let sock = self.sockets.get_mut(socket).ok_or(Error::NotFound)?;
        let in_destroy = sock.in_destroy;
        let parent = sock.parent;
        *sock = Socket::new();
        sock.in_destroy = in_destroy;
        sock.parent = parent;
        net_debug!("socket {:?}: unconfigured", socket);
        Ok(())
    }

    /// Bind a configured socket to its local endpoint and enter its mode.
    fn bind(&mut self, socket: Key, local: IpAddress) -> Result<()> {
        let config = self.sockets.get(socket)
            .and_then(|sock| sock.config)
            .ok_or(Error::NotStarted)?;
        if !same_family(local, config.remote.addr)
            || (config.active && local.is_unspecified())
        {
            return Err(Error::InvalidParameter);
        }

        let port = match config.port {
            0 => self.ephemeral_port(local, config.remote.addr)?,
            port if config.active && self.table.port_in_use(port) => {
                net_debug!("socket {:?}: port {} in use", socket, port);
                return Err(Error::AccessDenied);
            },
            port => port,
        };

        let local = IpEndpoint::new(local, port);
        let tuple = FourTuple::new(local, config.remote);
        if config.active {
            self.table.insert_active(tuple, socket)?;
        } else {
            self.table.insert_listen(tuple, socket)?;
        }

        let sock = self.sockets.get_mut(socket).ok_or(Error::NotFound)?;
        sock.cb.local = local;
        sock.cb.remote = config.remote;
        if config.active {
            sock.mode = ConfigMode::Active;
            sock.state = SocketState::Closed;
        } else {
            sock.mode = ConfigMode::Passive;
            sock.state = SocketState::Listening;
            sock.cb.state = State::Listen;
        }
        net_debug!("socket {:?}: bound to {}, remote {}", socket, local, config.remote);
        Ok(())
    }

    /// A free local port, searched from a keyed starting point.
    fn ephemeral_port(&self, local: IpAddress, remote: IpAddress) -> Result<u16> {
        let offset = u32::from(self.isn.port_offset(local, remote));
        (0..EPHEMERAL_PORTS)
            .map(|i| EPHEMERAL_START + ((offset + i) % EPHEMERAL_PORTS) as u16)
            .find(|port| !self.table.port_in_use(*port))
            .ok_or(Error::OutOfResources)
    }

    /// Reset the connection, fail every request and destroy unaccepted children.
    fn quiesce(&mut self, socket: Key) {
        self.operate(socket, |op| op.dispatch(Request::Flush));
        let children = match self.sockets.get_mut(socket) {
            Some(sock) => core::mem::replace(&mut sock.children, Vec::new()),
            None => Vec::new(),
        };
        for child in children {
            let _ = self.destroy(child);
        }
        self.table.remove(socket);
    }

    /// Destroy the children of a listener that closed.
    pub(crate) fn orphan_children(&mut self, socket: Key) {
        let children = match self.sockets.get_mut(socket) {
            Some(sock) if sock.cb.state == State::Closed => {
                core::mem::replace(&mut sock.children, Vec::new())
            },
            _ => return,
        };
        for child in children {
            let _ = self.destroy(child);
        }
    }
}

/// Whether two addresses can form a connection, unspecified ones match any family.
fn same_family(a: IpAddress, b: IpAddress) -> bool {
    match (a.version(), b.version()) {
        (IpVersion::Unspecified, _) | (_, IpVersion::Unspecified) => true,
        (a, b) => a == b,
    }
}
