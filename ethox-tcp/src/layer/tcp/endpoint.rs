//! The engine, owner of every socket.
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::layer::ip::Network;
use crate::layer::socket::{Completion, Deferred, Outcome, Socket};
use crate::managed::{Key, SlotMap};
use crate::storage::NetBuf;
use crate::time::Tick;
use crate::wire::{Checksum, IcmpError, IpAddress, IpEndpoint, TcpPacket, TcpRepr};

use super::connection::{Segment, State};
use super::icmp::{DefaultIcmpPolicy, IcmpPolicy};
use super::operator::Operator;
use super::option;
use super::output::send_reset;
use super::siphash::IsnGenerator;
use super::table::{FourTuple, Table};

/// Engine wide settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EngineConfig {
    /// Key of the initial sequence number generator.
    ///
    /// Should come from a cryptographic source. With `None` the key is derived from the standard
    /// library's random hasher state, which requires the `std` feature.
    pub secret: Option<[u8; 16]>,
    /// The interface MTU from which the announced MSS is derived, instead of asking the network.
    pub mtu: Option<usize>,
    /// Added to the window scale when tolerating a retracted window.
    ///
    /// A window may shrink below data already sent by up to `2^(scale + retraction_slack)` bytes
    /// before the sender pulls back.
    pub retraction_slack: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            secret: None,
            mtu: None,
            retraction_slack: 0,
        }
    }
}

/// A tcp engine on top of an IP substrate.
///
/// Owns all sockets, the connection tables and the clock. Every operation of the application and
/// every event of the substrate is a method taking the endpoint mutably. Finished requests are
/// collected in a queue, see [`completions`].
///
/// [`completions`]: #method.completions
pub struct Endpoint<N> {
    pub(crate) net: N,
    pub(crate) sockets: SlotMap<Socket>,
    pub(crate) table: Table,
    pub(crate) isn: IsnGenerator,
    pub(crate) now: Tick,
    pub(crate) completions: VecDeque<Completion>,
    pub(crate) station: Option<IpAddress>,
    pub(crate) config: EngineConfig,
    pub(crate) icmp: Box<dyn IcmpPolicy + Send>,
}

impl<N: Network> Endpoint<N> {
    /// Create an engine without sockets.
    pub fn new(net: N, config: EngineConfig) -> Self {
        Endpoint {
            net,
            sockets: SlotMap::new(),
            table: Table::new(),
            isn: isn_generator(config.secret),
            now: Tick::ZERO,
            completions: VecDeque::new(),
            station: None,
            config,
            icmp: Box::new(DefaultIcmpPolicy),
        }
    }

    /// The substrate.
    pub fn network(&self) -> &N {
        &self.net
    }

    /// The substrate, mutably.
    pub fn network_mut(&mut self) -> &mut N {
        &mut self.net
    }

    /// The current tick.
    pub fn now(&self) -> Tick {
        self.now
    }

    /// Replace the classification of ICMP errors.
    pub fn set_icmp_policy(&mut self, policy: impl IcmpPolicy + Send + 'static) {
        self.icmp = Box::new(policy);
    }

    /// Take all finished requests, oldest first.
    pub fn completions(&mut self) -> impl Iterator<Item=Completion> + '_ {
        self.completions.drain(..)
    }

    /// The connection state of a socket.
    pub fn state(&self, socket: Key) -> Option<State> {
        self.sockets.get(socket).map(|sock| sock.cb.state)
    }

    /// Advance the clock by one tick and run the timers of every connection.
    ///
    /// Must be called `TICK_HZ` times per second.
    pub fn tick(&mut self) {
        self.now.advance();
        let keys: Vec<Key> = self.sockets.iter()
            .filter(|(_, sock)| sock.cb.state != State::Closed)
            .map(|(key, _)| key)
            .collect();

        for key in keys {
            self.operate(key, |op| op.on_tick());
        }
    }

    /// Process a tcp segment received from `src` for `dst`.
    ///
    /// Malformed segments and segments failing the checksum are dropped. A segment without a
    /// connection is answered with a RST.
    pub fn segment_arrived(&mut self, segment: &[u8], src: IpAddress, dst: IpAddress) {
        match (src, dst) {
            (IpAddress::Ipv4(_), IpAddress::Ipv4(_)) | (IpAddress::Ipv6(_), IpAddress::Ipv6(_)) => (),
            _ => {
                net_debug!("tcp: dropping segment with address pair {} -> {}", src, dst);
                return;
            },
        }

        let packet = TcpPacket::new_unchecked(segment);
        let repr = match TcpRepr::parse(&packet, Checksum::Manual { src_addr: src, dst_addr: dst }) {
            Ok(repr) => repr,
            Err(err) => {
                net_debug!("tcp: dropping segment from {}: {}", src, err);
                return;
            },
        };

        let mut seg = Segment::new(repr.seq_number, repr.flags, NetBuf::from_slice(packet.payload_slice()));
        seg.ack = repr.ack_number;
        seg.wnd = u32::from(repr.window_len);
        seg.urg = repr.urgent_at;

        let local = IpEndpoint::new(dst, repr.dst_port);
        let remote = IpEndpoint::new(src, repr.src_port);
        let tuple = FourTuple::new(local, remote);
        net_trace!("tcp: {} -> {}: {}", remote, local, repr);

        let key = match self.table.lookup(&tuple, seg.flags.syn()) {
            Some(key) => key,
            None => {
                net_debug!("tcp: no connection for {} -> {}, resetting", remote, local);
                let _ = send_reset(&mut self.net, &seg, local, remote);
                return;
            },
        };

        let options = match packet.parse_options() {
            Ok(options) => option::received(options, seg.flags),
            Err(err) => {
                net_debug!("tcp: malformed options from {}: {}", remote, err);
                let _ = send_reset(&mut self.net, &seg, local, remote);
                return;
            },
        };

        let listening = self.sockets.get(key).map_or(false, |sock| sock.cb.state == State::Listen);
        if !listening {
            self.operate(key, |op| op.on_segment(seg, &options));
            return;
        }

        if seg.flags.rst() {
            net_debug!("tcp: RST for listener {:?} discarded", key);
            return;
        }
        if seg.flags.ack() {
            net_debug!("tcp: ACK for listener {:?}, resetting", key);
            let _ = send_reset(&mut self.net, &seg, local, remote);
            return;
        }
        if !seg.flags.syn() {
            return;
        }

        let child = match self.spawn(key, local, remote) {
            Some(child) => child,
            None => return,
        };
        self.operate(child, |op| op.on_listen_syn(seg, &options));
    }

    /// Process an ICMP error quoting a segment we sent from `src` to `dst`.
    ///
    /// `quoted` starts with the tcp header of that segment, at least its first eight bytes.
    pub fn icmp_error_arrived(&mut self, quoted: &[u8], error: IcmpError, src: IpAddress, dst: IpAddress) {
        if quoted.len() < 8 {
            net_debug!("tcp: icmp error {} quotes too little", error);
            return;
        }

        let packet = TcpPacket::new_unchecked(quoted);
        let local = IpEndpoint::new(src, packet.src_port());
        let remote = IpEndpoint::new(dst, packet.dst_port());
        let seq = packet.seq_number();

        let key = match self.table.lookup(&FourTuple::new(local, remote), false) {
            Some(key) => key,
            None => return,
        };

        let action = self.icmp.classify(error);
        net_debug!("tcp: icmp {} for {} -> {}: {:?}", error, local, remote, action);
        self.operate(key, |op| op.on_icmp_error(seq, action));
    }

    /// Create the connection for a SYN at a listener.
    ///
    /// Returns `None` when the backlog is full.
    fn spawn(&mut self, listener: Key, local: IpEndpoint, remote: IpEndpoint) -> Option<Key> {
        let parent = self.sockets.get(listener)?;
        if parent.children.len() >= parent.options.backlog {
            net_debug!("tcp: backlog of {:?} exhausted, dropping SYN", listener);
            return None;
        }

        let mut child = parent.spawn(listener);
        child.cb.local = local;
        child.cb.remote = remote;
        let key = self.sockets.insert(child);

        if self.table.insert_active(FourTuple::new(local, remote), key).is_err() {
            self.sockets.remove(key);
            return None;
        }
        if let Some(parent) = self.sockets.get_mut(listener) {
            parent.children.push(key);
        }
        net_debug!("tcp: {:?} spawned {:?} for {}", listener, key, remote);
        Some(key)
    }

    /// Run protocol processing on one connection.
    ///
    /// Effects on other sockets are applied afterwards, and a connection that closed leaves the
    /// tables.
    pub(crate) fn operate<R>(&mut self, key: Key, f: impl FnOnce(&mut Operator) -> R) -> Option<R> {
        let mut deferred = Vec::new();
        let result = {
            let sock = self.sockets.get_mut(key)?;
            let mut op = Operator {
                key,
                sock,
                net: &mut self.net,
                now: self.now,
                isn: &self.isn,
                config: &self.config,
                completions: &mut self.completions,
                deferred: &mut deferred,
            };
            f(&mut op)
        };

        self.sync(key);
        for action in deferred {
            self.settle(action);
        }
        Some(result)
    }

    /// Remove a closed connection from the tables.
    ///
    /// A listener that closed takes its unaccepted connections with it.
    fn sync(&mut self, key: Key) {
        let closed = match self.sockets.get(key) {
            Some(sock) => sock.cb.state == State::Closed,
            None => true,
        };
        if closed {
            self.table.remove(key);
            self.orphan_children(key);
        }
    }

    fn settle(&mut self, action: Deferred) {
        match action {
            Deferred::WakeListener { parent, child } => {
                let listener = match self.sockets.get_mut(parent) {
                    Some(listener) => listener,
                    None => return,
                };
                let token = match listener.listen_queue.pop_front() {
                    Some(token) => token,
                    // The child waits for the next accept.
                    None => return,
                };
                listener.children.retain(|key| *key != child);
                if let Some(sock) = self.sockets.get_mut(child) {
                    sock.parent = None;
                }
                net_debug!("tcp: {:?} accepted {:?}", parent, child);
                self.completions.push_back(Completion {
                    socket: parent,
                    event: token.event,
                    outcome: Outcome::Accept(Ok(child)),
                });
            },
            Deferred::DestroyChild { parent, child } => {
                if let Some(listener) = self.sockets.get_mut(parent) {
                    listener.children.retain(|key| *key != child);
                }
                net_debug!("tcp: {:?} dropped unaccepted {:?}", parent, child);
                self.table.remove(child);
                self.sockets.remove(child);
            },
        }
    }
}

#[cfg(feature = "std")]
fn isn_generator(secret: Option<[u8; 16]>) -> IsnGenerator {
    match secret {
        Some(secret) => IsnGenerator::from_secret_key_bytes(secret),
        None => IsnGenerator::from_std_hash(),
    }
}

#[cfg(not(feature = "std"))]
fn isn_generator(secret: Option<[u8; 16]>) -> IsnGenerator {
    match secret {
        Some(secret) => IsnGenerator::from_secret_key_bytes(secret),
        None => {
            net_warn!("tcp: no secret for the sequence number generator, using a fixed key");
            IsnGenerator::from_secret_key_bytes([0; 16])
        },
    }
}
