use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::layer::Error;
use crate::layer::ip::Network;
use crate::layer::socket::{Completion, Deferred, Sink, Socket};
use crate::managed::Key;
use crate::time::Tick;
use crate::wire::{IpAddress, TcpOptions, TcpSeqNumber};

use super::{DEFAULT_MSS, MIN_MSS};
use super::connection::{Cb, Control, Segment, State};
use super::endpoint::EngineConfig;
use super::siphash::IsnGenerator;
use super::table::FourTuple;

/// One connection borrowed out of the endpoint, with everything its processing touches.
pub(crate) struct Operator<'a> {
    pub key: Key,
    pub sock: &'a mut Socket,
    pub net: &'a mut dyn Network,
    pub now: Tick,
    pub isn: &'a IsnGenerator,
    pub config: &'a EngineConfig,
    pub completions: &'a mut VecDeque<Completion>,
    pub deferred: &'a mut Vec<Deferred>,
}

impl Operator<'_> {
    pub fn cb(&mut self) -> &mut Cb {
        &mut self.sock.cb
    }

    pub fn state(&self) -> State {
        self.sock.cb.state
    }

    /// Move the connection to a new state, notifying the socket.
    pub fn set_state(&mut self, state: State) {
        let old = self.sock.cb.state;
        self.sock.cb.state = state;
        net_debug!("tcp {:?}: {} -> {}", self.key, old, state);

        match state {
            State::Established => self.conn_established(),
            State::Closed => self.conn_closed(),
            _ => (),
        }
    }

    /// Tear the connection down without sending anything.
    pub fn close(&mut self) {
        let cb = self.cb();
        cb.snd_que.clear();
        cb.rcv_que.clear();
        cb.clear_all_timers();
        self.set_state(State::Closed);
    }

    /// Close the connection with an error reported to its requests.
    pub fn close_with(&mut self, error: Error) {
        self.sock.set_error(error);
        self.close();
    }

    /// Clear all connection state without notifying the socket.
    ///
    /// Used when the application flushes the socket, which fails the requests itself.
    pub fn discard(&mut self) {
        let cb = self.cb();
        cb.snd_que.clear();
        cb.rcv_que.clear();
        cb.clear_all_timers();
        cb.state = State::Closed;
    }

    /// Sink for completions of this socket.
    pub fn sink(&mut self) -> Sink<'_> {
        Sink {
            socket: self.key,
            out: &mut *self.completions,
        }
    }

    /// The largest segment we accept, derived from the interface MTU.
    pub fn rcv_mss(&self) -> u16 {
        let mtu = self.config.mtu.unwrap_or_else(|| self.net.mtu());
        let headers = match self.sock.cb.local.addr {
            IpAddress::Ipv6(_) => 60,
            _ => 40,
        };
        let mss = mtu.saturating_sub(headers).min(usize::from(u16::max_value()));
        (mss as u16).max(MIN_MSS)
    }

    /// Initialize the send sequence space and our half of the windows.
    pub fn init_local(&mut self) {
        let tuple = FourTuple::new(self.sock.cb.local, self.sock.cb.remote);
        let iss = self.isn.get_isn(tuple, self.now);
        let rcv_mss = self.rcv_mss();

        let cb = self.cb();
        cb.iss = iss;
        cb.snd_una = iss;
        cb.snd_nxt = iss;
        cb.snd_psh = iss;
        cb.snd_up = iss;
        cb.snd_wl2 = iss;
        cb.retxmit_seq_max = iss;
        cb.snd_wnd = u32::from(DEFAULT_MSS);
        cb.rcv_wnd = cb.rcv_high_water;
        cb.rcv_wnd_scale = 0;
        cb.rcv_mss = rcv_mss;
        cb.probe_on = false;
    }

    /// Initialize the receive sequence space and the peer's options from its SYN.
    pub fn init_peer(&mut self, seg: &Segment, opts: &TcpOptions) {
        let now = self.now;
        let cb = self.cb();

        cb.snd_wnd = seg.wnd;
        cb.snd_wnd_max = seg.wnd;
        cb.snd_wl1 = seg.seq;
        cb.snd_wl2 = if seg.flags.ack() { seg.ack } else { cb.iss + 1 };

        cb.snd_mss = match opts.max_seg_size {
            Some(mss) => mss.max(MIN_MSS).min(cb.rcv_mss),
            None => DEFAULT_MSS,
        };
        cb.cwnd = u32::from(cb.snd_mss);

        cb.irs = seg.seq;
        cb.rcv_nxt = cb.irs + 1;
        cb.rcv_wl2 = cb.rcv_nxt;
        cb.rcv_up = cb.rcv_nxt;

        match opts.window_scale {
            Some(scale) if !cb.control.contains(Control::NO_WS) => {
                cb.snd_wnd_scale = scale;
                cb.rcv_wnd_scale = cb.compute_scale();
                cb.control.insert(Control::RCVD_WS);
            },
            _ => {
                cb.snd_wnd_scale = 0;
                cb.rcv_wnd_scale = 0;
            },
        }

        match opts.timestamp {
            Some(ts) if !cb.control.contains(Control::NO_TS) => {
                cb.control.insert(Control::SND_TS);
                cb.control.insert(Control::RCVD_TS);
                cb.ts_recent = ts.value;
                cb.ts_recent_age = now;
            },
            _ => (),
        }
    }

    /// Whether the sequence number lies in the data we sent but that was not acknowledged.
    pub fn in_flight(&self, seq: TcpSeqNumber) -> bool {
        seq.in_range(self.sock.cb.snd_una, self.sock.cb.snd_nxt)
    }
}
