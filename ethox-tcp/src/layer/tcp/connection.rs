//! The transmission control block of a connection.
use alloc::collections::VecDeque;
use core::fmt;

use crate::layer::Error;
use crate::layer::socket::Resolved;
use crate::storage::NetBuf;
use crate::time::Tick;
use crate::wire::{IpEndpoint, TcpFlags, TcpSeqNumber};

use super::{DEFAULT_MSS, RTO_DEFAULT};

/// The state of a connection, as in RFC793.
///
/// Variants are declared in the order the state machine usually passes through them. The
/// comparisons used by the engine rely on this order: every state from `Established` onwards has
/// been synchronized with the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    /// No connection.
    Closed,
    /// Waiting for a SYN.
    Listen,
    /// Sent a SYN, waiting for the answer.
    SynSent,
    /// Received a SYN, waiting for the acknowledgement of ours.
    SynRcvd,
    /// Data transfer.
    Established,
    /// Closed locally, our FIN is unacknowledged.
    FinWait1,
    /// Closed locally, our FIN was acknowledged.
    FinWait2,
    /// Both sides closed simultaneously.
    Closing,
    /// Waiting for delayed segments of the old connection to expire.
    TimeWait,
    /// Closed by the peer.
    CloseWait,
    /// Closed by the peer and then locally.
    LastAck,
}

impl State {
    /// Whether the three way handshake completed.
    pub fn is_synchronized(self) -> bool {
        self >= State::Established
    }

    /// Whether the FIN of the peer has been received.
    pub fn fin_received(self) -> bool {
        match self {
            State::CloseWait | State::Closing | State::LastAck | State::TimeWait => true,
            _ => false,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            State::Closed => write!(f, "CLOSED"),
            State::Listen => write!(f, "LISTEN"),
            State::SynSent => write!(f, "SYN-SENT"),
            State::SynRcvd => write!(f, "SYN-RECEIVED"),
            State::Established => write!(f, "ESTABLISHED"),
            State::FinWait1 => write!(f, "FIN-WAIT-1"),
            State::FinWait2 => write!(f, "FIN-WAIT-2"),
            State::Closing => write!(f, "CLOSING"),
            State::TimeWait => write!(f, "TIME-WAIT"),
            State::CloseWait => write!(f, "CLOSE-WAIT"),
            State::LastAck => write!(f, "LAST-ACK"),
        }
    }
}

/// The congestion control phase, NewReno.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Congestion {
    /// Slow start or congestion avoidance.
    Open,
    /// Fast recovery after three duplicate acknowledgements.
    Recover,
    /// Recovery after a retransmission timeout.
    Loss,
}

/// The per connection timers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Connection establishment.
    Connect = 0,
    /// Retransmission.
    Rexmit = 1,
    /// Zero window probe.
    Probe = 2,
    /// Keepalive.
    Keepalive = 3,
    /// FIN_WAIT_2 timeout.
    FinWait2 = 4,
    /// TIME_WAIT timeout.
    TwoMsl = 5,
}

impl Timer {
    /// All timers, in the order their handlers are run.
    pub const ALL: [Timer; 6] = [
        Timer::Connect,
        Timer::Rexmit,
        Timer::Probe,
        Timer::Keepalive,
        Timer::FinWait2,
        Timer::TwoMsl,
    ];

    pub(crate) fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Flags of the control block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct Control(u32);

impl Control {
    pub const NO_NAGLE: Control = Control(1 << 0);
    pub const NO_KEEPALIVE: Control = Control(1 << 1);
    pub const NO_WS: Control = Control(1 << 2);
    pub const RCVD_WS: Control = Control(1 << 3);
    pub const NO_TS: Control = Control(1 << 4);
    pub const RCVD_TS: Control = Control(1 << 5);
    pub const SND_TS: Control = Control(1 << 6);
    /// Urgent data awaits transmission, `snd_up` is valid.
    pub const SND_URG: Control = Control(1 << 7);
    /// A push was requested, `snd_psh` is valid.
    pub const SND_PSH: Control = Control(1 << 8);
    pub const RCVD_URG: Control = Control(1 << 9);
    pub const FIN_SENT: Control = Control(1 << 10);
    pub const FIN_ACKED: Control = Control(1 << 11);
    /// At least one timer is enabled.
    pub const TIMER_ON: Control = Control(1 << 12);
    /// A round trip measurement is running.
    pub const RTT_ON: Control = Control(1 << 13);
    pub const ACK_NOW: Control = Control(1 << 14);

    /// The flags a spawned connection inherits.
    const CONFIGURED: Control = Control(
        Self::NO_NAGLE.0 | Self::NO_KEEPALIVE.0 | Self::NO_WS.0 | Self::NO_TS.0);

    pub fn contains(self, other: Control) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Control) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Control) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: Control, value: bool) {
        if value {
            self.insert(other)
        } else {
            self.remove(other)
        }
    }
}

/// A segment held in the retransmission or reassembly queue.
///
/// `seq` and `end` delimit the sequence space the segment occupies, including SYN and FIN.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Segment {
    pub seq: TcpSeqNumber,
    pub end: TcpSeqNumber,
    pub ack: TcpSeqNumber,
    pub flags: TcpFlags,
    /// The window, already scaled.
    pub wnd: u32,
    pub urg: u16,
    pub data: NetBuf,
}

impl Segment {
    pub fn new(seq: TcpSeqNumber, flags: TcpFlags, data: NetBuf) -> Self {
        let end = seq + data.len() + flags.sequence_len();
        Segment {
            seq,
            end,
            ack: TcpSeqNumber::default(),
            flags,
            wnd: 0,
            urg: 0,
            data,
        }
    }

    /// The sequence space length.
    pub fn len(&self) -> usize {
        self.end - self.seq
    }

    /// The sequence number of the first data byte.
    pub fn data_seq(&self) -> TcpSeqNumber {
        if self.flags.syn() { self.seq + 1 } else { self.seq }
    }

    /// Cut the segment down to `[left, right)`.
    ///
    /// A segment entirely outside becomes empty. SYN occupies the first position and is removed
    /// with it, FIN occupies the last.
    pub fn trim(&mut self, left: TcpSeqNumber, right: TcpSeqNumber) {
        if self.end <= left || self.seq >= right {
            self.flags.set_syn(false);
            self.flags.set_fin(false);
            self.flags.set_urg(false);
            self.urg = 0;
            self.seq = left;
            self.end = left;
            self.data = NetBuf::empty();
            return;
        }

        if self.seq < left {
            let mut cut = left - self.seq;
            let shift = cut;
            if self.flags.syn() {
                self.flags.set_syn(false);
                cut -= 1;
            }
            self.seq = left;
            self.data = self.data.trim_head(cut.min(self.data.len()));

            if self.flags.urg() {
                if usize::from(self.urg) < shift {
                    self.flags.set_urg(false);
                    self.urg = 0;
                } else {
                    self.urg -= shift as u16;
                }
            }
        }

        if self.end > right {
            let mut cut = self.end - right;
            if self.flags.fin() {
                self.flags.set_fin(false);
                cut -= 1;
            }
            self.end = right;
            self.data = self.data.trim_tail(cut.min(self.data.len()));
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {}) {} len={}", self.seq, self.end, self.flags, self.data.len())
    }
}

/// The transmission control block.
///
/// Windows are kept in bytes, already scaled. Timeouts are in ticks.
#[derive(Debug)]
pub(crate) struct Cb {
    pub state: State,
    pub local: IpEndpoint,
    pub remote: IpEndpoint,
    pub control: Control,

    /// Sent segments, kept for retransmission.
    pub snd_que: VecDeque<Segment>,
    /// Received segments not yet delivered, ordered.
    pub rcv_que: VecDeque<Segment>,

    pub iss: TcpSeqNumber,
    pub snd_una: TcpSeqNumber,
    pub snd_nxt: TcpSeqNumber,
    pub snd_psh: TcpSeqNumber,
    pub snd_up: TcpSeqNumber,
    pub snd_wl1: TcpSeqNumber,
    pub snd_wl2: TcpSeqNumber,
    pub snd_wnd: u32,
    pub snd_wnd_max: u32,
    pub snd_wnd_scale: u8,
    pub snd_mss: u16,
    /// Highest sequence number retransmitted, for the window retraction rule.
    pub retxmit_seq_max: TcpSeqNumber,

    pub irs: TcpSeqNumber,
    pub rcv_nxt: TcpSeqNumber,
    pub rcv_up: TcpSeqNumber,
    /// The `rcv_nxt` last acknowledged, left edge of the advertised window.
    pub rcv_wl2: TcpSeqNumber,
    pub rcv_wnd: u32,
    pub rcv_wnd_scale: u8,
    pub rcv_mss: u16,

    pub ts_recent: u32,
    pub ts_recent_age: Tick,

    pub rtt_seq: TcpSeqNumber,
    pub rtt_measure: u32,
    /// Smoothed round trip time, scaled by 8.
    pub srtt: u32,
    /// Round trip time variance, scaled by 8.
    pub rttvar: u32,
    pub rto: u32,

    pub cwnd: u32,
    pub ssthresh: u32,
    pub congestion: Congestion,
    pub dup_ack: u32,
    pub recover: TcpSeqNumber,
    pub loss_recover: TcpSeqNumber,
    pub loss_times: u32,

    pub timer: [Tick; 6],
    /// Bit set of enabled timers.
    pub enabled: u8,
    /// Ticks until the earliest enabled timer.
    pub next_expire: i32,
    /// Number of ACKs delayed so far.
    pub delayed_ack: u32,
    /// Ticks since the last segment from the peer.
    pub idle: u32,
    pub probe_time: u32,
    pub probe_on: bool,
    pub keepalive_probes: u32,

    pub connect_timeout: u32,
    pub max_retries: u32,
    pub fin_wait2_timeout: u32,
    pub time_wait_timeout: u32,
    pub keepalive_time: u32,
    pub keepalive_interval: u32,
    pub max_keepalive: u32,
    /// The receive buffer size, target of the advertised window.
    pub rcv_high_water: u32,

    /// The last soft error, reported but not fatal.
    pub soft_error: Option<Error>,
}

impl Cb {
    pub fn new() -> Self {
        let options = Resolved::default();
        let mut cb = Cb {
            state: State::Closed,
            local: IpEndpoint::UNSPECIFIED,
            remote: IpEndpoint::UNSPECIFIED,
            control: Control::default(),
            snd_que: VecDeque::new(),
            rcv_que: VecDeque::new(),
            iss: TcpSeqNumber::default(),
            snd_una: TcpSeqNumber::default(),
            snd_nxt: TcpSeqNumber::default(),
            snd_psh: TcpSeqNumber::default(),
            snd_up: TcpSeqNumber::default(),
            snd_wl1: TcpSeqNumber::default(),
            snd_wl2: TcpSeqNumber::default(),
            snd_wnd: 0,
            snd_wnd_max: 0,
            snd_wnd_scale: 0,
            snd_mss: DEFAULT_MSS,
            retxmit_seq_max: TcpSeqNumber::default(),
            irs: TcpSeqNumber::default(),
            rcv_nxt: TcpSeqNumber::default(),
            rcv_up: TcpSeqNumber::default(),
            rcv_wl2: TcpSeqNumber::default(),
            rcv_wnd: 0,
            rcv_wnd_scale: 0,
            rcv_mss: DEFAULT_MSS,
            ts_recent: 0,
            ts_recent_age: Tick::ZERO,
            rtt_seq: TcpSeqNumber::default(),
            rtt_measure: 0,
            srtt: 0,
            rttvar: 0,
            rto: RTO_DEFAULT,
            cwnd: u32::from(DEFAULT_MSS),
            ssthresh: u32::max_value(),
            congestion: Congestion::Open,
            dup_ack: 0,
            recover: TcpSeqNumber::default(),
            loss_recover: TcpSeqNumber::default(),
            loss_times: 0,
            timer: [Tick::ZERO; 6],
            enabled: 0,
            next_expire: 0,
            delayed_ack: 0,
            idle: 0,
            probe_time: 0,
            probe_on: false,
            keepalive_probes: 0,
            connect_timeout: 0,
            max_retries: 0,
            fin_wait2_timeout: 0,
            time_wait_timeout: 0,
            keepalive_time: 0,
            keepalive_interval: 0,
            max_keepalive: 0,
            rcv_high_water: 0,
            soft_error: None,
        };
        cb.apply(&options);
        cb
    }

    /// A fresh control block for a connection accepted by this listener.
    ///
    /// Inherits the endpoints and every configured value, none of the connection state.
    pub fn spawn(&self) -> Self {
        let mut child = Cb::new();
        child.local = self.local;
        child.remote = self.remote;
        child.control = Control(self.control.0 & Control::CONFIGURED.0);
        child.connect_timeout = self.connect_timeout;
        child.max_retries = self.max_retries;
        child.fin_wait2_timeout = self.fin_wait2_timeout;
        child.time_wait_timeout = self.time_wait_timeout;
        child.keepalive_time = self.keepalive_time;
        child.keepalive_interval = self.keepalive_interval;
        child.max_keepalive = self.max_keepalive;
        child.rcv_high_water = self.rcv_high_water;
        child
    }

    /// Install resolved socket options.
    pub fn apply(&mut self, options: &Resolved) {
        self.connect_timeout = options.connection_timeout;
        self.max_retries = options.data_retries;
        self.fin_wait2_timeout = options.fin_wait2_timeout;
        self.time_wait_timeout = options.time_wait_timeout;
        self.keepalive_time = options.keepalive_time;
        self.keepalive_interval = options.keepalive_interval;
        self.max_keepalive = options.keepalive_probes;
        self.rcv_high_water = options.receive_buffer as u32;
        self.control.set(Control::NO_NAGLE, !options.nagle);
        self.control.set(Control::NO_KEEPALIVE, !options.keepalive);
        self.control.set(Control::NO_WS, !options.window_scaling);
        self.control.set(Control::NO_TS, !options.timestamps);
    }

    /// The sequence number of the first byte in the send buffer.
    ///
    /// Until our SYN is acknowledged the buffer starts after it.
    pub fn data_start(&self) -> TcpSeqNumber {
        if self.snd_una == self.iss && !self.state.is_synchronized() {
            self.iss + 1
        } else {
            self.snd_una
        }
    }

    /// The right edge of the send window, `snd_wl2 + snd_wnd`.
    pub fn snd_right(&self) -> TcpSeqNumber {
        self.snd_wl2 + self.snd_wnd as usize
    }

    /// The smallest shift that announces the whole receive buffer.
    pub fn compute_scale(&self) -> u8 {
        let mut scale = 0;
        while scale < crate::wire::tcp::MAX_WINDOW_SCALE
            && (super::MAX_WINDOW << scale) < self.rcv_high_water
        {
            scale += 1;
        }
        scale
    }

    pub fn timer_enabled(&self, timer: Timer) -> bool {
        self.enabled & timer.bit() != 0
    }

    /// Drop everything before `ack` from the retransmission queue.
    pub fn adjust_snd_que(&mut self, ack: TcpSeqNumber) {
        while let Some(front) = self.snd_que.front_mut() {
            if front.end <= ack {
                self.snd_que.pop_front();
                continue;
            }
            if front.seq < ack {
                let end = front.end;
                front.trim(ack, end);
            }
            break;
        }
    }

    /// Forget sent segments beyond a retracted window edge.
    ///
    /// A FIN cut off this way is sent again.
    pub fn truncate_snd_que(&mut self, right: TcpSeqNumber) {
        while let Some(back) = self.snd_que.back_mut() {
            if back.seq >= right {
                if back.flags.fin() {
                    self.control.remove(Control::FIN_SENT);
                }
                self.snd_que.pop_back();
                continue;
            }
            if back.end > right {
                if back.flags.fin() {
                    self.control.remove(Control::FIN_SENT);
                }
                let seq = back.seq;
                back.trim(seq, right);
            }
            break;
        }
    }

    /// Insert a received segment into the reassembly queue.
    ///
    /// The queue stays ordered and free of overlap. Returns whether anything new was queued.
    pub fn queue_segment(&mut self, mut seg: Segment) -> bool {
        let queue = &mut self.rcv_que;
        if queue.is_empty() {
            queue.push_back(seg);
            return true;
        }

        let idx = queue.iter()
            .position(|queued| seg.seq < queued.seq)
            .unwrap_or(queue.len());
        if idx > 0 {
            let prev = &queue[idx - 1];
            if seg.seq < prev.end {
                if seg.end <= prev.end {
                    return false;
                }
                let (left, right) = (prev.end, seg.end);
                seg.trim(left, right);
            }
        }

        queue.insert(idx, seg);
        let next = idx + 1;
        while next < queue.len() {
            let (seq, end) = (queue[idx].seq, queue[idx].end);
            let (node_seq, node_end) = (queue[next].seq, queue[next].end);

            if node_end <= end {
                queue.remove(next);
                continue;
            }
            if node_seq < end {
                if node_seq <= seq {
                    queue.remove(idx);
                    return false;
                }
                queue[idx].trim(seq, node_seq);
            }
            break;
        }
        true
    }
}
