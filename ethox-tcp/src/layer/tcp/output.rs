//! Segment construction and transmission.
use alloc::vec;
use alloc::vec::Vec;

use crate::layer::Result;
use crate::layer::ip::Network;
use crate::storage::NetBuf;
use crate::wire::{IpEndpoint, TcpFlags, TcpOptions, TcpPacket, TcpRepr, TcpSeqNumber};

use super::MAX_WINDOW;
use super::connection::{Control, Congestion, Segment, State, Timer};
use super::operator::Operator;

/// The flags of segments sent in each state.
fn out_flags(state: State) -> TcpFlags {
    match state {
        State::Closed | State::Listen => TcpFlags::default(),
        State::SynSent => TcpFlags::SYN,
        State::SynRcvd => TcpFlags::SYN | TcpFlags::ACK,
        State::Established
        | State::FinWait2
        | State::TimeWait
        | State::CloseWait => TcpFlags::ACK,
        State::FinWait1
        | State::Closing
        | State::LastAck => TcpFlags::FIN | TcpFlags::ACK,
    }
}

/// Serialize a header and payload, checksum included.
fn build(repr: &TcpRepr, payload: &[u8], src: IpEndpoint, dst: IpEndpoint) -> Vec<u8> {
    let mut buffer = vec![0; repr.buffer_len()];
    let mut packet = TcpPacket::new_unchecked(&mut buffer[..]);
    repr.emit(&mut packet);
    packet.payload_mut_slice().copy_from_slice(payload);
    packet.fill_checksum(src.addr, dst.addr);
    buffer
}

/// Answer a segment that has no connection with a RST.
///
/// A RST is never answered.
pub(crate) fn send_reset(
    net: &mut dyn Network,
    seg: &Segment,
    local: IpEndpoint,
    remote: IpEndpoint,
) -> Result<()> {
    if seg.flags.rst() {
        return Ok(());
    }

    let (flags, seq_number, ack_number) = if seg.flags.ack() {
        (TcpFlags::RST, seg.ack, TcpSeqNumber::default())
    } else {
        (TcpFlags::RST | TcpFlags::ACK, TcpSeqNumber::default(), seg.seq + seg.len())
    };

    let repr = TcpRepr {
        src_port: local.port,
        dst_port: remote.port,
        flags,
        seq_number,
        ack_number,
        window_len: 0,
        urgent_at: 0,
        options: TcpOptions::default(),
        payload_len: 0,
    };
    net_debug!("tcp: reset {} -> {}: {}", local, remote, repr);
    net.send_packet(&build(&repr, &[], local, remote), local.addr, remote.addr)
}

impl Operator<'_> {
    /// Bytes of the send buffer not yet sent.
    pub fn unsent(&self) -> usize {
        let cb = &self.sock.cb;
        let end = cb.data_start() + self.sock.snd.len();
        if end > cb.snd_nxt { end - cb.snd_nxt } else { 0 }
    }

    /// The window the peer still sees, `max(0, rcv_wl2 + rcv_wnd - rcv_nxt)`.
    pub fn rcv_win_old(&self) -> u32 {
        let cb = &self.sock.cb;
        let right = cb.rcv_wl2 + cb.rcv_wnd as usize;
        if right > cb.rcv_nxt { (right - cb.rcv_nxt) as u32 } else { 0 }
    }

    /// The window to advertise now.
    ///
    /// Receiver side silly window avoidance: the window only opens by at least one segment or
    /// half the buffer.
    pub fn rcv_win_now(&self) -> u32 {
        let old = self.rcv_win_old();
        let free = self.sock.rcv.free_space() as u32;
        let increase = free.saturating_sub(old);

        if increase > u32::from(self.sock.cb.snd_mss)
            || 2 * increase as usize >= self.sock.rcv.high_water()
        {
            free
        } else {
            old
        }
    }

    /// The amount of new data that may be sent now.
    ///
    /// Implements sender side silly window avoidance and Nagle unless `force` is set.
    pub fn data_to_send(&mut self, force: bool) -> usize {
        let left = self.unsent();
        let cb = &mut self.sock.cb;

        let limit = cb.snd_right().min(cb.snd_una + cb.cwnd as usize);
        let win = if limit > cb.snd_nxt { limit - cb.snd_nxt } else { 0 };
        let mss = usize::from(cb.snd_mss);
        let len = win.min(left).min(mss);

        if force || (len == 0 && left == 0) {
            return len;
        }

        if len != 0 {
            if len == mss || 2 * len >= cb.snd_wnd_max as usize {
                return len;
            }
            if len == left && (cb.snd_nxt == cb.snd_una || cb.control.contains(Control::NO_NAGLE)) {
                return len;
            }
        }

        if !cb.timer_enabled(Timer::Rexmit) {
            net_trace!("tcp {:?}: holding {} bytes, arming probe", self.key, left);
            cb.set_probe_timer(self.now);
        }
        0
    }

    /// Send as much new data as the windows permit, SYN and FIN included.
    ///
    /// Returns the sequence space sent.
    pub fn to_send_data(&mut self, force: bool) -> usize {
        let state = self.state();
        if state == State::Closed || self.sock.cb.control.contains(Control::FIN_SENT) {
            return 0;
        }

        let mut sent = 0;
        loop {
            let mut flags = out_flags(state);
            let mut len = self.data_to_send(force);
            let left = self.unsent();
            let cb = &self.sock.cb;
            let mut seq = cb.snd_nxt;

            if flags.syn() {
                // Our SYN is retransmitted from the queue, never sent twice.
                if cb.snd_que.iter().any(|queued| queued.flags.syn()) {
                    return sent;
                }
                seq = cb.iss;
                len = 0;
            }

            if flags.fin() {
                let end = seq + len;
                if !(len == left && end < cb.snd_right()) {
                    flags.set_fin(false);
                }
            }

            if len == 0 && !flags.syn() && !flags.fin() {
                return sent;
            }

            let data = if len > 0 {
                self.sock.snd.get(seq - cb.data_start(), len)
            } else {
                NetBuf::empty()
            };
            let end = seq + len;
            let push_point = cb.control.contains(Control::SND_PSH)
                && seq < cb.snd_psh
                && cb.snd_psh <= end;
            if push_point || (len > 0 && len == left) {
                flags.set_psh(true);
            }

            let segment = Segment::new(seq, flags, data);
            let cb = self.cb();
            if push_point {
                cb.control.remove(Control::SND_PSH);
            }
            cb.snd_que.push_back(segment.clone());

            let result = self.transmit(&segment);

            let now = self.now;
            let cb = self.cb();
            sent += segment.len();
            if segment.flags.fin() {
                cb.control.insert(Control::FIN_SENT);
            }
            if segment.end > cb.snd_nxt {
                cb.snd_nxt = segment.end;
            }
            if len > 0 && cb.probe_on {
                cb.probe_on = false;
                cb.clear_timer(Timer::Probe, now);
            }
            if !cb.timer_enabled(Timer::Rexmit) {
                cb.set_timer(Timer::Rexmit, now, cb.rto);
            }
            // Karn: no samples from retransmitted data.
            if cb.congestion == Congestion::Open && !cb.control.contains(Control::RTT_ON) {
                cb.control.insert(Control::RTT_ON);
                cb.rtt_seq = seq;
                cb.rtt_measure = 0;
            }

            if result.is_err() || segment.flags.fin() || len != usize::from(cb.snd_mss) {
                return sent;
            }
        }
    }

    /// Fill in the header of a segment from the control block and hand it to the network.
    pub fn transmit(&mut self, seg: &Segment) -> Result<()> {
        let free = self.sock.rcv.free_space() as u32;
        let win = if seg.flags.syn() { free } else { self.rcv_win_now() };
        let now = self.now;
        let cb = &mut self.sock.cb;
        let mut flags = seg.flags;
        let options = cb.options_for(flags.syn(), now);

        // The window of a SYN is never scaled.
        let window_len = if flags.syn() {
            let window = win.min(MAX_WINDOW);
            cb.rcv_wnd = window;
            window as u16
        } else {
            let window = (win >> cb.rcv_wnd_scale).min(MAX_WINDOW);
            cb.rcv_wnd = window << cb.rcv_wnd_scale;
            window as u16
        };

        let mut urgent_at = 0;
        if cb.control.contains(Control::SND_URG) && cb.snd_up >= seg.seq {
            flags.set_urg(true);
            urgent_at = (cb.snd_up - seg.seq).min(usize::from(u16::max_value())) as u16;
        }

        let mut ack_number = TcpSeqNumber::default();
        if flags.ack() {
            ack_number = cb.rcv_nxt;
            cb.rcv_wl2 = cb.rcv_nxt;
            cb.delayed_ack = 0;
            cb.control.remove(Control::ACK_NOW);
        }

        let repr = TcpRepr {
            src_port: cb.local.port,
            dst_port: cb.remote.port,
            flags,
            seq_number: seg.seq,
            ack_number,
            window_len,
            urgent_at,
            options,
            payload_len: seg.data.len(),
        };
        let (local, remote) = (cb.local, cb.remote);
        net_trace!("tcp {:?}: send {}", self.key, repr);

        let packet = build(&repr, seg.data.as_slice(), local, remote);
        let result = self.net.send_packet(&packet, local.addr, remote.addr);
        if let Err(err) = result {
            net_debug!("tcp {:?}: transmission failed: {}", self.key, err);
        }
        result
    }

    /// Acknowledge received data now or schedule a delayed acknowledgement.
    pub fn to_send_ack(&mut self) {
        let cb = &self.sock.cb;
        if cb.control.contains(Control::ACK_NOW) || cb.delayed_ack >= 1 {
            self.send_ack();
            return;
        }

        if self.rcv_win_now() > self.rcv_win_old() {
            self.send_ack();
            return;
        }

        net_trace!("tcp {:?}: delaying ack", self.key);
        self.cb().delayed_ack += 1;
    }

    /// Send a bare acknowledgement.
    pub fn send_ack(&mut self) {
        let seq = self.sock.cb.snd_nxt;
        let segment = Segment::new(seq, TcpFlags::ACK, NetBuf::empty());
        // A failed ack is repeated by the next segment.
        let _ = self.transmit(&segment);
    }

    /// Send an acknowledgement with an old sequence number to provoke one from the peer.
    pub fn send_zero_probe(&mut self) {
        let seq = self.sock.cb.snd_nxt - 1;
        let segment = Segment::new(seq, TcpFlags::ACK, NetBuf::empty());
        let _ = self.transmit(&segment);
    }

    /// Abort the connection towards the peer.
    pub fn reset_connection(&mut self) {
        let cb = &self.sock.cb;
        let repr = TcpRepr {
            src_port: cb.local.port,
            dst_port: cb.remote.port,
            flags: TcpFlags::RST | TcpFlags::ACK,
            seq_number: cb.snd_nxt,
            ack_number: cb.rcv_nxt,
            window_len: 0,
            urgent_at: 0,
            options: TcpOptions::default(),
            payload_len: 0,
        };
        let (local, remote) = (cb.local, cb.remote);
        net_debug!("tcp {:?}: resetting connection in {}", self.key, cb.state);
        let _ = self.net.send_packet(&build(&repr, &[], local, remote), local.addr, remote.addr);
    }

    /// Retransmit from `seq`, at most one segment.
    pub fn retransmit(&mut self, seq: TcpSeqNumber) {
        let cb = &self.sock.cb;
        if seq >= cb.snd_nxt {
            return;
        }

        let right = cb.snd_right();
        let slack = u32::from(cb.snd_wnd_scale) + u32::from(self.config.retraction_slack);
        let allowance = 1usize.checked_shl(slack).unwrap_or(0).min(i32::max_value() as usize);
        let len = if cb.snd_wnd_scale != 0
            && (seq > cb.retxmit_seq_max || (right <= seq && seq <= right + allowance))
        {
            net_warn!("tcp {:?}: retransmitting {} regardless of the receive window", self.key, seq);
            cb.snd_nxt - seq
        } else if right >= seq {
            right - seq
        } else {
            net_warn!("tcp {:?}: retransmission of {} cancelled, window too small", self.key, seq);
            return;
        };

        let len = len.min(usize::from(cb.snd_mss));
        let segment = match self.queued_segment(seq, len) {
            Some(segment) => segment,
            None => return,
        };

        net_debug!("tcp {:?}: retransmit {}", self.key, segment);
        if self.transmit(&segment).is_ok() {
            let cb = self.cb();
            cb.retxmit_seq_max = cb.retxmit_seq_max.max(seq);
        }
    }

    /// The sent segment covering `[seq, seq + len)`, rebuilt from the queue if needed.
    fn queued_segment(&self, seq: TcpSeqNumber, len: usize) -> Option<Segment> {
        let cb = &self.sock.cb;
        let end = (seq + len).min(cb.snd_nxt);
        if end <= seq {
            return None;
        }

        let first = cb.snd_que.iter().find(|queued| queued.seq <= seq && seq < queued.end)?;
        if first.seq == seq && first.end <= end {
            return Some(first.clone());
        }

        let mut flags = TcpFlags::default();
        let mut parts = Vec::new();
        for queued in cb.snd_que.iter().filter(|queued| queued.end > seq && queued.seq < end) {
            let mut piece = queued.clone();
            piece.trim(seq, end);
            flags |= piece.flags;
            parts.push(piece.data);
        }
        flags.set_urg(false);

        Some(Segment::new(seq, flags, NetBuf::concat(&parts)))
    }
}
