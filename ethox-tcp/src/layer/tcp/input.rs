//! Processing of incoming segments, RFC793 section 3.9 "SEGMENT ARRIVES".
//!
//! The FIN is not processed in step eight but when it is delivered in sequence, together with the
//! data preceding it.
use crate::layer::Error;
use crate::time::Tick;
use crate::wire::TcpOptions;

use super::RTO_MAX;
use super::connection::{Congestion, Control, Segment, State, Timer};
use super::operator::Operator;
use super::output::send_reset;

/// A protocol violation by the peer that resets the connection.
struct Junk;

impl Operator<'_> {
    /// A SYN arrived at a listener and this connection was spawned for it.
    pub fn on_listen_syn(&mut self, seg: Segment, opts: &TcpOptions) {
        let now = self.now;
        self.init_local();
        self.init_peer(&seg, opts);
        self.set_state(State::SynRcvd);
        let cb = self.cb();
        cb.set_timer(Timer::Connect, now, cb.connect_timeout);

        let orig = seg.clone();
        let mut seg = seg;
        self.trim_in_window(&mut seg);
        self.step_six(seg, &orig);
    }

    /// A segment for an existing connection.
    pub fn on_segment(&mut self, seg: Segment, opts: &TcpOptions) {
        let orig = seg.clone();
        let mut seg = seg;
        let cb = self.cb();
        if !seg.flags.syn() {
            seg.wnd <<= cb.snd_wnd_scale;
        }
        cb.idle = 0;

        match cb.state {
            State::Closed | State::Listen => (),
            State::SynSent => self.syn_sent(seg, &orig, opts),
            _ => self.synchronized(seg, &orig, opts),
        }
    }

    fn syn_sent(&mut self, mut seg: Segment, orig: &Segment, opts: &TcpOptions) {
        let now = self.now;
        let cb = &mut self.sock.cb;

        if seg.flags.ack() && seg.ack != cb.iss + 1 {
            net_debug!("tcp {:?}: unacceptable ack {} in SYN-SENT", self.key, seg.ack);
            self.reset_peer(orig);
            return;
        }

        if seg.flags.rst() {
            if seg.flags.ack() {
                net_debug!("tcp {:?}: connection refused", self.key);
                self.close_with(Error::ConnectionReset);
            }
            return;
        }

        if !seg.flags.syn() {
            net_debug!("tcp {:?}: discarding segment without SYN in SYN-SENT", self.key);
            return;
        }

        self.init_peer(&seg, opts);
        let cb = self.cb();
        if seg.flags.ack() {
            cb.snd_una = seg.ack;
        }
        cb.clear_timer(Timer::Rexmit, now);

        if cb.snd_una > cb.iss {
            let una = cb.snd_una;
            cb.adjust_snd_que(una);
            self.set_state(State::Established);
            let cb = self.cb();
            cb.clear_timer(Timer::Connect, now);
            if cb.congestion == Congestion::Open && cb.control.contains(Control::RTT_ON) {
                let measure = cb.rtt_measure;
                cb.compute_rtt(measure);
                cb.control.remove(Control::RTT_ON);
            }
            if self.deliver_data().is_err() {
                self.reset_and_drop(orig);
                return;
            }
            self.trim_in_window(&mut seg);
            self.cb().control.insert(Control::ACK_NOW);
        } else {
            // Simultaneous open, our SYN is answered with SYN-ACK from the queue.
            self.set_state(State::SynRcvd);
            let cb = self.cb();
            let nxt = cb.snd_nxt;
            cb.adjust_snd_que(nxt);
            self.trim_in_window(&mut seg);
        }

        self.step_six(seg, orig);
    }

    fn synchronized(&mut self, mut seg: Segment, orig: &Segment, opts: &TcpOptions) {
        let now = self.now;

        if !self.seq_acceptable(&seg) {
            net_debug!("tcp {:?}: unacceptable segment {} in {}", self.key, seg, self.state());
            if !seg.flags.rst() {
                self.send_ack();
            }
            return;
        }

        if seg.flags.rst() {
            let error = match self.state() {
                State::SynRcvd => Some(Error::ConnectionRefused),
                State::Established
                | State::FinWait1
                | State::FinWait2
                | State::CloseWait => Some(Error::ConnectionReset),
                _ => None,
            };
            net_debug!("tcp {:?}: reset by peer in {}", self.key, self.state());
            match error {
                Some(error) => self.close_with(error),
                None => self.close(),
            }
            return;
        }

        self.trim_in_window(&mut seg);

        if seg.flags.syn() {
            net_debug!("tcp {:?}: SYN in window, resetting", self.key);
            self.reset_peer(orig);
            self.close_with(Error::ConnectionReset);
            return;
        }

        if !seg.flags.ack() {
            net_debug!("tcp {:?}: discarding segment without ACK", self.key);
            return;
        }

        if self.state() == State::SynRcvd {
            let cb = self.cb();
            if !(cb.snd_una < seg.ack && seg.ack <= cb.snd_nxt) {
                net_debug!("tcp {:?}: unacceptable ack {} in SYN-RECEIVED", self.key, seg.ack);
                self.reset_peer(orig);
                return;
            }

            cb.snd_wnd = seg.wnd;
            cb.snd_wnd_max = cb.snd_wnd_max.max(seg.wnd);
            cb.snd_wl1 = seg.seq;
            cb.snd_wl2 = seg.ack;
            // The SYN leaves the send sequence space before the buffer is addressed by it.
            if cb.control.contains(Control::RTT_ON) && cb.rtt_seq < seg.ack {
                let measure = cb.rtt_measure;
                cb.compute_rtt(measure);
                cb.control.remove(Control::RTT_ON);
            }
            cb.snd_una = seg.ack;
            cb.adjust_snd_que(seg.ack);
            self.set_state(State::Established);
            self.cb().clear_timer(Timer::Connect, now);
            if self.deliver_data().is_err() {
                self.reset_and_drop(orig);
                return;
            }
        }

        let cb = self.cb();
        if seg.ack < cb.snd_una {
            net_debug!("tcp {:?}: old ack {}", self.key, seg.ack);
            self.step_six(seg, orig);
            return;
        }
        if seg.ack > cb.snd_nxt {
            net_debug!("tcp {:?}: ack {} of unsent data", self.key, seg.ack);
            self.send_ack();
            return;
        }

        if let Some(ts) = opts.timestamp {
            if cb.control.contains(Control::RCVD_TS) && seg.seq <= cb.rcv_wl2 && cb.rcv_wl2 < seg.end {
                cb.ts_recent = ts.value;
                cb.ts_recent_age = now;
            }
        }

        if seg.ack > cb.snd_una {
            let echo = opts.timestamp
                .filter(|ts| ts.echo != 0 && cb.control.contains(Control::RCVD_TS))
                .map(|ts| ts.echo);
            // An echo older than the largest timeout was never sent on this connection.
            let sample = echo.map(|echo| now.since(Tick(echo))).filter(|&ticks| ticks <= RTO_MAX);
            if let Some(sample) = sample {
                cb.compute_rtt(sample);
                cb.control.remove(Control::RTT_ON);
            } else if cb.control.contains(Control::RTT_ON) && cb.rtt_seq < seg.ack {
                let measure = cb.rtt_measure;
                cb.compute_rtt(measure);
                cb.control.remove(Control::RTT_ON);
            }
        }

        self.congestion_on_ack(&seg);

        let buffered = self.sock.snd.len();
        let cb = self.cb();
        if cb.control.contains(Control::SND_URG) && cb.snd_up < seg.ack {
            cb.control.remove(Control::SND_URG);
        }

        let advanced = seg.ack > cb.snd_una;
        let start = cb.data_start();
        cb.adjust_snd_que(seg.ack);
        cb.snd_una = seg.ack;
        if cb.snd_una == cb.snd_nxt {
            cb.clear_timer(Timer::Rexmit, now);
        } else if advanced {
            cb.set_timer(Timer::Rexmit, now, cb.rto);
        }

        let acked = if seg.ack > start { (seg.ack - start).min(buffered) } else { 0 };
        if acked > 0 {
            self.data_sent(acked);
        }

        self.update_window(&seg);

        if self.fin_acked() {
            return;
        }

        self.step_six(seg, orig);
    }

    /// Take the window of an acceptable segment, handling its retraction.
    fn update_window(&mut self, seg: &Segment) {
        let now = self.now;
        let slack = u32::from(self.config.retraction_slack);
        let cb = &mut self.sock.cb;

        if !(cb.snd_wl1 < seg.seq || (cb.snd_wl1 == seg.seq && cb.snd_wl2 <= seg.ack)) {
            return;
        }

        let right = seg.ack + seg.wnd as usize;
        if right < cb.snd_right() {
            if cb.snd_wl1 == seg.seq && cb.snd_wl2 == seg.ack && seg.len() == 0 {
                return;
            }

            net_warn!("tcp {:?}: peer shrinks the window to {}", self.key, right);
            if cb.congestion == Congestion::Recover && right < cb.recover {
                cb.recover = right;
            }
            if cb.congestion == Congestion::Loss && right < cb.loss_recover {
                cb.loss_recover = right;
            }

            if right < cb.snd_nxt {
                let allowance = 1u64.checked_shl(u32::from(cb.snd_wnd_scale) + slack).unwrap_or(u64::max_value());
                if cb.snd_wnd_scale != 0 && (cb.snd_nxt - right) as u64 <= allowance {
                    net_warn!("tcp {:?}: window retraction within the scale allowance", self.key);
                } else {
                    cb.snd_nxt = right;
                    cb.truncate_snd_que(right);
                    if right == cb.snd_una {
                        cb.clear_timer(Timer::Rexmit, now);
                        cb.set_probe_timer(now);
                    }
                }
            }
        }

        cb.snd_wnd = seg.wnd;
        cb.snd_wnd_max = cb.snd_wnd_max.max(seg.wnd);
        cb.snd_wl1 = seg.seq;
        cb.snd_wl2 = seg.ack;
    }

    /// Transitions on the acknowledgement of our FIN. Returns true when the segment is consumed.
    fn fin_acked(&mut self) -> bool {
        let now = self.now;
        let cb = self.cb();
        if !cb.control.contains(Control::FIN_SENT) || cb.snd_una != cb.snd_nxt {
            return false;
        }

        cb.control.insert(Control::FIN_ACKED);
        match cb.state {
            State::FinWait1 => {
                cb.clear_all_timers();
                self.set_state(State::FinWait2);
                let cb = self.cb();
                cb.set_timer(Timer::FinWait2, now, cb.fin_wait2_timeout);
                false
            },
            State::Closing => {
                cb.clear_all_timers();
                self.set_state(State::TimeWait);
                self.enter_time_wait()
            },
            State::LastAck => {
                self.close();
                true
            },
            State::TimeWait => {
                // A repeated FIN, acknowledge it once more and restart the wait.
                self.send_ack();
                self.enter_time_wait();
                true
            },
            _ => false,
        }
    }

    /// Arm the TIME_WAIT timer, or close right away if it is disabled.
    fn enter_time_wait(&mut self) -> bool {
        let now = self.now;
        let cb = self.cb();
        if cb.time_wait_timeout != 0 {
            cb.set_timer(Timer::TwoMsl, now, cb.time_wait_timeout);
            false
        } else {
            net_debug!("tcp {:?}: TIME_WAIT disabled, closing", self.key);
            self.close();
            true
        }
    }

    /// Urgent pointer, data and the final output decision.
    fn step_six(&mut self, seg: Segment, orig: &Segment) {
        let now = self.now;
        let cb = self.cb();

        if seg.flags.urg() && !cb.state.fin_received() {
            let urg = seg.seq + usize::from(seg.urg);
            if !cb.control.contains(Control::RCVD_URG) || urg > cb.rcv_up {
                cb.rcv_up = urg;
            }
            cb.control.insert(Control::RCVD_URG);
        }

        let consumed = seg.len() != 0;
        if consumed {
            if cb.state.fin_received() {
                net_debug!("tcp {:?}: data after FIN", self.key);
                self.reset_and_drop(orig);
                return;
            }

            self.queue_data(seg);
            if self.deliver_data().is_err() {
                self.reset_and_drop(orig);
                return;
            }
            let cb = self.cb();
            if !cb.rcv_que.is_empty() {
                cb.control.insert(Control::ACK_NOW);
            }
        }

        if self.state() == State::Closed {
            return;
        }

        if self.state().is_synchronized() {
            self.cb().set_keepalive_timer(now);
        }

        let sent = self.to_send_data(false);
        let cb = &self.sock.cb;
        if cb.state != State::Closed
            && sent == 0
            && (cb.control.contains(Control::ACK_NOW) || consumed || cb.delayed_ack != 0)
        {
            self.to_send_ack();
        }
    }

    /// `rcv_nxt <= seg.end && seg.seq < rcv_wl2 + rcv_wnd`.
    ///
    /// An empty segment at `rcv_nxt` always passes, it carries the acks for a closed window.
    fn seq_acceptable(&self, seg: &Segment) -> bool {
        let cb = &self.sock.cb;
        if seg.len() == 0 && seg.seq == cb.rcv_nxt {
            return true;
        }
        cb.rcv_nxt <= seg.end && seg.seq < cb.rcv_wl2 + cb.rcv_wnd as usize
    }

    fn trim_in_window(&self, seg: &mut Segment) {
        let cb = &self.sock.cb;
        seg.trim(cb.rcv_nxt, cb.rcv_wl2 + cb.rcv_wnd as usize);
    }

    /// Answer the segment with a RST, the connection stays.
    fn reset_peer(&mut self, orig: &Segment) {
        let (local, remote) = (self.sock.cb.local, self.sock.cb.remote);
        let _ = send_reset(&mut *self.net, orig, local, remote);
    }

    fn reset_and_drop(&mut self, orig: &Segment) {
        self.reset_peer(orig);
        self.close();
    }

    /// Insert into the reassembly queue, ordered and without overlap.
    fn queue_data(&mut self, seg: Segment) {
        let cb = self.cb();
        let in_order = cb.rcv_que.is_empty();
        if cb.queue_segment(seg) && !in_order {
            cb.control.insert(Control::ACK_NOW);
        }
    }

    /// Hand in-order segments to the socket and process a FIN among them.
    fn deliver_data(&mut self) -> Result<(), Junk> {
        let now = self.now;
        if self.sock.cb.rcv_que.is_empty() || !self.state().is_synchronized() {
            return Ok(());
        }

        loop {
            let cb = self.cb();
            let mut seg = match cb.rcv_que.front() {
                Some(front) if front.seq <= cb.rcv_nxt => front.clone(),
                _ => return Ok(()),
            };
            cb.rcv_que.pop_front();
            if seg.seq < cb.rcv_nxt {
                let end = seg.end;
                seg.trim(cb.rcv_nxt, end);
            }
            cb.rcv_nxt = cb.rcv_nxt.max(seg.end);

            if seg.flags.fin() && (!cb.rcv_que.is_empty() || cb.state.fin_received()) {
                net_debug!("tcp {:?}: junk FIN", self.key);
                return Err(Junk);
            }

            if seg.flags.psh() {
                cb.control.insert(Control::ACK_NOW);
            }

            if !seg.data.is_empty() {
                let data_seq = seg.data_seq();
                let data_end = data_seq + seg.data.len();
                let urgent = if cb.control.contains(Control::RCVD_URG) && data_seq <= cb.rcv_up {
                    if data_end <= cb.rcv_up {
                        seg.data.len()
                    } else {
                        (cb.rcv_up - data_seq + 1).min(seg.data.len())
                    }
                } else {
                    0
                };
                self.data_received(seg.data.clone(), urgent);
            }

            if !seg.flags.fin() {
                continue;
            }

            net_debug!("tcp {:?}: FIN received in {}", self.key, self.state());
            self.cb().control.insert(Control::ACK_NOW);
            match self.state() {
                State::SynRcvd | State::Established => self.set_state(State::CloseWait),
                State::FinWait1 if !self.sock.cb.control.contains(Control::FIN_ACKED) => {
                    self.set_state(State::Closing)
                },
                State::FinWait1 | State::FinWait2 => {
                    self.cb().clear_all_timers();
                    self.set_state(State::TimeWait);
                    let cb = self.cb();
                    if cb.time_wait_timeout != 0 {
                        cb.set_timer(Timer::TwoMsl, now, cb.time_wait_timeout);
                    } else {
                        self.send_ack();
                        self.no_more_data();
                        self.close();
                        return Ok(());
                    }
                },
                _ => return Err(Junk),
            }
            self.no_more_data();
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use crate::storage::NetBuf;
    use crate::wire::{TcpFlags, TcpSeqNumber};
    use super::super::connection::{Cb, Segment};

    fn data(seq: i32, bytes: &[u8]) -> Segment {
        Segment::new(TcpSeqNumber(seq), TcpFlags::ACK, NetBuf::from_slice(bytes))
    }

    fn queue(segments: &[Segment]) -> Vec<(i32, i32)> {
        let mut cb = Cb::new();
        for seg in segments {
            cb.queue_segment(seg.clone());
        }
        assert!(cb.rcv_que.iter().zip(cb.rcv_que.iter().skip(1)).all(|(a, b)| a.end <= b.seq));
        cb.rcv_que.iter().map(|seg| (seg.seq.0, seg.end.0)).collect()
    }

    #[test]
    fn reassembly_ordered() {
        assert_eq!(queue(&[data(20, b"cc"), data(10, b"aa"), data(15, b"bb")]),
            [(10, 12), (15, 17), (20, 22)]);
    }

    #[test]
    fn reassembly_overlap() {
        // Contained in the predecessor.
        assert_eq!(queue(&[data(10, b"abcdef"), data(11, b"bc")]), [(10, 16)]);
        // Overlapping the predecessor.
        assert_eq!(queue(&[data(10, b"abcd"), data(12, b"cdef")]), [(10, 14), (14, 16)]);
        // Covering the successors.
        assert_eq!(queue(&[data(12, b"c"), data(14, b"e"), data(10, b"abcdefgh")]), [(10, 18)]);
        // Overlapping the successor.
        assert_eq!(queue(&[data(14, b"efgh"), data(10, b"abcdef")]), [(10, 14), (14, 18)]);
    }
}
