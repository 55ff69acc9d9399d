//! Round trip estimation and NewReno congestion control.
//!
//! Relevant material for reading:
//! Computing the retransmission timer: https://tools.ietf.org/html/rfc6298
//! TCP congestion control: https://tools.ietf.org/html/rfc5681
//! NewReno modification to fast recovery: https://tools.ietf.org/html/rfc6582
use super::{FOLD_RTT, MAX_WINDOW, RTO_MAX, RTO_MIN, RTT_SHIFT};
use super::connection::{Cb, Congestion, Control, Segment};
use super::operator::Operator;

impl Cb {
    /// Feed a round trip sample, in ticks, into the estimator.
    ///
    /// The fixed point values are computed in 64 bits and saturate when stored.
    pub fn compute_rtt(&mut self, measure: u32) {
        let measure = u64::from(measure);
        let (srtt, rttvar) = if self.srtt != 0 {
            let srtt = u64::from(self.srtt);
            let scaled = measure << RTT_SHIFT;
            let var = if srtt > scaled { srtt - scaled } else { scaled - srtt };
            (7 * (srtt >> RTT_SHIFT) + measure, (3 * u64::from(self.rttvar) + var) >> 2)
        } else {
            // First measurement, srtt = m and rttvar = m/2, both scaled by 8.
            (measure << RTT_SHIFT, measure << 2)
        };

        let rto = (srtt + (4 * rttvar).max(1 << RTT_SHIFT)) >> RTT_SHIFT;
        self.srtt = saturate(srtt);
        self.rttvar = saturate(rttvar);
        self.rto = saturate(rto).max(RTO_MIN).min(RTO_MAX);
        net_debug!("tcp: rtt sample {}, srtt {} rttvar {} rto {}",
            measure, self.srtt, self.rttvar, self.rto);
    }

    /// Double the retransmission timeout after a timeout.
    ///
    /// After repeated timeouts the estimate is folded into the variance, the next sample then
    /// starts afresh.
    pub fn backoff_rto(&mut self) {
        if self.loss_times >= FOLD_RTT && self.srtt != 0 {
            self.rttvar = self.rttvar.saturating_add(self.srtt >> 2);
            self.srtt = 0;
        }
        self.rto = (self.rto << 1).max(RTO_MIN).min(RTO_MAX);
    }

    /// Whether the segment only repeats the last acknowledgement.
    pub fn is_dup_ack(&self, seg: &Segment) -> bool {
        seg.ack == self.snd_una
            && self.snd_una != self.snd_nxt
            && seg.len() == 0
            && seg.wnd == self.snd_wnd
    }

    fn grow_window(&mut self) {
        let mss = u32::from(self.snd_mss);
        if self.cwnd < self.ssthresh {
            self.cwnd += mss;
        } else {
            self.cwnd += (mss * mss / self.cwnd.max(1)).max(1);
        }
        self.cwnd = self.cwnd.min(MAX_WINDOW << self.snd_wnd_scale);
    }

    fn flight_size(&self) -> u32 {
        (self.snd_nxt - self.snd_una) as u32
    }
}

fn saturate(value: u64) -> u32 {
    value.min(u64::from(u32::max_value())) as u32
}

impl Operator<'_> {
    /// Update the congestion state for an acceptable acknowledgement.
    ///
    /// Runs before `snd_una` moves to the acknowledged sequence number.
    pub fn congestion_on_ack(&mut self, seg: &Segment) {
        let cb = &mut self.sock.cb;
        let new_data = seg.ack > cb.snd_una;
        let dup = cb.is_dup_ack(seg);
        let before = cb.congestion;

        match before {
            Congestion::Open => self.open_ack(seg, dup),
            Congestion::Recover => self.recover_ack(seg, dup),
            Congestion::Loss => self.loss_ack(seg),
        }

        let cb = &mut self.sock.cb;
        if new_data && before != Congestion::Recover {
            cb.grow_window();
        }
    }

    fn open_ack(&mut self, seg: &Segment, dup: bool) {
        let cb = &mut self.sock.cb;
        if !dup {
            if seg.ack > cb.snd_una {
                cb.dup_ack = 0;
            }
            return;
        }

        cb.dup_ack += 1;
        if cb.dup_ack < 3 {
            return;
        }

        // Fast retransmit.
        let mss = u32::from(cb.snd_mss);
        cb.ssthresh = (cb.flight_size() / 2).max(2 * mss);
        cb.recover = cb.snd_nxt;
        cb.congestion = Congestion::Recover;
        cb.control.remove(Control::RTT_ON);
        net_debug!("tcp {:?}: three duplicate acks, fast retransmit of {}", self.key, cb.snd_una);

        let una = cb.snd_una;
        self.retransmit(una);
        let cb = &mut self.sock.cb;
        cb.cwnd = cb.ssthresh + 3 * mss;
    }

    fn recover_ack(&mut self, seg: &Segment, dup: bool) {
        let cb = &mut self.sock.cb;
        let mss = u32::from(cb.snd_mss);

        if dup {
            cb.cwnd += mss;
            return;
        }
        if seg.ack <= cb.snd_una {
            return;
        }

        if seg.ack >= cb.recover {
            cb.cwnd = cb.ssthresh.min(cb.flight_size() + mss);
            cb.congestion = Congestion::Open;
            cb.dup_ack = 0;
            net_debug!("tcp {:?}: full ack, leaving fast recovery", self.key);
        } else {
            let mut acked = (seg.ack - cb.snd_una) as u32;
            // Deflate by the newly acknowledged data, adding back one segment.
            if acked >= mss {
                acked -= mss;
            }
            cb.cwnd = cb.cwnd.saturating_sub(acked);
            net_debug!("tcp {:?}: partial ack {} in fast recovery", self.key, seg.ack);
            self.retransmit(seg.ack);
        }
    }

    fn loss_ack(&mut self, seg: &Segment) {
        let cb = &mut self.sock.cb;
        if seg.ack <= cb.snd_una {
            return;
        }

        cb.loss_times = 0;
        cb.dup_ack = 0;
        if seg.ack >= cb.loss_recover {
            cb.congestion = Congestion::Open;
            net_debug!("tcp {:?}: recovered from loss", self.key);
        } else {
            self.retransmit(seg.ack);
        }
    }
}
