//! The connection timers.
//!
//! Each timer is an expiry tick plus a bit in the enabled set. The earliest expiry is cached as a
//! countdown so that a tick without any due timer costs one decrement per connection.
use crate::layer::Error;
use crate::time::{Expiration, Tick};

use super::{RTO_MAX, RTO_MIN};
use super::connection::{Cb, Control, State, Timer};
use super::operator::Operator;

impl Cb {
    /// Arm a timer to expire `ticks` from now, replacing an earlier expiry.
    pub fn set_timer(&mut self, timer: Timer, now: Tick, ticks: u32) {
        self.enabled |= timer.bit();
        self.timer[timer as usize] = now + ticks;
        self.update_timer(now);
    }

    pub fn clear_timer(&mut self, timer: Timer, now: Tick) {
        self.enabled &= !timer.bit();
        self.update_timer(now);
    }

    pub fn clear_all_timers(&mut self) {
        self.enabled = 0;
        self.control.remove(Control::TIMER_ON);
    }

    /// When a timer fires, `Never` while it is disabled.
    pub fn expiration(&self, timer: Timer) -> Expiration {
        if self.timer_enabled(timer) {
            Expiration::When(self.timer[timer as usize])
        } else {
            Expiration::Never
        }
    }

    /// Recompute the countdown to the earliest enabled timer.
    pub fn update_timer(&mut self, now: Tick) {
        let next = Timer::ALL.iter()
            .map(|&timer| self.expiration(timer))
            .fold(Expiration::Never, Expiration::min);

        match next.remaining(now) {
            Some(ticks) => {
                self.next_expire = ticks.min(i32::max_value() as u32) as i32;
                self.control.insert(Control::TIMER_ON);
            },
            None => self.control.remove(Control::TIMER_ON),
        }
    }

    /// Arm the keepalive timer after the peer showed signs of life.
    pub fn set_keepalive_timer(&mut self, now: Tick) {
        if self.control.contains(Control::NO_KEEPALIVE) {
            return;
        }

        // A probe is answered when the idle counter was reset since it went out.
        if !self.timer_enabled(Timer::Keepalive) || self.idle < self.keepalive_time {
            self.set_timer(Timer::Keepalive, now, self.keepalive_time);
            self.keepalive_probes = 0;
        } else {
            self.set_timer(Timer::Keepalive, now, self.keepalive_interval);
        }
    }

    /// Arm the persist timer with exponential backoff.
    pub fn set_probe_timer(&mut self, now: Tick) {
        if !self.probe_on {
            self.probe_time = self.rto;
            self.probe_on = true;
        } else {
            self.probe_time <<= 1;
        }
        self.probe_time = self.probe_time.max(RTO_MIN).min(RTO_MAX);
        self.set_timer(Timer::Probe, now, self.probe_time);
    }
}

impl Operator<'_> {
    /// Advance one connection by one tick.
    ///
    /// The engine clock has already been advanced.
    pub fn on_tick(&mut self) {
        if self.state() == State::Closed {
            return;
        }

        let cb = self.cb();
        if cb.control.contains(Control::RTT_ON) {
            cb.rtt_measure += 1;
        }
        cb.idle = cb.idle.saturating_add(1);
        if cb.delayed_ack != 0 {
            self.send_ack();
        }

        let cb = self.cb();
        if !cb.control.contains(Control::TIMER_ON) {
            return;
        }
        cb.next_expire -= 1;
        if cb.next_expire > 0 {
            return;
        }

        for &timer in Timer::ALL.iter() {
            let cb = &mut self.sock.cb;
            if !cb.expiration(timer).is_due(self.now) {
                continue;
            }

            // Disabled first, the handler may arm it again.
            cb.enabled &= !timer.bit();
            net_debug!("tcp {:?}: {:?} timer expired in {}", self.key, timer, cb.state);
            self.expire(timer);

            if self.state() == State::Closed {
                return;
            }
        }

        let now = self.now;
        self.cb().update_timer(now);
    }

    fn expire(&mut self, timer: Timer) {
        match timer {
            Timer::Connect => self.connect_timeout(),
            Timer::Rexmit => self.rexmit_timeout(),
            Timer::Probe => self.probe_timeout(),
            Timer::Keepalive => self.keepalive_timeout(),
            Timer::FinWait2 | Timer::TwoMsl => self.close(),
        }
    }

    fn connect_timeout(&mut self) {
        if self.state().is_synchronized() {
            return;
        }
        if self.state() == State::SynRcvd {
            self.reset_connection();
        }
        self.close_with(Error::Timeout);
    }

    fn rexmit_timeout(&mut self) {
        let now = self.now;
        let cb = &mut self.sock.cb;
        let flight = (cb.snd_nxt - cb.snd_una) as u32;
        let mss = u32::from(cb.snd_mss);
        cb.ssthresh = (2 * mss).max(flight / 2);
        cb.cwnd = mss;
        cb.loss_recover = cb.snd_nxt;
        cb.loss_times += 1;

        if cb.loss_times > cb.max_retries && !cb.timer_enabled(Timer::Connect) {
            net_debug!("tcp {:?}: retransmitted {} times, giving up", self.key, cb.loss_times);
            self.close_with(Error::Timeout);
            return;
        }

        cb.backoff_rto();
        let una = cb.snd_una;
        self.retransmit(una);

        let cb = self.cb();
        cb.set_timer(Timer::Rexmit, now, cb.rto);
        cb.congestion = super::Congestion::Loss;
        cb.control.remove(Control::RTT_ON);
    }

    fn probe_timeout(&mut self) {
        if self.unsent() == 0 {
            self.cb().probe_on = false;
            return;
        }
        if self.data_to_send(true) != 0 && self.to_send_data(true) > 0 {
            self.cb().probe_on = false;
            return;
        }

        self.send_zero_probe();
        let now = self.now;
        self.cb().set_probe_timer(now);
    }

    fn keepalive_timeout(&mut self) {
        let cb = self.cb();
        cb.keepalive_probes += 1;
        if cb.keepalive_probes > cb.max_keepalive {
            self.close_with(Error::Timeout);
            return;
        }

        self.send_zero_probe();
        let now = self.now;
        let cb = self.cb();
        cb.set_timer(Timer::Keepalive, now, cb.keepalive_interval);
    }
}
