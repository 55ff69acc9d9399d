//! Negotiation of the MSS, window scale and timestamp options.
//!
//! The wire format lives in `wire::tcp`. This decides which options a segment carries and which
//! of the received ones count.
use crate::time::Tick;
use crate::wire::{TcpFlags, TcpOptions, TcpTimestamp};

use super::connection::{Cb, Control, State};

impl Cb {
    /// The options of an outgoing segment.
    ///
    /// A SYN of an active open offers window scaling and timestamps unless disabled. The SYN-ACK
    /// only answers what the peer offered. Later segments carry a timestamp once both agreed.
    pub fn options_for(&self, syn: bool, now: Tick) -> TcpOptions {
        let mut options = TcpOptions::default();

        let timestamps = if syn {
            options.max_seg_size = Some(self.rcv_mss);
            let offer = self.state == State::SynSent;
            if !self.control.contains(Control::NO_WS)
                && (offer || self.control.contains(Control::RCVD_WS))
            {
                options.window_scale = Some(self.compute_scale());
            }
            !self.control.contains(Control::NO_TS)
                && (offer || self.control.contains(Control::RCVD_TS))
        } else {
            self.control.contains(Control::RCVD_TS)
        };

        if timestamps {
            options.timestamp = Some(TcpTimestamp {
                value: now.value(),
                echo: self.ts_recent,
            });
        }
        options
    }
}

/// The options of a received segment the connection may act upon.
///
/// MSS and window scale are only meaningful in a SYN, RFC7323 requires ignoring them elsewhere.
pub(crate) fn received(options: TcpOptions, flags: TcpFlags) -> TcpOptions {
    if flags.syn() {
        return options;
    }

    TcpOptions {
        max_seg_size: None,
        window_scale: None,
        ..options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Checksum, TcpPacket, TcpRepr, TcpSeqNumber};

    #[test]
    fn active_offer() {
        let mut cb = Cb::new();
        cb.state = State::SynSent;
        cb.rcv_mss = 1460;
        let options = cb.options_for(true, Tick(9));
        assert_eq!(options.max_seg_size, Some(1460));
        assert_eq!(options.window_scale, Some(cb.compute_scale()));
        assert_eq!(options.timestamp, Some(TcpTimestamp { value: 9, echo: 0 }));
    }

    #[test]
    fn passive_answer() {
        let mut cb = Cb::new();
        cb.state = State::SynRcvd;
        let options = cb.options_for(true, Tick(1));
        assert!(options.max_seg_size.is_some());
        assert_eq!(options.window_scale, None);
        assert_eq!(options.timestamp, None);

        cb.control.insert(Control::RCVD_WS);
        cb.control.insert(Control::NO_TS);
        cb.control.insert(Control::RCVD_TS);
        let options = cb.options_for(true, Tick(1));
        assert!(options.window_scale.is_some());
        assert_eq!(options.timestamp, None);
    }

    #[test]
    fn timestamps_after_agreement() {
        let mut cb = Cb::new();
        cb.state = State::Established;
        assert_eq!(cb.options_for(false, Tick(3)), TcpOptions::default());

        cb.control.insert(Control::RCVD_TS);
        cb.ts_recent = 77;
        let options = cb.options_for(false, Tick(3));
        assert_eq!(options.max_seg_size, None);
        assert_eq!(options.timestamp, Some(TcpTimestamp { value: 3, echo: 77 }));
    }

    #[test]
    fn options_survive_the_wire() {
        let mut cb = Cb::new();
        cb.state = State::SynSent;
        cb.rcv_mss = 1400;
        cb.ts_recent = 5;
        let options = cb.options_for(true, Tick(42));

        let repr = TcpRepr {
            src_port: 1,
            dst_port: 2,
            flags: TcpFlags::SYN,
            seq_number: TcpSeqNumber(0),
            ack_number: TcpSeqNumber(0),
            window_len: 0,
            urgent_at: 0,
            options,
            payload_len: 0,
        };
        let mut buffer = alloc::vec![0; repr.buffer_len()];
        repr.emit(&mut TcpPacket::new_unchecked(&mut buffer[..]));

        let packet = TcpPacket::new_unchecked(&buffer[..]);
        TcpRepr::parse(&packet, Checksum::Ignored).unwrap();
        assert_eq!(packet.parse_options().unwrap(), options);
    }

    #[test]
    fn syn_options_dropped_later() {
        let options = TcpOptions {
            max_seg_size: Some(1000),
            window_scale: Some(3),
            timestamp: Some(TcpTimestamp { value: 1, echo: 2 }),
        };
        let kept = received(options, TcpFlags::ACK);
        assert_eq!(kept.max_seg_size, None);
        assert_eq!(kept.window_scale, None);
        assert_eq!(kept.timestamp, options.timestamp);
        assert_eq!(received(options, TcpFlags::SYN), options);
    }
}
