//! Application requests entering the protocol.
use crate::layer::{Error, Result};
use crate::layer::socket::{Outcome, Sink};

use super::connection::{Control, State, Timer};
use super::operator::Operator;

/// A request of the socket layer to the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Request {
    /// Open the connection actively.
    Connect,
    /// Data was appended to the send buffer.
    Send,
    /// Data was appended and should be pushed.
    SendPush,
    /// Urgent data was appended.
    SendUrgent,
    /// The application read data from the receive buffer.
    Consumed,
    /// Close gracefully.
    Close,
    /// Reset the connection.
    Abort,
    /// Forget the connection and fail all requests.
    Flush,
}

impl Operator<'_> {
    pub fn dispatch(&mut self, request: Request) -> Result<()> {
        net_trace!("tcp {:?}: {:?} in {}", self.key, request, self.state());
        match request {
            Request::Connect => self.on_app_connect(),
            Request::Send => self.on_app_send(),
            Request::SendPush => {
                let end = self.send_end();
                let cb = self.cb();
                cb.snd_psh = end;
                cb.control.insert(Control::SND_PSH);
                self.on_app_send()
            },
            Request::SendUrgent => {
                let end = self.send_end();
                let cb = self.cb();
                cb.snd_up = end - 1;
                cb.control.insert(Control::SND_URG);
                self.on_app_send()
            },
            Request::Consumed => {
                self.on_app_consume();
                Ok(())
            },
            Request::Close => {
                self.on_app_close();
                Ok(())
            },
            Request::Abort => {
                self.on_app_abort();
                Ok(())
            },
            Request::Flush => {
                self.on_app_flush();
                Ok(())
            },
        }
    }

    /// The sequence number after the last buffered byte.
    fn send_end(&self) -> crate::wire::TcpSeqNumber {
        self.sock.cb.data_start() + self.sock.snd.len()
    }

    fn on_app_connect(&mut self) -> Result<()> {
        if self.state() != State::Closed {
            return Err(Error::AccessDenied);
        }

        let now = self.now;
        self.init_local();
        self.set_state(State::SynSent);
        let cb = self.cb();
        cb.set_timer(Timer::Connect, now, cb.connect_timeout);
        self.to_send_data(true);
        Ok(())
    }

    fn on_app_send(&mut self) -> Result<()> {
        match self.state() {
            State::Established | State::CloseWait => {
                self.to_send_data(false);
                Ok(())
            },
            State::SynSent | State::SynRcvd => Ok(()),
            _ => Err(Error::ConnectionFin),
        }
    }

    /// Open the window after the application read data.
    fn on_app_consume(&mut self) {
        if self.state() != State::Established {
            return;
        }

        let old = self.rcv_win_old();
        if self.rcv_win_now() <= old {
            return;
        }

        let cb = self.cb();
        if old < u32::from(cb.rcv_mss) {
            net_debug!("tcp {:?}: window update, old window {} below one segment", self.key, old);
            self.send_ack();
        } else if cb.delayed_ack == 0 {
            cb.delayed_ack = 1;
        }
    }

    fn on_app_close(&mut self) {
        if !self.sock.cb.rcv_que.is_empty() || !self.sock.rcv.is_empty() {
            net_warn!("tcp {:?}: closing with unread data, resetting", self.key);
            self.reset_connection();
            self.close();
            return;
        }

        match self.state() {
            State::Closed | State::Listen | State::SynSent => {
                self.close();
                return;
            },
            State::SynRcvd | State::Established => self.set_state(State::FinWait1),
            State::CloseWait => self.set_state(State::LastAck),
            _ => (),
        }
        self.to_send_data(true);
    }

    fn on_app_abort(&mut self) {
        match self.state() {
            State::SynRcvd
            | State::Established
            | State::FinWait1
            | State::FinWait2
            | State::CloseWait => self.reset_connection(),
            _ => (),
        }
        self.close();
    }

    /// Drop the connection without notifying the socket, then fail its requests.
    fn on_app_flush(&mut self) {
        let state = self.state();
        if state.is_synchronized() && state != State::TimeWait {
            self.reset_connection();
        }
        if state == State::Closed {
            if let Some(token) = self.sock.close_token.take() {
                self.sink().signal(token.event, Outcome::Close(Ok(())));
            }
        }
        self.discard();

        let key = self.key;
        self.sock.flush(&mut Sink {
            socket: key,
            out: &mut *self.completions,
        });
    }
}
