//! Notifications from the protocol to the socket.
//!
//! These are the only places where buffer occupancy changes and requests are woken. They run on
//! the connection's `Operator`, effects on other sockets are recorded as `Deferred`.
use crate::layer::Error;
use crate::layer::tcp::{Operator, Request};
use crate::managed::Key;
use crate::storage::NetBuf;

use super::{Outcome, Pending, Sink, SocketState};

/// An effect on another socket, applied by the endpoint after the connection is processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Deferred {
    /// The child finished its handshake, an accept request of the listener may take it.
    WakeListener {
        parent: Key,
        child: Key,
    },
    /// The child closed before it was accepted.
    DestroyChild {
        parent: Key,
        child: Key,
    },
}

impl Operator<'_> {
    pub fn conn_established(&mut self) {
        self.sock.state = SocketState::Connected;

        match self.sock.parent {
            Some(parent) => self.deferred.push(Deferred::WakeListener {
                parent,
                child: self.key,
            }),
            None => if let Some(token) = self.sock.connect_token.take() {
                self.sink().signal(token.event, Outcome::Connect(Ok(())));
            },
        }

        self.process_send_tokens();
    }

    pub fn conn_closed(&mut self) {
        if let Some(token) = self.sock.close_token.take() {
            self.sink().signal(token.event, Outcome::Close(Ok(())));
        }

        let sock = &mut *self.sock;
        sock.flush(&mut Sink {
            socket: self.key,
            out: &mut *self.completions,
        });
        sock.state = SocketState::Closed;

        if let Some(parent) = sock.parent {
            self.deferred.push(Deferred::DestroyChild {
                parent,
                child: self.key,
            });
        }
    }

    /// The peer acknowledged `count` bytes of the send buffer.
    pub fn data_sent(&mut self, count: usize) {
        let mut count = self.sock.snd.acknowledge(count);

        while let Some(pending) = self.sock.processing.front_mut() {
            if pending.remaining > count {
                pending.remaining -= count;
                break;
            }

            count -= pending.remaining;
            if let Some(done) = self.sock.processing.pop_front() {
                self.sink().signal(done.token.event, Outcome::Send(Ok(())));
            }
        }

        self.process_send_tokens();
    }

    /// Move queued send requests into the buffer while it has room above the low water mark.
    pub fn process_send_tokens(&mut self) {
        while self.sock.is_connected() && self.sock.snd.admits() {
            let token = match self.sock.snd_queue.pop_front() {
                Some(token) => token,
                None => return,
            };

            let request = if token.urgent {
                Request::SendUrgent
            } else if token.push {
                Request::SendPush
            } else {
                Request::Send
            };
            let event = token.event;

            self.sock.snd.push(token.data.clone());
            self.sock.processing.push_back(Pending {
                remaining: token.data.len(),
                token,
            });

            if let Err(err) = self.dispatch(request) {
                net_debug!("socket {:?}: send refused: {}", self.key, err);
                let idx = self.sock.processing.iter().position(|p| p.token.event == event);
                if idx.and_then(|idx| self.sock.processing.remove(idx)).is_some() {
                    self.sock.snd.unpush();
                    self.sink().signal(event, Outcome::Send(Err(err)));
                }
            }
        }
    }

    /// In-order bytes arrived, the first `urgent` of them are urgent.
    pub fn data_received(&mut self, data: NetBuf, urgent: usize) {
        net_trace!("socket {:?}: {} bytes received, {} urgent", self.key, data.len(), urgent);
        self.sock.rcv.push(data, urgent);
        self.wake_receive_tokens();
    }

    /// The peer will send nothing more.
    pub fn no_more_data(&mut self) {
        self.sock.no_more_data = true;
        self.wake_receive_tokens();
    }

    /// Complete receive requests from the buffer.
    ///
    /// Once the peer finished and the buffer ran dry the remaining requests fail with
    /// `ConnectionFin`. Returns the number of bytes handed out.
    pub fn wake_receive_tokens(&mut self) -> usize {
        let mut consumed = 0;
        while !self.sock.rcv.is_empty() {
            let token = match self.sock.rcv_queue.pop_front() {
                Some(token) => token,
                None => break,
            };
            if let Some(received) = self.sock.rcv.take(token.capacity) {
                consumed += received.data.len();
                self.sink().signal(token.event, Outcome::Receive(Ok(received)));
            }
        }

        if self.sock.no_more_data && self.sock.rcv.is_empty() {
            while let Some(token) = self.sock.rcv_queue.pop_front() {
                self.sink().signal(token.event, Outcome::Receive(Err(Error::ConnectionFin)));
            }
        }
        consumed
    }
}
