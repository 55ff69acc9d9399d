//! Reaction to ICMP errors quoting one of our segments.
use crate::layer::Error;
use crate::wire::{IcmpError, TcpSeqNumber};

use super::connection::State;
use super::operator::Operator;

/// What an ICMP error does to the connection it concerns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IcmpAction {
    /// Nothing.
    Ignore,
    /// Record the error, report it once the connection fails for another reason.
    Soft(Error),
    /// Close the connection with the error.
    Hard(Error),
}

/// Classifies ICMP errors.
///
/// The engine asks the policy of the endpoint for every error whose quoted sequence number lies
/// in the unacknowledged data of a connection.
pub trait IcmpPolicy {
    /// The action for an error of this kind.
    fn classify(&self, error: IcmpError) -> IcmpAction;
}

/// Closes the connection on unreachable protocols and ports and on oversized messages, records
/// everything else except source quench.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DefaultIcmpPolicy;

impl IcmpPolicy for DefaultIcmpPolicy {
    fn classify(&self, error: IcmpError) -> IcmpAction {
        match error {
            IcmpError::NetUnreachable => IcmpAction::Soft(Error::NetworkUnreachable),
            IcmpError::HostUnreachable
            | IcmpError::SourceRouteFailed
            | IcmpError::TimeExceededInTransit
            | IcmpError::TimeExceededReassembly => IcmpAction::Soft(Error::HostUnreachable),
            IcmpError::ProtocolUnreachable => IcmpAction::Hard(Error::ProtocolUnreachable),
            IcmpError::PortUnreachable => IcmpAction::Hard(Error::PortUnreachable),
            IcmpError::MessageTooBig => IcmpAction::Hard(Error::IcmpError),
            IcmpError::ParameterProblem => IcmpAction::Soft(Error::IcmpError),
            IcmpError::SourceQuench => IcmpAction::Ignore,
            IcmpError::Unknown(_) => IcmpAction::Soft(Error::IcmpError),
        }
    }
}

impl Operator<'_> {
    /// An ICMP error quoting the segment that started at `seq`.
    pub fn on_icmp_error(&mut self, seq: TcpSeqNumber, action: IcmpAction) {
        if self.state() == State::Closed || !self.in_flight(seq) {
            net_debug!("tcp {:?}: ignoring icmp error for {} outside the flight", self.key, seq);
            return;
        }

        match action {
            IcmpAction::Ignore => (),
            IcmpAction::Soft(error) => {
                net_debug!("tcp {:?}: soft icmp error: {}", self.key, error);
                self.cb().soft_error = Some(error);
                self.sock.set_error(error);
            },
            IcmpAction::Hard(error) => {
                net_debug!("tcp {:?}: hard icmp error: {}", self.key, error);
                self.cb().soft_error = Some(error);
                self.close_with(error);
            },
        }
    }
}
