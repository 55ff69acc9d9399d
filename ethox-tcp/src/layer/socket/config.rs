//! Socket configuration.
//!
//! Every tunable is optional. A missing value takes the default of its [`Bound`], explicit values
//! are clamped into the permitted range instead of being rejected.
//!
//! [`Bound`]: struct.Bound.html
use crate::time::secs_to_ticks;
use crate::wire::{IpAddress, IpEndpoint};

/// The permitted range and default of a numeric option.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Bound {
    /// Smallest accepted value.
    pub min: u32,
    /// Value used when none is given.
    pub default: u32,
    /// Largest accepted value.
    pub max: u32,
}

impl Bound {
    /// Resolve an optional value against the bound.
    pub fn resolve(self, value: Option<u32>) -> u32 {
        match value {
            None => self.default,
            Some(value) => value.max(self.min).min(self.max),
        }
    }
}

const KIB: u32 = 1024;
const MIB: u32 = 1024 * 1024;

/// Receive buffer size in bytes.
pub const RECEIVE_BUFFER: Bound = Bound { min: 8 * KIB, default: 2 * MIB, max: 64 * MIB };
/// Send buffer size in bytes.
pub const SEND_BUFFER: Bound = Bound { min: 8 * KIB, default: 2 * MIB, max: 64 * MIB };
/// Pending connections of a listener.
pub const BACKLOG: Bound = Bound { min: 5, default: 10, max: 128 };
/// Connection establishment timeout in seconds.
pub const CONNECTION_TIMEOUT: Bound = Bound { min: 1, default: 75, max: 600 };
/// Retransmissions before a connection is dropped.
pub const DATA_RETRIES: Bound = Bound { min: 6, default: 12, max: 29 };
/// FIN_WAIT_2 timeout in seconds.
pub const FIN_WAIT2_TIMEOUT: Bound = Bound { min: 2, default: 2, max: 60 };
/// TIME_WAIT duration in seconds, zero skips the state.
pub const TIME_WAIT_TIMEOUT: Bound = Bound { min: 0, default: 2, max: 600 };
/// Unanswered keepalive probes before a connection is dropped.
pub const KEEPALIVE_PROBES: Bound = Bound { min: 4, default: 8, max: 16 };
/// Idle seconds before the first keepalive probe.
pub const KEEPALIVE_TIME: Bound = Bound { min: 7200, default: 7200, max: 86400 };
/// Seconds between keepalive probes.
pub const KEEPALIVE_INTERVAL: Bound = Bound { min: 30, default: 60, max: 3600 };

/// Protocol options of a socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Options {
    /// Receive buffer size in bytes.
    pub receive_buffer: Option<u32>,
    /// Send buffer size in bytes.
    pub send_buffer: Option<u32>,
    /// Number of connections a listener holds for acceptance.
    pub backlog: Option<u32>,
    /// Seconds to wait for the connection to be established.
    pub connection_timeout: Option<u32>,
    /// Retransmissions of the same data before giving up.
    pub data_retries: Option<u32>,
    /// Seconds to wait in FIN_WAIT_2.
    pub fin_wait2_timeout: Option<u32>,
    /// Seconds to wait in TIME_WAIT.
    pub time_wait_timeout: Option<u32>,
    /// Probes to send before an idle peer is considered dead.
    pub keepalive_probes: Option<u32>,
    /// Idle seconds before probing.
    pub keepalive_time: Option<u32>,
    /// Seconds between probes.
    pub keepalive_interval: Option<u32>,
    /// Coalesce small segments while data is outstanding.
    pub nagle: bool,
    /// Offer the timestamp option.
    pub timestamps: bool,
    /// Offer the window scale option.
    pub window_scaling: bool,
    /// Probe idle connections.
    pub keepalive: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            receive_buffer: None,
            send_buffer: None,
            backlog: None,
            connection_timeout: None,
            data_retries: None,
            fin_wait2_timeout: None,
            time_wait_timeout: None,
            keepalive_probes: None,
            keepalive_time: None,
            keepalive_interval: None,
            nagle: true,
            timestamps: true,
            window_scaling: true,
            keepalive: true,
        }
    }
}

/// The access point and options of a socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Config {
    /// The local address, or `None` to use the station address of the engine.
    ///
    /// A passive socket may use the unspecified address to accept on every local address.
    pub station: Option<IpAddress>,
    /// The local port, zero chooses a free ephemeral port.
    pub port: u16,
    /// The peer. Required for active sockets, may contain wildcards for passive ones.
    pub remote: IpEndpoint,
    /// Open actively with `connect` instead of listening.
    pub active: bool,
    /// Protocol options.
    pub options: Options,
}

impl Config {
    /// Configuration of a socket connecting to `remote`.
    pub fn active(remote: IpEndpoint) -> Self {
        Config {
            station: None,
            port: 0,
            remote,
            active: true,
            options: Options::default(),
        }
    }

    /// Configuration of a socket listening on `port` for any peer.
    pub fn passive(port: u16) -> Self {
        Config {
            station: None,
            port,
            remote: IpEndpoint::UNSPECIFIED,
            active: false,
            options: Options::default(),
        }
    }
}

/// Options with every value resolved, timeouts in ticks.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Resolved {
    pub receive_buffer: usize,
    pub send_buffer: usize,
    pub backlog: usize,
    pub connection_timeout: u32,
    pub data_retries: u32,
    pub fin_wait2_timeout: u32,
    pub time_wait_timeout: u32,
    pub keepalive_probes: u32,
    pub keepalive_time: u32,
    pub keepalive_interval: u32,
    pub nagle: bool,
    pub timestamps: bool,
    pub window_scaling: bool,
    pub keepalive: bool,
}

impl Options {
    /// Apply the bounds.
    pub fn resolve(&self) -> Resolved {
        Resolved {
            receive_buffer: RECEIVE_BUFFER.resolve(self.receive_buffer) as usize,
            send_buffer: SEND_BUFFER.resolve(self.send_buffer) as usize,
            backlog: BACKLOG.resolve(self.backlog) as usize,
            connection_timeout: secs_to_ticks(CONNECTION_TIMEOUT.resolve(self.connection_timeout)),
            data_retries: DATA_RETRIES.resolve(self.data_retries),
            fin_wait2_timeout: secs_to_ticks(FIN_WAIT2_TIMEOUT.resolve(self.fin_wait2_timeout)),
            time_wait_timeout: secs_to_ticks(TIME_WAIT_TIMEOUT.resolve(self.time_wait_timeout)),
            keepalive_probes: KEEPALIVE_PROBES.resolve(self.keepalive_probes),
            keepalive_time: secs_to_ticks(KEEPALIVE_TIME.resolve(self.keepalive_time)),
            keepalive_interval: secs_to_ticks(KEEPALIVE_INTERVAL.resolve(self.keepalive_interval)),
            nagle: self.nagle,
            timestamps: self.timestamps,
            window_scaling: self.window_scaling,
            keepalive: self.keepalive,
        }
    }
}

impl Default for Resolved {
    fn default() -> Self {
        Options::default().resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let resolved = Options::default().resolve();
        assert_eq!(resolved.receive_buffer, 2 * 1024 * 1024);
        assert_eq!(resolved.backlog, 10);
        assert_eq!(resolved.connection_timeout, 75 * 5);
        assert_eq!(resolved.data_retries, 12);
        assert_eq!(resolved.time_wait_timeout, 10);
        assert!(resolved.nagle);
    }

    #[test]
    fn clamped() {
        let options = Options {
            send_buffer: Some(10),
            backlog: Some(1000),
            time_wait_timeout: Some(0),
            keepalive_interval: Some(1),
            ..Options::default()
        };
        let resolved = options.resolve();
        assert_eq!(resolved.send_buffer, 8 * 1024);
        assert_eq!(resolved.backlog, 128);
        assert_eq!(resolved.time_wait_timeout, 0);
        assert_eq!(resolved.keepalive_interval, 30 * 5);
    }
}
