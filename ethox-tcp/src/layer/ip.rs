//! The contract towards the IP substrate.
//!
//! The engine does not route, fragment or resolve neighbors. It produces complete tcp segments and
//! hands them to a [`Network`] together with the address pair that the enclosing IP header must
//! carry. The same addresses were used for the pseudo header checksum.
//!
//! [`Network`]: trait.Network.html
use alloc::vec::Vec;

use crate::layer::{Error, Result};
use crate::wire::IpAddress;

/// A prefix of addresses that should be routed via a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    /// The network targetted by the route.
    pub net: IpAddress,

    /// The number of leading bits of `net` that must match.
    pub prefix_len: u8,

    /// Next hop for this network.
    pub next_hop: IpAddress,
}

impl Route {
    /// Returns a route matching every address via the `gateway`.
    pub fn default_gateway(gateway: IpAddress) -> Route {
        Route {
            net: IpAddress::Unspecified,
            prefix_len: 0,
            next_hop: gateway,
        }
    }
}

/// Whether a route is installed or withdrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteChange {
    /// Install the route.
    Add,
    /// Remove a previously installed route.
    Remove,
}

/// The IP layer below the engine.
pub trait Network {
    /// Transmit one tcp segment.
    ///
    /// `segment` contains the tcp header with a filled checksum and the payload. The
    /// implementation wraps it into an IP packet from `src` to `dst`. An error leaves the segment
    /// unsent, it will be retransmitted by the usual timers.
    fn send_packet(&mut self, segment: &[u8], src: IpAddress, dst: IpAddress) -> Result<()>;

    /// The maximum transmission unit of the interface, in bytes of IP packet.
    fn mtu(&self) -> usize {
        1500
    }

    /// Install or remove a route on behalf of a socket.
    fn route(&mut self, change: RouteChange, route: Route) -> Result<()> {
        let _ = (change, route);
        Err(Error::Unsupported)
    }

    /// Give the substrate a chance to process pending receive work.
    ///
    /// Called when the application polls a socket. The default does nothing.
    fn poll(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<N: Network + ?Sized> Network for &'_ mut N {
    fn send_packet(&mut self, segment: &[u8], src: IpAddress, dst: IpAddress) -> Result<()> {
        (**self).send_packet(segment, src, dst)
    }

    fn mtu(&self) -> usize {
        (**self).mtu()
    }

    fn route(&mut self, change: RouteChange, route: Route) -> Result<()> {
        (**self).route(change, route)
    }

    fn poll(&mut self) -> Result<()> {
        (**self).poll()
    }
}

/// A segment recorded by [`Capture`].
///
/// [`Capture`]: struct.Capture.html
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    /// The complete tcp segment.
    pub segment: Vec<u8>,
    /// Source address of the IP packet.
    pub src: IpAddress,
    /// Destination address of the IP packet.
    pub dst: IpAddress,
}

/// A substrate that records every segment instead of sending it.
///
/// Useful for tests and for connecting two engines in memory. Transmission can be made to fail
/// to exercise the retransmission paths.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    /// Every segment sent so far, oldest first.
    pub sent: Vec<Sent>,
    /// The routes currently installed.
    pub routes: Vec<Route>,
    /// When set, every transmission fails with `Error::Device`.
    pub fail: bool,
    /// The reported mtu, 1500 when `None`.
    pub mtu: Option<usize>,
    /// Number of poll calls observed.
    pub polls: usize,
}

impl Capture {
    /// Create an empty capture.
    pub fn new() -> Self {
        Capture::default()
    }

    /// Remove and return every recorded segment.
    pub fn take(&mut self) -> Vec<Sent> {
        core::mem::replace(&mut self.sent, Vec::new())
    }
}

impl Network for Capture {
    fn send_packet(&mut self, segment: &[u8], src: IpAddress, dst: IpAddress) -> Result<()> {
        if self.fail {
            return Err(Error::Device);
        }
        self.sent.push(Sent {
            segment: segment.to_vec(),
            src,
            dst,
        });
        Ok(())
    }

    fn mtu(&self) -> usize {
        self.mtu.unwrap_or(1500)
    }

    fn route(&mut self, change: RouteChange, route: Route) -> Result<()> {
        match change {
            RouteChange::Add => {
                if self.routes.contains(&route) {
                    return Err(Error::AccessDenied);
                }
                self.routes.push(route);
            },
            RouteChange::Remove => {
                let idx = self.routes.iter()
                    .position(|r| *r == route)
                    .ok_or(Error::NotFound)?;
                self.routes.remove(idx);
            },
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<()> {
        self.polls += 1;
        Ok(())
    }
}
