//! The connection tables.
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::layer::{Error, Result};
use crate::managed::Key;
use crate::wire::{IpAddress, IpEndpoint};

/// Local and remote endpoint of a connection.
///
/// Entries of the listen table use the unspecified address and port zero as wildcards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FourTuple {
    /// The local address.
    pub local: IpAddress,
    /// The remote address.
    pub remote: IpAddress,
    /// The local port.
    pub local_port: u16,
    /// The remote port.
    pub remote_port: u16,
}

impl FourTuple {
    /// Combine two endpoints.
    pub fn new(local: IpEndpoint, remote: IpEndpoint) -> Self {
        FourTuple {
            local: local.addr,
            remote: remote.addr,
            local_port: local.port,
            remote_port: remote.port,
        }
    }

    /// The local half.
    pub fn local_endpoint(&self) -> IpEndpoint {
        IpEndpoint::new(self.local, self.local_port)
    }

    /// The remote half.
    pub fn remote_endpoint(&self) -> IpEndpoint {
        IpEndpoint::new(self.remote, self.remote_port)
    }

    /// Whether this listening tuple accepts a concrete one.
    fn accepts(&self, concrete: &FourTuple) -> bool {
        self.local_port == concrete.local_port
            && (self.local.is_unspecified() || self.local == concrete.local)
            && self.remote_endpoint().accepts(&concrete.remote_endpoint())
    }

    fn wildcards(&self) -> usize {
        let local = if self.local.is_unspecified() { 1 } else { 0 };
        local + self.remote_endpoint().wildcards()
    }
}

/// Active and listening connections.
#[derive(Debug, Default)]
pub(crate) struct Table {
    active: BTreeMap<FourTuple, Key>,
    listen: Vec<(FourTuple, Key)>,
}

impl Table {
    pub fn new() -> Self {
        Table::default()
    }

    /// Register a synchronized or synchronizing connection.
    ///
    /// Fails with `AccessDenied` when the four tuple is taken.
    pub fn insert_active(&mut self, tuple: FourTuple, key: Key) -> Result<()> {
        if self.active.contains_key(&tuple) {
            return Err(Error::AccessDenied);
        }
        self.active.insert(tuple, key);
        Ok(())
    }

    /// Register a listener.
    ///
    /// Fails with `AccessDenied` when a listener on the same port accepts an overlapping set of
    /// local addresses.
    pub fn insert_listen(&mut self, tuple: FourTuple, key: Key) -> Result<()> {
        if self.listen_conflict(tuple.local, tuple.local_port) {
            return Err(Error::AccessDenied);
        }
        self.listen.push((tuple, key));
        Ok(())
    }

    /// Whether a listener on `port` overlaps the local address.
    pub fn listen_conflict(&self, local: IpAddress, port: u16) -> bool {
        self.listen.iter().any(|(tuple, _)| tuple.local_port == port
            && (tuple.local.is_unspecified() || local.is_unspecified() || tuple.local == local))
    }

    /// Whether any entry binds the local port.
    pub fn port_in_use(&self, port: u16) -> bool {
        self.active.keys().any(|tuple| tuple.local_port == port)
            || self.listen.iter().any(|(tuple, _)| tuple.local_port == port)
    }

    /// Remove every entry of a connection.
    pub fn remove(&mut self, key: Key) {
        self.active.retain(|_, entry| *entry != key);
        self.listen.retain(|(_, entry)| *entry != key);
    }

    pub fn contains(&self, key: Key) -> bool {
        self.active.values().any(|entry| *entry == key)
            || self.listen.iter().any(|(_, entry)| *entry == key)
    }

    /// Find the connection of an incoming segment.
    ///
    /// Tries the exact four tuple first. Only a SYN may be delivered to a listener, the one with
    /// the fewest wildcards wins.
    pub fn lookup(&self, tuple: &FourTuple, syn: bool) -> Option<Key> {
        if let Some(key) = self.active.get(tuple) {
            return Some(*key);
        }
        if !syn {
            return None;
        }

        let mut best: Option<(usize, Key)> = None;
        for (listen, key) in self.listen.iter().filter(|(listen, _)| listen.accepts(tuple)) {
            let wildcards = listen.wildcards();
            if wildcards == 0 {
                return Some(*key);
            }
            match best {
                Some((fewest, _)) if fewest <= wildcards => (),
                _ => best = Some((wildcards, *key)),
            }
        }
        best.map(|(_, key)| key)
    }
}
