use crate::errors::{AddressError, BoltResult};
use indexmap::IndexSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Mutex;

/// A host/port pair plus its most recent resolution. Identity (equality,
/// hashing, set membership) is determined by host and port alone;
/// resolution is a cached side product.
#[derive(Debug)]
pub struct Address {
    host: String,
    port: String,
    resolved: Mutex<Vec<SocketAddr>>,
}

impl Address {
    #[inline]
    pub fn new(host: &str, port: &str) -> Address {
        Address {
            host: host.to_owned(),
            port: port.to_owned(),
            resolved: Mutex::new(Vec::new()),
        }
    }

    /// Parse a `host:port` string. The port is everything after the last
    /// colon, which keeps IPv6 literals intact.
    pub fn parse(s: &str) -> Option<Address> {
        let (host, port) = s.rsplit_once(':')?;
        if host.is_empty() || port.is_empty() {
            return None;
        }
        Some(Address::new(host, port))
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Resolve the host name, replacing any previous resolution.
    /// Idempotent; serialised by the per-address mutex.
    pub fn resolve(&self) -> BoltResult<usize> {
        let port: u16 = self.port.parse().map_err(|_| AddressError::NameNotResolved)?;
        let mut resolved = self.resolved.lock().expect("Address resolution lock poisoned");

        let addresses: Vec<SocketAddr> = (self.host.as_str(), port)
            .to_socket_addrs()
            .map_err(|_| AddressError::NameNotResolved)?
            .collect();
        if addresses.is_empty() {
            return Err(AddressError::NameNotResolved.into());
        }

        *resolved = addresses;
        Ok(resolved.len())
    }

    /// Socket addresses produced by the last `resolve`.
    pub fn resolved(&self) -> Vec<SocketAddr> {
        self.resolved.lock().expect("Address resolution lock poisoned").clone()
    }

    pub fn is_resolved(&self) -> bool {
        !self.resolved.lock().expect("Address resolution lock poisoned").is_empty()
    }
}

impl Clone for Address {
    fn clone(&self) -> Address {
        Address {
            host: self.host.clone(),
            port: self.port.clone(),
            resolved: Mutex::new(self.resolved()),
        }
    }
}

impl PartialEq for Address {
    #[inline]
    fn eq(&self, other: &Address) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Insertion-ordered set of addresses with membership by host+port.
#[derive(Debug, Clone, Default)]
pub struct AddressSet {
    entries: IndexSet<Address>,
}

impl AddressSet {
    #[inline]
    pub fn new() -> AddressSet {
        AddressSet { entries: IndexSet::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.entries.get_index_of(address)
    }

    #[inline]
    pub fn contains(&self, address: &Address) -> bool {
        self.entries.contains(address)
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Address> {
        self.entries.get_index(index)
    }

    /// Add an address, returning the new index, or `None` when already
    /// present.
    pub fn add(&mut self, address: Address) -> Option<usize> {
        if self.entries.contains(&address) {
            return None;
        }
        let (index, _) = self.entries.insert_full(address);
        Some(index)
    }

    /// Remove an address, returning its previous index, or `None` when
    /// absent. Later entries shift down, preserving insertion order.
    pub fn remove(&mut self, address: &Address) -> Option<usize> {
        self.entries.shift_remove_full(address).map(|(index, _)| index)
    }

    /// Wholesale swap of the contents.
    pub fn replace(&mut self, other: &AddressSet) {
        self.entries.clear();
        self.add_all(other);
    }

    pub fn add_all(&mut self, other: &AddressSet) {
        for address in other.iter() {
            self.add(address.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.entries.iter()
    }
}
