//! Peer book: peers indexed by hash and by IP address.
//!
//! Several peers may share an address (different ports, or a reconnect that
//! has not yet been reaped), so the address index holds a list.

use std::collections::HashMap;

/// Anything the book can index.
pub trait Indexed {
    fn hash(&self) -> &str;
    fn address(&self) -> &str;
}

impl Indexed for crate::PeerRecord {
    fn hash(&self) -> &str {
        &self.hash
    }

    fn address(&self) -> &str {
        &self.address
    }
}

#[derive(Debug)]
pub struct PeerBook<T> {
    by_hash: HashMap<String, T>,
    by_address: HashMap<String, Vec<String>>,
}

impl<T> Default for PeerBook<T> {
    fn default() -> Self {
        Self {
            by_hash: HashMap::new(),
            by_address: HashMap::new(),
        }
    }
}

impl<T: Indexed> PeerBook<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by hash.
    pub fn insert(&mut self, peer: T) {
        let hash = peer.hash().to_string();
        let address = peer.address().to_string();
        if let Some(old) = self.by_hash.insert(hash.clone(), peer) {
            self.unlink(old.address(), &hash);
        }
        self.by_address.entry(address).or_default().push(hash);
    }

    pub fn remove(&mut self, hash: &str) -> Option<T> {
        let peer = self.by_hash.remove(hash)?;
        self.unlink(peer.address(), hash);
        Some(peer)
    }

    fn unlink(&mut self, address: &str, hash: &str) {
        if let Some(list) = self.by_address.get_mut(address) {
            list.retain(|h| h != hash);
            if list.is_empty() {
                self.by_address.remove(address);
            }
        }
    }

    pub fn get(&self, hash: &str) -> Option<&T> {
        self.by_hash.get(hash)
    }

    pub fn get_mut(&mut self, hash: &str) -> Option<&mut T> {
        self.by_hash.get_mut(hash)
    }

    pub fn by_address(&self, address: &str) -> impl Iterator<Item = &T> {
        let by_hash = &self.by_hash;
        self.by_address
            .get(address)
            .into_iter()
            .flatten()
            .filter_map(move |h| by_hash.get(h))
    }

    pub fn has_address(&self, address: &str) -> bool {
        self.by_address.contains_key(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.by_hash.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.by_hash.values_mut()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}
