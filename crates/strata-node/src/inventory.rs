//! Per-peer record of inventory the peer is known to have.
//!
//! Bounded: the least recently touched vector is evicted first. A touch
//! appends a fresh stamp rather than moving the old entry; stale stamps are
//! skipped on eviction and compacted once the queue reaches twice the cap.

use std::collections::{HashMap, VecDeque};

use strata_protocol::InvVect;

#[derive(Debug)]
pub struct KnownInventory {
    cap: usize,
    next_stamp: u64,
    /// Touch order, oldest first. May hold stale stamps.
    order: VecDeque<(u64, InvVect)>,
    /// Vector -> stamp of its latest touch.
    live: HashMap<InvVect, u64>,
}

impl KnownInventory {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            next_stamp: 0,
            order: VecDeque::new(),
            live: HashMap::new(),
        }
    }

    /// Mark `iv` known. Returns true if it was not already known.
    pub fn insert(&mut self, iv: InvVect) -> bool {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        let fresh = self.live.insert(iv, stamp).is_none();
        self.order.push_back((stamp, iv));
        while self.live.len() > self.cap {
            self.evict_oldest();
        }
        if self.order.len() >= self.cap.saturating_mul(2) {
            self.compact();
        }
        fresh
    }

    fn evict_oldest(&mut self) {
        while let Some((stamp, old)) = self.order.pop_front() {
            if self.live.get(&old) == Some(&stamp) {
                self.live.remove(&old);
                return;
            }
        }
    }

    fn compact(&mut self) {
        let live = &self.live;
        self.order.retain(|(stamp, iv)| live.get(iv) == Some(stamp));
    }

    pub fn contains(&self, iv: &InvVect) -> bool {
        self.live.contains_key(iv)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
