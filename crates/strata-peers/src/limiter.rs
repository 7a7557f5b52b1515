//! Per-address limiter for inbound connections.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::PeerError;

#[derive(Debug)]
pub struct SourceLimiter {
    interval: Duration,
    last: HashMap<String, Instant>,
}

impl SourceLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: HashMap::new(),
        }
    }

    /// Record a connection from `address`; rejects if the previous accepted
    /// one was less than `interval` ago.
    pub fn check(&mut self, address: &str, now: Instant) -> Result<(), PeerError> {
        if let Some(prev) = self.last.get(address) {
            if now.saturating_duration_since(*prev) < self.interval {
                return Err(PeerError::RateLimited(address.to_string()));
            }
        }
        self.last.insert(address.to_string(), now);
        Ok(())
    }

    /// Forget addresses idle for longer than the interval.
    pub fn prune(&mut self, now: Instant) {
        let interval = self.interval;
        self.last
            .retain(|_, t| now.saturating_duration_since(*t) < interval);
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}
