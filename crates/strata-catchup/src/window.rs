//! The catch-up window and its transitions.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde::Serialize;

use crate::{partition, CatchupConfig, CatchupNotice, CatchupStatus};

#[derive(Debug)]
pub struct Catchup {
    config: CatchupConfig,
    floor: u32,
    ceiling: u32,
    /// Height -> last request time. `None` means re-eligible immediately.
    asked: HashMap<u32, Option<Instant>>,
    arrived: HashSet<u32>,
}

/// Point-in-time view for the periodic dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatchupSnapshot {
    pub floor: u32,
    pub ceiling: u32,
    pub asked: usize,
    pub arrived: usize,
    pub outstanding: usize,
}

impl Catchup {
    pub fn new(config: CatchupConfig, floor: u32) -> Self {
        Self {
            config,
            floor,
            ceiling: floor,
            asked: HashMap::new(),
            arrived: HashSet::new(),
        }
    }

    pub fn floor(&self) -> u32 {
        self.floor
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn config(&self) -> &CatchupConfig {
        &self.config
    }

    pub fn is_asked(&self, height: u32) -> bool {
        self.asked.contains_key(&height)
    }

    pub fn is_arrived(&self, height: u32) -> bool {
        self.arrived.contains(&height)
    }

    /// Raise the ceiling toward `target`, never lowering it and never past
    /// `floor + window`.
    pub fn raise_ceiling(&mut self, target: u32) {
        if self.ceiling > target {
            return;
        }
        let limit = self.floor.saturating_add(self.config.window);
        let next = target.min(limit);
        if next != self.ceiling {
            tracing::debug!(from = self.ceiling, to = next, "catchup: ceiling raised");
        }
        self.ceiling = next;
    }

    /// Move the floor to one past the height the database held at boot.
    pub fn fast_forward(&mut self, db_height_at_boot: u32) {
        let start = db_height_at_boot.saturating_add(1);
        if self.floor < start {
            tracing::info!(from = self.floor, to = start, "catchup: fast-forward past boot height");
            self.advance_floor(start);
        }
    }

    fn advance_floor(&mut self, new_floor: u32) {
        self.asked.retain(|h, _| *h >= new_floor);
        self.arrived.retain(|h| *h >= new_floor);
        self.floor = new_floor;
        if self.ceiling < self.floor {
            self.ceiling = self.floor;
        }
    }

    pub fn can_send(&self, height: u32, now: Instant) -> bool {
        if height < self.floor || height >= self.ceiling {
            return false;
        }
        if self.arrived.contains(&height) {
            return false;
        }
        match self.asked.get(&height) {
            None | Some(None) => true,
            Some(Some(at)) => now.saturating_duration_since(*at) >= self.config.timeout,
        }
    }

    /// Heights asked within the timeout and not yet arrived.
    pub fn outstanding(&self, now: Instant) -> usize {
        self.asked
            .iter()
            .filter(|(h, at)| match at {
                Some(at) => {
                    !self.arrived.contains(h)
                        && now.saturating_duration_since(*at) < self.config.timeout
                }
                None => false,
            })
            .count()
    }

    /// Eligible heights in ascending order, limited by the outstanding budget.
    pub fn sendable(&self, now: Instant) -> Vec<u32> {
        let budget = self
            .config
            .max_outstanding
            .saturating_sub(self.outstanding(now));
        (self.floor..self.ceiling)
            .filter(|h| self.can_send(*h, now))
            .take(budget)
            .collect()
    }

    /// Pick the next batch of range requests and mark their heights asked.
    pub fn next_requests(&mut self, now: Instant) -> Vec<(u32, u32)> {
        let heights = self.sendable(now);
        for h in &heights {
            self.asked.insert(*h, Some(now));
        }
        partition(&heights, self.config.ask_limit)
    }

    pub fn mark_asked(&mut self, height: u32, now: Instant) {
        if height >= self.floor {
            self.asked.insert(height, Some(now));
        }
    }

    /// Data arrived: stop retrying, but it is not yet durable.
    pub fn mark_arrived(&mut self, height: u32) {
        if height < self.floor {
            return;
        }
        self.arrived.insert(height);
        self.asked.remove(&height);
    }

    /// Everything through `height` is in the database.
    pub fn mark_synced(&mut self, height: u32) {
        if height < self.floor {
            return;
        }
        self.advance_floor(height.saturating_add(1));
    }

    /// The height must be fetched again on the next send.
    pub fn mark_failed(&mut self, height: u32) {
        if height < self.floor {
            return;
        }
        self.asked.insert(height, None);
        self.arrived.remove(&height);
    }

    pub fn apply(&mut self, notice: CatchupNotice) {
        match notice.status {
            CatchupStatus::Arrived => self.mark_arrived(notice.height),
            CatchupStatus::Synced => self.mark_synced(notice.height),
            CatchupStatus::Failed => self.mark_failed(notice.height),
        }
    }

    pub fn snapshot(&self, now: Instant) -> CatchupSnapshot {
        CatchupSnapshot {
            floor: self.floor,
            ceiling: self.ceiling,
            asked: self.asked.len(),
            arrived: self.arrived.len(),
            outstanding: self.outstanding(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ceiling_target;
    use proptest::prelude::*;
    use std::time::Duration;

    fn window(floor: u32, ceiling: u32) -> Catchup {
        let mut c = Catchup::new(CatchupConfig::default(), floor);
        c.raise_ceiling(ceiling);
        c
    }

    #[test]
    fn test_lagging_node_asks_first_batch_only() {
        let now = Instant::now();
        let mut c = Catchup::new(CatchupConfig::default(), 0);
        c.fast_forward(100);
        c.raise_ceiling(ceiling_target(100, 150, 2));
        assert_eq!(c.floor(), 101);
        assert_eq!(c.ceiling(), 148);

        assert_eq!(c.next_requests(now), vec![(101, 110)]);
        assert!(c.next_requests(now + Duration::from_secs(1)).is_empty());
        assert!(c.next_requests(now + Duration::from_secs(29)).is_empty());
    }

    #[test]
    fn test_batch_returns_then_next_batch() {
        let now = Instant::now();
        let mut c = window(101, 148);
        c.next_requests(now);
        for h in 101..=110 {
            c.mark_arrived(h);
        }
        assert_eq!(c.next_requests(now), vec![(111, 120)]);
    }

    #[test]
    fn test_timeout_makes_height_eligible_again() {
        let now = Instant::now();
        let mut c = window(10, 20);
        c.mark_asked(12, now);
        assert!(!c.can_send(12, now + Duration::from_secs(29)));
        assert!(c.can_send(12, now + Duration::from_secs(30)));
    }

    #[test]
    fn test_arrived_is_not_resent() {
        let now = Instant::now();
        let mut c = window(10, 20);
        c.mark_asked(12, now);
        c.mark_arrived(12);
        assert!(!c.is_asked(12));
        assert!(!c.can_send(12, now + Duration::from_secs(60)));
    }

    #[test]
    fn test_failed_is_immediately_eligible() {
        let now = Instant::now();
        let mut c = window(10, 20);
        c.mark_asked(12, now);
        c.mark_arrived(12);
        c.mark_failed(12);
        assert!(!c.is_arrived(12));
        assert!(c.can_send(12, now));
    }

    #[test]
    fn test_range_bounds() {
        let c = window(10, 20);
        let now = Instant::now();
        assert!(!c.can_send(9, now));
        assert!(c.can_send(10, now));
        assert!(c.can_send(19, now));
        assert!(!c.can_send(20, now));
    }

    #[test]
    fn test_synced_purges_and_advances() {
        let now = Instant::now();
        let mut c = window(10, 30);
        for h in 10..15 {
            c.mark_asked(h, now);
        }
        c.mark_arrived(16);
        c.mark_synced(16);
        assert_eq!(c.floor(), 17);
        assert!((10..=16).all(|h| !c.is_asked(h) && !c.is_arrived(h)));
    }

    #[test]
    fn test_stale_notices_ignored() {
        let now = Instant::now();
        let mut c = window(10, 30);
        c.mark_synced(15);
        c.mark_synced(12);
        assert_eq!(c.floor(), 16);
        c.mark_failed(5);
        c.mark_arrived(5);
        assert!(!c.is_asked(5) && !c.is_arrived(5));
        assert_eq!(c.snapshot(now).asked, 0);
    }

    #[test]
    fn test_notices_at_floor_are_applied() {
        let now = Instant::now();
        let mut c = window(10, 30);
        c.mark_asked(10, now);
        c.mark_failed(10);
        assert!(c.can_send(10, now));

        c.mark_synced(10);
        assert_eq!(c.floor(), 11);
        assert!(!c.is_asked(10));

        c.mark_failed(10);
        assert!(!c.is_asked(10));
        c.mark_synced(10);
        assert_eq!(c.floor(), 11);
    }

    #[test]
    fn test_ceiling_bounded_by_window() {
        let mut c = window(0, 10);
        c.raise_ceiling(1_000_000);
        assert_eq!(c.ceiling(), 2000);
        c.raise_ceiling(5);
        assert_eq!(c.ceiling(), 2000);
    }

    #[test]
    fn test_sync_past_ceiling_keeps_floor_below_ceiling() {
        let mut c = window(0, 10);
        c.mark_synced(50);
        assert_eq!(c.floor(), 51);
        assert!(c.ceiling() >= c.floor());
    }

    #[test]
    fn test_fast_forward_only_moves_up() {
        let mut c = Catchup::new(CatchupConfig::default(), 500);
        c.fast_forward(100);
        assert_eq!(c.floor(), 500);
        c.fast_forward(600);
        assert_eq!(c.floor(), 601);
    }

    #[test]
    fn test_apply_dispatches() {
        let mut c = window(0, 50);
        c.apply(CatchupNotice::arrived(3));
        assert!(c.is_arrived(3));
        c.apply(CatchupNotice::failed(3));
        assert!(!c.is_arrived(3));
        c.apply(CatchupNotice::synced(3));
        assert_eq!(c.floor(), 4);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Raise(u32),
        Synced(u32),
        Arrived(u32),
        Failed(u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..10_000).prop_map(Op::Raise),
            (0u32..10_000).prop_map(Op::Synced),
            (0u32..10_000).prop_map(Op::Arrived),
            (0u32..10_000).prop_map(Op::Failed),
        ]
    }

    proptest! {
        #[test]
        fn prop_window_monotonic(ops in proptest::collection::vec(op(), 1..200)) {
            let mut c = Catchup::new(CatchupConfig::default(), 0);
            for op in ops {
                let (floor, ceiling) = (c.floor(), c.ceiling());
                match op {
                    Op::Raise(h) => c.raise_ceiling(h),
                    Op::Synced(h) => c.mark_synced(h),
                    Op::Arrived(h) => c.mark_arrived(h),
                    Op::Failed(h) => c.mark_failed(h),
                }
                prop_assert!(c.floor() >= floor);
                prop_assert!(c.ceiling() >= ceiling);
                prop_assert!(c.floor() <= c.ceiling());
                prop_assert!(c.ceiling() - c.floor() <= 2000);
            }
        }

        #[test]
        fn prop_synced_purges_range(marks in proptest::collection::vec(0u32..300, 0..100), h in 0u32..300) {
            let now = Instant::now();
            let mut c = Catchup::new(CatchupConfig::default(), 0);
            c.raise_ceiling(300);
            for m in &marks {
                if m % 2 == 0 {
                    c.mark_asked(*m, now);
                } else {
                    c.mark_arrived(*m);
                }
            }
            let old = c.floor();
            c.mark_synced(h);
            prop_assert_eq!(c.floor(), h + 1);
            for x in old..=h {
                prop_assert!(!c.is_asked(x) && !c.is_arrived(x));
            }
        }
    }
}
