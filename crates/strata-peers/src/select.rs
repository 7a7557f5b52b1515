//! Peer selection: random fanout, single random pick, dial ordering.

use std::time::Instant;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::{AdmissionPolicy, PeerRecord};

/// Up to `count` distinct items chosen uniformly at random.
pub fn select_random<T, R: Rng + ?Sized>(mut items: Vec<T>, count: usize, rng: &mut R) -> Vec<T> {
    items.shuffle(rng);
    items.truncate(count);
    items
}

pub fn pick_one<T, R: Rng + ?Sized>(mut items: Vec<T>, rng: &mut R) -> Option<T> {
    if items.is_empty() {
        return None;
    }
    let i = rng.gen_range(0..items.len());
    Some(items.swap_remove(i))
}

/// Highest quality first.
pub fn sort_by_quality(peers: &mut [&PeerRecord]) {
    peers.sort_by(|a, b| b.quality_score.cmp(&a.quality_score));
}

/// Offline peers that may be dialled now, best quality first.
pub fn dial_candidates<'a>(
    peers: impl Iterator<Item = &'a PeerRecord>,
    policy: &AdmissionPolicy,
    now: Instant,
) -> Vec<&'a PeerRecord> {
    let mut out: Vec<&PeerRecord> = peers
        .filter(|p| {
            p.is_offline()
                && p.can_dial()
                && policy.may_dial(p.is_special())
                && p.is_dial_due(now)
        })
        .collect();
    sort_by_quality(&mut out);
    out
}
