//! Strata Catch-up -- sliding window of block heights to fetch from peers.
//!
//! `floor` is the lowest height not yet confirmed synced, `ceiling` the
//! exclusive upper bound of what may be requested. Heights below the floor
//! are forgotten. The window never exceeds `window` heights.
//!
//! The state here is pure; the node crate drives it from tickers and the
//! notice channel.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_protocol::CURRENT_PARAMS;

pub mod window;

pub use window::{Catchup, CatchupSnapshot};

#[derive(Debug, Clone)]
pub struct CatchupConfig {
    pub window: u32,
    /// Maximum heights per range request.
    pub ask_limit: u32,
    pub timeout: Duration,
    /// Distance kept below the advertised tip.
    pub margin: u32,
    /// Heights that may be asked and unanswered at once.
    pub max_outstanding: usize,
}

impl Default for CatchupConfig {
    fn default() -> Self {
        let p = CURRENT_PARAMS;
        Self {
            window: p.catchup_window,
            ask_limit: p.catchup_ask_limit,
            timeout: Duration::from_secs(p.catchup_timeout_secs),
            margin: p.catchup_margin,
            max_outstanding: p.catchup_ask_limit as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatchupStatus {
    /// Data for the height was received; not yet durable.
    Arrived,
    /// Everything up to and including the height is in the database.
    Synced,
    /// The height's data was rejected and must be fetched again.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchupNotice {
    pub height: u32,
    pub status: CatchupStatus,
}

impl CatchupNotice {
    pub fn arrived(height: u32) -> Self {
        Self {
            height,
            status: CatchupStatus::Arrived,
        }
    }

    pub fn synced(height: u32) -> Self {
        Self {
            height,
            status: CatchupStatus::Synced,
        }
    }

    pub fn failed(height: u32) -> Self {
        Self {
            height,
            status: CatchupStatus::Failed,
        }
    }
}

/// Heights the scheduler polls each raise tick.
pub trait ChainView: Send + Sync {
    /// Highest height the local database acknowledges.
    fn highest_ack(&self) -> u32;
    /// Highest height any peer has advertised.
    fn highest_known(&self) -> u32;
}

/// Highest height safe to request given the highest acknowledged and the
/// highest advertised heights.
///
/// Acks run one or two ahead of finished blocks, so the margin is always
/// held back.
pub fn ceiling_target(highest_ack: u32, highest_known: u32, margin: u32) -> u32 {
    if highest_known > highest_ack.saturating_add(margin) {
        highest_known - margin
    } else if highest_ack < margin {
        highest_ack
    } else {
        highest_ack - margin
    }
}

/// Split ascending, duplicate-free heights into contiguous `(start, end)`
/// runs of at most `cap` heights, inclusive on both ends.
pub fn partition(heights: &[u32], cap: u32) -> Vec<(u32, u32)> {
    let cap = cap.max(1);
    let mut runs = Vec::new();
    let mut iter = heights.iter().copied();
    let Some(first) = iter.next() else {
        return runs;
    };
    let (mut start, mut end) = (first, first);
    for h in iter {
        if h == end.wrapping_add(1) && end - start + 1 < cap {
            end = h;
        } else {
            runs.push((start, end));
            start = h;
            end = h;
        }
    }
    runs.push((start, end));
    runs
}
