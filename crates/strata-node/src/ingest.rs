//! Block ingest -- validates what peers push, stores it, and reports
//! progress on the catch-up notice channel.
//!
//! Directory blocks are stored strictly in height order so every stored
//! block has passed the pair-integrity check against its stored predecessor.
//! Blocks that arrive ahead of the tip wait in a bounded pending map.
//! Dependent blocks and entries are stored as they arrive.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use strata_blocks::{check_block_pair_integrity, Block, DirectoryBlock};
use strata_catchup::{CatchupNotice, ChainView};
use strata_storage::BlockStore;

/// An accepted application message, queued for ingest.
#[derive(Debug, Clone)]
pub enum Inbound {
    Block { peer: String, block: Block },
    Transaction { peer: String, data: Vec<u8> },
}

/// Local tip and highest advertised height, shared between ingest, the
/// dispatcher and the catch-up task.
#[derive(Debug, Default)]
pub struct ChainState {
    /// Tip height + 1; zero while the database is empty.
    tip_plus_one: AtomicU32,
    known: AtomicU32,
}

impl ChainState {
    pub fn new(tip: Option<u32>) -> Self {
        let state = Self::default();
        if let Some(tip) = tip {
            state.set_tip(tip);
        }
        state
    }

    pub fn tip(&self) -> Option<u32> {
        self.tip_plus_one.load(Ordering::Acquire).checked_sub(1)
    }

    pub fn set_tip(&self, height: u32) {
        self.tip_plus_one
            .fetch_max(height.saturating_add(1), Ordering::AcqRel);
    }

    /// Record a peer's advertised tip. True if it raised the known height.
    pub fn record_advertised(&self, height: u32) -> bool {
        self.known.fetch_max(height, Ordering::AcqRel) < height
    }
}

impl ChainView for ChainState {
    fn highest_ack(&self) -> u32 {
        self.tip().unwrap_or(0)
    }

    fn highest_known(&self) -> u32 {
        self.known.load(Ordering::Acquire).max(self.highest_ack())
    }
}

pub struct Ingest {
    store: Arc<dyn BlockStore>,
    chain: Arc<ChainState>,
    notices: mpsc::Sender<CatchupNotice>,
    pending: BTreeMap<u32, DirectoryBlock>,
    pending_cap: usize,
}

impl Ingest {
    pub fn new(
        store: Arc<dyn BlockStore>,
        chain: Arc<ChainState>,
        notices: mpsc::Sender<CatchupNotice>,
        pending_cap: usize,
    ) -> Self {
        Self {
            store,
            chain,
            notices,
            pending: BTreeMap::new(),
            pending_cap: pending_cap.max(1),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<Inbound>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                item = rx.recv() => match item {
                    Some(inbound) => self.accept(inbound),
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!(pending = self.pending.len(), "ingest: stopped");
    }

    pub fn accept(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Block {
                peer,
                block: Block::Directory(dblock),
            } => self.accept_directory(&peer, dblock),
            Inbound::Block { peer, block } => {
                if let Err(e) = self.store.store_dependent(&block) {
                    tracing::warn!(peer = %peer, kind = block.kind().as_str(), error = %e, "ingest: store failed");
                }
            }
            Inbound::Transaction { peer, data } => {
                tracing::debug!(peer = %peer, bytes = data.len(), "ingest: transaction ignored");
            }
        }
    }

    fn accept_directory(&mut self, peer: &str, block: DirectoryBlock) {
        let height = block.height();
        if let Err(e) = block.check_entries() {
            tracing::warn!(peer, height, error = %e, "ingest: rejected directory block");
            self.notify(CatchupNotice::failed(height));
            return;
        }
        self.notify(CatchupNotice::arrived(height));

        let next = self.chain.tip().map_or(0, |t| t + 1);
        if height < next {
            tracing::trace!(peer, height, "ingest: height already stored");
            return;
        }
        if height > next {
            self.hold(height, block);
            return;
        }
        if self.try_store(block) {
            self.drain();
        }
    }

    /// Park a block that is ahead of the tip. When full, the highest height
    /// is dropped and reported failed so it is fetched again later.
    fn hold(&mut self, height: u32, block: DirectoryBlock) {
        if self.pending.len() >= self.pending_cap && !self.pending.contains_key(&height) {
            match self.pending.last_key_value() {
                Some((&highest, _)) if highest > height => {
                    self.pending.remove(&highest);
                    self.notify(CatchupNotice::failed(highest));
                }
                _ => {
                    self.notify(CatchupNotice::failed(height));
                    return;
                }
            }
        }
        self.pending.insert(height, block);
    }

    /// Store pending blocks that have become contiguous with the tip.
    fn drain(&mut self) {
        loop {
            let next = self.chain.tip().map_or(0, |t| t + 1);
            self.pending.retain(|h, _| *h >= next);
            let Some(block) = self.pending.remove(&next) else {
                return;
            };
            if !self.try_store(block) {
                return;
            }
        }
    }

    fn try_store(&mut self, block: DirectoryBlock) -> bool {
        let height = block.height();
        let prev = match height.checked_sub(1) {
            None => None,
            Some(h) => match self.store.fetch_directory_block_by_height(h) {
                Ok(Some(p)) => Some(p),
                Ok(None) => {
                    tracing::warn!(height, "ingest: predecessor missing");
                    self.notify(CatchupNotice::failed(height));
                    return false;
                }
                Err(e) => {
                    tracing::error!(height, error = %e, "ingest: predecessor fetch failed");
                    self.notify(CatchupNotice::failed(height));
                    return false;
                }
            },
        };
        if let Err(e) = check_block_pair_integrity(&block, prev.as_ref()) {
            tracing::warn!(height, error = %e, "ingest: rejected directory block");
            self.notify(CatchupNotice::failed(height));
            return false;
        }
        match self.store.store_directory_block(&block) {
            Ok(inserted) => {
                if !inserted {
                    tracing::debug!(height, "ingest: height taken, stored block kept");
                }
                self.chain.set_tip(height);
                self.notify(CatchupNotice::synced(height));
                if height % 100 == 0 {
                    tracing::info!(height, "ingest: directory block stored");
                } else {
                    tracing::debug!(height, "ingest: directory block stored");
                }
                true
            }
            Err(e) => {
                tracing::error!(height, error = %e, "ingest: store failed");
                self.notify(CatchupNotice::failed(height));
                false
            }
        }
    }

    fn notify(&self, notice: CatchupNotice) {
        if let Err(e) = self.notices.try_send(notice) {
            tracing::debug!(height = notice.height, error = %e, "ingest: notice dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_blocks::fixtures::{build_chain, ChainFixture};
    use strata_blocks::Hash;
    use strata_catchup::CatchupStatus;
    use strata_protocol::LOCAL_NET;
    use strata_storage::SqliteStore;

    struct Fixture {
        ingest: Ingest,
        notices: mpsc::Receiver<CatchupNotice>,
        chain: Arc<ChainState>,
        store: Arc<dyn BlockStore>,
        fx: ChainFixture,
    }

    fn fixture(count: u32, pending_cap: usize) -> Fixture {
        let store: Arc<dyn BlockStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let chain = Arc::new(ChainState::new(None));
        let (tx, notices) = mpsc::channel(256);
        Fixture {
            ingest: Ingest::new(store.clone(), chain.clone(), tx, pending_cap),
            notices,
            chain,
            store,
            fx: build_chain(LOCAL_NET, count).unwrap(),
        }
    }

    fn push(f: &mut Fixture, block: DirectoryBlock) {
        f.ingest.accept(Inbound::Block {
            peer: "p".into(),
            block: Block::Directory(block),
        });
    }

    fn drain(rx: &mut mpsc::Receiver<CatchupNotice>) -> Vec<CatchupNotice> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    #[test]
    fn test_in_order_blocks_are_synced() {
        let mut f = fixture(3, 10);
        for d in f.fx.directory.clone() {
            push(&mut f, d);
        }
        assert_eq!(f.chain.tip(), Some(2));
        assert_eq!(f.store.fetch_database_height().unwrap(), Some(2));
        let notices = drain(&mut f.notices);
        assert_eq!(
            notices,
            vec![
                CatchupNotice::arrived(0),
                CatchupNotice::synced(0),
                CatchupNotice::arrived(1),
                CatchupNotice::synced(1),
                CatchupNotice::arrived(2),
                CatchupNotice::synced(2),
            ]
        );
    }

    #[test]
    fn test_out_of_order_blocks_wait_for_predecessor() {
        let mut f = fixture(3, 10);
        let d = f.fx.directory.clone();
        push(&mut f, d[2].clone());
        push(&mut f, d[1].clone());
        assert_eq!(f.chain.tip(), None);
        assert_eq!(f.ingest.pending_len(), 2);

        push(&mut f, d[0].clone());
        assert_eq!(f.chain.tip(), Some(2));
        assert_eq!(f.ingest.pending_len(), 0);
        let synced: Vec<u32> = drain(&mut f.notices)
            .into_iter()
            .filter(|n| n.status == CatchupStatus::Synced)
            .map(|n| n.height)
            .collect();
        assert_eq!(synced, vec![0, 1, 2]);
    }

    #[test]
    fn test_broken_link_rejected() {
        let mut f = fixture(2, 10);
        let d = f.fx.directory.clone();
        push(&mut f, d[0].clone());
        let mut bad = d[1].clone();
        bad.header.prev_key_mr = Hash::from_low_byte(0x42);
        push(&mut f, bad);
        assert_eq!(f.chain.tip(), Some(0));
        assert!(drain(&mut f.notices).contains(&CatchupNotice::failed(1)));

        // The genuine block still goes in afterwards.
        push(&mut f, d[1].clone());
        assert_eq!(f.chain.tip(), Some(1));
    }

    #[test]
    fn test_wrong_fixed_chain_rejected() {
        let mut f = fixture(1, 10);
        let mut bad = f.fx.directory[0].clone();
        bad.entries.swap(0, 1);
        push(&mut f, bad);
        assert_eq!(f.chain.tip(), None);
        assert_eq!(drain(&mut f.notices), vec![CatchupNotice::failed(0)]);
    }

    #[test]
    fn test_full_pending_map_drops_highest() {
        let mut f = fixture(5, 2);
        let d = f.fx.directory.clone();
        push(&mut f, d[4].clone());
        push(&mut f, d[3].clone());
        drain(&mut f.notices);
        push(&mut f, d[2].clone());
        assert_eq!(f.ingest.pending_len(), 2);
        assert!(drain(&mut f.notices).contains(&CatchupNotice::failed(4)));

        push(&mut f, d[0].clone());
        push(&mut f, d[1].clone());
        assert_eq!(f.chain.tip(), Some(3));
    }

    #[test]
    fn test_dependents_stored() {
        let mut f = fixture(1, 10);
        let admin = f.fx.admin[0].clone();
        let hash = admin.hash();
        f.ingest.accept(Inbound::Block {
            peer: "p".into(),
            block: Block::Admin(admin),
        });
        assert!(f.store.fetch_admin_block_by_hash(&hash).unwrap().is_some());
        assert!(drain(&mut f.notices).is_empty());
    }

    #[test]
    fn test_chain_view() {
        let chain = ChainState::new(None);
        assert_eq!(chain.tip(), None);
        assert_eq!(chain.highest_ack(), 0);
        assert!(chain.record_advertised(50));
        assert!(!chain.record_advertised(40));
        chain.set_tip(60);
        assert_eq!(chain.highest_ack(), 60);
        assert_eq!(chain.highest_known(), 60);
        chain.set_tip(10);
        assert_eq!(chain.tip(), Some(60));
    }
}
