//! Serving side of the fetch/push protocol.
//!
//! A handler answers one request batch. Each requested item is fetched from
//! the store and pushed through a single-slot pipeline: item n is queued only
//! once item n-1 has been written to the socket, so fetching the next item
//! overlaps the previous write and nothing more. Items that cannot be served
//! are reported in one `NotFound` at the end, and the handler returns only
//! after its final parcel has been written.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use strata_blocks::chain::{ADMIN_CHAIN_ID, ENTRY_CREDIT_CHAIN_ID, FACTOID_CHAIN_ID};
use strata_blocks::{Block, Hash};
use strata_protocol::{InvType, InvVect, Message, CURRENT_PARAMS};
use strata_storage::{BlockStore, StorageError};

use crate::peer_manager::PeerManager;

/// An inventory vector and the item it resolved to, if any.
type Item = (InvVect, Option<Block>);

type FetchFn = fn(&dyn BlockStore, &InvVect) -> Result<Vec<Item>, StorageError>;

/// Single-slot send pipeline for one batch.
struct Pipeline<'a> {
    manager: &'a PeerManager,
    peer: &'a str,
    slot: Arc<Semaphore>,
    queued: usize,
}

impl<'a> Pipeline<'a> {
    fn new(manager: &'a PeerManager, peer: &'a str) -> Self {
        Self {
            manager,
            peer,
            slot: Arc::new(Semaphore::new(1)),
            queued: 0,
        }
    }

    /// Encode `msg`, wait for the previous parcel to be written, then queue.
    async fn push(&mut self, msg: &Message) -> anyhow::Result<()> {
        let parcel = self.manager.message_parcel(msg)?;
        let permit = self.slot.clone().acquire_owned().await?;
        self.manager.send_with_done(self.peer, parcel, permit).await?;
        self.queued += 1;
        Ok(())
    }

    /// Wait until the last queued parcel has been written.
    async fn finish(self) -> anyhow::Result<usize> {
        if self.queued > 0 {
            let _last = self.slot.acquire().await?;
        }
        Ok(self.queued)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Parcels written, including any `NotFound`.
    pub queued: usize,
    pub missing: usize,
    /// Last item pushed.
    pub last_sent: Option<InvVect>,
}

#[derive(Clone)]
pub struct Server {
    manager: PeerManager,
    store: Arc<dyn BlockStore>,
    continue_delay: Duration,
}

impl Server {
    pub fn new(manager: PeerManager, store: Arc<dyn BlockStore>) -> Self {
        Self {
            manager,
            store,
            continue_delay: Duration::from_secs(CURRENT_PARAMS.continue_delay_secs),
        }
    }

    pub fn with_continue_delay(mut self, delay: Duration) -> Self {
        self.continue_delay = delay;
        self
    }

    /// Answer a request message. Non-request messages are ignored.
    pub async fn serve(&self, peer: &str, request: Message) -> anyhow::Result<()> {
        match request {
            Message::GetData { inventory } => {
                self.handle_get_data(peer, &inventory).await?;
            }
            Message::GetDirData { inventory } => {
                self.handle_get_dir_data(peer, &inventory).await?;
            }
            Message::GetNonDirData { inventory } => {
                self.handle_get_non_dir_data(peer, &inventory).await?;
            }
            Message::GetEntryData { inventory } => {
                self.handle_get_entry_data(peer, &inventory).await?;
            }
            Message::GetDirBlocks { locator, stop_hash } => {
                self.handle_get_dir_blocks(peer, &locator, stop_hash).await?;
            }
            Message::DbStateMissing { start, end } => {
                self.handle_db_state_missing(peer, start, end).await?;
            }
            other => {
                tracing::debug!(peer, cmd = other.command(), "serve: not a request");
            }
        }
        Ok(())
    }

    async fn serve_batch(
        &self,
        peer: &str,
        inventory: &[InvVect],
        fetch: FetchFn,
    ) -> anyhow::Result<BatchOutcome> {
        let mut pipe = Pipeline::new(&self.manager, peer);
        let mut missing = Vec::new();
        let mut last_sent = None;

        for iv in inventory.iter().take(CURRENT_PARAMS.max_inv_per_msg) {
            let items = match fetch(self.store.as_ref(), iv) {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(peer, hash = %iv.hash.short(), error = %e, "serve: fetch failed");
                    vec![(*iv, None)]
                }
            };
            for (item_iv, block) in items {
                match block {
                    Some(block) => {
                        pipe.push(&Message::from_block(&block)?).await?;
                        self.manager.mark_known(peer, item_iv).await;
                        last_sent = Some(item_iv);
                    }
                    None => missing.push(item_iv),
                }
            }
        }

        let missing_count = missing.len();
        if !missing.is_empty() {
            tracing::debug!(peer, count = missing_count, "serve: not found");
            pipe.push(&Message::NotFound { inventory: missing }).await?;
        }
        let queued = pipe.finish().await?;
        Ok(BatchOutcome {
            queued,
            missing: missing_count,
            last_sent,
        })
    }

    /// Push directory blocks. When the last one is the peer's continuation
    /// marker, prompt it for the next range after a pause.
    pub async fn handle_get_dir_data(
        &self,
        peer: &str,
        inventory: &[InvVect],
    ) -> anyhow::Result<BatchOutcome> {
        let outcome = self.serve_batch(peer, inventory, dir_items).await?;
        if let Some(last) = outcome.last_sent {
            if self.manager.take_continue_hash(peer, &last.hash).await {
                let manager = self.manager.clone();
                let delay = self.continue_delay;
                let peer = peer.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let prompt = Message::DirInv {
                        inventory: vec![last],
                    };
                    if let Err(e) = manager.send_message(&peer, &prompt).await {
                        tracing::debug!(peer = %peer, error = %e, "serve: continuation prompt failed");
                    }
                });
            }
        }
        Ok(outcome)
    }

    pub async fn handle_get_non_dir_data(
        &self,
        peer: &str,
        inventory: &[InvVect],
    ) -> anyhow::Result<BatchOutcome> {
        self.serve_batch(peer, inventory, non_dir_items).await
    }

    pub async fn handle_get_entry_data(
        &self,
        peer: &str,
        inventory: &[InvVect],
    ) -> anyhow::Result<BatchOutcome> {
        self.serve_batch(peer, inventory, entry_items).await
    }

    pub async fn handle_get_data(
        &self,
        peer: &str,
        inventory: &[InvVect],
    ) -> anyhow::Result<BatchOutcome> {
        self.serve_batch(peer, inventory, data_items).await
    }

    /// Answer a locator with the directory block hashes that follow it.
    /// Returns the number of hashes sent.
    pub async fn handle_get_dir_blocks(
        &self,
        peer: &str,
        locator: &[Hash],
        stop_hash: Hash,
    ) -> anyhow::Result<usize> {
        let (hashes, partial) = dir_block_range(self.store.as_ref(), locator, stop_hash)?;
        if hashes.is_empty() {
            tracing::debug!(peer, "serve: getdirblocks, nothing to send");
            return Ok(0);
        }

        let mut reply = Message::dir_inv_with_size_hint(hashes.len());
        if let Message::DirInv { inventory } = &mut reply {
            inventory.extend(hashes.iter().map(|h| InvVect::new(InvType::DirBlock, *h)));
        }
        if partial {
            self.manager
                .set_continue_hash(peer, hashes.last().copied())
                .await;
        }
        self.manager.send_message(peer, &reply).await?;
        tracing::debug!(peer, count = hashes.len(), partial, "serve: getdirblocks answered");
        Ok(hashes.len())
    }

    /// Push the directory blocks at heights `start..=end`, capped at one
    /// message's worth.
    pub async fn handle_db_state_missing(
        &self,
        peer: &str,
        start: u32,
        end: u32,
    ) -> anyhow::Result<BatchOutcome> {
        if end < start {
            tracing::debug!(peer, start, end, "serve: empty range request");
            return Ok(BatchOutcome::default());
        }
        let cap = CURRENT_PARAMS.max_blocks_per_msg as u32;
        let end = end.min(start.saturating_add(cap - 1));
        let hashes = self
            .store
            .fetch_directory_block_height_range(start, Some(end.saturating_add(1)))?;
        let inventory: Vec<InvVect> = hashes
            .into_iter()
            .map(|h| InvVect::new(InvType::DirBlock, h))
            .collect();
        tracing::debug!(peer, start, end, found = inventory.len(), "serve: range request");
        self.serve_batch(peer, &inventory, dir_items).await
    }
}

/// Hashes answering a getdirblocks, and whether they were cut at the
/// per-message maximum.
///
/// The range starts one past the first locator hash we hold, or at height 1.
/// A known stop hash bounds it inclusively; otherwise it runs to our tip.
pub fn dir_block_range(
    store: &dyn BlockStore,
    locator: &[Hash],
    stop_hash: Hash,
) -> Result<(Vec<Hash>, bool), StorageError> {
    let stop = if stop_hash.is_zero() {
        None
    } else {
        store
            .fetch_directory_block_height_by_key_mr(&stop_hash)?
            .map(|h| h.saturating_add(1))
    };

    let mut start = 1;
    for hash in locator {
        if let Some(height) = store.fetch_directory_block_height_by_key_mr(hash)? {
            start = height.saturating_add(1);
            break;
        }
    }

    let max = CURRENT_PARAMS.max_blocks_per_msg;
    // One extra to detect truncation.
    let scan_end = start.saturating_add(max as u32 + 1);
    let end = stop.map_or(scan_end, |s| s.min(scan_end));
    if end <= start {
        return Ok((Vec::new(), false));
    }
    let mut hashes = store.fetch_directory_block_height_range(start, Some(end))?;
    let partial = hashes.len() > max;
    hashes.truncate(max);
    Ok((hashes, partial))
}

fn fetch_block(store: &dyn BlockStore, iv: &InvVect) -> Result<Option<Block>, StorageError> {
    let h = &iv.hash;
    Ok(match iv.inv_type {
        InvType::DirBlock => store.fetch_directory_block_by_hash(h)?.map(Block::Directory),
        InvType::AdminBlock => store.fetch_admin_block_by_hash(h)?.map(Block::Admin),
        InvType::EntryCreditBlock => store
            .fetch_entry_credit_block_by_hash(h)?
            .map(Block::EntryCredit),
        InvType::FactoidBlock => store.fetch_factoid_block_by_hash(h)?.map(Block::Factoid),
        InvType::EntryBlock => store.fetch_entry_block_by_key_mr(h)?.map(Block::EntryBlock),
        InvType::Entry => store.fetch_entry_by_hash(h)?.map(Block::Entry),
        // No transaction pool to serve from.
        InvType::Transaction => None,
    })
}

fn data_items(store: &dyn BlockStore, iv: &InvVect) -> Result<Vec<Item>, StorageError> {
    Ok(vec![(*iv, fetch_block(store, iv)?)])
}

fn dir_items(store: &dyn BlockStore, iv: &InvVect) -> Result<Vec<Item>, StorageError> {
    if iv.inv_type != InvType::DirBlock {
        return Ok(vec![(*iv, None)]);
    }
    data_items(store, iv)
}

/// The blocks a directory block links to, in entry order.
fn non_dir_items(store: &dyn BlockStore, iv: &InvVect) -> Result<Vec<Item>, StorageError> {
    let Some(dblock) = store.fetch_directory_block_by_hash(&iv.hash)? else {
        return Ok(vec![(*iv, None)]);
    };
    let mut items = Vec::with_capacity(dblock.entries.len());
    for entry in &dblock.entries {
        if entry.key_mr.is_zero() {
            continue;
        }
        let inv_type = match entry.chain_id {
            c if c == ADMIN_CHAIN_ID => InvType::AdminBlock,
            c if c == ENTRY_CREDIT_CHAIN_ID => InvType::EntryCreditBlock,
            c if c == FACTOID_CHAIN_ID => InvType::FactoidBlock,
            _ => InvType::EntryBlock,
        };
        let dep = InvVect::new(inv_type, entry.key_mr);
        items.push((dep, fetch_block(store, &dep)?));
    }
    Ok(items)
}

/// The entries an entry block lists, minute markers skipped.
fn entry_items(store: &dyn BlockStore, iv: &InvVect) -> Result<Vec<Item>, StorageError> {
    let Some(eblock) = store.fetch_entry_block_by_key_mr(&iv.hash)? else {
        return Ok(vec![(*iv, None)]);
    };
    let mut items = Vec::new();
    for hash in eblock.entry_hashes() {
        let entry_iv = InvVect::new(InvType::Entry, *hash);
        let entry = store.fetch_entry_by_hash(hash)?.map(Block::Entry);
        items.push((entry_iv, entry));
    }
    Ok(items)
}
