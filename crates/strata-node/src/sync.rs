//! Receive side -- dispatch of application messages from peers.
//!
//! Requests from one peer are served in order by that peer's serving worker,
//! one batch at a time. Its queue is bounded; requests beyond it are dropped,
//! so a peer that stops reading cannot build up unbounded work. Pushed blocks
//! are recorded as known to the sender, handed to ingest, and followed up with
//! a request for what they link to. Inventory and tip advertisements turn
//! into data and range requests.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex};

use strata_blocks::{Block, Hash};
use strata_protocol::{InvType, InvVect, Message, CURRENT_PARAMS};
use strata_storage::{BlockStore, StorageError};

use crate::ingest::{ChainState, Inbound};
use crate::peer_manager::{MessageItem, PeerManager};
use crate::serve::Server;

/// Requests a peer may have waiting behind the batch being served.
pub const SERVE_QUEUE_DEPTH: usize = 8;

#[derive(Clone)]
pub struct Dispatcher {
    manager: PeerManager,
    server: Server,
    store: Arc<dyn BlockStore>,
    chain: Arc<ChainState>,
    ingest_tx: mpsc::Sender<Inbound>,
    serving: Arc<Mutex<HashMap<String, mpsc::Sender<Message>>>>,
}

impl Dispatcher {
    pub fn new(
        manager: PeerManager,
        server: Server,
        store: Arc<dyn BlockStore>,
        chain: Arc<ChainState>,
        ingest_tx: mpsc::Sender<Inbound>,
    ) -> Self {
        Self {
            manager,
            server,
            store,
            chain,
            ingest_tx,
            serving: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn run(self, mut app_rx: mpsc::Receiver<MessageItem>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                item = app_rx.recv() => match item {
                    Some((peer, msg)) => self.dispatch(&peer, msg).await,
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("sync: dispatcher stopped");
    }

    pub async fn dispatch(&self, peer: &str, msg: Message) {
        tracing::trace!(peer, cmd = msg.command(), "sync: message");
        match msg {
            request @ (Message::GetData { .. }
            | Message::GetDirData { .. }
            | Message::GetNonDirData { .. }
            | Message::GetEntryData { .. }
            | Message::GetDirBlocks { .. }
            | Message::DbStateMissing { .. }) => self.enqueue_request(peer, request).await,
            Message::DirInv { inventory } => {
                if let Err(e) = self.on_dir_inv(peer, &inventory).await {
                    tracing::warn!(peer, error = %e, "sync: dirinv handling failed");
                }
            }
            Message::ChainTip { height, key_mr } => {
                if let Err(e) = self.on_chain_tip(peer, height, key_mr).await {
                    tracing::warn!(peer, error = %e, "sync: chaintip handling failed");
                }
            }
            Message::NotFound { inventory } => {
                tracing::debug!(peer, count = inventory.len(), "sync: peer could not serve items");
            }
            Message::FactoidTx { data } => {
                let iv = InvVect::new(InvType::Transaction, Hash::sha256(&data));
                self.manager.mark_known(peer, iv).await;
                self.forward(Inbound::Transaction {
                    peer: peer.to_string(),
                    data,
                })
                .await;
            }
            push => self.on_block_push(peer, push).await,
        }
    }

    /// Queue a request on the peer's serving worker, starting one if needed.
    /// A full queue drops the request.
    async fn enqueue_request(&self, peer: &str, request: Message) {
        let mut serving = self.serving.lock().await;
        let request = match serving.get(peer) {
            Some(tx) => match tx.try_send(request) {
                Ok(()) => return,
                Err(TrySendError::Full(dropped)) => {
                    tracing::warn!(
                        peer,
                        cmd = dropped.command(),
                        depth = SERVE_QUEUE_DEPTH,
                        "serve: request queue full, dropping request"
                    );
                    return;
                }
                Err(TrySendError::Closed(request)) => request,
            },
            None => request,
        };
        serving.retain(|_, tx| !tx.is_closed());
        let tx = self.spawn_serving_worker(peer);
        if tx.try_send(request).is_ok() {
            serving.insert(peer.to_string(), tx);
        }
    }

    fn spawn_serving_worker(&self, peer: &str) -> mpsc::Sender<Message> {
        let (tx, mut rx) = mpsc::channel::<Message>(SERVE_QUEUE_DEPTH);
        let server = self.server.clone();
        let manager = self.manager.clone();
        let peer = peer.to_string();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let cmd = request.command();
                if let Err(e) = server.serve(&peer, request).await {
                    tracing::warn!(peer = %peer, cmd, error = %e, "serve: request failed");
                    if !manager.is_online(&peer).await {
                        break;
                    }
                }
            }
            tracing::debug!(peer = %peer, "serve: worker stopped");
        });
        tx
    }

    /// Requests waiting for the peer's serving worker.
    pub async fn serve_backlog(&self, peer: &str) -> usize {
        self.serving
            .lock()
            .await
            .get(peer)
            .map_or(0, |tx| SERVE_QUEUE_DEPTH - tx.capacity())
    }

    /// Peers with a live serving worker.
    pub async fn serving_peers(&self) -> usize {
        self.serving
            .lock()
            .await
            .values()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    async fn forward(&self, inbound: Inbound) {
        if self.ingest_tx.send(inbound).await.is_err() {
            tracing::debug!("sync: ingest queue closed");
        }
    }

    async fn on_block_push(&self, peer: &str, msg: Message) {
        let cmd = msg.command();
        let block = match msg.to_block() {
            Some(Ok(block)) => block,
            Some(Err(e)) => {
                tracing::warn!(peer, cmd, error = %e, "sync: undecodable block");
                self.manager.adjust_quality(peer, -1).await;
                return;
            }
            None => return,
        };
        let hash = match block.hash() {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(peer, cmd, error = %e, "sync: unhashable block");
                return;
            }
        };
        let iv = InvVect::new(block.kind().into(), hash);
        self.manager.mark_known(peer, iv).await;
        self.manager.merit(peer).await;

        let follow_up = match &block {
            Block::Directory(_) => Some(Message::GetNonDirData {
                inventory: vec![iv],
            }),
            Block::EntryBlock(_) => match self.store.fetch_entry_block_by_key_mr(&hash) {
                Ok(Some(_)) => None,
                _ => Some(Message::GetEntryData {
                    inventory: vec![iv],
                }),
            },
            _ => None,
        };

        self.forward(Inbound::Block {
            peer: peer.to_string(),
            block,
        })
        .await;

        if let Some(request) = follow_up {
            if let Err(e) = self.manager.send_message(peer, &request).await {
                tracing::debug!(peer, cmd = request.command(), error = %e, "sync: follow-up failed");
            }
        }
    }

    /// Request advertised directory blocks we lack. A single advertised item
    /// we already hold is a continuation prompt: ask for the next range.
    async fn on_dir_inv(&self, peer: &str, inventory: &[InvVect]) -> anyhow::Result<()> {
        let mut wanted = Vec::new();
        let mut prompt = false;
        for iv in inventory.iter().take(CURRENT_PARAMS.max_inv_per_msg) {
            if iv.inv_type != InvType::DirBlock {
                continue;
            }
            let seen = self.manager.knows(peer, iv).await;
            self.manager.mark_known(peer, *iv).await;
            let held = self
                .store
                .fetch_directory_block_height_by_key_mr(&iv.hash)?
                .is_some();
            if inventory.len() == 1 && (held || seen) {
                prompt = true;
            } else if !held {
                wanted.push(*iv);
            }
        }

        if !wanted.is_empty() {
            tracing::debug!(peer, count = wanted.len(), "sync: requesting directory blocks");
            self.manager
                .send_message(peer, &Message::GetDirData { inventory: wanted })
                .await?;
        }
        if prompt {
            let locator = block_locator(self.store.as_ref(), self.chain.tip())?;
            self.push_get_dir_blocks(peer, locator, Hash::ZERO).await?;
        }
        Ok(())
    }

    async fn on_chain_tip(&self, peer: &str, height: u32, key_mr: Hash) -> anyhow::Result<()> {
        self.manager
            .mark_known(peer, InvVect::new(InvType::DirBlock, key_mr))
            .await;
        if self.chain.record_advertised(height) {
            tracing::debug!(peer, height, "sync: higher tip advertised");
        }
        let local = self.chain.tip();
        if local.is_some_and(|t| height <= t) {
            return Ok(());
        }
        if self
            .store
            .fetch_directory_block_height_by_key_mr(&key_mr)?
            .is_some()
        {
            return Ok(());
        }
        let locator = block_locator(self.store.as_ref(), local)?;
        self.push_get_dir_blocks(peer, locator, Hash::ZERO).await?;
        Ok(())
    }

    /// Ask a peer for the directory block hashes after `locator`. A request
    /// identical to the previous one sent to the same peer is dropped.
    /// Returns whether a message was queued.
    pub async fn push_get_dir_blocks(
        &self,
        peer: &str,
        locator: Vec<Hash>,
        stop_hash: Hash,
    ) -> anyhow::Result<bool> {
        let begin = locator.first().copied().unwrap_or(Hash::ZERO);
        if !self
            .manager
            .record_get_dir_blocks(peer, begin, stop_hash)
            .await
        {
            tracing::debug!(peer, begin = %begin.short(), "sync: duplicate getdirblocks filtered");
            return Ok(false);
        }
        self.manager
            .send_message(
                peer,
                &Message::GetDirBlocks {
                    locator,
                    stop_hash,
                },
            )
            .await?;
        Ok(true)
    }
}

/// Heights for a block locator: the ten most recent, then doubling steps
/// back to genesis.
pub fn locator_heights(tip: u32) -> Vec<u32> {
    let mut heights = Vec::new();
    let mut step = 1u32;
    let mut h = tip;
    loop {
        heights.push(h);
        if h == 0 {
            break;
        }
        if heights.len() >= 10 {
            step = step.saturating_mul(2);
        }
        h = h.saturating_sub(step);
    }
    heights
}

/// Key roots of our directory blocks at the locator heights, newest first.
pub fn block_locator(store: &dyn BlockStore, tip: Option<u32>) -> Result<Vec<Hash>, StorageError> {
    let Some(tip) = tip else {
        return Ok(Vec::new());
    };
    let mut locator = Vec::new();
    for h in locator_heights(tip) {
        if let Some(block) = store.fetch_directory_block_by_height(h)? {
            locator.push(block.key_mr()?);
        }
    }
    Ok(locator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_manager::tests::{connect_client, next_parcel, test_config, Client};
    use std::time::Duration;
    use strata_blocks::fixtures::{build_chain, ChainFixture};
    use strata_protocol::LOCAL_NET;
    use strata_storage::SqliteStore;

    struct Fixture {
        dispatcher: Dispatcher,
        peer: String,
        client: Client,
        ingest_rx: mpsc::Receiver<Inbound>,
        fx: ChainFixture,
    }

    /// A dispatcher whose store holds the first `stored` heights of a
    /// `count`-height chain.
    async fn fixture(count: u32, stored: u32) -> Fixture {
        let store = SqliteStore::open_in_memory().unwrap();
        let fx = build_chain(LOCAL_NET, count).unwrap();
        for d in &fx.directory[..stored as usize] {
            store.store_directory_block(d).unwrap();
        }
        let store: Arc<dyn BlockStore> = Arc::new(store);
        let chain = Arc::new(ChainState::new(stored.checked_sub(1)));
        let (manager, _rx) = PeerManager::new(test_config());
        let (peer, client) = connect_client(&manager).await;
        let server = Server::new(manager.clone(), store.clone());
        let (ingest_tx, ingest_rx) = mpsc::channel(16);
        Fixture {
            dispatcher: Dispatcher::new(manager, server, store, chain, ingest_tx),
            peer,
            client,
            ingest_rx,
            fx,
        }
    }

    async fn next_message(client: &mut Client) -> Message {
        next_parcel(client).await.decode_message().unwrap()
    }

    #[test]
    fn test_locator_heights() {
        assert_eq!(locator_heights(0), vec![0]);
        assert_eq!(locator_heights(3), vec![3, 2, 1, 0]);
        assert_eq!(
            locator_heights(20),
            vec![20, 19, 18, 17, 16, 15, 14, 13, 12, 11, 9, 5, 0]
        );
    }

    #[tokio::test]
    async fn test_duplicate_get_dir_blocks_sent_once() {
        let mut f = fixture(3, 3).await;
        let locator = vec![f.fx.directory[2].key_mr().unwrap()];
        let d = &f.dispatcher;
        assert!(d.push_get_dir_blocks(&f.peer, locator.clone(), Hash::ZERO).await.unwrap());
        assert!(!d.push_get_dir_blocks(&f.peer, locator.clone(), Hash::ZERO).await.unwrap());

        let first = next_message(&mut f.client).await;
        assert_eq!(
            first,
            Message::GetDirBlocks {
                locator,
                stop_hash: Hash::ZERO
            }
        );
        assert!(
            tokio::time::timeout(Duration::from_millis(200), next_parcel(&mut f.client))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_dir_inv_requests_unknown_blocks() {
        let mut f = fixture(4, 2).await;
        let iv = |h: usize| InvVect::new(InvType::DirBlock, f.fx.directory[h].key_mr().unwrap());
        let inventory = vec![iv(1), iv(2), iv(3)];
        f.dispatcher
            .dispatch(&f.peer, Message::DirInv { inventory })
            .await;
        assert_eq!(
            next_message(&mut f.client).await,
            Message::GetDirData {
                inventory: vec![iv(2), iv(3)]
            }
        );
        assert!(f.dispatcher.manager.knows(&f.peer, &iv(1)).await);
    }

    #[tokio::test]
    async fn test_single_known_inv_prompts_range_request() {
        let mut f = fixture(3, 3).await;
        let tip = f.fx.directory[2].key_mr().unwrap();
        f.dispatcher
            .dispatch(
                &f.peer,
                Message::DirInv {
                    inventory: vec![InvVect::new(InvType::DirBlock, tip)],
                },
            )
            .await;
        match next_message(&mut f.client).await {
            Message::GetDirBlocks { locator, stop_hash } => {
                assert_eq!(locator[0], tip);
                assert_eq!(locator.len(), 3);
                assert!(stop_hash.is_zero());
            }
            other => panic!("unexpected {}", other.command()),
        }
    }

    #[tokio::test]
    async fn test_pushed_directory_block_forwarded_and_followed_up() {
        let mut f = fixture(2, 1).await;
        let block = Block::Directory(f.fx.directory[1].clone());
        let key = block.hash().unwrap();
        f.dispatcher
            .dispatch(&f.peer, Message::from_block(&block).unwrap())
            .await;

        match f.ingest_rx.recv().await.unwrap() {
            Inbound::Block { peer, block: got } => {
                assert_eq!(peer, f.peer);
                assert_eq!(got, block);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            next_message(&mut f.client).await,
            Message::GetNonDirData {
                inventory: vec![InvVect::new(InvType::DirBlock, key)]
            }
        );
        assert!(
            f.dispatcher
                .manager
                .knows(&f.peer, &InvVect::new(InvType::DirBlock, key))
                .await
        );
    }

    #[tokio::test]
    async fn test_requests_from_one_peer_served_one_batch_at_a_time() {
        let mut f = fixture(25, 25).await;
        let iv = |h: usize| InvVect::new(InvType::DirBlock, f.fx.directory[h].key_mr().unwrap());
        let first: Vec<InvVect> = (1..=20).map(iv).collect();
        f.dispatcher
            .dispatch(&f.peer, Message::GetDirData { inventory: first })
            .await;
        f.dispatcher
            .dispatch(&f.peer, Message::GetDirData { inventory: vec![iv(0)] })
            .await;

        let mut heights = Vec::new();
        for _ in 0..21 {
            let block = next_message(&mut f.client).await.to_block().unwrap().unwrap();
            heights.push(block.height().unwrap());
        }
        let mut expected: Vec<u32> = (1..=20).collect();
        expected.push(0);
        assert_eq!(heights, expected);
        assert_eq!(f.dispatcher.serving_peers().await, 1);
    }

    #[tokio::test]
    async fn test_backlog_bounded_for_peer_that_stops_reading() {
        let f = fixture(3, 3).await;
        let iv = InvVect::new(InvType::DirBlock, f.fx.directory[1].key_mr().unwrap());
        for _ in 0..500 {
            f.dispatcher
                .dispatch(&f.peer, Message::GetDirData { inventory: vec![iv] })
                .await;
        }
        assert!(f.dispatcher.serve_backlog(&f.peer).await <= SERVE_QUEUE_DEPTH);
        assert_eq!(f.dispatcher.serving_peers().await, 1);
    }

    #[tokio::test]
    async fn test_valid_block_push_earns_merit() {
        let f = fixture(2, 1).await;
        let block = Block::Directory(f.fx.directory[1].clone());
        f.dispatcher
            .dispatch(&f.peer, Message::from_block(&block).unwrap())
            .await;
        let rec = f
            .dispatcher
            .manager
            .snapshot()
            .await
            .into_iter()
            .find(|r| r.hash == f.peer)
            .unwrap();
        assert_eq!(rec.quality_score, 1);
    }

    #[tokio::test]
    async fn test_undecodable_block_costs_quality() {
        let mut f = fixture(1, 1).await;
        f.dispatcher
            .dispatch(&f.peer, Message::DirBlock { data: vec![1, 2, 3] })
            .await;
        let rec = f
            .dispatcher
            .manager
            .snapshot()
            .await
            .into_iter()
            .find(|r| r.hash == f.peer)
            .unwrap();
        assert_eq!(rec.quality_score, -1);
        assert!(f.ingest_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_higher_chain_tip_triggers_range_request() {
        let mut f = fixture(5, 2).await;
        let tip = f.fx.directory[4].key_mr().unwrap();
        f.dispatcher
            .dispatch(&f.peer, Message::ChainTip { height: 4, key_mr: tip })
            .await;
        assert_eq!(
            strata_catchup::ChainView::highest_known(f.dispatcher.chain.as_ref()),
            4
        );
        match next_message(&mut f.client).await {
            Message::GetDirBlocks { locator, .. } => {
                assert_eq!(locator[0], f.fx.directory[1].key_mr().unwrap());
            }
            other => panic!("unexpected {}", other.command()),
        }

        // A tip we already hold triggers nothing.
        let ours = f.fx.directory[1].key_mr().unwrap();
        f.dispatcher
            .dispatch(&f.peer, Message::ChainTip { height: 1, key_mr: ours })
            .await;
        assert!(
            tokio::time::timeout(Duration::from_millis(200), next_parcel(&mut f.client))
                .await
                .is_err()
        );
    }
}
