//! Catch-up background task -- drives the height window from timers and the
//! notice channel.
//!
//! Three tickers:
//!   1. raise: poll the chain view and raise the ceiling
//!   2. send: issue range requests for eligible heights to random peers
//!   3. dump: log the window
//!
//! Nothing is requested until the database reports loaded; the floor then
//! fast-forwards past the boot height.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, watch, Mutex};

use strata_catchup::{ceiling_target, Catchup, CatchupNotice, ChainView};
use strata_protocol::{Message, CURRENT_PARAMS};
use strata_storage::BlockStore;

use crate::peer_manager::PeerManager;

#[derive(Debug, Clone)]
pub struct CatchupTimers {
    pub raise: Duration,
    pub send: Duration,
    pub dump: Duration,
}

impl Default for CatchupTimers {
    fn default() -> Self {
        Self {
            raise: Duration::from_millis(CURRENT_PARAMS.catchup_raise_interval_ms),
            send: Duration::from_millis(CURRENT_PARAMS.catchup_send_interval_ms),
            dump: Duration::from_secs(CURRENT_PARAMS.catchup_dump_interval_secs),
        }
    }
}

pub struct CatchupTask {
    catchup: Arc<Mutex<Catchup>>,
    manager: PeerManager,
    chain: Arc<dyn ChainView>,
    store: Arc<dyn BlockStore>,
    timers: CatchupTimers,
}

impl CatchupTask {
    pub fn new(
        catchup: Catchup,
        manager: PeerManager,
        chain: Arc<dyn ChainView>,
        store: Arc<dyn BlockStore>,
    ) -> Self {
        Self {
            catchup: Arc::new(Mutex::new(catchup)),
            manager,
            chain,
            store,
            timers: CatchupTimers::default(),
        }
    }

    pub fn with_timers(mut self, timers: CatchupTimers) -> Self {
        self.timers = timers;
        self
    }

    /// Shared handle on the window, for inspection.
    pub fn window(&self) -> Arc<Mutex<Catchup>> {
        self.catchup.clone()
    }

    /// Fast-forward the floor past the height the database holds now.
    pub async fn on_db_loaded(&self) {
        match self.store.fetch_database_height() {
            Ok(Some(boot)) => self.catchup.lock().await.fast_forward(boot),
            Ok(None) => tracing::info!("catchup: database empty, starting at genesis"),
            Err(e) => tracing::warn!(error = %e, "catchup: could not read boot height"),
        }
    }

    pub async fn raise(&self) {
        let margin = self.catchup.lock().await.config().margin;
        let target = ceiling_target(self.chain.highest_ack(), self.chain.highest_known(), margin);
        self.catchup.lock().await.raise_ceiling(target);
    }

    /// One send tick. Returns the ranges handed to peers.
    pub async fn send(&self) -> Vec<(u32, u32)> {
        if self.manager.online_count().await == 0 {
            return Vec::new();
        }
        let requests = self.catchup.lock().await.next_requests(Instant::now());
        let mut sent = Vec::with_capacity(requests.len());
        for (start, end) in requests {
            let result = match self
                .manager
                .message_parcel(&Message::DbStateMissing { start, end })
            {
                Ok(parcel) => self.manager.to_peer("", parcel).await.map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(peer) => {
                    tracing::debug!(peer = %peer, start, end, "catchup: range requested");
                    sent.push((start, end));
                }
                Err(e) => {
                    tracing::debug!(start, end, error = %e, "catchup: range request failed");
                    let mut c = self.catchup.lock().await;
                    for h in start..=end {
                        c.mark_failed(h);
                    }
                }
            }
        }
        sent
    }

    pub async fn apply(&self, notice: CatchupNotice) {
        self.catchup.lock().await.apply(notice);
    }

    async fn dump(&self) {
        let snap = self.catchup.lock().await.snapshot(Instant::now());
        tracing::info!(
            floor = snap.floor,
            ceiling = snap.ceiling,
            asked = snap.asked,
            arrived = snap.arrived,
            outstanding = snap.outstanding,
            ack = self.chain.highest_ack(),
            known = self.chain.highest_known(),
            "catchup: window"
        );
    }

    /// Run the catch-up loop until shutdown.
    pub async fn run(
        self,
        mut notices: mpsc::Receiver<CatchupNotice>,
        mut db_loaded: watch::Receiver<bool>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        while !*db_loaded.borrow_and_update() {
            tokio::select! {
                changed = db_loaded.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
        self.on_db_loaded().await;

        let mut raise_tick = tokio::time::interval(self.timers.raise);
        raise_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut send_tick = tokio::time::interval(self.timers.send);
        send_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        send_tick.tick().await;
        let mut dump_tick = tokio::time::interval(self.timers.dump);
        dump_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        dump_tick.tick().await;

        loop {
            tokio::select! {
                notice = notices.recv() => match notice {
                    Some(n) => self.apply(n).await,
                    None => break,
                },
                _ = raise_tick.tick() => self.raise().await,
                _ = send_tick.tick() => {
                    self.send().await;
                }
                _ = dump_tick.tick() => self.dump().await,
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("catchup: stopped");
    }
}
