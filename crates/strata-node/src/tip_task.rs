//! Tip advertisement -- periodically tells a fanout of peers our highest
//! stored directory block.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use strata_protocol::Message;
use strata_storage::BlockStore;

use crate::peer_manager::PeerManager;

/// Broadcast our tip once. Returns the number of peers it was queued for.
pub async fn advertise_tip(manager: &PeerManager, store: &dyn BlockStore) -> anyhow::Result<usize> {
    let Some(height) = store.fetch_database_height()? else {
        return Ok(0);
    };
    let Some(block) = store.fetch_directory_block_by_height(height)? else {
        return Ok(0);
    };
    let msg = Message::ChainTip {
        height,
        key_mr: block.key_mr()?,
    };
    let parcel = manager.message_parcel(&msg)?;
    Ok(manager.broadcast(&parcel, false).await)
}

/// Run the tip loop until shutdown.
pub async fn run_tip_loop(
    manager: PeerManager,
    store: Arc<dyn BlockStore>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => match advertise_tip(&manager, store.as_ref()).await {
                Ok(sent) => tracing::trace!(sent, "tip: advertised"),
                Err(e) => tracing::warn!(error = %e, "tip: advertisement failed"),
            },
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("tip: stopped");
}
