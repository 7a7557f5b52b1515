//! One TCP link to a peer: a framed read/write task and its handle.
//!
//! The task owns the socket. Outbound parcels arrive on a bounded queue; each
//! may carry a semaphore permit that is released once the parcel has been
//! written, which is how the serving handlers pipeline sends. Dropping the
//! handle stops the task.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit};
use tokio_util::codec::Framed;

use strata_protocol::{Parcel, ParcelCodec};

/// A parcel queued for a peer.
#[derive(Debug)]
pub struct Outbound {
    pub parcel: Parcel,
    /// Released after the parcel is written to the socket.
    pub done: Option<OwnedSemaphorePermit>,
}

#[derive(Debug)]
pub enum ConnectionEvent {
    Parcel(Parcel),
    /// The link failed or the remote closed it.
    Closed(String),
}

#[derive(Debug)]
pub struct Connection {
    id: u64,
    outbound: mpsc::Sender<Outbound>,
    _stop: oneshot::Sender<()>,
}

impl Connection {
    pub fn spawn(
        id: u64,
        stream: TcpStream,
        codec: ParcelCodec,
        queue_depth: usize,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let (outbound, rx) = mpsc::channel(queue_depth.max(1));
        let (stop, stop_rx) = oneshot::channel();
        tokio::spawn(run_connection(id, stream, codec, rx, stop_rx, events));
        Self {
            id,
            outbound,
            _stop: stop,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sender(&self) -> mpsc::Sender<Outbound> {
        self.outbound.clone()
    }
}

async fn run_connection(
    id: u64,
    stream: TcpStream,
    codec: ParcelCodec,
    mut outbound: mpsc::Receiver<Outbound>,
    mut stop: oneshot::Receiver<()>,
    events: mpsc::Sender<ConnectionEvent>,
) {
    let remote = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".into());
    let (mut sink, mut frames) = Framed::new(stream, codec).split();

    let failure = loop {
        tokio::select! {
            _ = &mut stop => break None,

            frame = frames.next() => match frame {
                Some(Ok(parcel)) => {
                    if events.send(ConnectionEvent::Parcel(parcel)).await.is_err() {
                        break None;
                    }
                }
                Some(Err(e)) => break Some(format!("receive error: {e}")),
                None => break Some("closed by remote".to_string()),
            },

            out = outbound.recv() => match out {
                Some(Outbound { parcel, done }) => {
                    if let Err(e) = sink.send(parcel).await {
                        break Some(format!("send error: {e}"));
                    }
                    drop(done);
                }
                None => break None,
            },
        }
    };

    match failure {
        Some(reason) => {
            tracing::debug!(conn = id, %remote, reason = %reason, "conn: closed");
            let _ = events.send(ConnectionEvent::Closed(reason)).await;
        }
        None => tracing::debug!(conn = id, %remote, "conn: stopped"),
    }
}
