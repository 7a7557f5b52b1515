//! Peer manager -- owns the peer book, admits and dials connections, and
//! routes parcels.
//!
//! The book sits behind one `RwLock`. Mutation takes the write lock;
//! selection copies what it needs under the read lock and releases it before
//! any send is awaited.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, RwLock};

use strata_blocks::Hash;
use strata_peers::{
    dial_candidates, pick_one, select_random, sort_by_quality, AdmissionPolicy, PeerBook,
    PeerError, PeerRecord, PeerType, SourceLimiter, UNDIALABLE_PORT,
};
use strata_protocol::{
    InvVect, Message, NetworkId, Parcel, ParcelCodec, ParcelHeader, ParcelType, PeerAddress,
    PeerShare, CURRENT_PARAMS,
};

use crate::config::NodeConfig;
use crate::connection::{Connection, ConnectionEvent, Outbound};
use crate::peer::Peer;

/// A parcel received from the peer with the given hash.
pub type DataItem = (String, Parcel);

/// An application message received from the peer with the given hash.
pub type MessageItem = (String, Message);

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub network: NetworkId,
    pub node_id: u64,
    /// Port we listen on, advertised in every parcel header.
    pub listen_port: String,
    pub fanout: usize,
    pub admission: AdmissionPolicy,
    pub peer_request_interval: Duration,
    pub maintenance_interval: Duration,
    pub dial_timeout: Duration,
    pub source_limit: Duration,
    pub queue_depth: usize,
    pub max_message_bytes: usize,
    pub known_inventory_cap: usize,
}

impl ManagerConfig {
    pub fn from_node_config(cfg: &NodeConfig, node_id: u64, listen_port: u16) -> Self {
        let net = &cfg.network;
        let mut admission =
            AdmissionPolicy::new(net.connection_policy, net.max_outgoing, net.max_incoming);
        admission.refuse_unknown = net.refuse_unknown;
        admission.special_addresses = net.peers.iter().map(|p| p.host_port().0).collect();
        Self {
            network: cfg.network_id(),
            node_id,
            listen_port: listen_port.to_string(),
            fanout: net.fanout,
            admission,
            peer_request_interval: Duration::from_secs(net.peer_request_interval_secs),
            maintenance_interval: Duration::from_secs(net.maintenance_interval_secs.max(1)),
            dial_timeout: Duration::from_secs(net.dial_timeout_secs),
            source_limit: Duration::from_secs(net.source_limit_secs),
            queue_depth: CURRENT_PARAMS.outbound_queue_depth,
            max_message_bytes: CURRENT_PARAMS.max_message_bytes,
            known_inventory_cap: CURRENT_PARAMS.known_inventory_cap,
        }
    }
}

#[derive(Clone)]
pub struct PeerManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ManagerConfig,
    peers: RwLock<PeerBook<Peer>>,
    /// Starts as `config.admission`; special peers added later join it.
    admission: RwLock<AdmissionPolicy>,
    data_tx: mpsc::Sender<DataItem>,
    next_conn_id: AtomicU64,
}

impl PeerManager {
    /// Build a manager and the receiving end of its inbound parcel channel.
    pub fn new(config: ManagerConfig) -> (Self, mpsc::Receiver<DataItem>) {
        let (data_tx, data_rx) = mpsc::channel(config.queue_depth.max(1));
        let manager = Self {
            inner: Arc::new(Inner {
                admission: RwLock::new(config.admission.clone()),
                config,
                peers: RwLock::new(PeerBook::new()),
                data_tx,
                next_conn_id: AtomicU64::new(1),
            }),
        };
        (manager, data_rx)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn network(&self) -> NetworkId {
        self.inner.config.network
    }

    pub fn message_parcel(&self, msg: &Message) -> Result<Parcel, strata_protocol::ProtocolError> {
        Parcel::message(self.network(), msg)
    }

    /// Add a dialable peer unless one with the same address and listen port
    /// exists. Returns its hash and whether it was new.
    pub async fn add_peer(&self, address: &str, port: &str, peer_type: PeerType) -> (String, bool) {
        if peer_type.is_special() {
            self.inner
                .admission
                .write()
                .await
                .special_addresses
                .insert(address.to_string());
        }
        let mut peers = self.inner.peers.write().await;
        if let Some(existing) = peers
            .by_address(address)
            .find(|p| p.record.listen_port == port)
        {
            return (existing.record.hash.clone(), false);
        }
        let record = PeerRecord::new(address, port, port, peer_type, true, self.network());
        let hash = record.hash.clone();
        peers.insert(Peer::new(record, self.inner.config.known_inventory_cap));
        tracing::debug!(
            peer = %hash,
            peer_type = peer_type.as_str(),
            known = peers.len(),
            "pm: peer added"
        );
        (hash, true)
    }

    /// Admit or reject an accepted TCP connection. Accepted connections go
    /// straight to `Online`.
    pub async fn handle_incoming(
        &self,
        stream: TcpStream,
        remote: SocketAddr,
    ) -> Result<String, PeerError> {
        let address = remote.ip().to_string();
        let policy = self.inner.admission.read().await;
        {
            let peers = self.inner.peers.read().await;
            let (outgoing, incoming) = online_counts(&peers);
            policy.check_incoming(&address, peers.has_address(&address), outgoing, incoming)?;
        }

        let peer_type = if policy.is_special_address(&address) {
            PeerType::SpecialConfig
        } else {
            PeerType::Regular
        };
        drop(policy);
        let record = PeerRecord::new(
            &address,
            &remote.port().to_string(),
            UNDIALABLE_PORT,
            peer_type,
            false,
            self.network(),
        );
        let hash = record.hash.clone();
        self.inner
            .peers
            .write()
            .await
            .insert(Peer::new(record, self.inner.config.known_inventory_cap));
        tracing::info!(peer = %hash, %remote, "pm: accepted inbound connection");
        self.attach(&hash, stream).await;
        Ok(hash)
    }

    /// Dial a known peer. Failures are logged; the attempt count feeds the
    /// maintenance backoff.
    pub async fn start_to_dial(&self, hash: &str) {
        let (addr, attempt) = {
            let mut peers = self.inner.peers.write().await;
            let Some(peer) = peers.get_mut(hash) else {
                return;
            };
            match peer.begin_dial(Instant::now()) {
                Ok(addr) => (addr, peer.record.connection_attempts),
                Err(e) => {
                    tracing::error!(peer = hash, error = %e, "pm: cannot dial");
                    return;
                }
            }
        };
        tracing::debug!(peer = hash, %addr, attempt, "pm: dialing");

        let result = tokio::time::timeout(self.inner.config.dial_timeout, TcpStream::connect(&addr)).await;
        let reason = match result {
            Ok(Ok(stream)) => {
                self.attach(hash, stream).await;
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "timed out".to_string(),
        };

        let mut peers = self.inner.peers.write().await;
        if let Some(peer) = peers.get_mut(hash) {
            if peer.connection_id().is_none() {
                peer.go_offline();
            }
        }
        tracing::info!(peer = hash, %addr, attempt, reason = %reason, "pm: dial failed");
    }

    async fn attach(&self, hash: &str, stream: TcpStream) -> bool {
        let cfg = &self.inner.config;
        let id = self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = mpsc::channel(cfg.queue_depth.max(1));
        let conn = Connection::spawn(
            id,
            stream,
            ParcelCodec::with_max_size(cfg.max_message_bytes),
            cfg.queue_depth,
            events_tx,
        );
        {
            let mut peers = self.inner.peers.write().await;
            let Some(peer) = peers.get_mut(hash) else {
                return false;
            };
            peer.attach(conn, Instant::now());
            tracing::info!(
                peer = %peer.record.ident(),
                outgoing = peer.record.outgoing,
                peer_type = peer.record.peer_type_string(),
                "pm: peer online"
            );
        }
        let manager = self.clone();
        let hash = hash.to_string();
        tokio::spawn(async move { manager.monitor(hash, id, events_rx).await });
        true
    }

    /// Watch one connection: forward parcels to the data channel, take the
    /// peer offline when the link fails.
    async fn monitor(self, hash: String, conn_id: u64, mut events: mpsc::Receiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Parcel(parcel) => {
                    if !self.observe_header(&hash, &parcel.header).await {
                        return;
                    }
                    // Blocks while the dispatcher is behind.
                    if self.inner.data_tx.send((hash.clone(), parcel)).await.is_err() {
                        return;
                    }
                }
                ConnectionEvent::Closed(reason) => {
                    let mut peers = self.inner.peers.write().await;
                    if let Some(peer) = peers.get_mut(&hash) {
                        if peer.connection_id() == Some(conn_id) {
                            peer.go_offline();
                            tracing::info!(peer = %hash, reason = %reason, "pm: peer offline");
                        }
                    }
                    return;
                }
            }
        }
    }

    /// Apply the advertised listen port and node id. False if the peer is
    /// gone or turned out to be ourselves.
    async fn observe_header(&self, hash: &str, header: &ParcelHeader) -> bool {
        let mut peers = self.inner.peers.write().await;
        if header.node_id != 0 && header.node_id == self.inner.config.node_id {
            tracing::warn!(peer = hash, "pm: connected to ourselves, dropping peer");
            peers.remove(hash);
            return false;
        }
        match peers.get_mut(hash) {
            Some(peer) => {
                peer.record
                    .update_advertised(&header.peer_port, header.node_id, Instant::now());
                true
            }
            None => false,
        }
    }

    pub async fn go_offline(&self, hash: &str) {
        if let Some(peer) = self.inner.peers.write().await.get_mut(hash) {
            peer.go_offline();
        }
    }

    /// Stop a peer: tear down its link and clear its attempt count.
    pub async fn stop_peer(&self, hash: &str) {
        if let Some(peer) = self.inner.peers.write().await.get_mut(hash) {
            peer.stop();
            tracing::debug!(peer = hash, "pm: peer stopped");
        }
    }

    pub async fn stop(&self) {
        let mut peers = self.inner.peers.write().await;
        for peer in peers.iter_mut() {
            peer.stop();
        }
        tracing::info!(peers = peers.len(), "pm: all peers stopped");
    }

    pub async fn send(&self, hash: &str, parcel: Parcel) -> Result<(), PeerError> {
        self.send_outbound(hash, parcel, None).await
    }

    /// Queue a parcel whose permit is released once it has been written.
    pub async fn send_with_done(
        &self,
        hash: &str,
        parcel: Parcel,
        done: OwnedSemaphorePermit,
    ) -> Result<(), PeerError> {
        self.send_outbound(hash, parcel, Some(done)).await
    }

    async fn send_outbound(
        &self,
        hash: &str,
        mut parcel: Parcel,
        done: Option<OwnedSemaphorePermit>,
    ) -> Result<(), PeerError> {
        let tx = {
            let peers = self.inner.peers.read().await;
            let peer = peers
                .get(hash)
                .ok_or_else(|| PeerError::UnknownPeer(hash.to_string()))?;
            match peer.sender() {
                Ok(tx) => tx,
                Err(e) => {
                    tracing::debug!(
                        peer = hash,
                        state = peer.record.state().name(),
                        "peer: send rejected, not online"
                    );
                    return Err(e);
                }
            }
        };
        let cfg = &self.inner.config;
        Peer::stamp(&mut parcel, cfg.node_id, &cfg.listen_port);
        tx.send(Outbound { parcel, done })
            .await
            .map_err(|_| PeerError::Disconnected(hash.to_string()))
    }

    pub async fn send_message(&self, hash: &str, msg: &Message) -> anyhow::Result<()> {
        let parcel = self.message_parcel(msg)?;
        self.send(hash, parcel).await?;
        Ok(())
    }

    /// Send to every online peer (`full`) or to a random `fanout` of them.
    /// Returns how many peers the parcel was queued for.
    pub async fn broadcast(&self, parcel: &Parcel, full: bool) -> usize {
        let online = self.online_peers().await;
        let targets = if full {
            online
        } else {
            let mut rng = rand::thread_rng();
            select_random(online, self.inner.config.fanout, &mut rng)
        };
        let mut sent = 0;
        for hash in targets {
            match self.send(&hash, parcel.clone()).await {
                Ok(()) => sent += 1,
                Err(e) => tracing::debug!(peer = %hash, error = %e, "pm: broadcast send failed"),
            }
        }
        sent
    }

    /// Send to the given peer, or to one random online peer when `hash` is
    /// empty. Returns the peer used.
    pub async fn to_peer(&self, hash: &str, parcel: Parcel) -> Result<String, PeerError> {
        let target = if hash.is_empty() {
            let online = self.online_peers().await;
            let mut rng = rand::thread_rng();
            pick_one(online, &mut rng).ok_or(PeerError::NoOnlinePeers)?
        } else {
            hash.to_string()
        };
        self.send(&target, parcel).await?;
        Ok(target)
    }

    pub async fn online_peers(&self) -> Vec<String> {
        self.inner
            .peers
            .read()
            .await
            .iter()
            .filter(|p| p.record.is_online())
            .map(|p| p.record.hash.clone())
            .collect()
    }

    pub async fn is_online(&self, hash: &str) -> bool {
        self.inner
            .peers
            .read()
            .await
            .get(hash)
            .is_some_and(|p| p.record.is_online())
    }

    pub async fn online_count(&self) -> usize {
        self.inner
            .peers
            .read()
            .await
            .iter()
            .filter(|p| p.record.is_online())
            .count()
    }

    pub async fn snapshot(&self) -> Vec<PeerRecord> {
        self.inner
            .peers
            .read()
            .await
            .iter()
            .map(|p| p.record.clone())
            .collect()
    }

    pub async fn mark_known(&self, hash: &str, iv: InvVect) {
        if let Some(peer) = self.inner.peers.write().await.get_mut(hash) {
            peer.mark_known(iv);
        }
    }

    pub async fn knows(&self, hash: &str, iv: &InvVect) -> bool {
        self.inner
            .peers
            .read()
            .await
            .get(hash)
            .is_some_and(|p| p.knows(iv))
    }

    /// Duplicate filter for outgoing getdirblocks.
    pub async fn record_get_dir_blocks(&self, hash: &str, begin: Hash, stop: Hash) -> bool {
        self.inner
            .peers
            .write()
            .await
            .get_mut(hash)
            .is_some_and(|p| p.record_get_dir_blocks(begin, stop))
    }

    pub async fn set_continue_hash(&self, hash: &str, marker: Option<Hash>) {
        if let Some(peer) = self.inner.peers.write().await.get_mut(hash) {
            peer.set_continue_hash(marker);
        }
    }

    pub async fn take_continue_hash(&self, hash: &str, block: &Hash) -> bool {
        self.inner
            .peers
            .write()
            .await
            .get_mut(hash)
            .is_some_and(|p| p.take_continue_hash(block))
    }

    pub async fn adjust_quality(&self, hash: &str, delta: i32) {
        if let Some(peer) = self.inner.peers.write().await.get_mut(hash) {
            peer.record.adjust_quality(delta);
        }
    }

    pub async fn merit(&self, hash: &str) {
        if let Some(peer) = self.inner.peers.write().await.get_mut(hash) {
            peer.record.merit();
        }
    }

    /// Dispatch parcels from all peers until shutdown. Application messages
    /// go to `app_tx`.
    pub async fn run_data_loop(
        self,
        mut data_rx: mpsc::Receiver<DataItem>,
        app_tx: mpsc::Sender<MessageItem>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                item = data_rx.recv() => match item {
                    Some((hash, parcel)) => self.handle_parcel(&hash, parcel, &app_tx).await,
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("pm: data loop stopped");
    }

    async fn handle_parcel(&self, hash: &str, parcel: Parcel, app_tx: &mpsc::Sender<MessageItem>) {
        if let Err(e) = parcel.check_network(self.network()) {
            tracing::warn!(peer = hash, error = %e, "pm: dropping parcel");
            return;
        }
        match parcel.header.parcel_type {
            ParcelType::Ping => {
                let pong = Parcel::new(self.network(), ParcelType::Pong, Vec::new());
                if let Err(e) = self.send(hash, pong).await {
                    tracing::debug!(peer = hash, error = %e, "pm: pong failed");
                }
            }
            ParcelType::Pong | ParcelType::Heartbeat => {}
            ParcelType::PeerRequest => self.handle_peer_request(hash).await,
            ParcelType::PeerResponse => self.handle_peer_response(hash, &parcel).await,
            ParcelType::Message => match parcel.decode_message() {
                Ok(msg) => {
                    if app_tx.send((hash.to_string(), msg)).await.is_err() {
                        tracing::debug!("pm: application queue closed");
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = hash, error = %e, "pm: undecodable message");
                    self.adjust_quality(hash, -1).await;
                }
            },
            ParcelType::Alert | ParcelType::MessagePart => {
                tracing::debug!(
                    peer = hash,
                    parcel_type = ?parcel.header.parcel_type,
                    "pm: ignoring unsupported parcel"
                );
            }
        }
    }

    async fn handle_peer_request(&self, hash: &str) {
        let interval = self.inner.config.peer_request_interval;
        let share = {
            let mut peers = self.inner.peers.write().await;
            let Some(peer) = peers.get_mut(hash) else {
                return;
            };
            if !peer.record.accept_peer_request(Instant::now(), interval) {
                tracing::warn!(peer = hash, "pm: peer requested peer share sooner than expected");
                return;
            }
            let mut candidates: Vec<&PeerRecord> = peers
                .iter()
                .map(|p| &p.record)
                .filter(|r| r.hash != hash && r.can_dial())
                .collect();
            sort_by_quality(&mut candidates);
            let mut out: Vec<PeerAddress> = Vec::new();
            for r in candidates {
                if out.len() >= CURRENT_PARAMS.peer_share_max {
                    break;
                }
                if out
                    .iter()
                    .any(|a| a.address == r.address && a.port == r.listen_port)
                {
                    continue;
                }
                out.push(PeerAddress {
                    address: r.address.clone(),
                    port: r.listen_port.clone(),
                });
            }
            PeerShare { peers: out }
        };

        let count = share.peers.len();
        match Parcel::peer_response(self.network(), &share) {
            Ok(parcel) => {
                if let Err(e) = self.send(hash, parcel).await {
                    tracing::debug!(peer = hash, error = %e, "pm: peer share send failed");
                } else {
                    tracing::debug!(peer = hash, count, "pm: shared peers");
                }
            }
            Err(e) => tracing::warn!(error = %e, "pm: failed to encode peer share"),
        }
    }

    async fn handle_peer_response(&self, hash: &str, parcel: &Parcel) {
        {
            let mut peers = self.inner.peers.write().await;
            let Some(peer) = peers.get_mut(hash) else {
                return;
            };
            if !peer.record.accept_peer_response() {
                tracing::warn!(peer = hash, "pm: ignoring unsolicited peer response");
                return;
            }
        }
        let share = match parcel.decode_peer_share() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(peer = hash, error = %e, "pm: bad peer response");
                return;
            }
        };
        let mut added = 0;
        for addr in share.peers.iter().take(CURRENT_PARAMS.peer_share_max) {
            if addr.port.is_empty() || addr.port == UNDIALABLE_PORT {
                continue;
            }
            if self
                .add_peer(&addr.address, &addr.port, PeerType::Regular)
                .await
                .1
            {
                added += 1;
            }
        }
        tracing::debug!(peer = hash, received = share.peers.len(), added, "pm: peer response");
    }

    /// One maintenance pass: dial toward the outgoing target, ask online
    /// peers for addresses, drop offline peers nobody can dial.
    pub async fn maintain(&self) {
        let cfg = &self.inner.config;
        let now = Instant::now();
        let (to_dial, to_ask) = {
            let admission = self.inner.admission.read().await;
            let peers = self.inner.peers.read().await;
            let active_outgoing = peers
                .iter()
                .filter(|p| p.record.outgoing && !p.record.is_offline())
                .count();
            let want = admission.max_outgoing.saturating_sub(active_outgoing);
            let dial: Vec<String> =
                dial_candidates(peers.iter().map(|p| &p.record), &admission, now)
                    .into_iter()
                    .take(want)
                    .map(|r| r.hash.clone())
                    .collect();
            let ask: Vec<String> = peers
                .iter()
                .filter(|p| {
                    p.record.is_online()
                        && p.record.peer_request_due(now, cfg.peer_request_interval)
                })
                .map(|p| p.record.hash.clone())
                .collect();
            (dial, ask)
        };

        for hash in to_dial {
            let manager = self.clone();
            tokio::spawn(async move { manager.start_to_dial(&hash).await });
        }

        for hash in to_ask {
            if let Some(peer) = self.inner.peers.write().await.get_mut(&hash) {
                peer.record.mark_peer_request_sent(now);
            }
            if let Err(e) = self.send(&hash, Parcel::peer_request(self.network())).await {
                tracing::debug!(peer = %hash, error = %e, "pm: peer request failed");
            }
        }

        let mut peers = self.inner.peers.write().await;
        let dead: Vec<String> = peers
            .iter()
            .filter(|p| p.record.is_offline() && !p.record.can_dial() && !p.record.is_special())
            .map(|p| p.record.hash.clone())
            .collect();
        for hash in &dead {
            peers.remove(hash);
        }
        if !dead.is_empty() {
            tracing::debug!(removed = dead.len(), known = peers.len(), "pm: reaped offline peers");
        }
    }

    pub async fn run_maintenance_loop(self, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(self.inner.config.maintenance_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => self.maintain().await,
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("pm: maintenance loop stopped");
    }

    /// Accept inbound connections, at most one per source address per limit
    /// interval.
    pub async fn run_accept_loop(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        let mut limiter = SourceLimiter::new(self.inner.config.source_limit);
        loop {
            tokio::select! {
                accept = listener.accept() => match accept {
                    Ok((stream, remote)) => {
                        let now = Instant::now();
                        limiter.prune(now);
                        if let Err(e) = limiter.check(&remote.ip().to_string(), now) {
                            tracing::debug!(%remote, error = %e, "pm: inbound rate limited");
                            continue;
                        }
                        if let Err(e) = self.handle_incoming(stream, remote).await {
                            tracing::info!(%remote, error = %e, "pm: inbound rejected");
                        }
                    }
                    Err(e) => tracing::warn!("pm: accept error: {e}"),
                },
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("pm: accept loop stopped");
    }
}

/// Online (outgoing, incoming) connection counts.
fn online_counts(peers: &PeerBook<Peer>) -> (usize, usize) {
    peers
        .iter()
        .filter(|p| p.record.is_online())
        .fold((0, 0), |(o, i), p| {
            if p.record.outgoing {
                (o + 1, i)
            } else {
                (o, i + 1)
            }
        })
}
