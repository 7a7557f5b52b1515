//! Node assembly -- wires the peer manager, dispatcher, ingest, catch-up and
//! tip tasks around one block store.
//!
//! Everything a node owns hangs off `Node`; several nodes can run in one
//! process, which is how the integration suite drives them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use strata_catchup::Catchup;
use strata_peers::PeerType;
use strata_protocol::CURRENT_PARAMS;
use strata_storage::BlockStore;

use crate::catchup_task::{CatchupTask, CatchupTimers};
use crate::config::{NodeConfig, PeerEntry};
use crate::ingest::{ChainState, Ingest};
use crate::peer_manager::{ManagerConfig, PeerManager};
use crate::serve::Server;
use crate::sync::Dispatcher;
use crate::tip_task;

pub struct Node {
    node_id: u64,
    listen_addr: SocketAddr,
    manager: PeerManager,
    chain: Arc<ChainState>,
    catchup: Arc<Mutex<Catchup>>,
    store: Arc<dyn BlockStore>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Node {
    pub async fn start(cfg: &NodeConfig, store: Arc<dyn BlockStore>) -> anyhow::Result<Self> {
        Self::start_with_timers(cfg, store, CatchupTimers::default()).await
    }

    pub async fn start_with_timers(
        cfg: &NodeConfig,
        store: Arc<dyn BlockStore>,
        timers: CatchupTimers,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&cfg.network.listen_addr).await?;
        let listen_addr = listener.local_addr()?;
        let node_id = loop {
            let id: u64 = rand::random();
            if id != 0 {
                break id;
            }
        };

        let (manager, data_rx) =
            PeerManager::new(ManagerConfig::from_node_config(cfg, node_id, listen_addr.port()));
        for entry in &cfg.network.peers {
            let (host, port) = entry.host_port();
            manager.add_peer(&host, &port, PeerType::SpecialConfig).await;
        }

        let boot = store.fetch_database_height()?;
        let chain = Arc::new(ChainState::new(boot));

        let depth = CURRENT_PARAMS.outbound_queue_depth;
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let (app_tx, app_rx) = mpsc::channel(depth);
        let (ingest_tx, ingest_rx) = mpsc::channel(depth);
        let (notice_tx, notice_rx) = mpsc::channel((cfg.catchup.window as usize).max(depth));
        // The store is opened synchronously, so it is loaded by the time the
        // tasks start.
        let (loaded_tx, loaded_rx) = watch::channel(false);
        loaded_tx.send_replace(true);

        let server = Server::new(manager.clone(), store.clone());
        let dispatcher =
            Dispatcher::new(manager.clone(), server, store.clone(), chain.clone(), ingest_tx);
        let ingest = Ingest::new(
            store.clone(),
            chain.clone(),
            notice_tx,
            cfg.catchup.window as usize,
        );
        let catchup_task = CatchupTask::new(
            Catchup::new(cfg.catchup.to_catchup_config(), 0),
            manager.clone(),
            chain.clone(),
            store.clone(),
        )
        .with_timers(timers);
        let catchup = catchup_task.window();
        let tip_interval = Duration::from_secs(cfg.network.tip_interval_secs.max(1));

        let handles = vec![
            tokio::spawn(
                manager
                    .clone()
                    .run_accept_loop(listener, shutdown_tx.subscribe()),
            ),
            tokio::spawn(
                manager
                    .clone()
                    .run_data_loop(data_rx, app_tx, shutdown_tx.subscribe()),
            ),
            tokio::spawn(manager.clone().run_maintenance_loop(shutdown_tx.subscribe())),
            tokio::spawn(dispatcher.run(app_rx, shutdown_tx.subscribe())),
            tokio::spawn(ingest.run(ingest_rx, shutdown_tx.subscribe())),
            tokio::spawn(catchup_task.run(notice_rx, loaded_rx, shutdown_tx.subscribe())),
            tokio::spawn(tip_task::run_tip_loop(
                manager.clone(),
                store.clone(),
                tip_interval,
                shutdown_tx.subscribe(),
            )),
        ];

        tracing::info!(
            node_id = %format!("{node_id:016x}"),
            listen = %listen_addr,
            network = %cfg.node.network,
            name = %cfg.node.name,
            tip = ?boot,
            special_peers = cfg.network.peers.len(),
            "node: started"
        );

        Ok(Self {
            node_id,
            listen_addr,
            manager,
            chain,
            catchup,
            store,
            shutdown_tx,
            handles,
        })
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn manager(&self) -> &PeerManager {
        &self.manager
    }

    pub fn chain(&self) -> &ChainState {
        &self.chain
    }

    pub fn catchup(&self) -> Arc<Mutex<Catchup>> {
        self.catchup.clone()
    }

    pub fn store(&self) -> Arc<dyn BlockStore> {
        self.store.clone()
    }

    /// Add a `host:port` peer of the given type. Returns its hash.
    pub async fn add_peer(&self, addr: &str, peer_type: PeerType) -> String {
        let (host, port) = PeerEntry { addr: addr.into() }.host_port();
        self.manager.add_peer(&host, &port, peer_type).await.0
    }

    /// Stop every task and tear down all peer links.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        self.manager.stop().await;
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!(node_id = %format!("{:016x}", self.node_id), "node: stopped");
    }
}
