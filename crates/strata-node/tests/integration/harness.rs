//! Test harness for in-process strata-node integration tests.
//!
//! Provides TestNode (one running node on a tempdir database), TestNodeBuilder
//! (config) and a raw parcel client for speaking the wire protocol directly.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use strata_blocks::fixtures::{build_chain, ChainFixture};
use strata_node::catchup_task::CatchupTimers;
use strata_node::config::{NodeConfig, PeerEntry};
use strata_node::Node;
use strata_protocol::{Message, Parcel, ParcelCodec, ParcelType, LOCAL_NET};
use strata_storage::{BlockStore, SqliteStore};

/// Builder for configuring and spawning a TestNode.
pub struct TestNodeBuilder {
    name: String,
    seed: u32,
    peers: Vec<String>,
}

impl TestNodeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            seed: 0,
            peers: Vec::new(),
        }
    }

    /// Pre-populate the database with a generated chain of `count` heights.
    pub fn seed(mut self, count: u32) -> Self {
        self.seed = count;
        self
    }

    /// Add a special peer, `host:port`.
    pub fn peer(mut self, addr: &str) -> Self {
        self.peers.push(addr.into());
        self
    }

    pub async fn build(self) -> anyhow::Result<TestNode> {
        let tempdir = tempfile::tempdir()?;
        let db_path = tempdir.path().join("strata.db");
        let store = SqliteStore::open(&db_path)?;

        let fixture = if self.seed > 0 {
            let fx = build_chain(LOCAL_NET, self.seed)?;
            for block in fx.all_blocks() {
                store.store_block(&block)?;
            }
            Some(fx)
        } else {
            None
        };

        let mut cfg = NodeConfig::default();
        cfg.node.name = self.name.clone();
        cfg.node.database = db_path.display().to_string();
        cfg.node.network = "LOCAL".into();
        cfg.network.listen_addr = "127.0.0.1:0".into();
        cfg.network.peers = self
            .peers
            .iter()
            .map(|addr| PeerEntry { addr: addr.clone() })
            .collect();
        cfg.network.maintenance_interval_secs = 1;
        cfg.network.tip_interval_secs = 1;
        cfg.network.peer_request_interval_secs = 1;
        cfg.network.dial_timeout_secs = 2;
        // Every test node shares 127.0.0.1.
        cfg.network.source_limit_secs = 0;

        let timers = CatchupTimers {
            raise: Duration::from_millis(100),
            send: Duration::from_millis(200),
            dump: Duration::from_secs(60),
        };
        let store: Arc<dyn BlockStore> = Arc::new(store);
        let node = Node::start_with_timers(&cfg, store, timers).await?;

        Ok(TestNode {
            name: self.name,
            node,
            fixture,
            _tempdir: tempdir,
        })
    }
}

/// A running in-process node with all its tasks.
pub struct TestNode {
    pub name: String,
    pub node: Node,
    pub fixture: Option<ChainFixture>,
    _tempdir: tempfile::TempDir,
}

#[allow(dead_code)]
impl TestNode {
    pub fn addr(&self) -> String {
        self.node.listen_addr().to_string()
    }

    pub fn height(&self) -> Option<u32> {
        self.node.store().fetch_database_height().ok().flatten()
    }

    pub async fn online_peers(&self) -> usize {
        self.node.manager().online_count().await
    }

    pub async fn shutdown(self) {
        self.node.shutdown().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    /// Poll the store until it holds `height`, or timeout.
    pub async fn wait_height(&self, height: u32, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.height().is_some_and(|h| h >= height) {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!(
                    "{}: timeout waiting for height {} (have {:?})",
                    self.name,
                    height,
                    self.height()
                );
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Poll the peer book until at least `n` peers are online, or timeout.
    pub async fn wait_online_peers(&self, n: usize, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let online = self.online_peers().await;
            if online >= n {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!(
                    "{}: timeout waiting for {} online peers (have {})",
                    self.name,
                    n,
                    online
                );
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

/// A bare protocol client: no peer manager, just parcels on a socket.
pub struct RawClient {
    framed: Framed<TcpStream, ParcelCodec>,
}

#[allow(dead_code)]
impl RawClient {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, ParcelCodec::new()),
        })
    }

    pub async fn send(&mut self, msg: &Message) -> anyhow::Result<()> {
        self.framed.send(Parcel::message(LOCAL_NET, msg)?).await?;
        Ok(())
    }

    /// Next application message other than a tip advertisement. Peer
    /// requests and pings from the node are skipped.
    pub async fn next_message(&mut self, timeout: Duration) -> anyhow::Result<Message> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let parcel = match tokio::time::timeout_at(deadline, self.framed.next()).await {
                Ok(Some(parcel)) => parcel?,
                Ok(None) => anyhow::bail!("connection closed"),
                Err(_) => anyhow::bail!("timeout waiting for a message"),
            };
            if parcel.header.parcel_type != ParcelType::Message {
                continue;
            }
            match parcel.decode_message()? {
                Message::ChainTip { .. } => continue,
                msg => return Ok(msg),
            }
        }
    }
}
