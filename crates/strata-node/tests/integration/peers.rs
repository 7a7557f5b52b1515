//! Peer discovery and connection bookkeeping.

use std::time::Duration;

use crate::harness::TestNodeBuilder;

/// A node learns a third node's address through peer sharing and dials it.
#[tokio::test]
async fn test_peer_share_connects_third_node() {
    let hub = TestNodeBuilder::new("hub").build().await.unwrap();
    let node_b = TestNodeBuilder::new("node-b")
        .peer(&hub.addr())
        .build()
        .await
        .unwrap();
    let node_c = TestNodeBuilder::new("node-c")
        .peer(&hub.addr())
        .build()
        .await
        .unwrap();

    hub.wait_online_peers(2, Duration::from_secs(10)).await.unwrap();
    node_b.wait_online_peers(2, Duration::from_secs(30)).await.unwrap();
    node_c.wait_online_peers(2, Duration::from_secs(30)).await.unwrap();

    node_c.shutdown().await;
    node_b.shutdown().await;
    hub.shutdown().await;
}

/// A stopped peer is noticed and reported offline.
#[tokio::test]
async fn test_peer_goes_offline_when_remote_stops() {
    let hub = TestNodeBuilder::new("hub").build().await.unwrap();
    let node_b = TestNodeBuilder::new("node-b")
        .peer(&hub.addr())
        .build()
        .await
        .unwrap();
    hub.wait_online_peers(1, Duration::from_secs(10)).await.unwrap();

    node_b.shutdown().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while hub.online_peers().await > 0 {
        assert!(tokio::time::Instant::now() < deadline, "peer still online");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    hub.shutdown().await;
}
