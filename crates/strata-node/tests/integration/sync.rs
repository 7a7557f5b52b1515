//! Chain sync between running nodes.

use std::time::Duration;

use strata_storage::BlockStore;

use crate::harness::TestNodeBuilder;

/// A fresh node pointed at a seeded one catches up to its tip, dependents
/// included.
#[tokio::test]
async fn test_fresh_node_catches_up() {
    let node_a = TestNodeBuilder::new("node-a").seed(30).build().await.unwrap();
    let node_b = TestNodeBuilder::new("node-b")
        .peer(&node_a.addr())
        .build()
        .await
        .unwrap();

    node_b.wait_online_peers(1, Duration::from_secs(10)).await.unwrap();
    node_b.wait_height(29, Duration::from_secs(60)).await.unwrap();

    let fx = node_a.fixture.as_ref().unwrap();
    let store = node_b.node.store();
    for (height, dir) in fx.directory.iter().enumerate() {
        let stored = store
            .fetch_directory_block_by_height(height as u32)
            .unwrap()
            .unwrap();
        assert_eq!(stored.key_mr().unwrap(), dir.key_mr().unwrap());
    }

    // Dependents trail their directory blocks.
    let last = fx.entry_blocks.last().unwrap().key_mr();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while store.fetch_entry_block_by_key_mr(&last).unwrap().is_none() {
        assert!(tokio::time::Instant::now() < deadline, "entry block never arrived");
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    let admin = fx.admin.last().unwrap().hash();
    assert!(store.fetch_admin_block_by_hash(&admin).unwrap().is_some());

    node_b.shutdown().await;
    node_a.shutdown().await;
}

/// Two seeded nodes on the same chain stay put.
#[tokio::test]
async fn test_equal_nodes_exchange_nothing_new() {
    let node_a = TestNodeBuilder::new("node-a").seed(5).build().await.unwrap();
    let node_b = TestNodeBuilder::new("node-b")
        .seed(5)
        .peer(&node_a.addr())
        .build()
        .await
        .unwrap();

    node_b.wait_online_peers(1, Duration::from_secs(10)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(node_a.height(), Some(4));
    assert_eq!(node_b.height(), Some(4));
    assert_eq!(node_b.node.chain().tip(), Some(4));

    node_b.shutdown().await;
    node_a.shutdown().await;
}

/// A node that joins later still reaches the tip through a relay.
#[tokio::test]
async fn test_chain_relays_through_middle_node() {
    let node_a = TestNodeBuilder::new("node-a").seed(12).build().await.unwrap();
    let node_b = TestNodeBuilder::new("node-b")
        .peer(&node_a.addr())
        .build()
        .await
        .unwrap();
    node_b.wait_height(11, Duration::from_secs(60)).await.unwrap();

    let node_c = TestNodeBuilder::new("node-c")
        .peer(&node_b.addr())
        .build()
        .await
        .unwrap();
    node_c.wait_height(11, Duration::from_secs(60)).await.unwrap();

    node_c.shutdown().await;
    node_b.shutdown().await;
    node_a.shutdown().await;
}
