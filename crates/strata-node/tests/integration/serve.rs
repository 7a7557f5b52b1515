//! Request serving over a raw protocol connection.

use std::time::Duration;

use strata_blocks::Hash;
use strata_protocol::{InvType, InvVect, Message};

use crate::harness::{RawClient, TestNodeBuilder};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_get_data_returns_block_then_not_found() {
    let node = TestNodeBuilder::new("server").seed(10).build().await.unwrap();
    let fx = node.fixture.clone().unwrap();
    let mut client = RawClient::connect(&node.addr()).await.unwrap();

    let held = InvVect::new(InvType::DirBlock, fx.directory[3].key_mr().unwrap());
    let absent = InvVect::new(InvType::DirBlock, Hash::from_low_byte(0xee));
    client
        .send(&Message::GetData {
            inventory: vec![held, absent],
        })
        .await
        .unwrap();

    let block = match client.next_message(WAIT).await.unwrap() {
        msg @ Message::DirBlock { .. } => msg.to_block().unwrap().unwrap(),
        other => panic!("expected a directory block, got {}", other.command()),
    };
    assert_eq!(block.height(), Some(3));
    assert_eq!(
        client.next_message(WAIT).await.unwrap(),
        Message::NotFound {
            inventory: vec![absent]
        }
    );

    node.shutdown().await;
}

#[tokio::test]
async fn test_get_dir_blocks_lists_following_heights() {
    let node = TestNodeBuilder::new("server").seed(10).build().await.unwrap();
    let fx = node.fixture.clone().unwrap();
    let mut client = RawClient::connect(&node.addr()).await.unwrap();

    client
        .send(&Message::GetDirBlocks {
            locator: vec![Hash::from_low_byte(0x77), fx.directory[2].key_mr().unwrap()],
            stop_hash: fx.directory[6].key_mr().unwrap(),
        })
        .await
        .unwrap();

    let expected: Vec<InvVect> = fx.directory[3..=6]
        .iter()
        .map(|d| InvVect::new(InvType::DirBlock, d.key_mr().unwrap()))
        .collect();
    assert_eq!(
        client.next_message(WAIT).await.unwrap(),
        Message::DirInv {
            inventory: expected
        }
    );

    node.shutdown().await;
}

#[tokio::test]
async fn test_range_request_pushes_directory_blocks() {
    let node = TestNodeBuilder::new("server").seed(10).build().await.unwrap();
    let mut client = RawClient::connect(&node.addr()).await.unwrap();

    client
        .send(&Message::DbStateMissing { start: 7, end: 20 })
        .await
        .unwrap();

    let mut heights = Vec::new();
    for _ in 7..=9 {
        let block = client.next_message(WAIT).await.unwrap().to_block().unwrap().unwrap();
        heights.push(block.height().unwrap());
    }
    assert_eq!(heights, vec![7, 8, 9]);

    node.shutdown().await;
}
