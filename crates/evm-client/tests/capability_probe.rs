//! Connect-time probing against a scripted node.

mod common;

use common::{CHAIN_ID, ScriptedNode, connect, test_config};
use evm_client::{ClientError, FilterSpec, GetLogsOptions};

#[tokio::test(start_paused = true)]
async fn connect_discovers_node_capabilities() {
    let node = ScriptedNode {
        probe_span: 200,
        batch_limit: 50,
        ..ScriptedNode::default()
    };
    let (_transport, client) = connect(node, test_config()).await;

    let capabilities = client.capabilities();
    assert_eq!(capabilities.filter_block_range, 200);
    assert_eq!(capabilities.rpc_batch_max_size, 50);
    assert!(capabilities.revert_reason_available);
    assert!(capabilities.is_archive);
    assert!(capabilities.overwrites_available);
    assert!(!capabilities.external_archive_available);

    assert_eq!(client.chain_id(), CHAIN_ID);
    assert_eq!(client.latest_seen_block(), 2_000);
}

#[tokio::test(start_paused = true)]
async fn degraded_node_probes_to_absent_capabilities() {
    let node = ScriptedNode {
        probe_span: 10,
        batch_limit: 1,
        revert_fidelity: false,
        archive_state: false,
        overrides_support: false,
        ..ScriptedNode::default()
    };
    let (_transport, client) = connect(node, test_config()).await;

    let capabilities = client.capabilities();
    assert_eq!(capabilities.filter_block_range, 10);
    assert_eq!(capabilities.rpc_batch_max_size, 1);
    assert!(!capabilities.revert_reason_available);
    assert!(!capabilities.is_archive);
    assert!(!capabilities.overwrites_available);
}

#[tokio::test(start_paused = true)]
async fn get_logs_without_capability_is_unsupported() {
    let node = ScriptedNode {
        probe_span: 0,
        ..ScriptedNode::default()
    };
    let (_transport, client) = connect(node, test_config()).await;

    assert_eq!(client.capabilities().filter_block_range, 0);

    let result = client
        .get_logs(FilterSpec::range(0, 10), GetLogsOptions::default())
        .await;
    assert!(matches!(result, Err(ClientError::Unsupported(_))));
}

#[tokio::test(start_paused = true)]
async fn latest_seen_block_is_monotonic() {
    let node = ScriptedNode::default();
    let (_transport, client) = connect(node, test_config()).await;

    assert_eq!(client.latest_seen_block(), 2_000);

    // Observing an older block must not move the high-water mark back.
    client.get_block(1_500u64).await.expect("get_block");
    assert_eq!(client.latest_seen_block(), 2_000);

    client.block_number().await.expect("block_number");
    assert_eq!(client.latest_seen_block(), 2_000);
}

#[tokio::test(start_paused = true)]
async fn block_queries_resolve_tags_and_hashes() {
    let node = ScriptedNode::default();
    let (_transport, client) = connect(node, test_config()).await;

    let by_number = client.get_block(1_200u64).await.expect("by number");
    assert_eq!(by_number.number, 1_200);
    assert_eq!(by_number.hash, common::block_hash(1_200));
    assert_eq!(by_number.parent_hash, common::block_hash(1_199));

    let by_hash = client
        .get_block(common::block_hash(1_200))
        .await
        .expect("by hash");
    assert_eq!(by_hash, by_number);

    let latest = client
        .get_block(evm_client::BlockTag::Latest)
        .await
        .expect("latest");
    assert_eq!(latest.number, 2_000);
}
