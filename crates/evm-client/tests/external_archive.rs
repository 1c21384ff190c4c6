//! Archive offloading: historic prefix from the archive, young tail via RPC.

mod common;

use common::{CHAIN_ID, ScriptedNode, assert_one_log_per_block, connect, recorded_log_ranges};
use evm_archive::ArchiveConfig;
use evm_client::{ClientConfig, FilterSpec, GetLogsOptions};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Mount an archive gateway for [`CHAIN_ID`] on the mock server itself,
/// indexed up to `height`, serving one log per block.
async fn mount_archive(server: &MockServer, height: u64) {
    Mock::given(method("GET"))
        .and(path("/archives/evm.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({CHAIN_ID.to_string(): server.uri()})),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/height"))
        .respond_with(ResponseTemplate::new(200).set_body_string(height.to_string()))
        .mount(server)
        .await;

    let worker = format!("{}/worker", server.uri());
    Mock::given(method("GET"))
        .and(path("/800/worker"))
        .respond_with(ResponseTemplate::new(200).set_body_string(worker))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/worker"))
        .respond_with(move |request: &Request| {
            let query: serde_json::Value =
                serde_json::from_slice(&request.body).expect("worker query");
            let from = query["fromBlock"].as_u64().expect("fromBlock");
            let to = query["toBlock"].as_u64().expect("toBlock").min(height);
            let blocks: Vec<serde_json::Value> = (from..=to)
                .map(|number| {
                    json!({
                        "header": {
                            "number": number,
                            "hash": format!("0x{:064x}", number + 0xa000_0000u64)
                        },
                        "logs": [{
                            "address": "0x900101d06a7426441ae63e9ab3b9b0f63be145f1",
                            "topics": [],
                            "data": "0x",
                            "transactionHash": format!("0x{number:064x}"),
                            "logIndex": 0,
                            "transactionIndex": 0
                        }]
                    })
                })
                .collect();
            ResponseTemplate::new(200).set_body_json(blocks)
        })
        .mount(server)
        .await;
}

#[tokio::test]
async fn archive_partial_coverage_continues_via_rpc() {
    let server = MockServer::start().await;
    // The archive lags: indexed only up to block 840.
    mount_archive(&server, 840).await;

    // The node knows everything, but should only be asked for the tail.
    let node = ScriptedNode::default().with_one_log_per_block(800, 850);
    let config = ClientConfig {
        archive: ArchiveConfig::default().with_base_url(server.uri()),
        ..ClientConfig::default()
    };
    let (transport, client) = connect(node, config).await;
    assert!(client.capabilities().external_archive_available);
    let after_connect = transport.recorded().len();

    let logs = client
        .get_logs(FilterSpec::range(800, 850), GetLogsOptions::default())
        .await
        .expect("get_logs");

    // One log per block over the whole range, in order: 800..=840 from the
    // archive, 841..=850 from the node.
    assert_one_log_per_block(&logs, 800, 850);
    assert_eq!(recorded_log_ranges(&transport, after_connect), vec![(841, 850)]);
}

#[tokio::test]
async fn archive_can_be_disabled_per_call() {
    let server = MockServer::start().await;
    mount_archive(&server, 840).await;

    let node = ScriptedNode::default().with_one_log_per_block(800, 850);
    let config = ClientConfig {
        archive: ArchiveConfig::default().with_base_url(server.uri()),
        ..ClientConfig::default()
    };
    let (transport, client) = connect(node, config).await;
    let after_connect = transport.recorded().len();

    let logs = client
        .get_logs(
            FilterSpec::range(800, 850),
            GetLogsOptions::default().without_external_archive(),
        )
        .await
        .expect("get_logs");

    assert_one_log_per_block(&logs, 800, 850);
    // Everything came from the node.
    assert_eq!(recorded_log_ranges(&transport, after_connect), vec![(800, 850)]);
}
