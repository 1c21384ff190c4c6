//! HTTP JSON-RPC transport.
//!
//! This module provides the [`RpcTransport`] trait, the seam between the
//! higher layers (retry engine, batch middleware, client) and the wire, plus
//! [`HttpTransport`], its production implementation over `reqwest`.
//!
//! The transport is deliberately dumb: it envelopes calls, ships them, and
//! validates the JSON-RPC 2.0 envelope of what comes back. Retrying,
//! splitting and capability policy all live above it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::TransportConfig;
use crate::error::{Result, RpcError};
use crate::types::{JsonRpcRequest, JsonRpcResponse, RpcCall};

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Low-level JSON-RPC transport.
///
/// Implementations handle a single endpoint. The trait exposes exactly two
/// operations: a single request and a raw (unsplit) batch. Both validate the
/// JSON-RPC envelope; neither retries.
///
/// # Batch semantics
///
/// [`send_batch`](Self::send_batch) returns an outer error when the batch as
/// a whole failed (network error, non-array reply, length mismatch) and
/// per-entry results otherwise. Entries are returned in request order,
/// re-matched by response id, since servers are not trusted to preserve order.
#[async_trait]
pub trait RpcTransport: fmt::Debug + Send + Sync {
    /// Send a single request and return its raw `result` value.
    async fn send(&self, call: &RpcCall) -> Result<Value>;

    /// Send a raw batch and return per-entry results in request order.
    async fn send_batch(&self, calls: &[RpcCall]) -> Result<Vec<Result<Value>>>;

    /// The endpoint this transport talks to, for logging and cache keying.
    fn url(&self) -> &str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════════

/// JSON-RPC transport over HTTP(S).
///
/// # Thread Safety
///
/// `HttpTransport` is `Send + Sync` and designed to be shared behind an
/// `Arc`. The internal `reqwest::Client` pools connections.
///
/// # Example
///
/// ```ignore
/// use evm_rpc::{HttpTransport, RpcCall, RpcTransport, TransportConfig};
///
/// let transport = HttpTransport::new("https://rpc.example.com", TransportConfig::default())?;
/// let head = transport.send(&RpcCall::new("eth_blockNumber", serde_json::json!([]))).await?;
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    /// HTTP client for JSON-RPC requests.
    client: reqwest::Client,

    /// RPC endpoint URL.
    url: String,

    /// Request ID counter for JSON-RPC correlation.
    request_id: AtomicU64,
}

impl HttpTransport {
    /// Create a new transport for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] for non-HTTP(S) URLs or invalid
    /// configuration, and [`RpcError::Connection`] when the HTTP client
    /// cannot be built.
    pub fn new(url: impl Into<String>, config: TransportConfig) -> Result<Self> {
        config.validate()?;

        let url = url.into();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(RpcError::InvalidConfig(format!(
                "unknown protocol for RPC URL {url}"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RpcError::Connection(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            request_id: AtomicU64::new(1),
        })
    }

    /// Get the next request ID for JSON-RPC correlation.
    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// POST a JSON body and parse the reply as JSON.
    async fn post_json<B: serde::Serialize + Sync>(&self, body: &B) -> Result<Value> {
        let response = self.client.post(&self.url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Http(format!("HTTP status {status}")));
        }

        Ok(response.json().await?)
    }

    /// Validate one response envelope and extract its result.
    fn unwrap_response(method: &str, response: JsonRpcResponse) -> Result<Value> {
        if !response.is_well_formed() {
            return Err(RpcError::InvalidResponse(
                "response is not a JSON-RPC 2.0 envelope".into(),
            ));
        }
        if let Some(error) = response.error {
            return Err(error.into_error(method));
        }
        response
            .result
            .ok_or_else(|| RpcError::InvalidResponse("missing result in RPC response".into()))
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    #[instrument(skip(self, call), fields(method = call.method))]
    async fn send(&self, call: &RpcCall) -> Result<Value> {
        let request = JsonRpcRequest::new(call, self.next_request_id());
        let raw = self.post_json(&request).await?;
        let response: JsonRpcResponse = serde_json::from_value(raw)?;
        Self::unwrap_response(call.method, response)
    }

    #[instrument(skip(self, calls), fields(batch_size = calls.len()))]
    async fn send_batch(&self, calls: &[RpcCall]) -> Result<Vec<Result<Value>>> {
        let first_id = self.request_id.fetch_add(calls.len() as u64, Ordering::Relaxed);
        let requests: Vec<JsonRpcRequest<'_>> = calls
            .iter()
            .enumerate()
            .map(|(i, call)| JsonRpcRequest::new(call, first_id + i as u64))
            .collect();

        let raw = self.post_json(&requests).await?;

        let Value::Array(entries) = raw else {
            return Err(RpcError::InvalidResponse(
                "batch reply is not a JSON array".into(),
            ));
        };
        if entries.len() != calls.len() {
            return Err(RpcError::InvalidResponse(format!(
                "batch reply has {} entries, expected {}",
                entries.len(),
                calls.len()
            )));
        }

        debug!(entries = entries.len(), "batch reply received");

        // Re-match responses by id; servers may reorder batch entries.
        let mut by_id: Vec<(Option<u64>, JsonRpcResponse)> = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<JsonRpcResponse>(entry) {
                Ok(response) => by_id.push((response.id, response)),
                Err(e) => by_id.push((None, malformed_entry(&e))),
            }
        }

        let results = calls
            .iter()
            .enumerate()
            .map(|(i, call)| {
                let wanted = first_id + i as u64;
                let position = by_id.iter().position(|(id, _)| *id == Some(wanted));
                position.map_or_else(
                    || {
                        Err(RpcError::InvalidResponse(format!(
                            "batch reply is missing id {wanted}"
                        )))
                    },
                    |at| Self::unwrap_response(call.method, by_id[at].1.clone()),
                )
            })
            .collect();

        Ok(results)
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Placeholder envelope for batch entries that failed to parse.
fn malformed_entry(error: &serde_json::Error) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: None,
        id: None,
        result: None,
        error: Some(crate::error::RpcErrorDetail {
            code: -32700,
            message: format!("unparseable batch entry: {error}"),
            data: None,
        }),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    use super::*;

    #[test]
    fn rejects_unknown_protocol() {
        let result = HttpTransport::new("ws://example.com", TransportConfig::default());
        assert!(matches!(result, Err(RpcError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn single_request_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(json!({"method": "eth_blockNumber"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": "0x10"
            })))
            .mount(&mock_server)
            .await;

        let transport =
            HttpTransport::new(mock_server.uri(), TransportConfig::default()).expect("transport");
        let result = transport
            .send(&RpcCall::new("eth_blockNumber", json!([])))
            .await
            .expect("request failed");

        assert_eq!(result, json!("0x10"));
    }

    #[tokio::test]
    async fn single_request_rpc_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32005, "message": "query returned more than 10000 results"}
            })))
            .mount(&mock_server)
            .await;

        let transport =
            HttpTransport::new(mock_server.uri(), TransportConfig::default()).expect("transport");
        let result = transport.send(&RpcCall::new("eth_getLogs", json!([{}]))).await;

        assert!(matches!(result, Err(RpcError::Rpc { code: -32005, .. })));
    }

    #[tokio::test]
    async fn single_request_http_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let transport =
            HttpTransport::new(mock_server.uri(), TransportConfig::default()).expect("transport");
        let result = transport.send(&RpcCall::new("eth_blockNumber", json!([]))).await;

        assert!(matches!(result, Err(RpcError::Http(_))));
    }

    #[tokio::test]
    async fn malformed_envelope_is_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 1, "result": "0x10"})),
            )
            .mount(&mock_server)
            .await;

        let transport =
            HttpTransport::new(mock_server.uri(), TransportConfig::default()).expect("transport");
        let result = transport.send(&RpcCall::new("eth_blockNumber", json!([]))).await;

        assert!(matches!(result, Err(RpcError::InvalidResponse(_))));
    }

    /// Replies to a 2-entry batch with the entries swapped.
    struct ReorderingResponder;

    impl Respond for ReorderingResponder {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: Vec<Value> =
                serde_json::from_slice(&request.body).expect("batch body should parse");
            let first = body[0]["id"].clone();
            let second = body[1]["id"].clone();
            ResponseTemplate::new(200).set_body_json(json!([
                {"jsonrpc": "2.0", "id": second, "result": "0x2"},
                {"jsonrpc": "2.0", "id": first, "result": "0x1"},
            ]))
        }
    }

    #[tokio::test]
    async fn batch_responses_rematched_by_id() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ReorderingResponder)
            .mount(&mock_server)
            .await;

        let transport =
            HttpTransport::new(mock_server.uri(), TransportConfig::default()).expect("transport");
        let calls = vec![
            RpcCall::new("eth_gasPrice", json!([])),
            RpcCall::new("eth_gasPrice", json!([])),
        ];
        let results = transport.send_batch(&calls).await.expect("batch failed");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().expect("first entry"), &json!("0x1"));
        assert_eq!(results[1].as_ref().expect("second entry"), &json!("0x2"));
    }

    #[tokio::test]
    async fn batch_non_array_reply_is_outer_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32600, "message": "batch not supported"}
            })))
            .mount(&mock_server)
            .await;

        let transport =
            HttpTransport::new(mock_server.uri(), TransportConfig::default()).expect("transport");
        let calls = vec![
            RpcCall::new("eth_gasPrice", json!([])),
            RpcCall::new("eth_gasPrice", json!([])),
        ];
        let result = transport.send_batch(&calls).await;

        assert!(matches!(result, Err(RpcError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn batch_wrong_length_is_outer_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"jsonrpc": "2.0", "id": 1, "result": "0x1"}
            ])))
            .mount(&mock_server)
            .await;

        let transport =
            HttpTransport::new(mock_server.uri(), TransportConfig::default()).expect("transport");
        let calls = vec![
            RpcCall::new("eth_gasPrice", json!([])),
            RpcCall::new("eth_gasPrice", json!([])),
        ];
        let result = transport.send_batch(&calls).await;

        assert!(matches!(result, Err(RpcError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn batch_partial_error_is_per_entry() {
        struct PartialErrorResponder;

        impl Respond for PartialErrorResponder {
            fn respond(&self, request: &Request) -> ResponseTemplate {
                let body: Vec<Value> =
                    serde_json::from_slice(&request.body).expect("batch body should parse");
                let first = body[0]["id"].clone();
                let second = body[1]["id"].clone();
                ResponseTemplate::new(200).set_body_json(json!([
                    {"jsonrpc": "2.0", "id": first, "result": "0x1"},
                    {"jsonrpc": "2.0", "id": second, "error": {"code": -32000, "message": "oops"}},
                ]))
            }
        }

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(PartialErrorResponder)
            .mount(&mock_server)
            .await;

        let transport =
            HttpTransport::new(mock_server.uri(), TransportConfig::default()).expect("transport");
        let calls = vec![
            RpcCall::new("eth_gasPrice", json!([])),
            RpcCall::new("eth_gasPrice", json!([])),
        ];
        let results = transport.send_batch(&calls).await.expect("batch failed");

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(RpcError::Rpc { code: -32000, .. })));
    }
}
