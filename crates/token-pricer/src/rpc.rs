//! JSON-RPC transport for read-only contract calls.

use crate::types::TransportError;
use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// JSON-RPC error code used by several providers for request throttling.
const RATE_LIMIT_CODE: i64 = -32005;

/// Executes `eth_call` against the latest block.
#[async_trait]
pub trait EthCall: Send + Sync {
    async fn eth_call(&self, to: Address, data: Bytes) -> Result<Bytes, TransportError>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Bytes>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// HTTP JSON-RPC client. Every request is bounded by the client timeout.
pub struct HttpTransport {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into(), next_id: AtomicU64::new(1) })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EthCall for HttpTransport {
    async fn eth_call(&self, to: Address, data: Bytes) -> Result<Bytes, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "method": "eth_call",
            "params": [{ "to": to, "data": data }, "latest"],
            "id": id
        });
        debug!(id, %to, bytes = data.len(), "eth_call");

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited);
        }
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        interpret_response(body)
    }
}

fn interpret_response(body: RpcResponse) -> Result<Bytes, TransportError> {
    if let Some(err) = body.error {
        if is_rate_limit(err.code, &err.message) {
            return Err(TransportError::RateLimited);
        }
        return Err(TransportError::Rpc { code: err.code, message: err.message });
    }
    body.result
        .ok_or_else(|| TransportError::InvalidResponse("missing result".to_string()))
}

fn is_rate_limit(code: i64, message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    code == RATE_LIMIT_CODE
        || code == 429
        || message.contains("rate limit")
        || message.contains("too many requests")
        || message.contains("request limit")
}
