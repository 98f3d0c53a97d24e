//! Submits a [`BatchPlan`] chunk by chunk through Multicall3 `aggregate3`.

use super::encoder::{decode_aggregate, encode_aggregate, encode_quote_call};
use super::planner::{BatchPlan, PlannedCall};
use crate::rpc::EthCall;
use crate::types::{BatchCallResult, PricingError, TransportError};
use alloy_primitives::{Address, Bytes};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Positional results for a whole plan, one per planned call.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub results: Vec<BatchCallResult>,
    pub failed_chunks: usize,
    pub total_chunks: usize,
    /// At least one chunk was throttled by the node.
    pub rate_limited: bool,
}

impl ExecutionReport {
    /// Nothing came back at all.
    pub fn all_failed(&self) -> bool {
        self.total_chunks > 0 && self.failed_chunks == self.total_chunks
    }
}

pub struct BatchExecutor {
    transport: Arc<dyn EthCall>,
    multicall: Address,
    quoter: Address,
}

enum ChunkError {
    Transport(TransportError),
    Decode(String),
    Length { expected: usize, got: usize },
}

impl ChunkError {
    fn reason(&self) -> String {
        match self {
            ChunkError::Transport(e) => e.to_string(),
            ChunkError::Decode(e) => format!("undecodable aggregate response: {}", e),
            ChunkError::Length { expected, got } => format!("expected {} results, got {}", expected, got),
        }
    }
}

impl BatchExecutor {
    pub fn new(transport: Arc<dyn EthCall>, multicall: Address, quoter: Address) -> Self {
        Self { transport, multicall, quoter }
    }

    /// Runs every chunk concurrently. A failing chunk turns into failed
    /// results for its own calls only; nothing is retried.
    pub async fn execute(&self, plan: &BatchPlan) -> ExecutionReport {
        let chunks: Vec<&[PlannedCall]> = plan.chunks().collect();
        let total_chunks = chunks.len();
        let outcomes = join_all(chunks.iter().map(|chunk| self.execute_chunk(chunk))).await;

        let mut report = ExecutionReport { total_chunks, ..Default::default() };
        report.results.reserve(plan.calls.len());
        for (index, (chunk, outcome)) in chunks.iter().zip(outcomes).enumerate() {
            match outcome {
                Ok(results) => report.results.extend(results),
                Err(e) => {
                    if let ChunkError::Transport(t) = &e {
                        report.rate_limited |= t.is_rate_limited();
                    }
                    let err = PricingError::ChunkTransportFailure { chunk: index, reason: e.reason() };
                    warn!(calls = chunk.len(), error = %err, "multicall chunk failed");
                    report.failed_chunks += 1;
                    report.results.extend(chunk.iter().map(|_| BatchCallResult::failed()));
                }
            }
        }
        debug!(
            calls = report.results.len(),
            chunks = total_chunks,
            failed = report.failed_chunks,
            "batch executed"
        );
        report
    }

    async fn execute_chunk(&self, chunk: &[PlannedCall]) -> Result<Vec<BatchCallResult>, ChunkError> {
        // Calls that cannot be encoded stay out of the aggregate but keep their slot.
        let encoded: Vec<Option<Bytes>> = chunk
            .iter()
            .map(|call| match encode_quote_call(&call.candidate.request) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(error = %e, "quote call not encodable");
                    None
                }
            })
            .collect();
        let submitted: Vec<(Address, Bytes)> =
            encoded.iter().flatten().map(|data| (self.quoter, data.clone())).collect();
        if submitted.is_empty() {
            return Ok(chunk.iter().map(|_| BatchCallResult::failed()).collect());
        }
        let expected = submitted.len();

        let response = self
            .transport
            .eth_call(self.multicall, encode_aggregate(submitted))
            .await
            .map_err(ChunkError::Transport)?;
        let decoded = decode_aggregate(&response).map_err(|e| ChunkError::Decode(e.to_string()))?;
        if decoded.len() != expected {
            return Err(ChunkError::Length { expected, got: decoded.len() });
        }

        // results only exist for submitted calls, omitted slots consume none
        let mut decoded = decoded.into_iter();
        Ok(encoded
            .iter()
            .map(|slot| match slot {
                Some(_) => decoded
                    .next()
                    .map(|r| BatchCallResult { success: r.success, return_data: r.returnData })
                    .unwrap_or_else(BatchCallResult::failed),
                None => BatchCallResult::failed(),
            })
            .collect())
    }
}
