//! Enumerates the (token × route × fee tier) probes for a batch and splits them
//! into bounded chunks.

use crate::config::NetworkConfig;
use crate::types::{PricingError, QuoteRequest, RouteCandidate, RouteRole, TokenDescriptor};
use itertools::iproduct;
use std::collections::HashSet;
use tracing::warn;

/// Canonical pool fee tiers, in hundredths of a bip: 0.05%, 0.3%, 1%.
pub const FEE_TIERS: [u32; 3] = [500, 3_000, 10_000];

const ROLES: [RouteRole; 2] = [RouteRole::DirectToStable, RouteRole::ViaBaseAsset];

/// A probe together with the index of the token it prices in [`BatchPlan::tokens`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCall {
    pub token: usize,
    pub candidate: RouteCandidate,
}

#[derive(Debug, Clone)]
pub struct BatchPlan {
    /// Tokens that need network calls, deduplicated by address, stable asset excluded.
    pub tokens: Vec<TokenDescriptor>,
    pub calls: Vec<PlannedCall>,
    /// Index of the base asset in `tokens`, if it is being priced.
    pub base_index: Option<usize>,
    chunk_size: usize,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn chunks(&self) -> std::slice::Chunks<'_, PlannedCall> {
        self.calls.chunks(self.chunk_size)
    }

    pub fn chunk_count(&self) -> usize {
        self.calls.len().div_ceil(self.chunk_size)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

/// Builds the probe list for `tokens`.
///
/// With `include_base_asset` the base asset's own direct-to-stable probes are
/// planned even if it was not requested, so its live price can be fed forward
/// to via-base candidates.
pub fn plan_batch(
    tokens: &[TokenDescriptor],
    network: &NetworkConfig,
    max_calls_per_batch: usize,
    include_base_asset: bool,
) -> BatchPlan {
    let stable = &network.stable;
    let base = &network.base;

    let mut seen = HashSet::new();
    let mut planned_tokens: Vec<TokenDescriptor> = tokens
        .iter()
        .filter(|t| t.address != stable.address)
        .filter(|t| seen.insert(t.address))
        .cloned()
        .collect();
    if include_base_asset && !planned_tokens.is_empty() && seen.insert(base.address) {
        planned_tokens.push(base.clone());
    }

    let mut calls = Vec::with_capacity(planned_tokens.len() * FEE_TIERS.len() * ROLES.len());
    let mut priced = Vec::with_capacity(planned_tokens.len());
    for token in planned_tokens {
        let amount_in = match token.unit_amount() {
            Ok(amount) => amount,
            Err(e) => {
                warn!(symbol = %token.symbol, error = %PricingError::from(e), "skipping token");
                continue;
            }
        };
        let index = priced.len();
        for (role, fee_tier) in iproduct!(ROLES, FEE_TIERS) {
            let token_out = match role {
                RouteRole::DirectToStable => stable.address,
                RouteRole::ViaBaseAsset if token.address == base.address => continue,
                RouteRole::ViaBaseAsset => base.address,
            };
            match QuoteRequest::new(token.address, token_out, amount_in, fee_tier) {
                Ok(request) => calls.push(PlannedCall {
                    token: index,
                    candidate: RouteCandidate { role, fee_tier, request },
                }),
                Err(e) => warn!(symbol = %token.symbol, error = %e, "dropping probe"),
            }
        }
        priced.push(token);
    }

    let base_index = priced.iter().position(|t| t.address == base.address);
    BatchPlan { tokens: priced, calls, base_index, chunk_size: max_calls_per_batch.max(1) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Network;
    use alloy_primitives::Address;

    fn network() -> NetworkConfig {
        NetworkConfig::defaults(Network::Ethereum)
    }

    fn token(symbol: &str, byte: u8, decimals: u8) -> TokenDescriptor {
        TokenDescriptor::from_parts(symbol, Address::repeat_byte(byte), decimals)
    }

    #[test]
    fn empty_token_list_plans_nothing() {
        let plan = plan_batch(&[], &network(), 50, true);
        assert!(plan.is_empty());
        assert!(plan.tokens.is_empty());
        assert_eq!(plan.chunk_count(), 0);
    }

    #[test]
    fn stable_asset_never_probed() {
        let net = network();
        let plan = plan_batch(&[net.stable.clone(), token("LINK", 0x11, 18)], &net, 50, false);
        assert_eq!(plan.tokens.len(), 1);
        assert_eq!(plan.calls.len(), 6);
        assert!(plan.calls.iter().all(|c| c.candidate.request.token_in != net.stable.address));
    }

    #[test]
    fn six_probes_per_token_with_unit_amount() {
        let net = network();
        let plan = plan_batch(&[token("WBTC", 0x22, 8)], &net, 50, false);
        assert_eq!(plan.calls.len(), 6);
        let direct: Vec<_> = plan
            .calls
            .iter()
            .filter(|c| c.candidate.role == RouteRole::DirectToStable)
            .map(|c| c.candidate.fee_tier)
            .collect();
        assert_eq!(direct, FEE_TIERS.to_vec());
        for call in &plan.calls {
            assert_eq!(call.candidate.request.amount_in, alloy_primitives::U256::from(100_000_000u64));
            let expected_out = match call.candidate.role {
                RouteRole::DirectToStable => net.stable.address,
                RouteRole::ViaBaseAsset => net.base.address,
            };
            assert_eq!(call.candidate.request.token_out, expected_out);
        }
    }

    #[test]
    fn base_asset_skips_via_base_probes() {
        let net = network();
        let plan = plan_batch(&[net.base.clone()], &net, 50, false);
        assert_eq!(plan.calls.len(), 3);
        assert_eq!(plan.base_index, Some(0));
    }

    #[test]
    fn live_base_price_adds_base_asset_once() {
        let net = network();
        let plan = plan_batch(&[token("UNI", 0x33, 18)], &net, 50, true);
        assert_eq!(plan.tokens.len(), 2);
        assert_eq!(plan.base_index, Some(1));
        assert_eq!(plan.calls.len(), 6 + 3);
    }

    #[test]
    fn duplicates_and_unencodable_tokens_are_dropped() {
        let net = network();
        let plan = plan_batch(
            &[token("A", 0x44, 18), token("A2", 0x44, 18), token("HUGE", 0x55, 99)],
            &net,
            50,
            false,
        );
        assert_eq!(plan.tokens.len(), 1);
        assert_eq!(plan.calls.len(), 6);
    }

    #[test]
    fn chunks_are_bounded() {
        let net = network();
        let tokens: Vec<_> = (1..=20u8).map(|i| token(&format!("T{}", i), i, 18)).collect();
        let plan = plan_batch(&tokens, &net, 50, false);
        assert_eq!(plan.calls.len(), 120);
        let sizes: Vec<_> = plan.chunks().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
        assert_eq!(plan.chunk_count(), 3);
    }
}
