//! Sequential single-token probing for interactive lookups, without multicall.

use super::encoder::{decode_quote_output, encode_quote_call};
use super::planner::FEE_TIERS;
use super::resolver::candidate_price;
use crate::config::NetworkConfig;
use crate::rpc::EthCall;
use crate::types::{PricingError, QuoteRequest, ResolvedPrice, RouteCandidate, RouteRole, TokenDescriptor};
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct FastPathQuoter {
    transport: Arc<dyn EthCall>,
    network: NetworkConfig,
}

impl FastPathQuoter {
    pub fn new(transport: Arc<dyn EthCall>, network: NetworkConfig) -> Self {
        Self { transport, network }
    }

    /// Tries the stable-asset tiers, then the base-asset tiers, and returns
    /// the first nonzero quote. A rate-limit answer ends the probe at once.
    pub async fn probe(&self, token: &TokenDescriptor) -> Result<ResolvedPrice, PricingError> {
        let stable = &self.network.stable;
        let base = &self.network.base;
        if token.address == stable.address {
            return Ok(ResolvedPrice {
                symbol: stable.symbol.clone(),
                address: stable.address,
                price_usd: 1.0,
                decimals: stable.decimals,
                last_updated: Utc::now(),
                route: None,
            });
        }

        let amount_in = token.unit_amount()?;
        let mut routes = vec![(RouteRole::DirectToStable, stable.address)];
        if token.address != base.address {
            routes.push((RouteRole::ViaBaseAsset, base.address));
        }

        for (role, token_out) in routes {
            for fee_tier in FEE_TIERS {
                let request = QuoteRequest::new(token.address, token_out, amount_in, fee_tier)?;
                let data = encode_quote_call(&request)?;
                let output = match self.transport.eth_call(self.network.quoter, data).await {
                    Ok(output) => output,
                    Err(e) if e.is_rate_limited() => return Err(PricingError::RateLimited),
                    Err(e) => {
                        debug!(symbol = %token.symbol, %role, fee_tier, error = %e, "probe failed");
                        continue;
                    }
                };
                let Ok(amount_out) = decode_quote_output(&output) else {
                    continue;
                };
                if let Some(price_usd) = candidate_price(amount_out, role, &self.network, self.network.base_asset_usd) {
                    return Ok(ResolvedPrice {
                        symbol: token.symbol.clone(),
                        address: token.address,
                        price_usd,
                        decimals: token.decimals,
                        last_updated: Utc::now(),
                        route: Some(RouteCandidate { role, fee_tier, request }),
                    });
                }
            }
        }
        Err(PricingError::NoViableRoute { symbol: token.symbol.clone() })
    }
}

/// Collapses bursts of calls: only the most recent call within `window` runs,
/// earlier ones resolve to `None` without doing any work.
pub struct Debouncer {
    window: Duration,
    generation: AtomicU64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, generation: AtomicU64::new(0) }
    }

    pub async fn run<F, T>(&self, work: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.window).await;
        if self.generation.load(Ordering::SeqCst) != ticket {
            return None;
        }
        Some(work.await)
    }
}
