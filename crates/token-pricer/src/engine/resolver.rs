//! Turns positional batch results back into one USD price per token.

use super::encoder::decode_quote_output;
use super::planner::{BatchPlan, PlannedCall};
use crate::config::NetworkConfig;
use crate::types::{BatchCallResult, PricingError, QuoteOutcome, ResolvedPrice, RouteRole, TokenDescriptor};
use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, warn};

pub fn decode_outcome(result: &BatchCallResult) -> QuoteOutcome {
    if !result.success {
        return QuoteOutcome::Reverted;
    }
    match decode_quote_output(&result.return_data) {
        Ok(amount_out) => QuoteOutcome::Quoted { amount_out },
        Err(e) => QuoteOutcome::Undecodable(e.to_string()),
    }
}

/// `amount / 10^decimals` as a float.
pub fn scale_amount(amount: U256, decimals: u8) -> Option<f64> {
    let exact = u128::try_from(amount)
        .ok()
        .and_then(|v| i128::try_from(v).ok())
        .and_then(|v| Decimal::try_from_i128_with_scale(v, u32::from(decimals)).ok())
        .and_then(|d| d.to_f64());
    if exact.is_some() {
        return exact;
    }
    let raw: f64 = amount.to_string().parse().ok()?;
    Some(raw / 10f64.powi(i32::from(decimals)))
}

/// USD value of one whole input token given the quoted output of a route.
/// Returns `None` for anything that is not a finite positive price.
pub fn candidate_price(amount_out: U256, role: RouteRole, network: &NetworkConfig, base_asset_usd: f64) -> Option<f64> {
    let price = match role {
        RouteRole::DirectToStable => scale_amount(amount_out, network.stable.decimals)?,
        RouteRole::ViaBaseAsset => scale_amount(amount_out, network.base.decimals)? * base_asset_usd,
    };
    (price.is_finite() && price > 0.0).then_some(price)
}

/// Picks the highest-priced viable candidate for every token of `plan`.
///
/// The returned vector is aligned with `plan.tokens`; `None` means no route
/// produced a usable quote. With `live_base_price` the base asset is resolved
/// first and its price replaces the configured one for via-base candidates.
pub fn resolve(
    plan: &BatchPlan,
    results: &[BatchCallResult],
    network: &NetworkConfig,
    live_base_price: bool,
    now: DateTime<Utc>,
) -> Vec<Option<ResolvedPrice>> {
    let by_token = plan.calls.iter().enumerate().into_group_map_by(|(_, call)| call.token);
    let candidates = |index: usize| by_token.get(&index).map(Vec::as_slice).unwrap_or_default();

    let mut base_asset_usd = network.base_asset_usd;
    if live_base_price {
        if let Some(price) = plan
            .base_index
            .and_then(|i| best_for(&plan.tokens[i], candidates(i), results, network, base_asset_usd, now))
        {
            debug!(price = price.price_usd, "using live base asset price");
            base_asset_usd = price.price_usd;
        }
    }

    plan.tokens
        .iter()
        .enumerate()
        .map(|(index, token)| {
            let resolved = best_for(token, candidates(index), results, network, base_asset_usd, now);
            if resolved.is_none() {
                let err = PricingError::NoViableRoute { symbol: token.symbol.clone() };
                warn!(error = %err, "token omitted");
            }
            resolved
        })
        .collect()
}

fn best_for(
    token: &TokenDescriptor,
    calls: &[(usize, &PlannedCall)],
    results: &[BatchCallResult],
    network: &NetworkConfig,
    base_asset_usd: f64,
    now: DateTime<Utc>,
) -> Option<ResolvedPrice> {
    let mut best: Option<(f64, &PlannedCall)> = None;

    for &(call_index, call) in calls {
        let Some(result) = results.get(call_index) else {
            continue;
        };
        let amount_out = match decode_outcome(result) {
            QuoteOutcome::Quoted { amount_out } => amount_out,
            QuoteOutcome::Reverted => continue,
            QuoteOutcome::Undecodable(reason) => {
                let err = PricingError::CallFailure { index: call_index, reason };
                debug!(error = %err, "discarding quote");
                continue;
            }
        };
        let Some(price) = candidate_price(amount_out, call.candidate.role, network, base_asset_usd) else {
            continue;
        };
        // strict comparison: on ties the earlier candidate stays
        if best.map_or(true, |(p, _)| price > p) {
            best = Some((price, call));
        }
    }

    best.map(|(price_usd, call)| ResolvedPrice {
        symbol: token.symbol.clone(),
        address: token.address,
        price_usd,
        decimals: token.decimals,
        last_updated: now,
        route: Some(call.candidate.clone()),
    })
}
