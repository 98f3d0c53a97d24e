//! Common types, enums, error handling, data models.

use alloy_primitives::{Address, Bytes, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Largest value a `uint24` fee tier can hold.
pub const MAX_FEE_TIER: u32 = 0x00ff_ffff;

/// Provenance tags carried by [`BatchPriceResult::source`].
pub const SOURCE_MULTICALL: &str = "aggregated quote, multicall";
pub const SOURCE_CACHE: &str = "cache";
pub const SOURCE_STALE: &str = "fallback, stale cache";

/// Failures while building a single quote call. The affected call is left out
/// of its batch; nothing else is aborted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
    #[error("one unit at {decimals} decimals does not fit in uint256")]
    AmountOutOfRange { decimals: u8 },
    #[error("fee tier {0} does not fit in uint24")]
    FeeOutOfRange(u32),
}

/// Errors from the JSON-RPC transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("node answered with http status {0}")]
    Status(u16),
    #[error("rate limited by node")]
    RateLimited,
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid rpc response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TransportError::RateLimited)
    }
}

/// Pricing failure taxonomy. None of these escape the engine's public
/// operations; they end up as log lines or in a result's `error` field.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PricingError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error("call {index} failed: {reason}")]
    CallFailure { index: usize, reason: String },
    #[error("chunk {chunk} could not be submitted: {reason}")]
    ChunkTransportFailure { chunk: usize, reason: String },
    #[error("no viable route for {symbol}")]
    NoViableRoute { symbol: String },
    #[error("rate limited by upstream provider")]
    RateLimited,
    #[error("network {0} is not configured")]
    UnsupportedNetwork(Network),
    #[error("superseded by a newer request")]
    Superseded,
}

/// Supported chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ethereum,
    Arbitrum,
    Optimism,
    Base,
    Polygon,
}

impl Network {
    pub const ALL: [Network; 5] = [
        Network::Ethereum,
        Network::Arbitrum,
        Network::Optimism,
        Network::Base,
        Network::Polygon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Arbitrum => "arbitrum",
            Network::Optimism => "optimism",
            Network::Base => "base",
            Network::Polygon => "polygon",
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Arbitrum => 42_161,
            Network::Optimism => 10,
            Network::Base => 8_453,
            Network::Polygon => 137,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "mainnet" | "eth" => Ok(Network::Ethereum),
            "arbitrum" | "arbitrum-one" => Ok(Network::Arbitrum),
            "optimism" | "op" => Ok(Network::Optimism),
            "base" => Ok(Network::Base),
            "polygon" | "matic" => Ok(Network::Polygon),
            other => Err(format!("unsupported network '{}'", other)),
        }
    }
}

/// A token to be priced. Identity is `(address, network)`; the symbol is only
/// a display label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

impl TokenDescriptor {
    pub fn new(symbol: impl Into<String>, address: &str, decimals: u8) -> Result<Self, EncodingError> {
        let address = parse_address(address)?;
        Ok(Self::from_parts(symbol, address, decimals))
    }

    pub fn from_parts(symbol: impl Into<String>, address: Address, decimals: u8) -> Self {
        Self { symbol: symbol.into(), address, decimals }
    }

    /// Raw amount equal to one whole token.
    pub fn unit_amount(&self) -> Result<U256, EncodingError> {
        U256::from(10u64)
            .checked_pow(U256::from(self.decimals))
            .ok_or(EncodingError::AmountOutOfRange { decimals: self.decimals })
    }
}

pub fn parse_address(s: &str) -> Result<Address, EncodingError> {
    Address::from_str(s.trim()).map_err(|_| EncodingError::InvalidAddress(s.to_string()))
}

/// One exact-input single-hop quote, i.e. one encoded quoter call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub fee_tier: u32,
}

impl QuoteRequest {
    pub fn new(token_in: Address, token_out: Address, amount_in: U256, fee_tier: u32) -> Result<Self, EncodingError> {
        if fee_tier > MAX_FEE_TIER {
            return Err(EncodingError::FeeOutOfRange(fee_tier));
        }
        Ok(Self { token_in, token_out, amount_in, fee_tier })
    }

    /// Builds a request from hex address strings.
    pub fn parse(token_in: &str, token_out: &str, amount_in: U256, fee_tier: u32) -> Result<Self, EncodingError> {
        Self::new(parse_address(token_in)?, parse_address(token_out)?, amount_in, fee_tier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteRole {
    /// Quote against the USD-pegged reference asset.
    DirectToStable,
    /// Quote against the network's base asset, then convert to USD.
    ViaBaseAsset,
}

impl fmt::Display for RouteRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteRole::DirectToStable => f.write_str("direct-to-stable"),
            RouteRole::ViaBaseAsset => f.write_str("via-base-asset"),
        }
    }
}

/// A quote request tagged with the route it probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCandidate {
    pub role: RouteRole,
    pub fee_tier: u32,
    pub request: QuoteRequest,
}

/// Raw per-call result from the aggregator, positional within its batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCallResult {
    pub success: bool,
    pub return_data: Bytes,
}

impl BatchCallResult {
    pub fn ok(return_data: Bytes) -> Self {
        Self { success: true, return_data }
    }

    pub fn failed() -> Self {
        Self { success: false, return_data: Bytes::new() }
    }
}

/// Decoded view of a [`BatchCallResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteOutcome {
    Quoted { amount_out: U256 },
    /// The call reverted, or its chunk never got an answer.
    Reverted,
    Undecodable(String),
}

/// A token price in USD together with the route that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub symbol: String,
    pub address: Address,
    pub price_usd: f64,
    pub decimals: u8,
    pub last_updated: DateTime<Utc>,
    /// `None` only for the stable reference asset, which is never quoted.
    pub route: Option<RouteCandidate>,
}

impl ResolvedPrice {
    pub fn is_valid(&self) -> bool {
        self.price_usd.is_finite() && self.price_usd > 0.0
    }
}

/// Aggregate answer for a batch lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPriceResult {
    pub tokens: BTreeMap<String, ResolvedPrice>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub error: Option<String>,
    #[serde(skip)]
    pub rate_limited: bool,
}

impl BatchPriceResult {
    pub fn new(timestamp: DateTime<Utc>, source: &str) -> Self {
        Self {
            tokens: BTreeMap::new(),
            timestamp,
            source: source.to_string(),
            error: None,
            rate_limited: false,
        }
    }

    pub fn failed(error: PricingError) -> Self {
        let mut result = Self::new(Utc::now(), SOURCE_CACHE);
        result.rate_limited = error == PricingError::RateLimited;
        result.error = Some(error.to_string());
        result
    }

    pub fn price_of(&self, symbol: &str) -> Option<f64> {
        self.tokens.get(symbol).map(|p| p.price_usd)
    }
}

/// Answer of the single-token fast path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleTokenPrice {
    pub price: Option<f64>,
    pub error: Option<String>,
}

impl SingleTokenPrice {
    pub fn found(price: f64) -> Self {
        Self { price: Some(price), error: None }
    }

    pub fn unavailable(error: impl fmt::Display) -> Self {
        Self { price: None, error: Some(error.to_string()) }
    }
}
