pub mod encoder;
pub mod executor;
pub mod fast_path;
pub mod planner;
pub mod resolver;

use crate::config::{AppConfig, NetworkConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_CALLS_PER_BATCH};
use crate::data_management::cache::{PriceCache, PriceCacheKey};
use crate::data_management::history;
use crate::rpc::{EthCall, HttpTransport};
use crate::types::{
    BatchPriceResult, Network, PricingError, ResolvedPrice, SingleTokenPrice, TokenDescriptor, SOURCE_CACHE,
    SOURCE_MULTICALL, SOURCE_STALE,
};
use crate::utils::request_sharing::RequestSharing;
use alloy_primitives::Address;
use anyhow::Context;
use chrono::{DateTime, Utc};
use executor::BatchExecutor;
use fast_path::FastPathQuoter;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything needed to talk to one chain.
pub struct NetworkClient {
    pub config: NetworkConfig,
    executor: BatchExecutor,
    fast_path: FastPathQuoter,
}

impl NetworkClient {
    pub fn new(config: NetworkConfig, transport: Arc<dyn EthCall>) -> Self {
        let executor = BatchExecutor::new(transport.clone(), config.multicall, config.quoter);
        let fast_path = FastPathQuoter::new(transport, config.clone());
        Self { config, executor, fast_path }
    }

    fn stable_price(&self, now: DateTime<Utc>) -> ResolvedPrice {
        let stable = &self.config.stable;
        ResolvedPrice {
            symbol: stable.symbol.clone(),
            address: stable.address,
            price_usd: 1.0,
            decimals: stable.decimals,
            last_updated: now,
            route: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub min_refetch_interval: Duration,
    pub max_calls_per_batch: usize,
    pub live_base_price: bool,
    pub cache_capacity: usize,
    pub price_history_file: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_refetch_interval: Duration::from_secs(crate::config::DEFAULT_MIN_REFETCH_SECS),
            max_calls_per_batch: DEFAULT_MAX_CALLS_PER_BATCH,
            live_base_price: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            price_history_file: None,
        }
    }
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            min_refetch_interval: config.min_refetch_interval,
            max_calls_per_batch: config.max_calls_per_batch,
            live_base_price: config.live_base_price,
            cache_capacity: config.cache_capacity,
            price_history_file: config.price_history_file.clone(),
        }
    }
}

/// The main price engine struct.
pub struct PriceEngine {
    networks: HashMap<Network, Arc<NetworkClient>>,
    cache: Arc<PriceCache>,
    settings: EngineSettings,
    single_flight: RequestSharing<PriceCacheKey, BoxFuture<'static, SingleTokenPrice>>,
}

impl PriceEngine {
    pub fn new(settings: EngineSettings) -> Self {
        let cache = Arc::new(PriceCache::new(settings.cache_capacity, settings.min_refetch_interval));
        Self::with_cache(settings, cache)
    }

    /// Uses an existing cache, e.g. one shared with another engine.
    pub fn with_cache(settings: EngineSettings, cache: Arc<PriceCache>) -> Self {
        Self { networks: HashMap::new(), cache, settings, single_flight: RequestSharing::new() }
    }

    pub fn with_network(mut self, config: NetworkConfig, transport: Arc<dyn EthCall>) -> Self {
        self.networks.insert(config.network, Arc::new(NetworkClient::new(config, transport)));
        self
    }

    /// Builds an HTTP transport for every network with an RPC URL.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let mut engine = Self::new(EngineSettings::from(config));
        for (network, net_config) in &config.networks {
            let Some(url) = net_config.rpc_url.as_deref() else {
                continue;
            };
            let transport = HttpTransport::new(url, config.request_timeout)
                .with_context(|| format!("building transport for {}", network))?;
            info!(%network, url, "network configured");
            engine = engine.with_network(net_config.clone(), Arc::new(transport));
        }
        Ok(engine)
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn network(&self, network: Network) -> Option<&NetworkConfig> {
        self.networks.get(&network).map(|c| &c.config)
    }

    pub fn networks(&self) -> impl Iterator<Item = Network> + '_ {
        self.networks.keys().copied()
    }

    /// Prices `tokens` on `network`.
    ///
    /// Only keys that are empty or older than the minimum refetch interval
    /// (any key with `force`) go to the network; the rest are served from the
    /// cache. Keys another caller is already fetching are awaited, not
    /// refetched. The stable asset is always present at 1.0. Failures never
    /// surface as `Err`: they end up in `error` while cached prices are still
    /// returned.
    pub async fn get_batch(&self, tokens: &[TokenDescriptor], network: Network, force: bool) -> BatchPriceResult {
        let Some(client) = self.networks.get(&network) else {
            return BatchPriceResult::failed(PricingError::UnsupportedNetwork(network));
        };
        let stable = &client.config.stable;
        let now = Utc::now();

        let keys: Vec<PriceCacheKey> = tokens
            .iter()
            .filter(|t| t.address != stable.address)
            .map(|t| PriceCacheKey::new(network, t.address))
            .collect();
        let mut claim = self.cache.claim(&keys, force);
        let pending = claim.pending.clone();
        let cached = std::mem::take(&mut claim.cached);

        let mut result = BatchPriceResult::new(now, SOURCE_CACHE);
        let mut fresh: HashMap<Address, ResolvedPrice> = HashMap::new();
        if !claim.is_empty() {
            let to_fetch: Vec<TokenDescriptor> = tokens
                .iter()
                .filter(|t| claim.keys().iter().any(|k| k.address == t.address))
                .cloned()
                .collect();
            let plan = planner::plan_batch(
                &to_fetch,
                &client.config,
                self.settings.max_calls_per_batch,
                self.settings.live_base_price,
            );
            info!(
                %network,
                tokens = plan.tokens.len(),
                calls = plan.calls.len(),
                chunks = plan.chunk_count(),
                "fetching prices"
            );
            let report = client.executor.execute(&plan).await;
            let resolved = resolver::resolve(&plan, &report.results, &client.config, self.settings.live_base_price, now);
            // the base asset may be priced only to convert via-base quotes
            fresh = resolved
                .into_iter()
                .flatten()
                .filter(|p| claim.keys().iter().any(|k| k.address == p.address))
                .map(|p| (p.address, p))
                .collect();

            claim.finish(|key| fresh.get(&key.address).cloned());
            self.record_history(network, now, fresh.values());

            if report.all_failed() {
                result.source = SOURCE_STALE.to_string();
                result.error = Some(if report.rate_limited {
                    PricingError::RateLimited.to_string()
                } else {
                    format!("all {} multicall chunks failed", report.total_chunks)
                });
            } else {
                result.source = SOURCE_MULTICALL.to_string();
                if report.rate_limited {
                    result.error = Some(PricingError::RateLimited.to_string());
                }
            }
            result.rate_limited = report.rate_limited;
        } else {
            drop(claim);
        }

        if !pending.is_empty() {
            debug!(%network, keys = pending.len(), "waiting for in-flight fetch");
            self.cache.wait_settled(&pending).await;
        }

        for token in tokens.iter().filter(|t| t.address != stable.address) {
            if token.symbol == stable.symbol {
                warn!(%network, address = %token.address, symbol = %token.symbol, "token shares the stable asset symbol, skipped");
                continue;
            }
            let key = PriceCacheKey::new(network, token.address);
            let price = match fresh.get(&token.address) {
                Some(price) => Some(price.clone()),
                None if pending.contains(&key) => self.cache.price(&key).or_else(|| cached.get(&key).cloned()),
                None => cached.get(&key).cloned(),
            };
            if let Some(price) = price {
                result.tokens.insert(token.symbol.clone(), price);
            }
        }
        result.tokens.insert(stable.symbol.clone(), client.stable_price(now));
        result
    }

    /// Single-token fast path. Concurrent calls for the same token share one
    /// probe; within the minimum refetch interval the cached price is used.
    pub async fn get_one(&self, token: &TokenDescriptor, network: Network) -> SingleTokenPrice {
        let Some(client) = self.networks.get(&network).cloned() else {
            return SingleTokenPrice::unavailable(PricingError::UnsupportedNetwork(network));
        };
        if token.address == client.config.stable.address {
            return SingleTokenPrice::found(1.0);
        }

        let cache = self.cache.clone();
        let token = token.clone();
        let history_file = self.settings.price_history_file.clone();
        let key = PriceCacheKey::new(network, token.address);
        self.single_flight
            .shared_or_else(key, move |key| {
                let key = *key;
                async move {
                    let claim = cache.claim(&[key], false);
                    if claim.is_empty() {
                        let pending = claim.pending.clone();
                        drop(claim);
                        cache.wait_settled(&pending).await;
                        return match cache.price(&key) {
                            Some(price) => SingleTokenPrice::found(price.price_usd),
                            None => SingleTokenPrice::unavailable(PricingError::NoViableRoute {
                                symbol: token.symbol.clone(),
                            }),
                        };
                    }

                    match client.fast_path.probe(&token).await {
                        Ok(price) => {
                            if let Some(path) = &history_file {
                                let stamp = price.last_updated.to_rfc3339();
                                if let Err(e) = history::append_price(&stamp, network, &price, path) {
                                    warn!(error = %e, "failed to record price history");
                                }
                            }
                            let value = price.price_usd;
                            claim.finish(|_| Some(price.clone()));
                            SingleTokenPrice::found(value)
                        }
                        Err(e) => {
                            warn!(%network, symbol = %token.symbol, error = %e, "fast path failed");
                            claim.finish(|_| None);
                            // stale data is preferred over no data
                            SingleTokenPrice { price: cache.price(&key).map(|p| p.price_usd), error: Some(e.to_string()) }
                        }
                    }
                }
                .boxed()
            })
            .await
    }

    fn record_history<'a>(
        &self,
        network: Network,
        now: DateTime<Utc>,
        prices: impl IntoIterator<Item = &'a ResolvedPrice>,
    ) {
        let Some(path) = &self.settings.price_history_file else {
            return;
        };
        if let Err(e) = history::append_prices(&now.to_rfc3339(), network, prices, path) {
            warn!(error = %e, path = %path, "failed to record price history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransportError;
    use alloy_primitives::{Address, Bytes};
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl EthCall for Unreachable {
        async fn eth_call(&self, _to: Address, _data: Bytes) -> Result<Bytes, TransportError> {
            panic!("no network call expected")
        }
    }

    fn engine() -> PriceEngine {
        PriceEngine::new(EngineSettings::default())
            .with_network(NetworkConfig::defaults(Network::Ethereum), Arc::new(Unreachable))
    }

    #[tokio::test]
    async fn empty_request_touches_nothing() {
        let result = engine().get_batch(&[], Network::Ethereum, false).await;
        assert_eq!(result.tokens.len(), 1);
        assert_eq!(result.price_of("USDC"), Some(1.0));
        assert_eq!(result.source, SOURCE_CACHE);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn unsupported_network_is_reported() {
        let result = engine().get_batch(&[], Network::Polygon, false).await;
        assert!(result.tokens.is_empty());
        assert_eq!(result.error.as_deref(), Some("network polygon is not configured"));
        let single = engine().get_one(&NetworkConfig::defaults(Network::Base).base, Network::Base).await;
        assert!(single.price.is_none());
    }

    #[tokio::test]
    async fn stable_asset_never_hits_the_network() {
        let net = NetworkConfig::defaults(Network::Ethereum);
        let engine = engine();
        assert_eq!(engine.get_one(&net.stable, Network::Ethereum).await, SingleTokenPrice::found(1.0));
        let result = engine.get_batch(&[net.stable.clone()], Network::Ethereum, true).await;
        assert_eq!(result.price_of("USDC"), Some(1.0));
        assert!(result.tokens["USDC"].route.is_none());
    }
}
