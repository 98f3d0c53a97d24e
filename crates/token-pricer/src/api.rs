use std::sync::Arc;

use crate::data_management::cache::CacheMetrics;
use crate::data_management::scheduler::PriceScheduler;
use crate::engine::fast_path::Debouncer;
use crate::types::{BatchPriceResult, Network, PricingError, SingleTokenPrice, TokenDescriptor};
use anyhow::Context;
use axum::{
    extract::Query,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// JSON returned from /health
#[derive(Serialize)]
struct HealthResp {
    status: &'static str,
    network: Network,
    tokens: usize,
    cache_entries: usize,
    cache_hits: usize,
    cache_misses: usize,
    fetches: usize,
}

#[derive(Deserialize)]
struct PricesParams {
    #[serde(default)]
    force: bool,
}

#[derive(Deserialize)]
struct PriceParams {
    address: String,
    decimals: Option<u8>,
    symbol: Option<String>,
    network: Option<Network>,
}

pub struct ApiServer {
    scheduler: Arc<PriceScheduler>,
    debouncer: Option<Arc<Debouncer>>,
}

impl ApiServer {
    pub fn new(scheduler: Arc<PriceScheduler>) -> Self {
        Self { scheduler, debouncer: None }
    }

    /// Collapses bursts of `/price` requests: within `window` only the latest
    /// one is priced. A zero window turns debouncing off.
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debouncer = (!window.is_zero()).then(|| Arc::new(Debouncer::new(window)));
        self
    }

    pub fn router(&self) -> Router {
        let health = self.scheduler.clone();
        let prices = self.scheduler.clone();
        let single = self.scheduler.clone();
        let debouncer = self.debouncer.clone();
        let refetch = self.scheduler.clone();

        // /health endpoint
        let health_route = Router::new().route(
            "/health",
            get(move || {
                let scheduler = health.clone();
                async move {
                    let CacheMetrics { hits, misses, fetches, entries } = scheduler.engine().cache().metrics();
                    Json(HealthResp {
                        status: "ok",
                        network: scheduler.network(),
                        tokens: scheduler.tokens().len(),
                        cache_entries: entries,
                        cache_hits: hits,
                        cache_misses: misses,
                        fetches,
                    })
                }
            }),
        );

        // /prices endpoint: the subscribed token set
        let prices_route = Router::new().route(
            "/prices",
            get(move |Query(params): Query<PricesParams>| {
                let scheduler = prices.clone();
                async move { Json::<BatchPriceResult>(scheduler.refresh(params.force).await) }
            }),
        );

        // /price endpoint: one token through the fast path
        let price_route = Router::new().route(
            "/price",
            get(move |Query(params): Query<PriceParams>| {
                let scheduler = single.clone();
                let debouncer = debouncer.clone();
                async move { Json(single_price(&scheduler, debouncer.as_deref(), params).await) }
            }),
        );

        let refetch_route = Router::new().route(
            "/refetch",
            post(move || {
                let scheduler = refetch.clone();
                async move { Json::<BatchPriceResult>(scheduler.refetch().await) }
            }),
        );

        health_route.merge(prices_route).merge(price_route).merge(refetch_route)
    }

    pub async fn start(self, addr: &str) -> anyhow::Result<()> {
        let app = self.router();
        let addr: std::net::SocketAddr = addr.parse().with_context(|| format!("invalid api address {}", addr))?;
        info!(%addr, "starting API server");
        let listener = tokio::net::TcpListener::bind(addr).await.context("bind failed")?;
        axum::serve(listener, app).await.context("server failed")?;
        Ok(())
    }
}

async fn single_price(scheduler: &PriceScheduler, debouncer: Option<&Debouncer>, params: PriceParams) -> SingleTokenPrice {
    let network = params.network.unwrap_or_else(|| scheduler.network());
    let symbol = params.symbol.unwrap_or_else(|| params.address.clone());
    let token = match TokenDescriptor::new(symbol, &params.address, params.decimals.unwrap_or(18)) {
        Ok(token) => token,
        Err(e) => return SingleTokenPrice::unavailable(e),
    };
    let lookup = scheduler.engine().get_one(&token, network);
    match debouncer {
        Some(debouncer) => debouncer.run(lookup).await.unwrap_or_else(|| {
            debug!(symbol = %token.symbol, "price request superseded");
            SingleTokenPrice::unavailable(PricingError::Superseded)
        }),
        None => lookup.await,
    }
}
