//! Configuration loading, env vars, CLI flags.
//!
//! Precedence is CLI flag > TOML file (`--config`) > environment > built-in
//! defaults. Network tables can be overridden per chain under
//! `[networks.<name>]` in the file.

use crate::types::{parse_address, Network, TokenDescriptor};
use alloy_primitives::{address, Address};
use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tracing::info;

#[cfg(feature = "cli")]
use clap::Parser;

/// Multicall3 lives at the same address on every supported chain.
pub const MULTICALL3: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");
const QUOTER_V2: Address = address!("61fFE014bA17989E743c5F6cB21bF9697530B21e");
const QUOTER_V2_BASE: Address = address!("3d4e44Eb1374240CE5F1B871ab261CD16335B76a");
const OP_STACK_WETH: Address = address!("4200000000000000000000000000000000000006");

pub const DEFAULT_MIN_REFETCH_SECS: u64 = 30;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 120;
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 600;
pub const DEFAULT_MAX_CALLS_PER_BATCH: usize = 50;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CACHE_CAPACITY: usize = 5000;
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
const DEFAULT_API_ADDR: &str = "0.0.0.0:8080";

/// Contract and asset table for one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub network: Network,
    pub rpc_url: Option<String>,
    pub quoter: Address,
    pub multicall: Address,
    /// USD-pegged reference asset, priced as exactly 1.0.
    pub stable: TokenDescriptor,
    /// Fallback routing hop (wrapped native coin).
    pub base: TokenDescriptor,
    /// Configured USD value of one base asset unit.
    pub base_asset_usd: f64,
}

impl NetworkConfig {
    /// Built-in deployment table.
    pub fn defaults(network: Network) -> Self {
        let (quoter, stable, base, base_asset_usd) = match network {
            Network::Ethereum => (
                QUOTER_V2,
                address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
                address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
                2500.0,
            ),
            Network::Arbitrum => (
                QUOTER_V2,
                address!("af88d065e77c8cC2239327C5EDb3A432268e5831"),
                address!("82aF49447D8a07e3bd95BD0d56f35241523fBab1"),
                2500.0,
            ),
            Network::Optimism => (
                QUOTER_V2,
                address!("0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
                OP_STACK_WETH,
                2500.0,
            ),
            Network::Base => (
                QUOTER_V2_BASE,
                address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
                OP_STACK_WETH,
                2500.0,
            ),
            Network::Polygon => (
                QUOTER_V2,
                address!("3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
                address!("0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270"),
                0.5,
            ),
        };
        let base_symbol = if network == Network::Polygon { "WPOL" } else { "WETH" };
        Self {
            network,
            rpc_url: None,
            quoter,
            multicall: MULTICALL3,
            stable: TokenDescriptor::from_parts("USDC", stable, 6),
            base: TokenDescriptor::from_parts(base_symbol, base, 18),
            base_asset_usd,
        }
    }

    fn apply(&mut self, o: &NetworkOverride) -> anyhow::Result<()> {
        if let Some(url) = &o.rpc_url {
            self.rpc_url = Some(url.clone());
        }
        if let Some(s) = &o.quoter {
            self.quoter = parse_address(s).context("quoter")?;
        }
        if let Some(s) = &o.multicall {
            self.multicall = parse_address(s).context("multicall")?;
        }
        if let Some(s) = &o.stable_address {
            self.stable.address = parse_address(s).context("stable_address")?;
        }
        if let Some(s) = &o.stable_symbol {
            self.stable.symbol = s.clone();
        }
        if let Some(d) = o.stable_decimals {
            self.stable.decimals = d;
        }
        if let Some(s) = &o.base_address {
            self.base.address = parse_address(s).context("base_address")?;
        }
        if let Some(s) = &o.base_symbol {
            self.base.symbol = s.clone();
        }
        if let Some(d) = o.base_decimals {
            self.base.decimals = d;
        }
        if let Some(usd) = o.base_asset_usd {
            if !(usd.is_finite() && usd > 0.0) {
                return Err(anyhow!("base_asset_usd must be positive, got {}", usd));
            }
            self.base_asset_usd = usd;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub network: Network,
    pub networks: HashMap<Network, NetworkConfig>,
    pub min_refetch_interval: Duration,
    pub refresh_interval: Duration,
    pub max_backoff: Duration,
    pub max_calls_per_batch: usize,
    pub request_timeout: Duration,
    pub cache_capacity: usize,
    pub debounce: Duration,
    pub live_base_price: bool,
    pub tokens_file: Option<String>,
    pub price_history_file: Option<String>,
    pub log_level: String,
    pub log_json: bool,
    pub api_addr: String,
}

/// Per-network overrides, `[networks.<name>]` in the config file.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct NetworkOverride {
    pub rpc_url: Option<String>,
    pub quoter: Option<String>,
    pub multicall: Option<String>,
    pub stable_address: Option<String>,
    pub stable_symbol: Option<String>,
    pub stable_decimals: Option<u8>,
    pub base_address: Option<String>,
    pub base_symbol: Option<String>,
    pub base_decimals: Option<u8>,
    pub base_asset_usd: Option<f64>,
}

impl NetworkOverride {
    fn or(self, other: NetworkOverride) -> NetworkOverride {
        NetworkOverride {
            rpc_url: self.rpc_url.or(other.rpc_url),
            quoter: self.quoter.or(other.quoter),
            multicall: self.multicall.or(other.multicall),
            stable_address: self.stable_address.or(other.stable_address),
            stable_symbol: self.stable_symbol.or(other.stable_symbol),
            stable_decimals: self.stable_decimals.or(other.stable_decimals),
            base_address: self.base_address.or(other.base_address),
            base_symbol: self.base_symbol.or(other.base_symbol),
            base_decimals: self.base_decimals.or(other.base_decimals),
            base_asset_usd: self.base_asset_usd.or(other.base_asset_usd),
        }
    }
}

/// One configuration layer. Every source (file, env, CLI) is read into this
/// shape and layers are merged with `or`.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub network: Option<String>,
    pub rpc_url: Option<String>,
    pub min_refetch_secs: Option<u64>,
    pub refresh_interval_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub max_calls_per_batch: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub cache_capacity: Option<usize>,
    pub debounce_ms: Option<u64>,
    pub live_base_price: Option<bool>,
    pub tokens_file: Option<String>,
    pub price_history_file: Option<String>,
    pub log_level: Option<String>,
    pub log_json: Option<bool>,
    pub api_addr: Option<String>,
    #[serde(default)]
    pub networks: HashMap<String, NetworkOverride>,
}

impl FileConfig {
    pub fn from_toml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path).with_context(|| format!("unable to read config file {}", path))?;
        toml::from_str(&contents).with_context(|| format!("invalid config file {}", path))
    }

    pub fn from_env() -> Self {
        let mut networks = HashMap::new();
        for network in Network::ALL {
            let prefix = network.as_str().to_ascii_uppercase();
            let o = NetworkOverride {
                rpc_url: env::var(format!("{}_RPC_URL", prefix)).ok(),
                base_asset_usd: env_parse(&format!("{}_BASE_ASSET_USD", prefix)),
                ..Default::default()
            };
            if o.rpc_url.is_some() || o.base_asset_usd.is_some() {
                networks.insert(network.as_str().to_string(), o);
            }
        }
        Self {
            network: env::var("NETWORK").ok(),
            rpc_url: env::var("RPC_URL").ok(),
            min_refetch_secs: env_parse("MIN_REFETCH_SECS"),
            refresh_interval_secs: env_parse("REFRESH_INTERVAL_SECS"),
            max_backoff_secs: env_parse("MAX_BACKOFF_SECS"),
            max_calls_per_batch: env_parse("MAX_CALLS_PER_BATCH"),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS"),
            cache_capacity: env_parse("CACHE_CAPACITY"),
            debounce_ms: env_parse("DEBOUNCE_MS"),
            live_base_price: env_parse("LIVE_BASE_PRICE"),
            tokens_file: env::var("TOKENS_FILE").ok(),
            price_history_file: env::var("PRICE_HISTORY_FILE").ok(),
            log_level: env::var("LOG_LEVEL").ok(),
            log_json: env_parse("LOG_JSON"),
            api_addr: env::var("API_ADDR").ok(),
            networks,
        }
    }

    /// Merge two layers; values in `self` win.
    pub fn or(self, other: FileConfig) -> FileConfig {
        let mut networks = other.networks;
        for (name, o) in self.networks {
            let merged = match networks.remove(&name) {
                Some(lower) => o.or(lower),
                None => o,
            };
            networks.insert(name, merged);
        }
        FileConfig {
            network: self.network.or(other.network),
            rpc_url: self.rpc_url.or(other.rpc_url),
            min_refetch_secs: self.min_refetch_secs.or(other.min_refetch_secs),
            refresh_interval_secs: self.refresh_interval_secs.or(other.refresh_interval_secs),
            max_backoff_secs: self.max_backoff_secs.or(other.max_backoff_secs),
            max_calls_per_batch: self.max_calls_per_batch.or(other.max_calls_per_batch),
            request_timeout_secs: self.request_timeout_secs.or(other.request_timeout_secs),
            cache_capacity: self.cache_capacity.or(other.cache_capacity),
            debounce_ms: self.debounce_ms.or(other.debounce_ms),
            live_base_price: self.live_base_price.or(other.live_base_price),
            tokens_file: self.tokens_file.or(other.tokens_file),
            price_history_file: self.price_history_file.or(other.price_history_file),
            log_level: self.log_level.or(other.log_level),
            log_json: self.log_json.or(other.log_json),
            api_addr: self.api_addr.or(other.api_addr),
            networks,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(feature = "cli")]
#[derive(clap::Args, Debug, Clone, Default)]
pub struct CliConfig {
    /// TOML config file
    #[arg(long, global = true)]
    pub config: Option<String>,
    #[arg(long, global = true)]
    pub network: Option<String>,
    /// RPC endpoint for the selected network
    #[arg(long, global = true)]
    pub rpc_url: Option<String>,
    #[arg(long, global = true)]
    pub min_refetch_secs: Option<u64>,
    #[arg(long, global = true)]
    pub refresh_interval_secs: Option<u64>,
    #[arg(long, global = true)]
    pub max_calls_per_batch: Option<usize>,
    #[arg(long, global = true)]
    pub request_timeout_secs: Option<u64>,
    #[arg(long, global = true)]
    pub live_base_price: Option<bool>,
    #[arg(long, global = true)]
    pub tokens_file: Option<String>,
    #[arg(long, global = true)]
    pub price_history_file: Option<String>,
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    #[arg(long, global = true)]
    pub log_json: bool,
    #[arg(long, global = true)]
    pub api_addr: Option<String>,
}

#[cfg(feature = "cli")]
impl CliConfig {
    fn into_layer(self) -> FileConfig {
        FileConfig {
            network: self.network,
            rpc_url: self.rpc_url,
            min_refetch_secs: self.min_refetch_secs,
            refresh_interval_secs: self.refresh_interval_secs,
            max_calls_per_batch: self.max_calls_per_batch,
            request_timeout_secs: self.request_timeout_secs,
            live_base_price: self.live_base_price,
            tokens_file: self.tokens_file,
            price_history_file: self.price_history_file,
            log_level: self.log_level,
            log_json: self.log_json.then_some(true),
            api_addr: self.api_addr,
            ..Default::default()
        }
    }
}

#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct StandaloneCli {
    #[command(flatten)]
    config: CliConfig,
}

impl AppConfig {
    /// Environment plus built-in defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_layer(FileConfig::from_env())
    }

    #[cfg(feature = "cli")]
    pub fn load_with_cli() -> anyhow::Result<Self> {
        Self::from_cli(StandaloneCli::parse().config)
    }

    #[cfg(feature = "cli")]
    pub fn from_cli(cli: CliConfig) -> anyhow::Result<Self> {
        let file_config = match cli.config.as_deref() {
            Some(path) => FileConfig::from_toml_file(path)?,
            None => FileConfig::default(),
        };
        Self::from_layer(cli.into_layer().or(file_config).or(FileConfig::from_env()))
    }

    /// Resolve a merged layer against the built-in defaults.
    pub fn from_layer(layer: FileConfig) -> anyhow::Result<Self> {
        let network = match layer.network.as_deref() {
            Some(name) => name.parse::<Network>().map_err(|e| anyhow!(e))?,
            None => Network::Ethereum,
        };

        let mut networks: HashMap<Network, NetworkConfig> =
            Network::ALL.iter().map(|n| (*n, NetworkConfig::defaults(*n))).collect();
        for (name, o) in &layer.networks {
            let n = name.parse::<Network>().map_err(|e| anyhow!(e))?;
            if let Some(cfg) = networks.get_mut(&n) {
                cfg.apply(o).with_context(|| format!("invalid override for network {}", n))?;
            }
        }
        // A bare RPC_URL / --rpc-url targets the selected network.
        if let (Some(url), Some(cfg)) = (layer.rpc_url, networks.get_mut(&network)) {
            cfg.rpc_url = Some(url);
        }
        if networks.get(&network).map_or(true, |c| c.rpc_url.is_none()) {
            info!("no RPC URL configured for {}; pricing on it will be unavailable", network);
        }

        Ok(Self {
            network,
            networks,
            min_refetch_interval: Duration::from_secs(layer.min_refetch_secs.unwrap_or(DEFAULT_MIN_REFETCH_SECS)),
            refresh_interval: Duration::from_secs(layer.refresh_interval_secs.unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS)),
            max_backoff: Duration::from_secs(layer.max_backoff_secs.unwrap_or(DEFAULT_MAX_BACKOFF_SECS)),
            max_calls_per_batch: layer.max_calls_per_batch.unwrap_or(DEFAULT_MAX_CALLS_PER_BATCH).max(1),
            request_timeout: Duration::from_secs(layer.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)),
            cache_capacity: layer.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
            debounce: Duration::from_millis(layer.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)),
            live_base_price: layer.live_base_price.unwrap_or(false),
            tokens_file: layer.tokens_file,
            price_history_file: layer.price_history_file,
            log_level: layer.log_level.unwrap_or_else(|| "info".to_string()),
            log_json: layer.log_json.unwrap_or(false),
            api_addr: layer.api_addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
        })
    }

    pub fn network_config(&self, network: Network) -> Option<&NetworkConfig> {
        self.networks.get(&network)
    }
}
