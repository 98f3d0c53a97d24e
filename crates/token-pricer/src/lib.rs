//! On-chain token price discovery: batched QuoterV2 probing through
//! Multicall3 with a single-flight price cache and background refresh.

pub mod config;
pub mod data_management;
pub mod engine;
pub mod logging;
pub mod rpc;
pub mod types;
pub mod utils;

#[cfg(feature = "api")]
pub mod api;

pub use data_management::cache::{PriceCache, PriceCacheKey};
pub use data_management::scheduler::PriceScheduler;
pub use engine::{EngineSettings, PriceEngine};
