mod cli;

use anyhow::{anyhow, Result};
use clap::Parser;
use cli::{Cli, Command};
use std::sync::Arc;
use token_pricer::api::ApiServer;
use token_pricer::config::AppConfig;
use token_pricer::logging::setup_logging;
use token_pricer::types::TokenDescriptor;
use token_pricer::utils::token_list::load_token_list;
use token_pricer::{PriceEngine, PriceScheduler};
use tracing::info;

/// Token list for the selected network, or its stable and base asset.
fn tokens_to_price(config: &AppConfig) -> Result<Vec<TokenDescriptor>> {
    let network = config
        .network_config(config.network)
        .ok_or_else(|| anyhow!("network {} is not configured", config.network))?;
    match &config.tokens_file {
        Some(path) => load_token_list(path, config.network),
        None => Ok(vec![network.stable.clone(), network.base.clone()]),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let json = cli.json;
    let config = AppConfig::from_cli(cli.config)?;
    setup_logging(&config.log_level, config.log_json);

    let engine = Arc::new(PriceEngine::from_config(&config)?);
    if engine.network(config.network).is_none() {
        return Err(anyhow!(
            "no RPC URL for {}; set --rpc-url or {}_RPC_URL",
            config.network,
            config.network.as_str().to_ascii_uppercase()
        ));
    }

    match cli.command {
        Command::Prices { force } => {
            let tokens = tokens_to_price(&config)?;
            let result = engine.get_batch(&tokens, config.network, force).await;
            cli::print_batch(&result, json)?;
        }
        Command::Price { address, decimals, symbol } => {
            let symbol = symbol.unwrap_or_else(|| address.clone());
            let token = TokenDescriptor::new(symbol.clone(), &address, decimals)?;
            let result = engine.get_one(&token, config.network).await;
            cli::print_single(&symbol, &result, json)?;
        }
        Command::Watch => {
            let scheduler = scheduler(&config, engine)?;
            let mut updates = scheduler.updates();
            let task = scheduler.spawn();
            loop {
                tokio::select! {
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("interrupted");
                        break;
                    }
                }
                let latest = updates.borrow_and_update().clone();
                if let Some(result) = latest {
                    cli::print_batch(&result, json)?;
                }
            }
            task.abort();
        }
        Command::Serve => {
            let scheduler = scheduler(&config, engine)?;
            let task = scheduler.spawn();
            let server = ApiServer::new(scheduler).with_debounce(config.debounce);
            tokio::select! {
                res = server.start(&config.api_addr) => res?,
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
            }
            task.abort();
        }
    }
    Ok(())
}

fn scheduler(config: &AppConfig, engine: Arc<PriceEngine>) -> Result<Arc<PriceScheduler>> {
    let tokens = tokens_to_price(config)?;
    info!(network = %config.network, tokens = tokens.len(), "starting background refresh");
    Ok(PriceScheduler::new(engine, config.network, tokens, config.refresh_interval, config.max_backoff))
}
