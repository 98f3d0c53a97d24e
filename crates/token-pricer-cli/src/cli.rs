use clap::{Parser, Subcommand};
use rust_decimal::prelude::*;
use token_pricer::config::CliConfig;
use token_pricer::types::{BatchPriceResult, ResolvedPrice, SingleTokenPrice};

#[derive(Parser, Debug)]
#[command(author, version, about = "USD token prices from on-chain quoters", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: CliConfig,
    /// Print JSON instead of a table
    #[arg(long, global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Price every token of the token list once
    Prices {
        /// Bypass the minimum refetch interval
        #[arg(long)]
        force: bool,
    },
    /// Price one token through the sequential fast path
    Price {
        #[arg(long)]
        address: String,
        #[arg(long, default_value_t = 18)]
        decimals: u8,
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Keep the token list fresh in the background and print every refresh
    Watch,
    /// Serve prices over HTTP while refreshing in the background
    Serve,
}

/// Formats a USD price with at most 6 decimal places.
pub fn format_usd(price: f64) -> String {
    match Decimal::from_f64(price) {
        Some(d) => d.round_dp(6).normalize().to_string(),
        None => format!("{}", price),
    }
}

fn format_route(price: &ResolvedPrice) -> String {
    match &price.route {
        Some(route) => format!("{} @ {}", route.role, route.fee_tier),
        None => "reference".to_string(),
    }
}

pub fn print_batch(result: &BatchPriceResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!("--- Prices ({}) at {} ---", result.source, result.timestamp.to_rfc3339());
    for (symbol, price) in &result.tokens {
        println!("{:<10} ${:<18} {}", symbol, format_usd(price.price_usd), format_route(price));
    }
    if let Some(err) = &result.error {
        println!("warning: {}", err);
    }
    Ok(())
}

pub fn print_single(symbol: &str, result: &SingleTokenPrice, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    match result.price {
        Some(price) => println!("{}: ${}", symbol, format_usd(price)),
        None => println!("{}: unavailable", symbol),
    }
    if let Some(err) = &result.error {
        println!("warning: {}", err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_prices() {
        assert_eq!(format_usd(2500.0), "2500");
        assert_eq!(format_usd(0.123456789), "0.123457");
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::parse_from(["token-pricer", "--network", "base", "price", "--address", "0xabc"]);
        assert_eq!(cli.config.network.as_deref(), Some("base"));
        assert!(matches!(cli.command, Command::Price { decimals: 18, .. }));
    }
}
