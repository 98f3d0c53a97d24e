use crate::types::{Network, ResolvedPrice};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

const HEADER: &str = "timestamp,network,symbol,address,price_usd,route,fee_tier";

/// Append a resolved price row to CSV.
/// If the file does not yet exist it writes a header first.
pub fn append_price(
    timestamp: &str,
    network: Network,
    price: &ResolvedPrice,
    out_path: impl AsRef<Path>,
) -> anyhow::Result<()> {
    let out_path = out_path.as_ref();
    let exists = out_path.exists();
    let mut file = OpenOptions::new().create(true).append(true).open(out_path)?;
    if !exists {
        writeln!(file, "{}", HEADER)?;
    }
    let (route, fee_tier) = match &price.route {
        Some(candidate) => (candidate.role.to_string(), candidate.fee_tier.to_string()),
        None => ("reference".to_string(), String::new()),
    };
    writeln!(
        file,
        "{},{},{},0x{},{},{},{}",
        timestamp,
        network,
        price.symbol,
        hex::encode(price.address),
        price.price_usd,
        route,
        fee_tier
    )?;
    Ok(())
}

/// Appends every price of one batch with a shared timestamp.
pub fn append_prices<'a>(
    timestamp: &str,
    network: Network,
    prices: impl IntoIterator<Item = &'a ResolvedPrice>,
    out_path: impl AsRef<Path>,
) -> anyhow::Result<()> {
    let out_path = out_path.as_ref();
    for price in prices {
        append_price(timestamp, network, price, out_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QuoteRequest, RouteCandidate, RouteRole};
    use alloy_primitives::{Address, U256};
    use chrono::Utc;

    fn weth() -> ResolvedPrice {
        let request =
            QuoteRequest::new(Address::repeat_byte(0xaa), Address::repeat_byte(0xbb), U256::from(1u8), 500).unwrap();
        ResolvedPrice {
            symbol: "WETH".into(),
            address: Address::repeat_byte(0xaa),
            price_usd: 2500.0,
            decimals: 18,
            last_updated: Utc::now(),
            route: Some(RouteCandidate { role: RouteRole::DirectToStable, fee_tier: 500, request }),
        }
    }

    #[test]
    fn writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.csv");
        append_price("t1", Network::Ethereum, &weth(), &path).unwrap();
        append_price("t2", Network::Base, &weth(), &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert_eq!(
            lines[1],
            format!("t1,ethereum,WETH,0x{},2500,direct-to-stable,500", "aa".repeat(20))
        );
        assert!(lines[2].starts_with("t2,base,WETH,"));
    }
}
