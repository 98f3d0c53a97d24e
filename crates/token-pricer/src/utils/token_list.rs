use crate::types::{Network, TokenDescriptor};
use anyhow::anyhow;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TokenEntry {
    symbol: String,
    address: String,
    decimals: u8,
    /// Entries without a network apply to every network.
    network: Option<Network>,
}

/// Load a token list from a JSON `[{...}]` or TOML `[[tokens]]` file.
/// Accepts absolute or relative path. Only entries for `network` (or without
/// a network) are returned.
pub fn load_token_list<P: AsRef<std::path::Path>>(path: P, network: Network) -> anyhow::Result<Vec<TokenDescriptor>> {
    let text = std::fs::read_to_string(&path)
        .map_err(|e| anyhow!("unable to read token list {}: {}", path.as_ref().display(), e))?;
    parse_token_list(&text, network)
        .map_err(|e| anyhow!("token list {}: {}", path.as_ref().display(), e))
}

pub fn parse_token_list(text: &str, network: Network) -> anyhow::Result<Vec<TokenDescriptor>> {
    // 1. Try JSON array
    let entries = match serde_json::from_str::<Vec<TokenEntry>>(text) {
        Ok(entries) => entries,
        Err(_) => {
            // 2. Try TOML with wrapper
            #[derive(Deserialize)]
            struct Wrapper {
                tokens: Vec<TokenEntry>,
            }
            let wrapper: Wrapper =
                toml::from_str(text).map_err(|e| anyhow!("neither a JSON array nor TOML: {}", e))?;
            wrapper.tokens
        }
    };

    entries
        .into_iter()
        .filter(|e| e.network.map_or(true, |n| n == network))
        .map(|e| {
            TokenDescriptor::new(e.symbol.clone(), &e.address, e.decimals)
                .map_err(|err| anyhow!("{}: {}", e.symbol, err))
        })
        .collect()
}
