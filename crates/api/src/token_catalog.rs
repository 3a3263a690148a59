//! Token metadata the Batch Planner needs to size transfers and reason
//! about decimals — consumed, not owned, by this service: the catalog
//! is populated out of band and only read from the signing path.

use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
}

#[async_trait]
pub trait TokenLookup: Send + Sync {
    async fn lookup(&self, chain_id: u64, token_address: &str) -> anyhow::Result<Option<TokenInfo>>;
}

/// Fixed in-memory catalog, keyed by `(chain_id, lowercased address)`.
#[derive(Default)]
pub struct StaticTokenCatalog {
    tokens: HashMap<(u64, String), TokenInfo>,
}

impl StaticTokenCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, chain_id: u64, info: TokenInfo) -> Self {
        let key = (chain_id, info.address.to_lowercase());
        self.tokens.insert(key, info);
        self
    }
}

#[async_trait]
impl TokenLookup for StaticTokenCatalog {
    async fn lookup(&self, chain_id: u64, token_address: &str) -> anyhow::Result<Option<TokenInfo>> {
        Ok(self.tokens.get(&(chain_id, token_address.to_lowercase())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let catalog = StaticTokenCatalog::new().with_token(
            1,
            TokenInfo {
                address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".to_string(),
                symbol: "USDC".to_string(),
                decimals: 6,
            },
        );

        let found = catalog
            .lookup(1, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")
            .await
            .unwrap();
        assert_eq!(found.map(|t| t.symbol), Some("USDC".to_string()));
    }

    #[tokio::test]
    async fn lookup_returns_none_for_unknown_token() {
        let catalog = StaticTokenCatalog::new();
        assert!(catalog.lookup(1, "0xdead").await.unwrap().is_none());
    }
}
