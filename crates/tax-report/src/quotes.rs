//! Quote file source: a JSON object of `{"SYMBOL": price}` read once at startup.

use std::path::Path;

use async_trait::async_trait;
use ledger_core::{LedgerError, LedgerResult, PriceMap, QuoteSource};

pub struct FileQuoteSource {
    prices: PriceMap,
}

impl FileQuoteSource {
    pub fn load(path: &Path) -> LedgerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> LedgerResult<Self> {
        let prices: PriceMap = serde_json::from_str(text)?;
        Ok(Self {
            prices: prices
                .into_iter()
                .map(|(symbol, price)| (symbol.trim().to_uppercase(), price))
                .collect(),
        })
    }
}

#[async_trait]
impl QuoteSource for FileQuoteSource {
    async fn latest_price(&self, symbol: &str) -> LedgerResult<f64> {
        self.prices
            .get(&symbol.to_uppercase())
            .copied()
            .ok_or_else(|| LedgerError::QuoteUnavailable(symbol.to_string()))
    }
}
