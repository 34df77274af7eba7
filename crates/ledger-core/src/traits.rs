use async_trait::async_trait;

use crate::{LedgerResult, PriceMap};

/// Source of last-close prices for equity symbols (network proxy, file, ...)
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn latest_price(&self, symbol: &str) -> LedgerResult<f64>;
}

/// Ask `source` for every symbol and keep whatever came back.
///
/// Failed or negative lookups are logged and left out of the map; the
/// engine treats absent entries as "price unknown". A zero quote is kept.
pub async fn collect_prices<S>(source: &S, symbols: &[String]) -> PriceMap
where
    S: QuoteSource + ?Sized,
{
    let mut prices = PriceMap::new();

    for symbol in symbols {
        match source.latest_price(symbol).await {
            Ok(price) if price >= 0.0 => {
                prices.insert(symbol.clone(), price);
            }
            Ok(price) => {
                tracing::warn!("Ignoring negative quote for {}: {}", symbol, price);
            }
            Err(e) => {
                tracing::warn!("Failed to fetch quote for {}: {}", symbol, e);
            }
        }
    }

    tracing::info!("Collected {}/{} quotes", prices.len(), symbols.len());
    prices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LedgerError;

    struct FixedQuotes;

    #[async_trait]
    impl QuoteSource for FixedQuotes {
        async fn latest_price(&self, symbol: &str) -> LedgerResult<f64> {
            match symbol {
                "AAPL" => Ok(190.0),
                "ZERO" => Ok(0.0),
                "BAD" => Ok(-1.0),
                other => Err(LedgerError::QuoteUnavailable(other.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_collect_prices_tolerates_failures() {
        let symbols: Vec<String> = ["AAPL", "ZERO", "BAD", "MSFT"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let prices = collect_prices(&FixedQuotes, &symbols).await;

        assert_eq!(prices.len(), 2);
        assert_eq!(prices.get("AAPL"), Some(&190.0));
        assert_eq!(prices.get("ZERO"), Some(&0.0));
        assert!(!prices.contains_key("BAD"));
        assert!(!prices.contains_key("MSFT"));
    }
}
