//! Corporate Action Adjustments
//!
//! Rescales purchase quantities for splits and ticker-change share ratios that
//! took effect after the purchase. Dollars invested are never rescaled.

use chrono::NaiveDate;
use ledger_core::{StockSplit, TickerChange};
use serde::{Deserialize, Serialize};

/// Purchase quantity expressed in post-action units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdjustedQuantity {
    pub units: f64,
    pub unit_price: f64,
}

/// Splits and ticker changes in effect for one recomputation
#[derive(Debug, Clone, Copy, Default)]
pub struct CorporateActions<'a> {
    pub splits: &'a [StockSplit],
    pub ticker_changes: &'a [TickerChange],
}

impl<'a> CorporateActions<'a> {
    pub fn new(splits: &'a [StockSplit], ticker_changes: &'a [TickerChange]) -> Self {
        Self {
            splits,
            ticker_changes,
        }
    }

    pub fn adjust_purchase(
        &self,
        symbol: &str,
        purchase_date: NaiveDate,
        units: f64,
        unit_price: f64,
    ) -> AdjustedQuantity {
        adjust_purchase(
            symbol,
            purchase_date,
            units,
            unit_price,
            self.splits,
            self.ticker_changes,
        )
    }
}

/// Apply every split, then every ticker change, effective strictly after
/// `purchase_date`. Ratios compound multiplicatively in list order.
pub fn adjust_purchase(
    symbol: &str,
    purchase_date: NaiveDate,
    units: f64,
    unit_price: f64,
    splits: &[StockSplit],
    changes: &[TickerChange],
) -> AdjustedQuantity {
    let split_ratios = splits
        .iter()
        .filter(|s| s.symbol == symbol && s.date > purchase_date)
        .map(|s| s.ratio);
    let change_ratios = changes
        .iter()
        .filter(|c| c.new_symbol == symbol && c.date > purchase_date)
        .map(|c| c.ratio);

    split_ratios.chain(change_ratios).fold(
        AdjustedQuantity { units, unit_price },
        |acc, ratio| AdjustedQuantity {
            units: acc.units * ratio,
            unit_price: acc.unit_price / ratio,
        },
    )
}
