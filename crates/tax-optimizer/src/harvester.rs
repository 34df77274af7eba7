//! Tax-Loss Harvesting
//!
//! Ranks open equity positions whose quoted value is below cost basis.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::positions::EquityPosition;
use crate::tax_calculator::{days_between, TaxRules};

/// A tax-loss harvesting candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestOpportunity {
    pub symbol: String,
    pub total_units: f64,
    pub current_price: f64,
    pub cost_basis: f64,
    /// Negative
    pub unrealized_pnl: f64,
    pub lot_count: usize,
    /// Some open lot was bought inside the wash-sale window before the
    /// as-of date, so selling everything now would wash part of the loss
    pub wash_sale_risk: bool,
    /// First day a repurchase no longer washes a sale made on the as-of date
    pub wash_sale_safe_date: NaiveDate,
}

/// Harvesting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestingConfig {
    /// Maximum number of opportunities to return
    pub max_opportunities: usize,
}

impl Default for HarvestingConfig {
    fn default() -> Self {
        Self {
            max_opportunities: 10,
        }
    }
}

pub struct HarvestingEngine {
    rules: TaxRules,
    config: HarvestingConfig,
}

impl HarvestingEngine {
    pub fn new(rules: TaxRules) -> Self {
        Self {
            rules,
            config: HarvestingConfig::default(),
        }
    }

    pub fn with_config(rules: TaxRules, config: HarvestingConfig) -> Self {
        Self { rules, config }
    }

    /// Priced positions with a negative unrealized P&L, largest loss first
    pub fn find_opportunities(
        &self,
        positions: &[EquityPosition],
        as_of: NaiveDate,
    ) -> Vec<HarvestOpportunity> {
        let window = self.rules.wash_sale_window_days as i64;

        let mut opportunities: Vec<HarvestOpportunity> = positions
            .iter()
            .filter(|p| p.has_price && p.unrealized_pnl < 0.0)
            .map(|p| HarvestOpportunity {
                symbol: p.symbol.clone(),
                total_units: p.total_units,
                current_price: p.current_price,
                cost_basis: p.total_cost,
                unrealized_pnl: p.unrealized_pnl,
                lot_count: p.lots.len(),
                wash_sale_risk: p.lots.iter().any(|l| {
                    let age = days_between(l.lot.purchase_date, as_of);
                    (0..=window).contains(&age)
                }),
                wash_sale_safe_date: as_of + Duration::days(window + 1),
            })
            .collect();

        // Stable: ties keep symbol order
        opportunities.sort_by(|a, b| a.unrealized_pnl.total_cmp(&b.unrealized_pnl));
        opportunities.truncate(self.config.max_opportunities);

        tracing::debug!("{} harvest candidate(s)", opportunities.len());
        opportunities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LotId, StockLot};
    use crate::positions::OpenLot;
    use crate::tax_calculator::HoldingPeriod;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn position(symbol: &str, pnl: f64, has_price: bool, bought: NaiveDate) -> EquityPosition {
        EquityPosition {
            symbol: symbol.to_string(),
            total_units: 10.0,
            total_cost: 1000.0,
            current_price: if has_price { (1000.0 + pnl) / 10.0 } else { 0.0 },
            has_price,
            total_value: if has_price { 1000.0 + pnl } else { 0.0 },
            unrealized_pnl: pnl,
            wash_sale_adjustment: 0.0,
            lots: vec![OpenLot {
                id: LotId(0),
                lot: StockLot {
                    symbol: symbol.to_string(),
                    purchase_date: bought,
                    units: 10.0,
                    cost_basis: 1000.0,
                    unit_price: 100.0,
                    provenance: None,
                    wash_sale_adjustment: 0.0,
                },
                days_held: 0,
                tax_status: HoldingPeriod::ShortTerm,
                days_to_long_term: 365,
            }],
        }
    }

    #[test]
    fn test_ranks_losses_ascending() {
        let old = date(2023, 1, 1);
        let positions = vec![
            position("AAPL", -50.0, true, old),
            position("MSFT", -300.0, true, old),
            position("NVDA", 400.0, true, old),
            position("TSLA", -900.0, false, old),
        ];
        let engine = HarvestingEngine::new(TaxRules::us());
        let found = engine.find_opportunities(&positions, date(2024, 11, 1));

        let symbols: Vec<_> = found.iter().map(|o| o.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["MSFT", "AAPL"]);
        assert_eq!(found[0].wash_sale_safe_date, date(2024, 12, 2));
        assert!(!found[0].wash_sale_risk);
    }

    #[test]
    fn test_zero_quote_is_a_candidate() {
        let positions = vec![position("DEAD", -1000.0, true, date(2023, 1, 1))];
        let engine = HarvestingEngine::new(TaxRules::us());
        let found = engine.find_opportunities(&positions, date(2024, 11, 1));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].current_price, 0.0);
        assert_eq!(found[0].unrealized_pnl, -1000.0);
    }

    #[test]
    fn test_respects_limit() {
        let positions: Vec<_> = (0..15)
            .map(|i| position(&format!("S{:02}", i), -(i as f64) - 1.0, true, date(2023, 1, 1)))
            .collect();
        let engine = HarvestingEngine::new(TaxRules::us());
        let found = engine.find_opportunities(&positions, date(2024, 11, 1));

        assert_eq!(found.len(), 10);
        assert_eq!(found[0].symbol, "S14");

        let small = HarvestingEngine::with_config(
            TaxRules::us(),
            HarvestingConfig {
                max_opportunities: 3,
            },
        );
        assert_eq!(small.find_opportunities(&positions, date(2024, 11, 1)).len(), 3);
    }

    #[test]
    fn test_recent_purchase_flags_wash_risk() {
        let positions = vec![position("AAPL", -50.0, true, date(2024, 10, 15))];
        let engine = HarvestingEngine::new(TaxRules::us());
        let found = engine.find_opportunities(&positions, date(2024, 11, 1));

        assert!(found[0].wash_sale_risk);
    }
}
