//! Tax Calculator
//!
//! Holding-period rules and realized gain/loss aggregation over closed
//! stock and option positions.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::ledger::{ClosedOptionPosition, ClosedStockPosition};
use crate::symbols::{display_symbol, is_option};
use crate::wash_sale::WashSaleRecord;

/// Rule set applied by the ledger and the wash-sale pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxRules {
    /// Wash sale window in days (before and after)
    pub wash_sale_window_days: u32,
    /// Days to qualify for long-term treatment
    pub long_term_threshold_days: u32,
    /// Shares of underlying per option contract
    pub contract_multiplier: f64,
}

impl TaxRules {
    /// U.S. rules: 30-day wash window, one-year holding period, 100-share contracts
    pub fn us() -> Self {
        Self {
            wash_sale_window_days: 30,
            long_term_threshold_days: 365,
            contract_multiplier: 100.0,
        }
    }
}

impl Default for TaxRules {
    fn default() -> Self {
        Self::us()
    }
}

/// Whole days from `from` to `to`
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

/// Holding period classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HoldingPeriod {
    #[serde(rename = "ST")]
    ShortTerm,
    #[serde(rename = "LT")]
    LongTerm,
}

impl HoldingPeriod {
    pub fn from_days(days_held: i64, rules: &TaxRules) -> Self {
        if days_held >= rules.long_term_threshold_days as i64 {
            HoldingPeriod::LongTerm
        } else {
            HoldingPeriod::ShortTerm
        }
    }

    pub fn is_long_term(&self) -> bool {
        matches!(self, HoldingPeriod::LongTerm)
    }
}

impl std::fmt::Display for HoldingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HoldingPeriod::ShortTerm => write!(f, "ST"),
            HoldingPeriod::LongTerm => write!(f, "LT"),
        }
    }
}

/// Type of gain/loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GainType {
    ShortTermGain,
    ShortTermLoss,
    LongTermGain,
    LongTermLoss,
}

impl GainType {
    /// Zero counts as a gain
    pub fn classify(pnl: f64, period: HoldingPeriod) -> Self {
        match (pnl >= 0.0, period.is_long_term()) {
            (true, true) => GainType::LongTermGain,
            (true, false) => GainType::ShortTermGain,
            (false, true) => GainType::LongTermLoss,
            (false, false) => GainType::ShortTermLoss,
        }
    }

    pub fn is_loss(&self) -> bool {
        matches!(self, GainType::ShortTermLoss | GainType::LongTermLoss)
    }

    pub fn is_long_term(&self) -> bool {
        matches!(self, GainType::LongTermGain | GainType::LongTermLoss)
    }
}

/// Common view over realized stock and option closes
pub trait RealizedPosition {
    fn symbol(&self) -> &str;
    fn sale_date(&self) -> NaiveDate;
    fn tax_status(&self) -> HoldingPeriod;
    /// P&L that counts for tax purposes
    fn realized_pnl(&self) -> f64;
    fn has_wash_sale(&self) -> bool;
}

impl RealizedPosition for ClosedStockPosition {
    fn symbol(&self) -> &str {
        &self.lot.symbol
    }

    fn sale_date(&self) -> NaiveDate {
        self.sale_date
    }

    fn tax_status(&self) -> HoldingPeriod {
        self.tax_status
    }

    fn realized_pnl(&self) -> f64 {
        ClosedStockPosition::realized_pnl(self)
    }

    fn has_wash_sale(&self) -> bool {
        self.wash_sale.is_some()
    }
}

impl RealizedPosition for ClosedOptionPosition {
    fn symbol(&self) -> &str {
        &self.lot.symbol
    }

    fn sale_date(&self) -> NaiveDate {
        self.sale_date
    }

    fn tax_status(&self) -> HoldingPeriod {
        self.tax_status
    }

    // Option closes are never wash-sale adjusted
    fn realized_pnl(&self) -> f64 {
        self.pnl
    }

    fn has_wash_sale(&self) -> bool {
        false
    }
}

/// Net realized P&L by holding period, split by asset class
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RealizedTotals {
    pub stock_short_term: f64,
    pub stock_long_term: f64,
    pub option_short_term: f64,
    pub option_long_term: f64,
    /// Stock plus option
    pub short_term: f64,
    pub long_term: f64,
}

/// Per-ticker slice of a year summary. Losses are negative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickerSummary {
    pub short_term_gains: f64,
    pub short_term_losses: f64,
    pub long_term_gains: f64,
    pub long_term_losses: f64,
    pub total_pnl: f64,
    pub has_wash_sale: bool,
    pub is_option: bool,
}

/// Year-end tax summary. Losses are reported as negative amounts, so nets are
/// plain sums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearEndSummary {
    /// `None` covers every year
    pub tax_year: Option<i32>,
    pub short_term_gains: f64,
    pub short_term_losses: f64,
    pub long_term_gains: f64,
    pub long_term_losses: f64,
    pub net_short_term: f64,
    pub net_long_term: f64,
    pub total_net: f64,
    /// Wash sale disallowed losses for sales in the year
    pub wash_sale_disallowed: f64,
    /// Keyed by display symbol
    pub by_ticker: BTreeMap<String, TickerSummary>,
}

/// Realized gain/loss aggregation under a rule set
pub struct TaxCalculator {
    rules: TaxRules,
}

impl TaxCalculator {
    pub fn with_rules(rules: TaxRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &TaxRules {
        &self.rules
    }

    pub fn holding_period(&self, purchase_date: NaiveDate, as_of: NaiveDate) -> HoldingPeriod {
        HoldingPeriod::from_days(days_between(purchase_date, as_of), &self.rules)
    }

    /// Days left before a lot turns long-term, floored at zero
    pub fn days_to_long_term(&self, days_held: i64) -> i64 {
        (self.rules.long_term_threshold_days as i64 - days_held).max(0)
    }

    pub fn realized_totals(
        &self,
        stocks: &[ClosedStockPosition],
        options: &[ClosedOptionPosition],
    ) -> RealizedTotals {
        let (stock_short_term, stock_long_term) = split_by_period(stocks);
        let (option_short_term, option_long_term) = split_by_period(options);

        RealizedTotals {
            stock_short_term,
            stock_long_term,
            option_short_term,
            option_long_term,
            short_term: stock_short_term + option_short_term,
            long_term: stock_long_term + option_long_term,
        }
    }

    /// Distinct sale years across all closes, newest first
    pub fn tax_years(
        &self,
        stocks: &[ClosedStockPosition],
        options: &[ClosedOptionPosition],
    ) -> Vec<i32> {
        let years: BTreeSet<i32> = stocks
            .iter()
            .map(|p| p.sale_date.year())
            .chain(options.iter().map(|p| p.sale_date.year()))
            .collect();
        years.into_iter().rev().collect()
    }

    /// Summary for one tax year, or all years when `tax_year` is `None`
    pub fn year_end_summary(
        &self,
        tax_year: Option<i32>,
        stocks: &[ClosedStockPosition],
        options: &[ClosedOptionPosition],
        wash_sales: &[WashSaleRecord],
    ) -> YearEndSummary {
        let in_year = |date: NaiveDate| tax_year.map_or(true, |y| date.year() == y);

        let positions = stocks
            .iter()
            .map(|p| p as &dyn RealizedPosition)
            .chain(options.iter().map(|p| p as &dyn RealizedPosition))
            .filter(|p| in_year(p.sale_date()));

        let mut short_term_gains = 0.0;
        let mut short_term_losses = 0.0;
        let mut long_term_gains = 0.0;
        let mut long_term_losses = 0.0;
        let mut by_ticker: BTreeMap<String, TickerSummary> = BTreeMap::new();

        for position in positions {
            let pnl = position.realized_pnl();
            let ticker = by_ticker
                .entry(display_symbol(position.symbol()))
                .or_insert_with(|| TickerSummary {
                    is_option: is_option(position.symbol()),
                    ..TickerSummary::default()
                });
            ticker.total_pnl += pnl;
            ticker.has_wash_sale |= position.has_wash_sale();

            match GainType::classify(pnl, position.tax_status()) {
                GainType::ShortTermGain => {
                    short_term_gains += pnl;
                    ticker.short_term_gains += pnl;
                }
                GainType::ShortTermLoss => {
                    short_term_losses += pnl;
                    ticker.short_term_losses += pnl;
                }
                GainType::LongTermGain => {
                    long_term_gains += pnl;
                    ticker.long_term_gains += pnl;
                }
                GainType::LongTermLoss => {
                    long_term_losses += pnl;
                    ticker.long_term_losses += pnl;
                }
            }
        }

        let net_short_term = short_term_gains + short_term_losses;
        let net_long_term = long_term_gains + long_term_losses;

        YearEndSummary {
            tax_year,
            short_term_gains,
            short_term_losses,
            long_term_gains,
            long_term_losses,
            net_short_term,
            net_long_term,
            total_net: net_short_term + net_long_term,
            wash_sale_disallowed: wash_sales
                .iter()
                .filter(|w| in_year(w.sale_date))
                .map(|w| w.disallowed_loss)
                .sum(),
            by_ticker,
        }
    }
}

fn split_by_period<P: RealizedPosition>(positions: &[P]) -> (f64, f64) {
    positions.iter().fold((0.0, 0.0), |(st, lt), p| {
        if p.tax_status().is_long_term() {
            (st, lt + p.realized_pnl())
        } else {
            (st + p.realized_pnl(), lt)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CloseType, OptionLot, StockLot};
    use crate::symbols::{Expiry, OptionType};
    use crate::wash_sale::WashSaleAdjustment;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn closed_stock(symbol: &str, sold: NaiveDate, pnl: f64, status: HoldingPeriod) -> ClosedStockPosition {
        ClosedStockPosition {
            lot: StockLot {
                symbol: symbol.to_string(),
                purchase_date: sold - Duration::days(10),
                units: 1.0,
                cost_basis: 100.0,
                unit_price: 100.0,
                provenance: None,
                wash_sale_adjustment: 0.0,
            },
            sale_date: sold,
            sale_price: 100.0 + pnl,
            proceeds: 100.0 + pnl,
            pnl,
            days_held: 10,
            tax_status: status,
            wash_sale: None,
        }
    }

    fn closed_option(symbol: &str, sold: NaiveDate, pnl: f64, status: HoldingPeriod) -> ClosedOptionPosition {
        ClosedOptionPosition {
            lot: OptionLot {
                symbol: symbol.to_string(),
                underlying: "AAPL".to_string(),
                option_type: OptionType::Call,
                strike: 200.0,
                expiration: Expiry {
                    year: 2025,
                    month: 1,
                    day: 17,
                },
                purchase_date: sold - Duration::days(10),
                contracts: 1.0,
                cost_basis: 300.0,
                premium: 0.0,
                is_short: false,
                unit_price: 3.0,
            },
            sale_date: sold,
            sale_price: 0.0,
            proceeds: 300.0 + pnl,
            close_cost: None,
            pnl,
            days_held: 10,
            tax_status: status,
            close_type: CloseType::SellToClose,
        }
    }

    #[test]
    fn test_tax_rules_us() {
        let rules = TaxRules::us();
        assert_eq!(rules.wash_sale_window_days, 30);
        assert_eq!(rules.long_term_threshold_days, 365);
        assert_eq!(rules.contract_multiplier, 100.0);
        assert_eq!(TaxRules::default(), rules);
        assert_eq!(*TaxCalculator::with_rules(rules).rules(), rules);
    }

    #[test]
    fn test_gain_type_classify() {
        let lt_loss = GainType::classify(-10.0, HoldingPeriod::LongTerm);
        assert_eq!(lt_loss, GainType::LongTermLoss);
        assert!(lt_loss.is_loss());
        assert!(lt_loss.is_long_term());

        let st_even = GainType::classify(0.0, HoldingPeriod::ShortTerm);
        assert_eq!(st_even, GainType::ShortTermGain);
        assert!(!st_even.is_loss());
        assert!(!st_even.is_long_term());
    }

    #[test]
    fn test_holding_period_boundary() {
        let calc = TaxCalculator::with_rules(TaxRules::us());
        let purchase = date(2023, 1, 1);

        assert_eq!(calc.holding_period(purchase, purchase + Duration::days(364)), HoldingPeriod::ShortTerm);
        assert_eq!(calc.holding_period(purchase, purchase + Duration::days(365)), HoldingPeriod::LongTerm);
        assert_eq!(calc.days_to_long_term(300), 65);
        assert_eq!(calc.days_to_long_term(400), 0);
    }

    #[test]
    fn test_realized_totals_use_adjusted_pnl() {
        let calc = TaxCalculator::with_rules(TaxRules::us());
        let mut washed = closed_stock("AAPL", date(2024, 3, 1), -200.0, HoldingPeriod::ShortTerm);
        washed.wash_sale = Some(WashSaleAdjustment {
            disallowed_loss: 150.0,
            wash_sale_units: 1.0,
            replacement_purchases: Vec::new(),
            adjusted_pnl: -50.0,
        });
        let stocks = vec![
            washed,
            closed_stock("MSFT", date(2024, 5, 1), 120.0, HoldingPeriod::LongTerm),
        ];
        let options = vec![closed_option("AAPL250117C00200000", date(2024, 6, 1), 80.0, HoldingPeriod::ShortTerm)];

        let totals = calc.realized_totals(&stocks, &options);
        assert_relative_eq!(totals.stock_short_term, -50.0);
        assert_relative_eq!(totals.stock_long_term, 120.0);
        assert_relative_eq!(totals.option_short_term, 80.0);
        assert_relative_eq!(totals.short_term, 30.0);
        assert_relative_eq!(totals.long_term, 120.0);
    }

    #[test]
    fn test_tax_years_descending() {
        let calc = TaxCalculator::with_rules(TaxRules::us());
        let stocks = vec![
            closed_stock("AAPL", date(2023, 3, 1), 10.0, HoldingPeriod::ShortTerm),
            closed_stock("AAPL", date(2024, 3, 1), 10.0, HoldingPeriod::ShortTerm),
        ];
        let options = vec![closed_option("AAPL250117C00200000", date(2025, 1, 17), -300.0, HoldingPeriod::ShortTerm)];

        assert_eq!(calc.tax_years(&stocks, &options), vec![2025, 2024, 2023]);
        assert!(calc.tax_years(&[], &[]).is_empty());
    }

    #[test]
    fn test_year_end_summary() {
        let calc = TaxCalculator::with_rules(TaxRules::us());
        let stocks = vec![
            closed_stock("AAPL", date(2024, 3, 1), -200.0, HoldingPeriod::ShortTerm),
            closed_stock("AAPL", date(2024, 4, 1), 50.0, HoldingPeriod::ShortTerm),
            closed_stock("MSFT", date(2024, 5, 1), 300.0, HoldingPeriod::LongTerm),
            closed_stock("MSFT", date(2023, 5, 1), 999.0, HoldingPeriod::LongTerm),
        ];
        let options = vec![closed_option("AAPL250117C00200000", date(2024, 6, 1), -100.0, HoldingPeriod::LongTerm)];
        let wash_sales = vec![WashSaleRecord {
            symbol: "AAPL".to_string(),
            sale_date: date(2024, 3, 1),
            original_loss: -200.0,
            disallowed_loss: 40.0,
            wash_sale_units: 1.0,
            adjusted_pnl: -160.0,
            closed_position: 0,
        }];

        let summary = calc.year_end_summary(Some(2024), &stocks, &options, &wash_sales);
        assert_relative_eq!(summary.short_term_gains, 50.0);
        assert_relative_eq!(summary.short_term_losses, -200.0);
        assert_relative_eq!(summary.long_term_gains, 300.0);
        assert_relative_eq!(summary.long_term_losses, -100.0);
        assert_relative_eq!(summary.net_short_term, -150.0);
        assert_relative_eq!(summary.net_long_term, 200.0);
        assert_relative_eq!(summary.total_net, 50.0);
        assert_relative_eq!(summary.wash_sale_disallowed, 40.0);

        assert_eq!(summary.by_ticker.len(), 3);
        let option = &summary.by_ticker["AAPL Jan 17, 25 $200 CALL"];
        assert!(option.is_option);
        assert_relative_eq!(option.long_term_losses, -100.0);
        assert_relative_eq!(summary.by_ticker["AAPL"].total_pnl, -150.0);

        let all = calc.year_end_summary(None, &stocks, &options, &wash_sales);
        assert_relative_eq!(all.long_term_gains, 1299.0);
    }
}
