//! Open Position Views
//!
//! Read-only projections of the ledger's open books: per-symbol equity and
//! option positions priced against a quote map, and the tax-lot listing that
//! groups long-term lots by symbol.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use ledger_core::PriceMap;
use serde::{Deserialize, Serialize};

use crate::ledger::{LotId, LotLedger, OptionLot, StockLot};
use crate::symbols::{display_symbol, Expiry, OptionType};
use crate::tax_calculator::{days_between, HoldingPeriod, TaxCalculator};

/// Positions at or below this many units are treated as closed
pub const MIN_OPEN_UNITS: f64 = 0.0001;

/// Open stock lot as of a date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenLot {
    pub id: LotId,
    #[serde(flatten)]
    pub lot: StockLot,
    pub days_held: i64,
    pub tax_status: HoldingPeriod,
    pub days_to_long_term: i64,
}

/// Open equity position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPosition {
    pub symbol: String,
    pub total_units: f64,
    pub total_cost: f64,
    /// 0 when no quote is available
    pub current_price: f64,
    pub has_price: bool,
    pub total_value: f64,
    pub unrealized_pnl: f64,
    pub wash_sale_adjustment: f64,
    pub lots: Vec<OpenLot>,
}

/// Open option position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionPosition {
    pub symbol: String,
    pub display_name: String,
    pub underlying: String,
    pub option_type: OptionType,
    pub strike: f64,
    pub expiration: Expiry,
    pub total_contracts: f64,
    pub total_cost: f64,
    pub total_premium: f64,
    pub is_short: bool,
    pub lots: Vec<OptionLot>,
}

/// Price for `symbol` when the map has an entry, zero included
pub fn quoted_price(prices: &PriceMap, symbol: &str) -> Option<f64> {
    prices.get(symbol).copied()
}

/// Equity positions holding more than [`MIN_OPEN_UNITS`], by symbol
pub fn equity_positions(
    ledger: &LotLedger,
    prices: &PriceMap,
    as_of: NaiveDate,
    calculator: &TaxCalculator,
) -> Vec<EquityPosition> {
    ledger
        .stock_books()
        .iter()
        .filter(|(_, book)| book.total_units > MIN_OPEN_UNITS)
        .map(|(symbol, book)| {
            let lots: Vec<OpenLot> = book
                .lots
                .iter_open()
                .map(|(id, lot)| {
                    let days_held = days_between(lot.purchase_date, as_of);
                    OpenLot {
                        id,
                        lot: lot.clone(),
                        days_held,
                        tax_status: calculator.holding_period(lot.purchase_date, as_of),
                        days_to_long_term: calculator.days_to_long_term(days_held),
                    }
                })
                .collect();

            let price = quoted_price(prices, symbol);
            let current_price = price.unwrap_or(0.0);
            let total_cost = book.total_cost();
            let total_value = book.total_units * current_price;

            EquityPosition {
                symbol: symbol.clone(),
                total_units: book.total_units,
                total_cost,
                current_price,
                has_price: price.is_some(),
                total_value,
                unrealized_pnl: total_value - total_cost,
                wash_sale_adjustment: lots.iter().map(|l| l.lot.wash_sale_adjustment).sum(),
                lots,
            }
        })
        .collect()
}

/// Option positions with open contracts, by symbol
pub fn option_positions(ledger: &LotLedger) -> Vec<OptionPosition> {
    ledger
        .option_books()
        .iter()
        .filter(|(_, book)| book.total_contracts > 0.0)
        .filter_map(|(symbol, book)| {
            let lots: Vec<OptionLot> = book.lots.iter_open().map(|(_, lot)| lot.clone()).collect();
            let first = lots.first()?;

            Some(OptionPosition {
                symbol: symbol.clone(),
                display_name: display_symbol(symbol),
                underlying: first.underlying.clone(),
                option_type: first.option_type,
                strike: first.strike,
                expiration: first.expiration,
                total_contracts: book.total_contracts,
                total_cost: lots.iter().map(|l| l.cost_basis).sum(),
                total_premium: lots.iter().map(|l| l.premium).sum(),
                is_short: book.is_short,
                lots,
            })
        })
        .collect()
}

/// Which lots the tax-lot listing shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotFilter {
    #[default]
    All,
    ShortTerm,
    LongTerm,
}

impl std::str::FromStr for LotFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(LotFilter::All),
            "st" | "short_term" => Ok(LotFilter::ShortTerm),
            "lt" | "long_term" => Ok(LotFilter::LongTerm),
            other => Err(format!("unknown lot filter: {}", other)),
        }
    }
}

/// Long-term lots of one symbol rolled into a single row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermGroup {
    pub symbol: String,
    pub units: f64,
    pub cost_basis: f64,
    pub lot_count: usize,
    pub oldest_date: NaiveDate,
    pub days_held: i64,
    pub wash_sale_adjustment: f64,
    pub current_price: f64,
    /// Absent without a quote
    pub unrealized_pnl: Option<f64>,
}

/// Short-term lot listed on its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortTermLot {
    #[serde(flatten)]
    pub lot: OpenLot,
    pub current_price: f64,
    pub unrealized_pnl: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LotGrouping {
    pub short_term: Vec<ShortTermLot>,
    pub long_term: Vec<LongTermGroup>,
}

/// Short-term lots individually, long-term lots grouped per symbol
pub fn group_lots(positions: &[EquityPosition], as_of: NaiveDate, filter: LotFilter) -> LotGrouping {
    let mut short_term = Vec::new();
    let mut groups: BTreeMap<&str, LongTermGroup> = BTreeMap::new();

    let lots = positions.iter().flat_map(|p| {
        let price = p.has_price.then_some(p.current_price);
        p.lots.iter().map(move |open| (open, price))
    });

    for (open, price) in lots {
        if open.tax_status.is_long_term() {
            let group = groups
                .entry(open.lot.symbol.as_str())
                .or_insert_with(|| LongTermGroup {
                    symbol: open.lot.symbol.clone(),
                    units: 0.0,
                    cost_basis: 0.0,
                    lot_count: 0,
                    oldest_date: open.lot.purchase_date,
                    days_held: 0,
                    wash_sale_adjustment: 0.0,
                    current_price: price.unwrap_or(0.0),
                    unrealized_pnl: None,
                });
            group.units += open.lot.units;
            group.cost_basis += open.lot.cost_basis;
            group.lot_count += 1;
            group.wash_sale_adjustment += open.lot.wash_sale_adjustment;
            group.oldest_date = group.oldest_date.min(open.lot.purchase_date);
            group.unrealized_pnl = price.map(|p| group.units * p - group.cost_basis);
        } else {
            short_term.push(ShortTermLot {
                lot: open.clone(),
                current_price: price.unwrap_or(0.0),
                unrealized_pnl: price.map(|p| open.lot.units * p - open.lot.cost_basis),
            });
        }
    }

    let long_term = groups
        .into_values()
        .map(|mut group| {
            group.days_held = days_between(group.oldest_date, as_of);
            group
        })
        .collect();

    match filter {
        LotFilter::All => LotGrouping {
            short_term,
            long_term,
        },
        LotFilter::ShortTerm => LotGrouping {
            short_term,
            long_term: Vec::new(),
        },
        LotFilter::LongTerm => LotGrouping {
            short_term: Vec::new(),
            long_term,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corporate_actions::CorporateActions;
    use crate::normalizer::NormalizedTransaction;
    use crate::tax_calculator::TaxRules;
    use approx::assert_relative_eq;
    use ledger_core::Transaction;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ledger_from(rows: &[(NaiveDate, &str, &str, f64, f64)]) -> LotLedger {
        let mut ledger = LotLedger::new(TaxRules::us());
        for &(on, symbol, kind, units, amount) in rows {
            let tx = Transaction {
                date: on,
                symbol: symbol.to_string(),
                transaction_type: kind.to_string(),
                units,
                unit_price: 0.0,
                amount,
            };
            ledger.apply_transaction(
                &NormalizedTransaction::from_transaction(&tx, &[]),
                &CorporateActions::default(),
            );
        }
        ledger
    }

    fn calculator() -> TaxCalculator {
        TaxCalculator::with_rules(TaxRules::us())
    }

    #[test]
    fn test_equity_position_pricing() {
        let ledger = ledger_from(&[
            (date(2023, 1, 2), "AAPL", "Buy", 10.0, -1500.0),
            (date(2024, 6, 1), "AAPL", "Buy", 5.0, -1000.0),
            (date(2024, 1, 2), "MSFT", "Buy", 2.0, -700.0),
        ]);
        let prices = PriceMap::from([("AAPL".to_string(), 180.0)]);
        let positions = equity_positions(&ledger, &prices, date(2024, 7, 1), &calculator());

        assert_eq!(positions.len(), 2);
        let aapl = &positions[0];
        assert_eq!(aapl.symbol, "AAPL");
        assert!(aapl.has_price);
        assert_relative_eq!(aapl.total_value, 2700.0);
        assert_relative_eq!(aapl.unrealized_pnl, 200.0);
        assert_eq!(aapl.lots[0].tax_status, HoldingPeriod::LongTerm);
        assert_eq!(aapl.lots[0].days_to_long_term, 0);
        assert_eq!(aapl.lots[1].days_held, 30);
        assert_eq!(aapl.lots[1].days_to_long_term, 335);

        let msft = &positions[1];
        assert!(!msft.has_price);
        assert_eq!(msft.current_price, 0.0);
        assert_relative_eq!(msft.unrealized_pnl, -700.0);
    }

    #[test]
    fn test_closed_out_symbols_are_hidden() {
        let ledger = ledger_from(&[
            (date(2024, 1, 2), "AMD", "Buy", 3.0, -300.0),
            (date(2024, 2, 2), "AMD", "Sell", -3.0, 330.0),
        ]);
        assert!(equity_positions(&ledger, &PriceMap::new(), date(2024, 3, 1), &calculator()).is_empty());
    }

    #[test]
    fn test_zero_quote_counts_as_priced() {
        let ledger = ledger_from(&[(date(2022, 1, 3), "DEAD", "Buy", 10.0, -100.0)]);
        let prices = PriceMap::from([("DEAD".to_string(), 0.0)]);
        let as_of = date(2024, 7, 1);
        let positions = equity_positions(&ledger, &prices, as_of, &calculator());

        assert!(positions[0].has_price);
        assert_eq!(positions[0].current_price, 0.0);
        assert_relative_eq!(positions[0].unrealized_pnl, -100.0);

        let lots = group_lots(&positions, as_of, LotFilter::LongTerm);
        assert_relative_eq!(lots.long_term[0].unrealized_pnl.unwrap(), -100.0);
    }

    #[test]
    fn test_option_positions() {
        let ledger = ledger_from(&[
            (date(2024, 3, 1), "AAPL250117C00200000", "Sell to Open", -2.0, 640.0),
            (date(2024, 3, 2), "SPY240621P00500000", "BTO", 1.0, -250.0),
            (date(2024, 3, 3), "SPY240621P00500000", "STC", -1.0, 300.0),
        ]);
        let positions = option_positions(&ledger);

        assert_eq!(positions.len(), 1);
        let call = &positions[0];
        assert_eq!(call.display_name, "AAPL Jan 17, 25 $200 CALL");
        assert!(call.is_short);
        assert_relative_eq!(call.total_contracts, 2.0);
        assert_relative_eq!(call.total_premium, 640.0);
        assert_relative_eq!(call.total_cost, 0.0);
    }

    #[test]
    fn test_lot_grouping() {
        let ledger = ledger_from(&[
            (date(2022, 5, 1), "AAPL", "Buy", 10.0, -1500.0),
            (date(2022, 9, 1), "AAPL", "Buy", 5.0, -800.0),
            (date(2024, 6, 1), "AAPL", "Buy", 2.0, -400.0),
        ]);
        let prices = PriceMap::from([("AAPL".to_string(), 190.0)]);
        let as_of = date(2024, 7, 1);
        let positions = equity_positions(&ledger, &prices, as_of, &calculator());

        let all = group_lots(&positions, as_of, LotFilter::All);
        assert_eq!(all.long_term.len(), 1);
        assert_eq!(all.short_term.len(), 1);

        let group = &all.long_term[0];
        assert_eq!(group.lot_count, 2);
        assert_relative_eq!(group.units, 15.0);
        assert_relative_eq!(group.cost_basis, 2300.0);
        assert_eq!(group.oldest_date, date(2022, 5, 1));
        assert_relative_eq!(group.unrealized_pnl.unwrap(), 550.0);
        assert_relative_eq!(all.short_term[0].unrealized_pnl.unwrap(), -20.0);

        let st_only = group_lots(&positions, as_of, LotFilter::ShortTerm);
        assert!(st_only.long_term.is_empty());

        let unpriced = equity_positions(&ledger, &PriceMap::new(), as_of, &calculator());
        let lt_only = group_lots(&unpriced, as_of, LotFilter::LongTerm);
        assert!(lt_only.short_term.is_empty());
        assert!(lt_only.long_term[0].unrealized_pnl.is_none());
    }

    #[test]
    fn test_lot_filter_from_str() {
        assert_eq!("lt".parse::<LotFilter>().unwrap(), LotFilter::LongTerm);
        assert_eq!("ST".parse::<LotFilter>().unwrap(), LotFilter::ShortTerm);
        assert!("weekly".parse::<LotFilter>().is_err());
    }
}
