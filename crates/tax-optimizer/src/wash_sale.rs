//! Wash Sale Detection
//!
//! Second pass over realized stock losses. A loss is (partly) disallowed when
//! replacement shares were bought within the window around the sale; the
//! disallowed amount is pushed forward into the cost basis of replacement lots
//! that are still open.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::ledger::{ClosedStockPosition, LotId, LotLedger};
use crate::tax_calculator::TaxRules;

/// Window of days around a loss sale in which purchases count as replacements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WashSaleWindow {
    pub sale_date: NaiveDate,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
}

impl WashSaleWindow {
    pub fn around(sale_date: NaiveDate, rules: &TaxRules) -> Self {
        let window_days = Duration::days(rules.wash_sale_window_days as i64);

        Self {
            sale_date,
            window_start: sale_date - window_days,
            window_end: sale_date + window_days,
        }
    }

    /// Inclusive on both ends
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.window_start && date <= self.window_end
    }
}

/// Purchase that replaced shares sold at a loss
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplacementPurchase {
    pub date: NaiveDate,
    pub units: f64,
}

/// Wash-sale details attached to a losing closed position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WashSaleAdjustment {
    pub disallowed_loss: f64,
    pub wash_sale_units: f64,
    pub replacement_purchases: Vec<ReplacementPurchase>,
    /// Raw P&L plus the disallowed loss. Not clamped at zero.
    pub adjusted_pnl: f64,
}

/// Flat wash-sale entry for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WashSaleRecord {
    pub symbol: String,
    pub sale_date: NaiveDate,
    pub original_loss: f64,
    pub disallowed_loss: f64,
    pub wash_sale_units: f64,
    pub adjusted_pnl: f64,
    /// Index of the losing position in the closed stock list
    pub closed_position: usize,
}

/// Disallowed loss carried into an open replacement lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasisAdjustment {
    pub symbol: String,
    pub lot: LotId,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy)]
enum Replacement {
    OpenLot(LotId),
    Closed,
}

/// Output of the detector: annotations for closed positions plus cost-basis
/// deltas for open lots
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WashSaleReport {
    pub annotations: Vec<(usize, WashSaleAdjustment)>,
    pub records: Vec<WashSaleRecord>,
    pub basis_adjustments: Vec<BasisAdjustment>,
}

impl WashSaleReport {
    pub fn total_disallowed(&self) -> f64 {
        self.records.iter().map(|r| r.disallowed_loss).sum()
    }

    /// Write annotations and basis deltas back into the ledger
    pub fn apply_to(&self, ledger: &mut LotLedger) {
        let closed = ledger.closed_stocks_mut();
        for (index, adjustment) in &self.annotations {
            if let Some(position) = closed.get_mut(*index) {
                position.wash_sale = Some(adjustment.clone());
            }
        }

        for delta in &self.basis_adjustments {
            match ledger.stock_lot_mut(&delta.symbol, delta.lot) {
                Some(lot) => {
                    lot.cost_basis += delta.amount;
                    lot.wash_sale_adjustment += delta.amount;
                }
                None => {
                    tracing::warn!("Replacement lot {:?} of {} not found", delta.lot, delta.symbol);
                }
            }
        }
    }
}

/// Finds wash sales over a fully processed ledger
pub struct WashSaleDetector {
    rules: TaxRules,
}

impl WashSaleDetector {
    pub fn new(rules: TaxRules) -> Self {
        Self { rules }
    }

    /// Inspect every losing closed stock position. Option closes are out of
    /// scope.
    pub fn detect(&self, ledger: &LotLedger) -> WashSaleReport {
        let closed = ledger.closed_stocks();
        let mut report = WashSaleReport::default();

        for (index, position) in closed.iter().enumerate() {
            if position.pnl >= 0.0 || position.lot.units <= 0.0 {
                continue;
            }

            let replacements = self.find_replacements(ledger, index, position);
            if replacements.is_empty() {
                continue;
            }

            let total_replacement_units: f64 = replacements.iter().map(|(_, p)| p.units).sum();
            let wash_sale_units = position.lot.units.min(total_replacement_units);
            if wash_sale_units <= 0.0 {
                continue;
            }
            let disallowed_loss = (position.pnl.abs() / position.lot.units) * wash_sale_units;
            let adjusted_pnl = position.pnl + disallowed_loss;

            let adjustment_per_unit = disallowed_loss / total_replacement_units;
            for (kind, purchase) in &replacements {
                if let Replacement::OpenLot(lot) = kind {
                    report.basis_adjustments.push(BasisAdjustment {
                        symbol: position.lot.symbol.clone(),
                        lot: *lot,
                        amount: adjustment_per_unit * purchase.units,
                    });
                }
            }

            tracing::debug!(
                "Wash sale: {} sold {} disallowed {:.2} over {} replacement(s)",
                position.lot.symbol,
                position.sale_date,
                disallowed_loss,
                replacements.len()
            );

            report.annotations.push((
                index,
                WashSaleAdjustment {
                    disallowed_loss,
                    wash_sale_units,
                    replacement_purchases: replacements.iter().map(|(_, p)| *p).collect(),
                    adjusted_pnl,
                },
            ));
            report.records.push(WashSaleRecord {
                symbol: position.lot.symbol.clone(),
                sale_date: position.sale_date,
                original_loss: position.pnl,
                disallowed_loss,
                wash_sale_units,
                adjusted_pnl,
                closed_position: index,
            });
        }

        if !report.records.is_empty() {
            tracing::info!(
                "Detected {} wash sale(s), {:.2} disallowed",
                report.records.len(),
                report.total_disallowed()
            );
        }
        report
    }

    /// Open lots bought inside the window, then other closed positions bought
    /// inside the window strictly after this position's own purchase.
    fn find_replacements(
        &self,
        ledger: &LotLedger,
        index: usize,
        position: &ClosedStockPosition,
    ) -> Vec<(Replacement, ReplacementPurchase)> {
        let window = WashSaleWindow::around(position.sale_date, &self.rules);
        let symbol = &position.lot.symbol;
        let mut replacements = Vec::new();

        if let Some(book) = ledger.stock_books().get(symbol) {
            for (id, lot) in book.lots.iter_open() {
                if window.contains(lot.purchase_date) {
                    replacements.push((
                        Replacement::OpenLot(id),
                        ReplacementPurchase {
                            date: lot.purchase_date,
                            units: lot.units,
                        },
                    ));
                }
            }
        }

        for (other_index, other) in ledger.closed_stocks().iter().enumerate() {
            if other_index == index || &other.lot.symbol != symbol {
                continue;
            }
            if window.contains(other.lot.purchase_date)
                && other.lot.purchase_date > position.lot.purchase_date
            {
                replacements.push((
                    Replacement::Closed,
                    ReplacementPurchase {
                        date: other.lot.purchase_date,
                        units: other.lot.units,
                    },
                ));
            }
        }

        replacements
    }
}

/// Summary of wash sale activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WashSaleSummary {
    /// `None` for all years
    pub tax_year: Option<i32>,
    pub violation_count: usize,
    pub total_disallowed_loss: f64,
    pub affected_symbols: Vec<String>,
}

impl WashSaleSummary {
    /// Summarize records whose sale falls in `year` (or all records)
    pub fn for_year(records: &[WashSaleRecord], year: Option<i32>) -> Self {
        let year_records: Vec<_> = records
            .iter()
            .filter(|r| year.map_or(true, |y| r.sale_date.year() == y))
            .collect();

        let affected_symbols: BTreeSet<_> = year_records.iter().map(|r| r.symbol.clone()).collect();

        Self {
            tax_year: year,
            violation_count: year_records.len(),
            total_disallowed_loss: year_records.iter().map(|r| r.disallowed_loss).sum(),
            affected_symbols: affected_symbols.into_iter().collect(),
        }
    }
}
