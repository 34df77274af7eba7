//! Tax Engine
//!
//! Full recomputation from the immutable inputs: ledger pass, then wash-sale
//! pass, then aggregation. Identical inputs produce identical reports.

use chrono::NaiveDate;
use ledger_core::{PriceMap, StockSplit, TickerChange, Transaction};
use serde::{Deserialize, Serialize};

use crate::corporate_actions::CorporateActions;
use crate::harvester::{HarvestOpportunity, HarvestingConfig, HarvestingEngine};
use crate::ledger::{ClosedOptionPosition, ClosedStockPosition, LotLedger, Outcome};
use crate::normalizer::{normalize_type, CanonicalType, NormalizedTransaction};
use crate::positions::{self, EquityPosition, LotFilter, LotGrouping, OptionPosition};
use crate::tax_calculator::{RealizedTotals, TaxCalculator, TaxRules, YearEndSummary};
use crate::wash_sale::{WashSaleDetector, WashSaleRecord};

/// Everything one recomputation depends on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInput {
    /// Any order; sorted by date internally
    pub transactions: Vec<Transaction>,
    pub stock_splits: Vec<StockSplit>,
    pub ticker_changes: Vec<TickerChange>,
    pub current_prices: PriceMap,
    /// Date open lots are aged against
    pub as_of: NaiveDate,
}

/// How one input row was handled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    /// Position in the caller's transaction list
    pub index: usize,
    pub date: NaiveDate,
    /// Symbol after ticker-change redirection
    pub symbol: String,
    pub transaction_type: CanonicalType,
    pub outcome: Outcome,
}

/// Derived view of the ledger as of a date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxReport {
    pub as_of: NaiveDate,
    pub transaction_count: usize,
    /// Rows dropped for an empty symbol or type
    pub skipped_rows: usize,
    pub degraded_count: usize,
    pub outcomes: Vec<TransactionOutcome>,
    pub open_positions: Vec<EquityPosition>,
    pub open_options: Vec<OptionPosition>,
    pub closed_positions: Vec<ClosedStockPosition>,
    pub closed_options: Vec<ClosedOptionPosition>,
    pub realized: RealizedTotals,
    pub wash_sales: Vec<WashSaleRecord>,
    pub total_disallowed_loss: f64,
    /// Σ unrealized P&L over open equity positions
    pub total_unrealized_pnl: f64,
    /// Newest first
    pub tax_years: Vec<i32>,
    pub harvest_opportunities: Vec<HarvestOpportunity>,
}

pub struct TaxEngine {
    rules: TaxRules,
    harvesting: HarvestingConfig,
}

impl Default for TaxEngine {
    fn default() -> Self {
        Self::new(TaxRules::us())
    }
}

impl TaxEngine {
    pub fn new(rules: TaxRules) -> Self {
        Self {
            rules,
            harvesting: HarvestingConfig::default(),
        }
    }

    pub fn with_harvesting(mut self, config: HarvestingConfig) -> Self {
        self.harvesting = config;
        self
    }

    pub fn rules(&self) -> &TaxRules {
        &self.rules
    }

    /// Rebuild every position from scratch. Never fails; degraded rows are
    /// reported in [`TaxReport::outcomes`].
    pub fn run(&self, input: &EngineInput) -> TaxReport {
        let calculator = TaxCalculator::with_rules(self.rules);
        let actions = CorporateActions::new(&input.stock_splits, &input.ticker_changes);

        let mut rows: Vec<(usize, &Transaction)> = input
            .transactions
            .iter()
            .enumerate()
            .filter(|(_, tx)| !tx.symbol.is_empty() && !tx.transaction_type.is_empty())
            .collect();
        let skipped_rows = input.transactions.len() - rows.len();
        // Stable, so same-day rows keep input order
        rows.sort_by_key(|(_, tx)| tx.date);

        let mut ledger = LotLedger::new(self.rules);
        let mut outcomes = Vec::with_capacity(rows.len());

        for (index, tx) in rows {
            let normalized = NormalizedTransaction::from_transaction(tx, &input.ticker_changes);
            let outcome = ledger.apply_transaction(&normalized, &actions);

            if let Outcome::Degraded { degradation } = &outcome {
                tracing::warn!(
                    "Row {} ({} {} {}): {}",
                    index,
                    tx.date,
                    normalized.symbol,
                    tx.transaction_type,
                    degradation
                );
            }

            outcomes.push(TransactionOutcome {
                index,
                date: tx.date,
                symbol: normalized.symbol,
                transaction_type: normalize_type(&tx.transaction_type),
                outcome,
            });
        }

        let wash_sales = WashSaleDetector::new(self.rules).detect(&ledger);
        wash_sales.apply_to(&mut ledger);

        let open_positions =
            positions::equity_positions(&ledger, &input.current_prices, input.as_of, &calculator);
        let harvest_opportunities =
            HarvestingEngine::with_config(self.rules, self.harvesting.clone())
                .find_opportunities(&open_positions, input.as_of);

        let report = TaxReport {
            as_of: input.as_of,
            transaction_count: input.transactions.len(),
            skipped_rows,
            degraded_count: outcomes
                .iter()
                .filter(|o| matches!(o.outcome, Outcome::Degraded { .. }))
                .count(),
            realized: calculator.realized_totals(ledger.closed_stocks(), ledger.closed_options()),
            tax_years: calculator.tax_years(ledger.closed_stocks(), ledger.closed_options()),
            total_disallowed_loss: wash_sales.total_disallowed(),
            total_unrealized_pnl: open_positions.iter().map(|p| p.unrealized_pnl).sum(),
            wash_sales: wash_sales.records,
            open_options: positions::option_positions(&ledger),
            open_positions,
            closed_positions: ledger.closed_stocks().to_vec(),
            closed_options: ledger.closed_options().to_vec(),
            harvest_opportunities,
            outcomes,
        };

        tracing::info!(
            "Processed {} transactions ({} skipped, {} degraded): {} open, {} closed, {} wash sales",
            report.transaction_count,
            report.skipped_rows,
            report.degraded_count,
            report.open_positions.len() + report.open_options.len(),
            report.closed_positions.len() + report.closed_options.len(),
            report.wash_sales.len()
        );
        report
    }

    /// Gains and losses for one tax year, or all years
    pub fn year_end_summary(&self, report: &TaxReport, tax_year: Option<i32>) -> YearEndSummary {
        TaxCalculator::with_rules(self.rules).year_end_summary(
            tax_year,
            &report.closed_positions,
            &report.closed_options,
            &report.wash_sales,
        )
    }

    pub fn lot_grouping(&self, report: &TaxReport, filter: LotFilter) -> LotGrouping {
        positions::group_lots(&report.open_positions, report.as_of, filter)
    }
}
