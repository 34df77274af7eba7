//! tax-report: derive open, closed and wash-sale positions from a ledger file.
//!
//! Reads the ledger (transactions plus stock splits and ticker changes),
//! optionally prices open equity positions from a quote file, and prints the
//! report as JSON on stdout.
//!
//! Usage:
//!   cargo run -p tax-report -- --ledger ledger.json
//!   cargo run -p tax-report -- --ledger ledger.json --quotes quotes.json --year 2024
//!   cargo run -p tax-report -- --as-of 2024-12-31 --lots lt

use anyhow::{Context, Result};
use ledger_core::{collect_prices, LedgerFile, PriceMap, Transaction};
use serde::Serialize;
use tax_optimizer::{
    EngineInput, HarvestingConfig, LotGrouping, TaxEngine, TaxReport, TaxRules, WashSaleSummary,
    YearEndSummary,
};

mod config;
mod quotes;

use config::ReportConfig;
use quotes::FileQuoteSource;

#[derive(Serialize)]
struct Output {
    report: TaxReport,
    year_summary: YearEndSummary,
    wash_sale_summary: WashSaleSummary,
    tax_lots: LotGrouping,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    // Logs go to stderr so stdout stays valid JSON
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    let mut config = ReportConfig::from_env()?;
    let args: Vec<String> = std::env::args().collect();
    config.apply_args(&args)?;
    tracing::info!("Ledger: {}", config.ledger_path.display());
    tracing::info!("As of: {}", config.as_of);

    let text = std::fs::read_to_string(&config.ledger_path)
        .with_context(|| format!("Failed to read {}", config.ledger_path.display()))?;
    let ledger = LedgerFile::from_json_str(&text).context("Failed to parse ledger file")?;
    let transactions = parse_rows(&ledger);

    let engine = TaxEngine::new(TaxRules::us()).with_harvesting(HarvestingConfig {
        max_opportunities: config.harvest_limit,
    });
    let mut input = EngineInput {
        transactions,
        stock_splits: ledger.stock_splits,
        ticker_changes: ledger.ticker_changes,
        current_prices: PriceMap::new(),
        as_of: config.as_of,
    };

    let mut report = engine.run(&input);

    if let Some(path) = &config.quotes_path {
        let source = FileQuoteSource::load(path)
            .with_context(|| format!("Failed to load quotes from {}", path.display()))?;
        let symbols: Vec<String> = report
            .open_positions
            .iter()
            .map(|p| p.symbol.clone())
            .collect();

        input.current_prices = collect_prices(&source, &symbols).await;
        report = engine.run(&input);
    }

    let output = Output {
        year_summary: engine.year_end_summary(&report, config.tax_year),
        wash_sale_summary: WashSaleSummary::for_year(&report.wash_sales, config.tax_year),
        tax_lots: engine.lot_grouping(&report, config.lot_filter),
        report,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Type every raw row, dropping those without a usable date
fn parse_rows(ledger: &LedgerFile) -> Vec<Transaction> {
    ledger
        .transactions
        .iter()
        .enumerate()
        .filter_map(|(i, raw)| match raw.parse() {
            Ok(tx) => Some(tx),
            Err(e) => {
                tracing::warn!("Skipping row {}: {}", i, e);
                None
            }
        })
        .collect()
}
