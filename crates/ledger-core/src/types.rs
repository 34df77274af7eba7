use std::collections::HashMap;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{LedgerError, LedgerResult};

/// Sparse map of last known prices keyed by symbol. A missing entry means
/// the price is unknown.
pub type PriceMap = HashMap<String, f64>;

/// Date layouts accepted for transaction and corporate-action dates. Two-digit
/// years are tried first since `%Y` would read `24` as year 24.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%Y/%m/%d"];

/// Brokerage transaction row as exported by the broker, before any typing.
///
/// Field names follow the column headers of the import format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransaction {
    #[serde(rename = "Date", default, deserialize_with = "text_or_number")]
    pub date: String,
    #[serde(rename = "Symbol", default, deserialize_with = "text_or_number")]
    pub symbol: String,
    #[serde(rename = "Transaction Type", default, deserialize_with = "text_or_number")]
    pub transaction_type: String,
    #[serde(rename = "Units", default, deserialize_with = "text_or_number")]
    pub units: String,
    #[serde(rename = "Unit Price", default, deserialize_with = "text_or_number")]
    pub unit_price: String,
    #[serde(rename = "Amount", default, deserialize_with = "text_or_number")]
    pub amount: String,
}

impl RawTransaction {
    /// Type the row. Numeric fields that fail to parse become 0; only the
    /// date is mandatory.
    pub fn parse(&self) -> LedgerResult<Transaction> {
        Ok(Transaction {
            date: parse_date(&self.date)?,
            symbol: self.symbol.trim().to_string(),
            transaction_type: self.transaction_type.trim().to_string(),
            units: parse_number(&self.units),
            unit_price: parse_number(&self.unit_price),
            amount: parse_number(&self.amount),
        })
    }
}

/// A single immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub date: NaiveDate,
    pub symbol: String,
    /// Vendor-supplied type string, normalized later by the engine
    pub transaction_type: String,
    pub units: f64,
    pub unit_price: f64,
    pub amount: f64,
}

/// Stock split: `ratio` new units per old unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockSplit {
    pub symbol: String,
    pub date: NaiveDate,
    pub ratio: f64,
}

/// Ticker change from `old_symbol` to `new_symbol`, with `ratio` new shares
/// per old share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerChange {
    pub old_symbol: String,
    pub new_symbol: String,
    pub date: NaiveDate,
    #[serde(default = "default_ratio")]
    pub ratio: f64,
}

fn default_ratio() -> f64 {
    1.0
}

/// On-disk ledger: raw rows plus the corporate actions maintained by hand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerFile {
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
    #[serde(default)]
    pub stock_splits: Vec<StockSplit>,
    #[serde(default)]
    pub ticker_changes: Vec<TickerChange>,
}

impl LedgerFile {
    pub fn from_json_str(text: &str) -> LedgerResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Parse a date in any of the accepted layouts.
pub fn parse_date(text: &str) -> LedgerResult<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .ok_or_else(|| LedgerError::InvalidDate(text.to_string()))
}

/// Parse a numeric field, tolerating currency formatting such as
/// `"$1,855.00"`. Anything unparseable is 0.
pub fn parse_number(text: &str) -> f64 {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return 0.0;
    }

    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
        .and_then(|d| d.to_f64())
        .unwrap_or(0.0)
}

fn text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Field {
        Text(String),
        Number(f64),
        Missing(()),
    }

    Ok(match Field::deserialize(deserializer)? {
        Field::Text(s) => s,
        Field::Number(n) => n.to_string(),
        Field::Missing(()) => String::new(),
    })
}
