//! Transaction Normalization
//!
//! Maps broker transaction-type strings onto a fixed vocabulary and turns raw
//! ledger rows into typed transactions the lot ledger can apply.

use chrono::NaiveDate;
use ledger_core::{TickerChange, Transaction};
use serde::{Deserialize, Serialize};

use crate::symbols::{self, OptionDescriptor};

/// Canonical transaction type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalType {
    Purchased,
    Sold,
    BuyToOpen,
    SellToClose,
    SellToOpen,
    BuyToClose,
    Expired,
    Exercise,
    Assignment,
    /// Unrecognized type, kept uppercased with whitespace runs as `_`
    Unrecognized(String),
}

impl std::fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CanonicalType::Purchased => "PURCHASED",
            CanonicalType::Sold => "SOLD",
            CanonicalType::BuyToOpen => "BUY_TO_OPEN",
            CanonicalType::SellToClose => "SELL_TO_CLOSE",
            CanonicalType::SellToOpen => "SELL_TO_OPEN",
            CanonicalType::BuyToClose => "BUY_TO_CLOSE",
            CanonicalType::Expired => "EXPIRED",
            CanonicalType::Exercise => "EXERCISE",
            CanonicalType::Assignment => "ASSIGNMENT",
            CanonicalType::Unrecognized(raw) => raw,
        };
        write!(f, "{}", name)
    }
}

/// Uppercase, collapse whitespace runs to `_`, then match against the
/// synonym table.
pub fn normalize_type(raw: &str) -> CanonicalType {
    let upper = raw
        .to_uppercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");

    match upper.as_str() {
        "PURCHASED" | "BUY" | "BOUGHT" => CanonicalType::Purchased,
        "SOLD" | "SELL" => CanonicalType::Sold,
        "BUY_TO_OPEN" | "BTO" | "BOUGHT_TO_OPEN" => CanonicalType::BuyToOpen,
        "SELL_TO_CLOSE" | "STC" | "SOLD_TO_CLOSE" => CanonicalType::SellToClose,
        "SELL_TO_OPEN" | "STO" | "SOLD_TO_OPEN" => CanonicalType::SellToOpen,
        "BUY_TO_CLOSE" | "BTC" | "BOUGHT_TO_CLOSE" => CanonicalType::BuyToClose,
        "EXPIRED" | "EXPIRATION" => CanonicalType::Expired,
        "EXERCISE" | "EXERCISED" => CanonicalType::Exercise,
        "ASSIGNMENT" | "ASSIGNED" => CanonicalType::Assignment,
        _ => CanonicalType::Unrecognized(upper),
    }
}

/// Redirect an equity symbol through the ticker changes that took effect
/// after `date`.
///
/// Rules are visited in list order and each compares against the symbol as
/// redirected so far, so the first matching rule wins ahead of any
/// later-dated one. Option symbols are never redirected.
pub fn resolve_symbol(raw: &str, date: NaiveDate, changes: &[TickerChange]) -> String {
    if symbols::is_option(raw) {
        return raw.to_string();
    }

    changes.iter().fold(raw.to_string(), |symbol, change| {
        if change.old_symbol == symbol && change.date > date {
            change.new_symbol.clone()
        } else {
            symbol
        }
    })
}

/// Quantities carried by opening and closing trades
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeFill {
    /// Unsigned share or contract count
    pub quantity: f64,
    pub unit_price: f64,
    /// Unsigned cash amount of the row
    pub amount: f64,
}

impl TradeFill {
    fn from_transaction(tx: &Transaction) -> Self {
        Self {
            quantity: tx.units.abs(),
            unit_price: tx.unit_price,
            amount: tx.amount.abs(),
        }
    }

    /// Reported unit price, or amount / quantity when the row has none.
    /// Zero when neither is usable.
    pub fn effective_price(&self) -> f64 {
        if self.unit_price != 0.0 {
            self.unit_price
        } else if self.quantity != 0.0 {
            self.amount / self.quantity
        } else {
            0.0
        }
    }
}

/// What a transaction does, with the fields each kind needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransactionKind {
    StockPurchase(TradeFill),
    StockSale(TradeFill),
    /// PURCHASED / BUY_TO_OPEN on an option symbol
    OptionBuyToOpen(TradeFill),
    /// SELL_TO_CLOSE on an option symbol
    OptionSellToClose(TradeFill),
    /// SOLD on an option symbol: closes long lots unless the position is short
    OptionSold(TradeFill),
    OptionSellToOpen(TradeFill),
    OptionBuyToClose(TradeFill),
    OptionExpired,
    OptionExercise,
    OptionAssignment,
    /// Recognized or unrecognized type with no effect on this kind of symbol
    Inert(CanonicalType),
}

/// Transaction with its symbol resolved and its type classified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTransaction {
    pub date: NaiveDate,
    pub symbol: String,
    pub option: Option<OptionDescriptor>,
    pub kind: TransactionKind,
}

impl NormalizedTransaction {
    pub fn from_transaction(tx: &Transaction, changes: &[TickerChange]) -> Self {
        let symbol = resolve_symbol(&tx.symbol, tx.date, changes);
        let option = OptionDescriptor::parse(&symbol);
        let canonical = normalize_type(&tx.transaction_type);
        let fill = TradeFill::from_transaction(tx);

        let kind = match (&option, canonical) {
            (None, CanonicalType::Purchased) => TransactionKind::StockPurchase(fill),
            (None, CanonicalType::Sold) => TransactionKind::StockSale(fill),
            (None, other) => TransactionKind::Inert(other),
            (Some(_), CanonicalType::Purchased | CanonicalType::BuyToOpen) => {
                TransactionKind::OptionBuyToOpen(fill)
            }
            (Some(_), CanonicalType::SellToClose) => TransactionKind::OptionSellToClose(fill),
            (Some(_), CanonicalType::Sold) => TransactionKind::OptionSold(fill),
            (Some(_), CanonicalType::SellToOpen) => TransactionKind::OptionSellToOpen(fill),
            (Some(_), CanonicalType::BuyToClose) => TransactionKind::OptionBuyToClose(fill),
            (Some(_), CanonicalType::Expired) => TransactionKind::OptionExpired,
            (Some(_), CanonicalType::Exercise) => TransactionKind::OptionExercise,
            (Some(_), CanonicalType::Assignment) => TransactionKind::OptionAssignment,
            (Some(_), other @ CanonicalType::Unrecognized(_)) => TransactionKind::Inert(other),
        };

        Self {
            date: tx.date,
            symbol,
            option,
            kind,
        }
    }
}
