//! Lot Ledger
//!
//! Per-symbol FIFO lot books for equities and listed options. Transactions are
//! applied one at a time; every application reports an [`Outcome`] so callers
//! can tell a clean update from an inert row or a silently degraded one.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::corporate_actions::CorporateActions;
use crate::normalizer::{CanonicalType, NormalizedTransaction, TradeFill, TransactionKind};
use crate::symbols::{Expiry, OptionDescriptor, OptionType};
use crate::tax_calculator::{days_between, HoldingPeriod, TaxRules};
use crate::wash_sale::WashSaleAdjustment;

/// Remaining quantity below this is treated as fully matched
const QUANTITY_EPSILON: f64 = 1e-9;

/// Position in a [`LotArena`]; stable for the lifetime of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LotId(pub usize);

/// Owned lots for one symbol, addressed by [`LotId`].
///
/// Lots are never moved or reordered once pushed. The open list keeps
/// purchase order, so FIFO consumption is "first open id matching".
#[derive(Debug, Clone, PartialEq)]
pub struct LotArena<T> {
    slots: Vec<T>,
    open: Vec<LotId>,
}

impl<T> Default for LotArena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            open: Vec::new(),
        }
    }
}

impl<T> LotArena<T> {
    pub fn push(&mut self, lot: T) -> LotId {
        let id = LotId(self.slots.len());
        self.slots.push(lot);
        self.open.push(id);
        id
    }

    pub fn get(&self, id: LotId) -> Option<&T> {
        self.slots.get(id.0)
    }

    pub fn get_mut(&mut self, id: LotId) -> Option<&mut T> {
        self.slots.get_mut(id.0)
    }

    /// Open lots, oldest first
    pub fn iter_open(&self) -> impl Iterator<Item = (LotId, &T)> + '_ {
        self.open.iter().map(move |&id| (id, &self.slots[id.0]))
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    fn oldest_open_where(&self, eligible: impl Fn(&T) -> bool) -> Option<LotId> {
        self.open
            .iter()
            .copied()
            .find(|id| eligible(&self.slots[id.0]))
    }

    fn retire(&mut self, id: LotId) {
        self.open.retain(|&open| open != id);
    }
}

/// Split-able quantity of a lot
trait Lot: Clone {
    fn quantity(&self) -> f64;

    /// Detach `quantity` from this lot, moving the proportional share of its
    /// dollar amounts onto the returned portion.
    fn split_off(&mut self, quantity: f64) -> Self;
}

/// Consume eligible open lots oldest first. Returns the quantity that could
/// not be matched.
fn close_fifo<T: Lot>(
    arena: &mut LotArena<T>,
    quantity: f64,
    eligible: impl Fn(&T) -> bool,
    mut on_close: impl FnMut(T),
) -> f64 {
    let mut remaining = quantity;

    while remaining > QUANTITY_EPSILON {
        let Some(id) = arena.oldest_open_where(&eligible) else {
            break;
        };
        let Some(lot) = arena.get_mut(id) else {
            break;
        };

        if lot.quantity() <= remaining + QUANTITY_EPSILON {
            remaining -= lot.quantity();
            let closed = lot.clone();
            arena.retire(id);
            on_close(closed);
        } else {
            let closed = lot.split_off(remaining);
            remaining = 0.0;
            on_close(closed);
        }
    }

    remaining.max(0.0)
}

/// Where a stock lot came from when it was not bought outright
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "option_symbol", rename_all = "snake_case")]
pub enum Provenance {
    FromExercise(String),
    FromAssignment(String),
}

/// Open equity lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLot {
    pub symbol: String,
    pub purchase_date: NaiveDate,
    pub units: f64,
    pub cost_basis: f64,
    pub unit_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// Cumulative disallowed loss folded into `cost_basis`
    #[serde(default)]
    pub wash_sale_adjustment: f64,
}

impl Lot for StockLot {
    fn quantity(&self) -> f64 {
        self.units
    }

    fn split_off(&mut self, quantity: f64) -> Self {
        let share = quantity / self.units;
        let closed_cost = self.cost_basis * share;
        let closed_adjustment = self.wash_sale_adjustment * share;

        let portion = Self {
            units: quantity,
            cost_basis: closed_cost,
            wash_sale_adjustment: closed_adjustment,
            ..self.clone()
        };

        self.units -= quantity;
        self.cost_basis -= closed_cost;
        self.wash_sale_adjustment -= closed_adjustment;
        portion
    }
}

/// Open option lot. Long lots carry `cost_basis`, short lots carry `premium`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionLot {
    pub symbol: String,
    pub underlying: String,
    pub option_type: OptionType,
    pub strike: f64,
    pub expiration: Expiry,
    pub purchase_date: NaiveDate,
    pub contracts: f64,
    pub cost_basis: f64,
    pub premium: f64,
    pub is_short: bool,
    pub unit_price: f64,
}

impl OptionLot {
    fn open(
        symbol: &str,
        descriptor: &OptionDescriptor,
        date: NaiveDate,
        fill: &TradeFill,
        is_short: bool,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            underlying: descriptor.underlying.clone(),
            option_type: descriptor.option_type,
            strike: descriptor.strike,
            expiration: descriptor.expiration,
            purchase_date: date,
            contracts: fill.quantity,
            cost_basis: if is_short { 0.0 } else { fill.amount },
            premium: if is_short { fill.amount } else { 0.0 },
            is_short,
            unit_price: fill.unit_price,
        }
    }
}

impl Lot for OptionLot {
    fn quantity(&self) -> f64 {
        self.contracts
    }

    fn split_off(&mut self, quantity: f64) -> Self {
        let share = quantity / self.contracts;
        let closed_cost = self.cost_basis * share;
        let closed_premium = self.premium * share;

        let portion = Self {
            contracts: quantity,
            cost_basis: closed_cost,
            premium: closed_premium,
            ..self.clone()
        };

        self.contracts -= quantity;
        self.cost_basis -= closed_cost;
        self.premium -= closed_premium;
        portion
    }
}

/// Realized slice of a stock lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedStockPosition {
    #[serde(flatten)]
    pub lot: StockLot,
    pub sale_date: NaiveDate,
    pub sale_price: f64,
    pub proceeds: f64,
    pub pnl: f64,
    pub days_held: i64,
    pub tax_status: HoldingPeriod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wash_sale: Option<WashSaleAdjustment>,
}

impl ClosedStockPosition {
    /// P&L after wash-sale disallowance, when any
    pub fn realized_pnl(&self) -> f64 {
        self.wash_sale
            .as_ref()
            .map(|w| w.adjusted_pnl)
            .unwrap_or(self.pnl)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseType {
    SellToClose,
    BuyToClose,
    Expired,
}

/// Realized slice of an option lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedOptionPosition {
    #[serde(flatten)]
    pub lot: OptionLot,
    pub sale_date: NaiveDate,
    pub sale_price: f64,
    pub proceeds: f64,
    /// Cost of buying back a short position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_cost: Option<f64>,
    pub pnl: f64,
    pub days_held: i64,
    pub tax_status: HoldingPeriod,
    pub close_type: CloseType,
}

/// Open equity lots of one symbol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StockBook {
    pub lots: LotArena<StockLot>,
    pub total_units: f64,
}

impl StockBook {
    fn recount(&mut self) {
        self.total_units = self.lots.iter_open().map(|(_, lot)| lot.units).sum();
    }

    pub fn total_cost(&self) -> f64 {
        self.lots.iter_open().map(|(_, lot)| lot.cost_basis).sum()
    }
}

/// Open option lots of one contract symbol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionBook {
    pub lots: LotArena<OptionLot>,
    pub total_contracts: f64,
    /// Direction of the most recent opening trade
    pub is_short: bool,
}

impl OptionBook {
    fn recount(&mut self) {
        self.total_contracts = self.lots.iter_open().map(|(_, lot)| lot.contracts).sum();
    }
}

/// Why a transaction changed nothing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum NoOpReason {
    /// Type has no effect on this kind of symbol
    InertType(CanonicalType),
    ZeroQuantity,
    NothingToClose,
    /// SOLD on an option symbol whose position is short
    SoldWhileShort,
}

/// Quietly degraded handling; the ledger stays consistent but the row was not
/// fully accounted for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "degradation", rename_all = "snake_case")]
pub enum Degradation {
    /// Close requested more than the open lots hold; the excess was dropped
    Oversold { requested: f64, unmatched: f64 },
    /// Long put lots drained with no stock or P&L effect
    PutExerciseNotConverted { lots_drained: usize },
    /// Short call lots drained with no stock or P&L effect
    CallAssignmentNotConverted { lots_drained: usize },
}

impl std::fmt::Display for Degradation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Degradation::Oversold {
                requested,
                unmatched,
            } => write!(f, "oversold: {} of {} unmatched", unmatched, requested),
            Degradation::PutExerciseNotConverted { lots_drained } => {
                write!(f, "put exercise not converted ({} lots drained)", lots_drained)
            }
            Degradation::CallAssignmentNotConverted { lots_drained } => {
                write!(f, "call assignment not converted ({} lots drained)", lots_drained)
            }
        }
    }
}

/// Result of applying a single transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    NoOp { reason: NoOpReason },
    Degraded { degradation: Degradation },
}

impl Outcome {
    fn no_op(reason: NoOpReason) -> Self {
        Outcome::NoOp { reason }
    }

    fn degraded(degradation: Degradation) -> Self {
        Outcome::Degraded { degradation }
    }

    fn from_unmatched(requested: f64, unmatched: f64) -> Self {
        if unmatched > QUANTITY_EPSILON {
            Self::degraded(Degradation::Oversold {
                requested,
                unmatched,
            })
        } else {
            Outcome::Applied
        }
    }
}

/// FIFO lot books plus everything realized so far
#[derive(Debug, Clone, Default)]
pub struct LotLedger {
    rules: TaxRules,
    stocks: BTreeMap<String, StockBook>,
    options: BTreeMap<String, OptionBook>,
    closed_stocks: Vec<ClosedStockPosition>,
    closed_options: Vec<ClosedOptionPosition>,
}

impl LotLedger {
    pub fn new(rules: TaxRules) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    pub fn stock_books(&self) -> &BTreeMap<String, StockBook> {
        &self.stocks
    }

    pub fn option_books(&self) -> &BTreeMap<String, OptionBook> {
        &self.options
    }

    pub fn closed_stocks(&self) -> &[ClosedStockPosition] {
        &self.closed_stocks
    }

    pub fn closed_options(&self) -> &[ClosedOptionPosition] {
        &self.closed_options
    }

    pub(crate) fn closed_stocks_mut(&mut self) -> &mut [ClosedStockPosition] {
        &mut self.closed_stocks
    }

    pub(crate) fn stock_lot_mut(&mut self, symbol: &str, id: LotId) -> Option<&mut StockLot> {
        self.stocks.get_mut(symbol)?.lots.get_mut(id)
    }

    /// Apply one transaction. Callers feed transactions in date order.
    pub fn apply_transaction(
        &mut self,
        tx: &NormalizedTransaction,
        actions: &CorporateActions<'_>,
    ) -> Outcome {
        let outcome = match (&tx.kind, &tx.option) {
            (TransactionKind::Inert(canonical), _) => {
                Outcome::no_op(NoOpReason::InertType(canonical.clone()))
            }
            (TransactionKind::StockPurchase(fill), _) => self.buy_stock(tx, fill, actions),
            (TransactionKind::StockSale(fill), _) => self.sell_stock(tx, fill),
            (TransactionKind::OptionBuyToOpen(fill), Some(d)) => self.open_option(tx, d, fill, false),
            (TransactionKind::OptionSellToOpen(fill), Some(d)) => self.open_option(tx, d, fill, true),
            (TransactionKind::OptionSellToClose(fill), Some(_)) => self.sell_to_close(tx, fill),
            (TransactionKind::OptionSold(fill), Some(_)) => {
                let is_short = self.options.get(&tx.symbol).is_some_and(|b| b.is_short);
                if is_short {
                    Outcome::no_op(NoOpReason::SoldWhileShort)
                } else {
                    self.sell_to_close(tx, fill)
                }
            }
            (TransactionKind::OptionBuyToClose(fill), Some(_)) => self.buy_to_close(tx, fill),
            (TransactionKind::OptionExpired, Some(_)) => self.expire(tx),
            (TransactionKind::OptionExercise, Some(d)) => self.exercise(tx, d),
            (TransactionKind::OptionAssignment, Some(d)) => self.assign(tx, d),
            (_, None) => Outcome::no_op(NoOpReason::NothingToClose),
        };

        tracing::debug!("{} {} {:?} -> {:?}", tx.date, tx.symbol, tx.kind, outcome);
        outcome
    }

    fn buy_stock(
        &mut self,
        tx: &NormalizedTransaction,
        fill: &TradeFill,
        actions: &CorporateActions<'_>,
    ) -> Outcome {
        let adjusted = actions.adjust_purchase(&tx.symbol, tx.date, fill.quantity, fill.unit_price);
        let book = self.stocks.entry(tx.symbol.clone()).or_default();

        book.lots.push(StockLot {
            symbol: tx.symbol.clone(),
            purchase_date: tx.date,
            units: adjusted.units,
            // Dollars invested do not change under a split
            cost_basis: fill.amount,
            unit_price: adjusted.unit_price,
            provenance: None,
            wash_sale_adjustment: 0.0,
        });
        book.recount();
        Outcome::Applied
    }

    fn sell_stock(&mut self, tx: &NormalizedTransaction, fill: &TradeFill) -> Outcome {
        if fill.quantity == 0.0 {
            return Outcome::no_op(NoOpReason::ZeroQuantity);
        }

        let rules = self.rules;
        let sale_price = fill.effective_price();
        let closed = &mut self.closed_stocks;
        let book = self.stocks.entry(tx.symbol.clone()).or_default();

        let unmatched = close_fifo(&mut book.lots, fill.quantity, |_| true, |lot| {
            let days_held = days_between(lot.purchase_date, tx.date);
            let proceeds = lot.units * sale_price;
            closed.push(ClosedStockPosition {
                pnl: proceeds - lot.cost_basis,
                lot,
                sale_date: tx.date,
                sale_price,
                proceeds,
                days_held,
                tax_status: HoldingPeriod::from_days(days_held, &rules),
                wash_sale: None,
            });
        });
        book.recount();

        Outcome::from_unmatched(fill.quantity, unmatched)
    }

    fn open_option(
        &mut self,
        tx: &NormalizedTransaction,
        descriptor: &OptionDescriptor,
        fill: &TradeFill,
        is_short: bool,
    ) -> Outcome {
        let book = self.options.entry(tx.symbol.clone()).or_default();
        book.lots
            .push(OptionLot::open(&tx.symbol, descriptor, tx.date, fill, is_short));
        book.is_short = is_short;
        book.recount();
        Outcome::Applied
    }

    fn sell_to_close(&mut self, tx: &NormalizedTransaction, fill: &TradeFill) -> Outcome {
        if fill.quantity == 0.0 {
            return Outcome::no_op(NoOpReason::ZeroQuantity);
        }

        let rules = self.rules;
        let sale_price = fill.effective_price();
        let closed = &mut self.closed_options;
        let book = self.options.entry(tx.symbol.clone()).or_default();

        let unmatched = close_fifo(&mut book.lots, fill.quantity, |lot| !lot.is_short, |lot| {
            let days_held = days_between(lot.purchase_date, tx.date);
            let proceeds = lot.contracts * sale_price * rules.contract_multiplier;
            closed.push(ClosedOptionPosition {
                pnl: proceeds - lot.cost_basis,
                lot,
                sale_date: tx.date,
                sale_price,
                proceeds,
                close_cost: None,
                days_held,
                tax_status: HoldingPeriod::from_days(days_held, &rules),
                close_type: CloseType::SellToClose,
            });
        });
        book.recount();

        Outcome::from_unmatched(fill.quantity, unmatched)
    }

    fn buy_to_close(&mut self, tx: &NormalizedTransaction, fill: &TradeFill) -> Outcome {
        if fill.quantity == 0.0 {
            return Outcome::no_op(NoOpReason::ZeroQuantity);
        }

        let rules = self.rules;
        let close_price = fill.effective_price();
        let closed = &mut self.closed_options;
        let book = self.options.entry(tx.symbol.clone()).or_default();

        let unmatched = close_fifo(&mut book.lots, fill.quantity, |lot| lot.is_short, |lot| {
            let days_held = days_between(lot.purchase_date, tx.date);
            let close_cost = lot.contracts * close_price * rules.contract_multiplier;
            closed.push(ClosedOptionPosition {
                pnl: lot.premium - close_cost,
                proceeds: lot.premium,
                lot,
                sale_date: tx.date,
                sale_price: close_price,
                close_cost: Some(close_cost),
                days_held,
                tax_status: HoldingPeriod::from_days(days_held, &rules),
                close_type: CloseType::BuyToClose,
            });
        });
        book.recount();

        Outcome::from_unmatched(fill.quantity, unmatched)
    }

    /// Close every open lot of the contract: longs lose their cost, shorts
    /// keep their premium.
    fn expire(&mut self, tx: &NormalizedTransaction) -> Outcome {
        let lots = self.drain_option_lots(&tx.symbol, |_| true);
        if lots.is_empty() {
            return Outcome::no_op(NoOpReason::NothingToClose);
        }

        for lot in lots {
            let days_held = days_between(lot.purchase_date, tx.date);
            let (proceeds, pnl) = if lot.is_short {
                (lot.premium, lot.premium)
            } else {
                (0.0, -lot.cost_basis)
            };
            self.closed_options.push(ClosedOptionPosition {
                lot,
                sale_date: tx.date,
                sale_price: 0.0,
                proceeds,
                close_cost: None,
                pnl,
                days_held,
                tax_status: HoldingPeriod::from_days(days_held, &self.rules),
                close_type: CloseType::Expired,
            });
        }
        Outcome::Applied
    }

    /// Exercise every long lot. Calls become stock at strike plus the premium
    /// paid; puts are drained without conversion.
    fn exercise(&mut self, tx: &NormalizedTransaction, descriptor: &OptionDescriptor) -> Outcome {
        let lots = self.drain_option_lots(&tx.symbol, |lot| !lot.is_short);
        if lots.is_empty() {
            return Outcome::no_op(NoOpReason::NothingToClose);
        }

        if descriptor.option_type == OptionType::Put {
            return Outcome::degraded(Degradation::PutExerciseNotConverted {
                lots_drained: lots.len(),
            });
        }

        for lot in lots {
            let shares = lot.contracts * self.rules.contract_multiplier;
            let cost_basis = lot.strike * shares + lot.cost_basis;
            let unit_price = per_share(lot.strike, lot.cost_basis, shares);
            self.push_derived_stock(
                &lot.underlying,
                tx.date,
                shares,
                cost_basis,
                unit_price,
                Provenance::FromExercise(lot.symbol),
            );
        }
        Outcome::Applied
    }

    /// Assignment on every short lot. Puts become stock at strike less the
    /// premium received; calls are drained without conversion.
    fn assign(&mut self, tx: &NormalizedTransaction, descriptor: &OptionDescriptor) -> Outcome {
        let lots = self.drain_option_lots(&tx.symbol, |lot| lot.is_short);
        if lots.is_empty() {
            return Outcome::no_op(NoOpReason::NothingToClose);
        }

        if descriptor.option_type == OptionType::Call {
            return Outcome::degraded(Degradation::CallAssignmentNotConverted {
                lots_drained: lots.len(),
            });
        }

        for lot in lots {
            let shares = lot.contracts * self.rules.contract_multiplier;
            let cost_basis = lot.strike * shares - lot.premium;
            let unit_price = per_share(lot.strike, -lot.premium, shares);
            self.push_derived_stock(
                &lot.underlying,
                tx.date,
                shares,
                cost_basis,
                unit_price,
                Provenance::FromAssignment(lot.symbol),
            );
        }
        Outcome::Applied
    }

    fn drain_option_lots(
        &mut self,
        symbol: &str,
        eligible: impl Fn(&OptionLot) -> bool,
    ) -> Vec<OptionLot> {
        let Some(book) = self.options.get_mut(symbol) else {
            return Vec::new();
        };

        let ids: Vec<LotId> = book
            .lots
            .iter_open()
            .filter(|(_, lot)| eligible(lot))
            .map(|(id, _)| id)
            .collect();
        let drained = ids
            .iter()
            .filter_map(|&id| book.lots.get(id).cloned())
            .collect();
        for id in ids {
            book.lots.retire(id);
        }
        book.recount();
        drained
    }

    fn push_derived_stock(
        &mut self,
        symbol: &str,
        date: NaiveDate,
        shares: f64,
        cost_basis: f64,
        unit_price: f64,
        provenance: Provenance,
    ) {
        let book = self.stocks.entry(symbol.to_string()).or_default();
        book.lots.push(StockLot {
            symbol: symbol.to_string(),
            purchase_date: date,
            units: shares,
            cost_basis,
            unit_price,
            provenance: Some(provenance),
            wash_sale_adjustment: 0.0,
        });
        book.recount();
    }
}

/// Strike adjusted by a premium spread over the delivered shares
fn per_share(strike: f64, premium: f64, shares: f64) -> f64 {
    if shares > 0.0 {
        strike + premium / shares
    } else {
        strike
    }
}
