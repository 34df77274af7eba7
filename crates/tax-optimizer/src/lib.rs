//! Tax Optimizer
//!
//! FIFO lot accounting for equities and listed options, corporate-action
//! adjustments, U.S. wash-sale loss disallowance and realized/unrealized
//! gain aggregation.

pub mod corporate_actions;
pub mod engine;
pub mod harvester;
pub mod ledger;
pub mod normalizer;
pub mod positions;
pub mod symbols;
pub mod tax_calculator;
pub mod wash_sale;

pub use corporate_actions::{adjust_purchase, AdjustedQuantity, CorporateActions};
pub use engine::{EngineInput, TaxEngine, TaxReport, TransactionOutcome};
pub use harvester::{HarvestOpportunity, HarvestingConfig, HarvestingEngine};
pub use ledger::{
    CloseType, ClosedOptionPosition, ClosedStockPosition, Degradation, LotArena, LotId, LotLedger,
    NoOpReason, OptionBook, OptionLot, Outcome, Provenance, StockBook, StockLot,
};
pub use normalizer::{normalize_type, resolve_symbol, CanonicalType, NormalizedTransaction, TransactionKind};
pub use positions::{
    EquityPosition, LongTermGroup, LotFilter, LotGrouping, OpenLot, OptionPosition, ShortTermLot,
};
pub use symbols::{display_symbol, is_option, underlying_of, Expiry, OptionDescriptor, OptionType};
pub use tax_calculator::{
    GainType, HoldingPeriod, RealizedPosition, RealizedTotals, TaxCalculator, TaxRules,
    TickerSummary, YearEndSummary,
};
pub use wash_sale::{
    WashSaleAdjustment, WashSaleDetector, WashSaleRecord, WashSaleReport, WashSaleSummary,
    WashSaleWindow,
};
