//! tsp-portfolio
//!
//! Portfolio accounting for one challenge account:
//! - Fixed-point `Money` / `Qty` / `Pct` (1e-6 scale, no floats)
//! - Position ledger with a synthetic cash position (`USD`)
//! - Weighted-average cost basis, realized PnL on sells
//! - Equity marks with average-cost fallback for missing prices
//! - Pure deterministic logic (no IO, no wall clock, no quote fetching)

mod accounting;
mod metrics;
mod types;

pub mod fixedpoint;
pub mod ledger;
pub mod prices;

pub use accounting::{realized_pnl, weighted_average_cost};
pub use fixedpoint::{Money, ParseFixedError, Pct, Qty, MICROS_SCALE};
pub use ledger::{
    LedgerDelta, LedgerError, LedgerSnapshot, PositionChange, PositionLedger, QTY_EPSILON,
};
pub use metrics::{mark_equity, mark_position, EquityMark, PositionMark};
pub use prices::{marks, CachedPriceLookup, MarkMap, NoPrices, PriceLookup};
pub use types::{normalize_symbol, Position, Side, CASH_SYMBOL};
