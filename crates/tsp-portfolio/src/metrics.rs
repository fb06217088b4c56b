use serde::{Deserialize, Serialize};

use crate::fixedpoint::{div_round, i128_to_i64_clamp, Money, MICROS_SCALE};
use crate::ledger::LedgerSnapshot;
use crate::prices::{usable_price, PriceLookup};
use crate::types::Position;

/// Mark-to-market valuation of one ledger snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityMark {
    /// `cash + market_value`.
    pub equity: Money,
    pub cash: Money,
    /// Σ quantity × mark over all non-cash positions.
    pub market_value: Money,
    /// Positions valued at average cost because no usable price was
    /// available.
    pub fallback_symbols: Vec<String>,
}

impl EquityMark {
    /// `true` when at least one position was valued at average cost.
    pub fn is_degraded(&self) -> bool {
        !self.fallback_symbols.is_empty()
    }
}

/// Valuation of a single holding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionMark {
    /// Price used: the market price, or the average cost on fallback.
    pub mark: Money,
    pub market_value: Money,
    /// `(mark − average_cost) × quantity`.
    pub unrealized_pnl: Money,
    pub price_unavailable: bool,
}

fn mul_qty_price_i128(qty_raw: i64, price_raw: i64) -> i128 {
    div_round((qty_raw as i128) * (price_raw as i128), MICROS_SCALE as i128)
}

/// Value one non-cash position, falling back to its average cost.
pub fn mark_position<P: PriceLookup + ?Sized>(position: &Position, prices: &P) -> PositionMark {
    let (mark, price_unavailable) = match usable_price(prices, &position.symbol) {
        Some(px) => (px, false),
        None => (position.average_cost, true),
    };
    let value = mul_qty_price_i128(position.quantity.raw(), mark.raw());
    let basis = mul_qty_price_i128(position.quantity.raw(), position.average_cost.raw());
    PositionMark {
        mark,
        market_value: Money::new(i128_to_i64_clamp(value)),
        unrealized_pnl: Money::new(i128_to_i64_clamp(value - basis)),
        price_unavailable,
    }
}

/// Compute equity:
/// `cash + Σ(quantity × price_lookup(symbol))` over non-cash positions,
/// substituting average cost for any symbol without a usable price.
///
/// Aggregation is done in `i128` and clamped to `i64` at the end.
pub fn mark_equity<P: PriceLookup + ?Sized>(snapshot: &LedgerSnapshot, prices: &P) -> EquityMark {
    let cash = snapshot.cash();
    let mut market_value: i128 = 0;
    let mut fallback_symbols = Vec::new();

    // deterministic iteration (BTreeMap)
    for position in snapshot.holdings() {
        let mark = match usable_price(prices, &position.symbol) {
            Some(px) => px,
            None => {
                fallback_symbols.push(position.symbol.clone());
                position.average_cost
            }
        };
        market_value += mul_qty_price_i128(position.quantity.raw(), mark.raw());
    }

    let equity = (cash.raw() as i128) + market_value;
    EquityMark {
        equity: Money::new(i128_to_i64_clamp(equity)),
        cash,
        market_value: Money::new(i128_to_i64_clamp(market_value)),
        fallback_symbols,
    }
}
