//! Average-cost accounting arithmetic.
//!
//! Pure functions only; the [`ledger`](crate::ledger) module owns the
//! invariant checks and decides when these are applied.

use crate::fixedpoint::{div_round, Money, Qty};

/// Quantity-weighted average cost after adding `add_qty` at `price` to a
/// holding of `held_qty` at `held_avg`:
///
/// `(held_qty × held_avg + add_qty × price) / (held_qty + add_qty)`
///
/// Computed in `i128` from raw micros, rounded half away from zero. `None` if
/// the combined quantity is not positive or the result overflows.
pub fn weighted_average_cost(held_qty: Qty, held_avg: Money, add_qty: Qty, price: Money) -> Option<Money> {
    let total_qty = (held_qty.raw() as i128) + (add_qty.raw() as i128);
    if total_qty <= 0 {
        return None;
    }
    let weighted = (held_qty.raw() as i128) * (held_avg.raw() as i128)
        + (add_qty.raw() as i128) * (price.raw() as i128);
    i64::try_from(div_round(weighted, total_qty)).ok().map(Money::new)
}

/// Realized PnL of selling `qty` at `price` against `average_cost`:
/// `(price − average_cost) × qty`.
pub fn realized_pnl(price: Money, average_cost: Money, qty: Qty) -> Option<Money> {
    let per_unit = price.checked_sub(average_cost)?;
    qty.checked_notional(per_unit)
}
