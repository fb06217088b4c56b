//! Position ledger: the per-challenge cash and asset book.
//!
//! # Purpose
//! [`accounting`](crate::accounting) holds the average-cost arithmetic. This
//! module wraps it behind [`PositionLedger`], which:
//!
//! - Keeps exactly one [`Position`] per symbol, including the synthetic cash
//!   position under [`CASH_SYMBOL`].
//! - Enforces every invariant *before* mutating: quantity and price must be
//!   positive, a buy may not drive cash negative, a sell may not drive a
//!   holding negative. On error the ledger is untouched.
//! - Reports each mutation as a [`LedgerDelta`] so a persistence layer can
//!   write exactly the rows that changed.
//!
//! # Usage
//! ```ignore
//! let mut ledger = PositionLedger::new(Money::from_whole(5_000));
//! let delta = ledger.apply_buy("BTC-USD", Qty::from_whole(10), Money::from_whole(400))?;
//! let (delta, realized) = ledger.apply_sell("BTC-USD", Qty::from_whole(10), Money::from_whole(500))?;
//! ```
//!
//! # Determinism
//! No IO, no time, no randomness. Iteration order is the `BTreeMap` symbol
//! order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::accounting::{realized_pnl, weighted_average_cost};
use crate::fixedpoint::{Money, Qty};
use crate::types::{normalize_symbol, Position, CASH_SYMBOL};

/// Positions whose absolute quantity falls below this are removed.
///
/// Equal to the quantity resolution (1e-6), so in practice a position is
/// removed exactly when it reaches zero.
pub const QTY_EPSILON: Qty = Qty::new(1);

fn is_dust(qty: Qty) -> bool {
    qty.abs() < QTY_EPSILON
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Everything the ledger can refuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Trade quantity must be strictly positive.
    InvalidQuantity { qty: Qty },
    /// Trade price must be strictly positive.
    InvalidPrice { price: Money },
    /// Symbol is empty after trimming.
    EmptySymbol,
    /// The cash symbol is the account currency and cannot be traded.
    CashSymbolNotTradable,
    /// A buy would drive cash below zero.
    InsufficientFunds { required: Money, available: Money },
    /// A sell exceeds the held quantity (or nothing is held).
    InsufficientPosition {
        symbol: String,
        requested: Qty,
        held: Qty,
    },
    /// Arithmetic overflow in a trade value or cost computation.
    Overflow,
    /// Persisted rows violate ledger invariants.
    Corrupt { reason: String },
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuantity { qty } => {
                write!(f, "ledger: quantity must be > 0, got {qty}")
            }
            Self::InvalidPrice { price } => {
                write!(f, "ledger: price must be > 0, got {price}")
            }
            Self::EmptySymbol => write!(f, "ledger: symbol must not be empty"),
            Self::CashSymbolNotTradable => {
                write!(f, "ledger: {CASH_SYMBOL} is the account currency and cannot be traded")
            }
            Self::InsufficientFunds {
                required,
                available,
            } => write!(
                f,
                "ledger: insufficient funds (required {required}, available {available})"
            ),
            Self::InsufficientPosition {
                symbol,
                requested,
                held,
            } => write!(
                f,
                "ledger: insufficient position in {symbol} (requested {requested}, held {held})"
            ),
            Self::Overflow => write!(f, "ledger: arithmetic overflow"),
            Self::Corrupt { reason } => write!(f, "ledger: corrupt position rows: {reason}"),
        }
    }
}

impl std::error::Error for LedgerError {}

// ---------------------------------------------------------------------------
// Delta
// ---------------------------------------------------------------------------

/// One changed position row. `after == None` means the row is deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionChange {
    pub symbol: String,
    pub before: Option<Position>,
    pub after: Option<Position>,
}

impl PositionChange {
    pub fn is_removal(&self) -> bool {
        self.after.is_none()
    }
}

/// The set of position rows changed by one ledger mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDelta {
    pub changes: Vec<PositionChange>,
}

impl LedgerDelta {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Rows to insert or update.
    pub fn upserts(&self) -> impl Iterator<Item = &Position> {
        self.changes.iter().filter_map(|c| c.after.as_ref())
    }

    /// Symbols whose rows must be deleted.
    pub fn removals(&self) -> impl Iterator<Item = &str> {
        self.changes
            .iter()
            .filter(|c| c.is_removal())
            .map(|c| c.symbol.as_str())
    }
}

// ---------------------------------------------------------------------------
// Snapshot (read-only view)
// ---------------------------------------------------------------------------

/// Point-in-time copy of every position, cash included, ordered by symbol.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub positions: BTreeMap<String, Position>,
}

impl LedgerSnapshot {
    /// Cash balance (0 if the cash row is somehow absent).
    pub fn cash(&self) -> Money {
        self.positions
            .get(CASH_SYMBOL)
            .map(|p| p.quantity.as_money())
            .unwrap_or(Money::ZERO)
    }

    /// Non-cash holdings in symbol order.
    pub fn holdings(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| !p.is_cash())
    }

    /// Held quantity of a symbol (0 if not held).
    pub fn quantity(&self, symbol: &str) -> Qty {
        self.positions
            .get(&normalize_symbol(symbol))
            .map(|p| p.quantity)
            .unwrap_or(Qty::ZERO)
    }

    /// `true` if only cash is held.
    pub fn is_flat(&self) -> bool {
        self.holdings().next().is_none()
    }
}

// ---------------------------------------------------------------------------
// PositionLedger
// ---------------------------------------------------------------------------

/// The cash/asset book of one challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionLedger {
    positions: BTreeMap<String, Position>,
}

impl PositionLedger {
    /// Fresh ledger holding only `initial_cash`.
    pub fn new(initial_cash: Money) -> Self {
        let mut positions = BTreeMap::new();
        positions.insert(CASH_SYMBOL.to_string(), Position::cash(initial_cash));
        Self { positions }
    }

    /// Rehydrate from persisted rows. The cash row is required.
    ///
    /// Zero-quantity asset rows are dropped; negative quantities and
    /// duplicate symbols are rejected as corrupt.
    pub fn from_positions<I>(rows: I) -> Result<Self, LedgerError>
    where
        I: IntoIterator<Item = Position>,
    {
        let positions = collect_rows(rows)?;
        if !positions.contains_key(CASH_SYMBOL) {
            return Err(LedgerError::Corrupt {
                reason: format!("missing {CASH_SYMBOL} cash position"),
            });
        }
        Ok(Self { positions })
    }

    /// Rehydrate from persisted rows, creating the cash position from a
    /// legacy scalar cash balance when no cash row exists.
    ///
    /// Returns the ledger and `true` if the legacy balance was migrated.
    pub fn from_rows_or_legacy_cash<I>(rows: I, legacy_cash: Money) -> Result<(Self, bool), LedgerError>
    where
        I: IntoIterator<Item = Position>,
    {
        let mut positions = collect_rows(rows)?;
        let migrated = !positions.contains_key(CASH_SYMBOL);
        if migrated {
            if legacy_cash.is_negative() {
                return Err(LedgerError::Corrupt {
                    reason: format!("legacy cash balance is negative: {legacy_cash}"),
                });
            }
            positions.insert(CASH_SYMBOL.to_string(), Position::cash(legacy_cash));
        }
        Ok((Self { positions }, migrated))
    }

    // -----------------------------------------------------------------------
    // Write surface
    // -----------------------------------------------------------------------

    /// Buy `qty` of `symbol` at `price`, paying from cash. The cost is
    /// rounded up to the next micro, so no buy is free.
    ///
    /// # Errors
    /// `InvalidQuantity` / `InvalidPrice` / `EmptySymbol` /
    /// `CashSymbolNotTradable` for bad input, `InsufficientFunds` when cash
    /// is short, `Overflow` on arithmetic overflow. The ledger is **not**
    /// mutated on error.
    pub fn apply_buy(&mut self, symbol: &str, qty: Qty, price: Money) -> Result<LedgerDelta, LedgerError> {
        let symbol = validate_trade(symbol, qty, price)?;

        let cost = qty.checked_cost(price).ok_or(LedgerError::Overflow)?;
        let cash_before = self.cash_position().clone();
        let available = cash_before.quantity.as_money();
        if available < cost {
            return Err(LedgerError::InsufficientFunds {
                required: cost,
                available,
            });
        }

        let before = self.positions.get(&symbol).cloned();
        let after = match &before {
            Some(held) => {
                let quantity = held.quantity.checked_add(qty).ok_or(LedgerError::Overflow)?;
                let average_cost = weighted_average_cost(held.quantity, held.average_cost, qty, price)
                    .ok_or(LedgerError::Overflow)?;
                Position::new(symbol.clone(), quantity, average_cost)
            }
            None => Position::new(symbol.clone(), qty, price),
        };
        let cash_after = Position::cash(available - cost);

        // All checks passed; commit.
        self.positions.insert(CASH_SYMBOL.to_string(), cash_after.clone());
        self.positions.insert(symbol.clone(), after.clone());

        Ok(LedgerDelta {
            changes: vec![
                PositionChange {
                    symbol: CASH_SYMBOL.to_string(),
                    before: Some(cash_before),
                    after: Some(cash_after),
                },
                PositionChange {
                    symbol,
                    before,
                    after: Some(after),
                },
            ],
        })
    }

    /// Sell `qty` of `symbol` at `price`, crediting cash rounded down to the
    /// micro.
    ///
    /// Returns the delta and the realized PnL
    /// `(price − average_cost) × qty`. The average cost of the remaining
    /// quantity is unchanged; a holding that reaches zero is removed.
    ///
    /// # Errors
    /// Input errors as for [`apply_buy`](Self::apply_buy),
    /// `InsufficientPosition` when less than `qty` is held. The ledger is
    /// **not** mutated on error.
    pub fn apply_sell(&mut self, symbol: &str, qty: Qty, price: Money) -> Result<(LedgerDelta, Money), LedgerError> {
        let symbol = validate_trade(symbol, qty, price)?;

        let before = match self.positions.get(&symbol) {
            Some(held) if held.quantity >= qty => held.clone(),
            other => {
                return Err(LedgerError::InsufficientPosition {
                    symbol,
                    requested: qty,
                    held: other.map(|p| p.quantity).unwrap_or(Qty::ZERO),
                })
            }
        };

        let proceeds = qty.checked_proceeds(price).ok_or(LedgerError::Overflow)?;
        let realized = realized_pnl(price, before.average_cost, qty).ok_or(LedgerError::Overflow)?;
        let cash_before = self.cash_position().clone();
        let cash_after = Position::cash(
            cash_before
                .quantity
                .as_money()
                .checked_add(proceeds)
                .ok_or(LedgerError::Overflow)?,
        );

        let remaining = before.quantity - qty;
        let after = if is_dust(remaining) {
            None
        } else {
            Some(Position::new(symbol.clone(), remaining, before.average_cost))
        };

        // All checks passed; commit.
        self.positions.insert(CASH_SYMBOL.to_string(), cash_after.clone());
        match &after {
            Some(p) => {
                self.positions.insert(symbol.clone(), p.clone());
            }
            None => {
                self.positions.remove(&symbol);
            }
        }

        let delta = LedgerDelta {
            changes: vec![
                PositionChange {
                    symbol: CASH_SYMBOL.to_string(),
                    before: Some(cash_before),
                    after: Some(cash_after),
                },
                PositionChange {
                    symbol,
                    before: Some(before),
                    after,
                },
            ],
        };
        Ok((delta, realized))
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    /// Cloned, symbol-ordered view of every position.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            positions: self.positions.clone(),
        }
    }

    /// Current cash balance.
    pub fn cash(&self) -> Money {
        self.cash_position().quantity.as_money()
    }

    /// Position for `symbol`, if held.
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(&normalize_symbol(symbol))
    }

    /// `true` if only cash is held.
    pub fn is_flat(&self) -> bool {
        self.positions.values().all(Position::is_cash)
    }

    /// Re-check all ledger invariants: the cash row exists, every quantity is
    /// non-negative, and no asset row is dust.
    pub fn verify_invariants(&self) -> Result<(), LedgerError> {
        if !self.positions.contains_key(CASH_SYMBOL) {
            return Err(LedgerError::Corrupt {
                reason: format!("missing {CASH_SYMBOL} cash position"),
            });
        }
        for (symbol, p) in &self.positions {
            if symbol != &p.symbol {
                return Err(LedgerError::Corrupt {
                    reason: format!("row keyed {symbol} holds {}", p.symbol),
                });
            }
            if p.quantity.is_negative() {
                return Err(LedgerError::Corrupt {
                    reason: format!("{symbol} quantity is negative: {}", p.quantity),
                });
            }
            if !p.is_cash() && is_dust(p.quantity) {
                return Err(LedgerError::Corrupt {
                    reason: format!("{symbol} retained with zero quantity"),
                });
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn cash_position(&self) -> &Position {
        // Every constructor inserts the cash row and no mutation removes it.
        match self.positions.get(CASH_SYMBOL) {
            Some(p) => p,
            None => unreachable!("PositionLedger without {CASH_SYMBOL} row"),
        }
    }
}

fn validate_trade(symbol: &str, qty: Qty, price: Money) -> Result<String, LedgerError> {
    let symbol = normalize_symbol(symbol);
    if symbol.is_empty() {
        return Err(LedgerError::EmptySymbol);
    }
    if symbol == CASH_SYMBOL {
        return Err(LedgerError::CashSymbolNotTradable);
    }
    if !qty.is_positive() {
        return Err(LedgerError::InvalidQuantity { qty });
    }
    if !price.is_positive() {
        return Err(LedgerError::InvalidPrice { price });
    }
    Ok(symbol)
}

fn collect_rows<I>(rows: I) -> Result<BTreeMap<String, Position>, LedgerError>
where
    I: IntoIterator<Item = Position>,
{
    let mut positions = BTreeMap::new();
    for mut row in rows {
        row.symbol = normalize_symbol(&row.symbol);
        if row.symbol.is_empty() {
            return Err(LedgerError::EmptySymbol);
        }
        if row.quantity.is_negative() {
            return Err(LedgerError::Corrupt {
                reason: format!("{} quantity is negative: {}", row.symbol, row.quantity),
            });
        }
        if row.is_cash() {
            row.average_cost = Money::ONE;
        } else if is_dust(row.quantity) {
            continue;
        }
        let symbol = row.symbol.clone();
        if positions.insert(symbol.clone(), row).is_some() {
            return Err(LedgerError::Corrupt {
                reason: format!("duplicate position row for {symbol}"),
            });
        }
    }
    Ok(positions)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
