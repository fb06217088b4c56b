use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tsp_portfolio::{LedgerDelta, Money, PositionLedger, Qty, Side};
use tsp_risk::{Challenge, EvaluationResult, Rollover};
use uuid::Uuid;

/// A request to buy or sell, as submitted by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub symbol: String,
    pub side: Side,
    pub quantity: Qty,
    pub price: Money,
}

impl TradeIntent {
    pub fn new(symbol: impl Into<String>, side: Side, quantity: Qty, price: Money) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price,
        }
    }

    pub fn buy(symbol: impl Into<String>, quantity: Qty, price: Money) -> Self {
        Self::new(symbol, Side::Buy, quantity, price)
    }

    pub fn sell(symbol: impl Into<String>, quantity: Qty, price: Money) -> Self {
        Self::new(symbol, Side::Sell, quantity, price)
    }
}

/// Immutable record of one executed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub challenge_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: Qty,
    pub price: Money,
    /// 0 for buys; `(price − average_cost) × quantity` for sells.
    pub realized_pnl: Money,
    pub created_at: DateTime<Utc>,
}

/// A challenge together with its ledger: the unit the processor works on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChallengeBook {
    pub challenge: Challenge,
    pub ledger: PositionLedger,
}

impl ChallengeBook {
    pub fn new(challenge: Challenge, ledger: PositionLedger) -> Self {
        Self { challenge, ledger }
    }

    /// Fresh book with the ledger holding only the starting balance.
    pub fn opened(challenge: Challenge) -> Self {
        let ledger = PositionLedger::new(challenge.starting_balance());
        Self { challenge, ledger }
    }
}

/// Everything one executed trade produced. The caller persists `challenge`,
/// `delta` and `trade` as one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TradeResult {
    pub trade: Trade,
    pub delta: LedgerDelta,
    pub rollover: Option<Rollover>,
    pub evaluation: EvaluationResult,
    pub challenge: Challenge,
}

/// Outcome of an on-demand mark-to-market evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkResult {
    pub rollover: Option<Rollover>,
    pub evaluation: EvaluationResult,
}

impl MarkResult {
    /// `true` when the challenge row needs to be persisted.
    pub fn changed(&self) -> bool {
        self.rollover.is_some() || self.evaluation.transitioned()
    }
}
