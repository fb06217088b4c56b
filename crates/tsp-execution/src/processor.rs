//! Trade transaction processor.
//!
//! # Purpose
//! Applies one buy/sell to a [`ChallengeBook`] as a single logical
//! transaction:
//!
//! 1. the challenge must be ACTIVE and the inputs positive;
//! 2. lazy daily rollover on the pre-trade ledger;
//! 3. ledger mutation (cash check / position check);
//! 4. trade record with a per-challenge monotonic timestamp;
//! 5. equity & risk evaluation, status transition.
//!
//! # Atomicity
//! Every step runs on copies of the challenge and ledger. The caller's book
//! is replaced only after all steps succeed, so a failed trade leaves no
//! partial state and no orphaned trade record.

use chrono::{DateTime, Utc};
use tsp_portfolio::{normalize_symbol, LedgerError, Money, PriceLookup, Qty, Side};
use tsp_risk::{evaluate_and_transition, Challenge, ChallengeStatus, DailyWindow, Rollover, RuleError};
use uuid::Uuid;

use crate::types::{ChallengeBook, MarkResult, Trade, TradeIntent, TradeResult};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a trade was refused. The book is unchanged in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeError {
    /// The challenge is SUCCESSFUL or FAILED; no further trades are admitted.
    ChallengeNotActive { status: ChallengeStatus },
    /// Non-positive quantity or price, empty or reserved symbol.
    InvalidInput { reason: String },
    InsufficientFunds { required: Money, available: Money },
    InsufficientPosition {
        symbol: String,
        requested: Qty,
        held: Qty,
    },
    /// Trade value or cost basis does not fit the fixed-point range.
    Overflow,
    /// Lifecycle rule violated while applying the evaluation.
    Rule(RuleError),
}

impl std::fmt::Display for TradeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChallengeNotActive { status } => {
                write!(f, "trade rejected: challenge is {status}")
            }
            Self::InvalidInput { reason } => write!(f, "trade rejected: {reason}"),
            Self::InsufficientFunds {
                required,
                available,
            } => write!(
                f,
                "trade rejected: insufficient funds (required {required}, available {available})"
            ),
            Self::InsufficientPosition {
                symbol,
                requested,
                held,
            } => write!(
                f,
                "trade rejected: insufficient {symbol} position (requested {requested}, held {held})"
            ),
            Self::Overflow => write!(f, "trade rejected: arithmetic overflow"),
            Self::Rule(e) => write!(f, "trade rejected: {e}"),
        }
    }
}

impl std::error::Error for TradeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rule(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LedgerError> for TradeError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds {
                required,
                available,
            } => Self::InsufficientFunds {
                required,
                available,
            },
            LedgerError::InsufficientPosition {
                symbol,
                requested,
                held,
            } => Self::InsufficientPosition {
                symbol,
                requested,
                held,
            },
            LedgerError::Overflow => Self::Overflow,
            other => Self::InvalidInput {
                reason: other.to_string(),
            },
        }
    }
}

impl From<RuleError> for TradeError {
    fn from(e: RuleError) -> Self {
        Self::Rule(e)
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Stateless apart from the daily window calendar.
#[derive(Clone, Copy, Debug, Default)]
pub struct TradeProcessor {
    window: DailyWindow,
}

impl TradeProcessor {
    pub fn new(window: DailyWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &DailyWindow {
        &self.window
    }

    /// Execute one trade against `book`.
    ///
    /// On success `book` holds the post-trade, rule-checked state and the
    /// result carries what the caller must persist. On error `book` is
    /// untouched.
    pub fn execute<P: PriceLookup + ?Sized>(
        &self,
        book: &mut ChallengeBook,
        intent: &TradeIntent,
        prices: &P,
        now: DateTime<Utc>,
    ) -> Result<TradeResult, TradeError> {
        let status = book.challenge.status();
        if status != ChallengeStatus::Active {
            return Err(TradeError::ChallengeNotActive { status });
        }
        if !intent.quantity.is_positive() {
            return Err(TradeError::InvalidInput {
                reason: format!("quantity must be > 0, got {}", intent.quantity),
            });
        }
        if !intent.price.is_positive() {
            return Err(TradeError::InvalidInput {
                reason: format!("price must be > 0, got {}", intent.price),
            });
        }

        let mut challenge = book.challenge.clone();
        let mut ledger = book.ledger.clone();

        let rollover = self
            .window
            .maybe_rollover(&mut challenge, &ledger.snapshot(), prices, now);

        let (delta, realized_pnl) = match intent.side {
            Side::Buy => (
                ledger.apply_buy(&intent.symbol, intent.quantity, intent.price)?,
                Money::ZERO,
            ),
            Side::Sell => ledger.apply_sell(&intent.symbol, intent.quantity, intent.price)?,
        };

        let created_at = challenge.last_trade_at().map_or(now, |last| last.max(now));
        let trade = Trade {
            id: Uuid::new_v4(),
            challenge_id: challenge.id(),
            symbol: normalize_symbol(&intent.symbol),
            side: intent.side,
            quantity: intent.quantity,
            price: intent.price,
            realized_pnl,
            created_at,
        };
        challenge.record_trade(ledger.cash(), created_at);

        let evaluation = evaluate_and_transition(&mut challenge, &ledger.snapshot(), prices)?;

        // Commit.
        book.challenge = challenge.clone();
        book.ledger = ledger;

        Ok(TradeResult {
            trade,
            delta,
            rollover,
            evaluation,
            challenge,
        })
    }

    /// On-demand evaluation without a trade: rollover, evaluate, transition.
    /// Routes through the same evaluator as [`execute`](Self::execute).
    pub fn mark_to_market<P: PriceLookup + ?Sized>(
        &self,
        book: &mut ChallengeBook,
        prices: &P,
        now: DateTime<Utc>,
    ) -> Result<MarkResult, TradeError> {
        let mut challenge = book.challenge.clone();
        let rollover = self.roll_if_active(&mut challenge, book, prices, now);
        let evaluation = evaluate_and_transition(&mut challenge, &book.ledger.snapshot(), prices)?;
        book.challenge = challenge;
        Ok(MarkResult {
            rollover,
            evaluation,
        })
    }

    /// Lazy rollover for read paths.
    pub fn touch<P: PriceLookup + ?Sized>(
        &self,
        book: &mut ChallengeBook,
        prices: &P,
        now: DateTime<Utc>,
    ) -> Option<Rollover> {
        let mut challenge = book.challenge.clone();
        let rollover = self.roll_if_active(&mut challenge, book, prices, now);
        book.challenge = challenge;
        rollover
    }

    fn roll_if_active<P: PriceLookup + ?Sized>(
        &self,
        challenge: &mut Challenge,
        book: &ChallengeBook,
        prices: &P,
        now: DateTime<Utc>,
    ) -> Option<Rollover> {
        // Terminal challenges keep their last baseline.
        if !challenge.is_active() {
            return None;
        }
        self.window
            .maybe_rollover(challenge, &book.ledger.snapshot(), prices, now)
    }
}
