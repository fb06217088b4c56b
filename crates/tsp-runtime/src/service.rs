//! Challenge service.
//!
//! # Purpose
//! Drives the pure processor against a [`ChallengeStore`]: load the book,
//! apply one operation, persist the result.
//!
//! # Design
//! - One async lock per challenge is held across load → apply → save, so
//!   operations on the same challenge are serialized and different
//!   challenges run in parallel. Starting a challenge holds a per-user lock.
//! - The store's revision check catches writers in other processes. A
//!   conflict reloads and re-applies, up to [`CONFLICT_ATTEMPTS`] times.
//! - Read paths perform the lazy daily rollover and persist it when it
//!   happens.

use std::fmt;

use tracing::{info, warn};
use tsp_execution::{
    ChallengeBook, ChallengeStore, Clock, StoreError, Trade, TradeError, TradeIntent, TradeProcessor, TradeQuery,
};
use tsp_portfolio::{
    LedgerDelta, LedgerError, Money, PositionChange, PositionLedger, PriceLookup, Side, CASH_SYMBOL,
};
use tsp_risk::{Challenge, EvaluationResult, Rollover, RuleError};
use uuid::Uuid;

use crate::locks::KeyedLocks;
use crate::settings::EngineSettings;
use crate::views::{ChallengeSummary, PortfolioView, TradeOutcome, TradeStats};

pub const CONFLICT_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ServiceError {
    NotFound { challenge_id: Uuid },
    ActiveChallengeExists { user_id: String },
    Trade(TradeError),
    Rule(RuleError),
    /// Still conflicting after `attempts` tries.
    Conflict { challenge_id: Uuid, attempts: u32 },
    Store(anyhow::Error),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::NotFound { challenge_id } => write!(f, "challenge {challenge_id} not found"),
            ServiceError::ActiveChallengeExists { user_id } => {
                write!(f, "user {user_id} already has an active challenge")
            }
            ServiceError::Trade(e) => write!(f, "{e}"),
            ServiceError::Rule(e) => write!(f, "{e}"),
            ServiceError::Conflict {
                challenge_id,
                attempts,
            } => write!(
                f,
                "challenge {challenge_id} was modified concurrently ({attempts} attempt(s))"
            ),
            ServiceError::Store(e) => write!(f, "store failure: {e:#}"),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Trade(e) => Some(e),
            ServiceError::Rule(e) => Some(e),
            ServiceError::Store(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<TradeError> for ServiceError {
    fn from(e: TradeError) -> Self {
        ServiceError::Trade(e)
    }
}

impl From<RuleError> for ServiceError {
    fn from(e: RuleError) -> Self {
        ServiceError::Rule(e)
    }
}

/// A store conflict on a single-shot write. Retrying paths report their own
/// attempt count.
impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { challenge_id, .. } => ServiceError::Conflict {
                challenge_id,
                attempts: 1,
            },
            StoreError::ActiveChallengeExists { user_id } => ServiceError::ActiveChallengeExists { user_id },
            StoreError::Backend(e) => ServiceError::Store(e),
        }
    }
}

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        ServiceError::Store(anyhow::Error::new(e).context("stored positions are inconsistent"))
    }
}

enum Saved {
    Done,
    Conflict,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct ChallengeService<S, C> {
    store: S,
    clock: C,
    settings: EngineSettings,
    processor: TradeProcessor,
    challenge_locks: KeyedLocks<Uuid>,
    user_locks: KeyedLocks<String>,
}

impl<S: ChallengeStore, C: Clock> ChallengeService<S, C> {
    pub fn new(store: S, clock: C, settings: EngineSettings) -> Self {
        Self {
            store,
            clock,
            processor: TradeProcessor::new(settings.window),
            settings,
            challenge_locks: KeyedLocks::new(),
            user_locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Open a new ACTIVE challenge for `user_id`.
    ///
    /// Starting balance and rules come from the settings; `plan` is recorded
    /// only.
    pub async fn start_challenge(&self, user_id: &str, plan: &str) -> Result<Challenge, ServiceError> {
        let _guard = self.user_locks.lock(&user_id.to_string()).await;

        if self.store.find_active_challenge(user_id).await?.is_some() {
            return Err(ServiceError::ActiveChallengeExists {
                user_id: user_id.to_string(),
            });
        }

        let challenge = self.settings.window.open_challenge(
            Uuid::new_v4(),
            user_id,
            plan,
            self.settings.starting_balance,
            self.settings.rules,
            self.clock.now(),
        )?;
        let book = ChallengeBook::opened(challenge);
        let rows: Vec<_> = book.ledger.snapshot().positions.into_values().collect();
        self.store.insert_challenge(&book.challenge, &rows).await?;

        info!(
            challenge_id = %book.challenge.id(),
            user_id,
            plan,
            starting_balance = %book.challenge.starting_balance(),
            "challenge started"
        );
        Ok(book.challenge)
    }

    /// Most recent ACTIVE, non-archived challenge of the user.
    pub async fn current_challenge(&self, user_id: &str) -> Result<Option<Challenge>, ServiceError> {
        Ok(self.store.find_active_challenge(user_id).await?)
    }

    pub async fn execute_trade<P: PriceLookup + ?Sized>(
        &self,
        challenge_id: Uuid,
        intent: &TradeIntent,
        prices: &P,
    ) -> Result<TradeOutcome, ServiceError> {
        let _guard = self.challenge_locks.lock(&challenge_id).await;

        for attempt in 1..=CONFLICT_ATTEMPTS {
            let Some(mut book) = self.load_book(challenge_id, attempt).await? else {
                continue;
            };

            let mut result = match self.processor.execute(&mut book, intent, prices, self.clock.now()) {
                Ok(r) => r,
                Err(e) => {
                    warn!(
                        challenge_id = %challenge_id,
                        symbol = %intent.symbol,
                        side = %intent.side,
                        error = %e,
                        "trade rejected"
                    );
                    return Err(e.into());
                }
            };
            result.challenge.bump_revision();

            match self
                .persist(&result.challenge, &result.delta, Some(&result.trade))
                .await?
            {
                Saved::Conflict => {
                    warn!(challenge_id = %challenge_id, attempt, "revision conflict on trade; retrying");
                    continue;
                }
                Saved::Done => {}
            }

            info!(
                challenge_id = %challenge_id,
                trade_id = %result.trade.id,
                symbol = %result.trade.symbol,
                side = %result.trade.side,
                quantity = %result.trade.quantity,
                price = %result.trade.price,
                realized_pnl = %result.trade.realized_pnl,
                equity = %result.evaluation.equity,
                status = %result.evaluation.new_status,
                "trade executed"
            );
            self.log_rollover(challenge_id, result.rollover.as_ref());
            self.log_evaluation(challenge_id, &result.evaluation);
            return Ok(result.into());
        }

        Err(ServiceError::Conflict {
            challenge_id,
            attempts: CONFLICT_ATTEMPTS,
        })
    }

    /// On-demand mark-to-market check. Persists any rollover or transition.
    pub async fn evaluate<P: PriceLookup + ?Sized>(
        &self,
        challenge_id: Uuid,
        prices: &P,
    ) -> Result<EvaluationResult, ServiceError> {
        let _guard = self.challenge_locks.lock(&challenge_id).await;

        for attempt in 1..=CONFLICT_ATTEMPTS {
            let Some(mut book) = self.load_book(challenge_id, attempt).await? else {
                continue;
            };

            let mark = self.processor.mark_to_market(&mut book, prices, self.clock.now())?;
            if mark.changed() {
                book.challenge.bump_revision();
                if let Saved::Conflict = self.persist(&book.challenge, &LedgerDelta::empty(), None).await? {
                    warn!(challenge_id = %challenge_id, attempt, "revision conflict on evaluate; retrying");
                    continue;
                }
            }

            self.log_rollover(challenge_id, mark.rollover.as_ref());
            self.log_evaluation(challenge_id, &mark.evaluation);
            return Ok(mark.evaluation);
        }

        Err(ServiceError::Conflict {
            challenge_id,
            attempts: CONFLICT_ATTEMPTS,
        })
    }

    /// Cash, marked holdings and equity. Performs the lazy rollover.
    pub async fn portfolio<P: PriceLookup + ?Sized>(
        &self,
        challenge_id: Uuid,
        prices: &P,
    ) -> Result<PortfolioView, ServiceError> {
        let _guard = self.challenge_locks.lock(&challenge_id).await;

        for attempt in 1..=CONFLICT_ATTEMPTS {
            let Some(mut book) = self.load_book(challenge_id, attempt).await? else {
                continue;
            };

            let rollover = self.processor.touch(&mut book, prices, self.clock.now());
            if rollover.is_some() {
                book.challenge.bump_revision();
                if let Saved::Conflict = self.persist(&book.challenge, &LedgerDelta::empty(), None).await? {
                    warn!(challenge_id = %challenge_id, attempt, "revision conflict on rollover; retrying");
                    continue;
                }
                self.log_rollover(challenge_id, rollover.as_ref());
            }

            let view = PortfolioView::build(book.challenge.to_parts(), &book.ledger.snapshot(), prices);
            if view.equity.is_degraded() {
                warn!(
                    challenge_id = %challenge_id,
                    symbols = ?view.equity.fallback_symbols,
                    "no market price; valued at average cost"
                );
            }
            return Ok(view);
        }

        Err(ServiceError::Conflict {
            challenge_id,
            attempts: CONFLICT_ATTEMPTS,
        })
    }

    /// Newest first. `limit` defaults to the configured history limit.
    pub async fn trade_history(&self, challenge_id: Uuid, limit: Option<usize>) -> Result<Vec<Trade>, ServiceError> {
        self.require(challenge_id).await?;
        let query = TradeQuery::latest(limit.unwrap_or(self.settings.history_limit));
        Ok(self.store.load_trades(challenge_id, &query).await?)
    }

    /// Evaluation plus today's realized PnL and whole-history trade stats.
    pub async fn summary<P: PriceLookup + ?Sized>(
        &self,
        challenge_id: Uuid,
        prices: &P,
    ) -> Result<ChallengeSummary, ServiceError> {
        let evaluation = self.evaluate(challenge_id, prices).await?;

        let (day_start, _) = self.settings.window.today_bounds(self.clock.now());
        let today = self
            .store
            .load_trades(challenge_id, &TradeQuery::since(day_start))
            .await?;
        let today_realized_pnl = today
            .iter()
            .filter(|t| t.side == Side::Sell)
            .fold(Money::ZERO, |acc, t| acc.saturating_add(t.realized_pnl));

        let all = self
            .store
            .load_trades(challenge_id, &TradeQuery::default())
            .await?;

        Ok(ChallengeSummary {
            evaluation,
            today_realized_pnl,
            stats: TradeStats::from_trades(&all),
        })
    }

    /// Soft-archive a SUCCESSFUL or FAILED challenge. Archiving twice is a
    /// no-op.
    pub async fn archive(&self, challenge_id: Uuid) -> Result<Challenge, ServiceError> {
        let _guard = self.challenge_locks.lock(&challenge_id).await;

        for attempt in 1..=CONFLICT_ATTEMPTS {
            let mut challenge = self.require(challenge_id).await?;
            if !challenge.archive(self.clock.now())? {
                return Ok(challenge);
            }
            challenge.bump_revision();
            if let Saved::Conflict = self.persist(&challenge, &LedgerDelta::empty(), None).await? {
                warn!(challenge_id = %challenge_id, attempt, "revision conflict on archive; retrying");
                continue;
            }
            info!(challenge_id = %challenge_id, status = %challenge.status(), "challenge archived");
            return Ok(challenge);
        }

        Err(ServiceError::Conflict {
            challenge_id,
            attempts: CONFLICT_ATTEMPTS,
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn require(&self, challenge_id: Uuid) -> Result<Challenge, ServiceError> {
        self.store
            .load_challenge(challenge_id)
            .await?
            .ok_or(ServiceError::NotFound { challenge_id })
    }

    /// Load challenge + ledger. A challenge stored without a cash row gets
    /// one seeded from its recorded cash, persisted before anything else.
    /// `None` when that seeding save hit a revision conflict.
    async fn load_book(&self, challenge_id: Uuid, attempt: u32) -> Result<Option<ChallengeBook>, ServiceError> {
        let mut challenge = self.require(challenge_id).await?;
        let rows = self.store.load_positions(challenge_id).await?;
        let (ledger, migrated) = PositionLedger::from_rows_or_legacy_cash(rows, challenge.current_cash())?;
        ledger.verify_invariants()?;

        if migrated {
            let cash_row = ledger.snapshot().positions.get(CASH_SYMBOL).cloned();
            let delta = LedgerDelta {
                changes: vec![PositionChange {
                    symbol: CASH_SYMBOL.to_string(),
                    before: None,
                    after: cash_row,
                }],
            };
            challenge.sync_cash(ledger.cash());
            challenge.bump_revision();
            if let Saved::Conflict = self.persist(&challenge, &delta, None).await? {
                warn!(challenge_id = %challenge_id, attempt, "revision conflict on cash seeding; retrying");
                return Ok(None);
            }
            warn!(
                challenge_id = %challenge_id,
                cash = %ledger.cash(),
                "seeded missing cash position from challenge balance"
            );
        }

        Ok(Some(ChallengeBook::new(challenge, ledger)))
    }

    async fn persist(
        &self,
        challenge: &Challenge,
        delta: &LedgerDelta,
        trade: Option<&Trade>,
    ) -> Result<Saved, ServiceError> {
        match self.store.save(challenge, delta, trade).await {
            Ok(()) => Ok(Saved::Done),
            Err(StoreError::Conflict { .. }) => Ok(Saved::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    fn log_rollover(&self, challenge_id: Uuid, rollover: Option<&Rollover>) {
        if let Some(r) = rollover {
            info!(
                challenge_id = %challenge_id,
                previous_date = %r.previous_date,
                new_date = %r.new_date,
                baseline = %r.new_baseline,
                "daily window rolled over"
            );
        }
    }

    fn log_evaluation(&self, challenge_id: Uuid, ev: &EvaluationResult) {
        if ev.transitioned() {
            info!(
                challenge_id = %challenge_id,
                from = %ev.previous_status,
                status = %ev.new_status,
                reason = ?ev.reason,
                equity = %ev.equity,
                "challenge status changed"
            );
        }
        if ev.price_unavailable() {
            warn!(
                challenge_id = %challenge_id,
                symbols = ?ev.fallback_symbols,
                "no market price; valued at average cost"
            );
        }
    }
}
