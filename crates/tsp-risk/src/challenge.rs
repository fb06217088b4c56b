//! Challenge aggregate and its state machine.
//!
//! # Lifecycle
//!
//! ```text
//!            evaluate: loss limit
//!   ACTIVE ───────────────────────▶ FAILED      (terminal)
//!     │
//!     └──────────────────────────▶ SUCCESSFUL  (terminal)
//!            evaluate: profit target
//! ```
//!
//! Fields are private. Every mutation goes through a method that keeps the
//! invariants: `starting_balance` never changes, and terminal statuses are
//! final.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tsp_portfolio::Money;
use uuid::Uuid;

use crate::types::{ChallengeStatus, RiskRules, RuleError};

/// One virtual trading account under a rule set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    id: Uuid,
    user_id: String,
    plan: String,
    starting_balance: Money,
    current_cash: Money,
    status: ChallengeStatus,
    rules: RiskRules,
    created_at: DateTime<Utc>,
    daily_baseline_equity: Money,
    daily_baseline_date: NaiveDate,
    last_trade_at: Option<DateTime<Utc>>,
    archived_at: Option<DateTime<Utc>>,
    revision: i64,
}

/// Flat, public form of a [`Challenge`] for persistence layers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeParts {
    pub id: Uuid,
    pub user_id: String,
    pub plan: String,
    pub starting_balance: Money,
    pub current_cash: Money,
    pub status: ChallengeStatus,
    pub rules: RiskRules,
    pub created_at: DateTime<Utc>,
    pub daily_baseline_equity: Money,
    pub daily_baseline_date: NaiveDate,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub revision: i64,
}

impl Challenge {
    /// Open a new ACTIVE challenge.
    ///
    /// Cash and the daily baseline start at `starting_balance`; the baseline
    /// date is the UTC date of `created_at`. Use
    /// [`DailyWindow::open_challenge`](crate::DailyWindow::open_challenge)
    /// to date the baseline in the deployment's reference zone instead.
    pub fn open(
        id: Uuid,
        user_id: impl Into<String>,
        plan: impl Into<String>,
        starting_balance: Money,
        rules: RiskRules,
        created_at: DateTime<Utc>,
    ) -> Result<Self, RuleError> {
        if !starting_balance.is_positive() {
            return Err(RuleError::InvalidStartingBalance {
                value: starting_balance,
            });
        }
        rules.validate()?;

        Ok(Self {
            id,
            user_id: user_id.into(),
            plan: plan.into(),
            starting_balance,
            current_cash: starting_balance,
            status: ChallengeStatus::Active,
            rules,
            created_at,
            daily_baseline_equity: starting_balance,
            daily_baseline_date: created_at.date_naive(),
            last_trade_at: None,
            archived_at: None,
            revision: 0,
        })
    }

    /// Rehydrate from persisted parts.
    pub fn restore(parts: ChallengeParts) -> Result<Self, RuleError> {
        if !parts.starting_balance.is_positive() {
            return Err(RuleError::InvalidStartingBalance {
                value: parts.starting_balance,
            });
        }
        parts.rules.validate()?;

        Ok(Self {
            id: parts.id,
            user_id: parts.user_id,
            plan: parts.plan,
            starting_balance: parts.starting_balance,
            current_cash: parts.current_cash,
            status: parts.status,
            rules: parts.rules,
            created_at: parts.created_at,
            daily_baseline_equity: parts.daily_baseline_equity,
            daily_baseline_date: parts.daily_baseline_date,
            last_trade_at: parts.last_trade_at,
            archived_at: parts.archived_at,
            revision: parts.revision,
        })
    }

    pub fn to_parts(&self) -> ChallengeParts {
        ChallengeParts {
            id: self.id,
            user_id: self.user_id.clone(),
            plan: self.plan.clone(),
            starting_balance: self.starting_balance,
            current_cash: self.current_cash,
            status: self.status,
            rules: self.rules,
            created_at: self.created_at,
            daily_baseline_equity: self.daily_baseline_equity,
            daily_baseline_date: self.daily_baseline_date,
            last_trade_at: self.last_trade_at,
            archived_at: self.archived_at,
            revision: self.revision,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn plan(&self) -> &str {
        &self.plan
    }

    pub fn starting_balance(&self) -> Money {
        self.starting_balance
    }

    pub fn current_cash(&self) -> Money {
        self.current_cash
    }

    pub fn status(&self) -> ChallengeStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == ChallengeStatus::Active
    }

    pub fn rules(&self) -> &RiskRules {
        &self.rules
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn daily_baseline_equity(&self) -> Money {
        self.daily_baseline_equity
    }

    pub fn daily_baseline_date(&self) -> NaiveDate {
        self.daily_baseline_date
    }

    pub fn last_trade_at(&self) -> Option<DateTime<Utc>> {
        self.last_trade_at
    }

    pub fn archived_at(&self) -> Option<DateTime<Utc>> {
        self.archived_at
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Optimistic-concurrency counter; bumped once per persisted change.
    pub fn revision(&self) -> i64 {
        self.revision
    }

    // -----------------------------------------------------------------------
    // Mutators
    // -----------------------------------------------------------------------

    /// Move to `to`.
    ///
    /// Returns `Ok(true)` on ACTIVE → terminal, `Ok(false)` when already in
    /// `to`, and `InvalidTransition` for anything else.
    pub fn transition(&mut self, to: ChallengeStatus) -> Result<bool, RuleError> {
        if self.status == to {
            return Ok(false);
        }
        if self.status != ChallengeStatus::Active {
            return Err(RuleError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(true)
    }

    /// Soft-archive a terminal challenge. Idempotent: returns `Ok(false)` if
    /// already archived.
    pub fn archive(&mut self, now: DateTime<Utc>) -> Result<bool, RuleError> {
        if !self.status.is_terminal() {
            return Err(RuleError::NotTerminal {
                status: self.status,
            });
        }
        if self.archived_at.is_some() {
            return Ok(false);
        }
        self.archived_at = Some(now);
        Ok(true)
    }

    /// Mirror the ledger cash after a trade executed at `at`.
    pub fn record_trade(&mut self, cash: Money, at: DateTime<Utc>) {
        self.current_cash = cash;
        self.last_trade_at = Some(self.last_trade_at.map_or(at, |prev| prev.max(at)));
    }

    /// Mirror the ledger cash without a trade (legacy cash migration).
    pub fn sync_cash(&mut self, cash: Money) {
        self.current_cash = cash;
    }

    /// Advance the revision before handing the challenge to a store.
    pub fn bump_revision(&mut self) {
        self.revision += 1;
    }

    pub(crate) fn set_daily_baseline(&mut self, date: NaiveDate, equity: Money) {
        self.daily_baseline_date = date;
        self.daily_baseline_equity = equity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap()
    }

    fn open() -> Challenge {
        Challenge::open(
            Uuid::new_v4(),
            "user-1",
            "Starter",
            Money::from_whole(5_000),
            RiskRules::standard(),
            t0(),
        )
        .unwrap()
    }

    #[test]
    fn open_initializes_cash_and_baseline() {
        let c = open();
        assert_eq!(c.status(), ChallengeStatus::Active);
        assert_eq!(c.current_cash(), Money::from_whole(5_000));
        assert_eq!(c.daily_baseline_equity(), Money::from_whole(5_000));
        assert_eq!(c.daily_baseline_date(), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        assert_eq!(c.revision(), 0);
    }

    #[test]
    fn open_rejects_non_positive_balance() {
        let err = Challenge::open(
            Uuid::new_v4(),
            "u",
            "Pro",
            Money::ZERO,
            RiskRules::standard(),
            t0(),
        );
        assert_eq!(
            err,
            Err(RuleError::InvalidStartingBalance { value: Money::ZERO })
        );
    }

    #[test]
    fn terminal_status_is_final() {
        let mut c = open();
        assert_eq!(c.transition(ChallengeStatus::Failed), Ok(true));
        assert_eq!(c.transition(ChallengeStatus::Failed), Ok(false));
        assert_eq!(
            c.transition(ChallengeStatus::Successful),
            Err(RuleError::InvalidTransition {
                from: ChallengeStatus::Failed,
                to: ChallengeStatus::Successful,
            })
        );
        assert!(c.transition(ChallengeStatus::Active).is_err());
        assert_eq!(c.status(), ChallengeStatus::Failed);
    }

    #[test]
    fn archive_requires_terminal_and_is_idempotent() {
        let mut c = open();
        assert!(matches!(c.archive(t0()), Err(RuleError::NotTerminal { .. })));

        c.transition(ChallengeStatus::Successful).unwrap();
        assert_eq!(c.archive(t0()), Ok(true));
        assert_eq!(c.archive(t0()), Ok(false));
        assert_eq!(c.archived_at(), Some(t0()));
    }

    #[test]
    fn last_trade_at_never_moves_backwards() {
        let mut c = open();
        let later = t0() + chrono::Duration::minutes(5);
        c.record_trade(Money::from_whole(4_000), later);
        c.record_trade(Money::from_whole(3_000), t0());
        assert_eq!(c.last_trade_at(), Some(later));
        assert_eq!(c.current_cash(), Money::from_whole(3_000));
    }

    #[test]
    fn parts_round_trip() {
        let mut c = open();
        c.bump_revision();
        let back = Challenge::restore(c.to_parts()).unwrap();
        assert_eq!(back, c);
    }
}
