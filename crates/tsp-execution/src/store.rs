//! Persistence contract for challenges, positions and trades.
//!
//! [`ChallengeStore::save`] is the single write path after a challenge
//! exists: it persists the challenge row, applies the ledger delta and
//! appends the trade (if any) as one atomic unit, guarded by an optimistic
//! revision check. [`MemoryStore`] is the in-process implementation used by
//! tests and offline replays; the PostgreSQL implementation lives in
//! `tsp-db`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tsp_portfolio::{LedgerDelta, Position};
use tsp_risk::{Challenge, ChallengeStatus};
use uuid::Uuid;

use crate::types::Trade;

// ---------------------------------------------------------------------------
// Errors / queries
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    /// The stored revision is not the one the caller loaded.
    Conflict {
        challenge_id: Uuid,
        expected: i64,
        found: Option<i64>,
    },
    /// The user already has an ACTIVE, non-archived challenge.
    ActiveChallengeExists { user_id: String },
    /// Connection, query or decode failure.
    Backend(anyhow::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflict {
                challenge_id,
                expected,
                found,
            } => match found {
                Some(found) => write!(
                    f,
                    "store: revision conflict on challenge {challenge_id} (expected {expected}, found {found})"
                ),
                None => write!(f, "store: challenge {challenge_id} does not exist"),
            },
            Self::ActiveChallengeExists { user_id } => {
                write!(f, "store: user {user_id} already has an active challenge")
            }
            Self::Backend(e) => write!(f, "store: {e:#}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(e: anyhow::Error) -> Self {
        Self::Backend(e)
    }
}

/// Trade history filter. Results are always newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TradeQuery {
    /// Only trades with `created_at >= since`.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TradeQuery {
    pub fn latest(limit: usize) -> Self {
        Self {
            since: None,
            limit: Some(limit),
        }
    }

    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            limit: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Persist a newly opened challenge and its initial positions.
    async fn insert_challenge(&self, challenge: &Challenge, positions: &[Position]) -> Result<(), StoreError>;

    async fn load_challenge(&self, id: Uuid) -> Result<Option<Challenge>, StoreError>;

    /// Most recent ACTIVE, non-archived challenge of `user_id`.
    async fn find_active_challenge(&self, user_id: &str) -> Result<Option<Challenge>, StoreError>;

    async fn load_positions(&self, challenge_id: Uuid) -> Result<Vec<Position>, StoreError>;

    /// Atomically write the challenge row, apply `delta` and append `trade`.
    ///
    /// The stored revision must equal `challenge.revision() - 1`; otherwise
    /// nothing is written and `StoreError::Conflict` is returned.
    async fn save(&self, challenge: &Challenge, delta: &LedgerDelta, trade: Option<&Trade>) -> Result<(), StoreError>;

    async fn load_trades(&self, challenge_id: Uuid, query: &TradeQuery) -> Result<Vec<Trade>, StoreError>;
}

/// Newest first; ties keep reverse append order.
pub fn sort_newest_first(trades: &mut [Trade]) {
    trades.reverse();
    trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Failure to inject into the next [`MemoryStore::save`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveFault {
    /// Bump the stored revision first, as if another writer got there.
    Conflict,
    /// Fail with a backend error, writing nothing.
    Backend,
}

#[derive(Default)]
struct MemoryState {
    challenges: HashMap<Uuid, Challenge>,
    positions: HashMap<Uuid, BTreeMap<String, Position>>,
    trades: HashMap<Uuid, Vec<Trade>>,
    faults: VecDeque<SaveFault>,
}

/// In-process [`ChallengeStore`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for an upcoming `save` call (FIFO).
    pub fn inject_save_fault(&self, fault: SaveFault) {
        if let Ok(mut st) = self.state.lock() {
            st.faults.push_back(fault);
        }
    }

    /// Number of trades stored for a challenge.
    pub fn trade_count(&self, challenge_id: Uuid) -> usize {
        self.state
            .lock()
            .map(|st| st.trades.get(&challenge_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("memory store lock poisoned")))
    }
}

fn counts_as_active(c: &Challenge) -> bool {
    c.status() == ChallengeStatus::Active && !c.is_archived()
}

#[async_trait]
impl ChallengeStore for MemoryStore {
    async fn insert_challenge(&self, challenge: &Challenge, positions: &[Position]) -> Result<(), StoreError> {
        let mut st = self.lock()?;
        if st.challenges.contains_key(&challenge.id()) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "challenge {} already exists",
                challenge.id()
            )));
        }
        if counts_as_active(challenge)
            && st
                .challenges
                .values()
                .any(|c| c.user_id() == challenge.user_id() && counts_as_active(c))
        {
            return Err(StoreError::ActiveChallengeExists {
                user_id: challenge.user_id().to_string(),
            });
        }

        let rows = positions
            .iter()
            .map(|p| (p.symbol.clone(), p.clone()))
            .collect();
        st.challenges.insert(challenge.id(), challenge.clone());
        st.positions.insert(challenge.id(), rows);
        st.trades.insert(challenge.id(), Vec::new());
        Ok(())
    }

    async fn load_challenge(&self, id: Uuid) -> Result<Option<Challenge>, StoreError> {
        Ok(self.lock()?.challenges.get(&id).cloned())
    }

    async fn find_active_challenge(&self, user_id: &str) -> Result<Option<Challenge>, StoreError> {
        let st = self.lock()?;
        Ok(st
            .challenges
            .values()
            .filter(|c| c.user_id() == user_id && counts_as_active(c))
            .max_by_key(|c| c.created_at())
            .cloned())
    }

    async fn load_positions(&self, challenge_id: Uuid) -> Result<Vec<Position>, StoreError> {
        let st = self.lock()?;
        Ok(st
            .positions
            .get(&challenge_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save(&self, challenge: &Challenge, delta: &LedgerDelta, trade: Option<&Trade>) -> Result<(), StoreError> {
        let mut st = self.lock()?;
        let id = challenge.id();

        match st.faults.pop_front() {
            Some(SaveFault::Backend) => {
                return Err(StoreError::Backend(anyhow::anyhow!("injected save failure")));
            }
            Some(SaveFault::Conflict) => {
                if let Some(stored) = st.challenges.get_mut(&id) {
                    stored.bump_revision();
                }
            }
            None => {}
        }

        let expected = challenge.revision() - 1;
        let found = st.challenges.get(&id).map(Challenge::revision);
        if found != Some(expected) {
            return Err(StoreError::Conflict {
                challenge_id: id,
                expected,
                found,
            });
        }

        st.challenges.insert(id, challenge.clone());
        let rows = st.positions.entry(id).or_default();
        for symbol in delta.removals() {
            rows.remove(symbol);
        }
        for p in delta.upserts() {
            rows.insert(p.symbol.clone(), p.clone());
        }
        if let Some(trade) = trade {
            st.trades.entry(id).or_default().push(trade.clone());
        }
        Ok(())
    }

    async fn load_trades(&self, challenge_id: Uuid, query: &TradeQuery) -> Result<Vec<Trade>, StoreError> {
        let st = self.lock()?;
        let mut out: Vec<Trade> = st
            .trades
            .get(&challenge_id)
            .map(|v| {
                v.iter()
                    .filter(|t| query.since.map_or(true, |since| t.created_at >= since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        sort_newest_first(&mut out);
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tsp_portfolio::{Money, NoPrices, Qty};
    use tsp_risk::RiskRules;

    use crate::processor::TradeProcessor;
    use crate::types::{ChallengeBook, TradeIntent};

    const M: i64 = 1_000_000;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap()
    }

    fn open(user: &str) -> Challenge {
        Challenge::open(
            Uuid::new_v4(),
            user,
            "Starter",
            Money::new(5_000 * M),
            RiskRules::standard(),
            t0(),
        )
        .unwrap()
    }

    async fn seeded(store: &MemoryStore, user: &str) -> ChallengeBook {
        let book = ChallengeBook::opened(open(user));
        let rows: Vec<_> = book.ledger.snapshot().positions.into_values().collect();
        store.insert_challenge(&book.challenge, &rows).await.unwrap();
        book
    }

    #[tokio::test]
    async fn second_active_challenge_for_user_is_rejected() {
        let store = MemoryStore::new();
        seeded(&store, "alice").await;
        let err = store.insert_challenge(&open("alice"), &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::ActiveChallengeExists { .. }));

        // Other users are unaffected.
        seeded(&store, "bob").await;
    }

    #[tokio::test]
    async fn save_applies_delta_and_appends_trade() {
        let store = MemoryStore::new();
        let mut book = seeded(&store, "alice").await;

        let r = TradeProcessor::default()
            .execute(&mut book, &TradeIntent::buy("AAPL", Qty::new(2 * M), Money::new(50 * M)), &NoPrices, t0())
            .unwrap();
        let mut challenge = r.challenge.clone();
        challenge.bump_revision();
        store.save(&challenge, &r.delta, Some(&r.trade)).await.unwrap();

        let rows = store.load_positions(challenge.id()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(store.trade_count(challenge.id()), 1);
        assert_eq!(
            store.load_challenge(challenge.id()).await.unwrap().unwrap().current_cash(),
            Money::new(4_900 * M)
        );
    }

    #[tokio::test]
    async fn stale_revision_is_a_conflict_and_writes_nothing() {
        let store = MemoryStore::new();
        let book = seeded(&store, "alice").await;

        // Revision not bumped: stored 0 != 0 - 1.
        let err = store
            .save(&book.challenge, &LedgerDelta::empty(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { found: Some(0), .. }));

        let mut c = book.challenge.clone();
        c.bump_revision();
        store.inject_save_fault(SaveFault::Conflict);
        let err = store.save(&c, &LedgerDelta::empty(), None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { found: Some(1), .. }));
    }

    #[tokio::test]
    async fn trades_come_back_newest_first_with_since_and_limit() {
        let store = MemoryStore::new();
        let mut book = seeded(&store, "alice").await;
        let p = TradeProcessor::default();

        for i in 0..5 {
            let r = p
                .execute(
                    &mut book,
                    &TradeIntent::buy("AAPL", Qty::new(M), Money::new(10 * M)),
                    &NoPrices,
                    t0() + Duration::minutes(i),
                )
                .unwrap();
            book.challenge.bump_revision();
            store.save(&book.challenge, &r.delta, Some(&r.trade)).await.unwrap();
        }

        let id = book.challenge.id();
        let all = store.load_trades(id, &TradeQuery::default()).await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let latest = store.load_trades(id, &TradeQuery::latest(2)).await.unwrap();
        assert_eq!(latest[0].created_at, t0() + Duration::minutes(4));
        assert_eq!(latest.len(), 2);

        let since = store
            .load_trades(id, &TradeQuery::since(t0() + Duration::minutes(3)))
            .await
            .unwrap();
        assert_eq!(since.len(), 2);
    }
}
