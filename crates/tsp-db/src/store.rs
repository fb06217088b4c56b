//! `ChallengeStore` over PostgreSQL.
//!
//! Every amount is a bigint of micros. `save` is one transaction: the
//! challenge row update is conditional on the previous revision, so a
//! concurrent writer turns into `StoreError::Conflict` and nothing from this
//! call is committed.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tsp_execution::store::{ChallengeStore, StoreError, TradeQuery};
use tsp_execution::Trade;
use tsp_portfolio::{LedgerDelta, Money, Pct, Position, Qty};
use tsp_risk::{Challenge, ChallengeParts, ChallengeStatus, RiskRules};
use uuid::Uuid;

use crate::is_unique_constraint_violation;

const UQ_ACTIVE_PER_USER: &str = "uq_challenges_one_active_per_user";

const CHALLENGE_COLUMNS: &str = r#"
    id, user_id, plan, starting_balance_micros, current_cash_micros, status,
    profit_target_pct_micros, max_daily_loss_pct_micros, max_total_loss_pct_micros,
    created_at, daily_baseline_micros, daily_baseline_date, last_trade_at,
    archived_at, revision
"#;

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn challenge_from_row(row: &PgRow) -> anyhow::Result<Challenge> {
    let status: String = row.try_get("status")?;
    let parts = ChallengeParts {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        plan: row.try_get("plan")?,
        starting_balance: Money::new(row.try_get("starting_balance_micros")?),
        current_cash: Money::new(row.try_get("current_cash_micros")?),
        status: status
            .parse::<ChallengeStatus>()
            .context("challenges.status")?,
        rules: RiskRules {
            profit_target_pct: Pct::new(row.try_get("profit_target_pct_micros")?),
            max_daily_loss_pct: Pct::new(row.try_get("max_daily_loss_pct_micros")?),
            max_total_loss_pct: Pct::new(row.try_get("max_total_loss_pct_micros")?),
        },
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        daily_baseline_equity: Money::new(row.try_get("daily_baseline_micros")?),
        daily_baseline_date: row.try_get::<NaiveDate, _>("daily_baseline_date")?,
        last_trade_at: row.try_get("last_trade_at")?,
        archived_at: row.try_get("archived_at")?,
        revision: row.try_get("revision")?,
    };
    let id = parts.id;
    Challenge::restore(parts).with_context(|| format!("stored challenge {id} is invalid"))
}

fn position_from_row(row: &PgRow) -> anyhow::Result<Position> {
    Ok(Position::new(
        row.try_get::<String, _>("symbol")?,
        Qty::new(row.try_get("quantity_micros")?),
        Money::new(row.try_get("average_cost_micros")?),
    ))
}

fn trade_from_row(row: &PgRow) -> anyhow::Result<Trade> {
    let side: String = row.try_get("side")?;
    Ok(Trade {
        id: row.try_get("id")?,
        challenge_id: row.try_get("challenge_id")?,
        symbol: row.try_get("symbol")?,
        side: side.parse().map_err(|e: String| anyhow!("trades.side: {e}"))?,
        quantity: Qty::new(row.try_get("quantity_micros")?),
        price: Money::new(row.try_get("price_micros")?),
        realized_pnl: Money::new(row.try_get("realized_pnl_micros")?),
        created_at: row.try_get("created_at")?,
    })
}

// ---------------------------------------------------------------------------
// Writes inside a transaction
// ---------------------------------------------------------------------------

async fn upsert_position(tx: &mut Transaction<'_, Postgres>, challenge_id: Uuid, p: &Position) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        insert into positions (challenge_id, symbol, quantity_micros, average_cost_micros)
        values ($1, $2, $3, $4)
        on conflict (challenge_id, symbol) do update
          set quantity_micros = excluded.quantity_micros,
              average_cost_micros = excluded.average_cost_micros
        "#,
    )
    .bind(challenge_id)
    .bind(&p.symbol)
    .bind(p.quantity.raw())
    .bind(p.average_cost.raw())
    .execute(&mut **tx)
    .await
    .with_context(|| format!("upsert position {} failed", p.symbol))?;
    Ok(())
}

async fn delete_position(tx: &mut Transaction<'_, Postgres>, challenge_id: Uuid, symbol: &str) -> anyhow::Result<()> {
    sqlx::query("delete from positions where challenge_id = $1 and symbol = $2")
        .bind(challenge_id)
        .bind(symbol)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("delete position {symbol} failed"))?;
    Ok(())
}

async fn insert_trade(tx: &mut Transaction<'_, Postgres>, trade: &Trade) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        insert into trades (
          id, challenge_id, symbol, side, quantity_micros, price_micros,
          realized_pnl_micros, created_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(trade.id)
    .bind(trade.challenge_id)
    .bind(&trade.symbol)
    .bind(trade.side.as_str())
    .bind(trade.quantity.raw())
    .bind(trade.price.raw())
    .bind(trade.realized_pnl.raw())
    .bind(trade.created_at)
    .execute(&mut **tx)
    .await
    .context("insert trade failed")?;
    Ok(())
}

fn active_exists(challenge: &Challenge) -> StoreError {
    StoreError::ActiveChallengeExists {
        user_id: challenge.user_id().to_string(),
    }
}

#[async_trait]
impl ChallengeStore for PgStore {
    async fn insert_challenge(&self, challenge: &Challenge, positions: &[Position]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.context("begin tx failed")?;
        let rules = challenge.rules();

        let res = sqlx::query(
            r#"
            insert into challenges (
              id, user_id, plan, starting_balance_micros, current_cash_micros, status,
              profit_target_pct_micros, max_daily_loss_pct_micros, max_total_loss_pct_micros,
              created_at, daily_baseline_micros, daily_baseline_date, last_trade_at,
              archived_at, revision
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15
            )
            "#,
        )
        .bind(challenge.id())
        .bind(challenge.user_id())
        .bind(challenge.plan())
        .bind(challenge.starting_balance().raw())
        .bind(challenge.current_cash().raw())
        .bind(challenge.status().as_str())
        .bind(rules.profit_target_pct.raw())
        .bind(rules.max_daily_loss_pct.raw())
        .bind(rules.max_total_loss_pct.raw())
        .bind(challenge.created_at())
        .bind(challenge.daily_baseline_equity().raw())
        .bind(challenge.daily_baseline_date())
        .bind(challenge.last_trade_at())
        .bind(challenge.archived_at())
        .bind(challenge.revision())
        .execute(&mut *tx)
        .await;

        if let Err(e) = res {
            if is_unique_constraint_violation(&e, UQ_ACTIVE_PER_USER) {
                return Err(active_exists(challenge));
            }
            return Err(anyhow::Error::new(e).context("insert challenge failed").into());
        }

        for p in positions {
            upsert_position(&mut tx, challenge.id(), p).await?;
        }

        tx.commit().await.context("commit insert_challenge failed")?;
        tracing::debug!(challenge_id = %challenge.id(), user_id = challenge.user_id(), "challenge inserted");
        Ok(())
    }

    async fn load_challenge(&self, id: Uuid) -> Result<Option<Challenge>, StoreError> {
        let sql = format!("select {CHALLENGE_COLUMNS} from challenges where id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("load_challenge failed")?;
        Ok(row.as_ref().map(challenge_from_row).transpose()?)
    }

    async fn find_active_challenge(&self, user_id: &str) -> Result<Option<Challenge>, StoreError> {
        let sql = format!(
            "select {CHALLENGE_COLUMNS} from challenges \
             where user_id = $1 and status = 'ACTIVE' and archived_at is null \
             order by created_at desc limit 1"
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("find_active_challenge failed")?;
        Ok(row.as_ref().map(challenge_from_row).transpose()?)
    }

    async fn load_positions(&self, challenge_id: Uuid) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query(
            r#"
            select symbol, quantity_micros, average_cost_micros
            from positions
            where challenge_id = $1
            order by symbol
            "#,
        )
        .bind(challenge_id)
        .fetch_all(&self.pool)
        .await
        .context("load_positions failed")?;

        let out = rows
            .iter()
            .map(position_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(out)
    }

    async fn save(&self, challenge: &Challenge, delta: &LedgerDelta, trade: Option<&Trade>) -> Result<(), StoreError> {
        let id = challenge.id();
        let expected = challenge.revision() - 1;
        let mut tx = self.pool.begin().await.context("begin tx failed")?;

        let res = sqlx::query(
            r#"
            update challenges
               set current_cash_micros = $3,
                   status = $4,
                   daily_baseline_micros = $5,
                   daily_baseline_date = $6,
                   last_trade_at = $7,
                   archived_at = $8,
                   revision = $9
             where id = $1 and revision = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(challenge.current_cash().raw())
        .bind(challenge.status().as_str())
        .bind(challenge.daily_baseline_equity().raw())
        .bind(challenge.daily_baseline_date())
        .bind(challenge.last_trade_at())
        .bind(challenge.archived_at())
        .bind(challenge.revision())
        .execute(&mut *tx)
        .await
        .context("update challenge failed")?;

        if res.rows_affected() == 0 {
            let found: Option<(i64,)> = sqlx::query_as("select revision from challenges where id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .context("read current revision failed")?;
            let _ = tx.rollback().await;
            tracing::warn!(challenge_id = %id, expected, found = ?found.map(|r| r.0), "revision conflict");
            return Err(StoreError::Conflict {
                challenge_id: id,
                expected,
                found: found.map(|r| r.0),
            });
        }

        for symbol in delta.removals() {
            delete_position(&mut tx, id, symbol).await?;
        }
        for p in delta.upserts() {
            upsert_position(&mut tx, id, p).await?;
        }
        if let Some(trade) = trade {
            insert_trade(&mut tx, trade).await?;
        }

        tx.commit().await.context("commit save failed")?;
        Ok(())
    }

    async fn load_trades(&self, challenge_id: Uuid, query: &TradeQuery) -> Result<Vec<Trade>, StoreError> {
        let limit = query.limit.map(|n| i64::try_from(n).unwrap_or(i64::MAX));
        let rows = sqlx::query(
            r#"
            select id, challenge_id, symbol, side, quantity_micros, price_micros,
                   realized_pnl_micros, created_at
            from trades
            where challenge_id = $1
              and ($2::timestamptz is null or created_at >= $2)
            order by created_at desc, seq desc
            limit $3
            "#,
        )
        .bind(challenge_id)
        .bind(query.since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("load_trades failed")?;

        let out = rows
            .iter()
            .map(trade_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(out)
    }
}
