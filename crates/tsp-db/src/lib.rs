//! PostgreSQL persistence for challenges, positions and trades.
//!
//! Connection and schema helpers live here; [`PgStore`] implements the
//! `ChallengeStore` contract from `tsp-execution`.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

mod store;

pub use store::PgStore;

pub const ENV_DB_URL: &str = "TSP_DATABASE_URL";

/// Connect to Postgres using TSP_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    tracing::info!("db migrations applied");
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='challenges'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_challenges_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_challenges_table: bool,
}

/// Count ACTIVE, non-archived challenges. Zero when the schema is absent.
pub async fn count_active_challenges(pool: &PgPool) -> Result<i64> {
    let st = status(pool).await?;
    if !st.has_challenges_table {
        return Ok(0);
    }

    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select count(*)::bigint
        from challenges
        where status = 'ACTIVE' and archived_at is null
        "#,
    )
    .fetch_one(pool)
    .await
    .context("count_active_challenges failed")?;

    Ok(n)
}

/// Detect a Postgres unique constraint violation by name.
pub(crate) fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}
