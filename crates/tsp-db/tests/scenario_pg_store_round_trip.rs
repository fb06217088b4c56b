//! DB-backed scenarios for `PgStore`.
//!
//! Run: TSP_DATABASE_URL=postgres://localhost/tsp_test cargo test -p tsp-db -- --include-ignored

use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;
use tsp_db::PgStore;
use tsp_execution::{ChallengeBook, ChallengeStore, StoreError, TradeIntent, TradeProcessor, TradeQuery};
use tsp_portfolio::{marks, Money, PositionLedger, Qty};
use tsp_risk::{ChallengeStatus, DailyWindow, RiskRules};
use uuid::Uuid;

const M: i64 = 1_000_000;

fn t(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 3, hour, 0, 0).unwrap()
}

async fn pool_or_skip() -> Option<PgPool> {
    let url = match std::env::var(tsp_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: TSP_DATABASE_URL not set");
            return None;
        }
    };
    let pool = tsp_db::connect(&url).await.expect("connect");
    tsp_db::migrate(&pool).await.expect("migrate");
    Some(pool)
}

async fn seeded(store: &PgStore, user: &str) -> ChallengeBook {
    let challenge = DailyWindow::utc()
        .open_challenge(Uuid::new_v4(), user, "Elite", Money::new(5_000 * M), RiskRules::standard(), t(8))
        .unwrap();
    let book = ChallengeBook::opened(challenge);
    let rows: Vec<_> = book.ledger.snapshot().positions.into_values().collect();
    store.insert_challenge(&book.challenge, &rows).await.unwrap();
    book
}

#[tokio::test]
#[ignore = "requires TSP_DATABASE_URL"]
async fn migrate_is_idempotent_and_status_sees_schema() {
    let Some(pool) = pool_or_skip().await else { return };
    tsp_db::migrate(&pool).await.unwrap();
    let st = tsp_db::status(&pool).await.unwrap();
    assert!(st.ok);
    assert!(st.has_challenges_table);
}

#[tokio::test]
#[ignore = "requires TSP_DATABASE_URL"]
async fn trade_round_trip_persists_atomically() {
    let Some(pool) = pool_or_skip().await else { return };
    let store = PgStore::new(pool);
    let user = format!("pg_user_{}", Uuid::new_v4().simple());
    let book = seeded(&store, &user).await;
    let id = book.challenge.id();

    let challenge = store.load_challenge(id).await.unwrap().unwrap();
    let ledger = PositionLedger::from_positions(store.load_positions(id).await.unwrap()).unwrap();
    let mut book = ChallengeBook::new(challenge, ledger);

    let intent = TradeIntent::buy("BTC-USD", Qty::new(10 * M), Money::new(400 * M));
    let prices = marks([("BTC-USD", Money::new(400 * M))]);
    let mut result = TradeProcessor::default()
        .execute(&mut book, &intent, &prices, t(9))
        .unwrap();
    result.challenge.bump_revision();
    store
        .save(&result.challenge, &result.delta, Some(&result.trade))
        .await
        .unwrap();

    let stored = store.load_challenge(id).await.unwrap().unwrap();
    assert_eq!(stored.current_cash(), Money::new(1_000 * M));
    assert_eq!(stored.revision(), 1);
    assert_eq!(stored.status(), ChallengeStatus::Active);

    let rows = store.load_positions(id).await.unwrap();
    assert_eq!(rows.len(), 2);
    let btc = rows.iter().find(|p| p.symbol == "BTC-USD").unwrap();
    assert_eq!(btc.quantity, Qty::new(10 * M));
    assert_eq!(btc.average_cost, Money::new(400 * M));

    let history = store.load_trades(id, &TradeQuery::latest(10)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, result.trade.id);

    // Saving the same revision again is stale: nothing else is written.
    let err = store
        .save(&result.challenge, &result.delta, Some(&result.trade))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { found: Some(1), .. }));
    assert_eq!(store.load_trades(id, &TradeQuery::latest(10)).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires TSP_DATABASE_URL"]
async fn second_active_challenge_for_user_is_rejected() {
    let Some(pool) = pool_or_skip().await else { return };
    let store = PgStore::new(pool);
    let user = format!("pg_user_{}", Uuid::new_v4().simple());
    let first = seeded(&store, &user).await;

    let second = DailyWindow::utc()
        .open_challenge(Uuid::new_v4(), &user, "Elite", Money::new(5_000 * M), RiskRules::standard(), t(10))
        .unwrap();
    let err = store.insert_challenge(&second, &[]).await.unwrap_err();
    assert!(matches!(err, StoreError::ActiveChallengeExists { .. }));

    let active = store.find_active_challenge(&user).await.unwrap().unwrap();
    assert_eq!(active.id(), first.challenge.id());
}

#[tokio::test]
#[ignore = "requires TSP_DATABASE_URL"]
async fn trades_are_append_only() {
    let Some(pool) = pool_or_skip().await else { return };
    let store = PgStore::new(pool.clone());
    let user = format!("pg_user_{}", Uuid::new_v4().simple());
    let mut book = seeded(&store, &user).await;
    let id = book.challenge.id();

    let intent = TradeIntent::buy("ETH-USD", Qty::new(M), Money::new(100 * M));
    let prices = marks([("ETH-USD", Money::new(100 * M))]);
    let mut result = TradeProcessor::default()
        .execute(&mut book, &intent, &prices, t(9))
        .unwrap();
    result.challenge.bump_revision();
    store
        .save(&result.challenge, &result.delta, Some(&result.trade))
        .await
        .unwrap();

    sqlx::query("update trades set price_micros = 1 where challenge_id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("delete from trades where challenge_id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();

    let history = store.load_trades(id, &TradeQuery::latest(10)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].price, Money::new(100 * M));
}
