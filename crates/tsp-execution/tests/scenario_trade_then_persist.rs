use chrono::{DateTime, TimeZone, Utc};
use tsp_execution::*;
use tsp_portfolio::{marks, Money, PositionLedger, Qty, Side};
use tsp_risk::{ChallengeStatus, DailyWindow, RiskRules};
use uuid::Uuid;

const M: i64 = 1_000_000;

fn t(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 3, hour, 0, 0).unwrap()
}

/// Load → execute → bump → save, the way a caller drives the processor.
async fn run(store: &MemoryStore, id: Uuid, intent: TradeIntent, price: i64, hour: u32) -> Result<TradeResult, TradeError> {
    let challenge = store.load_challenge(id).await.unwrap().unwrap();
    let ledger = PositionLedger::from_positions(store.load_positions(id).await.unwrap()).unwrap();
    let mut book = ChallengeBook::new(challenge, ledger);

    let prices = marks([(intent.symbol.as_str(), Money::new(price * M))]);
    let mut result = TradeProcessor::default().execute(&mut book, &intent, &prices, t(hour))?;
    result.challenge.bump_revision();
    store
        .save(&result.challenge, &result.delta, Some(&result.trade))
        .await
        .unwrap();
    Ok(result)
}

#[tokio::test]
async fn scenario_round_trip_persists_cash_positions_and_history() {
    let store = MemoryStore::new();
    let challenge = DailyWindow::utc()
        .open_challenge(Uuid::new_v4(), "trader", "Elite", Money::new(5_000 * M), RiskRules::standard(), t(8))
        .unwrap();
    let id = challenge.id();
    let book = ChallengeBook::opened(challenge);
    let rows: Vec<_> = book.ledger.snapshot().positions.into_values().collect();
    store.insert_challenge(&book.challenge, &rows).await.unwrap();

    // BUY 10 @ 400
    let buy = run(&store, id, TradeIntent::buy("BTC-USD", Qty::new(10 * M), Money::new(400 * M)), 400, 9)
        .await
        .unwrap();
    assert_eq!(buy.evaluation.equity, Money::new(5_000 * M));

    // SELL 10 @ 500 -> realized 1,000, equity 6,000 (+20%) -> SUCCESSFUL
    let sell = run(&store, id, TradeIntent::sell("BTC-USD", Qty::new(10 * M), Money::new(500 * M)), 500, 10)
        .await
        .unwrap();
    assert_eq!(sell.trade.realized_pnl, Money::new(1_000 * M));
    assert_eq!(sell.evaluation.new_status, ChallengeStatus::Successful);

    let stored = store.load_challenge(id).await.unwrap().unwrap();
    assert_eq!(stored.current_cash(), Money::new(6_000 * M));
    assert_eq!(stored.status(), ChallengeStatus::Successful);
    assert_eq!(stored.revision(), 2);

    let rows = store.load_positions(id).await.unwrap();
    assert_eq!(rows.len(), 1, "only the cash row remains");

    let history = store.load_trades(id, &TradeQuery::latest(100)).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].side, Side::Sell);

    // Terminal: the next trade is refused and nothing is appended.
    let err = run(&store, id, TradeIntent::buy("BTC-USD", Qty::new(M), Money::new(500 * M)), 500, 11)
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::ChallengeNotActive { .. }));
    assert_eq!(store.trade_count(id), 2);
}

#[test]
fn scenario_intent_accepts_decimal_strings_and_whole_numbers() {
    let intent: TradeIntent =
        serde_json::from_str(r#"{"symbol":"AAPL","side":"BUY","quantity":"1.5","price":100}"#).unwrap();
    assert_eq!(intent, TradeIntent::buy("AAPL", Qty::new(1_500_000), Money::new(100 * M)));

    let too_precise = serde_json::from_str::<TradeIntent>(
        r#"{"symbol":"AAPL","side":"SELL","quantity":"0.0000001","price":"1"}"#,
    );
    assert!(too_precise.is_err());
}
