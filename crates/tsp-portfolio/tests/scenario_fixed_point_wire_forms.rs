//! Scenario: fixed-point values at the wire boundary.
//!
//! # Invariants under test
//!
//! 1. Serialization is decimal text, never a float.
//! 2. Deserialization accepts decimal text and JSON numbers.
//! 3. Text with more than six decimals is rejected, not truncated.
//! 4. Ordering follows the numeric value.

use tsp_portfolio::{Money, Pct, Position, Qty, Side};

#[test]
fn money_serializes_as_decimal_string() {
    let v = serde_json::to_value(Money::new(4_740_000_000)).unwrap();
    assert_eq!(v, serde_json::json!("4740.000000"));

    let v = serde_json::to_value(Money::new(-1)).unwrap();
    assert_eq!(v, serde_json::json!("-0.000001"));
}

#[test]
fn deserializes_from_text_and_numbers() {
    let m: Money = serde_json::from_str("\"5000\"").unwrap();
    assert_eq!(m, Money::from_whole(5_000));

    let q: Qty = serde_json::from_str("0.25").unwrap();
    assert_eq!(q, Qty::new(250_000));

    let p: Pct = serde_json::from_str("10").unwrap();
    assert_eq!(p, Pct::from_whole(10));
}

#[test]
fn over_precise_text_is_rejected() {
    assert!(serde_json::from_str::<Money>("\"1.0000001\"").is_err());
    assert!("1.0000001".parse::<Qty>().is_err());
}

#[test]
fn position_round_trips_through_json() {
    let p = Position::new("AAPL", Qty::from_whole(3), Money::new(150_250_000));
    let json = serde_json::to_string(&p).unwrap();
    assert!(json.contains("\"150.250000\""));
    let back: Position = serde_json::from_str(&json).unwrap();
    assert_eq!(back, p);
}

#[test]
fn side_uses_upper_case_wire_names() {
    assert_eq!(serde_json::to_value(Side::Sell).unwrap(), serde_json::json!("SELL"));
    let s: Side = serde_json::from_str("\"BUY\"").unwrap();
    assert_eq!(s, Side::Buy);
}

#[test]
fn ordering_matches_numeric_value() {
    let mut v = vec![Money::from_whole(2), Money::new(-5), Money::ZERO, Money::new(1)];
    v.sort();
    assert_eq!(v, vec![Money::new(-5), Money::ZERO, Money::new(1), Money::from_whole(2)]);
}
