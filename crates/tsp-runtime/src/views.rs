//! Read models returned by [`ChallengeService`](crate::ChallengeService).
//! All are plain serializable data.

use serde::{Deserialize, Serialize};
use tsp_execution::{Trade, TradeResult};
use tsp_portfolio::{
    mark_equity, mark_position, EquityMark, LedgerSnapshot, Money, Pct, PriceLookup, Qty, MICROS_SCALE,
};
use tsp_risk::{ChallengeParts, EvaluationResult, Rollover};

/// What a successful trade produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub trade: Trade,
    pub evaluation: EvaluationResult,
    pub rollover: Option<Rollover>,
    pub challenge: ChallengeParts,
}

impl From<TradeResult> for TradeOutcome {
    fn from(r: TradeResult) -> Self {
        Self {
            trade: r.trade,
            evaluation: r.evaluation,
            rollover: r.rollover,
            challenge: r.challenge.to_parts(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionView {
    pub symbol: String,
    pub quantity: Qty,
    pub average_cost: Money,
    /// Market price, or the average cost when no quote was available.
    pub market_price: Money,
    pub market_value: Money,
    pub unrealized_pnl: Money,
    pub price_unavailable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioView {
    pub challenge: ChallengeParts,
    pub cash: Money,
    /// Non-cash holdings, by symbol.
    pub positions: Vec<PositionView>,
    pub equity: EquityMark,
}

impl PortfolioView {
    pub fn build<P: PriceLookup + ?Sized>(challenge: ChallengeParts, snapshot: &LedgerSnapshot, prices: &P) -> Self {
        let positions = snapshot
            .holdings()
            .map(|p| {
                let m = mark_position(p, prices);
                PositionView {
                    symbol: p.symbol.clone(),
                    quantity: p.quantity,
                    average_cost: p.average_cost,
                    market_price: m.mark,
                    market_value: m.market_value,
                    unrealized_pnl: m.unrealized_pnl,
                    price_unavailable: m.price_unavailable,
                }
            })
            .collect();

        Self {
            challenge,
            cash: snapshot.cash(),
            positions,
            equity: mark_equity(snapshot, prices),
        }
    }
}

/// Trade counts over a challenge's whole history. A win is a sell with
/// positive realized PnL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeStats {
    pub trades: u64,
    pub sells: u64,
    pub wins: u64,
    /// `wins / sells × 100`; zero when there are no sells.
    pub win_rate_pct: Pct,
}

impl TradeStats {
    pub fn from_trades<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> Self {
        let mut s = Self::default();
        for t in trades {
            s.trades += 1;
            if t.side == tsp_portfolio::Side::Sell {
                s.sells += 1;
                if t.realized_pnl.is_positive() {
                    s.wins += 1;
                }
            }
        }
        s.win_rate_pct = win_rate(s.wins, s.sells);
        s
    }
}

fn win_rate(wins: u64, sells: u64) -> Pct {
    if sells == 0 {
        return Pct::ZERO;
    }
    let num = (wins as i128) * 100 * (MICROS_SCALE as i128);
    let den = sells as i128;
    // Non-negative, so half-up is half-away-from-zero.
    let raw = (num + den / 2) / den;
    Pct::new(i64::try_from(raw).unwrap_or(i64::MAX))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeSummary {
    pub evaluation: EvaluationResult,
    /// Realized PnL of sells since the start of the current trading day.
    pub today_realized_pnl: Money,
    pub stats: TradeStats,
}
