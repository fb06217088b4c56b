use tsp_portfolio::{mark_equity, EquityMark, LedgerSnapshot, Money, Pct, PriceLookup};

use crate::challenge::Challenge;
use crate::types::{EvaluationResult, ReasonCode, RuleError};

// ---------------------------------------------------------------------------
// Percent helpers
// ---------------------------------------------------------------------------

/// `max(0, amount) / base × 100`. Saturates at `Pct::MAX` on overflow;
/// `base` is a validated positive starting balance.
fn loss_or_gain_pct(amount: Money, base: Money) -> Pct {
    amount
        .clamp_non_negative()
        .pct_of(base)
        .unwrap_or(Pct::MAX)
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Evaluate a challenge against its rules at the given equity mark.
///
/// Order is fixed, first match wins:
/// 1. daily loss ≥ max daily loss → FAILED
/// 2. total loss ≥ max total loss → FAILED
/// 3. profit ≥ profit target → SUCCESSFUL
/// 4. otherwise unchanged
///
/// Both loss percentages are measured against `starting_balance`; the daily
/// loss is the drop from the daily baseline equity. `new_status` differs
/// from the current status only when the challenge is ACTIVE.
pub fn evaluate_mark(challenge: &Challenge, mark: EquityMark) -> EvaluationResult {
    let start = challenge.starting_balance();
    let equity = mark.equity;
    let rules = challenge.rules();

    let daily_loss_pct = loss_or_gain_pct(challenge.daily_baseline_equity().saturating_sub(equity), start);
    let total_loss_pct = loss_or_gain_pct(start.saturating_sub(equity), start);
    let profit_pct = loss_or_gain_pct(equity.saturating_sub(start), start);

    let reason = if daily_loss_pct >= rules.max_daily_loss_pct {
        ReasonCode::DailyLossLimitBreached
    } else if total_loss_pct >= rules.max_total_loss_pct {
        ReasonCode::TotalLossLimitBreached
    } else if profit_pct >= rules.profit_target_pct {
        ReasonCode::ProfitTargetReached
    } else {
        ReasonCode::WithinLimits
    };

    let previous_status = challenge.status();
    let new_status = if challenge.is_active() {
        reason.target_status()
    } else {
        previous_status
    };

    EvaluationResult {
        equity,
        daily_loss_pct,
        total_loss_pct,
        profit_pct,
        previous_status,
        new_status,
        reason,
        fallback_symbols: mark.fallback_symbols,
    }
}

/// Mark the ledger with `prices` and evaluate. Missing prices fall back to
/// average cost and are listed in `fallback_symbols`.
pub fn evaluate<P: PriceLookup + ?Sized>(
    challenge: &Challenge,
    snapshot: &LedgerSnapshot,
    prices: &P,
) -> EvaluationResult {
    evaluate_mark(challenge, mark_equity(snapshot, prices))
}

/// Evaluate and apply the resulting transition to `challenge`.
pub fn evaluate_and_transition<P: PriceLookup + ?Sized>(
    challenge: &mut Challenge,
    snapshot: &LedgerSnapshot,
    prices: &P,
) -> Result<EvaluationResult, RuleError> {
    let result = evaluate(challenge, snapshot, prices);
    challenge.transition(result.new_status)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChallengeStatus, RiskRules};
    use chrono::{TimeZone, Utc};
    use tsp_portfolio::{marks, NoPrices, PositionLedger, Qty};
    use uuid::Uuid;

    const M: i64 = 1_000_000;

    fn challenge() -> Challenge {
        Challenge::open(
            Uuid::new_v4(),
            "u",
            "Elite",
            Money::new(5_000 * M),
            RiskRules::standard(),
            Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn at_equity(c: &Challenge, equity: i64) -> EvaluationResult {
        evaluate_mark(
            c,
            EquityMark {
                equity: Money::new(equity),
                cash: Money::new(equity),
                market_value: Money::ZERO,
                fallback_symbols: vec![],
            },
        )
    }

    #[test]
    fn flat_equity_is_within_limits() {
        let r = at_equity(&challenge(), 5_000 * M);
        assert_eq!(r.reason, ReasonCode::WithinLimits);
        assert_eq!(r.new_status, ChallengeStatus::Active);
        assert_eq!(r.daily_loss_pct, Pct::ZERO);
        assert_eq!(r.total_loss_pct, Pct::ZERO);
        assert_eq!(r.profit_pct, Pct::ZERO);
        assert!(!r.transitioned());
    }

    #[test]
    fn daily_loss_takes_precedence_over_total_loss() {
        // 5000 -> 4400: daily 12%, total 12%; both trip, daily wins.
        let r = at_equity(&challenge(), 4_400 * M);
        assert_eq!(r.reason, ReasonCode::DailyLossLimitBreached);
        assert_eq!(r.new_status, ChallengeStatus::Failed);
    }

    #[test]
    fn exact_threshold_trips() {
        // 5000 -> 4750 = exactly 5% daily loss.
        let r = at_equity(&challenge(), 4_750 * M);
        assert_eq!(r.daily_loss_pct, Pct::from_whole(5));
        assert_eq!(r.reason, ReasonCode::DailyLossLimitBreached);
    }

    #[test]
    fn just_below_threshold_does_not_trip() {
        // 249.9999 loss = 4.999998%
        let r = at_equity(&challenge(), 4_750 * M + 100);
        assert_eq!(r.daily_loss_pct, Pct::new(4_999_998));
        assert_eq!(r.reason, ReasonCode::WithinLimits);
    }

    #[test]
    fn terminal_challenge_keeps_status_but_reports_reason() {
        let mut c = challenge();
        c.transition(ChallengeStatus::Failed).unwrap();
        let r = at_equity(&c, 6_000 * M);
        assert_eq!(r.reason, ReasonCode::ProfitTargetReached);
        assert_eq!(r.new_status, ChallengeStatus::Failed);
        assert!(!r.transitioned());
    }

    #[test]
    fn evaluate_marks_the_ledger_with_fallback() {
        let mut c = challenge();
        let mut l = PositionLedger::new(Money::new(5_000 * M));
        l.apply_buy("AAPL", Qty::new(10 * M), Money::new(100 * M)).unwrap();

        let r = evaluate(&c, &l.snapshot(), &NoPrices);
        assert_eq!(r.equity, Money::new(5_000 * M));
        assert_eq!(r.fallback_symbols, vec!["AAPL".to_string()]);

        // AAPL at 150: equity 5,500 -> +10% -> SUCCESSFUL
        let r = evaluate_and_transition(&mut c, &l.snapshot(), &marks([("AAPL", Money::new(150 * M))])).unwrap();
        assert_eq!(r.reason, ReasonCode::ProfitTargetReached);
        assert_eq!(c.status(), ChallengeStatus::Successful);
    }
}
