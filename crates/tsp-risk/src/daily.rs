//! Daily window tracker.
//!
//! # Purpose
//! Decides which calendar day "today" is, and rolls the daily-loss baseline
//! over lazily on the first evaluation of a new day.
//!
//! # Design
//! - One reference zone for every challenge (default UTC), so all accounts
//!   share the same daily cutover regardless of user locale.
//! - No scheduler: rollover happens when a read or write touches the
//!   challenge. A challenge untouched for several days sees one rollover,
//!   with the baseline taken at the moment of access.
//! - Never rolls backwards: a `now` on or before the baseline date is a
//!   no-op.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tsp_portfolio::{mark_equity, LedgerSnapshot, Money, PriceLookup};
use uuid::Uuid;

use crate::challenge::Challenge;
use crate::types::{RiskRules, RuleError};

/// Record of one baseline rollover.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rollover {
    pub previous_date: NaiveDate,
    pub previous_baseline: Money,
    pub new_date: NaiveDate,
    pub new_baseline: Money,
}

/// Trading-day calendar in a single reference timezone.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DailyWindow {
    tz: Tz,
}

impl Default for DailyWindow {
    fn default() -> Self {
        Self::utc()
    }
}

impl DailyWindow {
    pub fn utc() -> Self {
        Self { tz: Tz::UTC }
    }

    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Parse an IANA zone name such as `"UTC"` or `"America/New_York"`.
    pub fn from_name(name: &str) -> Result<Self, RuleError> {
        name.trim()
            .parse::<Tz>()
            .map(Self::new)
            .map_err(|_| RuleError::UnknownTimezone {
                name: name.to_string(),
            })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Calendar day containing `now` in the reference zone.
    pub fn trading_day(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    /// First instant of `day` in the reference zone, as UTC.
    pub fn start_of_day(&self, day: NaiveDate) -> DateTime<Utc> {
        let midnight = day.and_time(NaiveTime::MIN);
        // Midnight can fall in a DST gap; the day then starts an hour later.
        self.tz
            .from_local_datetime(&midnight)
            .earliest()
            .or_else(|| {
                self.tz
                    .from_local_datetime(&(midnight + chrono::Duration::hours(1)))
                    .earliest()
            })
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
    }

    /// `(start_of_today, now)`, both UTC.
    pub fn today_bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start_of_day(self.trading_day(now)), now)
    }

    /// Open an ACTIVE challenge whose baseline is dated in this window's
    /// zone.
    pub fn open_challenge(
        &self,
        id: Uuid,
        user_id: impl Into<String>,
        plan: impl Into<String>,
        starting_balance: Money,
        rules: RiskRules,
        now: DateTime<Utc>,
    ) -> Result<Challenge, RuleError> {
        let mut challenge = Challenge::open(id, user_id, plan, starting_balance, rules, now)?;
        challenge.set_daily_baseline(self.trading_day(now), starting_balance);
        Ok(challenge)
    }

    /// If `now` is on a later trading day than the baseline, snapshot the
    /// current equity as the new baseline.
    ///
    /// Idempotent: a second call on the same day returns `None`.
    pub fn maybe_rollover<P: PriceLookup + ?Sized>(
        &self,
        challenge: &mut Challenge,
        snapshot: &LedgerSnapshot,
        prices: &P,
        now: DateTime<Utc>,
    ) -> Option<Rollover> {
        let today = self.trading_day(now);
        if today <= challenge.daily_baseline_date() {
            return None;
        }

        let equity = mark_equity(snapshot, prices).equity;
        let rollover = Rollover {
            previous_date: challenge.daily_baseline_date(),
            previous_baseline: challenge.daily_baseline_equity(),
            new_date: today,
            new_baseline: equity,
        };
        challenge.set_daily_baseline(today, equity);
        Some(rollover)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsp_portfolio::{marks, PositionLedger, Qty};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn utc_bounds_start_at_midnight() {
        let w = DailyWindow::utc();
        let now = at(2026, 4, 10, 17, 45);
        assert_eq!(w.today_bounds(now), (at(2026, 4, 10, 0, 0), now));
    }

    #[test]
    fn non_utc_zone_shifts_the_trading_day() {
        let w = DailyWindow::from_name("America/New_York").unwrap();
        // 02:00 UTC on the 10th is 22:00 EDT on the 9th.
        let now = at(2026, 4, 10, 2, 0);
        assert_eq!(w.trading_day(now), day(2026, 4, 9));
        assert_eq!(w.today_bounds(now).0, at(2026, 4, 9, 4, 0));
    }

    #[test]
    fn unknown_zone_is_rejected() {
        assert!(matches!(
            DailyWindow::from_name("Mars/Olympus"),
            Err(RuleError::UnknownTimezone { .. })
        ));
    }

    #[test]
    fn rollover_snapshots_equity_once_per_day() {
        let w = DailyWindow::utc();
        let mut c = w
            .open_challenge(
                Uuid::new_v4(),
                "u",
                "Starter",
                Money::from_whole(5_000),
                RiskRules::standard(),
                at(2026, 4, 10, 9, 0),
            )
            .unwrap();
        let mut ledger = PositionLedger::new(Money::from_whole(5_000));
        ledger
            .apply_buy("AAPL", Qty::from_whole(10), Money::from_whole(100))
            .unwrap();
        let prices = marks([("AAPL", Money::from_whole(90))]);

        // Same day: nothing.
        assert_eq!(
            w.maybe_rollover(&mut c, &ledger.snapshot(), &prices, at(2026, 4, 10, 23, 59)),
            None
        );

        // Next day: baseline = 4,000 + 10 * 90 = 4,900.
        let r = w
            .maybe_rollover(&mut c, &ledger.snapshot(), &prices, at(2026, 4, 11, 0, 1))
            .unwrap();
        assert_eq!(r.previous_baseline, Money::from_whole(5_000));
        assert_eq!(r.new_baseline, Money::from_whole(4_900));
        assert_eq!(c.daily_baseline_date(), day(2026, 4, 11));

        // Second call the same day is a no-op.
        assert_eq!(
            w.maybe_rollover(&mut c, &ledger.snapshot(), &prices, at(2026, 4, 11, 12, 0)),
            None
        );
        assert_eq!(c.daily_baseline_equity(), Money::from_whole(4_900));
    }

    #[test]
    fn rollover_never_goes_backwards() {
        let w = DailyWindow::utc();
        let mut c = w
            .open_challenge(
                Uuid::new_v4(),
                "u",
                "Pro",
                Money::from_whole(5_000),
                RiskRules::standard(),
                at(2026, 4, 10, 9, 0),
            )
            .unwrap();
        let ledger = PositionLedger::new(Money::from_whole(5_000));
        let r = w.maybe_rollover(
            &mut c,
            &ledger.snapshot(),
            &tsp_portfolio::NoPrices,
            at(2026, 4, 8, 9, 0),
        );
        assert_eq!(r, None);
        assert_eq!(c.daily_baseline_date(), day(2026, 4, 10));
    }
}
