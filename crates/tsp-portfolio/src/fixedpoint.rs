//! Fixed-point numeric types.
//!
//! # Motivation
//!
//! Every cash amount, price, quantity and percentage in a challenge account
//! uses a 1e-6 (micros) fixed-point representation stored as `i64`. Floating
//! point would accumulate error across thousands of trades and break the cash
//! conservation property; raw `i64` would let a quantity be added to a price
//! without any compile-time signal.
//!
//! Three newtypes share the scale but never mix implicitly:
//!
//! - [`Money`]: cash, prices, PnL, equity. `Money::new(1_000_000)` = 1.00.
//! - [`Qty`]: asset quantity. Fractional units are allowed (0.5 BTC).
//! - [`Pct`]: percentages. `Pct::from_whole(5)` = 5%.
//!
//! # Arithmetic
//!
//! - `Add`, `Sub`, `Neg`, `AddAssign`, `SubAssign` are closed over each type;
//!   they panic on overflow in debug builds (standard integer semantics).
//! - `checked_*` and `saturating_*` variants exist for boundaries where
//!   overflow must be handled explicitly.
//! - Cross-type products go through [`Qty::checked_notional`] and
//!   [`Money::pct_of`]; both compute in `i128` and round half away from zero.
//!   Cash movements round against the trader instead: [`Qty::checked_cost`]
//!   rounds up and [`Qty::checked_proceeds`] rounds down.
//!
//! # Text and wire forms
//!
//! Decimal text is canonical: `Display` prints six decimals and `FromStr`
//! accepts at most six. `f64` conversion ([`Money::from_f64`] and friends) is
//! for wire boundaries only.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Scale shared by every fixed-point type: 1 unit = 1_000_000 raw.
pub const MICROS_SCALE: i64 = 1_000_000;

const DECIMALS: usize = 6;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Rejected decimal text or float input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFixedError {
    /// Input was empty or only a sign.
    Empty,
    /// A character other than digits, one `.`, or a leading sign.
    InvalidDigit { input: String },
    /// More than six fractional digits.
    TooPrecise { input: String },
    /// Value does not fit in `i64` after scaling.
    OutOfRange { input: String },
    /// `f64` input was NaN or infinite.
    NotFinite,
}

impl fmt::Display for ParseFixedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "fixed-point: empty input"),
            Self::InvalidDigit { input } => {
                write!(f, "fixed-point: invalid decimal '{input}'")
            }
            Self::TooPrecise { input } => write!(
                f,
                "fixed-point: '{input}' has more than {DECIMALS} fractional digits"
            ),
            Self::OutOfRange { input } => write!(f, "fixed-point: '{input}' out of range"),
            Self::NotFinite => write!(f, "fixed-point: non-finite input (NaN or Inf)"),
        }
    }
}

impl std::error::Error for ParseFixedError {}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Integer division rounding half away from zero. `den` must be positive.
pub(crate) fn div_round(num: i128, den: i128) -> i128 {
    debug_assert!(den > 0, "div_round: den must be > 0");
    let q = num / den;
    let r = num % den;
    if r.abs() * 2 >= den {
        q + num.signum()
    } else {
        q
    }
}

pub(crate) fn i128_to_i64_clamp(x: i128) -> i64 {
    if x > i64::MAX as i128 {
        i64::MAX
    } else if x < i64::MIN as i128 {
        i64::MIN
    } else {
        x as i64
    }
}

fn parse_raw(input: &str) -> Result<i64, ParseFixedError> {
    let s = input.trim();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if digits.is_empty() {
        return Err(ParseFixedError::Empty);
    }

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(ParseFixedError::Empty);
    }
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(ParseFixedError::InvalidDigit {
            input: input.to_string(),
        });
    }
    if frac_part.len() > DECIMALS {
        return Err(ParseFixedError::TooPrecise {
            input: input.to_string(),
        });
    }

    let out_of_range = || ParseFixedError::OutOfRange {
        input: input.to_string(),
    };

    let mut raw: i128 = 0;
    for b in int_part.bytes() {
        raw = raw * 10 + i128::from(b - b'0');
        if raw > i64::MAX as i128 {
            return Err(out_of_range());
        }
    }
    raw *= MICROS_SCALE as i128;

    let mut frac: i128 = 0;
    for b in frac_part.bytes() {
        frac = frac * 10 + i128::from(b - b'0');
    }
    for _ in frac_part.len()..DECIMALS {
        frac *= 10;
    }
    raw += frac;

    if negative {
        raw = -raw;
    }
    i64::try_from(raw).map_err(|_| out_of_range())
}

fn raw_from_f64(value: f64) -> Result<i64, ParseFixedError> {
    if !value.is_finite() {
        return Err(ParseFixedError::NotFinite);
    }
    let scaled = (value * MICROS_SCALE as f64).round();
    // `as` saturates silently; out-of-range floats must be rejected instead.
    if scaled > i64::MAX as f64 || scaled < i64::MIN as f64 {
        return Err(ParseFixedError::OutOfRange {
            input: value.to_string(),
        });
    }
    Ok(scaled as i64)
}

fn fmt_raw(raw: i64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let whole = raw / MICROS_SCALE;
    let frac = (raw % MICROS_SCALE).abs();
    // When |value| < 1 and value is negative, `whole` truncates to 0 and
    // loses the sign.
    if raw < 0 && whole == 0 {
        write!(f, "-{whole}.{frac:06}")
    } else {
        write!(f, "{whole}.{frac:06}")
    }
}

// ---------------------------------------------------------------------------
// Newtype generator
// ---------------------------------------------------------------------------

macro_rules! fixed_point {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(i64);

        impl $name {
            /// Zero.
            pub const ZERO: $name = $name(0);
            /// One whole unit (raw 1_000_000).
            pub const ONE: $name = $name(MICROS_SCALE);
            /// Maximum representable value.
            pub const MAX: $name = $name(i64::MAX);
            /// Minimum representable value.
            pub const MIN: $name = $name(i64::MIN);

            /// Construct from a raw micros integer.
            #[inline]
            pub const fn new(raw: i64) -> Self {
                $name(raw)
            }

            /// Whole units, e.g. `from_whole(5)` = 5.000000.
            #[inline]
            pub const fn from_whole(units: i64) -> Self {
                $name(units * MICROS_SCALE)
            }

            /// Extract the raw micros integer.
            #[inline]
            pub const fn raw(self) -> i64 {
                self.0
            }

            /// Wire-boundary conversion from `f64`, rounded to the nearest micro.
            pub fn from_f64(value: f64) -> Result<Self, ParseFixedError> {
                raw_from_f64(value).map($name)
            }

            #[inline]
            pub fn checked_add(self, rhs: $name) -> Option<$name> {
                self.0.checked_add(rhs.0).map($name)
            }

            #[inline]
            pub fn checked_sub(self, rhs: $name) -> Option<$name> {
                self.0.checked_sub(rhs.0).map($name)
            }

            #[inline]
            pub fn saturating_add(self, rhs: $name) -> $name {
                $name(self.0.saturating_add(rhs.0))
            }

            #[inline]
            pub fn saturating_sub(self, rhs: $name) -> $name {
                $name(self.0.saturating_sub(rhs.0))
            }

            /// Absolute value; `MIN.abs()` saturates to `MAX`.
            #[inline]
            pub fn abs(self) -> $name {
                $name(self.0.saturating_abs())
            }

            #[inline]
            pub fn is_zero(self) -> bool {
                self.0 == 0
            }

            #[inline]
            pub fn is_positive(self) -> bool {
                self.0 > 0
            }

            #[inline]
            pub fn is_negative(self) -> bool {
                self.0 < 0
            }

            /// `max(self, 0)`.
            #[inline]
            pub fn clamp_non_negative(self) -> $name {
                if self.0 < 0 {
                    $name(0)
                } else {
                    self
                }
            }
        }

        impl Add for $name {
            type Output = $name;
            #[inline]
            fn add(self, rhs: $name) -> $name {
                $name(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = $name;
            #[inline]
            fn sub(self, rhs: $name) -> $name {
                $name(self.0 - rhs.0)
            }
        }

        impl Neg for $name {
            type Output = $name;
            #[inline]
            fn neg(self) -> $name {
                $name(-self.0)
            }
        }

        impl AddAssign for $name {
            #[inline]
            fn add_assign(&mut self, rhs: $name) {
                self.0 += rhs.0;
            }
        }

        impl SubAssign for $name {
            #[inline]
            fn sub_assign(&mut self, rhs: $name) {
                self.0 -= rhs.0;
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt_raw(self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "("))?;
                fmt_raw(self.0, f)?;
                write!(f, ")")
            }
        }

        impl FromStr for $name {
            type Err = ParseFixedError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_raw(s).map($name)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct FixedVisitor;

                impl<'de> Visitor<'de> for FixedVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        write!(f, concat!("a decimal ", $what, " as string or number"))
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<$name, E> {
                        v.parse().map_err(E::custom)
                    }

                    fn visit_i64<E: de::Error>(self, v: i64) -> Result<$name, E> {
                        v.checked_mul(MICROS_SCALE)
                            .map($name)
                            .ok_or_else(|| E::custom(concat!($what, " out of range")))
                    }

                    fn visit_u64<E: de::Error>(self, v: u64) -> Result<$name, E> {
                        i64::try_from(v)
                            .ok()
                            .and_then(|v| v.checked_mul(MICROS_SCALE))
                            .map($name)
                            .ok_or_else(|| E::custom(concat!($what, " out of range")))
                    }

                    fn visit_f64<E: de::Error>(self, v: f64) -> Result<$name, E> {
                        $name::from_f64(v).map_err(E::custom)
                    }
                }

                deserializer.deserialize_any(FixedVisitor)
            }
        }
    };
}

fixed_point!(
    /// A monetary amount (cash, price per unit, PnL, equity) at 1e-6 scale.
    ///
    /// There is intentionally no `From<i64>`: callers must be deliberate
    /// about when a raw integer represents money.
    Money,
    "money amount"
);

fixed_point!(
    /// An asset quantity at 1e-6 unit resolution.
    Qty,
    "quantity"
);

fixed_point!(
    /// A percentage at 1e-6 resolution: `Pct::from_whole(5)` is 5%.
    Pct,
    "percentage"
);

// ---------------------------------------------------------------------------
// Cross-type arithmetic
// ---------------------------------------------------------------------------

impl Qty {
    /// `qty × price` as money, rounded half away from zero to the nearest
    /// micro. `None` on overflow; a trade value overflow is a critical error,
    /// so there is no implicit clamp.
    pub fn checked_notional(self, price: Money) -> Option<Money> {
        let product = (self.0 as i128) * (price.0 as i128);
        i64::try_from(div_round(product, MICROS_SCALE as i128))
            .ok()
            .map(Money)
    }

    /// `qty × price` rounded up to the next micro: what a buy pays.
    pub fn checked_cost(self, price: Money) -> Option<Money> {
        let product = (self.0 as i128) * (price.0 as i128);
        let scale = MICROS_SCALE as i128;
        let q = product.div_euclid(scale);
        let up = if product.rem_euclid(scale) == 0 { q } else { q + 1 };
        i64::try_from(up).ok().map(Money)
    }

    /// `qty × price` rounded down to the micro: what a sell credits.
    pub fn checked_proceeds(self, price: Money) -> Option<Money> {
        let product = (self.0 as i128) * (price.0 as i128);
        i64::try_from(product.div_euclid(MICROS_SCALE as i128))
            .ok()
            .map(Money)
    }

    /// Reinterpret a cash quantity as money (the cash position holds one
    /// quantity unit per currency unit).
    #[inline]
    pub const fn as_money(self) -> Money {
        Money(self.0)
    }
}

impl Money {
    /// Reinterpret money as a cash-position quantity.
    #[inline]
    pub const fn as_qty(self) -> Qty {
        Qty(self.0)
    }

    /// `self / base × 100` as a percentage. `None` when `base` is not
    /// positive or the result overflows.
    pub fn pct_of(self, base: Money) -> Option<Pct> {
        if base.0 <= 0 {
            return None;
        }
        let num = (self.0 as i128) * 100 * (MICROS_SCALE as i128);
        i64::try_from(div_round(num, base.0 as i128)).ok().map(Pct)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_additive_identity() {
        let a = Money::new(42_000_000);
        assert_eq!(a + Money::ZERO, a);
        assert_eq!(Money::ZERO + a, a);
    }

    #[test]
    fn neg_produces_opposite_sign() {
        let pos = Money::new(5_000_000);
        assert_eq!((-pos).raw(), -5_000_000);
        assert_eq!(-(-pos), pos);
    }

    #[test]
    fn saturating_add_clamps_at_max() {
        assert_eq!(Money::MAX.saturating_add(Money::new(1)), Money::MAX);
    }

    #[test]
    fn checked_sub_reports_underflow() {
        assert_eq!(Qty::MIN.checked_sub(Qty::new(1)), None);
    }

    #[test]
    fn clamp_non_negative() {
        assert_eq!(Money::from_whole(-3).clamp_non_negative(), Money::ZERO);
        assert_eq!(Money::from_whole(3).clamp_non_negative(), Money::from_whole(3));
    }

    #[test]
    fn notional_whole_units() {
        let n = Qty::from_whole(10).checked_notional(Money::from_whole(400));
        assert_eq!(n, Some(Money::from_whole(4_000)));
    }

    #[test]
    fn notional_fractional_quantity() {
        // 0.5 × 95_000.00 = 47_500.00
        let n = Qty::new(500_000).checked_notional(Money::from_whole(95_000));
        assert_eq!(n, Some(Money::from_whole(47_500)));
    }

    #[test]
    fn notional_rounds_half_away_from_zero() {
        // 0.000001 × 0.5 = 0.0000005 -> rounds to 0.000001
        let n = Qty::new(1).checked_notional(Money::new(500_000));
        assert_eq!(n, Some(Money::new(1)));
        // 0.000001 × 0.4 = 0.0000004 -> rounds to 0
        let n = Qty::new(1).checked_notional(Money::new(400_000));
        assert_eq!(n, Some(Money::ZERO));
    }

    #[test]
    fn cost_rounds_up_and_proceeds_round_down() {
        // 0.000001 × 0.499999 = 0.000000499999
        assert_eq!(Qty::new(1).checked_cost(Money::new(499_999)), Some(Money::new(1)));
        assert_eq!(Qty::new(1).checked_proceeds(Money::new(499_999)), Some(Money::ZERO));
        // 1.333333 × 99.99 = 133.31996667
        let (q, px) = (Qty::new(1_333_333), Money::new(99_990_000));
        assert_eq!(q.checked_cost(px), Some(Money::new(133_319_967)));
        assert_eq!(q.checked_proceeds(px), Some(Money::new(133_319_966)));
        // exact products are not nudged
        assert_eq!(Qty::from_whole(3).checked_cost(Money::from_whole(7)), Some(Money::from_whole(21)));
        assert_eq!(Qty::from_whole(3).checked_proceeds(Money::from_whole(7)), Some(Money::from_whole(21)));
    }

    #[test]
    fn notional_overflow_returns_none() {
        assert_eq!(Qty::MAX.checked_notional(Money::from_whole(2)), None);
        assert_eq!(Qty::MAX.checked_cost(Money::from_whole(2)), None);
        assert_eq!(Qty::MAX.checked_proceeds(Money::from_whole(2)), None);
    }

    #[test]
    fn pct_of_starting_balance() {
        let loss = Money::from_whole(260);
        let pct = loss.pct_of(Money::from_whole(5_000)).unwrap();
        assert_eq!(pct, Pct::new(5_200_000)); // 5.2%
    }

    #[test]
    fn pct_of_non_positive_base_is_none() {
        assert_eq!(Money::from_whole(1).pct_of(Money::ZERO), None);
        assert_eq!(Money::from_whole(1).pct_of(Money::from_whole(-1)), None);
    }

    #[test]
    fn display_six_decimals() {
        assert_eq!(Money::new(1_500_000).to_string(), "1.500000");
        assert_eq!(Money::new(-2_750_000).to_string(), "-2.750000");
        assert_eq!(Money::new(-500_000).to_string(), "-0.500000");
        assert_eq!(format!("{:?}", Qty::from_whole(3)), "Qty(3.000000)");
    }

    #[test]
    fn parse_decimal_text() {
        assert_eq!("5000".parse::<Money>(), Ok(Money::from_whole(5_000)));
        assert_eq!("0.5".parse::<Qty>(), Ok(Qty::new(500_000)));
        assert_eq!("-12.345678".parse::<Money>(), Ok(Money::new(-12_345_678)));
        assert_eq!(".25".parse::<Pct>(), Ok(Pct::new(250_000)));
        assert_eq!(" 7. ".parse::<Money>(), Ok(Money::from_whole(7)));
    }

    #[test]
    fn parse_rejects_bad_text() {
        assert_eq!("".parse::<Money>(), Err(ParseFixedError::Empty));
        assert_eq!("-".parse::<Money>(), Err(ParseFixedError::Empty));
        assert!(matches!(
            "1.2.3".parse::<Money>(),
            Err(ParseFixedError::InvalidDigit { .. })
        ));
        assert!(matches!(
            "1e5".parse::<Money>(),
            Err(ParseFixedError::InvalidDigit { .. })
        ));
        assert!(matches!(
            "0.1234567".parse::<Money>(),
            Err(ParseFixedError::TooPrecise { .. })
        ));
        assert!(matches!(
            "99999999999999999999".parse::<Money>(),
            Err(ParseFixedError::OutOfRange { .. })
        ));
    }

    #[test]
    fn from_f64_rejects_non_finite() {
        assert_eq!(Money::from_f64(f64::NAN), Err(ParseFixedError::NotFinite));
        assert_eq!(Money::from_f64(f64::INFINITY), Err(ParseFixedError::NotFinite));
        assert!(matches!(
            Money::from_f64(1e300),
            Err(ParseFixedError::OutOfRange { .. })
        ));
        assert_eq!(Money::from_f64(100.5), Ok(Money::new(100_500_000)));
    }

    #[test]
    fn div_round_negative_numerators() {
        assert_eq!(div_round(-15, 10), -2);
        assert_eq!(div_round(-14, 10), -1);
        assert_eq!(div_round(15, 10), 2);
    }
}
