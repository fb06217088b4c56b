use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::fixedpoint::{Money, Qty};

/// Reserved symbol of the synthetic cash position (the virtual currency).
pub const CASH_SYMBOL: &str = "USD";

/// BUY or SELL.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("invalid side: {other}")),
        }
    }
}

/// Canonical symbol form: trimmed, ASCII upper-case.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

/// A holding of one symbol. The cash holding uses [`CASH_SYMBOL`] with
/// `quantity` equal to the cash amount; its `average_cost` is pinned to 1
/// and never read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Qty,
    pub average_cost: Money,
}

impl Position {
    pub fn new<S: Into<String>>(symbol: S, quantity: Qty, average_cost: Money) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            average_cost,
        }
    }

    pub fn cash(amount: Money) -> Self {
        Self {
            symbol: CASH_SYMBOL.to_string(),
            quantity: amount.as_qty(),
            average_cost: Money::ONE,
        }
    }

    pub fn is_cash(&self) -> bool {
        self.symbol == CASH_SYMBOL
    }

    /// Capital spent on the remaining quantity: `quantity × average_cost`.
    pub fn cost_basis(&self) -> Option<Money> {
        if self.is_cash() {
            return Some(self.quantity.as_money());
        }
        self.quantity.checked_notional(self.average_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_parses_case_insensitively() {
        assert_eq!(" buy ".parse::<Side>(), Ok(Side::Buy));
        assert_eq!("SELL".parse::<Side>(), Ok(Side::Sell));
        assert!("hold".parse::<Side>().is_err());
    }

    #[test]
    fn normalize_symbol_upper_cases_and_trims() {
        assert_eq!(normalize_symbol("  btc-usd "), "BTC-USD");
    }

    #[test]
    fn cash_position_cost_basis_is_its_amount() {
        let cash = Position::cash(Money::from_whole(1_000));
        assert!(cash.is_cash());
        assert_eq!(cash.cost_basis(), Some(Money::from_whole(1_000)));
    }
}
