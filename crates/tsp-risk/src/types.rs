use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tsp_portfolio::{Money, Pct};

/// Lifecycle status of a challenge.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeStatus {
    Active,
    Successful,
    Failed,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::Active => "ACTIVE",
            ChallengeStatus::Successful => "SUCCESSFUL",
            ChallengeStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChallengeStatus::Active)
    }
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeStatus {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(ChallengeStatus::Active),
            "SUCCESSFUL" => Ok(ChallengeStatus::Successful),
            "FAILED" => Ok(ChallengeStatus::Failed),
            other => Err(RuleError::UnknownStatus {
                value: other.to_string(),
            }),
        }
    }
}

/// Risk thresholds of a challenge, all in percent of the starting balance.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRules {
    pub profit_target_pct: Pct,
    pub max_daily_loss_pct: Pct,
    pub max_total_loss_pct: Pct,
}

impl RiskRules {
    /// The single rule set every plan uses: +10% target, 5% daily loss,
    /// 10% total loss.
    pub fn standard() -> Self {
        Self {
            profit_target_pct: Pct::from_whole(10),
            max_daily_loss_pct: Pct::from_whole(5),
            max_total_loss_pct: Pct::from_whole(10),
        }
    }

    /// Every threshold must be strictly positive.
    pub fn validate(&self) -> Result<(), RuleError> {
        let checks = [
            ("profit_target_pct", self.profit_target_pct),
            ("max_daily_loss_pct", self.max_daily_loss_pct),
            ("max_total_loss_pct", self.max_total_loss_pct),
        ];
        for (name, value) in checks {
            if !value.is_positive() {
                return Err(RuleError::InvalidThreshold { name, value });
            }
        }
        Ok(())
    }
}

impl Default for RiskRules {
    fn default() -> Self {
        Self::standard()
    }
}

/// Which rule decided an evaluation. Computed even when the challenge is
/// already terminal; only `new_status` is gated on ACTIVE.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    WithinLimits,
    DailyLossLimitBreached,
    TotalLossLimitBreached,
    ProfitTargetReached,
}

impl ReasonCode {
    /// Status this outcome drives an ACTIVE challenge to.
    pub fn target_status(&self) -> ChallengeStatus {
        match self {
            ReasonCode::WithinLimits => ChallengeStatus::Active,
            ReasonCode::DailyLossLimitBreached | ReasonCode::TotalLossLimitBreached => {
                ChallengeStatus::Failed
            }
            ReasonCode::ProfitTargetReached => ChallengeStatus::Successful,
        }
    }
}

/// Output of one equity & risk evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub equity: Money,
    pub daily_loss_pct: Pct,
    pub total_loss_pct: Pct,
    pub profit_pct: Pct,
    pub previous_status: ChallengeStatus,
    pub new_status: ChallengeStatus,
    pub reason: ReasonCode,
    /// Positions valued at average cost because their price was
    /// unavailable. Non-empty means the equity figure is lower-confidence.
    pub fallback_symbols: Vec<String>,
}

impl EvaluationResult {
    pub fn transitioned(&self) -> bool {
        self.previous_status != self.new_status
    }

    pub fn price_unavailable(&self) -> bool {
        !self.fallback_symbols.is_empty()
    }
}

/// Rejected challenge construction or lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// Starting balance must be strictly positive.
    InvalidStartingBalance { value: Money },
    /// A risk threshold is zero or negative.
    InvalidThreshold { name: &'static str, value: Pct },
    /// Only ACTIVE → SUCCESSFUL and ACTIVE → FAILED are allowed.
    InvalidTransition {
        from: ChallengeStatus,
        to: ChallengeStatus,
    },
    /// Only terminal challenges can be archived.
    NotTerminal { status: ChallengeStatus },
    /// Unrecognized status text.
    UnknownStatus { value: String },
    /// Unrecognized IANA timezone name.
    UnknownTimezone { name: String },
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStartingBalance { value } => {
                write!(f, "challenge: starting balance must be > 0, got {value}")
            }
            Self::InvalidThreshold { name, value } => {
                write!(f, "challenge: {name} must be > 0, got {value}")
            }
            Self::InvalidTransition { from, to } => {
                write!(f, "challenge: transition {from} -> {to} is not allowed")
            }
            Self::NotTerminal { status } => {
                write!(f, "challenge: cannot archive a {status} challenge")
            }
            Self::UnknownStatus { value } => write!(f, "challenge: unknown status {value:?}"),
            Self::UnknownTimezone { name } => write!(f, "daily window: unknown timezone {name:?}"),
        }
    }
}

impl std::error::Error for RuleError {}
