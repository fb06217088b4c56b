//! Typed engine settings extracted from the layered config.
//!
//! Every key is optional. Values are read by JSON pointer so an invalid value
//! names exactly where it came from.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tsp_config::LoadedConfig;
use tsp_portfolio::{Money, Pct};
use tsp_risk::{DailyWindow, RiskRules};

pub const DEFAULT_STARTING_BALANCE: Money = Money::from_whole(5_000);
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// Balance every new challenge starts with, whatever the plan.
    pub starting_balance: Money,
    pub rules: RiskRules,
    /// Reference timezone for daily windows.
    pub window: DailyWindow,
    /// Default trade-history page size.
    pub history_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            starting_balance: DEFAULT_STARTING_BALANCE,
            rules: RiskRules::standard(),
            window: DailyWindow::utc(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl EngineSettings {
    pub fn from_loaded(cfg: &LoadedConfig) -> Result<Self> {
        Self::from_config_json(&cfg.config_json)
    }

    pub fn from_config_json(cfg: &Value) -> Result<Self> {
        let mut s = Self::default();

        if let Some(v) = read::<Money>(cfg, "/challenge/starting_balance")? {
            if !v.is_positive() {
                bail!("invalid config value at /challenge/starting_balance: must be > 0, got {v}");
            }
            s.starting_balance = v;
        }
        if let Some(v) = read::<Pct>(cfg, "/challenge/profit_target_pct")? {
            s.rules.profit_target_pct = v;
        }
        if let Some(v) = read::<Pct>(cfg, "/challenge/max_daily_loss_pct")? {
            s.rules.max_daily_loss_pct = v;
        }
        if let Some(v) = read::<Pct>(cfg, "/challenge/max_total_loss_pct")? {
            s.rules.max_total_loss_pct = v;
        }
        s.rules
            .validate()
            .context("invalid config value under /challenge")?;

        if let Some(name) = read::<String>(cfg, "/daily/timezone")? {
            s.window = DailyWindow::from_name(&name).context("invalid config value at /daily/timezone")?;
        }
        if let Some(n) = read::<usize>(cfg, "/history/limit")? {
            if n == 0 {
                bail!("invalid config value at /history/limit: must be > 0");
            }
            s.history_limit = n;
        }

        Ok(s)
    }
}

fn read<T: DeserializeOwned>(cfg: &Value, ptr: &str) -> Result<Option<T>> {
    match cfg.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .with_context(|| format!("invalid config value at {ptr}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsp_config::load_layered_yaml_from_strings;

    const M: i64 = 1_000_000;

    #[test]
    fn empty_config_is_defaults() {
        let s = EngineSettings::from_config_json(&serde_json::json!({})).unwrap();
        assert_eq!(s, EngineSettings::default());
        assert_eq!(s.starting_balance, Money::new(5_000 * M));
        assert_eq!(s.history_limit, 100);
    }

    #[test]
    fn yaml_strings_and_numbers_both_parse() {
        let cfg = load_layered_yaml_from_strings(&[r#"
challenge:
  starting_balance: "10000"
  profit_target_pct: 8
  max_daily_loss_pct: "4.5"
daily:
  timezone: America/New_York
history:
  limit: 25
"#])
        .unwrap();
        let s = EngineSettings::from_loaded(&cfg).unwrap();
        assert_eq!(s.starting_balance, Money::new(10_000 * M));
        assert_eq!(s.rules.profit_target_pct, Pct::new(8 * M));
        assert_eq!(s.rules.max_daily_loss_pct, Pct::new(4_500_000));
        assert_eq!(s.rules.max_total_loss_pct, Pct::new(10 * M));
        assert_eq!(s.window.timezone().name(), "America/New_York");
        assert_eq!(s.history_limit, 25);
    }

    #[test]
    fn bad_values_name_their_pointer() {
        let cases = [
            (serde_json::json!({"challenge": {"starting_balance": "abc"}}), "/challenge/starting_balance"),
            (serde_json::json!({"challenge": {"starting_balance": "0"}}), "/challenge/starting_balance"),
            (serde_json::json!({"daily": {"timezone": "Mars/Olympus"}}), "/daily/timezone"),
            (serde_json::json!({"history": {"limit": 0}}), "/history/limit"),
            (serde_json::json!({"challenge": {"max_total_loss_pct": 0}}), "/challenge"),
        ];
        for (cfg, ptr) in cases {
            let err = EngineSettings::from_config_json(&cfg).unwrap_err();
            assert!(format!("{err:#}").contains(ptr), "{ptr}: {err:#}");
        }
    }
}
