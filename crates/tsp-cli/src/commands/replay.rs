//! `tsp replay`: drive a challenge through a JSON-lines script.
//!
//! Each line is one op (`start`, `clock`, `marks`, `trade`, `evaluate`,
//! `portfolio`, `summary`, `history`, `archive`). The store is in-memory and
//! the clock only moves when the script says so, so a script replays the
//! same way every time.
//!
//! One JSON object is printed per op:
//! `{"line":N,"op":"trade","ok":true,"result":{...}}` or
//! `{"line":N,"op":"trade","ok":false,"error":"..."}`. Rejected operations
//! are reported and the replay continues; unreadable lines abort it.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tsp_config::UnusedKeyPolicy;
use tsp_execution::{Clock, ManualClock, MemoryStore, TradeIntent};
use tsp_portfolio::{marks, MarkMap, Money, Qty, Side};
use tsp_runtime::{ChallengeService, EngineSettings, ServiceError};
use uuid::Uuid;

/// Replay clock start when the script sets none.
const DEFAULT_START: &str = "2026-01-05T09:00:00Z";

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Start {
        user: String,
        #[serde(default = "default_plan")]
        plan: String,
    },
    /// Set (`at`) or move (`advance_secs`) the clock.
    Clock {
        at: Option<DateTime<Utc>>,
        advance_secs: Option<i64>,
    },
    /// Replace the current market prices.
    Marks { prices: BTreeMap<String, Money> },
    Trade {
        symbol: String,
        side: Side,
        quantity: Qty,
        price: Money,
    },
    Evaluate,
    Portfolio,
    Summary,
    History { limit: Option<usize> },
    Archive,
}

fn default_plan() -> String {
    "Starter".to_string()
}

impl Op {
    fn name(&self) -> &'static str {
        match self {
            Op::Start { .. } => "start",
            Op::Clock { .. } => "clock",
            Op::Marks { .. } => "marks",
            Op::Trade { .. } => "trade",
            Op::Evaluate => "evaluate",
            Op::Portfolio => "portfolio",
            Op::Summary => "summary",
            Op::History { .. } => "history",
            Op::Archive => "archive",
        }
    }
}

pub async fn replay_file(script: &Path, config_paths: &[String], strict_config: bool) -> Result<()> {
    let loaded = super::load_config(config_paths)?;
    let policy = if strict_config {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    super::check_unused_keys(&loaded, policy)?;
    let settings = EngineSettings::from_loaded(&loaded)?;

    let file = File::open(script).with_context(|| format!("failed to open script: {}", script.display()))?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    tracing::info!(config_hash = %loaded.config_hash, script = %script.display(), "replay start");
    run_script(settings, BufReader::new(file), &mut out).await
}

/// State carried between ops.
struct Replay {
    svc: ChallengeService<MemoryStore, ManualClock>,
    prices: MarkMap,
    challenge: Option<Uuid>,
}

pub async fn run_script<R: BufRead, W: Write>(settings: EngineSettings, reader: R, out: &mut W) -> Result<()> {
    let start: DateTime<Utc> = DEFAULT_START
        .parse()
        .context("invalid default replay start")?;
    let mut rp = Replay {
        svc: ChallengeService::new(MemoryStore::new(), ManualClock::new(start), settings),
        prices: MarkMap::new(),
        challenge: None,
    };

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("failed to read script line {line_no}"))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let op: Op = serde_json::from_str(trimmed).with_context(|| format!("invalid op on line {line_no}"))?;
        let name = op.name();
        let record = match rp.apply(op).await? {
            Ok(result) => json!({ "line": line_no, "op": name, "ok": true, "result": result }),
            Err(error) => json!({ "line": line_no, "op": name, "ok": false, "error": error }),
        };
        writeln!(out, "{record}").context("failed to write replay output")?;
    }

    out.flush().context("failed to flush replay output")?;
    Ok(())
}

impl Replay {
    /// Outer error aborts the replay; inner error is a reported rejection.
    async fn apply(&mut self, op: Op) -> Result<std::result::Result<Value, String>> {
        let op = match op {
            Op::Clock { at, advance_secs } => {
                match (at, advance_secs) {
                    (Some(at), None) => self.svc.clock().set(at),
                    (None, Some(secs)) => self.svc.clock().advance(Duration::seconds(secs)),
                    _ => bail!("clock op needs exactly one of `at` or `advance_secs`"),
                }
                return Ok(Ok(json!({ "now": self.svc.clock().now() })));
            }
            Op::Marks { prices } => {
                self.prices = marks(prices);
                return Ok(Ok(serde_json::to_value(&self.prices)?));
            }
            Op::Start { user, plan } => {
                return Ok(match self.svc.start_challenge(&user, &plan).await {
                    Ok(c) => {
                        self.challenge = Some(c.id());
                        Ok(serde_json::to_value(c.to_parts())?)
                    }
                    Err(e) => Err(rejection(e)?),
                });
            }
            other => other,
        };

        let Some(id) = self.challenge else {
            return Ok(Err("no challenge started".to_string()));
        };
        let res = match op {
            Op::Trade {
                symbol,
                side,
                quantity,
                price,
            } => {
                let intent = TradeIntent::new(symbol, side, quantity, price);
                to_json(self.svc.execute_trade(id, &intent, &self.prices).await)
            }
            Op::Evaluate => to_json(self.svc.evaluate(id, &self.prices).await),
            Op::Portfolio => to_json(self.svc.portfolio(id, &self.prices).await),
            Op::Summary => to_json(self.svc.summary(id, &self.prices).await),
            Op::History { limit } => to_json(self.svc.trade_history(id, limit).await),
            Op::Archive => to_json(self.svc.archive(id).await.map(|c| c.to_parts())),
            Op::Start { .. } | Op::Clock { .. } | Op::Marks { .. } => unreachable!("handled above"),
        };
        Ok(match res? {
            Ok(v) => Ok(v),
            Err(e) => Err(rejection(e)?),
        })
    }
}

fn to_json<T: serde::Serialize>(
    r: std::result::Result<T, ServiceError>,
) -> Result<std::result::Result<Value, ServiceError>> {
    match r {
        Ok(v) => Ok(Ok(serde_json::to_value(v).context("serialize op result failed")?)),
        Err(e) => Ok(Err(e)),
    }
}

/// Domain rejections are reported; store failures abort.
fn rejection(e: ServiceError) -> Result<String> {
    match e {
        ServiceError::Store(inner) => Err(inner.context("store failure during replay")),
        other => Ok(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(script: &str) -> Vec<Value> {
        let mut out = Vec::new();
        run_script(EngineSettings::default(), script.as_bytes(), &mut out)
            .await
            .unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn ops_before_start_are_rejected_not_fatal() {
        let lines = run(r#"{"op":"evaluate"}
{"op":"start","user":"alice"}
{"op":"evaluate"}
"#)
        .await;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["ok"], false);
        assert_eq!(lines[0]["error"], "no challenge started");
        assert_eq!(lines[2]["ok"], true);
        assert_eq!(lines[2]["result"]["reason"], "WITHIN_LIMITS");
    }

    #[tokio::test]
    async fn comments_and_blank_lines_are_skipped() {
        let lines = run("# setup\n\n{\"op\":\"clock\",\"advance_secs\":60}\n").await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["line"], 3);
        assert_eq!(lines[0]["result"]["now"], "2026-01-05T09:01:00Z");
    }

    #[tokio::test]
    async fn malformed_line_aborts_with_line_number() {
        let mut out = Vec::new();
        let err = run_script(EngineSettings::default(), "{\"op\":\"fly\"}\n".as_bytes(), &mut out)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
