//! tsp-risk
//!
//! Challenge lifecycle and risk evaluation:
//! - Challenge aggregate with a monotonic ACTIVE → SUCCESSFUL | FAILED machine
//! - Daily loss, total loss and profit target checks in fixed precedence
//! - Lazy daily-baseline rollover in one reference timezone
//!
//! Deterministic, pure logic. No IO, no wall clock; `now` and prices are
//! always passed in.

mod challenge;
mod daily;
mod engine;
mod types;

pub use challenge::{Challenge, ChallengeParts};
pub use daily::{DailyWindow, Rollover};
pub use engine::{evaluate, evaluate_and_transition, evaluate_mark};
pub use types::*;
