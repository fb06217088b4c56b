//! tsp-runtime
//!
//! Challenge service over a `ChallengeStore`:
//! - `EngineSettings` from the layered config
//! - `ChallengeService`: start / trade / evaluate / portfolio / history /
//!   summary / archive, serialized per challenge via `KeyedLocks`
//! - read models (`PortfolioView`, `ChallengeSummary`, `TradeOutcome`)

mod locks;
mod service;
mod settings;
mod views;

pub use locks::KeyedLocks;
pub use service::{ChallengeService, ServiceError, CONFLICT_ATTEMPTS};
pub use settings::{EngineSettings, DEFAULT_HISTORY_LIMIT, DEFAULT_STARTING_BALANCE};
pub use views::{ChallengeSummary, PortfolioView, PositionView, TradeOutcome, TradeStats};
