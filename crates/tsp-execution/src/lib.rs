//! tsp-execution
//!
//! Trade execution for challenge accounts:
//! - `TradeProcessor` applies one buy/sell as a single all-or-nothing step
//!   (ledger mutation, trade record, rollover, evaluation)
//! - `Clock` capability for injectable time
//! - `ChallengeStore` persistence contract + in-memory implementation
//!
//! The processor itself is pure; only the store is async.

mod clock;
mod processor;
mod types;

pub mod store;

pub use clock::{Clock, ManualClock};
pub use processor::{TradeError, TradeProcessor};
pub use store::{ChallengeStore, MemoryStore, SaveFault, StoreError, TradeQuery};
pub use types::{ChallengeBook, MarkResult, Trade, TradeIntent, TradeResult};
