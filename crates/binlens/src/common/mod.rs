//! Shared building blocks: errors, the position model, event filtering and
//! transaction tracking.

pub mod error;
pub mod filter;
pub mod position;
pub mod transaction;

pub use error::{BinlensError, ErrorCategory, Result};
pub use filter::{EventFilter, FilterDecision};
pub use position::LogPosition;
pub use transaction::{TransactionTracker, TrxStatus};
