//! The inspection pipeline: classification, ordered concurrent SQL
//! synthesis, output writing, rollback reversal and statistics aggregation.

pub mod barrier;
pub mod classifier;
pub mod envelope;
pub mod output;
pub mod reversal;
pub mod stats;
pub mod synthesis;

pub use barrier::OrderingBarrier;
pub use classifier::Classifier;
pub use envelope::{EventEnvelope, SqlBatch, StatKind, StatsRecord};
pub use output::{OutputOptions, ReversalJob};
pub use stats::StatsOptions;
