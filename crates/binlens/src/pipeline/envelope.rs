//! Pipeline records
//!
//! [`EventEnvelope`] is the unit of work handed to SQL synthesis: one
//! accepted row-change event, fully resolved and stamped with its admission
//! sequence. [`StatsRecord`] is the lighter sibling every accepted event
//! produces for the statistics stream. Both are created once by the
//! classifier and never mutated afterwards.

use crate::binlog::event::{RowImage, RowKind};
use crate::common::position::LogPosition;
use crate::common::transaction::TrxStatus;

/// One admitted row-change event, ready for SQL synthesis.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    /// Strictly increasing admission index, assigned by the classifier.
    pub sequence: u64,
    /// End position of the event.
    pub position: LogPosition,
    /// Offset of the most recent preceding table-map event. Row events
    /// depend on that structural declaration, so replay must start there,
    /// not at the row event's own offset.
    pub start_offset: u64,
    pub database: String,
    pub table: String,
    pub kind: RowKind,
    pub rows: Vec<RowImage>,
    /// Affected rows; updates count image pairs, not raw tuples.
    pub row_count: u64,
    pub timestamp: u32,
    pub trx_index: u64,
    pub trx_status: TrxStatus,
}

/// What a statistics record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Insert,
    Update,
    Delete,
    Query,
}

impl From<RowKind> for StatKind {
    fn from(kind: RowKind) -> Self {
        match kind {
            RowKind::Insert => StatKind::Insert,
            RowKind::Update => StatKind::Update,
            RowKind::Delete => StatKind::Delete,
        }
    }
}

/// One entry of the statistics stream.
#[derive(Debug, Clone)]
pub struct StatsRecord {
    pub timestamp: u32,
    pub segment: String,
    pub start_offset: u64,
    pub stop_offset: u64,
    pub database: String,
    pub table: String,
    pub kind: StatKind,
    pub row_count: u64,
    /// Statement text, only carried for `StatKind::Query`.
    pub query: String,
}

/// Finished SQL for one envelope, in admission order.
#[derive(Debug, Clone)]
pub struct SqlBatch {
    pub statements: Vec<String>,
    pub database: String,
    pub table: String,
    pub segment: String,
    pub start_offset: u64,
    pub stop_offset: u64,
    pub timestamp: u32,
    pub trx_index: u64,
}
