//! Event filtering
//!
//! Decides which events continue down the pipeline: a position window, a lazy
//! datetime window, and allow-lists for databases, tables and row-change
//! kinds. The stop bounds are terminal — once the stream is past them there
//! is nothing left to accept.

use crate::binlog::event::RowKind;
use crate::common::position::LogPosition;

/// Outcome of a filter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    /// Skip this event, keep reading
    SkipContinue,
    /// Skip this event and end the stream
    SkipTerminal,
}

/// Compiled event filter.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub start_position: Option<LogPosition>,
    pub stop_position: Option<LogPosition>,
    /// Unix seconds, inclusive lower bound
    pub start_datetime: Option<u32>,
    /// Unix seconds, exclusive upper bound
    pub stop_datetime: Option<u32>,
    /// Empty = all databases
    pub databases: Vec<String>,
    /// Empty = all tables
    pub tables: Vec<String>,
    /// Empty = all row kinds
    pub row_kinds: Vec<RowKind>,
}

impl EventFilter {
    /// Window check against an event's header data. Events whose timestamp
    /// precedes the start datetime are skipped but the stream keeps going;
    /// once the stop datetime or stop position is reached the stream is done.
    /// Stop bounds are exclusive: an event sitting exactly on one is dropped.
    pub fn check_window(&self, timestamp: u32, position: &LogPosition) -> FilterDecision {
        if let Some(stop) = self.stop_datetime {
            // Rotate/format events carry timestamp 0; never terminate on them.
            if timestamp != 0 && timestamp >= stop {
                return FilterDecision::SkipTerminal;
            }
        }
        if let Some(ref stop) = self.stop_position {
            if position >= stop {
                return FilterDecision::SkipTerminal;
            }
        }
        if let Some(start) = self.start_datetime {
            if timestamp != 0 && timestamp < start {
                return FilterDecision::SkipContinue;
            }
        }
        if let Some(ref start) = self.start_position {
            if position < start {
                return FilterDecision::SkipContinue;
            }
        }
        FilterDecision::Accept
    }

    /// Database/table allow-list check.
    pub fn accepts_table(&self, database: &str, table: &str) -> bool {
        if !self.databases.is_empty() && !self.databases.iter().any(|d| d == database) {
            return false;
        }
        if !self.tables.is_empty() && !self.tables.iter().any(|t| t == table) {
            return false;
        }
        true
    }

    /// Row-kind allow-list check. Applies to row events only; statement
    /// events always pass so transaction tracking and statistics stay whole.
    pub fn accepts_kind(&self, kind: RowKind) -> bool {
        self.row_kinds.is_empty() || self.row_kinds.contains(&kind)
    }
}
