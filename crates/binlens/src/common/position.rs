//! Binlog position model
//!
//! A position addresses one event inside the binlog stream: the segment file
//! it lives in plus the byte offset of the event boundary. Segments are named
//! `<base>.<6-digit-index>` and ordered by that numeric index, so positions
//! order by segment index first and byte offset second.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Byte offset of the first event in a binlog file (right after the magic).
pub const SEGMENT_BODY_START: u64 = 4;

/// Address of an event inside the binlog stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    pub segment: String,
    pub offset: u64,
}

impl LogPosition {
    pub fn new(segment: impl Into<String>, offset: u64) -> Self {
        Self {
            segment: segment.into(),
            offset,
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.offset)
    }
}

impl PartialOrd for LogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        match (segment_index(&self.segment), segment_index(&other.segment)) {
            (Some(a), Some(b)) => a.cmp(&b).then(self.offset.cmp(&other.offset)),
            // Unparsable segment names (e.g. the baseline sentinel) sort first.
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => self
                .segment
                .cmp(&other.segment)
                .then(self.offset.cmp(&other.offset)),
        }
    }
}

/// Numeric suffix of a segment name, e.g. `mysql-bin.000042` -> `42`.
pub fn segment_index(name: &str) -> Option<u32> {
    name.rsplit('.').next()?.parse().ok()
}

/// Segment name without its numeric suffix.
pub fn segment_basename(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// Name of the segment following `name`, zero-padded to six digits.
pub fn next_segment(name: &str) -> Option<String> {
    let idx = segment_index(name)?;
    Some(format!("{}.{:06}", segment_basename(name), idx + 1))
}
