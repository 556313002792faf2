//! Event sources
//!
//! Two interchangeable providers yield the same ordered stream of decoded
//! binlog events: [`FileSource`] reads archived segment files, and
//! [`ReplicationSource`] attaches to a live server as a replica. Everything
//! downstream is shared between them.

pub mod file;
pub mod protocol;
pub mod repl;

use async_trait::async_trait;

use crate::binlog::event::{BinlogEvent, EventHeader};
use crate::common::error::Result;
use crate::common::position::{LogPosition, SEGMENT_BODY_START};

pub use file::FileSource;
pub use repl::{ReplicationConfig, ReplicationSource};

/// One decoded event together with the segment it came from.
#[derive(Debug)]
pub struct SourcedEvent {
    pub segment: String,
    pub header: EventHeader,
    pub event: BinlogEvent,
}

impl SourcedEvent {
    /// End position of this event — where the next event starts.
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.segment.clone(), self.header.end_position as u64)
    }
}

/// Where a source stops yielding events.
#[derive(Debug, Clone, Default)]
pub struct StopBound {
    /// Events at or past this position end the stream.
    pub position: Option<LogPosition>,
    /// Keep reading into subsequent segments. Without any stop bound
    /// configured the source reads exactly one segment.
    pub follow_segments: bool,
}

impl StopBound {
    /// True once `position` is at or past the stop position.
    pub fn reached(&self, position: &LogPosition) -> bool {
        self.position.as_ref().is_some_and(|stop| position >= stop)
    }

    /// True when a whole segment lies past the stop position.
    pub fn segment_out_of_range(&self, segment: &str) -> bool {
        self.reached(&LogPosition::new(segment, SEGMENT_BODY_START))
    }
}

/// An ordered producer of decoded binlog events. `Ok(None)` is clean end of
/// stream; errors are fatal to the stream, there is no retry.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Result<Option<SourcedEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_bound_reached() {
        let stop = StopBound {
            position: Some(LogPosition::new("mysql-bin.000002", 500)),
            follow_segments: true,
        };
        assert!(!stop.reached(&LogPosition::new("mysql-bin.000002", 499)));
        assert!(stop.reached(&LogPosition::new("mysql-bin.000002", 500)));
        assert!(stop.reached(&LogPosition::new("mysql-bin.000003", 4)));
        assert!(!stop.segment_out_of_range("mysql-bin.000002"));
        assert!(stop.segment_out_of_range("mysql-bin.000003"));

        let open = StopBound::default();
        assert!(!open.reached(&LogPosition::new("mysql-bin.999999", u64::MAX)));
    }
}
