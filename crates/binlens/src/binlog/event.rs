//! Binlog event model
//!
//! Typed representation of the events this tool consumes. The wire layout is
//! the MySQL binary log format: a fixed 19-byte header followed by a
//! type-specific body, optionally trailed by a CRC32 checksum.

use crate::common::error::{BinlensError, Result};
use bytes::Buf;

/// Size of the fixed event header.
pub const EVENT_HEADER_SIZE: usize = 19;

/// Magic bytes at the start of every binlog file.
pub const BINLOG_MAGIC: [u8; 4] = [0xfe, b'b', b'i', b'n'];

/// Binlog event type codes (the subset this tool distinguishes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    QueryEvent,
    StopEvent,
    RotateEvent,
    FormatDescriptionEvent,
    XidEvent,
    TableMapEvent,
    WriteRowsEventV1,
    UpdateRowsEventV1,
    DeleteRowsEventV1,
    HeartbeatLogEvent,
    WriteRowsEventV2,
    UpdateRowsEventV2,
    DeleteRowsEventV2,
    GtidLogEvent,
    AnonymousGtidLogEvent,
    MariadbGtidEvent,
    Unknown(u8),
}

impl EventType {
    pub fn from_code(code: u8) -> Self {
        match code {
            2 => EventType::QueryEvent,
            3 => EventType::StopEvent,
            4 => EventType::RotateEvent,
            15 => EventType::FormatDescriptionEvent,
            16 => EventType::XidEvent,
            19 => EventType::TableMapEvent,
            23 => EventType::WriteRowsEventV1,
            24 => EventType::UpdateRowsEventV1,
            25 => EventType::DeleteRowsEventV1,
            27 => EventType::HeartbeatLogEvent,
            30 => EventType::WriteRowsEventV2,
            31 => EventType::UpdateRowsEventV2,
            32 => EventType::DeleteRowsEventV2,
            33 => EventType::GtidLogEvent,
            34 => EventType::AnonymousGtidLogEvent,
            162 => EventType::MariadbGtidEvent,
            other => EventType::Unknown(other),
        }
    }

    pub fn is_row_event(&self) -> bool {
        matches!(
            self,
            EventType::WriteRowsEventV1
                | EventType::WriteRowsEventV2
                | EventType::UpdateRowsEventV1
                | EventType::UpdateRowsEventV2
                | EventType::DeleteRowsEventV1
                | EventType::DeleteRowsEventV2
        )
    }

    pub fn is_v2_row_event(&self) -> bool {
        matches!(
            self,
            EventType::WriteRowsEventV2
                | EventType::UpdateRowsEventV2
                | EventType::DeleteRowsEventV2
        )
    }
}

/// The three row-change kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    Insert,
    Update,
    Delete,
}

impl RowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowKind::Insert => "insert",
            RowKind::Update => "update",
            RowKind::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(RowKind::Insert),
            "update" => Some(RowKind::Update),
            "delete" => Some(RowKind::Delete),
            _ => None,
        }
    }

    pub fn from_event_type(event_type: EventType) -> Option<Self> {
        match event_type {
            EventType::WriteRowsEventV1 | EventType::WriteRowsEventV2 => Some(RowKind::Insert),
            EventType::UpdateRowsEventV1 | EventType::UpdateRowsEventV2 => Some(RowKind::Update),
            EventType::DeleteRowsEventV1 | EventType::DeleteRowsEventV2 => Some(RowKind::Delete),
            _ => None,
        }
    }
}

/// MySQL column type codes as carried in table-map events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Decimal,
    Tiny,
    Short,
    Long,
    Float,
    Double,
    Null,
    Timestamp,
    LongLong,
    Int24,
    Date,
    Time,
    DateTime,
    Year,
    Varchar,
    Bit,
    Timestamp2,
    DateTime2,
    Time2,
    Json,
    NewDecimal,
    Enum,
    Set,
    TinyBlob,
    MediumBlob,
    LongBlob,
    Blob,
    VarString,
    String,
    Geometry,
}

impl ColumnType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ColumnType::Decimal,
            1 => ColumnType::Tiny,
            2 => ColumnType::Short,
            3 => ColumnType::Long,
            4 => ColumnType::Float,
            5 => ColumnType::Double,
            6 => ColumnType::Null,
            7 => ColumnType::Timestamp,
            8 => ColumnType::LongLong,
            9 => ColumnType::Int24,
            10 => ColumnType::Date,
            11 => ColumnType::Time,
            12 => ColumnType::DateTime,
            13 => ColumnType::Year,
            15 => ColumnType::Varchar,
            16 => ColumnType::Bit,
            17 => ColumnType::Timestamp2,
            18 => ColumnType::DateTime2,
            19 => ColumnType::Time2,
            245 => ColumnType::Json,
            246 => ColumnType::NewDecimal,
            247 => ColumnType::Enum,
            248 => ColumnType::Set,
            249 => ColumnType::TinyBlob,
            250 => ColumnType::MediumBlob,
            251 => ColumnType::LongBlob,
            252 => ColumnType::Blob,
            253 => ColumnType::VarString,
            254 => ColumnType::String,
            255 => ColumnType::Geometry,
            // Unknown codes read as variable-length strings downstream.
            _ => ColumnType::VarString,
        }
    }

    /// Whether values of this type land in the stream as blob-style payloads.
    pub fn is_blob(&self) -> bool {
        matches!(
            self,
            ColumnType::Blob | ColumnType::TinyBlob | ColumnType::MediumBlob | ColumnType::LongBlob
        )
    }
}

/// Fixed event header.
#[derive(Debug, Clone)]
pub struct EventHeader {
    pub timestamp: u32,
    pub event_type: EventType,
    pub server_id: u32,
    pub event_size: u32,
    /// Byte offset of the next event in the current segment, i.e. this
    /// event's end position.
    pub end_position: u32,
    pub flags: u16,
}

impl EventHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < EVENT_HEADER_SIZE {
            return Err(BinlensError::decode(format!(
                "event header too short: {} bytes",
                data.len()
            )));
        }
        let mut buf = data;
        let timestamp = buf.get_u32_le();
        let event_type = EventType::from_code(buf.get_u8());
        let server_id = buf.get_u32_le();
        let event_size = buf.get_u32_le();
        let end_position = buf.get_u32_le();
        let flags = buf.get_u16_le();
        Ok(Self {
            timestamp,
            event_type,
            server_id,
            event_size,
            end_position,
            flags,
        })
    }

    /// Byte offset where this event starts in its segment.
    pub fn start_position(&self) -> u32 {
        self.end_position.saturating_sub(self.event_size)
    }
}

/// Format description event: first real event of every segment.
#[derive(Debug, Clone)]
pub struct FormatDescription {
    pub binlog_version: u16,
    pub server_version: String,
    pub checksummed: bool,
}

/// Table-map event: binds a numeric table id to a schema/table identity
/// and declares the column layout row events rely on.
#[derive(Debug, Clone)]
pub struct TableMap {
    pub table_id: u64,
    pub database: String,
    pub table: String,
    pub column_types: Vec<ColumnType>,
    pub column_metadata: Vec<u16>,
}

/// One decoded row image pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RowImage {
    /// Pre-change values (UPDATE/DELETE)
    pub before: Option<Vec<ColumnValue>>,
    /// Post-change values (INSERT/UPDATE)
    pub after: Option<Vec<ColumnValue>>,
}

/// Row-change event. Update rows decode as before/after pairs, so `rows.len()`
/// is already the affected-row count for every kind.
#[derive(Debug, Clone)]
pub struct RowsChange {
    pub table_id: u64,
    pub database: String,
    pub table: String,
    pub column_count: usize,
    pub rows: Vec<RowImage>,
}

/// Decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    SignedInt(i64),
    UnsignedInt(u64),
    Float(f32),
    Double(f64),
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Date {
        year: u16,
        month: u8,
        day: u8,
    },
    Time {
        negative: bool,
        hours: u16,
        minutes: u8,
        seconds: u8,
        microseconds: u32,
    },
    DateTime {
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        microsecond: u32,
    },
    /// TIMESTAMP as seconds since the epoch
    Timestamp(u32),
    Year(u16),
    Enum(u16),
    Set(u64),
    Bit(Vec<u8>),
}

impl ColumnValue {
    /// Zero-date sentinel check, covering DATE and DATETIME images.
    pub fn is_zero_datetime(&self) -> bool {
        match self {
            ColumnValue::DateTime {
                year, month, day, ..
            } => *year == 0 && *month == 0 && *day == 0,
            ColumnValue::Date { year, month, day } => *year == 0 && *month == 0 && *day == 0,
            ColumnValue::Timestamp(ts) => *ts == 0,
            _ => false,
        }
    }
}

/// Statement event.
#[derive(Debug, Clone)]
pub struct QueryStatement {
    pub thread_id: u32,
    pub database: String,
    pub query: String,
}

/// Transaction commit marker.
#[derive(Debug, Clone)]
pub struct XidCommit {
    pub xid: u64,
}

/// Segment rotation marker.
#[derive(Debug, Clone)]
pub struct Rotate {
    pub position: u64,
    pub next_segment: String,
}

/// GTID event opening a transaction group.
#[derive(Debug, Clone)]
pub struct Gtid {
    pub flags: u8,
    pub source_id: [u8; 16],
    pub sequence: u64,
}

/// A decoded binlog event.
#[derive(Debug, Clone)]
pub enum BinlogEvent {
    FormatDescription(FormatDescription),
    TableMap(TableMap),
    WriteRows(RowsChange),
    UpdateRows(RowsChange),
    DeleteRows(RowsChange),
    Query(QueryStatement),
    Xid(XidCommit),
    Rotate(Rotate),
    Gtid(Gtid),
    Heartbeat,
    Other(EventType),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parse_little_endian() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&0x5f00_0000u32.to_le_bytes()); // timestamp
        raw.push(19); // table map
        raw.extend_from_slice(&7u32.to_le_bytes()); // server id
        raw.extend_from_slice(&57u32.to_le_bytes()); // event size
        raw.extend_from_slice(&1234u32.to_le_bytes()); // end position
        raw.extend_from_slice(&0u16.to_le_bytes()); // flags

        let header = EventHeader::parse(&raw).unwrap();
        assert_eq!(header.timestamp, 0x5f00_0000);
        assert_eq!(header.event_type, EventType::TableMapEvent);
        assert_eq!(header.server_id, 7);
        assert_eq!(header.event_size, 57);
        assert_eq!(header.end_position, 1234);
        assert_eq!(header.start_position(), 1234 - 57);
    }

    #[test]
    fn test_header_too_short() {
        assert!(EventHeader::parse(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_row_kind_mapping() {
        assert_eq!(
            RowKind::from_event_type(EventType::WriteRowsEventV2),
            Some(RowKind::Insert)
        );
        assert_eq!(
            RowKind::from_event_type(EventType::UpdateRowsEventV1),
            Some(RowKind::Update)
        );
        assert_eq!(RowKind::from_event_type(EventType::QueryEvent), None);
        assert_eq!(RowKind::parse("delete"), Some(RowKind::Delete));
        assert_eq!(RowKind::parse("drop"), None);
    }

    #[test]
    fn test_zero_datetime_detection() {
        let zero = ColumnValue::DateTime {
            year: 0,
            month: 0,
            day: 0,
            hour: 0,
            minute: 0,
            second: 0,
            microsecond: 0,
        };
        assert!(zero.is_zero_datetime());
        assert!(ColumnValue::Timestamp(0).is_zero_datetime());
        assert!(!ColumnValue::SignedInt(0).is_zero_datetime());
    }
}
