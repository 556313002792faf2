//! Binlog wire format: event model and decoder.

pub mod decoder;
pub mod event;

pub use decoder::BinlogDecoder;
pub use event::{BinlogEvent, ColumnValue, EventHeader, EventType, RowImage, RowKind};
