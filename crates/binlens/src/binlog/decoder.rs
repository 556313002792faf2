//! Binlog event decoder
//!
//! Turns raw event frames into [`BinlogEvent`]s. The decoder is stateful: it
//! remembers the format description of the current segment (for checksum
//! stripping) and the table-map bindings row events refer to.
//!
//! Handled events: FORMAT_DESCRIPTION, TABLE_MAP, WRITE/UPDATE/DELETE_ROWS
//! (v1 and v2), QUERY, XID, ROTATE, GTID, HEARTBEAT. Everything else decodes
//! to [`BinlogEvent::Other`].

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::binlog::event::{
    BinlogEvent, ColumnType, ColumnValue, EventHeader, EventType, FormatDescription, Gtid,
    QueryStatement, Rotate, RowImage, RowsChange, TableMap, XidCommit, EVENT_HEADER_SIZE,
};
use crate::common::error::{BinlensError, Result};

/// Checked reader over an event body. All reads fail instead of panicking
/// when the body runs short.
struct Body<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Body<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(BinlensError::decode(format!(
                "event body short: need {n} bytes, have {}",
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64_le(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    /// Little-endian unsigned integer of 1..=8 bytes.
    fn uint_le(&mut self, n: usize) -> Result<u64> {
        let b = self.take(n)?;
        let mut v = 0u64;
        for (i, byte) in b.iter().enumerate() {
            v |= (*byte as u64) << (8 * i);
        }
        Ok(v)
    }

    /// Big-endian unsigned integer of 1..=8 bytes.
    fn uint_be(&mut self, n: usize) -> Result<u64> {
        let b = self.take(n)?;
        let mut v = 0u64;
        for byte in b {
            v = (v << 8) | *byte as u64;
        }
        Ok(v)
    }

    /// MySQL length-encoded integer.
    fn lenenc(&mut self) -> Result<u64> {
        match self.u8()? {
            v @ 0..=250 => Ok(v as u64),
            252 => Ok(self.u16_le()? as u64),
            253 => self.uint_le(3),
            254 => self.u64_le(),
            other => Err(BinlensError::decode(format!(
                "invalid length-encoded integer prefix {other}"
            ))),
        }
    }
}

fn bit_set(bitmap: &[u8], idx: usize) -> bool {
    bitmap
        .get(idx / 8)
        .map(|b| b & (1 << (idx % 8)) != 0)
        .unwrap_or(false)
}

fn bits_set(bitmap: &[u8]) -> usize {
    bitmap.iter().map(|b| b.count_ones() as usize).sum()
}

/// Stateful binlog event decoder.
#[derive(Debug)]
pub struct BinlogDecoder {
    table_cache: HashMap<u64, TableMap>,
    checksummed: bool,
}

impl Default for BinlogDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BinlogDecoder {
    pub fn new() -> Self {
        Self {
            table_cache: HashMap::new(),
            checksummed: false,
        }
    }

    /// Table identity currently bound to a table id, if any.
    pub fn table(&self, table_id: u64) -> Option<&TableMap> {
        self.table_cache.get(&table_id)
    }

    /// Decode one full event frame (header + body).
    pub fn decode(&mut self, frame: &[u8]) -> Result<(EventHeader, BinlogEvent)> {
        if frame.len() < EVENT_HEADER_SIZE {
            return Err(BinlensError::decode(format!(
                "event frame too short: {} bytes",
                frame.len()
            )));
        }
        let header = EventHeader::parse(frame)?;
        let body = &frame[EVENT_HEADER_SIZE..];
        let event = self.decode_body(&header, body)?;
        Ok((header, event))
    }

    /// Decode an event body given its already-parsed header.
    pub fn decode_body(&mut self, header: &EventHeader, body: &[u8]) -> Result<BinlogEvent> {
        // The format description announces whether events carry a trailing
        // CRC32; strip it from everything that follows.
        let body = if header.event_type == EventType::FormatDescriptionEvent {
            body
        } else if self.checksummed && body.len() > 4 {
            &body[..body.len() - 4]
        } else {
            body
        };

        trace!(
            event_type = ?header.event_type,
            bytes = body.len(),
            "decoding event body"
        );

        match header.event_type {
            EventType::FormatDescriptionEvent => {
                let fde = decode_format_description(body)?;
                self.checksummed = fde.checksummed;
                debug!(
                    server_version = %fde.server_version,
                    checksummed = fde.checksummed,
                    "format description"
                );
                Ok(BinlogEvent::FormatDescription(fde))
            }
            EventType::TableMapEvent => {
                let map = decode_table_map(body)?;
                self.table_cache.insert(map.table_id, map.clone());
                Ok(BinlogEvent::TableMap(map))
            }
            EventType::WriteRowsEventV1 | EventType::WriteRowsEventV2 => {
                let rows = self.decode_rows(body, header.event_type)?;
                Ok(BinlogEvent::WriteRows(rows))
            }
            EventType::UpdateRowsEventV1 | EventType::UpdateRowsEventV2 => {
                let rows = self.decode_rows(body, header.event_type)?;
                Ok(BinlogEvent::UpdateRows(rows))
            }
            EventType::DeleteRowsEventV1 | EventType::DeleteRowsEventV2 => {
                let rows = self.decode_rows(body, header.event_type)?;
                Ok(BinlogEvent::DeleteRows(rows))
            }
            EventType::QueryEvent => Ok(BinlogEvent::Query(decode_query(body)?)),
            EventType::XidEvent => {
                let mut b = Body::new(body);
                Ok(BinlogEvent::Xid(XidCommit { xid: b.u64_le()? }))
            }
            EventType::RotateEvent => Ok(BinlogEvent::Rotate(decode_rotate(body)?)),
            EventType::GtidLogEvent | EventType::AnonymousGtidLogEvent => {
                Ok(BinlogEvent::Gtid(decode_gtid(body)?))
            }
            EventType::MariadbGtidEvent => {
                // MariaDB GTID: sequence(8) domain(4) flags(1). Opens a
                // transaction group the way a BEGIN statement would.
                let mut b = Body::new(body);
                let sequence = b.u64_le()?;
                b.skip(4)?;
                let flags = b.u8()?;
                Ok(BinlogEvent::Gtid(Gtid {
                    flags,
                    source_id: [0; 16],
                    sequence,
                }))
            }
            EventType::HeartbeatLogEvent => Ok(BinlogEvent::Heartbeat),
            other => Ok(BinlogEvent::Other(other)),
        }
    }

    fn decode_rows(&self, body: &[u8], event_type: EventType) -> Result<RowsChange> {
        let is_update = matches!(
            event_type,
            EventType::UpdateRowsEventV1 | EventType::UpdateRowsEventV2
        );
        let is_insert = matches!(
            event_type,
            EventType::WriteRowsEventV1 | EventType::WriteRowsEventV2
        );

        let mut b = Body::new(body);
        let table_id = b.uint_le(6)?;
        b.skip(2)?; // flags
        if event_type.is_v2_row_event() {
            let extra = b.u16_le()? as usize;
            if extra > 2 {
                b.skip(extra - 2)?;
            }
        }
        let column_count = b.lenenc()? as usize;
        let bitmap_len = column_count.div_ceil(8);
        let present_before = b.take(bitmap_len)?.to_vec();
        let present_after = if is_update {
            Some(b.take(bitmap_len)?.to_vec())
        } else {
            None
        };

        let table = self.table_cache.get(&table_id);
        let mut rows = Vec::new();
        while b.remaining() > 0 {
            let before = if !is_insert {
                Some(decode_row_image(&mut b, table, column_count, &present_before)?)
            } else {
                None
            };
            let after = if is_insert {
                Some(decode_row_image(&mut b, table, column_count, &present_before)?)
            } else if is_update {
                let bitmap = present_after.as_deref().unwrap_or(&present_before);
                Some(decode_row_image(&mut b, table, column_count, bitmap)?)
            } else {
                None
            };
            rows.push(RowImage { before, after });
        }

        Ok(RowsChange {
            table_id,
            database: table.map(|t| t.database.clone()).unwrap_or_default(),
            table: table.map(|t| t.table.clone()).unwrap_or_default(),
            column_count,
            rows,
        })
    }
}

fn decode_format_description(body: &[u8]) -> Result<FormatDescription> {
    let mut b = Body::new(body);
    let binlog_version = b.u16_le()?;
    let version_bytes = b.take(50)?;
    let server_version = String::from_utf8_lossy(version_bytes)
        .trim_end_matches('\0')
        .to_string();

    // Fixed fields are 57 bytes (2 + 50 + 4 + 1); then one post-header-length
    // byte per known event type, then the checksum algorithm byte, then the
    // FDE's own CRC32 when checksums are on. The algorithm byte therefore
    // sits at len-5 on checksumming servers and at len-1 otherwise.
    let supports = server_supports_checksum(&server_version);
    let alg = if supports && body.len() >= 5 {
        body[body.len() - 5]
    } else if !body.is_empty() {
        body[body.len() - 1]
    } else {
        0
    };

    Ok(FormatDescription {
        binlog_version,
        server_version,
        checksummed: alg == 1,
    })
}

/// Binlog checksums exist since MySQL 5.6 and MariaDB 5.3.
fn server_supports_checksum(version: &str) -> bool {
    let mut parts = version.split('.');
    let major: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minor: u32 = parts
        .next()
        .map(|p| p.chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    if major == 0 {
        // Unparsable version string: assume a modern server.
        return true;
    }
    if version.contains("MariaDB") {
        return major > 5 || (major == 5 && minor >= 3);
    }
    major > 5 || (major == 5 && minor >= 6)
}

fn decode_table_map(body: &[u8]) -> Result<TableMap> {
    let mut b = Body::new(body);
    let table_id = b.uint_le(6)?;
    b.skip(2)?; // flags

    let db_len = b.u8()? as usize;
    let database = String::from_utf8_lossy(b.take(db_len)?).to_string();
    b.skip(1)?; // nul
    let tb_len = b.u8()? as usize;
    let table = String::from_utf8_lossy(b.take(tb_len)?).to_string();
    b.skip(1)?; // nul

    let column_count = b.lenenc()? as usize;
    let mut column_types = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        column_types.push(ColumnType::from_code(b.u8()?));
    }

    let _metadata_len = b.lenenc()?;
    let mut column_metadata = Vec::with_capacity(column_count);
    for col_type in &column_types {
        let meta = match col_type {
            ColumnType::Float
            | ColumnType::Double
            | ColumnType::Json
            | ColumnType::Geometry
            | ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob
            | ColumnType::Blob => b.u8()? as u16,
            ColumnType::Bit | ColumnType::Varchar | ColumnType::VarString => b.u16_le()?,
            ColumnType::NewDecimal => {
                let precision = b.u8()? as u16;
                let scale = b.u8()? as u16;
                (precision << 8) | scale
            }
            ColumnType::String | ColumnType::Enum | ColumnType::Set => b.u16_le()?,
            ColumnType::Time2 | ColumnType::DateTime2 | ColumnType::Timestamp2 => b.u8()? as u16,
            _ => 0,
        };
        column_metadata.push(meta);
    }

    // Null bitmap trails the metadata; nothing downstream needs it.

    Ok(TableMap {
        table_id,
        database,
        table,
        column_types,
        column_metadata,
    })
}

fn decode_row_image(
    b: &mut Body<'_>,
    table: Option<&TableMap>,
    column_count: usize,
    present: &[u8],
) -> Result<Vec<ColumnValue>> {
    let null_bitmap = b.take(bits_set(present).div_ceil(8))?.to_vec();

    let mut values = Vec::with_capacity(column_count);
    let mut present_idx = 0;
    for col in 0..column_count {
        if !bit_set(present, col) {
            continue;
        }
        if bit_set(&null_bitmap, present_idx) {
            values.push(ColumnValue::Null);
            present_idx += 1;
            continue;
        }
        let col_type = table
            .and_then(|t| t.column_types.get(col))
            .copied()
            .unwrap_or(ColumnType::VarString);
        let meta = table
            .and_then(|t| t.column_metadata.get(col))
            .copied()
            .unwrap_or(0);
        values.push(decode_value(b, col_type, meta)?);
        present_idx += 1;
    }
    Ok(values)
}

fn decode_value(b: &mut Body<'_>, col_type: ColumnType, meta: u16) -> Result<ColumnValue> {
    match col_type {
        ColumnType::Tiny => Ok(ColumnValue::SignedInt(b.u8()? as i8 as i64)),
        ColumnType::Short => Ok(ColumnValue::SignedInt(b.u16_le()? as i16 as i64)),
        ColumnType::Int24 => {
            let v = b.uint_le(3)? as u32;
            let signed = if v & 0x80_0000 != 0 {
                (v | 0xFF00_0000) as i32
            } else {
                v as i32
            };
            Ok(ColumnValue::SignedInt(signed as i64))
        }
        ColumnType::Long => Ok(ColumnValue::SignedInt(b.u32_le()? as i32 as i64)),
        ColumnType::LongLong => Ok(ColumnValue::SignedInt(b.u64_le()? as i64)),
        ColumnType::Float => Ok(ColumnValue::Float(f32::from_bits(b.u32_le()?))),
        ColumnType::Double => Ok(ColumnValue::Double(f64::from_bits(b.u64_le()?))),
        ColumnType::Year => Ok(ColumnValue::Year(b.u8()? as u16 + 1900)),
        ColumnType::Date => {
            let packed = b.uint_le(3)? as u32;
            Ok(ColumnValue::Date {
                day: (packed & 0x1F) as u8,
                month: ((packed >> 5) & 0x0F) as u8,
                year: ((packed >> 9) & 0x7FFF) as u16,
            })
        }
        ColumnType::Time => {
            let packed = b.uint_le(3)? as u32;
            Ok(ColumnValue::Time {
                negative: false,
                hours: (packed / 10_000) as u16,
                minutes: ((packed / 100) % 100) as u8,
                seconds: (packed % 100) as u8,
                microseconds: 0,
            })
        }
        ColumnType::DateTime => {
            let packed = b.u64_le()?;
            Ok(ColumnValue::DateTime {
                second: (packed % 100) as u8,
                minute: ((packed / 100) % 100) as u8,
                hour: ((packed / 10_000) % 100) as u8,
                day: ((packed / 1_000_000) % 100) as u8,
                month: ((packed / 100_000_000) % 100) as u8,
                year: (packed / 10_000_000_000) as u16,
                microsecond: 0,
            })
        }
        ColumnType::Timestamp => Ok(ColumnValue::Timestamp(b.u32_le()?)),
        ColumnType::Timestamp2 => {
            // Big-endian epoch seconds plus packed fractional seconds.
            let secs = b.uint_be(4)? as u32;
            let micros = read_fractional(b, meta as u8)?;
            Ok(timestamp_to_datetime(secs, micros))
        }
        ColumnType::DateTime2 => {
            let packed = b.uint_be(5)?;
            let micros = read_fractional(b, meta as u8)?;
            let year_month = (packed >> 22) & 0x1_FFFF;
            Ok(ColumnValue::DateTime {
                year: (year_month / 13) as u16,
                month: (year_month % 13) as u8,
                day: ((packed >> 17) & 0x1F) as u8,
                hour: ((packed >> 12) & 0x1F) as u8,
                minute: ((packed >> 6) & 0x3F) as u8,
                second: (packed & 0x3F) as u8,
                microsecond: micros,
            })
        }
        ColumnType::Time2 => {
            let packed = b.uint_be(3)? as u32;
            let micros = read_fractional(b, meta as u8)?;
            let negative = packed & 0x80_0000 == 0;
            let value = if negative {
                0x80_0000 - (packed & 0x7F_FFFF)
            } else {
                packed & 0x7F_FFFF
            };
            Ok(ColumnValue::Time {
                negative,
                hours: ((value >> 12) & 0x3FF) as u16,
                minutes: ((value >> 6) & 0x3F) as u8,
                seconds: (value & 0x3F) as u8,
                microseconds: micros,
            })
        }
        ColumnType::Varchar | ColumnType::VarString => {
            let len = if meta < 256 {
                b.u8()? as usize
            } else {
                b.u16_le()? as usize
            };
            Ok(ColumnValue::String(
                String::from_utf8_lossy(b.take(len)?).to_string(),
            ))
        }
        ColumnType::String => {
            // CHAR columns; ENUM/SET hide their real type in the metadata.
            let real_type = (meta >> 8) as u8;
            let max_len = meta & 0xFF;
            if real_type == 247 {
                let v = if max_len == 1 {
                    b.u8()? as u16
                } else {
                    b.u16_le()?
                };
                Ok(ColumnValue::Enum(v))
            } else if real_type == 248 {
                Ok(ColumnValue::Set(b.uint_le(max_len.div_ceil(8) as usize)?))
            } else {
                let len = if max_len < 256 {
                    b.u8()? as usize
                } else {
                    b.u16_le()? as usize
                };
                Ok(ColumnValue::String(
                    String::from_utf8_lossy(b.take(len)?).to_string(),
                ))
            }
        }
        ColumnType::Blob
        | ColumnType::TinyBlob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::Json
        | ColumnType::Geometry => {
            let len = b.uint_le((meta as usize).clamp(1, 4))? as usize;
            Ok(ColumnValue::Bytes(b.take(len)?.to_vec()))
        }
        ColumnType::NewDecimal => {
            let precision = (meta >> 8) as usize;
            let scale = (meta & 0xFF) as usize;
            Ok(ColumnValue::Decimal(decode_decimal(b, precision, scale)?))
        }
        ColumnType::Bit => {
            let nbits = ((meta >> 8) * 8 + (meta & 0xFF)) as usize;
            Ok(ColumnValue::Bit(b.take(nbits.div_ceil(8))?.to_vec()))
        }
        ColumnType::Enum => {
            let v = if meta == 1 {
                b.u8()? as u16
            } else {
                b.u16_le()?
            };
            Ok(ColumnValue::Enum(v))
        }
        ColumnType::Set => Ok(ColumnValue::Set(b.uint_le(meta as usize)?)),
        ColumnType::Decimal | ColumnType::Null => Ok(ColumnValue::Null),
    }
}

/// Fractional seconds: `fsp` decimal digits packed big-endian into
/// `ceil(fsp/2)` bytes, scaled to microseconds.
fn read_fractional(b: &mut Body<'_>, fsp: u8) -> Result<u32> {
    if fsp == 0 {
        return Ok(0);
    }
    let fsp = fsp.min(6);
    let raw = b.uint_be((fsp as usize).div_ceil(2))? as u32;
    Ok(raw * 10u32.pow(6 - fsp as u32))
}

fn timestamp_to_datetime(secs: u32, micros: u32) -> ColumnValue {
    if secs == 0 {
        return ColumnValue::DateTime {
            year: 0,
            month: 0,
            day: 0,
            hour: 0,
            minute: 0,
            second: 0,
            microsecond: micros,
        };
    }
    // Civil-from-days, Howard Hinnant's algorithm, epoch shifted to 0000-03-01.
    let days = (secs / 86_400) as i64;
    let tod = secs % 86_400;
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let year = (yoe as i64 + era * 400 + if month <= 2 { 1 } else { 0 }) as u16;
    ColumnValue::DateTime {
        year,
        month,
        day,
        hour: (tod / 3600) as u8,
        minute: ((tod % 3600) / 60) as u8,
        second: (tod % 60) as u8,
        microsecond: micros,
    }
}

/// MySQL packed DECIMAL: groups of nine decimal digits per four bytes, sign
/// bit stored inverted, negative values stored as complement.
fn decode_decimal(b: &mut Body<'_>, precision: usize, scale: usize) -> Result<String> {
    fn group_bytes(digits: usize) -> usize {
        match digits {
            0 => 0,
            1..=2 => 1,
            3..=4 => 2,
            5..=6 => 3,
            _ => 4,
        }
    }

    let int_digits = precision.saturating_sub(scale);
    let int_words = int_digits / 9;
    let int_rest = int_digits % 9;
    let frac_words = scale / 9;
    let frac_rest = scale % 9;

    let total =
        group_bytes(int_rest) + int_words * 4 + frac_words * 4 + group_bytes(frac_rest);
    let mut raw = b.take(total)?.to_vec();

    let negative = raw[0] & 0x80 == 0;
    raw[0] ^= 0x80;
    if negative {
        for byte in raw.iter_mut() {
            *byte = !*byte;
        }
    }

    let mut r = Body::new(&raw);
    let mut out = String::new();
    if negative {
        out.push('-');
    }

    let mut int_part = String::new();
    if group_bytes(int_rest) > 0 {
        let v = r.uint_be(group_bytes(int_rest))?;
        if v > 0 || int_words == 0 {
            int_part.push_str(&v.to_string());
        }
    }
    for _ in 0..int_words {
        let v = r.uint_be(4)?;
        if int_part.is_empty() {
            if v != 0 {
                int_part.push_str(&v.to_string());
            }
        } else {
            int_part.push_str(&format!("{v:09}"));
        }
    }
    if int_part.is_empty() {
        int_part.push('0');
    }
    out.push_str(&int_part);

    if scale > 0 {
        out.push('.');
        for _ in 0..frac_words {
            out.push_str(&format!("{:09}", r.uint_be(4)?));
        }
        if group_bytes(frac_rest) > 0 {
            let v = r.uint_be(group_bytes(frac_rest))?;
            out.push_str(&format!("{v:0width$}", width = frac_rest));
        }
    }

    Ok(out)
}

fn decode_query(body: &[u8]) -> Result<QueryStatement> {
    let mut b = Body::new(body);
    let thread_id = b.u32_le()?;
    b.skip(4)?; // exec time
    let db_len = b.u8()? as usize;
    b.skip(2)?; // error code
    let status_len = b.u16_le()? as usize;
    b.skip(status_len)?;
    let database = String::from_utf8_lossy(b.take(db_len)?).to_string();
    b.skip(1)?; // nul
    let query = String::from_utf8_lossy(b.take(b.remaining())?).to_string();
    Ok(QueryStatement {
        thread_id,
        database,
        query,
    })
}

fn decode_rotate(body: &[u8]) -> Result<Rotate> {
    let mut b = Body::new(body);
    let position = b.u64_le()?;
    let next_segment = String::from_utf8_lossy(b.take(b.remaining())?)
        .trim_end_matches('\0')
        .to_string();
    Ok(Rotate {
        position,
        next_segment,
    })
}

fn decode_gtid(body: &[u8]) -> Result<Gtid> {
    let mut b = Body::new(body);
    let flags = b.u8()?;
    let mut source_id = [0u8; 16];
    source_id.copy_from_slice(b.take(16)?);
    let sequence = b.u64_le()?;
    Ok(Gtid {
        flags,
        source_id,
        sequence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenenc_integers() {
        assert_eq!(Body::new(&[5]).lenenc().unwrap(), 5);
        assert_eq!(Body::new(&[250]).lenenc().unwrap(), 250);
        assert_eq!(Body::new(&[252, 0x34, 0x12]).lenenc().unwrap(), 0x1234);
        assert_eq!(
            Body::new(&[253, 0x56, 0x34, 0x12]).lenenc().unwrap(),
            0x123456
        );
        assert!(Body::new(&[251]).lenenc().is_err());
        assert!(Body::new(&[252, 0x34]).lenenc().is_err());
    }

    #[test]
    fn test_uint_endianness() {
        assert_eq!(Body::new(&[0x01, 0x02, 0x03]).uint_le(3).unwrap(), 0x030201);
        assert_eq!(Body::new(&[0x01, 0x02, 0x03]).uint_be(3).unwrap(), 0x010203);
    }

    #[test]
    fn test_bitmap_helpers() {
        let bitmap = [0b0000_0101u8, 0b0000_0001];
        assert!(bit_set(&bitmap, 0));
        assert!(!bit_set(&bitmap, 1));
        assert!(bit_set(&bitmap, 2));
        assert!(bit_set(&bitmap, 8));
        assert!(!bit_set(&bitmap, 15));
        assert!(!bit_set(&bitmap, 64));
        assert_eq!(bits_set(&bitmap), 3);
    }

    #[test]
    fn test_checksum_support_by_version() {
        assert!(server_supports_checksum("8.0.35-0ubuntu0.22.04.1-log"));
        assert!(server_supports_checksum("5.6.51"));
        assert!(!server_supports_checksum("5.5.62"));
        assert!(server_supports_checksum("10.6.12-MariaDB"));
    }

    #[test]
    fn test_decode_xid_and_rotate() {
        let mut decoder = BinlogDecoder::new();
        let header = EventHeader {
            timestamp: 0,
            event_type: EventType::XidEvent,
            server_id: 1,
            event_size: 27,
            end_position: 500,
            flags: 0,
        };
        let body = 42u64.to_le_bytes();
        match decoder.decode_body(&header, &body).unwrap() {
            BinlogEvent::Xid(x) => assert_eq!(x.xid, 42),
            other => panic!("unexpected event {other:?}"),
        }

        let header = EventHeader {
            event_type: EventType::RotateEvent,
            ..header
        };
        let mut body = 4u64.to_le_bytes().to_vec();
        body.extend_from_slice(b"mysql-bin.000007");
        match decoder.decode_body(&header, &body).unwrap() {
            BinlogEvent::Rotate(r) => {
                assert_eq!(r.position, 4);
                assert_eq!(r.next_segment, "mysql-bin.000007");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_query_statement() {
        let mut decoder = BinlogDecoder::new();
        let mut body = Vec::new();
        body.extend_from_slice(&9u32.to_le_bytes()); // thread id
        body.extend_from_slice(&0u32.to_le_bytes()); // exec time
        body.push(4); // schema length
        body.extend_from_slice(&0u16.to_le_bytes()); // error code
        body.extend_from_slice(&0u16.to_le_bytes()); // status vars length
        body.extend_from_slice(b"shop");
        body.push(0);
        body.extend_from_slice(b"BEGIN");

        let header = EventHeader {
            timestamp: 0,
            event_type: EventType::QueryEvent,
            server_id: 1,
            event_size: (EVENT_HEADER_SIZE + body.len()) as u32,
            end_position: 200,
            flags: 0,
        };
        match decoder.decode_body(&header, &body).unwrap() {
            BinlogEvent::Query(q) => {
                assert_eq!(q.thread_id, 9);
                assert_eq!(q.database, "shop");
                assert_eq!(q.query, "BEGIN");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_table_map_and_insert_rows() {
        let mut decoder = BinlogDecoder::new();

        // Table map: table id 11, db "shop", table "orders",
        // columns (LONG, VARCHAR(255)).
        let mut body = Vec::new();
        body.extend_from_slice(&[11, 0, 0, 0, 0, 0]); // table id
        body.extend_from_slice(&1u16.to_le_bytes()); // flags
        body.push(4);
        body.extend_from_slice(b"shop");
        body.push(0);
        body.push(6);
        body.extend_from_slice(b"orders");
        body.push(0);
        body.push(2); // column count
        body.push(3); // LONG
        body.push(15); // VARCHAR
        body.push(2); // metadata length
        body.extend_from_slice(&255u16.to_le_bytes()); // varchar max length
        body.push(0b0000_0010); // null bitmap

        let header = EventHeader {
            timestamp: 0,
            event_type: EventType::TableMapEvent,
            server_id: 1,
            event_size: (EVENT_HEADER_SIZE + body.len()) as u32,
            end_position: 300,
            flags: 0,
        };
        match decoder.decode_body(&header, &body).unwrap() {
            BinlogEvent::TableMap(map) => {
                assert_eq!(map.table_id, 11);
                assert_eq!(map.database, "shop");
                assert_eq!(map.table, "orders");
                assert_eq!(map.column_types, vec![ColumnType::Long, ColumnType::Varchar]);
            }
            other => panic!("unexpected event {other:?}"),
        }

        // WriteRows v1 for the mapped table: one row (7, "ok").
        let mut body = Vec::new();
        body.extend_from_slice(&[11, 0, 0, 0, 0, 0]); // table id
        body.extend_from_slice(&0u16.to_le_bytes()); // flags
        body.push(2); // column count
        body.push(0b0000_0011); // both columns present
        body.push(0); // null bitmap: none null
        body.extend_from_slice(&7u32.to_le_bytes()); // id = 7
        body.push(2); // varchar length
        body.extend_from_slice(b"ok");

        let header = EventHeader {
            event_type: EventType::WriteRowsEventV1,
            ..header
        };
        match decoder.decode_body(&header, &body).unwrap() {
            BinlogEvent::WriteRows(rows) => {
                assert_eq!(rows.database, "shop");
                assert_eq!(rows.table, "orders");
                assert_eq!(rows.rows.len(), 1);
                let after = rows.rows[0].after.as_ref().unwrap();
                assert_eq!(after[0], ColumnValue::SignedInt(7));
                assert_eq!(after[1], ColumnValue::String("ok".into()));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_timestamp_to_datetime_epoch_math() {
        // 2021-01-01 00:00:00 UTC
        match timestamp_to_datetime(1_609_459_200, 0) {
            ColumnValue::DateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
                ..
            } => {
                assert_eq!((year, month, day), (2021, 1, 1));
                assert_eq!((hour, minute, second), (0, 0, 0));
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_decode_decimal_positive_and_negative() {
        // DECIMAL(4,2), value 12.34: int part 12 (1 byte), frac part 34
        // (1 byte), sign bit set on the first byte for positive values.
        let raw = [0x80 | 12u8, 34];
        let mut b = Body::new(&raw);
        assert_eq!(decode_decimal(&mut b, 4, 2).unwrap(), "12.34");

        // Same value negative: full complement of the positive encoding.
        let raw = [!(0x80 | 12u8), !34];
        let mut b = Body::new(&raw);
        assert_eq!(decode_decimal(&mut b, 4, 2).unwrap(), "-12.34");
    }
}
