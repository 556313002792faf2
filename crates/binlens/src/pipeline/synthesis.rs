//! Ordered concurrent SQL synthesis
//!
//! A fixed pool of workers pulls envelopes from one shared queue, renders
//! each into SQL against the schema version active at the envelope's
//! effective offsets, and publishes through the ordering barrier so output
//! keeps admission order. Row-local problems are logged and the envelope is
//! skipped — but its barrier turn is always taken, or every later sequence
//! would stall.

use std::sync::Arc;

use chrono::{Local, TimeZone};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::binlog::event::{ColumnValue, RowImage};
use crate::pipeline::barrier::OrderingBarrier;
use crate::pipeline::envelope::{EventEnvelope, SqlBatch};
use crate::schema::store::SchemaStore;
use crate::schema::version::{padded_columns, FieldInfo};
use crate::sqlgen::{self, SqlOptions};

/// Zero-date sentinel as emitted into SQL.
pub const DATETIME_ZERO: &str = "0000-00-00 00:00:00.000000";

/// Spawn `threads` synthesis workers. Each worker ends when the envelope
/// queue closes; when all of them are done the output channel closes too.
pub fn spawn_workers(
    threads: usize,
    schema: Arc<SchemaStore>,
    envelope_rx: mpsc::Receiver<EventEnvelope>,
    sql_tx: mpsc::Sender<SqlBatch>,
    opts: SqlOptions,
) -> Vec<JoinHandle<()>> {
    let barrier = Arc::new(OrderingBarrier::new(1));
    let envelope_rx = Arc::new(Mutex::new(envelope_rx));

    (0..threads.max(1))
        .map(|worker| {
            let schema = schema.clone();
            let envelope_rx = envelope_rx.clone();
            let sql_tx = sql_tx.clone();
            let barrier = barrier.clone();
            let opts = opts.clone();
            tokio::spawn(async move {
                run_worker(worker, schema, envelope_rx, sql_tx, barrier, opts).await;
            })
        })
        .collect()
}

async fn run_worker(
    worker: usize,
    schema: Arc<SchemaStore>,
    envelope_rx: Arc<Mutex<mpsc::Receiver<EventEnvelope>>>,
    sql_tx: mpsc::Sender<SqlBatch>,
    barrier: Arc<OrderingBarrier>,
    opts: SqlOptions,
) {
    loop {
        let envelope = {
            let mut rx = envelope_rx.lock().await;
            rx.recv().await
        };
        let Some(envelope) = envelope else {
            debug!(worker, "synthesis worker done");
            return;
        };

        let batch = synthesize(&schema, &envelope, &opts);

        // Take the barrier turn even when the envelope failed: ordering is
        // over sequences, not over successful envelopes.
        let ticket = barrier.acquire(envelope.sequence).await;
        if let Some(batch) = batch {
            if sql_tx.send(batch).await.is_err() {
                // Output writer is gone; keep draining so the producer can
                // finish, every remaining envelope degrades to a no-op.
                ticket.complete();
                continue;
            }
        }
        ticket.complete();
    }
}

/// Render one envelope. `None` means the envelope is skipped (row-local
/// failure, already logged).
fn synthesize(
    schema: &SchemaStore,
    envelope: &EventEnvelope,
    opts: &SqlOptions,
) -> Option<SqlBatch> {
    let at = crate::common::position::LogPosition::new(
        envelope.position.segment.clone(),
        envelope.start_offset,
    );
    let Some(version) = schema.resolve(&envelope.database, &envelope.table, &at) else {
        warn!(
            table = %format!("{}.{}", envelope.database, envelope.table),
            position = %envelope.position,
            "no table definition at position, skipping event"
        );
        return None;
    };

    let column_count = envelope
        .rows
        .iter()
        .filter_map(|r| r.after.as_ref().or(r.before.as_ref()))
        .map(|v| v.len())
        .max()
        .unwrap_or(version.columns.len());
    let columns = padded_columns(column_count, &version.columns);

    let key_indexes = version
        .preferred_key()
        .map(|key| version.key_column_indexes(key))
        .unwrap_or_default();

    let rows: Vec<RowImage> = envelope
        .rows
        .iter()
        .map(|row| RowImage {
            before: row.before.as_ref().map(|v| normalize(v, &columns)),
            after: row.after.as_ref().map(|v| normalize(v, &columns)),
        })
        .collect();

    let statements = sqlgen::build(
        envelope.kind,
        &rows,
        &columns,
        &key_indexes,
        &envelope.database,
        &envelope.table,
        opts,
    );
    Some(SqlBatch {
        statements,
        database: envelope.database.clone(),
        table: envelope.table.clone(),
        segment: envelope.position.segment.clone(),
        start_offset: envelope.start_offset,
        stop_offset: envelope.position.offset,
        timestamp: envelope.timestamp,
        trx_index: envelope.trx_index,
    })
}

/// Normalize decoded values against the declared column types: time-typed
/// columns become formatted strings (zero dates pinned to the sentinel) and
/// TEXT columns stored as blobs are decoded back to text.
fn normalize(values: &[ColumnValue], columns: &[FieldInfo]) -> Vec<ColumnValue> {
    values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            let Some(column) = columns.get(idx) else {
                return value.clone();
            };
            if column.is_time_type() {
                normalize_time(value)
            } else if column.is_text_stored_as_blob() {
                match value {
                    ColumnValue::Bytes(raw) => {
                        ColumnValue::String(String::from_utf8_lossy(raw).to_string())
                    }
                    other => other.clone(),
                }
            } else {
                value.clone()
            }
        })
        .collect()
}

fn normalize_time(value: &ColumnValue) -> ColumnValue {
    match value {
        v if v.is_zero_datetime() => ColumnValue::String(DATETIME_ZERO.to_string()),
        ColumnValue::DateTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
            microsecond,
        } => ColumnValue::String(format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{microsecond:06}"
        )),
        ColumnValue::Timestamp(ts) => match Local.timestamp_opt(*ts as i64, 0).single() {
            Some(dt) => ColumnValue::String(dt.format("%Y-%m-%d %H:%M:%S.%6f").to_string()),
            None => ColumnValue::String(DATETIME_ZERO.to_string()),
        },
        other => other.clone(),
    }
}

/// Timestamp formatting shared by the writers: `YYYY-MM-DD_hh:mm:ss`.
pub fn format_timestamp(ts: u32) -> String {
    match Local.timestamp_opt(ts as i64, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d_%H:%M:%S").to_string(),
        None => String::from("-"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binlog::event::RowKind;
    use crate::common::position::LogPosition;
    use crate::common::transaction::TrxStatus;
    use crate::schema::version::SchemaVersion;

    fn schema() -> SchemaStore {
        let mut store = SchemaStore::new();
        let mut version = SchemaVersion::baseline("shop", "orders");
        version.columns = vec![
            FieldInfo::new("id", "int"),
            FieldInfo::new("created", "datetime"),
            FieldInfo::new("note", "text"),
        ];
        version.primary_key = vec!["id".into()];
        store.insert(version);
        store
    }

    fn envelope(rows: Vec<RowImage>, kind: RowKind) -> EventEnvelope {
        EventEnvelope {
            sequence: 1,
            position: LogPosition::new("mysql-bin.000001", 500),
            start_offset: 400,
            database: "shop".into(),
            table: "orders".into(),
            kind,
            row_count: rows.len() as u64,
            rows,
            timestamp: 1_700_000_000,
            trx_index: 1,
            trx_status: TrxStatus::InProgress,
        }
    }

    #[test]
    fn test_synthesize_normalizes_time_and_text() {
        let store = schema();
        let env = envelope(
            vec![RowImage {
                before: None,
                after: Some(vec![
                    ColumnValue::SignedInt(1),
                    ColumnValue::DateTime {
                        year: 2024,
                        month: 5,
                        day: 6,
                        hour: 7,
                        minute: 8,
                        second: 9,
                        microsecond: 0,
                    },
                    ColumnValue::Bytes(b"hello".to_vec()),
                ]),
            }],
            RowKind::Insert,
        );
        let batch = synthesize(&store, &env, &SqlOptions::default()).unwrap();
        assert_eq!(batch.statements.len(), 1);
        assert!(batch.statements[0].contains("'2024-05-06 07:08:09.000000'"));
        assert!(batch.statements[0].contains("'hello'"));
        assert_eq!(batch.stop_offset, 500);
        assert_eq!(batch.start_offset, 400);
    }

    #[test]
    fn test_synthesize_zero_datetime_sentinel() {
        let store = schema();
        let env = envelope(
            vec![RowImage {
                before: None,
                after: Some(vec![
                    ColumnValue::SignedInt(2),
                    ColumnValue::DateTime {
                        year: 0,
                        month: 0,
                        day: 0,
                        hour: 0,
                        minute: 0,
                        second: 0,
                        microsecond: 0,
                    },
                    ColumnValue::Null,
                ]),
            }],
            RowKind::Insert,
        );
        let batch = synthesize(&store, &env, &SqlOptions::default()).unwrap();
        assert!(batch.statements[0].contains(DATETIME_ZERO));
    }

    #[test]
    fn test_synthesize_unknown_table_is_skipped() {
        let store = SchemaStore::new();
        let env = envelope(vec![], RowKind::Insert);
        assert!(synthesize(&store, &env, &SqlOptions::default()).is_none());
    }

    #[tokio::test]
    async fn test_workers_preserve_admission_order() {
        let store = Arc::new(schema());
        let (env_tx, env_rx) = mpsc::channel(64);
        let (sql_tx, mut sql_rx) = mpsc::channel(64);

        let handles = spawn_workers(4, store, env_rx, sql_tx, SqlOptions::default());

        for seq in 1..=32u64 {
            let mut env = envelope(
                vec![RowImage {
                    before: None,
                    after: Some(vec![
                        ColumnValue::SignedInt(seq as i64),
                        ColumnValue::Null,
                        ColumnValue::Null,
                    ]),
                }],
                RowKind::Insert,
            );
            env.sequence = seq;
            env_tx.send(env).await.unwrap();
        }
        drop(env_tx);
        for handle in handles {
            handle.await.unwrap();
        }

        let mut ids = Vec::new();
        while let Some(batch) = sql_rx.recv().await {
            // first value of the insert is the sequence we sent
            let sql = &batch.statements[0];
            let open = sql.find("VALUES (").unwrap() + "VALUES (".len();
            let close = sql[open..].find(',').unwrap();
            ids.push(sql[open..open + close].parse::<u64>().unwrap());
        }
        assert_eq!(ids, (1..=32).collect::<Vec<u64>>());
    }
}
