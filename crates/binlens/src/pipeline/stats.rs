//! Statistics aggregation
//!
//! Consumes the statistics stream in log order and writes three fixed-width
//! reports: per-table mutation counts over time windows (`binlog_stats.log`),
//! DDL statements with their positions (`ddl_info.log`), and transactions
//! that are big by row count or long by duration (`big_long_trx.log`).

use std::collections::HashMap;
use std::path::PathBuf;

use regex::Regex;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::common::error::Result;
use crate::pipeline::envelope::{StatKind, StatsRecord};
use crate::pipeline::synthesis::format_timestamp;

/// Report file names inside the output directory.
pub const STATS_FILE: &str = "binlog_stats.log";
pub const DDL_FILE: &str = "ddl_info.log";
pub const BIG_LONG_FILE: &str = "big_long_trx.log";

/// Aggregation thresholds.
#[derive(Debug, Clone)]
pub struct StatsOptions {
    pub dir: PathBuf,
    /// Seconds per report window
    pub interval_secs: u32,
    /// Transactions with at least this many rows are "big"
    pub big_trx_rows: u64,
    /// Transactions lasting at least this many seconds are "long"
    pub long_trx_secs: u32,
}

#[derive(Debug)]
struct TableWindow {
    segment: String,
    start_time: u32,
    stop_time: u32,
    start_offset: u64,
    stop_offset: u64,
    database: String,
    table: String,
    inserts: u64,
    updates: u64,
    deletes: u64,
}

#[derive(Debug, Default)]
struct OpenTrx {
    segment: String,
    start_offset: u64,
    stop_offset: u64,
    start_time: u32,
    stop_time: u32,
    row_count: u64,
    /// per-table insert/update/delete row counts
    statements: HashMap<String, [u64; 3]>,
}

/// Drain the statistics stream into the three reports.
pub async fn run_stats(opts: StatsOptions, mut rx: mpsc::Receiver<StatsRecord>) -> Result<()> {
    let mut stats_out = BufWriter::new(File::create(opts.dir.join(STATS_FILE)).await?);
    let mut ddl_out = BufWriter::new(File::create(opts.dir.join(DDL_FILE)).await?);
    let mut big_long_out = BufWriter::new(File::create(opts.dir.join(BIG_LONG_FILE)).await?);

    stats_out
        .write_all(
            format!(
                "{:<17} {:<19} {:<19} {:<10} {:<10} {:<8} {:<8} {:<8} {:<15} {:<20}\n",
                "binlog",
                "starttime",
                "stoptime",
                "startpos",
                "stoppos",
                "inserts",
                "updates",
                "deletes",
                "database",
                "table"
            )
            .as_bytes(),
        )
        .await?;
    ddl_out
        .write_all(
            format!(
                "{:<19} {:<17} {:<10} {:<10} {}\n",
                "datetime", "binlog", "startpos", "stoppos", "sql"
            )
            .as_bytes(),
        )
        .await?;
    big_long_out
        .write_all(
            format!(
                "{:<17} {:<19} {:<19} {:<10} {:<10} {:<8} {:<10} {}\n",
                "binlog", "starttime", "stoptime", "startpos", "stoppos", "rows", "duration",
                "tables"
            )
            .as_bytes(),
        )
        .await?;

    let ddl_pattern =
        Regex::new(r"^\s*(alter|create|rename|truncate)\s+table").expect("static regex");

    let mut windows: HashMap<String, TableWindow> = HashMap::new();
    let mut open_trx = OpenTrx::default();
    let mut last_segment = String::new();
    let mut window_deadline: u32 = 0;

    while let Some(record) = rx.recv().await {
        // Segment change flushes the per-table counters; transactions never
        // span segments.
        if last_segment != record.segment && !last_segment.is_empty() {
            flush_windows(&mut stats_out, &mut windows).await?;
            window_deadline = 0;
        }
        if window_deadline == 0 {
            window_deadline = record.timestamp + opts.interval_secs;
        }
        last_segment = record.segment.clone();

        match record.kind {
            StatKind::Query => {
                let statement = record.query.trim().to_ascii_lowercase();
                if statement == "begin" {
                    open_trx = OpenTrx {
                        segment: record.segment.clone(),
                        start_offset: record.start_offset,
                        ..Default::default()
                    };
                } else if statement == "commit" || statement == "rollback" {
                    // start_time stays 0 when every row event inside was
                    // filtered away; nothing to report then
                    if open_trx.start_time > 0 {
                        open_trx.stop_offset = record.stop_offset;
                        open_trx.stop_time = record.timestamp;
                        let duration = open_trx.stop_time.saturating_sub(open_trx.start_time);
                        if open_trx.row_count >= opts.big_trx_rows
                            || duration >= opts.long_trx_secs
                        {
                            write_big_long(&mut big_long_out, &open_trx, duration).await?;
                        }
                        open_trx = OpenTrx::default();
                    }
                } else if ddl_pattern.is_match(&statement) {
                    debug!(position = record.start_offset, "ddl statement observed");
                    ddl_out
                        .write_all(
                            format!(
                                "{:<19} {:<17} {:<10} {:<10} {}\n",
                                format_timestamp(record.timestamp),
                                record.segment,
                                record.start_offset,
                                record.stop_offset,
                                record.query
                            )
                            .as_bytes(),
                        )
                        .await?;
                }
            }
            kind => {
                open_trx.row_count += record.row_count;
                if open_trx.start_time == 0 {
                    open_trx.start_time = record.timestamp;
                }
                let table_key = format!("{}.{}", record.database, record.table);
                let counts = open_trx.statements.entry(table_key.clone()).or_default();
                match kind {
                    StatKind::Insert => counts[0] += record.row_count,
                    StatKind::Update => counts[1] += record.row_count,
                    StatKind::Delete => counts[2] += record.row_count,
                    StatKind::Query => unreachable!(),
                }

                let window = windows.entry(table_key).or_insert_with(|| TableWindow {
                    segment: record.segment.clone(),
                    start_time: record.timestamp,
                    stop_time: record.timestamp,
                    start_offset: record.start_offset,
                    stop_offset: record.stop_offset,
                    database: record.database.clone(),
                    table: record.table.clone(),
                    inserts: 0,
                    updates: 0,
                    deletes: 0,
                });
                match kind {
                    StatKind::Insert => window.inserts += record.row_count,
                    StatKind::Update => window.updates += record.row_count,
                    StatKind::Delete => window.deletes += record.row_count,
                    StatKind::Query => unreachable!(),
                }
                window.stop_time = record.timestamp;
                window.stop_offset = record.stop_offset;

                if record.timestamp >= window_deadline {
                    flush_windows(&mut stats_out, &mut windows).await?;
                    stats_out.write_all(b"\n").await?;
                    window_deadline = record.timestamp + opts.interval_secs;
                }
            }
        }
    }

    flush_windows(&mut stats_out, &mut windows).await?;
    stats_out.flush().await?;
    ddl_out.flush().await?;
    big_long_out.flush().await?;
    info!("statistics aggregation finished");
    Ok(())
}

async fn flush_windows(
    out: &mut BufWriter<File>,
    windows: &mut HashMap<String, TableWindow>,
) -> Result<()> {
    let mut keys: Vec<String> = windows.keys().cloned().collect();
    keys.sort();
    for key in keys {
        let w = &windows[&key];
        out.write_all(
            format!(
                "{:<17} {:<19} {:<19} {:<10} {:<10} {:<8} {:<8} {:<8} {:<15} {:<20}\n",
                w.segment,
                format_timestamp(w.start_time),
                format_timestamp(w.stop_time),
                w.start_offset,
                w.stop_offset,
                w.inserts,
                w.updates,
                w.deletes,
                w.database,
                w.table
            )
            .as_bytes(),
        )
        .await?;
    }
    windows.clear();
    Ok(())
}

async fn write_big_long(
    out: &mut BufWriter<File>,
    trx: &OpenTrx,
    duration: u32,
) -> Result<()> {
    let mut tables: Vec<(&String, &[u64; 3])> = trx.statements.iter().collect();
    tables.sort_by_key(|(name, _)| (*name).clone());
    let tables = tables
        .iter()
        .map(|(name, counts)| {
            format!(
                "{name}(inserts={}, updates={}, deletes={})",
                counts[0], counts[1], counts[2]
            )
        })
        .collect::<Vec<_>>()
        .join(" ");
    out.write_all(
        format!(
            "{:<17} {:<19} {:<19} {:<10} {:<10} {:<8} {:<10} [{}]\n",
            trx.segment,
            format_timestamp(trx.start_time),
            format_timestamp(trx.stop_time),
            trx.start_offset,
            trx.stop_offset,
            trx.row_count,
            duration,
            tables
        )
        .as_bytes(),
    )
    .await?;
    Ok(())
}
