//! SQL output writer
//!
//! Single consumer of the synthesized SQL stream. Routes each batch to its
//! file (one per segment, or per table and segment), optionally prefixes a
//! context comment, wraps transactions when asked to, and — in rollback mode
//! — records every written record's byte length and transaction index so the
//! file can later be rewritten in reverse without re-parsing it.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::common::error::Result;
use crate::common::position;
use crate::pipeline::envelope::SqlBatch;
use crate::pipeline::synthesis::format_timestamp;

/// Writer options.
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub dir: PathBuf,
    /// Rollback mode: write to dot-prefixed temporaries and build plans.
    pub rollback: bool,
    pub file_per_table: bool,
    /// Wrap output in begin/commit around transaction boundaries.
    pub keep_trx: bool,
    /// Prefix each record with a `# datetime=... binlog=...` comment line.
    pub extra_info: bool,
}

/// Byte length and transaction index of each record, in write order.
pub type ReversalPlan = Vec<(u64, u64)>;

/// A finished forward-written rollback file awaiting reversal.
#[derive(Debug)]
pub struct ReversalJob {
    pub source: PathBuf,
    pub target: PathBuf,
    pub plan: ReversalPlan,
}

struct FileSink {
    writer: BufWriter<File>,
    last_trx: Option<u64>,
    plan: ReversalPlan,
    target: Option<PathBuf>,
}

/// File name for one output stream:
/// `[<db>.<tb>.]forward|rollback.<segment index>.sql`, dot-prefixed while
/// still a forward-written temporary.
fn sql_file_name(opts: &OutputOptions, batch: &SqlBatch, temporary: bool) -> String {
    let index = position::segment_index(&batch.segment).unwrap_or(0);
    let direction = if opts.rollback { "rollback" } else { "forward" };
    let stem = if opts.file_per_table {
        format!(
            "{}.{}.{direction}.{index}.sql",
            batch.database, batch.table
        )
    } else {
        format!("{direction}.{index}.sql")
    };
    if temporary {
        format!(".{stem}")
    } else {
        stem
    }
}

fn record_text(batch: &SqlBatch, extra_info: bool) -> String {
    let body = batch.statements.join(";\n");
    if extra_info {
        format!(
            "# datetime={} database={} table={} binlog={} startpos={} stoppos={}\n{body};\n",
            format_timestamp(batch.timestamp),
            batch.database,
            batch.table,
            batch.segment,
            batch.start_offset,
            batch.stop_offset,
        )
    } else {
        format!("{body};\n")
    }
}

/// Drain the SQL stream into files. Returns the reversal jobs (empty in
/// forward mode). An I/O failure is fatal only to the owning file: the file
/// is abandoned and everything else keeps writing.
pub async fn write_sql_stream(
    opts: OutputOptions,
    mut rx: mpsc::Receiver<SqlBatch>,
) -> Result<Vec<ReversalJob>> {
    let mut sinks: HashMap<PathBuf, FileSink> = HashMap::new();
    let mut failed: HashSet<PathBuf> = HashSet::new();

    while let Some(batch) = rx.recv().await {
        if batch.statements.is_empty() {
            continue;
        }
        let path = opts.dir.join(sql_file_name(&opts, &batch, opts.rollback));
        if failed.contains(&path) {
            continue;
        }

        if !sinks.contains_key(&path) {
            let file = match File::create(&path).await {
                Ok(file) => file,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "cannot open sql output file");
                    failed.insert(path);
                    continue;
                }
            };
            debug!(path = %path.display(), "opened sql output file");
            let target = opts
                .rollback
                .then(|| opts.dir.join(sql_file_name(&opts, &batch, false)));
            sinks.insert(
                path.clone(),
                FileSink {
                    writer: BufWriter::new(file),
                    last_trx: None,
                    plan: ReversalPlan::new(),
                    target,
                },
            );
        }
        let sink = sinks.get_mut(&path).expect("sink just inserted");

        if let Err(e) = write_record(sink, &batch, &opts).await {
            error!(path = %path.display(), error = %e, "write failed, abandoning file");
            sinks.remove(&path);
            failed.insert(path);
        }
    }

    let mut jobs = Vec::new();
    for (path, mut sink) in sinks {
        let finish = async {
            if opts.keep_trx && !opts.rollback && sink.last_trx.is_some() {
                sink.writer.write_all(b"commit;\n").await?;
            }
            sink.writer.flush().await
        };
        if let Err(e) = finish.await {
            error!(path = %path.display(), error = %e, "flush failed, abandoning file");
            continue;
        }
        if let Some(target) = sink.target {
            jobs.push(ReversalJob {
                source: path,
                target,
                plan: sink.plan,
            });
        }
    }
    info!(files = jobs.len().max(1), "sql writer finished");
    Ok(jobs)
}

async fn write_record(
    sink: &mut FileSink,
    batch: &SqlBatch,
    opts: &OutputOptions,
) -> std::io::Result<()> {
    // Forward mode wraps transactions inline; rollback files get their
    // wrapping injected during reversal instead.
    if opts.keep_trx && !opts.rollback {
        match sink.last_trx {
            None => sink.writer.write_all(b"begin;\n").await?,
            Some(last) if last != batch.trx_index => {
                sink.writer.write_all(b"commit;\nbegin;\n").await?
            }
            _ => {}
        }
    }
    sink.last_trx = Some(batch.trx_index);

    let record = record_text(batch, opts.extra_info);
    sink.writer.write_all(record.as_bytes()).await?;
    if opts.rollback {
        sink.plan.push((record.len() as u64, batch.trx_index));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(trx: u64, table: &str, statement: &str) -> SqlBatch {
        SqlBatch {
            statements: vec![statement.to_string()],
            database: "shop".into(),
            table: table.into(),
            segment: "mysql-bin.000003".into(),
            start_offset: 100,
            stop_offset: 200,
            timestamp: 0,
            trx_index: trx,
        }
    }

    #[tokio::test]
    async fn test_forward_file_with_transaction_wrapping() {
        let dir = tempfile::tempdir().unwrap();
        let opts = OutputOptions {
            dir: dir.path().to_path_buf(),
            rollback: false,
            file_per_table: false,
            keep_trx: true,
            extra_info: false,
        };
        let (tx, rx) = mpsc::channel(8);
        let writer = tokio::spawn(write_sql_stream(opts, rx));

        tx.send(batch(1, "orders", "R1")).await.unwrap();
        tx.send(batch(1, "orders", "R2")).await.unwrap();
        tx.send(batch(2, "orders", "R3")).await.unwrap();
        drop(tx);

        let jobs = writer.await.unwrap().unwrap();
        assert!(jobs.is_empty());

        let content = std::fs::read_to_string(dir.path().join("forward.3.sql")).unwrap();
        assert_eq!(content, "begin;\nR1;\nR2;\ncommit;\nbegin;\nR3;\ncommit;\n");
    }

    #[tokio::test]
    async fn test_rollback_mode_builds_plan_and_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let opts = OutputOptions {
            dir: dir.path().to_path_buf(),
            rollback: true,
            file_per_table: true,
            keep_trx: true,
            extra_info: false,
        };
        let (tx, rx) = mpsc::channel(8);
        let writer = tokio::spawn(write_sql_stream(opts, rx));

        tx.send(batch(1, "orders", "R1")).await.unwrap();
        tx.send(batch(2, "orders", "R2")).await.unwrap();
        tx.send(batch(2, "items", "R3")).await.unwrap();
        drop(tx);

        let mut jobs = writer.await.unwrap().unwrap();
        jobs.sort_by(|a, b| a.source.cmp(&b.source));
        assert_eq!(jobs.len(), 2);

        let orders = jobs
            .iter()
            .find(|j| j.source.ends_with(".shop.orders.rollback.3.sql"))
            .unwrap();
        assert!(orders.target.ends_with("shop.orders.rollback.3.sql"));
        // no wrapping inside rollback temporaries, records only
        let content = std::fs::read_to_string(&orders.source).unwrap();
        assert_eq!(content, "R1;\nR2;\n");
        assert_eq!(orders.plan, vec![(4, 1), (4, 2)]);
    }

    #[tokio::test]
    async fn test_extra_info_comment_line() {
        let dir = tempfile::tempdir().unwrap();
        let opts = OutputOptions {
            dir: dir.path().to_path_buf(),
            rollback: false,
            file_per_table: false,
            keep_trx: false,
            extra_info: true,
        };
        let (tx, rx) = mpsc::channel(8);
        let writer = tokio::spawn(write_sql_stream(opts, rx));
        tx.send(batch(1, "orders", "R1")).await.unwrap();
        drop(tx);
        writer.await.unwrap().unwrap();

        let content = std::fs::read_to_string(dir.path().join("forward.3.sql")).unwrap();
        let mut lines = content.lines();
        let comment = lines.next().unwrap();
        assert!(comment.starts_with("# datetime="));
        assert!(comment.contains("database=shop"));
        assert!(comment.contains("table=orders"));
        assert!(comment.contains("binlog=mysql-bin.000003"));
        assert!(comment.contains("startpos=100"));
        assert!(comment.contains("stoppos=200"));
        assert_eq!(lines.next().unwrap(), "R1;");
    }
}
