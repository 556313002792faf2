//! Rollback file reversal
//!
//! A rollback file is first written forward, in log order, while its
//! [`ReversalPlan`](crate::pipeline::output::ReversalPlan) records every
//! record's byte length. Once the writer is done, this stage walks the plan
//! from the last record to the first, seeking backwards through the
//! temporary file and copying records out in reverse order — lines inside a
//! record keep their order. With transaction wrapping enabled the output is
//! bounded by begin/commit markers injected at every transaction change.
//!
//! Invariant: the reversed script executes each transaction's row operations
//! in exact reverse of forward application order.

use std::io::SeekFrom;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{error, info, warn};

use crate::common::error::Result;
use crate::pipeline::output::ReversalJob;

/// Reverse every finished rollback file, one task per file. A failure is
/// fatal to its own file only; other files still get reversed.
pub async fn reverse_files(jobs: Vec<ReversalJob>, keep_trx: bool) -> Result<()> {
    let mut handles = Vec::new();
    for job in jobs {
        handles.push(tokio::spawn(async move {
            let source = job.source.clone();
            let result = reverse_one(&job, keep_trx).await;
            (source, result)
        }));
    }
    for handle in handles {
        let (source, result) = handle
            .await
            .map_err(|e| crate::common::error::BinlensError::other(e.to_string()))?;
        match result {
            Ok(()) => {
                // Removal failure is reported, non-fatal.
                if let Err(e) = tokio::fs::remove_file(&source).await {
                    warn!(path = %source.display(), error = %e, "could not remove temporary file");
                }
            }
            Err(e) => {
                error!(path = %source.display(), error = %e, "reversal failed, temporary kept");
            }
        }
    }
    Ok(())
}

async fn reverse_one(job: &ReversalJob, keep_trx: bool) -> Result<()> {
    let mut source = File::open(&job.source).await?;
    let target = File::create(&job.target).await?;
    let mut writer = BufWriter::new(target);

    let planned: u64 = job.plan.iter().map(|(len, _)| len).sum();
    let actual = source.metadata().await?.len();
    if planned != actual {
        warn!(
            path = %job.source.display(),
            planned,
            actual,
            "reversal plan does not cover the file exactly"
        );
    }

    let mut offset = planned.min(actual);
    let mut last_trx: Option<u64> = None;
    let mut buf = Vec::new();

    for (length, trx_index) in job.plan.iter().rev() {
        offset = offset.saturating_sub(*length);
        source.seek(SeekFrom::Start(offset)).await?;
        buf.resize(*length as usize, 0);
        source.read_exact(&mut buf).await?;

        if keep_trx {
            match last_trx {
                None => writer.write_all(b"begin;\n").await?,
                Some(last) if last != *trx_index => {
                    writer.write_all(b"commit;\nbegin;\n").await?
                }
                _ => {}
            }
        }
        last_trx = Some(*trx_index);

        writer.write_all(&buf).await?;
        if !buf.ends_with(b"\n") {
            writer.write_all(b"\n").await?;
        }
    }

    if keep_trx && last_trx.is_some() {
        writer.write_all(b"commit;\n").await?;
    }
    writer.flush().await?;
    info!(
        path = %job.target.display(),
        records = job.plan.len(),
        "rollback file reversed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    async fn write_records(path: &Path, records: &[(&str, u64)]) -> Vec<(u64, u64)> {
        let mut content = String::new();
        let mut plan = Vec::new();
        for (text, trx) in records {
            content.push_str(text);
            plan.push((text.len() as u64, *trx));
        }
        tokio::fs::write(path, content).await.unwrap();
        plan
    }

    #[tokio::test]
    async fn test_reversal_with_transaction_wrapping() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join(".rollback.1.sql");
        let target = dir.path().join("rollback.1.sql");

        // forward records R1(trx=1), R2(trx=1), R3(trx=2)
        let plan = write_records(&source, &[("R1;\n", 1), ("R2;\n", 1), ("R3;\n", 2)]).await;
        reverse_files(
            vec![ReversalJob {
                source: source.clone(),
                target: target.clone(),
                plan,
            }],
            true,
        )
        .await
        .unwrap();

        let reversed = tokio::fs::read_to_string(&target).await.unwrap();
        assert_eq!(
            reversed,
            "begin;\nR3;\ncommit;\nbegin;\nR2;\nR1;\ncommit;\n"
        );
        // the temporary is removed on success
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn test_reversal_without_wrapping_keeps_record_internals() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join(".rollback.2.sql");
        let target = dir.path().join("rollback.2.sql");

        // one record holds two lines; their internal order is preserved
        let plan = write_records(&source, &[("A1;\nA2;\n", 1), ("B;\n", 2)]).await;
        reverse_files(
            vec![ReversalJob {
                source,
                target: target.clone(),
                plan,
            }],
            false,
        )
        .await
        .unwrap();

        let reversed = tokio::fs::read_to_string(&target).await.unwrap();
        assert_eq!(reversed, "B;\nA1;\nA2;\n");
    }

    #[tokio::test]
    async fn test_reversal_of_empty_plan_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join(".rollback.3.sql");
        let target = dir.path().join("rollback.3.sql");
        tokio::fs::write(&source, b"").await.unwrap();

        reverse_files(
            vec![ReversalJob {
                source,
                target: target.clone(),
                plan: Vec::new(),
            }],
            true,
        )
        .await
        .unwrap();
        assert_eq!(tokio::fs::read_to_string(&target).await.unwrap(), "");
    }
}
