//! Pipeline wiring
//!
//! One producer (source + classifier) feeds bounded queues into the worker
//! pool, the SQL writer and the statistics aggregator. A fatal error in any
//! stage closes its downstream queues, so consumers observe orderly
//! termination; there is no mid-stream cancellation.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::common::error::{BinlensError, Result};
use crate::config::{Config, RunMode, WorkType};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::{output, reversal, stats, synthesis};
use crate::schema::catalog::{Catalog, CatalogConfig};
use crate::schema::snapshot;
use crate::schema::store::SchemaStore;
use crate::source::repl::{ReplicationConfig, ReplicationSource};
use crate::source::{EventSource, FileSource};

/// Run one inspection end to end.
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let schema = prepare_schema(&config).await?;
    if config.work_type == WorkType::SchemaDump {
        return Ok(());
    }

    let queue_depth = config.threads * 2;
    let (stats_tx, stats_rx) = mpsc::channel(queue_depth);
    let stats_task = tokio::spawn(stats::run_stats(config.stats_options(), stats_rx));

    let (envelope_tx, worker_handles, output_task) = if config.work_type.emits_sql() {
        let (envelope_tx, envelope_rx) = mpsc::channel(queue_depth);
        let (sql_tx, sql_rx) = mpsc::channel(queue_depth);
        let workers = synthesis::spawn_workers(
            config.threads,
            schema.clone(),
            envelope_rx,
            sql_tx,
            config.sql_options(),
        );
        let output_task = tokio::spawn(output::write_sql_stream(
            config.output_options(),
            sql_rx,
        ));
        (Some(envelope_tx), workers, Some(output_task))
    } else {
        (None, Vec::new(), None)
    };

    let source = open_source(&config).await?;
    let classifier = Classifier::new(config.event_filter(), schema, envelope_tx, stats_tx);

    // The classifier drops its senders on return; that drains and closes
    // every downstream stage in order.
    let stream_result = classifier.run(source).await;
    if let Err(e) = &stream_result {
        error!(error = %e, "event stream terminated with error");
    }

    for handle in worker_handles {
        handle
            .await
            .map_err(|e| BinlensError::other(format!("synthesis worker panicked: {e}")))?;
    }
    if let Some(task) = output_task {
        let jobs = task
            .await
            .map_err(|e| BinlensError::other(format!("sql writer panicked: {e}")))??;
        if config.work_type == WorkType::Rollback {
            reversal::reverse_files(jobs, config.keep_trx).await?;
        }
    }
    stats_task
        .await
        .map_err(|e| BinlensError::other(format!("stats task panicked: {e}")))??;

    stream_result.map(|envelopes| {
        info!(envelopes, "inspection finished");
    })
}

/// Load table definitions from the snapshot and/or the catalog, and dump the
/// merged result back out. Row-level output without any definitions is a
/// hard error; statistics-only runs skip all of this.
async fn prepare_schema(config: &Config) -> Result<Arc<SchemaStore>> {
    if !(config.work_type.emits_sql() || config.work_type == WorkType::SchemaDump) {
        return Ok(Arc::new(SchemaStore::new()));
    }

    let mut store = SchemaStore::new();
    if let Some(path) = &config.schema_json {
        store.merge(snapshot::load(path).await?);
    }
    if !config.schema_json_only {
        let catalog = Catalog::connect(&CatalogConfig {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            password: config.password.clone(),
        });
        let tables = catalog.list_tables(&config.databases, &config.tables).await?;
        catalog.load_into(&mut store, &tables).await?;
        catalog.disconnect().await?;
    }

    if store.is_empty() {
        return Err(BinlensError::schema(
            "no table definitions available from the catalog or snapshot",
        ));
    }

    let snapshot_path = config.output_dir.join(snapshot::SNAPSHOT_FILE);
    snapshot::dump(&store, &snapshot_path).await?;
    info!(
        tables = store.table_count(),
        path = %snapshot_path.display(),
        "table definitions ready"
    );
    Ok(Arc::new(store))
}

async fn open_source(config: &Config) -> Result<Box<dyn EventSource>> {
    match config.mode {
        RunMode::File => {
            let path = config
                .binlog_file
                .as_ref()
                .ok_or_else(|| BinlensError::config("mode=file needs a binlog file"))?;
            let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
            let segment = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| BinlensError::config("binlog file path has no file name"))?;
            Ok(Box::new(
                FileSource::open(dir, segment, config.stop_bound()).await?,
            ))
        }
        RunMode::Repl => {
            let start = config
                .start_position()
                .ok_or_else(|| BinlensError::config("mode=repl needs a start position"))?;
            Ok(Box::new(
                ReplicationSource::connect(ReplicationConfig {
                    host: config.host.clone(),
                    port: config.port,
                    user: config.user.clone(),
                    password: config.password.clone(),
                    server_id: config.server_id,
                    start,
                    stop: config.stop_bound(),
                })
                .await?,
            ))
        }
    }
}
