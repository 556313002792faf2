//! binlens CLI
//!
//! Maps command line flags onto `binlens::Config`, validates, runs the
//! pipeline and exits with the error category's code on failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use binlens::binlog::event::RowKind;
use binlens::config::{parse_local_datetime, Config, RunMode, WorkType};

#[derive(Parser)]
#[command(name = "binlens")]
#[command(version)]
#[command(about = "MySQL binlog inspector: forward/rollback SQL and transaction statistics")]
#[command(after_help = "\
Examples:
  forward SQL from archived segments:
    binlens --mode file --work-type forward --user u --password p \\
        --threads 4 --output-dir /tmp/out /var/lib/mysql/mysql-bin.000042

  rollback SQL for an incident window, as a replica:
    binlens --mode repl --work-type rollback --host db1 --user u --password p \\
        --server-id 3331 --start-binlog mysql-bin.000556 --start-pos 107 \\
        --stop-binlog mysql-bin.000559 --stop-pos 4 --keep-trx --output-dir /tmp/out

  statistics only:
    binlens --mode file --work-type stats --interval 20 /var/lib/mysql/mysql-bin.000042")]
struct Cli {
    /// Event source: read segment files (file) or replicate live (repl)
    #[arg(long, default_value = "file")]
    mode: String,

    /// What to produce: stats, forward, rollback or schema-dump
    #[arg(long = "work-type", default_value = "stats")]
    work_type: String,

    /// Database host (catalog queries and repl mode)
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Database port
    #[arg(long, default_value = "3306")]
    port: u16,

    /// Database user
    #[arg(long, default_value = "")]
    user: String,

    /// Database password
    #[arg(long, default_value = "")]
    password: String,

    /// Replica server id, must be unique among the server's replicas
    #[arg(long = "server-id", default_value = "3320")]
    server_id: u32,

    /// Only these databases, comma separated
    #[arg(long, value_delimiter = ',')]
    databases: Vec<String>,

    /// Only these tables (no schema prefix), comma separated
    #[arg(long, value_delimiter = ',')]
    tables: Vec<String>,

    /// Only these row kinds (insert,update,delete), comma separated
    #[arg(long = "sql-types", value_delimiter = ',')]
    sql_types: Vec<String>,

    /// Segment to start reading at
    #[arg(long = "start-binlog", default_value = "")]
    start_binlog: String,

    /// Offset to start reading at
    #[arg(long = "start-pos", default_value = "0")]
    start_pos: u64,

    /// Segment to stop reading at
    #[arg(long = "stop-binlog", default_value = "")]
    stop_binlog: String,

    /// Offset to stop reading at (exclusive)
    #[arg(long = "stop-pos", default_value = "0")]
    stop_pos: u64,

    /// Skip events before this local datetime, e.g. "2026-01-28 13:00:00"
    #[arg(long = "start-datetime")]
    start_datetime: Option<String>,

    /// Stop at the first event at or after this local datetime
    #[arg(long = "stop-datetime")]
    stop_datetime: Option<String>,

    /// Keep following the log (repl + stats only)
    #[arg(long = "to-last-log")]
    to_last_log: bool,

    /// Seconds per statistics window
    #[arg(long, default_value = "30")]
    interval: u32,

    /// Row count from which a transaction is reported as big
    #[arg(long = "big-trx-rows", default_value = "500")]
    big_trx_rows: u64,

    /// Duration in seconds from which a transaction is reported as long
    #[arg(long = "long-trx-seconds", default_value = "300")]
    long_trx_seconds: u32,

    /// Key-based WHERE clauses and changed-columns-only SET clauses
    #[arg(long = "min-columns")]
    min_columns: bool,

    /// Rows per generated INSERT statement
    #[arg(long = "insert-rows", default_value = "30")]
    insert_rows: usize,

    /// Wrap generated SQL in begin/commit at transaction boundaries
    #[arg(long = "keep-trx")]
    keep_trx: bool,

    /// Prefix table names with their database
    #[arg(long = "prefix-db", default_value = "true", action = clap::ArgAction::Set)]
    prefix_db: bool,

    /// One output file per table instead of one per segment
    #[arg(long = "file-per-table")]
    file_per_table: bool,

    /// Comment line with position context before each SQL record
    #[arg(long = "extra-info")]
    extra_info: bool,

    /// Synthesis worker count
    #[arg(long, default_value = "2")]
    threads: usize,

    /// Schema snapshot JSON to merge in
    #[arg(long = "schema-json")]
    schema_json: Option<PathBuf>,

    /// Use only the snapshot, never query the catalog
    #[arg(long = "schema-json-only")]
    schema_json_only: bool,

    /// Output directory for SQL files and reports
    #[arg(long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// Binlog file to start from (mode=file)
    binlog_file: Option<PathBuf>,
}

fn build_config(cli: Cli) -> anyhow::Result<Config> {
    let mut config = Config::default();
    config.mode = cli.mode.parse::<RunMode>()?;
    config.work_type = cli.work_type.parse::<WorkType>()?;
    config.host = cli.host;
    config.port = cli.port;
    config.user = cli.user;
    config.password = cli.password;
    config.server_id = cli.server_id;
    config.databases = cli.databases;
    config.tables = cli.tables;
    config.row_kinds = cli
        .sql_types
        .iter()
        .map(|s| {
            RowKind::parse(s)
                .ok_or_else(|| anyhow::anyhow!("invalid sql type {s:?}, valid: insert,update,delete"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    config.binlog_file = cli.binlog_file;
    config.start_segment = cli.start_binlog;
    config.start_offset = cli.start_pos;
    config.stop_segment = cli.stop_binlog;
    config.stop_offset = cli.stop_pos;
    config.start_datetime = cli
        .start_datetime
        .as_deref()
        .map(parse_local_datetime)
        .transpose()?;
    config.stop_datetime = cli
        .stop_datetime
        .as_deref()
        .map(parse_local_datetime)
        .transpose()?;
    config.to_last_log = cli.to_last_log;
    config.interval_secs = cli.interval;
    config.big_trx_rows = cli.big_trx_rows;
    config.long_trx_secs = cli.long_trx_seconds;
    config.min_columns = cli.min_columns;
    config.insert_rows = cli.insert_rows;
    config.keep_trx = cli.keep_trx;
    config.prefix_db = cli.prefix_db;
    config.file_per_table = cli.file_per_table;
    config.extra_info = cli.extra_info;
    config.threads = cli.threads;
    config.schema_json = cli.schema_json;
    config.schema_json_only = cli.schema_json_only;
    config.output_dir = cli.output_dir;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match build_config(cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return exit_for(&e);
        }
    };

    match binlens::runner::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.category().exit_code() as u8)
        }
    }
}

fn exit_for(e: &anyhow::Error) -> ExitCode {
    match e.downcast_ref::<binlens::BinlensError>() {
        Some(err) => ExitCode::from(err.category().exit_code() as u8),
        None => ExitCode::from(
            binlens::ErrorCategory::Configuration.exit_code() as u8,
        ),
    }
}
