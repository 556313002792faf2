//! Run configuration
//!
//! Everything a run needs, validated before any stage starts. Option
//! conflicts and out-of-range values are configuration errors and carry the
//! configuration exit code; nothing is started on a bad config.

use std::path::PathBuf;

use chrono::{Local, NaiveDateTime, TimeZone};

use crate::binlog::event::RowKind;
use crate::common::error::{BinlensError, Result};
use crate::common::filter::EventFilter;
use crate::common::position::LogPosition;
use crate::pipeline::output::OutputOptions;
use crate::pipeline::stats::StatsOptions;
use crate::source::StopBound;
use crate::sqlgen::{SqlMode, SqlOptions};

/// Where events come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Archived segment files on disk
    File,
    /// Live replication session
    Repl,
}

impl std::str::FromStr for RunMode {
    type Err = BinlensError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(RunMode::File),
            "repl" => Ok(RunMode::Repl),
            other => Err(BinlensError::config(format!(
                "invalid mode {other:?}, valid modes are: file, repl"
            ))),
        }
    }
}

/// What the run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkType {
    /// Statistics reports only
    Stats,
    /// Forward SQL reproducing the captured mutations
    Forward,
    /// Rollback SQL undoing them
    Rollback,
    /// Dump the merged schema snapshot and exit
    SchemaDump,
}

impl WorkType {
    pub fn emits_sql(&self) -> bool {
        matches!(self, WorkType::Forward | WorkType::Rollback)
    }
}

impl std::str::FromStr for WorkType {
    type Err = BinlensError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stats" => Ok(WorkType::Stats),
            "forward" | "2sql" => Ok(WorkType::Forward),
            "rollback" => Ok(WorkType::Rollback),
            "schema-dump" | "tbldef" => Ok(WorkType::SchemaDump),
            other => Err(BinlensError::config(format!(
                "invalid work type {other:?}, valid types are: stats, forward, rollback, schema-dump"
            ))),
        }
    }
}

// (min, max, default) per ranged option
const RANGE_INTERVAL: (u32, u32, u32) = (1, 600, 30);
const RANGE_BIG_TRX_ROWS: (u64, u64, u64) = (10, 3000, 500);
const RANGE_LONG_TRX_SECS: (u32, u32, u32) = (1, 1200, 300);
const RANGE_INSERT_ROWS: (usize, usize, usize) = (1, 100, 30);
const RANGE_THREADS: (usize, usize, usize) = (1, 8, 2);

/// Validated run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: RunMode,
    pub work_type: WorkType,

    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Replica identity for repl mode
    pub server_id: u32,

    pub databases: Vec<String>,
    pub tables: Vec<String>,
    pub row_kinds: Vec<RowKind>,

    /// File-mode entry point: path of the first segment file to parse.
    pub binlog_file: Option<PathBuf>,

    pub start_segment: String,
    pub start_offset: u64,
    pub stop_segment: String,
    pub stop_offset: u64,
    pub start_datetime: Option<u32>,
    pub stop_datetime: Option<u32>,
    /// Keep following the log instead of stopping at the first segment's end
    pub to_last_log: bool,

    pub output_dir: PathBuf,
    pub file_per_table: bool,
    pub keep_trx: bool,
    pub extra_info: bool,
    pub min_columns: bool,
    pub prefix_db: bool,
    pub insert_rows: usize,
    pub threads: usize,

    pub interval_secs: u32,
    pub big_trx_rows: u64,
    pub long_trx_secs: u32,

    /// Persisted schema snapshot to merge in
    pub schema_json: Option<PathBuf>,
    /// Use only the snapshot, never query the catalog
    pub schema_json_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: RunMode::File,
            work_type: WorkType::Stats,
            host: "127.0.0.1".into(),
            port: 3306,
            user: String::new(),
            password: String::new(),
            server_id: 3320,
            databases: Vec::new(),
            tables: Vec::new(),
            row_kinds: Vec::new(),
            binlog_file: None,
            start_segment: String::new(),
            start_offset: 0,
            stop_segment: String::new(),
            stop_offset: 0,
            start_datetime: None,
            stop_datetime: None,
            to_last_log: false,
            output_dir: PathBuf::from("."),
            file_per_table: false,
            keep_trx: false,
            extra_info: false,
            min_columns: false,
            prefix_db: true,
            insert_rows: RANGE_INSERT_ROWS.2,
            threads: RANGE_THREADS.2,
            interval_secs: RANGE_INTERVAL.2,
            big_trx_rows: RANGE_BIG_TRX_ROWS.2,
            long_trx_secs: RANGE_LONG_TRX_SECS.2,
            schema_json: None,
            schema_json_only: false,
        }
    }
}

fn check_range<T: PartialOrd + std::fmt::Display + Copy>(
    name: &str,
    value: T,
    range: (T, T, T),
) -> Result<()> {
    if value < range.0 || value > range.1 {
        return Err(BinlensError::config(format!(
            "{name}={value} out of range, valid values are {} to {}, default {}",
            range.0, range.1, range.2
        )));
    }
    Ok(())
}

impl Config {
    /// Validate option ranges, pairings and mode requirements. Must pass
    /// before anything starts.
    pub fn validate(&self) -> Result<()> {
        check_range("interval", self.interval_secs, RANGE_INTERVAL)?;
        check_range("big-trx-rows", self.big_trx_rows, RANGE_BIG_TRX_ROWS)?;
        check_range("long-trx-seconds", self.long_trx_secs, RANGE_LONG_TRX_SECS)?;
        check_range("insert-rows", self.insert_rows, RANGE_INSERT_ROWS)?;
        check_range("threads", self.threads, RANGE_THREADS)?;

        if (self.start_segment.is_empty()) != (self.start_offset == 0) {
            return Err(BinlensError::config(
                "start-binlog and start-pos must be set together",
            ));
        }
        if (self.stop_segment.is_empty()) != (self.stop_offset == 0) {
            return Err(BinlensError::config(
                "stop-binlog and stop-pos must be set together",
            ));
        }
        if let (Some(start), Some(stop)) = (self.start_position(), self.stop_position()) {
            if start >= stop {
                return Err(BinlensError::config(
                    "start position must be less than stop position",
                ));
            }
        }
        if let (Some(start), Some(stop)) = (self.start_datetime, self.stop_datetime) {
            if start >= stop {
                return Err(BinlensError::config(
                    "start-datetime must be earlier than stop-datetime",
                ));
            }
        }

        match self.mode {
            RunMode::File => {
                if self.work_type != WorkType::SchemaDump {
                    let Some(path) = &self.binlog_file else {
                        return Err(BinlensError::config(
                            "a binlog file must be given when mode=file",
                        ));
                    };
                    if !path.is_file() {
                        return Err(BinlensError::config(format!(
                            "{} does not exist or is not a file",
                            path.display()
                        )));
                    }
                }
            }
            RunMode::Repl => {
                if self.user.is_empty() || self.password.is_empty() {
                    return Err(BinlensError::config(
                        "user and password must be set when mode=repl",
                    ));
                }
                if self.work_type != WorkType::SchemaDump && self.start_position().is_none() {
                    return Err(BinlensError::config(
                        "start-binlog and start-pos must be set when mode=repl",
                    ));
                }
            }
        }

        // Row output and schema dumps need table definitions from somewhere.
        if (self.work_type.emits_sql() || self.work_type == WorkType::SchemaDump)
            && !self.schema_json_only
            && (self.user.is_empty() || self.password.is_empty())
        {
            return Err(BinlensError::config(
                "user and password must be set to read table definitions \
                 (or pass a schema snapshot with schema-json-only)",
            ));
        }
        if self.schema_json_only && self.schema_json.is_none() {
            return Err(BinlensError::config(
                "schema-json-only requires a schema-json file",
            ));
        }

        if self.to_last_log && (self.mode != RunMode::Repl || self.work_type != WorkType::Stats)
        {
            return Err(BinlensError::config(
                "to-last-log only works with mode=repl and work-type=stats",
            ));
        }

        if !self.output_dir.is_dir() {
            return Err(BinlensError::config(format!(
                "output dir {} does not exist or is not a directory",
                self.output_dir.display()
            )));
        }

        Ok(())
    }

    pub fn start_position(&self) -> Option<LogPosition> {
        (!self.start_segment.is_empty())
            .then(|| LogPosition::new(self.start_segment.clone(), self.start_offset))
    }

    pub fn stop_position(&self) -> Option<LogPosition> {
        (!self.stop_segment.is_empty())
            .then(|| LogPosition::new(self.stop_segment.clone(), self.stop_offset))
    }

    /// Whether any stop bound is configured; without one, exactly one
    /// segment is read.
    pub fn has_stop_bound(&self) -> bool {
        self.stop_position().is_some() || self.stop_datetime.is_some() || self.to_last_log
    }

    pub fn stop_bound(&self) -> StopBound {
        StopBound {
            position: self.stop_position(),
            follow_segments: self.has_stop_bound(),
        }
    }

    pub fn event_filter(&self) -> EventFilter {
        EventFilter {
            start_position: self.start_position(),
            stop_position: self.stop_position(),
            start_datetime: self.start_datetime,
            stop_datetime: self.stop_datetime,
            databases: self.databases.clone(),
            tables: self.tables.clone(),
            row_kinds: self.row_kinds.clone(),
        }
    }

    pub fn sql_options(&self) -> SqlOptions {
        SqlOptions {
            mode: match self.work_type {
                WorkType::Rollback => SqlMode::Rollback,
                _ => SqlMode::Forward,
            },
            insert_rows: self.insert_rows,
            min_columns: self.min_columns,
            prefix_db: self.prefix_db,
        }
    }

    pub fn output_options(&self) -> OutputOptions {
        OutputOptions {
            dir: self.output_dir.clone(),
            rollback: self.work_type == WorkType::Rollback,
            file_per_table: self.file_per_table,
            keep_trx: self.keep_trx,
            extra_info: self.extra_info,
        }
    }

    pub fn stats_options(&self) -> StatsOptions {
        StatsOptions {
            dir: self.output_dir.clone(),
            interval_secs: self.interval_secs,
            big_trx_rows: self.big_trx_rows,
            long_trx_secs: self.long_trx_secs,
        }
    }
}

/// Parse `YYYY-MM-DD hh:mm:ss` in the local timezone to unix seconds.
pub fn parse_local_datetime(text: &str) -> Result<u32> {
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| BinlensError::config(format!("invalid datetime {text:?}: {e}")))?;
    let local = Local
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| BinlensError::config(format!("ambiguous local datetime {text:?}")))?;
    Ok(local.timestamp() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_stats_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.output_dir = dir.to_path_buf();
        config.work_type = WorkType::Stats;
        config.mode = RunMode::Repl;
        config.user = "repl".into();
        config.password = "secret".into();
        config.start_segment = "mysql-bin.000001".into();
        config.start_offset = 4;
        config
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("file".parse::<RunMode>().unwrap(), RunMode::File);
        assert_eq!("repl".parse::<RunMode>().unwrap(), RunMode::Repl);
        assert!("tcp".parse::<RunMode>().is_err());
        assert_eq!("2sql".parse::<WorkType>().unwrap(), WorkType::Forward);
        assert_eq!("forward".parse::<WorkType>().unwrap(), WorkType::Forward);
        assert_eq!("tbldef".parse::<WorkType>().unwrap(), WorkType::SchemaDump);
        assert!("noop".parse::<WorkType>().is_err());
    }

    #[test]
    fn test_ranges_are_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_stats_config(dir.path());
        config.threads = 9;
        assert!(config.validate().is_err());
        config.threads = 8;
        assert!(config.validate().is_ok());
        config.insert_rows = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_start_stop_pairing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_stats_config(dir.path());
        config.stop_segment = "mysql-bin.000009".into();
        assert!(config.validate().is_err()); // stop-pos missing
        config.stop_offset = 4;
        assert!(config.validate().is_ok());

        // start at or after stop is a conflict
        config.start_segment = "mysql-bin.000009".into();
        config.start_offset = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_repl_needs_credentials_and_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_stats_config(dir.path());
        config.password = String::new();
        assert!(config.validate().is_err());

        let mut config = valid_stats_config(dir.path());
        config.start_segment = String::new();
        config.start_offset = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sql_work_requires_schema_source() {
        let dir = tempfile::tempdir().unwrap();
        let binlog = dir.path().join("mysql-bin.000001");
        std::fs::write(&binlog, b"x").unwrap();

        let mut config = Config::default();
        config.output_dir = dir.path().to_path_buf();
        config.mode = RunMode::File;
        config.work_type = WorkType::Rollback;
        config.binlog_file = Some(binlog);
        assert!(config.validate().is_err()); // no credentials, no snapshot

        config.schema_json = Some(dir.path().join("defs.json"));
        config.schema_json_only = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stop_bound_controls_segment_follow() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_stats_config(dir.path());
        assert!(!config.stop_bound().follow_segments);
        config.stop_datetime = Some(10_000);
        assert!(config.stop_bound().follow_segments);
    }

    #[test]
    fn test_parse_local_datetime_rejects_garbage() {
        assert!(parse_local_datetime("2024-02-30 99:00:00").is_err());
        assert!(parse_local_datetime("not a date").is_err());
        assert!(parse_local_datetime("2024-03-09 10:30:00").is_ok());
    }
}
