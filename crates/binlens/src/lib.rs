//! # binlens — MySQL binlog inspector
//!
//! Reads row-level change events out of the MySQL binary log — from archived
//! segment files or a live replication session — and produces:
//!
//! - forward SQL reproducing the captured mutations,
//! - rollback SQL undoing them, in correct reverse order,
//! - transaction and DDL statistics reports.
//!
//! ## Architecture
//!
//! ```text
//! segment files ──┐
//!                 ├─> EventSource ─> Classifier ──> synthesis workers ──> sql files
//! replication ────┘       (one producer,   │        (ordered via the       │
//!                          log order)      │         OrderingBarrier)      └─> reversal
//!                                          └──────> statistics reports
//! ```
//!
//! Every inter-stage handoff is a bounded queue; a fatal error in a stage
//! closes its downstream queues and the run winds down in order.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use binlens::config::{Config, RunMode, WorkType};
//!
//! # async fn example() -> binlens::Result<()> {
//! let mut config = Config::default();
//! config.mode = RunMode::File;
//! config.work_type = WorkType::Rollback;
//! config.binlog_file = Some("/var/lib/mysql/mysql-bin.000042".into());
//! config.schema_json = Some("table_columns.json".into());
//! config.schema_json_only = true;
//! binlens::runner::run(config).await
//! # }
//! ```

pub mod binlog;
pub mod common;
pub mod config;
pub mod pipeline;
pub mod runner;
pub mod schema;
pub mod source;
pub mod sqlgen;

pub use common::error::{BinlensError, ErrorCategory, Result};
pub use common::position::LogPosition;
pub use config::{Config, RunMode, WorkType};
