//! Versioned table definitions
//!
//! A table can change shape over the inspected window, so its definition is
//! kept as a set of versions, each tagged with the position of the DDL that
//! produced it. The catalog-loaded definition carries a sentinel tag and acts
//! as the baseline.

use serde::{Deserialize, Serialize};

use crate::common::position::LogPosition;

/// Sentinel segment name marking a baseline (no-DDL) version.
pub const BASELINE_SEGMENT: &str = "_";

/// One column: name plus declared type as reported by the catalog
/// (`information_schema.columns.DATA_TYPE`, e.g. `int`, `varchar`, `text`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    #[serde(rename = "column_name")]
    pub name: String,
    #[serde(rename = "column_type")]
    pub type_name: String,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }

    /// Time-typed columns get their decoded values normalized to strings.
    pub fn is_time_type(&self) -> bool {
        matches!(self.type_name.as_str(), "datetime" | "timestamp")
    }

    /// TEXT columns arrive from the log as blobs and need decoding to text.
    pub fn is_text_stored_as_blob(&self) -> bool {
        self.type_name.to_ascii_lowercase().contains("text")
    }
}

/// Ordered key column names.
pub type KeyInfo = Vec<String>;

/// Position of the DDL that produced a schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlPosition {
    #[serde(rename = "binlog")]
    pub segment: String,
    #[serde(rename = "start_position")]
    pub start_offset: u64,
    #[serde(rename = "stop_position")]
    pub stop_offset: u64,
    #[serde(rename = "ddl_sql")]
    pub statement: String,
}

impl DdlPosition {
    /// Baseline sentinel: no DDL, the catalog-loaded definition.
    pub fn baseline() -> Self {
        Self {
            segment: BASELINE_SEGMENT.to_string(),
            start_offset: 0,
            stop_offset: 0,
            statement: String::new(),
        }
    }

    pub fn is_baseline(&self) -> bool {
        self.segment == BASELINE_SEGMENT || self.start_offset == 0 && self.segment.is_empty()
    }

    /// Position this version became active at.
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.segment.clone(), self.start_offset)
    }

    /// Stable map key: `<segment>/<start>/<stop>`.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.segment, self.start_offset, self.stop_offset)
    }
}

/// One version of a table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub database: String,
    pub table: String,
    #[serde(default)]
    pub columns: Vec<FieldInfo>,
    #[serde(default)]
    pub primary_key: KeyInfo,
    #[serde(default)]
    pub unique_keys: Vec<KeyInfo>,
    #[serde(rename = "ddl_info")]
    pub ddl: DdlPosition,
}

impl SchemaVersion {
    /// New baseline version with no columns or keys yet.
    pub fn baseline(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            unique_keys: Vec::new(),
            ddl: DdlPosition::baseline(),
        }
    }

    /// The key to build row-identifying WHERE clauses from: the primary key
    /// when there is one, else the first unique key.
    pub fn preferred_key(&self) -> Option<&KeyInfo> {
        if !self.primary_key.is_empty() {
            Some(&self.primary_key)
        } else {
            self.unique_keys.first()
        }
    }

    /// Column positions of the key columns, in key order. Key columns that no
    /// longer exist are dropped.
    pub fn key_column_indexes(&self, key: &KeyInfo) -> Vec<usize> {
        key.iter()
            .filter_map(|name| self.columns.iter().position(|c| &c.name == name))
            .collect()
    }
}

/// Pad a column list out to `count` entries, naming columns the definition
/// no longer carries. Replay windows can contain row images captured before
/// columns were dropped.
pub fn padded_columns(count: usize, columns: &[FieldInfo]) -> Vec<FieldInfo> {
    let mut out = columns.to_vec();
    for idx in out.len()..count {
        out.push(FieldInfo::new(
            format!("dropped_column_{idx}"),
            "unknown_type",
        ));
    }
    out.truncate(count);
    out
}
