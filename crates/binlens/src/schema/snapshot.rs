//! Persisted schema snapshot
//!
//! The merged table definitions are dumped to `table_columns.json` after every
//! catalog load, and can be loaded back to supplement or replace a live
//! catalog query. The JSON shape is a two-level map:
//! `{ "db.tb": { "<segment>/<start>/<stop>": <version> } }` — versions tagged
//! with a real DDL position describe the table as that DDL left it, the
//! `_/0/0` entry is the baseline.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use crate::common::error::Result;
use crate::schema::store::SchemaStore;
use crate::schema::version::SchemaVersion;

/// Default snapshot file name inside the output directory.
pub const SNAPSHOT_FILE: &str = "table_columns.json";

/// Load a snapshot file into a fresh store.
pub async fn load(path: &Path) -> Result<SchemaStore> {
    let raw = tokio::fs::read(path).await?;
    let parsed: HashMap<String, HashMap<String, SchemaVersion>> = serde_json::from_slice(&raw)?;

    let mut store = SchemaStore::new();
    let mut versions = 0usize;
    for table_versions in parsed.into_values() {
        for version in table_versions.into_values() {
            versions += 1;
            store.insert(version);
        }
    }
    info!(
        path = %path.display(),
        tables = store.table_count(),
        versions,
        "loaded schema snapshot"
    );
    Ok(store)
}

/// Dump a store to a snapshot file, pretty-printed for operator eyes.
pub async fn dump(store: &SchemaStore, path: &Path) -> Result<()> {
    let encoded = serde_json::to_vec_pretty(store.versions())?;
    tokio::fs::write(path, encoded).await?;
    debug!(path = %path.display(), tables = store.table_count(), "wrote schema snapshot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::position::LogPosition;
    use crate::schema::version::{DdlPosition, FieldInfo, SchemaVersion};

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);

        let mut store = SchemaStore::new();
        let mut baseline = SchemaVersion::baseline("shop", "orders");
        baseline.columns = vec![
            FieldInfo::new("id", "int"),
            FieldInfo::new("note", "text"),
        ];
        baseline.primary_key = vec!["id".into()];
        store.insert(baseline);
        store.insert(SchemaVersion {
            database: "shop".into(),
            table: "orders".into(),
            columns: vec![FieldInfo::new("id", "int")],
            primary_key: vec!["id".into()],
            unique_keys: vec![],
            ddl: DdlPosition {
                segment: "mysql-bin.000002".into(),
                start_offset: 700,
                stop_offset: 850,
                statement: "alter table orders drop column note".into(),
            },
        });

        dump(&store, &path).await.unwrap();
        let loaded = load(&path).await.unwrap();

        assert_eq!(loaded.table_count(), 1);
        let before = loaded
            .resolve("shop", "orders", &LogPosition::new("mysql-bin.000002", 100))
            .unwrap();
        assert_eq!(before.columns.len(), 2);
        let after = loaded
            .resolve("shop", "orders", &LogPosition::new("mysql-bin.000002", 900))
            .unwrap();
        assert_eq!(after.columns.len(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent.json")).await.is_err());
    }
}
