//! Schema version store
//!
//! Answers "what did table T look like at position P". Populated once before
//! synthesis starts; afterwards it is shared behind an `Arc` and read
//! concurrently without locking.
//!
//! Resolution walks the table's versions linearly for the greatest tagged
//! position at or before the query position. Fine at realistic per-table DDL
//! counts; a sorted list with binary search is the upgrade path if a table
//! ever accumulates thousands of versions.

use std::collections::HashMap;

use crate::common::position::LogPosition;
use crate::schema::version::SchemaVersion;

/// Map key for a table identity.
pub fn table_key(database: &str, table: &str) -> String {
    format!("{database}.{table}")
}

/// All known schema versions, keyed by table identity then DDL position.
#[derive(Debug, Default)]
pub struct SchemaStore {
    tables: HashMap<String, HashMap<String, SchemaVersion>>,
}

impl SchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a version.
    pub fn insert(&mut self, version: SchemaVersion) {
        let tb_key = table_key(&version.database, &version.table);
        self.tables
            .entry(tb_key)
            .or_default()
            .insert(version.ddl.key(), version);
    }

    /// Merge another store in; the other side wins on key collisions.
    pub fn merge(&mut self, other: SchemaStore) {
        for (tb_key, versions) in other.tables {
            let entry = self.tables.entry(tb_key).or_default();
            for (pos_key, version) in versions {
                entry.insert(pos_key, version);
            }
        }
    }

    pub fn contains_table(&self, database: &str, table: &str) -> bool {
        self.tables.contains_key(&table_key(database, table))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Version active for `database.table` at `position`: the one with the
    /// greatest tagged position at or before it, else the baseline. `None`
    /// only when the table is unknown altogether (dropped or never loaded).
    pub fn resolve(
        &self,
        database: &str,
        table: &str,
        position: &LogPosition,
    ) -> Option<&SchemaVersion> {
        let versions = self.tables.get(&table_key(database, table))?;

        let mut best: Option<&SchemaVersion> = None;
        for version in versions.values() {
            if version.ddl.is_baseline() {
                continue;
            }
            let tagged = version.ddl.position();
            if tagged <= *position && best.map_or(true, |b| b.ddl.position() < tagged) {
                best = Some(version);
            }
        }

        best.or_else(|| versions.values().find(|v| v.ddl.is_baseline()))
    }

    /// Raw access for snapshot serialization.
    pub fn versions(&self) -> &HashMap<String, HashMap<String, SchemaVersion>> {
        &self.tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::version::{DdlPosition, FieldInfo};

    fn tagged_version(table: &str, segment: &str, offset: u64, marker: &str) -> SchemaVersion {
        SchemaVersion {
            database: "shop".into(),
            table: table.into(),
            columns: vec![FieldInfo::new(marker, "int")],
            primary_key: vec![],
            unique_keys: vec![],
            ddl: DdlPosition {
                segment: segment.into(),
                start_offset: offset,
                stop_offset: offset + 100,
                statement: format!("alter table {table} add column {marker} int"),
            },
        }
    }

    fn baseline_version(table: &str) -> SchemaVersion {
        let mut v = SchemaVersion::baseline("shop", table);
        v.columns = vec![FieldInfo::new("base", "int")];
        v
    }

    #[test]
    fn test_resolve_picks_greatest_version_at_or_before() {
        let mut store = SchemaStore::new();
        store.insert(baseline_version("t"));
        store.insert(tagged_version("t", "mysql-bin.000001", 100, "v1"));
        store.insert(tagged_version("t", "mysql-bin.000001", 500, "v2"));

        let at = |offset| LogPosition::new("mysql-bin.000001", offset);

        let v = store.resolve("shop", "t", &at(300)).unwrap();
        assert_eq!(v.columns[0].name, "v1");

        // a version tagged exactly at the query position is active
        let v = store.resolve("shop", "t", &at(500)).unwrap();
        assert_eq!(v.columns[0].name, "v2");

        let v = store.resolve("shop", "t", &at(50)).unwrap();
        assert_eq!(v.columns[0].name, "base");

        let v = store
            .resolve("shop", "t", &LogPosition::new("mysql-bin.000002", 4))
            .unwrap();
        assert_eq!(v.columns[0].name, "v2");
    }

    #[test]
    fn test_resolve_unknown_table_is_not_an_error_shape() {
        let store = SchemaStore::new();
        assert!(store
            .resolve("shop", "ghost", &LogPosition::new("mysql-bin.000001", 4))
            .is_none());
    }

    #[test]
    fn test_merge_overwrites_collisions() {
        let mut a = SchemaStore::new();
        a.insert(baseline_version("t"));

        let mut replacement = baseline_version("t");
        replacement.columns = vec![FieldInfo::new("fresh", "int")];
        let mut b = SchemaStore::new();
        b.insert(replacement);

        a.merge(b);
        let v = a
            .resolve("shop", "t", &LogPosition::new("mysql-bin.000001", 4))
            .unwrap();
        assert_eq!(v.columns[0].name, "fresh");
        assert_eq!(a.table_count(), 1);
    }
}
