//! Catalog reader
//!
//! Pulls table definitions out of `information_schema`: the column list in
//! ordinal order, the primary key, and every unique key. Tables load as
//! baseline versions — DDL-tagged versions only ever come from a snapshot.

use std::collections::HashMap;

use mysql_async::prelude::Queryable;
use mysql_async::{Opts, OptsBuilder, Pool};
use tracing::{debug, info};

use crate::common::error::{BinlensError, Result};
use crate::schema::store::SchemaStore;
use crate::schema::version::{FieldInfo, KeyInfo, SchemaVersion};

/// Batch size for IN-list catalog queries.
const QUERY_BATCH: usize = 50;

fn quoted_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", v.replace('\\', "\\\\").replace('\'', "\\'")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Connection settings for the catalog.
#[derive(Clone)]
pub struct CatalogConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for CatalogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// `information_schema` reader.
pub struct Catalog {
    pool: Pool,
}

impl Catalog {
    pub fn connect(config: &CatalogConfig) -> Self {
        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .into();
        Self {
            pool: Pool::new(opts),
        }
    }

    /// Base tables visible to the configured filters, as `{db: [tables]}`.
    /// Without a database filter, the system schemas are skipped.
    pub async fn list_tables(
        &self,
        databases: &[String],
        tables: &[String],
    ) -> Result<HashMap<String, Vec<String>>> {
        let mut sql = String::from(
            "select table_schema, table_name from information_schema.tables \
             where table_type='BASE TABLE'",
        );
        if databases.is_empty() {
            sql.push_str(
                " and table_schema not in \
                 ('information_schema','mysql','performance_schema','sys')",
            );
        } else {
            sql.push_str(&format!(
                " and table_schema in ({})",
                quoted_list(databases)
            ));
        }
        if !tables.is_empty() {
            sql.push_str(&format!(" and table_name in ({})", quoted_list(tables)));
        }

        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| BinlensError::connection(e.to_string()))?;
        let rows: Vec<(String, String)> = conn
            .query(sql)
            .await
            .map_err(|e| BinlensError::query(e.to_string()))?;

        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for (db, tb) in rows {
            out.entry(db).or_default().push(tb);
        }
        debug!(databases = out.len(), "listed catalog tables");
        Ok(out)
    }

    /// Load baseline versions for every listed table into `store`.
    pub async fn load_into(
        &self,
        store: &mut SchemaStore,
        db_tables: &HashMap<String, Vec<String>>,
    ) -> Result<()> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| BinlensError::connection(e.to_string()))?;

        let mut loaded = 0usize;
        for (dbs, tbs) in batches(db_tables) {
            // Columns in ordinal order.
            let sql = format!(
                "select table_schema, table_name, COLUMN_NAME, DATA_TYPE \
                 from information_schema.columns \
                 where table_schema in ({}) and table_name in ({}) \
                 order by table_schema, table_name, ORDINAL_POSITION",
                quoted_list(&dbs),
                quoted_list(&tbs)
            );
            let rows: Vec<(String, String, String, String)> = conn
                .query(sql)
                .await
                .map_err(|e| BinlensError::query(e.to_string()))?;

            let mut columns: HashMap<(String, String), Vec<FieldInfo>> = HashMap::new();
            for (db, tb, col, data_type) in rows {
                columns
                    .entry((db, tb))
                    .or_default()
                    .push(FieldInfo::new(col, data_type));
            }

            // Primary and unique keys, columns in ordinal order per constraint.
            let sql = format!(
                "select k.table_schema, k.table_name, k.CONSTRAINT_NAME, k.COLUMN_NAME, \
                        c.CONSTRAINT_TYPE \
                 from information_schema.TABLE_CONSTRAINTS as c \
                 inner join information_schema.KEY_COLUMN_USAGE as k \
                   on c.CONSTRAINT_NAME = k.CONSTRAINT_NAME \
                  and c.table_schema = k.table_schema \
                  and c.table_name = k.table_name \
                 where c.CONSTRAINT_TYPE in ('PRIMARY KEY','UNIQUE') \
                   and c.table_schema in ({}) and c.table_name in ({}) \
                 order by k.table_schema, k.table_name, k.CONSTRAINT_NAME, k.ORDINAL_POSITION",
                quoted_list(&dbs),
                quoted_list(&tbs)
            );
            let rows: Vec<(String, String, String, String, String)> = conn
                .query(sql)
                .await
                .map_err(|e| BinlensError::query(e.to_string()))?;

            let mut keys: HashMap<(String, String), HashMap<String, (KeyInfo, bool)>> =
                HashMap::new();
            for (db, tb, constraint, col, kind) in rows {
                let entry = keys
                    .entry((db, tb))
                    .or_default()
                    .entry(constraint)
                    .or_insert_with(|| (KeyInfo::new(), kind == "PRIMARY KEY"));
                if !entry.0.contains(&col) {
                    entry.0.push(col);
                }
            }

            for ((db, tb), cols) in columns {
                let mut version = SchemaVersion::baseline(db.clone(), tb.clone());
                version.columns = cols;
                if let Some(table_keys) = keys.remove(&(db, tb)) {
                    for (_, (key, is_primary)) in table_keys {
                        if is_primary {
                            version.primary_key = key;
                        } else {
                            version.unique_keys.push(key);
                        }
                    }
                }
                store.insert(version);
                loaded += 1;
            }
        }

        info!(tables = loaded, "loaded table definitions from catalog");
        Ok(())
    }

    pub async fn disconnect(self) -> Result<()> {
        self.pool
            .disconnect()
            .await
            .map_err(|e| BinlensError::connection(e.to_string()))
    }
}

/// Split the table listing into (databases, tables) pairs of bounded size so
/// the IN lists stay reasonable.
fn batches(db_tables: &HashMap<String, Vec<String>>) -> Vec<(Vec<String>, Vec<String>)> {
    let mut out = Vec::new();
    let mut dbs: Vec<String> = Vec::new();
    let mut tbs: Vec<String> = Vec::new();
    for (db, tables) in db_tables {
        if !dbs.contains(db) {
            dbs.push(db.clone());
        }
        for tb in tables {
            tbs.push(tb.clone());
            if tbs.len() >= QUERY_BATCH {
                out.push((dbs.clone(), std::mem::take(&mut tbs)));
                dbs = vec![db.clone()];
            }
        }
    }
    if !tbs.is_empty() {
        out.push((dbs, tbs));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_list_escapes() {
        assert_eq!(quoted_list(&["a".into(), "b".into()]), "'a','b'");
        assert_eq!(quoted_list(&["o'neil".into()]), r"'o\'neil'");
    }

    #[test]
    fn test_batches_split_on_size() {
        let mut db_tables = HashMap::new();
        db_tables.insert(
            "shop".to_string(),
            (0..120).map(|i| format!("t{i}")).collect::<Vec<_>>(),
        );
        let batches = batches(&db_tables);
        assert_eq!(batches.len(), 3);
        let total: usize = batches.iter().map(|(_, t)| t.len()).sum();
        assert_eq!(total, 120);
        assert!(batches.iter().all(|(d, _)| d.contains(&"shop".to_string())));
    }
}
