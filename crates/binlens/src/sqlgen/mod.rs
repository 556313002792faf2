//! SQL text builder
//!
//! Turns decoded row images into INSERT/UPDATE/DELETE statements, forward or
//! rollback. Rollback mode inverts the mutation: an insert becomes a delete
//! keyed on the same row, a delete becomes an insert of the pre-image, an
//! update swaps its images.

use crate::binlog::event::{ColumnValue, RowImage, RowKind};
use crate::schema::version::FieldInfo;

/// Direction of the generated SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlMode {
    Forward,
    Rollback,
}

/// Formatting and shape options.
#[derive(Debug, Clone)]
pub struct SqlOptions {
    pub mode: SqlMode,
    /// Rows per generated INSERT statement
    pub insert_rows: usize,
    /// Use key columns for WHERE and only changed columns for SET
    pub min_columns: bool,
    /// Prefix table names with their database
    pub prefix_db: bool,
}

impl Default for SqlOptions {
    fn default() -> Self {
        Self {
            mode: SqlMode::Forward,
            insert_rows: 30,
            min_columns: false,
            prefix_db: true,
        }
    }
}

/// Build the ordered statement list for one row-change event.
///
/// `key_indexes` are the column positions of the chosen unique key; empty
/// means no usable key, in which case WHERE clauses carry every column.
pub fn build(
    kind: RowKind,
    rows: &[RowImage],
    columns: &[FieldInfo],
    key_indexes: &[usize],
    database: &str,
    table: &str,
    opts: &SqlOptions,
) -> Vec<String> {
    let target = table_name(database, table, opts.prefix_db);
    match (kind, opts.mode) {
        (RowKind::Insert, SqlMode::Forward) => {
            let images: Vec<&Vec<ColumnValue>> =
                rows.iter().filter_map(|r| r.after.as_ref()).collect();
            build_inserts(&target, columns, &images, opts.insert_rows)
        }
        (RowKind::Insert, SqlMode::Rollback) => {
            let images: Vec<&Vec<ColumnValue>> =
                rows.iter().filter_map(|r| r.after.as_ref()).collect();
            build_deletes(&target, columns, &images, key_indexes, opts.min_columns)
        }
        (RowKind::Delete, SqlMode::Forward) => {
            let images: Vec<&Vec<ColumnValue>> =
                rows.iter().filter_map(|r| r.before.as_ref()).collect();
            build_deletes(&target, columns, &images, key_indexes, opts.min_columns)
        }
        (RowKind::Delete, SqlMode::Rollback) => {
            let images: Vec<&Vec<ColumnValue>> =
                rows.iter().filter_map(|r| r.before.as_ref()).collect();
            build_inserts(&target, columns, &images, opts.insert_rows)
        }
        (RowKind::Update, mode) => rows
            .iter()
            .filter_map(|r| match (r.before.as_ref(), r.after.as_ref()) {
                (Some(before), Some(after)) => {
                    let (from, to) = match mode {
                        SqlMode::Forward => (before, after),
                        SqlMode::Rollback => (after, before),
                    };
                    build_update(&target, columns, from, to, key_indexes, opts.min_columns)
                }
                _ => None,
            })
            .collect(),
    }
}

fn table_name(database: &str, table: &str, prefix_db: bool) -> String {
    if prefix_db && !database.is_empty() {
        format!("`{database}`.`{table}`")
    } else {
        format!("`{table}`")
    }
}

fn build_inserts(
    target: &str,
    columns: &[FieldInfo],
    images: &[&Vec<ColumnValue>],
    batch_rows: usize,
) -> Vec<String> {
    if images.is_empty() {
        return Vec::new();
    }
    let col_list = columns
        .iter()
        .map(|c| format!("`{}`", c.name))
        .collect::<Vec<_>>()
        .join(",");

    images
        .chunks(batch_rows.max(1))
        .map(|chunk| {
            let tuples = chunk
                .iter()
                .map(|image| {
                    let values = image.iter().map(literal).collect::<Vec<_>>().join(",");
                    format!("({values})")
                })
                .collect::<Vec<_>>()
                .join(",");
            format!("INSERT INTO {target} ({col_list}) VALUES {tuples}")
        })
        .collect()
}

fn build_deletes(
    target: &str,
    columns: &[FieldInfo],
    images: &[&Vec<ColumnValue>],
    key_indexes: &[usize],
    min_columns: bool,
) -> Vec<String> {
    images
        .iter()
        .map(|image| {
            let cond = where_clause(columns, image, key_indexes, min_columns);
            format!("DELETE FROM {target} WHERE {cond}")
        })
        .collect()
}

fn build_update(
    target: &str,
    columns: &[FieldInfo],
    from: &[ColumnValue],
    to: &[ColumnValue],
    key_indexes: &[usize],
    min_columns: bool,
) -> Option<String> {
    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .filter_map(|(idx, col)| {
            let new = to.get(idx)?;
            if min_columns && from.get(idx) == Some(new) {
                return None;
            }
            Some(format!("`{}`={}", col.name, literal(new)))
        })
        .collect();
    if assignments.is_empty() {
        // nothing changed, no statement to emit
        return None;
    }
    let cond = where_clause(columns, from, key_indexes, min_columns);
    Some(format!(
        "UPDATE {target} SET {} WHERE {cond}",
        assignments.join(", ")
    ))
}

/// WHERE clause over the key columns when a key is usable and requested,
/// otherwise over every column of the image.
fn where_clause(
    columns: &[FieldInfo],
    image: &[ColumnValue],
    key_indexes: &[usize],
    min_columns: bool,
) -> String {
    let indexes: Vec<usize> = if min_columns && !key_indexes.is_empty() {
        key_indexes.to_vec()
    } else {
        (0..image.len().min(columns.len())).collect()
    };
    indexes
        .iter()
        .filter_map(|&idx| {
            let col = columns.get(idx)?;
            let value = image.get(idx)?;
            Some(match value {
                ColumnValue::Null => format!("`{}` IS NULL", col.name),
                other => format!("`{}`={}", col.name, literal(other)),
            })
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// SQL literal for one decoded value.
pub fn literal(value: &ColumnValue) -> String {
    match value {
        ColumnValue::Null => "NULL".to_string(),
        ColumnValue::SignedInt(v) => v.to_string(),
        ColumnValue::UnsignedInt(v) => v.to_string(),
        ColumnValue::Float(v) => v.to_string(),
        ColumnValue::Double(v) => v.to_string(),
        ColumnValue::Decimal(v) => v.clone(),
        ColumnValue::String(v) => quote_str(v),
        ColumnValue::Bytes(v) => {
            if v.is_empty() {
                "''".to_string()
            } else {
                let mut out = String::with_capacity(2 + v.len() * 2);
                out.push_str("0x");
                for byte in v {
                    out.push_str(&format!("{byte:02x}"));
                }
                out
            }
        }
        ColumnValue::Date { year, month, day } => {
            format!("'{year:04}-{month:02}-{day:02}'")
        }
        ColumnValue::Time {
            negative,
            hours,
            minutes,
            seconds,
            microseconds,
        } => {
            let sign = if *negative { "-" } else { "" };
            if *microseconds > 0 {
                format!("'{sign}{hours:02}:{minutes:02}:{seconds:02}.{microseconds:06}'")
            } else {
                format!("'{sign}{hours:02}:{minutes:02}:{seconds:02}'")
            }
        }
        ColumnValue::DateTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
            microsecond,
        } => format!(
            "'{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{microsecond:06}'"
        ),
        ColumnValue::Timestamp(ts) => format!("FROM_UNIXTIME({ts})"),
        ColumnValue::Year(v) => v.to_string(),
        ColumnValue::Enum(v) => v.to_string(),
        ColumnValue::Set(v) => v.to_string(),
        ColumnValue::Bit(v) => {
            let mut out = String::from("b'");
            for byte in v.iter().rev() {
                out.push_str(&format!("{byte:08b}"));
            }
            out.push('\'');
            out
        }
    }
}

fn quote_str(v: &str) -> String {
    let mut out = String::with_capacity(v.len() + 2);
    out.push('\'');
    for ch in v.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<FieldInfo> {
        vec![
            FieldInfo::new("id", "int"),
            FieldInfo::new("name", "varchar"),
            FieldInfo::new("qty", "int"),
        ]
    }

    fn row(id: i64, name: &str, qty: i64) -> Vec<ColumnValue> {
        vec![
            ColumnValue::SignedInt(id),
            ColumnValue::String(name.into()),
            ColumnValue::SignedInt(qty),
        ]
    }

    fn insert_image(values: Vec<ColumnValue>) -> RowImage {
        RowImage {
            before: None,
            after: Some(values),
        }
    }

    #[test]
    fn test_forward_insert_batches_rows() {
        let rows: Vec<RowImage> = (0..3)
            .map(|i| insert_image(row(i, "x", 1)))
            .collect();
        let opts = SqlOptions {
            insert_rows: 2,
            ..Default::default()
        };
        let sqls = build(
            RowKind::Insert,
            &rows,
            &columns(),
            &[0],
            "shop",
            "orders",
            &opts,
        );
        assert_eq!(sqls.len(), 2);
        assert_eq!(
            sqls[0],
            "INSERT INTO `shop`.`orders` (`id`,`name`,`qty`) VALUES (0,'x',1),(1,'x',1)"
        );
        assert_eq!(
            sqls[1],
            "INSERT INTO `shop`.`orders` (`id`,`name`,`qty`) VALUES (2,'x',1)"
        );
    }

    #[test]
    fn test_insert_rollback_is_keyed_delete() {
        let rows = vec![insert_image(row(7, "alice", 2))];
        let opts = SqlOptions {
            mode: SqlMode::Rollback,
            min_columns: true,
            ..Default::default()
        };
        let sqls = build(
            RowKind::Insert,
            &rows,
            &columns(),
            &[0],
            "shop",
            "orders",
            &opts,
        );
        assert_eq!(sqls, vec!["DELETE FROM `shop`.`orders` WHERE `id`=7"]);
    }

    #[test]
    fn test_delete_rollback_restores_pre_image() {
        let rows = vec![RowImage {
            before: Some(row(7, "alice", 2)),
            after: None,
        }];
        let opts = SqlOptions {
            mode: SqlMode::Rollback,
            ..Default::default()
        };
        let sqls = build(
            RowKind::Delete,
            &rows,
            &columns(),
            &[0],
            "shop",
            "orders",
            &opts,
        );
        assert_eq!(
            sqls,
            vec!["INSERT INTO `shop`.`orders` (`id`,`name`,`qty`) VALUES (7,'alice',2)"]
        );
    }

    #[test]
    fn test_delete_without_key_uses_all_columns_and_is_null() {
        let mut values = row(7, "alice", 2);
        values[1] = ColumnValue::Null;
        let rows = vec![RowImage {
            before: Some(values),
            after: None,
        }];
        let sqls = build(
            RowKind::Delete,
            &rows,
            &columns(),
            &[],
            "shop",
            "orders",
            &SqlOptions::default(),
        );
        assert_eq!(
            sqls,
            vec!["DELETE FROM `shop`.`orders` WHERE `id`=7 AND `name` IS NULL AND `qty`=2"]
        );
    }

    #[test]
    fn test_update_min_columns_sets_only_changes() {
        let rows = vec![RowImage {
            before: Some(row(7, "alice", 2)),
            after: Some(row(7, "alice", 5)),
        }];
        let opts = SqlOptions {
            min_columns: true,
            ..Default::default()
        };
        let sqls = build(
            RowKind::Update,
            &rows,
            &columns(),
            &[0],
            "shop",
            "orders",
            &opts,
        );
        assert_eq!(
            sqls,
            vec!["UPDATE `shop`.`orders` SET `qty`=5 WHERE `id`=7"]
        );
    }

    #[test]
    fn test_update_rollback_swaps_images() {
        let rows = vec![RowImage {
            before: Some(row(7, "alice", 2)),
            after: Some(row(7, "alice", 5)),
        }];
        let opts = SqlOptions {
            mode: SqlMode::Rollback,
            min_columns: true,
            ..Default::default()
        };
        let sqls = build(
            RowKind::Update,
            &rows,
            &columns(),
            &[0],
            "shop",
            "orders",
            &opts,
        );
        assert_eq!(
            sqls,
            vec!["UPDATE `shop`.`orders` SET `qty`=2 WHERE `id`=7"]
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(literal(&ColumnValue::Null), "NULL");
        assert_eq!(literal(&ColumnValue::String("o'neil".into())), "'o''neil'");
        assert_eq!(
            literal(&ColumnValue::Bytes(vec![0xde, 0xad])),
            "0xdead"
        );
        assert_eq!(
            literal(&ColumnValue::Date {
                year: 2024,
                month: 3,
                day: 9
            }),
            "'2024-03-09'"
        );
        assert_eq!(
            literal(&ColumnValue::DateTime {
                year: 0,
                month: 0,
                day: 0,
                hour: 0,
                minute: 0,
                second: 0,
                microsecond: 0
            }),
            "'0000-00-00 00:00:00.000000'"
        );
    }

    #[test]
    fn test_no_prefix_db() {
        let rows = vec![insert_image(row(1, "a", 1))];
        let opts = SqlOptions {
            prefix_db: false,
            ..Default::default()
        };
        let sqls = build(
            RowKind::Insert,
            &rows,
            &columns(),
            &[],
            "shop",
            "orders",
            &opts,
        );
        assert!(sqls[0].starts_with("INSERT INTO `orders` "));
    }
}
