//! Decoding of query result rows into typed stat rows.
//!
//! Any column that is missing or has an unexpected type fails the whole
//! fetch with [`SourceError::Decode`].

use postgres::Row;
use postgres::types::FromSql;

use crate::category::StatCategory;
use crate::rows::*;
use crate::source::SourceError;

/// Columns the decoder for `category` reads.
pub(in crate::source) fn columns(category: StatCategory) -> &'static [&'static str] {
    match category {
        StatCategory::Locks => &["database_name", "mode", "lock_type", "granted", "lock_count"],
        StatCategory::DiskSize => &["database_name", "size"],
        StatCategory::Connections => &[
            "username",
            "idle",
            "idle_in_transaction",
            "unknown",
            "query_active",
            "waiting",
        ],
        StatCategory::QueryAges => &["database_name", "query_age", "transaction_age"],
        StatCategory::Transactions => &["database_name", "committed", "rolledback"],
        StatCategory::TempBytes => &["database_name", "temporary_bytes"],
        StatCategory::DiskIO => &[
            "database_name",
            "heap_blocks_read",
            "heap_blocks_hit",
            "index_blocks_read",
            "index_blocks_hit",
            "toast_blocks_read",
            "toast_blocks_hit",
            "toast_index_blocks_read",
            "toast_index_blocks_hit",
        ],
        StatCategory::IndexIO => &["database_name", "index_blocks_read", "index_blocks_hit"],
        StatCategory::SequencesIO => &["database_name", "blocks_read", "blocks_hit"],
        StatCategory::ScanTypes => &["database_name", "sequential_scans", "index_scans"],
        StatCategory::RowAccesses => &[
            "database_name",
            "inserted_rows",
            "updated_rows",
            "deleted_rows",
            "hot_updated_rows",
            "live_rows",
            "dead_rows",
        ],
        StatCategory::SizeBreakdown => &["database_name", "main", "fsm", "vm", "init", "indexes"],
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, column: &str) -> Result<T, SourceError> {
    row.try_get(column).map_err(|e| SourceError::Decode {
        column: column.to_string(),
        message: e.to_string(),
    })
}

/// Checks that the result set has exactly the columns the decoder reads.
fn check_shape(category: StatCategory, row: &Row) -> Result<(), SourceError> {
    let expected = columns(category);
    for column in expected {
        if !row.columns().iter().any(|c| c.name() == *column) {
            return Err(SourceError::Decode {
                column: column.to_string(),
                message: format!("missing from {} result", category),
            });
        }
    }
    if row.columns().len() != expected.len() {
        return Err(SourceError::Decode {
            column: "*".to_string(),
            message: format!(
                "{} result has {} columns, expected {}",
                category,
                row.columns().len(),
                expected.len()
            ),
        });
    }
    Ok(())
}

fn decode_each<T>(
    rows: &[Row],
    decode: impl Fn(&Row) -> Result<T, SourceError>,
) -> Result<Vec<T>, SourceError> {
    rows.iter().map(decode).collect()
}

/// Decodes a full result set for `category`.
pub(super) fn decode_rows(category: StatCategory, rows: &[Row]) -> Result<StatRows, SourceError> {
    if let Some(first) = rows.first() {
        check_shape(category, first)?;
    }

    Ok(match category {
        StatCategory::Locks => StatRows::Locks(decode_each(rows, |row| {
            Ok(LocksRow {
                database_name: get(row, "database_name")?,
                mode: get(row, "mode")?,
                lock_type: get(row, "lock_type")?,
                granted: get(row, "granted")?,
                count: get(row, "lock_count")?,
            })
        })?),
        StatCategory::DiskSize => StatRows::DiskSize(decode_each(rows, |row| {
            Ok(DiskSizeRow {
                database_name: get(row, "database_name")?,
                size: get(row, "size")?,
            })
        })?),
        StatCategory::Connections => StatRows::Connections(decode_each(rows, |row| {
            Ok(ConnectionsRow {
                username: get(row, "username")?,
                idle: get(row, "idle")?,
                idle_in_transaction: get(row, "idle_in_transaction")?,
                unknown: get(row, "unknown")?,
                query_active: get(row, "query_active")?,
                waiting: get(row, "waiting")?,
            })
        })?),
        StatCategory::QueryAges => StatRows::QueryAges(decode_each(rows, |row| {
            Ok(QueryAgesRow {
                database_name: get(row, "database_name")?,
                query_age: get(row, "query_age")?,
                transaction_age: get(row, "transaction_age")?,
            })
        })?),
        StatCategory::Transactions => StatRows::Transactions(decode_each(rows, |row| {
            Ok(TransactionsRow {
                database_name: get(row, "database_name")?,
                committed: get(row, "committed")?,
                rolledback: get(row, "rolledback")?,
            })
        })?),
        StatCategory::TempBytes => StatRows::TempBytes(decode_each(rows, |row| {
            Ok(TempBytesRow {
                database_name: get(row, "database_name")?,
                temporary_bytes: get(row, "temporary_bytes")?,
            })
        })?),
        StatCategory::DiskIO => StatRows::DiskIO(decode_each(rows, |row| {
            Ok(DiskIORow {
                database_name: get(row, "database_name")?,
                heap_blocks_read: get(row, "heap_blocks_read")?,
                heap_blocks_hit: get(row, "heap_blocks_hit")?,
                index_blocks_read: get(row, "index_blocks_read")?,
                index_blocks_hit: get(row, "index_blocks_hit")?,
                toast_blocks_read: get(row, "toast_blocks_read")?,
                toast_blocks_hit: get(row, "toast_blocks_hit")?,
                toast_index_blocks_read: get(row, "toast_index_blocks_read")?,
                toast_index_blocks_hit: get(row, "toast_index_blocks_hit")?,
            })
        })?),
        StatCategory::IndexIO => StatRows::IndexIO(decode_each(rows, |row| {
            Ok(IndexIORow {
                database_name: get(row, "database_name")?,
                index_blocks_read: get(row, "index_blocks_read")?,
                index_blocks_hit: get(row, "index_blocks_hit")?,
            })
        })?),
        StatCategory::SequencesIO => StatRows::SequencesIO(decode_each(rows, |row| {
            Ok(SequencesIORow {
                database_name: get(row, "database_name")?,
                blocks_read: get(row, "blocks_read")?,
                blocks_hit: get(row, "blocks_hit")?,
            })
        })?),
        StatCategory::ScanTypes => StatRows::ScanTypes(decode_each(rows, |row| {
            Ok(ScanTypesRow {
                database_name: get(row, "database_name")?,
                sequential_scans: get(row, "sequential_scans")?,
                index_scans: get(row, "index_scans")?,
            })
        })?),
        StatCategory::RowAccesses => StatRows::RowAccesses(decode_each(rows, |row| {
            Ok(RowAccessesRow {
                database_name: get(row, "database_name")?,
                inserted_rows: get(row, "inserted_rows")?,
                updated_rows: get(row, "updated_rows")?,
                deleted_rows: get(row, "deleted_rows")?,
                hot_updated_rows: get(row, "hot_updated_rows")?,
                live_rows: get(row, "live_rows")?,
                dead_rows: get(row, "dead_rows")?,
            })
        })?),
        StatCategory::SizeBreakdown => StatRows::SizeBreakdown(decode_each(rows, |row| {
            Ok(SizeBreakdownRow {
                database_name: get(row, "database_name")?,
                main: get(row, "main")?,
                fsm: get(row, "fsm")?,
                vm: get(row, "vm")?,
                init: get(row, "init")?,
                indexes: get(row, "indexes")?,
            })
        })?),
    })
}
