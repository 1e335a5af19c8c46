//! Typed rows returned by a stat source, one struct per category.
//!
//! Rows are produced fresh every cycle and dropped once normalized.
//! Cluster-level rows come from instance-wide views; per-database rows are
//! aggregated over the relations of the database they were read from.

use crate::category::StatCategory;

/// Lock counts grouped by database, mode, lock type and grant state.
///
/// Source: `pg_locks` joined to `pg_database`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct LocksRow {
    /// Empty for locks not bound to a database (e.g. transaction id locks).
    pub database_name: String,
    pub mode: String,
    pub lock_type: String,
    pub granted: bool,
    pub count: i64,
}

/// Source: `pg_database_size()` for each connectable database.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct DiskSizeRow {
    pub database_name: String,
    /// Bytes.
    pub size: i64,
}

/// Backend counts per user, split by state.
///
/// Source: `pg_stat_activity` grouped by `usename`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ConnectionsRow {
    pub username: String,
    pub idle: i64,
    pub idle_in_transaction: i64,
    /// Backends with no state or a state we do not classify.
    pub unknown: i64,
    /// Active and not waiting on anything.
    pub query_active: i64,
    /// Active but blocked on a wait event.
    pub waiting: i64,
}

/// Oldest running query and transaction per database.
///
/// Source: `pg_stat_activity`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct QueryAgesRow {
    pub database_name: String,
    /// Seconds.
    pub query_age: f64,
    /// Seconds.
    pub transaction_age: f64,
}

/// Source: `pg_stat_database.xact_commit`, `pg_stat_database.xact_rollback`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TransactionsRow {
    pub database_name: String,
    pub committed: i64,
    pub rolledback: i64,
}

/// Source: `pg_stat_database.temp_bytes`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TempBytesRow {
    pub database_name: String,
    pub temporary_bytes: i64,
}

/// Block I/O summed over all tables of one database.
///
/// Source: `pg_statio_all_tables`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct DiskIORow {
    pub database_name: String,
    pub heap_blocks_read: i64,
    pub heap_blocks_hit: i64,
    pub index_blocks_read: i64,
    pub index_blocks_hit: i64,
    pub toast_blocks_read: i64,
    pub toast_blocks_hit: i64,
    pub toast_index_blocks_read: i64,
    pub toast_index_blocks_hit: i64,
}

/// Source: `pg_statio_all_indexes`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct IndexIORow {
    pub database_name: String,
    pub index_blocks_read: i64,
    pub index_blocks_hit: i64,
}

/// Source: `pg_statio_all_sequences`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct SequencesIORow {
    pub database_name: String,
    pub blocks_read: i64,
    pub blocks_hit: i64,
}

/// Source: `pg_stat_all_tables.seq_scan`, `pg_stat_all_tables.idx_scan`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ScanTypesRow {
    pub database_name: String,
    pub sequential_scans: i64,
    pub index_scans: i64,
}

/// Source: `pg_stat_all_tables` tuple counters.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct RowAccessesRow {
    pub database_name: String,
    pub inserted_rows: i64,
    pub updated_rows: i64,
    pub deleted_rows: i64,
    pub hot_updated_rows: i64,
    pub live_rows: i64,
    pub dead_rows: i64,
}

/// On-disk size by relation fork, in bytes.
///
/// Source: `pg_relation_size(oid, fork)` over `pg_class`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct SizeBreakdownRow {
    pub database_name: String,
    pub main: i64,
    pub fsm: i64,
    pub vm: i64,
    pub init: i64,
    pub indexes: i64,
}

/// Rows of a single category as returned by one fetch.
#[derive(Clone, Debug, PartialEq)]
pub enum StatRows {
    Locks(Vec<LocksRow>),
    DiskSize(Vec<DiskSizeRow>),
    Connections(Vec<ConnectionsRow>),
    QueryAges(Vec<QueryAgesRow>),
    Transactions(Vec<TransactionsRow>),
    TempBytes(Vec<TempBytesRow>),
    DiskIO(Vec<DiskIORow>),
    IndexIO(Vec<IndexIORow>),
    SequencesIO(Vec<SequencesIORow>),
    ScanTypes(Vec<ScanTypesRow>),
    RowAccesses(Vec<RowAccessesRow>),
    SizeBreakdown(Vec<SizeBreakdownRow>),
}

impl StatRows {
    /// An empty collection for `category`.
    pub fn empty(category: StatCategory) -> Self {
        match category {
            StatCategory::Locks => StatRows::Locks(Vec::new()),
            StatCategory::DiskSize => StatRows::DiskSize(Vec::new()),
            StatCategory::Connections => StatRows::Connections(Vec::new()),
            StatCategory::QueryAges => StatRows::QueryAges(Vec::new()),
            StatCategory::Transactions => StatRows::Transactions(Vec::new()),
            StatCategory::TempBytes => StatRows::TempBytes(Vec::new()),
            StatCategory::DiskIO => StatRows::DiskIO(Vec::new()),
            StatCategory::IndexIO => StatRows::IndexIO(Vec::new()),
            StatCategory::SequencesIO => StatRows::SequencesIO(Vec::new()),
            StatCategory::ScanTypes => StatRows::ScanTypes(Vec::new()),
            StatCategory::RowAccesses => StatRows::RowAccesses(Vec::new()),
            StatCategory::SizeBreakdown => StatRows::SizeBreakdown(Vec::new()),
        }
    }

    pub fn category(&self) -> StatCategory {
        match self {
            StatRows::Locks(_) => StatCategory::Locks,
            StatRows::DiskSize(_) => StatCategory::DiskSize,
            StatRows::Connections(_) => StatCategory::Connections,
            StatRows::QueryAges(_) => StatCategory::QueryAges,
            StatRows::Transactions(_) => StatCategory::Transactions,
            StatRows::TempBytes(_) => StatCategory::TempBytes,
            StatRows::DiskIO(_) => StatCategory::DiskIO,
            StatRows::IndexIO(_) => StatCategory::IndexIO,
            StatRows::SequencesIO(_) => StatCategory::SequencesIO,
            StatRows::ScanTypes(_) => StatCategory::ScanTypes,
            StatRows::RowAccesses(_) => StatCategory::RowAccesses,
            StatRows::SizeBreakdown(_) => StatCategory::SizeBreakdown,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StatRows::Locks(r) => r.len(),
            StatRows::DiskSize(r) => r.len(),
            StatRows::Connections(r) => r.len(),
            StatRows::QueryAges(r) => r.len(),
            StatRows::Transactions(r) => r.len(),
            StatRows::TempBytes(r) => r.len(),
            StatRows::DiskIO(r) => r.len(),
            StatRows::IndexIO(r) => r.len(),
            StatRows::SequencesIO(r) => r.len(),
            StatRows::ScanTypes(r) => r.len(),
            StatRows::RowAccesses(r) => r.len(),
            StatRows::SizeBreakdown(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends rows of the same category. Returns `false` and leaves `self`
    /// untouched when the categories differ.
    #[must_use]
    pub fn extend(&mut self, other: StatRows) -> bool {
        match (self, other) {
            (StatRows::Locks(a), StatRows::Locks(b)) => a.extend(b),
            (StatRows::DiskSize(a), StatRows::DiskSize(b)) => a.extend(b),
            (StatRows::Connections(a), StatRows::Connections(b)) => a.extend(b),
            (StatRows::QueryAges(a), StatRows::QueryAges(b)) => a.extend(b),
            (StatRows::Transactions(a), StatRows::Transactions(b)) => a.extend(b),
            (StatRows::TempBytes(a), StatRows::TempBytes(b)) => a.extend(b),
            (StatRows::DiskIO(a), StatRows::DiskIO(b)) => a.extend(b),
            (StatRows::IndexIO(a), StatRows::IndexIO(b)) => a.extend(b),
            (StatRows::SequencesIO(a), StatRows::SequencesIO(b)) => a.extend(b),
            (StatRows::ScanTypes(a), StatRows::ScanTypes(b)) => a.extend(b),
            (StatRows::RowAccesses(a), StatRows::RowAccesses(b)) => a.extend(b),
            (StatRows::SizeBreakdown(a), StatRows::SizeBreakdown(b)) => a.extend(b),
            _ => return false,
        }
        true
    }

    /// Keeps only rows whose `database_name` satisfies `keep`.
    ///
    /// Connections rows are per user and are never filtered.
    pub fn retain_databases(&mut self, keep: impl Fn(&str) -> bool) {
        match self {
            StatRows::Locks(r) => r.retain(|row| keep(&row.database_name)),
            StatRows::DiskSize(r) => r.retain(|row| keep(&row.database_name)),
            StatRows::Connections(_) => {}
            StatRows::QueryAges(r) => r.retain(|row| keep(&row.database_name)),
            StatRows::Transactions(r) => r.retain(|row| keep(&row.database_name)),
            StatRows::TempBytes(r) => r.retain(|row| keep(&row.database_name)),
            StatRows::DiskIO(r) => r.retain(|row| keep(&row.database_name)),
            StatRows::IndexIO(r) => r.retain(|row| keep(&row.database_name)),
            StatRows::SequencesIO(r) => r.retain(|row| keep(&row.database_name)),
            StatRows::ScanTypes(r) => r.retain(|row| keep(&row.database_name)),
            StatRows::RowAccesses(r) => r.retain(|row| keep(&row.database_name)),
            StatRows::SizeBreakdown(r) => r.retain(|row| keep(&row.database_name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rows_report_their_category() {
        for category in StatCategory::all() {
            let rows = StatRows::empty(category);
            assert_eq!(rows.category(), category);
            assert!(rows.is_empty());
        }
    }

    #[test]
    fn extend_rejects_other_category() {
        let mut rows = StatRows::DiskSize(vec![DiskSizeRow::default()]);
        assert!(!rows.extend(StatRows::Locks(vec![LocksRow::default()])));
        assert_eq!(rows.len(), 1);
        assert!(rows.extend(StatRows::DiskSize(vec![DiskSizeRow::default()])));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn retain_databases_leaves_connections_alone() {
        let mut rows = StatRows::Connections(vec![ConnectionsRow {
            username: "app".into(),
            ..Default::default()
        }]);
        rows.retain_databases(|_| false);
        assert_eq!(rows.len(), 1);

        let mut rows = StatRows::TempBytes(vec![
            TempBytesRow {
                database_name: "app".into(),
                temporary_bytes: 1,
            },
            TempBytesRow {
                database_name: "postgres".into(),
                temporary_bytes: 2,
            },
        ]);
        rows.retain_databases(|db| db == "app");
        assert_eq!(rows.len(), 1);
    }
}
