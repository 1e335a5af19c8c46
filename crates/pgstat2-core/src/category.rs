//! Statistic category registry.
//!
//! Every category has a fixed scope, measurement name and tag/field key set.
//! The two phase arrays define the order a collection cycle walks them in.

use std::fmt;

/// Where a category is fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Fetched once per cycle over the main connection.
    Cluster,
    /// Fetched against the configured target scope, once per database.
    PerDatabase,
}

/// One of the fixed statistic kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatCategory {
    Locks,
    DiskSize,
    Connections,
    QueryAges,
    Transactions,
    TempBytes,
    DiskIO,
    IndexIO,
    SequencesIO,
    ScanTypes,
    RowAccesses,
    SizeBreakdown,
}

/// Cluster-scoped categories in collection order.
pub const GLOBAL_PHASE: [StatCategory; 6] = [
    StatCategory::Locks,
    StatCategory::DiskSize,
    StatCategory::Connections,
    StatCategory::QueryAges,
    StatCategory::Transactions,
    StatCategory::TempBytes,
];

/// Per-database categories in collection order. Always run after [`GLOBAL_PHASE`].
pub const LOCAL_PHASE: [StatCategory; 6] = [
    StatCategory::DiskIO,
    StatCategory::IndexIO,
    StatCategory::SequencesIO,
    StatCategory::ScanTypes,
    StatCategory::RowAccesses,
    StatCategory::SizeBreakdown,
];

const DATABASE_TAG: &[&str] = &["database_name"];

impl StatCategory {
    /// All categories, global phase first.
    pub fn all() -> impl Iterator<Item = StatCategory> {
        GLOBAL_PHASE.into_iter().chain(LOCAL_PHASE)
    }

    pub fn scope(self) -> Scope {
        match self {
            StatCategory::Locks
            | StatCategory::DiskSize
            | StatCategory::Connections
            | StatCategory::QueryAges
            | StatCategory::Transactions
            | StatCategory::TempBytes => Scope::Cluster,
            StatCategory::DiskIO
            | StatCategory::IndexIO
            | StatCategory::SequencesIO
            | StatCategory::ScanTypes
            | StatCategory::RowAccesses
            | StatCategory::SizeBreakdown => Scope::PerDatabase,
        }
    }

    /// Measurement name of every record produced for this category.
    pub fn measurement(self) -> &'static str {
        match self {
            StatCategory::Locks => "postgresql2-locks",
            StatCategory::DiskSize => "postgresql2-disk-size",
            StatCategory::Connections => "postgresql2-connections",
            StatCategory::QueryAges => "postgresql2-query-ages",
            StatCategory::Transactions => "postgresql2-query-transactions",
            StatCategory::TempBytes => "postgresql2-query-temp-bytes",
            StatCategory::DiskIO => "postgresql2-disk-ios",
            StatCategory::IndexIO => "postgresql2-index-ios",
            StatCategory::SequencesIO => "postgresql2-sequences-ios",
            StatCategory::ScanTypes => "postgresql2-scan-types",
            StatCategory::RowAccesses => "postgresql2-row-accesses",
            StatCategory::SizeBreakdown => "postgresql2-size-breakdown",
        }
    }

    /// Tag keys every record of this category carries.
    pub fn tag_keys(self) -> &'static [&'static str] {
        match self {
            StatCategory::Locks => &["database_name", "mode", "type", "granted"],
            StatCategory::Connections => &["username"],
            _ => DATABASE_TAG,
        }
    }

    /// Field keys every record of this category carries.
    pub fn field_keys(self) -> &'static [&'static str] {
        match self {
            StatCategory::Locks => &["lock_count"],
            StatCategory::DiskSize => &["Size"],
            StatCategory::Connections => &[
                "Idle",
                "IdleInTransaction",
                "Unknown",
                "QueryActive",
                "Waiting",
            ],
            StatCategory::QueryAges => &["QueryAge", "TransactionAge"],
            StatCategory::Transactions => &["Committed", "Rolledback"],
            StatCategory::TempBytes => &["TemporaryBytes"],
            StatCategory::DiskIO => &[
                "HeapBlocksRead",
                "HeapBlocksHit",
                "IndexBlocksRead",
                "IndexBlocksHit",
                "ToastBlocksRead",
                "ToastBlocksHit",
                "ToastIndexBlocksRead",
                "ToastIndexBlocksHit",
            ],
            StatCategory::IndexIO => &["IndexBlocksRead", "IndexBlocksHit"],
            StatCategory::SequencesIO => &["BlocksRead", "BlocksHit"],
            StatCategory::ScanTypes => &["SequentialScans", "IndexScans"],
            StatCategory::RowAccesses => &[
                "InsertedRows",
                "UpdatedRows",
                "DeletedRows",
                "HotUpdatedRows",
                "LiveRows",
                "DeadRows",
            ],
            StatCategory::SizeBreakdown => &["Main", "Fsm", "Vm", "Init", "Indexes"],
        }
    }

    /// Categories that read relation-level catalog data on every database and
    /// cannot be routed through a transaction-pooling proxy.
    pub fn requires_direct_connection(self) -> bool {
        matches!(
            self,
            StatCategory::SequencesIO | StatCategory::SizeBreakdown
        )
    }

    /// Short snake_case name used in logs and error messages.
    pub fn name(self) -> &'static str {
        match self {
            StatCategory::Locks => "locks",
            StatCategory::DiskSize => "disk_size",
            StatCategory::Connections => "connections",
            StatCategory::QueryAges => "query_ages",
            StatCategory::Transactions => "transactions",
            StatCategory::TempBytes => "temp_bytes",
            StatCategory::DiskIO => "disk_io",
            StatCategory::IndexIO => "index_io",
            StatCategory::SequencesIO => "sequences_io",
            StatCategory::ScanTypes => "scan_types",
            StatCategory::RowAccesses => "row_accesses",
            StatCategory::SizeBreakdown => "size_breakdown",
        }
    }
}

impl fmt::Display for StatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn phases_match_scopes() {
        assert!(GLOBAL_PHASE.iter().all(|c| c.scope() == Scope::Cluster));
        assert!(LOCAL_PHASE.iter().all(|c| c.scope() == Scope::PerDatabase));
    }

    #[test]
    fn every_category_appears_once() {
        let all: Vec<_> = StatCategory::all().collect();
        assert_eq!(all.len(), 12);
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), 12);
    }

    #[test]
    fn measurement_names_are_unique_and_prefixed() {
        let names: HashSet<_> = StatCategory::all().map(|c| c.measurement()).collect();
        assert_eq!(names.len(), 12);
        assert!(names.iter().all(|n| n.starts_with("postgresql2-")));
    }

    #[test]
    fn tag_and_field_keys_are_disjoint() {
        for category in StatCategory::all() {
            let tags: HashSet<_> = category.tag_keys().iter().collect();
            assert!(
                category.field_keys().iter().all(|f| !tags.contains(f)),
                "{category} has overlapping keys"
            );
            assert!(!category.field_keys().is_empty());
        }
    }

    #[test]
    fn connections_has_no_database_tag() {
        assert_eq!(StatCategory::Connections.tag_keys(), &["username"]);
    }

    #[test]
    fn only_local_categories_need_direct_connection() {
        for category in GLOBAL_PHASE {
            assert!(!category.requires_direct_connection());
        }
    }
}
