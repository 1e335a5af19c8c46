//! Row to record mappings.
//!
//! Each row type maps to exactly one [`NormalizedRecord`]. Mappings are pure:
//! no I/O, no clock, no shared state.

use crate::category::StatCategory;
use crate::record::NormalizedRecord;
use crate::rows::{
    ConnectionsRow, DiskIORow, DiskSizeRow, IndexIORow, LocksRow, QueryAgesRow, RowAccessesRow,
    ScanTypesRow, SequencesIORow, SizeBreakdownRow, StatRows, TempBytesRow, TransactionsRow,
};

/// A row that can be turned into a normalized record.
pub trait Normalize {
    const CATEGORY: StatCategory;

    fn normalize(&self) -> NormalizedRecord;
}

fn record<R: Normalize>() -> NormalizedRecord {
    NormalizedRecord::new(R::CATEGORY.measurement())
}

fn bool_tag(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

impl Normalize for LocksRow {
    const CATEGORY: StatCategory = StatCategory::Locks;

    fn normalize(&self) -> NormalizedRecord {
        record::<Self>()
            .tag("database_name", self.database_name.as_str())
            .tag("mode", self.mode.as_str())
            .tag("type", self.lock_type.as_str())
            .tag("granted", bool_tag(self.granted))
            .field("lock_count", self.count)
    }
}

impl Normalize for DiskSizeRow {
    const CATEGORY: StatCategory = StatCategory::DiskSize;

    fn normalize(&self) -> NormalizedRecord {
        record::<Self>()
            .tag("database_name", self.database_name.as_str())
            .field("Size", self.size)
    }
}

impl Normalize for ConnectionsRow {
    const CATEGORY: StatCategory = StatCategory::Connections;

    fn normalize(&self) -> NormalizedRecord {
        record::<Self>()
            .tag("username", self.username.as_str())
            .field("Idle", self.idle)
            .field("IdleInTransaction", self.idle_in_transaction)
            .field("Unknown", self.unknown)
            .field("QueryActive", self.query_active)
            .field("Waiting", self.waiting)
    }
}

impl Normalize for QueryAgesRow {
    const CATEGORY: StatCategory = StatCategory::QueryAges;

    fn normalize(&self) -> NormalizedRecord {
        record::<Self>()
            .tag("database_name", self.database_name.as_str())
            .field("QueryAge", self.query_age)
            .field("TransactionAge", self.transaction_age)
    }
}

impl Normalize for TransactionsRow {
    const CATEGORY: StatCategory = StatCategory::Transactions;

    fn normalize(&self) -> NormalizedRecord {
        record::<Self>()
            .tag("database_name", self.database_name.as_str())
            .field("Committed", self.committed)
            .field("Rolledback", self.rolledback)
    }
}

impl Normalize for TempBytesRow {
    const CATEGORY: StatCategory = StatCategory::TempBytes;

    fn normalize(&self) -> NormalizedRecord {
        record::<Self>()
            .tag("database_name", self.database_name.as_str())
            .field("TemporaryBytes", self.temporary_bytes)
    }
}

impl Normalize for DiskIORow {
    const CATEGORY: StatCategory = StatCategory::DiskIO;

    fn normalize(&self) -> NormalizedRecord {
        record::<Self>()
            .tag("database_name", self.database_name.as_str())
            .field("HeapBlocksRead", self.heap_blocks_read)
            .field("HeapBlocksHit", self.heap_blocks_hit)
            .field("IndexBlocksRead", self.index_blocks_read)
            .field("IndexBlocksHit", self.index_blocks_hit)
            .field("ToastBlocksRead", self.toast_blocks_read)
            .field("ToastBlocksHit", self.toast_blocks_hit)
            .field("ToastIndexBlocksRead", self.toast_index_blocks_read)
            .field("ToastIndexBlocksHit", self.toast_index_blocks_hit)
    }
}

impl Normalize for IndexIORow {
    const CATEGORY: StatCategory = StatCategory::IndexIO;

    fn normalize(&self) -> NormalizedRecord {
        record::<Self>()
            .tag("database_name", self.database_name.as_str())
            .field("IndexBlocksRead", self.index_blocks_read)
            .field("IndexBlocksHit", self.index_blocks_hit)
    }
}

impl Normalize for SequencesIORow {
    const CATEGORY: StatCategory = StatCategory::SequencesIO;

    fn normalize(&self) -> NormalizedRecord {
        record::<Self>()
            .tag("database_name", self.database_name.as_str())
            .field("BlocksRead", self.blocks_read)
            .field("BlocksHit", self.blocks_hit)
    }
}

impl Normalize for ScanTypesRow {
    const CATEGORY: StatCategory = StatCategory::ScanTypes;

    fn normalize(&self) -> NormalizedRecord {
        record::<Self>()
            .tag("database_name", self.database_name.as_str())
            .field("SequentialScans", self.sequential_scans)
            .field("IndexScans", self.index_scans)
    }
}

impl Normalize for RowAccessesRow {
    const CATEGORY: StatCategory = StatCategory::RowAccesses;

    fn normalize(&self) -> NormalizedRecord {
        record::<Self>()
            .tag("database_name", self.database_name.as_str())
            .field("InsertedRows", self.inserted_rows)
            .field("UpdatedRows", self.updated_rows)
            .field("DeletedRows", self.deleted_rows)
            .field("HotUpdatedRows", self.hot_updated_rows)
            .field("LiveRows", self.live_rows)
            .field("DeadRows", self.dead_rows)
    }
}

impl Normalize for SizeBreakdownRow {
    const CATEGORY: StatCategory = StatCategory::SizeBreakdown;

    fn normalize(&self) -> NormalizedRecord {
        record::<Self>()
            .tag("database_name", self.database_name.as_str())
            .field("Main", self.main)
            .field("Fsm", self.fsm)
            .field("Vm", self.vm)
            .field("Init", self.init)
            .field("Indexes", self.indexes)
    }
}

fn each<R: Normalize>(rows: &[R]) -> Vec<NormalizedRecord> {
    rows.iter().map(Normalize::normalize).collect()
}

/// Normalizes every row, preserving row order.
pub fn normalize_rows(rows: &StatRows) -> Vec<NormalizedRecord> {
    match rows {
        StatRows::Locks(r) => each(r),
        StatRows::DiskSize(r) => each(r),
        StatRows::Connections(r) => each(r),
        StatRows::QueryAges(r) => each(r),
        StatRows::Transactions(r) => each(r),
        StatRows::TempBytes(r) => each(r),
        StatRows::DiskIO(r) => each(r),
        StatRows::IndexIO(r) => each(r),
        StatRows::SequencesIO(r) => each(r),
        StatRows::ScanTypes(r) => each(r),
        StatRows::RowAccesses(r) => each(r),
        StatRows::SizeBreakdown(r) => each(r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use crate::source::mock::sample_rows as fixture;
    use std::collections::BTreeSet;

    #[test]
    fn every_category_matches_registry_keys() {
        for category in StatCategory::all() {
            let records = normalize_rows(&fixture(category));
            assert_eq!(records.len(), 1, "{category}");
            let record = &records[0];

            assert_eq!(record.measurement, category.measurement());
            let tags: BTreeSet<&str> = record.tags.keys().map(String::as_str).collect();
            let fields: BTreeSet<&str> = record.fields.keys().map(String::as_str).collect();
            let want_tags: BTreeSet<&str> = category.tag_keys().iter().copied().collect();
            let want_fields: BTreeSet<&str> = category.field_keys().iter().copied().collect();
            assert_eq!(tags, want_tags, "{category} tags");
            assert_eq!(fields, want_fields, "{category} fields");
        }
    }

    #[test]
    fn locks_granted_becomes_tag() {
        let records = normalize_rows(&fixture(StatCategory::Locks));
        let record = &records[0];
        assert_eq!(record.measurement, "postgresql2-locks");
        assert_eq!(record.tag_value("database_name"), Some("app"));
        assert_eq!(record.tag_value("mode"), Some("RowExclusiveLock"));
        assert_eq!(record.tag_value("type"), Some("relation"));
        assert_eq!(record.tag_value("granted"), Some("true"));
        assert_eq!(record.fields.len(), 1);
        assert_eq!(record.field_value("lock_count"), Some(&FieldValue::Int(3)));
    }

    #[test]
    fn locks_not_granted_is_false_literal() {
        let row = LocksRow {
            granted: false,
            ..Default::default()
        };
        assert_eq!(row.normalize().tag_value("granted"), Some("false"));
    }

    #[test]
    fn connections_are_tagged_by_user_only() {
        let records = normalize_rows(&fixture(StatCategory::Connections));
        let record = &records[0];
        assert_eq!(record.tags.len(), 1);
        assert_eq!(record.tag_value("username"), Some("app_user"));
        assert!(record.tag_value("database_name").is_none());

        let expected: Vec<(&str, i64)> = vec![
            ("Idle", 2),
            ("IdleInTransaction", 0),
            ("QueryActive", 1),
            ("Unknown", 0),
            ("Waiting", 0),
        ];
        let actual: Vec<(&str, i64)> = record
            .fields
            .iter()
            .map(|(k, v)| match v {
                FieldValue::Int(n) => (k.as_str(), *n),
                other => panic!("unexpected field value {other:?}"),
            })
            .collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn query_ages_are_floats() {
        let records = normalize_rows(&fixture(StatCategory::QueryAges));
        assert_eq!(
            records[0].field_value("QueryAge"),
            Some(&FieldValue::Float(1.25))
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        for category in StatCategory::all() {
            let rows = fixture(category);
            assert_eq!(normalize_rows(&rows), normalize_rows(&rows));
        }
    }

    #[test]
    fn one_record_per_row_in_order() {
        let rows = StatRows::DiskSize(vec![
            DiskSizeRow {
                database_name: "a".into(),
                size: 1,
            },
            DiskSizeRow {
                database_name: "b".into(),
                size: 2,
            },
        ]);
        let records = normalize_rows(&rows);
        let names: Vec<_> = records
            .iter()
            .filter_map(|r| r.tag_value("database_name"))
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
