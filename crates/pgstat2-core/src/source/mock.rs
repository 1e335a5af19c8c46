//! Scripted stat source for tests and dry runs.
//!
//! Returns canned rows per category, records every call it receives and can
//! be told to fail (or answer with the wrong category) at a given point.

use std::collections::HashMap;

use super::{SourceError, StatSource};
use crate::category::StatCategory;
use crate::rows::*;

/// A call received by [`ScriptedSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Cluster(StatCategory),
    Local(StatCategory, String),
}

impl Call {
    pub fn category(&self) -> StatCategory {
        match self {
            Call::Cluster(c) | Call::Local(c, _) => *c,
        }
    }
}

#[derive(Debug, Clone)]
enum Script {
    Rows(StatRows),
    Fail(SourceError),
}

/// In-memory [`StatSource`] with per-category scripted answers.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    scripts: HashMap<StatCategory, Script>,
    calls: Vec<Call>,
}

impl ScriptedSource {
    /// Source that answers every category with empty rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that answers every category with [`sample_rows`].
    pub fn typical_cluster() -> Self {
        let mut source = Self::new();
        for category in StatCategory::all() {
            source = source.with_rows(sample_rows(category));
        }
        source
    }

    /// Answers the category of `rows` with `rows`.
    pub fn with_rows(mut self, rows: StatRows) -> Self {
        self.scripts.insert(rows.category(), Script::Rows(rows));
        self
    }

    /// Answers `category` with rows of some other category.
    pub fn with_rows_for(mut self, category: StatCategory, rows: StatRows) -> Self {
        self.scripts.insert(category, Script::Rows(rows));
        self
    }

    /// Fails every fetch of `category` with `error`.
    pub fn failing(mut self, category: StatCategory, error: SourceError) -> Self {
        self.scripts.insert(category, Script::Fail(error));
        self
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Categories fetched so far, in order.
    pub fn fetched(&self) -> Vec<StatCategory> {
        self.calls.iter().map(Call::category).collect()
    }

    fn answer(&self, category: StatCategory) -> Result<StatRows, SourceError> {
        match self.scripts.get(&category) {
            Some(Script::Rows(rows)) => Ok(rows.clone()),
            Some(Script::Fail(e)) => Err(e.clone()),
            None => Ok(StatRows::empty(category)),
        }
    }
}

impl StatSource for ScriptedSource {
    fn fetch_cluster(&mut self, category: StatCategory) -> Result<StatRows, SourceError> {
        self.calls.push(Call::Cluster(category));
        self.answer(category)
    }

    fn fetch_local(
        &mut self,
        category: StatCategory,
        scope: &str,
    ) -> Result<StatRows, SourceError> {
        self.calls.push(Call::Local(category, scope.to_string()));
        self.answer(category)
    }
}

/// One fully populated row for `category`, belonging to database `app`.
pub fn sample_rows(category: StatCategory) -> StatRows {
    let db = || "app".to_string();
    match category {
        StatCategory::Locks => StatRows::Locks(vec![LocksRow {
            database_name: db(),
            mode: "RowExclusiveLock".into(),
            lock_type: "relation".into(),
            granted: true,
            count: 3,
        }]),
        StatCategory::DiskSize => StatRows::DiskSize(vec![DiskSizeRow {
            database_name: db(),
            size: 8_000_000,
        }]),
        StatCategory::Connections => StatRows::Connections(vec![ConnectionsRow {
            username: "app_user".into(),
            idle: 2,
            idle_in_transaction: 0,
            unknown: 0,
            query_active: 1,
            waiting: 0,
        }]),
        StatCategory::QueryAges => StatRows::QueryAges(vec![QueryAgesRow {
            database_name: db(),
            query_age: 1.25,
            transaction_age: 4.5,
        }]),
        StatCategory::Transactions => StatRows::Transactions(vec![TransactionsRow {
            database_name: db(),
            committed: 100,
            rolledback: 2,
        }]),
        StatCategory::TempBytes => StatRows::TempBytes(vec![TempBytesRow {
            database_name: db(),
            temporary_bytes: 4096,
        }]),
        StatCategory::DiskIO => StatRows::DiskIO(vec![DiskIORow {
            database_name: db(),
            heap_blocks_read: 1,
            heap_blocks_hit: 2,
            index_blocks_read: 3,
            index_blocks_hit: 4,
            toast_blocks_read: 5,
            toast_blocks_hit: 6,
            toast_index_blocks_read: 7,
            toast_index_blocks_hit: 8,
        }]),
        StatCategory::IndexIO => StatRows::IndexIO(vec![IndexIORow {
            database_name: db(),
            index_blocks_read: 10,
            index_blocks_hit: 20,
        }]),
        StatCategory::SequencesIO => StatRows::SequencesIO(vec![SequencesIORow {
            database_name: db(),
            blocks_read: 1,
            blocks_hit: 9,
        }]),
        StatCategory::ScanTypes => StatRows::ScanTypes(vec![ScanTypesRow {
            database_name: db(),
            sequential_scans: 12,
            index_scans: 340,
        }]),
        StatCategory::RowAccesses => StatRows::RowAccesses(vec![RowAccessesRow {
            database_name: db(),
            inserted_rows: 1,
            updated_rows: 2,
            deleted_rows: 3,
            hot_updated_rows: 4,
            live_rows: 5,
            dead_rows: 6,
        }]),
        StatCategory::SizeBreakdown => StatRows::SizeBreakdown(vec![SizeBreakdownRow {
            database_name: db(),
            main: 8192,
            fsm: 24576,
            vm: 8192,
            init: 0,
            indexes: 16384,
        }]),
    }
}
