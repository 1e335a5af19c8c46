//! Collection cycle orchestration.
//!
//! A cycle walks [`GLOBAL_PHASE`] then [`LOCAL_PHASE`]. Each category is
//! fetched, normalized and forwarded to the sink before the next one is
//! fetched. The first fetch error ends the cycle; records already forwarded
//! stay forwarded.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::category::{GLOBAL_PHASE, LOCAL_PHASE, Scope, StatCategory};
use crate::normalize::normalize_rows;
use crate::rows::StatRows;
use crate::sink::Sink;
use crate::source::{SourceError, StatSource};

/// How the connection reaches the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compatibility {
    /// Direct connection; every category is collected.
    #[default]
    Direct,
    /// Through a transaction-pooling proxy such as pgbouncer. Categories that
    /// need a direct connection are skipped.
    PoolingProxy,
}

impl Compatibility {
    fn allows(self, category: StatCategory) -> bool {
        match self {
            Compatibility::Direct => true,
            Compatibility::PoolingProxy => !category.requires_direct_connection(),
        }
    }
}

/// What happened to one category during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryStatus {
    Collected,
    Skipped,
}

/// Per-category outcome and timing.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryReport {
    pub category: StatCategory,
    pub status: CategoryStatus,
    /// Records forwarded to the sink.
    pub records: usize,
    pub elapsed: Duration,
}

/// Summary of the categories a cycle went through, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub categories: Vec<CategoryReport>,
    pub total: Duration,
}

impl CycleReport {
    /// Total records forwarded to the sink.
    pub fn records(&self) -> usize {
        self.categories.iter().map(|c| c.records).sum()
    }

    pub fn collected(&self) -> impl Iterator<Item = StatCategory> + '_ {
        self.with_status(CategoryStatus::Collected)
    }

    pub fn skipped(&self) -> impl Iterator<Item = StatCategory> + '_ {
        self.with_status(CategoryStatus::Skipped)
    }

    fn with_status(&self, status: CategoryStatus) -> impl Iterator<Item = StatCategory> + '_ {
        self.categories
            .iter()
            .filter(move |c| c.status == status)
            .map(|c| c.category)
    }
}

/// Why a cycle stopped early.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectErrorKind {
    /// The source could not fetch the category.
    Fetch(SourceError),
    /// The source answered with rows of another category.
    Contract {
        expected: StatCategory,
        actual: StatCategory,
    },
}

/// A failed cycle: the failing category, the cause and everything that was
/// forwarded before it.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectError {
    pub category: StatCategory,
    pub kind: CollectErrorKind,
    pub report: CycleReport,
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CollectErrorKind::Fetch(e) => write!(f, "{}: {}", self.category, e),
            CollectErrorKind::Contract { expected, actual } => write!(
                f,
                "{}: source returned {} rows, expected {}",
                self.category, actual, expected
            ),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            CollectErrorKind::Fetch(e) => Some(e),
            CollectErrorKind::Contract { .. } => None,
        }
    }
}

/// Runs collection cycles against a stat source.
#[derive(Debug, Clone)]
pub struct Gatherer {
    scope: String,
    compatibility: Compatibility,
}

impl Gatherer {
    /// Creates a gatherer whose per-database categories target `scope`.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            compatibility: Compatibility::Direct,
        }
    }

    pub fn with_compatibility(mut self, compatibility: Compatibility) -> Self {
        self.compatibility = compatibility;
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn compatibility(&self) -> Compatibility {
        self.compatibility
    }

    /// Runs one full cycle.
    ///
    /// Returns the report on success. On the first failing category returns a
    /// [`CollectError`] naming it; no later category is fetched.
    pub fn gather<S, K>(&self, source: &mut S, sink: &mut K) -> Result<CycleReport, CollectError>
    where
        S: StatSource + ?Sized,
        K: Sink + ?Sized,
    {
        let start = Instant::now();
        let mut report = CycleReport::default();

        for category in GLOBAL_PHASE.into_iter().chain(LOCAL_PHASE) {
            if let Err(kind) = self.collect_category(category, source, sink, &mut report) {
                report.total = start.elapsed();
                return Err(CollectError {
                    category,
                    kind,
                    report,
                });
            }
        }

        report.total = start.elapsed();
        debug!(
            records = report.records(),
            elapsed_ms = report.total.as_millis() as u64,
            "collection cycle complete"
        );
        Ok(report)
    }

    fn collect_category<S, K>(
        &self,
        category: StatCategory,
        source: &mut S,
        sink: &mut K,
        report: &mut CycleReport,
    ) -> Result<(), CollectErrorKind>
    where
        S: StatSource + ?Sized,
        K: Sink + ?Sized,
    {
        let start = Instant::now();

        if !self.compatibility.allows(category) {
            debug!(%category, "skipped: not supported through a pooling proxy");
            report.categories.push(CategoryReport {
                category,
                status: CategoryStatus::Skipped,
                records: 0,
                elapsed: Duration::ZERO,
            });
            return Ok(());
        }

        let rows: StatRows = match category.scope() {
            Scope::Cluster => source.fetch_cluster(category),
            Scope::PerDatabase => source.fetch_local(category, &self.scope),
        }
        .map_err(|e| {
            warn!(%category, error = %e, "fetch failed, aborting cycle");
            CollectErrorKind::Fetch(e)
        })?;

        if rows.category() != category {
            warn!(
                %category,
                returned = %rows.category(),
                "source returned rows for the wrong category"
            );
            return Err(CollectErrorKind::Contract {
                expected: category,
                actual: rows.category(),
            });
        }

        let records = normalize_rows(&rows);
        let count = records.len();
        for record in records {
            sink.append_record(record);
        }

        let elapsed = start.elapsed();
        debug!(%category, records = count, elapsed_us = elapsed.as_micros() as u64, "collected");
        report.categories.push(CategoryReport {
            category,
            status: CategoryStatus::Collected,
            records: count,
            elapsed,
        });
        Ok(())
    }
}
