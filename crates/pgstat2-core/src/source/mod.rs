//! Stat row sources.
//!
//! A [`StatSource`] answers one fetch per category. Cluster categories are
//! fetched without a target; per-database categories always get the target
//! scope the cycle was configured with.

pub mod mock;
mod postgres;
mod queries;

pub use self::postgres::{PostgresSource, format_postgres_error};

use std::fmt;

use crate::category::StatCategory;
use crate::rows::StatRows;

/// Failure to fetch the rows of one category.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Could not establish or keep a connection.
    Connection(String),
    /// The query itself failed (missing view, permission denied, timeout, ...).
    Query(String),
    /// A column did not have the type the row decoder expects.
    Decode { column: String, message: String },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Connection(msg) => write!(f, "connection error: {}", msg),
            SourceError::Query(msg) => write!(f, "query error: {}", msg),
            SourceError::Decode { column, message } => {
                write!(f, "unexpected value in column {}: {}", column, message)
            }
        }
    }
}

impl std::error::Error for SourceError {}

/// Produces typed rows for each statistic category.
pub trait StatSource {
    /// Fetches a cluster-scoped category.
    fn fetch_cluster(&mut self, category: StatCategory) -> Result<StatRows, SourceError>;

    /// Fetches a per-database category against `scope`.
    fn fetch_local(
        &mut self,
        category: StatCategory,
        scope: &str,
    ) -> Result<StatRows, SourceError>;
}

impl<S: StatSource + ?Sized> StatSource for &mut S {
    fn fetch_cluster(&mut self, category: StatCategory) -> Result<StatRows, SourceError> {
        (**self).fetch_cluster(category)
    }

    fn fetch_local(
        &mut self,
        category: StatCategory,
        scope: &str,
    ) -> Result<StatRows, SourceError> {
        (**self).fetch_local(category, scope)
    }
}
