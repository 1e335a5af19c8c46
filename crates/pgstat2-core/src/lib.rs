//! pgstat2-core - PostgreSQL statistics collection and normalization.
//!
//! Provides:
//! - `category`: the fixed set of statistic categories and their phase order
//! - `rows`: typed rows per category
//! - `normalize`: row to `(measurement, tags, fields)` mappings
//! - `gather`: the collection cycle: global phase, local phase, fail fast
//! - `source`: the `StatSource` contract, a PostgreSQL source and a scripted mock
//! - `sink`: the `Sink` contract and output sinks
//! - `config`: collector settings, database filters and the `server` tag
//!
//! # Usage
//!
//! ```
//! use pgstat2_core::gather::Gatherer;
//! use pgstat2_core::sink::MemorySink;
//! use pgstat2_core::source::mock::ScriptedSource;
//!
//! let mut source = ScriptedSource::typical_cluster();
//! let mut sink = MemorySink::new();
//! let report = Gatherer::new("host=localhost user=postgres")
//!     .gather(&mut source, &mut sink)
//!     .unwrap();
//! assert_eq!(report.records(), sink.records().len());
//! ```

pub mod category;
pub mod config;
pub mod gather;
pub mod normalize;
pub mod record;
pub mod rows;
pub mod sink;
pub mod source;

pub use category::{Scope, StatCategory};
pub use gather::{CollectError, Compatibility, CycleReport, Gatherer};
pub use record::{FieldValue, NormalizedRecord};
