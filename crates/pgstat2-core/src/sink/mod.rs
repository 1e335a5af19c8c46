//! Record sinks.
//!
//! A [`Sink`] accepts normalized records and never reports failure back to
//! the caller. Sinks that do I/O log and count their own write errors.

mod json;
mod line;
mod memory;

pub use json::JsonLinesSink;
pub use line::LineProtocolSink;
pub use memory::MemorySink;

use crate::record::{Fields, NormalizedRecord, Tags};

/// Append-only destination for normalized records.
pub trait Sink {
    fn append(&mut self, measurement: &str, fields: Fields, tags: Tags);

    /// Forwards a whole record.
    fn append_record(&mut self, record: NormalizedRecord) {
        self.append(&record.measurement, record.fields, record.tags);
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn append(&mut self, measurement: &str, fields: Fields, tags: Tags) {
        (**self).append(measurement, fields, tags);
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn append(&mut self, measurement: &str, fields: Fields, tags: Tags) {
        (**self).append(measurement, fields, tags);
    }
}

/// Adds a `server` tag to every record before passing it on.
pub struct ServerTagged<S> {
    server: String,
    inner: S,
}

impl<S: Sink> ServerTagged<S> {
    pub fn new(server: impl Into<String>, inner: S) -> Self {
        Self {
            server: server.into(),
            inner,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Sink> Sink for ServerTagged<S> {
    fn append(&mut self, measurement: &str, fields: Fields, mut tags: Tags) {
        tags.insert("server".to_string(), self.server.clone());
        self.inner.append(measurement, fields, tags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;

    #[test]
    fn server_tag_is_added() {
        let mut sink = ServerTagged::new("db01", MemorySink::new());
        let mut fields = Fields::new();
        fields.insert("Size".into(), FieldValue::Int(1));
        let mut tags = Tags::new();
        tags.insert("database_name".into(), "app".into());

        sink.append("postgresql2-disk-size", fields, tags);

        let records = sink.inner().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tag_value("server"), Some("db01"));
        assert_eq!(records[0].tag_value("database_name"), Some("app"));
    }

    #[test]
    fn append_record_keeps_measurement() {
        let mut sink = MemorySink::new();
        sink.append_record(NormalizedRecord::new("m").field("x", 1_i64));
        assert_eq!(sink.measurements(), vec!["m"]);
    }
}
