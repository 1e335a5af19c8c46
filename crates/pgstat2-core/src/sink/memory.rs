use super::Sink;
use crate::record::{Fields, NormalizedRecord, Tags};

/// Keeps every appended record in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Vec<NormalizedRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    /// Measurement names in append order, one per record.
    pub fn measurements(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.measurement.as_str()).collect()
    }

    /// Measurement names in append order with consecutive duplicates removed.
    pub fn distinct_measurements(&self) -> Vec<&str> {
        let mut names = self.measurements();
        names.dedup();
        names
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Sink for MemorySink {
    fn append(&mut self, measurement: &str, fields: Fields, tags: Tags) {
        self.records.push(NormalizedRecord {
            measurement: measurement.to_string(),
            tags,
            fields,
        });
    }
}
