//! Normalized telemetry record.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag set of a record. Ordered so output is deterministic.
pub type Tags = BTreeMap<String, String>;

/// Field set of a record.
pub type Fields = BTreeMap<String, FieldValue>;

/// Value of a single field.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Str(v) => f.write_str(v),
        }
    }
}

/// One `(measurement, tags, fields)` triple handed to a sink.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct NormalizedRecord {
    pub measurement: String,
    pub tags: Tags,
    pub fields: Fields,
}

impl NormalizedRecord {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Tags::new(),
            fields: Fields::new(),
        }
    }

    pub fn tag(mut self, key: &str, value: impl Into<String>) -> Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }

    pub fn field(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn field_value(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_tags_and_fields_apart() {
        let record = NormalizedRecord::new("m")
            .tag("database_name", "app")
            .field("Size", 10_i64);
        assert_eq!(record.tag_value("database_name"), Some("app"));
        assert_eq!(record.field_value("Size"), Some(&FieldValue::Int(10)));
        assert!(record.field_value("database_name").is_none());
    }

    #[test]
    fn field_value_serializes_untagged() {
        let json = serde_json::to_string(&FieldValue::Int(3)).unwrap();
        assert_eq!(json, "3");
        let json = serde_json::to_string(&FieldValue::Float(1.5)).unwrap();
        assert_eq!(json, "1.5");
    }
}
