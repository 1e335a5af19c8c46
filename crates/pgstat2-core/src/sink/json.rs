//! JSON lines output, one object per record.

use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::warn;

use super::Sink;
use crate::record::{Fields, Tags};

#[derive(Serialize)]
struct JsonLine<'a> {
    measurement: &'a str,
    timestamp: String,
    tags: &'a Tags,
    fields: &'a Fields,
}

/// Writes each record as a single JSON object followed by a newline.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    fixed_time: Option<DateTime<Utc>>,
    write_errors: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            fixed_time: None,
            write_errors: 0,
        }
    }

    /// Stamps every record with `time` instead of the current time.
    pub fn with_fixed_time(mut self, time: DateTime<Utc>) -> Self {
        self.fixed_time = Some(time);
        self
    }

    /// Number of records that could not be written.
    pub fn write_errors(&self) -> u64 {
        self.write_errors
    }

    pub fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(error = %e, "failed to flush JSON output");
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for JsonLinesSink<W> {
    fn append(&mut self, measurement: &str, fields: Fields, tags: Tags) {
        let timestamp = self
            .fixed_time
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let line = JsonLine {
            measurement,
            timestamp,
            tags: &tags,
            fields: &fields,
        };

        let result = serde_json::to_writer(&mut self.writer, &line)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"));
        if let Err(e) = result {
            self.write_errors += 1;
            warn!(measurement, error = %e, "failed to write record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use chrono::TimeZone;

    #[test]
    fn writes_one_object_per_line() {
        let time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let mut sink = JsonLinesSink::new(Vec::new()).with_fixed_time(time);

        let mut fields = Fields::new();
        fields.insert("lock_count".into(), FieldValue::Int(3));
        let mut tags = Tags::new();
        tags.insert("granted".into(), "true".into());
        sink.append("postgresql2-locks", fields.clone(), tags.clone());
        sink.append("postgresql2-locks", fields, tags);

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"measurement":"postgresql2-locks","timestamp":"2024-01-02T03:04:05.000Z","tags":{"granted":"true"},"fields":{"lock_count":3}}"#
        );
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_errors_are_counted_not_returned() {
        let mut sink = JsonLinesSink::new(BrokenWriter);
        sink.append("m", Fields::new(), Tags::new());
        sink.append("m", Fields::new(), Tags::new());
        assert_eq!(sink.write_errors(), 2);
    }
}
