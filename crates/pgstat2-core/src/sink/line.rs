//! InfluxDB line protocol output.

use std::fmt::Write as _;
use std::io::Write;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::Sink;
use crate::record::{FieldValue, Fields, Tags};

/// Writes each record as one line of InfluxDB line protocol.
///
/// Tags with empty values are left out, as the protocol has no way to
/// express them.
pub struct LineProtocolSink<W: Write> {
    writer: W,
    fixed_time: Option<DateTime<Utc>>,
    write_errors: u64,
}

impl<W: Write> LineProtocolSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            fixed_time: None,
            write_errors: 0,
        }
    }

    pub fn with_fixed_time(mut self, time: DateTime<Utc>) -> Self {
        self.fixed_time = Some(time);
        self
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors
    }

    pub fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(error = %e, "failed to flush line protocol output");
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn escape_into(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Renders a record as a single line, without the trailing newline.
pub(crate) fn format_line(
    measurement: &str,
    fields: &Fields,
    tags: &Tags,
    timestamp_nanos: i64,
) -> String {
    const MEASUREMENT: &[char] = &[',', ' '];
    const KEY: &[char] = &[',', '=', ' '];
    const STRING: &[char] = &['"', '\\'];

    let mut line = String::with_capacity(128);
    escape_into(&mut line, measurement, MEASUREMENT);

    for (key, value) in tags.iter().filter(|(_, v)| !v.is_empty()) {
        line.push(',');
        escape_into(&mut line, key, KEY);
        line.push('=');
        escape_into(&mut line, value, KEY);
    }

    for (i, (key, value)) in fields.iter().enumerate() {
        line.push(if i == 0 { ' ' } else { ',' });
        escape_into(&mut line, key, KEY);
        line.push('=');
        match value {
            FieldValue::Int(v) => {
                let _ = write!(line, "{}i", v);
            }
            FieldValue::Float(v) => {
                let _ = write!(line, "{}", v);
            }
            FieldValue::Str(v) => {
                line.push('"');
                escape_into(&mut line, v, STRING);
                line.push('"');
            }
        }
    }

    let _ = write!(line, " {}", timestamp_nanos);
    line
}

impl<W: Write> Sink for LineProtocolSink<W> {
    fn append(&mut self, measurement: &str, fields: Fields, tags: Tags) {
        if fields.is_empty() {
            warn!(measurement, "dropping record without fields");
            return;
        }
        let time = self.fixed_time.unwrap_or_else(Utc::now);
        let nanos = time
            .timestamp_nanos_opt()
            .unwrap_or_else(|| time.timestamp_micros() * 1_000);
        let line = format_line(measurement, &fields, &tags, nanos);

        if let Err(e) = writeln!(self.writer, "{}", line) {
            self.write_errors += 1;
            warn!(measurement, error = %e, "failed to write record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn formats_tags_fields_and_timestamp() {
        let mut fields = Fields::new();
        fields.insert("lock_count".into(), FieldValue::Int(3));
        let line = format_line(
            "postgresql2-locks",
            &fields,
            &tags(&[("database_name", "app"), ("granted", "true")]),
            1_000,
        );
        assert_eq!(
            line,
            "postgresql2-locks,database_name=app,granted=true lock_count=3i 1000"
        );
    }

    #[test]
    fn escapes_special_characters() {
        let mut fields = Fields::new();
        fields.insert("note".into(), FieldValue::Str(r#"say "hi""#.into()));
        fields.insert("age".into(), FieldValue::Float(1.5));
        let line = format_line(
            "my measurement",
            &fields,
            &tags(&[("mode", "Share Lock"), ("k=v", "a,b")]),
            7,
        );
        assert_eq!(
            line,
            r#"my\ measurement,k\=v=a\,b,mode=Share\ Lock age=1.5,note="say \"hi\"" 7"#
        );
    }

    #[test]
    fn empty_tag_values_are_omitted() {
        let mut fields = Fields::new();
        fields.insert("lock_count".into(), FieldValue::Int(1));
        let line = format_line("m", &fields, &tags(&[("database_name", "")]), 0);
        assert_eq!(line, "m lock_count=1i 0");
    }

    #[test]
    fn sink_writes_newline_terminated_lines() {
        let time = Utc.timestamp_opt(1, 0).unwrap();
        let mut sink = LineProtocolSink::new(Vec::new()).with_fixed_time(time);
        let mut fields = Fields::new();
        fields.insert("Size".into(), FieldValue::Int(42));
        sink.append("postgresql2-disk-size", fields, tags(&[("database_name", "app")]));

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            out,
            "postgresql2-disk-size,database_name=app Size=42i 1000000000\n"
        );
    }
}
