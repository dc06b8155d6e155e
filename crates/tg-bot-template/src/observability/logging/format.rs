//! Line encoders for log records.
//!
//! Both encoders write the fields of the event first and then the attribute
//! overlay of the ambient [`Ctx`] in root to leaf order. Duplicate keys are
//! written as is.

use crate::ctx::Ctx;
use crate::util::prelude::*;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordFormat {
    pub(crate) json: bool,
    pub(crate) add_source: bool,
}

impl<S, N> FormatEvent<S, N> for RecordFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();

        let mut record = Record::default();
        event.record(&mut record);

        if let Some(ctx) = Ctx::try_current() {
            record.fields.extend(
                ctx.attrs()
                    .iter()
                    .map(|attr| (attr.key.clone(), attr.value.clone())),
            );
        }

        let source = if self.add_source {
            meta.file()
                .zip(meta.line())
                .map(|(file, line)| format!("{file}:{line}"))
        } else {
            None
        };

        let header = Header {
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level: meta.level().to_string(),
            source,
        };

        if self.json {
            write_json(&mut writer, &header, &record)?;
        } else {
            write_text(&mut writer, &header, &record)?;
        }

        writeln!(writer)
    }
}

struct Header {
    time: String,
    level: String,
    source: Option<String>,
}

#[derive(Default)]
struct Record {
    message: String,
    fields: Vec<(String, Value)>,
}

impl Record {
    fn push(&mut self, field: &Field, value: impl Into<Value>) {
        self.fields.push((field.name().to_owned(), value.into()));
    }
}

impl Visit for Record {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let value = format!("{value:?}");
        if field.name() == "message" {
            self.message = value;
        } else {
            self.push(field, value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            value.clone_into(&mut self.message);
        } else {
            self.push(field, value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push(field, value.display_chain().to_string());
    }
}

fn write_json(w: &mut Writer<'_>, header: &Header, record: &Record) -> fmt::Result {
    // `Value`'s `Display` impl produces compact JSON, we use it to escape strings
    let string = |s: &str| Value::from(s);

    write!(w, "{{\"time\":{}", string(&header.time))?;
    write!(w, ",\"level\":{}", string(&header.level))?;

    if let Some(source) = &header.source {
        write!(w, ",\"source\":{}", string(source))?;
    }

    write!(w, ",\"msg\":{}", string(&record.message))?;

    for (key, value) in &record.fields {
        write!(w, ",{}:{value}", string(key))?;
    }

    w.write_char('}')
}

fn write_text(w: &mut Writer<'_>, header: &Header, record: &Record) -> fmt::Result {
    write!(w, "time={} level={}", header.time, header.level)?;

    if let Some(source) = &header.source {
        write!(w, " source={}", TextValue(source))?;
    }

    write!(w, " msg={}", TextValue(&record.message))?;

    for (key, value) in &record.fields {
        write!(w, " {}=", TextValue(key))?;
        match value {
            Value::String(value) => write!(w, "{}", TextValue(value))?,
            value => write!(w, "{value}")?,
        }
    }

    Ok(())
}

/// Quotes the string only if it would be ambiguous in `key=value` form
struct TextValue<'a>(&'a str);

impl fmt::Display for TextValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let needs_quoting = self.0.is_empty()
            || self
                .0
                .chars()
                .any(|char| char.is_whitespace() || char.is_control() || matches!(char, '"' | '='));

        if needs_quoting {
            write!(f, "{:?}", self.0)
        } else {
            f.write_str(self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TextValue;
    use expect_test::{expect, Expect};

    #[track_caller]
    fn assert_text_value(input: &str, expected: Expect) {
        expected.assert_eq(&TextValue(input).to_string());
    }

    #[test]
    fn text_quoting() {
        use assert_text_value as test;

        test("plain", expect!["plain"]);
        test("", expect![[r#""""#]]);
        test("two words", expect![[r#""two words""#]]);
        test("k=v", expect![[r#""k=v""#]]);
        test(r#"say "hi""#, expect![[r#""say \"hi\"""#]]);
        test("line\nbreak", expect![[r#""line\nbreak""#]]);
    }
}
