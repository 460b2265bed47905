//! Кодирование записей в InfluxDB line protocol:
//!
//! ```text
//! measurement[,tag=value...] field=value[,field=value...] timestamp_ns
//! ```

use std::fmt::Write as _;

use sync_api::{FieldValue, Record, StoreError};

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub(crate) fn escape_measurement(s: &str) -> String {
    escape(s, &[',', ' '])
}

/// Tag keys, tag values, field keys.
pub(crate) fn escape_key(s: &str) -> String {
    escape(s, &[',', '=', ' '])
}

fn escape_string_field(s: &str) -> String {
    escape(s, &['"', '\\'])
}

/// Значение поля в line protocol. `None`: поле не пишется (NULL или
/// нечисловой float).
fn field_literal(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Null => None,
        FieldValue::Boolean(b) => Some(b.to_string()),
        FieldValue::Integer(i) => Some(format!("{i}i")),
        FieldValue::Float(f) if f.is_finite() => Some(f.to_string()),
        FieldValue::Float(_) => None,
        FieldValue::Text(s) => Some(format!("\"{}\"", escape_string_field(s))),
    }
}

/// Одна строка line protocol для записи.
///
/// Колонки из `tag_columns` уходят в теги (пустые и NULL пропускаются),
/// остальные колонки становятся полями.
pub(crate) fn encode_record(
    measurement: &str,
    record: &Record,
    tag_columns: &[String],
) -> Result<String, StoreError> {
    let mut line = escape_measurement(measurement);

    for tag in tag_columns {
        if let Some(value) = record.field(tag).and_then(FieldValue::as_tag) {
            let _ = write!(line, ",{}={}", escape_key(tag), escape_key(&value));
        }
    }

    let mut fields = record
        .fields
        .iter()
        .filter(|(name, _)| !tag_columns.contains(name))
        .filter_map(|(name, value)| {
            field_literal(value).map(|lit| format!("{}={lit}", escape_key(name)))
        })
        .peekable();

    if fields.peek().is_none() {
        return Err(StoreError::format_err(format!(
            "measurement '{measurement}': record at {} has no non-null fields",
            record.timestamp
        )));
    }

    line.push(' ');
    line.push_str(&fields.collect::<Vec<_>>().join(","));
    let _ = write!(line, " {}", record.timestamp.as_nanos());
    Ok(line)
}

/// Тело POST /write: по строке на запись.
pub(crate) fn encode_batch(
    measurement: &str,
    records: &[Record],
    tag_columns: &[String],
) -> Result<String, StoreError> {
    let lines = records
        .iter()
        .map(|r| encode_record(measurement, r, tag_columns))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}
