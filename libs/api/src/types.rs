use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::StoreError;

// ════════════════════════════════════════════════════════════════
//  Timestamp
// ════════════════════════════════════════════════════════════════

/// Момент времени в наносекундах от Unix epoch.
///
/// Ключ упорядочивания записей и единица watermark'а. Engine
/// сравнивает timestamp'ы как непрозрачные значения, не интерпретируя их.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_nanos(ns: i64) -> Self {
        Self(ns)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ════════════════════════════════════════════════════════════════
//  Time Unit
// ════════════════════════════════════════════════════════════════

/// Единица измерения сырого значения timestamp-колонки в source.
///
/// Строковые обозначения: `D`, `h`, `m`, `s`, `ms`, `us`, `ns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
    Millis,
    Micros,
    #[default]
    Nanos,
}

impl TimeUnit {
    pub const NAMES: [&'static str; 7] = ["D", "h", "m", "s", "ms", "us", "ns"];

    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Days => "D",
            TimeUnit::Hours => "h",
            TimeUnit::Minutes => "m",
            TimeUnit::Seconds => "s",
            TimeUnit::Millis => "ms",
            TimeUnit::Micros => "us",
            TimeUnit::Nanos => "ns",
        }
    }

    pub fn nanos_per_unit(self) -> i64 {
        match self {
            TimeUnit::Days => 86_400_000_000_000,
            TimeUnit::Hours => 3_600_000_000_000,
            TimeUnit::Minutes => 60_000_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Millis => 1_000_000,
            TimeUnit::Micros => 1_000,
            TimeUnit::Nanos => 1,
        }
    }

    /// Сырое значение → Timestamp. Переполнение i64: ошибка формата.
    pub fn to_timestamp(self, raw: i64) -> Result<Timestamp, StoreError> {
        raw.checked_mul(self.nanos_per_unit())
            .map(Timestamp)
            .ok_or_else(|| {
                StoreError::format_err(format!(
                    "timestamp {raw}{} does not fit into i64 nanoseconds",
                    self.as_str()
                ))
            })
    }

    /// Дробное сырое значение (REAL-колонка) → Timestamp с точностью до
    /// наносекунды. `1.7` секунды дают `1_700_000_000`.
    ///
    /// Округление совпадает с `ROUND(col * n)` в SQLite, поэтому границы
    /// диапазонов, собранные из прочитанных timestamp'ов, попадают
    /// ровно в исходные строки.
    pub fn float_to_timestamp(self, raw: f64) -> Result<Timestamp, StoreError> {
        let scaled = (raw * self.nanos_per_unit() as f64).round();
        // i64::MAX as f64 == 2^63, already out of range.
        if !scaled.is_finite() || scaled < i64::MIN as f64 || scaled >= i64::MAX as f64 {
            return Err(StoreError::format_err(format!(
                "timestamp {raw}{} does not fit into i64 nanoseconds",
                self.as_str()
            )));
        }
        Ok(Timestamp(scaled as i64))
    }

    /// Наименьшее сырое значение `raw`, для которого `raw * unit >= ts`.
    pub fn lower_bound(self, ts: Timestamp) -> i64 {
        let n = self.nanos_per_unit();
        let q = ts.0.div_euclid(n);
        if ts.0.rem_euclid(n) == 0 { q } else { q + 1 }
    }

    /// Наибольшее сырое значение `raw`, для которого `raw * unit <= ts`.
    pub fn upper_bound(self, ts: Timestamp) -> i64 {
        ts.0.div_euclid(self.nanos_per_unit())
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "D" => Ok(TimeUnit::Days),
            "h" => Ok(TimeUnit::Hours),
            "m" => Ok(TimeUnit::Minutes),
            "s" => Ok(TimeUnit::Seconds),
            "ms" => Ok(TimeUnit::Millis),
            "us" => Ok(TimeUnit::Micros),
            "ns" => Ok(TimeUnit::Nanos),
            other => Err(StoreError::config(format!(
                "timestamp unit '{other}' is not one of {:?}",
                TimeUnit::NAMES
            ))),
        }
    }
}

impl TryFrom<String> for TimeUnit {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeUnit> for String {
    fn from(unit: TimeUnit) -> Self {
        unit.as_str().to_string()
    }
}

// ════════════════════════════════════════════════════════════════
//  Field Value
// ════════════════════════════════════════════════════════════════

/// Значение одного поля записи.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Строковое представление для tag-колонки. NULL и пустая строка:
    /// tag отсутствует.
    pub fn as_tag(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Boolean(b) => Some(b.to_string()),
            FieldValue::Integer(i) => Some(i.to_string()),
            FieldValue::Float(f) => Some(f.to_string()),
            FieldValue::Text(s) if s.is_empty() => None,
            FieldValue::Text(s) => Some(s.clone()),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self { FieldValue::Boolean(v) }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self { FieldValue::Integer(v) }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self { FieldValue::Float(v) }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self { FieldValue::Text(v.to_string()) }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self { FieldValue::Text(v) }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(FieldValue::Null, Into::into)
    }
}

// ════════════════════════════════════════════════════════════════
//  Record / Recordset
// ════════════════════════════════════════════════════════════════

/// Строка таблицы: timestamp (ключ упорядочивания) + именованные поля
/// в порядке колонок source'а. Timestamp-колонка в `fields` не входит.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: Timestamp,
    pub fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new(timestamp: Timestamp) -> Self {
        Self { timestamp, fields: Vec::new() }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Упорядоченный по timestamp набор записей одной таблицы.
#[derive(Debug, Clone, PartialEq)]
pub struct Recordset {
    table: String,
    records: Vec<Record>,
}

impl Recordset {
    /// Записи сортируются по timestamp (stable: порядок равных сохраняется).
    pub fn new(table: impl Into<String>, mut records: Vec<Record>) -> Self {
        records.sort_by_key(|r| r.timestamp);
        Self { table: table.into(), records }
    }

    pub fn empty(table: impl Into<String>) -> Self {
        Self { table: table.into(), records: Vec::new() }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn min_timestamp(&self) -> Option<Timestamp> {
        self.records.first().map(|r| r.timestamp)
    }

    pub fn max_timestamp(&self) -> Option<Timestamp> {
        self.records.last().map(|r| r.timestamp)
    }
}

/// Разбить записи на батчи не больше `batch_size` (0 трактуется как 1).
pub fn batches(records: &[Record], batch_size: usize) -> std::slice::Chunks<'_, Record> {
    records.chunks(batch_size.max(1))
}
