//! Column-level values shared between canonical records and storage
//! backends.
//!
//! Records are flattened into a row of [`FieldValue`]s in the column order
//! their [`EntitySchema`](crate::entity::EntitySchema) declares. Key tuples
//! are built from the same values, using the canonical text form so that
//! in-memory comparisons agree with what the warehouse stores.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::Value;

use crate::{Error, Result};

// ─── Column types ────────────────────────────────────────────────────────────

/// The storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
  Text,
  Integer,
  Real,
  Bool,
  /// A UTC instant, stored as fixed-width RFC 3339 text.
  Timestamp,
  /// A calendar date, stored as `YYYY-MM-DD`.
  Date,
}

// ─── Timestamps ──────────────────────────────────────────────────────────────

/// Canonical text form of an instant: microsecond precision with a `Z`
/// suffix. Fixed width, so lexical order is chronological.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .ok()
    .map(|dt| dt.with_timezone(&Utc))
}

// ─── FieldValue ──────────────────────────────────────────────────────────────

/// One typed cell of a record row.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
  Null,
  Text(String),
  Integer(i64),
  Real(f64),
  Bool(bool),
  Timestamp(DateTime<Utc>),
  Date(NaiveDate),
}

impl FieldValue {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  /// The canonical text used for key comparison; `None` for NULL.
  pub fn key_part(&self) -> Option<String> {
    match self {
      Self::Null => None,
      Self::Text(s) => Some(s.clone()),
      Self::Integer(i) => Some(i.to_string()),
      Self::Real(r) => Some(r.to_string()),
      Self::Bool(b) => Some(if *b { "1".into() } else { "0".into() }),
      Self::Timestamp(dt) => Some(format_timestamp(*dt)),
      Self::Date(d) => Some(d.to_string()),
    }
  }

  pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
    match self {
      Self::Timestamp(dt) => Some(*dt),
      _ => None,
    }
  }

  /// Read a value of type `ty` out of a serialised record field.
  ///
  /// Vendor-agnostic: timestamps arrive as RFC 3339 strings and dates as
  /// ISO strings, exactly as `chrono`'s serde impls emit them.
  pub fn from_json(
    column: &'static str,
    ty: ColumnType,
    value: &Value,
  ) -> Result<Self> {
    if value.is_null() {
      return Ok(Self::Null);
    }
    let bad = |reason: &str| Error::ColumnDecode {
      column,
      reason: format!("{reason}: {value}"),
    };
    let decoded = match ty {
      ColumnType::Text => match value {
        Value::String(s) => Self::Text(s.clone()),
        other => Self::Text(other.to_string()),
      },
      ColumnType::Integer => {
        Self::Integer(value.as_i64().ok_or_else(|| bad("expected integer"))?)
      }
      ColumnType::Real => {
        Self::Real(value.as_f64().ok_or_else(|| bad("expected number"))?)
      }
      ColumnType::Bool => {
        Self::Bool(value.as_bool().ok_or_else(|| bad("expected bool"))?)
      }
      ColumnType::Timestamp => {
        let s = value.as_str().ok_or_else(|| bad("expected timestamp"))?;
        Self::Timestamp(parse_timestamp(s).ok_or_else(|| bad("bad timestamp"))?)
      }
      ColumnType::Date => {
        let s = value.as_str().ok_or_else(|| bad("expected date"))?;
        Self::Date(s.parse().map_err(|_| bad("bad date"))?)
      }
    };
    Ok(decoded)
  }

  /// Inverse of [`FieldValue::from_json`].
  pub fn to_json(&self) -> Value {
    match self {
      Self::Null => Value::Null,
      Self::Text(s) => Value::String(s.clone()),
      Self::Integer(i) => Value::from(*i),
      Self::Real(r) => Value::from(*r),
      Self::Bool(b) => Value::Bool(*b),
      Self::Timestamp(dt) => Value::String(format_timestamp(*dt)),
      Self::Date(d) => Value::String(d.to_string()),
    }
  }
}

// ─── KeyTuple ────────────────────────────────────────────────────────────────

/// A projection of a record onto a key's columns.
///
/// Equality is null-safe: two NULLs in the same position compare equal,
/// matching SQL `IS NOT DISTINCT FROM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyTuple(pub Vec<Option<String>>);

impl KeyTuple {
  pub fn from_values<'a>(values: impl IntoIterator<Item = &'a FieldValue>) -> Self {
    Self(values.into_iter().map(FieldValue::key_part).collect())
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_are_fixed_width_and_ordered() {
    let a = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
    let b = a + chrono::TimeDelta::microseconds(1);
    let (fa, fb) = (format_timestamp(a), format_timestamp(b));
    assert_eq!(fa, "2024-01-01T09:00:00.000000Z");
    assert_eq!(fa.len(), fb.len());
    assert!(fa < fb);
    assert_eq!(parse_timestamp(&fb), Some(b));
  }

  #[test]
  fn key_tuples_treat_nulls_as_equal() {
    let a = KeyTuple::from_values(&[FieldValue::Text("x".into()), FieldValue::Null]);
    let b = KeyTuple::from_values(&[FieldValue::Text("x".into()), FieldValue::Null]);
    let c = KeyTuple::from_values(&[FieldValue::Text("x".into()), FieldValue::Text("".into())]);
    assert_eq!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn json_round_trip_for_timestamp_column() {
    let dt = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
    let v = FieldValue::from_json(
      "at",
      ColumnType::Timestamp,
      &Value::String(dt.to_rfc3339()),
    )
    .unwrap();
    assert_eq!(v, FieldValue::Timestamp(dt));
    assert!(FieldValue::from_json("n", ColumnType::Integer, &Value::from("x")).is_err());
  }
}
