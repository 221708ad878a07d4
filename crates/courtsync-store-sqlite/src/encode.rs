//! Encoding and decoding helpers between domain types and SQLite values.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (see
//! [`courtsync_core::value::format_timestamp`]) so that `MAX`, `ORDER BY`
//! and `IS` behave chronologically. Booleans are stored as 0/1.

use chrono::{DateTime, Utc};
use courtsync_core::{
  availability::Court,
  entity::EntitySchema,
  record::CanonicalRecord,
  value::{ColumnType, FieldValue, format_timestamp, parse_timestamp},
  watermark::Watermark,
};
use rusqlite::types::Value;

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { format_timestamp(dt) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  parse_timestamp(s).ok_or_else(|| Error::DateParse(s.to_owned()))
}

// ─── FieldValue ──────────────────────────────────────────────────────────────

pub fn encode_field(v: &FieldValue) -> Value {
  match v {
    FieldValue::Null => Value::Null,
    FieldValue::Text(s) => Value::Text(s.clone()),
    FieldValue::Integer(i) => Value::Integer(*i),
    FieldValue::Real(r) => Value::Real(*r),
    FieldValue::Bool(b) => Value::Integer(i64::from(*b)),
    FieldValue::Timestamp(dt) => Value::Text(encode_dt(*dt)),
    FieldValue::Date(d) => Value::Text(d.to_string()),
  }
}

pub fn decode_field(column: &'static str, ty: ColumnType, v: Value) -> Result<FieldValue> {
  let decoded = match (ty, v) {
    (_, Value::Null) => FieldValue::Null,
    (ColumnType::Text, Value::Text(s)) => FieldValue::Text(s),
    (ColumnType::Text, Value::Integer(i)) => FieldValue::Text(i.to_string()),
    (ColumnType::Integer, Value::Integer(i)) => FieldValue::Integer(i),
    (ColumnType::Real, Value::Real(r)) => FieldValue::Real(r),
    (ColumnType::Real, Value::Integer(i)) => FieldValue::Real(i as f64),
    (ColumnType::Bool, Value::Integer(i)) => FieldValue::Bool(i != 0),
    (ColumnType::Timestamp, Value::Text(s)) => FieldValue::Timestamp(decode_dt(&s)?),
    (ColumnType::Date, Value::Text(s)) => FieldValue::Date(
      s.parse()
        .map_err(|_| Error::Decode { column, value: s.clone() })?,
    ),
    (_, other) => {
      return Err(Error::Decode { column, value: format!("{other:?}") });
    }
  };
  Ok(decoded)
}

/// One record's bind values, in column order.
pub fn encode_record(record: &CanonicalRecord) -> Result<Vec<Value>> {
  Ok(record.to_row()?.iter().map(encode_field).collect())
}

/// Rebuild a record from a row selected with every column in order.
pub fn decode_record(entity: &EntitySchema, raw: Vec<Value>) -> Result<CanonicalRecord> {
  let row = entity
    .columns
    .iter()
    .zip(raw)
    .map(|(c, v)| decode_field(c.name, c.ty, v))
    .collect::<Result<Vec<_>>>()?;
  Ok(CanonicalRecord::from_row(entity.kind, &row)?)
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// Raw strings read directly from an `elt_watermarks` row.
pub struct RawWatermark {
  pub source_name:            String,
  pub last_loaded_at:         Option<String>,
  pub last_record_created_at: Option<String>,
}

impl RawWatermark {
  pub fn into_watermark(self) -> Result<Watermark> {
    let last_loaded_at = self
      .last_loaded_at
      .as_deref()
      .map(decode_dt)
      .transpose()?
      .ok_or_else(|| Error::DateParse(format!("{}: last_loaded_at is NULL", self.source_name)))?;
    Ok(Watermark {
      last_loaded_at,
      last_record_created_at: self
        .last_record_created_at
        .as_deref()
        .map(decode_dt)
        .transpose()?,
      source_name: self.source_name,
    })
  }
}

/// A `courts` row; already in domain types.
pub fn court_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Court> {
  Ok(Court {
    id:          row.get(0)?,
    client_code: row.get(1)?,
    label:       row.get(2)?,
    type_name:   row.get(3)?,
    order_index: row.get(4)?,
  })
}
