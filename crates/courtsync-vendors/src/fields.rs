//! Lenient field extraction from vendor JSON.
//!
//! Vendor payloads are loosely typed: ids arrive as strings or numbers,
//! counts as numbers or numeric strings, and timestamps with or without an
//! offset. These helpers return `None` for anything unusable so the
//! normalizers can decide whether a missing value drops the record.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use courtsync_core::availability::local_to_utc;
use serde_json::Value;

/// First of `keys` holding a non-blank string, trimmed.
pub fn text(v: &Value, keys: &[&str]) -> Option<String> {
  keys.iter().find_map(|k| match v.get(k)? {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
    _ => None,
  })
}

/// First of `keys` holding a non-blank string or a number, as text.
pub fn id(v: &Value, keys: &[&str]) -> Option<String> {
  keys.iter().find_map(|k| match v.get(k)? {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  })
}

pub fn integer(v: &Value, key: &str) -> Option<i64> {
  match v.get(key)? {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

pub fn real(v: &Value, key: &str) -> Option<f64> {
  match v.get(key)? {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

pub fn boolean(v: &Value, key: &str) -> Option<bool> { v.get(key)?.as_bool() }

// ─── Time ────────────────────────────────────────────────────────────────────

const NAIVE_FORMATS: &[&str] = &[
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%d %H:%M:%S%.f",
  "%Y-%m-%dT%H:%M",
];

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
  NAIVE_FORMATS
    .iter()
    .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
}

/// Parse an instant. Text with an offset is taken as is; naive wall time is
/// read in `naive_zone`.
pub fn instant(s: &str, naive_zone: Tz) -> Option<DateTime<Utc>> {
  let s = s.trim();
  if let Ok(t) = DateTime::parse_from_rfc3339(s) {
    return Some(t.with_timezone(&Utc));
  }
  local_to_utc(naive_zone, parse_naive(s)?)
}

/// [`instant`] applied to the first non-blank string among `keys`.
pub fn timestamp(v: &Value, keys: &[&str], naive_zone: Tz) -> Option<DateTime<Utc>> {
  instant(&text(v, keys)?, naive_zone)
}

/// A calendar date from `YYYY-MM-DD` or any datetime starting with one.
pub fn date(s: &str) -> Option<NaiveDate> { s.trim().get(..10)?.parse().ok() }

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use serde_json::json;

  use super::*;

  #[test]
  fn ids_accept_strings_and_numbers() {
    let v = json!({ "Id": 4411, "Code": " ab-1 ", "Blank": "  " });
    assert_eq!(id(&v, &["Id"]).as_deref(), Some("4411"));
    assert_eq!(id(&v, &["Blank", "Code"]).as_deref(), Some("ab-1"));
    assert_eq!(id(&v, &["Missing"]), None);
    assert_eq!(text(&v, &["Id"]), None);
  }

  #[test]
  fn naive_times_are_read_in_the_given_zone() {
    let ny = chrono_tz::America::New_York;
    assert_eq!(
      instant("2024-03-04T18:00:00", ny),
      Some(Utc.with_ymd_and_hms(2024, 3, 4, 23, 0, 0).unwrap())
    );
    assert_eq!(
      instant("2024-03-04T18:00:00.250Z", ny),
      Some(Utc.with_ymd_and_hms(2024, 3, 4, 18, 0, 0).unwrap() + chrono::TimeDelta::milliseconds(250))
    );
    assert_eq!(
      instant("2024-07-04 09:30:00", chrono_tz::UTC),
      Some(Utc.with_ymd_and_hms(2024, 7, 4, 9, 30, 0).unwrap())
    );
    assert_eq!(instant("next tuesday", ny), None);
  }

  #[test]
  fn numbers_tolerate_numeric_strings() {
    let v = json!({ "a": "12", "b": 3.5, "c": "x" });
    assert_eq!(integer(&v, "a"), Some(12));
    assert_eq!(real(&v, "b"), Some(3.5));
    assert_eq!(real(&v, "c"), None);
    assert_eq!(date("1990-05-17T00:00:00"), NaiveDate::from_ymd_opt(1990, 5, 17));
  }
}
