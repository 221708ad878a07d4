//! Canonical records: the normalized, vendor-independent shape of every
//! row the warehouse stores.
//!
//! Each variant's struct fields are named after its table columns. The
//! mapping to and from a column row goes through serde, so the
//! [`EntitySchema`] is the single source of truth for column order and type.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
  Error, Result,
  entity::{EntityKind, EntitySchema},
  value::{FieldValue, KeyTuple},
};

// ─── Variants ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
  pub client_code:     String,
  pub member_id:       String,
  pub club_member_key: Option<String>,
  pub first_name:      Option<String>,
  pub last_name:       Option<String>,
  pub gender:          Option<String>,
  pub date_of_birth:   Option<NaiveDate>,
  pub email:           Option<String>,
  pub phone_number:    Option<String>,
  pub membership_type: Option<String>,
  pub updated_at:      Option<DateTime<Utc>>,
}

/// One player's seat on a reservation; a reservation with several players
/// yields several records sharing `reservation_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
  pub client_code:              String,
  pub reservation_id:           String,
  pub member_id:                String,
  pub event_id:                 Option<String>,
  pub reservation_created_at:   Option<DateTime<Utc>>,
  pub reservation_updated_at:   Option<DateTime<Utc>>,
  pub reservation_start_at:     Option<DateTime<Utc>>,
  pub reservation_end_at:       Option<DateTime<Utc>>,
  pub reservation_cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
  pub client_code:            String,
  pub reservation_id:         String,
  pub member_id:              String,
  pub cancelled_on:           DateTime<Utc>,
  pub event_id:               Option<String>,
  pub reservation_type:       Option<String>,
  pub reservation_created_at: Option<DateTime<Utc>>,
  pub reservation_start_at:   Option<DateTime<Utc>>,
  pub reservation_end_at:     Option<DateTime<Utc>>,
  pub program_name:           Option<String>,
  pub player_name:            Option<String>,
  pub player_email:           Option<String>,
  pub player_phone:           Option<String>,
  pub fee:                    Option<f64>,
  pub is_team_event:          Option<bool>,
  pub event_category_id:      Option<String>,
  pub event_category_name:    Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  pub client_code:            String,
  pub source_system:          String,
  pub event_id:               String,
  pub event_start_time:       DateTime<Utc>,
  pub event_end_time:         Option<DateTime<Utc>>,
  pub event_name:             Option<String>,
  pub event_description:      Option<String>,
  pub event_type:             Option<String>,
  pub num_registrants:        Option<i64>,
  pub max_registrants:        Option<i64>,
  pub admission_rate_regular: Option<f64>,
  pub admission_rate_member:  Option<f64>,
}

/// A free (court, slot) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilitySession {
  pub client_code:   String,
  pub source_system: String,
  pub court_id:      String,
  pub slot_start:    DateTime<Utc>,
  pub slot_end:      DateTime<Utc>,
  pub court_name:    Option<String>,
  pub period_type:   Option<String>,
}

// ─── CanonicalRecord ─────────────────────────────────────────────────────────

/// A normalized record of any kind. The variant name is the
/// [`EntityKind`] discriminant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CanonicalRecord {
  Member(Member),
  Reservation(Reservation),
  Cancellation(Cancellation),
  Event(Event),
  AvailabilitySession(AvailabilitySession),
}

impl CanonicalRecord {
  pub fn kind(&self) -> EntityKind {
    match self {
      Self::Member(_) => EntityKind::Member,
      Self::Reservation(_) => EntityKind::Reservation,
      Self::Cancellation(_) => EntityKind::Cancellation,
      Self::Event(_) => EntityKind::Event,
      Self::AvailabilitySession(_) => EntityKind::AvailabilitySession,
    }
  }

  pub fn schema(&self) -> &'static EntitySchema { self.kind().schema() }

  pub fn client_code(&self) -> &str {
    match self {
      Self::Member(r) => &r.client_code,
      Self::Reservation(r) => &r.client_code,
      Self::Cancellation(r) => &r.client_code,
      Self::Event(r) => &r.client_code,
      Self::AvailabilitySession(r) => &r.client_code,
    }
  }

  /// Flatten into one value per schema column, in column order.
  pub fn to_row(&self) -> Result<Vec<FieldValue>> {
    // The full serialised form is `{"kind": "...", "data": {...}}`.
    let full = serde_json::to_value(self)?;
    let data = full.get("data").cloned().unwrap_or(Value::Null);
    self
      .schema()
      .columns
      .iter()
      .map(|c| {
        let field = data.get(c.name).unwrap_or(&Value::Null);
        FieldValue::from_json(c.name, c.ty, field)
      })
      .collect()
  }

  /// Rebuild a record of `kind` from a row in schema column order.
  pub fn from_row(kind: EntityKind, row: &[FieldValue]) -> Result<Self> {
    let schema = kind.schema();
    let data: Map<String, Value> = schema
      .columns
      .iter()
      .zip(row)
      .map(|(c, v)| (c.name.to_owned(), v.to_json()))
      .collect();
    let wrapped = serde_json::json!({ "kind": kind, "data": data });
    Ok(serde_json::from_value(wrapped)?)
  }

  fn project(&self, columns: &[&'static str]) -> Result<KeyTuple> {
    let schema = self.schema();
    let row = self.to_row()?;
    let picked = columns
      .iter()
      .map(|name| {
        schema
          .position(name)
          .and_then(|i| row.get(i))
          .ok_or_else(|| Error::UnknownColumn {
            kind:   schema.kind,
            column: (*name).to_owned(),
          })
      })
      .collect::<Result<Vec<_>>>()?;
    Ok(KeyTuple::from_values(picked))
  }

  pub fn natural_key(&self) -> Result<KeyTuple> {
    self.project(self.schema().natural_key)
  }

  pub fn dedup_key(&self) -> Result<KeyTuple> {
    self.project(self.schema().dedup_key)
  }

  pub fn freshness(&self) -> Option<DateTime<Utc>> {
    match self {
      Self::Member(r) => r.updated_at,
      Self::Reservation(r) => r.reservation_updated_at,
      Self::Cancellation(r) => Some(r.cancelled_on),
      Self::Event(r) => Some(r.event_start_time),
      Self::AvailabilitySession(r) => Some(r.slot_start),
    }
  }

  /// Reject records whose natural key has an empty component. Such rows
  /// cannot be upserted and are dropped as data errors.
  pub fn validate(&self) -> Result<()> {
    let schema = self.schema();
    let row = self.to_row()?;
    for &name in schema.natural_key {
      let blank = match schema.position(name).and_then(|i| row.get(i)) {
        None | Some(FieldValue::Null) => true,
        Some(FieldValue::Text(s)) => s.trim().is_empty(),
        Some(_) => false,
      };
      if blank {
        return Err(Error::MissingKeyField { kind: schema.kind, field: name });
      }
    }
    Ok(())
  }
}

impl From<Member> for CanonicalRecord {
  fn from(r: Member) -> Self { Self::Member(r) }
}

impl From<Reservation> for CanonicalRecord {
  fn from(r: Reservation) -> Self { Self::Reservation(r) }
}

impl From<Cancellation> for CanonicalRecord {
  fn from(r: Cancellation) -> Self { Self::Cancellation(r) }
}

impl From<Event> for CanonicalRecord {
  fn from(r: Event) -> Self { Self::Event(r) }
}

impl From<AvailabilitySession> for CanonicalRecord {
  fn from(r: AvailabilitySession) -> Self { Self::AvailabilitySession(r) }
}

#[cfg(test)]
pub(crate) mod fixtures {
  use chrono::TimeZone;

  use super::*;

  pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
  }

  pub fn reservation(id: &str, member: &str) -> Reservation {
    Reservation {
      client_code:              "pklyn".into(),
      reservation_id:           id.into(),
      member_id:                member.into(),
      event_id:                 Some("ev-1".into()),
      reservation_created_at:   Some(at(9, 0)),
      reservation_updated_at:   Some(at(9, 0)),
      reservation_start_at:     Some(at(18, 0)),
      reservation_end_at:       Some(at(19, 0)),
      reservation_cancelled_at: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::{fixtures::*, *};

  #[test]
  fn row_round_trip_preserves_record() {
    let record = CanonicalRecord::from(reservation("r1", "m1"));
    let row = record.to_row().unwrap();
    assert_eq!(row.len(), record.schema().columns.len());
    assert_eq!(row[0], FieldValue::Text("pklyn".into()));
    assert_eq!(row[8], FieldValue::Null);
    let back = CanonicalRecord::from_row(EntityKind::Reservation, &row).unwrap();
    assert_eq!(back, record);
  }

  #[test]
  fn dedup_key_differs_from_natural_key() {
    let a = CanonicalRecord::from(reservation("r1", "m1"));
    let b = CanonicalRecord::from(reservation("r2", "m1"));
    assert_ne!(a.natural_key().unwrap(), b.natural_key().unwrap());
    assert_eq!(a.dedup_key().unwrap(), b.dedup_key().unwrap());
  }

  #[test]
  fn blank_key_component_fails_validation() {
    let record = CanonicalRecord::from(reservation("  ", "m1"));
    assert!(matches!(
      record.validate(),
      Err(Error::MissingKeyField { field: "reservation_id", .. })
    ));
    assert!(CanonicalRecord::from(reservation("r1", "m1")).validate().is_ok());
  }
}
