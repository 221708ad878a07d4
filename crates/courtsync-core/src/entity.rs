//! Entity descriptors: the table layout, keys, and load discipline of each
//! canonical record kind.
//!
//! Storage backends generate all staging and merge SQL from these
//! descriptors, so dedup and merge logic is written once and applies to
//! every kind.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::value::ColumnType;

// ─── Kinds ───────────────────────────────────────────────────────────────────

/// The kinds of canonical record the warehouse ingests.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  EnumIter,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
  Member,
  Reservation,
  Cancellation,
  Event,
  AvailabilitySession,
}

/// How a kind's production table is updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LoadMode {
  /// Durable facts accumulate via upsert; never deleted wholesale.
  Append,
  /// Each run fully supersedes production for its (client, source system).
  Replace,
}

// ─── Schema ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
  pub name: &'static str,
  pub ty:   ColumnType,
}

const fn col(name: &'static str, ty: ColumnType) -> Column { Column { name, ty } }

/// Static description of one entity kind.
#[derive(Debug)]
pub struct EntitySchema {
  pub kind:             EntityKind,
  pub mode:             LoadMode,
  /// Prefix of the watermark source name, e.g. `reservations` in
  /// `reservations__pklyn`.
  pub stream:           &'static str,
  pub production_table: &'static str,
  pub staging_table:    &'static str,
  /// All record columns, in row order.
  pub columns:          &'static [Column],
  /// Columns identifying the same real-world entity; uniquely indexed.
  pub natural_key:      &'static [&'static str],
  /// Columns identifying the same logical fact.
  pub dedup_key:        &'static [&'static str],
  /// Tie-breaker for dedup; its maximum becomes `last_record_created_at`.
  pub freshness:        &'static str,
  /// When set, a non-null value deletes the natural key from production
  /// instead of merging the row.
  pub cancellation:     Option<&'static str>,
  /// Columns scoping staging and replace-mode swaps.
  pub partition:        &'static [&'static str],
}

impl EntitySchema {
  pub fn position(&self, column: &str) -> Option<usize> {
    self.columns.iter().position(|c| c.name == column)
  }

  /// Non-key columns, i.e. those an upsert may overwrite.
  pub fn mutable_columns(&self) -> impl Iterator<Item = &Column> + '_ {
    self
      .columns
      .iter()
      .filter(|c| !self.natural_key.contains(&c.name))
  }
}

impl EntityKind {
  pub fn schema(self) -> &'static EntitySchema {
    match self {
      Self::Member => &MEMBER,
      Self::Reservation => &RESERVATION,
      Self::Cancellation => &CANCELLATION,
      Self::Event => &EVENT,
      Self::AvailabilitySession => &AVAILABILITY_SESSION,
    }
  }

  pub fn mode(self) -> LoadMode { self.schema().mode }
}

// ─── Descriptors ─────────────────────────────────────────────────────────────

use ColumnType::{Bool, Date, Integer, Real, Text, Timestamp};

pub static MEMBER: EntitySchema = EntitySchema {
  kind:             EntityKind::Member,
  mode:             LoadMode::Append,
  stream:           "members",
  production_table: "members_raw",
  staging_table:    "members_raw_stg",
  columns:          &[
    col("client_code", Text),
    col("member_id", Text),
    col("club_member_key", Text),
    col("first_name", Text),
    col("last_name", Text),
    col("gender", Text),
    col("date_of_birth", Date),
    col("email", Text),
    col("phone_number", Text),
    col("membership_type", Text),
    col("updated_at", Timestamp),
  ],
  natural_key:      &["client_code", "member_id"],
  // A member is "the same fact" only while the profile is unchanged, so an
  // edited profile survives the already-loaded check and reaches the merge.
  dedup_key:        &[
    "client_code",
    "member_id",
    "club_member_key",
    "first_name",
    "last_name",
    "gender",
    "date_of_birth",
    "email",
    "phone_number",
    "membership_type",
  ],
  freshness:        "updated_at",
  cancellation:     None,
  partition:        &["client_code"],
};

pub static RESERVATION: EntitySchema = EntitySchema {
  kind:             EntityKind::Reservation,
  mode:             LoadMode::Append,
  stream:           "reservations",
  production_table: "reservations_raw",
  staging_table:    "reservations_raw_stg",
  columns:          &[
    col("client_code", Text),
    col("reservation_id", Text),
    col("member_id", Text),
    col("event_id", Text),
    col("reservation_created_at", Timestamp),
    col("reservation_updated_at", Timestamp),
    col("reservation_start_at", Timestamp),
    col("reservation_end_at", Timestamp),
    col("reservation_cancelled_at", Timestamp),
  ],
  natural_key:      &["client_code", "reservation_id", "member_id"],
  dedup_key:        &[
    "event_id",
    "reservation_start_at",
    "reservation_created_at",
    "member_id",
  ],
  freshness:        "reservation_updated_at",
  cancellation:     Some("reservation_cancelled_at"),
  partition:        &["client_code"],
};

pub static CANCELLATION: EntitySchema = EntitySchema {
  kind:             EntityKind::Cancellation,
  mode:             LoadMode::Append,
  stream:           "reservation_cancellations",
  production_table: "reservation_cancellations_raw",
  staging_table:    "reservation_cancellations_raw_stg",
  columns:          &[
    col("client_code", Text),
    col("reservation_id", Text),
    col("member_id", Text),
    col("cancelled_on", Timestamp),
    col("event_id", Text),
    col("reservation_type", Text),
    col("reservation_created_at", Timestamp),
    col("reservation_start_at", Timestamp),
    col("reservation_end_at", Timestamp),
    col("program_name", Text),
    col("player_name", Text),
    col("player_email", Text),
    col("player_phone", Text),
    col("fee", Real),
    col("is_team_event", Bool),
    col("event_category_id", Text),
    col("event_category_name", Text),
  ],
  natural_key:      &["client_code", "reservation_id", "member_id", "cancelled_on"],
  dedup_key:        &[
    "client_code",
    "event_id",
    "reservation_start_at",
    "cancelled_on",
    "member_id",
  ],
  freshness:        "cancelled_on",
  cancellation:     None,
  partition:        &["client_code"],
};

pub static EVENT: EntitySchema = EntitySchema {
  kind:             EntityKind::Event,
  mode:             LoadMode::Replace,
  stream:           "facility_events",
  production_table: "facility_events_raw",
  staging_table:    "facility_events_raw_stg",
  columns:          &[
    col("client_code", Text),
    col("source_system", Text),
    col("event_id", Text),
    col("event_start_time", Timestamp),
    col("event_end_time", Timestamp),
    col("event_name", Text),
    col("event_description", Text),
    col("event_type", Text),
    col("num_registrants", Integer),
    col("max_registrants", Integer),
    col("admission_rate_regular", Real),
    col("admission_rate_member", Real),
  ],
  natural_key:      &["client_code", "source_system", "event_id", "event_start_time"],
  dedup_key:        &["client_code", "source_system", "event_id", "event_start_time"],
  freshness:        "event_start_time",
  cancellation:     None,
  partition:        &["client_code", "source_system"],
};

pub static AVAILABILITY_SESSION: EntitySchema = EntitySchema {
  kind:             EntityKind::AvailabilitySession,
  mode:             LoadMode::Replace,
  stream:           "court_availability",
  production_table: "facility_court_availabilities",
  staging_table:    "facility_court_availabilities_stg",
  columns:          &[
    col("client_code", Text),
    col("source_system", Text),
    col("court_id", Text),
    col("slot_start", Timestamp),
    col("slot_end", Timestamp),
    col("court_name", Text),
    col("period_type", Text),
  ],
  natural_key:      &["client_code", "source_system", "court_id", "slot_start"],
  dedup_key:        &["client_code", "source_system", "court_id", "slot_start"],
  freshness:        "slot_start",
  cancellation:     None,
  partition:        &["client_code", "source_system"],
};

#[cfg(test)]
mod tests {
  use strum::IntoEnumIterator as _;

  use super::*;

  #[test]
  fn every_declared_key_column_exists() {
    for kind in EntityKind::iter() {
      let schema = kind.schema();
      assert_eq!(schema.kind, kind);
      let named = schema
        .natural_key
        .iter()
        .chain(schema.dedup_key)
        .chain(schema.partition)
        .chain(std::iter::once(&schema.freshness))
        .chain(schema.cancellation.iter());
      for column in named {
        assert!(schema.position(column).is_some(), "{kind}: {column}");
      }
    }
  }

  #[test]
  fn partition_columns_are_part_of_the_natural_key() {
    for kind in EntityKind::iter() {
      let schema = kind.schema();
      for column in schema.partition {
        assert!(schema.natural_key.contains(column), "{kind}: {column}");
      }
    }
  }

  #[test]
  fn kinds_parse_from_snake_case() {
    assert_eq!(
      "availability_session".parse::<EntityKind>().unwrap(),
      EntityKind::AvailabilitySession
    );
    assert_eq!(EntityKind::Cancellation.to_string(), "cancellation");
    assert_eq!(EntityKind::Event.mode(), LoadMode::Replace);
  }
}
