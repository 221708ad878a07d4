//! Error types for `courtsync-core`.

use thiserror::Error;

use crate::entity::EntityKind;

#[derive(Debug, Error)]
pub enum Error {
  #[error("window step must be positive, got {0}")]
  NonPositiveStep(chrono::TimeDelta),

  #[error("{kind} record is missing natural-key field {field:?}")]
  MissingKeyField { kind: EntityKind, field: &'static str },

  #[error("{kind} has no column {column:?}")]
  UnknownColumn { kind: EntityKind, column: String },

  #[error("column {column:?} could not be decoded: {reason}")]
  ColumnDecode { column: &'static str, reason: String },

  #[error("invalid operating hours: {0}")]
  InvalidOperatingHours(String),

  #[error("unknown timezone: {0:?}")]
  UnknownTimezone(String),

  #[error("{0} cannot be reconciled in {1} mode")]
  WrongLoadMode(EntityKind, &'static str),

  #[error("{kind} partition has no value for {column:?}")]
  IncompletePartition { kind: EntityKind, column: &'static str },

  #[error("warehouse error: {0}")]
  Warehouse(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Box a backend error raised by a [`crate::store::Warehouse`] call.
  pub fn warehouse<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Warehouse(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
