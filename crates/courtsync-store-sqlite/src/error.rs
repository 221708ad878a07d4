//! Error type for `courtsync-store-sqlite`.

use courtsync_core::entity::EntityKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] courtsync_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("column {column:?} holds an unexpected value: {value}")]
  Decode { column: &'static str, value: String },

  #[error("expected {expected} records, got {found}")]
  KindMismatch { expected: EntityKind, found: EntityKind },

  /// Schema names are interpolated into SQL, so only plain identifiers are
  /// accepted.
  #[error("invalid schema name: {0:?}")]
  InvalidSchemaName(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
