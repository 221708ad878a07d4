//! The `Warehouse` trait and supporting types.
//!
//! The trait is implemented by storage backends (e.g.
//! `courtsync-store-sqlite`). The reconciler and the CLI jobs depend on this
//! abstraction, not on any concrete backend. Every staging operation is
//! scoped to one [`Partition`] so that runs for different clients never
//! touch each other's rows.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  availability::{Court, OperatingHours},
  entity::EntityKind,
  record::CanonicalRecord,
  watermark::Watermark,
};

// ─── Partition ───────────────────────────────────────────────────────────────

/// The slice of a table one run owns: a client, and for replace-mode kinds
/// also the vendor system that produced the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
  pub client_code:   String,
  pub source_system: Option<String>,
}

impl Partition {
  pub fn client(client_code: impl Into<String>) -> Self {
    Self { client_code: client_code.into(), source_system: None }
  }

  pub fn snapshot(
    client_code: impl Into<String>,
    source_system: impl Into<String>,
  ) -> Self {
    Self {
      client_code:   client_code.into(),
      source_system: Some(source_system.into()),
    }
  }

  /// The partition's value for a partition column, if it has one.
  pub fn value(&self, column: &str) -> Option<&str> {
    match column {
      "client_code" => Some(&self.client_code),
      "source_system" => self.source_system.as_deref(),
      _ => None,
    }
  }
}

/// Row counts of a replace-mode swap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwapOutcome {
  pub deleted:  u64,
  pub inserted: u64,
}

/// Row counts of a cancellation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelOutcome {
  /// Production rows removed.
  pub deleted:   u64,
  /// Staged rows withdrawn from the merge.
  pub withdrawn: u64,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the booking warehouse.
///
/// Methods take owned arguments and return `Send` futures so backends can
/// move work onto a blocking thread.
pub trait Warehouse: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Watermarks ────────────────────────────────────────────────────────

  fn get_watermark(
    &self,
    source_name: String,
  ) -> impl Future<Output = Result<Option<Watermark>, Self::Error>> + Send + '_;

  /// Set `last_loaded_at` to now, creating the row if needed. A `Some`
  /// freshness becomes `last_record_created_at`; `None` leaves it.
  fn advance_watermark(
    &self,
    source_name: String,
    observed_max_freshness: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<Watermark, Self::Error>> + Send + '_;

  // ── Staging ───────────────────────────────────────────────────────────

  /// Delete every staged row of the partition. Returns rows removed.
  fn clear_staging(
    &self,
    kind: EntityKind,
    partition: Partition,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Upsert records into staging on the natural key. Each call's rows are
  /// ordered after everything staged before it.
  fn stage_records(
    &self,
    kind: EntityKind,
    records: Vec<CanonicalRecord>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Keep one staged row per dedup key: latest freshness, NULLs last, then
  /// latest staged. Returns rows removed.
  fn dedup_staging(
    &self,
    kind: EntityKind,
    partition: Partition,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// For kinds with a cancellation column: delete production rows whose
  /// natural key is staged with that column set, and withdraw those staged
  /// rows. A no-op for other kinds.
  fn delete_cancelled(
    &self,
    kind: EntityKind,
    partition: Partition,
  ) -> impl Future<Output = Result<CancelOutcome, Self::Error>> + Send + '_;

  /// Drop staged rows whose dedup tuple already exists in production,
  /// comparing NULLs as equal. Returns rows removed.
  fn discard_already_loaded(
    &self,
    kind: EntityKind,
    partition: Partition,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn max_staged_freshness(
    &self,
    kind: EntityKind,
    partition: Partition,
  ) -> impl Future<Output = Result<Option<DateTime<Utc>>, Self::Error>> + Send + '_;

  /// Upsert the partition's staged rows into production. On conflict,
  /// non-key columns are overwritten unless the incoming value is NULL.
  fn merge_staging(
    &self,
    kind: EntityKind,
    partition: Partition,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Atomically replace the partition's production rows with its staged
  /// rows. On failure production is left untouched.
  fn swap_partition(
    &self,
    kind: EntityKind,
    partition: Partition,
  ) -> impl Future<Output = Result<SwapOutcome, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Production rows of the partition, ordered by natural key.
  fn production_rows(
    &self,
    kind: EntityKind,
    partition: Partition,
  ) -> impl Future<Output = Result<Vec<CanonicalRecord>, Self::Error>> + Send + '_;

  /// Courts of a client, in display order.
  fn courts(
    &self,
    client_code: String,
  ) -> impl Future<Output = Result<Vec<Court>, Self::Error>> + Send + '_;

  /// Operating hours configured for a client on a source system. `None`
  /// when the organization has no hours on file.
  fn operating_hours(
    &self,
    client_code: String,
    source_system: String,
  ) -> impl Future<Output = Result<Option<OperatingHours>, Self::Error>> + Send + '_;
}
