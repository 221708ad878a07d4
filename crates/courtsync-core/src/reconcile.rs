//! The staging reconciler.
//!
//! Moves one batch of normalized records into production through the
//! warehouse's staging area, then advances the source's watermark.
//!
//! * **Append** kinds go clear, stage, dedup, cancel, discard-loaded, merge,
//!   advance.
//! * **Replace** kinds go clear, stage, swap, advance.
//!
//! Both end by clearing staging whether or not an earlier step failed.
//! A failed run leaves the watermark where it was, so re-running the same
//! window is always safe.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{Instrument as _, info, info_span, warn};
use uuid::Uuid;

use crate::{
  Error, Result, dedup,
  entity::{EntityKind, LoadMode},
  record::CanonicalRecord,
  store::{Partition, Warehouse},
  watermark::Watermark,
};

/// Rows per staging insert.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
  pub chunk_size: usize,
  /// `false` performs a dry run: nothing is written anywhere.
  pub write:      bool,
}

impl Default for ReconcileOptions {
  fn default() -> Self { Self { chunk_size: DEFAULT_CHUNK_SIZE, write: true } }
}

/// What one reconciliation did. Counts mirror the per-step log events.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
  pub run_id:         Uuid,
  pub kind:           EntityKind,
  pub mode:           LoadMode,
  pub source_name:    String,
  pub client_code:    String,
  pub dry_run:        bool,
  /// Records handed to the reconciler.
  pub received:       usize,
  /// Records dropped before staging as data errors.
  pub rejected:       usize,
  /// Rows written to staging (or that would have been, on a dry run).
  pub staged:         u64,
  /// Staged rows removed as intra-batch duplicates.
  pub duplicates:     u64,
  /// Production rows deleted because a staged row cancelled them.
  pub cancelled:      u64,
  /// Staged rows whose dedup tuple was already in production.
  pub already_loaded: u64,
  /// Rows upserted into production (append) or inserted by the swap
  /// (replace).
  pub merged:         u64,
  /// Production rows removed by a replace-mode swap.
  pub replaced:       u64,
  pub max_freshness:  Option<DateTime<Utc>>,
  /// The watermark after the run; `None` on a dry run.
  pub watermark:      Option<Watermark>,
}

impl ReconcileReport {
  fn new(
    kind: EntityKind,
    partition: &Partition,
    source_name: &str,
    received: usize,
    dry_run: bool,
  ) -> Self {
    Self {
      run_id: Uuid::new_v4(),
      kind,
      mode: kind.mode(),
      source_name: source_name.to_owned(),
      client_code: partition.client_code.clone(),
      dry_run,
      received,
      rejected: 0,
      staged: 0,
      duplicates: 0,
      cancelled: 0,
      already_loaded: 0,
      merged: 0,
      replaced: 0,
      max_freshness: None,
      watermark: None,
    }
  }
}

fn elapsed_ms(since: Instant) -> u64 { since.elapsed().as_millis() as u64 }

/// Split `records` into owned chunks of at most `size`.
fn into_chunks(
  mut records: Vec<CanonicalRecord>,
  size: usize,
) -> Vec<Vec<CanonicalRecord>> {
  let size = size.max(1);
  let mut chunks = Vec::with_capacity(records.len().div_ceil(size));
  while !records.is_empty() {
    let tail = records.split_off(size.min(records.len()));
    chunks.push(std::mem::replace(&mut records, tail));
  }
  chunks
}

// ─── Reconciler ──────────────────────────────────────────────────────────────

pub struct Reconciler<'w, W> {
  warehouse: &'w W,
  options:   ReconcileOptions,
}

impl<'w, W: Warehouse> Reconciler<'w, W> {
  pub fn new(warehouse: &'w W, options: ReconcileOptions) -> Self {
    Self { warehouse, options }
  }

  /// Reconcile an append-mode batch for one client.
  pub async fn append(
    &self,
    kind: EntityKind,
    partition: &Partition,
    source_name: &str,
    records: Vec<CanonicalRecord>,
  ) -> Result<ReconcileReport> {
    if kind.mode() != LoadMode::Append {
      return Err(Error::WrongLoadMode(kind, "append"));
    }
    let mut report = ReconcileReport::new(
      kind,
      partition,
      source_name,
      records.len(),
      !self.options.write,
    );
    let span = info_span!(
      "reconcile",
      run_id = %report.run_id,
      source = source_name,
      client_code = %partition.client_code,
      %kind,
    );

    async move {
      let records = screen(kind, partition, records, &mut report)?;
      if !self.options.write {
        let survivors = dedup::latest_per_dedup_key(records.clone())?;
        report.staged = records.len() as u64;
        report.duplicates = (records.len() - survivors.len()) as u64;
        report.max_freshness =
          survivors.iter().filter_map(CanonicalRecord::freshness).max();
        info!(
          staged = report.staged,
          duplicates = report.duplicates,
          "dry run; nothing written"
        );
        return Ok(report);
      }

      let outcome =
        self.run_append(kind, partition, source_name, records, &mut report).await;
      self.finish(kind, partition, outcome).await?;
      info!(
        staged = report.staged,
        merged = report.merged,
        cancelled = report.cancelled,
        "reconciliation complete"
      );
      Ok(report)
    }
    .instrument(span)
    .await
  }

  async fn run_append(
    &self,
    kind: EntityKind,
    partition: &Partition,
    source_name: &str,
    records: Vec<CanonicalRecord>,
    report: &mut ReconcileReport,
  ) -> Result<()> {
    let wh = self.warehouse;

    let t = Instant::now();
    let leftover = wh
      .clear_staging(kind, partition.clone())
      .await
      .map_err(Error::warehouse)?;
    info!(step = "clear", removed = leftover, elapsed_ms = elapsed_ms(t), "cleared staging");

    self.stage(kind, records, report).await?;

    let t = Instant::now();
    report.duplicates = wh
      .dedup_staging(kind, partition.clone())
      .await
      .map_err(Error::warehouse)?;
    info!(
      step = "dedup",
      removed = report.duplicates,
      elapsed_ms = elapsed_ms(t),
      "removed intra-batch duplicates"
    );

    if kind.schema().cancellation.is_some() {
      let t = Instant::now();
      let cancel = wh
        .delete_cancelled(kind, partition.clone())
        .await
        .map_err(Error::warehouse)?;
      report.cancelled = cancel.deleted;
      info!(
        step = "cancel",
        deleted = cancel.deleted,
        withdrawn = cancel.withdrawn,
        elapsed_ms = elapsed_ms(t),
        "applied cancellations"
      );
    }

    let t = Instant::now();
    report.already_loaded = wh
      .discard_already_loaded(kind, partition.clone())
      .await
      .map_err(Error::warehouse)?;
    info!(
      step = "discard_loaded",
      removed = report.already_loaded,
      elapsed_ms = elapsed_ms(t),
      "dropped rows already in production"
    );

    report.max_freshness = wh
      .max_staged_freshness(kind, partition.clone())
      .await
      .map_err(Error::warehouse)?;

    let t = Instant::now();
    report.merged = wh
      .merge_staging(kind, partition.clone())
      .await
      .map_err(Error::warehouse)?;
    info!(
      step = "merge",
      merged = report.merged,
      elapsed_ms = elapsed_ms(t),
      "merged staging into production"
    );

    self.advance(source_name, report).await
  }

  /// Reconcile a full snapshot for one (client, source system).
  pub async fn replace(
    &self,
    kind: EntityKind,
    partition: &Partition,
    source_name: &str,
    records: Vec<CanonicalRecord>,
  ) -> Result<ReconcileReport> {
    if kind.mode() != LoadMode::Replace {
      return Err(Error::WrongLoadMode(kind, "replace"));
    }
    for &column in kind.schema().partition {
      if partition.value(column).is_none() {
        return Err(Error::IncompletePartition { kind, column });
      }
    }
    let mut report = ReconcileReport::new(
      kind,
      partition,
      source_name,
      records.len(),
      !self.options.write,
    );
    let span = info_span!(
      "reconcile",
      run_id = %report.run_id,
      source = source_name,
      client_code = %partition.client_code,
      source_system = partition.source_system.as_deref(),
      %kind,
    );

    async move {
      let screened = screen(kind, partition, records, &mut report)?;
      let before = screened.len();
      let snapshot = dedup::last_per_natural_key(screened)?;
      report.duplicates = (before - snapshot.len()) as u64;
      report.max_freshness =
        snapshot.iter().filter_map(CanonicalRecord::freshness).max();

      if !self.options.write {
        report.staged = snapshot.len() as u64;
        info!(staged = report.staged, "dry run; nothing written");
        return Ok(report);
      }

      let outcome = self
        .run_replace(kind, partition, source_name, snapshot, &mut report)
        .await;
      self.finish(kind, partition, outcome).await?;
      info!(
        replaced = report.replaced,
        inserted = report.merged,
        "snapshot swapped"
      );
      Ok(report)
    }
    .instrument(span)
    .await
  }

  async fn run_replace(
    &self,
    kind: EntityKind,
    partition: &Partition,
    source_name: &str,
    snapshot: Vec<CanonicalRecord>,
    report: &mut ReconcileReport,
  ) -> Result<()> {
    let wh = self.warehouse;
    wh.clear_staging(kind, partition.clone())
      .await
      .map_err(Error::warehouse)?;
    self.stage(kind, snapshot, report).await?;

    let t = Instant::now();
    let swap = wh
      .swap_partition(kind, partition.clone())
      .await
      .map_err(Error::warehouse)?;
    report.replaced = swap.deleted;
    report.merged = swap.inserted;
    info!(
      step = "swap",
      deleted = swap.deleted,
      inserted = swap.inserted,
      elapsed_ms = elapsed_ms(t),
      "replaced production partition"
    );

    self.advance(source_name, report).await
  }

  async fn stage(
    &self,
    kind: EntityKind,
    records: Vec<CanonicalRecord>,
    report: &mut ReconcileReport,
  ) -> Result<()> {
    let t = Instant::now();
    for chunk in into_chunks(records, self.options.chunk_size) {
      report.staged += self
        .warehouse
        .stage_records(kind, chunk)
        .await
        .map_err(Error::warehouse)?;
    }
    info!(step = "stage", staged = report.staged, elapsed_ms = elapsed_ms(t), "staged batch");
    Ok(())
  }

  async fn advance(
    &self,
    source_name: &str,
    report: &mut ReconcileReport,
  ) -> Result<()> {
    let watermark = self
      .warehouse
      .advance_watermark(source_name.to_owned(), report.max_freshness)
      .await
      .map_err(Error::warehouse)?;
    info!(
      step = "watermark",
      last_loaded_at = %watermark.last_loaded_at,
      last_record_created_at = ?watermark.last_record_created_at,
      "advanced watermark"
    );
    report.watermark = Some(watermark);
    Ok(())
  }

  /// Clear staging after a run, successful or not. The run's own error
  /// takes precedence over a cleanup error.
  async fn finish(
    &self,
    kind: EntityKind,
    partition: &Partition,
    outcome: Result<()>,
  ) -> Result<()> {
    let cleared = self
      .warehouse
      .clear_staging(kind, partition.clone())
      .await
      .map_err(Error::warehouse);
    match (outcome, cleared) {
      (Ok(()), Ok(_)) => Ok(()),
      (Ok(()), Err(e)) => Err(e),
      (Err(e), Ok(_)) => {
        warn!(error = %e, "reconciliation failed; staging cleared");
        Err(e)
      }
      (Err(e), Err(cleanup)) => {
        warn!(error = %e, cleanup = %cleanup, "reconciliation failed; staging not cleared");
        Err(e)
      }
    }
  }
}

/// Drop records that cannot be loaded into `partition`: the wrong kind, a
/// blank natural-key component, or partition columns belonging to someone
/// else. Each drop is logged and counted; the batch carries on.
fn screen(
  kind: EntityKind,
  partition: &Partition,
  records: Vec<CanonicalRecord>,
  report: &mut ReconcileReport,
) -> Result<Vec<CanonicalRecord>> {
  let schema = kind.schema();
  let mut kept = Vec::with_capacity(records.len());

  for record in records {
    if record.kind() != kind {
      warn!(record_kind = %record.kind(), "dropping record of another kind");
      report.rejected += 1;
      continue;
    }
    if let Err(e) = record.validate() {
      warn!(error = %e, "dropping invalid record");
      report.rejected += 1;
      continue;
    }

    let row = record.to_row()?;
    let foreign = schema.partition.iter().find(|&&column| {
      let actual = schema
        .position(column)
        .and_then(|i| row.get(i))
        .and_then(|v| v.key_part());
      actual.as_deref() != partition.value(column)
    });
    if let Some(column) = foreign {
      warn!(column, "dropping record outside the run's partition");
      report.rejected += 1;
      continue;
    }

    kept.push(record);
  }
  Ok(kept)
}
