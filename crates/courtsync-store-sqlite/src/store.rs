//! [`SqliteStore`], the SQLite implementation of [`Warehouse`].

use chrono::{DateTime, Utc};
use courtsync_core::{
  availability::{Court, OperatingHours},
  entity::{EntityKind, EntitySchema},
  record::CanonicalRecord,
  store::{CancelOutcome, Partition, SwapOutcome, Warehouse},
  watermark::Watermark,
};
use rusqlite::{OptionalExtension as _, params_from_iter, types::Value};
use tracing::debug;

use crate::{
  Error, Result,
  encode::{RawWatermark, court_from_row, decode_dt, decode_record, encode_dt, encode_record},
  schema::schema_ddl,
  sql::{self, ident, is_valid_schema_name, qualified},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A warehouse backed by SQLite.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:   tokio_rusqlite::Connection,
  schema: String,
}

impl SqliteStore {
  /// Open (or create) the warehouse at `dsn` with all tables in `schema`.
  ///
  /// `dsn` is a file path, optionally prefixed with `sqlite://`, or
  /// `:memory:`. The `main` schema opens the file directly; any other name
  /// attaches the file under that name.
  pub async fn open(dsn: &str, schema: &str) -> Result<Self> {
    if !is_valid_schema_name(schema) {
      return Err(Error::InvalidSchemaName(schema.to_owned()));
    }
    let path = dsn.strip_prefix("sqlite://").unwrap_or(dsn).to_owned();

    let conn = if schema == "main" {
      tokio_rusqlite::Connection::open(&path).await?
    } else {
      let conn = tokio_rusqlite::Connection::open_in_memory().await?;
      let attach = format!("ATTACH DATABASE ?1 AS {}", ident(schema));
      conn
        .call(move |conn| {
          conn.execute(&attach, [path])?;
          Ok(())
        })
        .await?;
      conn
    };

    let store = Self { conn, schema: schema.to_owned() };
    store.init_schema().await?;
    debug!(dsn, schema, "warehouse schema ready");
    Ok(store)
  }

  /// Open an in-memory warehouse.
  pub async fn open_in_memory(schema: &str) -> Result<Self> {
    Self::open(":memory:", schema).await
  }

  async fn init_schema(&self) -> Result<()> {
    let ddl = schema_ddl(&self.schema);
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&ddl)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  fn table(&self, name: &str) -> String { qualified(&self.schema, name) }

  /// Run one partition-scoped statement; returns rows changed.
  async fn execute_partitioned(
    &self,
    entity: &EntitySchema,
    partition: &Partition,
    statement: String,
  ) -> Result<u64> {
    let params = sql::partition_params(entity, partition)?;
    let changed = self
      .conn
      .call(move |conn| Ok(conn.execute(&statement, params_from_iter(params.iter()))?))
      .await?;
    Ok(changed as u64)
  }

  // ── Reference data ────────────────────────────────────────────────────

  /// Insert or replace a court definition.
  pub async fn upsert_court(&self, court: &Court) -> Result<()> {
    let statement = format!(
      "INSERT INTO {} (id, client_code, label, type_name, order_index)
       VALUES (?1, ?2, ?3, ?4, ?5)
       ON CONFLICT (client_code, id) DO UPDATE SET
         label = excluded.label,
         type_name = excluded.type_name,
         order_index = excluded.order_index",
      self.table("courts")
    );
    let court = court.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          &statement,
          rusqlite::params![
            court.id,
            court.client_code,
            court.label,
            court.type_name,
            court.order_index,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Store an organization's operating-hours document.
  pub async fn set_operating_hours(
    &self,
    client_code: &str,
    source_system: &str,
    hours: &serde_json::Value,
  ) -> Result<()> {
    // Reject documents the availability job could not use.
    OperatingHours::from_json(hours)?;

    let statement = format!(
      "INSERT INTO {} (client_code, source_system_code, operating_hours)
       VALUES (?1, ?2, ?3)
       ON CONFLICT (client_code, source_system_code) DO UPDATE SET
         operating_hours = excluded.operating_hours",
      self.table("organizations")
    );
    let (client_code, source_system, doc) =
      (client_code.to_owned(), source_system.to_owned(), hours.to_string());
    self
      .conn
      .call(move |conn| {
        conn.execute(&statement, rusqlite::params![client_code, source_system, doc])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run arbitrary SQL against the store. Tests use it to inject faults.
  #[cfg(test)]
  pub(crate) async fn execute_batch(&self, batch: String) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&batch)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  #[cfg(test)]
  pub(crate) fn schema_name(&self) -> &str { &self.schema }

  #[cfg(test)]
  pub(crate) async fn staged_count(&self, kind: EntityKind) -> Result<i64> {
    let statement = format!("SELECT COUNT(*) FROM {}", self.table(kind.schema().staging_table));
    Ok(self.conn.call(move |conn| Ok(conn.query_row(&statement, [], |r| r.get(0))?)).await?)
  }
}

fn check_kind(expected: EntityKind, records: &[CanonicalRecord]) -> Result<()> {
  match records.iter().find(|r| r.kind() != expected) {
    Some(r) => Err(Error::KindMismatch { expected, found: r.kind() }),
    None => Ok(()),
  }
}

// ─── Warehouse impl ──────────────────────────────────────────────────────────

impl Warehouse for SqliteStore {
  type Error = Error;

  // ── Watermarks ────────────────────────────────────────────────────────────

  async fn get_watermark(&self, source_name: String) -> Result<Option<Watermark>> {
    let statement = format!(
      "SELECT source_name, last_loaded_at, last_record_created_at
       FROM {} WHERE source_name = ?1",
      self.table("elt_watermarks")
    );
    let raw: Option<RawWatermark> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(&statement, [source_name], |row| {
            Ok(RawWatermark {
              source_name:            row.get(0)?,
              last_loaded_at:         row.get(1)?,
              last_record_created_at: row.get(2)?,
            })
          })
          .optional()?)
      })
      .await?;

    raw.map(RawWatermark::into_watermark).transpose()
  }

  async fn advance_watermark(
    &self,
    source_name: String,
    observed_max_freshness: Option<DateTime<Utc>>,
  ) -> Result<Watermark> {
    let table = self.table("elt_watermarks");
    // `last_loaded_at` only moves forward. A run's freshness replaces the
    // stored one; a NULL freshness keeps it.
    let upsert = format!(
      "INSERT INTO {table} (source_name, last_loaded_at, last_record_created_at)
       VALUES (?1, ?2, ?3)
       ON CONFLICT (source_name) DO UPDATE SET
         last_loaded_at = MAX(
           COALESCE(last_loaded_at, excluded.last_loaded_at),
           excluded.last_loaded_at
         ),
         last_record_created_at = COALESCE(
           excluded.last_record_created_at,
           last_record_created_at
         )"
    );
    let select = format!(
      "SELECT source_name, last_loaded_at, last_record_created_at
       FROM {table} WHERE source_name = ?1"
    );
    let now = encode_dt(Utc::now());
    let freshness = observed_max_freshness.map(encode_dt);

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(&upsert, rusqlite::params![source_name, now, freshness])?;
        let raw = tx.query_row(&select, [&source_name], |row| {
          Ok(RawWatermark {
            source_name:            row.get(0)?,
            last_loaded_at:         row.get(1)?,
            last_record_created_at: row.get(2)?,
          })
        })?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    raw.into_watermark()
  }

  // ── Staging ───────────────────────────────────────────────────────────────

  async fn clear_staging(&self, kind: EntityKind, partition: Partition) -> Result<u64> {
    let entity = kind.schema();
    self
      .execute_partitioned(entity, &partition, sql::clear_staging(&self.schema, entity))
      .await
  }

  async fn stage_records(
    &self,
    kind: EntityKind,
    records: Vec<CanonicalRecord>,
  ) -> Result<u64> {
    check_kind(kind, &records)?;
    let entity = kind.schema();
    let rows = records.iter().map(encode_record).collect::<Result<Vec<_>>>()?;
    let insert = sql::stage_row(&self.schema, entity);
    let next_seq = sql::next_stage_seq(&self.schema, entity);
    let staged_at = encode_dt(Utc::now());

    let staged = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut seq: i64 = tx.query_row(&next_seq, [], |r| r.get(0))?;
        let mut staged = 0;
        {
          let mut stmt = tx.prepare(&insert)?;
          for row in rows {
            let tail = [Value::Integer(seq), Value::Text(staged_at.clone())];
            staged += stmt.execute(params_from_iter(row.into_iter().chain(tail)))?;
            seq += 1;
          }
        }
        tx.commit()?;
        Ok(staged)
      })
      .await?;
    Ok(staged as u64)
  }

  async fn dedup_staging(&self, kind: EntityKind, partition: Partition) -> Result<u64> {
    let entity = kind.schema();
    self
      .execute_partitioned(entity, &partition, sql::dedup_staging(&self.schema, entity))
      .await
  }

  async fn delete_cancelled(
    &self,
    kind: EntityKind,
    partition: Partition,
  ) -> Result<CancelOutcome> {
    let entity = kind.schema();
    let (Some(delete), Some(withdraw)) = (
      sql::delete_cancelled_production(&self.schema, entity),
      sql::withdraw_cancelled(&self.schema, entity),
    ) else {
      return Ok(CancelOutcome::default());
    };
    let params = sql::partition_params(entity, &partition)?;

    let (deleted, withdrawn) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let deleted = tx.execute(&delete, params_from_iter(params.iter()))?;
        let withdrawn = tx.execute(&withdraw, params_from_iter(params.iter()))?;
        tx.commit()?;
        Ok((deleted, withdrawn))
      })
      .await?;

    Ok(CancelOutcome { deleted: deleted as u64, withdrawn: withdrawn as u64 })
  }

  async fn discard_already_loaded(
    &self,
    kind: EntityKind,
    partition: Partition,
  ) -> Result<u64> {
    let entity = kind.schema();
    self
      .execute_partitioned(
        entity,
        &partition,
        sql::discard_already_loaded(&self.schema, entity),
      )
      .await
  }

  async fn max_staged_freshness(
    &self,
    kind: EntityKind,
    partition: Partition,
  ) -> Result<Option<DateTime<Utc>>> {
    let entity = kind.schema();
    let params = sql::partition_params(entity, &partition)?;
    let statement = sql::max_staged_freshness(&self.schema, entity);
    let max: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(&statement, params_from_iter(params.iter()), |r| r.get(0))?)
      })
      .await?;
    max.as_deref().map(decode_dt).transpose()
  }

  async fn merge_staging(&self, kind: EntityKind, partition: Partition) -> Result<u64> {
    let entity = kind.schema();
    self
      .execute_partitioned(entity, &partition, sql::merge_staging(&self.schema, entity))
      .await
  }

  async fn swap_partition(
    &self,
    kind: EntityKind,
    partition: Partition,
  ) -> Result<SwapOutcome> {
    let entity = kind.schema();
    let params = sql::partition_params(entity, &partition)?;
    let delete = sql::delete_production_partition(&self.schema, entity);
    let copy = sql::copy_staging_partition(&self.schema, entity);

    // Dropping the transaction without committing rolls it back.
    let (deleted, inserted) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let deleted = tx.execute(&delete, params_from_iter(params.iter()))?;
        let inserted = tx.execute(&copy, params_from_iter(params.iter()))?;
        tx.commit()?;
        Ok((deleted, inserted))
      })
      .await?;

    Ok(SwapOutcome { deleted: deleted as u64, inserted: inserted as u64 })
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn production_rows(
    &self,
    kind: EntityKind,
    partition: Partition,
  ) -> Result<Vec<CanonicalRecord>> {
    let entity = kind.schema();
    let params = sql::partition_params(entity, &partition)?;
    let statement = sql::select_production(&self.schema, entity);
    let width = entity.columns.len();

    let raws: Vec<Vec<Value>> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&statement)?;
        let rows = stmt
          .query_map(params_from_iter(params.iter()), |row| {
            (0..width)
              .map(|i| row.get::<_, Value>(i))
              .collect::<rusqlite::Result<Vec<Value>>>()
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(|raw| decode_record(entity, raw)).collect()
  }

  async fn courts(&self, client_code: String) -> Result<Vec<Court>> {
    let statement = format!(
      "SELECT id, client_code, label, type_name, order_index
       FROM {} WHERE client_code = ?1
       ORDER BY order_index IS NULL, order_index, label",
      self.table("courts")
    );
    let courts = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&statement)?;
        let rows = stmt
          .query_map([client_code], court_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(courts)
  }

  async fn operating_hours(
    &self,
    client_code: String,
    source_system: String,
  ) -> Result<Option<OperatingHours>> {
    let statement = format!(
      "SELECT operating_hours FROM {}
       WHERE client_code = ?1 AND source_system_code = ?2",
      self.table("organizations")
    );
    let doc: Option<Option<String>> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(&statement, [client_code, source_system], |r| r.get(0))
          .optional()?)
      })
      .await?;

    let Some(doc) = doc.flatten() else {
      return Ok(None);
    };
    let json: serde_json::Value = serde_json::from_str(&doc)?;
    Ok(Some(OperatingHours::from_json(&json)?))
  }
}
