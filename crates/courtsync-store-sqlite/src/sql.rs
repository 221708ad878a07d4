//! SQL generated from entity descriptors.
//!
//! Every statement that touches a staging table is filtered to one
//! partition. Partition values bind to `?1..?k` in the order of
//! [`EntitySchema::partition`]; see [`partition_params`].

use courtsync_core::{
  entity::{Column, EntitySchema},
  store::Partition,
};

// ─── Identifiers ─────────────────────────────────────────────────────────────

pub fn ident(name: &str) -> String { format!("\"{}\"", name.replace('"', "\"\"")) }

pub fn qualified(schema: &str, table: &str) -> String {
  format!("{}.{}", ident(schema), ident(table))
}

/// SQLite schema names are spliced into statements, so accept plain
/// identifiers only.
pub fn is_valid_schema_name(name: &str) -> bool {
  let mut chars = name.chars();
  chars
    .next()
    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
  names.into_iter().map(ident).collect::<Vec<_>>().join(", ")
}

fn all_columns(entity: &EntitySchema) -> String {
  list(entity.columns.iter().map(|c| c.name))
}

// ─── Partitions ──────────────────────────────────────────────────────────────

/// `"client_code" = ?1 AND ...`
fn partition_filter(entity: &EntitySchema) -> String {
  entity
    .partition
    .iter()
    .enumerate()
    .map(|(i, col)| format!("{} = ?{}", ident(col), i + 1))
    .collect::<Vec<_>>()
    .join(" AND ")
}

/// Bind values for [`partition_filter`].
pub fn partition_params(
  entity: &EntitySchema,
  partition: &Partition,
) -> courtsync_core::Result<Vec<String>> {
  entity
    .partition
    .iter()
    .map(|&column| {
      partition.value(column).map(str::to_owned).ok_or(
        courtsync_core::Error::IncompletePartition { kind: entity.kind, column },
      )
    })
    .collect()
}

// ─── Staging ─────────────────────────────────────────────────────────────────

/// Upsert one row into staging. Binds every column in order, then
/// `staged_seq` and `staged_at`.
pub fn stage_row(schema: &str, entity: &EntitySchema) -> String {
  let n = entity.columns.len();
  let placeholders: Vec<String> = (1..=n + 2).map(|i| format!("?{i}")).collect();
  let updates: Vec<String> = entity
    .mutable_columns()
    .map(|Column { name, .. }| format!("{0} = excluded.{0}", ident(name)))
    .chain(["staged_seq = excluded.staged_seq".to_owned(), "staged_at = excluded.staged_at".to_owned()])
    .collect();
  format!(
    "INSERT INTO {} ({}, staged_seq, staged_at) VALUES ({})
     ON CONFLICT ({}) DO UPDATE SET {}",
    qualified(schema, entity.staging_table),
    all_columns(entity),
    placeholders.join(", "),
    list(entity.natural_key.iter().copied()),
    updates.join(", "),
  )
}

pub fn next_stage_seq(schema: &str, entity: &EntitySchema) -> String {
  format!(
    "SELECT COALESCE(MAX(staged_seq), 0) + 1 FROM {}",
    qualified(schema, entity.staging_table)
  )
}

pub fn clear_staging(schema: &str, entity: &EntitySchema) -> String {
  format!(
    "DELETE FROM {} WHERE {}",
    qualified(schema, entity.staging_table),
    partition_filter(entity)
  )
}

/// Keep rank 1 per dedup key: freshest first with NULLs last, then the
/// most recently staged. `PARTITION BY` groups NULLs together, which makes
/// the comparison null-safe.
pub fn dedup_staging(schema: &str, entity: &EntitySchema) -> String {
  let stg = qualified(schema, entity.staging_table);
  format!(
    "DELETE FROM {stg} WHERE rowid IN (
       SELECT rid FROM (
         SELECT rowid AS rid,
                ROW_NUMBER() OVER (
                  PARTITION BY {}
                  ORDER BY {} DESC NULLS LAST, staged_seq DESC
                ) AS rn
         FROM {stg}
         WHERE {}
       )
       WHERE rn > 1
     )",
    list(entity.dedup_key.iter().copied()),
    ident(entity.freshness),
    partition_filter(entity),
  )
}

/// Delete production rows whose natural key is staged with the
/// cancellation column set. `None` for kinds without one.
pub fn delete_cancelled_production(schema: &str, entity: &EntitySchema) -> Option<String> {
  let cancel = entity.cancellation?;
  let key = list(entity.natural_key.iter().copied());
  Some(format!(
    "DELETE FROM {} WHERE ({key}) IN (
       SELECT {key} FROM {} WHERE {} AND {} IS NOT NULL
     )",
    qualified(schema, entity.production_table),
    qualified(schema, entity.staging_table),
    partition_filter(entity),
    ident(cancel),
  ))
}

pub fn withdraw_cancelled(schema: &str, entity: &EntitySchema) -> Option<String> {
  let cancel = entity.cancellation?;
  Some(format!(
    "DELETE FROM {} WHERE {} AND {} IS NOT NULL",
    qualified(schema, entity.staging_table),
    partition_filter(entity),
    ident(cancel),
  ))
}

/// Drop staged rows whose dedup tuple already exists in production. `IS`
/// is SQLite's null-safe equality.
pub fn discard_already_loaded(schema: &str, entity: &EntitySchema) -> String {
  let stg = ident(entity.staging_table);
  let matches: Vec<String> = entity
    .dedup_key
    .iter()
    .map(|c| format!("p.{0} IS {stg}.{0}", ident(c)))
    .collect();
  format!(
    "DELETE FROM {} WHERE {} AND EXISTS (
       SELECT 1 FROM {} AS p WHERE {}
     )",
    qualified(schema, entity.staging_table),
    partition_filter(entity),
    qualified(schema, entity.production_table),
    matches.join(" AND "),
  )
}

pub fn max_staged_freshness(schema: &str, entity: &EntitySchema) -> String {
  format!(
    "SELECT MAX({}) FROM {} WHERE {}",
    ident(entity.freshness),
    qualified(schema, entity.staging_table),
    partition_filter(entity),
  )
}

// ─── Production ──────────────────────────────────────────────────────────────

/// Upsert staged rows into production. A NULL incoming value never
/// replaces a stored non-NULL one.
pub fn merge_staging(schema: &str, entity: &EntitySchema) -> String {
  let cols = all_columns(entity);
  let updates: Vec<String> = entity
    .mutable_columns()
    .map(|Column { name, .. }| format!("{0} = COALESCE(excluded.{0}, {0})", ident(name)))
    .collect();
  let on_conflict = if updates.is_empty() {
    "DO NOTHING".to_owned()
  } else {
    format!("DO UPDATE SET {}", updates.join(", "))
  };
  // The WHERE clause is required for SQLite to parse the upsert after a
  // SELECT.
  format!(
    "INSERT INTO {} ({cols})
     SELECT {cols} FROM {} WHERE {}
     ON CONFLICT ({}) {on_conflict}",
    qualified(schema, entity.production_table),
    qualified(schema, entity.staging_table),
    partition_filter(entity),
    list(entity.natural_key.iter().copied()),
  )
}

pub fn delete_production_partition(schema: &str, entity: &EntitySchema) -> String {
  format!(
    "DELETE FROM {} WHERE {}",
    qualified(schema, entity.production_table),
    partition_filter(entity)
  )
}

pub fn copy_staging_partition(schema: &str, entity: &EntitySchema) -> String {
  let cols = all_columns(entity);
  format!(
    "INSERT INTO {} ({cols}) SELECT {cols} FROM {} WHERE {} ORDER BY staged_seq",
    qualified(schema, entity.production_table),
    qualified(schema, entity.staging_table),
    partition_filter(entity),
  )
}

pub fn select_production(schema: &str, entity: &EntitySchema) -> String {
  format!(
    "SELECT {} FROM {} WHERE {} ORDER BY {}",
    all_columns(entity),
    qualified(schema, entity.production_table),
    partition_filter(entity),
    list(entity.natural_key.iter().copied()),
  )
}

#[cfg(test)]
mod tests {
  use courtsync_core::entity::EntityKind;

  use super::*;

  #[test]
  fn schema_names_must_be_plain_identifiers() {
    assert!(is_valid_schema_name("warehouse"));
    assert!(is_valid_schema_name("_stg2"));
    assert!(!is_valid_schema_name(""));
    assert!(!is_valid_schema_name("2x"));
    assert!(!is_valid_schema_name("a\"; DROP TABLE x; --"));
  }

  #[test]
  fn replace_kinds_bind_both_partition_columns() {
    let entity = EntityKind::Event.schema();
    let params =
      partition_params(entity, &Partition::snapshot("pklyn", "courtreserve")).unwrap();
    assert_eq!(params, vec!["pklyn", "courtreserve"]);
    assert!(clear_staging("w", entity).ends_with("\"client_code\" = ?1 AND \"source_system\" = ?2"));
    assert!(partition_params(entity, &Partition::client("pklyn")).is_err());
  }
}
