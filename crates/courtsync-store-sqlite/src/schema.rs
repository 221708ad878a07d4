//! SQL schema for the courtsync SQLite store.
//!
//! Record tables are generated from the entity descriptors in
//! `courtsync-core`; the bookkeeping and reference tables are static.
//! Everything is `IF NOT EXISTS`, so initialisation runs on every open.

use courtsync_core::{
  entity::{Column, EntityKind, EntitySchema},
  value::ColumnType,
};
use strum::IntoEnumIterator as _;

use crate::sql::{ident, qualified};

/// Bookkeeping and reference tables. `{schema}` is replaced by the quoted
/// schema name.
const STATIC_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS {schema}.elt_watermarks (
    source_name            TEXT PRIMARY KEY,
    last_loaded_at         TEXT,   -- RFC 3339 UTC
    last_record_created_at TEXT    -- RFC 3339 UTC; highest freshness loaded
);

-- Static reference data; never written by a reconciliation.
CREATE TABLE IF NOT EXISTS {schema}.courts (
    id          TEXT NOT NULL,
    client_code TEXT NOT NULL,
    label       TEXT NOT NULL,
    type_name   TEXT,
    order_index INTEGER,
    PRIMARY KEY (client_code, id)
);

CREATE TABLE IF NOT EXISTS {schema}.organizations (
    client_code        TEXT NOT NULL,
    source_system_code TEXT NOT NULL,
    operating_hours    TEXT,   -- JSON: {\"timezone\": .., \"monday\": {\"open\": .., \"close\": ..}}
    PRIMARY KEY (client_code, source_system_code)
);
";

fn sql_type(ty: ColumnType) -> &'static str {
  match ty {
    ColumnType::Text | ColumnType::Timestamp | ColumnType::Date => "TEXT",
    ColumnType::Integer | ColumnType::Bool => "INTEGER",
    ColumnType::Real => "REAL",
  }
}

fn column_defs(entity: &EntitySchema) -> Vec<String> {
  entity
    .columns
    .iter()
    .map(|Column { name, ty }| {
      let not_null = if entity.natural_key.contains(name) { " NOT NULL" } else { "" };
      format!("    {} {}{not_null}", ident(name), sql_type(*ty))
    })
    .collect()
}

fn natural_key_index(schema: &str, table: &str, entity: &EntitySchema) -> String {
  let cols: Vec<String> = entity.natural_key.iter().map(|c| ident(c)).collect();
  format!(
    "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({});\n",
    qualified(schema, &format!("{table}_natural_key")),
    ident(table),
    cols.join(", "),
  )
}

/// Production and staging tables for one entity. Staging carries two extra
/// columns: a monotonically increasing insertion sequence used to break
/// dedup ties, and the time the row was staged.
pub fn entity_ddl(schema: &str, entity: &EntitySchema) -> String {
  let cols = column_defs(entity);

  let mut ddl = format!(
    "CREATE TABLE IF NOT EXISTS {} (\n{}\n);\n",
    qualified(schema, entity.production_table),
    cols.join(",\n"),
  );
  ddl += &natural_key_index(schema, entity.production_table, entity);

  let mut stg_cols = cols;
  stg_cols.push("    staged_seq INTEGER NOT NULL".to_owned());
  stg_cols.push("    staged_at  TEXT NOT NULL".to_owned());
  ddl += &format!(
    "CREATE TABLE IF NOT EXISTS {} (\n{}\n);\n",
    qualified(schema, entity.staging_table),
    stg_cols.join(",\n"),
  );
  ddl += &natural_key_index(schema, entity.staging_table, entity);
  ddl
}

/// Full schema DDL for `schema`.
pub fn schema_ddl(schema: &str) -> String {
  let mut ddl = STATIC_SCHEMA.replace("{schema}", &ident(schema));
  for kind in EntityKind::iter() {
    ddl += &entity_ddl(schema, kind.schema());
  }
  ddl
}
