//! Runtime settings, from an optional TOML file overlaid with the
//! environment.

use std::path::Path;

use anyhow::{Context as _, bail};
use chrono::TimeDelta;
use config::{Config, Environment, File};
use serde::Deserialize;

fn default_lookback_days() -> i64 { 30 }
fn default_true() -> bool { true }
fn default_cr_client_codes() -> String { "pklyn".to_owned() }
fn default_podplay_client_codes() -> String { "gotham".to_owned() }
fn default_availability_horizon_days() -> i64 { 14 }
fn default_events_horizon_days() -> i64 { 60 }
fn default_slot_minutes() -> i64 { 30 }

/// Environment keys are matched case-insensitively, so `PG_DSN` fills
/// `pg_dsn`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  /// SQLite database path, optionally `sqlite://`-prefixed.
  pub pg_dsn:                    String,
  /// Schema the warehouse tables live under.
  pub pg_schema:                 String,
  #[serde(default = "default_lookback_days")]
  pub default_lookback_days:     i64,
  /// Caps extracted records per client. Unset, unparseable or
  /// non-positive values mean no cap.
  #[serde(default)]
  pub ingest_sample_size:        Option<String>,
  #[serde(default = "default_true")]
  pub write_to_db:               bool,
  #[serde(default = "default_cr_client_codes")]
  pub cr_client_codes:           String,
  #[serde(default = "default_podplay_client_codes")]
  pub podplay_client_codes:      String,
  #[serde(default = "default_availability_horizon_days")]
  pub availability_horizon_days: i64,
  #[serde(default = "default_events_horizon_days")]
  pub events_horizon_days:       i64,
  #[serde(default = "default_slot_minutes")]
  pub slot_minutes:              i64,
}

/// Layer `path` (if it exists) under the process environment.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
  Config::builder()
    .add_source(File::from(path).required(false))
    .add_source(Environment::default())
    .build()
    .context("failed to read configuration")
}

impl Settings {
  pub fn from_config(config: &Config) -> anyhow::Result<Self> {
    let settings: Self = config
      .clone()
      .try_deserialize()
      .context("invalid settings; PG_DSN and PG_SCHEMA are required")?;
    if settings.pg_dsn.trim().is_empty() || settings.pg_schema.trim().is_empty() {
      bail!("PG_DSN and PG_SCHEMA must not be empty");
    }
    Ok(settings)
  }

  pub fn sample_size(&self) -> Option<usize> {
    self
      .ingest_sample_size
      .as_deref()?
      .trim()
      .parse::<usize>()
      .ok()
      .filter(|&n| n > 0)
  }

  pub fn lookback(&self) -> TimeDelta { TimeDelta::days(self.default_lookback_days) }

  pub fn slot_width(&self) -> TimeDelta { TimeDelta::minutes(self.slot_minutes) }

  pub fn courtreserve_clients(&self) -> Vec<String> { split_codes(&self.cr_client_codes) }

  pub fn podplay_clients(&self) -> Vec<String> { split_codes(&self.podplay_client_codes) }
}

/// `"PKLYN, other ,"` → `["pklyn", "other"]`
fn split_codes(raw: &str) -> Vec<String> {
  raw
    .split(',')
    .map(|c| c.trim().to_lowercase())
    .filter(|c| !c.is_empty())
    .collect()
}

#[cfg(test)]
mod tests {
  use config::FileFormat;

  use super::*;

  fn config_from(toml: &str) -> Config {
    Config::builder()
      .add_source(File::from_str(toml, FileFormat::Toml))
      .build()
      .unwrap()
  }

  #[test]
  fn defaults_fill_everything_but_the_warehouse() {
    let settings =
      Settings::from_config(&config_from("pg_dsn = \"wh.db\"\npg_schema = \"warehouse\"")).unwrap();
    assert_eq!(settings.default_lookback_days, 30);
    assert!(settings.write_to_db);
    assert_eq!(settings.courtreserve_clients(), vec!["pklyn"]);
    assert_eq!(settings.podplay_clients(), vec!["gotham"]);
    assert_eq!(settings.slot_width(), TimeDelta::minutes(30));
    assert_eq!(settings.sample_size(), None);
  }

  #[test]
  fn missing_warehouse_is_fatal() {
    assert!(Settings::from_config(&config_from("pg_schema = \"warehouse\"")).is_err());
    assert!(Settings::from_config(&config_from("pg_dsn = \"\"\npg_schema = \"w\"")).is_err());
  }

  #[test]
  fn sample_size_ignores_junk() {
    let base = "pg_dsn = \"wh.db\"\npg_schema = \"w\"\n";
    let with = |v: &str| {
      Settings::from_config(&config_from(&format!("{base}ingest_sample_size = \"{v}\"")))
        .unwrap()
        .sample_size()
    };
    assert_eq!(with("25"), Some(25));
    assert_eq!(with("0"), None);
    assert_eq!(with("lots"), None);
  }

  #[test]
  fn client_codes_are_normalised() {
    assert_eq!(split_codes(" PKLYN, other ,,"), vec!["pklyn", "other"]);
    assert!(split_codes(" , ").is_empty());
  }
}
