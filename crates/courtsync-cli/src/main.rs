//! courtsync: incremental booking-data ingestion.
//!
//! Runs one pass of a single source for every configured client, then
//! exits. Scheduling is left to cron or whatever invokes it.
//!
//! ```text
//! PG_DSN=warehouse.db PG_SCHEMA=warehouse courtsync courtreserve_reservations
//! ```

mod jobs;
mod registry;
mod settings;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use courtsync_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{
  jobs::{Jobs, Source},
  registry::Registry,
  settings::{Settings, load_config},
};

#[derive(Parser)]
#[command(author, version, about = "Sync booking data from scheduling vendors into the warehouse")]
struct Cli {
  /// Which source to ingest.
  #[arg(value_enum)]
  source: Source,

  /// Optional TOML file read beneath the environment.
  #[arg(short, long, default_value = "courtsync.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let config = load_config(&cli.config)?;
  let settings = Settings::from_config(&config)?;
  let registry = Registry::build(&config, &settings, cli.source)?;

  let store = SqliteStore::open(&settings.pg_dsn, &settings.pg_schema)
    .await
    .with_context(|| format!("failed to open warehouse at {:?}", settings.pg_dsn))?;

  if !settings.write_to_db {
    tracing::warn!("WRITE_TO_DB is false; nothing will be written");
  }

  Jobs::new(&store, &settings, &registry).run(cli.source).await?;
  tracing::info!(source = %cli.source, "done");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sources_parse_by_snake_case_name() {
    let cli = Cli::try_parse_from(["courtsync", "courtreserve_court_availability"]).unwrap();
    assert_eq!(cli.source, Source::CourtreserveCourtAvailability);
    assert_eq!(cli.config, PathBuf::from("courtsync.toml"));
  }

  #[test]
  fn unknown_source_is_rejected() {
    assert!(Cli::try_parse_from(["courtsync", "mindbody_members"]).is_err());
    assert!(Cli::try_parse_from(["courtsync"]).is_err());
  }
}
