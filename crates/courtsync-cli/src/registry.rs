//! Per-client vendor clients, built once per run.
//!
//! Credentials are looked up under a client-scoped key first
//! (`CR_API_USER_PKLYN`) and then a global one (`CR_API_USER`).

use anyhow::{Context as _, anyhow, bail};
use config::Config;
use courtsync_vendors::{courtreserve::CourtReserveClient, podplay::PodplayClient};

use crate::{jobs::Source, settings::Settings};

/// A vendor client bound to the facility it serves.
pub struct ClientFor<C> {
  pub client_code: String,
  pub client:      C,
}

pub struct Registry {
  courtreserve: Vec<ClientFor<CourtReserveClient>>,
  podplay:      Vec<ClientFor<PodplayClient>>,
}

/// `key_<client>` if set and non-empty, else `key`.
fn credential(config: &Config, key: &str, client_code: &str) -> Option<String> {
  [format!("{key}_{client_code}"), key.to_owned()]
    .iter()
    .find_map(|k| config.get_string(k).ok().filter(|v| !v.is_empty()))
}

fn missing(what: &str, key: &str, client_code: &str) -> anyhow::Error {
  let scoped = format!("{key}_{client_code}").to_uppercase();
  anyhow!(
    "{what} credentials are not configured for client '{client_code}'; set {scoped} or {}",
    key.to_uppercase()
  )
}

impl Registry {
  /// Clients for every configured facility of each vendor `source` needs.
  /// Missing credentials are fatal here, before any extraction starts.
  pub fn build(config: &Config, settings: &Settings, source: Source) -> anyhow::Result<Self> {
    let mut registry = Self { courtreserve: Vec::new(), podplay: Vec::new() };

    if source.uses_courtreserve() {
      let codes = settings.courtreserve_clients();
      if codes.is_empty() {
        bail!("CR_CLIENT_CODES is empty; configure at least one client code");
      }
      for client_code in codes {
        let user = credential(config, "cr_api_user", &client_code)
          .ok_or_else(|| missing("CourtReserve", "cr_api_user", &client_code))?;
        let password = credential(config, "cr_api_pw", &client_code)
          .ok_or_else(|| missing("CourtReserve", "cr_api_pw", &client_code))?;
        let client = CourtReserveClient::new(user, password)
          .with_context(|| format!("CourtReserve client for {client_code}"))?;
        registry.courtreserve.push(ClientFor { client_code, client });
      }
    }

    if source.uses_podplay() {
      let codes = settings.podplay_clients();
      if codes.is_empty() {
        bail!("PODPLAY_CLIENT_CODES is empty; configure at least one client code");
      }
      for client_code in codes {
        let key = credential(config, "podplay_api_key", &client_code)
          .ok_or_else(|| missing("Podplay", "podplay_api_key", &client_code))?;
        let client = PodplayClient::new(&key)
          .with_context(|| format!("Podplay client for {client_code}"))?;
        registry.podplay.push(ClientFor { client_code, client });
      }
    }

    Ok(registry)
  }

  pub fn courtreserve(&self) -> &[ClientFor<CourtReserveClient>] { &self.courtreserve }

  pub fn podplay(&self) -> &[ClientFor<PodplayClient>] { &self.podplay }
}

#[cfg(test)]
mod tests {
  use config::{File, FileFormat};

  use super::*;

  const BASE: &str = "pg_dsn = \"wh.db\"\npg_schema = \"w\"\n";

  fn build(extra: &str, source: Source) -> anyhow::Result<Registry> {
    let config = Config::builder()
      .add_source(File::from_str(&format!("{BASE}{extra}"), FileFormat::Toml))
      .build()
      .unwrap();
    let settings = Settings::from_config(&config).unwrap();
    Registry::build(&config, &settings, source)
  }

  #[test]
  fn scoped_credentials_win_over_global_ones() {
    let config = Config::builder()
      .add_source(File::from_str(
        "cr_api_user = \"global\"\ncr_api_user_pklyn = \"scoped\"\ncr_api_user_other = \"\"",
        FileFormat::Toml,
      ))
      .build()
      .unwrap();
    assert_eq!(credential(&config, "cr_api_user", "pklyn").as_deref(), Some("scoped"));
    assert_eq!(credential(&config, "cr_api_user", "other").as_deref(), Some("global"));
    assert_eq!(credential(&config, "cr_api_pw", "pklyn"), None);
  }

  #[test]
  fn only_the_needed_vendors_are_built() {
    let registry = build(
      "cr_client_codes = \"pklyn,bklyn\"\ncr_api_user = \"u\"\ncr_api_pw = \"p\"",
      Source::CourtreserveMembers,
    )
    .unwrap();
    let codes: Vec<&str> =
      registry.courtreserve().iter().map(|c| c.client_code.as_str()).collect();
    assert_eq!(codes, vec!["pklyn", "bklyn"]);
    assert!(registry.podplay().is_empty());
  }

  #[test]
  fn missing_credentials_name_both_keys() {
    let err = build("", Source::PodplayMembers).err().unwrap();
    let message = err.to_string();
    assert!(message.contains("PODPLAY_API_KEY_GOTHAM"));
    assert!(message.contains("PODPLAY_API_KEY"));
  }
}
