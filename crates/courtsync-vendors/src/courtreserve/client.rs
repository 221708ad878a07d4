//! Async client for the CourtReserve reporting API.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use courtsync_core::window::Window;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::{Error, Result};

pub const BASE_URL: &str = "https://api.courtreserve.com";

const MEMBERS: &str = "/api/v1/member/get";
const ACTIVE_RESERVATIONS: &str = "/api/v1/reservationreport/listactive";
const CANCELLED_RESERVATIONS: &str = "/api/v1/reservationreport/listcancelled";
const EVENTS: &str = "/api/v1/eventcalendar/eventlist";

/// Every CourtReserve response wraps its payload in this envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope {
  #[serde(default)]
  data:                   Value,
  error_message:          Option<String>,
  is_success_status_code: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MembersPage {
  #[serde(default)]
  members:     Vec<Value>,
  total_pages: Option<u32>,
}

fn iso(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Secs, true) }

/// Async HTTP client for one CourtReserve organization.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct CourtReserveClient {
  http:     Client,
  base_url: String,
  username: String,
  password: String,
}

impl CourtReserveClient {
  pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
    let (username, password) = (username.into(), password.into());
    if username.is_empty() || password.is_empty() {
      return Err(Error::MissingCredentials("CourtReserve"));
    }
    let http = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(Error::Client)?;
    Ok(Self { http, base_url: BASE_URL.to_owned(), username, password })
  }

  pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
    self.base_url = base_url.into();
    self
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url.trim_end_matches('/'), path)
  }

  async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
    let resp = self
      .http
      .get(self.url(path))
      .basic_auth(&self.username, Some(&self.password))
      .query(query)
      .send()
      .await
      .map_err(|source| Error::Request { endpoint: path.to_owned(), source })?;

    let status = resp.status();
    if !status.is_success() {
      return Err(Error::Status { endpoint: path.to_owned(), status });
    }
    let body: Value = resp
      .json()
      .await
      .map_err(|source| Error::Request { endpoint: path.to_owned(), source })?;
    let envelope: Envelope = serde_json::from_value(body)
      .map_err(|source| Error::Payload { endpoint: path.to_owned(), source })?;

    if let Some(message) = envelope.error_message.filter(|m| !m.is_empty()) {
      return Err(Error::Api { endpoint: path.to_owned(), message });
    }
    if envelope.is_success_status_code == Some(false) {
      return Err(Error::Api {
        endpoint: path.to_owned(),
        message:  "request was not successful".to_owned(),
      });
    }
    Ok(envelope.data)
  }

  /// `Data` as a list; a missing or null `Data` is empty.
  async fn get_list(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Value>> {
    match self.get(path, query).await? {
      Value::Null => Ok(Vec::new()),
      data => serde_json::from_value(data)
        .map_err(|source| Error::Payload { endpoint: path.to_owned(), source }),
    }
  }

  // ── Members ───────────────────────────────────────────────────────────────

  /// `GET /api/v1/member/get`: one page of members created or updated in
  /// `window`. Returns the page and the total page count.
  pub async fn members_page(
    &self,
    window: Window,
    page_size: u32,
    page_number: u32,
  ) -> Result<(Vec<Value>, u32)> {
    let data = self
      .get(MEMBERS, &[
        ("pageNumber", page_number.to_string()),
        ("pageSize", page_size.to_string()),
        ("includeUserDefinedFields", "true".to_owned()),
        ("includeRatings", "true".to_owned()),
        ("createdOrUpdatedFrom", iso(window.start)),
        ("createdOrUpdatedTo", iso(window.end)),
      ])
      .await?;
    let page: MembersPage = match data {
      Value::Null => MembersPage::default(),
      data => serde_json::from_value(data)
        .map_err(|source| Error::Payload { endpoint: MEMBERS.to_owned(), source })?,
    };
    Ok((page.members, page.total_pages.unwrap_or(1).max(1)))
  }

  /// Every member page across `windows`, stopping early once `max_results`
  /// members have been collected.
  pub async fn members(
    &self,
    windows: impl IntoIterator<Item = Window>,
    page_size: u32,
    max_results: Option<usize>,
  ) -> Result<Vec<Value>> {
    let mut members = Vec::new();
    for window in windows {
      let mut page_number = 1;
      loop {
        let (page, total_pages) = self.members_page(window, page_size, page_number).await?;
        debug!(
          window_start = %window.start,
          window_end = %window.end,
          page_number,
          total_pages,
          received = page.len(),
          "fetched member page"
        );
        members.extend(page);
        if let Some(max) = max_results.filter(|&m| members.len() >= m) {
          members.truncate(max);
          return Ok(members);
        }
        if page_number >= total_pages {
          break;
        }
        page_number += 1;
      }
    }
    info!(received = members.len(), "fetched CourtReserve members");
    Ok(members)
  }

  // ── Reservations ──────────────────────────────────────────────────────────

  /// `GET /api/v1/reservationreport/listactive`: reservations created or
  /// updated in `window`.
  pub async fn active_reservations(&self, window: Window) -> Result<Vec<Value>> {
    let items = self
      .get_list(ACTIVE_RESERVATIONS, &[
        ("createdOrUpdatedOnFrom", iso(window.start)),
        ("createdOrUpdatedOnTo", iso(window.end)),
        ("includeUserDefinedFields", "false".to_owned()),
      ])
      .await?;
    debug!(window_start = %window.start, received = items.len(), "fetched active reservations");
    Ok(items)
  }

  /// `GET /api/v1/reservationreport/listactive`, filtered by when the
  /// reservations take place rather than when they changed.
  pub async fn scheduled_reservations(&self, window: Window) -> Result<Vec<Value>> {
    self
      .get_list(ACTIVE_RESERVATIONS, &[
        ("reservationsFromDate", iso(window.start)),
        ("reservationsToDate", iso(window.end)),
        ("includeUserDefinedFields", "false".to_owned()),
      ])
      .await
  }

  /// `GET /api/v1/reservationreport/listcancelled`
  pub async fn cancelled_reservations(
    &self,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<Value>> {
    self
      .get_list(CANCELLED_RESERVATIONS, &[
        ("cancelledOnFrom", iso(from)),
        ("cancelledOnTo", iso(to)),
      ])
      .await
  }

  // ── Events ────────────────────────────────────────────────────────────────

  /// `GET /api/v1/eventcalendar/eventlist`: events taking place in `window`.
  pub async fn events(&self, window: Window) -> Result<Vec<Value>> {
    self
      .get_list(EVENTS, &[
        ("startDate", iso(window.start)),
        ("endDate", iso(window.end)),
      ])
      .await
  }
}
