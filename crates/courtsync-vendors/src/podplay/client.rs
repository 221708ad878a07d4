//! Async client for the Podplay v2 REST API.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{
  Client,
  header::{ACCEPT, HeaderMap, HeaderValue},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use courtsync_core::window::Window;

use crate::{Error, Result};

pub const BASE_URL: &str = "https://gotham.podplay.app/apis/v2";

#[derive(Debug, Deserialize)]
struct Page {
  #[serde(default)]
  items:      Vec<Value>,
  #[serde(rename = "_pagination", default)]
  pagination: Option<Pagination>,
}

/// Podplay is inconsistent about which of these it sends; any one is
/// enough to know when to stop.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
  #[serde(alias = "total_pages", alias = "pages")]
  total_pages: Option<u64>,
  total:       Option<u64>,
  count:       Option<u64>,
  ipp:         Option<u64>,
}

impl Pagination {
  fn is_last(&self, page: u64, requested_ipp: u64) -> bool {
    let ipp = self.ipp.unwrap_or(requested_ipp);
    self.total_pages.is_some_and(|t| page >= t)
      || self.total.is_some_and(|t| page * ipp >= t)
      || self.count.is_some_and(|c| c < ipp)
  }
}

fn iso(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Secs, true) }

/// Async HTTP client for one Podplay tenant.
#[derive(Clone)]
pub struct PodplayClient {
  http:     Client,
  base_url: String,
}

impl PodplayClient {
  pub fn new(api_key: &str) -> Result<Self> {
    if api_key.is_empty() {
      return Err(Error::MissingCredentials("Podplay"));
    }
    let mut key = HeaderValue::from_str(api_key).map_err(|_| Error::MissingCredentials("Podplay"))?;
    key.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", key);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let http = Client::builder()
      .timeout(Duration::from_secs(30))
      .default_headers(headers)
      .build()
      .map_err(Error::Client)?;
    Ok(Self { http, base_url: BASE_URL.to_owned() })
  }

  pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
    self.base_url = base_url.into();
    self
  }

  async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Page> {
    let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
    let resp = self
      .http
      .get(url)
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
    serde_json::from_value(body)
      .map_err(|source| Error::Payload { endpoint: path.to_owned(), source })
  }

  /// Walk `page=1..` until an empty page or the pagination block says
  /// we're done, stopping early at `max_results` items.
  async fn paginate(
    &self,
    path: &str,
    query: Vec<(&str, String)>,
    ipp: u64,
    max_results: Option<usize>,
  ) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    let mut page = 1u64;
    loop {
      let mut page_query = query.clone();
      page_query.push(("page", page.to_string()));
      let payload = self.get(path, &page_query).await?;
      debug!(path, page, received = payload.items.len(), so_far = items.len(), "fetched Podplay page");
      if payload.items.is_empty() {
        break;
      }

      items.extend(payload.items);
      if let Some(max) = max_results.filter(|&m| items.len() >= m) {
        items.truncate(max);
        break;
      }
      if payload.pagination.unwrap_or_default().is_last(page, ipp) {
        break;
      }
      page += 1;
    }
    Ok(items)
  }

  /// `GET /users`, members who joined in `[since, until]`.
  pub async fn users(
    &self,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    page_size: u64,
    max_results: Option<usize>,
  ) -> Result<Vec<Value>> {
    let query = vec![
      ("ipp", page_size.to_string()),
      ("expand", "items._links.phoneNumber".to_owned()),
      ("expand", "items._links.profile".to_owned()),
      ("memberSinceMin", iso(since)),
      ("memberSinceMax", iso(until)),
    ];
    self.paginate("/users", query, page_size, max_results).await
  }

  /// `GET /events` from `start_time` onwards, cancelled events included,
  /// with reservations and their bookers expanded.
  pub async fn events(
    &self,
    start_time: DateTime<Utc>,
    page_size: u64,
    max_results: Option<usize>,
  ) -> Result<Vec<Value>> {
    let query = vec![
      ("ipp", page_size.to_string()),
      ("startTime", iso(start_time)),
      ("includeCanceled", "true".to_owned()),
      ("expand", "items._links.reservations".to_owned()),
      ("expand", "items._links.bookedBy".to_owned()),
      ("expand", "items._links.invitations".to_owned()),
      ("expand", "items._links.waitlist".to_owned()),
    ];
    self.paginate("/events", query, page_size, max_results).await
  }

  /// `GET /events` starting inside `window`, without expansions. Feeds the
  /// facility event snapshot.
  pub async fn scheduled_events(
    &self,
    window: Window,
    page_size: u64,
    max_results: Option<usize>,
  ) -> Result<Vec<Value>> {
    let query = vec![
      ("ipp", page_size.to_string()),
      ("startTime", iso(window.start)),
      ("endTime", iso(window.end)),
    ];
    self.paginate("/events", query, page_size, max_results).await
  }

  /// `GET /sessions` in `window`: bookable time slots with the courts still
  /// free in each.
  pub async fn sessions(&self, window: Window, page_size: u64) -> Result<Vec<Value>> {
    let query = vec![
      ("ipp", page_size.to_string()),
      ("startTime", iso(window.start)),
      ("endTime", iso(window.end)),
    ];
    self.paginate("/sessions", query, page_size, None).await
  }
}
