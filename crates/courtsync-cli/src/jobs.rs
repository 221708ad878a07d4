//! One ingestion pass per source: extract per client, normalize, reconcile.

use anyhow::{Context as _, Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use chrono_tz::Tz;
use clap::ValueEnum;
use courtsync_core::{
  availability::{AvailabilityCalculator, DEFAULT_TIMEZONE, local_to_utc},
  entity::EntityKind,
  reconcile::{DEFAULT_CHUNK_SIZE, ReconcileOptions, ReconcileReport, Reconciler},
  record::CanonicalRecord,
  store::{Partition, Warehouse},
  watermark::{extraction_start, snapshot_source_name, source_name},
  window::{Window, Windower},
};
use courtsync_store_sqlite::SqliteStore;
use courtsync_vendors::{courtreserve, podplay};
use tracing::{info, info_span, warn, Instrument as _};

use crate::{registry::Registry, settings::Settings};

// ─── Sources ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, strum::Display)]
#[value(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Source {
  CourtreserveMembers,
  /// Active reservations, then cancellations.
  CourtreserveReservations,
  CourtreserveCancellations,
  CourtreserveEvents,
  CourtreserveCourtAvailability,
  PodplayMembers,
  PodplayReservations,
  PodplayEvents,
  PodplayCourtAvailability,
  /// Every source above, in order.
  All,
}

impl Source {
  const EVERY: [Source; 9] = [
    Source::CourtreserveMembers,
    Source::CourtreserveReservations,
    Source::CourtreserveCancellations,
    Source::CourtreserveEvents,
    Source::CourtreserveCourtAvailability,
    Source::PodplayMembers,
    Source::PodplayReservations,
    Source::PodplayEvents,
    Source::PodplayCourtAvailability,
  ];

  pub fn uses_courtreserve(self) -> bool {
    matches!(
      self,
      Source::CourtreserveMembers
        | Source::CourtreserveReservations
        | Source::CourtreserveCancellations
        | Source::CourtreserveEvents
        | Source::CourtreserveCourtAvailability
        | Source::All
    )
  }

  pub fn uses_podplay(self) -> bool {
    matches!(
      self,
      Source::PodplayMembers
        | Source::PodplayReservations
        | Source::PodplayEvents
        | Source::PodplayCourtAvailability
        | Source::All
    )
  }
}

// ─── Windows ─────────────────────────────────────────────────────────────────

const MEMBER_WINDOW_DAYS: i64 = 21;
const SAMPLE_MEMBER_WINDOW_DAYS: i64 = 7;
const RESERVATION_WINDOW_DAYS: i64 = 7;
const EVENT_WINDOW_DAYS: i64 = 7;

/// Sample runs never look back further than this.
const SAMPLE_LOOKBACK_DAYS: i64 = 7;

fn midnight(t: DateTime<Utc>) -> DateTime<Utc> {
  t.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// The start of local `date` in `tz`, as UTC.
fn local_midnight(tz: Tz, date: NaiveDate) -> Result<DateTime<Utc>> {
  local_to_utc(tz, date.and_time(NaiveTime::MIN))
    .ok_or_else(|| anyhow!("{date} has no local midnight in {tz}"))
}

/// `[today, today + days)` in facility-local days, as UTC instants.
fn local_days(tz: Tz, now: DateTime<Utc>, days: i64) -> Result<Window> {
  let today = now.with_timezone(&tz).date_naive();
  Ok(Window {
    start: local_midnight(tz, today)?,
    end:   local_midnight(tz, today + TimeDelta::days(days))?,
  })
}

fn windows(start: DateTime<Utc>, days: i64, horizon: DateTime<Utc>) -> Result<Vec<Window>> {
  Ok(Windower::new(start, TimeDelta::days(days), horizon)?.iter().collect())
}

fn cap<T>(mut items: Vec<T>, sample: Option<usize>) -> Vec<T> {
  if let Some(n) = sample {
    items.truncate(n);
  }
  items
}

fn canonical<T: Into<CanonicalRecord>>(items: Vec<T>) -> Vec<CanonicalRecord> {
  items.into_iter().map(Into::into).collect()
}

fn log_report(report: &ReconcileReport) {
  info!(
    run_id = %report.run_id,
    source = %report.source_name,
    client_code = %report.client_code,
    received = report.received,
    rejected = report.rejected,
    merged = report.merged,
    replaced = report.replaced,
    cancelled = report.cancelled,
    dry_run = report.dry_run,
    "run finished"
  );
}

// ─── Runner ──────────────────────────────────────────────────────────────────

pub struct Jobs<'a> {
  store:    &'a SqliteStore,
  settings: &'a Settings,
  registry: &'a Registry,
}

impl<'a> Jobs<'a> {
  pub fn new(store: &'a SqliteStore, settings: &'a Settings, registry: &'a Registry) -> Self {
    Self { store, settings, registry }
  }

  fn reconciler(&self) -> Reconciler<'a, SqliteStore> {
    Reconciler::new(self.store, ReconcileOptions {
      chunk_size: DEFAULT_CHUNK_SIZE,
      write:      self.settings.write_to_db,
    })
  }

  /// Where `stream` should resume for `client_code`.
  async fn resume_point(&self, stream: &str, client_code: &str) -> Result<DateTime<Utc>> {
    let watermark = self
      .store
      .get_watermark(source_name(stream, client_code))
      .await
      .context("reading watermark")?;
    Ok(extraction_start(watermark.as_ref(), Utc::now(), self.settings.lookback()))
  }

  async fn append(
    &self,
    kind: EntityKind,
    client_code: &str,
    records: Vec<CanonicalRecord>,
  ) -> Result<()> {
    let report = self
      .reconciler()
      .append(
        kind,
        &Partition::client(client_code),
        &source_name(kind.schema().stream, client_code),
        records,
      )
      .await?;
    log_report(&report);
    Ok(())
  }

  async fn replace(
    &self,
    kind: EntityKind,
    client_code: &str,
    source_system: &str,
    records: Vec<CanonicalRecord>,
  ) -> Result<()> {
    let report = self
      .reconciler()
      .replace(
        kind,
        &Partition::snapshot(client_code, source_system),
        &snapshot_source_name(kind.schema().stream, source_system, client_code),
        records,
      )
      .await?;
    log_report(&report);
    Ok(())
  }

  pub async fn run(&self, source: Source) -> Result<()> {
    if source != Source::All {
      return self.run_one(source).await;
    }
    for each in Source::EVERY {
      self.run_one(each).await?;
    }
    Ok(())
  }

  async fn run_one(&self, source: Source) -> Result<()> {
    let span = info_span!("job", %source);
    async move {
      info!("starting");
      match source {
        Source::CourtreserveMembers => self.courtreserve_members().await,
        Source::CourtreserveReservations => {
          self.courtreserve_reservations().await?;
          self.courtreserve_cancellations().await
        }
        Source::CourtreserveCancellations => self.courtreserve_cancellations().await,
        Source::CourtreserveEvents => self.courtreserve_events().await,
        Source::CourtreserveCourtAvailability => self.courtreserve_court_availability().await,
        Source::PodplayMembers => self.podplay_members().await,
        Source::PodplayReservations => self.podplay_reservations().await,
        Source::PodplayEvents => self.podplay_events().await,
        Source::PodplayCourtAvailability => self.podplay_court_availability().await,
        Source::All => Ok(()),
      }
    }
    .instrument(span)
    .await
    .with_context(|| format!("{source} failed"))
  }

  // ── CourtReserve ──────────────────────────────────────────────────────────

  async fn courtreserve_members(&self) -> Result<()> {
    let sample = self.settings.sample_size();
    for c in self.registry.courtreserve() {
      let now = Utc::now();
      let mut start = self.resume_point(EntityKind::Member.schema().stream, &c.client_code).await?;
      let window_days = match sample {
        Some(_) => {
          start = start.max(now - TimeDelta::days(SAMPLE_LOOKBACK_DAYS));
          SAMPLE_MEMBER_WINDOW_DAYS
        }
        None => MEMBER_WINDOW_DAYS,
      };
      let page_size = sample.unwrap_or(1000).clamp(1, 1000) as u32;

      let raw = c
        .client
        .members(windows(start, window_days, now)?, page_size, sample)
        .await
        .with_context(|| format!("fetching members for {}", c.client_code))?;
      let members = cap(courtreserve::normalize_members(&c.client_code, &raw), sample);
      info!(client_code = %c.client_code, fetched = raw.len(), normalized = members.len(), "members extracted");

      self.append(EntityKind::Member, &c.client_code, canonical(members)).await?;
    }
    Ok(())
  }

  async fn courtreserve_reservations(&self) -> Result<()> {
    let sample = self.settings.sample_size();
    for c in self.registry.courtreserve() {
      let start =
        midnight(self.resume_point(EntityKind::Reservation.schema().stream, &c.client_code).await?);
      let mut raw = Vec::new();
      for window in windows(start, RESERVATION_WINDOW_DAYS, Utc::now())? {
        let page = c
          .client
          .active_reservations(window)
          .await
          .with_context(|| format!("fetching reservations for {}", c.client_code))?;
        raw.extend(page);
      }
      let reservations = cap(courtreserve::normalize_reservations(&c.client_code, &raw), sample);
      info!(client_code = %c.client_code, fetched = raw.len(), normalized = reservations.len(), "reservations extracted");

      self.append(EntityKind::Reservation, &c.client_code, canonical(reservations)).await?;
    }
    Ok(())
  }

  async fn courtreserve_cancellations(&self) -> Result<()> {
    let sample = self.settings.sample_size();
    for c in self.registry.courtreserve() {
      let start = self.resume_point(EntityKind::Cancellation.schema().stream, &c.client_code).await?;
      let raw = c
        .client
        .cancelled_reservations(start, Utc::now())
        .await
        .with_context(|| format!("fetching cancellations for {}", c.client_code))?;
      let cancellations = cap(courtreserve::normalize_cancellations(&c.client_code, &raw), sample);
      info!(client_code = %c.client_code, fetched = raw.len(), normalized = cancellations.len(), "cancellations extracted");

      self.append(EntityKind::Cancellation, &c.client_code, canonical(cancellations)).await?;
    }
    Ok(())
  }

  /// Raw events taking place inside `span`.
  async fn upcoming_events(
    &self,
    client: &courtreserve::CourtReserveClient,
    span: Window,
  ) -> Result<Vec<serde_json::Value>> {
    let mut raw = Vec::new();
    for window in windows(span.start, EVENT_WINDOW_DAYS, span.end)? {
      raw.extend(client.events(window).await?);
    }
    Ok(raw)
  }

  async fn courtreserve_events(&self) -> Result<()> {
    let sample = self.settings.sample_size();
    for c in self.registry.courtreserve() {
      let from = midnight(Utc::now());
      let span = Window { start: from, end: from + TimeDelta::days(self.settings.events_horizon_days) };
      let raw = self
        .upcoming_events(&c.client, span)
        .await
        .with_context(|| format!("fetching events for {}", c.client_code))?;
      let events = cap(courtreserve::normalize_events(&c.client_code, &raw), sample);
      info!(client_code = %c.client_code, fetched = raw.len(), normalized = events.len(), "events extracted");

      self
        .replace(EntityKind::Event, &c.client_code, courtreserve::SOURCE_SYSTEM, canonical(events))
        .await?;
    }
    Ok(())
  }

  async fn courtreserve_court_availability(&self) -> Result<()> {
    let source_system = courtreserve::SOURCE_SYSTEM;
    for c in self.registry.courtreserve() {
      let hours = self
        .store
        .operating_hours(c.client_code.clone(), source_system.to_owned())
        .await
        .context("reading operating hours")?;
      let Some(hours) = hours else {
        warn!(client_code = %c.client_code, "no operating hours configured; skipping availability");
        continue;
      };
      let courts = self.store.courts(c.client_code.clone()).await.context("reading courts")?;

      // Slots and the bookings blocking them cover the same local days.
      let span = local_days(hours.timezone, Utc::now(), self.settings.availability_horizon_days)?;
      let Window { start, end } = span;

      let raw_events = self
        .upcoming_events(&c.client, span)
        .await
        .with_context(|| format!("fetching events for {}", c.client_code))?;
      let mut raw_reservations = Vec::new();
      for window in windows(start, RESERVATION_WINDOW_DAYS, end)? {
        raw_reservations.extend(
          c.client
            .scheduled_reservations(window)
            .await
            .with_context(|| format!("fetching scheduled reservations for {}", c.client_code))?,
        );
      }

      let calculator =
        AvailabilityCalculator::new(&c.client_code, source_system, hours, self.settings.slot_width())?;
      let sessions = calculator.calculate(
        &courts,
        &courtreserve::event_bookings(&raw_events),
        &courtreserve::reservation_bookings(&raw_reservations),
        start,
        end,
      )?;
      info!(
        client_code = %c.client_code,
        courts = courts.len(),
        events = raw_events.len(),
        reservations = raw_reservations.len(),
        free_slots = sessions.len(),
        "availability calculated"
      );

      self
        .replace(EntityKind::AvailabilitySession, &c.client_code, source_system, canonical(sessions))
        .await?;
    }
    Ok(())
  }

  // ── Podplay ───────────────────────────────────────────────────────────────

  async fn podplay_members(&self) -> Result<()> {
    let sample = self.settings.sample_size();
    for c in self.registry.podplay() {
      let start = self.resume_point(EntityKind::Member.schema().stream, &c.client_code).await?;
      let page_size = sample.unwrap_or(100).clamp(1, 100) as u64;
      let raw = c
        .client
        .users(start, Utc::now(), page_size, sample)
        .await
        .with_context(|| format!("fetching users for {}", c.client_code))?;
      let members = cap(podplay::normalize_members(&c.client_code, &raw), sample);
      info!(client_code = %c.client_code, fetched = raw.len(), normalized = members.len(), "members extracted");

      self.append(EntityKind::Member, &c.client_code, canonical(members)).await?;
    }
    Ok(())
  }

  async fn podplay_reservations(&self) -> Result<()> {
    let sample = self.settings.sample_size();
    for c in self.registry.podplay() {
      let start = self.resume_point(EntityKind::Reservation.schema().stream, &c.client_code).await?;
      let page_size = sample.unwrap_or(100).clamp(1, 500) as u64;
      let raw = c
        .client
        .events(start, page_size, sample)
        .await
        .with_context(|| format!("fetching events for {}", c.client_code))?;
      let reservations = cap(podplay::normalize_reservations(&c.client_code, &raw), sample);
      info!(client_code = %c.client_code, events = raw.len(), normalized = reservations.len(), "reservations extracted");

      self.append(EntityKind::Reservation, &c.client_code, canonical(reservations)).await?;
    }
    Ok(())
  }

  async fn podplay_events(&self) -> Result<()> {
    let sample = self.settings.sample_size();
    for c in self.registry.podplay() {
      let from = midnight(Utc::now());
      let span = Window { start: from, end: from + TimeDelta::days(self.settings.events_horizon_days) };
      let page_size = sample.unwrap_or(100).clamp(1, 500) as u64;
      let raw = c
        .client
        .scheduled_events(span, page_size, sample)
        .await
        .with_context(|| format!("fetching events for {}", c.client_code))?;
      let events = cap(podplay::normalize_events(&c.client_code, &raw), sample);
      info!(client_code = %c.client_code, fetched = raw.len(), normalized = events.len(), "events extracted");

      self
        .replace(EntityKind::Event, &c.client_code, podplay::SOURCE_SYSTEM, canonical(events))
        .await?;
    }
    Ok(())
  }

  async fn podplay_court_availability(&self) -> Result<()> {
    for c in self.registry.podplay() {
      let span = local_days(DEFAULT_TIMEZONE, Utc::now(), self.settings.availability_horizon_days)?;
      let raw = c
        .client
        .sessions(span, 500)
        .await
        .with_context(|| format!("fetching sessions for {}", c.client_code))?;
      let sessions = podplay::normalize_sessions(&c.client_code, &raw, span.end);
      info!(client_code = %c.client_code, fetched = raw.len(), free_slots = sessions.len(), "availability extracted");

      self
        .replace(
          EntityKind::AvailabilitySession,
          &c.client_code,
          podplay::SOURCE_SYSTEM,
          canonical(sessions),
        )
        .await?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn reservation_extraction_starts_at_midnight() {
    let t = Utc.with_ymd_and_hms(2024, 3, 4, 17, 45, 12).unwrap();
    assert_eq!(midnight(t), Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap());
  }

  #[test]
  fn windows_reach_the_horizon() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap();
    let w = windows(start, RESERVATION_WINDOW_DAYS, now).unwrap();
    assert_eq!(w.len(), 3);
    assert_eq!(w.last().unwrap().end, now);
    assert!(windows(now, RESERVATION_WINDOW_DAYS, start).unwrap().is_empty());
  }

  #[test]
  fn availability_span_follows_local_days() {
    let ny = chrono_tz::America::New_York;
    // 22:30 on Monday 2024-03-04 in New York is already Tuesday in UTC.
    let now = Utc.with_ymd_and_hms(2024, 3, 5, 3, 30, 0).unwrap();
    let span = local_days(ny, now, 7).unwrap();
    assert_eq!(span.start, Utc.with_ymd_and_hms(2024, 3, 4, 5, 0, 0).unwrap());
    // Clocks spring forward on the 10th, so the week ends at EDT midnight.
    assert_eq!(span.end, Utc.with_ymd_and_hms(2024, 3, 11, 4, 0, 0).unwrap());
  }

  #[test]
  fn sample_cap_only_truncates() {
    assert_eq!(cap(vec![1, 2, 3], Some(2)), vec![1, 2]);
    assert_eq!(cap(vec![1, 2, 3], Some(10)), vec![1, 2, 3]);
    assert_eq!(cap(vec![1, 2, 3], None), vec![1, 2, 3]);
  }

  #[test]
  fn vendor_requirements_follow_the_source() {
    assert!(Source::CourtreserveEvents.uses_courtreserve());
    assert!(!Source::CourtreserveEvents.uses_podplay());
    assert!(Source::PodplayMembers.uses_podplay());
    assert!(!Source::PodplayMembers.uses_courtreserve());
    assert!(Source::PodplayCourtAvailability.uses_podplay());
    assert!(!Source::PodplayEvents.uses_courtreserve());
    assert!(Source::All.uses_courtreserve() && Source::All.uses_podplay());
    assert_eq!(Source::CourtreserveCourtAvailability.to_string(), "courtreserve_court_availability");
  }
}
