//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{DateTime, TimeZone, Utc};
use courtsync_core::{
  availability::{Court, DEFAULT_TIMEZONE},
  entity::EntityKind,
  reconcile::{ReconcileOptions, Reconciler},
  record::{AvailabilitySession, CanonicalRecord, Member, Reservation},
  store::{Partition, Warehouse},
};
use serde_json::json;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory("warehouse")
    .await
    .expect("in-memory store")
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
}

fn reservation(id: &str, member: &str) -> Reservation {
  Reservation {
    client_code:              "pklyn".into(),
    reservation_id:           id.into(),
    member_id:                member.into(),
    event_id:                 Some("ev-1".into()),
    reservation_created_at:   Some(at(9, 0)),
    reservation_updated_at:   Some(at(9, 0)),
    reservation_start_at:     Some(at(18, 0)),
    reservation_end_at:       Some(at(19, 0)),
    reservation_cancelled_at: None,
  }
}

fn member(id: &str, first: &str, email: Option<&str>) -> Member {
  Member {
    client_code:     "pklyn".into(),
    member_id:       id.into(),
    club_member_key: Some(id.into()),
    first_name:      Some(first.into()),
    last_name:       Some("Lovelace".into()),
    gender:          None,
    date_of_birth:   None,
    email:           email.map(str::to_owned),
    phone_number:    None,
    membership_type: None,
    updated_at:      None,
  }
}

fn slot(court: &str, start: DateTime<Utc>) -> CanonicalRecord {
  AvailabilitySession {
    client_code:   "pklyn".into(),
    source_system: "courtreserve".into(),
    court_id:      court.into(),
    slot_start:    start,
    slot_end:      start + chrono::TimeDelta::minutes(30),
    court_name:    Some(format!("Court #{court}")),
    period_type:   None,
  }
  .into()
}

fn records<T: Into<CanonicalRecord>>(items: impl IntoIterator<Item = T>) -> Vec<CanonicalRecord> {
  items.into_iter().map(Into::into).collect()
}

async fn load_reservations(
  s: &SqliteStore,
  batch: Vec<CanonicalRecord>,
) -> courtsync_core::reconcile::ReconcileReport {
  Reconciler::new(s, ReconcileOptions::default())
    .append(EntityKind::Reservation, &Partition::client("pklyn"), "reservations__pklyn", batch)
    .await
    .unwrap()
}

async fn reservations_in_production(s: &SqliteStore) -> Vec<CanonicalRecord> {
  s.production_rows(EntityKind::Reservation, Partition::client("pklyn"))
    .await
    .unwrap()
}

// ─── Opening ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn opens_in_main_and_attached_schemas() {
  SqliteStore::open_in_memory("main").await.unwrap();
  let s = SqliteStore::open("sqlite://:memory:", "analytics").await.unwrap();
  assert_eq!(s.schema_name(), "analytics");
  assert!(matches!(
    SqliteStore::open_in_memory("bad name").await,
    Err(Error::InvalidSchemaName(_))
  ));
}

// ─── Watermarks ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn watermark_is_created_then_advanced() {
  let s = store().await;
  assert!(s.get_watermark("members__pklyn".into()).await.unwrap().is_none());

  let first = s.advance_watermark("members__pklyn".into(), None).await.unwrap();
  assert!(first.last_record_created_at.is_none());

  let second = s
    .advance_watermark("members__pklyn".into(), Some(at(12, 0)))
    .await
    .unwrap();
  assert!(second.last_loaded_at >= first.last_loaded_at);
  assert_eq!(second.last_record_created_at, Some(at(12, 0)));

  // A run's maximum replaces the stored one, even when older; an empty
  // run keeps it.
  s.advance_watermark("members__pklyn".into(), Some(at(8, 0))).await.unwrap();
  let fourth = s.advance_watermark("members__pklyn".into(), None).await.unwrap();
  assert!(fourth.last_loaded_at >= second.last_loaded_at);
  assert_eq!(fourth.last_record_created_at, Some(at(8, 0)));

  let stored = s.get_watermark("members__pklyn".into()).await.unwrap().unwrap();
  assert_eq!(stored, fourth);
}

// ─── Append mode ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn rerunning_the_same_batch_is_idempotent() {
  let s = store().await;
  let batch = records([reservation("r1", "m1"), reservation("r2", "m2")]);

  let first = load_reservations(&s, batch.clone()).await;
  assert_eq!(first.merged, 2);
  let after_first = reservations_in_production(&s).await;

  let second = load_reservations(&s, batch).await;
  assert_eq!(second.already_loaded, 2);
  assert_eq!(second.merged, 0);
  assert_eq!(reservations_in_production(&s).await, after_first);
  assert_eq!(s.staged_count(EntityKind::Reservation).await.unwrap(), 0);
}

#[tokio::test]
async fn fresher_duplicate_wins() {
  let s = store().await;
  let mut older = reservation("r1", "m1");
  older.reservation_updated_at = Some(at(10, 0));
  let mut newer = reservation("r2", "m1");
  newer.reservation_updated_at = Some(at(11, 0));

  let report = load_reservations(&s, records([newer.clone(), older])).await;
  assert_eq!(report.duplicates, 1);
  assert_eq!(report.max_freshness, Some(at(11, 0)));
  assert_eq!(
    report.watermark.unwrap().last_record_created_at,
    Some(at(11, 0))
  );
  assert_eq!(reservations_in_production(&s).await, records([newer]));
}

#[tokio::test]
async fn undated_duplicate_loses_to_a_dated_one() {
  let s = store().await;
  let mut dated = reservation("r1", "m1");
  dated.reservation_updated_at = Some(at(10, 0));
  let mut undated = reservation("r2", "m1");
  undated.reservation_updated_at = None;

  // The undated row is staged last, so only the freshness ordering keeps
  // it from winning the tie-break on arrival.
  let report = load_reservations(&s, records([dated.clone(), undated])).await;
  assert_eq!(report.duplicates, 1);
  assert_eq!(report.max_freshness, Some(at(10, 0)));
  assert_eq!(reservations_in_production(&s).await, records([dated]));
}

#[tokio::test]
async fn null_key_components_still_deduplicate() {
  let s = store().await;
  let mut a = reservation("r1", "m1");
  a.event_id = None;
  let mut b = reservation("r2", "m1");
  b.event_id = None;

  load_reservations(&s, records([a, b.clone()])).await;
  // Equal freshness: the later-staged row survives.
  assert_eq!(reservations_in_production(&s).await, records([b.clone()]));

  // The same NULL-bearing tuple is recognised as already loaded.
  let mut again = b;
  again.reservation_id = "r3".into();
  let report = load_reservations(&s, records([again])).await;
  assert_eq!(report.already_loaded, 1);
}

#[tokio::test]
async fn cancelled_reservation_is_removed_from_production() {
  let s = store().await;
  load_reservations(&s, records([reservation("r1", "m1"), reservation("r2", "m2")])).await;

  let mut cancelled = reservation("r1", "m1");
  cancelled.reservation_cancelled_at = Some(at(15, 0));
  let report = load_reservations(&s, records([cancelled])).await;

  assert_eq!(report.cancelled, 1);
  assert_eq!(report.merged, 0);
  assert_eq!(reservations_in_production(&s).await, records([reservation("r2", "m2")]));
}

#[tokio::test]
async fn null_never_overwrites_a_stored_value() {
  let s = store().await;
  let recon = Reconciler::new(&s, ReconcileOptions::default());
  let partition = Partition::client("pklyn");

  recon
    .append(
      EntityKind::Member,
      &partition,
      "members__pklyn",
      records([member("m1", "Ada", Some("ada@example.com"))]),
    )
    .await
    .unwrap();
  let report = recon
    .append(
      EntityKind::Member,
      &partition,
      "members__pklyn",
      records([member("m1", "Augusta", None)]),
    )
    .await
    .unwrap();
  assert_eq!(report.merged, 1);

  let rows = s.production_rows(EntityKind::Member, partition).await.unwrap();
  let CanonicalRecord::Member(stored) = &rows[0] else { panic!("not a member") };
  assert_eq!(stored.first_name.as_deref(), Some("Augusta"));
  assert_eq!(stored.email.as_deref(), Some("ada@example.com"));
}

#[tokio::test]
async fn empty_run_still_advances_the_watermark() {
  let s = store().await;
  let loaded = load_reservations(&s, records([reservation("r1", "m1")])).await;
  let before = loaded.watermark.unwrap();

  let empty = load_reservations(&s, Vec::new()).await;
  let after = empty.watermark.unwrap();
  assert!(after.last_loaded_at >= before.last_loaded_at);
  assert_eq!(after.last_record_created_at, before.last_record_created_at);
}

#[tokio::test]
async fn failed_merge_clears_staging_and_leaves_watermark() {
  let s = store().await;
  s.execute_batch(format!(
    "CREATE TRIGGER \"{0}\".no_reservations BEFORE INSERT ON reservations_raw
     BEGIN SELECT RAISE(ABORT, 'forced failure'); END;",
    s.schema_name()
  ))
  .await
  .unwrap();

  let result = Reconciler::new(&s, ReconcileOptions::default())
    .append(
      EntityKind::Reservation,
      &Partition::client("pklyn"),
      "reservations__pklyn",
      records([reservation("r1", "m1")]),
    )
    .await;

  assert!(result.is_err());
  assert_eq!(s.staged_count(EntityKind::Reservation).await.unwrap(), 0);
  assert!(s.get_watermark("reservations__pklyn".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn staging_is_scoped_to_the_client() {
  let s = store().await;
  let mut other = reservation("g1", "m1");
  other.client_code = "gotham".into();
  s.stage_records(EntityKind::Reservation, records([other])).await.unwrap();

  load_reservations(&s, records([reservation("r1", "m1")])).await;

  assert_eq!(s.staged_count(EntityKind::Reservation).await.unwrap(), 1);
  assert!(
    s.production_rows(EntityKind::Reservation, Partition::client("gotham"))
      .await
      .unwrap()
      .is_empty()
  );
}

#[tokio::test]
async fn staging_rejects_records_of_another_kind() {
  let s = store().await;
  let err = s
    .stage_records(EntityKind::Member, records([reservation("r1", "m1")]))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::KindMismatch { .. }));
}

// ─── Replace mode ────────────────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_replaces_only_its_partition() {
  let s = store().await;
  let recon = Reconciler::new(&s, ReconcileOptions::default());
  let mine = Partition::snapshot("pklyn", "courtreserve");

  let mut podplay = slot("9", at(12, 0));
  if let CanonicalRecord::AvailabilitySession(a) = &mut podplay {
    a.source_system = "podplay".into();
  }
  recon
    .replace(
      EntityKind::AvailabilitySession,
      &Partition::snapshot("pklyn", "podplay"),
      "court_availability__podplay__pklyn",
      vec![podplay],
    )
    .await
    .unwrap();

  recon
    .replace(
      EntityKind::AvailabilitySession,
      &mine,
      "court_availability__courtreserve__pklyn",
      vec![slot("1", at(12, 0)), slot("1", at(12, 30))],
    )
    .await
    .unwrap();
  let report = recon
    .replace(
      EntityKind::AvailabilitySession,
      &mine,
      "court_availability__courtreserve__pklyn",
      vec![slot("2", at(13, 0))],
    )
    .await
    .unwrap();

  assert_eq!(report.replaced, 2);
  assert_eq!(report.merged, 1);
  assert_eq!(
    s.production_rows(EntityKind::AvailabilitySession, mine).await.unwrap(),
    vec![slot("2", at(13, 0))]
  );
  assert_eq!(
    s.production_rows(
      EntityKind::AvailabilitySession,
      Partition::snapshot("pklyn", "podplay")
    )
    .await
    .unwrap()
    .len(),
    1
  );
}

#[tokio::test]
async fn failed_swap_rolls_back() {
  let s = store().await;
  let recon = Reconciler::new(&s, ReconcileOptions::default());
  let partition = Partition::snapshot("pklyn", "courtreserve");
  let source = "court_availability__courtreserve__pklyn";

  let original = vec![slot("1", at(12, 0)), slot("2", at(12, 0))];
  recon
    .replace(EntityKind::AvailabilitySession, &partition, source, original.clone())
    .await
    .unwrap();
  let watermark = s.get_watermark(source.into()).await.unwrap();

  // Fires after the swap's delete, on the first copied row.
  s.execute_batch(format!(
    "CREATE TRIGGER \"{0}\".no_slots BEFORE INSERT ON facility_court_availabilities
     BEGIN SELECT RAISE(ABORT, 'forced failure'); END;",
    s.schema_name()
  ))
  .await
  .unwrap();

  let result = recon
    .replace(
      EntityKind::AvailabilitySession,
      &partition,
      source,
      vec![slot("3", at(14, 0))],
    )
    .await;

  assert!(result.is_err());
  assert_eq!(
    s.production_rows(EntityKind::AvailabilitySession, partition).await.unwrap(),
    original
  );
  assert_eq!(s.get_watermark(source.into()).await.unwrap(), watermark);
  assert_eq!(s.staged_count(EntityKind::AvailabilitySession).await.unwrap(), 0);
}

// ─── Reference data ──────────────────────────────────────────────────────────

#[tokio::test]
async fn courts_and_operating_hours_round_trip() {
  let s = store().await;
  for (id, label, order) in [("2", "Court #2", Some(2)), ("1", "Court #1", Some(1)), ("9", "Stadium", None)] {
    s.upsert_court(&Court {
      id:          id.into(),
      client_code: "pklyn".into(),
      label:       label.into(),
      type_name:   Some("pickleball".into()),
      order_index: order,
    })
    .await
    .unwrap();
  }
  let labels: Vec<String> =
    s.courts("pklyn".into()).await.unwrap().into_iter().map(|c| c.label).collect();
  assert_eq!(labels, vec!["Court #1", "Court #2", "Stadium"]);
  assert!(s.courts("gotham".into()).await.unwrap().is_empty());

  assert!(
    s.operating_hours("pklyn".into(), "courtreserve".into())
      .await
      .unwrap()
      .is_none()
  );
  s.set_operating_hours(
    "pklyn",
    "courtreserve",
    &json!({ "timezone": "America/New_York", "monday": { "open": "07:00", "close": "22:00" } }),
  )
  .await
  .unwrap();
  let hours = s
    .operating_hours("pklyn".into(), "courtreserve".into())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(hours.timezone, DEFAULT_TIMEZONE);
  assert!(hours.days[0].is_some());

  assert!(
    s.set_operating_hours("pklyn", "courtreserve", &json!({ "timezone": "Nowhere/Special" }))
      .await
      .is_err()
  );
}
