//! Podplay payloads to canonical records.

use chrono::{DateTime, Utc};
use chrono_tz::UTC;
use courtsync_core::record::{AvailabilitySession, Event, Member, Reservation};
use serde_json::Value;
use tracing::warn;

use super::SOURCE_SYSTEM;
use crate::fields;

fn at(v: &Value, keys: &[&str]) -> Option<DateTime<Utc>> { fields::timestamp(v, keys, UTC) }

fn drop_record(client_code: &str, kind: &str, reason: &str, raw: &Value) {
  let id = fields::id(raw, &["id", "code"]);
  warn!(client_code, kind, id = id.as_deref(), reason, "dropping Podplay record");
}

/// Podplay user ids are only unique per tenant, so member ids carry the
/// client code.
fn member_key(client_code: &str, user_id: &str) -> String { format!("{client_code}:{user_id}") }

// ─── Members ─────────────────────────────────────────────────────────────────

/// The newest membership on a user, by its creation or start time.
fn primary_membership(user: &Value) -> Option<&Value> {
  let items = user.pointer("/memberships/items")?.as_array()?;
  items.iter().max_by_key(|item| {
    let membership = item.get("membership");
    let started = at(item, &["createdAt", "startedAt"])
      .or_else(|| membership.and_then(|m| at(m, &["createdAt"])));
    (started, membership.and_then(|m| fields::id(m, &["id"])))
  })
}

/// `phoneNumber` is either a string or, when expanded, an object.
fn phone_number(user: &Value) -> Option<String> {
  match user.get("phoneNumber")? {
    obj @ Value::Object(_) => fields::id(obj, &["phoneNumber", "id", "value"]),
    _ => fields::text(user, &["phoneNumber"]),
  }
}

pub fn normalize_members(client_code: &str, users: &[Value]) -> Vec<Member> {
  users
    .iter()
    .filter_map(|u| {
      let Some(user_id) = fields::id(u, &["id"]) else {
        drop_record(client_code, "member", "no id", u);
        return None;
      };
      let key = member_key(client_code, &user_id);
      let membership_type = primary_membership(u).and_then(|m| {
        m.get("membership")
          .and_then(|inner| fields::text(inner, &["name"]))
          .or_else(|| fields::text(m, &["name"]))
      });
      Some(Member {
        client_code: client_code.to_owned(),
        member_id: key.clone(),
        club_member_key: Some(key),
        first_name: fields::text(u, &["firstName"]),
        last_name: fields::text(u, &["lastName"]),
        gender: fields::text(u, &["gender"]),
        date_of_birth: fields::text(u, &["birthday"]).and_then(|b| fields::date(&b)),
        email: fields::text(u, &["email"]),
        phone_number: phone_number(u),
        membership_type,
        updated_at: at(u, &["updatedAt"]),
      })
    })
    .collect()
}

// ─── Reservations ────────────────────────────────────────────────────────────

/// The booking user's id, from the inline object, the `_embedded` copy, or
/// the bare `bookedById`.
fn booker_id(reservation: &Value) -> Option<String> {
  reservation
    .get("bookedBy")
    .and_then(|b| fields::id(b, &["id"]))
    .or_else(|| {
      reservation
        .pointer("/_embedded/bookedBy")
        .and_then(|b| fields::id(b, &["id"]))
    })
    .or_else(|| fields::id(reservation, &["bookedById"]))
}

/// One record per reservation nested under each event. Reservation times
/// fall back to the event's.
pub fn normalize_reservations(client_code: &str, events: &[Value]) -> Vec<Reservation> {
  let mut rows = Vec::new();
  for event in events {
    let event_id = fields::id(event, &["id"]);
    let event_start = at(event, &["startTime"]);
    let event_end = at(event, &["endTime"]);
    let reservations = event
      .pointer("/reservations/items")
      .and_then(Value::as_array)
      .map(Vec::as_slice)
      .unwrap_or_default();

    for res in reservations {
      let Some(reservation_id) = fields::id(res, &["id", "code"]) else {
        drop_record(client_code, "reservation", "no id or code", res);
        continue;
      };
      let Some(booker) = booker_id(res) else {
        drop_record(client_code, "reservation", "no booking user", res);
        continue;
      };
      let created = at(res, &["createdAt"]);
      rows.push(Reservation {
        client_code: client_code.to_owned(),
        reservation_id,
        member_id: member_key(client_code, &booker),
        event_id: event_id.clone(),
        reservation_created_at: created,
        reservation_updated_at: at(res, &["updatedAt"]).or(created),
        reservation_start_at: at(res, &["startTime"]).or(event_start),
        reservation_end_at: at(res, &["endTime"]).or(event_end),
        reservation_cancelled_at: at(res, &["canceledAt", "cancelledAt"]),
      });
    }
  }
  rows
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Events as facility calendar entries. Capacity is teams times team size.
pub fn normalize_events(client_code: &str, events: &[Value]) -> Vec<Event> {
  events
    .iter()
    .filter_map(|e| {
      let Some(event_id) = fields::id(e, &["id"]) else {
        drop_record(client_code, "event", "no id", e);
        return None;
      };
      let Some(event_start_time) = at(e, &["startTime", "start_time"]) else {
        drop_record(client_code, "event", "no parseable start time", e);
        return None;
      };
      let max_registrants = fields::integer(e, "totalTeams")
        .zip(fields::integer(e, "teamSize"))
        .and_then(|(teams, size)| teams.checked_mul(size));
      let rates = e.get("admissionRate");
      Some(Event {
        client_code: client_code.to_owned(),
        source_system: SOURCE_SYSTEM.to_owned(),
        event_id,
        event_start_time,
        event_end_time: at(e, &["endTime", "end_time"]),
        event_name: fields::text(e, &["name", "title"]),
        event_description: None,
        event_type: fields::text(e, &["subtype"]),
        num_registrants: e.get("signups").and_then(|s| fields::integer(s, "_total")),
        max_registrants,
        admission_rate_regular: rates.and_then(|r| fields::real(r, "regular")),
        admission_rate_member: rates.and_then(|r| fields::real(r, "member")),
      })
    })
    .collect()
}

// ─── Sessions ────────────────────────────────────────────────────────────────

/// One free (court, slot) row per fixed court listed on each `AVAILABLE`
/// session. Sessions arrive in start order; reading stops at the first
/// one starting at or after `end`.
pub fn normalize_sessions(
  client_code: &str,
  sessions: &[Value],
  end: DateTime<Utc>,
) -> Vec<AvailabilitySession> {
  let mut rows = Vec::new();
  for session in sessions {
    if fields::text(session, &["status"]).as_deref() != Some("AVAILABLE") {
      continue;
    }
    let (Some(slot_start), Some(slot_end)) =
      (at(session, &["startTime"]), at(session, &["endTime"]))
    else {
      drop_record(client_code, "session", "no parseable slot times", session);
      continue;
    };
    if slot_start >= end {
      break;
    }
    let period_type = fields::text(session, &["periodType"]);
    let tables = session
      .pointer("/availableTables/items")
      .and_then(Value::as_array)
      .map(Vec::as_slice)
      .unwrap_or_default();

    // AUTO entries carry no table; only fixed courts are bookable slots.
    let courts = tables
      .iter()
      .filter(|t| fields::text(t, &["type"]).as_deref() == Some("FIXED_TABLE"))
      .filter_map(|t| t.get("table").filter(|table| table.is_object()));
    for table in courts {
      let Some(court_id) = fields::id(table, &["id"]) else {
        continue;
      };
      rows.push(AvailabilitySession {
        client_code: client_code.to_owned(),
        source_system: SOURCE_SYSTEM.to_owned(),
        court_id,
        slot_start,
        slot_end,
        court_name: fields::text(table, &["displayName", "displayNameShort"]),
        period_type: period_type.clone(),
      });
    }
  }
  rows
}

#[cfg(test)]
mod tests {
  use chrono::{NaiveDate, TimeZone};
  use serde_json::json;

  use super::*;

  #[test]
  fn members_take_the_newest_membership() {
    let users = vec![
      json!({
        "id": "u-7",
        "firstName": "Grace",
        "birthday": "1985-12-09T00:00:00.000Z",
        "email": "grace@example.com",
        "phoneNumber": { "phoneNumber": "+15550100" },
        "memberships": { "items": [
          { "createdAt": "2023-01-01T00:00:00Z", "membership": { "id": 1, "name": "Basic" } },
          { "createdAt": "2024-02-01T00:00:00Z", "membership": { "id": 2, "name": "Unlimited" } },
        ] },
      }),
      json!({ "firstName": "Anonymous" }),
    ];
    let members = normalize_members("gotham", &users);
    assert_eq!(members.len(), 1);
    let m = &members[0];
    assert_eq!(m.member_id, "gotham:u-7");
    assert_eq!(m.phone_number.as_deref(), Some("+15550100"));
    assert_eq!(m.date_of_birth, NaiveDate::from_ymd_opt(1985, 12, 9));
    assert_eq!(m.membership_type.as_deref(), Some("Unlimited"));
  }

  #[test]
  fn plain_phone_numbers_pass_through() {
    let users = vec![json!({ "id": 3, "phoneNumber": "555-0199" })];
    let members = normalize_members("gotham", &users);
    assert_eq!(members[0].phone_number.as_deref(), Some("555-0199"));
    assert!(members[0].membership_type.is_none());
  }

  #[test]
  fn events_carry_capacity_and_rates() {
    let events = vec![
      json!({
        "id": 812,
        "name": "Open Play",
        "subtype": "OPEN_PLAY",
        "startTime": "2024-03-04T23:00:00Z",
        "endTime": "2024-03-05T01:00:00Z",
        "signups": { "_total": "9" },
        "totalTeams": 4,
        "teamSize": 4,
        "admissionRate": { "regular": 30, "member": "20.5" },
      }),
      json!({ "id": 813, "name": "No start" }),
    ];
    let rows = normalize_events("gotham", &events);
    assert_eq!(rows.len(), 1);
    let e = &rows[0];
    assert_eq!(e.event_id, "812");
    assert_eq!(e.source_system, "podplay");
    assert_eq!(e.event_type.as_deref(), Some("OPEN_PLAY"));
    assert_eq!(e.event_start_time, Utc.with_ymd_and_hms(2024, 3, 4, 23, 0, 0).unwrap());
    assert_eq!(e.num_registrants, Some(9));
    assert_eq!(e.max_registrants, Some(16));
    assert_eq!(e.admission_rate_regular, Some(30.0));
    assert_eq!(e.admission_rate_member, Some(20.5));
  }

  #[test]
  fn sessions_list_fixed_courts_of_available_slots() {
    let table = |id: u32, name: &str| json!({ "type": "FIXED_TABLE", "table": { "id": id, "displayName": name } });
    let sessions = vec![
      json!({
        "status": "AVAILABLE",
        "periodType": "PEAK",
        "startTime": "2024-03-04T23:00:00Z",
        "endTime": "2024-03-04T23:30:00Z",
        "availableTables": { "items": [
          table(1, "Court 1"),
          table(2, "Court 2"),
          { "type": "AUTO", "table": null },
        ] },
      }),
      json!({
        "status": "FULL",
        "startTime": "2024-03-04T23:30:00Z",
        "endTime": "2024-03-05T00:00:00Z",
        "availableTables": { "items": [table(1, "Court 1")] },
      }),
      json!({
        "status": "AVAILABLE",
        "startTime": "2024-03-05T00:00:00Z",
        "endTime": "2024-03-05T00:30:00Z",
        "availableTables": { "items": [table(3, "Court 3")] },
      }),
    ];
    let end = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
    let rows = normalize_sessions("gotham", &sessions, end);

    let courts: Vec<&str> = rows.iter().map(|r| r.court_id.as_str()).collect();
    assert_eq!(courts, vec!["1", "2"]);
    assert!(rows.iter().all(|r| r.period_type.as_deref() == Some("PEAK")));
    assert_eq!(rows[1].court_name.as_deref(), Some("Court 2"));
    assert_eq!(rows[0].slot_end - rows[0].slot_start, chrono::TimeDelta::minutes(30));
  }

  #[test]
  fn reservations_inherit_event_times() {
    let events = vec![json!({
      "id": "ev-1",
      "startTime": "2024-03-04T23:00:00Z",
      "endTime": "2024-03-05T00:00:00Z",
      "reservations": { "items": [
        { "id": "r-1", "bookedBy": { "id": "u-7" }, "createdAt": "2024-03-01T10:00:00Z" },
        { "code": "R2", "_embedded": { "bookedBy": { "id": "u-8" } },
          "startTime": "2024-03-04T23:30:00Z", "canceledAt": "2024-03-02T09:00:00Z" },
        { "id": "r-3" },
      ] },
    })];
    let rows = normalize_reservations("gotham", &events);
    assert_eq!(rows.len(), 2);

    let first = &rows[0];
    assert_eq!(first.member_id, "gotham:u-7");
    assert_eq!(first.event_id.as_deref(), Some("ev-1"));
    assert_eq!(first.reservation_start_at, Some(Utc.with_ymd_and_hms(2024, 3, 4, 23, 0, 0).unwrap()));
    assert_eq!(first.reservation_updated_at, first.reservation_created_at);

    let second = &rows[1];
    assert_eq!(second.reservation_id, "R2");
    assert_eq!(second.member_id, "gotham:u-8");
    assert_eq!(second.reservation_start_at, Some(Utc.with_ymd_and_hms(2024, 3, 4, 23, 30, 0).unwrap()));
    assert!(second.reservation_cancelled_at.is_some());
  }
}
