//! CourtReserve payloads to canonical records.
//!
//! Records missing a natural-key component are dropped with a `warn!`;
//! everything else is best effort and becomes `NULL` when unusable.

use chrono::{DateTime, Utc};
use chrono_tz::UTC;
use courtsync_core::{
  availability::{CourtBooking, parse_court_labels},
  record::{Cancellation, Event, Member, Reservation},
};
use serde_json::Value;
use tracing::warn;

use super::{LOCAL_ZONE, SOURCE_SYSTEM};
use crate::fields;

/// Facility-local wall time (`StartTime`, `EndTime`, ...).
fn local(v: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
  fields::timestamp(v, keys, LOCAL_ZONE)
}

/// `...Utc` fields, which are UTC even without an offset.
fn utc(v: &Value, keys: &[&str]) -> Option<DateTime<Utc>> { fields::timestamp(v, keys, UTC) }

fn drop_record(client_code: &str, kind: &str, reason: &str, raw: &Value) {
  let id = fields::id(raw, &["Id", "EventDateId", "MembershipNumber"]);
  warn!(client_code, kind, id = id.as_deref(), reason, "dropping CourtReserve record");
}

// ─── Members ─────────────────────────────────────────────────────────────────

pub fn normalize_members(client_code: &str, raw: &[Value]) -> Vec<Member> {
  raw
    .iter()
    .filter_map(|m| {
      let Some(member_id) = fields::id(m, &["MembershipNumber"]) else {
        drop_record(client_code, "member", "no MembershipNumber", m);
        return None;
      };
      Some(Member {
        client_code:     client_code.to_owned(),
        club_member_key: Some(member_id.clone()),
        member_id,
        first_name:      fields::text(m, &["FirstName"]),
        last_name:       fields::text(m, &["LastName"]),
        gender:          fields::text(m, &["Gender"]),
        date_of_birth:   fields::text(m, &["DateOfBirth"]).and_then(|d| fields::date(&d)),
        email:           fields::text(m, &["Email"]),
        phone_number:    fields::text(m, &["PhoneNumber", "MobilePhone"]),
        membership_type: fields::text(m, &["MembershipTypeName"]),
        updated_at:      utc(m, &["UpdatedOnUtc", "CreatedOnUtc"]),
      })
    })
    .collect()
}

// ─── Reservations ────────────────────────────────────────────────────────────

/// One record per player on each reservation. Reservations without
/// players produce nothing.
pub fn normalize_reservations(client_code: &str, raw: &[Value]) -> Vec<Reservation> {
  let mut rows = Vec::new();
  for res in raw {
    let Some(reservation_id) = fields::id(res, &["Id"]) else {
      drop_record(client_code, "reservation", "no Id", res);
      continue;
    };
    let cancelled_at =
      utc(res, &["CancelledOnUtc"]).or_else(|| local(res, &["CancelledOn"]));
    let template = Reservation {
      client_code: client_code.to_owned(),
      reservation_id,
      member_id: String::new(),
      event_id: fields::id(res, &["ReservationTypeId"]),
      reservation_created_at: utc(res, &["CreatedOnUtc"]),
      reservation_updated_at: utc(res, &["UpdatedOnUtc"]),
      reservation_start_at: local(res, &["StartTime"]),
      reservation_end_at: local(res, &["EndTime"]),
      reservation_cancelled_at: cancelled_at,
    };

    let players = res.get("Players").and_then(Value::as_array).map(Vec::as_slice);
    for player in players.unwrap_or_default() {
      let Some(member_id) = fields::id(player, &["OrganizationMemberId"]) else {
        drop_record(client_code, "reservation", "player without OrganizationMemberId", res);
        continue;
      };
      rows.push(Reservation { member_id, ..template.clone() });
    }
  }
  rows
}

// ─── Cancellations ───────────────────────────────────────────────────────────

/// Identifiers on cancellations are namespaced by client code.
pub fn normalize_cancellations(client_code: &str, raw: &[Value]) -> Vec<Cancellation> {
  let prefixed = |v: &Value, key: &str| {
    fields::id(v, &[key]).map(|id| format!("{client_code}:{id}"))
  };
  raw
    .iter()
    .filter_map(|c| {
      let (Some(reservation_id), Some(member_id)) =
        (prefixed(c, "EventDateId"), prefixed(c, "OrganizationMemberId"))
      else {
        drop_record(client_code, "cancellation", "no EventDateId or OrganizationMemberId", c);
        return None;
      };
      let Some(cancelled_on) = utc(c, &["CancelledOnUtc"]) else {
        drop_record(client_code, "cancellation", "no CancelledOnUtc", c);
        return None;
      };
      let player_name = [fields::text(c, &["FirstName"]), fields::text(c, &["LastName"])]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
      Some(Cancellation {
        client_code: client_code.to_owned(),
        reservation_id,
        member_id,
        cancelled_on,
        event_id: prefixed(c, "EventId"),
        reservation_type: fields::text(c, &["EventCategoryName"]),
        reservation_created_at: utc(c, &["SignedUpOnUtc"]),
        reservation_start_at: local(c, &["StartTime"]),
        reservation_end_at: local(c, &["EndTime"]),
        program_name: fields::text(c, &["EventName"]),
        player_name: Some(player_name).filter(|n| !n.is_empty()),
        player_email: fields::text(c, &["Email"]),
        player_phone: fields::text(c, &["Phone"]),
        fee: fields::real(c, "PriceToPay"),
        is_team_event: fields::boolean(c, "IsTeamEvent"),
        event_category_id: fields::id(c, &["EventCategoryId"]),
        event_category_name: fields::text(c, &["EventCategoryName"]),
      })
    })
    .collect()
}

// ─── Events ──────────────────────────────────────────────────────────────────

const NON_MEMBER_RATE: &str = "Non-Member Account";
const MEMBER_RATES: &[&str] = &["Premium", "Founder"];

/// Regular and member admission from `PriceInfo`. The member rate is the
/// lowest among member tiers.
fn admission_rates(event: &Value) -> (Option<f64>, Option<f64>) {
  let mut regular = None;
  let mut member: Option<f64> = None;
  let tiers = event.get("PriceInfo").and_then(Value::as_array);
  for tier in tiers.map(Vec::as_slice).unwrap_or_default() {
    let price =
      fields::real(tier, "EntireEventPrice").or_else(|| fields::real(tier, "DailyPrice"));
    let (Some(price), Some(name)) = (price, fields::text(tier, &["MembershipTypeName"])) else {
      continue;
    };
    if name == NON_MEMBER_RATE {
      regular = Some(price);
    } else if MEMBER_RATES.contains(&name.as_str()) {
      member = Some(member.map_or(price, |m| m.min(price)));
    }
  }
  (regular, member)
}

pub fn normalize_events(client_code: &str, raw: &[Value]) -> Vec<Event> {
  raw
    .iter()
    .filter_map(|e| {
      let Some(event_id) = fields::id(e, &["Id", "id", "EventId"]) else {
        drop_record(client_code, "event", "no Id", e);
        return None;
      };
      let Some(event_start_time) = local(e, &["StartTime", "startTime", "StartDateTime"])
      else {
        drop_record(client_code, "event", "no parseable start time", e);
        return None;
      };
      let (admission_rate_regular, admission_rate_member) = admission_rates(e);
      Some(Event {
        client_code: client_code.to_owned(),
        source_system: SOURCE_SYSTEM.to_owned(),
        event_id,
        event_start_time,
        event_end_time: local(e, &["EndTime", "endTime", "EndDateTime"]),
        event_name: fields::text(e, &["Name", "name", "EventName"]),
        event_description: fields::text(e, &["Description"]),
        event_type: fields::text(e, &["CategoryName", "EventType"]),
        num_registrants: fields::integer(e, "RegisteredCount"),
        max_registrants: fields::integer(e, "MaxRegistrants"),
        admission_rate_regular,
        admission_rate_member,
      })
    })
    .collect()
}

// ─── Court bookings ──────────────────────────────────────────────────────────

fn booking(raw: &Value, start_keys: &[&str], end_keys: &[&str], cancelled: bool) -> Option<CourtBooking> {
  let court_labels = parse_court_labels(raw.get("Courts")?);
  if court_labels.is_empty() {
    return None;
  }
  Some(CourtBooking {
    court_labels,
    start_at: local(raw, start_keys)?,
    end_at: local(raw, end_keys)?,
    cancelled,
  })
}

/// Events occupying courts. Events without courts or times block nothing.
pub fn event_bookings(raw: &[Value]) -> Vec<CourtBooking> {
  raw
    .iter()
    .filter_map(|e| {
      let cancelled = fields::boolean(e, "IsCanceled").unwrap_or(false);
      booking(e, &["StartDateTime", "StartTime"], &["EndDateTime", "EndTime"], cancelled)
    })
    .collect()
}

/// Reservations occupying courts; cancelled ones are kept but flagged.
pub fn reservation_bookings(raw: &[Value]) -> Vec<CourtBooking> {
  raw
    .iter()
    .filter_map(|r| {
      let cancelled = fields::text(r, &["CancelledOn", "CancelledOnUtc"]).is_some();
      booking(r, &["StartTime"], &["EndTime"], cancelled)
    })
    .collect()
}
