//! Court availability.
//!
//! Free court time is derived rather than extracted: every court gets a
//! grid of fixed-width slots covering the facility's operating hours, and
//! any slot overlapping a live event or reservation on that court is
//! removed. Operating hours are local civil time in the facility's IANA
//! zone; all inputs and outputs are UTC.

use std::collections::HashSet;

use chrono::{
  DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
  TimeDelta, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result, record::AvailabilitySession};

/// Zone assumed when the operating-hours document names none.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;

/// Weekday keys of the operating-hours document, Monday first.
const DAY_NAMES: [&str; 7] = [
  "monday",
  "tuesday",
  "wednesday",
  "thursday",
  "friday",
  "saturday",
  "sunday",
];

// ─── Operating hours ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayHours {
  pub open:  NaiveTime,
  /// Earlier than `open` means the facility closes after midnight.
  pub close: NaiveTime,
}

/// Weekly opening hours of one facility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatingHours {
  pub timezone: Tz,
  /// Indexed Monday = 0; `None` is closed all day.
  pub days:     [Option<DayHours>; 7],
}

impl OperatingHours {
  /// Parse the JSON document stored per organization, e.g.
  ///
  /// ```json
  /// { "timezone": "America/New_York",
  ///   "monday": { "open": "07:00", "close": "22:00" } }
  /// ```
  ///
  /// Missing weekdays, or weekdays lacking either time, are closed.
  pub fn from_json(doc: &Value) -> Result<Self> {
    let obj = doc.as_object().ok_or_else(|| {
      Error::InvalidOperatingHours(format!("expected an object, got {doc}"))
    })?;

    let timezone = match obj.get("timezone").and_then(Value::as_str) {
      Some(name) => name
        .parse::<Tz>()
        .map_err(|_| Error::UnknownTimezone(name.to_owned()))?,
      None => DEFAULT_TIMEZONE,
    };

    let mut days = [None; 7];
    for (slot, name) in days.iter_mut().zip(DAY_NAMES) {
      let Some(day) = obj.get(name).filter(|v| !v.is_null()) else {
        continue;
      };
      let open = day.get("open").and_then(Value::as_str);
      let close = day.get("close").and_then(Value::as_str);
      if let (Some(open), Some(close)) = (open, close) {
        *slot = Some(DayHours {
          open:  parse_clock(name, open)?,
          close: parse_clock(name, close)?,
        });
      }
    }

    Ok(Self { timezone, days })
  }

  pub fn for_date(&self, date: NaiveDate) -> Option<DayHours> {
    self.days[date.weekday().num_days_from_monday() as usize]
  }
}

fn parse_clock(day: &str, s: &str) -> Result<NaiveTime> {
  NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| {
    Error::InvalidOperatingHours(format!("{day}: {s:?} is not HH:MM"))
  })
}

/// Resolve a facility-local wall time to UTC. Ambiguous times (the repeated
/// hour when clocks fall back) take the earlier instant; times skipped when
/// clocks spring forward are pushed forward by an hour.
pub fn local_to_utc(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
  let resolved = match tz.from_local_datetime(&local) {
    LocalResult::Single(t) => Some(t),
    LocalResult::Ambiguous(a, b) => Some(a.min(b)),
    LocalResult::None => tz
      .from_local_datetime(&(local + TimeDelta::hours(1)))
      .earliest(),
  };
  resolved.map(|t| t.with_timezone(&Utc))
}

// ─── Slots ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeSlot {
  pub slot_start: DateTime<Utc>,
  pub slot_end:   DateTime<Utc>,
}

/// Tile each local day's opening hours with slots of `width`, keeping only
/// slots that lie wholly inside `[start, end)`. A trailing slot that would
/// run past closing is not emitted.
pub fn generate_slots(
  hours: &OperatingHours,
  start: DateTime<Utc>,
  end: DateTime<Utc>,
  width: TimeDelta,
) -> Result<Vec<TimeSlot>> {
  if width <= TimeDelta::zero() {
    return Err(Error::NonPositiveStep(width));
  }

  let tz = hours.timezone;
  let first = start.with_timezone(&tz).date_naive();
  let last = end.with_timezone(&tz).date_naive();

  let mut slots = Vec::new();
  for day in first.iter_days().take_while(|d| *d <= last) {
    let Some(DayHours { open, close }) = hours.for_date(day) else {
      continue;
    };
    let close_day = if close < open { day + TimeDelta::days(1) } else { day };

    let (Some(open_at), Some(close_at)) = (
      local_to_utc(tz, day.and_time(open)),
      local_to_utc(tz, close_day.and_time(close)),
    ) else {
      continue;
    };

    let mut slot_start = open_at;
    while slot_start + width <= close_at {
      let slot_end = slot_start + width;
      if slot_start >= start && slot_end <= end {
        slots.push(TimeSlot { slot_start, slot_end });
      }
      slot_start = slot_end;
    }
  }

  // Hours wrapping past midnight can overlap the next day's opening.
  slots.sort_by_key(|s| (s.slot_start, s.slot_end));
  slots.dedup();
  Ok(slots)
}

// ─── Courts and bookings ─────────────────────────────────────────────────────

/// A bookable court, as held in the `courts` reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Court {
  pub id:          String,
  pub client_code: String,
  /// Display label; bookings refer to courts by this.
  pub label:       String,
  pub type_name:   Option<String>,
  pub order_index: Option<i64>,
}

/// Anything occupying courts for an interval: an event or a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourtBooking {
  pub court_labels: Vec<String>,
  pub start_at:     DateTime<Utc>,
  pub end_at:       DateTime<Utc>,
  pub cancelled:    bool,
}

/// Court labels from a vendor `Courts` field, which is either an array of
/// `{"Label": ..}` objects or a comma-separated string.
pub fn parse_court_labels(field: &Value) -> Vec<String> {
  let labels: Vec<&str> = match field {
    Value::Array(items) => items
      .iter()
      .filter_map(|item| item.get("Label").and_then(Value::as_str))
      .collect(),
    Value::String(s) => s.split(',').collect(),
    _ => Vec::new(),
  };
  labels
    .into_iter()
    .map(str::trim)
    .filter(|l| !l.is_empty())
    .map(str::to_owned)
    .collect()
}

// ─── Calculator ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AvailabilityCalculator {
  client_code:   String,
  source_system: String,
  hours:         OperatingHours,
  slot_width:    TimeDelta,
}

impl AvailabilityCalculator {
  pub fn new(
    client_code: impl Into<String>,
    source_system: impl Into<String>,
    hours: OperatingHours,
    slot_width: TimeDelta,
  ) -> Result<Self> {
    if slot_width <= TimeDelta::zero() {
      return Err(Error::NonPositiveStep(slot_width));
    }
    Ok(Self {
      client_code: client_code.into(),
      source_system: source_system.into(),
      hours,
      slot_width,
    })
  }

  /// Free (court, slot) pairs inside `[start, end)`. Bookings must cover
  /// the same span; slots outside it are never emitted.
  pub fn calculate(
    &self,
    courts: &[Court],
    events: &[CourtBooking],
    reservations: &[CourtBooking],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
  ) -> Result<Vec<AvailabilitySession>> {
    let slots = generate_slots(&self.hours, start, end, self.slot_width)?;
    if slots.is_empty() {
      debug!(client_code = %self.client_code, "no slots inside operating hours");
      return Ok(Vec::new());
    }

    let mut blocked: HashSet<(&str, DateTime<Utc>)> = HashSet::new();
    for booking in events.iter().chain(reservations).filter(|b| !b.cancelled) {
      for slot in &slots {
        let overlaps =
          slot.slot_start < booking.end_at && slot.slot_end > booking.start_at;
        if overlaps {
          for label in &booking.court_labels {
            blocked.insert((label.as_str(), slot.slot_start));
          }
        }
      }
    }

    let mut free = Vec::with_capacity(slots.len() * courts.len());
    for court in courts {
      for slot in &slots {
        if blocked.contains(&(court.label.as_str(), slot.slot_start)) {
          continue;
        }
        free.push(AvailabilitySession {
          client_code:   self.client_code.clone(),
          source_system: self.source_system.clone(),
          court_id:      court.id.clone(),
          slot_start:    slot.slot_start,
          slot_end:      slot.slot_end,
          court_name:    Some(court.label.clone()),
          period_type:   None,
        });
      }
    }

    debug!(
      client_code = %self.client_code,
      slots = slots.len(),
      blocked = blocked.len(),
      free = free.len(),
      "computed court availability"
    );
    Ok(free)
  }
}
