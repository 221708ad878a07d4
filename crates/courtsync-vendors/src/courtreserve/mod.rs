//! CourtReserve: HTTP basic auth, PascalCase payloads, and naive
//! timestamps in facility-local (Eastern) time.

mod client;
mod normalize;

pub use client::{BASE_URL, CourtReserveClient};
pub use normalize::{
  event_bookings, normalize_cancellations, normalize_events, normalize_members,
  normalize_reservations, reservation_bookings,
};

/// `source_system` value for records produced from CourtReserve.
pub const SOURCE_SYSTEM: &str = "courtreserve";

/// Zone CourtReserve's naive local times are expressed in.
pub const LOCAL_ZONE: chrono_tz::Tz = chrono_tz::America::New_York;
