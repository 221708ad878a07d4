//! Podplay: `x-api-key` auth, camelCase payloads with `_pagination`
//! envelopes, and UTC timestamps.

mod client;
mod normalize;

pub use client::{BASE_URL, PodplayClient};
pub use normalize::{
  normalize_events, normalize_members, normalize_reservations, normalize_sessions,
};

/// `source_system` value for records produced from Podplay.
pub const SOURCE_SYSTEM: &str = "podplay";
