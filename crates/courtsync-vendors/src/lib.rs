//! HTTP clients for the scheduling vendors courtsync ingests from, and the
//! normalizers that turn their JSON payloads into canonical records.
//!
//! Clients return raw `serde_json::Value` items; normalizers are pure
//! functions so they can be tested against inline fixtures.

pub mod courtreserve;
pub mod error;
mod fields;
pub mod podplay;

pub use error::{Error, Result};
