//! Core types and trait definitions for the courtsync booking warehouse.
//!
//! This crate is deliberately free of HTTP and database dependencies. It
//! holds the canonical record model, the extraction windower, the staging
//! reconciler (generic over any [`store::Warehouse`]), and the court
//! availability calculator.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod availability;
pub mod dedup;
pub mod entity;
pub mod error;
pub mod reconcile;
pub mod record;
pub mod store;
pub mod value;
pub mod watermark;
pub mod window;

pub use error::{Error, Result};
