// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod autocomplete;
pub mod catalog;
pub mod config;
pub mod deals;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod search;
pub mod store;

pub use crate::api::{router, AppState};
