//! Persistence for saved locations and their weather.

pub mod backend;
pub mod client;
pub mod sqlite;

pub use backend::{LocationBackend, StoreError, StoreResult};
pub use client::LocationStore;
pub use sqlite::SqliteLocationStore;
