//! Location storage backend trait and error types.

use nimbus_core::error::RusqliteErrorExt;
use nimbus_core::{AppError, DatabaseError};
use nimbus_weather::{Location, Weather};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Location not found: {0}")]
    NotFound(String),

    /// A row that cannot be turned back into a model value.
    #[error("Corrupt record {id}: {message}")]
    Corrupt { id: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Database(DatabaseError),
}

impl StoreError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn corrupt(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.into_database_error())
    }
}

impl From<StoreError> for DatabaseError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => DatabaseError::QueryFailed(format!("not found: {}", id)),
            StoreError::Corrupt { id, message } => {
                DatabaseError::Corruption(format!("{}: {}", id, message))
            }
            StoreError::Storage(message) => DatabaseError::QueryFailed(message),
            StoreError::Database(e) => e,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Database(e.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for locations and their weather.
///
/// Weather lives beside its location, keyed by formatted id, and goes away
/// with it. Locations keep the order last written by [`write_list`].
///
/// Implementations don't need to be Sync; [`crate::LocationStore`] serializes
/// access behind a mutex.
///
/// [`write_list`]: LocationBackend::write_list
pub trait LocationBackend: Send {
    /// All locations in list order, weather attached.
    fn list(&self) -> StoreResult<Vec<Location>>;

    /// Returns `None` if the location doesn't exist.
    fn get(&self, formatted_id: &str) -> StoreResult<Option<Location>>;

    /// Insert or replace by formatted id (last write wins). New locations go
    /// to the end of the list; existing ones keep their place. When the
    /// location carries weather it is written in the same transaction.
    fn put(&self, location: &Location) -> StoreResult<()>;

    /// Delete a location and its weather.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if the location doesn't exist.
    fn delete(&self, formatted_id: &str) -> StoreResult<()>;

    /// Replace the whole list: upsert in the given order and drop locations
    /// not in it.
    fn write_list(&self, locations: &[Location]) -> StoreResult<()>;

    fn get_weather(&self, formatted_id: &str) -> StoreResult<Option<Weather>>;

    /// # Errors
    /// Returns `StoreError::NotFound` if no location has this formatted id.
    fn put_weather(&self, formatted_id: &str, weather: &Weather) -> StoreResult<()>;

    /// Drop the stored weather of a location. Absent weather is not an error.
    fn delete_weather(&self, formatted_id: &str) -> StoreResult<()>;

    fn count(&self) -> StoreResult<usize> {
        Ok(self.list()?.len())
    }
}
