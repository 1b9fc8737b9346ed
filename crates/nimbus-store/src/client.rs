//! Async access to a location backend.

use std::path::Path;
use std::sync::Arc;

use nimbus_weather::{Location, Weather};
use parking_lot::Mutex;

use crate::backend::{LocationBackend, StoreError, StoreResult};
use crate::sqlite::SqliteLocationStore;

/// Cloneable async handle over a [`LocationBackend`].
///
/// Every call runs on the blocking pool with the backend locked, so callers
/// on the async runtime never wait on SQLite directly.
#[derive(Clone)]
pub struct LocationStore {
    backend: Arc<Mutex<Box<dyn LocationBackend>>>,
}

impl LocationStore {
    pub fn new(backend: impl LocationBackend + 'static) -> Self {
        Self {
            backend: Arc::new(Mutex::new(Box::new(backend))),
        }
    }

    /// SQLite store at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Ok(Self::new(SqliteLocationStore::new(path)?))
    }

    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self::new(SqliteLocationStore::in_memory()?))
    }

    async fn with_backend<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn LocationBackend) -> StoreResult<T> + Send + 'static,
    {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || {
            let guard = backend.lock();
            f(&**guard)
        })
        .await
        .map_err(|e| StoreError::storage(format!("store task failed: {}", e)))?
    }

    pub async fn list(&self) -> StoreResult<Vec<Location>> {
        self.with_backend(|b| b.list()).await
    }

    pub async fn get(&self, formatted_id: &str) -> StoreResult<Option<Location>> {
        let id = formatted_id.to_string();
        self.with_backend(move |b| b.get(&id)).await
    }

    pub async fn put(&self, location: &Location) -> StoreResult<()> {
        let location = location.clone();
        self.with_backend(move |b| b.put(&location)).await
    }

    pub async fn delete(&self, formatted_id: &str) -> StoreResult<()> {
        let id = formatted_id.to_string();
        self.with_backend(move |b| b.delete(&id)).await
    }

    pub async fn write_list(&self, locations: &[Location]) -> StoreResult<()> {
        let locations = locations.to_vec();
        self.with_backend(move |b| b.write_list(&locations)).await
    }

    pub async fn get_weather(&self, formatted_id: &str) -> StoreResult<Option<Weather>> {
        let id = formatted_id.to_string();
        self.with_backend(move |b| b.get_weather(&id)).await
    }

    pub async fn put_weather(&self, formatted_id: &str, weather: &Weather) -> StoreResult<()> {
        let id = formatted_id.to_string();
        let weather = weather.clone();
        self.with_backend(move |b| b.put_weather(&id, &weather)).await
    }

    pub async fn delete_weather(&self, formatted_id: &str) -> StoreResult<()> {
        let id = formatted_id.to_string();
        self.with_backend(move |b| b.delete_weather(&id)).await
    }

    pub async fn count(&self) -> StoreResult<usize> {
        self.with_backend(|b| b.count()).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use nimbus_core::WeatherSource;

    #[tokio::test]
    async fn test_async_roundtrip_and_clone_shares_backend() {
        let store = LocationStore::in_memory().unwrap();
        let other = store.clone();

        let current = Location::current_position(WeatherSource::OpenMeteo);
        store.put(&current).await.unwrap();

        assert_eq!(other.count().await.unwrap(), 1);
        assert_eq!(other.get(&current.formatted_id).await.unwrap(), Some(current.clone()));

        other.delete(&current.formatted_id).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
