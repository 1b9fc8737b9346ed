//! SQLite-based location storage.

use std::path::Path;

use chrono::Utc;
use nimbus_core::{DatabaseError, WeatherSource};
use nimbus_weather::{Coordinate, GeocodeInfo, Location, Weather};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use crate::backend::{LocationBackend, StoreError, StoreResult};

const SELECT_LOCATION: &str = "SELECT l.formatted_id, l.city_id, l.latitude, l.longitude, l.timezone,
        l.geocode, l.weather_source, l.is_current_position, l.is_resident, w.data
     FROM locations l
     LEFT JOIN weather w ON w.formatted_id = l.formatted_id";

/// Raw row before JSON decoding, so decode failures can name the record.
struct LocationRow {
    formatted_id: String,
    city_id: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    timezone: String,
    geocode: String,
    weather_source: String,
    is_current_position: bool,
    is_resident: bool,
    weather: Option<String>,
}

impl LocationRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            formatted_id: row.get(0)?,
            city_id: row.get(1)?,
            latitude: row.get(2)?,
            longitude: row.get(3)?,
            timezone: row.get(4)?,
            geocode: row.get(5)?,
            weather_source: row.get(6)?,
            is_current_position: row.get::<_, i32>(7)? != 0,
            is_resident: row.get::<_, i32>(8)? != 0,
            weather: row.get(9)?,
        })
    }

    fn into_location(self) -> StoreResult<Location> {
        let id = self.formatted_id;
        let weather_source = WeatherSource::from_id(&self.weather_source).ok_or_else(|| {
            StoreError::corrupt(&id, format!("unknown weather source {}", self.weather_source))
        })?;
        let geocode: GeocodeInfo = serde_json::from_str(&self.geocode)
            .map_err(|e| StoreError::corrupt(&id, format!("geocode: {}", e)))?;
        let weather = self
            .weather
            .map(|data| decode_weather(&id, &data))
            .transpose()?;
        let coordinate = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => None,
        };

        Ok(Location {
            formatted_id: id,
            city_id: self.city_id,
            coordinate,
            timezone: self.timezone,
            geocode,
            weather_source,
            is_current_position: self.is_current_position,
            is_resident: self.is_resident,
            weather,
        })
    }
}

fn decode_weather(id: &str, data: &str) -> StoreResult<Weather> {
    serde_json::from_str(data).map_err(|e| StoreError::corrupt(id, format!("weather: {}", e)))
}

fn encode<T: serde::Serialize>(id: &str, value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::corrupt(id, e.to_string()))
}

/// SQLite-based location storage.
pub struct SqliteLocationStore {
    conn: Connection,
}

impl SqliteLocationStore {
    /// Open the store at the given path, creating file and schema if needed.
    pub fn new<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::storage(format!("create {}: {}", parent.display(), e)))?;
            }
        }
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            StoreError::Database(DatabaseError::ConnectionFailed(format!(
                "{}: {}",
                path.as_ref().display(),
                e
            )))
        })?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS locations (
                formatted_id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                city_id TEXT NOT NULL DEFAULT '',
                latitude REAL,
                longitude REAL,
                timezone TEXT NOT NULL,
                geocode TEXT NOT NULL DEFAULT '{}',
                weather_source TEXT NOT NULL,
                is_current_position INTEGER NOT NULL DEFAULT 0,
                is_resident INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS weather (
                formatted_id TEXT PRIMARY KEY
                    REFERENCES locations(formatted_id) ON DELETE CASCADE,
                data TEXT NOT NULL,
                update_time TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_locations_position ON locations(position);
            "#,
        )?;
        Ok(())
    }

    fn exists(tx: &Transaction, formatted_id: &str) -> StoreResult<bool> {
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM locations WHERE formatted_id = ?1",
            params![formatted_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Upsert the location row. `position` of `None` appends new rows and
    /// keeps the place of existing ones.
    fn upsert(tx: &Transaction, location: &Location, position: Option<i64>) -> StoreResult<()> {
        let id = location.formatted_id.as_str();
        let position = match position {
            Some(p) => p,
            None => tx.query_row(
                "SELECT COALESCE(
                    (SELECT position FROM locations WHERE formatted_id = ?1),
                    (SELECT COALESCE(MAX(position) + 1, 0) FROM locations))",
                params![id],
                |row| row.get(0),
            )?,
        };

        tx.execute(
            "INSERT INTO locations (formatted_id, position, city_id, latitude, longitude, timezone,
                geocode, weather_source, is_current_position, is_resident, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(formatted_id) DO UPDATE SET
                position = excluded.position,
                city_id = excluded.city_id,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                timezone = excluded.timezone,
                geocode = excluded.geocode,
                weather_source = excluded.weather_source,
                is_current_position = excluded.is_current_position,
                is_resident = excluded.is_resident,
                updated_at = excluded.updated_at",
            params![
                id,
                position,
                location.city_id,
                location.coordinate.map(|c| c.latitude),
                location.coordinate.map(|c| c.longitude),
                location.timezone,
                encode(id, &location.geocode)?,
                location.weather_source.id(),
                location.is_current_position as i32,
                location.is_resident as i32,
                Utc::now().to_rfc3339(),
            ],
        )?;

        if let Some(weather) = &location.weather {
            Self::write_weather(tx, id, weather)?;
        }
        Ok(())
    }

    fn write_weather(tx: &Transaction, formatted_id: &str, weather: &Weather) -> StoreResult<()> {
        tx.execute(
            "INSERT INTO weather (formatted_id, data, update_time) VALUES (?1, ?2, ?3)
             ON CONFLICT(formatted_id) DO UPDATE SET
                data = excluded.data,
                update_time = excluded.update_time",
            params![
                formatted_id,
                encode(formatted_id, weather)?,
                weather.base.update_time.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

impl LocationBackend for SqliteLocationStore {
    fn list(&self) -> StoreResult<Vec<Location>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY l.position ASC", SELECT_LOCATION))?;
        let rows = stmt
            .query_map([], LocationRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(LocationRow::into_location).collect()
    }

    fn get(&self, formatted_id: &str) -> StoreResult<Option<Location>> {
        let row = self
            .conn
            .query_row(
                &format!("{} WHERE l.formatted_id = ?1", SELECT_LOCATION),
                params![formatted_id],
                LocationRow::from_row,
            )
            .optional()?;
        row.map(LocationRow::into_location).transpose()
    }

    fn put(&self, location: &Location) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        Self::upsert(&tx, location, None)?;
        tx.commit()?;
        tracing::debug!("Stored location {}", location.formatted_id);
        Ok(())
    }

    fn delete(&self, formatted_id: &str) -> StoreResult<()> {
        let rows = self.conn.execute(
            "DELETE FROM locations WHERE formatted_id = ?1",
            params![formatted_id],
        )?;
        if rows == 0 {
            return Err(StoreError::not_found(formatted_id));
        }
        Ok(())
    }

    fn write_list(&self, locations: &[Location]) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for (position, location) in locations.iter().enumerate() {
            Self::upsert(&tx, location, Some(position as i64))?;
        }

        let keep: Vec<&str> = locations.iter().map(|l| l.formatted_id.as_str()).collect();
        let existing: Vec<String> = tx
            .prepare("SELECT formatted_id FROM locations")?
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for id in existing.iter().filter(|id| !keep.contains(&id.as_str())) {
            tx.execute("DELETE FROM locations WHERE formatted_id = ?1", params![id])?;
        }

        tx.commit()?;
        tracing::debug!("Stored list of {} locations", locations.len());
        Ok(())
    }

    fn get_weather(&self, formatted_id: &str) -> StoreResult<Option<Weather>> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM weather WHERE formatted_id = ?1",
                params![formatted_id],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| decode_weather(formatted_id, &d)).transpose()
    }

    fn put_weather(&self, formatted_id: &str, weather: &Weather) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        if !Self::exists(&tx, formatted_id)? {
            return Err(StoreError::not_found(formatted_id));
        }
        Self::write_weather(&tx, formatted_id, weather)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_weather(&self, formatted_id: &str) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM weather WHERE formatted_id = ?1",
            params![formatted_id],
        )?;
        Ok(())
    }

    fn count(&self) -> StoreResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
