//! Main store implementation.

use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, params};
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};

use cyface_types::{
    Acceleration, GeoLocation, Measurement, MeasurementId, MeasurementStatus, Modality,
    ParseError, Track, millis_to_datetime,
};

use crate::error::{Error, Result};
use crate::models::{LocationRow, StoredMeasurement};
use crate::preferences::Preferences;
use crate::queries::{MeasurementQuery, SUMMARY_SELECT};
use crate::schema::{self, MEASUREMENT_SEQUENCE};

/// SQLite-based store for captured measurements.
///
/// Every mutating operation runs inside its own transaction, so a reader on
/// the same store never observes a half-written batch. The store itself is
/// not `Sync`; callers that share it between tasks wrap it in a mutex, which
/// makes that mutex the single serialization point for writes.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening measurement store at {}", path.display());
        let conn = Connection::open(path).map_err(|source| Error::Unavailable {
            path: path.to_path_buf(),
            source,
        })?;

        // SQLite opens lazily, so an unreadable file only surfaces here.
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|source| Error::Unavailable {
            path: path.to_path_buf(),
            source,
        })?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

// Measurement operations
impl Store {
    /// Allocate the next identifier and persist a new, open measurement.
    pub fn create_measurement(&self, timestamp: i64, modality: Modality) -> Result<StoredMeasurement> {
        let tx = self.conn.unchecked_transaction()?;

        let id: i64 = tx.query_row(
            "SELECT next_value FROM identifiers WHERE name = ?",
            [MEASUREMENT_SEQUENCE],
            |row| row.get(0),
        )?;
        tx.execute(
            "UPDATE identifiers SET next_value = ?1 WHERE name = ?2",
            params![id + 1, MEASUREMENT_SEQUENCE],
        )?;
        tx.execute(
            "INSERT INTO measurements (id, timestamp, modality, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                timestamp,
                modality.as_str(),
                MeasurementStatus::Open.as_str()
            ],
        )?;
        tx.commit()?;

        info!(measurement_id = id, %modality, "Created measurement");

        Ok(StoredMeasurement {
            id: id as MeasurementId,
            timestamp,
            modality,
            status: MeasurementStatus::Open,
            track_count: 0,
            location_count: 0,
            acceleration_count: 0,
        })
    }

    /// Open a new track on a measurement and return it.
    pub fn append_track(&self, measurement_id: MeasurementId) -> Result<Track> {
        let tx = self.conn.unchecked_transaction()?;
        ensure_exists(&tx, measurement_id)?;
        let (_, index) = insert_track(&tx, measurement_id)?;
        tx.commit()?;

        debug!(measurement_id, track = index, "Opened track");
        Ok(Track::new(index))
    }

    /// Append sensor points to the current track of a measurement.
    ///
    /// A measurement without tracks gets its first track here. The whole batch
    /// is written in one transaction.
    pub fn save(
        &self,
        measurement_id: MeasurementId,
        locations: &[GeoLocation],
        accelerations: &[Acceleration],
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        ensure_exists(&tx, measurement_id)?;

        let track_id = match current_track_id(&tx, measurement_id)? {
            Some(track_id) => track_id,
            None => insert_track(&tx, measurement_id)?.0,
        };

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO geo_locations (track_id, timestamp, latitude, longitude, speed, accuracy)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for location in locations {
                stmt.execute(params![
                    track_id,
                    location.timestamp,
                    location.latitude,
                    location.longitude,
                    location.speed,
                    location.accuracy,
                ])?;
            }

            let mut stmt = tx.prepare_cached(
                "INSERT INTO accelerations (track_id, timestamp, x, y, z)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for acceleration in accelerations {
                stmt.execute(params![
                    track_id,
                    acceleration.timestamp,
                    acceleration.x,
                    acceleration.y,
                    acceleration.z,
                ])?;
            }
        }

        tx.commit()?;

        debug!(
            measurement_id,
            locations = locations.len(),
            accelerations = accelerations.len(),
            "Saved sensor points"
        );
        Ok(())
    }

    /// Load a measurement with all of its tracks and points.
    pub fn load(&self, measurement_id: MeasurementId) -> Result<Measurement> {
        // One read transaction gives a consistent snapshot across tables.
        let tx = self.conn.unchecked_transaction()?;

        let header = tx
            .query_row(
                "SELECT timestamp, modality, status FROM measurements WHERE id = ?",
                [measurement_id as i64],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        parse_column::<Modality>(1, &row.get::<_, String>(1)?)?,
                        parse_column::<MeasurementStatus>(2, &row.get::<_, String>(2)?)?,
                    ))
                },
            )
            .optional()?;

        let Some((timestamp, modality, status)) = header else {
            return Err(Error::NotFound(measurement_id));
        };

        let tracks = read_tracks(&tx, measurement_id)?;
        tx.commit()?;

        Ok(Measurement {
            id: measurement_id,
            timestamp,
            modality,
            status,
            tracks,
        })
    }

    /// Load the tracks of a measurement in index order.
    pub fn load_tracks(&self, measurement_id: MeasurementId) -> Result<Vec<Track>> {
        let tx = self.conn.unchecked_transaction()?;
        ensure_exists(&tx, measurement_id)?;
        let tracks = read_tracks(&tx, measurement_id)?;
        tx.commit()?;
        Ok(tracks)
    }

    /// Get the summary row of a measurement.
    pub fn get_measurement(&self, measurement_id: MeasurementId) -> Result<Option<StoredMeasurement>> {
        let sql = format!("{} WHERE m.id = ?", SUMMARY_SELECT);
        let measurement = self
            .conn
            .query_row(&sql, [measurement_id as i64], row_to_summary)
            .optional()?;
        Ok(measurement)
    }

    /// Query measurement summaries with filters.
    pub fn query_measurements(&self, query: &MeasurementQuery) -> Result<Vec<StoredMeasurement>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let measurements = stmt
            .query_map(params_ref.as_slice(), row_to_summary)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(measurements)
    }

    /// Count all stored measurements.
    pub fn count_measurements(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Count the geo-locations of a measurement.
    pub fn count_locations(&self, measurement_id: MeasurementId) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM geo_locations g JOIN tracks t ON g.track_id = t.id
             WHERE t.measurement_id = ?",
            [measurement_id as i64],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Count the acceleration samples of a measurement.
    pub fn count_accelerations(&self, measurement_id: MeasurementId) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM accelerations a JOIN tracks t ON a.track_id = t.id
             WHERE t.measurement_id = ?",
            [measurement_id as i64],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Update the status of a measurement.
    pub fn update_status(&self, measurement_id: MeasurementId, status: MeasurementStatus) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE measurements SET status = ?1 WHERE id = ?2",
            params![status.as_str(), measurement_id as i64],
        )?;

        if updated == 0 {
            return Err(Error::NotFound(measurement_id));
        }

        debug!(measurement_id, %status, "Updated measurement status");
        Ok(())
    }

    /// Mark a measurement as confirmed by the collector.
    pub fn mark_synchronized(&self, measurement_id: MeasurementId) -> Result<()> {
        self.update_status(measurement_id, MeasurementStatus::Synchronized)
    }

    /// Finish every measurement still marked open or paused.
    ///
    /// Returns the number of measurements that were finished.
    pub fn finish_capturing_measurements(&self) -> Result<usize> {
        let finished = self.conn.execute(
            "UPDATE measurements SET status = ?1 WHERE status IN (?2, ?3)",
            params![
                MeasurementStatus::Finished.as_str(),
                MeasurementStatus::Open.as_str(),
                MeasurementStatus::Paused.as_str()
            ],
        )?;

        if finished > 0 {
            info!("Finished {} dangling measurement(s)", finished);
        }
        Ok(finished)
    }

    /// Delete a measurement with all tracks and points.
    pub fn delete(&self, measurement_id: MeasurementId) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let id = measurement_id as i64;

        tx.execute(
            "DELETE FROM accelerations WHERE track_id IN
             (SELECT id FROM tracks WHERE measurement_id = ?)",
            [id],
        )?;
        tx.execute(
            "DELETE FROM geo_locations WHERE track_id IN
             (SELECT id FROM tracks WHERE measurement_id = ?)",
            [id],
        )?;
        tx.execute("DELETE FROM tracks WHERE measurement_id = ?", [id])?;
        let deleted = tx.execute("DELETE FROM measurements WHERE id = ?", [id])?;

        if deleted == 0 {
            // Dropping the transaction rolls back.
            return Err(Error::NotFound(measurement_id));
        }
        tx.commit()?;

        info!(measurement_id, "Deleted measurement");
        Ok(())
    }

    /// Delete every measurement. Identifier allocation is not reset.
    pub fn delete_all(&self) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM accelerations", [])?;
        tx.execute("DELETE FROM geo_locations", [])?;
        tx.execute("DELETE FROM tracks", [])?;
        let deleted = tx.execute("DELETE FROM measurements", [])?;
        tx.commit()?;

        info!("Deleted {} measurement(s)", deleted);
        Ok(deleted)
    }

    /// Drop the acceleration samples of a measurement, keeping its geo trace.
    ///
    /// Returns the number of removed samples.
    pub fn clean(&self, measurement_id: MeasurementId) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        ensure_exists(&tx, measurement_id)?;
        let removed = tx.execute(
            "DELETE FROM accelerations WHERE track_id IN
             (SELECT id FROM tracks WHERE measurement_id = ?)",
            [measurement_id as i64],
        )?;
        tx.commit()?;

        info!(measurement_id, removed, "Cleaned measurement");
        Ok(removed)
    }

    /// Write the geo trace of a measurement as CSV.
    ///
    /// Returns the number of rows written, excluding the header.
    pub fn export_csv<W: Write>(&self, measurement_id: MeasurementId, writer: W) -> Result<usize> {
        let measurement = self.load(measurement_id)?;
        let mut csv = csv::Writer::from_writer(writer);
        let mut rows = 0;

        for track in &measurement.tracks {
            for location in &track.geo_locations {
                let timestamp = millis_to_datetime(location.timestamp)
                    .and_then(|dt| dt.format(&Rfc3339).ok())
                    .unwrap_or_else(|| location.timestamp.to_string());

                csv.serialize(LocationRow {
                    measurement_id,
                    track: track.index,
                    timestamp,
                    latitude: location.latitude,
                    longitude: location.longitude,
                    speed: location.speed,
                    accuracy: location.accuracy,
                })?;
                rows += 1;
            }
        }

        csv.flush()?;
        Ok(rows)
    }
}

impl Preferences for Store {
    fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM preferences WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO preferences (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }
}

fn ensure_exists(conn: &Connection, measurement_id: MeasurementId) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM measurements WHERE id = ?",
        [measurement_id as i64],
        |row| row.get(0),
    )?;

    if exists {
        Ok(())
    } else {
        Err(Error::NotFound(measurement_id))
    }
}

fn current_track_id(conn: &Connection, measurement_id: MeasurementId) -> Result<Option<i64>> {
    let track_id = conn
        .query_row(
            "SELECT id FROM tracks WHERE measurement_id = ? ORDER BY track_index DESC LIMIT 1",
            [measurement_id as i64],
            |row| row.get(0),
        )
        .optional()?;
    Ok(track_id)
}

/// Insert the next track and return its row id and index.
fn insert_track(conn: &Connection, measurement_id: MeasurementId) -> Result<(i64, u32)> {
    let index: i64 = conn.query_row(
        "SELECT COALESCE(MAX(track_index) + 1, 0) FROM tracks WHERE measurement_id = ?",
        [measurement_id as i64],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO tracks (measurement_id, track_index) VALUES (?1, ?2)",
        params![measurement_id as i64, index],
    )?;
    Ok((conn.last_insert_rowid(), index as u32))
}

fn read_tracks(conn: &Connection, measurement_id: MeasurementId) -> Result<Vec<Track>> {
    let mut track_stmt = conn.prepare(
        "SELECT id, track_index FROM tracks WHERE measurement_id = ? ORDER BY track_index",
    )?;
    let track_rows = track_stmt
        .query_map([measurement_id as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut location_stmt = conn.prepare_cached(
        "SELECT timestamp, latitude, longitude, speed, accuracy
         FROM geo_locations WHERE track_id = ? ORDER BY id",
    )?;
    let mut acceleration_stmt = conn.prepare_cached(
        "SELECT timestamp, x, y, z FROM accelerations WHERE track_id = ? ORDER BY id",
    )?;

    let mut tracks = Vec::with_capacity(track_rows.len());
    for (track_id, index) in track_rows {
        let geo_locations = location_stmt
            .query_map([track_id], |row| {
                Ok(GeoLocation {
                    timestamp: row.get(0)?,
                    latitude: row.get(1)?,
                    longitude: row.get(2)?,
                    speed: row.get(3)?,
                    accuracy: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let accelerations = acceleration_stmt
            .query_map([track_id], |row| {
                Ok(Acceleration {
                    timestamp: row.get(0)?,
                    x: row.get(1)?,
                    y: row.get(2)?,
                    z: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracks.push(Track {
            index: index as u32,
            geo_locations,
            accelerations,
        });
    }

    Ok(tracks)
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMeasurement> {
    Ok(StoredMeasurement {
        id: row.get::<_, i64>(0)? as MeasurementId,
        timestamp: row.get(1)?,
        modality: parse_column(2, &row.get::<_, String>(2)?)?,
        status: parse_column(3, &row.get::<_, String>(3)?)?,
        track_count: row.get::<_, i64>(4)? as u32,
        location_count: row.get::<_, i64>(5)? as u64,
        acceleration_count: row.get::<_, i64>(6)? as u64,
    })
}

fn parse_column<T>(index: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseError>,
{
    value.parse().map_err(|e: ParseError| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}
