//! Database schema and migrations.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{Error, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Name of the identifier sequence for measurements.
pub(crate) const MEASUREMENT_SEQUENCE: &str = "measurement";

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        let tx = conn.unchecked_transaction()?;
        create_schema_v1(&tx)?;
        set_schema_version(&tx, SCHEMA_VERSION)?;
        tx.commit()?;
    } else if version != SCHEMA_VERSION {
        return Err(Error::ModelNotLoadable {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    Ok(())
}

/// Get the current schema version, 0 for an uninitialized database.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
        .optional()?;

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the initial schema (version 1).
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- Identifier sequences. Values only ever grow, deletes never rewind them.
        CREATE TABLE IF NOT EXISTS identifiers (
            name TEXT PRIMARY KEY,
            next_value INTEGER NOT NULL
        );
        INSERT OR IGNORE INTO identifiers (name, next_value) VALUES ('measurement', 1);

        CREATE TABLE IF NOT EXISTS measurements (
            id INTEGER PRIMARY KEY,
            timestamp INTEGER NOT NULL,
            modality TEXT NOT NULL,
            status TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_measurements_status
            ON measurements(status);

        CREATE TABLE IF NOT EXISTS tracks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            measurement_id INTEGER NOT NULL REFERENCES measurements(id) ON DELETE CASCADE,
            track_index INTEGER NOT NULL,
            UNIQUE(measurement_id, track_index)
        );

        CREATE TABLE IF NOT EXISTS geo_locations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track_id INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
            timestamp INTEGER NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            speed REAL NOT NULL,
            accuracy REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_geo_locations_track
            ON geo_locations(track_id, timestamp);

        CREATE TABLE IF NOT EXISTS accelerations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track_id INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
            timestamp INTEGER NOT NULL,
            x REAL NOT NULL,
            y REAL NOT NULL,
            z REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_accelerations_track
            ON accelerations(track_id, timestamp);

        CREATE TABLE IF NOT EXISTS preferences (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    Ok(())
}
