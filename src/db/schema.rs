//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::{NestError, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new nests schema v{}", SCHEMA_VERSION);
        conn.execute_batch(NESTS_SCHEMA)
            .map_err(|e| NestError::Internal(format!("Failed to create nests table: {}", e)))?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(NestError::Internal(format!(
            "database schema v{} is newer than supported v{}",
            current_version, SCHEMA_VERSION
        )));
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| NestError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| NestError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| NestError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Nest table. Derived columns are NULL until the refresher fills them in.
const NESTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nests (
    nest_id INTEGER PRIMARY KEY,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    name TEXT NOT NULL DEFAULT 'unknown',
    area_name TEXT,
    polygon TEXT,
    spawnpoints INTEGER,
    m2 REAL,
    active INTEGER,
    pokemon_id INTEGER,
    discarded TEXT,
    updated INTEGER
);

CREATE INDEX IF NOT EXISTS idx_nests_active ON nests(active);
"#;

/// Spawnpoint table as written by the scanner backend. Only created for
/// in-memory databases; production databases are owned by that backend.
pub const SPAWNPOINT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS spawnpoint (
    id INTEGER PRIMARY KEY,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    last_seen INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_spawnpoint_lat_lon ON spawnpoint(lat, lon);
"#;
