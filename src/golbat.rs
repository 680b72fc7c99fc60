//! Spawnpoint source backed by the scanner's SQLite database.
//!
//! The `spawnpoint` table is owned by another process; this module only reads
//! it. Containment is evaluated inside SQLite by `st_contains_geojson`, a
//! scalar function registered on every connection. Rows are first narrowed by
//! the polygon's bounding box on the indexed `lat`/`lon` columns and by
//! `last_seen`, so the exact test only runs on candidates.

use std::path::Path;
use std::time::Duration;

use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, info};

use crate::db::{schema, SharedConnection};
use crate::error::{NestError, Result};
use crate::geometry::NestGeometry;

/// Spawnpoints seen within this window count towards a nest.
pub const COUNT_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Window for listing spawnpoint ids.
pub const LIST_WINDOW: Duration = Duration::from_secs(2 * 24 * 60 * 60);

const CONTAINS_FUNCTION: &str = "st_contains_geojson";

const COUNT_SQL: &str = "SELECT COUNT(*) FROM spawnpoint
     WHERE lat > ?1 AND lon > ?2 AND lat < ?3 AND lon < ?4
       AND last_seen > ?5
       AND st_contains_geojson(?6, lon, lat)";

const IDS_SQL: &str = "SELECT id FROM spawnpoint
     WHERE lat > ?1 AND lon > ?2 AND lat < ?3 AND lon < ?4
       AND last_seen > ?5
       AND st_contains_geojson(?6, lon, lat)
     ORDER BY id";

/// Spatial query collaborator used by the refresher.
#[async_trait::async_trait]
pub trait SpawnpointSource: Send + Sync {
    /// Number of recently seen spawnpoints inside the polygon.
    async fn spawnpoint_count(&self, geometry: &NestGeometry) -> Result<i64>;

    /// Ids of recently seen spawnpoints inside the polygon, ascending.
    async fn contained_spawnpoints(&self, geometry: &NestGeometry) -> Result<Vec<u64>>;
}

/// Read access to the scanner's spawnpoint table.
#[derive(Clone)]
pub struct GolbatDb {
    conn: SharedConnection,
}

impl GolbatDb {
    /// Open an existing spawnpoint database read-only.
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening spawnpoint database at {:?}", path);

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| NestError::Internal(format!("Failed to open SQLite: {}", e)))?;

        Self::from_connection(conn)
    }

    /// In-memory database with an empty spawnpoint table (for testing).
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory spawnpoint database");

        let conn = Connection::open_in_memory()
            .map_err(|e| NestError::Internal(format!("Failed to open in-memory SQLite: {}", e)))?;
        conn.execute_batch(schema::SPAWNPOINT_SCHEMA)
            .map_err(|e| NestError::Internal(format!("Failed to create spawnpoint table: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        register_contains_function(&conn)?;
        Ok(Self {
            conn: SharedConnection::new(conn),
        })
    }

    /// Insert or replace a spawnpoint. Only works on writable databases.
    pub fn insert_spawnpoint(&self, id: u64, lat: f64, lon: f64, last_seen: i64) -> Result<()> {
        let id = i64::try_from(id)
            .map_err(|_| NestError::Internal(format!("spawnpoint id {} out of range", id)))?;
        self.conn.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO spawnpoint (id, lat, lon, last_seen) VALUES (?1, ?2, ?3, ?4)",
                params![id, lat, lon, last_seen],
            )?;
            Ok(())
        })
    }
}

/// Query parameters shared by both statements.
struct SpatialFilter {
    min_lat: f64,
    min_lon: f64,
    max_lat: f64,
    max_lon: f64,
    cutoff: i64,
    geojson: String,
}

impl SpatialFilter {
    fn new(geometry: &NestGeometry, window: Duration) -> Result<Self> {
        let bbox = geometry.bbox();
        let geojson = geometry.to_geojson()?;
        let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
        Ok(Self {
            min_lat: bbox.min_lat,
            min_lon: bbox.min_lon,
            max_lat: bbox.max_lat,
            max_lon: bbox.max_lon,
            cutoff: chrono::Utc::now().timestamp().saturating_sub(window),
            geojson,
        })
    }
}

#[async_trait::async_trait]
impl SpawnpointSource for GolbatDb {
    async fn spawnpoint_count(&self, geometry: &NestGeometry) -> Result<i64> {
        let filter = SpatialFilter::new(geometry, COUNT_WINDOW)?;

        self.conn
            .run(move |conn| {
                conn.query_row(
                    COUNT_SQL,
                    params![
                        filter.min_lat,
                        filter.min_lon,
                        filter.max_lat,
                        filter.max_lon,
                        filter.cutoff,
                        filter.geojson,
                    ],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(|e| NestError::Query(format!("spawnpoint count failed: {}", e)))
            })
            .await
    }

    async fn contained_spawnpoints(&self, geometry: &NestGeometry) -> Result<Vec<u64>> {
        let filter = SpatialFilter::new(geometry, LIST_WINDOW)?;

        self.conn
            .run(move |conn| {
                let query_err = |e: rusqlite::Error| {
                    NestError::Query(format!("spawnpoint listing failed: {}", e))
                };
                let mut stmt = conn.prepare(IDS_SQL).map_err(query_err)?;
                let ids = stmt
                    .query_map(
                        params![
                            filter.min_lat,
                            filter.min_lon,
                            filter.max_lat,
                            filter.max_lon,
                            filter.cutoff,
                            filter.geojson,
                        ],
                        |row| row.get::<_, i64>(0),
                    )
                    .map_err(query_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(query_err)?;

                ids.into_iter()
                    .map(|id| {
                        u64::try_from(id).map_err(|_| {
                            NestError::Query(format!("negative spawnpoint id {}", id))
                        })
                    })
                    .collect()
            })
            .await
    }
}

fn parse_aux_geometry(raw: ValueRef<'_>) -> std::result::Result<NestGeometry, String> {
    let text = raw.as_str().map_err(|e| e.to_string())?;
    NestGeometry::parse(text).map_err(|e| e.to_string())
}

/// Register `st_contains_geojson(geojson, lon, lat)`. The polygon argument is
/// a bound parameter, so it is parsed once per statement and cached as
/// auxiliary data.
fn register_contains_function(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        CONTAINS_FUNCTION,
        3,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let geometry = ctx.get_or_create_aux(0, parse_aux_geometry)?;
            let lon: f64 = ctx.get(1)?;
            let lat: f64 = ctx.get(2)?;
            Ok(geometry.contains_point(lon, lat))
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str =
        r#"{"type":"Polygon","coordinates":[[[0,0],[0.01,0],[0.01,0.01],[0,0.01],[0,0]]]}"#;

    // Triangle covering the lower-right half of SQUARE
    const TRIANGLE: &str =
        r#"{"type":"Polygon","coordinates":[[[0,0],[0.01,0],[0.01,0.01],[0,0]]]}"#;

    fn hours_ago(hours: i64) -> i64 {
        chrono::Utc::now().timestamp() - hours * 3600
    }

    fn seeded() -> GolbatDb {
        let db = GolbatDb::open_in_memory().unwrap();
        // inside the triangle
        db.insert_spawnpoint(3, 0.002, 0.008, hours_ago(1)).unwrap();
        db.insert_spawnpoint(1, 0.001, 0.005, hours_ago(24 * 3)).unwrap();
        // inside the square, outside the triangle
        db.insert_spawnpoint(2, 0.008, 0.002, hours_ago(1)).unwrap();
        // inside the triangle but stale
        db.insert_spawnpoint(4, 0.003, 0.009, hours_ago(24 * 8)).unwrap();
        // outside everything
        db.insert_spawnpoint(5, 0.5, 0.5, hours_ago(1)).unwrap();
        db
    }

    #[tokio::test]
    async fn test_count_uses_exact_containment() {
        let db = seeded();

        let square = NestGeometry::parse(SQUARE).unwrap();
        assert_eq!(db.spawnpoint_count(&square).await.unwrap(), 3);

        let triangle = NestGeometry::parse(TRIANGLE).unwrap();
        assert_eq!(db.spawnpoint_count(&triangle).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_listing_uses_shorter_window_and_is_ordered() {
        let db = seeded();
        let square = NestGeometry::parse(SQUARE).unwrap();

        // id 1 was seen three days ago: counted, but not listed
        assert_eq!(db.contained_spawnpoints(&square).await.unwrap(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_empty_table() {
        let db = GolbatDb::open_in_memory().unwrap();
        let square = NestGeometry::parse(SQUARE).unwrap();
        assert_eq!(db.spawnpoint_count(&square).await.unwrap(), 0);
        assert!(db.contained_spawnpoints(&square).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_table_is_query_error() {
        let conn = Connection::open_in_memory().unwrap();
        let db = GolbatDb::from_connection(conn).unwrap();
        let square = NestGeometry::parse(SQUARE).unwrap();

        assert!(matches!(
            db.spawnpoint_count(&square).await,
            Err(NestError::Query(_))
        ));
    }

    #[tokio::test]
    async fn test_negative_id_is_query_error() {
        let db = seeded();
        db.conn
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO spawnpoint (id, lat, lon, last_seen) VALUES (-7, 0.005, 0.005, ?1)",
                    params![hours_ago(1)],
                )?;
                Ok(())
            })
            .unwrap();
        let square = NestGeometry::parse(SQUARE).unwrap();

        assert!(matches!(
            db.contained_spawnpoints(&square).await,
            Err(NestError::Query(_))
        ));
    }

    #[test]
    fn test_open_existing_file_read_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("golbat.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(schema::SPAWNPOINT_SCHEMA).unwrap();
        }

        let db = GolbatDb::open(&path).unwrap();
        assert!(db.insert_spawnpoint(1, 0.0, 0.0, 0).is_err());
    }
}
