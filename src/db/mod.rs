//! SQLite storage for nest records
//!
//! ## Tables
//!
//! - `nests` - one row per nest: identity, GeoJSON polygon, derived
//!   attributes (`m2`, `spawnpoints`), status (`active`, `discarded`),
//!   `pokemon_id` and the `updated` timestamp
//!
//! The refresher and the overlap resolver only talk to the [`NestStore`]
//! trait; [`NestsDb`] is the SQLite-backed implementation. The spawnpoint
//! database lives in [`crate::golbat`].

pub mod nests;
pub mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{NestError, Result};
use crate::models::{Nest, NestPartialUpdate, NestStats, NewNest};

/// Options for bulk nest listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListNestsOptions {
    /// Polygons can be large; only load them when needed
    pub include_polygon: bool,
}

/// Storage collaborator for nest records.
#[async_trait::async_trait]
pub trait NestStore: Send + Sync {
    async fn get_nest(&self, nest_id: i64, include_polygon: bool) -> Result<Nest>;

    async fn list_nests(&self, opts: ListNestsOptions) -> Result<Vec<Nest>>;

    /// Single-row sparse update. Fails with `NestNotFound` if no row matched.
    async fn update_nest_partial(&self, nest_id: i64, update: &NestPartialUpdate) -> Result<()>;

    /// Every nest with `active = true`, polygon included.
    async fn list_active_nests(&self) -> Result<Vec<Nest>>;
}

/// A SQLite connection shared between async tasks. Statements run on the
/// blocking thread pool, one at a time.
#[derive(Clone)]
pub(crate) struct SharedConnection {
    conn: Arc<Mutex<Connection>>,
}

impl SharedConnection {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run a closure against the connection on the blocking thread pool.
    pub(crate) async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| NestError::Internal(format!("Lock poisoned: {}", e)))?;
            task(&mut conn)
        })
        .await
        .map_err(|e| NestError::Internal(format!("database task failed: {}", e)))?
    }

    /// Synchronous access for setup code and tests.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| NestError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }
}

/// SQLite database for nests
#[derive(Clone)]
pub struct NestsDb {
    conn: SharedConnection,
}

impl NestsDb {
    /// Open or create the nests database
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening nests database at {:?}", path);

        let conn = Connection::open(path)
            .map_err(|e| NestError::Internal(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| NestError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory nests database");

        let conn = Connection::open_in_memory()
            .map_err(|e| NestError::Internal(format!("Failed to open in-memory SQLite: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: SharedConnection::new(conn),
        })
    }

    /// Insert a nest with all derived attributes unknown. Returns its id.
    pub async fn insert_nest(&self, nest: NewNest) -> Result<i64> {
        self.conn.run(move |conn| nests::insert_nest(conn, &nest)).await
    }

    pub async fn stats(&self) -> Result<NestStats> {
        self.conn.run(|conn| nests::stats(conn)).await
    }
}

#[async_trait::async_trait]
impl NestStore for NestsDb {
    async fn get_nest(&self, nest_id: i64, include_polygon: bool) -> Result<Nest> {
        self.conn
            .run(move |conn| nests::get_nest(conn, nest_id, include_polygon))
            .await
    }

    async fn list_nests(&self, opts: ListNestsOptions) -> Result<Vec<Nest>> {
        self.conn
            .run(move |conn| nests::list_nests(conn, opts.include_polygon))
            .await
    }

    async fn update_nest_partial(&self, nest_id: i64, update: &NestPartialUpdate) -> Result<()> {
        let update = update.clone();
        self.conn
            .run(move |conn| nests::update_nest_partial(conn, nest_id, &update))
            .await
    }

    async fn list_active_nests(&self) -> Result<Vec<Nest>> {
        self.conn.run(|conn| nests::list_active_nests(conn)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscardReason;

    fn park(polygon: Option<&str>) -> NewNest {
        NewNest {
            nest_id: None,
            name: "Park".into(),
            area_name: Some("Town".into()),
            lat: 1.0,
            lon: 2.0,
            polygon: polygon.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = NestsDb::open_in_memory().unwrap();
        let id = db.insert_nest(park(Some("{}"))).await.unwrap();

        let nest = db.get_nest(id, true).await.unwrap();
        assert_eq!(nest.name, "Park");
        assert_eq!(nest.polygon.as_deref(), Some("{}"));
        assert_eq!(nest.m2, None);
        assert_eq!(nest.active, None);
        assert_eq!(nest.discarded, None);

        let without_polygon = db.get_nest(id, false).await.unwrap();
        assert_eq!(without_polygon.polygon, None);

        assert!(matches!(
            db.get_nest(id + 100, false).await,
            Err(NestError::NestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_update_touches_only_given_columns() {
        let db = NestsDb::open_in_memory().unwrap();
        let id = db.insert_nest(park(None)).await.unwrap();

        db.update_nest_partial(
            id,
            &NestPartialUpdate {
                m2: Some(Some(1234.5)),
                spawnpoints: Some(Some(12)),
                active: Some(Some(true)),
                pokemon_id: Some(Some(25)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        db.update_nest_partial(
            id,
            &NestPartialUpdate {
                active: Some(Some(false)),
                discarded: Some(Some(DiscardReason::Overlap)),
                pokemon_id: Some(None),
                updated: Some(Some(42)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let nest = db.get_nest(id, false).await.unwrap();
        assert_eq!(nest.m2, Some(1234.5));
        assert_eq!(nest.spawnpoints, Some(12));
        assert_eq!(nest.active, Some(false));
        assert_eq!(nest.discarded, Some(DiscardReason::Overlap));
        assert_eq!(nest.pokemon_id, None);
        assert_eq!(nest.updated, Some(42));
    }

    #[tokio::test]
    async fn test_update_missing_nest_fails() {
        let db = NestsDb::open_in_memory().unwrap();
        let result = db
            .update_nest_partial(
                99,
                &NestPartialUpdate {
                    active: Some(Some(true)),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(NestError::NestNotFound(99))));
    }

    #[tokio::test]
    async fn test_list_active_and_stats() {
        let db = NestsDb::open_in_memory().unwrap();
        let a = db.insert_nest(park(Some("a"))).await.unwrap();
        let b = db.insert_nest(park(Some("b"))).await.unwrap();
        let _c = db.insert_nest(park(Some("c"))).await.unwrap();

        let activate = NestPartialUpdate {
            active: Some(Some(true)),
            ..Default::default()
        };
        db.update_nest_partial(a, &activate).await.unwrap();
        db.update_nest_partial(
            b,
            &NestPartialUpdate {
                active: Some(Some(false)),
                discarded: Some(Some(DiscardReason::Area)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let active = db.list_active_nests().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].nest_id, a);
        assert_eq!(active[0].polygon.as_deref(), Some("a"));

        let all = db.list_nests(ListNestsOptions::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|n| n.polygon.is_none()));

        let stats = db.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.undetermined, 1);
        assert_eq!(stats.discarded_area, 1);
    }

    #[test]
    fn test_file_backed_database_reopens() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nests.db");

        {
            let db = NestsDb::open(&path).unwrap();
            db.conn
                .with_conn(|conn| nests::insert_nest(conn, &park(None)))
                .unwrap();
        }

        let db = NestsDb::open(&path).unwrap();
        let listed = db
            .conn
            .with_conn(|conn| nests::list_nests(conn, false))
            .unwrap();
        assert_eq!(listed.len(), 1);
    }
}
