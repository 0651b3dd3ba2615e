//! SQLite storage behind the local archive.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub mod error;
pub mod gallery_repo;
pub mod migrations;
pub mod pending_repo;

pub use error::DatabaseError;

/// Identifier stored in `PRAGMA application_id` so foreign files are rejected early.
pub const STORE_APPLICATION_ID: i32 = 0x4154_4c52;

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). Writers from independent jobs share one
/// connection; each upsert or delete is a single statement, so last write wins
/// per key without any extra locking by callers.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates the archive file, creating parent directories and
    /// upgrading the schema as needed.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self::prepare(conn)?;
        log::info!("Archive database opened at {}", path.display());
        Ok(db)
    }

    /// In-memory archive, used by tests.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        check_application_id(&conn)?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Returns the highest applied schema version.
    pub fn schema_version(&self) -> Result<u32, DatabaseError> {
        self.with_conn(|conn| migrations::current_version(conn))
    }
}

/// Stamps a fresh file with the store identifier, or rejects a file that
/// belongs to another application.
fn check_application_id(conn: &Connection) -> Result<(), DatabaseError> {
    let id: i32 = conn.query_row("PRAGMA application_id", [], |r| r.get(0))?;
    match id {
        0 => {
            conn.execute_batch(&format!("PRAGMA application_id = {};", STORE_APPLICATION_ID))?;
            Ok(())
        }
        STORE_APPLICATION_ID => Ok(()),
        other => Err(DatabaseError::ForeignStore { application_id: other }),
    }
}

/// Returns the canonical database path: `~/.atelier/data/atelier.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".atelier").join("data").join("atelier.db"))
}
