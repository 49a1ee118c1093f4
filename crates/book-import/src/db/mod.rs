//! Job and book records in a single SQLite file.
//!
//! Import tasks, progress writers and readers share one connection behind a
//! mutex. Each statement is short, and a job only ever writes its own row,
//! so no further coordination is needed between concurrent imports.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tracing::info;

use crate::config::ImportConfig;

pub mod book_repo;
pub mod error;
pub mod job_repo;
pub mod migrations;

pub use error::DatabaseError;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the database named by the config, creating its directory and
    /// applying pending migrations.
    pub fn from_config(config: &ImportConfig) -> Result<Self, DatabaseError> {
        let path = config.database_path().ok_or(DatabaseError::NoDatabasePath)?;
        Self::open(&path, config.database_busy_timeout())
    }

    /// Opens (or creates) the file at `path`. Writers wait up to
    /// `busy_timeout` for a lock held by another process.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        // WAL lets `status` readers in other processes see rows while an
        // import is writing.
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.busy_timeout(busy_timeout)?;
        let db = Self::prepare(conn)?;

        info!(path = %path.display(), journal = %journal, "Opened import database");
        Ok(db)
    }

    /// Private in-memory database with the full schema.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        // book_contents rows reference their book.
        conn.pragma_update(None, "foreign_keys", true)?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with the connection locked.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn applied_migrations(db: &Database) -> u32 {
        db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_has_schema_and_foreign_keys() {
        let db = Database::open_in_memory().unwrap();
        assert!(applied_migrations(&db) > 0);

        let orphan = db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO book_contents (book_id, full_content, chapter_count, created_at)
                 VALUES ('missing', '', 0, '2026-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        });
        assert!(orphan.is_err());
    }

    #[test]
    fn test_from_config_creates_file_in_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("books.db");
        let config = load_config_from_str(&format!(
            r#"{{
                "version": "1.0",
                "database_path": {},
                "database_busy_timeout_ms": 250,
                "object_store": {{ "root": "/unused", "public_base_url": "https://cdn.test" }}
            }}"#,
            serde_json::to_string(&path.to_string_lossy()).unwrap()
        ))
        .unwrap();

        let db = Database::from_config(&config).unwrap();
        assert!(path.exists());
        assert!(applied_migrations(&db) > 0);
        let journal: String = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(journal.to_lowercase(), "wal");
    }

    #[test]
    fn test_reopen_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("books.db");
        let insert = "INSERT INTO books (id, title, author_id, created_at)
                      VALUES ('b1', 'T', 'a1', '2026-01-01T00:00:00Z')";

        let first = Database::open(&path, Duration::from_millis(100)).unwrap();
        first
            .with_conn(|conn| {
                conn.execute(insert, [])?;
                Ok(())
            })
            .unwrap();
        drop(first);

        let again = Database::open(&path, Duration::from_millis(100)).unwrap();
        let count: u32 = again
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM books", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }
}
