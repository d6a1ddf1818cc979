//! SQLite database layer for the cascade engine.
//!
//! Uses rusqlite with WAL mode for concurrent read performance.
//! All database operations are executed via `tokio::task::spawn_blocking`
//! to avoid blocking the async runtime. Multi-statement operations that
//! must be atomic (item + transition writes) go through `with_tx_async`.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::CoreError;

/// Thread-safe handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(db_path: &str) -> Result<Self, CoreError> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path)
            .map_err(|e| CoreError::Database(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| CoreError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;

        tracing::info!("SQLite database opened at: {}", db_path);
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::Database(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| CoreError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection.
    /// Automatically handles locking and error conversion.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| CoreError::Database(format!("Lock poisoned: {}", e)))?;
        f(&conn).map_err(|e| CoreError::Database(e.to_string()))
    }

    /// Execute a closure with access to the database connection (async-friendly).
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| CoreError::Database(format!("Task join error: {}", e)))?
    }

    /// Execute a closure inside a transaction (async-friendly).
    ///
    /// The closure may return a `CoreError` to roll back with a typed
    /// failure; any error aborts the transaction with no partial write.
    pub async fn with_tx_async<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Connection) -> Result<T, CoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db
                .conn
                .lock()
                .map_err(|e| CoreError::Database(format!("Lock poisoned: {}", e)))?;
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| CoreError::Database(e.to_string()))?;
            let out = f(&tx)?;
            tx.commit().map_err(|e| CoreError::Database(e.to_string()))?;
            Ok(out)
        })
        .await
        .map_err(|e| CoreError::Database(format!("Task join error: {}", e)))?
    }

    /// Create all tables if they don't exist.
    fn initialize_tables(&self) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS cascades (
                    name            TEXT PRIMARY KEY,
                    description     TEXT NOT NULL DEFAULT '',
                    stages          TEXT NOT NULL,
                    created_at      INTEGER NOT NULL,
                    updated_at      INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS work_items (
                    id              TEXT PRIMARY KEY,
                    title           TEXT NOT NULL,
                    content         TEXT NOT NULL DEFAULT '',
                    cascade         TEXT NOT NULL,
                    stage           TEXT NOT NULL,
                    priority        INTEGER NOT NULL DEFAULT 3,
                    item_type       TEXT NOT NULL DEFAULT 'task',
                    parent_id       TEXT,
                    project         TEXT,
                    pr_number       INTEGER,
                    output_doc_id   TEXT,
                    claimed_by      TEXT,
                    claimed_at      INTEGER,
                    created_at      INTEGER NOT NULL,
                    updated_at      INTEGER NOT NULL,
                    started_at      INTEGER,
                    completed_at    INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_work_items_cascade_stage ON work_items(cascade, stage);
                CREATE INDEX IF NOT EXISTS idx_work_items_claimed ON work_items(claimed_by);
                CREATE INDEX IF NOT EXISTS idx_work_items_order ON work_items(priority, created_at);

                CREATE TABLE IF NOT EXISTS work_deps (
                    work_id         TEXT NOT NULL REFERENCES work_items(id) ON DELETE CASCADE,
                    depends_on      TEXT NOT NULL,
                    dep_type        TEXT NOT NULL DEFAULT 'blocks',
                    created_at      INTEGER NOT NULL,
                    PRIMARY KEY (work_id, depends_on)
                );
                CREATE INDEX IF NOT EXISTS idx_work_deps_target ON work_deps(depends_on);

                CREATE TABLE IF NOT EXISTS work_transitions (
                    id              INTEGER PRIMARY KEY AUTOINCREMENT,
                    work_id         TEXT NOT NULL,
                    from_stage      TEXT,
                    to_stage        TEXT NOT NULL,
                    transitioned_by TEXT NOT NULL,
                    content_snapshot TEXT,
                    created_at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_work_transitions_work ON work_transitions(work_id, id);
                ",
            )
        })
    }
}
