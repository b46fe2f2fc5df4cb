//! SQLite-backed key-value store (sqlx).
//!
//! ## Schema
//!
//! ```text
//! CREATE TABLE kv (key BLOB PRIMARY KEY, value BLOB NOT NULL) WITHOUT ROWID
//! ```
//!
//! A batch runs inside one transaction. If any statement fails the
//! transaction is dropped without commit, which rolls it back, so a failed
//! `apply` leaves the store unchanged.

use super::table::prefix_successor;
use super::{KvError, KvIterator, KvStore, WriteOp};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

const MAX_CONNECTIONS: u32 = 4;

const CREATE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS kv (key BLOB PRIMARY KEY, value BLOB NOT NULL) WITHOUT ROWID";
const UPSERT: &str =
    "INSERT INTO kv (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value";
const DELETE: &str = "DELETE FROM kv WHERE key = ?";
const SELECT: &str = "SELECT value FROM kv WHERE key = ?";
const SCAN_BOUNDED: &str = "SELECT key, value FROM kv WHERE key >= ? AND key < ? ORDER BY key";
const SCAN_UNBOUNDED: &str = "SELECT key, value FROM kv WHERE key >= ? ORDER BY key";

/// Durable store in a single SQLite database file.
pub struct SqliteStore {
    pool: SqlitePool,
    path: PathBuf,
    closed: AtomicBool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    ///
    /// Parent directories are created. The database runs in WAL mode.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;

        info!(path = %path.display(), "Opened SQLite key-value store");

        Ok(Self {
            pool,
            path,
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<(), KvError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn apply(&self, ops: Vec<WriteOp>) -> Result<(), KvError> {
        self.ensure_open()?;
        if ops.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for op in &ops {
            match op {
                WriteOp::Put { key, value } => {
                    sqlx::query(UPSERT)
                        .bind(key.as_slice())
                        .bind(value.as_slice())
                        .execute(&mut *tx)
                        .await?;
                }
                WriteOp::Delete { key } => {
                    sqlx::query(DELETE)
                        .bind(key.as_slice())
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;

        debug!(ops = ops.len(), "Applied batch");
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>, KvError> {
        self.ensure_open()?;
        let row = sqlx::query(SELECT)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<Vec<u8>, _>("value")?),
            None => Err(KvError::NotFound),
        }
    }

    async fn iter_prefix(&self, prefix: &[u8]) -> Result<KvIterator, KvError> {
        self.ensure_open()?;
        let rows = match prefix_successor(prefix) {
            Some(end) => {
                sqlx::query(SCAN_BOUNDED)
                    .bind(prefix)
                    .bind(end)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(SCAN_UNBOUNDED)
                    .bind(prefix)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let key: Vec<u8> = row.try_get("key")?;
            let value: Vec<u8> = row.try_get("value")?;
            entries.push((key, value));
        }
        Ok(KvIterator::from_sorted(entries))
    }

    async fn shutdown(&self) -> Result<(), KvError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.pool.close().await;
        info!(path = %self.path.display(), "Closed SQLite key-value store");
        Ok(())
    }

    async fn destroy(&self) -> Result<(), KvError> {
        self.shutdown().await?;
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(path = %self.path.display(), "Destroyed SQLite key-value store");
        Ok(())
    }
}
