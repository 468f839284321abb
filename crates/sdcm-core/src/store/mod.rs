//! SQLite-backed cache of scanned files and registry metadata.
//!
//! A single connection in WAL mode sits behind a mutex. Every public call is
//! one self-contained statement or a short transaction, and writes are keyed
//! by content hash or registry id so concurrent workers resolve conflicts
//! through upserts rather than application locks.

mod files;
mod models;
pub mod records;
mod schema;

pub use records::{
    Creator, FileRecord, FileSummary, ImageRecord, ModelFileRecord, ModelRecord,
    ModelVersionRecord, ResolvedModel, VersionWithModel,
};

use crate::config::ScanConfig;
use crate::error::{Result, SdcmError};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Persistent cache store.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct CacheStore {
    conn: Arc<Mutex<Connection>>,
    path_batch_size: usize,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("path_batch_size", &self.path_batch_size)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Open (or create) the cache database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SdcmError::Io {
                    message: format!("Failed to create database directory: {}", e),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(db_path).map_err(|e| SdcmError::Database {
            message: format!("Failed to open cache database: {}", e),
            source: Some(e),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| SdcmError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        debug!("Opened cache database at {}", db_path.display());
        Self::with_connection(conn)
    }

    /// In-memory store, used by tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::SCHEMA)
            .map_err(|e| SdcmError::Database {
                message: format!("Failed to initialize schema: {}", e),
                source: Some(e),
            })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path_batch_size: ScanConfig::PATH_BATCH_SIZE,
        })
    }

    /// Override how many paths go into one `IN (...)` query.
    pub fn with_path_batch_size(mut self, size: usize) -> Self {
        self.path_batch_size = size.max(1);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SdcmError::lock_poisoned())
    }
}

fn now_str() -> String {
    ts_str(&Utc::now())
}

/// Fixed-width RFC 3339 so stored timestamps compare lexicographically.
fn ts_str(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn opt_path(s: Option<String>) -> Option<PathBuf> {
    s.filter(|s| !s.is_empty()).map(PathBuf::from)
}

fn json_list(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn json_value(s: Option<String>) -> Option<serde_json::Value> {
    s.and_then(|s| serde_json::from_str(&s).ok())
}
