use crate::analysis::DocumentRef;
use crate::error::BoxError;
use crate::transform::ActivityRecord;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Where bills are discovered and transformed records are written.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self, prefix: &str) -> Result<Vec<DocumentRef>, BoxError>;

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BoxError>;

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), BoxError>;
}

/// Output key for a record. Derived from the event id so that re-processing
/// the same bill overwrites the same object.
pub fn record_key(prefix: &str, record: &ActivityRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record.activity_event_id.as_bytes());
    format!("{prefix}{:x}.json", hasher.finalize())
}

/// Object store backed by a local SQLite file, one bucket per store.
pub struct SqliteObjectStore {
    conn: Mutex<Connection>,
    bucket: String,
}

impl SqliteObjectStore {
    pub fn open<P: AsRef<Path>>(db_path: P, bucket: &str) -> rusqlite::Result<Self> {
        Self::init(Connection::open(db_path)?, bucket)
    }

    #[cfg(test)]
    pub fn open_in_memory(bucket: &str) -> rusqlite::Result<Self> {
        Self::init(Connection::open_in_memory()?, bucket)
    }

    fn init(conn: Connection, bucket: &str) -> rusqlite::Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS objects (
                bucket TEXT NOT NULL,
                key TEXT NOT NULL,
                data BLOB NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (bucket, key)
            )",
            [],
        )?;

        info!(bucket = %bucket, "Object store initialized");
        Ok(Self {
            conn: Mutex::new(conn),
            bucket: bucket.to_string(),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, BoxError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| "object store connection lock poisoned")?;
        Ok(f(&conn)?)
    }
}

#[async_trait]
impl ObjectStore for SqliteObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<DocumentRef>, BoxError> {
        let keys: Vec<String> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM objects
                 WHERE bucket = ?1 AND substr(key, 1, length(?2)) = ?2
                 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![self.bucket, prefix], |row| row.get(0))?;
            rows.collect()
        })?;

        Ok(keys
            .into_iter()
            .map(|key| DocumentRef::new(self.bucket.clone(), key))
            .collect())
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BoxError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT data FROM objects WHERE bucket = ?1 AND key = ?2",
                params![self.bucket, key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), BoxError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO objects (bucket, key, data)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(bucket, key) DO UPDATE SET
                    data = excluded.data,
                    updated_at = CURRENT_TIMESTAMP",
                params![self.bucket, key, bytes],
            )
        })?;
        info!(bucket = %self.bucket, key = %key, bytes = bytes.len(), "Object written");
        Ok(())
    }
}
