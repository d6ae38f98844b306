//! Durable digest -> location index (SQLite).
//!
//! Same schema as the `hash_keys.db` file used by earlier versions of the tool, so an
//! existing index can be opened in place.

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub digest: String,
    pub location: String,
}

/// Registrations that become visible together, in one transaction.
#[derive(Default, Debug, Clone)]
pub struct IndexBatch {
    entries: Vec<IndexEntry>,
}

impl IndexBatch {
    pub fn push(&mut self, digest: String, location: String) {
        self.entries.push(IndexEntry { digest, location });
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }
}

pub struct ChunkIndex {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl ChunkIndex {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn, path.to_path_buf())
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self> {
        // Several processes may share one repository.
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                hash TEXT PRIMARY KEY,
                chunk_path TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { path, conn: Mutex::new(conn) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // An open transaction is rolled back when its guard unwinds, so the
        // connection is still usable after a panic elsewhere.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn lookup(&self, digest: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let loc = conn
            .query_row("SELECT chunk_path FROM chunks WHERE hash = ?1", params![digest], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(loc)
    }

    pub fn contains(&self, digest: &str) -> Result<bool> {
        Ok(self.lookup(digest)?.is_some())
    }

    /// Insert every entry of `batch` atomically. Existing digests are left untouched;
    /// returns how many rows were actually inserted.
    pub fn commit(&self, batch: &IndexBatch) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt =
                tx.prepare_cached("INSERT OR IGNORE INTO chunks (hash, chunk_path) VALUES (?1, ?2)")?;
            for e in batch.iter() {
                inserted += stmt.execute(params![e.digest, e.location])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// All rows ordered by digest.
    pub fn entries(&self) -> Result<Vec<IndexEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT hash, chunk_path FROM chunks ORDER BY hash")?;
        let rows = stmt
            .query_map([], |row| Ok(IndexEntry { digest: row.get(0)?, location: row.get(1)? }))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.conn();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
