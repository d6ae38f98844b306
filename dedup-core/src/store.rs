//! Content-addressable chunk persistence.
//!
//! Chunk files live directly under the library directory and are named by their digest,
//! so a location is always derivable; the index records it explicitly and is consulted
//! first. New chunks are written to a temp file in the library and linked into place
//! without clobbering, which makes "was this chunk new" exact under concurrent writers.

use crate::config::DedupConfig;
use crate::digest::{is_digest_hex, ChunkDigest};
use crate::error::{DedupError, Result};
use crate::index::{ChunkIndex, IndexBatch};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutOutcome {
    pub digest: String,
    pub location: String,
    pub len: usize,
    /// True for exactly one `put` per distinct content.
    pub was_new: bool,
}

pub struct ChunkStore {
    library_dir: PathBuf,
    index: ChunkIndex,
}

impl ChunkStore {
    pub fn open(config: &DedupConfig) -> Result<Self> {
        config.validate()?;
        Self::with_paths(&config.library_dir, &config.index_path)
    }

    pub fn with_paths(library_dir: &Path, index_path: &Path) -> Result<Self> {
        fs::create_dir_all(library_dir)?;
        let library_dir = fs::canonicalize(library_dir)?;
        if library_dir.to_string_lossy().contains(',') {
            return Err(DedupError::InvalidConfig {
                reason: format!("library path must not contain a comma: {:?}", library_dir),
            });
        }
        let index = ChunkIndex::open(index_path)?;
        Ok(Self { library_dir, index })
    }

    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    pub fn location_for(&self, digest: &str) -> PathBuf {
        self.library_dir.join(digest)
    }

    /// Store one chunk and register it immediately.
    pub fn put(&self, data: &[u8]) -> Result<PutOutcome> {
        let mut batch = IndexBatch::default();
        let out = self.put_batched(data, &mut batch)?;
        self.index.commit(&batch)?;
        Ok(out)
    }

    /// Store one chunk; its index registration is appended to `batch` for the caller to
    /// commit together with the rest of the file.
    pub fn put_batched(&self, data: &[u8], batch: &mut IndexBatch) -> Result<PutOutcome> {
        let digest = ChunkDigest::of(data).to_hex();
        let indexed = self.index.lookup(&digest)?;
        if let Some(location) = &indexed {
            if Path::new(location).is_file() {
                let location = location.clone();
                return Ok(PutOutcome { digest, location, len: data.len(), was_new: false });
            }
        }
        let path = self.location_for(&digest);
        if indexed.is_some() {
            // Stale row, e.g. after the repository was moved.
            debug!(%digest, "indexed location is gone; using {}", path.display());
        }
        let location = path.to_string_lossy().into_owned();
        let was_new = if path.is_file() {
            debug!(%digest, "chunk on disk without index entry; registering");
            false
        } else {
            self.write_chunk(&path, data)?
        };
        if was_new {
            debug!(%digest, len = data.len(), "created new chunk");
        }
        batch.push(digest.clone(), location.clone());
        Ok(PutOutcome { digest, location, len: data.len(), was_new })
    }

    fn write_chunk(&self, path: &Path, data: &[u8]) -> Result<bool> {
        let mut tmp = NamedTempFile::new_in(&self.library_dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        match tmp.persist_noclobber(path) {
            Ok(_) => Ok(true),
            // Another writer linked identical bytes first.
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.error.into()),
        }
    }

    /// Indexed location when it still holds a file, otherwise `<library>/<digest>`.
    fn resolve(&self, digest: &str) -> Result<PathBuf> {
        if let Some(loc) = self.index.lookup(digest)? {
            let p = PathBuf::from(loc);
            if p.is_file() {
                return Ok(p);
            }
        }
        Ok(self.location_for(digest))
    }

    pub fn contains(&self, digest: &str) -> Result<bool> {
        Ok(self.resolve(digest)?.is_file())
    }

    pub fn get(&self, digest: &str) -> Result<Vec<u8>> {
        if !is_digest_hex(digest) {
            return Err(DedupError::MissingChunk { digest: digest.to_string() });
        }
        let path = self.resolve(digest)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(DedupError::MissingChunk { digest: digest.to_string() })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`get`](Self::get) but re-hashes the bytes.
    pub fn get_verified(&self, digest: &str) -> Result<Vec<u8>> {
        let data = self.get(digest)?;
        let actual = ChunkDigest::of(&data).to_hex();
        if actual != digest {
            return Err(DedupError::CorruptChunk { digest: digest.to_string(), actual });
        }
        Ok(data)
    }

    /// Digests of all chunk files present in the library, sorted.
    pub fn list_chunks(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for ent in fs::read_dir(&self.library_dir)? {
            let ent = ent?;
            if !ent.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = ent.file_name().to_str() {
                if is_digest_hex(name) {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Register chunk files that have no index entry (left behind by an interrupted run).
    pub fn reconcile(&self) -> Result<usize> {
        let mut batch = IndexBatch::default();
        for digest in self.list_chunks()? {
            if !self.index.contains(&digest)? {
                let location = self.location_for(&digest).to_string_lossy().into_owned();
                batch.push(digest, location);
            }
        }
        self.index.commit(&batch)
    }
}
