use crate::error::{DedupError, Result};
use crate::manifest::Manifest;
use crate::store::ChunkStore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub chunks_ok: u64,
    pub chunks_missing: u64,
    pub chunks_corrupt: u64,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.chunks_missing == 0 && self.chunks_corrupt == 0
    }
}

/// Re-hash every chunk a manifest references.
pub fn verify_manifest(manifest_path: &Path, store: &ChunkStore) -> Result<VerifyReport> {
    let mf = Manifest::read_from(manifest_path)?;
    let mut rep = VerifyReport::default();
    for e in &mf.entries {
        match store.get_verified(&e.digest) {
            Ok(_) => rep.chunks_ok += 1,
            Err(DedupError::MissingChunk { .. }) => rep.chunks_missing += 1,
            Err(DedupError::CorruptChunk { .. }) => rep.chunks_corrupt += 1,
            Err(e) => return Err(e),
        }
    }
    Ok(rep)
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreAudit {
    pub indexed: usize,
    pub on_disk: usize,
    /// Index rows whose chunk is neither at the indexed nor at the derived location.
    pub dangling_index: Vec<String>,
    /// Chunk files with no index row.
    pub unindexed: Vec<String>,
}

impl StoreAudit {
    pub fn is_consistent(&self) -> bool {
        self.dangling_index.is_empty() && self.unindexed.is_empty()
    }
}

/// Compare index rows against the library contents.
pub fn verify_store(store: &ChunkStore) -> Result<StoreAudit> {
    let rows = store.index().entries()?;
    let on_disk: BTreeSet<String> = store.list_chunks()?.into_iter().collect();
    let indexed: BTreeSet<&str> = rows.iter().map(|r| r.digest.as_str()).collect();
    let mut dangling_index = Vec::new();
    for r in &rows {
        if !store.contains(&r.digest)? {
            dangling_index.push(r.digest.clone());
        }
    }
    let unindexed = on_disk.iter().filter(|d| !indexed.contains(d.as_str())).cloned().collect();
    Ok(StoreAudit { indexed: rows.len(), on_disk: on_disk.len(), dangling_index, unindexed })
}
