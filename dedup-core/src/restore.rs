use crate::config::DedupConfig;
use crate::error::{DedupError, Result};
use crate::manifest::Manifest;
use crate::path_safety::{validate_path, PathPolicy};
use crate::store::ChunkStore;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// What to do when a manifest references a chunk the store cannot produce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestoreMode {
    /// Log a warning per missing chunk and leave its bytes out. The output can be shorter
    /// than the original; `RestoreReport::chunks_missing` lists what was dropped.
    #[default]
    BestEffort,
    /// Fail on the first missing or corrupt chunk and remove the partial output.
    Strict,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored_path: PathBuf,
    pub chunks_restored: u64,
    pub chunks_missing: Vec<String>,
    pub bytes_written: u64,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.chunks_missing.is_empty()
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RestoreStatus {
    Success,
    Error,
}

/// Caller-facing result of [`run_restore`].
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct RestoreResponse {
    pub status: RestoreStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_path: Option<PathBuf>,
}

/// Restore one file and fold every outcome into a [`RestoreResponse`].
pub fn run_restore(manifest_path: &Path, config: &DedupConfig, mode: RestoreMode) -> RestoreResponse {
    match restore_file(manifest_path, config, mode) {
        Ok(report) => {
            let mut message =
                format!("Restore completed successfully. Restored file: {}", report.restored_path.display());
            if !report.is_complete() {
                message.push_str(&format!(
                    " ({} missing chunk(s) skipped; output is incomplete)",
                    report.chunks_missing.len()
                ));
            }
            RestoreResponse {
                status: RestoreStatus::Success,
                message,
                restored_path: Some(report.restored_path),
            }
        }
        Err(e) => {
            error!("Error restoring file from metadata {}: {}", manifest_path.display(), e);
            RestoreResponse { status: RestoreStatus::Error, message: e.to_string(), restored_path: None }
        }
    }
}

/// Existence and readability check done before anything is created.
pub fn check_manifest_path(manifest_path: &Path) -> Result<()> {
    if manifest_path.as_os_str().is_empty() || !manifest_path.is_file() {
        return Err(DedupError::InvalidManifestPath { path: manifest_path.to_path_buf() });
    }
    match File::open(manifest_path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            Err(DedupError::PermissionDenied { path: manifest_path.to_path_buf() })
        }
        Err(e) => Err(e.into()),
    }
}

/// Manifest base name with the metadata suffix removed.
pub fn restored_file_name(manifest_path: &Path, suffix: &str) -> Result<String> {
    let invalid = || DedupError::InvalidManifestPath { path: manifest_path.to_path_buf() };
    let name = manifest_path.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
    let stripped = name.strip_suffix(suffix).unwrap_or(name);
    if stripped.is_empty() {
        return Err(invalid());
    }
    Ok(stripped.to_string())
}

/// Restore the file described by `manifest_path` into `config.restore_dir`.
pub fn restore_file(manifest_path: &Path, config: &DedupConfig, mode: RestoreMode) -> Result<RestoreReport> {
    check_manifest_path(manifest_path)?;
    config.validate()?;
    let store = ChunkStore::open(config)?;
    let name = restored_file_name(manifest_path, &config.manifest_suffix)?;
    let dest = config.restore_dir.join(name);
    let report = restore_into(manifest_path, &dest, &store, mode)?;
    info!("Restored file: {}", report.restored_path.display());
    Ok(report)
}

/// Reassemble chunks listed in `manifest_path`, in order, into `dest`.
pub fn restore_into(
    manifest_path: &Path,
    dest: &Path,
    store: &ChunkStore,
    mode: RestoreMode,
) -> Result<RestoreReport> {
    let manifest = Manifest::read_from(manifest_path)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(dest)?);
    let result = write_chunks(&manifest, manifest_path, store, mode, &mut out)
        .and_then(|r| {
            out.flush()?;
            out.get_ref().sync_all()?;
            Ok(r)
        });
    match result {
        Ok((chunks_restored, chunks_missing, bytes_written)) => Ok(RestoreReport {
            restored_path: dest.to_path_buf(),
            chunks_restored,
            chunks_missing,
            bytes_written,
        }),
        Err(e) => {
            drop(out);
            let _ = fs::remove_file(dest);
            Err(e)
        }
    }
}

fn write_chunks<W: Write>(
    manifest: &Manifest,
    manifest_path: &Path,
    store: &ChunkStore,
    mode: RestoreMode,
    out: &mut W,
) -> Result<(u64, Vec<String>, u64)> {
    let mut restored = 0u64;
    let mut missing = Vec::new();
    let mut bytes = 0u64;
    for entry in &manifest.entries {
        let fetched = match mode {
            RestoreMode::Strict => store.get_verified(&entry.digest),
            RestoreMode::BestEffort => store.get(&entry.digest),
        };
        match fetched {
            Ok(data) => {
                out.write_all(&data)?;
                restored += 1;
                bytes += data.len() as u64;
            }
            Err(DedupError::MissingChunk { digest }) if mode == RestoreMode::BestEffort => {
                warn!(
                    digest = %digest,
                    manifest = %manifest_path.display(),
                    location = entry.location.as_deref().unwrap_or(""),
                    "Missing chunk: {}", digest
                );
                missing.push(digest);
            }
            Err(e) => return Err(e),
        }
    }
    Ok((restored, missing, bytes))
}

#[derive(Serialize, Clone, Debug, Default)]
pub struct RestoreSetReport {
    pub restore_root: PathBuf,
    pub restored: Vec<RestoreReport>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Restore every manifest of a backup set under `restore_dir/<set name>/`, keeping the
/// set's directory structure. Failures are per file.
pub fn restore_backup_set(set_dir: &Path, config: &DedupConfig, mode: RestoreMode) -> Result<RestoreSetReport> {
    if !set_dir.is_dir() {
        return Err(DedupError::InvalidBackupSet { path: set_dir.to_path_buf() });
    }
    let set_name = set_dir
        .file_name()
        .ok_or_else(|| DedupError::InvalidBackupSet { path: set_dir.to_path_buf() })?;
    config.validate()?;
    let store = ChunkStore::open(config)?;
    let restore_root = config.restore_dir.join(set_name);
    fs::create_dir_all(&restore_root)?;
    let policy = PathPolicy { follow_symlinks: config.follow_symlinks };

    let mut manifests: Vec<PathBuf> = WalkDir::new(set_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.to_string_lossy().ends_with(&config.manifest_suffix))
        .collect();
    manifests.sort();

    let mut report = RestoreSetReport { restore_root: restore_root.clone(), ..Default::default() };
    for m in manifests {
        let rel = pathdiff::diff_paths(&m, set_dir).unwrap_or_else(|| m.clone());
        let rel_str = rel.to_string_lossy();
        let dest_rel = PathBuf::from(rel_str.strip_suffix(&config.manifest_suffix).unwrap_or(&*rel_str));
        let outcome = validate_path(&restore_root, &dest_rel, policy)
            .and_then(|dest| restore_into(&m, &dest, &store, mode));
        match outcome {
            Ok(r) => report.restored.push(r),
            Err(e) => {
                error!("Error restoring {}: {}", m.display(), e);
                report.failed.push((m, e.to_string()));
            }
        }
    }
    info!(
        "Restored {} file(s) from {} into {} ({} failed)",
        report.restored.len(),
        set_dir.display(),
        restore_root.display(),
        report.failed.len()
    );
    Ok(report)
}
