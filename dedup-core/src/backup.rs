use crate::chunker;
use crate::config::DedupConfig;
use crate::error::{DedupError, Result};
use crate::index::IndexBatch;
use crate::manifest::{BackupSet, Manifest};
use crate::progress::Progress;
use crate::stats::{FileTally, RunStatistics};
use crate::store::ChunkStore;
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, info_span, warn};
use walkdir::WalkDir;

/// Back up every regular file under `source_root` into a new backup set.
pub fn run_backup(source_root: &Path, config: &DedupConfig) -> Result<RunStatistics> {
    run_backup_with(source_root, config, &Progress::default())
}

/// Same as [`run_backup`], reporting through `progress` and stopping early (with
/// `Cancelled`) once `progress.cancel()` has been called.
pub fn run_backup_with(
    source_root: &Path,
    config: &DedupConfig,
    progress: &Progress,
) -> Result<RunStatistics> {
    let root = check_source_root(source_root)?;
    config.validate()?;
    config.ensure_dirs()?;
    let store = ChunkStore::open(config)?;
    let set = BackupSet::create(&config.backup_sets_dir, &chrono::Local::now())?;
    let span = info_span!("backup", set = %set.name);
    let _enter = span.enter();
    info!("Starting backup of {}", root.display());

    let excludes = build_excludes(&config.exclude)?;
    let files = list_source_files(&root, config, &excludes)?;
    progress.set_files_total(files.len());
    progress.set_stage("Backing up");
    progress.start();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()
        .map_err(|e| DedupError::InvalidConfig { reason: format!("thread pool: {}", e) })?;
    let tally = pool.install(|| {
        files
            .par_iter()
            .map(|path| backup_one(path, &root, &store, &set, config, progress))
            .reduce(FileTally::default, FileTally::merge)
    });
    progress.stop();
    if progress.is_cancelled() {
        warn!("backup cancelled after {} file(s)", progress.files_done());
        return Err(DedupError::Cancelled);
    }

    let stats = RunStatistics::from_tally(tally, set.path.clone());
    for line in stats.summary_lines() {
        info!("{}", line);
    }
    Ok(stats)
}

fn check_source_root(source_root: &Path) -> Result<PathBuf> {
    let invalid = |reason: &str| DedupError::InvalidSourceRoot {
        path: source_root.to_path_buf(),
        reason: reason.to_string(),
    };
    if source_root.as_os_str().is_empty() {
        return Err(invalid("Source path cannot be empty."));
    }
    if !source_root.exists() {
        return Err(invalid("Directory does not exist."));
    }
    if !source_root.is_dir() {
        return Err(invalid("Not a directory."));
    }
    if fs::read_dir(source_root).is_err() {
        return Err(DedupError::PermissionDenied { path: source_root.to_path_buf() });
    }
    Ok(fs::canonicalize(source_root)?)
}

fn build_excludes(patterns: &[String]) -> Result<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for g in patterns {
        let glob = Glob::new(g)
            .map_err(|e| DedupError::InvalidConfig { reason: format!("exclude {:?}: {}", g, e) })?;
        b.add(glob);
    }
    b.build().map_err(|e| DedupError::InvalidConfig { reason: e.to_string() })
}

/// Repository directories that must never be backed up into themselves.
fn reserved_dirs(config: &DedupConfig) -> Vec<PathBuf> {
    [&config.library_dir, &config.backup_sets_dir, &config.restore_dir]
        .iter()
        .filter_map(|p| fs::canonicalize(p).ok())
        .collect()
}

fn is_index_file(path: &Path, config: &DedupConfig) -> bool {
    let (Some(idx_dir), Some(idx_name)) = (config.index_path.parent(), config.index_path.file_name())
    else {
        return false;
    };
    let Ok(idx_dir) = fs::canonicalize(idx_dir) else {
        return false;
    };
    let idx_name = idx_name.to_string_lossy();
    path.parent() == Some(idx_dir.as_path())
        && path.file_name().map(|n| n.to_string_lossy().starts_with(&*idx_name)).unwrap_or(false)
}

/// Regular files under `root`, sorted, minus excluded and repository-owned paths.
fn list_source_files(root: &Path, config: &DedupConfig, excludes: &GlobSet) -> Result<Vec<PathBuf>> {
    let reserved = reserved_dirs(config);
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(config.follow_symlinks)
        .into_iter()
        .filter_entry(|e| !reserved.iter().any(|r| e.path() == r.as_path()));
    for ent in walker {
        let ent = match ent {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping entry due to error: {}", e);
                continue;
            }
        };
        if !ent.file_type().is_file() {
            continue;
        }
        let path = ent.path();
        if is_index_file(path, config) {
            continue;
        }
        let rel = rel_path(path, root);
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if excludes.is_match(&rel_str) {
            continue;
        }
        files.push(path.to_path_buf());
    }
    files.sort();
    Ok(files)
}

fn rel_path(path: &Path, root: &Path) -> PathBuf {
    pathdiff::diff_paths(path, root)
        .unwrap_or_else(|| path.file_name().map(PathBuf::from).unwrap_or_default())
}

enum FileOutcome {
    Empty,
    Stored { manifest: PathBuf, chunks: usize, tally: FileTally },
}

fn backup_one(
    path: &Path,
    root: &Path,
    store: &ChunkStore,
    set: &BackupSet,
    config: &DedupConfig,
    progress: &Progress,
) -> FileTally {
    if progress.is_cancelled() {
        return FileTally::default();
    }
    info!("Processing file: {}", path.display());
    let size = match fs::metadata(path) {
        Ok(m) => m.len(),
        Err(source) => {
            let e = DedupError::FileRead { path: path.to_path_buf(), source };
            error!("Error processing {}: {}", path.display(), e);
            progress.file_done(0);
            return FileTally { failed_files: 1, ..Default::default() };
        }
    };
    let mut tally = FileTally { total_files: 1, total_data_size: size, ..Default::default() };
    let rel = rel_path(path, root);
    match backup_file(path, &rel, store, set, config) {
        Ok(FileOutcome::Empty) => {
            warn!("File is empty: {}", path.display());
            tally.empty_files = 1;
        }
        Ok(FileOutcome::Stored { manifest, chunks, tally: t }) => {
            info!(manifest = %manifest.display(), "Created metadata for {} with {} chunks", rel.display(), chunks);
            tally = tally.merge(t);
        }
        Err(e) => {
            error!("Error processing {}: {}", path.display(), e);
            tally.failed_files = 1;
        }
    }
    progress.file_done(size);
    tally
}

/// Chunk one file, store its chunks, commit their index entries as one batch, and only
/// then write its manifest. Any error leaves no manifest behind.
fn backup_file(
    path: &Path,
    rel: &Path,
    store: &ChunkStore,
    set: &BackupSet,
    config: &DedupConfig,
) -> Result<FileOutcome> {
    let data = read_source(path)?;
    if data.is_empty() {
        return Ok(FileOutcome::Empty);
    }

    let mut batch = IndexBatch::default();
    let mut manifest = Manifest::default();
    let mut tally = FileTally::default();
    for span in chunker::chunk(&data) {
        let out = store.put_batched(span.slice(&data), &mut batch)?;
        tally.total_chunks += 1;
        if out.was_new {
            tally.new_chunks += 1;
            tally.new_data_size += out.len as u64;
        }
        manifest.push(out.digest, out.location);
    }
    store.index().commit(&batch)?;

    let manifest_path = set.manifest_path(rel, &config.manifest_suffix);
    manifest.write_to(&manifest_path)?;
    Ok(FileOutcome::Stored { manifest: manifest_path, chunks: manifest.len(), tally })
}

fn read_source(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| DedupError::FileRead { path: path.to_path_buf(), source })
}
