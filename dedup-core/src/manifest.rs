use crate::digest::is_digest_hex;
use crate::error::{DedupError, Result};
use chrono::{DateTime, TimeZone};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const BACKUP_SET_PREFIX: &str = "BackupSet_";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub digest: String,
    /// Absent when the manifest line carries only a digest.
    pub location: Option<String>,
}

/// Ordered chunk list of one file. Concatenating the chunks in order gives the file back.
///
/// On disk: one `<digest>,<location>` line per chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn push(&mut self, digest: String, location: String) {
        self.entries.push(ManifestEntry { digest, location: Some(location) });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes through a temp file in the destination directory and renames it into
    /// place, so a reader never sees a partial manifest.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut w = BufWriter::new(tmp.as_file());
            for e in &self.entries {
                match &e.location {
                    Some(loc) => writeln!(w, "{},{}", e.digest, loc)?,
                    None => writeln!(w, "{}", e.digest)?,
                }
            }
            w.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let f = File::open(path)?;
        let mut entries = Vec::new();
        for (i, line) in BufReader::new(f).lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (digest, location) = match line.split_once(',') {
                Some((d, loc)) => (d.trim(), Some(loc.trim().to_string())),
                None => (line, None),
            };
            if !is_digest_hex(digest) {
                return Err(DedupError::InvalidManifest {
                    path: path.to_path_buf(),
                    line: i + 1,
                    reason: format!("bad digest {:?}", digest),
                });
            }
            entries.push(ManifestEntry { digest: digest.to_string(), location });
        }
        Ok(Self { entries })
    }
}

/// `<dir>/<rel_path><suffix>`, keeping `rel_path`'s subdirectories.
pub fn manifest_path_for(dir: &Path, rel_path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = rel_path.as_os_str().to_owned();
    name.push(suffix);
    dir.join(name)
}

/// One run's directory of manifests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupSet {
    pub name: String,
    pub path: PathBuf,
}

impl BackupSet {
    pub fn name_at<Tz: TimeZone>(at: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        format!("{}{}", BACKUP_SET_PREFIX, at.format("%Y%m%d_%H%M%S"))
    }

    /// Creates (or reuses, within the same second) the set for a run started at `at`.
    pub fn create<Tz: TimeZone>(backup_sets_dir: &Path, at: &DateTime<Tz>) -> Result<Self>
    where
        Tz::Offset: std::fmt::Display,
    {
        let name = Self::name_at(at);
        let path = backup_sets_dir.join(&name);
        fs::create_dir_all(&path)?;
        Ok(Self { name, path })
    }

    pub fn manifest_path(&self, rel_path: &Path, suffix: &str) -> PathBuf {
        manifest_path_for(&self.path, rel_path, suffix)
    }

    pub fn list(backup_sets_dir: &Path) -> Result<Vec<BackupSet>> {
        let mut sets = Vec::new();
        if !backup_sets_dir.exists() {
            return Ok(sets);
        }
        for ent in fs::read_dir(backup_sets_dir)? {
            let ent = ent?;
            if !ent.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = ent.file_name().to_str() {
                if name.starts_with(BACKUP_SET_PREFIX) {
                    sets.push(BackupSet { name: name.to_string(), path: ent.path() });
                }
            }
        }
        sets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sets)
    }
}
