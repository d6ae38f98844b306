use crate::error::{DedupError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub const DEFAULT_MANIFEST_SUFFIX: &str = ".meta";

/// Where a repository keeps its chunks, manifests, index and restored files.
///
/// Passed explicitly into every entry point; nothing in the core reads global path state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DedupConfig {
    pub library_dir: PathBuf,
    pub backup_sets_dir: PathBuf,
    pub index_path: PathBuf,
    pub restore_dir: PathBuf,
    #[serde(default = "default_suffix")]
    pub manifest_suffix: String,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Glob patterns matched against `/`-separated paths relative to the source root.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Worker threads for backup; 0 lets rayon decide.
    #[serde(default)]
    pub threads: usize,
}

fn default_suffix() -> String {
    DEFAULT_MANIFEST_SUFFIX.to_string()
}

impl DedupConfig {
    /// Standard layout under one repository directory.
    pub fn under(root: &Path) -> Self {
        Self {
            library_dir: root.join("Library"),
            backup_sets_dir: root.join("BackupSets"),
            index_path: root.join("DDB").join("hash_keys.db"),
            restore_dir: root.join("Restore"),
            manifest_suffix: default_suffix(),
            follow_symlinks: false,
            exclude: Vec::new(),
            threads: 0,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let f = File::open(path)?;
        let cfg: DedupConfig = serde_json::from_reader(BufReader::new(f))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        // Manifest lines are `<digest>,<location>` with no escaping.
        if self.library_dir.to_string_lossy().contains(',') {
            return Err(DedupError::InvalidConfig {
                reason: format!("library_dir must not contain a comma: {:?}", self.library_dir),
            });
        }
        if self.manifest_suffix.is_empty() {
            return Err(DedupError::InvalidConfig { reason: "manifest_suffix is empty".into() });
        }
        Ok(())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.library_dir)?;
        fs::create_dir_all(&self.backup_sets_dir)?;
        fs::create_dir_all(&self.restore_dir)?;
        if let Some(parent) = self.index_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}
