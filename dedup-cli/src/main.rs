use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::debug;

use dedup_core::manifest::BackupSet;
use dedup_core::progress::Progress;
use dedup_core::restore::{restore_backup_set, RestoreStatus};
use dedup_core::verify::{verify_manifest, verify_store};
use dedup_core::{logging, run_backup_with, run_restore, ChunkStore, DedupConfig, RestoreMode};

#[derive(Parser)]
#[command(name = "dedup", version, about = "Content-defined deduplicating backup")]
struct Cli {
    /// Repository root (Library/, BackupSets/, DDB/, Restore/ are created under it)
    #[arg(long, global = true, default_value = ".", conflicts_with = "config")]
    repo: PathBuf,
    /// JSON config file with explicit directories
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Back up every file under a directory into a new backup set
    Backup {
        source: PathBuf,
        #[arg(long)] exclude: Vec<String>,
        #[arg(long)] threads: Option<usize>,
        #[arg(long, default_value_t = false)] progress: bool,
        #[arg(long, default_value_t = false)] json: bool,
    },
    /// Rebuild one file from its manifest into the restore directory
    Restore {
        manifest: PathBuf,
        #[arg(long, default_value_t = false)] strict: bool,
        #[arg(long, default_value_t = false)] json: bool,
    },
    /// Rebuild every file of a backup set
    RestoreSet {
        set_dir: PathBuf,
        #[arg(long, default_value_t = false)] strict: bool,
    },
    /// Re-hash every chunk referenced by a manifest
    Verify { manifest: PathBuf },
    /// List index rows
    Index {
        #[arg(long, default_value_t = false)] json: bool,
    },
    /// Compare index rows with chunk files on disk
    Audit,
    /// Register chunk files that have no index row
    Reconcile,
    /// List backup sets
    Sets,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_file.as_deref()).context("initialising logging")?;
    let config = load_config(cli.config.as_deref(), &cli.repo)?;
    debug!(?config, "configuration");
    match cli.cmd {
        Cmd::Backup { source, exclude, threads, progress, json } => {
            backup(&source, config, exclude, threads, progress, json)?
        }
        Cmd::Restore { manifest, strict, json } => restore(&manifest, &config, mode(strict), json)?,
        Cmd::RestoreSet { set_dir, strict } => restore_set(&set_dir, &config, mode(strict))?,
        Cmd::Verify { manifest } => verify(&manifest, &config)?,
        Cmd::Index { json } => index(&config, json)?,
        Cmd::Audit => audit(&config)?,
        Cmd::Reconcile => reconcile(&config)?,
        Cmd::Sets => sets(&config)?,
    }
    Ok(())
}

fn load_config(config: Option<&Path>, repo: &Path) -> Result<DedupConfig> {
    match config {
        Some(p) => DedupConfig::load(p).with_context(|| format!("loading config {}", p.display())),
        None => Ok(DedupConfig::under(repo)),
    }
}

fn mode(strict: bool) -> RestoreMode {
    if strict { RestoreMode::Strict } else { RestoreMode::BestEffort }
}

fn open_store(config: &DedupConfig) -> Result<ChunkStore> {
    config.ensure_dirs().context("creating repository directories")?;
    ChunkStore::open(config).context("opening chunk store")
}

fn backup(
    source: &Path,
    mut config: DedupConfig,
    exclude: Vec<String>,
    threads: Option<usize>,
    progress: bool,
    json: bool,
) -> Result<()> {
    config.exclude.extend(exclude);
    if let Some(n) = threads {
        config.threads = n;
    }
    let stats = run_backup_with(source, &config, &Progress::new(progress))
        .with_context(|| format!("backing up {}", source.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        for line in stats.summary_lines() {
            println!("{}", line);
        }
        println!("Backup set: {}", stats.backup_set.display());
    }
    Ok(())
}

fn restore(manifest: &Path, config: &DedupConfig, mode: RestoreMode, json: bool) -> Result<()> {
    let resp = run_restore(manifest, config, mode);
    if json {
        println!("{}", serde_json::to_string_pretty(&resp)?);
    } else {
        println!("{}", resp.message);
    }
    if resp.status == RestoreStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

fn restore_set(set_dir: &Path, config: &DedupConfig, mode: RestoreMode) -> Result<()> {
    let rep = restore_backup_set(set_dir, config, mode)
        .with_context(|| format!("restoring backup set {}", set_dir.display()))?;
    for r in &rep.restored {
        println!("restored {}", r.restored_path.display());
    }
    for (m, e) in &rep.failed {
        println!("FAILED {}: {}", m.display(), e);
    }
    println!("{} restored, {} failed under {}", rep.restored.len(), rep.failed.len(), rep.restore_root.display());
    if !rep.failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn verify(manifest: &Path, config: &DedupConfig) -> Result<()> {
    let store = open_store(config)?;
    let rep = verify_manifest(manifest, &store).with_context(|| format!("verifying {}", manifest.display()))?;
    eprintln!("Chunks ok={}, missing={}, corrupt={}", rep.chunks_ok, rep.chunks_missing, rep.chunks_corrupt);
    if rep.is_ok() {
        println!("OK");
    } else {
        println!("BAD");
        std::process::exit(1);
    }
    Ok(())
}

fn index(config: &DedupConfig, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let rows = store.index().entries()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for r in &rows {
            println!("{}  {}", r.digest, r.location);
        }
        eprintln!("{} chunk(s) indexed", rows.len());
    }
    Ok(())
}

fn audit(config: &DedupConfig) -> Result<()> {
    let store = open_store(config)?;
    let a = verify_store(&store)?;
    println!("Indexed chunks:  {}", a.indexed);
    println!("Chunks on disk:  {}", a.on_disk);
    for d in &a.dangling_index {
        println!("  dangling index row: {}", d);
    }
    for d in &a.unindexed {
        println!("  unindexed chunk: {}", d);
    }
    println!("{}", if a.is_consistent() { "OK" } else { "BAD" });
    Ok(())
}

fn reconcile(config: &DedupConfig) -> Result<()> {
    let store = open_store(config)?;
    let n = store.reconcile()?;
    println!("Registered {} chunk(s)", n);
    Ok(())
}

fn sets(config: &DedupConfig) -> Result<()> {
    for s in BackupSet::list(&config.backup_sets_dir)? {
        println!("{}\t{}", s.name, s.path.display());
    }
    Ok(())
}
