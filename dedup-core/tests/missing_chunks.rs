use dedup_core::manifest::Manifest;
use dedup_core::restore::{restore_file, RestoreStatus};
use dedup_core::verify::{verify_manifest, verify_store};
use dedup_core::{run_backup, run_restore, ChunkStore, DedupConfig, DedupError, RestoreMode};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;
    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

/// A two-chunk manifest for `doc.txt` whose first chunk has been deleted.
fn two_chunks_first_missing(cfg: &DedupConfig) -> (PathBuf, String, Vec<u8>) {
    cfg.ensure_dirs().unwrap();
    let store = ChunkStore::open(cfg).unwrap();
    let a = store.put(&vec![1u8; 5000]).unwrap();
    let b = store.put(&vec![2u8; 3000]).unwrap();
    let mut m = Manifest::default();
    m.push(a.digest.clone(), a.location.clone());
    m.push(b.digest, b.location);
    let path = cfg.backup_sets_dir.join("BackupSet_20240101_000000/doc.txt.meta");
    m.write_to(&path).unwrap();
    fs::remove_file(&a.location).unwrap();
    (path, a.digest, vec![2u8; 3000])
}

#[test]
fn best_effort_skips_missing_chunk_and_warns() {
    let td = tempfile::tempdir().unwrap();
    let cfg = DedupConfig::under(td.path());
    let (manifest, missing, present) = two_chunks_first_missing(&cfg);

    let cap = Captured::default();
    let sub = tracing_subscriber::fmt().with_writer(cap.clone()).with_ansi(false).finish();
    let resp = tracing::subscriber::with_default(sub, || {
        run_restore(&manifest, &cfg, RestoreMode::BestEffort)
    });

    assert_eq!(resp.status, RestoreStatus::Success);
    assert!(resp.message.contains("missing chunk"), "{}", resp.message);
    let out = resp.restored_path.unwrap();
    assert_eq!(fs::read(out).unwrap(), present);

    let logs = cap.text();
    assert!(logs.contains("WARN"), "{}", logs);
    assert!(logs.contains(&format!("Missing chunk: {}", missing)), "{}", logs);
}

#[test]
fn best_effort_report_lists_missing_digests() {
    let td = tempfile::tempdir().unwrap();
    let cfg = DedupConfig::under(td.path());
    let (manifest, missing, present) = two_chunks_first_missing(&cfg);
    let rep = restore_file(&manifest, &cfg, RestoreMode::BestEffort).unwrap();
    assert_eq!(rep.chunks_missing, vec![missing]);
    assert_eq!(rep.chunks_restored, 1);
    assert_eq!(rep.bytes_written, present.len() as u64);
}

#[test]
fn strict_fails_and_removes_partial_output() {
    let td = tempfile::tempdir().unwrap();
    let cfg = DedupConfig::under(td.path());
    let (manifest, missing, _) = two_chunks_first_missing(&cfg);

    let err = restore_file(&manifest, &cfg, RestoreMode::Strict).unwrap_err();
    match err {
        DedupError::MissingChunk { digest } => assert_eq!(digest, missing),
        other => panic!("unexpected error: {}", other),
    }
    assert!(!cfg.restore_dir.join("doc.txt").exists());

    let resp = run_restore(&manifest, &cfg, RestoreMode::Strict);
    assert_eq!(resp.status, RestoreStatus::Error);
}

#[test]
fn strict_rejects_corrupt_chunk() {
    let td = tempfile::tempdir().unwrap();
    let src = td.path().join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("f.txt"), b"trust but verify").unwrap();
    let cfg = DedupConfig::under(&td.path().join("repo"));
    let stats = run_backup(&src, &cfg).unwrap();
    let manifest = stats.backup_set.join("f.txt.meta");
    let m = Manifest::read_from(&manifest).unwrap();
    fs::write(m.entries[0].location.as_ref().unwrap(), b"bit rot").unwrap();

    assert!(matches!(
        restore_file(&manifest, &cfg, RestoreMode::Strict),
        Err(DedupError::CorruptChunk { .. })
    ));
    let rep = restore_file(&manifest, &cfg, RestoreMode::BestEffort).unwrap();
    assert_eq!(fs::read(rep.restored_path).unwrap(), b"bit rot");
}

#[test]
fn verify_counts_missing_and_corrupt() {
    let td = tempfile::tempdir().unwrap();
    let src = td.path().join("src");
    fs::create_dir_all(&src).unwrap();
    let data: Vec<u8> = (0..60_000u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
    fs::write(src.join("big.bin"), &data).unwrap();
    let cfg = DedupConfig::under(&td.path().join("repo"));
    let stats = run_backup(&src, &cfg).unwrap();
    let manifest = stats.backup_set.join("big.bin.meta");
    let store = ChunkStore::open(&cfg).unwrap();

    let rep = verify_manifest(&manifest, &store).unwrap();
    assert!(rep.is_ok());
    assert_eq!(rep.chunks_ok, stats.total_chunks);

    let m = Manifest::read_from(&manifest).unwrap();
    let distinct: Vec<&str> = {
        let mut v: Vec<&str> = m.entries.iter().map(|e| e.digest.as_str()).collect();
        v.sort();
        v.dedup();
        v
    };
    assert!(distinct.len() >= 2);
    fs::remove_file(store.location_for(distinct[0])).unwrap();
    fs::write(store.location_for(distinct[1]), b"junk").unwrap();
    let rep = verify_manifest(&manifest, &store).unwrap();
    assert!(!rep.is_ok());
    assert!(rep.chunks_missing >= 1);
    assert!(rep.chunks_corrupt >= 1);
    assert_eq!(rep.chunks_ok + rep.chunks_missing + rep.chunks_corrupt, m.len() as u64);

    let audit = verify_store(&store).unwrap();
    assert_eq!(audit.dangling_index, vec![distinct[0].to_string()]);
    assert!(audit.unindexed.is_empty());
    assert_eq!(audit.on_disk + 1, audit.indexed);
}

#[test]
fn audit_finds_unindexed_chunks_and_reconcile_fixes_them() {
    let td = tempfile::tempdir().unwrap();
    let cfg = DedupConfig::under(td.path());
    let store = ChunkStore::open(&cfg).unwrap();
    store.put(b"indexed").unwrap();
    let mut lost = dedup_core::index::IndexBatch::default();
    let orphan = store.put_batched(b"orphan", &mut lost).unwrap();

    let audit = verify_store(&store).unwrap();
    assert_eq!(audit.unindexed, vec![orphan.digest.clone()]);
    assert!(!audit.is_consistent());

    assert_eq!(store.reconcile().unwrap(), 1);
    assert!(verify_store(&store).unwrap().is_consistent());
}
