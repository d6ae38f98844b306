use dedup_core::chunker::chunk;
use dedup_core::digest::ChunkDigest;
use dedup_core::index::IndexBatch;
use dedup_core::{ChunkStore, DedupError};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn open(root: &Path) -> ChunkStore {
    ChunkStore::with_paths(&root.join("Library"), &root.join("DDB/hash_keys.db")).unwrap()
}

#[test]
fn second_put_does_not_touch_stored_bytes() {
    let td = tempfile::tempdir().unwrap();
    let s = open(td.path());
    let first = s.put(b"some chunk").unwrap();
    assert!(first.was_new);
    let loc = s.location_for(&first.digest);
    fs::write(&loc, b"garbage").unwrap();

    let second = s.put(b"some chunk").unwrap();
    assert!(!second.was_new);
    assert_eq!(second.digest, first.digest);
    assert_eq!(second.location, first.location);
    assert_eq!(fs::read(&loc).unwrap(), b"garbage");
    assert_eq!(s.index().len().unwrap(), 1);
}

#[test]
fn existing_file_without_index_row_is_registered_not_rewritten() {
    let td = tempfile::tempdir().unwrap();
    let s = open(td.path());
    let mut lost = IndexBatch::default();
    let orphan = s.put_batched(b"interrupted", &mut lost).unwrap();
    assert!(orphan.was_new);
    drop(lost);
    assert!(!s.index().contains(&orphan.digest).unwrap());

    let again = s.put(b"interrupted").unwrap();
    assert!(!again.was_new);
    assert_eq!(s.index().lookup(&again.digest).unwrap(), Some(again.location.clone()));
    assert_eq!(s.get(&again.digest).unwrap(), b"interrupted");
}

#[test]
fn index_survives_reopen() {
    let td = tempfile::tempdir().unwrap();
    let digest = {
        let s = open(td.path());
        s.put(b"persisted").unwrap().digest
    };
    let s = open(td.path());
    assert!(s.index().contains(&digest).unwrap());
    assert!(!s.put(b"persisted").unwrap().was_new);
}

#[test]
fn concurrent_puts_of_same_content_yield_one_new() {
    let td = tempfile::tempdir().unwrap();
    let s = Arc::new(open(td.path()));
    let data = vec![42u8; 9000];
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let s = Arc::clone(&s);
            let data = data.clone();
            std::thread::spawn(move || s.put(&data).unwrap())
        })
        .collect();
    let outs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(outs.iter().filter(|o| o.was_new).count(), 1);
    assert!(outs.iter().all(|o| o.digest == outs[0].digest));
    assert_eq!(s.index().len().unwrap(), 1);
    assert_eq!(s.list_chunks().unwrap(), vec![outs[0].digest.clone()]);
}

#[test]
fn chunk_files_are_named_by_sha256() {
    let td = tempfile::tempdir().unwrap();
    let s = open(td.path());
    let data = vec![b'A'; 20_000];
    let mut batch = IndexBatch::default();
    for span in chunk(&data) {
        s.put_batched(span.slice(&data), &mut batch).unwrap();
    }
    assert_eq!(batch.len(), 3);
    assert_eq!(s.index().commit(&batch).unwrap(), 2);
    for d in s.list_chunks().unwrap() {
        let bytes = s.get_verified(&d).unwrap();
        assert_eq!(ChunkDigest::of(&bytes).to_hex(), d);
    }
}

#[test]
fn library_path_with_comma_is_rejected() {
    let td = tempfile::tempdir().unwrap();
    let err = ChunkStore::with_paths(&td.path().join("a,b"), &td.path().join("idx.db"));
    assert!(matches!(err, Err(DedupError::InvalidConfig { .. })));
}

#[test]
fn moved_repository_still_resolves_chunks() {
    let td = tempfile::tempdir().unwrap();
    let old_root = td.path().join("repoA");
    let new_root = td.path().join("repoB");
    let digest = {
        let s = open(&old_root);
        s.put(b"relocated chunk").unwrap().digest
    };
    fs::rename(&old_root, &new_root).unwrap();

    let s = open(&new_root);
    let stale = s.index().lookup(&digest).unwrap().unwrap();
    assert!(!Path::new(&stale).exists());
    assert!(s.location_for(&digest).is_file());
    assert!(s.contains(&digest).unwrap());
    assert_eq!(s.get_verified(&digest).unwrap(), b"relocated chunk");

    let again = s.put(b"relocated chunk").unwrap();
    assert!(!again.was_new);
    assert_eq!(Path::new(&again.location), s.location_for(&digest));
    assert!(dedup_core::verify::verify_store(&s).unwrap().is_consistent());
}
