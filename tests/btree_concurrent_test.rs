//! Multi-threaded B+Tree tests

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use arbor::buffer::BufferPoolManager;
use arbor::common::{PageId, RecordId, ReplacerKind, SlotId};
use arbor::index::{BPlusTree, BPlusTreeOptions, IntegerComparator};
use arbor::storage::disk::DiskManager;
use tempfile::NamedTempFile;

type Tree = BPlusTree<IntegerComparator>;

fn create_tree(pool_size: usize, kind: ReplacerKind) -> (Arc<Tree>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::with_replacer(pool_size, kind, disk_manager));
    let options = BPlusTreeOptions {
        key_size: 8,
        leaf_max_size: 8,
        internal_max_size: 8,
    };
    let tree = BPlusTree::new(bpm, IntegerComparator, options).unwrap();
    (Arc::new(tree), temp_file)
}

fn key(k: i64) -> [u8; 8] {
    IntegerComparator::key(k)
}

fn rid(k: i64) -> RecordId {
    RecordId::new(PageId::new(k as u32), SlotId::new((k % 1000) as u16))
}

fn decode(key: Vec<u8>) -> i64 {
    i64::from_le_bytes(key.try_into().unwrap())
}

fn collect_keys(tree: &Tree) -> Vec<i64> {
    tree.begin()
        .unwrap()
        .map(|entry| decode(entry.unwrap().0))
        .collect()
}

#[test]
fn test_concurrent_insert_disjoint_keys() {
    const THREADS: i64 = 4;
    const PER_THREAD: i64 = 500;

    let (tree, _temp) = create_tree(128, ReplacerKind::Arc);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                // Interleaved keys so threads keep hitting the same leaves
                for i in 0..PER_THREAD {
                    let k = i * THREADS + t;
                    assert!(tree.insert(&key(k), rid(k)).unwrap());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let expected: Vec<i64> = (0..THREADS * PER_THREAD).collect();
    assert_eq!(collect_keys(&tree), expected);
    for k in expected {
        assert_eq!(tree.get_value(&key(k)).unwrap(), Some(rid(k)));
    }

    let stats = tree.check_integrity().unwrap();
    assert_eq!(stats.entries, (THREADS * PER_THREAD) as usize);
}

#[test]
fn test_concurrent_insert_same_keys() {
    let (tree, _temp) = create_tree(128, ReplacerKind::Clock);
    let inserted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let tree = Arc::clone(&tree);
            let inserted = Arc::clone(&inserted);
            thread::spawn(move || {
                for k in 0..300 {
                    if tree.insert(&key(k), rid(k)).unwrap() {
                        inserted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // Every key wins exactly once
    assert_eq!(inserted.load(Ordering::Relaxed), 300);
    assert_eq!(collect_keys(&tree), (0..300).collect::<Vec<_>>());
    tree.check_integrity().unwrap();
}

#[test]
fn test_concurrent_remove() {
    let (tree, _temp) = create_tree(128, ReplacerKind::Arc);
    for k in 0..2000 {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    // Three threads remove their residue class, keys with k % 4 == 3 stay
    let handles: Vec<_> = (0..3)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for k in (t..2000).step_by(4) {
                    tree.remove(&key(k)).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let expected: Vec<i64> = (0..2000).filter(|k| k % 4 == 3).collect();
    assert_eq!(collect_keys(&tree), expected);
    for k in 0..2000 {
        let found = tree.get_value(&key(k)).unwrap();
        assert_eq!(found.is_some(), k % 4 == 3, "key {}", k);
    }

    let stats = tree.check_integrity().unwrap();
    assert_eq!(stats.entries, 500);
}

#[test]
fn test_concurrent_remove_everything() {
    let (tree, _temp) = create_tree(128, ReplacerKind::Arc);
    for k in 0..1000 {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for k in (t..1000).step_by(4) {
                    tree.remove(&key(k)).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(tree.is_empty().unwrap());
    assert!(tree.begin().unwrap().is_end());

    // The tree is usable again afterwards
    tree.insert(&key(5), rid(5)).unwrap();
    assert_eq!(collect_keys(&tree), vec![5]);
}

#[test]
fn test_concurrent_readers_and_writers() {
    let (tree, _temp) = create_tree(128, ReplacerKind::Arc);

    // Even keys to start with; k % 4 == 2 is never touched by writers
    for k in (0..2000).step_by(2) {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));

    let inserter = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for k in (1..2000).step_by(2) {
                assert!(tree.insert(&key(k), rid(k)).unwrap());
            }
        })
    };
    let remover = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for k in (0..2000).step_by(4) {
                tree.remove(&key(k)).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let tree = Arc::clone(&tree);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut scans = 0;
                while !done.load(Ordering::Acquire) || scans == 0 {
                    // Scans stay sorted and always see the stable keys
                    let keys = collect_keys(&tree);
                    assert!(keys.windows(2).all(|w| w[0] < w[1]));
                    let seen: BTreeSet<i64> = keys.into_iter().collect();
                    for k in (2..2000).step_by(4) {
                        assert!(seen.contains(&k), "scan lost key {}", k);
                    }

                    for k in (2..2000).step_by(40) {
                        assert_eq!(tree.get_value(&key(k)).unwrap(), Some(rid(k)));
                    }
                    scans += 1;
                }
                scans
            })
        })
        .collect();

    inserter.join().unwrap();
    remover.join().unwrap();
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }

    let expected: Vec<i64> = (0..2000).filter(|k| k % 4 != 0).collect();
    assert_eq!(collect_keys(&tree), expected);

    let stats = tree.check_integrity().unwrap();
    assert_eq!(stats.entries, expected.len());
}

#[test]
fn test_concurrent_range_scans_during_splits() {
    let (tree, _temp) = create_tree(128, ReplacerKind::Clock);
    for k in (0..1000).step_by(10) {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    let writer = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for k in 0..1000 {
                if k % 10 != 0 {
                    tree.insert(&key(k), rid(k)).unwrap();
                }
            }
        })
    };

    let scanner = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for _ in 0..50 {
                let range = tree.range_scan(&key(200), &key(400)).unwrap();
                let keys: Vec<i64> = range.into_iter().map(|(k, _)| decode(k)).collect();
                assert!(keys.windows(2).all(|w| w[0] < w[1]));
                assert!(keys.iter().all(|k| (200..=400).contains(k)));
                for k in (200..=400).step_by(10) {
                    assert!(keys.contains(&k), "range lost key {}", k);
                }
            }
        })
    };

    writer.join().unwrap();
    scanner.join().unwrap();

    assert_eq!(collect_keys(&tree), (0..1000).collect::<Vec<_>>());
    tree.check_integrity().unwrap();
}

#[test]
fn test_concurrent_scans_during_merges() {
    let (tree, _temp) = create_tree(128, ReplacerKind::Arc);
    for k in 0..2000 {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    // Multiples of 10 survive; the rest is removed, shrinking the tree
    let removers: Vec<_> = (0..2)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for k in (0..2000).filter(|k| k % 10 != 0 && k % 2 == t) {
                    tree.remove(&key(k)).unwrap();
                }
            })
        })
        .collect();

    let scanners: Vec<_> = (0..2)
        .map(|s| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for _ in 0..100 {
                    let keys = if s == 0 {
                        collect_keys(&tree)
                    } else {
                        tree.range_scan(&key(500), &key(1500))
                            .unwrap()
                            .into_iter()
                            .map(|(k, _)| decode(k))
                            .collect()
                    };
                    assert!(keys.windows(2).all(|w| w[0] < w[1]));

                    let (low, high) = if s == 0 { (0, 2000) } else { (500, 1501) };
                    assert!(keys.iter().all(|k| (low..high).contains(k)));
                    let seen: BTreeSet<i64> = keys.into_iter().collect();
                    for k in (low..high).step_by(10) {
                        assert!(seen.contains(&k), "scan lost key {}", k);
                    }
                }
            })
        })
        .collect();

    for handle in removers.into_iter().chain(scanners) {
        handle.join().unwrap();
    }

    let expected: Vec<i64> = (0..2000).step_by(10).collect();
    assert_eq!(collect_keys(&tree), expected);
    let stats = tree.check_integrity().unwrap();
    assert_eq!(stats.entries, 200);
}
