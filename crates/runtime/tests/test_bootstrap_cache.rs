//! Bootstrap cache: snapshot, restore, and staleness fallback.

use cljw_core::printer::pr_str;
use cljw_runtime::{bootstrap, bootstrap_with_cache, write_cache, Backend, Interp};

#[test]
fn test_cache_round_trip_restores_core() {
    let source = Interp::new(Backend::Vm);
    bootstrap(&source).expect("source bootstrap");
    let bytes = write_cache(&source.env).expect("snapshot serializes");

    let restored = Interp::new(Backend::Vm);
    let ok = cljw_runtime::bootstrap::bootstrap_from_cache(&restored, &bytes)
        .expect("restore succeeds");
    assert!(ok);

    // builtins, core macros and core fns all work without re-parsing
    let out = restored
        .eval_str("(reduce + 0 (map inc (range 10)))", None)
        .unwrap();
    assert_eq!(pr_str(&out), "55");
    let out = restored
        .eval_str("(when true (->> [1 2 3] (map inc) (reduce +)))", None)
        .unwrap();
    assert_eq!(pr_str(&out), "9");
}

#[test]
fn test_cache_version_mismatch_falls_back() {
    let source = Interp::new(Backend::Vm);
    bootstrap(&source).expect("source bootstrap");
    let mut bytes = write_cache(&source.env).expect("snapshot serializes");
    bytes[0] = bytes[0].wrapping_add(1);

    let restored = Interp::new(Backend::Vm);
    let ok = cljw_runtime::bootstrap::bootstrap_from_cache(&restored, &bytes)
        .expect("mismatch is not an error");
    assert!(!ok);
}

#[test]
fn test_bootstrap_with_cache_writes_and_reuses_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache_path = dir.path().join("bootstrap.bin");

    let first = Interp::new(Backend::Vm);
    bootstrap_with_cache(&first, Some(&cache_path), false).expect("first boot");
    assert!(cache_path.is_file(), "cache file written");

    let second = Interp::new(Backend::Vm);
    bootstrap_with_cache(&second, Some(&cache_path), false).expect("cached boot");
    let out = second.eval_str("(vec (take 3 (iterate inc 5)))", None).unwrap();
    let out = cljw_runtime::seqs::realize_deep(&second.env, &out).unwrap();
    assert_eq!(pr_str(&out), "[5 6 7]");
}

#[test]
fn test_tree_backend_bootstraps_from_source() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache_path = dir.path().join("bootstrap.bin");
    let tree = Interp::new(Backend::Tree);
    bootstrap_with_cache(&tree, Some(&cache_path), false).expect("tree boot");
    // tree closures are not serialized, so no cache file appears
    assert!(!cache_path.exists());
    let out = tree.eval_str("(map inc [1 2])", None).unwrap();
    let out = cljw_runtime::seqs::realize_deep(&tree.env, &out).unwrap();
    assert_eq!(pr_str(&out), "(2 3)");
}

#[test]
fn test_gc_threshold_rebased_after_restore() {
    let source = Interp::new(Backend::Vm);
    bootstrap(&source).expect("source bootstrap");
    let bytes = write_cache(&source.env).expect("snapshot");

    let restored = Interp::new(Backend::Vm);
    restored.env.heap.set_threshold(1);
    cljw_runtime::bootstrap::bootstrap_from_cache(&restored, &bytes).expect("restore");
    // restore rebases the threshold so startup does not immediately
    // collect
    assert!(!restored.env.heap.should_collect());
}
