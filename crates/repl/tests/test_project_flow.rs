//! Project-level flows: load paths, require across files, deps.edn.

use cljw_core::printer::pr_str;
use cljw_runtime::{bootstrap, namespaces, Backend, Interp};
use std::fs;
use std::rc::Rc;

fn vm() -> Rc<Interp> {
    let interp = Interp::new(Backend::Vm);
    bootstrap(&interp).expect("bootstrap succeeds");
    interp
}

#[test]
fn test_require_across_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("src");
    fs::create_dir_all(src.join("my_app")).unwrap();
    fs::write(
        src.join("my_app").join("util.clj"),
        "(ns my-app.util)\n(defn double-it [x] (* 2 x))\n",
    )
    .unwrap();
    fs::write(
        src.join("my_app").join("core.clj"),
        "(ns my-app.core (:require [my-app.util :as util]))\n\
         (defn run [x] (util/double-it x))\n",
    )
    .unwrap();

    let interp = vm();
    interp.env.add_load_path(src.clone());
    interp
        .eval_str("(require 'my-app.core)", None)
        .expect("require loads the chain");
    let out = interp.eval_str("(my-app.core/run 21)", None).unwrap();
    assert_eq!(pr_str(&out), "42");
    // loaded-libs set prevents reloading
    interp
        .eval_str("(require 'my-app.core)", None)
        .expect("second require is a no-op");
}

#[test]
fn test_refer_brings_vars_into_caller() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("lib")).unwrap();
    fs::write(
        dir.path().join("lib").join("helpers.clj"),
        "(ns helpers)\n(defn shout [s] (upper-case s))\n",
    )
    .unwrap();

    let interp = vm();
    interp.env.add_load_path(dir.path().join("lib"));
    interp
        .eval_str("(require '[helpers :refer [shout]])", None)
        .expect("require with refer");
    let out = interp.eval_str("(shout \"hi\")", None).unwrap();
    assert_eq!(pr_str(&out), "\"HI\"");
}

#[test]
fn test_load_file_evaluates_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("script.clj");
    fs::write(&file, "(def acc (atom []))\n(swap! acc conj 1)\n(swap! acc conj 2)\n@acc\n")
        .unwrap();

    let interp = vm();
    let out = namespaces::load_path(&interp.env, &file).expect("loads");
    assert_eq!(pr_str(&out), "[1 2]");
}

#[test]
fn test_deftest_flow() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("sample_test.clj");
    fs::write(
        &file,
        "(ns sample-test (:require [clojure.test :refer [deftest is]]))\n\
         (deftest passes (is (= 4 (+ 2 2))))\n\
         (deftest fails (is (= 5 (+ 2 2))))\n",
    )
    .unwrap();

    let interp = vm();
    namespaces::load_path(&interp.env, &file).expect("test file loads");
    let out = interp
        .eval_str("(clojure.test/run-tests)", None)
        .expect("run-tests");
    let s = pr_str(&out);
    assert!(s.contains(":pass 1"), "{}", s);
    assert!(s.contains(":fail 1"), "{}", s);
}

#[test]
fn test_file_position_in_load_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("broken.clj");
    fs::write(&file, "(def ok 1)\n(undefined-thing)\n").unwrap();

    let interp = vm();
    let err = namespaces::load_path(&interp.env, &file).unwrap_err();
    match err {
        cljw_core::error::Failure::Error(e) => {
            let pos = e.pos.expect("position recorded");
            assert_eq!(pos.line, 2);
            assert!(
                pos.file.as_deref().is_some_and(|f| f.contains("broken.clj")),
                "{:?}",
                pos.file
            );
        }
        other => panic!("unexpected {:?}", other),
    }
}
