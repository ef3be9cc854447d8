//! `cljw test`: load test files and run every `deftest` var.

use crate::deps::DepsConfig;
use crate::report;
use cljw_core::value::Value;
use cljw_runtime::{namespaces, Interp};
use std::path::{Path, PathBuf};

fn collect_test_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            collect_test_files(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "clj") {
            out.push(path);
        }
    }
}

pub fn run(interp: &Interp, files: &[PathBuf], config: &DepsConfig) -> i32 {
    let mut targets = files.to_vec();
    if targets.is_empty() {
        let mut roots: Vec<PathBuf> = config.test_paths.iter().map(PathBuf::from).collect();
        if roots.is_empty() {
            roots.push(PathBuf::from("tests"));
            roots.push(PathBuf::from("test"));
        }
        for root in roots {
            if root.is_dir() {
                collect_test_files(&root, &mut targets);
            }
        }
    }
    if targets.is_empty() {
        eprintln!("no test files found");
        return 1;
    }
    for file in &targets {
        if let Err(failure) = namespaces::load_path(&interp.env, file) {
            report::print_failure(&failure, None);
            return 1;
        }
    }
    match interp.eval_str("(clojure.test/run-tests)", None) {
        Ok(Value::Map(result)) => {
            let failed = matches!(
                result.get(&Value::keyword("fail")),
                Some(Value::Int(n)) if *n > 0
            );
            if failed { 1 } else { 0 }
        }
        Ok(_) => 0,
        Err(failure) => {
            report::print_failure(&failure, None);
            1
        }
    }
}
