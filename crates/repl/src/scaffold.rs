//! `cljw new`: project scaffolding.

use cljw_core::error::{CljError, ErrorKind, Failure};
use std::path::Path;

fn write_file(path: &Path, content: &str) -> Result<(), Failure> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| {
            Failure::Error(CljError::new(
                ErrorKind::Io,
                format!("could not create {}: {}", dir.display(), e),
            ))
        })?;
    }
    std::fs::write(path, content).map_err(|e| {
        Failure::Error(CljError::new(
            ErrorKind::Io,
            format!("could not write {}: {}", path.display(), e),
        ))
    })
}

pub fn new_project(name: &str) -> Result<(), Failure> {
    if name.is_empty() || name.contains('/') {
        return Err(Failure::Error(CljError::new(
            ErrorKind::Value,
            format!("invalid project name: {:?}", name),
        )));
    }
    let root = Path::new(name);
    if root.exists() {
        return Err(Failure::Error(CljError::new(
            ErrorKind::Io,
            format!("{} already exists", name),
        )));
    }
    let ns_dir = name.replace('-', "_");

    write_file(
        &root.join("deps.edn"),
        &format!(
            "{{:paths [\"src\"]\n :cljw/main {name}.core\n :cljw/test-paths [\"tests\"]}}\n"
        ),
    )?;
    write_file(
        &root.join("src").join(&ns_dir).join("core.clj"),
        &format!(
            "(ns {name}.core)\n\n(defn -main [& args]\n  (println \"Hello from {name}!\"))\n"
        ),
    )?;
    write_file(
        &root.join("tests").join(&ns_dir).join("core_test.clj"),
        &format!(
            "(ns {name}.core-test\n  (:require [clojure.test :refer [deftest is]]\n            [{name}.core]))\n\n(deftest smoke\n  (is (= 2 (+ 1 1))))\n"
        ),
    )?;
    println!("Created {}/", name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn test_scaffold_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let old = std::env::current_dir().expect("cwd");
        std::env::set_current_dir(dir.path()).expect("chdir");
        new_project("my-app").expect("scaffolds");
        assert!(Path::new("my-app/deps.edn").is_file());
        assert!(Path::new("my-app/src/my_app/core.clj").is_file());
        assert!(Path::new("my-app/tests/my_app/core_test.clj").is_file());
        std::env::set_current_dir(old).expect("chdir back");
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(new_project("a/b").is_err());
        assert!(new_project("").is_err());
    }
}
