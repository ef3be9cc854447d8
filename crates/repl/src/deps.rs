//! `deps.edn` consumption: paths, local and Git deps, aliases.
//!
//! The file is read with the crate's own reader against a scratch
//! environment — deps.edn is plain data. Git deps shell out to `git` and
//! cache working trees under `~/.cljw/gitlibs/<lib>/<rev>`. Maven
//! coordinates are out of scope and rejected with a clear error;
//! `:jvm-opts` is ignored with a warning.

use cljw_core::env::Env;
use cljw_core::error::{CljError, ErrorKind, Failure};
use cljw_core::value::Value;
use cljw_compiler::Reader;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coord {
    Local { root: String },
    Git { url: String, rev: String, deps_root: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dep {
    pub lib: String,
    pub coord: Coord,
}

#[derive(Debug, Clone, Default)]
pub struct Alias {
    pub extra_paths: Vec<String>,
    pub extra_deps: Vec<Dep>,
    pub main_opts: Vec<String>,
    pub exec_fn: Option<String>,
    pub exec_args: Vec<(String, String)>,
    pub ns_default: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DepsConfig {
    pub paths: Vec<String>,
    pub deps: Vec<Dep>,
    pub aliases: HashMap<String, Alias>,
    pub main_ns: Option<String>,
    pub test_paths: Vec<String>,
}

fn config_error(msg: impl Into<String>) -> Failure {
    Failure::Error(CljError::new(ErrorKind::Value, msg))
}

/// Read `deps.edn` (if present) and merge `-Sdeps` extra data over it.
pub fn read_config(dir: &Path, extra: Option<&str>) -> Result<DepsConfig, Failure> {
    let mut config = DepsConfig::default();
    let path = dir.join("deps.edn");
    if path.is_file() {
        let src = std::fs::read_to_string(&path).map_err(|e| {
            Failure::Error(CljError::new(
                ErrorKind::Io,
                format!("could not read {}: {}", path.display(), e),
            ))
        })?;
        merge_edn(&mut config, &src, &path.to_string_lossy())?;
    }
    if let Some(extra) = extra {
        merge_edn(&mut config, extra, "-Sdeps")?;
    }
    Ok(config)
}

fn merge_edn(config: &mut DepsConfig, src: &str, origin: &str) -> Result<(), Failure> {
    let env = Env::new();
    let form = Reader::new(src, &env, Some(origin.into()))
        .read_next()
        .map_err(Failure::Error)?
        .unwrap_or(Value::Nil);
    let Value::Map(top) = form else {
        return Err(config_error(format!("{} must contain a map", origin)));
    };
    for (k, v) in top.iter() {
        let Value::Keyword(key) = k else { continue };
        match (key.ns(), key.name()) {
            (None, "paths") => config.paths.extend(string_vec(v)?),
            (None, "deps") => config.deps.extend(parse_deps(v)?),
            (None, "aliases") => {
                let Value::Map(aliases) = v else {
                    return Err(config_error(":aliases must be a map"));
                };
                for (ak, av) in aliases.iter() {
                    let Value::Keyword(name) = ak else {
                        return Err(config_error("alias keys must be keywords"));
                    };
                    config
                        .aliases
                        .insert(name.name().to_string(), parse_alias(av)?);
                }
            }
            (Some("cljw"), "main") => {
                config.main_ns = Some(value_name(v));
            }
            (Some("cljw"), "test-paths") => config.test_paths.extend(string_vec(v)?),
            (Some("cljw"), "wasm-deps") => {
                warn!("ignoring :cljw/wasm-deps (wasm host support is deferred)");
            }
            (None, "jvm-opts") => warn!("ignoring :jvm-opts (no JVM here)"),
            _ => {}
        }
    }
    Ok(())
}

fn value_name(v: &Value) -> String {
    match v {
        Value::Symbol(s) => s.to_string(),
        Value::Str(s) => s.to_string(),
        other => cljw_core::printer::display_str(other),
    }
}

fn string_vec(v: &Value) -> Result<Vec<String>, Failure> {
    let Value::Vector(items) = v else {
        return Err(config_error("expected a vector of strings"));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(config_error(format!(
                "expected a string path, got {}",
                other.type_tag()
            ))),
        })
        .collect()
}

fn parse_alias(v: &Value) -> Result<Alias, Failure> {
    let Value::Map(m) = v else {
        return Err(config_error("alias value must be a map"));
    };
    let mut alias = Alias::default();
    for (k, v) in m.iter() {
        let Value::Keyword(key) = k else { continue };
        match key.name() {
            "extra-paths" => alias.extra_paths = string_vec(v)?,
            "extra-deps" => alias.extra_deps = parse_deps(v)?,
            "main-opts" => alias.main_opts = string_vec(v)?,
            "exec-fn" => alias.exec_fn = Some(value_name(v)),
            "exec-args" => {
                let Value::Map(args) = v else {
                    return Err(config_error(":exec-args must be a map"));
                };
                for (ak, av) in args.iter() {
                    alias
                        .exec_args
                        .push((cljw_core::printer::pr_str(ak), cljw_core::printer::pr_str(av)));
                }
            }
            "ns-default" => alias.ns_default = Some(value_name(v)),
            _ => {}
        }
    }
    Ok(alias)
}

fn parse_deps(v: &Value) -> Result<Vec<Dep>, Failure> {
    let Value::Map(m) = v else {
        return Err(config_error(":deps must be a map"));
    };
    let mut deps = Vec::new();
    for (lib, coord) in m.iter() {
        let lib = value_name(lib);
        let Value::Map(c) = coord else {
            return Err(config_error(format!("{}: coordinate must be a map", lib)));
        };
        let get = |ns: &str, name: &str| {
            c.iter()
                .find(|(k, _)| {
                    matches!(k, Value::Keyword(kw) if kw.ns() == Some(ns) && kw.name() == name)
                })
                .map(|(_, v)| v.clone())
        };
        if get("mvn", "version").is_some() {
            return Err(config_error(format!(
                "{}: Maven coordinates are not supported; use :git/url or :local/root",
                lib
            )));
        }
        if let Some(root) = get("local", "root") {
            deps.push(Dep {
                lib,
                coord: Coord::Local {
                    root: value_name(&root),
                },
            });
            continue;
        }
        let url = match get("git", "url") {
            Some(url) => value_name(&url),
            None => infer_git_url(&lib).ok_or_else(|| {
                config_error(format!(
                    "{}: need :git/url, :local/root, or an io.github./io.gitlab. lib name",
                    lib
                ))
            })?,
        };
        let rev = get("git", "sha")
            .or_else(|| get("git", "tag"))
            .map(|v| value_name(&v))
            .ok_or_else(|| config_error(format!("{}: git deps need :git/sha or :git/tag", lib)))?;
        let deps_root = get("deps", "root").map(|v| value_name(&v));
        deps.push(Dep {
            lib,
            coord: Coord::Git { url, rev, deps_root },
        });
    }
    Ok(deps)
}

/// `io.github.owner/repo` and `io.gitlab.owner/repo` names imply their
/// hosting URL.
fn infer_git_url(lib: &str) -> Option<String> {
    let (ns, name) = lib.split_once('/')?;
    if let Some(owner) = ns.strip_prefix("io.github.") {
        return Some(format!("https://github.com/{}/{}.git", owner, name));
    }
    if let Some(owner) = ns.strip_prefix("io.gitlab.") {
        return Some(format!("https://gitlab.com/{}/{}.git", owner, name));
    }
    None
}

pub fn gitlibs_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cljw")
        .join("gitlibs")
}

fn fetch_git_dep(lib: &str, url: &str, rev: &str, verbose: bool) -> Result<PathBuf, Failure> {
    let target = gitlibs_dir().join(lib.replace('/', "_")).join(rev);
    if target.is_dir() {
        return Ok(target);
    }
    if verbose {
        eprintln!("Cloning {} at {}", url, rev);
    }
    debug!(lib, url, rev, "fetching git dep");
    let status = Command::new("git")
        .args(["clone", "--quiet", url])
        .arg(&target)
        .status()
        .map_err(|e| {
            Failure::Error(CljError::new(
                ErrorKind::Io,
                format!("could not run git: {}", e),
            ))
        })?;
    if !status.success() {
        return Err(Failure::Error(CljError::new(
            ErrorKind::Io,
            format!("git clone failed for {}", url),
        )));
    }
    let status = Command::new("git")
        .args(["-C"])
        .arg(&target)
        .args(["checkout", "--quiet", rev])
        .status()
        .map_err(|e| {
            Failure::Error(CljError::new(
                ErrorKind::Io,
                format!("could not run git: {}", e),
            ))
        })?;
    if !status.success() {
        return Err(Failure::Error(CljError::new(
            ErrorKind::Io,
            format!("git checkout {} failed for {}", rev, url),
        )));
    }
    Ok(target)
}

/// Resolve the effective load paths: project paths, alias extra paths,
/// then every dep's source roots. `fetch` controls whether git deps are
/// cloned when missing.
pub fn resolve_paths(
    config: &DepsConfig,
    aliases: &[String],
    fetch: bool,
    verbose: bool,
) -> Result<Vec<PathBuf>, Failure> {
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut push = |p: PathBuf| {
        if !paths.contains(&p) {
            paths.push(p);
        }
    };
    if config.paths.is_empty() {
        push(PathBuf::from("src"));
    }
    for p in &config.paths {
        push(PathBuf::from(p));
    }
    let mut deps = config.deps.clone();
    for alias in aliases {
        if let Some(a) = config.aliases.get(alias) {
            for p in &a.extra_paths {
                push(PathBuf::from(p));
            }
            deps.extend(a.extra_deps.clone());
        } else {
            warn!(alias, "unknown alias");
        }
    }
    for dep in &deps {
        let root = match &dep.coord {
            Coord::Local { root } => PathBuf::from(root),
            Coord::Git { url, rev, deps_root } => {
                if !fetch && !gitlibs_dir().join(dep.lib.replace('/', "_")).join(rev).is_dir() {
                    continue;
                }
                let mut base = fetch_git_dep(&dep.lib, url, rev, verbose)?;
                if let Some(sub) = deps_root {
                    base = base.join(sub);
                }
                base
            }
        };
        // a dep contributes its own :paths, defaulting to src/, else its
        // root
        let nested = read_config(&root, None)?;
        if nested.paths.is_empty() {
            let src = root.join("src");
            push(if src.is_dir() { src } else { root });
        } else {
            for p in &nested.paths {
                push(root.join(p));
            }
        }
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> DepsConfig {
        let mut config = DepsConfig::default();
        merge_edn(&mut config, src, "test").expect("parses");
        config
    }

    #[test]
    fn test_paths_and_main() {
        let config = parse("{:paths [\"src\" \"lib\"] :cljw/main my.app}");
        assert_eq!(config.paths, vec!["src", "lib"]);
        assert_eq!(config.main_ns.as_deref(), Some("my.app"));
    }

    #[test]
    fn test_local_and_git_deps() {
        let config = parse(
            "{:deps {thing {:local/root \"../thing\"}
                     io.github.acme/lib {:git/sha \"abc123\"}}}",
        );
        assert_eq!(config.deps.len(), 2);
        assert!(config
            .deps
            .iter()
            .any(|d| d.coord == Coord::Local { root: "../thing".into() }));
        assert!(config.deps.iter().any(|d| matches!(
            &d.coord,
            Coord::Git { url, rev, .. }
                if url == "https://github.com/acme/lib.git" && rev == "abc123"
        )));
    }

    #[test]
    fn test_mvn_rejected() {
        let mut config = DepsConfig::default();
        let err = merge_edn(
            &mut config,
            "{:deps {some/lib {:mvn/version \"1.0\"}}}",
            "test",
        )
        .unwrap_err();
        match err {
            Failure::Error(e) => assert!(e.message.contains("Maven"), "{}", e.message),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_aliases() {
        let config = parse(
            "{:aliases {:dev {:extra-paths [\"dev\"]
                              :main-opts [\"-m\" \"dev.core\"]
                              :exec-fn dev.core/run}}}",
        );
        let dev = config.aliases.get("dev").expect("alias parsed");
        assert_eq!(dev.extra_paths, vec!["dev"]);
        assert_eq!(dev.main_opts, vec!["-m", "dev.core"]);
        assert_eq!(dev.exec_fn.as_deref(), Some("dev.core/run"));
    }

    #[test]
    fn test_sdeps_merges_over_file() {
        let mut config = parse("{:paths [\"src\"]}");
        merge_edn(&mut config, "{:paths [\"extra\"]}", "-Sdeps").unwrap();
        assert_eq!(config.paths, vec!["src", "extra"]);
    }
}
