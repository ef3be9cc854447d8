//! Namespace loading: `require`, `load-file` and the load-path search.
//!
//! A lib loads by reading, analyzing and evaluating each top-level form
//! of `<ns-as-path>.clj` found on the registered load paths; the loaded
//! file is expected to enter its own namespace (`ns`/`in-ns`). The
//! process-wide loaded-libs set prevents reloading unless `:reload` is
//! passed. Aliases and refers apply to the caller's namespace afterward.

use crate::seqs;
use cljw_core::env::Env;
use cljw_core::error::{error, CljError, ErrorKind, EvalResult, Failure};
use cljw_core::symbol::Symbol;
use cljw_core::value::Value;
use cljw_compiler::Reader;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

/// Evaluate every form of a file in order, returning the last result.
pub fn load_path(env: &Env, path: &Path) -> EvalResult {
    let src = std::fs::read_to_string(path).map_err(|e| {
        Failure::Error(CljError::new(
            ErrorKind::Io,
            format!("could not load {}: {}", path.display(), e),
        ))
    })?;
    load_source(env, &src, &path.to_string_lossy())
}

pub fn load_source(env: &Env, src: &str, file: &str) -> EvalResult {
    let file: Rc<str> = Rc::from(file);
    let mut reader = Reader::new(src, env, Some(file));
    let mut last = Value::Nil;
    while let Some(form) = reader.read_next().map_err(Failure::Error)? {
        last = env.eval_form_via_bridge(&form)?;
        env.maybe_collect(std::slice::from_ref(&last));
    }
    Ok(last)
}

/// `foo.bar-baz` → `foo/bar_baz.clj`
fn ns_to_relpath(ns_name: &str) -> PathBuf {
    let mut path = PathBuf::new();
    for part in ns_name.split('.') {
        path.push(part.replace('-', "_"));
    }
    path.set_extension("clj");
    path
}

fn find_lib(env: &Env, ns_name: &str) -> Option<PathBuf> {
    let rel = ns_to_relpath(ns_name);
    let mut candidates = env.load_paths();
    candidates.push(PathBuf::from("."));
    for base in candidates {
        let full = base.join(&rel);
        if full.is_file() {
            return Some(full);
        }
    }
    None
}

pub fn require(env: &Env, args: &[Value]) -> EvalResult {
    let reload = args
        .iter()
        .any(|a| matches!(a, Value::Keyword(k) if k.name() == "reload"));
    for arg in args {
        match arg {
            Value::Symbol(sym) => require_one(env, sym, None, None, reload)?,
            Value::Vector(spec) => {
                let parts: Vec<Value> = spec.iter().cloned().collect();
                let Some(Value::Symbol(lib)) = parts.first() else {
                    return error(ErrorKind::Type, "require spec must start with a lib symbol");
                };
                let mut alias = None;
                let mut refer = None;
                let mut i = 1;
                while i < parts.len() {
                    match parts.get(i) {
                        Some(Value::Keyword(k)) if k.name() == "as" => {
                            match parts.get(i + 1) {
                                Some(Value::Symbol(a)) => alias = Some(a.name.clone()),
                                _ => return error(ErrorKind::Type, ":as expects a symbol"),
                            }
                            i += 2;
                        }
                        Some(Value::Keyword(k)) if k.name() == "refer" => {
                            refer = Some(parts.get(i + 1).cloned().unwrap_or(Value::Nil));
                            i += 2;
                        }
                        Some(_) => {
                            return error(ErrorKind::Type, "unsupported require option");
                        }
                        None => break,
                    }
                }
                require_one(env, lib, alias, refer, reload)?;
            }
            Value::Keyword(_) => {}
            other => {
                return error(
                    ErrorKind::Type,
                    format!("require expects symbols or vectors, got {}", other.type_tag()),
                );
            }
        }
    }
    Ok(Value::Nil)
}

fn require_one(
    env: &Env,
    lib: &Symbol,
    alias: Option<Rc<str>>,
    refer: Option<Value>,
    reload: bool,
) -> Result<(), Failure> {
    let caller_ns = env.current_ns();
    let lib_name = lib.name.to_string();
    if reload || !env.is_loaded(&lib_name) {
        let path = find_lib(env, &lib_name).ok_or_else(|| {
            Failure::Error(CljError::new(
                ErrorKind::Io,
                format!("could not locate {} on the load path", ns_to_relpath(&lib_name).display()),
            ))
        })?;
        debug!(lib = %lib_name, path = %path.display(), "loading namespace");
        let result = load_path(env, &path);
        env.set_current_ns(caller_ns.clone());
        sync_ns_var(env);
        result?;
        env.mark_loaded(&lib_name);
    }
    let target = env.find_ns(&lib_name).ok_or_else(|| {
        Failure::Error(CljError::new(
            ErrorKind::Name,
            format!("loading {} did not create that namespace", lib_name),
        ))
    })?;
    if let Some(alias) = alias {
        caller_ns.add_alias(alias, target.name.clone());
    }
    match refer {
        None => {}
        Some(Value::Keyword(k)) if k.name() == "all" => {
            for (name, var) in target.publics() {
                caller_ns.refer(name, var);
            }
        }
        Some(Value::Vector(syms)) => {
            for s in syms.iter() {
                let Value::Symbol(s) = s else {
                    return Err(Failure::Error(CljError::new(
                        ErrorKind::Type,
                        ":refer expects symbols",
                    )));
                };
                let var = target.mapping(&s.name).ok_or_else(|| {
                    Failure::Error(CljError::new(
                        ErrorKind::Name,
                        format!("{}/{} does not exist", lib_name, s.name),
                    ))
                })?;
                caller_ns.refer(s.name.clone(), var);
            }
        }
        Some(other) => {
            let items = seqs::to_vec(env, &other)?;
            for item in items {
                let Value::Symbol(s) = item else {
                    return Err(Failure::Error(CljError::new(
                        ErrorKind::Type,
                        ":refer expects symbols",
                    )));
                };
                let var = target.mapping(&s.name).ok_or_else(|| {
                    Failure::Error(CljError::new(
                        ErrorKind::Name,
                        format!("{}/{} does not exist", lib_name, s.name),
                    ))
                })?;
                caller_ns.refer(s.name.clone(), var);
            }
        }
    }
    Ok(())
}

/// Keep the `*ns*` var in step with the environment's current namespace.
pub fn sync_ns_var(env: &Env) {
    if let Some(var) = env.core_ns().mapping("*ns*") {
        var.set_root(Value::symbol(Symbol::simple(&env.current_ns().name)));
    }
}
