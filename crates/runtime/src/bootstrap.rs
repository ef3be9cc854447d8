//! Bootstrap: builtins, the embedded core library, and the serialized
//! environment snapshot that skips re-parsing it.
//!
//! Runtime values are not serialized directly; a parallel `CacheValue`
//! enum mirrors exactly the shapes a freshly bootstrapped environment
//! contains (data, builtins by name, compiled closures, atoms). The blob
//! is a version byte followed by bincode; any mismatch falls back to a
//! source bootstrap. Only the bytecode back end restores from cache —
//! tree-walk closures embed live AST and are cheap to rebuild.
//!
//! GC is held off during bootstrap and cache restore; the threshold then
//! rebases to twice the live estimate.

use crate::builtins;
use crate::interp::{Backend, Interp};
use crate::namespaces::sync_ns_var;
use cljw_core::chunk::{Chunk, FnProto};
use cljw_core::collections::PersistentMap;
use cljw_core::env::{Env, CORE_NS};
use cljw_core::error::{CljError, ErrorKind, Failure};
use cljw_core::symbol::{Keyword, Symbol};
use cljw_core::value::{Closure, FnKind, RegexPattern, Value};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, warn};

pub const CORE_SRC: &str = include_str!("clj/core.clj");
pub const TEST_SRC: &str = include_str!("clj/test.clj");

pub const CACHE_VERSION: u8 = 1;

const DYNAMIC_VARS: &[&str] = &[
    "*ns*",
    "*command-line-args*",
    "*file*",
    "*1",
    "*2",
    "*3",
    "*e",
];

fn register_runtime(env: &Env) {
    builtins::register_all(env);
    for name in DYNAMIC_VARS {
        let var = env.intern(CORE_NS, name);
        var.is_dynamic.set(true);
        var.set_root(Value::Nil);
    }
    sync_ns_var(env);
}

/// Full source bootstrap: register builtins, evaluate the embedded
/// libraries, land in `user`.
pub fn bootstrap(interp: &Interp) -> Result<(), Failure> {
    let env = &interp.env;
    env.heap.set_enabled(false);
    register_runtime(env);
    interp.eval_str(CORE_SRC, Some("clojure/core.clj"))?;
    interp.eval_str(TEST_SRC, Some("clojure/test.clj"))?;
    env.mark_loaded("clojure.core");
    env.mark_loaded("clojure.test");
    let user = env.ns_or_create("user");
    env.set_current_ns(user);
    sync_ns_var(env);
    env.heap.set_enabled(true);
    env.heap.rebase_threshold();
    debug!("bootstrap from source complete");
    Ok(())
}

/// Restore from cache when possible, else bootstrap from source and
/// refresh the cache file (best effort).
pub fn bootstrap_with_cache(
    interp: &Interp,
    cache_path: Option<&Path>,
    force_source: bool,
) -> Result<(), Failure> {
    if interp.backend == Backend::Vm && !force_source {
        if let Some(path) = cache_path {
            if let Ok(bytes) = std::fs::read(path) {
                match bootstrap_from_cache(interp, &bytes) {
                    Ok(true) => return Ok(()),
                    Ok(false) => debug!("bootstrap cache stale, rebuilding"),
                    Err(e) => warn!(error = %e, "bootstrap cache unreadable, rebuilding"),
                }
            }
        }
    }
    bootstrap(interp)?;
    if interp.backend == Backend::Vm {
        if let Some(path) = cache_path {
            match write_cache(&interp.env) {
                Ok(bytes) => {
                    if let Some(dir) = path.parent() {
                        let _ = std::fs::create_dir_all(dir);
                    }
                    if let Err(e) = std::fs::write(path, bytes) {
                        warn!(error = %e, "could not write bootstrap cache");
                    }
                }
                Err(e) => warn!(error = %e, "bootstrap snapshot not cacheable"),
            }
        }
    }
    Ok(())
}

// --- the serializable mirror ---------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
enum CacheValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Keyword(Option<String>, String),
    Symbol(Option<String>, String),
    List(Vec<CacheValue>),
    Vector(Vec<CacheValue>),
    Map(Vec<(CacheValue, CacheValue)>),
    Set(Vec<CacheValue>),
    Builtin(String),
    Closure(CacheClosure),
    Var(String, String),
    Regex(String),
    Atom(Box<CacheValue>),
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheClosure {
    proto: CacheProto,
    captures: Vec<CacheValue>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheProto {
    name: Option<String>,
    arity: u16,
    variadic: bool,
    local_count: u16,
    capture_slots: Vec<u16>,
    has_self_ref: bool,
    self_slot: u16,
    code: Vec<u8>,
    lines: Vec<u32>,
    constants: Vec<CacheValue>,
    extras: Vec<CacheProto>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheVar {
    name: String,
    root: Option<CacheValue>,
    meta: Option<CacheValue>,
    is_macro: bool,
    is_dynamic: bool,
    is_private: bool,
    is_const: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheNs {
    name: String,
    vars: Vec<CacheVar>,
    /// (local name, target ns, target var)
    refers: Vec<(String, String, String)>,
    aliases: Vec<(String, String)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    namespaces: Vec<CacheNs>,
    loaded: Vec<String>,
}

fn uncacheable(what: &str) -> Failure {
    Failure::Error(CljError::new(
        ErrorKind::Internal,
        format!("bootstrap snapshot cannot serialize a {}", what),
    ))
}

fn to_cache(v: &Value) -> Result<CacheValue, Failure> {
    Ok(match v {
        Value::Nil => CacheValue::Nil,
        Value::Bool(b) => CacheValue::Bool(*b),
        Value::Int(i) => CacheValue::Int(*i),
        Value::Float(f) => CacheValue::Float(*f),
        Value::Char(c) => CacheValue::Char(*c),
        Value::Str(s) => CacheValue::Str(s.to_string()),
        Value::Keyword(k) => {
            CacheValue::Keyword(k.ns().map(str::to_string), k.name().to_string())
        }
        Value::Symbol(s) => CacheValue::Symbol(
            s.ns.as_deref().map(str::to_string),
            s.name.to_string(),
        ),
        Value::List(l) => {
            CacheValue::List(l.iter().map(to_cache).collect::<Result<_, _>>()?)
        }
        Value::Vector(vec) => {
            CacheValue::Vector(vec.iter().map(to_cache).collect::<Result<_, _>>()?)
        }
        Value::Map(m) => CacheValue::Map(
            m.iter()
                .map(|(k, val)| Ok((to_cache(k)?, to_cache(val)?)))
                .collect::<Result<_, Failure>>()?,
        ),
        Value::Set(s) => {
            CacheValue::Set(s.iter().map(to_cache).collect::<Result<_, _>>()?)
        }
        Value::Builtin(b) => CacheValue::Builtin(b.name.to_string()),
        Value::Fn(closure) => match &closure.fun {
            FnKind::Bytecode(proto) => CacheValue::Closure(CacheClosure {
                proto: proto_to_cache(proto)?,
                captures: closure
                    .captures
                    .iter()
                    .map(to_cache)
                    .collect::<Result<_, _>>()?,
            }),
            FnKind::Tree(_) => return Err(uncacheable("tree-walk closure")),
        },
        Value::Var(var) => {
            CacheValue::Var(var.ns_name.to_string(), var.name.to_string())
        }
        Value::Regex(p) => CacheValue::Regex(p.source.clone()),
        Value::Atom(cell) => CacheValue::Atom(Box::new(to_cache(&cell.value.borrow())?)),
        other => return Err(uncacheable(other.type_tag())),
    })
}

fn proto_to_cache(proto: &FnProto) -> Result<CacheProto, Failure> {
    Ok(CacheProto {
        name: proto.name.as_deref().map(str::to_string),
        arity: proto.arity,
        variadic: proto.variadic,
        local_count: proto.local_count,
        capture_slots: proto.capture_slots.clone(),
        has_self_ref: proto.has_self_ref,
        self_slot: proto.self_slot,
        code: proto.chunk.code.clone(),
        lines: proto.chunk.lines.clone(),
        constants: proto
            .chunk
            .constants
            .iter()
            .map(to_cache)
            .collect::<Result<_, _>>()?,
        extras: proto
            .extra_arities
            .iter()
            .map(|p| proto_to_cache(p))
            .collect::<Result<_, _>>()?,
    })
}

fn from_cache(env: &Env, cv: &CacheValue) -> Result<Value, Failure> {
    Ok(match cv {
        CacheValue::Nil => Value::Nil,
        CacheValue::Bool(b) => Value::Bool(*b),
        CacheValue::Int(i) => Value::Int(*i),
        CacheValue::Float(f) => Value::Float(*f),
        CacheValue::Char(c) => Value::Char(*c),
        CacheValue::Str(s) => Value::string(s.clone()),
        CacheValue::Keyword(ns, name) => {
            Value::Keyword(Keyword::intern(ns.as_deref(), name))
        }
        CacheValue::Symbol(ns, name) => Value::Symbol(Rc::new(match ns {
            Some(ns) => Symbol::qualified(ns, name),
            None => Symbol::simple(name),
        })),
        CacheValue::List(items) => Value::List(
            cljw_core::collections::PersistentList::from_vec(
                items
                    .iter()
                    .map(|i| from_cache(env, i))
                    .collect::<Result<_, _>>()?,
            ),
        ),
        CacheValue::Vector(items) => Value::vector(
            items
                .iter()
                .map(|i| from_cache(env, i))
                .collect::<Result<_, _>>()?,
        ),
        CacheValue::Map(pairs) => Value::Map(PersistentMap::from_pairs(
            pairs
                .iter()
                .map(|(k, v)| Ok((from_cache(env, k)?, from_cache(env, v)?)))
                .collect::<Result<_, Failure>>()?,
        )),
        CacheValue::Set(items) => Value::Set(
            cljw_core::collections::PersistentSet::from_vec(
                items
                    .iter()
                    .map(|i| from_cache(env, i))
                    .collect::<Result<_, _>>()?,
            ),
        ),
        CacheValue::Builtin(name) => Value::Builtin(builtins::by_name(name).ok_or_else(|| {
            Failure::Error(CljError::new(
                ErrorKind::Internal,
                format!("cached builtin {} no longer exists", name),
            ))
        })?),
        CacheValue::Closure(c) => Value::Fn(Rc::new(Closure {
            fun: FnKind::Bytecode(proto_from_cache(env, &c.proto)?),
            captures: c
                .captures
                .iter()
                .map(|v| from_cache(env, v))
                .collect::<Result<_, _>>()?,
            meta: None,
        })),
        CacheValue::Var(ns, name) => Value::Var(env.intern(ns, name)),
        CacheValue::Regex(source) => {
            let regex = regex::Regex::new(source).map_err(|e| {
                Failure::Error(CljError::new(
                    ErrorKind::Internal,
                    format!("cached regex no longer compiles: {}", e),
                ))
            })?;
            Value::Regex(Rc::new(RegexPattern {
                source: source.clone(),
                regex,
            }))
        }
        CacheValue::Atom(content) => env.heap.alloc_atom(from_cache(env, content)?, None),
    })
}

fn proto_from_cache(env: &Env, cp: &CacheProto) -> Result<Rc<FnProto>, Failure> {
    Ok(Rc::new(FnProto {
        name: cp.name.as_deref().map(Rc::from),
        arity: cp.arity,
        variadic: cp.variadic,
        local_count: cp.local_count,
        capture_slots: cp.capture_slots.clone(),
        has_self_ref: cp.has_self_ref,
        self_slot: cp.self_slot,
        chunk: Chunk {
            code: cp.code.clone(),
            lines: cp.lines.clone(),
            constants: cp
                .constants
                .iter()
                .map(|c| from_cache(env, c))
                .collect::<Result<_, _>>()?,
        },
        extra_arities: cp
            .extras
            .iter()
            .map(|p| proto_from_cache(env, p))
            .collect::<Result<_, _>>()?,
        pos: None,
    }))
}

/// Serialize every namespace's vars, refers and aliases.
pub fn write_cache(env: &Env) -> Result<Vec<u8>, Failure> {
    let mut namespaces = Vec::new();
    for ns in env.all_ns() {
        let mut vars = Vec::new();
        for (name, var) in ns.vars() {
            vars.push(CacheVar {
                name: name.to_string(),
                root: var.root_value().as_ref().map(to_cache).transpose()?,
                meta: var
                    .meta
                    .borrow()
                    .clone()
                    .map(|m| to_cache(&Value::Map(m)))
                    .transpose()?,
                is_macro: var.is_macro.get(),
                is_dynamic: var.is_dynamic.get(),
                is_private: var.is_private.get(),
                is_const: var.is_const.get(),
            });
        }
        namespaces.push(CacheNs {
            name: ns.name.to_string(),
            vars,
            refers: ns
                .refers_snapshot()
                .into_iter()
                .map(|(name, var)| {
                    (
                        name.to_string(),
                        var.ns_name.to_string(),
                        var.name.to_string(),
                    )
                })
                .collect(),
            aliases: ns
                .aliases_snapshot()
                .into_iter()
                .map(|(a, t)| (a.to_string(), t.to_string()))
                .collect(),
        });
    }
    let file = CacheFile {
        namespaces,
        loaded: vec!["clojure.core".to_string(), "clojure.test".to_string()],
    };
    let mut bytes = vec![CACHE_VERSION];
    let blob = bincode::serialize(&file).map_err(|e| {
        Failure::Error(CljError::new(
            ErrorKind::Internal,
            format!("bootstrap snapshot serialization failed: {}", e),
        ))
    })?;
    bytes.extend_from_slice(&blob);
    Ok(bytes)
}

// --- precompiled bytecode modules ("CLJC") -------------------------------

pub const MODULE_MAGIC: &[u8; 4] = b"CLJC";
pub const MODULE_VERSION: u8 = 1;

/// Compile a source text into a bytecode module: magic, version byte,
/// then the serialized top-level protos in evaluation order. Each form is
/// also evaluated while compiling, so macros defined earlier in the text
/// expand for later forms.
pub fn write_module(interp: &Interp, src: &str, file: &str) -> Result<Vec<u8>, Failure> {
    use cljw_compiler::{Analyzer, Emitter, Reader};
    let env = &interp.env;
    let file_rc: Rc<str> = Rc::from(file);
    let mut reader = Reader::new(src, env, Some(file_rc.clone()));
    let mut protos = Vec::new();
    while let Some(form) = reader.read_next().map_err(Failure::Error)? {
        let analyzed = Analyzer::new(env, Some(file_rc.clone())).analyze_top(&form)?;
        let proto = Emitter::new(env).compile_top(&analyzed.node, "module-top")?;
        interp.run_proto(proto.clone())?;
        protos.push(proto_to_cache(&proto)?);
    }
    let mut bytes = MODULE_MAGIC.to_vec();
    bytes.push(MODULE_VERSION);
    let blob = bincode::serialize(&protos).map_err(|e| {
        Failure::Error(CljError::new(
            ErrorKind::Internal,
            format!("module serialization failed: {}", e),
        ))
    })?;
    bytes.extend_from_slice(&blob);
    Ok(bytes)
}

/// Execute a bytecode module produced by `write_module`.
pub fn run_module(interp: &Interp, bytes: &[u8]) -> cljw_core::error::EvalResult {
    if bytes.len() < 5 || &bytes[..4] != MODULE_MAGIC {
        return Err(Failure::Error(CljError::new(
            ErrorKind::Io,
            "not a cljw bytecode module",
        )));
    }
    if bytes[4] != MODULE_VERSION {
        return Err(Failure::Error(CljError::new(
            ErrorKind::Io,
            "bytecode module was produced by a different cljw; recompile it",
        )));
    }
    let protos: Vec<CacheProto> = bincode::deserialize(&bytes[5..]).map_err(|e| {
        Failure::Error(CljError::new(
            ErrorKind::Io,
            format!("corrupt bytecode module: {}", e),
        ))
    })?;
    let mut last = Value::Nil;
    for proto in &protos {
        let proto = proto_from_cache(&interp.env, proto)?;
        last = interp.run_proto(proto)?;
        interp.safe_point(std::slice::from_ref(&last));
    }
    Ok(last)
}

/// Restore the environment from a snapshot. `Ok(false)` means the blob is
/// from another version and the caller should bootstrap from source.
pub fn bootstrap_from_cache(interp: &Interp, bytes: &[u8]) -> Result<bool, Failure> {
    if bytes.first() != Some(&CACHE_VERSION) {
        return Ok(false);
    }
    let file: CacheFile = match bincode::deserialize(&bytes[1..]) {
        Ok(file) => file,
        Err(_) => return Ok(false),
    };
    let env = &interp.env;
    env.heap.set_enabled(false);
    register_runtime(env);
    for ns in &file.namespaces {
        let namespace = env.ns_or_create(&ns.name);
        for var in &ns.vars {
            let interned = namespace.intern(&var.name);
            interned.is_macro.set(var.is_macro);
            interned.is_dynamic.set(var.is_dynamic);
            interned.is_private.set(var.is_private);
            interned.is_const.set(var.is_const);
            if let Some(meta) = &var.meta {
                if let Value::Map(m) = from_cache(env, meta)? {
                    *interned.meta.borrow_mut() = Some(m);
                }
            }
            if let Some(root) = &var.root {
                interned.set_root(from_cache(env, root)?);
            }
        }
    }
    for ns in &file.namespaces {
        let namespace = env.ns_or_create(&ns.name);
        for (name, target_ns, target_var) in &ns.refers {
            namespace.refer(Rc::from(name.as_str()), env.intern(target_ns, target_var));
        }
        for (alias, target) in &ns.aliases {
            namespace.add_alias(Rc::from(alias.as_str()), Rc::from(target.as_str()));
        }
    }
    for lib in &file.loaded {
        env.mark_loaded(lib);
    }
    let user = env.ns_or_create("user");
    env.set_current_ns(user);
    sync_ns_var(env);
    env.heap.set_enabled(true);
    env.heap.rebase_threshold();
    debug!("bootstrap restored from cache");
    Ok(true)
}
