//! Namespaces, Vars and the runtime environment.
//!
//! Resolution order for an unqualified symbol: lexical locals (handled by
//! the analyzer), then the current namespace's own mappings, then its
//! refers, then the public vars of `clojure.core`, then an error.
//! Qualified symbols go through the alias table first, then the namespace
//! registry.
//!
//! The environment also carries the single crossing point between
//! evaluation back ends: a `CallBridge` trait object installed once at
//! bootstrap. Builtins that need to invoke a fn value (swap!, seq
//! realization, multimethod dispatch) route through `Env::call_fn`.

use crate::collections::{Key, PersistentMap};
use crate::error::{CljError, ErrorKind, EvalResult};
use crate::gc::Heap;
use crate::symbol::Symbol;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::{Rc, Weak};

pub const CORE_NS: &str = "clojure.core";

/// A named mutable cell inside a namespace: root binding, an explicit
/// dynamic-binding stack (evaluation is single-threaded, so no TLS), and
/// metadata plus the def flags.
#[derive(Debug)]
pub struct Var {
    pub ns_name: Rc<str>,
    pub name: Rc<str>,
    root: RefCell<Value>,
    bound: Cell<bool>,
    dynamic_stack: RefCell<Vec<Value>>,
    pub meta: RefCell<Option<PersistentMap>>,
    pub is_macro: Cell<bool>,
    pub is_dynamic: Cell<bool>,
    pub is_private: Cell<bool>,
    pub is_const: Cell<bool>,
}

impl Var {
    fn new(ns_name: Rc<str>, name: Rc<str>) -> Self {
        Var {
            ns_name,
            name,
            root: RefCell::new(Value::Nil),
            bound: Cell::new(false),
            dynamic_stack: RefCell::new(Vec::new()),
            meta: RefCell::new(None),
            is_macro: Cell::new(false),
            is_dynamic: Cell::new(false),
            is_private: Cell::new(false),
            is_const: Cell::new(false),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.ns_name, self.name)
    }

    pub fn is_bound(&self) -> bool {
        self.bound.get() || !self.dynamic_stack.borrow().is_empty()
    }

    /// Innermost dynamic binding wins; otherwise the root.
    pub fn deref(&self) -> Result<Value, CljError> {
        if let Some(v) = self.dynamic_stack.borrow().last() {
            return Ok(v.clone());
        }
        if !self.bound.get() {
            return Err(CljError::new(
                ErrorKind::Name,
                format!("Unbound var: #'{}", self.qualified_name()),
            ));
        }
        Ok(self.root.borrow().clone())
    }

    pub fn root_value(&self) -> Option<Value> {
        if self.bound.get() {
            Some(self.root.borrow().clone())
        } else {
            None
        }
    }

    pub fn set_root(&self, v: Value) {
        *self.root.borrow_mut() = v;
        self.bound.set(true);
    }

    pub fn push_binding(&self, v: Value) -> Result<(), CljError> {
        if !self.is_dynamic.get() {
            return Err(CljError::new(
                ErrorKind::Value,
                format!("Can't dynamically bind non-dynamic var: {}", self.qualified_name()),
            ));
        }
        self.dynamic_stack.borrow_mut().push(v);
        Ok(())
    }

    pub fn pop_binding(&self) {
        self.dynamic_stack.borrow_mut().pop();
    }

    /// `set!` replaces the innermost dynamic binding.
    pub fn set_binding(&self, v: Value) -> Result<(), CljError> {
        let mut stack = self.dynamic_stack.borrow_mut();
        match stack.last_mut() {
            Some(slot) => {
                *slot = v;
                Ok(())
            }
            None => Err(CljError::new(
                ErrorKind::Value,
                format!(
                    "Can't change/establish root binding of: {} with set!",
                    self.qualified_name()
                ),
            )),
        }
    }

    pub fn dynamic_bindings(&self) -> Vec<Value> {
        self.dynamic_stack.borrow().clone()
    }
}

/// A named scope: interned vars, referred vars, and namespace aliases.
#[derive(Debug)]
pub struct Namespace {
    pub name: Rc<str>,
    mappings: RefCell<IndexMap<Rc<str>, Rc<Var>>>,
    refers: RefCell<IndexMap<Rc<str>, Rc<Var>>>,
    aliases: RefCell<IndexMap<Rc<str>, Rc<str>>>,
}

impl Namespace {
    pub fn new(name: Rc<str>) -> Self {
        Namespace {
            name,
            mappings: RefCell::new(IndexMap::new()),
            refers: RefCell::new(IndexMap::new()),
            aliases: RefCell::new(IndexMap::new()),
        }
    }

    /// Get or create the var named `name` in this namespace.
    pub fn intern(&self, name: &str) -> Rc<Var> {
        if let Some(var) = self.mappings.borrow().get(name) {
            return var.clone();
        }
        let var = Rc::new(Var::new(self.name.clone(), name.into()));
        self.mappings.borrow_mut().insert(var.name.clone(), var.clone());
        var
    }

    pub fn mapping(&self, name: &str) -> Option<Rc<Var>> {
        self.mappings.borrow().get(name).cloned()
    }

    /// Mappings first, then refers.
    pub fn lookup(&self, name: &str) -> Option<Rc<Var>> {
        if let Some(var) = self.mappings.borrow().get(name) {
            return Some(var.clone());
        }
        self.refers.borrow().get(name).cloned()
    }

    pub fn refer(&self, name: Rc<str>, var: Rc<Var>) {
        self.refers.borrow_mut().insert(name, var);
    }

    pub fn add_alias(&self, alias: Rc<str>, target: Rc<str>) {
        self.aliases.borrow_mut().insert(alias, target);
    }

    pub fn resolve_alias(&self, alias: &str) -> Option<Rc<str>> {
        self.aliases.borrow().get(alias).cloned()
    }

    pub fn vars(&self) -> Vec<(Rc<str>, Rc<Var>)> {
        self.mappings
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn refers_snapshot(&self) -> Vec<(Rc<str>, Rc<Var>)> {
        self.refers
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn aliases_snapshot(&self) -> Vec<(Rc<str>, Rc<str>)> {
        self.aliases
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn publics(&self) -> Vec<(Rc<str>, Rc<Var>)> {
        self.mappings
            .borrow()
            .iter()
            .filter(|(_, v)| !v.is_private.get())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// The single crossing point between evaluation back ends. Implemented by
/// the interpreter and installed on the Env at bootstrap; see `call_fn`.
pub trait CallBridge {
    fn call(&self, env: &Env, callee: &Value, args: &[Value]) -> EvalResult;
    /// Analyze and evaluate one form on the active back end, for `eval`,
    /// `load-file` and `require`.
    fn eval_form(&self, env: &Env, form: &Value) -> EvalResult;
    /// Fully realize a seqable value into its elements. The analyzer
    /// needs this for macros that return cons chains or lazy seqs.
    fn realize_seq(&self, env: &Env, v: &Value) -> Result<Vec<Value>, crate::error::Failure>;
}

pub struct Env {
    namespaces: RefCell<IndexMap<Rc<str>, Rc<Namespace>>>,
    current: RefCell<Rc<Namespace>>,
    bridge: RefCell<Option<Weak<dyn CallBridge>>>,
    pub heap: Heap,
    loaded_libs: RefCell<IndexSet<String>>,
    load_paths: RefCell<Vec<PathBuf>>,
    /// `derive` hierarchy: child value -> direct parents.
    parents: RefCell<IndexMap<Key, Vec<Value>>>,
    gensym_counter: Cell<u64>,
}

impl Env {
    pub fn new() -> Rc<Env> {
        let core = Rc::new(Namespace::new(CORE_NS.into()));
        let user = Rc::new(Namespace::new("user".into()));
        let mut namespaces = IndexMap::new();
        namespaces.insert(core.name.clone(), core.clone());
        namespaces.insert(user.name.clone(), user.clone());
        Rc::new(Env {
            namespaces: RefCell::new(namespaces),
            current: RefCell::new(core),
            bridge: RefCell::new(None),
            heap: Heap::new(),
            loaded_libs: RefCell::new(IndexSet::new()),
            load_paths: RefCell::new(Vec::new()),
            parents: RefCell::new(IndexMap::new()),
            gensym_counter: Cell::new(0),
        })
    }

    pub fn find_ns(&self, name: &str) -> Option<Rc<Namespace>> {
        self.namespaces.borrow().get(name).cloned()
    }

    pub fn ns_or_create(&self, name: &str) -> Rc<Namespace> {
        if let Some(ns) = self.find_ns(name) {
            return ns;
        }
        let ns = Rc::new(Namespace::new(name.into()));
        self.namespaces
            .borrow_mut()
            .insert(ns.name.clone(), ns.clone());
        ns
    }

    pub fn all_ns(&self) -> Vec<Rc<Namespace>> {
        self.namespaces.borrow().values().cloned().collect()
    }

    pub fn current_ns(&self) -> Rc<Namespace> {
        self.current.borrow().clone()
    }

    pub fn set_current_ns(&self, ns: Rc<Namespace>) {
        *self.current.borrow_mut() = ns;
    }

    pub fn core_ns(&self) -> Rc<Namespace> {
        self.find_ns(CORE_NS).expect("clojure.core exists from construction")
    }

    pub fn intern(&self, ns_name: &str, name: &str) -> Rc<Var> {
        self.ns_or_create(ns_name).intern(name)
    }

    /// Resolve a symbol to a var per the documented order. Lexical locals
    /// were already consulted by the analyzer.
    pub fn resolve(&self, sym: &Symbol) -> Result<Rc<Var>, CljError> {
        let current = self.current_ns();
        match &sym.ns {
            Some(ns_part) => {
                let target = match current.resolve_alias(ns_part) {
                    Some(real) => real,
                    None => ns_part.clone(),
                };
                let ns = self.find_ns(&target).ok_or_else(|| {
                    CljError::new(ErrorKind::Name, format!("No such namespace: {}", ns_part))
                })?;
                let var = ns.mapping(&sym.name).ok_or_else(|| {
                    CljError::new(
                        ErrorKind::Name,
                        format!("No such var: {}/{}", target, sym.name),
                    )
                })?;
                if var.is_private.get() && !Rc::ptr_eq(&ns, &current) {
                    return Err(CljError::new(
                        ErrorKind::Name,
                        format!("var: {}/{} is not public", target, sym.name),
                    ));
                }
                Ok(var)
            }
            None => {
                if let Some(var) = current.lookup(&sym.name) {
                    return Ok(var);
                }
                // every namespace sees clojure.core's public vars
                if let Some(var) = self.core_ns().mapping(&sym.name) {
                    if !var.is_private.get() {
                        return Ok(var);
                    }
                }
                Err(CljError::new(
                    ErrorKind::Name,
                    format!("Unable to resolve symbol: {} in this context", sym.name),
                ))
            }
        }
    }

    pub fn set_bridge(&self, bridge: Weak<dyn CallBridge>) {
        *self.bridge.borrow_mut() = Some(bridge);
    }

    /// callFnVal: the only way any component invokes a callable Value.
    pub fn call_fn(&self, callee: &Value, args: &[Value]) -> EvalResult {
        let bridge = self
            .bridge
            .borrow()
            .as_ref()
            .and_then(|w| w.upgrade())
            .ok_or_else(|| CljError::new(ErrorKind::Internal, "call bridge not installed"))?;
        bridge.call(self, callee, args)
    }

    /// Realize a seqable value through the installed bridge.
    pub fn realize_seq_via_bridge(
        &self,
        v: &Value,
    ) -> Result<Vec<Value>, crate::error::Failure> {
        let bridge = self
            .bridge
            .borrow()
            .as_ref()
            .and_then(|w| w.upgrade())
            .ok_or_else(|| CljError::new(ErrorKind::Internal, "call bridge not installed"))?;
        bridge.realize_seq(self, v)
    }

    /// Evaluate a form through the installed bridge.
    pub fn eval_form_via_bridge(&self, form: &Value) -> EvalResult {
        let bridge = self
            .bridge
            .borrow()
            .as_ref()
            .and_then(|w| w.upgrade())
            .ok_or_else(|| CljError::new(ErrorKind::Internal, "call bridge not installed"))?;
        bridge.eval_form(self, form)
    }

    pub fn next_gensym(&self) -> u64 {
        let n = self.gensym_counter.get() + 1;
        self.gensym_counter.set(n);
        n
    }

    pub fn add_parent(&self, child: Value, parent: Value) {
        self.parents
            .borrow_mut()
            .entry(Key(child))
            .or_default()
            .push(parent);
    }

    /// `isa?`: equality or membership in the transitive parent set.
    pub fn is_a(&self, child: &Value, parent: &Value) -> bool {
        if crate::value::eql(child, parent) {
            return true;
        }
        let parents = self.parents.borrow();
        let mut work = vec![child.clone()];
        let mut seen: Vec<Value> = Vec::new();
        while let Some(v) = work.pop() {
            if let Some(direct) = parents.get(&Key(v.clone())) {
                for p in direct {
                    if crate::value::eql(p, parent) {
                        return true;
                    }
                    if !seen.iter().any(|s| crate::value::eql(s, p)) {
                        seen.push(p.clone());
                        work.push(p.clone());
                    }
                }
            }
        }
        false
    }

    pub fn is_loaded(&self, lib: &str) -> bool {
        self.loaded_libs.borrow().contains(lib)
    }

    pub fn mark_loaded(&self, lib: &str) {
        self.loaded_libs.borrow_mut().insert(lib.to_string());
    }

    pub fn forget_loaded(&self, lib: &str) {
        self.loaded_libs.borrow_mut().shift_remove(lib);
    }

    pub fn add_load_path(&self, path: PathBuf) {
        let mut paths = self.load_paths.borrow_mut();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    pub fn load_paths(&self) -> Vec<PathBuf> {
        self.load_paths.borrow().clone()
    }

    /// Everything the collector marks from: var roots and dynamic
    /// bindings across all namespaces, plus the hierarchy table.
    pub fn gc_roots(&self) -> Vec<Value> {
        let mut roots = Vec::new();
        for ns in self.all_ns() {
            for (_, var) in ns.vars() {
                if let Some(v) = var.root_value() {
                    roots.push(v);
                }
                roots.extend(var.dynamic_bindings());
                if let Some(meta) = var.meta.borrow().clone() {
                    roots.push(Value::Map(meta));
                }
            }
        }
        for (k, ps) in self.parents.borrow().iter() {
            roots.push(k.0.clone());
            roots.extend(ps.iter().cloned());
        }
        roots
    }

    /// Safe point: collect when the allocation debt crosses the threshold.
    pub fn maybe_collect(&self, pinned: &[Value]) {
        if self.heap.should_collect() {
            let mut roots = self.gc_roots();
            roots.extend_from_slice(pinned);
            self.heap.collect(&roots);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_and_resolve() {
        let env = Env::new();
        let var = env.intern("clojure.core", "answer");
        var.set_root(Value::Int(42));
        let resolved = env.resolve(&Symbol::simple("answer")).unwrap();
        assert!(Rc::ptr_eq(&var, &resolved));
        assert_eq!(resolved.deref().unwrap(), Value::Int(42));
    }

    #[test]
    fn test_unqualified_falls_back_to_core() {
        let env = Env::new();
        env.intern("clojure.core", "inc").set_root(Value::Int(0));
        env.set_current_ns(env.find_ns("user").unwrap());
        assert!(env.resolve(&Symbol::simple("inc")).is_ok());
    }

    #[test]
    fn test_qualified_via_alias() {
        let env = Env::new();
        let other = env.ns_or_create("my.lib");
        other.intern("go").set_root(Value::Int(1));
        env.set_current_ns(env.find_ns("user").unwrap());
        env.current_ns().add_alias("lib".into(), "my.lib".into());
        let var = env.resolve(&Symbol::parse("lib/go")).unwrap();
        assert_eq!(&*var.ns_name, "my.lib");
    }

    #[test]
    fn test_private_var_not_visible_qualified() {
        let env = Env::new();
        let ns = env.ns_or_create("secret.ns");
        let var = ns.intern("hidden");
        var.set_root(Value::Int(1));
        var.is_private.set(true);
        env.set_current_ns(env.find_ns("user").unwrap());
        assert!(env.resolve(&Symbol::parse("secret.ns/hidden")).is_err());
    }

    #[test]
    fn test_dynamic_binding_stack() {
        let env = Env::new();
        let var = env.intern("clojure.core", "*depth*");
        var.is_dynamic.set(true);
        var.set_root(Value::Int(0));
        var.push_binding(Value::Int(1)).unwrap();
        assert_eq!(var.deref().unwrap(), Value::Int(1));
        var.pop_binding();
        assert_eq!(var.deref().unwrap(), Value::Int(0));
    }

    #[test]
    fn test_set_bang_requires_dynamic_frame() {
        let env = Env::new();
        let var = env.intern("clojure.core", "*flag*");
        var.is_dynamic.set(true);
        var.set_root(Value::Bool(false));
        assert!(var.set_binding(Value::Bool(true)).is_err());
        var.push_binding(Value::Bool(false)).unwrap();
        var.set_binding(Value::Bool(true)).unwrap();
        assert_eq!(var.deref().unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_isa_hierarchy() {
        let env = Env::new();
        env.add_parent(Value::keyword("circle"), Value::keyword("shape"));
        env.add_parent(Value::keyword("shape"), Value::keyword("thing"));
        assert!(env.is_a(&Value::keyword("circle"), &Value::keyword("thing")));
        assert!(!env.is_a(&Value::keyword("thing"), &Value::keyword("circle")));
    }
}
