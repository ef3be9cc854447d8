//! The interpreter: both back ends behind one callFnVal.
//!
//! `Interp` owns the environment and implements the core `CallBridge`, so
//! every component that holds an `Env` can invoke callables without
//! knowing which back end produced them. Re-entrant compiled calls run on
//! pooled VM instances; tree-walk scratch state (the pending-recur
//! buffer) is saved and restored around every cross-call so a recur in
//! the callee can never leak into the caller's loop.
//!
//! Safe points sit between top-level forms: the pinned set carries any
//! value the host still holds while the collector runs.

use crate::seqs;
use crate::treewalk;
use crate::vm::Vm;
use cljw_core::collections::Key;
use cljw_core::env::{CallBridge, Env};
use cljw_core::error::{error, CljError, ErrorKind, EvalResult, Failure, TraceFrame};
use cljw_core::printer::pr_str;
use cljw_core::value::{BuiltinDef, FnKind, MultiFnCell, ProtocolFnRef, Value};
use cljw_compiler::{Analyzer, Emitter, Reader};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Bytecode compiler + VM (the default).
    Vm,
    /// Direct Node interpretation (`--tree-walk`).
    Tree,
}

/// Hard ceiling on nested cross-backend calls; each one costs native
/// stack, so this is the interpreter's StackOverflow guard.
pub const MAX_CALL_DEPTH: u32 = 2_000;

const VM_POOL_MAX: usize = 8;

pub struct Interp {
    pub env: Rc<Env>,
    pub backend: Backend,
    vms: RefCell<Vec<Vm>>,
    call_depth: Cell<u32>,
    recur_args: RefCell<Option<Vec<Value>>>,
    trace: RefCell<Vec<TraceFrame>>,
}

impl Interp {
    pub fn new(backend: Backend) -> Rc<Interp> {
        let env = Env::new();
        let interp = Rc::new(Interp {
            env,
            backend,
            vms: RefCell::new(Vec::new()),
            call_depth: Cell::new(0),
            recur_args: RefCell::new(None),
            trace: RefCell::new(Vec::new()),
        });
        let bridge: Rc<dyn CallBridge> = interp.clone();
        interp.env.set_bridge(Rc::downgrade(&bridge));
        interp
    }

    // --- recur scratch (tree walker) ------------------------------------

    pub(crate) fn set_recur(&self, args: Vec<Value>) {
        *self.recur_args.borrow_mut() = Some(args);
    }

    pub(crate) fn take_recur(&self) -> Option<Vec<Value>> {
        self.recur_args.borrow_mut().take()
    }

    pub(crate) fn recur_pending(&self) -> bool {
        self.recur_args.borrow().is_some()
    }

    // --- evaluation entry points ----------------------------------------

    /// Read and evaluate every top-level form, returning the last result.
    /// A safe point runs between forms with the pending result pinned.
    pub fn eval_str(&self, src: &str, file: Option<&str>) -> EvalResult {
        let file: Option<Rc<str>> = file.map(Rc::from);
        let mut reader = Reader::new(src, &self.env, file.clone());
        let mut last = Value::Nil;
        while let Some(form) = reader.read_next().map_err(Failure::Error)? {
            last = self.eval_form(&form, file.clone())?;
            self.safe_point(std::slice::from_ref(&last));
        }
        Ok(last)
    }

    pub fn eval_form(&self, form: &Value, file: Option<Rc<str>>) -> EvalResult {
        let analyzed = Analyzer::new(&self.env, file).analyze_top(form)?;
        match self.backend {
            Backend::Tree => treewalk::eval_top(self, &analyzed.node, analyzed.local_count),
            Backend::Vm => {
                let proto = Emitter::new(&self.env).compile_top(&analyzed.node, "top-level")?;
                self.run_proto(proto)
            }
        }
    }

    pub fn run_proto(&self, proto: Rc<cljw_core::chunk::FnProto>) -> EvalResult {
        let callee = Value::Fn(Rc::new(cljw_core::value::Closure {
            fun: FnKind::Bytecode(proto),
            captures: Vec::new(),
            meta: None,
        }));
        self.with_vm(|vm| vm.call_closure(&self.env, &callee, &[]))
    }

    /// Compile without running, for `--dump-bytecode`.
    pub fn dump_bytecode(&self, src: &str, file: Option<&str>) -> Result<String, Failure> {
        let file: Option<Rc<str>> = file.map(Rc::from);
        let forms = Reader::new(src, &self.env, file.clone())
            .read_all()
            .map_err(Failure::Error)?;
        let mut out = String::new();
        for form in &forms {
            let analyzed = Analyzer::new(&self.env, file.clone()).analyze_top(form)?;
            let proto = Emitter::new(&self.env).compile_top(&analyzed.node, "top-level")?;
            cljw_compiler::dump_proto(&proto, &mut out);
        }
        Ok(out)
    }

    pub fn safe_point(&self, pinned: &[Value]) {
        self.env.maybe_collect(pinned);
    }

    // --- unified call dispatch (callFnVal) ------------------------------

    pub fn call_value(&self, callee: &Value, args: &[Value]) -> EvalResult {
        match callee {
            Value::Builtin(b) => {
                check_builtin_arity(b, args.len())?;
                (b.f)(&self.env, args)
            }
            Value::Fn(closure) => {
                let _guard = self.enter_call()?;
                let named = closure.name().map(|n| TraceFrame {
                    ns: self.env.current_ns().name.clone(),
                    name: n.into(),
                });
                if let Some(frame) = &named {
                    self.trace.borrow_mut().push(frame.clone());
                }
                // the callee's recur scope is its own
                let saved_recur = self.take_recur();
                let result = match &closure.fun {
                    FnKind::Bytecode(_) => {
                        self.with_vm(|vm| vm.call_closure(&self.env, callee, args))
                    }
                    FnKind::Tree(def) => {
                        treewalk::call_closure(self, callee, closure, def, args)
                    }
                };
                *self.recur_args.borrow_mut() = saved_recur;
                if named.is_some() {
                    self.trace.borrow_mut().pop();
                }
                result.map_err(|f| self.attach_trace(f))
            }
            Value::Keyword(_) => match args.len() {
                1 => crate::builtins::collections::lookup(
                    &self.env,
                    &args[0],
                    callee,
                    &Value::Nil,
                ),
                2 => crate::builtins::collections::lookup(&self.env, &args[0], callee, &args[1]),
                n => error(
                    ErrorKind::Arity,
                    format!("wrong number of args ({}) passed to a keyword", n),
                ),
            },
            Value::Map(_) => match args.len() {
                1 => crate::builtins::collections::lookup(&self.env, callee, &args[0], &Value::Nil),
                2 => crate::builtins::collections::lookup(&self.env, callee, &args[0], &args[1]),
                n => error(
                    ErrorKind::Arity,
                    format!("wrong number of args ({}) passed to a map", n),
                ),
            },
            Value::Set(s) => match args.len() {
                1 => Ok(if s.contains(&args[0]) {
                    args[0].clone()
                } else {
                    Value::Nil
                }),
                n => error(
                    ErrorKind::Arity,
                    format!("wrong number of args ({}) passed to a set", n),
                ),
            },
            Value::Vector(v) => match args.len() {
                1 => match &args[0] {
                    Value::Int(i) if *i >= 0 && (*i as usize) < v.count() => {
                        Ok(v.nth(*i as usize).cloned().unwrap_or(Value::Nil))
                    }
                    Value::Int(i) => error(
                        ErrorKind::Index,
                        format!("index {} out of bounds for vector of {}", i, v.count()),
                    ),
                    other => error(
                        ErrorKind::Type,
                        format!("vectors take an integer index, got {}", other.type_tag()),
                    ),
                },
                n => error(
                    ErrorKind::Arity,
                    format!("wrong number of args ({}) passed to a vector", n),
                ),
            },
            Value::MultiFn(m) => self.call_multifn(m, args),
            Value::ProtocolFn(pf) => self.call_protocol_fn(pf, args),
            Value::Var(var) => {
                let v = var.deref().map_err(Failure::Error)?;
                self.call_value(&v, args)
            }
            other => error(
                ErrorKind::Type,
                format!("{} cannot be called as a function", other.type_tag()),
            ),
        }
    }

    fn attach_trace(&self, failure: Failure) -> Failure {
        match failure {
            Failure::Error(mut e) => {
                if e.trace.is_empty() {
                    e.trace = self.trace.borrow().iter().rev().cloned().collect();
                }
                Failure::Error(e)
            }
            other => other,
        }
    }

    fn enter_call(&self) -> Result<CallGuard<'_>, Failure> {
        let depth = self.call_depth.get();
        if depth >= MAX_CALL_DEPTH {
            return Err(Failure::Error(CljError::new(
                ErrorKind::Internal,
                "stack overflow (nested calls exhausted)",
            )));
        }
        self.call_depth.set(depth + 1);
        Ok(CallGuard(&self.call_depth))
    }

    fn with_vm<T>(&self, f: impl FnOnce(&mut Vm) -> T) -> T {
        let mut vm = self.vms.borrow_mut().pop().unwrap_or_default();
        let out = f(&mut vm);
        vm.clear();
        let mut pool = self.vms.borrow_mut();
        if pool.len() < VM_POOL_MAX {
            pool.push(vm);
        }
        out
    }

    // --- multimethods ----------------------------------------------------

    fn call_multifn(&self, m: &Rc<MultiFnCell>, args: &[Value]) -> EvalResult {
        let dispatch = m.dispatch.borrow().clone();
        let dv = self.call_value(&dispatch, args)?;
        let method = self.select_method(m, &dv)?;
        self.call_value(&method, args)
    }

    fn select_method(&self, m: &Rc<MultiFnCell>, dv: &Value) -> EvalResult {
        let methods = m.methods.borrow();
        if let Some(method) = methods.get(&Key(dv.clone())) {
            return Ok(method.clone());
        }
        // isa?-matching candidates, disambiguated by the prefer table
        let candidates: Vec<(Value, Value)> = methods
            .iter()
            .filter(|(k, _)| self.env.is_a(dv, &k.0))
            .map(|(k, v)| (k.0.clone(), v.clone()))
            .collect();
        match candidates.len() {
            0 => {}
            1 => return Ok(candidates[0].1.clone()),
            _ => {
                let prefers = m.prefers.borrow();
                let dominant: Vec<&(Value, Value)> = candidates
                    .iter()
                    .filter(|(key, _)| {
                        candidates.iter().all(|(other, _)| {
                            cljw_core::value::eql(key, other)
                                || prefers
                                    .iter()
                                    .any(|(a, b)| {
                                        cljw_core::value::eql(a, key)
                                            && cljw_core::value::eql(b, other)
                                    })
                        })
                    })
                    .collect();
                if dominant.len() == 1 {
                    return Ok(dominant[0].1.clone());
                }
                return error(
                    ErrorKind::Value,
                    format!(
                        "multiple methods in multimethod '{}' match dispatch value {} and none is preferred",
                        m.name,
                        pr_str(dv)
                    ),
                );
            }
        }
        if let Some(default) = methods.get(&Key(m.default_key.clone())) {
            return Ok(default.clone());
        }
        error(
            ErrorKind::Value,
            format!(
                "no method in multimethod '{}' for dispatch value: {}",
                m.name,
                pr_str(dv)
            ),
        )
    }

    // --- protocols -------------------------------------------------------

    fn call_protocol_fn(&self, pf: &Rc<ProtocolFnRef>, args: &[Value]) -> EvalResult {
        let receiver = args.first().ok_or_else(|| {
            Failure::Error(CljError::new(
                ErrorKind::Arity,
                format!("protocol method {} needs a receiver", pf.method),
            ))
        })?;
        let key = protocol_type_key(receiver);
        let impls = pf.protocol.impls.borrow();
        let method = impls
            .get(&Key(key.clone()))
            .and_then(|table| table.get(&*pf.method))
            .or_else(|| {
                impls
                    .get(&Key(Value::keyword("default")))
                    .and_then(|table| table.get(&*pf.method))
            })
            .cloned();
        drop(impls);
        match method {
            Some(f) => self.call_value(&f, args),
            None => error(
                ErrorKind::Type,
                format!(
                    "no implementation of method {} of protocol {} for: {}",
                    pf.method,
                    pf.protocol.name,
                    pr_str(&key)
                ),
            ),
        }
    }
}

/// `reify`-style records dispatch on their `:__reify_type` tag; every
/// other value dispatches on its type keyword.
pub fn protocol_type_key(v: &Value) -> Value {
    if let Value::Map(m) = v {
        if let Some(tag) = m.get(&Value::keyword("__reify_type")) {
            return tag.clone();
        }
    }
    Value::Keyword(v.type_keyword())
}

pub fn check_builtin_arity(b: &BuiltinDef, argc: usize) -> Result<(), Failure> {
    let min = b.min_arity as usize;
    let ok = argc >= min && b.max_arity.map(|m| argc <= m as usize).unwrap_or(true);
    if ok {
        Ok(())
    } else {
        Err(Failure::Error(CljError::new(
            ErrorKind::Arity,
            format!("wrong number of args ({}) passed to: {}", argc, b.name),
        )))
    }
}

struct CallGuard<'a>(&'a Cell<u32>);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

impl CallBridge for Interp {
    fn call(&self, _env: &Env, callee: &Value, args: &[Value]) -> EvalResult {
        self.call_value(callee, args)
    }

    fn eval_form(&self, _env: &Env, form: &Value) -> EvalResult {
        Interp::eval_form(self, form, None)
    }

    fn realize_seq(&self, env: &Env, v: &Value) -> Result<Vec<Value>, Failure> {
        seqs::to_vec(env, v)
    }
}

/// `=` with lazy structures realized first.
pub fn values_equal(env: &Env, a: &Value, b: &Value) -> Result<bool, Failure> {
    let a = seqs::realize_deep(env, a)?;
    let b = seqs::realize_deep(env, b)?;
    Ok(cljw_core::value::eql(&a, &b))
}
