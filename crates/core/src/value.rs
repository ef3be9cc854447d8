//! The tagged runtime Value and its equality/hash semantics.
//!
//! Every value the language touches is one of these variants. Small values
//! (nil, booleans, numbers, chars) are immediate; everything else shares an
//! `Rc`-owned payload, so cloning a Value is a pointer bump. The only
//! mutable payloads are the cell types (atom, volatile, delay, lazy-seq)
//! and the multimethod/protocol registries, which is also exactly the set
//! the garbage collector has to track (see `gc`).

use crate::ast::FnDef;
use crate::chunk::{FnProto, Op};
use crate::collections::{Key, ListNode, PersistentList, PersistentMap, PersistentSet, PersistentVector};
use crate::env::Env;
use crate::error::EvalResult;
use crate::symbol::{Keyword, Symbol};
use std::cell::{Cell, RefCell};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A mutable cell serialized through `swap!`/`reset!`.
#[derive(Debug)]
pub struct AtomCell {
    pub value: RefCell<Value>,
    pub meta: RefCell<Option<PersistentMap>>,
    pub mark: Cell<bool>,
}

/// The non-atomic analogue (`volatile!`).
#[derive(Debug)]
pub struct VolatileCell {
    pub value: RefCell<Value>,
    pub mark: Cell<bool>,
}

/// A thunk realized at most once. The thunk is dropped on success so the
/// captured environment can be reclaimed.
#[derive(Debug)]
pub struct DelayCell {
    pub thunk: RefCell<Option<Value>>,
    pub cached: RefCell<Option<Value>>,
    pub mark: Cell<bool>,
}

/// Flattened predicates applied over a source sequence in one loop,
/// so a tower of `filter` calls realizes without a tower of frames.
#[derive(Debug, Clone)]
pub struct FilterChain {
    pub source: Value,
    pub preds: Vec<Value>,
}

/// A lazily realized sequence. `cached` holds the canonical seq view
/// (nil, a cons, or a list) once the thunk or filter chain has run.
#[derive(Debug)]
pub struct LazySeqCell {
    pub thunk: RefCell<Option<Value>>,
    pub cached: RefCell<Option<Value>>,
    pub chain: RefCell<Option<FilterChain>>,
    pub mark: Cell<bool>,
}

impl LazySeqCell {
    pub fn is_realized(&self) -> bool {
        self.cached.borrow().is_some()
    }
}

/// An explicit cons cell; `rest` may be any seqable value.
#[derive(Debug)]
pub struct ConsCell {
    pub first: Value,
    pub rest: Value,
}

/// A regex literal: source text plus the pattern compiled at read time.
#[derive(Debug)]
pub struct RegexPattern {
    pub source: String,
    pub regex: regex::Regex,
}

/// A multimethod: dispatch fn, method table, prefer table.
#[derive(Debug)]
pub struct MultiFnCell {
    pub name: Rc<str>,
    pub dispatch: RefCell<Value>,
    pub methods: RefCell<indexmap::IndexMap<Key, Value>>,
    pub default_key: Value,
    pub prefers: RefCell<Vec<(Value, Value)>>,
    pub mark: Cell<bool>,
}

/// A protocol: method signatures plus per-type implementation tables,
/// keyed by the type keyword of the first argument.
#[derive(Debug)]
pub struct ProtocolCell {
    pub name: Rc<str>,
    pub sigs: RefCell<PersistentMap>,
    pub impls: RefCell<indexmap::IndexMap<Key, indexmap::IndexMap<Rc<str>, Value>>>,
    pub mark: Cell<bool>,
}

/// A single protocol method as a first-class fn.
#[derive(Debug)]
pub struct ProtocolFnRef {
    pub protocol: Rc<ProtocolCell>,
    pub method: Rc<str>,
}

/// The static half of a function value: either a compiled proto (bytecode
/// back end) or an analyzed definition (tree walker).
#[derive(Debug, Clone)]
pub enum FnKind {
    Bytecode(Rc<FnProto>),
    Tree(Rc<FnDef>),
}

/// A function value: static part plus captured bindings.
#[derive(Debug)]
pub struct Closure {
    pub fun: FnKind,
    pub captures: Vec<Value>,
    pub meta: Option<PersistentMap>,
}

impl Closure {
    pub fn name(&self) -> Option<&str> {
        match &self.fun {
            FnKind::Bytecode(proto) => proto.name.as_deref(),
            FnKind::Tree(def) => def.name.as_deref(),
        }
    }
}

/// A host function registered into the environment as a Var root.
pub struct BuiltinDef {
    pub name: &'static str,
    pub min_arity: u8,
    /// `None` means variadic.
    pub max_arity: Option<u8>,
    /// When set, the bytecode emitter may inline calls as this opcode.
    pub intrinsic: Option<Op>,
    pub f: fn(&Env, &[Value]) -> EvalResult,
}

impl std::fmt::Debug for BuiltinDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinDef")
            .field("name", &self.name)
            .field("min_arity", &self.min_arity)
            .field("max_arity", &self.max_arity)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(Rc<str>),
    Keyword(Keyword),
    Symbol(Rc<Symbol>),
    List(PersistentList),
    Vector(PersistentVector),
    Map(PersistentMap),
    Set(PersistentSet),
    Fn(Rc<Closure>),
    Builtin(&'static BuiltinDef),
    Atom(Rc<AtomCell>),
    Volatile(Rc<VolatileCell>),
    Delay(Rc<DelayCell>),
    LazySeq(Rc<LazySeqCell>),
    Regex(Rc<RegexPattern>),
    Var(Rc<crate::env::Var>),
    Protocol(Rc<ProtocolCell>),
    ProtocolFn(Rc<ProtocolFnRef>),
    MultiFn(Rc<MultiFnCell>),
    Reduced(Rc<Value>),
    Cons(Rc<ConsCell>),
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    pub fn symbol(sym: Symbol) -> Value {
        Value::Symbol(Rc::new(sym))
    }

    pub fn keyword(name: &str) -> Value {
        Value::Keyword(Keyword::intern(None, name))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(PersistentList::from_vec(items))
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(PersistentVector::from_vec(items))
    }

    /// Everything except nil and false is truthy, including `0`, `()`, `""`.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// The type tag used for printing, errors and protocol dispatch.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Symbol(_) => "symbol",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Fn(_) => "fn",
            Value::Builtin(_) => "builtin",
            Value::Atom(_) => "atom",
            Value::Volatile(_) => "volatile",
            Value::Delay(_) => "delay",
            Value::LazySeq(_) => "lazy-seq",
            Value::Regex(_) => "regex",
            Value::Var(_) => "var",
            Value::Protocol(_) => "protocol",
            Value::ProtocolFn(_) => "protocol-fn",
            Value::MultiFn(_) => "multi-fn",
            Value::Reduced(_) => "reduced",
            Value::Cons(_) => "cons",
        }
    }

    pub fn type_keyword(&self) -> Keyword {
        Keyword::intern(None, self.type_tag())
    }

    /// The metadata map attached to this value, where the variant supports
    /// one.
    pub fn meta(&self) -> Option<PersistentMap> {
        match self {
            Value::Symbol(s) => s.meta.clone(),
            Value::List(l) => l.meta().cloned(),
            Value::Vector(v) => v.meta().cloned(),
            Value::Map(m) => m.meta().cloned(),
            Value::Set(s) => s.meta().cloned(),
            Value::Fn(c) => c.meta.clone(),
            Value::Atom(a) => a.meta.borrow().clone(),
            Value::Var(v) => v.meta.borrow().clone(),
            _ => None,
        }
    }

    /// Attach metadata, returning a new value. `None` when the variant does
    /// not support metadata.
    pub fn with_meta(&self, meta: Option<PersistentMap>) -> Option<Value> {
        match self {
            Value::Symbol(s) => Some(Value::Symbol(Rc::new(s.with_meta(meta)))),
            Value::List(l) => Some(Value::List(l.with_meta(meta))),
            Value::Vector(v) => Some(Value::Vector(v.with_meta(meta))),
            Value::Map(m) => Some(Value::Map(m.with_meta(meta))),
            Value::Set(s) => Some(Value::Set(s.with_meta(meta))),
            Value::Fn(c) => Some(Value::Fn(Rc::new(Closure {
                fun: c.fun.clone(),
                captures: c.captures.clone(),
                meta,
            }))),
            _ => None,
        }
    }
}

/// `=` semantics. NaN is unequal to itself, as IEEE requires.
pub fn eql(a: &Value, b: &Value) -> bool {
    eql_impl(a, b, false)
}

/// `=` made total: NaN equals itself. Used for map/set keys, where the
/// container contract demands reflexivity.
pub fn eql_total(a: &Value, b: &Value) -> bool {
    eql_impl(a, b, true)
}

fn is_sequential(v: &Value) -> bool {
    matches!(v, Value::List(_) | Value::Vector(_) | Value::Cons(_))
}

/// Walks list/vector/cons chains element-by-element without allocating.
enum SeqCursor<'a> {
    Done,
    List(Option<&'a ListNode>),
    Slice(std::slice::Iter<'a, Value>),
    Rest(&'a Value),
}

impl<'a> SeqCursor<'a> {
    fn of(v: &'a Value) -> SeqCursor<'a> {
        SeqCursor::Rest(v)
    }

    /// `Err(())` when the chain runs into something that is not a concrete
    /// sequence (an unrealized lazy-seq tail, say).
    fn next(&mut self) -> Result<Option<&'a Value>, ()> {
        loop {
            match self {
                SeqCursor::Done => return Ok(None),
                SeqCursor::List(node) => match node.take() {
                    Some(n) => {
                        *node = n.rest.as_deref();
                        return Ok(Some(&n.first));
                    }
                    None => {
                        *self = SeqCursor::Done;
                        return Ok(None);
                    }
                },
                SeqCursor::Slice(it) => return Ok(it.next()),
                SeqCursor::Rest(v) => {
                    // copy the reference out so the new cursor state can
                    // be written while bindings into it stay alive
                    let cur: &'a Value = *v;
                    match cur {
                        Value::Nil => *self = SeqCursor::Done,
                        Value::List(l) => *self = SeqCursor::List(l.head_node()),
                        Value::Vector(vec) => *self = SeqCursor::Slice(vec.iter()),
                        Value::Cons(cell) => {
                            *self = SeqCursor::Rest(&cell.rest);
                            return Ok(Some(&cell.first));
                        }
                        _ => return Err(()),
                    }
                }
            }
        }
    }
}

fn seq_eql(a: &Value, b: &Value, total: bool) -> bool {
    let mut ca = SeqCursor::of(a);
    let mut cb = SeqCursor::of(b);
    loop {
        match (ca.next(), cb.next()) {
            (Ok(Some(x)), Ok(Some(y))) => {
                if !eql_impl(x, y, total) {
                    return false;
                }
            }
            (Ok(None), Ok(None)) => return true,
            _ => return false,
        }
    }
}

fn eql_impl(a: &Value, b: &Value, total: bool) -> bool {
    if let Value::Reduced(inner) = a {
        return eql_impl(inner, b, total);
    }
    if let Value::Reduced(inner) = b {
        return eql_impl(a, inner, total);
    }
    if is_sequential(a) && is_sequential(b) {
        return seq_eql(a, b, total);
    }
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => {
            if total && x.is_nan() && y.is_nan() {
                true
            } else {
                x == y
            }
        }
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Keyword(x), Value::Keyword(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => x == y,
        (Value::Map(x), Value::Map(y)) => {
            x.count() == y.count()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| eql_impl(v, w, total)))
        }
        (Value::Set(x), Value::Set(y)) => {
            x.count() == y.count() && x.iter().all(|m| y.contains(m))
        }
        (Value::Fn(x), Value::Fn(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => std::ptr::eq(*x, *y),
        (Value::Atom(x), Value::Atom(y)) => Rc::ptr_eq(x, y),
        (Value::Volatile(x), Value::Volatile(y)) => Rc::ptr_eq(x, y),
        (Value::Delay(x), Value::Delay(y)) => Rc::ptr_eq(x, y),
        (Value::LazySeq(x), Value::LazySeq(y)) => Rc::ptr_eq(x, y),
        (Value::Regex(x), Value::Regex(y)) => Rc::ptr_eq(x, y),
        (Value::Var(x), Value::Var(y)) => Rc::ptr_eq(x, y),
        (Value::Protocol(x), Value::Protocol(y)) => Rc::ptr_eq(x, y),
        (Value::ProtocolFn(x), Value::ProtocolFn(y)) => {
            Rc::ptr_eq(&x.protocol, &y.protocol) && x.method == y.method
        }
        (Value::MultiFn(x), Value::MultiFn(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// Pointer identity (`identical?`). Immediates compare by value.
pub fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y),
        (Value::Keyword(x), Value::Keyword(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => Rc::ptr_eq(x, y),
        (Value::Fn(x), Value::Fn(y)) => Rc::ptr_eq(x, y),
        (Value::Atom(x), Value::Atom(y)) => Rc::ptr_eq(x, y),
        (Value::Volatile(x), Value::Volatile(y)) => Rc::ptr_eq(x, y),
        (Value::Delay(x), Value::Delay(y)) => Rc::ptr_eq(x, y),
        (Value::LazySeq(x), Value::LazySeq(y)) => Rc::ptr_eq(x, y),
        (Value::Var(x), Value::Var(y)) => Rc::ptr_eq(x, y),
        _ => eql(a, b),
    }
}

const NAN_BITS: u64 = 0x7ff8_0000_0000_0000;

/// Hash consistent with `eql` for the types the contract names: numbers,
/// strings, keywords, symbols, vectors (and their sequential kin), maps,
/// sets. Reference types hash by identity.
pub fn hash_value<H: Hasher>(v: &Value, state: &mut H) {
    match v {
        Value::Reduced(inner) => hash_value(inner, state),
        Value::Nil => state.write_u8(0),
        Value::Bool(b) => {
            state.write_u8(1);
            b.hash(state);
        }
        Value::Int(i) => {
            state.write_u8(2);
            state.write_i64(*i);
        }
        Value::Float(f) => {
            state.write_u8(2);
            if f.is_nan() {
                state.write_i64(NAN_BITS as i64);
            } else if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                // agree with the equal integer
                state.write_i64(*f as i64);
            } else {
                state.write_i64(f.to_bits() as i64);
            }
        }
        Value::Char(c) => {
            state.write_u8(3);
            c.hash(state);
        }
        Value::Str(s) => {
            state.write_u8(4);
            s.as_bytes().hash(state);
        }
        Value::Keyword(k) => {
            state.write_u8(5);
            k.hash(state);
        }
        Value::Symbol(s) => {
            state.write_u8(6);
            s.hash(state);
        }
        Value::List(_) | Value::Vector(_) | Value::Cons(_) => {
            state.write_u8(7);
            let mut cursor = SeqCursor::of(v);
            while let Ok(Some(item)) = cursor.next() {
                hash_value(item, state);
            }
        }
        Value::Map(m) => {
            state.write_u8(8);
            state.write_usize(m.count());
            let mut acc: u64 = 0;
            for (k, val) in m.iter() {
                let mut sub = DefaultHasher::new();
                hash_value(k, &mut sub);
                hash_value(val, &mut sub);
                acc = acc.wrapping_add(sub.finish());
            }
            state.write_u64(acc);
        }
        Value::Set(s) => {
            state.write_u8(9);
            state.write_usize(s.count());
            let mut acc: u64 = 0;
            for m in s.iter() {
                let mut sub = DefaultHasher::new();
                hash_value(m, &mut sub);
                acc = acc.wrapping_add(sub.finish());
            }
            state.write_u64(acc);
        }
        Value::Fn(c) => {
            state.write_u8(10);
            state.write_usize(Rc::as_ptr(c) as usize);
        }
        Value::Builtin(b) => {
            state.write_u8(10);
            state.write_usize(*b as *const BuiltinDef as usize);
        }
        Value::Atom(c) => {
            state.write_u8(10);
            state.write_usize(Rc::as_ptr(c) as usize);
        }
        Value::Volatile(c) => {
            state.write_u8(10);
            state.write_usize(Rc::as_ptr(c) as usize);
        }
        Value::Delay(c) => {
            state.write_u8(10);
            state.write_usize(Rc::as_ptr(c) as usize);
        }
        Value::LazySeq(c) => {
            state.write_u8(10);
            state.write_usize(Rc::as_ptr(c) as usize);
        }
        Value::Regex(p) => {
            state.write_u8(10);
            state.write_usize(Rc::as_ptr(p) as usize);
        }
        Value::Var(var) => {
            state.write_u8(10);
            state.write_usize(Rc::as_ptr(var) as usize);
        }
        Value::Protocol(p) => {
            state.write_u8(10);
            state.write_usize(Rc::as_ptr(p) as usize);
        }
        Value::ProtocolFn(p) => {
            state.write_u8(10);
            state.write_usize(Rc::as_ptr(p) as usize);
        }
        Value::MultiFn(m) => {
            state.write_u8(10);
            state.write_usize(Rc::as_ptr(m) as usize);
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        eql(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::{PersistentMap, PersistentSet};

    fn hash_of(v: &Value) -> u64 {
        let mut h = DefaultHasher::new();
        hash_value(v, &mut h);
        h.finish()
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::string("").is_truthy());
        assert!(Value::list(vec![]).is_truthy());
    }

    #[test]
    fn test_numeric_promotion_equality() {
        assert!(eql(&Value::Int(1), &Value::Float(1.0)));
        assert!(!eql(&Value::Int(1), &Value::Float(1.5)));
        assert_eq!(hash_of(&Value::Int(1)), hash_of(&Value::Float(1.0)));
    }

    #[test]
    fn test_sequential_equality_across_kinds() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let vector = Value::vector(vec![Value::Int(1), Value::Int(2)]);
        assert!(eql(&list, &vector));
        assert_eq!(hash_of(&list), hash_of(&vector));
        let cons = Value::Cons(Rc::new(ConsCell {
            first: Value::Int(1),
            rest: Value::list(vec![Value::Int(2)]),
        }));
        assert!(eql(&cons, &vector));
    }

    #[test]
    fn test_set_equality_order_independent() {
        let a = Value::Set(PersistentSet::from_vec(vec![Value::Int(1), Value::Int(2)]));
        let b = Value::Set(PersistentSet::from_vec(vec![Value::Int(2), Value::Int(1)]));
        assert!(eql(&a, &b));
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_map_equality_and_hash() {
        let a = Value::Map(PersistentMap::from_pairs(vec![
            (Value::keyword("a"), Value::Int(1)),
            (Value::keyword("b"), Value::Int(2)),
        ]));
        let b = Value::Map(PersistentMap::from_pairs(vec![
            (Value::keyword("b"), Value::Int(2)),
            (Value::keyword("a"), Value::Int(1)),
        ]));
        assert!(eql(&a, &b));
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_reduced_is_transparent() {
        let r = Value::Reduced(Rc::new(Value::Int(5)));
        assert!(eql(&r, &Value::Int(5)));
        assert_eq!(hash_of(&r), hash_of(&Value::Int(5)));
    }

    #[test]
    fn test_nan_untotaled_vs_total() {
        let nan = Value::Float(f64::NAN);
        assert!(!eql(&nan, &nan));
        assert!(eql_total(&nan, &nan));
    }
}
