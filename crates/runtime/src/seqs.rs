//! The seq abstraction: realization of lazy sequences and the canonical
//! first/rest walk every sequence consumer uses.
//!
//! `seq` normalizes any seqable value to nil, a cons, or a list. Lazy
//! cells realize through the call bridge and cache their seq view; a
//! cell carrying a filter chain realizes by pulling source elements
//! through the flat predicate array in one loop, so two hundred stacked
//! `filter`s cost two hundred predicate calls per element and one stack
//! frame, not two hundred.

use cljw_core::collections::PersistentList;
use cljw_core::env::Env;
use cljw_core::error::{error, CljError, ErrorKind, EvalResult, Failure};
use cljw_core::value::{ConsCell, LazySeqCell, Value};
use std::rc::Rc;

/// nil, a non-empty list, or a cons. Anything else seqable converts.
pub fn seq(env: &Env, v: &Value) -> EvalResult {
    match v {
        Value::Nil => Ok(Value::Nil),
        Value::List(l) => {
            if l.is_empty() {
                Ok(Value::Nil)
            } else {
                Ok(v.clone())
            }
        }
        Value::Cons(_) => Ok(v.clone()),
        Value::LazySeq(cell) => realize_lazy(env, cell),
        Value::Vector(vec) => {
            if vec.is_empty() {
                Ok(Value::Nil)
            } else {
                env.heap.note_alloc(16 * vec.count());
                Ok(Value::List(PersistentList::from_vec(
                    vec.as_slice().to_vec(),
                )))
            }
        }
        Value::Map(m) => {
            if m.is_empty() {
                return Ok(Value::Nil);
            }
            env.heap.note_alloc(48 * m.count());
            let entries: Vec<Value> = m
                .iter()
                .map(|(k, val)| Value::vector(vec![k.clone(), val.clone()]))
                .collect();
            Ok(Value::List(PersistentList::from_vec(entries)))
        }
        Value::Set(s) => {
            if s.is_empty() {
                return Ok(Value::Nil);
            }
            env.heap.note_alloc(16 * s.count());
            Ok(Value::List(PersistentList::from_vec(
                s.iter().cloned().collect(),
            )))
        }
        Value::Str(s) => {
            if s.is_empty() {
                return Ok(Value::Nil);
            }
            env.heap.note_alloc(8 * s.len());
            Ok(Value::List(PersistentList::from_vec(
                s.chars().map(Value::Char).collect(),
            )))
        }
        other => error(
            ErrorKind::Type,
            format!("don't know how to create a seq from: {}", other.type_tag()),
        ),
    }
}

fn realize_lazy(env: &Env, cell: &Rc<LazySeqCell>) -> EvalResult {
    if let Some(cached) = cell.cached.borrow().clone() {
        return Ok(cached);
    }
    let chain = cell.chain.borrow().clone();
    if let Some(chain) = chain {
        let mut src = chain.source.clone();
        loop {
            let s = seq(env, &src)?;
            if matches!(s, Value::Nil) {
                *cell.cached.borrow_mut() = Some(Value::Nil);
                return Ok(Value::Nil);
            }
            let head = first(env, &s)?;
            let tail = rest(env, &s)?;
            let mut pass = true;
            for pred in &chain.preds {
                if !env.call_fn(pred, std::slice::from_ref(&head))?.is_truthy() {
                    pass = false;
                    break;
                }
            }
            if pass {
                let lazy_tail = env.heap.alloc_lazy_chain(tail, chain.preds.clone());
                let view = Value::Cons(Rc::new(ConsCell {
                    first: head,
                    rest: lazy_tail,
                }));
                *cell.cached.borrow_mut() = Some(view.clone());
                return Ok(view);
            }
            src = tail;
        }
    }
    let thunk = cell.thunk.borrow_mut().take();
    match thunk {
        Some(thunk) => {
            let produced = match env.call_fn(&thunk, &[]) {
                Ok(v) => v,
                Err(e) => {
                    // keep the thunk so a later force can retry
                    *cell.thunk.borrow_mut() = Some(thunk);
                    return Err(e);
                }
            };
            let view = seq(env, &produced)?;
            *cell.cached.borrow_mut() = Some(view.clone());
            Ok(view)
        }
        None => {
            *cell.cached.borrow_mut() = Some(Value::Nil);
            Ok(Value::Nil)
        }
    }
}

pub fn first(env: &Env, v: &Value) -> EvalResult {
    let s = seq(env, v)?;
    match s {
        Value::Nil => Ok(Value::Nil),
        Value::List(l) => Ok(l.first().cloned().unwrap_or(Value::Nil)),
        Value::Cons(c) => Ok(c.first.clone()),
        _ => error(ErrorKind::Internal, "seq returned a non-seq view"),
    }
}

/// `rest` of an exhausted sequence is the empty list, never nil.
pub fn rest(env: &Env, v: &Value) -> EvalResult {
    let s = seq(env, v)?;
    match s {
        Value::Nil => Ok(Value::List(PersistentList::empty())),
        Value::List(l) => Ok(Value::List(l.rest())),
        Value::Cons(c) => Ok(c.rest.clone()),
        _ => error(ErrorKind::Internal, "seq returned a non-seq view"),
    }
}

/// `next` is `seq` of `rest`: nil when nothing remains.
pub fn next_seq(env: &Env, v: &Value) -> EvalResult {
    let r = rest(env, v)?;
    seq(env, &r)
}

/// Fully realize into a vector. Diverges on an infinite sequence, as the
/// equivalent Clojure would.
pub fn to_vec(env: &Env, v: &Value) -> Result<Vec<Value>, Failure> {
    let mut out = Vec::new();
    let mut s = seq(env, v)?;
    loop {
        match s {
            Value::Nil => return Ok(out),
            Value::List(l) => {
                out.extend(l.iter().cloned());
                return Ok(out);
            }
            Value::Cons(c) => {
                out.push(c.first.clone());
                s = seq(env, &c.rest)?;
            }
            _ => {
                return Err(Failure::Error(CljError::new(
                    ErrorKind::Internal,
                    "seq returned a non-seq view",
                )));
            }
        }
    }
}

pub fn count(env: &Env, v: &Value) -> Result<usize, Failure> {
    match v {
        Value::Nil => Ok(0),
        Value::List(l) => Ok(l.count()),
        Value::Vector(vec) => Ok(vec.count()),
        Value::Map(m) => Ok(m.count()),
        Value::Set(s) => Ok(s.count()),
        Value::Str(s) => Ok(s.chars().count()),
        Value::Cons(_) | Value::LazySeq(_) => Ok(to_vec(env, v)?.len()),
        other => Err(Failure::Error(CljError::new(
            ErrorKind::Type,
            format!("count not supported on: {}", other.type_tag()),
        ))),
    }
}

/// Replace lazy sequences (and cons chains over them) with concrete
/// lists, recursively, so `=` and printing see plain data.
pub fn realize_deep(env: &Env, v: &Value) -> EvalResult {
    match v {
        Value::LazySeq(_) | Value::Cons(_) => {
            let items = to_vec(env, v)?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(realize_deep(env, &item)?);
            }
            Ok(Value::List(PersistentList::from_vec(out)))
        }
        Value::List(l) => {
            let mut out = Vec::with_capacity(l.count());
            let mut changed = false;
            for item in l.iter() {
                let r = realize_deep(env, item)?;
                changed = changed || !same_shallow(&r, item);
                out.push(r);
            }
            if changed {
                Ok(Value::List(PersistentList::from_vec(out)))
            } else {
                Ok(v.clone())
            }
        }
        Value::Vector(vec) => {
            let mut out = Vec::with_capacity(vec.count());
            let mut changed = false;
            for item in vec.iter() {
                let r = realize_deep(env, item)?;
                changed = changed || !same_shallow(&r, item);
                out.push(r);
            }
            if changed {
                Ok(Value::vector(out))
            } else {
                Ok(v.clone())
            }
        }
        Value::Map(m) => {
            let mut pairs = Vec::with_capacity(m.count());
            for (k, val) in m.iter() {
                pairs.push((realize_deep(env, k)?, realize_deep(env, val)?));
            }
            Ok(Value::Map(cljw_core::collections::PersistentMap::from_pairs(
                pairs,
            )))
        }
        Value::Set(s) => {
            let mut items = Vec::with_capacity(s.count());
            for item in s.iter() {
                items.push(realize_deep(env, item)?);
            }
            Ok(Value::Set(cljw_core::collections::PersistentSet::from_vec(
                items,
            )))
        }
        _ => Ok(v.clone()),
    }
}

fn same_shallow(a: &Value, b: &Value) -> bool {
    // cheap identity probe to avoid rebuilding untouched collections
    match (a, b) {
        (Value::List(_), Value::List(_))
        | (Value::Vector(_), Value::Vector(_))
        | (Value::Map(_), Value::Map(_))
        | (Value::Set(_), Value::Set(_)) => false,
        (Value::LazySeq(_), _) | (_, Value::LazySeq(_)) => false,
        _ => true,
    }
}
