//! Collection builtins: constructors, lookup, conj/assoc families and
//! the seq primitives the embedded library builds everything else from.

use crate::seqs;
use cljw_core::collections::{PersistentList, PersistentMap, PersistentSet, PersistentVector};
use cljw_core::env::Env;
use cljw_core::error::{error, ErrorKind, EvalResult};
use cljw_core::value::{ConsCell, Value};
use std::rc::Rc;

/// `get` semantics shared with callable keywords and maps.
pub fn lookup(env: &Env, coll: &Value, key: &Value, default: &Value) -> EvalResult {
    let _ = env;
    match coll {
        Value::Map(m) => Ok(m.get(key).cloned().unwrap_or_else(|| default.clone())),
        Value::Set(s) => Ok(if s.contains(key) {
            key.clone()
        } else {
            default.clone()
        }),
        Value::Vector(v) => match key {
            Value::Int(i) if *i >= 0 => Ok(v
                .nth(*i as usize)
                .cloned()
                .unwrap_or_else(|| default.clone())),
            _ => Ok(default.clone()),
        },
        Value::Str(s) => match key {
            Value::Int(i) if *i >= 0 => Ok(s
                .chars()
                .nth(*i as usize)
                .map(Value::Char)
                .unwrap_or_else(|| default.clone())),
            _ => Ok(default.clone()),
        },
        _ => Ok(default.clone()),
    }
}

pub fn get(env: &Env, args: &[Value]) -> EvalResult {
    let default = args.get(2).cloned().unwrap_or(Value::Nil);
    lookup(env, &args[0], &args[1], &default)
}

pub fn assoc(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    if args.len() % 2 == 0 {
        return error(ErrorKind::Arity, "assoc expects a collection and key/value pairs");
    }
    match &args[0] {
        Value::Map(m) => {
            let mut out = m.clone();
            for pair in args[1..].chunks(2) {
                out = out.assoc(pair[0].clone(), pair[1].clone());
            }
            Ok(Value::Map(out))
        }
        Value::Nil => {
            let mut out = PersistentMap::empty();
            for pair in args[1..].chunks(2) {
                out = out.assoc(pair[0].clone(), pair[1].clone());
            }
            Ok(Value::Map(out))
        }
        Value::Vector(v) => {
            let mut out = v.clone();
            for pair in args[1..].chunks(2) {
                let Value::Int(i) = pair[0] else {
                    return error(ErrorKind::Type, "vector assoc expects an integer index");
                };
                out = match out.assoc_idx(i as usize, pair[1].clone()) {
                    Some(next) => next,
                    None => {
                        return error(
                            ErrorKind::Index,
                            format!("index {} out of bounds for vector assoc", i),
                        );
                    }
                };
            }
            Ok(Value::Vector(out))
        }
        other => error(
            ErrorKind::Type,
            format!("assoc not supported on: {}", other.type_tag()),
        ),
    }
}

pub fn dissoc(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Map(m) => {
            let mut out = m.clone();
            for k in &args[1..] {
                out = out.dissoc(k);
            }
            Ok(Value::Map(out))
        }
        Value::Nil => Ok(Value::Nil),
        other => error(
            ErrorKind::Type,
            format!("dissoc not supported on: {}", other.type_tag()),
        ),
    }
}

pub fn conj(env: &Env, args: &[Value]) -> EvalResult {
    let mut coll = args[0].clone();
    for v in &args[1..] {
        coll = conj_one(env, &coll, v)?;
    }
    Ok(coll)
}

fn conj_one(env: &Env, coll: &Value, v: &Value) -> EvalResult {
    env.heap.note_alloc(32);
    match coll {
        Value::Nil => Ok(Value::List(PersistentList::empty().cons(v.clone()))),
        Value::List(l) => Ok(Value::List(l.cons(v.clone()))),
        Value::Vector(vec) => Ok(Value::Vector(vec.conj(v.clone()))),
        Value::Set(s) => Ok(Value::Set(s.conj(v.clone()))),
        Value::Map(m) => match v {
            Value::Vector(entry) if entry.count() == 2 => Ok(Value::Map(m.assoc(
                entry.nth(0).cloned().unwrap_or(Value::Nil),
                entry.nth(1).cloned().unwrap_or(Value::Nil),
            ))),
            Value::Map(other) => {
                let mut out = m.clone();
                for (k, val) in other.iter() {
                    out = out.assoc(k.clone(), val.clone());
                }
                Ok(Value::Map(out))
            }
            other => error(
                ErrorKind::Type,
                format!("can't conj {} onto a map", other.type_tag()),
            ),
        },
        Value::Cons(_) | Value::LazySeq(_) => {
            // conj onto a seq prepends, like a list
            Ok(Value::Cons(Rc::new(ConsCell {
                first: v.clone(),
                rest: coll.clone(),
            })))
        }
        other => error(
            ErrorKind::Type,
            format!("conj not supported on: {}", other.type_tag()),
        ),
    }
}

pub fn disj(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Set(s) => {
            let mut out = s.clone();
            for v in &args[1..] {
                out = out.disj(v);
            }
            Ok(Value::Set(out))
        }
        Value::Nil => Ok(Value::Nil),
        other => error(
            ErrorKind::Type,
            format!("disj not supported on: {}", other.type_tag()),
        ),
    }
}

pub fn contains_p(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Map(m) => Ok(Value::Bool(m.contains_key(&args[1]))),
        Value::Set(s) => Ok(Value::Bool(s.contains(&args[1]))),
        Value::Vector(v) => match &args[1] {
            Value::Int(i) => Ok(Value::Bool(*i >= 0 && (*i as usize) < v.count())),
            _ => Ok(Value::Bool(false)),
        },
        Value::Nil => Ok(Value::Bool(false)),
        other => error(
            ErrorKind::Type,
            format!("contains? not supported on: {}", other.type_tag()),
        ),
    }
}

pub fn find(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Map(m) => Ok(match m.get(&args[1]) {
            Some(v) => Value::vector(vec![args[1].clone(), v.clone()]),
            None => Value::Nil,
        }),
        Value::Nil => Ok(Value::Nil),
        other => error(
            ErrorKind::Type,
            format!("find not supported on: {}", other.type_tag()),
        ),
    }
}

pub fn count(env: &Env, args: &[Value]) -> EvalResult {
    Ok(Value::Int(seqs::count(env, &args[0])? as i64))
}

pub fn nth(env: &Env, args: &[Value]) -> EvalResult {
    let idx = match &args[1] {
        Value::Int(i) if *i >= 0 => *i as usize,
        Value::Int(i) => {
            return match args.get(2) {
                Some(default) => Ok(default.clone()),
                None => error(ErrorKind::Index, format!("nth: negative index {}", i)),
            };
        }
        other => {
            return error(
                ErrorKind::Type,
                format!("nth: expected an integer index, got {}", other.type_tag()),
            );
        }
    };
    let found = match &args[0] {
        Value::Vector(v) => v.nth(idx).cloned(),
        Value::Str(s) => s.chars().nth(idx).map(Value::Char),
        Value::Nil => None,
        seqable => {
            let mut s = seqs::seq(env, seqable)?;
            let mut remaining = idx;
            loop {
                if matches!(s, Value::Nil) {
                    break None;
                }
                if remaining == 0 {
                    break Some(seqs::first(env, &s)?);
                }
                remaining -= 1;
                s = seqs::next_seq(env, &s)?;
            }
        }
    };
    match found {
        Some(v) => Ok(v),
        None => match args.get(2) {
            Some(default) => Ok(default.clone()),
            None => error(ErrorKind::Index, format!("nth: index {} out of bounds", idx)),
        },
    }
}

/// `(nthrest coll n)`: the result of calling rest n times.
pub fn nthrest(env: &Env, args: &[Value]) -> EvalResult {
    let Value::Int(n) = &args[1] else {
        return error(ErrorKind::Type, "nthrest expects an integer");
    };
    let mut cur = args[0].clone();
    for _ in 0..*n {
        cur = seqs::rest(env, &cur)?;
    }
    Ok(cur)
}

pub fn first(env: &Env, args: &[Value]) -> EvalResult {
    seqs::first(env, &args[0])
}

pub fn rest(env: &Env, args: &[Value]) -> EvalResult {
    seqs::rest(env, &args[0])
}

pub fn next(env: &Env, args: &[Value]) -> EvalResult {
    seqs::next_seq(env, &args[0])
}

pub fn seq(env: &Env, args: &[Value]) -> EvalResult {
    seqs::seq(env, &args[0])
}

pub fn cons(env: &Env, args: &[Value]) -> EvalResult {
    env.heap.note_alloc(32);
    Ok(Value::Cons(Rc::new(ConsCell {
        first: args[0].clone(),
        rest: args[1].clone(),
    })))
}

pub fn list(env: &Env, args: &[Value]) -> EvalResult {
    env.heap.note_alloc(16 * args.len() + 16);
    Ok(Value::List(PersistentList::from_vec(args.to_vec())))
}

pub fn vector(env: &Env, args: &[Value]) -> EvalResult {
    env.heap.note_alloc(16 * args.len() + 16);
    Ok(Value::vector(args.to_vec()))
}

pub fn hash_map(env: &Env, args: &[Value]) -> EvalResult {
    if args.len() % 2 != 0 {
        return error(ErrorKind::Arity, "hash-map expects an even number of args");
    }
    env.heap.note_alloc(32 * args.len() + 16);
    let pairs = args
        .chunks(2)
        .map(|c| (c[0].clone(), c[1].clone()))
        .collect();
    Ok(Value::Map(PersistentMap::from_pairs(pairs)))
}

pub fn hash_set(env: &Env, args: &[Value]) -> EvalResult {
    env.heap.note_alloc(16 * args.len() + 16);
    Ok(Value::Set(PersistentSet::from_vec(args.to_vec())))
}

pub fn vec(env: &Env, args: &[Value]) -> EvalResult {
    match &args[0] {
        Value::Vector(_) => Ok(args[0].clone()),
        other => {
            let items = seqs::to_vec(env, other)?;
            env.heap.note_alloc(16 * items.len() + 16);
            Ok(Value::vector(items))
        }
    }
}

pub fn set(env: &Env, args: &[Value]) -> EvalResult {
    match &args[0] {
        Value::Set(_) => Ok(args[0].clone()),
        other => {
            let items = seqs::to_vec(env, other)?;
            env.heap.note_alloc(16 * items.len() + 16);
            Ok(Value::Set(PersistentSet::from_vec(items)))
        }
    }
}

pub fn subvec(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Vector(v) = &args[0] else {
        return error(ErrorKind::Type, "subvec expects a vector");
    };
    let (Value::Int(start), end) = (&args[1], args.get(2)) else {
        return error(ErrorKind::Type, "subvec expects integer bounds");
    };
    let end = match end {
        Some(Value::Int(e)) => *e as usize,
        None => v.count(),
        Some(other) => {
            return error(
                ErrorKind::Type,
                format!("subvec end must be an integer, got {}", other.type_tag()),
            );
        }
    };
    v.subvec(*start as usize, end)
        .map(Value::Vector)
        .ok_or_else(|| {
            cljw_core::error::CljError::new(
                ErrorKind::Index,
                format!("subvec bounds [{} {}) out of range", start, end),
            )
            .into()
        })
}

pub fn peek(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Vector(v) => Ok(if v.count() == 0 {
            Value::Nil
        } else {
            v.nth(v.count() - 1).cloned().unwrap_or(Value::Nil)
        }),
        Value::List(l) => Ok(l.first().cloned().unwrap_or(Value::Nil)),
        Value::Nil => Ok(Value::Nil),
        other => error(
            ErrorKind::Type,
            format!("peek not supported on: {}", other.type_tag()),
        ),
    }
}

pub fn pop(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Vector(v) => v.pop().map(Value::Vector).ok_or_else(|| {
            cljw_core::error::CljError::new(ErrorKind::Value, "can't pop an empty vector").into()
        }),
        Value::List(l) => {
            if l.is_empty() {
                error(ErrorKind::Value, "can't pop an empty list")
            } else {
                Ok(Value::List(l.rest()))
            }
        }
        other => error(
            ErrorKind::Type,
            format!("pop not supported on: {}", other.type_tag()),
        ),
    }
}

pub fn keys(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Map(m) => {
            if m.is_empty() {
                return Ok(Value::Nil);
            }
            Ok(Value::List(PersistentList::from_vec(
                m.keys().cloned().collect(),
            )))
        }
        Value::Nil => Ok(Value::Nil),
        other => error(
            ErrorKind::Type,
            format!("keys not supported on: {}", other.type_tag()),
        ),
    }
}

pub fn vals(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Map(m) => {
            if m.is_empty() {
                return Ok(Value::Nil);
            }
            Ok(Value::List(PersistentList::from_vec(
                m.vals().cloned().collect(),
            )))
        }
        Value::Nil => Ok(Value::Nil),
        other => error(
            ErrorKind::Type,
            format!("vals not supported on: {}", other.type_tag()),
        ),
    }
}

pub fn empty(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    Ok(match &args[0] {
        Value::List(_) | Value::Cons(_) | Value::LazySeq(_) => {
            Value::List(PersistentList::empty())
        }
        Value::Vector(_) => Value::Vector(PersistentVector::empty()),
        Value::Map(_) => Value::Map(PersistentMap::empty()),
        Value::Set(_) => Value::Set(PersistentSet::empty()),
        _ => Value::Nil,
    })
}

pub fn reverse(env: &Env, args: &[Value]) -> EvalResult {
    let mut items = seqs::to_vec(env, &args[0])?;
    items.reverse();
    Ok(Value::List(PersistentList::from_vec(items)))
}

/// Destructuring support: a seq of alternating keys and values coerces
/// to a map; maps and nil pass through.
pub fn seq_to_map(env: &Env, args: &[Value]) -> EvalResult {
    match &args[0] {
        Value::Map(_) | Value::Nil => Ok(args[0].clone()),
        Value::List(_) | Value::Cons(_) | Value::LazySeq(_) => {
            let items = seqs::to_vec(env, &args[0])?;
            if items.is_empty() {
                return Ok(Value::Map(PersistentMap::empty()));
            }
            if items.len() % 2 != 0 {
                return error(
                    ErrorKind::Arity,
                    "no value supplied for key in keyword arguments",
                );
            }
            let pairs = items
                .chunks(2)
                .map(|c| (c[0].clone(), c[1].clone()))
                .collect();
            Ok(Value::Map(PersistentMap::from_pairs(pairs)))
        }
        other => Ok(other.clone()),
    }
}
