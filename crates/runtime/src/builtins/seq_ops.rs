//! Sequence builtins with teeth: lazy cells, the collapsing `filter`,
//! eager `reduce` with `reduced` short-circuiting, `apply` and sorting.
//! The rest of the seq library (map, take, iterate, …) is written in the
//! embedded core library on top of these.

use crate::seqs;
use cljw_core::env::Env;
use cljw_core::error::{error, CljError, ErrorKind, EvalResult, Failure};
use cljw_core::value::Value;
use std::rc::Rc;

/// `(lazy-seq body…)` lowers to `(__lazy-seq (fn [] body…))`.
pub fn lazy_seq(env: &Env, args: &[Value]) -> EvalResult {
    Ok(env.heap.alloc_lazy(args[0].clone()))
}

/// `filter` collapses towers of itself into one predicate chain: filter
/// over an unrealized filtered seq extends that seq's chain instead of
/// stacking a new thunk on top of it.
pub fn filter(env: &Env, args: &[Value]) -> EvalResult {
    let pred = args[0].clone();
    let coll = &args[1];
    if let Value::LazySeq(cell) = coll {
        if !cell.is_realized() {
            if let Some(chain) = cell.chain.borrow().clone() {
                let mut preds = chain.preds;
                preds.push(pred);
                return Ok(env.heap.alloc_lazy_chain(chain.source, preds));
            }
        }
    }
    Ok(env.heap.alloc_lazy_chain(coll.clone(), vec![pred]))
}

pub fn reduce(env: &Env, args: &[Value]) -> EvalResult {
    let f = &args[0];
    let (mut acc, coll) = match args.len() {
        2 => {
            let mut s = seqs::seq(env, &args[1])?;
            match s {
                Value::Nil => return env.call_fn(f, &[]),
                _ => {
                    let head = seqs::first(env, &s)?;
                    s = seqs::next_seq(env, &s)?;
                    (head, s)
                }
            }
        }
        _ => (args[1].clone(), seqs::seq(env, &args[2])?),
    };
    let mut s = coll;
    loop {
        if let Value::Reduced(inner) = &acc {
            return Ok((**inner).clone());
        }
        if matches!(s, Value::Nil) {
            return Ok(acc);
        }
        let head = seqs::first(env, &s)?;
        acc = env.call_fn(f, &[acc, head])?;
        s = seqs::next_seq(env, &s)?;
    }
}

pub fn reduced(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    Ok(Value::Reduced(Rc::new(args[0].clone())))
}

pub fn reduced_p(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    Ok(Value::Bool(matches!(args[0], Value::Reduced(_))))
}

/// `(apply f a b [c d])` — the last argument unrolls.
pub fn apply(env: &Env, args: &[Value]) -> EvalResult {
    let f = &args[0];
    let (fixed, spread) = args[1..].split_at(args.len() - 2);
    let mut call_args = fixed.to_vec();
    call_args.extend(seqs::to_vec(env, &spread[0])?);
    env.call_fn(f, &call_args)
}

fn comparator_ordering(env: &Env, comp: &Value, a: &Value, b: &Value) -> Result<std::cmp::Ordering, Failure> {
    use std::cmp::Ordering;
    match env.call_fn(comp, &[a.clone(), b.clone()])? {
        Value::Bool(true) => Ok(Ordering::Less),
        Value::Bool(false) => match env.call_fn(comp, &[b.clone(), a.clone()])? {
            Value::Bool(true) => Ok(Ordering::Greater),
            _ => Ok(Ordering::Equal),
        },
        Value::Int(i) => Ok(i.cmp(&0)),
        other => Err(Failure::Error(CljError::new(
            ErrorKind::Type,
            format!(
                "comparator must return a boolean or an integer, got {}",
                other.type_tag()
            ),
        ))),
    }
}

fn sort_with<F>(items: &mut [Value], mut cmp: F) -> Result<(), Failure>
where
    F: FnMut(&Value, &Value) -> Result<std::cmp::Ordering, Failure>,
{
    let mut first_err = None;
    items.sort_by(|a, b| {
        if first_err.is_some() {
            return std::cmp::Ordering::Equal;
        }
        match cmp(a, b) {
            Ok(ord) => ord,
            Err(e) => {
                first_err = Some(e);
                std::cmp::Ordering::Equal
            }
        }
    });
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

pub fn sort(env: &Env, args: &[Value]) -> EvalResult {
    let (comp, coll) = match args.len() {
        1 => (None, &args[0]),
        _ => (Some(&args[0]), &args[1]),
    };
    let mut items = seqs::to_vec(env, coll)?;
    match comp {
        None => sort_with(&mut items, |a, b| crate::numeric::compare_values(a, b))?,
        Some(comp) => sort_with(&mut items, |a, b| comparator_ordering(env, comp, a, b))?,
    }
    Ok(Value::List(cljw_core::collections::PersistentList::from_vec(
        items,
    )))
}

pub fn sort_by(env: &Env, args: &[Value]) -> EvalResult {
    let keyfn = &args[0];
    let (comp, coll) = match args.len() {
        2 => (None, &args[1]),
        _ => (Some(&args[1]), &args[2]),
    };
    let mut items = seqs::to_vec(env, coll)?;
    match comp {
        None => sort_with(&mut items, |a, b| {
            let ka = env.call_fn(keyfn, std::slice::from_ref(a))?;
            let kb = env.call_fn(keyfn, std::slice::from_ref(b))?;
            crate::numeric::compare_values(&ka, &kb)
        })?,
        Some(comp) => sort_with(&mut items, |a, b| {
            let ka = env.call_fn(keyfn, std::slice::from_ref(a))?;
            let kb = env.call_fn(keyfn, std::slice::from_ref(b))?;
            comparator_ordering(env, comp, &ka, &kb)
        })?,
    }
    Ok(Value::List(cljw_core::collections::PersistentList::from_vec(
        items,
    )))
}

/// `(group-by f coll)` keeps first-seen group order.
pub fn group_by(env: &Env, args: &[Value]) -> EvalResult {
    let f = &args[0];
    let items = seqs::to_vec(env, &args[1])?;
    let mut out = cljw_core::collections::PersistentMap::empty();
    for item in items {
        let key = env.call_fn(f, std::slice::from_ref(&item))?;
        let bucket = match out.get(&key) {
            Some(Value::Vector(v)) => v.conj(item),
            _ => cljw_core::collections::PersistentVector::from_vec(vec![item]),
        };
        out = out.assoc(key, Value::Vector(bucket));
    }
    Ok(Value::Map(out))
}

pub fn realized_p(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::LazySeq(cell) => Ok(Value::Bool(cell.is_realized())),
        Value::Delay(cell) => Ok(Value::Bool(cell.cached.borrow().is_some())),
        other => error(
            ErrorKind::Type,
            format!("realized? not supported on: {}", other.type_tag()),
        ),
    }
}
