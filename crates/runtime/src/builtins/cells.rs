//! Mutable cells: atoms, volatiles, delays.
//!
//! `swap!` is apply-then-install: the update fn runs outside the cell's
//! borrow, and the result installs only if the cell still holds the value
//! the fn was applied to; a reentrant swap through the applied fn makes
//! the outer swap retry against the fresh value.

use cljw_core::env::Env;
use cljw_core::error::{error, ErrorKind, EvalResult};
use cljw_core::value::{eql, Value};

pub fn atom(env: &Env, args: &[Value]) -> EvalResult {
    Ok(env.heap.alloc_atom(args[0].clone(), None))
}

pub fn deref(env: &Env, args: &[Value]) -> EvalResult {
    match &args[0] {
        Value::Atom(cell) => Ok(cell.value.borrow().clone()),
        Value::Volatile(cell) => Ok(cell.value.borrow().clone()),
        Value::Delay(_) => force(env, args),
        Value::Var(var) => var.deref().map_err(Into::into),
        other => error(
            ErrorKind::Type,
            format!("deref not supported on: {}", other.type_tag()),
        ),
    }
}

pub fn reset(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Atom(cell) => {
            *cell.value.borrow_mut() = args[1].clone();
            Ok(args[1].clone())
        }
        other => error(
            ErrorKind::Type,
            format!("reset! expects an atom, got {}", other.type_tag()),
        ),
    }
}

pub fn swap(env: &Env, args: &[Value]) -> EvalResult {
    let Value::Atom(cell) = &args[0] else {
        return error(
            ErrorKind::Type,
            format!("swap! expects an atom, got {}", args[0].type_tag()),
        );
    };
    let f = &args[1];
    loop {
        let current = cell.value.borrow().clone();
        let mut call_args = Vec::with_capacity(args.len() - 1);
        call_args.push(current.clone());
        call_args.extend_from_slice(&args[2..]);
        let next = env.call_fn(f, &call_args)?;
        let mut slot = cell.value.borrow_mut();
        if eql(&slot, &current) {
            *slot = next.clone();
            return Ok(next);
        }
        // the fn touched this atom reentrantly; rebuild from the latest
    }
}

pub fn compare_and_set(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Atom(cell) = &args[0] else {
        return error(
            ErrorKind::Type,
            format!("compare-and-set! expects an atom, got {}", args[0].type_tag()),
        );
    };
    let mut slot = cell.value.borrow_mut();
    if eql(&slot, &args[1]) {
        *slot = args[2].clone();
        Ok(Value::Bool(true))
    } else {
        Ok(Value::Bool(false))
    }
}

pub fn volatile(env: &Env, args: &[Value]) -> EvalResult {
    Ok(env.heap.alloc_volatile(args[0].clone()))
}

pub fn vreset(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Volatile(cell) => {
            *cell.value.borrow_mut() = args[1].clone();
            Ok(args[1].clone())
        }
        other => error(
            ErrorKind::Type,
            format!("vreset! expects a volatile, got {}", other.type_tag()),
        ),
    }
}

pub fn vswap(env: &Env, args: &[Value]) -> EvalResult {
    let Value::Volatile(cell) = &args[0] else {
        return error(
            ErrorKind::Type,
            format!("vswap! expects a volatile, got {}", args[0].type_tag()),
        );
    };
    let current = cell.value.borrow().clone();
    let mut call_args = Vec::with_capacity(args.len() - 1);
    call_args.push(current);
    call_args.extend_from_slice(&args[2..]);
    let next = env.call_fn(&args[1], &call_args)?;
    *cell.value.borrow_mut() = next.clone();
    Ok(next)
}

/// `(delay body…)` lowers to `(__delay (fn [] body…))`.
pub fn delay(env: &Env, args: &[Value]) -> EvalResult {
    Ok(env.heap.alloc_delay(args[0].clone()))
}

/// Realize at most once; the thunk survives a failed force so it can be
/// retried.
pub fn force(env: &Env, args: &[Value]) -> EvalResult {
    let Value::Delay(cell) = &args[0] else {
        // force on a non-delay returns it unchanged
        return Ok(args[0].clone());
    };
    if let Some(cached) = cell.cached.borrow().clone() {
        return Ok(cached);
    }
    let thunk = cell.thunk.borrow_mut().take();
    match thunk {
        Some(thunk) => match env.call_fn(&thunk, &[]) {
            Ok(v) => {
                *cell.cached.borrow_mut() = Some(v.clone());
                Ok(v)
            }
            Err(e) => {
                *cell.thunk.borrow_mut() = Some(thunk);
                Err(e)
            }
        },
        None => Ok(Value::Nil),
    }
}
