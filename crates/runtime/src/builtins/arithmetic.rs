//! Arithmetic and comparison builtins.
//!
//! The binary cores live in `numeric`; these wrappers add the variadic
//! Clojure surface. The emitter inlines calls to the intrinsic-flagged
//! entries as direct opcodes with the same identities, so both paths
//! agree by construction.

use crate::interp::values_equal;
use crate::numeric;
use cljw_core::env::Env;
use cljw_core::error::{error, ErrorKind, EvalResult};
use cljw_core::value::Value;
use std::cmp::Ordering;

pub fn add(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let mut acc = Value::Int(0);
    for arg in args {
        acc = numeric::add(&acc, arg)?;
    }
    Ok(acc)
}

pub fn sub(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    if args.len() == 1 {
        return numeric::sub(&Value::Int(0), &args[0]);
    }
    let mut acc = args[0].clone();
    for arg in &args[1..] {
        acc = numeric::sub(&acc, arg)?;
    }
    Ok(acc)
}

pub fn mul(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let mut acc = Value::Int(1);
    for arg in args {
        acc = numeric::mul(&acc, arg)?;
    }
    Ok(acc)
}

pub fn div(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    if args.len() == 1 {
        return numeric::div(&Value::Float(1.0), &args[0]);
    }
    let mut acc = args[0].clone();
    for arg in &args[1..] {
        acc = numeric::div(&acc, arg)?;
    }
    Ok(acc)
}

pub fn quot(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    numeric::quot(&args[0], &args[1])
}

pub fn modulo(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    numeric::modulo(&args[0], &args[1])
}

pub fn remainder(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    numeric::remainder(&args[0], &args[1])
}

pub fn inc(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    numeric::add(&args[0], &Value::Int(1))
}

pub fn dec(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    numeric::sub(&args[0], &Value::Int(1))
}

fn chain(
    op: &'static str,
    args: &[Value],
    pred: fn(Ordering) -> bool,
) -> EvalResult {
    for pair in args.windows(2) {
        let ord = numeric::compare_numbers(op, &pair[0], &pair[1])?;
        if !pred(ord) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

pub fn lt(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    chain("<", args, |o| o == Ordering::Less)
}

pub fn le(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    chain("<=", args, |o| o != Ordering::Greater)
}

pub fn gt(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    chain(">", args, |o| o == Ordering::Greater)
}

pub fn ge(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    chain(">=", args, |o| o != Ordering::Less)
}

pub fn eq(env: &Env, args: &[Value]) -> EvalResult {
    for pair in args.windows(2) {
        if !values_equal(env, &pair[0], &pair[1])? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

pub fn not_eq(env: &Env, args: &[Value]) -> EvalResult {
    match eq(env, args)? {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        _ => Ok(Value::Bool(false)),
    }
}

pub fn min(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let mut best = args[0].clone();
    for arg in &args[1..] {
        if numeric::compare_numbers("min", arg, &best)? == Ordering::Less {
            best = arg.clone();
        }
    }
    Ok(best)
}

pub fn max(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let mut best = args[0].clone();
    for arg in &args[1..] {
        if numeric::compare_numbers("max", arg, &best)? == Ordering::Greater {
            best = arg.clone();
        }
    }
    Ok(best)
}

pub fn zero_p(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    Ok(Value::Bool(
        numeric::compare_numbers("zero?", &args[0], &Value::Int(0))? == Ordering::Equal,
    ))
}

pub fn pos_p(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    Ok(Value::Bool(
        numeric::compare_numbers("pos?", &args[0], &Value::Int(0))? == Ordering::Greater,
    ))
}

pub fn neg_p(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    Ok(Value::Bool(
        numeric::compare_numbers("neg?", &args[0], &Value::Int(0))? == Ordering::Less,
    ))
}

pub fn even_p(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Int(i) => Ok(Value::Bool(i % 2 == 0)),
        other => error(
            ErrorKind::Type,
            format!("even?: expected an integer, got {}", other.type_tag()),
        ),
    }
}

pub fn odd_p(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Int(i) => Ok(Value::Bool(i % 2 != 0)),
        other => error(
            ErrorKind::Type,
            format!("odd?: expected an integer, got {}", other.type_tag()),
        ),
    }
}

pub fn compare(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let ord = numeric::compare_values(&args[0], &args[1])?;
    Ok(Value::Int(match ord {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}

// --- coercions -----------------------------------------------------------

pub fn to_int(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => Ok(Value::Int(*f as i64)),
        Value::Char(c) => Ok(Value::Int(*c as i64)),
        other => error(
            ErrorKind::Type,
            format!("int: can't coerce {}", other.type_tag()),
        ),
    }
}

pub fn to_double(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        other => error(
            ErrorKind::Type,
            format!("double: can't coerce {}", other.type_tag()),
        ),
    }
}

pub fn to_char(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Char(c) => Ok(Value::Char(*c)),
        Value::Int(i) => match u32::try_from(*i).ok().and_then(char::from_u32) {
            Some(c) => Ok(Value::Char(c)),
            None => error(ErrorKind::Value, format!("char: invalid code point {}", i)),
        },
        other => error(
            ErrorKind::Type,
            format!("char: can't coerce {}", other.type_tag()),
        ),
    }
}

pub fn to_boolean(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    Ok(Value::Bool(args[0].is_truthy()))
}
