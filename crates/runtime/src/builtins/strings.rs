//! String, symbol and keyword builtins.

use crate::seqs;
use cljw_core::env::Env;
use cljw_core::error::{error, ErrorKind, EvalResult};
use cljw_core::printer::display_str;
use cljw_core::symbol::{Keyword, Symbol};
use cljw_core::value::Value;
use std::rc::Rc;

/// Variadic `str`: display renditions concatenated; lazy structures
/// realize first so sequences print as their elements.
pub fn str(env: &Env, args: &[Value]) -> EvalResult {
    let mut out = String::new();
    for arg in args {
        let realized = seqs::realize_deep(env, arg)?;
        out.push_str(&display_str(&realized));
    }
    env.heap.note_alloc(out.len());
    Ok(Value::string(out))
}

pub fn subs(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Str(s) = &args[0] else {
        return error(ErrorKind::Type, "subs expects a string");
    };
    let chars: Vec<char> = s.chars().collect();
    let Value::Int(start) = &args[1] else {
        return error(ErrorKind::Type, "subs expects integer bounds");
    };
    let end = match args.get(2) {
        Some(Value::Int(e)) => *e as usize,
        None => chars.len(),
        Some(other) => {
            return error(
                ErrorKind::Type,
                format!("subs end must be an integer, got {}", other.type_tag()),
            );
        }
    };
    let start = *start as usize;
    if start > end || end > chars.len() {
        return error(
            ErrorKind::Index,
            format!("subs bounds [{} {}) out of range", start, end),
        );
    }
    Ok(Value::string(chars[start..end].iter().collect::<String>()))
}

pub fn name(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Keyword(k) => Ok(Value::string(k.name())),
        Value::Symbol(s) => Ok(Value::string(&*s.name)),
        Value::Str(_) => Ok(args[0].clone()),
        other => error(
            ErrorKind::Type,
            format!("name not supported on: {}", other.type_tag()),
        ),
    }
}

pub fn namespace(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Keyword(k) => Ok(k.ns().map(Value::string).unwrap_or(Value::Nil)),
        Value::Symbol(s) => Ok(s
            .ns
            .as_deref()
            .map(Value::string)
            .unwrap_or(Value::Nil)),
        other => error(
            ErrorKind::Type,
            format!("namespace not supported on: {}", other.type_tag()),
        ),
    }
}

pub fn keyword(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match args.len() {
        1 => match &args[0] {
            Value::Str(s) => Ok(Value::Keyword(Keyword::parse(s))),
            Value::Keyword(_) => Ok(args[0].clone()),
            Value::Symbol(s) => Ok(Value::Keyword(Keyword::intern(
                s.ns.as_deref(),
                &s.name,
            ))),
            _ => Ok(Value::Nil),
        },
        _ => match (&args[0], &args[1]) {
            (Value::Str(ns), Value::Str(n)) => {
                Ok(Value::Keyword(Keyword::intern(Some(ns), n)))
            }
            _ => error(ErrorKind::Type, "keyword expects string arguments"),
        },
    }
}

pub fn symbol(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match args.len() {
        1 => match &args[0] {
            Value::Str(s) => Ok(Value::symbol(Symbol::parse(s))),
            Value::Symbol(_) => Ok(args[0].clone()),
            Value::Keyword(k) => Ok(Value::Symbol(Rc::new(match k.ns() {
                Some(ns) => Symbol::qualified(ns, k.name()),
                None => Symbol::simple(k.name()),
            }))),
            other => error(
                ErrorKind::Type,
                format!("symbol not supported on: {}", other.type_tag()),
            ),
        },
        _ => match (&args[0], &args[1]) {
            (Value::Str(ns), Value::Str(n)) => Ok(Value::symbol(Symbol::qualified(ns, n))),
            _ => error(ErrorKind::Type, "symbol expects string arguments"),
        },
    }
}

pub fn gensym(env: &Env, args: &[Value]) -> EvalResult {
    let prefix = match args.first() {
        Some(Value::Str(s)) => s.to_string(),
        _ => "G__".to_string(),
    };
    Ok(Value::symbol(Symbol::simple(&format!(
        "{}{}",
        prefix,
        env.next_gensym()
    ))))
}

pub fn string_split(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let (Value::Str(s), Value::Regex(p)) = (&args[0], &args[1]) else {
        return error(ErrorKind::Type, "split expects a string and a regex");
    };
    let parts: Vec<Value> = p
        .regex
        .split(s)
        .map(|part| Value::string(part.to_string()))
        .collect();
    Ok(Value::vector(parts))
}

pub fn string_join(env: &Env, args: &[Value]) -> EvalResult {
    let (sep, coll) = match args.len() {
        1 => (String::new(), &args[0]),
        _ => (display_str(&args[0]), &args[1]),
    };
    let items = seqs::to_vec(env, coll)?;
    let rendered: Vec<String> = items.iter().map(display_str).collect();
    Ok(Value::string(rendered.join(&sep)))
}

pub fn upper_case(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Str(s) => Ok(Value::string(s.to_uppercase())),
        other => error(
            ErrorKind::Type,
            format!("upper-case expects a string, got {}", other.type_tag()),
        ),
    }
}

pub fn lower_case(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Str(s) => Ok(Value::string(s.to_lowercase())),
        other => error(
            ErrorKind::Type,
            format!("lower-case expects a string, got {}", other.type_tag()),
        ),
    }
}

pub fn trim(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Str(s) => Ok(Value::string(s.trim())),
        other => error(
            ErrorKind::Type,
            format!("trim expects a string, got {}", other.type_tag()),
        ),
    }
}
