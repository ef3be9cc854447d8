//! Regex builtins over read-time compiled patterns.
//!
//! Matching rides the `regex` crate; the Clojure surface is the return
//! shape: nil on no match, the whole match as a string when the pattern
//! has no groups, and a `[whole g1 …]` vector when it does.

use cljw_core::env::Env;
use cljw_core::error::{error, ErrorKind, EvalResult};
use cljw_core::value::{RegexPattern, Value};
use std::rc::Rc;

fn pattern_of(v: &Value) -> Option<&Rc<RegexPattern>> {
    match v {
        Value::Regex(p) => Some(p),
        _ => None,
    }
}

fn match_value(caps: regex::Captures<'_>) -> Value {
    if caps.len() == 1 {
        return Value::string(caps.get(0).map(|m| m.as_str()).unwrap_or(""));
    }
    let groups: Vec<Value> = caps
        .iter()
        .map(|g| match g {
            Some(m) => Value::string(m.as_str()),
            None => Value::Nil,
        })
        .collect();
    Value::vector(groups)
}

pub fn re_pattern(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Regex(_) => Ok(args[0].clone()),
        Value::Str(s) => {
            let regex = regex::Regex::new(s).map_err(|e| {
                cljw_core::error::CljError::new(
                    ErrorKind::Value,
                    format!("invalid regex: {}", e),
                )
            })?;
            Ok(Value::Regex(Rc::new(RegexPattern {
                source: s.to_string(),
                regex,
            })))
        }
        other => error(
            ErrorKind::Type,
            format!("re-pattern expects a string, got {}", other.type_tag()),
        ),
    }
}

pub fn re_find(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Some(p) = pattern_of(&args[0]) else {
        return error(ErrorKind::Type, "re-find expects a regex");
    };
    let Value::Str(s) = &args[1] else {
        return error(ErrorKind::Type, "re-find expects a string");
    };
    Ok(p.regex
        .captures(s)
        .map(match_value)
        .unwrap_or(Value::Nil))
}

/// Anchored: the whole string must match.
pub fn re_matches(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Some(p) = pattern_of(&args[0]) else {
        return error(ErrorKind::Type, "re-matches expects a regex");
    };
    let Value::Str(s) = &args[1] else {
        return error(ErrorKind::Type, "re-matches expects a string");
    };
    match p.regex.captures(s) {
        Some(caps) if caps.get(0).map(|m| m.as_str().len()) == Some(s.len()) => {
            Ok(match_value(caps))
        }
        _ => Ok(Value::Nil),
    }
}

/// Every non-overlapping match, as a list.
pub fn re_seq(env: &Env, args: &[Value]) -> EvalResult {
    let Some(p) = pattern_of(&args[0]) else {
        return error(ErrorKind::Type, "re-seq expects a regex");
    };
    let Value::Str(s) = &args[1] else {
        return error(ErrorKind::Type, "re-seq expects a string");
    };
    let matches: Vec<Value> = p.regex.captures_iter(s).map(match_value).collect();
    if matches.is_empty() {
        return Ok(Value::Nil);
    }
    env.heap.note_alloc(16 * matches.len());
    Ok(Value::List(cljw_core::collections::PersistentList::from_vec(
        matches,
    )))
}

pub fn re_replace(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Str(s) = &args[0] else {
        return error(ErrorKind::Type, "replace expects a string");
    };
    let Some(p) = pattern_of(&args[1]) else {
        return error(ErrorKind::Type, "replace expects a regex");
    };
    let Value::Str(replacement) = &args[2] else {
        return error(ErrorKind::Type, "replace expects a replacement string");
    };
    Ok(Value::string(
        p.regex.replace_all(s, replacement.as_ref()).to_string(),
    ))
}
