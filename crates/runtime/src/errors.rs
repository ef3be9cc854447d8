//! User-exception plumbing: `ex-info` values and catch-class matching.
//!
//! Thrown values are ordinary Values. `ex-info` produces a marker map the
//! accessors and `catch ExceptionInfo` recognize. The emulated class set
//! is deliberately tiny: `Exception`/`Throwable`/`Object` match any user
//! throw, `ExceptionInfo` matches `ex-info` maps, anything else matches
//! nothing. Engine errors never reach a catch clause at all.

use cljw_core::collections::PersistentMap;
use cljw_core::value::Value;

pub const EX_INFO_MARKER: &str = "__ex_info";

pub fn is_ex_info(v: &Value) -> bool {
    match v {
        Value::Map(m) => m.contains_key(&Value::keyword(EX_INFO_MARKER)),
        _ => false,
    }
}

pub fn ex_info_value(message: Value, data: Value) -> Value {
    Value::Map(PersistentMap::from_pairs(vec![
        (Value::keyword(EX_INFO_MARKER), Value::Bool(true)),
        (Value::keyword("message"), message),
        (Value::keyword("data"), data),
    ]))
}

pub fn ex_message(v: &Value) -> Value {
    match v {
        Value::Map(m) if is_ex_info(v) => {
            m.get(&Value::keyword("message")).cloned().unwrap_or(Value::Nil)
        }
        Value::Str(_) => v.clone(),
        _ => Value::Nil,
    }
}

pub fn ex_data(v: &Value) -> Value {
    match v {
        Value::Map(m) if is_ex_info(v) => {
            m.get(&Value::keyword("data")).cloned().unwrap_or(Value::Nil)
        }
        _ => Value::Nil,
    }
}

/// Catch-clause matching by class symbol name.
pub fn catch_matches(class_name: &str, thrown: &Value) -> bool {
    match class_name {
        "Exception" | "Throwable" | "Object" => true,
        "ExceptionInfo" => is_ex_info(thrown),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ex_info_round_trip() {
        let ex = ex_info_value(Value::string("boom"), Value::keyword("cause"));
        assert!(is_ex_info(&ex));
        assert_eq!(ex_message(&ex), Value::string("boom"));
        assert_eq!(ex_data(&ex), Value::keyword("cause"));
    }

    #[test]
    fn test_catch_matching() {
        let ex = ex_info_value(Value::string("x"), Value::Nil);
        assert!(catch_matches("Exception", &Value::Int(1)));
        assert!(catch_matches("ExceptionInfo", &ex));
        assert!(!catch_matches("ExceptionInfo", &Value::Int(1)));
        assert!(!catch_matches("IllegalStateException", &ex));
    }
}
