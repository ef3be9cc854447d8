//! Numeric tower: the arithmetic shared by the VM opcodes and the
//! builtin fns.
//!
//! Integers are 64-bit and checked; overflow is an arithmetic error, not
//! a silent wrap. Mixed int/float operations promote to float. `mod`
//! floors (sign follows the divisor), `rem` truncates (sign follows the
//! dividend).

use cljw_core::error::{error, ErrorKind, EvalResult, Failure};
use cljw_core::value::Value;
use std::cmp::Ordering;

fn num_type_error(op: &str, v: &Value) -> Failure {
    Failure::Error(cljw_core::error::CljError::new(
        ErrorKind::Type,
        format!("{}: expected a number, got {}", op, v.type_tag()),
    ))
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

pub fn add(a: &Value, b: &Value) -> EvalResult {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => match x.checked_add(*y) {
            Some(v) => Ok(Value::Int(v)),
            None => error(ErrorKind::Arithmetic, "integer overflow in +"),
        },
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Ok(Value::Float(x + y)),
            (None, _) => Err(num_type_error("+", a)),
            (_, None) => Err(num_type_error("+", b)),
        },
    }
}

pub fn sub(a: &Value, b: &Value) -> EvalResult {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => match x.checked_sub(*y) {
            Some(v) => Ok(Value::Int(v)),
            None => error(ErrorKind::Arithmetic, "integer overflow in -"),
        },
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Ok(Value::Float(x - y)),
            (None, _) => Err(num_type_error("-", a)),
            (_, None) => Err(num_type_error("-", b)),
        },
    }
}

pub fn mul(a: &Value, b: &Value) -> EvalResult {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => match x.checked_mul(*y) {
            Some(v) => Ok(Value::Int(v)),
            None => error(ErrorKind::Arithmetic, "integer overflow in *"),
        },
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Ok(Value::Float(x * y)),
            (None, _) => Err(num_type_error("*", a)),
            (_, None) => Err(num_type_error("*", b)),
        },
    }
}

/// Integer division yields an integer only when exact; `(/ 3 2)` promotes
/// to float because the value model carries no ratio variant.
pub fn div(a: &Value, b: &Value) -> EvalResult {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            if *y == 0 {
                return error(ErrorKind::Arithmetic, "divide by zero");
            }
            if x % y == 0 {
                Ok(Value::Int(x / y))
            } else {
                Ok(Value::Float(*x as f64 / *y as f64))
            }
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Ok(Value::Float(x / y)),
            (None, _) => Err(num_type_error("/", a)),
            (_, None) => Err(num_type_error("/", b)),
        },
    }
}

pub fn quot(a: &Value, b: &Value) -> EvalResult {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            if *y == 0 {
                return error(ErrorKind::Arithmetic, "divide by zero");
            }
            Ok(Value::Int(x.wrapping_div(*y)))
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Ok(Value::Float((x / y).trunc())),
            (None, _) => Err(num_type_error("quot", a)),
            (_, None) => Err(num_type_error("quot", b)),
        },
    }
}

/// Floored modulus: the result takes the divisor's sign.
pub fn modulo(a: &Value, b: &Value) -> EvalResult {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            if *y == 0 {
                return error(ErrorKind::Arithmetic, "divide by zero");
            }
            Ok(Value::Int(
                x.wrapping_rem(*y).wrapping_add(*y).wrapping_rem(*y),
            ))
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Ok(Value::Float(x - y * (x / y).floor())),
            (None, _) => Err(num_type_error("mod", a)),
            (_, None) => Err(num_type_error("mod", b)),
        },
    }
}

/// Truncated remainder: the result takes the dividend's sign.
pub fn remainder(a: &Value, b: &Value) -> EvalResult {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            if *y == 0 {
                return error(ErrorKind::Arithmetic, "divide by zero");
            }
            Ok(Value::Int(x.wrapping_rem(*y)))
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Ok(Value::Float(x % y)),
            (None, _) => Err(num_type_error("rem", a)),
            (_, None) => Err(num_type_error("rem", b)),
        },
    }
}

pub fn compare_numbers(op: &str, a: &Value, b: &Value) -> Result<Ordering, Failure> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y).unwrap_or(Ordering::Greater)),
            (None, _) => Err(num_type_error(op, a)),
            (_, None) => Err(num_type_error(op, b)),
        },
    }
}

/// Total ordering for `sort` and `compare`: nil sorts first, then
/// likewise-typed scalars and vectors. Mixed types are a type error, as
/// `compare` defines.
pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering, Failure> {
    match (a, b) {
        (Value::Nil, Value::Nil) => Ok(Ordering::Equal),
        (Value::Nil, _) => Ok(Ordering::Less),
        (_, Value::Nil) => Ok(Ordering::Greater),
        (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
        (Value::Int(_), Value::Int(_))
        | (Value::Int(_), Value::Float(_))
        | (Value::Float(_), Value::Int(_))
        | (Value::Float(_), Value::Float(_)) => compare_numbers("compare", a, b),
        (Value::Char(x), Value::Char(y)) => Ok(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::Keyword(x), Value::Keyword(y)) => {
            Ok((x.ns(), x.name()).cmp(&(y.ns(), y.name())))
        }
        (Value::Symbol(x), Value::Symbol(y)) => {
            Ok((x.ns.as_deref(), &*x.name).cmp(&(y.ns.as_deref(), &*y.name)))
        }
        (Value::Vector(x), Value::Vector(y)) => {
            for (xe, ye) in x.iter().zip(y.iter()) {
                match compare_values(xe, ye)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Ok(x.count().cmp(&y.count()))
        }
        _ => error(
            ErrorKind::Type,
            format!("can't compare {} with {}", a.type_tag(), b.type_tag()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_arithmetic() {
        assert_eq!(add(&Value::Int(2), &Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(mul(&Value::Int(4), &Value::Int(5)).unwrap(), Value::Int(20));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let err = add(&Value::Int(i64::MAX), &Value::Int(1)).unwrap_err();
        match err {
            Failure::Error(e) => assert_eq!(e.kind, ErrorKind::Arithmetic),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_mixed_promotes_to_float() {
        assert_eq!(
            add(&Value::Int(1), &Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn test_division() {
        assert_eq!(div(&Value::Int(4), &Value::Int(2)).unwrap(), Value::Int(2));
        assert_eq!(div(&Value::Int(3), &Value::Int(2)).unwrap(), Value::Float(1.5));
        assert!(div(&Value::Int(1), &Value::Int(0)).is_err());
        assert_eq!(
            div(&Value::Float(1.0), &Value::Float(0.0)).unwrap(),
            Value::Float(f64::INFINITY)
        );
    }

    #[test]
    fn test_mod_floors_rem_truncates() {
        assert_eq!(
            modulo(&Value::Int(-7), &Value::Int(3)).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            modulo(&Value::Int(7), &Value::Int(-3)).unwrap(),
            Value::Int(-2)
        );
        assert_eq!(
            remainder(&Value::Int(-7), &Value::Int(3)).unwrap(),
            Value::Int(-1)
        );
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(
            compare_values(&Value::Nil, &Value::Int(1)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::string("a"), &Value::string("b")).unwrap(),
            Ordering::Less
        );
        assert!(compare_values(&Value::Int(1), &Value::string("a")).is_err());
    }
}
