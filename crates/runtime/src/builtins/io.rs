//! Printing, file I/O, evaluation and the emulated host-class builtins.
//!
//! Side-effecting printers flush in call order; the evaluator never
//! reorders them.

use crate::seqs;
use cljw_core::env::Env;
use cljw_core::error::{error, CljError, ErrorKind, EvalResult, Failure};
use cljw_core::printer::{display_str, pr_str};
use cljw_core::value::Value;
use cljw_compiler::Reader;
use std::io::Write;

fn print_joined(env: &Env, args: &[Value], readable: bool) -> Result<String, Failure> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        let realized = seqs::realize_deep(env, arg)?;
        parts.push(if readable {
            pr_str(&realized)
        } else {
            display_str(&realized)
        });
    }
    Ok(parts.join(" "))
}

fn write_stdout(text: &str, newline: bool) -> EvalResult {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = if newline {
        writeln!(out, "{}", text)
    } else {
        write!(out, "{}", text)
    };
    result
        .and_then(|_| out.flush())
        .map_err(|e| Failure::Error(CljError::new(ErrorKind::Io, format!("stdout: {}", e))))?;
    Ok(Value::Nil)
}

pub fn print(env: &Env, args: &[Value]) -> EvalResult {
    write_stdout(&print_joined(env, args, false)?, false)
}

pub fn println(env: &Env, args: &[Value]) -> EvalResult {
    write_stdout(&print_joined(env, args, false)?, true)
}

pub fn pr(env: &Env, args: &[Value]) -> EvalResult {
    write_stdout(&print_joined(env, args, true)?, false)
}

pub fn prn(env: &Env, args: &[Value]) -> EvalResult {
    write_stdout(&print_joined(env, args, true)?, true)
}

pub fn newline(env: &Env, args: &[Value]) -> EvalResult {
    let _ = (env, args);
    write_stdout("", true)
}

pub fn pr_str_b(env: &Env, args: &[Value]) -> EvalResult {
    Ok(Value::string(print_joined(env, args, true)?))
}

pub fn print_str_b(env: &Env, args: &[Value]) -> EvalResult {
    Ok(Value::string(print_joined(env, args, false)?))
}

pub fn slurp(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Str(path) = &args[0] else {
        return error(ErrorKind::Type, "slurp expects a path string");
    };
    match std::fs::read_to_string(&**path) {
        Ok(content) => Ok(Value::string(content)),
        Err(e) => error(ErrorKind::Io, format!("slurp {}: {}", path, e)),
    }
}

pub fn spit(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Str(path) = &args[0] else {
        return error(ErrorKind::Type, "spit expects a path string");
    };
    let content = display_str(&args[1]);
    match std::fs::write(&**path, content) {
        Ok(()) => Ok(Value::Nil),
        Err(e) => error(ErrorKind::Io, format!("spit {}: {}", path, e)),
    }
}

pub fn read_string(env: &Env, args: &[Value]) -> EvalResult {
    let Value::Str(src) = &args[0] else {
        return error(ErrorKind::Type, "read-string expects a string");
    };
    let mut reader = Reader::new(src, env, None);
    reader
        .read_next()
        .map_err(Failure::Error)
        .map(|form| form.unwrap_or(Value::Nil))
}

pub fn eval(env: &Env, args: &[Value]) -> EvalResult {
    env.eval_form_via_bridge(&args[0])
}

pub fn load_file(env: &Env, args: &[Value]) -> EvalResult {
    let Value::Str(path) = &args[0] else {
        return error(ErrorKind::Type, "load-file expects a path string");
    };
    crate::namespaces::load_path(env, std::path::Path::new(&**path))
}

pub fn require(env: &Env, args: &[Value]) -> EvalResult {
    crate::namespaces::require(env, args)
}

pub fn in_ns(env: &Env, args: &[Value]) -> EvalResult {
    let Value::Symbol(sym) = &args[0] else {
        return error(ErrorKind::Type, "in-ns expects a symbol");
    };
    let ns = env.ns_or_create(&sym.name);
    env.set_current_ns(ns);
    crate::namespaces::sync_ns_var(env);
    Ok(args[0].clone())
}

// --- emulated host classes -----------------------------------------------

pub fn abs(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(i.wrapping_abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => error(
            ErrorKind::Type,
            format!("abs: expected a number, got {}", other.type_tag()),
        ),
    }
}

fn unary_float(name: &str, args: &[Value], f: fn(f64) -> f64) -> EvalResult {
    match &args[0] {
        Value::Int(i) => Ok(Value::Float(f(*i as f64))),
        Value::Float(x) => Ok(Value::Float(f(*x))),
        other => error(
            ErrorKind::Type,
            format!("{}: expected a number, got {}", name, other.type_tag()),
        ),
    }
}

pub fn floor(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    unary_float("floor", args, f64::floor)
}

pub fn ceil(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    unary_float("ceil", args, f64::ceil)
}

pub fn sqrt(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    unary_float("sqrt", args, f64::sqrt)
}

pub fn pow(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let to_f = |v: &Value| match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    };
    match (to_f(&args[0]), to_f(&args[1])) {
        (Some(a), Some(b)) => Ok(Value::Float(a.powf(b))),
        _ => error(ErrorKind::Type, "pow: expected numbers"),
    }
}

pub fn getenv(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Str(key) = &args[0] else {
        return error(ErrorKind::Type, "getenv expects a string");
    };
    Ok(std::env::var(&**key)
        .map(Value::string)
        .unwrap_or(Value::Nil))
}

pub fn nano_time(env: &Env, args: &[Value]) -> EvalResult {
    let _ = (env, args);
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    Ok(Value::Int(now.as_nanos() as i64))
}

pub fn current_time_millis(env: &Env, args: &[Value]) -> EvalResult {
    let _ = (env, args);
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    Ok(Value::Int(now.as_millis() as i64))
}

pub fn exit(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let code = match args.first() {
        Some(Value::Int(i)) => *i as i32,
        _ => 0,
    };
    std::process::exit(code);
}

pub fn parse_int(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Str(s) = &args[0] else {
        return error(ErrorKind::Type, "parseInt expects a string");
    };
    match s.trim().parse::<i64>() {
        Ok(i) => Ok(Value::Int(i)),
        Err(_) => error(ErrorKind::Number, format!("invalid integer: {:?}", s)),
    }
}
