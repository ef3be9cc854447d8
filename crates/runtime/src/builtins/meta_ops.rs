//! Metadata, vars, types, hierarchies, multimethods, protocols and the
//! exception accessors.

use crate::errors;
use crate::interp::protocol_type_key;
use cljw_core::collections::Key;
use cljw_core::env::Env;
use cljw_core::error::{error, CljError, ErrorKind, EvalResult, Failure};
use cljw_core::printer::pr_str;
use cljw_core::value::{identical, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

pub fn meta(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    Ok(args[0].meta().map(Value::Map).unwrap_or(Value::Nil))
}

pub fn with_meta(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let meta = match &args[1] {
        Value::Map(m) => Some(m.clone()),
        Value::Nil => None,
        other => {
            return error(
                ErrorKind::Type,
                format!("meta must be a map, got {}", other.type_tag()),
            );
        }
    };
    args[0].with_meta(meta).ok_or_else(|| {
        CljError::new(
            ErrorKind::Type,
            format!("with-meta not supported on: {}", args[0].type_tag()),
        )
        .into()
    })
}

pub fn alter_meta(env: &Env, args: &[Value]) -> EvalResult {
    let Value::Var(var) = &args[0] else {
        return error(ErrorKind::Type, "alter-meta! expects a var");
    };
    let current = var
        .meta
        .borrow()
        .clone()
        .map(Value::Map)
        .unwrap_or(Value::Nil);
    let mut call_args = vec![current];
    call_args.extend_from_slice(&args[2..]);
    let next = env.call_fn(&args[1], &call_args)?;
    match next {
        Value::Map(m) => {
            *var.meta.borrow_mut() = Some(m.clone());
            Ok(Value::Map(m))
        }
        Value::Nil => {
            *var.meta.borrow_mut() = None;
            Ok(Value::Nil)
        }
        other => error(
            ErrorKind::Type,
            format!("alter-meta! fn must return a map, got {}", other.type_tag()),
        ),
    }
}

pub fn type_of(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    Ok(protocol_type_key(&args[0]))
}

pub fn identical_p(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    Ok(Value::Bool(identical(&args[0], &args[1])))
}

pub fn hash(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let mut h = DefaultHasher::new();
    cljw_core::value::hash_value(&args[0], &mut h);
    Ok(Value::Int(h.finish() as i64))
}

// --- vars ----------------------------------------------------------------

/// Runtime var lookup, used for deferred `#'sym` references.
pub fn var_lookup(env: &Env, args: &[Value]) -> EvalResult {
    let Value::Symbol(sym) = &args[0] else {
        return error(ErrorKind::Type, "__var expects a symbol");
    };
    env.resolve(sym).map(Value::Var).map_err(Into::into)
}

pub fn bound_p(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Var(var) = &args[0] else {
        return error(ErrorKind::Type, "bound? expects a var");
    };
    Ok(Value::Bool(var.is_bound()))
}

pub fn var_get(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Var(var) = &args[0] else {
        return error(ErrorKind::Type, "var-get expects a var");
    };
    var.deref().map_err(Into::into)
}

/// `set!` support for compiled code.
pub fn set_var(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Var(var) = &args[0] else {
        return error(ErrorKind::Type, "__set-var expects a var");
    };
    var.set_binding(args[1].clone()).map_err(Failure::Error)?;
    Ok(args[1].clone())
}

pub fn push_binding(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Var(var) = &args[0] else {
        return error(ErrorKind::Type, "__push-binding expects a var");
    };
    var.push_binding(args[1].clone()).map_err(Failure::Error)?;
    Ok(Value::Nil)
}

pub fn pop_binding(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Var(var) = &args[0] else {
        return error(ErrorKind::Type, "__pop-binding expects a var");
    };
    var.pop_binding();
    Ok(Value::Nil)
}

// --- hierarchies ---------------------------------------------------------

pub fn derive(env: &Env, args: &[Value]) -> EvalResult {
    env.add_parent(args[0].clone(), args[1].clone());
    Ok(Value::Nil)
}

pub fn isa_p(env: &Env, args: &[Value]) -> EvalResult {
    Ok(Value::Bool(env.is_a(&args[0], &args[1])))
}

// --- multimethods --------------------------------------------------------

pub fn defmulti(env: &Env, args: &[Value]) -> EvalResult {
    let Value::Str(name) = &args[0] else {
        return error(ErrorKind::Internal, "__defmulti expects a name string");
    };
    Ok(env.heap.alloc_multifn(
        name.clone(),
        args[1].clone(),
        Value::keyword("default"),
    ))
}

pub fn defmethod(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::MultiFn(m) = &args[0] else {
        return error(
            ErrorKind::Type,
            format!("defmethod expects a multimethod, got {}", args[0].type_tag()),
        );
    };
    m.methods
        .borrow_mut()
        .insert(Key(args[1].clone()), args[2].clone());
    Ok(args[0].clone())
}

pub fn remove_method(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::MultiFn(m) = &args[0] else {
        return error(ErrorKind::Type, "remove-method expects a multimethod");
    };
    m.methods.borrow_mut().shift_remove(&Key(args[1].clone()));
    Ok(args[0].clone())
}

pub fn prefer_method(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::MultiFn(m) = &args[0] else {
        return error(ErrorKind::Type, "prefer-method expects a multimethod");
    };
    m.prefers
        .borrow_mut()
        .push((args[1].clone(), args[2].clone()));
    Ok(args[0].clone())
}

pub fn methods(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::MultiFn(m) = &args[0] else {
        return error(ErrorKind::Type, "methods expects a multimethod");
    };
    let pairs: Vec<(Value, Value)> = m
        .methods
        .borrow()
        .iter()
        .map(|(k, v)| (k.0.clone(), v.clone()))
        .collect();
    Ok(Value::Map(cljw_core::collections::PersistentMap::from_pairs(
        pairs,
    )))
}

// --- protocols -----------------------------------------------------------

pub fn defprotocol(env: &Env, args: &[Value]) -> EvalResult {
    let Value::Str(name) = &args[0] else {
        return error(ErrorKind::Internal, "__defprotocol expects a name string");
    };
    let Value::Map(sigs) = &args[1] else {
        return error(ErrorKind::Internal, "__defprotocol expects a signature map");
    };
    Ok(env.heap.alloc_protocol(name.clone(), sigs.clone()))
}

pub fn protocol_fn(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Protocol(p) = &args[0] else {
        return error(ErrorKind::Type, "__protocol-fn expects a protocol");
    };
    let Value::Str(method) = &args[1] else {
        return error(ErrorKind::Internal, "__protocol-fn expects a method name");
    };
    Ok(Value::ProtocolFn(std::rc::Rc::new(
        cljw_core::value::ProtocolFnRef {
            protocol: p.clone(),
            method: method.clone().into(),
        },
    )))
}

pub fn extend_type(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let type_key = args[0].clone();
    let Value::Protocol(p) = &args[1] else {
        return error(
            ErrorKind::Type,
            format!("extend-type expects a protocol, got {}", args[1].type_tag()),
        );
    };
    let Value::Map(impls) = &args[2] else {
        return error(ErrorKind::Internal, "extend-type expects an impl map");
    };
    let mut table = p.impls.borrow_mut();
    let entry = table.entry(Key(type_key)).or_default();
    for (k, f) in impls.iter() {
        let Value::Str(method) = k else {
            return error(ErrorKind::Internal, "impl map keys must be method names");
        };
        entry.insert(method.clone().into(), f.clone());
    }
    Ok(Value::Nil)
}

pub fn satisfies_p(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Protocol(p) = &args[0] else {
        return error(ErrorKind::Type, "satisfies? expects a protocol");
    };
    let key = protocol_type_key(&args[1]);
    let impls = p.impls.borrow();
    Ok(Value::Bool(
        impls.contains_key(&Key(key)) || impls.contains_key(&Key(Value::keyword("default"))),
    ))
}

// --- exceptions ----------------------------------------------------------

pub fn ex_info(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    Ok(errors::ex_info_value(args[0].clone(), args[1].clone()))
}

pub fn ex_message(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    Ok(errors::ex_message(&args[0]))
}

pub fn ex_data(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    Ok(errors::ex_data(&args[0]))
}

/// Compiled catch dispatch: does the thrown value match the clause class?
pub fn catch_match(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Str(class_name) = &args[1] else {
        return error(ErrorKind::Internal, "__catch-match expects a class name");
    };
    Ok(Value::Bool(errors::catch_matches(class_name, &args[0])))
}

// --- namespaces ----------------------------------------------------------

pub fn all_ns(env: &Env, args: &[Value]) -> EvalResult {
    let _ = args;
    let names: Vec<Value> = env
        .all_ns()
        .iter()
        .map(|ns| Value::symbol(cljw_core::symbol::Symbol::simple(&ns.name)))
        .collect();
    Ok(Value::list(names))
}

pub fn ns_name(env: &Env, args: &[Value]) -> EvalResult {
    let _ = args;
    Ok(Value::symbol(cljw_core::symbol::Symbol::simple(
        &env.current_ns().name,
    )))
}

pub fn ns_publics(env: &Env, args: &[Value]) -> EvalResult {
    let ns = match args.first() {
        Some(Value::Symbol(sym)) => env.find_ns(&sym.name).ok_or_else(|| {
            Failure::Error(CljError::new(
                ErrorKind::Name,
                format!("no such namespace: {}", sym),
            ))
        })?,
        _ => env.current_ns(),
    };
    let pairs: Vec<(Value, Value)> = ns
        .publics()
        .into_iter()
        .map(|(name, var)| {
            (
                Value::symbol(cljw_core::symbol::Symbol::simple(&name)),
                Value::Var(var),
            )
        })
        .collect();
    Ok(Value::Map(cljw_core::collections::PersistentMap::from_pairs(
        pairs,
    )))
}

pub fn alias(env: &Env, args: &[Value]) -> EvalResult {
    let (Value::Symbol(short), Value::Symbol(target)) = (&args[0], &args[1]) else {
        return error(ErrorKind::Type, "alias expects two symbols");
    };
    env.current_ns()
        .add_alias(short.name.clone(), target.name.clone());
    Ok(Value::Nil)
}

pub fn doc_string(env: &Env, args: &[Value]) -> EvalResult {
    let _ = env;
    let Value::Var(var) = &args[0] else {
        return Ok(Value::Nil);
    };
    let meta = var.meta.borrow().clone();
    let Some(meta) = meta else {
        return Ok(Value::Nil);
    };
    let mut out = format!("-------------------------\n{}\n", var.qualified_name());
    if let Some(arglists) = meta.get(&Value::keyword("arglists")) {
        out.push_str(&format!("{}\n", pr_str(arglists)));
    }
    if let Some(Value::Str(doc)) = meta.get(&Value::keyword("doc")) {
        out.push_str(&format!("  {}\n", doc));
    }
    Ok(Value::string(out))
}
