//! The tree-walking evaluator: direct Node interpretation.
//!
//! Locals live in a per-call `Vec<Value>` indexed by analyzer slots.
//! `recur` communicates through the interpreter's scratch buffer: the
//! recur node evaluates its arguments, parks them, and returns a nil
//! sentinel; the innermost loop (or fn arity) notices the pending flag,
//! rebinds its locals and goes around again. Sequence evaluators check
//! the flag after every statement so a pending recur falls straight
//! through to its target.

use crate::interp::Interp;
use cljw_core::ast::{CaptureSrc, FnDef, Node};
use cljw_core::collections::PersistentList;
use cljw_core::env::Env;
use cljw_core::error::{CljError, ErrorKind, EvalResult, Failure};
use cljw_core::value::{Closure, Value};
use std::rc::Rc;

pub struct TreeFrame<'a> {
    pub locals: &'a mut Vec<Value>,
    pub captures: &'a [Value],
}

pub fn eval_top(interp: &Interp, node: &Node, local_count: u16) -> EvalResult {
    let mut locals = vec![Value::Nil; local_count as usize];
    let mut frame = TreeFrame {
        locals: &mut locals,
        captures: &[],
    };
    eval(interp, node, &mut frame)
}

/// Apply a tree-walk closure: select the arity, bind params (packing
/// surplus into a list for a variadic arity), bind the callee itself for
/// self-recursion, then run the fn-level recur loop. Captured values are
/// read straight from the closure by `CaptureRef` nodes.
pub fn call_closure(
    interp: &Interp,
    callee: &Value,
    closure: &Rc<Closure>,
    def: &Rc<FnDef>,
    args: &[Value],
) -> EvalResult {
    let arity = def.select_arity(args.len()).ok_or_else(|| {
        Failure::Error(CljError::new(
            ErrorKind::Arity,
            format!(
                "wrong number of args ({}) passed to: {}",
                args.len(),
                def.name.as_deref().unwrap_or("fn")
            ),
        ))
    })?;
    let mut locals = vec![Value::Nil; arity.local_count as usize];
    let n_params = arity.n_params as usize;
    if arity.variadic {
        let fixed = n_params - 1;
        locals[..fixed].clone_from_slice(&args[..fixed]);
        locals[fixed] = if args.len() > fixed {
            Value::List(PersistentList::from_vec(args[fixed..].to_vec()))
        } else {
            Value::Nil
        };
    } else {
        locals[..n_params].clone_from_slice(args);
    }
    if let Some(slot) = arity.self_slot {
        // the callee value itself, so recursion by name is identical?-stable
        locals[slot as usize] = callee.clone();
    }
    let mut frame = TreeFrame {
        locals: &mut locals,
        captures: &closure.captures,
    };
    loop {
        let result = eval_body(interp, &arity.body, &mut frame)?;
        match interp.take_recur() {
            Some(new_args) => {
                for (i, v) in new_args.into_iter().enumerate() {
                    frame.locals[i] = v;
                }
            }
            None => return Ok(result),
        }
    }
}

fn eval_body(interp: &Interp, body: &[Node], frame: &mut TreeFrame<'_>) -> EvalResult {
    let mut last = Value::Nil;
    for node in body {
        last = eval(interp, node, frame)?;
        if interp.recur_pending() {
            return Ok(Value::Nil);
        }
    }
    Ok(last)
}

pub fn eval(interp: &Interp, node: &Node, frame: &mut TreeFrame<'_>) -> EvalResult {
    let env: &Env = &interp.env;
    match node {
        Node::Const(v) => Ok(v.clone()),
        Node::VarRef(var) => var.deref().map_err(Failure::Error),
        Node::DeferredVar(sym) => {
            let var = env.resolve(sym).map_err(Failure::Error)?;
            var.deref().map_err(Failure::Error)
        }
        Node::VarQuote(var) => Ok(Value::Var(var.clone())),
        Node::DeferredVarQuote(sym) => {
            let var = env.resolve(sym).map_err(Failure::Error)?;
            Ok(Value::Var(var))
        }
        Node::Local(slot) => Ok(frame.locals[*slot as usize].clone()),
        Node::CaptureRef(idx) => frame
            .captures
            .get(*idx as usize)
            .cloned()
            .ok_or_else(|| {
                Failure::Error(CljError::new(ErrorKind::Internal, "capture index out of range"))
            }),
        Node::If { test, then, els } => {
            let t = eval(interp, test, frame)?;
            if t.is_truthy() {
                eval(interp, then, frame)
            } else {
                match els {
                    Some(els) => eval(interp, els, frame),
                    None => Ok(Value::Nil),
                }
            }
        }
        Node::Do(body) => eval_body(interp, body, frame),
        Node::Let { bindings, body } => {
            for (slot, init) in bindings {
                let v = eval(interp, init, frame)?;
                if interp.recur_pending() {
                    return Ok(Value::Nil);
                }
                frame.locals[*slot as usize] = v;
            }
            eval_body(interp, body, frame)
        }
        Node::Loop { bindings, body } => {
            for (slot, init) in bindings {
                let v = eval(interp, init, frame)?;
                frame.locals[*slot as usize] = v;
            }
            loop {
                let result = eval_body(interp, body, frame)?;
                match interp.take_recur() {
                    Some(args) => {
                        for ((slot, _), v) in bindings.iter().zip(args.into_iter()) {
                            frame.locals[*slot as usize] = v;
                        }
                    }
                    None => return Ok(result),
                }
            }
        }
        Node::Recur { args } => {
            let mut vals = Vec::with_capacity(args.len());
            for arg in args {
                vals.push(eval(interp, arg, frame)?);
            }
            interp.set_recur(vals);
            Ok(Value::Nil)
        }
        Node::Fn(def) => {
            let mut captures = Vec::with_capacity(def.captures.len());
            for src in &def.captures {
                captures.push(match src {
                    CaptureSrc::ParentLocal(slot) => frame.locals[*slot as usize].clone(),
                    CaptureSrc::ParentCapture(idx) => frame
                        .captures
                        .get(*idx as usize)
                        .cloned()
                        .ok_or_else(|| {
                            Failure::Error(CljError::new(
                                ErrorKind::Internal,
                                "capture index out of range",
                            ))
                        })?,
                });
            }
            env.heap.note_alloc(64);
            Ok(Value::Fn(Rc::new(Closure {
                fun: cljw_core::value::FnKind::Tree(def.clone()),
                captures,
                meta: None,
            })))
        }
        Node::Call { callee, args, pos } => {
            let f = eval(interp, callee, frame)?;
            let mut vals = Vec::with_capacity(args.len());
            for arg in args {
                vals.push(eval(interp, arg, frame)?);
            }
            interp
                .call_value(&f, &vals)
                .map_err(|failure| failure.with_pos(pos.as_ref()))
        }
        Node::Def { var, init, .. } => {
            if let Some(init) = init {
                let v = eval(interp, init, frame)?;
                var.set_root(v);
            }
            Ok(Value::Var(var.clone()))
        }
        Node::Throw { expr, pos } => {
            let v = eval(interp, expr, frame)?;
            Err(Failure::thrown(v).with_pos(pos.as_ref()))
        }
        Node::Try {
            body,
            catches,
            finally,
        } => {
            let result = eval_body(interp, body, frame);
            let result = match result {
                Err(Failure::Thrown(thrown)) => {
                    let mut handled = None;
                    for catch in catches {
                        if crate::errors::catch_matches(&catch.class_name, &thrown.value) {
                            frame.locals[catch.slot as usize] = thrown.value.clone();
                            handled = Some(eval_body(interp, &catch.body, frame));
                            break;
                        }
                    }
                    handled.unwrap_or(Err(Failure::Thrown(thrown)))
                }
                other => other,
            };
            if let Some(stmts) = finally {
                match &result {
                    Ok(_) | Err(Failure::Thrown(_)) => {
                        for stmt in stmts {
                            eval(interp, stmt, frame)?;
                        }
                    }
                    // engine errors unwind without running finally
                    Err(Failure::Error(_)) => {}
                }
            }
            result
        }
        Node::SetVar { var, expr } => {
            let v = eval(interp, expr, frame)?;
            var.set_binding(v.clone()).map_err(Failure::Error)?;
            Ok(v)
        }
        Node::VecLit(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(interp, item, frame)?);
            }
            env.heap.note_alloc(16 * out.len() + 16);
            Ok(Value::vector(out))
        }
        Node::MapLit(pairs) => {
            let mut out = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                out.push((eval(interp, k, frame)?, eval(interp, v, frame)?));
            }
            env.heap.note_alloc(32 * out.len() + 16);
            Ok(Value::Map(cljw_core::collections::PersistentMap::from_pairs(out)))
        }
        Node::SetLit(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(interp, item, frame)?);
            }
            env.heap.note_alloc(16 * out.len() + 16);
            Ok(Value::Set(cljw_core::collections::PersistentSet::from_vec(out)))
        }
    }
}
