//! The bytecode virtual machine.
//!
//! A stack machine over one value stack, a call-frame stack and an
//! exception-handler stack. `perform_call` is the single entry point for
//! applying a callable: the `call` opcode uses it, and so does the bridge
//! when a builtin or the tree walker re-enters compiled code. Re-entrant
//! bridge calls run on their own VM instance (the interpreter pools
//! them), so handler and frame segments never interleave between runs.
//!
//! User exceptions unwind to the innermost handler in this VM; engine
//! errors unwind out of the run entirely and carry the frame names as a
//! Clojure-level stack trace.

use crate::numeric;
use cljw_core::chunk::{FnProto, Op, CAPTURE_FROM_PARENT_CAPTURE, INSTR_SIZE};
use cljw_core::collections::{PersistentList, PersistentMap, PersistentSet, PersistentVector};
use cljw_core::env::Env;
use cljw_core::error::{CljError, ErrorKind, EvalResult, Failure, TraceFrame};
use cljw_core::printer::pr_str;
use cljw_core::value::{eql, Closure, FnKind, Value};
use std::rc::Rc;

pub const STACK_MAX: usize = 32_768;
pub const FRAMES_MAX: usize = 256;

struct Frame {
    closure: Rc<Closure>,
    proto: Rc<FnProto>,
    ip: usize,
    base: usize,
}

struct Handler {
    catch_ip: usize,
    sp: usize,
    frame_count: usize,
}

pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    handlers: Vec<Handler>,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            stack: Vec::with_capacity(1024),
            frames: Vec::with_capacity(16),
            handlers: Vec::new(),
        }
    }

    /// Reset between pooled uses.
    pub fn clear(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.handlers.clear();
    }

    /// Apply a compiled closure to `args` and run to completion.
    pub fn call_closure(&mut self, env: &Env, callee: &Value, args: &[Value]) -> EvalResult {
        let entry_frames = self.frames.len();
        let entry_sp = self.stack.len();
        let entry_handlers = self.handlers.len();
        self.stack.push(callee.clone());
        self.stack.extend_from_slice(args);
        let result = self
            .perform_call(env, args.len())
            .and_then(|_| {
                if self.frames.len() > entry_frames {
                    self.run(env, entry_frames)
                } else {
                    Ok(())
                }
            })
            .and_then(|_| {
                self.stack.pop().ok_or_else(|| {
                    Failure::Error(CljError::new(
                        ErrorKind::Internal,
                        "vm returned with an empty stack",
                    ))
                })
            });
        if result.is_err() {
            self.stack.truncate(entry_sp);
            self.frames.truncate(entry_frames);
            self.handlers.truncate(entry_handlers);
        }
        result
    }

    /// Dispatch the callable sitting under `argc` arguments on the stack.
    /// Compiled fns push a frame; everything else is applied immediately
    /// and replaced by its result.
    fn perform_call(&mut self, env: &Env, argc: usize) -> Result<(), Failure> {
        let callee_at = self.stack.len() - argc - 1;
        let callee = self.stack[callee_at].clone();
        if let Value::Fn(closure) = &callee {
            if let FnKind::Bytecode(proto) = &closure.fun {
                let proto = proto.select_arity(argc).ok_or_else(|| {
                    Failure::Error(CljError::new(
                        ErrorKind::Arity,
                        format!(
                            "wrong number of args ({}) passed to: {}",
                            argc,
                            closure.name().unwrap_or("fn")
                        ),
                    ))
                })?;
                if self.frames.len() >= FRAMES_MAX {
                    return Err(Failure::Error(CljError::new(
                        ErrorKind::Internal,
                        "stack overflow (call frames exhausted)",
                    )));
                }
                if proto.variadic {
                    // pack surplus arguments into a list at the rest slot
                    let fixed = proto.fixed_arity() as usize;
                    let rest: Vec<Value> = self.stack.split_off(callee_at + 1 + fixed);
                    let rest = if rest.is_empty() {
                        Value::Nil
                    } else {
                        Value::List(PersistentList::from_vec(rest))
                    };
                    self.stack.push(rest);
                }
                if self.stack.len() + proto.local_count as usize > STACK_MAX {
                    return Err(Failure::Error(CljError::new(
                        ErrorKind::Internal,
                        "stack overflow (value stack exhausted)",
                    )));
                }
                if proto.has_self_ref {
                    self.stack.push(callee.clone());
                }
                self.frames.push(Frame {
                    closure: closure.clone(),
                    proto: proto.clone(),
                    ip: 0,
                    base: callee_at + 1,
                });
                return Ok(());
            }
        }
        // everything else: apply now, replace [callee, args...] by result
        let args: Vec<Value> = self.stack.split_off(callee_at + 1);
        self.stack.pop();
        let result = env.call_fn(&callee, &args)?;
        self.stack.push(result);
        Ok(())
    }

    fn run(&mut self, env: &Env, until_frames: usize) -> Result<(), Failure> {
        loop {
            let (proto, ip, base) = {
                let frame = self.frames.last().ok_or_else(|| {
                    Failure::Error(CljError::new(ErrorKind::Internal, "vm run without a frame"))
                })?;
                (frame.proto.clone(), frame.ip, frame.base)
            };
            let (op, operand) = proto.chunk.read(ip).ok_or_else(|| {
                Failure::Error(CljError::new(
                    ErrorKind::Internal,
                    "instruction pointer out of bounds",
                ))
            })?;
            if let Some(frame) = self.frames.last_mut() {
                frame.ip = ip + INSTR_SIZE;
            }
            if let Err(failure) = self.step(env, &proto, base, op, operand) {
                self.unwind(failure, &proto, ip)?;
            }
            if self.frames.len() == until_frames {
                return Ok(());
            }
        }
    }

    /// Unwind to the innermost handler for user exceptions; engine errors
    /// leave the run with the frame names attached.
    fn unwind(&mut self, failure: Failure, proto: &FnProto, ip: usize) -> Result<(), Failure> {
        match failure {
            Failure::Thrown(thrown) => match self.handlers.pop() {
                Some(handler) => {
                    self.frames.truncate(handler.frame_count);
                    self.stack.truncate(handler.sp);
                    self.stack.push(thrown.value);
                    if let Some(frame) = self.frames.last_mut() {
                        frame.ip = handler.catch_ip;
                        Ok(())
                    } else {
                        Err(Failure::Error(CljError::new(
                            ErrorKind::Internal,
                            "exception handler without a frame",
                        )))
                    }
                }
                None => Err(Failure::Thrown(thrown)),
            },
            Failure::Error(mut e) => {
                if e.pos.is_none() {
                    let line = proto.chunk.line_at(ip);
                    if line > 0 {
                        e.pos = Some(cljw_core::error::SourcePos::new(
                            proto.pos.as_ref().and_then(|p| p.file.clone()),
                            line,
                            0,
                        ));
                    }
                }
                if e.trace.is_empty() {
                    for frame in self.frames.iter().rev() {
                        e.trace.push(TraceFrame {
                            ns: "".into(),
                            name: frame
                                .proto
                                .name
                                .clone()
                                .unwrap_or_else(|| "fn".into()),
                        });
                    }
                }
                Err(Failure::Error(e))
            }
        }
    }

    fn step(
        &mut self,
        env: &Env,
        proto: &Rc<FnProto>,
        base: usize,
        op: Op,
        operand: u16,
    ) -> Result<(), Failure> {
        match op {
            Op::Nop => Ok(()),
            Op::ConstLoad => {
                let v = self.constant(proto, operand)?;
                self.push(v)
            }
            Op::Nil => self.push(Value::Nil),
            Op::TrueVal => self.push(Value::Bool(true)),
            Op::FalseVal => self.push(Value::Bool(false)),
            Op::Pop => {
                self.pop()?;
                Ok(())
            }
            Op::PopUnder => {
                let top = self.pop()?;
                let n = operand as usize;
                let len = self.stack.len();
                if n > len {
                    return internal("pop_under beneath the frame");
                }
                self.stack.truncate(len - n);
                self.stack.push(top);
                Ok(())
            }
            Op::Dup => {
                let top = self.peek()?.clone();
                self.push(top)
            }
            Op::LocalLoad => {
                let v = self
                    .stack
                    .get(base + operand as usize)
                    .cloned()
                    .ok_or_else(|| internal_err("local_load out of frame"))?;
                self.push(v)
            }
            Op::LocalStore => {
                let v = self.pop()?;
                let slot = base + operand as usize;
                if slot >= self.stack.len() {
                    return internal("local_store out of frame");
                }
                self.stack[slot] = v;
                Ok(())
            }
            Op::UpvalueLoad => {
                let frame = self.frames.last().ok_or_else(|| internal_err("no frame"))?;
                let v = frame
                    .closure
                    .captures
                    .get(operand as usize)
                    .cloned()
                    .ok_or_else(|| internal_err("upvalue_load out of range"))?;
                self.push(v)
            }
            Op::UpvalueStore => internal("upvalue_store: captured bindings are immutable"),
            Op::VarLoad => {
                let v = match self.constant(proto, operand)? {
                    Value::Var(var) => var.deref().map_err(Failure::Error)?,
                    other => {
                        return internal(format!(
                            "var_load constant is not a var: {}",
                            pr_str(&other)
                        ));
                    }
                };
                self.push(v)
            }
            Op::VarLoadDynamic => {
                let v = match self.constant(proto, operand)? {
                    Value::Symbol(sym) => {
                        let var = env.resolve(&sym).map_err(Failure::Error)?;
                        var.deref().map_err(Failure::Error)?
                    }
                    other => {
                        return internal(format!(
                            "var_load_dynamic constant is not a symbol: {}",
                            pr_str(&other)
                        ));
                    }
                };
                self.push(v)
            }
            Op::Def => {
                let init = self.pop()?;
                match self.constant(proto, operand)? {
                    Value::Var(var) => {
                        var.set_root(init);
                        self.push(Value::Var(var))
                    }
                    other => internal(format!("def constant is not a var: {}", pr_str(&other))),
                }
            }
            Op::Jump => {
                self.jump_forward(operand);
                Ok(())
            }
            Op::JumpIfFalse => {
                let test = self.pop()?;
                if !test.is_truthy() {
                    self.jump_forward(operand);
                }
                Ok(())
            }
            Op::JumpBack => {
                let delta = operand as i16 as i64;
                if let Some(frame) = self.frames.last_mut() {
                    frame.ip = (frame.ip as i64 + delta) as usize;
                }
                Ok(())
            }
            Op::Call => self.perform_call(env, operand as usize),
            Op::TailCall => {
                let argc = operand as usize;
                let callee_at = self.stack.len() - argc - 1;
                let is_compiled = matches!(
                    &self.stack[callee_at],
                    Value::Fn(c) if matches!(c.fun, FnKind::Bytecode(_))
                );
                if is_compiled {
                    // reuse the frame: the caller's window collapses onto
                    // its own callee slot before the new frame is pushed
                    let frame = self.frames.pop().ok_or_else(|| internal_err("no frame"))?;
                    let moved: Vec<Value> = self.stack.split_off(callee_at);
                    self.stack.truncate(frame.base - 1);
                    self.stack.extend(moved);
                    self.perform_call(env, argc)
                } else {
                    self.perform_call(env, argc)
                }
            }
            Op::Ret => {
                let result = self.pop()?;
                let frame = self.frames.pop().ok_or_else(|| internal_err("ret without frame"))?;
                self.stack.truncate(frame.base - 1);
                self.stack.push(result);
                Ok(())
            }
            Op::Closure => {
                let template = self.constant(proto, operand)?;
                let Value::Fn(template) = template else {
                    return internal("closure constant is not a fn template");
                };
                let FnKind::Bytecode(child) = &template.fun else {
                    return internal("closure template is not compiled");
                };
                if child.capture_slots.is_empty() {
                    return self.push(Value::Fn(template));
                }
                let frame = self.frames.last().ok_or_else(|| internal_err("no frame"))?;
                let mut captures = Vec::with_capacity(child.capture_slots.len());
                for slot in &child.capture_slots {
                    if slot & CAPTURE_FROM_PARENT_CAPTURE != 0 {
                        let idx = (slot & !CAPTURE_FROM_PARENT_CAPTURE) as usize;
                        captures.push(
                            frame
                                .closure
                                .captures
                                .get(idx)
                                .cloned()
                                .ok_or_else(|| internal_err("capture index out of range"))?,
                        );
                    } else {
                        captures.push(
                            self.stack
                                .get(frame.base + *slot as usize)
                                .cloned()
                                .ok_or_else(|| internal_err("capture slot out of frame"))?,
                        );
                    }
                }
                let closure = Value::Fn(Rc::new(Closure {
                    fun: template.fun.clone(),
                    captures,
                    meta: template.meta.clone(),
                }));
                env.heap.note_alloc(64);
                self.push(closure)
            }
            Op::Recur => {
                let base_off = (operand >> 8) as usize;
                let argc = (operand & 0xff) as usize;
                let abs = base + base_off;
                let from = self.stack.len() - argc;
                for i in 0..argc {
                    let v = self.stack[from + i].clone();
                    self.stack[abs + i] = v;
                }
                self.stack.truncate(abs + argc);
                // a fn-level recur (base 0) restarts the arity prologue
                // state, which includes the injected self-reference
                if base_off == 0 && proto.has_self_ref {
                    let callee = self.stack[base - 1].clone();
                    self.push(callee)?;
                }
                Ok(())
            }
            Op::ListNew => {
                let items = self.pop_n(operand as usize)?;
                env.heap.note_alloc(16 * operand as usize + 16);
                self.push(Value::List(PersistentList::from_vec(items)))
            }
            Op::VecNew => {
                let items = self.pop_n(operand as usize)?;
                env.heap.note_alloc(16 * operand as usize + 16);
                self.push(Value::Vector(PersistentVector::from_vec(items)))
            }
            Op::MapNew => {
                let items = self.pop_n(operand as usize * 2)?;
                env.heap.note_alloc(32 * operand as usize + 16);
                let mut pairs = Vec::with_capacity(operand as usize);
                let mut it = items.into_iter();
                while let (Some(k), Some(v)) = (it.next(), it.next()) {
                    pairs.push((k, v));
                }
                self.push(Value::Map(PersistentMap::from_pairs(pairs)))
            }
            Op::SetNew => {
                let items = self.pop_n(operand as usize)?;
                env.heap.note_alloc(16 * operand as usize + 16);
                self.push(Value::Set(PersistentSet::from_vec(items)))
            }
            Op::Add => self.binary_num(numeric::add),
            Op::Sub => self.binary_num(numeric::sub),
            Op::Mul => self.binary_num(numeric::mul),
            Op::Div => self.binary_num(numeric::div),
            Op::Mod => self.binary_num(numeric::modulo),
            Op::Rem => self.binary_num(numeric::remainder),
            Op::Lt => self.binary_cmp("<", |o| o == std::cmp::Ordering::Less),
            Op::Le => self.binary_cmp("<=", |o| o != std::cmp::Ordering::Greater),
            Op::Gt => self.binary_cmp(">", |o| o == std::cmp::Ordering::Greater),
            Op::Ge => self.binary_cmp(">=", |o| o != std::cmp::Ordering::Less),
            Op::Eq => {
                let b = self.pop()?;
                let a = self.pop()?;
                let a = crate::seqs::realize_deep(env, &a)?;
                let b = crate::seqs::realize_deep(env, &b)?;
                self.push(Value::Bool(eql(&a, &b)))
            }
            Op::Neq => {
                let b = self.pop()?;
                let a = self.pop()?;
                let a = crate::seqs::realize_deep(env, &a)?;
                let b = crate::seqs::realize_deep(env, &b)?;
                self.push(Value::Bool(!eql(&a, &b)))
            }
            Op::TryBegin => {
                let frame = self.frames.last().ok_or_else(|| internal_err("no frame"))?;
                let catch_ip = frame.ip + operand as usize;
                let handler = Handler {
                    catch_ip,
                    sp: self.stack.len(),
                    frame_count: self.frames.len(),
                };
                self.handlers.push(handler);
                Ok(())
            }
            Op::CatchBegin => Ok(()),
            Op::TryEnd => {
                self.handlers.pop();
                Ok(())
            }
            Op::ThrowEx => {
                let value = self.pop()?;
                Err(Failure::thrown(value))
            }
            Op::DebugPrint => {
                let top = self.peek()?;
                eprintln!("[debug] {}", pr_str(top));
                Ok(())
            }
        }
    }

    fn binary_num(&mut self, f: fn(&Value, &Value) -> EvalResult) -> Result<(), Failure> {
        let b = self.pop()?;
        let a = self.pop()?;
        let v = f(&a, &b)?;
        self.push(v)
    }

    fn binary_cmp(
        &mut self,
        op: &str,
        pred: fn(std::cmp::Ordering) -> bool,
    ) -> Result<(), Failure> {
        let b = self.pop()?;
        let a = self.pop()?;
        let ord = numeric::compare_numbers(op, &a, &b)?;
        self.push(Value::Bool(pred(ord)))
    }

    fn jump_forward(&mut self, operand: u16) {
        if let Some(frame) = self.frames.last_mut() {
            frame.ip += operand as usize;
        }
    }

    fn constant(&self, proto: &FnProto, idx: u16) -> Result<Value, Failure> {
        proto
            .chunk
            .constants
            .get(idx as usize)
            .cloned()
            .ok_or_else(|| internal_err("constant index out of range"))
    }

    fn push(&mut self, v: Value) -> Result<(), Failure> {
        if self.stack.len() >= STACK_MAX {
            return Err(Failure::Error(CljError::new(
                ErrorKind::Internal,
                "stack overflow (value stack exhausted)",
            )));
        }
        self.stack.push(v);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, Failure> {
        self.stack
            .pop()
            .ok_or_else(|| internal_err("pop from empty stack"))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Failure> {
        if n > self.stack.len() {
            return Err(internal_err("pop_n beneath the frame"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn peek(&self) -> Result<&Value, Failure> {
        self.stack
            .last()
            .ok_or_else(|| internal_err("peek at empty stack"))
    }
}

fn internal_err(msg: impl Into<String>) -> Failure {
    Failure::Error(CljError::new(ErrorKind::Internal, msg))
}

fn internal(msg: impl Into<String>) -> Result<(), Failure> {
    Err(internal_err(msg))
}
