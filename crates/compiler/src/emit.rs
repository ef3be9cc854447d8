//! Bytecode compiler: Nodes to Chunks.
//!
//! The emitter assigns locals with a running stack-depth counter: a let
//! binding's value simply stays on the stack at the offset where its init
//! left it, so temporaries from nested call arguments can never collide
//! with declared locals. `pop_under` removes bindings beneath the body
//! result on scope exit (a loop's result survives the same way). `recur`
//! encodes its loop-base offset and argument count into one operand and is
//! followed by a signed `jump_back`.
//!
//! Captured locals are not frame slots at run time: the closure carries
//! them, and reads compile to `upvalue_load`. The capture-source list is
//! translated from analyzer slots to parent stack offsets at the
//! `closure` emit site, which is lexically inside every scope it needs.

use cljw_core::ast::{CaptureSrc, FnArity, FnDef, Node};
use cljw_core::chunk::{disassemble, Chunk, FnProto, Op, CAPTURE_FROM_PARENT_CAPTURE, INSTR_SIZE};
use cljw_core::env::Env;
use cljw_core::error::{CljError, ErrorKind, Failure, SourcePos};
use cljw_core::symbol::Symbol;
use cljw_core::value::{Closure, FnKind, Value};
use std::rc::Rc;

struct LoopCtx {
    start_ip: usize,
    /// Stack offset of the first loop local, relative to the frame base.
    base: u16,
    argc: u16,
}

struct ArityCtx {
    chunk: Chunk,
    /// Current stack depth relative to the frame base; also the offset the
    /// next pushed value will occupy.
    depth: u16,
    max_depth: u16,
    /// Analyzer slot -> stack offset, innermost scopes last.
    slot_map: Vec<(u16, u16)>,
    loops: Vec<LoopCtx>,
    try_depth: usize,
    line: u32,
}

impl ArityCtx {
    fn new() -> Self {
        ArityCtx {
            chunk: Chunk::new(),
            depth: 0,
            max_depth: 0,
            slot_map: Vec::new(),
            loops: Vec::new(),
            try_depth: 0,
            line: 0,
        }
    }

    fn emit(&mut self, op: Op, operand: u16) -> usize {
        self.chunk.emit(op, operand, self.line)
    }

    fn push(&mut self, n: u16) {
        self.depth += n;
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn pop(&mut self, n: u16) {
        self.depth -= n;
    }

    fn map_slot(&mut self, analyzer_slot: u16, offset: u16) {
        self.slot_map.push((analyzer_slot, offset));
    }

    fn offset_of(&self, analyzer_slot: u16) -> Option<u16> {
        self.slot_map
            .iter()
            .rev()
            .find(|(s, _)| *s == analyzer_slot)
            .map(|(_, o)| *o)
    }
}

pub struct Emitter<'e> {
    env: &'e Env,
}

impl<'e> Emitter<'e> {
    pub fn new(env: &'e Env) -> Self {
        Emitter { env }
    }

    /// Wrap a top-level form as a zero-arity proto the VM can call.
    pub fn compile_top(&self, node: &Node, name: &str) -> Result<Rc<FnProto>, Failure> {
        let mut ctx = ArityCtx::new();
        self.emit_node(&mut ctx, node, true)?;
        ctx.emit(Op::Ret, 0);
        Ok(Rc::new(FnProto {
            name: Some(name.into()),
            arity: 0,
            variadic: false,
            local_count: 0,
            capture_slots: Vec::new(),
            has_self_ref: false,
            self_slot: 0,
            chunk: ctx.chunk,
            extra_arities: Vec::new(),
            pos: None,
        }))
    }

    fn compile_fn_def(
        &self,
        def: &FnDef,
        parent: Option<&ArityCtx>,
    ) -> Result<Rc<FnProto>, Failure> {
        // capture sources translate to parent stack offsets here, at the
        // creation site, where the parent's scopes are all live
        let mut capture_slots = Vec::with_capacity(def.captures.len());
        for src in &def.captures {
            match src {
                CaptureSrc::ParentLocal(aslot) => {
                    let parent = parent.ok_or_else(|| {
                        Failure::Error(CljError::new(
                            ErrorKind::Internal,
                            "capture from a frame with no compile context",
                        ))
                    })?;
                    let offset = parent.offset_of(*aslot).ok_or_else(|| {
                        Failure::Error(CljError::new(
                            ErrorKind::Internal,
                            "capture source slot not in scope",
                        ))
                    })?;
                    capture_slots.push(offset);
                }
                CaptureSrc::ParentCapture(idx) => {
                    capture_slots.push(CAPTURE_FROM_PARENT_CAPTURE | idx);
                }
            }
        }

        let mut protos = Vec::with_capacity(def.arities.len());
        for arity in &def.arities {
            protos.push(self.compile_arity(def, arity, &def.pos)?);
        }
        let mut primary = protos.remove(0);
        {
            let p = Rc::get_mut(&mut primary).expect("proto freshly built");
            p.capture_slots = capture_slots;
            p.extra_arities = protos;
        }
        Ok(primary)
    }

    fn compile_arity(
        &self,
        def: &FnDef,
        arity: &FnArity,
        pos: &Option<SourcePos>,
    ) -> Result<Rc<FnProto>, Failure> {
        let mut ctx = ArityCtx::new();
        if let Some(p) = pos {
            ctx.line = p.line;
        }
        for i in 0..arity.n_params {
            ctx.map_slot(i, i);
        }
        let mut depth = arity.n_params;
        if let Some(self_slot) = arity.self_slot {
            ctx.map_slot(self_slot, depth);
            depth += 1;
        }
        ctx.depth = depth;
        ctx.max_depth = depth;
        ctx.loops.push(LoopCtx {
            start_ip: 0,
            base: 0,
            argc: arity.n_params,
        });
        self.emit_body(&mut ctx, &arity.body, true)?;
        ctx.emit(Op::Ret, 0);
        Ok(Rc::new(FnProto {
            name: def.name.clone(),
            arity: arity.n_params,
            variadic: arity.variadic,
            local_count: arity.local_count,
            capture_slots: Vec::new(),
            has_self_ref: arity.self_slot.is_some(),
            self_slot: arity.self_slot.map(|_| arity.n_params).unwrap_or(0),
            chunk: ctx.chunk,
            extra_arities: Vec::new(),
            pos: pos.clone(),
        }))
    }

    fn emit_body(&self, ctx: &mut ArityCtx, body: &[Node], tail: bool) -> Result<(), Failure> {
        if body.is_empty() {
            ctx.emit(Op::Nil, 0);
            ctx.push(1);
            return Ok(());
        }
        for stmt in &body[..body.len() - 1] {
            self.emit_node(ctx, stmt, false)?;
            ctx.emit(Op::Pop, 0);
            ctx.pop(1);
        }
        self.emit_node(ctx, &body[body.len() - 1], tail)
    }

    fn emit_node(&self, ctx: &mut ArityCtx, node: &Node, tail: bool) -> Result<(), Failure> {
        match node {
            Node::Const(v) => {
                self.emit_const(ctx, v);
                Ok(())
            }
            Node::VarRef(var) => {
                let idx = ctx.chunk.add_constant(Value::Var(var.clone()));
                ctx.emit(Op::VarLoad, idx);
                ctx.push(1);
                Ok(())
            }
            Node::DeferredVar(sym) => {
                let idx = ctx
                    .chunk
                    .add_constant(Value::Symbol(Rc::new(sym.as_ref().clone())));
                ctx.emit(Op::VarLoadDynamic, idx);
                ctx.push(1);
                Ok(())
            }
            Node::VarQuote(var) => {
                let idx = ctx.chunk.add_constant(Value::Var(var.clone()));
                ctx.emit(Op::ConstLoad, idx);
                ctx.push(1);
                Ok(())
            }
            Node::DeferredVarQuote(sym) => {
                // (__var 'sym) resolves at run time
                let var = self.core_var(ctx, "__var")?;
                ctx.emit(Op::VarLoad, var);
                ctx.push(1);
                let idx = ctx
                    .chunk
                    .add_constant(Value::Symbol(Rc::new(sym.as_ref().clone())));
                ctx.emit(Op::ConstLoad, idx);
                ctx.push(1);
                ctx.emit(Op::Call, 1);
                ctx.pop(1);
                Ok(())
            }
            Node::Local(slot) => {
                let offset = ctx.offset_of(*slot).ok_or_else(|| {
                    Failure::Error(CljError::new(
                        ErrorKind::Internal,
                        "local slot not in scope at emit time",
                    ))
                })?;
                ctx.emit(Op::LocalLoad, offset);
                ctx.push(1);
                Ok(())
            }
            Node::CaptureRef(idx) => {
                ctx.emit(Op::UpvalueLoad, *idx);
                ctx.push(1);
                Ok(())
            }
            Node::If { test, then, els } => {
                let d0 = ctx.depth;
                self.emit_node(ctx, test, false)?;
                let jif = ctx.emit(Op::JumpIfFalse, 0xffff);
                ctx.pop(1);
                self.emit_node(ctx, then, tail)?;
                let jend = ctx.emit(Op::Jump, 0xffff);
                self.patch_jump(ctx, jif)?;
                ctx.depth = d0;
                match els {
                    Some(els) => self.emit_node(ctx, els, tail)?,
                    None => {
                        ctx.emit(Op::Nil, 0);
                        ctx.push(1);
                    }
                }
                self.patch_jump(ctx, jend)?;
                ctx.depth = d0 + 1;
                ctx.max_depth = ctx.max_depth.max(ctx.depth);
                Ok(())
            }
            Node::Do(body) => self.emit_body(ctx, body, tail),
            Node::Let { bindings, body } => {
                let scope_mark = ctx.slot_map.len();
                for (slot, init) in bindings {
                    self.emit_node(ctx, init, false)?;
                    // the init's result stays put and becomes the local
                    ctx.map_slot(*slot, ctx.depth - 1);
                }
                let n = bindings.len() as u16;
                self.emit_body(ctx, body, false)?;
                if n > 0 {
                    ctx.emit(Op::PopUnder, n);
                    ctx.pop(n);
                }
                ctx.slot_map.truncate(scope_mark);
                Ok(())
            }
            Node::Loop { bindings, body } => {
                let scope_mark = ctx.slot_map.len();
                for (slot, init) in bindings {
                    self.emit_node(ctx, init, false)?;
                    ctx.map_slot(*slot, ctx.depth - 1);
                }
                let n = bindings.len() as u16;
                ctx.loops.push(LoopCtx {
                    start_ip: ctx.chunk.len(),
                    base: ctx.depth - n,
                    argc: n,
                });
                self.emit_body(ctx, body, false)?;
                ctx.loops.pop();
                if n > 0 {
                    ctx.emit(Op::PopUnder, n);
                    ctx.pop(n);
                }
                ctx.slot_map.truncate(scope_mark);
                Ok(())
            }
            Node::Recur { args } => {
                let d0 = ctx.depth;
                for arg in args {
                    self.emit_node(ctx, arg, false)?;
                }
                let target = ctx.loops.last().ok_or_else(|| {
                    Failure::Error(CljError::new(ErrorKind::Internal, "recur without a target"))
                })?;
                let (base, argc, start_ip) = (target.base, target.argc, target.start_ip);
                if base > 0xff || argc > 0xff {
                    return Err(Failure::Error(CljError::new(
                        ErrorKind::Internal,
                        "recur target exceeds encodable frame offset",
                    )));
                }
                ctx.emit(Op::Recur, (base << 8) | argc);
                let here = ctx.chunk.len();
                let delta = start_ip as i64 - (here + INSTR_SIZE) as i64;
                if delta < i16::MIN as i64 {
                    return Err(Failure::Error(CljError::new(
                        ErrorKind::Internal,
                        "loop body too large for jump_back",
                    )));
                }
                ctx.emit(Op::JumpBack, (delta as i16) as u16);
                // recur never yields; the stack accounting pretends it
                // produced the expression result
                ctx.depth = d0 + 1;
                ctx.max_depth = ctx.max_depth.max(ctx.depth);
                Ok(())
            }
            Node::Fn(def) => {
                let proto = self.compile_fn_def(def, Some(ctx))?;
                let template = Value::Fn(Rc::new(Closure {
                    fun: FnKind::Bytecode(proto),
                    captures: Vec::new(),
                    meta: None,
                }));
                let idx = ctx.chunk.add_constant(template);
                ctx.emit(Op::Closure, idx);
                ctx.push(1);
                Ok(())
            }
            Node::Call { callee, args, pos } => {
                if let Some(p) = pos {
                    ctx.line = p.line;
                }
                if let Node::VarRef(var) = callee.as_ref() {
                    if let Some(done) = self.try_intrinsic(ctx, var, args)? {
                        if done {
                            return Ok(());
                        }
                    }
                }
                self.emit_node(ctx, callee, false)?;
                for arg in args {
                    self.emit_node(ctx, arg, false)?;
                }
                let argc = args.len() as u16;
                if tail && ctx.try_depth == 0 {
                    ctx.emit(Op::TailCall, argc);
                } else {
                    ctx.emit(Op::Call, argc);
                }
                ctx.pop(argc);
                Ok(())
            }
            Node::Def { var, init, .. } => {
                match init {
                    Some(init) => {
                        self.emit_node(ctx, init, false)?;
                        let idx = ctx.chunk.add_constant(Value::Var(var.clone()));
                        ctx.emit(Op::Def, idx);
                        // pops the init, pushes the var ref
                    }
                    None => {
                        let idx = ctx.chunk.add_constant(Value::Var(var.clone()));
                        ctx.emit(Op::ConstLoad, idx);
                        ctx.push(1);
                    }
                }
                Ok(())
            }
            Node::Throw { expr, pos } => {
                if let Some(p) = pos {
                    ctx.line = p.line;
                }
                self.emit_node(ctx, expr, false)?;
                ctx.emit(Op::ThrowEx, 0);
                // unreachable beyond here; the value slot stands in for
                // the expression result
                Ok(())
            }
            Node::Try {
                body,
                catches,
                finally,
            } => self.emit_try(ctx, body, catches, finally),
            Node::SetVar { var, expr } => {
                let set_var = self.core_var(ctx, "__set-var")?;
                ctx.emit(Op::VarLoad, set_var);
                ctx.push(1);
                let idx = ctx.chunk.add_constant(Value::Var(var.clone()));
                ctx.emit(Op::ConstLoad, idx);
                ctx.push(1);
                self.emit_node(ctx, expr, false)?;
                ctx.emit(Op::Call, 2);
                ctx.pop(2);
                Ok(())
            }
            Node::VecLit(items) => {
                for item in items {
                    self.emit_node(ctx, item, false)?;
                }
                ctx.emit(Op::VecNew, items.len() as u16);
                ctx.pop(items.len() as u16);
                ctx.push(1);
                Ok(())
            }
            Node::MapLit(pairs) => {
                for (k, v) in pairs {
                    self.emit_node(ctx, k, false)?;
                    self.emit_node(ctx, v, false)?;
                }
                ctx.emit(Op::MapNew, pairs.len() as u16);
                ctx.pop((pairs.len() * 2) as u16);
                ctx.push(1);
                Ok(())
            }
            Node::SetLit(items) => {
                for item in items {
                    self.emit_node(ctx, item, false)?;
                }
                ctx.emit(Op::SetNew, items.len() as u16);
                ctx.pop(items.len() as u16);
                ctx.push(1);
                Ok(())
            }
        }
    }

    fn emit_const(&self, ctx: &mut ArityCtx, v: &Value) {
        match v {
            Value::Nil => {
                ctx.emit(Op::Nil, 0);
            }
            Value::Bool(true) => {
                ctx.emit(Op::TrueVal, 0);
            }
            Value::Bool(false) => {
                ctx.emit(Op::FalseVal, 0);
            }
            other => {
                let idx = ctx.chunk.add_constant(other.clone());
                ctx.emit(Op::ConstLoad, idx);
            }
        }
        ctx.push(1);
    }

    fn core_var(&self, ctx: &mut ArityCtx, name: &str) -> Result<u16, Failure> {
        let var = self
            .env
            .resolve(&Symbol::qualified("clojure.core", name))
            .map_err(Failure::Error)?;
        Ok(ctx.chunk.add_constant(Value::Var(var)))
    }

    fn patch_jump(&self, ctx: &mut ArityCtx, at: usize) -> Result<(), Failure> {
        let delta = ctx.chunk.len() - (at + INSTR_SIZE);
        if delta > u16::MAX as usize {
            return Err(Failure::Error(CljError::new(
                ErrorKind::Internal,
                "jump distance exceeds operand width",
            )));
        }
        ctx.chunk.patch_operand(at, delta as u16);
        Ok(())
    }

    /// Arithmetic and comparison calls on `vm_intrinsic` builtins compile
    /// to direct opcodes. Returns Ok(Some(true)) when fully emitted.
    fn try_intrinsic(
        &self,
        ctx: &mut ArityCtx,
        var: &Rc<cljw_core::env::Var>,
        args: &[Node],
    ) -> Result<Option<bool>, Failure> {
        let Some(Value::Builtin(b)) = var.root_value() else {
            return Ok(None);
        };
        let Some(op) = b.intrinsic else {
            return Ok(None);
        };
        match op {
            Op::Add | Op::Mul | Op::Sub | Op::Div => {
                if args.is_empty() {
                    match op {
                        Op::Add => {
                            self.emit_const(ctx, &Value::Int(0));
                            return Ok(Some(true));
                        }
                        Op::Mul => {
                            self.emit_const(ctx, &Value::Int(1));
                            return Ok(Some(true));
                        }
                        _ => {
                            return Err(Failure::Error(
                                CljError::new(
                                    ErrorKind::Arity,
                                    format!("wrong number of args (0) passed to: {}", b.name),
                                )
                                .with_pos(None),
                            ));
                        }
                    }
                }
                if args.len() == 1 {
                    // (- x) -> 0 - x, (/ x) -> 1.0 / x, (+ x)/(* x) keep
                    // the numeric type check through the identity
                    let identity = match op {
                        Op::Add | Op::Sub => Value::Int(0),
                        Op::Mul => Value::Int(1),
                        _ => Value::Float(1.0),
                    };
                    self.emit_const(ctx, &identity);
                    self.emit_node(ctx, &args[0], false)?;
                    ctx.emit(op, 0);
                    ctx.pop(1);
                    return Ok(Some(true));
                }
                self.emit_node(ctx, &args[0], false)?;
                for arg in &args[1..] {
                    self.emit_node(ctx, arg, false)?;
                    ctx.emit(op, 0);
                    ctx.pop(1);
                }
                Ok(Some(true))
            }
            Op::Lt | Op::Le | Op::Gt | Op::Ge | Op::Eq | Op::Neq | Op::Mod | Op::Rem => {
                if args.len() != 2 {
                    // generic call handles other arities
                    return Ok(None);
                }
                self.emit_node(ctx, &args[0], false)?;
                self.emit_node(ctx, &args[1], false)?;
                ctx.emit(op, 0);
                ctx.pop(1);
                Ok(Some(true))
            }
            _ => Ok(None),
        }
    }

    fn emit_try(
        &self,
        ctx: &mut ArityCtx,
        body: &[Node],
        catches: &[cljw_core::ast::Catch],
        finally: &Option<Vec<Node>>,
    ) -> Result<(), Failure> {
        let d0 = ctx.depth;
        let try_begin = ctx.emit(Op::TryBegin, 0xffff);
        ctx.try_depth += 1;
        self.emit_body(ctx, body, false)?;
        ctx.try_depth -= 1;
        ctx.emit(Op::TryEnd, 0);
        self.emit_finally(ctx, finally)?;
        let jump_end = ctx.emit(Op::Jump, 0xffff);

        // handler entry: the thrown value sits where the body result
        // would, at stack offset d0
        self.patch_jump(ctx, try_begin)?;
        ctx.depth = d0 + 1;
        ctx.emit(Op::CatchBegin, 0);
        let ex_offset = d0;
        let mut exits = vec![jump_end];
        for catch in catches {
            ctx.depth = d0 + 1;
            let match_var = self.core_var(ctx, "__catch-match")?;
            ctx.emit(Op::VarLoad, match_var);
            ctx.push(1);
            ctx.emit(Op::LocalLoad, ex_offset);
            ctx.push(1);
            let cls = ctx
                .chunk
                .add_constant(Value::string(&*catch.class_name));
            ctx.emit(Op::ConstLoad, cls);
            ctx.push(1);
            ctx.emit(Op::Call, 2);
            ctx.pop(2);
            let next_clause = ctx.emit(Op::JumpIfFalse, 0xffff);
            ctx.pop(1);

            let scope_mark = ctx.slot_map.len();
            ctx.map_slot(catch.slot, ex_offset);
            ctx.try_depth += 1;
            self.emit_body(ctx, &catch.body, false)?;
            ctx.try_depth -= 1;
            ctx.slot_map.truncate(scope_mark);
            ctx.emit(Op::PopUnder, 1);
            ctx.pop(1);
            self.emit_finally(ctx, finally)?;
            exits.push(ctx.emit(Op::Jump, 0xffff));
            self.patch_jump(ctx, next_clause)?;
        }
        // no clause matched: run finally, rethrow
        ctx.depth = d0 + 1;
        self.emit_finally(ctx, finally)?;
        ctx.emit(Op::ThrowEx, 0);
        for exit in exits {
            self.patch_jump(ctx, exit)?;
        }
        ctx.depth = d0 + 1;
        ctx.max_depth = ctx.max_depth.max(ctx.depth);
        Ok(())
    }

    /// Finally code runs with the pending result (or exception) on top;
    /// each expression evaluates for effect only.
    fn emit_finally(&self, ctx: &mut ArityCtx, finally: &Option<Vec<Node>>) -> Result<(), Failure> {
        if let Some(stmts) = finally {
            for stmt in stmts {
                self.emit_node(ctx, stmt, false)?;
                ctx.emit(Op::Pop, 0);
                ctx.pop(1);
            }
        }
        Ok(())
    }
}

/// Render a compiled fn and everything it closes over, for
/// `--dump-bytecode`.
pub fn dump_proto(proto: &FnProto, out: &mut String) {
    let label = match (&proto.name, proto.variadic) {
        (Some(n), true) => format!("{}/{}+ ", n, proto.fixed_arity()),
        (Some(n), false) => format!("{}/{}", n, proto.arity),
        (None, _) => format!("fn/{}", proto.arity),
    };
    out.push_str(&disassemble(&proto.chunk, &label));
    for c in &proto.constants_protos() {
        dump_proto(c, out);
    }
    for extra in &proto.extra_arities {
        dump_proto(extra, out);
    }
}

trait ProtoConstants {
    fn constants_protos(&self) -> Vec<Rc<FnProto>>;
}

impl ProtoConstants for FnProto {
    fn constants_protos(&self) -> Vec<Rc<FnProto>> {
        self.chunk
            .constants
            .iter()
            .filter_map(|c| match c {
                Value::Fn(closure) => match &closure.fun {
                    FnKind::Bytecode(p) => Some(p.clone()),
                    FnKind::Tree(_) => None,
                },
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;
    use crate::reader::Reader;

    fn compile(src: &str) -> Rc<FnProto> {
        let env = Env::new();
        for n in ["+", "-", "*", "/", "=", "<", "mod", "__catch-match", "__var", "__set-var"] {
            env.intern("clojure.core", n).set_root(Value::Nil);
        }
        let forms = Reader::new(src, &env, None).read_all().expect("reads");
        let mut analyzer = Analyzer::new(&env, None);
        let analyzed = analyzer.analyze_top(&forms[0]).expect("analyzes");
        Emitter::new(&env)
            .compile_top(&analyzed.node, "test")
            .expect("compiles")
    }

    fn ops(proto: &FnProto) -> Vec<Op> {
        let mut out = Vec::new();
        let mut ip = 0;
        while let Some((op, _)) = proto.chunk.read(ip) {
            out.push(op);
            ip += INSTR_SIZE;
        }
        out
    }

    #[test]
    fn test_constant_forms() {
        let proto = compile("42");
        assert_eq!(ops(&proto), vec![Op::ConstLoad, Op::Ret]);
        let proto = compile("nil");
        assert_eq!(ops(&proto), vec![Op::Nil, Op::Ret]);
    }

    #[test]
    fn test_let_uses_pop_under() {
        let proto = compile("(let [a 1 b 2] b)");
        let ops = ops(&proto);
        assert!(ops.contains(&Op::PopUnder));
        assert!(ops.contains(&Op::LocalLoad));
    }

    #[test]
    fn test_if_patches_jumps() {
        let proto = compile("(if true 1 2)");
        let seq = ops(&proto);
        assert_eq!(
            seq,
            vec![
                Op::TrueVal,
                Op::JumpIfFalse,
                Op::ConstLoad,
                Op::Jump,
                Op::ConstLoad,
                Op::Ret
            ]
        );
        // the false branch target lands beyond the then-branch jump
        let (_, jif_operand) = proto.chunk.read(INSTR_SIZE).expect("jif");
        assert_eq!(jif_operand as usize, 2 * INSTR_SIZE);
    }

    #[test]
    fn test_loop_recur_encoding() {
        let proto = compile("(loop [i 0] (if (< i 3) (recur (+ i 1)) i))");
        let seq = ops(&proto);
        assert!(seq.contains(&Op::Recur));
        assert!(seq.contains(&Op::JumpBack));
        // find the recur operand: base 0, argc 1
        let mut ip = 0;
        while let Some((op, operand)) = proto.chunk.read(ip) {
            if op == Op::Recur {
                assert_eq!(operand >> 8, 0);
                assert_eq!(operand & 0xff, 1);
            }
            if op == Op::JumpBack {
                assert!((operand as i16) < 0);
            }
            ip += INSTR_SIZE;
        }
    }

    #[test]
    fn test_loop_inside_call_args_tracks_depth() {
        // the loop locals sit above the outer call's temporaries; recur
        // must rebind the right offsets
        let proto = compile("(+ 1 (loop [i 0] (if (< i 2) (recur (+ i 1)) i)))");
        let mut ip = 0;
        let mut recur_base = None;
        while let Some((op, operand)) = proto.chunk.read(ip) {
            if op == Op::Recur {
                recur_base = Some(operand >> 8);
            }
            ip += INSTR_SIZE;
        }
        // the callee and one temporary (the literal 1) sit below the
        // loop local
        assert_eq!(recur_base, Some(2));
    }

    #[test]
    fn test_intrinsic_arithmetic() {
        let env = Env::new();
        // a real intrinsic builtin, as the runtime registers them
        static PLUS: cljw_core::value::BuiltinDef = cljw_core::value::BuiltinDef {
            name: "+",
            min_arity: 0,
            max_arity: None,
            intrinsic: Some(Op::Add),
            f: |_, _| Ok(Value::Nil),
        };
        env.intern("clojure.core", "+").set_root(Value::Builtin(&PLUS));
        let forms = Reader::new("(+ 1 2 3)", &env, None).read_all().unwrap();
        let analyzed = Analyzer::new(&env, None).analyze_top(&forms[0]).unwrap();
        let proto = Emitter::new(&env).compile_top(&analyzed.node, "t").unwrap();
        assert_eq!(
            ops(&proto),
            vec![
                Op::ConstLoad,
                Op::ConstLoad,
                Op::Add,
                Op::ConstLoad,
                Op::Add,
                Op::Ret
            ]
        );
    }

    #[test]
    fn test_variadic_identities() {
        let env = Env::new();
        static MUL: cljw_core::value::BuiltinDef = cljw_core::value::BuiltinDef {
            name: "*",
            min_arity: 0,
            max_arity: None,
            intrinsic: Some(Op::Mul),
            f: |_, _| Ok(Value::Nil),
        };
        env.intern("clojure.core", "*").set_root(Value::Builtin(&MUL));
        let forms = Reader::new("(*)", &env, None).read_all().unwrap();
        let analyzed = Analyzer::new(&env, None).analyze_top(&forms[0]).unwrap();
        let proto = Emitter::new(&env).compile_top(&analyzed.node, "t").unwrap();
        assert_eq!(ops(&proto), vec![Op::ConstLoad, Op::Ret]);
        assert_eq!(proto.chunk.constants[0], Value::Int(1));
    }

    #[test]
    fn test_fn_closure_emission() {
        let proto = compile("(let [x 1] (fn* [] x))");
        let seq = ops(&proto);
        assert!(seq.contains(&Op::Closure));
        // the child proto reads its capture through upvalue_load
        let child = proto
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Fn(cl) => match &cl.fun {
                    FnKind::Bytecode(p) => Some(p.clone()),
                    _ => None,
                },
                _ => None,
            })
            .expect("child proto constant");
        assert_eq!(child.capture_slots, vec![0]);
        assert!(ops(&child).contains(&Op::UpvalueLoad));
    }

    #[test]
    fn test_tail_call_emitted_in_tail_position() {
        let proto = compile("(fn* f [x] (f x))");
        let child = proto
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Fn(cl) => match &cl.fun {
                    FnKind::Bytecode(p) => Some(p.clone()),
                    _ => None,
                },
                _ => None,
            })
            .expect("fn constant");
        assert!(ops(&child).contains(&Op::TailCall));
    }

    #[test]
    fn test_try_emits_handler_section() {
        let proto = compile("(try 1 (catch Exception e 2))");
        let seq = ops(&proto);
        assert!(seq.contains(&Op::TryBegin));
        assert!(seq.contains(&Op::TryEnd));
        assert!(seq.contains(&Op::CatchBegin));
        assert!(seq.contains(&Op::ThrowEx));
    }
}
