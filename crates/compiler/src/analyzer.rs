//! Analyzer: forms to Nodes.
//!
//! Special forms dispatch through a static table; everything else is a
//! macro expansion (driven by the runtime environment through the call
//! bridge, on unevaluated forms) or an ordinary call. Lexical scope is a
//! stack of `{name, slot}` bindings per enclosing fn; free variables are
//! threaded through intervening fns as captures. Destructuring and `for`
//! are expanded here, at the form level, so neither back end ever sees
//! them.

use cljw_core::ast::{Analyzed, CaptureSrc, Catch, FnArity, FnDef, Node};
use cljw_core::collections::{PersistentList, PersistentMap};
use cljw_core::env::Env;
use cljw_core::error::{CljError, ErrorKind, Failure, SourcePos};
use cljw_core::symbol::Symbol;
use cljw_core::value::Value;
use std::rc::Rc;
use tracing::trace;

const MAX_MACRO_EXPANSIONS: usize = 512;

/// `Math/…`, `System/…` and friends map to a fixed set of host builtins.
const HOST_CLASS_TABLE: &[(&str, &str, &str)] = &[
    ("Math", "abs", "__abs"),
    ("Math", "floor", "__floor"),
    ("Math", "ceil", "__ceil"),
    ("Math", "sqrt", "__sqrt"),
    ("Math", "pow", "__pow"),
    ("Math", "min", "min"),
    ("Math", "max", "max"),
    ("System", "getenv", "__getenv"),
    ("System", "nanoTime", "__nano-time"),
    ("System", "currentTimeMillis", "__current-time-millis"),
    ("System", "exit", "__exit"),
    ("Integer", "parseInt", "__parse-int"),
    ("String", "valueOf", "str"),
];

struct LocalBinding {
    name: Rc<str>,
    slot: u16,
}

#[derive(Default)]
struct FnScope {
    locals: Vec<LocalBinding>,
    n_slots: u16,
    max_slots: u16,
    /// Union across arities, in discovery order.
    captures: Vec<CaptureSrc>,
    capture_names: Vec<Rc<str>>,
    /// Binding counts of active recur targets, innermost last.
    loop_targets: Vec<usize>,
}

pub struct Analyzer<'e> {
    env: &'e Env,
    fns: Vec<FnScope>,
    pos: Vec<SourcePos>,
    expansions: usize,
    file: Option<Rc<str>>,
}

impl<'e> Analyzer<'e> {
    pub fn new(env: &'e Env, file: Option<Rc<str>>) -> Self {
        Analyzer {
            env,
            fns: Vec::new(),
            pos: Vec::new(),
            expansions: 0,
            file,
        }
    }

    /// Analyze one top-level form. The implicit top frame gets its own
    /// slot count so `let` works outside any fn.
    pub fn analyze_top(&mut self, form: &Value) -> Result<Analyzed, Failure> {
        self.fns.clear();
        self.pos.clear();
        self.expansions = 0;
        self.fns.push(FnScope::default());
        let node = self.analyze(form)?;
        let scope = self.fns.pop().expect("top scope pushed above");
        Ok(Analyzed {
            node,
            local_count: scope.max_slots,
        })
    }

    fn cur_pos(&self) -> Option<SourcePos> {
        self.pos.last().cloned()
    }

    fn fail<T>(&self, kind: ErrorKind, msg: impl Into<String>) -> Result<T, Failure> {
        Err(Failure::Error(
            CljError::new(kind, msg).with_pos(self.cur_pos().as_ref()),
        ))
    }

    fn gensym(&self, base: &str) -> Symbol {
        Symbol::simple(&format!("{}__{}", base, self.env.next_gensym()))
    }

    // --- scope helpers ---------------------------------------------------

    fn scope(&mut self) -> &mut FnScope {
        self.fns.last_mut().expect("a fn scope is always active")
    }

    fn alloc_slot(&mut self) -> u16 {
        let scope = self.scope();
        let slot = scope.n_slots;
        scope.n_slots += 1;
        scope.max_slots = scope.max_slots.max(scope.n_slots);
        slot
    }

    fn bind_local(&mut self, name: Rc<str>) -> u16 {
        let slot = self.alloc_slot();
        self.scope().locals.push(LocalBinding { name, slot });
        slot
    }

    /// Resolve a name against the lexical environment, threading captures
    /// through every intervening fn.
    fn resolve_local(&mut self, name: &str) -> Option<Node> {
        let depth = self.fns.len();
        // innermost fn's own locals
        if let Some(b) = self.fns[depth - 1].locals.iter().rev().find(|b| &*b.name == name) {
            return Some(Node::Local(b.slot));
        }
        // outer fns: find the defining level
        let mut found: Option<(usize, u16)> = None;
        for level in (0..depth - 1).rev() {
            if let Some(b) = self.fns[level].locals.iter().rev().find(|b| &*b.name == name) {
                found = Some((level, b.slot));
                break;
            }
        }
        let (def_level, def_slot) = found?;
        // thread the capture down through every intervening fn; each level
        // dedupes by name so the index is stable across references
        let mut src = CaptureSrc::ParentLocal(def_slot);
        for level in def_level + 1..depth {
            let scope = &mut self.fns[level];
            let idx = match scope.capture_names.iter().position(|n| &**n == name) {
                Some(idx) => idx as u16,
                None => {
                    scope.captures.push(src);
                    scope.capture_names.push(name.into());
                    (scope.captures.len() - 1) as u16
                }
            };
            src = CaptureSrc::ParentCapture(idx);
        }
        match src {
            CaptureSrc::ParentCapture(idx) => Some(Node::CaptureRef(idx)),
            CaptureSrc::ParentLocal(_) => unreachable!("loop above always rewrites src"),
        }
    }

    // --- main dispatch ---------------------------------------------------

    pub fn analyze(&mut self, form: &Value) -> Result<Node, Failure> {
        match form {
            Value::Symbol(sym) => self.analyze_symbol(sym),
            Value::List(list) => {
                if list.is_empty() {
                    return Ok(Node::Const(form.clone()));
                }
                let pushed = match list.meta().and_then(meta_pos(self.file.clone())) {
                    Some(pos) => {
                        self.pos.push(pos);
                        true
                    }
                    None => false,
                };
                let result = self.analyze_list(list);
                if pushed {
                    self.pos.pop();
                }
                result
            }
            Value::Vector(v) => {
                if let Some(c) = literal_const(form) {
                    return Ok(Node::Const(c));
                }
                let items = v
                    .iter()
                    .map(|f| self.analyze(f))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Node::VecLit(items))
            }
            Value::Map(m) => {
                if let Some(c) = literal_const(form) {
                    return Ok(Node::Const(c));
                }
                let pairs = m
                    .iter()
                    .map(|(k, v)| Ok((self.analyze(k)?, self.analyze(v)?)))
                    .collect::<Result<Vec<_>, Failure>>()?;
                Ok(Node::MapLit(pairs))
            }
            Value::Set(s) => {
                if let Some(c) = literal_const(form) {
                    return Ok(Node::Const(c));
                }
                let items = s
                    .iter()
                    .map(|f| self.analyze(f))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Node::SetLit(items))
            }
            // macros freely return cons chains and lazy seqs as code
            Value::Cons(_) | Value::LazySeq(_) => {
                let items = self.env.realize_seq_via_bridge(form)?;
                self.analyze(&Value::List(PersistentList::from_vec(items)))
            }
            other => Ok(Node::Const(other.clone())),
        }
    }

    fn analyze_symbol(&mut self, sym: &Symbol) -> Result<Node, Failure> {
        if sym.ns.is_none() {
            if let Some(node) = self.resolve_local(&sym.name) {
                return Ok(node);
            }
        }
        if let Some(ns) = &sym.ns {
            if let Some((_, _, builtin)) = HOST_CLASS_TABLE
                .iter()
                .find(|(class, member, _)| ns.as_ref() == *class && sym.name.as_ref() == *member)
            {
                let var = self
                    .env
                    .resolve(&Symbol::qualified("clojure.core", builtin))
                    .map_err(|e| Failure::Error(e.with_pos(self.cur_pos().as_ref())))?;
                return Ok(Node::VarRef(var));
            }
            if HOST_CLASS_TABLE.iter().any(|(class, _, _)| ns.as_ref() == *class) {
                return self.fail(
                    ErrorKind::Name,
                    format!("no such host member: {}/{}", ns, sym.name),
                );
            }
        }
        match self.env.resolve(sym) {
            Ok(var) => Ok(Node::VarRef(var)),
            Err(e) => Err(Failure::Error(e.with_pos(self.cur_pos().as_ref()))),
        }
    }

    fn analyze_list(&mut self, list: &PersistentList) -> Result<Node, Failure> {
        let items: Vec<Value> = list.iter().cloned().collect();
        if let Value::Symbol(head) = &items[0] {
            if head.ns.is_none() {
                match &*head.name {
                    "if" => return self.analyze_if(&items),
                    "do" => {
                        let body = self.analyze_body(&items[1..])?;
                        return Ok(Node::Do(body));
                    }
                    "let" | "let*" => return self.analyze_let(&items, false),
                    "loop" | "loop*" => return self.analyze_let(&items, true),
                    "fn" | "fn*" => return self.analyze_fn(&items),
                    "def" => return self.analyze_def(&items, false),
                    "defmacro" => return self.analyze_defmacro(&items),
                    "quote" => {
                        if items.len() != 2 {
                            return self.fail(ErrorKind::Arity, "quote expects one form");
                        }
                        return Ok(Node::Const(items[1].clone()));
                    }
                    "var" => return self.analyze_var_quote(&items),
                    "recur" => return self.analyze_recur(&items),
                    "throw" => {
                        if items.len() != 2 {
                            return self.fail(ErrorKind::Arity, "throw expects one form");
                        }
                        let expr = Box::new(self.analyze(&items[1])?);
                        return Ok(Node::Throw {
                            expr,
                            pos: self.cur_pos(),
                        });
                    }
                    "try" => return self.analyze_try(&items),
                    "set!" => return self.analyze_set(&items),
                    "defmulti" => return self.analyze_defmulti(&items),
                    "defmethod" => return self.analyze_defmethod(&items),
                    "defprotocol" => return self.analyze_defprotocol(&items),
                    "extend-type" => return self.analyze_extend_type(&items),
                    "defrecord" => return self.analyze_defrecord(&items),
                    "for" => return self.analyze_for(&items),
                    _ => {}
                }
            }
            // macro expansion on the unevaluated argument forms
            if let Ok(var) = self.env.resolve(head) {
                if var.is_macro.get() {
                    if self.expansions >= MAX_MACRO_EXPANSIONS {
                        return self.fail(ErrorKind::Internal, "macro expansion too deep");
                    }
                    self.expansions += 1;
                    let macro_fn = var
                        .deref()
                        .map_err(|e| Failure::Error(e.with_pos(self.cur_pos().as_ref())))?;
                    trace!(macro_name = %var.qualified_name(), "expanding macro");
                    let expanded = self
                        .env
                        .call_fn(&macro_fn, &items[1..])
                        .map_err(|f| f.with_pos(self.cur_pos().as_ref()))?;
                    return self.analyze(&expanded);
                }
            }
        }
        let callee = Box::new(self.analyze(&items[0])?);
        let args = items[1..]
            .iter()
            .map(|f| self.analyze(f))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Node::Call {
            callee,
            args,
            pos: self.cur_pos(),
        })
    }

    fn analyze_body(&mut self, forms: &[Value]) -> Result<Vec<Node>, Failure> {
        forms.iter().map(|f| self.analyze(f)).collect()
    }

    fn analyze_if(&mut self, items: &[Value]) -> Result<Node, Failure> {
        if items.len() < 3 || items.len() > 4 {
            return self.fail(ErrorKind::Arity, "if expects a test, a then and an optional else");
        }
        Ok(Node::If {
            test: Box::new(self.analyze(&items[1])?),
            then: Box::new(self.analyze(&items[2])?),
            els: match items.get(3) {
                Some(f) => Some(Box::new(self.analyze(f)?)),
                None => None,
            },
        })
    }

    fn analyze_let(&mut self, items: &[Value], is_loop: bool) -> Result<Node, Failure> {
        let name = if is_loop { "loop" } else { "let" };
        let bindings_form = match items.get(1) {
            Some(Value::Vector(v)) => v,
            _ => return self.fail(ErrorKind::Syntax, format!("{} requires a binding vector", name)),
        };
        if bindings_form.count() % 2 != 0 {
            return self.fail(
                ErrorKind::Syntax,
                format!("{} requires an even number of binding forms", name),
            );
        }
        let pairs: Vec<(Value, Value)> = bindings_form
            .as_slice()
            .chunks(2)
            .map(|c| (c[0].clone(), c[1].clone()))
            .collect();
        let body = &items[2..];

        if is_loop {
            // loop binds plain symbols; destructuring moves into the body
            // so recur rebinds exactly the loop locals
            let mut loop_syms = Vec::new();
            let mut inner_lets = Vec::new();
            for (pattern, init) in &pairs {
                match pattern {
                    Value::Symbol(s) if s.ns.is_none() => {
                        loop_syms.push((s.as_ref().clone(), init.clone()));
                    }
                    _ => {
                        let tmp = self.gensym("loop");
                        loop_syms.push((tmp.clone(), init.clone()));
                        inner_lets.push((pattern.clone(), Value::symbol(tmp)));
                    }
                }
            }
            let saved_locals = self.scope().locals.len();
            let saved_slots = self.scope().n_slots;
            let mut bindings = Vec::new();
            for (sym, init) in &loop_syms {
                let node = self.analyze(init)?;
                let slot = self.bind_local(sym.name.clone());
                bindings.push((slot, node));
            }
            self.scope().loop_targets.push(bindings.len());
            let body_nodes = if inner_lets.is_empty() {
                self.analyze_body(body)?
            } else {
                let mut let_form = vec![Value::symbol(Symbol::simple("let*"))];
                let mut bvec = Vec::new();
                for (pattern, init) in inner_lets {
                    bvec.push(pattern);
                    bvec.push(init);
                }
                let_form.push(Value::vector(bvec));
                let_form.extend(body.iter().cloned());
                vec![self.analyze(&Value::list(let_form))?]
            };
            self.scope().loop_targets.pop();
            let scope = self.scope();
            scope.locals.truncate(saved_locals);
            scope.n_slots = saved_slots;
            return Ok(Node::Loop {
                bindings,
                body: body_nodes,
            });
        }

        // let: expand destructuring into a flat binding list
        let mut flat = Vec::new();
        for (pattern, init) in &pairs {
            self.destructure(pattern, init.clone(), &mut flat)?;
        }
        let saved_locals = self.scope().locals.len();
        let saved_slots = self.scope().n_slots;
        let mut bindings = Vec::new();
        for (sym, init) in &flat {
            let node = self.analyze(init)?;
            let slot = self.bind_local(sym.name.clone());
            bindings.push((slot, node));
        }
        let body_nodes = self.analyze_body(body)?;
        let scope = self.scope();
        scope.locals.truncate(saved_locals);
        scope.n_slots = saved_slots;
        Ok(Node::Let {
            bindings,
            body: body_nodes,
        })
    }

    fn analyze_fn(&mut self, items: &[Value]) -> Result<Node, Failure> {
        let mut idx = 1;
        let name = match items.get(idx) {
            Some(Value::Symbol(s)) => {
                idx += 1;
                Some(s.name.clone())
            }
            _ => None,
        };
        let mut arity_forms: Vec<(Vec<Value>, Vec<Value>)> = Vec::new();
        match items.get(idx) {
            Some(Value::Vector(params)) => {
                arity_forms.push((
                    params.iter().cloned().collect(),
                    items[idx + 1..].to_vec(),
                ));
            }
            Some(Value::List(_)) => {
                for arity in &items[idx..] {
                    let Value::List(l) = arity else {
                        return self.fail(ErrorKind::Syntax, "fn arity must be a list");
                    };
                    let arity_items: Vec<Value> = l.iter().cloned().collect();
                    let Some(Value::Vector(params)) = arity_items.first() else {
                        return self
                            .fail(ErrorKind::Syntax, "fn arity must start with a parameter vector");
                    };
                    arity_forms.push((
                        params.iter().cloned().collect(),
                        arity_items[1..].to_vec(),
                    ));
                }
            }
            _ => return self.fail(ErrorKind::Syntax, "fn requires a parameter vector"),
        }
        if arity_forms.is_empty() {
            return self.fail(ErrorKind::Syntax, "fn requires at least one arity");
        }

        self.fns.push(FnScope::default());
        let mut arities = Vec::new();
        let mut result = Ok(());
        for (params, body) in &arity_forms {
            match self.analyze_arity(&name, params, body) {
                Ok(arity) => arities.push(arity),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        let scope = self.fns.pop().expect("fn scope pushed above");
        result?;

        let mut seen_fixed = Vec::new();
        let mut variadics = 0;
        for arity in &arities {
            if arity.variadic {
                variadics += 1;
            } else {
                if seen_fixed.contains(&arity.n_params) {
                    return self.fail(ErrorKind::Syntax, "can't have two overloads with same arity");
                }
                seen_fixed.push(arity.n_params);
            }
        }
        if variadics > 1 {
            return self.fail(ErrorKind::Syntax, "can't have more than one variadic overload");
        }

        Ok(Node::Fn(Rc::new(FnDef {
            name,
            arities,
            captures: scope.captures,
            pos: self.cur_pos(),
        })))
    }

    fn analyze_arity(
        &mut self,
        name: &Option<Rc<str>>,
        params: &[Value],
        body: &[Value],
    ) -> Result<FnArity, Failure> {
        {
            let scope = self.scope();
            scope.locals.clear();
            scope.n_slots = 0;
            scope.max_slots = 0;
            scope.loop_targets.clear();
        }
        let mut param_names: Vec<Rc<str>> = Vec::new();
        let mut destructured: Vec<(Value, Symbol)> = Vec::new();
        let mut variadic = false;
        let mut it = params.iter().peekable();
        while let Some(p) = it.next() {
            if let Value::Symbol(s) = p {
                if s.ns.is_none() && &*s.name == "&" {
                    variadic = true;
                    let rest = it.next().ok_or_else(|| {
                        Failure::Error(
                            CljError::new(ErrorKind::Syntax, "missing rest parameter after &")
                                .with_pos(self.cur_pos().as_ref()),
                        )
                    })?;
                    match rest {
                        Value::Symbol(s) if s.ns.is_none() => param_names.push(s.name.clone()),
                        pattern => {
                            let tmp = self.gensym("rest");
                            param_names.push(tmp.name.clone());
                            destructured.push((pattern.clone(), tmp));
                        }
                    }
                    if it.peek().is_some() {
                        return self.fail(ErrorKind::Syntax, "only one rest parameter allowed");
                    }
                    break;
                }
            }
            match p {
                Value::Symbol(s) if s.ns.is_none() => param_names.push(s.name.clone()),
                pattern => {
                    let tmp = self.gensym("p");
                    param_names.push(tmp.name.clone());
                    destructured.push((pattern.clone(), tmp));
                }
            }
        }
        let n_params = param_names.len() as u16;

        // params take slots 0..n; the self-name slot follows and is
        // shadowed by any param of the same name
        let self_slot = name.as_ref().map(|n| {
            let slot = n_params;
            self.scope().locals.push(LocalBinding {
                name: n.clone(),
                slot,
            });
            slot
        });
        {
            let scope = self.scope();
            scope.n_slots = n_params + if self_slot.is_some() { 1 } else { 0 };
            scope.max_slots = scope.n_slots;
            for (i, pname) in param_names.iter().enumerate() {
                scope.locals.push(LocalBinding {
                    name: pname.clone(),
                    slot: i as u16,
                });
            }
            scope.loop_targets.push(n_params as usize);
        }

        let body_nodes = if destructured.is_empty() {
            self.analyze_body(body)?
        } else {
            let mut let_form = vec![Value::symbol(Symbol::simple("let*"))];
            let mut bvec = Vec::new();
            for (pattern, tmp) in destructured {
                bvec.push(pattern);
                bvec.push(Value::symbol(tmp));
            }
            let_form.push(Value::vector(bvec));
            let_form.extend(body.iter().cloned());
            vec![self.analyze(&Value::list(let_form))?]
        };
        self.scope().loop_targets.pop();
        let scope = self.scope();
        Ok(FnArity {
            n_params,
            variadic,
            local_count: scope.max_slots,
            self_slot,
            body: body_nodes,
        })
    }

    fn analyze_def(&mut self, items: &[Value], is_macro: bool) -> Result<Node, Failure> {
        let sym = match items.get(1) {
            Some(Value::Symbol(s)) => s.as_ref().clone(),
            _ => return self.fail(ErrorKind::Syntax, "def requires a symbol name"),
        };
        if let Some(ns) = &sym.ns {
            if **ns != *self.env.current_ns().name {
                return self.fail(ErrorKind::Value, "can't def a var in another namespace");
            }
        }
        let (doc, init) = match items.len() {
            2 => (None, None),
            3 => (None, Some(&items[2])),
            4 => match &items[2] {
                Value::Str(s) => (Some(s.clone()), Some(&items[3])),
                _ => return self.fail(ErrorKind::Syntax, "def docstring must be a string"),
            },
            _ => return self.fail(ErrorKind::Arity, "too many arguments to def"),
        };

        let var = self.env.current_ns().intern(&sym.name);
        let mut meta = sym.meta.clone().unwrap_or_default();
        if let Some(doc) = doc {
            meta = meta.assoc(Value::keyword("doc"), Value::Str(doc));
        }
        if let Some(pos) = self.cur_pos() {
            meta = meta.assoc(Value::keyword("line"), Value::Int(pos.line as i64));
            if let Some(file) = &pos.file {
                meta = meta.assoc(Value::keyword("file"), Value::string(&**file));
            }
        }
        let truthy = |m: &PersistentMap, k: &str| {
            m.get(&Value::keyword(k)).is_some_and(|v| v.is_truthy())
        };
        if is_macro || truthy(&meta, "macro") {
            var.is_macro.set(true);
            meta = meta.assoc(Value::keyword("macro"), Value::Bool(true));
        }
        if truthy(&meta, "dynamic") {
            var.is_dynamic.set(true);
        }
        if truthy(&meta, "private") {
            var.is_private.set(true);
        }
        if truthy(&meta, "const") {
            var.is_const.set(true);
        }
        *var.meta.borrow_mut() = Some(meta);

        let init = match init {
            Some(form) => Some(Box::new(self.analyze(form)?)),
            None => None,
        };
        Ok(Node::Def {
            var,
            init,
            pos: self.cur_pos(),
        })
    }

    fn analyze_defmacro(&mut self, items: &[Value]) -> Result<Node, Failure> {
        if items.len() < 3 {
            return self.fail(ErrorKind::Arity, "defmacro requires a name and a body");
        }
        let name = items[1].clone();
        let mut idx = 2;
        let mut doc = None;
        if let Value::Str(s) = &items[idx] {
            doc = Some(Value::Str(s.clone()));
            idx += 1;
        }
        // (defmacro name [params] body…) → (def name (fn* name [params] body…))
        let mut fn_form = vec![
            Value::symbol(Symbol::simple("fn*")),
            name.clone(),
        ];
        fn_form.extend(items[idx..].iter().cloned());
        let mut def_form = vec![Value::symbol(Symbol::simple("def")), name];
        if let Some(doc) = doc {
            def_form.push(doc);
        }
        def_form.push(Value::list(fn_form));
        self.analyze_def(&def_form, true)
    }

    fn analyze_var_quote(&mut self, items: &[Value]) -> Result<Node, Failure> {
        let sym = match items.get(1) {
            Some(Value::Symbol(s)) if items.len() == 2 => s.clone(),
            _ => return self.fail(ErrorKind::Syntax, "var expects a symbol"),
        };
        match self.env.resolve(&sym) {
            Ok(var) => Ok(Node::VarQuote(var)),
            // not interned yet: defer to run time (forward references)
            Err(_) => Ok(Node::DeferredVarQuote(sym)),
        }
    }

    fn analyze_recur(&mut self, items: &[Value]) -> Result<Node, Failure> {
        let args = self.analyze_body(&items[1..])?;
        let expected = match self.scope().loop_targets.last() {
            Some(n) => *n,
            None => return self.fail(ErrorKind::Syntax, "recur outside of fn or loop"),
        };
        if args.len() != expected {
            return self.fail(
                ErrorKind::Arity,
                format!(
                    "recur expects {} arguments to match its target, got {}",
                    expected,
                    args.len()
                ),
            );
        }
        Ok(Node::Recur { args })
    }

    fn analyze_try(&mut self, items: &[Value]) -> Result<Node, Failure> {
        let mut body = Vec::new();
        let mut catches = Vec::new();
        let mut finally = None;
        for form in &items[1..] {
            let head = list_head_name(form);
            match head.as_deref() {
                Some("catch") => {
                    let Value::List(l) = form else { unreachable!("list_head_name checked") };
                    let parts: Vec<Value> = l.iter().cloned().collect();
                    if parts.len() < 3 {
                        return self.fail(
                            ErrorKind::Syntax,
                            "catch requires a class symbol and a binding",
                        );
                    }
                    let class_name = match &parts[1] {
                        Value::Symbol(s) => s.name.clone(),
                        _ => return self.fail(ErrorKind::Syntax, "catch class must be a symbol"),
                    };
                    let bind = match &parts[2] {
                        Value::Symbol(s) if s.ns.is_none() => s.name.clone(),
                        _ => return self.fail(ErrorKind::Syntax, "catch binding must be a symbol"),
                    };
                    let saved_locals = self.scope().locals.len();
                    let saved_slots = self.scope().n_slots;
                    let slot = self.bind_local(bind);
                    let cbody = self.analyze_body(&parts[3..])?;
                    let scope = self.scope();
                    scope.locals.truncate(saved_locals);
                    scope.n_slots = saved_slots;
                    catches.push(Catch {
                        class_name,
                        slot,
                        body: cbody,
                    });
                }
                Some("finally") => {
                    let Value::List(l) = form else { unreachable!("list_head_name checked") };
                    let parts: Vec<Value> = l.iter().skip(1).cloned().collect();
                    if finally.is_some() {
                        return self.fail(ErrorKind::Syntax, "only one finally clause allowed");
                    }
                    finally = Some(self.analyze_body(&parts)?);
                }
                _ => {
                    if !catches.is_empty() || finally.is_some() {
                        return self.fail(
                            ErrorKind::Syntax,
                            "try body forms must precede catch/finally",
                        );
                    }
                    body.push(self.analyze(form)?);
                }
            }
        }
        Ok(Node::Try {
            body,
            catches,
            finally,
        })
    }

    fn analyze_set(&mut self, items: &[Value]) -> Result<Node, Failure> {
        if items.len() != 3 {
            return self.fail(ErrorKind::Arity, "set! expects a target and a value");
        }
        let sym = match &items[1] {
            Value::Symbol(s) => s,
            _ => return self.fail(ErrorKind::Value, "set! target must be a var"),
        };
        let var = self
            .env
            .resolve(sym)
            .map_err(|e| Failure::Error(e.with_pos(self.cur_pos().as_ref())))?;
        Ok(Node::SetVar {
            var,
            expr: Box::new(self.analyze(&items[2])?),
        })
    }

    // --- multimethods, protocols, records (lowered to builtin calls) ----

    fn core_call(&mut self, builtin: &str, args: Vec<Node>) -> Result<Node, Failure> {
        let var = self
            .env
            .resolve(&Symbol::qualified("clojure.core", builtin))
            .map_err(|e| Failure::Error(e.with_pos(self.cur_pos().as_ref())))?;
        Ok(Node::Call {
            callee: Box::new(Node::VarRef(var)),
            args,
            pos: self.cur_pos(),
        })
    }

    fn analyze_defmulti(&mut self, items: &[Value]) -> Result<Node, Failure> {
        if items.len() != 3 {
            return self.fail(ErrorKind::Arity, "defmulti expects a name and a dispatch fn");
        }
        let Value::Symbol(name) = &items[1] else {
            return self.fail(ErrorKind::Syntax, "defmulti name must be a symbol");
        };
        let dispatch = self.analyze(&items[2])?;
        let init = self.core_call(
            "__defmulti",
            vec![Node::Const(Value::string(&*name.name)), dispatch],
        )?;
        let def_items = [
            Value::symbol(Symbol::simple("def")),
            items[1].clone(),
            Value::Nil, // placeholder; init node substituted below
        ];
        // reuse analyze_def for flag/meta handling, then replace the init
        let node = self.analyze_def(&def_items, false)?;
        match node {
            Node::Def { var, pos, .. } => Ok(Node::Def {
                var,
                init: Some(Box::new(init)),
                pos,
            }),
            _ => unreachable!("analyze_def returns a Def node"),
        }
    }

    fn analyze_defmethod(&mut self, items: &[Value]) -> Result<Node, Failure> {
        if items.len() < 4 {
            return self.fail(
                ErrorKind::Arity,
                "defmethod expects a multifn, a dispatch value and an fn tail",
            );
        }
        let multifn = self.analyze(&items[1])?;
        let dispatch_val = self.analyze(&items[2])?;
        let mut fn_form = vec![Value::symbol(Symbol::simple("fn*"))];
        fn_form.extend(items[3..].iter().cloned());
        let method = self.analyze(&Value::list(fn_form))?;
        self.core_call("__defmethod", vec![multifn, dispatch_val, method])
    }

    fn analyze_defprotocol(&mut self, items: &[Value]) -> Result<Node, Failure> {
        let Some(Value::Symbol(name)) = items.get(1) else {
            return self.fail(ErrorKind::Syntax, "defprotocol name must be a symbol");
        };
        let mut sig_pairs = Vec::new();
        let mut method_names = Vec::new();
        for sig in &items[2..] {
            let Value::List(l) = sig else {
                return self.fail(ErrorKind::Syntax, "protocol method signature must be a list");
            };
            let parts: Vec<Value> = l.iter().cloned().collect();
            let Some(Value::Symbol(m)) = parts.first() else {
                return self.fail(ErrorKind::Syntax, "protocol method name must be a symbol");
            };
            let arglists: Vec<Value> = parts[1..]
                .iter()
                .filter(|p| matches!(p, Value::Vector(_)))
                .cloned()
                .collect();
            if arglists.is_empty() {
                return self.fail(
                    ErrorKind::Syntax,
                    "protocol method requires at least one argument vector",
                );
            }
            sig_pairs.push((
                Value::string(&*m.name),
                Value::vector(arglists),
            ));
            method_names.push(m.name.clone());
        }
        let proto_var = self.env.current_ns().intern(&name.name);
        let proto_init = self.core_call(
            "__defprotocol",
            vec![
                Node::Const(Value::string(&*name.name)),
                Node::Const(Value::Map(PersistentMap::from_pairs(sig_pairs))),
            ],
        )?;
        let mut nodes = vec![Node::Def {
            var: proto_var.clone(),
            init: Some(Box::new(proto_init)),
            pos: self.cur_pos(),
        }];
        for method in method_names {
            let mvar = self.env.current_ns().intern(&method);
            let init = self.core_call(
                "__protocol-fn",
                vec![
                    Node::VarRef(proto_var.clone()),
                    Node::Const(Value::string(&*method)),
                ],
            )?;
            nodes.push(Node::Def {
                var: mvar,
                init: Some(Box::new(init)),
                pos: self.cur_pos(),
            });
        }
        Ok(Node::Do(nodes))
    }

    fn analyze_extend_type(&mut self, items: &[Value]) -> Result<Node, Failure> {
        let Some(Value::Symbol(type_sym)) = items.get(1) else {
            return self.fail(ErrorKind::Syntax, "extend-type requires a type symbol");
        };
        let type_key = type_keyword_for(&type_sym.name);
        let mut nodes = Vec::new();
        let mut idx = 2;
        while idx < items.len() {
            let Value::Symbol(_) = &items[idx] else {
                return self.fail(ErrorKind::Syntax, "expected protocol symbol in extend-type");
            };
            let proto = self.analyze(&items[idx])?;
            idx += 1;
            let mut impl_pairs = Vec::new();
            while idx < items.len() {
                match &items[idx] {
                    Value::List(l) => {
                        let parts: Vec<Value> = l.iter().cloned().collect();
                        let Some(Value::Symbol(m)) = parts.first() else {
                            return self
                                .fail(ErrorKind::Syntax, "method impl must start with a symbol");
                        };
                        let mut fn_form = vec![Value::symbol(Symbol::simple("fn*"))];
                        fn_form.extend(parts[1..].iter().cloned());
                        let method_fn = self.analyze(&Value::list(fn_form))?;
                        impl_pairs.push((
                            Node::Const(Value::string(&*m.name)),
                            method_fn,
                        ));
                        idx += 1;
                    }
                    Value::Symbol(_) => break,
                    _ => {
                        return self
                            .fail(ErrorKind::Syntax, "unexpected form in extend-type body");
                    }
                }
            }
            nodes.push(self.core_call(
                "__extend-type",
                vec![
                    Node::Const(type_key.clone()),
                    proto,
                    Node::MapLit(impl_pairs),
                ],
            )?);
        }
        nodes.push(Node::Const(Value::Nil));
        Ok(Node::Do(nodes))
    }

    fn analyze_defrecord(&mut self, items: &[Value]) -> Result<Node, Failure> {
        let Some(Value::Symbol(name)) = items.get(1) else {
            return self.fail(ErrorKind::Syntax, "defrecord name must be a symbol");
        };
        let Some(Value::Vector(fields)) = items.get(2) else {
            return self.fail(ErrorKind::Syntax, "defrecord requires a field vector");
        };
        for f in fields.iter() {
            if !matches!(f, Value::Symbol(s) if s.ns.is_none()) {
                return self.fail(ErrorKind::Syntax, "defrecord fields must be symbols");
            }
        }
        // (defrecord Name [a b]) → (def ->Name (fn* ->Name [a b]
        //   {:__reify_type :Name :a a :b b}))
        let ctor_name = format!("->{}", name.name);
        let mut map_form = vec![
            Value::symbol(Symbol::qualified("clojure.core", "hash-map")),
            Value::keyword("__reify_type"),
            Value::Keyword(cljw_core::symbol::Keyword::intern(None, &name.name)),
        ];
        for f in fields.iter() {
            let Value::Symbol(s) = f else { unreachable!("fields checked above") };
            map_form.push(Value::Keyword(cljw_core::symbol::Keyword::intern(
                None, &s.name,
            )));
            map_form.push(f.clone());
        }
        let fn_form = Value::list(vec![
            Value::symbol(Symbol::simple("fn*")),
            Value::symbol(Symbol::simple(&ctor_name)),
            Value::Vector(fields.clone()),
            Value::list(map_form),
        ]);
        let def_form = vec![
            Value::symbol(Symbol::simple("def")),
            Value::symbol(Symbol::simple(&ctor_name)),
            fn_form,
        ];
        self.analyze_def(&def_form, false)
    }

    // --- for -------------------------------------------------------------

    /// `(for [seq-exprs] body)` expands into nested map/mapcat with
    /// `:let`/`:when`/`:while` handled left to right.
    fn analyze_for(&mut self, items: &[Value]) -> Result<Node, Failure> {
        if items.len() != 3 {
            return self.fail(ErrorKind::Arity, "for expects a binding vector and a body");
        }
        let Value::Vector(spec) = &items[1] else {
            return self.fail(ErrorKind::Syntax, "for requires a binding vector");
        };
        let spec: Vec<Value> = spec.iter().cloned().collect();
        if spec.len() % 2 != 0 {
            return self.fail(ErrorKind::Syntax, "for requires an even number of forms");
        }

        struct Group {
            binding: Value,
            source: Value,
            lets: Vec<(Value, Value)>,
            guards: Vec<(bool, Value)>, // (is_while, predicate)
        }
        let mut groups: Vec<Group> = Vec::new();
        let mut i = 0;
        while i < spec.len() {
            let k = &spec[i];
            let v = spec[i + 1].clone();
            i += 2;
            match k {
                Value::Keyword(kw) if kw.ns().is_none() => {
                    let Some(group) = groups.last_mut() else {
                        return self.fail(ErrorKind::Syntax, "for modifier before any binding");
                    };
                    match kw.name() {
                        "let" => {
                            let Value::Vector(lets) = &v else {
                                return self
                                    .fail(ErrorKind::Syntax, ":let requires a binding vector");
                            };
                            for c in lets.as_slice().chunks(2) {
                                if c.len() != 2 {
                                    return self.fail(
                                        ErrorKind::Syntax,
                                        ":let requires an even number of forms",
                                    );
                                }
                                group.lets.push((c[0].clone(), c[1].clone()));
                            }
                        }
                        "when" => group.guards.push((false, v)),
                        "while" => group.guards.push((true, v)),
                        other => {
                            return self.fail(
                                ErrorKind::Syntax,
                                format!("unsupported for modifier: :{}", other),
                            );
                        }
                    }
                }
                binding => groups.push(Group {
                    binding: binding.clone(),
                    source: v,
                    lets: Vec::new(),
                    guards: Vec::new(),
                }),
            }
        }
        if groups.is_empty() {
            return self.fail(ErrorKind::Syntax, "for requires at least one binding");
        }

        // build from the innermost group out
        let mut acc = items[2].clone();
        let n = groups.len();
        for (gi, group) in groups.iter().enumerate().rev() {
            let let_wrap = |inner: Value, lets: &[(Value, Value)]| -> Value {
                if lets.is_empty() {
                    return inner;
                }
                let mut bvec = Vec::new();
                for (p, e) in lets {
                    bvec.push(p.clone());
                    bvec.push(e.clone());
                }
                Value::list(vec![
                    Value::symbol(Symbol::simple("let*")),
                    Value::vector(bvec),
                    inner,
                ])
            };
            let mut source = group.source.clone();
            for (is_while, pred) in &group.guards {
                let pred_fn = Value::list(vec![
                    Value::symbol(Symbol::simple("fn*")),
                    Value::vector(vec![group.binding.clone()]),
                    let_wrap(pred.clone(), &group.lets),
                ]);
                let op = if *is_while { "take-while" } else { "filter" };
                source = Value::list(vec![
                    Value::symbol(Symbol::qualified("clojure.core", op)),
                    pred_fn,
                    source,
                ]);
            }
            let body_fn = Value::list(vec![
                Value::symbol(Symbol::simple("fn*")),
                Value::vector(vec![group.binding.clone()]),
                let_wrap(acc, &group.lets),
            ]);
            let op = if gi == n - 1 { "map" } else { "mapcat" };
            acc = Value::list(vec![
                Value::symbol(Symbol::qualified("clojure.core", op)),
                body_fn,
                source,
            ]);
        }
        self.analyze(&acc)
    }

    // --- destructuring ---------------------------------------------------

    /// Expand a binding pattern against an init form into flat
    /// (symbol, form) pairs, in binding order.
    fn destructure(
        &mut self,
        pattern: &Value,
        init: Value,
        out: &mut Vec<(Symbol, Value)>,
    ) -> Result<(), Failure> {
        match pattern {
            Value::Symbol(s) if s.ns.is_none() => {
                if &*s.name == "&" {
                    return self.fail(ErrorKind::Syntax, "& is not a valid binding symbol");
                }
                out.push((s.as_ref().clone(), init));
                Ok(())
            }
            Value::Vector(v) => self.destructure_seq(v.as_slice(), init, out),
            Value::Map(m) => self.destructure_map(m, init, out),
            other => self.fail(
                ErrorKind::Syntax,
                format!("unsupported binding form: {}", cljw_core::printer::pr_str(other)),
            ),
        }
    }

    fn destructure_seq(
        &mut self,
        parts: &[Value],
        init: Value,
        out: &mut Vec<(Symbol, Value)>,
    ) -> Result<(), Failure> {
        let temp = self.gensym("vec");
        out.push((temp.clone(), init));
        let temp_form = Value::symbol(temp.clone());
        let mut idx = 0i64;
        let mut i = 0;
        while i < parts.len() {
            match &parts[i] {
                Value::Symbol(s) if s.ns.is_none() && &*s.name == "&" => {
                    let rest_pattern = parts.get(i + 1).ok_or_else(|| {
                        Failure::Error(
                            CljError::new(ErrorKind::Syntax, "missing binding after &")
                                .with_pos(self.cur_pos().as_ref()),
                        )
                    })?;
                    let rest_form = Value::list(vec![
                        Value::symbol(Symbol::qualified("clojure.core", "nthrest")),
                        temp_form.clone(),
                        Value::Int(idx),
                    ]);
                    self.destructure(rest_pattern, rest_form, out)?;
                    i += 2;
                }
                Value::Keyword(kw) if kw.ns().is_none() && kw.name() == "as" => {
                    let as_sym = match parts.get(i + 1) {
                        Some(Value::Symbol(s)) if s.ns.is_none() => s.as_ref().clone(),
                        _ => {
                            return self.fail(ErrorKind::Syntax, ":as requires a symbol");
                        }
                    };
                    out.push((as_sym, temp_form.clone()));
                    i += 2;
                }
                pattern => {
                    let elem = Value::list(vec![
                        Value::symbol(Symbol::qualified("clojure.core", "nth")),
                        temp_form.clone(),
                        Value::Int(idx),
                        Value::Nil,
                    ]);
                    self.destructure(pattern, elem, out)?;
                    idx += 1;
                    i += 1;
                }
            }
        }
        Ok(())
    }

    fn destructure_map(
        &mut self,
        m: &PersistentMap,
        init: Value,
        out: &mut Vec<(Symbol, Value)>,
    ) -> Result<(), Failure> {
        let temp = self.gensym("map");
        out.push((temp.clone(), init));
        // a seq argument (rest kwargs) coerces to a map
        out.push((
            temp.clone(),
            Value::list(vec![
                Value::symbol(Symbol::qualified("clojure.core", "__seq-to-map")),
                Value::symbol(temp.clone()),
            ]),
        ));
        let temp_form = Value::symbol(temp.clone());

        let defaults = match m.get(&Value::keyword("or")) {
            Some(Value::Map(d)) => d.clone(),
            Some(_) => return self.fail(ErrorKind::Syntax, ":or requires a map of defaults"),
            None => PersistentMap::empty(),
        };
        let lookup = |key: Value, name: &str| -> Value {
            match defaults.get(&Value::symbol(Symbol::simple(name))) {
                Some(default) => Value::list(vec![
                    Value::symbol(Symbol::qualified("clojure.core", "get")),
                    temp_form.clone(),
                    key,
                    default.clone(),
                ]),
                None => Value::list(vec![
                    Value::symbol(Symbol::qualified("clojure.core", "get")),
                    temp_form.clone(),
                    key,
                ]),
            }
        };

        for (k, v) in m.iter() {
            match k {
                Value::Keyword(kw) => {
                    let (kw_ns, kw_name) = (kw.ns(), kw.name());
                    match kw_name {
                        "keys" | "syms" | "strs" => {
                            let Value::Vector(names) = v else {
                                return self.fail(
                                    ErrorKind::Syntax,
                                    format!(":{} requires a vector of names", kw_name),
                                );
                            };
                            for name_form in names.iter() {
                                let bound = match name_form {
                                    Value::Symbol(s) => s.as_ref().clone(),
                                    Value::Keyword(k2) if kw_name == "keys" => {
                                        Symbol::simple(k2.name())
                                    }
                                    _ => {
                                        return self.fail(
                                            ErrorKind::Syntax,
                                            format!("invalid :{} entry", kw_name),
                                        );
                                    }
                                };
                                let key = match kw_name {
                                    "keys" => {
                                        let ns = kw_ns.map(str::to_string).or_else(|| {
                                            match name_form {
                                                Value::Symbol(s) => {
                                                    s.ns.as_deref().map(str::to_string)
                                                }
                                                Value::Keyword(k2) => {
                                                    k2.ns().map(str::to_string)
                                                }
                                                _ => None,
                                            }
                                        });
                                        Value::Keyword(cljw_core::symbol::Keyword::intern(
                                            ns.as_deref(),
                                            &bound.name,
                                        ))
                                    }
                                    "strs" => Value::string(&*bound.name),
                                    _ => {
                                        let sym = match kw_ns {
                                            Some(ns) => Symbol::qualified(ns, &bound.name),
                                            None => Symbol::simple(&bound.name),
                                        };
                                        Value::list(vec![
                                            Value::symbol(Symbol::simple("quote")),
                                            Value::symbol(sym),
                                        ])
                                    }
                                };
                                out.push((
                                    Symbol::simple(&bound.name),
                                    lookup(key, &bound.name),
                                ));
                            }
                        }
                        "as" => {
                            let Value::Symbol(s) = v else {
                                return self.fail(ErrorKind::Syntax, ":as requires a symbol");
                            };
                            out.push((s.as_ref().clone(), temp_form.clone()));
                        }
                        "or" => {}
                        _ => {
                            return self.fail(
                                ErrorKind::Syntax,
                                format!("unsupported map binding key: :{}", kw_name),
                            );
                        }
                    }
                }
                // explicit entry: pattern on the left, key form on the right
                pattern => {
                    let key = match v {
                        Value::Symbol(_) => Value::list(vec![
                            Value::symbol(Symbol::simple("quote")),
                            v.clone(),
                        ]),
                        other => other.clone(),
                    };
                    let bound_name = match pattern {
                        Value::Symbol(s) => s.name.to_string(),
                        _ => String::new(),
                    };
                    let form = lookup(key, &bound_name);
                    self.destructure(pattern, form, out)?;
                }
            }
        }
        Ok(())
    }
}

/// Pure-literal forms fold straight to constants.
fn literal_const(form: &Value) -> Option<Value> {
    fn is_literal(form: &Value) -> bool {
        match form {
            Value::Symbol(_) | Value::List(_) => false,
            Value::Vector(v) => v.iter().all(is_literal),
            Value::Map(m) => m.iter().all(|(k, v)| is_literal(k) && is_literal(v)),
            Value::Set(s) => s.iter().all(is_literal),
            _ => true,
        }
    }
    if is_literal(form) { Some(form.clone()) } else { None }
}

fn list_head_name(form: &Value) -> Option<String> {
    if let Value::List(l) = form {
        if let Some(Value::Symbol(s)) = l.first() {
            if s.ns.is_none() {
                return Some(s.name.to_string());
            }
        }
    }
    None
}

fn meta_pos(file: Option<Rc<str>>) -> impl Fn(&PersistentMap) -> Option<SourcePos> {
    move |meta: &PersistentMap| {
        let line = match meta.get(&Value::keyword("line")) {
            Some(Value::Int(l)) => *l as u32,
            _ => return None,
        };
        let column = match meta.get(&Value::keyword("column")) {
            Some(Value::Int(c)) => *c as u32,
            _ => 0,
        };
        // forms read from a file carry it in their position metadata
        let file = match meta.get(&Value::keyword("file")) {
            Some(Value::Str(f)) => Some(f.clone()),
            _ => file.clone(),
        };
        Some(SourcePos::new(file, line, column))
    }
}

fn type_keyword_for(type_name: &str) -> Value {
    let tag = match type_name {
        "String" => "string",
        "Long" | "Integer" => "int",
        "Double" | "Float" => "float",
        "Boolean" => "boolean",
        "Character" => "char",
        "Keyword" => "keyword",
        "Symbol" => "symbol",
        "PersistentList" | "List" => "list",
        "PersistentVector" | "Vector" => "vector",
        "PersistentArrayMap" | "PersistentHashMap" | "Map" => "map",
        "PersistentHashSet" | "Set" => "set",
        "Fn" | "IFn" => "fn",
        "Atom" => "atom",
        "Object" => "default",
        "nil" => "nil",
        other => return Value::Keyword(cljw_core::symbol::Keyword::intern(None, other)),
    };
    Value::Keyword(cljw_core::symbol::Keyword::intern(None, tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;

    fn analyze_src(env: &Env, src: &str) -> Result<Vec<Analyzed>, Failure> {
        let forms = Reader::new(src, env, None)
            .read_all()
            .map_err(Failure::Error)?;
        let mut analyzer = Analyzer::new(env, None);
        forms.iter().map(|f| analyzer.analyze_top(f)).collect()
    }

    fn env_with(names: &[&str]) -> Rc<Env> {
        let env = Env::new();
        for n in names {
            env.intern("clojure.core", n).set_root(Value::Nil);
        }
        env
    }

    #[test]
    fn test_let_assigns_slots() {
        let env = env_with(&[]);
        let out = analyze_src(&env, "(let [a 1 b 2] b)").unwrap();
        assert_eq!(out[0].local_count, 2);
        match &out[0].node {
            Node::Let { bindings, body } => {
                assert_eq!(bindings.len(), 2);
                assert!(matches!(body[0], Node::Local(1)));
            }
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn test_sibling_lets_reuse_slots() {
        let env = env_with(&[]);
        let out = analyze_src(&env, "(do (let [a 1] a) (let [b 2] b))").unwrap();
        assert_eq!(out[0].local_count, 1);
    }

    #[test]
    fn test_unresolved_symbol_is_name_error() {
        let env = env_with(&[]);
        let err = analyze_src(&env, "nope").unwrap_err();
        match err {
            Failure::Error(e) => assert_eq!(e.kind, ErrorKind::Name),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_fn_captures_outer_local() {
        let env = env_with(&[]);
        let out = analyze_src(&env, "(let [x 1] (fn* [] x))").unwrap();
        let Node::Let { body, .. } = &out[0].node else {
            panic!("expected let");
        };
        let Node::Fn(def) = &body[0] else {
            panic!("expected fn");
        };
        assert_eq!(def.captures, vec![CaptureSrc::ParentLocal(0)]);
        assert!(matches!(def.arities[0].body[0], Node::CaptureRef(0)));
    }

    #[test]
    fn test_nested_capture_threads_through() {
        let env = env_with(&[]);
        let out = analyze_src(&env, "(let [x 1] (fn* [] (fn* [] x)))").unwrap();
        let Node::Let { body, .. } = &out[0].node else { panic!() };
        let Node::Fn(outer) = &body[0] else { panic!() };
        assert_eq!(outer.captures, vec![CaptureSrc::ParentLocal(0)]);
        let Node::Fn(inner) = &outer.arities[0].body[0] else { panic!() };
        assert_eq!(inner.captures, vec![CaptureSrc::ParentCapture(0)]);
    }

    #[test]
    fn test_fn_self_name_and_params() {
        let env = env_with(&[]);
        let out = analyze_src(&env, "(fn* f [a b] (f a b))").unwrap();
        let Node::Fn(def) = &out[0].node else { panic!() };
        let arity = &def.arities[0];
        assert_eq!(arity.n_params, 2);
        assert_eq!(arity.self_slot, Some(2));
        let Node::Call { callee, .. } = &arity.body[0] else { panic!() };
        assert!(matches!(**callee, Node::Local(2)));
    }

    #[test]
    fn test_variadic_fn() {
        let env = env_with(&[]);
        let out = analyze_src(&env, "(fn* [a & rest] rest)").unwrap();
        let Node::Fn(def) = &out[0].node else { panic!() };
        assert!(def.arities[0].variadic);
        assert_eq!(def.arities[0].n_params, 2);
    }

    #[test]
    fn test_recur_arity_checked() {
        let env = env_with(&[]);
        let err = analyze_src(&env, "(loop [i 0] (recur 1 2))").unwrap_err();
        match err {
            Failure::Error(e) => assert_eq!(e.kind, ErrorKind::Arity),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_recur_outside_loop_rejected() {
        let env = env_with(&[]);
        assert!(analyze_src(&env, "(recur 1)").is_err());
    }

    #[test]
    fn test_destructuring_expands_to_gets() {
        let env = env_with(&["nth", "get", "nthrest", "__seq-to-map"]);
        let out = analyze_src(&env, "(let [{:keys [a b]} {:a 1}] a)").unwrap();
        // temp + coerced temp + a + b
        let Node::Let { bindings, .. } = &out[0].node else { panic!() };
        assert_eq!(bindings.len(), 4);
    }

    #[test]
    fn test_sequential_destructuring_with_rest() {
        let env = env_with(&["nth", "get", "nthrest", "__seq-to-map"]);
        let out = analyze_src(&env, "(let [[a & more :as all] [1 2 3]] more)").unwrap();
        let Node::Let { bindings, .. } = &out[0].node else { panic!() };
        // temp + a + more + all
        assert_eq!(bindings.len(), 4);
    }

    #[test]
    fn test_def_flags_from_meta() {
        let env = env_with(&[]);
        analyze_src(&env, "(def ^:private ^:dynamic *x* 1)").unwrap();
        let var = env.resolve(&Symbol::simple("*x*")).unwrap();
        assert!(var.is_private.get());
        assert!(var.is_dynamic.get());
    }

    #[test]
    fn test_def_docstring() {
        let env = env_with(&[]);
        analyze_src(&env, "(def answer \"the answer\" 42)").unwrap();
        let var = env.resolve(&Symbol::simple("answer")).unwrap();
        let meta = var.meta.borrow().clone().unwrap();
        assert_eq!(
            meta.get(&Value::keyword("doc")),
            Some(&Value::string("the answer"))
        );
    }

    #[test]
    fn test_defmacro_sets_flag() {
        let env = env_with(&[]);
        analyze_src(&env, "(defmacro noop [x] x)").unwrap();
        let var = env.resolve(&Symbol::simple("noop")).unwrap();
        assert!(var.is_macro.get());
    }

    #[test]
    fn test_var_quote_defers_unknown() {
        let env = env_with(&[]);
        let out = analyze_src(&env, "(var future-thing)").unwrap();
        assert!(matches!(&out[0].node, Node::DeferredVarQuote(_)));
    }

    #[test]
    fn test_try_catch_finally_shape() {
        let env = env_with(&[]);
        let out =
            analyze_src(&env, "(try 1 (catch Exception e 2) (finally 3))").unwrap();
        let Node::Try {
            body,
            catches,
            finally,
        } = &out[0].node
        else {
            panic!()
        };
        assert_eq!(body.len(), 1);
        assert_eq!(catches.len(), 1);
        assert_eq!(&*catches[0].class_name, "Exception");
        assert!(finally.is_some());
    }

    #[test]
    fn test_for_expands_to_map_calls() {
        let env = env_with(&["map", "mapcat", "filter", "take-while", "nth", "get", "nthrest", "__seq-to-map"]);
        let out = analyze_src(&env, "(for [x xs :when x y x] [x y])");
        // xs is unresolved: expansion still requires name resolution
        assert!(out.is_err());
        let env = env_with(&["map", "mapcat", "filter", "take-while", "xs"]);
        let out = analyze_src(&env, "(for [x xs :when x y xs] [x y])").unwrap();
        assert!(matches!(out[0].node, Node::Call { .. }));
    }

    #[test]
    fn test_literal_collections_fold_to_const() {
        let env = env_with(&[]);
        let out = analyze_src(&env, "[1 {:a 2} #{3}]").unwrap();
        assert!(matches!(out[0].node, Node::Const(_)));
    }

    #[test]
    fn test_host_class_mapping() {
        let env = env_with(&["__abs"]);
        let out = analyze_src(&env, "Math/abs").unwrap();
        match &out[0].node {
            Node::VarRef(var) => assert_eq!(&*var.name, "__abs"),
            other => panic!("expected var ref, got {:?}", other),
        }
    }

    #[test]
    fn test_set_bang_targets_var() {
        let env = env_with(&[]);
        env.intern("clojure.core", "*mode*").is_dynamic.set(true);
        let out = analyze_src(&env, "(set! *mode* 1)").unwrap();
        assert!(matches!(out[0].node, Node::SetVar { .. }));
    }
}
