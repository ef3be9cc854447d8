//! Reader: tokens to forms, with read-time expansion.
//!
//! Forms are plain Values — code is data — so macro results re-enter the
//! analyzer without conversion. Lists carry `{:line :column}` metadata for
//! error reporting. Read-time expansion covers quote, deref, var-quote,
//! syntax-quote (with auto-gensym), `#()` fn literals, `#_` discard,
//! `#?`/`#?@` reader conditionals against the `{:cw :default}` platform
//! set, namespaced maps, and `#"…"` regex literals compiled on the spot.
//!
//! Reader limits (nesting depth, string size, collection count) fail with
//! a syntax error rather than exhausting the process.

use crate::token::{Dispatch, Token, TokenKind, Tokenizer};
use cljw_core::collections::{PersistentList, PersistentMap, PersistentSet, PersistentVector};
use cljw_core::env::Env;
use cljw_core::error::{CljError, ErrorKind, SourcePos};
use cljw_core::symbol::{Keyword, Symbol};
use cljw_core::value::{RegexPattern, Value};
use std::collections::HashMap;
use std::rc::Rc;

/// The platform tag this reader answers to in `#?` conditionals.
pub const PLATFORM_TAG: &str = "cw";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderLimits {
    pub max_depth: usize,
    pub max_string_size: usize,
    pub max_collection_count: usize,
}

impl Default for ReaderLimits {
    fn default() -> Self {
        ReaderLimits {
            max_depth: 1024,
            max_string_size: 1024 * 1024,
            max_collection_count: 100_000,
        }
    }
}

pub struct Reader<'a> {
    tokens: Tokenizer<'a>,
    peeked: Option<Token>,
    env: &'a Env,
    limits: ReaderLimits,
    depth: usize,
    in_fn_lit: bool,
    file: Option<Rc<str>>,
}

impl<'a> Reader<'a> {
    pub fn new(src: &'a str, env: &'a Env, file: Option<Rc<str>>) -> Self {
        Reader::with_limits(src, env, file, ReaderLimits::default())
    }

    pub fn with_limits(
        src: &'a str,
        env: &'a Env,
        file: Option<Rc<str>>,
        limits: ReaderLimits,
    ) -> Self {
        Reader {
            tokens: Tokenizer::new(src, file.clone()),
            peeked: None,
            env,
            limits,
            depth: 0,
            in_fn_lit: false,
            file,
        }
    }

    /// Read every top-level form.
    pub fn read_all(&mut self) -> Result<Vec<Value>, CljError> {
        let mut forms = Vec::new();
        while let Some(form) = self.read_next()? {
            forms.push(form);
        }
        Ok(forms)
    }

    /// The next top-level form, or `None` at end of input.
    pub fn read_next(&mut self) -> Result<Option<Value>, CljError> {
        loop {
            if self.peek_token()?.kind == TokenKind::Eof {
                return Ok(None);
            }
            let mut out = Vec::new();
            self.read_unit(&mut out)?;
            match out.len() {
                0 => continue,
                1 => return Ok(out.pop()),
                _ => {
                    return Err(self.err_here(
                        ErrorKind::Syntax,
                        "splicing reader conditional not in list context",
                    ));
                }
            }
        }
    }

    fn peek_token(&mut self) -> Result<&Token, CljError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.tokens.next_token()?);
        }
        Ok(self.peeked.as_ref().expect("just filled"))
    }

    fn next_token(&mut self) -> Result<Token, CljError> {
        match self.peeked.take() {
            Some(tok) => Ok(tok),
            None => self.tokens.next_token(),
        }
    }

    fn pos_of(&self, tok: &Token) -> SourcePos {
        SourcePos::new(self.file.clone(), tok.line, tok.column)
    }

    fn err_here(&mut self, kind: ErrorKind, msg: impl Into<String>) -> CljError {
        let pos = self.tokens.pos();
        CljError::at(kind, msg, pos)
    }

    /// Read exactly one form, looping over units that produce nothing.
    fn read_one(&mut self) -> Result<Value, CljError> {
        loop {
            if self.peek_token()?.kind == TokenKind::Eof {
                return Err(self.err_here(ErrorKind::Syntax, "EOF while reading"));
            }
            let mut out = Vec::new();
            self.read_unit(&mut out)?;
            match out.len() {
                0 => continue,
                1 => return Ok(out.pop().expect("len checked")),
                _ => {
                    return Err(self.err_here(
                        ErrorKind::Syntax,
                        "splicing reader conditional not in list context",
                    ));
                }
            }
        }
    }

    /// Read one syntactic unit, appending zero or more values (discard
    /// appends none; `#?@` may append several).
    fn read_unit(&mut self, out: &mut Vec<Value>) -> Result<(), CljError> {
        let tok = self.next_token()?;
        let pos = self.pos_of(&tok);
        match tok.kind {
            TokenKind::Eof => Err(CljError::at(ErrorKind::Syntax, "EOF while reading", pos)),
            TokenKind::Nil => {
                out.push(Value::Nil);
                Ok(())
            }
            TokenKind::True => {
                out.push(Value::Bool(true));
                Ok(())
            }
            TokenKind::False => {
                out.push(Value::Bool(false));
                Ok(())
            }
            TokenKind::Int(i) => {
                out.push(Value::Int(i));
                Ok(())
            }
            TokenKind::Float(f) => {
                out.push(Value::Float(f));
                Ok(())
            }
            TokenKind::Ratio(n, d) => {
                // no ratio variant in the value model: normalize
                if n % d == 0 {
                    out.push(Value::Int(n / d));
                } else {
                    out.push(Value::Float(n as f64 / d as f64));
                }
                Ok(())
            }
            TokenKind::Str(raw) => {
                let s = self.unescape_string(&raw, &pos)?;
                out.push(Value::string(s));
                Ok(())
            }
            TokenKind::CharLit(raw) => {
                out.push(Value::Char(parse_char(&raw, &pos)?));
                Ok(())
            }
            TokenKind::Keyword(text) => {
                out.push(self.read_keyword(&text, &pos)?);
                Ok(())
            }
            TokenKind::Symbol(text) => {
                out.push(Value::symbol(Symbol::parse(&text)));
                Ok(())
            }
            TokenKind::LParen => {
                let items = self.read_delimited(TokenKind::RParen, &pos)?;
                let list = PersistentList::from_vec(items).with_meta(Some(pos_meta(&pos)));
                out.push(Value::List(list));
                Ok(())
            }
            TokenKind::LBracket => {
                let items = self.read_delimited(TokenKind::RBracket, &pos)?;
                out.push(Value::Vector(PersistentVector::from_vec(items)));
                Ok(())
            }
            TokenKind::LBrace => {
                let items = self.read_delimited(TokenKind::RBrace, &pos)?;
                out.push(self.build_map(items, &pos, None)?);
                Ok(())
            }
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => Err(CljError::at(
                ErrorKind::Syntax,
                "unmatched delimiter",
                pos,
            )),
            TokenKind::Quote => {
                let form = self.read_one()?;
                out.push(list2(Value::symbol(Symbol::simple("quote")), form));
                Ok(())
            }
            TokenKind::Deref => {
                let form = self.read_one()?;
                out.push(list2(
                    Value::symbol(Symbol::qualified("clojure.core", "deref")),
                    form,
                ));
                Ok(())
            }
            TokenKind::Unquote => {
                let form = self.read_one()?;
                out.push(list2(
                    Value::symbol(Symbol::qualified("clojure.core", "unquote")),
                    form,
                ));
                Ok(())
            }
            TokenKind::UnquoteSplicing => {
                let form = self.read_one()?;
                out.push(list2(
                    Value::symbol(Symbol::qualified("clojure.core", "unquote-splicing")),
                    form,
                ));
                Ok(())
            }
            TokenKind::SyntaxQuote => {
                let form = self.read_one()?;
                let mut gensyms = HashMap::new();
                out.push(self.syntax_quote(&form, &mut gensyms, &pos)?);
                Ok(())
            }
            TokenKind::Caret => {
                let meta = self.read_meta_form(&pos)?;
                let target = self.read_one()?;
                out.push(apply_meta(target, meta, &pos)?);
                Ok(())
            }
            TokenKind::Dispatch(d) => self.read_dispatch(d, out, &pos),
        }
    }

    fn read_dispatch(
        &mut self,
        d: Dispatch,
        out: &mut Vec<Value>,
        pos: &SourcePos,
    ) -> Result<(), CljError> {
        match d {
            Dispatch::Discard => {
                let _ = self.read_one()?;
                Ok(())
            }
            Dispatch::Set => {
                let items = self.read_delimited(TokenKind::RBrace, pos)?;
                let n = items.len();
                let set = PersistentSet::from_vec(items);
                if set.count() != n {
                    return Err(CljError::at(
                        ErrorKind::Syntax,
                        "duplicate member in set literal",
                        pos.clone(),
                    ));
                }
                out.push(Value::Set(set));
                Ok(())
            }
            Dispatch::Regex(raw) => {
                let source = unescape_regex(&raw);
                let regex = regex::Regex::new(&source).map_err(|e| {
                    CljError::at(
                        ErrorKind::Syntax,
                        format!("invalid regex literal: {}", e),
                        pos.clone(),
                    )
                })?;
                out.push(Value::Regex(Rc::new(RegexPattern { source, regex })));
                Ok(())
            }
            Dispatch::VarQuote => {
                let form = self.read_one()?;
                out.push(list2(Value::symbol(Symbol::simple("var")), form));
                Ok(())
            }
            Dispatch::Meta => {
                let meta = self.read_meta_form(pos)?;
                let target = self.read_one()?;
                out.push(apply_meta(target, meta, pos)?);
                Ok(())
            }
            Dispatch::FnLit => {
                if self.in_fn_lit {
                    return Err(CljError::at(
                        ErrorKind::Syntax,
                        "nested #() are not allowed",
                        pos.clone(),
                    ));
                }
                self.in_fn_lit = true;
                let items = self.read_delimited(TokenKind::RParen, pos);
                self.in_fn_lit = false;
                let body = Value::List(
                    PersistentList::from_vec(items?).with_meta(Some(pos_meta(pos))),
                );
                out.push(self.lower_fn_literal(body, pos));
                Ok(())
            }
            Dispatch::Eval => Err(CljError::at(
                ErrorKind::Syntax,
                "read-eval (#=) is not supported",
                pos.clone(),
            )),
            Dispatch::Symbolic(name) => {
                out.push(Value::Float(match name.as_str() {
                    "Inf" => f64::INFINITY,
                    "-Inf" => f64::NEG_INFINITY,
                    _ => f64::NAN,
                }));
                Ok(())
            }
            Dispatch::ReaderCond => {
                if let Some(form) = self.read_reader_cond(pos)? {
                    out.push(form);
                }
                Ok(())
            }
            Dispatch::ReaderCondSplicing => {
                if let Some(form) = self.read_reader_cond(pos)? {
                    for item in seq_items(&form).ok_or_else(|| {
                        CljError::at(
                            ErrorKind::Syntax,
                            "#?@ branch must be sequential",
                            pos.clone(),
                        )
                    })? {
                        out.push(item);
                    }
                }
                Ok(())
            }
            Dispatch::NsMap(ns_text) => {
                let brace = self.next_token()?;
                if brace.kind != TokenKind::LBrace {
                    return Err(CljError::at(
                        ErrorKind::Syntax,
                        "namespaced map must be followed by a map",
                        pos.clone(),
                    ));
                }
                let items = self.read_delimited(TokenKind::RBrace, pos)?;
                let ns = self.resolve_ns_map_ns(&ns_text, pos)?;
                out.push(self.build_map(items, pos, Some(ns))?);
                Ok(())
            }
            Dispatch::Tag(tag) => {
                let _ = self.read_one()?;
                Err(CljError::at(
                    ErrorKind::Syntax,
                    format!("no reader function for tag {}", tag),
                    pos.clone(),
                ))
            }
        }
    }

    fn read_delimited(
        &mut self,
        end: TokenKind,
        opener: &SourcePos,
    ) -> Result<Vec<Value>, CljError> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            self.depth -= 1;
            return Err(CljError::at(
                ErrorKind::Syntax,
                format!("exceeded maximum reader depth ({})", self.limits.max_depth),
                opener.clone(),
            ));
        }
        let mut items = Vec::new();
        let result = loop {
            let tok = self.peek_token()?;
            if tok.kind == end {
                self.next_token()?;
                break Ok(items);
            }
            if tok.kind == TokenKind::Eof {
                break Err(CljError::at(
                    ErrorKind::Syntax,
                    format!(
                        "EOF while reading, expected {} to match delimiter opened at {}",
                        delim_name(&end),
                        opener
                    ),
                    opener.clone(),
                ));
            }
            if matches!(
                tok.kind,
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace
            ) {
                let tok = self.next_token()?;
                let here = self.pos_of(&tok);
                break Err(CljError::at(
                    ErrorKind::Syntax,
                    format!(
                        "mismatched delimiter, expected {} to match delimiter opened at {}",
                        delim_name(&end),
                        opener
                    ),
                    here,
                ));
            }
            self.read_unit(&mut items)?;
            if items.len() > self.limits.max_collection_count {
                break Err(CljError::at(
                    ErrorKind::Syntax,
                    format!(
                        "collection exceeds maximum size ({})",
                        self.limits.max_collection_count
                    ),
                    opener.clone(),
                ));
            }
        };
        self.depth -= 1;
        result
    }

    fn build_map(
        &mut self,
        items: Vec<Value>,
        pos: &SourcePos,
        ns: Option<String>,
    ) -> Result<Value, CljError> {
        if items.len() % 2 != 0 {
            return Err(CljError::at(
                ErrorKind::Syntax,
                "map literal must contain an even number of forms",
                pos.clone(),
            ));
        }
        let n_pairs = items.len() / 2;
        let mut pairs = Vec::with_capacity(n_pairs);
        let mut iter = items.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            let k = match (&ns, &k) {
                (Some(ns), Value::Keyword(kw)) if kw.ns().is_none() => {
                    Value::Keyword(Keyword::intern(Some(ns), kw.name()))
                }
                _ => k,
            };
            pairs.push((k, v));
        }
        let map = PersistentMap::from_pairs(pairs);
        if map.count() != n_pairs {
            return Err(CljError::at(
                ErrorKind::Syntax,
                "duplicate key in map literal",
                pos.clone(),
            ));
        }
        Ok(Value::Map(map))
    }

    fn read_keyword(&mut self, text: &str, pos: &SourcePos) -> Result<Value, CljError> {
        if let Some(auto) = text.strip_prefix(':') {
            // ::name or ::alias/name
            let sym = Symbol::parse(auto);
            let ns = match &sym.ns {
                None => self.env.current_ns().name.to_string(),
                Some(alias) => self
                    .env
                    .current_ns()
                    .resolve_alias(alias)
                    .map(|n| n.to_string())
                    .ok_or_else(|| {
                        CljError::at(
                            ErrorKind::Syntax,
                            format!("invalid keyword: no namespace alias {}", alias),
                            pos.clone(),
                        )
                    })?,
            };
            return Ok(Value::Keyword(Keyword::intern(Some(&ns), &sym.name)));
        }
        Ok(Value::Keyword(Keyword::parse(text)))
    }

    fn resolve_ns_map_ns(&mut self, text: &str, pos: &SourcePos) -> Result<String, CljError> {
        if let Some(auto) = text.strip_prefix(':') {
            if auto.is_empty() {
                return Ok(self.env.current_ns().name.to_string());
            }
            return self
                .env
                .current_ns()
                .resolve_alias(auto)
                .map(|n| n.to_string())
                .ok_or_else(|| {
                    CljError::at(
                        ErrorKind::Syntax,
                        format!("no namespace alias {}", auto),
                        pos.clone(),
                    )
                });
        }
        Ok(text.to_string())
    }

    fn read_meta_form(&mut self, pos: &SourcePos) -> Result<PersistentMap, CljError> {
        let form = self.read_one()?;
        match form {
            Value::Keyword(k) => Ok(PersistentMap::from_pairs(vec![(
                Value::Keyword(k),
                Value::Bool(true),
            )])),
            Value::Symbol(_) | Value::Str(_) => Ok(PersistentMap::from_pairs(vec![(
                Value::keyword("tag"),
                form,
            )])),
            Value::Map(m) => Ok(m),
            other => Err(CljError::at(
                ErrorKind::Syntax,
                format!("metadata must be a symbol, keyword, string or map, got {}", other.type_tag()),
                pos.clone(),
            )),
        }
    }

    fn read_reader_cond(&mut self, pos: &SourcePos) -> Result<Option<Value>, CljError> {
        let open = self.next_token()?;
        if open.kind != TokenKind::LParen {
            return Err(CljError::at(
                ErrorKind::Syntax,
                "reader conditional body must be a list",
                pos.clone(),
            ));
        }
        let items = self.read_delimited(TokenKind::RParen, pos)?;
        if items.len() % 2 != 0 {
            return Err(CljError::at(
                ErrorKind::Syntax,
                "reader conditional requires an even number of forms",
                pos.clone(),
            ));
        }
        let mut chosen = None;
        let mut iter = items.into_iter();
        while let (Some(tag), Some(form)) = (iter.next(), iter.next()) {
            let tag_name = match &tag {
                Value::Keyword(k) if k.ns().is_none() => k.name().to_string(),
                _ => {
                    return Err(CljError::at(
                        ErrorKind::Syntax,
                        "reader conditional tag must be a keyword",
                        pos.clone(),
                    ));
                }
            };
            if chosen.is_none() && (tag_name == PLATFORM_TAG || tag_name == "default") {
                chosen = Some(form);
            }
            // unknown tags were read and are skipped
        }
        Ok(chosen)
    }

    /// `#(… %1 %2 %& …)` lowers to `(fn* [p1 p2 & rest] (…))`.
    fn lower_fn_literal(&mut self, body: Value, pos: &SourcePos) -> Value {
        let id = self.env.next_gensym();
        let mut max_pos = 0u32;
        let mut has_rest = false;
        scan_percents(&body, &mut max_pos, &mut has_rest);
        let mut params = Vec::new();
        let mut mapping: HashMap<String, Symbol> = HashMap::new();
        for i in 1..=max_pos {
            let p = Symbol::simple(&format!("p{}__{}", i, id));
            mapping.insert(format!("%{}", i), p.clone());
            if i == 1 {
                mapping.insert("%".to_string(), p.clone());
            }
            params.push(Value::symbol(p));
        }
        if has_rest {
            let r = Symbol::simple(&format!("rest__{}", id));
            mapping.insert("%&".to_string(), r.clone());
            params.push(Value::symbol(Symbol::simple("&")));
            params.push(Value::symbol(r));
        }
        let body = replace_percents(&body, &mapping);
        Value::List(
            PersistentList::from_vec(vec![
                Value::symbol(Symbol::simple("fn*")),
                Value::vector(params),
                body,
            ])
            .with_meta(Some(pos_meta(pos))),
        )
    }

    // --- syntax quote ----------------------------------------------------

    fn syntax_quote(
        &mut self,
        form: &Value,
        gensyms: &mut HashMap<String, Symbol>,
        pos: &SourcePos,
    ) -> Result<Value, CljError> {
        match form {
            Value::Symbol(sym) => {
                let resolved = self.resolve_sq_symbol(sym, gensyms);
                Ok(list2(
                    Value::symbol(Symbol::simple("quote")),
                    Value::symbol(resolved),
                ))
            }
            Value::List(l) => {
                if let Some(inner) = unquoted(form) {
                    return Ok(inner);
                }
                if unquote_spliced(form).is_some() {
                    return Err(CljError::at(
                        ErrorKind::Syntax,
                        "splice not in list",
                        pos.clone(),
                    ));
                }
                if l.is_empty() {
                    return Ok(Value::list(vec![core_sym("list")]));
                }
                let concat = self.sq_concat(l.iter(), gensyms, pos)?;
                Ok(list2(core_sym("seq"), concat))
            }
            Value::Vector(v) => {
                let concat = self.sq_concat(v.iter(), gensyms, pos)?;
                Ok(Value::list(vec![
                    core_sym("apply"),
                    core_sym("vector"),
                    list2(core_sym("seq"), concat),
                ]))
            }
            Value::Map(m) => {
                let mut flat = Vec::new();
                for (k, v) in m.iter() {
                    flat.push(k.clone());
                    flat.push(v.clone());
                }
                let concat = self.sq_concat(flat.iter(), gensyms, pos)?;
                Ok(Value::list(vec![
                    core_sym("apply"),
                    core_sym("hash-map"),
                    list2(core_sym("seq"), concat),
                ]))
            }
            Value::Set(s) => {
                let concat = self.sq_concat(s.iter(), gensyms, pos)?;
                Ok(Value::list(vec![
                    core_sym("apply"),
                    core_sym("hash-set"),
                    list2(core_sym("seq"), concat),
                ]))
            }
            // self-evaluating
            other => Ok(other.clone()),
        }
    }

    fn sq_concat<'v>(
        &mut self,
        items: impl Iterator<Item = &'v Value>,
        gensyms: &mut HashMap<String, Symbol>,
        pos: &SourcePos,
    ) -> Result<Value, CljError> {
        let mut parts = vec![core_sym("concat")];
        for item in items {
            if let Some(inner) = unquoted(item) {
                parts.push(list2(core_sym("list"), inner));
            } else if let Some(inner) = unquote_spliced(item) {
                parts.push(inner);
            } else {
                let quoted = self.syntax_quote(item, gensyms, pos)?;
                parts.push(list2(core_sym("list"), quoted));
            }
        }
        Ok(Value::list(parts))
    }

    fn resolve_sq_symbol(&mut self, sym: &Symbol, gensyms: &mut HashMap<String, Symbol>) -> Symbol {
        // auto-gensym: same name within one syntax quote, fresh across two
        if sym.ns.is_none() && sym.name.ends_with('#') {
            let base = sym.name.trim_end_matches('#');
            if let Some(existing) = gensyms.get(&*sym.name) {
                return existing.clone();
            }
            let fresh = Symbol::simple(&format!("{}__{}__auto__", base, self.env.next_gensym()));
            gensyms.insert(sym.name.to_string(), fresh.clone());
            return fresh;
        }
        if sym.ns.is_some() || is_sq_exempt(&sym.name) {
            return sym.clone();
        }
        match self.env.resolve(sym) {
            Ok(var) => Symbol::qualified(&var.ns_name, &var.name),
            Err(_) => Symbol::qualified(&self.env.current_ns().name, &sym.name),
        }
    }

    fn unescape_string(&self, raw: &str, pos: &SourcePos) -> Result<String, CljError> {
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('b') => out.push('\u{8}'),
                Some('f') => out.push('\u{c}'),
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some('0') => out.push('\0'),
                Some('u') => {
                    let hex: String = chars.by_ref().take(4).collect();
                    if hex.len() != 4 {
                        return Err(CljError::at(
                            ErrorKind::String,
                            "truncated unicode escape in string",
                            pos.clone(),
                        ));
                    }
                    let code = u32::from_str_radix(&hex, 16).map_err(|_| {
                        CljError::at(
                            ErrorKind::String,
                            format!("invalid unicode escape: \\u{}", hex),
                            pos.clone(),
                        )
                    })?;
                    out.push(char::from_u32(code).ok_or_else(|| {
                        CljError::at(
                            ErrorKind::String,
                            format!("invalid code point: {:x}", code),
                            pos.clone(),
                        )
                    })?);
                }
                Some(other) => {
                    return Err(CljError::at(
                        ErrorKind::String,
                        format!("unsupported escape character: \\{}", other),
                        pos.clone(),
                    ));
                }
                None => {
                    return Err(CljError::at(
                        ErrorKind::String,
                        "dangling escape at end of string",
                        pos.clone(),
                    ));
                }
            }
            if out.len() > self.limits.max_string_size {
                return Err(CljError::at(
                    ErrorKind::Syntax,
                    format!(
                        "string exceeds maximum size ({})",
                        self.limits.max_string_size
                    ),
                    pos.clone(),
                ));
            }
        }
        if out.len() > self.limits.max_string_size {
            return Err(CljError::at(
                ErrorKind::Syntax,
                format!("string exceeds maximum size ({})", self.limits.max_string_size),
                pos.clone(),
            ));
        }
        Ok(out)
    }
}

/// Symbols syntax-quote leaves unqualified: special forms and parameter
/// punctuation.
fn is_sq_exempt(name: &str) -> bool {
    matches!(
        name,
        "if" | "do"
            | "let"
            | "let*"
            | "fn"
            | "fn*"
            | "def"
            | "defmacro"
            | "quote"
            | "var"
            | "loop"
            | "loop*"
            | "recur"
            | "throw"
            | "try"
            | "catch"
            | "finally"
            | "set!"
            | "defmulti"
            | "defmethod"
            | "defprotocol"
            | "extend-type"
            | "defrecord"
            | "for"
            | "ns"
            | "in-ns"
            | "binding"
            | "&"
    )
}

fn core_sym(name: &str) -> Value {
    Value::symbol(Symbol::qualified("clojure.core", name))
}

fn list2(a: Value, b: Value) -> Value {
    Value::list(vec![a, b])
}

fn pos_meta(pos: &SourcePos) -> PersistentMap {
    let mut pairs = vec![
        (Value::keyword("line"), Value::Int(pos.line as i64)),
        (Value::keyword("column"), Value::Int(pos.column as i64)),
    ];
    if let Some(file) = &pos.file {
        pairs.push((Value::keyword("file"), Value::string(&**file)));
    }
    PersistentMap::from_pairs(pairs)
}

fn apply_meta(target: Value, meta: PersistentMap, pos: &SourcePos) -> Result<Value, CljError> {
    let merged = match target.meta() {
        Some(existing) => {
            let mut out = existing;
            for (k, v) in meta.iter() {
                out = out.assoc(k.clone(), v.clone());
            }
            out
        }
        None => meta,
    };
    target.with_meta(Some(merged)).ok_or_else(|| {
        CljError::at(
            ErrorKind::Syntax,
            "metadata can only be applied to symbols, collections and fns",
            pos.clone(),
        )
    })
}

/// Head-of-list probe for `(clojure.core/unquote x)`.
fn unquoted(form: &Value) -> Option<Value> {
    head_call(form, "unquote")
}

fn unquote_spliced(form: &Value) -> Option<Value> {
    head_call(form, "unquote-splicing")
}

fn head_call(form: &Value, name: &str) -> Option<Value> {
    if let Value::List(l) = form {
        let mut it = l.iter();
        if let Some(Value::Symbol(head)) = it.next() {
            if head.name.as_ref() == name
                && (head.ns.is_none() || head.ns.as_deref() == Some("clojure.core"))
            {
                return it.next().cloned();
            }
        }
    }
    None
}

fn seq_items(form: &Value) -> Option<Vec<Value>> {
    match form {
        Value::List(l) => Some(l.iter().cloned().collect()),
        Value::Vector(v) => Some(v.iter().cloned().collect()),
        _ => None,
    }
}

fn scan_percents(form: &Value, max_pos: &mut u32, has_rest: &mut bool) {
    match form {
        Value::Symbol(s) if s.ns.is_none() => {
            let name = &*s.name;
            if name == "%" || name == "%1" {
                *max_pos = (*max_pos).max(1);
            } else if name == "%&" {
                *has_rest = true;
            } else if let Some(rest) = name.strip_prefix('%') {
                if let Ok(n) = rest.parse::<u32>() {
                    *max_pos = (*max_pos).max(n);
                }
            }
        }
        Value::List(l) => l.iter().for_each(|f| scan_percents(f, max_pos, has_rest)),
        Value::Vector(v) => v.iter().for_each(|f| scan_percents(f, max_pos, has_rest)),
        Value::Map(m) => m.iter().for_each(|(k, v)| {
            scan_percents(k, max_pos, has_rest);
            scan_percents(v, max_pos, has_rest);
        }),
        Value::Set(s) => s.iter().for_each(|f| scan_percents(f, max_pos, has_rest)),
        _ => {}
    }
}

fn replace_percents(form: &Value, mapping: &HashMap<String, Symbol>) -> Value {
    match form {
        Value::Symbol(s) if s.ns.is_none() => match mapping.get(&*s.name) {
            Some(replacement) => Value::symbol(replacement.clone()),
            None => form.clone(),
        },
        Value::List(l) => {
            let items = l.iter().map(|f| replace_percents(f, mapping)).collect();
            Value::List(PersistentList::from_vec(items).with_meta(l.meta().cloned()))
        }
        Value::Vector(v) => {
            Value::vector(v.iter().map(|f| replace_percents(f, mapping)).collect())
        }
        Value::Map(m) => Value::Map(PersistentMap::from_pairs(
            m.iter()
                .map(|(k, v)| (replace_percents(k, mapping), replace_percents(v, mapping)))
                .collect(),
        )),
        Value::Set(s) => Value::Set(PersistentSet::from_vec(
            s.iter().map(|f| replace_percents(f, mapping)).collect(),
        )),
        _ => form.clone(),
    }
}

fn parse_char(raw: &str, pos: &SourcePos) -> Result<char, CljError> {
    let mut chars = raw.chars();
    let first = chars.next().ok_or_else(|| {
        CljError::at(ErrorKind::Syntax, "empty character literal", pos.clone())
    })?;
    if chars.next().is_none() {
        return Ok(first);
    }
    match raw {
        "newline" => Ok('\n'),
        "space" => Ok(' '),
        "tab" => Ok('\t'),
        "return" => Ok('\r'),
        "backspace" => Ok('\u{8}'),
        "formfeed" => Ok('\u{c}'),
        _ => {
            if let Some(hex) = raw.strip_prefix("u{").and_then(|r| r.strip_suffix('}')) {
                let code = u32::from_str_radix(hex, 16).map_err(|_| {
                    CljError::at(
                        ErrorKind::Syntax,
                        format!("invalid character escape: \\{}", raw),
                        pos.clone(),
                    )
                })?;
                return char::from_u32(code).ok_or_else(|| {
                    CljError::at(
                        ErrorKind::Syntax,
                        format!("invalid code point: {:x}", code),
                        pos.clone(),
                    )
                });
            }
            if let Some(hex) = raw.strip_prefix('u') {
                if hex.len() == 4 {
                    if let Ok(code) = u32::from_str_radix(hex, 16) {
                        if let Some(c) = char::from_u32(code) {
                            return Ok(c);
                        }
                    }
                }
            }
            Err(CljError::at(
                ErrorKind::Syntax,
                format!("unsupported character: \\{}", raw),
                pos.clone(),
            ))
        }
    }
}

/// Regex literals pass their backslashes through to the engine; only the
/// escaped closing quote is rewritten.
fn unescape_regex(raw: &str) -> String {
    raw.replace("\\\"", "\"")
}

fn delim_name(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::RParen => ")",
        TokenKind::RBracket => "]",
        TokenKind::RBrace => "}",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cljw_core::printer::pr_str;

    fn read_all(src: &str) -> Vec<Value> {
        let env = Env::new();
        Reader::new(src, &env, None).read_all().expect("reads")
    }

    fn read_err(src: &str) -> CljError {
        let env = Env::new();
        Reader::new(src, &env, None).read_all().unwrap_err()
    }

    fn first_str(src: &str) -> String {
        pr_str(&read_all(src)[0])
    }

    #[test]
    fn test_scalars_round_trip() {
        assert_eq!(first_str("42"), "42");
        assert_eq!(first_str("1.5"), "1.5");
        assert_eq!(first_str("\"a\\nb\""), "\"a\\nb\"");
        assert_eq!(first_str(":k"), ":k");
        assert_eq!(first_str("##Inf"), "##Inf");
    }

    #[test]
    fn test_ratio_normalization() {
        assert_eq!(first_str("4/2"), "2");
        assert_eq!(first_str("3/2"), "1.5");
    }

    #[test]
    fn test_collections() {
        assert_eq!(first_str("(1 2 3)"), "(1 2 3)");
        assert_eq!(first_str("[1 [2]]"), "[1 [2]]");
        assert_eq!(first_str("{:a 1}"), "{:a 1}");
        assert_eq!(first_str("#{1}"), "#{1}");
    }

    #[test]
    fn test_quote_and_deref_sugar() {
        assert_eq!(first_str("'x"), "(quote x)");
        assert_eq!(first_str("@x"), "(clojure.core/deref x)");
        assert_eq!(first_str("#'x"), "(var x)");
    }

    #[test]
    fn test_discard() {
        let forms = read_all("#_ignored 42");
        assert_eq!(forms.len(), 1);
        assert_eq!(pr_str(&forms[0]), "42");
    }

    #[test]
    fn test_reader_conditional_picks_platform() {
        assert_eq!(first_str("#?(:cw 1 :default 2)"), "1");
        assert_eq!(first_str("#?(:jvm 1 :default 2)"), "2");
        let forms = read_all("#?(:jvm 1)");
        assert!(forms.is_empty());
    }

    #[test]
    fn test_reader_conditional_splicing() {
        assert_eq!(first_str("[1 #?@(:cw [2 3]) 4]"), "[1 2 3 4]");
    }

    #[test]
    fn test_fn_literal_lowering() {
        let s = first_str("#(+ % %2)");
        assert!(s.starts_with("(fn* ["), "{}", s);
        assert!(s.contains("p1__"), "{}", s);
        assert!(s.contains("p2__"), "{}", s);
    }

    #[test]
    fn test_fn_literal_rest_param() {
        let s = first_str("#(apply list %&)");
        assert!(s.contains("& rest__"), "{}", s);
    }

    #[test]
    fn test_nested_fn_literal_rejected() {
        assert_eq!(read_err("#(#(inc %))").kind, ErrorKind::Syntax);
    }

    #[test]
    fn test_regex_literal() {
        let forms = read_all(r#"#"(\d+)-(\d+)""#);
        match &forms[0] {
            Value::Regex(p) => {
                assert_eq!(p.source, r"(\d+)-(\d+)");
                assert!(p.regex.is_match("12-34"));
            }
            other => panic!("expected regex, got {:?}", other),
        }
    }

    #[test]
    fn test_syntax_quote_qualifies_symbols() {
        let env = Env::new();
        env.intern("clojure.core", "inc").set_root(Value::Nil);
        let forms = Reader::new("`(inc x)", &env, None).read_all().unwrap();
        let s = pr_str(&forms[0]);
        assert!(s.contains("clojure.core/inc"), "{}", s);
        assert!(s.contains("clojure.core/x"), "{}", s);
        assert!(s.starts_with("(clojure.core/seq (clojure.core/concat"), "{}", s);
    }

    #[test]
    fn test_syntax_quote_unquote() {
        let env = Env::new();
        let forms = Reader::new("`(a ~b ~@c)", &env, None).read_all().unwrap();
        let s = pr_str(&forms[0]);
        assert!(s.contains("(clojure.core/list b)"), "{}", s);
        assert!(s.contains("concat") && s.ends_with("c))"), "{}", s);
    }

    #[test]
    fn test_auto_gensym_consistent_within_one_quote() {
        let env = Env::new();
        let forms = Reader::new("`[x# x#] `[x#]", &env, None).read_all().unwrap();
        let one = pr_str(&forms[0]);
        let two = pr_str(&forms[1]);
        let name = |s: &str| {
            s.split("x__")
                .nth(1)
                .map(|r| r.split("__auto__").next().unwrap_or("").to_string())
        };
        let first = name(&one).expect("gensym present");
        // both occurrences in the first quote expand identically
        assert_eq!(one.matches(&format!("x__{}__auto__", first)).count(), 2);
        // a second syntax quote gets a fresh name
        assert_ne!(name(&two), Some(first));
    }

    #[test]
    fn test_special_forms_stay_unqualified_in_syntax_quote() {
        let env = Env::new();
        let forms = Reader::new("`(if x y z)", &env, None).read_all().unwrap();
        let s = pr_str(&forms[0]);
        assert!(s.contains("(quote if)"), "{}", s);
    }

    #[test]
    fn test_unmatched_delimiter_reports_opener() {
        let err = read_err("(1 2");
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.contains("1:1"), "{}", err.message);
    }

    #[test]
    fn test_mismatched_delimiter() {
        assert_eq!(read_err("(1 2]").kind, ErrorKind::Syntax);
    }

    #[test]
    fn test_depth_limit() {
        let env = Env::new();
        let limits = ReaderLimits {
            max_depth: 8,
            ..ReaderLimits::default()
        };
        let src = format!("{}1{}", "(".repeat(9), ")".repeat(9));
        let err = Reader::with_limits(&src, &env, None, limits)
            .read_all()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.contains("depth"), "{}", err.message);
    }

    #[test]
    fn test_collection_count_limit() {
        let env = Env::new();
        let limits = ReaderLimits {
            max_collection_count: 4,
            ..ReaderLimits::default()
        };
        let err = Reader::with_limits("(1 2 3 4 5)", &env, None, limits)
            .read_all()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn test_map_literal_oddness_and_duplicates() {
        assert!(read_err("{:a}").message.contains("even number"));
        assert!(read_err("{:a 1 :a 2}").message.contains("duplicate"));
    }

    #[test]
    fn test_namespaced_map() {
        assert_eq!(first_str("#:fig{:a 1 :b 2}"), "{:fig/a 1, :fig/b 2}");
    }

    #[test]
    fn test_auto_keyword_uses_current_ns() {
        let env = Env::new();
        env.set_current_ns(env.find_ns("user").expect("user ns"));
        let forms = Reader::new("::k", &env, None).read_all().unwrap();
        assert_eq!(pr_str(&forms[0]), ":user/k");
    }

    #[test]
    fn test_meta_attaches_to_symbol() {
        let forms = read_all("^:private x");
        match &forms[0] {
            Value::Symbol(s) => {
                let meta = s.meta.clone().expect("meta present");
                assert_eq!(
                    meta.get(&Value::keyword("private")),
                    Some(&Value::Bool(true))
                );
            }
            other => panic!("expected symbol, got {:?}", other),
        }
    }

    #[test]
    fn test_list_position_meta() {
        let forms = read_all("\n  (f 1)");
        match &forms[0] {
            Value::List(l) => {
                let meta = l.meta().expect("position meta");
                assert_eq!(meta.get(&Value::keyword("line")), Some(&Value::Int(2)));
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_char_literals() {
        assert_eq!(read_all(r"\newline")[0], Value::Char('\n'));
        assert_eq!(read_all(r"\u{1F600}")[0], Value::Char('😀'));
        assert_eq!(read_all(r"\a")[0], Value::Char('a'));
    }
}
