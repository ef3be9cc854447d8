//! Error model for the cljw core.
//!
//! Two distinct failure channels flow through every evaluator layer:
//!
//! - `CljError`: an engine error with a fixed `ErrorKind`, a message, an
//!   optional source location and a snapshot of the Clojure call stack.
//!   Engine errors unwind straight to the top level (REPL form, file
//!   evaluation, CLI command) where the reporter prints them.
//! - `Thrown`: a user-level exception raised by `throw`, carrying an
//!   arbitrary `Value`. These surface to the nearest enclosing `try/catch`.
//!
//! `Failure` is the sum of both and `EvalResult` the `Result` alias used
//! throughout the reader, analyzer and both back ends.

use crate::value::Value;
use std::fmt;
use std::rc::Rc;

/// A location in source text, 1-indexed for user display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    pub file: Option<Rc<str>>,
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub fn new(file: Option<Rc<str>>, line: u32, column: u32) -> Self {
        SourcePos { file, line, column }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file, self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}

/// The fixed set of engine error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Number,
    String,
    Name,
    Arity,
    Value,
    Type,
    Arithmetic,
    Index,
    Io,
    Internal,
    OutOfMemory,
}

impl ErrorKind {
    /// The label printed by the top-level error reporter.
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Number => "number error",
            ErrorKind::String => "string error",
            ErrorKind::Name => "name error",
            ErrorKind::Arity => "arity error",
            ErrorKind::Value => "value error",
            ErrorKind::Type => "type error",
            ErrorKind::Arithmetic => "arithmetic error",
            ErrorKind::Index => "index error",
            ErrorKind::Io => "io error",
            ErrorKind::Internal => "internal error",
            ErrorKind::OutOfMemory => "out of memory",
        }
    }
}

/// One Clojure-level call frame, innermost last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub ns: Rc<str>,
    pub name: Rc<str>,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ns, self.name)
    }
}

/// An engine error. Not catchable from Clojure code.
#[derive(Debug, Clone)]
pub struct CljError {
    pub kind: ErrorKind,
    pub message: String,
    pub pos: Option<SourcePos>,
    pub trace: Vec<TraceFrame>,
}

impl CljError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CljError {
            kind,
            message: message.into(),
            pos: None,
            trace: Vec::new(),
        }
    }

    pub fn at(kind: ErrorKind, message: impl Into<String>, pos: SourcePos) -> Self {
        CljError {
            kind,
            message: message.into(),
            pos: Some(pos),
            trace: Vec::new(),
        }
    }

    /// Attach a position unless one is already recorded. Inner frames win:
    /// the first location attached is the most precise one.
    pub fn with_pos(mut self, pos: Option<&SourcePos>) -> Self {
        if self.pos.is_none() {
            self.pos = pos.cloned();
        }
        self
    }
}

impl fmt::Display for CljError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pos {
            Some(pos) => write!(f, "{}: {} ({})", self.kind.label(), self.message, pos),
            None => write!(f, "{}: {}", self.kind.label(), self.message),
        }
    }
}

impl std::error::Error for CljError {}

/// A user-level exception raised with `throw`.
#[derive(Debug, Clone)]
pub struct Thrown {
    pub value: Value,
    pub trace: Vec<TraceFrame>,
}

/// Either failure channel.
#[derive(Debug, Clone)]
pub enum Failure {
    Error(CljError),
    Thrown(Thrown),
}

impl Failure {
    pub fn thrown(value: Value) -> Self {
        Failure::Thrown(Thrown {
            value,
            trace: Vec::new(),
        })
    }

    /// Attach a position to the error channel; thrown values carry none.
    pub fn with_pos(self, pos: Option<&SourcePos>) -> Self {
        match self {
            Failure::Error(e) => Failure::Error(e.with_pos(pos)),
            other => other,
        }
    }
}

impl From<CljError> for Failure {
    fn from(e: CljError) -> Self {
        Failure::Error(e)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Error(e) => e.fmt(f),
            Failure::Thrown(t) => write!(f, "uncaught exception: {:?}", t.value),
        }
    }
}

pub type EvalResult = Result<Value, Failure>;

/// Shorthand for `Err(Failure::Error(CljError::new(kind, msg)))`.
pub fn error<T>(kind: ErrorKind, message: impl Into<String>) -> Result<T, Failure> {
    Err(Failure::Error(CljError::new(kind, message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_with_pos() {
        let pos = SourcePos::new(Some("core.clj".into()), 3, 9);
        let e = CljError::at(ErrorKind::Name, "Unable to resolve symbol: foo", pos);
        assert_eq!(
            e.to_string(),
            "name error: Unable to resolve symbol: foo (core.clj:3:9)"
        );
    }

    #[test]
    fn test_with_pos_keeps_inner_location() {
        let inner = SourcePos::new(None, 1, 1);
        let outer = SourcePos::new(None, 9, 9);
        let e = CljError::at(ErrorKind::Syntax, "unmatched delimiter", inner.clone())
            .with_pos(Some(&outer));
        assert_eq!(e.pos, Some(inner));
    }
}
