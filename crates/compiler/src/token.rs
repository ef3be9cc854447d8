//! Tokenizer: byte stream to located tokens.
//!
//! Comma is whitespace. `;` starts a line comment and `#!` a shebang
//! comment. `#` dispatches to the dispatch tokens when it starts a token
//! but is an ordinary symbol character elsewhere (gensym suffixes like
//! `foo#`). The numeric grammar (hex, radix, ratios, scientific notation,
//! big-literal suffixes) is handled here; strings and characters are
//! captured raw and unescaped by the reader.

use cljw_core::error::{CljError, ErrorKind, SourcePos};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// `#{`
    Set,
    /// `#"pattern"`, content raw
    Regex(String),
    /// `#'`
    VarQuote,
    /// `#_`
    Discard,
    /// `#^` (old-style meta)
    Meta,
    /// `#?`
    ReaderCond,
    /// `#?@`
    ReaderCondSplicing,
    /// `#(`
    FnLit,
    /// `#=`
    Eval,
    /// `##Inf`, `##-Inf`, `##NaN`
    Symbolic(String),
    /// `#:ns{...}` carries "ns"; `#::{...}` carries ":"; `#::alias{...}`
    /// carries ":alias"
    NsMap(String),
    /// `#tag` data-reader tag
    Tag(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Quote,
    SyntaxQuote,
    Unquote,
    UnquoteSplicing,
    Deref,
    Caret,
    Dispatch(Dispatch),
    Nil,
    True,
    False,
    Int(i64),
    Float(f64),
    Ratio(i64, i64),
    /// Raw content between the quotes, escapes unprocessed.
    Str(String),
    /// Raw text after the backslash.
    CharLit(String),
    /// Text after the leading colon; a second leading colon survives here
    /// for `::auto` resolution in the reader.
    Keyword(String),
    Symbol(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

pub struct Tokenizer<'a> {
    src: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: u32,
    column: u32,
    file: Option<Rc<str>>,
}

fn is_symbol_char(c: char) -> bool {
    !c.is_whitespace()
        && !matches!(
            c,
            ',' | '(' | ')' | '[' | ']' | '{' | '}' | '"' | ';' | '@' | '^' | '`' | '~' | '\\'
        )
}

fn is_symbol_start(c: char) -> bool {
    is_symbol_char(c) && c != '#' && c != '\'' && !c.is_ascii_digit()
}

impl<'a> Tokenizer<'a> {
    pub fn new(src: &'a str, file: Option<Rc<str>>) -> Self {
        Tokenizer {
            src,
            chars: src.char_indices().peekable(),
            line: 1,
            column: 1,
            file,
        }
    }

    pub fn pos(&self) -> SourcePos {
        SourcePos::new(self.file.clone(), self.line, self.column)
    }

    fn err(&self, kind: ErrorKind, msg: impl Into<String>, pos: SourcePos) -> CljError {
        CljError::at(kind, msg, pos)
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek2(&mut self) -> Option<char> {
        let mut clone = self.chars.clone();
        clone.next();
        clone.next().map(|(_, c)| c)
    }

    fn skip_blank(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() || c == ',' => {
                    self.bump();
                }
                Some(';') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('#') if self.peek2() == Some('!') => {
                    // shebang line comment
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    /// Produce the next token. `Eof` is returned forever once the input is
    /// exhausted.
    pub fn next_token(&mut self) -> Result<Token, CljError> {
        self.skip_blank();
        let pos = self.pos();
        let (line, column) = (pos.line, pos.column);
        let token = move |kind| Token { kind, line, column };
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(token(TokenKind::Eof)),
        };
        match c {
            '(' => {
                self.bump();
                Ok(token(TokenKind::LParen))
            }
            ')' => {
                self.bump();
                Ok(token(TokenKind::RParen))
            }
            '[' => {
                self.bump();
                Ok(token(TokenKind::LBracket))
            }
            ']' => {
                self.bump();
                Ok(token(TokenKind::RBracket))
            }
            '{' => {
                self.bump();
                Ok(token(TokenKind::LBrace))
            }
            '}' => {
                self.bump();
                Ok(token(TokenKind::RBrace))
            }
            '\'' => {
                self.bump();
                Ok(token(TokenKind::Quote))
            }
            '`' => {
                self.bump();
                Ok(token(TokenKind::SyntaxQuote))
            }
            '~' => {
                self.bump();
                if self.peek() == Some('@') {
                    self.bump();
                    Ok(token(TokenKind::UnquoteSplicing))
                } else {
                    Ok(token(TokenKind::Unquote))
                }
            }
            '@' => {
                self.bump();
                Ok(token(TokenKind::Deref))
            }
            '^' => {
                self.bump();
                Ok(token(TokenKind::Caret))
            }
            '"' => self.read_string(pos).map(token),
            '\\' => self.read_char(pos).map(token),
            ':' => self.read_keyword(pos).map(token),
            '#' => self.read_dispatch(pos).map(token),
            c if c.is_ascii_digit() => self.read_number(pos).map(token),
            '+' | '-' if self.peek2().is_some_and(|c| c.is_ascii_digit()) => {
                self.read_number(pos).map(token)
            }
            c if is_symbol_start(c) || c == '+' || c == '-' => self.read_symbol(pos).map(token),
            other => {
                self.bump();
                Err(self.err(
                    ErrorKind::Syntax,
                    format!("unexpected character: {:?}", other),
                    pos,
                ))
            }
        }
    }

    fn read_string(&mut self, pos: SourcePos) -> Result<TokenKind, CljError> {
        self.bump(); // opening quote
        let mut raw = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(TokenKind::Str(raw)),
                Some('\\') => {
                    raw.push('\\');
                    match self.bump() {
                        Some(c) => raw.push(c),
                        None => {
                            return Err(self.err(
                                ErrorKind::Syntax,
                                "EOF while reading string",
                                pos,
                            ));
                        }
                    }
                }
                Some(c) => raw.push(c),
                None => return Err(self.err(ErrorKind::Syntax, "EOF while reading string", pos)),
            }
        }
    }

    fn read_char(&mut self, pos: SourcePos) -> Result<TokenKind, CljError> {
        self.bump(); // backslash
        let first = self.bump().ok_or_else(|| {
            self.err(ErrorKind::Syntax, "EOF while reading character", pos.clone())
        })?;
        let mut raw = String::new();
        raw.push(first);
        if first.is_alphabetic() {
            // named escape or \u{...}
            while let Some(c) = self.peek() {
                if c.is_alphanumeric() || c == '{' || c == '}' || c == '-' {
                    raw.push(c);
                    self.bump();
                    if c == '}' {
                        break;
                    }
                } else {
                    break;
                }
            }
        }
        Ok(TokenKind::CharLit(raw))
    }

    fn read_keyword(&mut self, pos: SourcePos) -> Result<TokenKind, CljError> {
        self.bump(); // leading colon
        let mut text = String::new();
        if self.peek() == Some(':') {
            text.push(':');
            self.bump();
        }
        while let Some(c) = self.peek() {
            if is_symbol_char(c) {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if text.is_empty() || text == ":" {
            return Err(self.err(ErrorKind::Syntax, "invalid keyword token", pos));
        }
        Ok(TokenKind::Keyword(text))
    }

    fn read_dispatch(&mut self, pos: SourcePos) -> Result<TokenKind, CljError> {
        self.bump(); // '#'
        match self.peek() {
            Some('{') => {
                self.bump();
                Ok(TokenKind::Dispatch(Dispatch::Set))
            }
            Some('"') => {
                let raw = match self.read_string(pos.clone())? {
                    TokenKind::Str(raw) => raw,
                    _ => unreachable!("read_string yields Str"),
                };
                Ok(TokenKind::Dispatch(Dispatch::Regex(raw)))
            }
            Some('\'') => {
                self.bump();
                Ok(TokenKind::Dispatch(Dispatch::VarQuote))
            }
            Some('_') => {
                self.bump();
                Ok(TokenKind::Dispatch(Dispatch::Discard))
            }
            Some('^') => {
                self.bump();
                Ok(TokenKind::Dispatch(Dispatch::Meta))
            }
            Some('(') => {
                self.bump();
                Ok(TokenKind::Dispatch(Dispatch::FnLit))
            }
            Some('=') => {
                self.bump();
                Ok(TokenKind::Dispatch(Dispatch::Eval))
            }
            Some('?') => {
                self.bump();
                if self.peek() == Some('@') {
                    self.bump();
                    Ok(TokenKind::Dispatch(Dispatch::ReaderCondSplicing))
                } else {
                    Ok(TokenKind::Dispatch(Dispatch::ReaderCond))
                }
            }
            Some('#') => {
                self.bump();
                let mut name = String::new();
                while let Some(c) = self.peek() {
                    if is_symbol_char(c) {
                        name.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                match name.as_str() {
                    "Inf" | "-Inf" | "NaN" => Ok(TokenKind::Dispatch(Dispatch::Symbolic(name))),
                    _ => Err(self.err(
                        ErrorKind::Syntax,
                        format!("unknown symbolic value: ##{}", name),
                        pos,
                    )),
                }
            }
            Some(':') => {
                self.bump();
                let mut ns = String::new();
                if self.peek() == Some(':') {
                    ns.push(':');
                    self.bump();
                }
                while let Some(c) = self.peek() {
                    if is_symbol_char(c) && c != '{' {
                        ns.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                if ns.is_empty() {
                    return Err(self.err(ErrorKind::Syntax, "invalid namespaced map", pos));
                }
                Ok(TokenKind::Dispatch(Dispatch::NsMap(ns)))
            }
            Some(c) if is_symbol_start(c) => {
                let mut name = String::new();
                while let Some(c) = self.peek() {
                    if is_symbol_char(c) {
                        name.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                Ok(TokenKind::Dispatch(Dispatch::Tag(name)))
            }
            other => Err(self.err(
                ErrorKind::Syntax,
                format!("unexpected dispatch character: {:?}", other),
                pos,
            )),
        }
    }

    fn read_symbol(&mut self, pos: SourcePos) -> Result<TokenKind, CljError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if is_symbol_char(c) {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if text.is_empty() {
            return Err(self.err(ErrorKind::Syntax, "empty symbol", pos));
        }
        Ok(match text.as_str() {
            "nil" => TokenKind::Nil,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Symbol(text),
        })
    }

    fn read_number(&mut self, pos: SourcePos) -> Result<TokenKind, CljError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if is_symbol_char(c) {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        parse_number(&text, pos)
    }
}

/// The full numeric grammar: decimal, hex `0x…`, radix `NNr…`, ratios,
/// floats with scientific notation, and `N`/`M` big-literal suffixes
/// (which must fit the fixed-width representations).
pub fn parse_number(text: &str, pos: SourcePos) -> Result<TokenKind, CljError> {
    let fail = |msg: String| CljError::at(ErrorKind::Number, msg, pos.clone());
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, text.strip_prefix('+').unwrap_or(text)),
    };
    if digits.is_empty() {
        return Err(fail(format!("invalid number: {}", text)));
    }

    // ratio
    if let Some(slash) = digits.find('/') {
        let (num, den) = (&digits[..slash], &digits[slash + 1..]);
        let num: i64 = num
            .parse()
            .map_err(|_| fail(format!("invalid ratio: {}", text)))?;
        let den: i64 = den
            .parse()
            .map_err(|_| fail(format!("invalid ratio: {}", text)))?;
        if den == 0 {
            return Err(fail(format!("ratio with zero denominator: {}", text)));
        }
        return Ok(TokenKind::Ratio(sign * num, den));
    }

    // hex
    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        let v = i64::from_str_radix(hex, 16)
            .map_err(|_| fail(format!("invalid hex literal: {}", text)))?;
        return Ok(TokenKind::Int(sign * v));
    }

    // radix NNrDIGITS
    if let Some(r_at) = digits.find(['r', 'R']) {
        if digits[..r_at].chars().all(|c| c.is_ascii_digit()) && r_at > 0 && !digits[..r_at].is_empty()
        {
            if let Ok(radix) = digits[..r_at].parse::<u32>() {
                if (2..=36).contains(&radix) {
                    let v = i64::from_str_radix(&digits[r_at + 1..], radix)
                        .map_err(|_| fail(format!("invalid radix literal: {}", text)))?;
                    return Ok(TokenKind::Int(sign * v));
                }
                return Err(fail(format!("radix out of range: {}", text)));
            }
        }
    }

    // big-literal suffixes
    if let Some(body) = digits.strip_suffix('N') {
        let v: i64 = body
            .parse()
            .map_err(|_| fail(format!("integer literal too large: {}", text)))?;
        return Ok(TokenKind::Int(sign * v));
    }
    if let Some(body) = digits.strip_suffix('M') {
        let v: f64 = body
            .parse()
            .map_err(|_| fail(format!("invalid decimal literal: {}", text)))?;
        return Ok(TokenKind::Float(sign as f64 * v));
    }

    // float
    if digits.contains('.') || digits.contains(['e', 'E']) {
        let v: f64 = digits
            .parse()
            .map_err(|_| fail(format!("invalid float: {}", text)))?;
        if !v.is_finite() {
            return Err(fail(format!("float literal out of range: {}", text)));
        }
        return Ok(TokenKind::Float(sign as f64 * v));
    }

    // decimal integer
    let v: i64 = digits
        .parse()
        .map_err(|_| fail(format!("invalid number: {}", text)))?;
    Ok(TokenKind::Int(sign * v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut t = Tokenizer::new(src, None);
        let mut out = Vec::new();
        loop {
            let tok = t.next_token().expect("tokenizes");
            if tok.kind == TokenKind::Eof {
                break;
            }
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn test_comma_is_whitespace() {
        assert_eq!(
            kinds("[1,2]"),
            vec![
                TokenKind::LBracket,
                TokenKind::Int(1),
                TokenKind::Int(2),
                TokenKind::RBracket
            ]
        );
    }

    #[test]
    fn test_comments_and_shebang() {
        assert_eq!(
            kinds("#!/usr/bin/env cljw\n; note\n42"),
            vec![TokenKind::Int(42)]
        );
    }

    #[test]
    fn test_number_grammar() {
        assert_eq!(kinds("0x10"), vec![TokenKind::Int(16)]);
        assert_eq!(kinds("2r101"), vec![TokenKind::Int(5)]);
        assert_eq!(kinds("-7"), vec![TokenKind::Int(-7)]);
        assert_eq!(kinds("1/2"), vec![TokenKind::Ratio(1, 2)]);
        assert_eq!(kinds("1.5e2"), vec![TokenKind::Float(150.0)]);
        assert_eq!(kinds("12N"), vec![TokenKind::Int(12)]);
    }

    #[test]
    fn test_zero_denominator_is_number_error() {
        let mut t = Tokenizer::new("1/0", None);
        let err = t.next_token().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Number);
    }

    #[test]
    fn test_gensym_suffix_is_a_symbol() {
        assert_eq!(kinds("foo#"), vec![TokenKind::Symbol("foo#".to_string())]);
    }

    #[test]
    fn test_dispatch_tokens() {
        assert_eq!(
            kinds("#{"),
            vec![TokenKind::Dispatch(Dispatch::Set)]
        );
        assert_eq!(
            kinds("#'x"),
            vec![
                TokenKind::Dispatch(Dispatch::VarQuote),
                TokenKind::Symbol("x".to_string())
            ]
        );
        assert_eq!(
            kinds("##Inf"),
            vec![TokenKind::Dispatch(Dispatch::Symbolic("Inf".to_string()))]
        );
        assert_eq!(
            kinds("#?@"),
            vec![TokenKind::Dispatch(Dispatch::ReaderCondSplicing)]
        );
    }

    #[test]
    fn test_string_kept_raw() {
        assert_eq!(
            kinds(r#""a\nb""#),
            vec![TokenKind::Str("a\\nb".to_string())]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let mut t = Tokenizer::new("\"abc", None);
        let err = t.next_token().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn test_keyword_tokens() {
        assert_eq!(
            kinds(":a ::b :ns/c"),
            vec![
                TokenKind::Keyword("a".to_string()),
                TokenKind::Keyword(":b".to_string()),
                TokenKind::Keyword("ns/c".to_string()),
            ]
        );
    }

    #[test]
    fn test_char_tokens() {
        assert_eq!(
            kinds(r"\a \newline"),
            vec![
                TokenKind::CharLit("a".to_string()),
                TokenKind::CharLit("newline".to_string()),
            ]
        );
    }

    #[test]
    fn test_location_tracking() {
        let mut t = Tokenizer::new("a\n  b", None);
        let a = t.next_token().unwrap();
        assert_eq!((a.line, a.column), (1, 1));
        let b = t.next_token().unwrap();
        assert_eq!((b.line, b.column), (2, 3));
    }
}
