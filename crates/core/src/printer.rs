//! Value printing: `pr-str` (readable) and `str` (display) renditions.
//!
//! Readable printing round-trips through the reader for data values
//! (everything except fns, cells and unrealized lazy seqs). Realized lazy
//! seqs print through their cached seq view; the runtime's printing
//! builtins realize before calling in here.

use crate::value::Value;

/// Readable rendition, as `pr-str` produces.
pub fn pr_str(v: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, v, true);
    out
}

/// Display rendition, as `str` produces: strings and chars print raw and
/// nil prints as the empty string.
pub fn display_str(v: &Value) -> String {
    match v {
        Value::Nil => String::new(),
        Value::Str(s) => s.to_string(),
        Value::Char(c) => c.to_string(),
        _ => pr_str(v),
    }
}

fn write_value(out: &mut String, v: &Value, readable: bool) {
    match v {
        Value::Nil => out.push_str("nil"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&format_float(*f)),
        Value::Char(c) => {
            if readable {
                write_char(out, *c);
            } else {
                out.push(*c);
            }
        }
        Value::Str(s) => {
            if readable {
                write_string(out, s);
            } else {
                out.push_str(s);
            }
        }
        Value::Keyword(k) => out.push_str(&k.to_string()),
        Value::Symbol(s) => out.push_str(&s.to_string()),
        Value::List(l) => {
            out.push('(');
            let mut first = true;
            for item in l.iter() {
                if !first {
                    out.push(' ');
                }
                first = false;
                write_value(out, item, readable);
            }
            out.push(')');
        }
        Value::Cons(_) => {
            out.push('(');
            let mut cur = v.clone();
            let mut first = true;
            loop {
                match cur {
                    Value::Cons(cell) => {
                        if !first {
                            out.push(' ');
                        }
                        first = false;
                        write_value(out, &cell.first, readable);
                        cur = cell.rest.clone();
                    }
                    Value::List(l) => {
                        for item in l.iter() {
                            if !first {
                                out.push(' ');
                            }
                            first = false;
                            write_value(out, item, readable);
                        }
                        break;
                    }
                    Value::Vector(vec) => {
                        for item in vec.iter() {
                            if !first {
                                out.push(' ');
                            }
                            first = false;
                            write_value(out, item, readable);
                        }
                        break;
                    }
                    Value::LazySeq(cell) => {
                        let cached = cell.cached.borrow().clone();
                        match cached {
                            Some(view) => cur = view,
                            None => {
                                if !first {
                                    out.push(' ');
                                }
                                out.push_str("...");
                                break;
                            }
                        }
                    }
                    Value::Nil => break,
                    other => {
                        if !first {
                            out.push(' ');
                        }
                        write_value(out, &other, readable);
                        break;
                    }
                }
            }
            out.push(')');
        }
        Value::Vector(vec) => {
            out.push('[');
            let mut first = true;
            for item in vec.iter() {
                if !first {
                    out.push(' ');
                }
                first = false;
                write_value(out, item, readable);
            }
            out.push(']');
        }
        Value::Map(m) => {
            out.push('{');
            let mut first = true;
            for (k, val) in m.iter() {
                if !first {
                    out.push_str(", ");
                }
                first = false;
                write_value(out, k, readable);
                out.push(' ');
                write_value(out, val, readable);
            }
            out.push('}');
        }
        Value::Set(s) => {
            out.push_str("#{");
            let mut first = true;
            for item in s.iter() {
                if !first {
                    out.push(' ');
                }
                first = false;
                write_value(out, item, readable);
            }
            out.push('}');
        }
        Value::Fn(c) => match c.name() {
            Some(name) => out.push_str(&format!("#<fn {}>", name)),
            None => out.push_str("#<fn>"),
        },
        Value::Builtin(b) => out.push_str(&format!("#<builtin {}>", b.name)),
        Value::Atom(cell) => {
            out.push_str("#<atom ");
            write_value(out, &cell.value.borrow().clone(), readable);
            out.push('>');
        }
        Value::Volatile(cell) => {
            out.push_str("#<volatile ");
            write_value(out, &cell.value.borrow().clone(), readable);
            out.push('>');
        }
        Value::Delay(cell) => {
            if let Some(cached) = cell.cached.borrow().clone() {
                out.push_str("#<delay ");
                write_value(out, &cached, readable);
                out.push('>');
            } else {
                out.push_str("#<delay pending>");
            }
        }
        Value::LazySeq(cell) => {
            let cached = cell.cached.borrow().clone();
            match cached {
                Some(view) => write_value(out, &view, readable),
                None => out.push_str("#<lazy-seq>"),
            }
        }
        Value::Regex(p) => {
            out.push_str("#\"");
            out.push_str(&p.source);
            out.push('"');
        }
        Value::Var(var) => out.push_str(&format!("#'{}", var.qualified_name())),
        Value::Protocol(p) => out.push_str(&format!("#<protocol {}>", p.name)),
        Value::ProtocolFn(pf) => {
            out.push_str(&format!("#<protocol-fn {}/{}>", pf.protocol.name, pf.method))
        }
        Value::MultiFn(m) => out.push_str(&format!("#<multifn {}>", m.name)),
        Value::Reduced(inner) => {
            out.push_str("#<reduced ");
            write_value(out, inner, readable);
            out.push('>');
        }
    }
}

/// Floats always show a decimal point or exponent so they re-read as
/// floats.
fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "##NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "##Inf" } else { "##-Inf" }.to_string();
    }
    let s = format!("{}", f);
    if s.contains('.') || s.contains('e') || s.contains('E') {
        s
    } else {
        format!("{}.0", s)
    }
}

fn write_char(out: &mut String, c: char) {
    match c {
        '\n' => out.push_str("\\newline"),
        ' ' => out.push_str("\\space"),
        '\t' => out.push_str("\\tab"),
        '\r' => out.push_str("\\return"),
        '\u{8}' => out.push_str("\\backspace"),
        '\u{c}' => out.push_str("\\formfeed"),
        _ => {
            out.push('\\');
            out.push(c);
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::{PersistentMap, PersistentSet};
    use crate::symbol::Symbol;

    #[test]
    fn test_scalars() {
        assert_eq!(pr_str(&Value::Nil), "nil");
        assert_eq!(pr_str(&Value::Int(42)), "42");
        assert_eq!(pr_str(&Value::Float(1.0)), "1.0");
        assert_eq!(pr_str(&Value::Float(1.5)), "1.5");
        assert_eq!(pr_str(&Value::Float(f64::NAN)), "##NaN");
        assert_eq!(pr_str(&Value::Float(f64::INFINITY)), "##Inf");
        assert_eq!(pr_str(&Value::Char('\n')), "\\newline");
        assert_eq!(pr_str(&Value::Char('a')), "\\a");
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(pr_str(&Value::string("a\"b\n")), "\"a\\\"b\\n\"");
        assert_eq!(display_str(&Value::string("a\"b")), "a\"b");
    }

    #[test]
    fn test_collections() {
        let v = Value::list(vec![
            Value::Int(1),
            Value::vector(vec![Value::keyword("k"), Value::Nil]),
        ]);
        assert_eq!(pr_str(&v), "(1 [:k nil])");
        let m = Value::Map(PersistentMap::from_pairs(vec![
            (Value::keyword("a"), Value::Int(1)),
            (Value::keyword("b"), Value::Int(2)),
        ]));
        assert_eq!(pr_str(&m), "{:a 1, :b 2}");
        let s = Value::Set(PersistentSet::from_vec(vec![Value::Int(1)]));
        assert_eq!(pr_str(&s), "#{1}");
    }

    #[test]
    fn test_symbols_and_keywords() {
        assert_eq!(pr_str(&Value::symbol(Symbol::parse("my.ns/f"))), "my.ns/f");
        assert_eq!(pr_str(&Value::keyword("kw")), ":kw");
    }

    #[test]
    fn test_display_of_nil_is_empty() {
        assert_eq!(display_str(&Value::Nil), "");
    }
}
