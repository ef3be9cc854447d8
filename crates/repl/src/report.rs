//! Top-level error reporting: label, message, source context with a
//! caret, and the Clojure call stack.

use cljw_core::error::{CljError, Failure};
use cljw_core::printer::pr_str;

/// Render a failure the way the CLI and REPL print it to stderr.
pub fn render_failure(failure: &Failure, source: Option<&str>) -> String {
    match failure {
        Failure::Error(e) => render_error(e, source),
        Failure::Thrown(t) => {
            let mut out = format!("uncaught exception: {}\n", pr_str(&t.value));
            for frame in &t.trace {
                out.push_str(&format!("  at {}\n", frame));
            }
            out
        }
    }
}

fn render_error(e: &CljError, source: Option<&str>) -> String {
    let mut out = String::new();
    match &e.pos {
        Some(pos) => out.push_str(&format!(
            "{}: {} ({})\n",
            e.kind.label(),
            e.message,
            pos
        )),
        None => out.push_str(&format!("{}: {}\n", e.kind.label(), e.message)),
    }
    if let Some(pos) = &e.pos {
        let text = match source {
            Some(text) => Some(text.to_string()),
            None => pos
                .file
                .as_deref()
                .and_then(|f| std::fs::read_to_string(f).ok()),
        };
        if let Some(text) = text {
            if let Some(line) = text.lines().nth(pos.line.saturating_sub(1) as usize) {
                let line_no = format!("{:>4}", pos.line);
                out.push_str(&format!("{} | {}\n", line_no, line));
                if pos.column > 0 {
                    let pad = " ".repeat(line_no.len() + 3 + pos.column.saturating_sub(1) as usize);
                    out.push_str(&format!("{}^\n", pad));
                }
            }
        }
    }
    for frame in &e.trace {
        out.push_str(&format!("  at {}\n", frame));
    }
    out
}

pub fn print_failure(failure: &Failure, source: Option<&str>) {
    eprintln!("{}", render_failure(failure, source).trim_end());
}

#[cfg(test)]
mod tests {
    use super::*;
    use cljw_core::error::{ErrorKind, SourcePos};

    #[test]
    fn test_caret_points_at_column() {
        let e = CljError::at(
            ErrorKind::Name,
            "Unable to resolve symbol: nope",
            SourcePos::new(None, 1, 4),
        );
        let out = render_failure(&Failure::Error(e), Some("(+ nope 1)"));
        assert!(out.contains("name error"), "{}", out);
        assert!(out.contains("(+ nope 1)"), "{}", out);
        let caret_line = out.lines().last().unwrap();
        assert_eq!(caret_line.trim_end().chars().last(), Some('^'));
    }

    #[test]
    fn test_thrown_renders_value() {
        let out = render_failure(
            &Failure::thrown(cljw_core::value::Value::keyword("boom")),
            None,
        );
        assert!(out.contains(":boom"), "{}", out);
    }
}
