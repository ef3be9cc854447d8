//! The interactive REPL: rustyline editing, persistent history,
//! `*1 *2 *3 *e` and error reports that keep the session alive.

use crate::report;
use cljw_core::env::Env;
use cljw_core::error::Failure;
use cljw_core::printer::pr_str;
use cljw_core::value::Value;
use cljw_compiler::Reader;
use cljw_runtime::Interp;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;

fn history_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("cljw").join("history"))
}

/// Shift the result history vars.
pub fn set_star_results(env: &Env, value: &Value) {
    let core = env.core_ns();
    let get = |name: &str| core.mapping(name);
    if let (Some(one), Some(two), Some(three)) = (get("*1"), get("*2"), get("*3")) {
        if let Ok(prev_two) = two.deref() {
            three.set_root(prev_two);
        }
        if let Ok(prev_one) = one.deref() {
            two.set_root(prev_one);
        }
        one.set_root(value.clone());
    }
}

pub fn set_star_error(env: &Env, failure: &Failure) {
    if let Some(var) = env.core_ns().mapping("*e") {
        let rendered = match failure {
            Failure::Thrown(t) => t.value.clone(),
            Failure::Error(e) => Value::string(e.to_string()),
        };
        var.set_root(rendered);
    }
}

/// A buffer is complete when reading it does not run off the end.
fn is_incomplete(interp: &Interp, buffer: &str) -> bool {
    match Reader::new(buffer, &interp.env, None).read_all() {
        Err(e) => e.message.starts_with("EOF while reading"),
        Ok(_) => false,
    }
}

pub fn run_repl(interp: &Interp) -> i32 {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("could not start line editor: {}", e);
            return 1;
        }
    };
    let history = history_path();
    if let Some(path) = &history {
        let _ = editor.load_history(path);
    }

    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() {
            format!("{}=> ", interp.env.current_ns().name)
        } else {
            "  ...=> ".to_string()
        };
        match editor.readline(&prompt) {
            Ok(line) => {
                buffer.push_str(&line);
                buffer.push('\n');
                if buffer.trim().is_empty() {
                    buffer.clear();
                    continue;
                }
                if is_incomplete(interp, &buffer) {
                    continue;
                }
                let input = std::mem::take(&mut buffer);
                let _ = editor.add_history_entry(input.trim_end());
                match interp.eval_str(&input, None) {
                    Ok(value) => {
                        set_star_results(&interp.env, &value);
                        match cljw_runtime::seqs::realize_deep(&interp.env, &value) {
                            Ok(realized) => println!("{}", pr_str(&realized)),
                            Err(failure) => {
                                set_star_error(&interp.env, &failure);
                                report::print_failure(&failure, Some(&input));
                            }
                        }
                    }
                    Err(failure) => {
                        set_star_error(&interp.env, &failure);
                        report::print_failure(&failure, Some(&input));
                    }
                }
                interp.safe_point(&[]);
            }
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {}", e);
                break;
            }
        }
    }
    if let Some(path) = &history {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let _ = editor.save_history(path);
    }
    0
}
