//! The nREPL server: bencoded dictionaries over TCP.
//!
//! Client sockets get a thread each, but every message funnels through
//! one mpsc channel to the thread that owns the interpreter, so at most
//! one evaluation is ever in flight — the core is not reentrant and this
//! is its serialization point. `interrupt` is accepted and ignored: an
//! evaluation in progress cannot be preempted.

use crate::bencode::{dict, Bencode, Decoder};
use crate::repl::{set_star_error, set_star_results};
use crate::report;
use cljw_core::printer::pr_str;
use cljw_core::symbol::Symbol;
use cljw_core::value::Value;
use cljw_runtime::Interp;
use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, warn};

struct Request {
    msg: Bencode,
    reply: mpsc::Sender<Vec<Bencode>>,
}

pub fn serve(interp: &Interp, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    let actual_port = listener.local_addr()?.port();
    println!(
        "nREPL server started on port {} on host 127.0.0.1 - nrepl://127.0.0.1:{}",
        actual_port, actual_port
    );
    let (tx, rx) = mpsc::channel::<Request>();
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let tx = tx.clone();
                    thread::spawn(move || {
                        if let Err(e) = client_loop(stream, tx) {
                            debug!(error = %e, "nrepl client disconnected");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "nrepl accept failed"),
            }
        }
    });

    let mut sessions: Vec<String> = Vec::new();
    // all evaluation happens here, on the interpreter's thread
    for request in rx {
        let responses = handle(interp, &mut sessions, &request.msg);
        let _ = request.reply.send(responses);
    }
    Ok(())
}

fn client_loop(stream: TcpStream, tx: mpsc::Sender<Request>) -> std::io::Result<()> {
    let reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);
    let mut decoder = Decoder::new(reader);
    while let Some(msg) = decoder.decode()? {
        let (reply_tx, reply_rx) = mpsc::channel();
        if tx.send(Request { msg, reply: reply_tx }).is_err() {
            break;
        }
        let Ok(responses) = reply_rx.recv() else { break };
        for response in responses {
            response.encode(&mut writer)?;
        }
        writer.flush()?;
    }
    Ok(())
}

fn base_fields(msg: &Bencode) -> Vec<(String, Bencode)> {
    let mut fields = Vec::new();
    if let Some(id) = msg.dict_get("id") {
        fields.push(("id".to_string(), id.clone()));
    }
    if let Some(session) = msg.dict_get("session") {
        fields.push(("session".to_string(), session.clone()));
    }
    fields
}

fn response(msg: &Bencode, extra: &[(&str, Bencode)]) -> Bencode {
    let mut entries = base_fields(msg);
    for (k, v) in extra {
        entries.push((k.to_string(), v.clone()));
    }
    Bencode::Dict(entries.into_iter().collect())
}

fn done(msg: &Bencode, statuses: &[&str]) -> Bencode {
    response(
        msg,
        &[(
            "status",
            Bencode::List(statuses.iter().map(|s| Bencode::str(*s)).collect()),
        )],
    )
}

const OPS: &[&str] = &[
    "clone",
    "close",
    "describe",
    "eval",
    "load-file",
    "ls-sessions",
    "completions",
    "info",
    "lookup",
    "eldoc",
    "ns-list",
    "stdin",
    "interrupt",
];

fn handle(interp: &Interp, sessions: &mut Vec<String>, msg: &Bencode) -> Vec<Bencode> {
    let op = msg
        .dict_get("op")
        .and_then(Bencode::as_str)
        .unwrap_or("")
        .to_string();
    match op.as_str() {
        "clone" => {
            let session = uuid::Uuid::new_v4().to_string();
            sessions.push(session.clone());
            vec![response(
                msg,
                &[
                    ("new-session", Bencode::str(session)),
                    ("status", Bencode::List(vec![Bencode::str("done")])),
                ],
            )]
        }
        "close" => {
            if let Some(session) = msg.dict_get("session").and_then(Bencode::as_str) {
                sessions.retain(|s| s != session);
            }
            vec![done(msg, &["done"])]
        }
        "describe" => {
            let ops = Bencode::Dict(
                OPS.iter()
                    .map(|op| (op.to_string(), Bencode::Dict(Default::default())))
                    .collect(),
            );
            vec![response(
                msg,
                &[
                    ("ops", ops),
                    (
                        "versions",
                        dict(&[("cljw", Bencode::str(env!("CARGO_PKG_VERSION")))]),
                    ),
                    ("status", Bencode::List(vec![Bencode::str("done")])),
                ],
            )]
        }
        "eval" | "load-file" => {
            let code = msg
                .dict_get(if op == "eval" { "code" } else { "file" })
                .and_then(Bencode::as_str)
                .unwrap_or("");
            eval_op(interp, msg, code)
        }
        "ls-sessions" => vec![response(
            msg,
            &[
                (
                    "sessions",
                    Bencode::List(sessions.iter().map(Bencode::str).collect()),
                ),
                ("status", Bencode::List(vec![Bencode::str("done")])),
            ],
        )],
        "completions" => {
            let prefix = msg
                .dict_get("prefix")
                .and_then(Bencode::as_str)
                .unwrap_or("");
            let mut names: Vec<String> = Vec::new();
            for (name, _) in interp.env.current_ns().vars() {
                names.push(name.to_string());
            }
            for (name, _) in interp.env.core_ns().publics() {
                names.push(name.to_string());
            }
            names.sort();
            names.dedup();
            let candidates = names
                .into_iter()
                .filter(|n| n.starts_with(prefix) && !n.starts_with("__"))
                .map(|n| dict(&[("candidate", Bencode::str(n))]))
                .collect();
            vec![response(
                msg,
                &[
                    ("completions", Bencode::List(candidates)),
                    ("status", Bencode::List(vec![Bencode::str("done")])),
                ],
            )]
        }
        "info" | "lookup" | "eldoc" => {
            let sym = msg
                .dict_get("sym")
                .or_else(|| msg.dict_get("symbol"))
                .and_then(Bencode::as_str)
                .unwrap_or("");
            lookup_op(interp, msg, sym)
        }
        "ns-list" => {
            let names = interp
                .env
                .all_ns()
                .iter()
                .map(|ns| Bencode::str(ns.name.to_string()))
                .collect();
            vec![response(
                msg,
                &[
                    ("ns-list", Bencode::List(names)),
                    ("status", Bencode::List(vec![Bencode::str("done")])),
                ],
            )]
        }
        "stdin" | "interrupt" => vec![done(msg, &["done"])],
        _ => vec![done(msg, &["unknown-op", "done"])],
    }
}

fn eval_op(interp: &Interp, msg: &Bencode, code: &str) -> Vec<Bencode> {
    match interp.eval_str(code, None) {
        Ok(value) => {
            set_star_results(&interp.env, &value);
            let printed = match cljw_runtime::seqs::realize_deep(&interp.env, &value) {
                Ok(realized) => pr_str(&realized),
                Err(_) => pr_str(&value),
            };
            interp.safe_point(&[]);
            vec![
                response(
                    msg,
                    &[
                        ("value", Bencode::str(printed)),
                        (
                            "ns",
                            Bencode::str(interp.env.current_ns().name.to_string()),
                        ),
                    ],
                ),
                done(msg, &["done"]),
            ]
        }
        Err(failure) => {
            set_star_error(&interp.env, &failure);
            let rendered = report::render_failure(&failure, Some(code));
            vec![
                response(msg, &[("err", Bencode::str(rendered))]),
                done(msg, &["eval-error", "done"]),
            ]
        }
    }
}

fn lookup_op(interp: &Interp, msg: &Bencode, sym: &str) -> Vec<Bencode> {
    let resolved = interp.env.resolve(&Symbol::parse(sym));
    match resolved {
        Ok(var) => {
            let meta = var.meta.borrow().clone();
            let doc = meta
                .as_ref()
                .and_then(|m| m.get(&Value::keyword("doc")).cloned())
                .map(|d| cljw_core::printer::display_str(&d))
                .unwrap_or_default();
            let arglists = meta
                .as_ref()
                .and_then(|m| m.get(&Value::keyword("arglists")).cloned())
                .map(|a| pr_str(&a))
                .unwrap_or_default();
            vec![response(
                msg,
                &[
                    ("name", Bencode::str(var.name.to_string())),
                    ("ns", Bencode::str(var.ns_name.to_string())),
                    ("doc", Bencode::str(doc)),
                    ("arglists-str", Bencode::str(arglists)),
                    ("status", Bencode::List(vec![Bencode::str("done")])),
                ],
            )]
        }
        Err(_) => vec![done(msg, &["no-info", "done"])],
    }
}
