//! cljw — a self-hosted Clojure dialect in one binary.
//!
//! Usage:
//!   cljw                          start a REPL
//!   cljw file.clj [args…]        evaluate a file
//!   cljw -e "expr"                evaluate an expression
//!   cljw -A:alias                 REPL with alias paths/deps
//!   cljw -M:alias [-m ns]         main-mode run
//!   cljw -X:alias fn              exec-mode: call a fn
//!   cljw -P                       fetch deps only
//!   cljw -Spath                   print resolved load paths
//!   cljw build file.clj [-o out]  produce a standalone binary
//!   cljw test [files…]           run deftest vars
//!   cljw new <name>               scaffold a project
//!   cljw --nrepl-server [--port]  start an nREPL server
//!
//! Exit codes: 0 on success, 1 on any error.

mod bencode;
mod build_bin;
mod deps;
mod nrepl;
mod repl;
mod report;
mod scaffold;
mod testrunner;

use clap::{Parser as ClapParser, Subcommand};
use cljw_core::error::Failure;
use cljw_core::printer::pr_str;
use cljw_core::symbol::Symbol;
use cljw_core::value::Value;
use cljw_compiler::Reader;
use cljw_runtime::{bootstrap_with_cache, Backend, Interp};
use std::path::PathBuf;
use std::process;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "cljw")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A self-hosted Clojure dialect", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Evaluate an expression, printing each non-nil form result
    #[arg(short = 'e', value_name = "EXPR")]
    eval: Option<String>,

    /// Force the tree-walking back end
    #[arg(long = "tree-walk")]
    tree_walk: bool,

    /// Print compiled bytecode for the input instead of running it
    #[arg(long = "dump-bytecode")]
    dump_bytecode: bool,

    /// Start an nREPL server
    #[arg(long = "nrepl-server")]
    nrepl_server: bool,

    /// nREPL port (0 picks a free one)
    #[arg(long, default_value_t = 7888)]
    port: u16,

    /// REPL with alias paths/deps (-A:dev)
    #[arg(short = 'A', value_name = ":ALIAS")]
    repl_aliases: Vec<String>,

    /// Main mode with alias (-M:dev)
    #[arg(short = 'M', value_name = ":ALIAS", num_args = 0..=1, default_missing_value = "")]
    main_alias: Option<String>,

    /// Namespace whose -main to run (with -M)
    #[arg(short = 'm', value_name = "NS")]
    main_ns: Option<String>,

    /// Exec mode: call a fn with keyword args (-X:alias fn :k v …)
    #[arg(short = 'X', value_name = ":ALIAS", num_args = 0..=1, default_missing_value = "")]
    exec_alias: Option<String>,

    /// Fetch deps only
    #[arg(short = 'P')]
    prepare: bool,

    /// Print the resolved load paths (-Spath)
    #[arg(long = "spath", hide = true)]
    spath: bool,

    /// Merge extra deps data (-Sdeps '{:deps …}')
    #[arg(long = "sdeps", hide = true, value_name = "EDN")]
    sdeps: Option<String>,

    /// Verbose dep resolution (-Sverbose)
    #[arg(long = "sverbose", hide = true)]
    sverbose: bool,

    /// Reproducible resolution: ignore user-level config (-Srepro)
    #[arg(long = "srepro", hide = true)]
    srepro: bool,

    /// Ignore caches and recompute (-Sforce)
    #[arg(long = "sforce", hide = true)]
    sforce: bool,

    /// Script file followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed a program into a copy of the interpreter
    Build {
        /// Entry source file
        input: PathBuf,
        /// Output executable (defaults to the input stem)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Start an nREPL server after the embedded program runs
        #[arg(long)]
        nrepl: bool,
        /// Embed a precompiled bytecode module instead of source
        #[arg(long)]
        precompile: bool,
    },
    /// Run deftest vars from test files
    Test {
        files: Vec<PathBuf>,
    },
    /// Scaffold a project
    New {
        name: String,
    },
}

/// Clojure-style single-dash long flags (`-Spath`, `-Sdeps …`) rewritten
/// into forms clap accepts.
fn preprocess_args() -> Vec<String> {
    std::env::args()
        .map(|arg| match arg.as_str() {
            "-Spath" => "--spath".to_string(),
            "-Sdeps" => "--sdeps".to_string(),
            "-Sverbose" => "--sverbose".to_string(),
            "-Srepro" => "--srepro".to_string(),
            "-Sforce" => "--sforce".to_string(),
            _ => arg,
        })
        .collect()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CLJW_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    // a built binary runs its embedded program before any CLI parsing
    if let Some(payload) = build_bin::embedded_payload() {
        process::exit(run_embedded(&payload));
    }

    let cli = Cli::parse_from(preprocess_args());
    process::exit(run(cli));
}

fn backend_of(cli: &Cli) -> Backend {
    if cli.tree_walk {
        Backend::Tree
    } else {
        Backend::Vm
    }
}

fn cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| {
        d.join("cljw")
            .join(format!("bootstrap-v{}.bin", env!("CARGO_PKG_VERSION")))
    })
}

fn boot(backend: Backend, force_source: bool) -> Result<Rc<Interp>, Failure> {
    let interp = Interp::new(backend);
    bootstrap_with_cache(&interp, cache_path().as_deref(), force_source)?;
    Ok(interp)
}

fn run_embedded(payload: &[u8]) -> i32 {
    let interp = match boot(Backend::Vm, false) {
        Ok(interp) => interp,
        Err(failure) => {
            report::print_failure(&failure, None);
            return 1;
        }
    };
    let argv: Vec<String> = std::env::args().skip(1).collect();
    match build_bin::run_embedded(&interp, payload, &argv) {
        Ok(true) => {
            if let Err(e) = nrepl::serve(&interp, 7888) {
                eprintln!("nREPL server failed: {}", e);
                return 1;
            }
            0
        }
        Ok(false) => 0,
        Err(failure) => {
            report::print_failure(&failure, None);
            1
        }
    }
}

fn strip_alias(raw: &str) -> Vec<String> {
    raw.trim_start_matches(':')
        .split(':')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn run(cli: Cli) -> i32 {
    let mut aliases: Vec<String> = Vec::new();
    for a in &cli.repl_aliases {
        aliases.extend(strip_alias(a));
    }
    if let Some(m) = &cli.main_alias {
        aliases.extend(strip_alias(m));
    }
    if let Some(x) = &cli.exec_alias {
        aliases.extend(strip_alias(x));
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = match deps::read_config(&cwd, cli.sdeps.as_deref()) {
        Ok(config) => config,
        Err(failure) => {
            report::print_failure(&failure, None);
            return 1;
        }
    };
    let fetch = cli.prepare || !cli.srepro;
    let load_paths = match deps::resolve_paths(&config, &aliases, fetch, cli.sverbose) {
        Ok(paths) => paths,
        Err(failure) => {
            report::print_failure(&failure, None);
            return 1;
        }
    };

    if cli.spath {
        for path in &load_paths {
            println!("{}", path.display());
        }
        return 0;
    }
    if cli.prepare {
        return 0;
    }

    let interp = match boot(backend_of(&cli), cli.sforce) {
        Ok(interp) => interp,
        Err(failure) => {
            report::print_failure(&failure, None);
            return 1;
        }
    };
    for path in &load_paths {
        interp.env.add_load_path(path.clone());
    }

    match cli.command {
        Some(Commands::Build {
            input,
            output,
            nrepl,
            precompile,
        }) => {
            match build_bin::build(
                &interp,
                &config,
                &load_paths,
                &input,
                output,
                nrepl,
                precompile,
            ) {
                Ok(out) => {
                    println!("Built {}", out.display());
                    0
                }
                Err(failure) => {
                    report::print_failure(&failure, None);
                    1
                }
            }
        }
        Some(Commands::Test { files }) => testrunner::run(&interp, &files, &config),
        Some(Commands::New { name }) => match scaffold::new_project(&name) {
            Ok(()) => 0,
            Err(failure) => {
                report::print_failure(&failure, None);
                1
            }
        },
        None => run_modeless(&cli, &interp, &config),
    }
}

fn set_command_line_args(interp: &Interp, args: &[String]) {
    if let Some(var) = interp.env.core_ns().mapping("*command-line-args*") {
        var.set_root(if args.is_empty() {
            Value::Nil
        } else {
            Value::list(args.iter().map(|a| Value::string(a.as_str())).collect())
        });
    }
}

fn run_modeless(cli: &Cli, interp: &Rc<Interp>, config: &deps::DepsConfig) -> i32 {
    if let Some(expr) = &cli.eval {
        if cli.dump_bytecode {
            return dump(interp, expr, None);
        }
        return eval_and_print(interp, expr);
    }

    if cli.nrepl_server {
        return match nrepl::serve(interp, cli.port) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("nREPL server failed: {}", e);
                1
            }
        };
    }

    // -M / -X / :cljw/main
    let exec_fn = cli.exec_alias.as_ref().and_then(|a| {
        strip_alias(a)
            .iter()
            .find_map(|name| config.aliases.get(name).and_then(|al| al.exec_fn.clone()))
            .or_else(|| cli.args.first().cloned())
    });
    if cli.exec_alias.is_some() {
        let Some(exec_fn) = exec_fn else {
            eprintln!("-X requires an :exec-fn or a fn argument");
            return 1;
        };
        return exec_mode(interp, &exec_fn, &cli.args);
    }
    if cli.main_alias.is_some() || cli.main_ns.is_some() {
        let main_ns = cli.main_ns.clone().or_else(|| {
            cli.main_alias.as_ref().and_then(|a| {
                strip_alias(a).iter().find_map(|name| {
                    config.aliases.get(name).and_then(|al| {
                        al.main_opts
                            .windows(2)
                            .find(|w| w[0] == "-m")
                            .map(|w| w[1].clone())
                    })
                })
            })
        });
        let main_ns = main_ns.or_else(|| config.main_ns.clone());
        let Some(main_ns) = main_ns else {
            eprintln!("-M requires -m, :main-opts, or :cljw/main");
            return 1;
        };
        return main_mode(interp, &main_ns, &cli.args);
    }

    // file evaluation or REPL
    if let Some((file, rest)) = cli.args.split_first() {
        set_command_line_args(interp, rest);
        if cli.dump_bytecode {
            let src = match std::fs::read_to_string(file) {
                Ok(src) => src,
                Err(e) => {
                    eprintln!("io error: could not read {}: {}", file, e);
                    return 1;
                }
            };
            return dump(interp, &src, Some(file));
        }
        return match cljw_runtime::namespaces::load_path(&interp.env, std::path::Path::new(file))
        {
            Ok(_) => 0,
            Err(failure) => {
                report::print_failure(&failure, None);
                1
            }
        };
    }

    repl::run_repl(interp)
}

/// `-e`: evaluate each form in order and print every non-nil result.
fn eval_and_print(interp: &Interp, expr: &str) -> i32 {
    let forms = match Reader::new(expr, &interp.env, None).read_all() {
        Ok(forms) => forms,
        Err(e) => {
            report::print_failure(&Failure::Error(e), Some(expr));
            return 1;
        }
    };
    for form in &forms {
        match interp.eval_form(form, None) {
            Ok(value) => {
                if !matches!(value, Value::Nil) {
                    match cljw_runtime::seqs::realize_deep(&interp.env, &value) {
                        Ok(realized) => println!("{}", pr_str(&realized)),
                        Err(failure) => {
                            report::print_failure(&failure, Some(expr));
                            return 1;
                        }
                    }
                }
                interp.safe_point(&[]);
            }
            Err(failure) => {
                report::print_failure(&failure, Some(expr));
                return 1;
            }
        }
    }
    0
}

fn dump(interp: &Interp, src: &str, file: Option<&str>) -> i32 {
    match interp.dump_bytecode(src, file) {
        Ok(listing) => {
            print!("{}", listing);
            0
        }
        Err(failure) => {
            report::print_failure(&failure, Some(src));
            1
        }
    }
}

fn main_mode(interp: &Interp, main_ns: &str, args: &[String]) -> i32 {
    set_command_line_args(interp, args);
    let require = format!("(require '{})", main_ns);
    if let Err(failure) = interp.eval_str(&require, None) {
        report::print_failure(&failure, None);
        return 1;
    }
    let main_var = match interp
        .env
        .resolve(&Symbol::qualified(main_ns, "-main"))
    {
        Ok(var) => var,
        Err(e) => {
            report::print_failure(&Failure::Error(e), None);
            return 1;
        }
    };
    let main_fn = match main_var.deref() {
        Ok(f) => f,
        Err(e) => {
            report::print_failure(&Failure::Error(e), None);
            return 1;
        }
    };
    let call_args: Vec<Value> = args.iter().map(|a| Value::string(a.as_str())).collect();
    match interp.call_value(&main_fn, &call_args) {
        Ok(_) => 0,
        Err(failure) => {
            report::print_failure(&failure, None);
            1
        }
    }
}

/// `-X`: call a fully qualified fn with keyword arguments read from the
/// command line.
fn exec_mode(interp: &Interp, exec_fn: &str, raw_args: &[String]) -> i32 {
    let sym = Symbol::parse(exec_fn);
    if let Some(ns) = &sym.ns {
        let require = format!("(require '{})", ns);
        if let Err(failure) = interp.eval_str(&require, None) {
            report::print_failure(&failure, None);
            return 1;
        }
    }
    let var = match interp.env.resolve(&sym) {
        Ok(var) => var,
        Err(e) => {
            report::print_failure(&Failure::Error(e), None);
            return 1;
        }
    };
    // everything after the fn name reads as alternating keyword/value
    let kv_source: Vec<&String> = raw_args
        .iter()
        .skip_while(|a| a.as_str() != exec_fn)
        .skip(1)
        .collect();
    let joined = kv_source
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let arg_map_src = format!("(hash-map {})", joined);
    let arg_map = match interp.eval_str(&arg_map_src, None) {
        Ok(v) => v,
        Err(failure) => {
            report::print_failure(&failure, None);
            return 1;
        }
    };
    let f = match var.deref() {
        Ok(f) => f,
        Err(e) => {
            report::print_failure(&Failure::Error(e), None);
            return 1;
        }
    };
    match interp.call_value(&f, &[arg_map]) {
        Ok(_) => 0,
        Err(failure) => {
            report::print_failure(&failure, None);
            1
        }
    }
}
