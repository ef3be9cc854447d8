//! cljw runtime: both evaluation back ends behind one call dispatch.
//!
//! # Modules
//!
//! - `interp`: the interpreter facade and callFnVal bridge
//! - `treewalk`: direct Node interpretation
//! - `vm`: the bytecode stack machine
//! - `numeric`: the checked numeric tower shared by both back ends
//! - `seqs`: seq realization, filter-chain collapsing
//! - `builtins`: the static host-function registry
//! - `errors`: ex-info values and catch-class matching
//! - `namespaces`: require / load-file / load-path search
//! - `bootstrap`: embedded core library + serialized env snapshot

pub mod bootstrap;
pub mod builtins;
pub mod errors;
pub mod interp;
pub mod namespaces;
pub mod numeric;
pub mod seqs;
pub mod treewalk;
pub mod vm;

pub use bootstrap::{bootstrap, bootstrap_with_cache, write_cache, CACHE_VERSION};
pub use interp::{Backend, Interp};
