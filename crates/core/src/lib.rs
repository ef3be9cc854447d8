//! cljw core: the language-independent runtime foundation.
//!
//! This crate holds everything both evaluation back ends share:
//!
//! - `value`: the tagged Value enum and `=`/hash semantics
//! - `collections`: persistent list, vector, map, set
//! - `symbol`: symbols and interned keywords
//! - `env`: namespaces, Vars, dynamic bindings, the call bridge
//! - `gc`: mark-sweep over the mutable cell graph, with free pools
//! - `ast`: analyzer output consumed by the tree walker and the emitter
//! - `chunk`: bytecode opcodes, chunks and fn prototypes
//! - `printer`: `pr-str`/`str` rendering
//! - `error`: error kinds, source positions and the failure channels

pub mod ast;
pub mod chunk;
pub mod collections;
pub mod env;
pub mod error;
pub mod gc;
pub mod printer;
pub mod symbol;
pub mod value;

pub use collections::{Key, PersistentList, PersistentMap, PersistentSet, PersistentVector};
pub use env::{CallBridge, Env, Namespace, Var, CORE_NS};
pub use error::{CljError, ErrorKind, EvalResult, Failure, SourcePos, Thrown, TraceFrame};
pub use symbol::{Keyword, Symbol};
pub use value::{eql, eql_total, hash_value, identical, BuiltinDef, Closure, FnKind, Value};
