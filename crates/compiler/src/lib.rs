//! cljw compiler: source text to runnable code.
//!
//! The pipeline is tokenizer → reader → analyzer → (optionally) bytecode
//! emitter. Forms are plain Values, so macro expansion results re-enter
//! the analyzer unchanged; the tree walker consumes analyzer Nodes
//! directly and the VM consumes chunks from the emitter.
//!
//! # Modules
//!
//! - `token`: byte stream → located tokens, full numeric grammar
//! - `reader`: tokens → forms; reader macros, syntax-quote, limits
//! - `analyzer`: forms → Nodes; special forms, destructuring, macros
//! - `emit`: Nodes → Chunk/FnProto with stack-depth-tracked slots

pub mod analyzer;
pub mod emit;
pub mod reader;
pub mod token;

pub use analyzer::Analyzer;
pub use emit::{dump_proto, Emitter};
pub use reader::{Reader, ReaderLimits, PLATFORM_TAG};
pub use token::{Token, TokenKind, Tokenizer};
