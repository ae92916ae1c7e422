//! # nnef-validator
//!
//! Parser driver and validator for NNEF graph descriptions.
//
//   graph text ──► Lexer ──► Parser ──► AST ──► Lowering ──► Callback
//                                                              │
//                                   PrintCallback ◄────────────┘
//                                     │ canonical text
//                                     └─► variable shapes ──► sidecar .dat check
//
// Two parser variants share the pipeline: the flat grammar (invocations
// only) and the compositional grammar (fragments and expressions, expanded
// on demand through `Callback::is_atomic`).
//
// USAGE:
//   let mut sink = PrintCallback::new(std::io::stdout(), AtomicOverrides::new());
//   CompParser::new(false)?.parse(&mut source.as_bytes(), &mut sink)?;
//   let issues = verify_shapes(path, &sink.into_variable_shapes());

pub mod ast;
pub mod atomics;
pub mod binary;
pub mod callback;
pub mod cli;
pub mod error;
pub mod frontend;
pub mod graph;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod printer;
pub mod report;
pub mod shapes;
pub mod stdlib;
pub mod token;
pub mod validate;
pub mod validator;
pub mod verify;

pub use atomics::AtomicOverrides;
pub use callback::{AtomicPolicy, Callback};
pub use error::{Error, ErrorKind, Result};
pub use frontend::{CompParser, FlatParser, Parser};
pub use parser::parse;
pub use printer::PrintCallback;
pub use validator::{run, Options, Outcome};
pub use verify::verify_shapes;
