//! Vela: an ahead-of-time and interactive compiler for a small
//! imperative, expression-oriented systems language with structural
//! types and units of measure.
//!
//! Pipeline: [`lexer`] → [`parser`] → [`typeck`] → [`lower`] → [`backend`],
//! orchestrated by [`compile::Pipeline`] for both the batch [`cli`] and the
//! [`repl`].

pub mod ast;
pub mod backend;
pub mod cli;
pub mod compile;
pub mod env;
pub mod error;
pub mod intern;
pub mod ir;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod repl;
pub mod span;
pub mod token;
pub mod typeck;
pub mod types;
pub mod units;

pub use backend::{Backend, BackendError, Interpreter, RuntimeValue};
pub use compile::Pipeline;
pub use error::Diagnostic;
pub use span::{File, Span};
