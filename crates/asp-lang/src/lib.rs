//! `asp-lang` interprets Visual-Basic-flavored server pages.
//!
//! Documents arrive already parsed: a sequence of markup, code and output
//! blocks built from the nodes in [`ast`]. A [`Host`] runs one document per
//! request and owns the state requests share.
//!
//! ## Examples
//!
//! ```rs
//! use asp_lang::{AstExpr, AstStmt, Engine};
//!
//! let engine = Engine::default();
//! let program = vec![AstStmt::call(AstExpr::call(
//!     AstExpr::member(AstExpr::ident("response"), "write"),
//!     [AstExpr::string("Hello")],
//! ))];
//!
//! assert_eq!(engine.eval(program).unwrap(), "Hello");
//! ```
mod array;
pub mod ast;
mod config;
mod engine;
mod error;
pub mod eval;
pub mod host;
mod ident;
pub mod object;
mod range;
mod value;

pub use array::VbArray;
pub use ast::Program;
pub use ast::node::BinaryOp as AstBinaryOp;
pub use ast::node::Document;
pub use ast::node::Expr as AstExpr;
pub use ast::node::Section as AstSection;
pub use ast::node::Stmt as AstStmt;
pub use ast::node::StmtKind as AstStmtKind;
pub use config::{Config, LogFormat};
pub use engine::Engine;
pub use error::{Error, InnerError};
pub use eval::builtin::{CustomFunctions, FunctionTable, FunctionTables};
pub use eval::error::EvalError;
pub use eval::flow::{Flow, Halt, RequestControl};
pub use eval::{Evaluator, Options};
pub use host::{Host, HttpRequest, RequestData, RequestOutcome, SessionData, SharedValue};
pub use ident::Ident;
pub use object::{Object, ObjectRef};
pub use range::{Position, Range};
pub use value::{CompareMode, Value, compare_equal, compare_less};

pub type AspResult = Result<String, Box<Error>>;
