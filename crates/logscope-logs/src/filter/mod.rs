//! Filter query language.
//!
//! Queries such as `level == "ERROR" AND count > 10` compile into an
//! [`Expression`] tree that is evaluated per record with [`Expression::apply`].

mod ast;
mod compile;
mod error;
mod eval;
mod lexer;

pub use ast::{CompareOp, Comparison, Expression, Literal, Pattern, TextMatch};
pub use compile::compile;
pub use error::{CompileError, EvalError};
