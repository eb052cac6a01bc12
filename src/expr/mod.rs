//! Sandboxed expression language used by interpolations and directives

pub mod ast;
pub mod eval;
mod grammar;
pub mod lexer;

pub use ast::*;
pub use eval::{evaluate_detached, Budget, Detached, Evaluator, Helpers, Scope};
pub use grammar::{parse_arguments, parse_expression, parse_for, parse_foreach, parse_statements};
