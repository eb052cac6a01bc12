//! Directive translation and execution
//!
//! The translator rewrites `@directives` and `{{ }}` echoes into markers,
//! the program parser turns marked text into a node tree, and the
//! interpreter runs that tree against a render session.

mod interpreter;
mod program;
mod translator;

pub use interpreter::{Flow, Interpreter};
pub use program::{parse_program, Node, Program};
pub use translator::DirectiveTranslator;
