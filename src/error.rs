//! Error types for compiling, evaluating and rendering views

use std::path::PathBuf;

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// Errors surfaced by a `render()` call
///
/// Every variant is recoverable at the call boundary; the caller decides how
/// to present it.
#[derive(Debug, Error)]
pub enum ViewError {
    /// The view resolver has no file for this name
    #[error("view not found: {name}")]
    ViewNotFound { name: String },

    /// No registered component matches the tag name or any of its variants
    #[error("component not found: <x-{name}>")]
    ComponentNotFound { name: String },

    /// Rendered component output kept introducing components
    #[error("component <x-{name}> exceeded the nesting limit of {limit}")]
    ComponentRecursionLimit { name: String, limit: usize },

    /// A paired component tag without its closing tag
    #[error("unclosed component tag <x-{name}> at byte {offset}")]
    UnclosedComponent { name: String, offset: usize },

    /// `@prop` attribute that does not follow `@prop(name)` or `@prop:name`
    #[error("malformed prop attribute '{attribute}'")]
    MalformedProp { attribute: String },

    /// Include reference escaping the sandboxed view directories
    #[error("unsafe include path '{name}': {reason}")]
    UnsafeIncludePath { name: String, reason: String },

    /// Includes nested deeper than the configured limit
    #[error("include '{name}' exceeded the nesting limit of {limit}")]
    IncludeRecursionLimit { name: String, limit: usize },

    /// Layouts extending each other deeper than the configured limit
    #[error("layout '{name}' exceeded the inheritance limit of {limit}")]
    LayoutRecursionLimit { name: String, limit: usize },

    /// Any fault raised while parsing or running the executable form
    #[error("template evaluation failed: {message}")]
    TemplateEvaluationError { message: String },

    /// The compile loop was still changing the text after the pass cap
    #[error("compilation did not converge after {passes} passes")]
    CompilationDidNotConverge { passes: usize },

    /// Reading a view, include or component file failed
    #[error("error reading {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl ViewError {
    /// Create a view-not-found error
    pub fn view_not_found(name: impl Into<String>) -> Self {
        Self::ViewNotFound { name: name.into() }
    }

    /// Create an unsafe include error
    pub fn unsafe_include(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsafeIncludePath {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an evaluation error from any message
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::TemplateEvaluationError {
            message: message.into(),
        }
    }

    /// Create an I/O error for a path
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<ExprError> for ViewError {
    fn from(err: ExprError) -> Self {
        ViewError::TemplateEvaluationError {
            message: err.to_string(),
        }
    }
}

/// Errors from the expression language: syntax and runtime faults
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExprError {
    #[error("syntax error at {span:?}: {message}")]
    Syntax {
        span: Span,
        message: String,
        expected: Vec<String>,
    },

    #[error("unrecognized input '{fragment}' at {span:?}")]
    Lex { span: Span, fragment: String },

    #[error("undefined variable ${name}")]
    UndefinedVariable { name: String },

    #[error("call to unknown function {name}()")]
    UnknownFunction { name: String },

    #[error("{function}() expects {expected}")]
    BadArguments { function: String, expected: String },

    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("evaluation budget of {limit} steps exhausted")]
    BudgetExhausted { limit: u64 },

    #[error("{0}")]
    Runtime(String),
}

impl ExprError {
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
        }
    }

    pub fn bad_arguments(function: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::BadArguments {
            function: function.into(),
            expected: expected.into(),
        }
    }

    /// Format the error with source context using ariadne
    ///
    /// Runtime errors carry no span and fall back to their display form.
    pub fn format(&self, source: &str, filename: &str) -> String {
        let (span, message, expected) = match self {
            ExprError::Syntax {
                span,
                message,
                expected,
            } => (span.clone(), message.clone(), expected.clone()),
            ExprError::Lex { span, .. } => (span.clone(), self.to_string(), Vec::new()),
            other => return other.to_string(),
        };

        let expected_str = if expected.is_empty() {
            String::new()
        } else {
            format!("\nExpected: {}", expected.join(", "))
        };

        let mut buf = Vec::new();
        let written = Report::build(ReportKind::Error, filename, span.start)
            .with_message(&message)
            .with_label(
                Label::new((filename, span))
                    .with_message(format!("{}{}", message, expected_str))
                    .with_color(Color::Red),
            )
            .finish()
            .write((filename, Source::from(source)), &mut buf);
        match written {
            Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => self.to_string(),
        }
    }
}

impl<'a> From<chumsky::error::Rich<'a, crate::expr::lexer::Token>> for ExprError {
    fn from(err: chumsky::error::Rich<'a, crate::expr::lexer::Token>) -> Self {
        use chumsky::error::{RichPattern, RichReason};

        let message = match err.reason() {
            RichReason::ExpectedFound { found, .. } => match found {
                Some(tok) => format!("Unexpected {}", format_token(tok)),
                None => "Unexpected end of expression".to_string(),
            },
            RichReason::Custom(msg) => msg.to_string(),
        };

        let expected: Vec<String> = err
            .expected()
            .filter_map(|e| match e {
                RichPattern::Token(tok) => Some(format_token(tok)),
                RichPattern::Label(label) => Some(label.to_string()),
                RichPattern::EndOfInput => Some("end of expression".to_string()),
                RichPattern::Identifier(s) => Some(format!("identifier '{}'", s)),
                RichPattern::Any => Some("any token".to_string()),
                RichPattern::SomethingElse => None,
            })
            .collect();

        ExprError::Syntax {
            span: err.span().into_range(),
            message,
            expected,
        }
    }
}

/// Format a token for human-readable error messages
fn format_token(tok: &crate::expr::lexer::Token) -> String {
    use crate::expr::lexer::Token;
    match tok {
        Token::Variable(name) => format!("variable '${}'", name),
        Token::Ident(name) => format!("identifier '{}'", name),
        Token::Str(s) => format!("string \"{}\"", s),
        Token::Int(n) => format!("number {}", n),
        Token::Float(n) => format!("number {}", n),
        Token::DotField(field) => format!("'.{}'", field),
        Token::ParenOpen => "'('".to_string(),
        Token::ParenClose => "')'".to_string(),
        Token::BracketOpen => "'['".to_string(),
        Token::BracketClose => "']'".to_string(),
        Token::Comma => "','".to_string(),
        Token::Semicolon => "';'".to_string(),
        Token::Question => "'?'".to_string(),
        Token::Colon => "':'".to_string(),
        Token::Arrow => "'->'".to_string(),
        Token::FatArrow => "'=>'".to_string(),
        Token::Assign => "'='".to_string(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_error_converts_to_evaluation_error() {
        let err: ViewError = ExprError::UndefinedVariable {
            name: "user".to_string(),
        }
        .into();
        match err {
            ViewError::TemplateEvaluationError { message } => {
                assert_eq!(message, "undefined variable $user");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_format_runtime_error_without_span() {
        let err = ExprError::DivisionByZero;
        assert_eq!(err.format("1 / 0", "inline"), "division by zero");
    }

    #[test]
    fn test_format_syntax_error_mentions_message() {
        let err = ExprError::Syntax {
            span: 2..3,
            message: "Unexpected ')'".to_string(),
            expected: vec!["expression".to_string()],
        };
        let formatted = err.format("1 +)", "inline");
        assert!(formatted.contains("Unexpected ')'"));
    }
}
