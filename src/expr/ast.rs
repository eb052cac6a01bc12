//! Syntax tree for template expressions and `@php` statements

use crate::value::Value;

/// An expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Variable reference, name stored without `$`
    Variable(String),
    /// `[a, b]` or `['k' => v]`; keyless entries get positional keys
    Array(Vec<(Option<Expr>, Expr)>),
    /// `$a->b` or `$a.b`
    Member { object: Box<Expr>, field: String },
    /// `$a[expr]`
    Index { object: Box<Expr>, index: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    /// Call into the helper allow-list
    Call { name: String, args: Vec<Expr> },
}

impl Expr {
    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// The string value when this is a plain string literal
    pub fn as_str_literal(&self) -> Option<&str> {
        match self {
            Expr::Literal(Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
    Coalesce,
}

/// Compound assignment operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Concat,
}

/// A statement inside `@php` blocks and `@for` headers
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign {
        name: String,
        op: AssignOp,
        value: Expr,
    },
    /// `$i++` / `$i--`
    Step { name: String, delta: i64 },
    Expr(Expr),
}

/// `$items as $item` or `$items as $key => $value`
#[derive(Debug, Clone, PartialEq)]
pub struct ForeachHeader {
    pub iterable: Expr,
    pub key: Option<String>,
    pub value: String,
}

/// `init; condition; step`
#[derive(Debug, Clone, PartialEq)]
pub struct ForHeader {
    pub init: Vec<Stmt>,
    pub condition: Option<Expr>,
    pub step: Vec<Stmt>,
}
