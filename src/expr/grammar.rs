//! Expression parser implementation using chumsky

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;

use crate::error::ExprError;
use crate::expr::ast::*;
use crate::expr::lexer::{lex, Token};
use crate::value::Value;

/// Lex `$input`, feed the tokens to `$parser` and require it to consume
/// everything
macro_rules! run_parser {
    ($input:expr, $parser:expr) => {{
        let input: &str = $input;
        let len = input.len();
        let tokens = lex(input)?;

        // Turn the token vector into a stream that chumsky can use
        let token_stream = Stream::from_iter(tokens.into_iter().map(|(tok, span)| (tok, span.into())))
            .map((len..len).into(), |(t, s): (_, _)| (t, s));

        $parser
            .then_ignore(end())
            .parse(token_stream)
            .into_result()
            .map_err(|errs| {
                errs.into_iter()
                    .next()
                    .map(ExprError::from)
                    .unwrap_or_else(|| ExprError::Runtime("unparseable expression".to_string()))
            })
    }};
}

/// Parse a single expression
pub fn parse_expression(input: &str) -> Result<Expr, ExprError> {
    run_parser!(input, expr_parser())
}

/// Parse a `;`-separated statement list, as found in `@php` blocks
pub fn parse_statements(input: &str) -> Result<Vec<Stmt>, ExprError> {
    run_parser!(
        input,
        stmt_parser()
            .separated_by(just(Token::Semicolon))
            .allow_trailing()
            .collect::<Vec<_>>()
    )
}

/// Parse a comma-separated argument list (directive arguments)
pub fn parse_arguments(input: &str) -> Result<Vec<Expr>, ExprError> {
    run_parser!(
        input,
        expr_parser()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
    )
}

/// Parse a `@foreach` header
pub fn parse_foreach(input: &str) -> Result<ForeachHeader, ExprError> {
    run_parser!(input, foreach_parser())
}

/// Parse a `@for` header
pub fn parse_for(input: &str) -> Result<ForHeader, ExprError> {
    run_parser!(input, for_parser())
}

/// Postfix operations folded onto an atom
#[derive(Debug, Clone)]
enum Postfix {
    Member(String),
    Index(Expr),
}

fn word<'a, I>(keyword: &'static str) -> impl Parser<'a, I, (), extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    select! {
        Token::Ident(w) if w.eq_ignore_ascii_case(keyword) => (),
    }
}

fn expr_parser<'a, I>() -> impl Parser<'a, I, Expr, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    recursive(|expr| {
        let ident = select! { Token::Ident(name) => name };

        let literal = select! {
            Token::Int(n) => Expr::Literal(Value::Int(n)),
            Token::Float(f) => Expr::Literal(Value::Float(f)),
            Token::Str(s) => Expr::Literal(Value::String(s)),
        };

        let keyword = choice((
            word("true").to(Expr::Literal(Value::Bool(true))),
            word("false").to(Expr::Literal(Value::Bool(false))),
            word("null").to(Expr::Literal(Value::Null)),
        ));

        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::ParenOpen), just(Token::ParenClose));

        let call = ident
            .clone()
            .then(args)
            .map(|(name, args)| Expr::Call { name, args });

        // Array entries: `value` or `key => value`
        let entry = expr
            .clone()
            .then(just(Token::FatArrow).ignore_then(expr.clone()).or_not())
            .map(|(first, second)| match second {
                Some(value) => (Some(first), value),
                None => (None, first),
            });

        let array = entry
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::BracketOpen), just(Token::BracketClose))
            .map(Expr::Array);

        let atom = choice((
            literal,
            keyword,
            call,
            select! { Token::Variable(name) => Expr::Variable(name) },
            // Bare identifiers are accepted as variables
            ident.clone().map(Expr::Variable),
            array,
            expr.clone()
                .delimited_by(just(Token::ParenOpen), just(Token::ParenClose)),
        ))
        .boxed();

        let postfix = choice((
            just(Token::Arrow).ignore_then(ident).map(Postfix::Member),
            select! { Token::DotField(field) => Postfix::Member(field) },
            expr.clone()
                .delimited_by(just(Token::BracketOpen), just(Token::BracketClose))
                .map(Postfix::Index),
        ));

        let postfixed = atom
            .foldl(postfix.repeated(), |object, op| match op {
                Postfix::Member(field) => Expr::Member {
                    object: Box::new(object),
                    field,
                },
                Postfix::Index(index) => Expr::Index {
                    object: Box::new(object),
                    index: Box::new(index),
                },
            })
            .boxed();

        let unary = choice((
            just(Token::Bang).to(UnaryOp::Not),
            just(Token::Minus).to(UnaryOp::Neg),
        ))
        .repeated()
        .foldr(postfixed, Expr::unary)
        .boxed();

        let product = unary
            .clone()
            .foldl(
                choice((
                    just(Token::Star).to(BinaryOp::Mul),
                    just(Token::Slash).to(BinaryOp::Div),
                    just(Token::Percent).to(BinaryOp::Mod),
                ))
                .then(unary)
                .repeated(),
                |left, (op, right)| Expr::binary(left, op, right),
            )
            .boxed();

        let sum = product
            .clone()
            .foldl(
                choice((
                    just(Token::Plus).to(BinaryOp::Add),
                    just(Token::Minus).to(BinaryOp::Sub),
                    just(Token::Dot).to(BinaryOp::Concat),
                ))
                .then(product)
                .repeated(),
                |left, (op, right)| Expr::binary(left, op, right),
            )
            .boxed();

        let comparison = sum
            .clone()
            .foldl(
                choice((
                    just(Token::LessOrEqual).to(BinaryOp::LessOrEqual),
                    just(Token::GreaterOrEqual).to(BinaryOp::GreaterOrEqual),
                    just(Token::Less).to(BinaryOp::Less),
                    just(Token::Greater).to(BinaryOp::Greater),
                ))
                .then(sum)
                .repeated(),
                |left, (op, right)| Expr::binary(left, op, right),
            )
            .boxed();

        let equality = comparison
            .clone()
            .foldl(
                choice((
                    just(Token::StrictEq).to(BinaryOp::StrictEq),
                    just(Token::StrictNotEq).to(BinaryOp::StrictNotEq),
                    just(Token::Eq).to(BinaryOp::Eq),
                    just(Token::NotEq).to(BinaryOp::NotEq),
                ))
                .then(comparison)
                .repeated(),
                |left, (op, right)| Expr::binary(left, op, right),
            )
            .boxed();

        let conjunction = equality
            .clone()
            .foldl(
                choice((just(Token::AndAnd).to(BinaryOp::And), word("and").to(BinaryOp::And)))
                    .then(equality)
                    .repeated(),
                |left, (op, right)| Expr::binary(left, op, right),
            )
            .boxed();

        let disjunction = conjunction
            .clone()
            .foldl(
                choice((just(Token::OrOr).to(BinaryOp::Or), word("or").to(BinaryOp::Or)))
                    .then(conjunction)
                    .repeated(),
                |left, (op, right)| Expr::binary(left, op, right),
            )
            .boxed();

        let coalesce = disjunction
            .clone()
            .foldl(
                just(Token::Coalesce)
                    .to(BinaryOp::Coalesce)
                    .then(disjunction)
                    .repeated(),
                |left, (op, right)| Expr::binary(left, op, right),
            )
            .boxed();

        coalesce
            .then(
                just(Token::Question)
                    .ignore_then(expr.clone())
                    .then_ignore(just(Token::Colon))
                    .then(expr)
                    .or_not(),
            )
            .map(|(condition, branches)| match branches {
                Some((then_branch, else_branch)) => Expr::Ternary {
                    condition: Box::new(condition),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                },
                None => condition,
            })
            .boxed()
    })
}

fn stmt_parser<'a, I>() -> impl Parser<'a, I, Stmt, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    let variable = select! { Token::Variable(name) => name };

    let assign_op = choice((
        just(Token::Assign).to(AssignOp::Set),
        just(Token::PlusAssign).to(AssignOp::Add),
        just(Token::MinusAssign).to(AssignOp::Sub),
        just(Token::ConcatAssign).to(AssignOp::Concat),
    ));

    let assign = variable
        .clone()
        .then(assign_op)
        .then(expr_parser())
        .map(|((name, op), value)| Stmt::Assign { name, op, value });

    let step = choice((
        variable
            .clone()
            .then_ignore(just(Token::Increment))
            .map(|name| Stmt::Step { name, delta: 1 }),
        variable
            .clone()
            .then_ignore(just(Token::Decrement))
            .map(|name| Stmt::Step { name, delta: -1 }),
        just(Token::Increment)
            .ignore_then(variable.clone())
            .map(|name| Stmt::Step { name, delta: 1 }),
        just(Token::Decrement)
            .ignore_then(variable)
            .map(|name| Stmt::Step { name, delta: -1 }),
    ));

    choice((assign, step, expr_parser().map(Stmt::Expr))).boxed()
}

fn foreach_parser<'a, I>() -> impl Parser<'a, I, ForeachHeader, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    let variable = select! { Token::Variable(name) => name };

    expr_parser()
        .then_ignore(word("as"))
        .then(variable.clone())
        .then(just(Token::FatArrow).ignore_then(variable).or_not())
        .map(|((iterable, first), second)| match second {
            Some(value) => ForeachHeader {
                iterable,
                key: Some(first),
                value,
            },
            None => ForeachHeader {
                iterable,
                key: None,
                value: first,
            },
        })
}

fn for_parser<'a, I>() -> impl Parser<'a, I, ForHeader, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    let stmt_list = stmt_parser()
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>();

    stmt_list
        .clone()
        .then_ignore(just(Token::Semicolon))
        .then(expr_parser().or_not())
        .then_ignore(just(Token::Semicolon))
        .then(stmt_list)
        .map(|((init, condition), step)| ForHeader {
            init,
            condition,
            step,
        })
}
