//! Tree-walking evaluator for template expressions
//!
//! Evaluation is sandboxed: expressions can read variables, do arithmetic
//! and comparisons, and call a fixed allow-list of helpers. There is no path
//! from template text to arbitrary code.

use indexmap::IndexMap;

use crate::context::RenderContext;
use crate::error::ExprError;
use crate::expr::ast::*;
use crate::value::{escape_html, Number, Value};

/// Services the helper allow-list needs from the surrounding render
pub trait Helpers {
    fn csrf_token(&self) -> String;
    fn is_authenticated(&self) -> bool;
    fn has_section(&self, name: &str) -> bool;
}

/// Helpers for evaluation outside a render session (attribute parsing,
/// include parameters): no token, never authenticated, no sections
#[derive(Debug, Default, Clone, Copy)]
pub struct Detached;

impl Helpers for Detached {
    fn csrf_token(&self) -> String {
        String::new()
    }

    fn is_authenticated(&self) -> bool {
        false
    }

    fn has_section(&self, _name: &str) -> bool {
        false
    }
}

/// Step counter bounding the work a single evaluation may do
#[derive(Debug, Clone)]
pub struct Budget {
    used: u64,
    limit: u64,
}

impl Budget {
    pub fn new(limit: u64) -> Self {
        Self { used: 0, limit }
    }

    /// Consume one step. Returns error if exhausted.
    pub fn tick(&mut self) -> Result<(), ExprError> {
        self.used += 1;
        if self.used > self.limit {
            Err(ExprError::BudgetExhausted { limit: self.limit })
        } else {
            Ok(())
        }
    }

    /// Consume `steps` at once, for work proportional to an output size
    pub fn charge(&mut self, steps: u64) -> Result<(), ExprError> {
        self.used = self.used.saturating_add(steps);
        if self.used > self.limit {
            Err(ExprError::BudgetExhausted { limit: self.limit })
        } else {
            Ok(())
        }
    }

    pub fn used(&self) -> u64 {
        self.used
    }
}

/// Variables of one evaluation
///
/// Template variables are function-scoped: loops do not open a new scope,
/// so a variable assigned inside a loop body stays visible after it.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: IndexMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Remove a variable, returning its previous value
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.shift_remove(name)
    }

    /// Restore a variable to a saved value, or remove it if there was none
    pub fn restore(&mut self, name: &str, saved: Option<Value>) {
        match saved {
            Some(value) => self.set(name, value),
            None => {
                self.remove(name);
            }
        }
    }
}

impl From<&RenderContext> for Scope {
    fn from(ctx: &RenderContext) -> Self {
        Self {
            vars: ctx.clone().into_vars(),
        }
    }
}

/// Evaluates expressions against a scope
pub struct Evaluator<'a> {
    scope: &'a Scope,
    helpers: &'a dyn Helpers,
    budget: &'a mut Budget,
}

impl<'a> Evaluator<'a> {
    pub fn new(scope: &'a Scope, helpers: &'a dyn Helpers, budget: &'a mut Budget) -> Self {
        Self {
            scope,
            helpers,
            budget,
        }
    }

    /// Evaluate an expression; undefined variables are errors
    pub fn eval(&mut self, expr: &Expr) -> Result<Value, ExprError> {
        self.eval_mode(expr, false)
    }

    /// Evaluate an expression where undefined variables read as null, as
    /// inside `isset()`, `empty()` and the left side of `??`
    pub fn eval_lenient(&mut self, expr: &Expr) -> Result<Value, ExprError> {
        self.eval_mode(expr, true)
    }

    fn eval_mode(&mut self, expr: &Expr, lenient: bool) -> Result<Value, ExprError> {
        self.budget.tick()?;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Variable(name) => match self.scope.get(name) {
                Some(value) => Ok(value.clone()),
                None if lenient => Ok(Value::Null),
                None => Err(ExprError::UndefinedVariable { name: name.clone() }),
            },
            Expr::Array(entries) => self.eval_array(entries),
            Expr::Member { object, field } => {
                let object = self.eval_mode(object, lenient)?;
                self.access(&object, &Value::String(field.clone()), lenient)
            }
            Expr::Index { object, index } => {
                let object = self.eval_mode(object, lenient)?;
                let index = self.eval(index)?;
                self.access(&object, &index, lenient)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval_mode(operand, lenient)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => match value.as_number() {
                        Some(Number::Int(n)) => Ok(n
                            .checked_neg()
                            .map(Value::Int)
                            .unwrap_or(Value::Float(-(n as f64)))),
                        Some(Number::Float(f)) => Ok(Value::Float(-f)),
                        None => Err(ExprError::type_mismatch(format!(
                            "cannot negate {}",
                            value.type_name()
                        ))),
                    },
                }
            }
            Expr::Binary { left, op, right } => self.eval_binary(left, *op, right, lenient),
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval_mode(condition, lenient)?.is_truthy() {
                    self.eval_mode(then_branch, lenient)
                } else {
                    self.eval_mode(else_branch, lenient)
                }
            }
            Expr::Call { name, args } => self.call(name, args),
        }
    }

    fn eval_array(&mut self, entries: &[(Option<Expr>, Expr)]) -> Result<Value, ExprError> {
        if entries.iter().all(|(key, _)| key.is_none()) {
            let mut items = Vec::with_capacity(entries.len());
            for (_, value) in entries {
                items.push(self.eval(value)?);
            }
            return Ok(Value::List(items));
        }

        let mut map = IndexMap::new();
        let mut next_index = 0usize;
        for (key, value) in entries {
            let key = match key {
                Some(k) => self.eval(k)?.to_string(),
                None => {
                    let k = next_index.to_string();
                    next_index += 1;
                    k
                }
            };
            let value = self.eval(value)?;
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }

    fn access(&self, object: &Value, key: &Value, lenient: bool) -> Result<Value, ExprError> {
        match object {
            Value::Map(_) | Value::List(_) | Value::Null => {
                Ok(object.get(key).cloned().unwrap_or(Value::Null))
            }
            Value::String(s) => match key {
                Value::Int(i) if *i >= 0 => Ok(s
                    .chars()
                    .nth(*i as usize)
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or(Value::Null)),
                _ if lenient => Ok(Value::Null),
                _ => Err(ExprError::type_mismatch(format!(
                    "cannot read '{}' of a string",
                    key
                ))),
            },
            _ if lenient => Ok(Value::Null),
            other => Err(ExprError::type_mismatch(format!(
                "cannot read '{}' of {}",
                key,
                other.type_name()
            ))),
        }
    }

    fn eval_binary(
        &mut self,
        left: &Expr,
        op: BinaryOp,
        right: &Expr,
        lenient: bool,
    ) -> Result<Value, ExprError> {
        // Short-circuiting operators evaluate the right side lazily
        match op {
            BinaryOp::And => {
                let l = self.eval_mode(left, lenient)?;
                if !l.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                let r = self.eval_mode(right, lenient)?;
                return Ok(Value::Bool(r.is_truthy()));
            }
            BinaryOp::Or => {
                let l = self.eval_mode(left, lenient)?;
                if l.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                let r = self.eval_mode(right, lenient)?;
                return Ok(Value::Bool(r.is_truthy()));
            }
            BinaryOp::Coalesce => {
                let l = self.eval_lenient(left)?;
                if !l.is_null() {
                    return Ok(l);
                }
                return self.eval_mode(right, lenient);
            }
            _ => {}
        }

        let l = self.eval_mode(left, lenient)?;
        let r = self.eval_mode(right, lenient)?;
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                arithmetic(&l, op, &r)
            }
            BinaryOp::Concat => {
                let joined = format!("{}{}", l, r);
                self.budget.charge(joined.len() as u64)?;
                Ok(Value::String(joined))
            }
            BinaryOp::Eq => Ok(Value::Bool(l.loose_eq(&r))),
            BinaryOp::NotEq => Ok(Value::Bool(!l.loose_eq(&r))),
            BinaryOp::StrictEq => Ok(Value::Bool(l.strict_eq(&r))),
            BinaryOp::StrictNotEq => Ok(Value::Bool(!l.strict_eq(&r))),
            BinaryOp::Less => Ok(Value::Bool(l.compare(&r).map(|o| o.is_lt()).unwrap_or(false))),
            BinaryOp::LessOrEqual => {
                Ok(Value::Bool(l.compare(&r).map(|o| o.is_le()).unwrap_or(false)))
            }
            BinaryOp::Greater => Ok(Value::Bool(l.compare(&r).map(|o| o.is_gt()).unwrap_or(false))),
            BinaryOp::GreaterOrEqual => {
                Ok(Value::Bool(l.compare(&r).map(|o| o.is_ge()).unwrap_or(false)))
            }
            BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce => unreachable!(),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, ExprError> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    /// Dispatch a call into the helper allow-list
    fn call(&mut self, name: &str, args: &[Expr]) -> Result<Value, ExprError> {
        match name {
            "isset" => {
                if args.is_empty() {
                    return Err(ExprError::bad_arguments(name, "at least one argument"));
                }
                for arg in args {
                    if self.eval_lenient(arg)?.is_null() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            "empty" => {
                let [arg] = args else {
                    return Err(ExprError::bad_arguments(name, "exactly one argument"));
                };
                Ok(Value::Bool(!self.eval_lenient(arg)?.is_truthy()))
            }
            _ => {
                let values = self.eval_args(args)?;
                self.budget.charge(output_cost(name, &values))?;
                call_helper(name, &values, self.helpers)
            }
        }
    }
}

fn arithmetic(l: &Value, op: BinaryOp, r: &Value) -> Result<Value, ExprError> {
    let (Some(a), Some(b)) = (l.as_number(), r.as_number()) else {
        return Err(ExprError::type_mismatch(format!(
            "unsupported operands {} and {} for arithmetic",
            l.type_name(),
            r.type_name()
        )));
    };

    match (a, b) {
        (Number::Int(x), Number::Int(y)) => {
            let result = match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Sub => x.checked_sub(y),
                BinaryOp::Mul => x.checked_mul(y),
                BinaryOp::Div => {
                    if y == 0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    match x.checked_rem(y) {
                        Some(0) => x.checked_div(y),
                        Some(_) => return Ok(Value::Float(x as f64 / y as f64)),
                        None => None,
                    }
                }
                BinaryOp::Mod => {
                    if y == 0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    x.checked_rem(y)
                }
                _ => None,
            };
            // Integer overflow degrades to float arithmetic
            match result {
                Some(n) => Ok(Value::Int(n)),
                None => float_arithmetic(x as f64, op, y as f64),
            }
        }
        (a, b) => float_arithmetic(a.as_f64(), op, b.as_f64()),
    }
}

fn float_arithmetic(x: f64, op: BinaryOp, y: f64) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Add => Ok(Value::Float(x + y)),
        BinaryOp::Sub => Ok(Value::Float(x - y)),
        BinaryOp::Mul => Ok(Value::Float(x * y)),
        BinaryOp::Div if y == 0.0 => Err(ExprError::DivisionByZero),
        BinaryOp::Div => Ok(Value::Float(x / y)),
        BinaryOp::Mod if y as i64 == 0 => Err(ExprError::DivisionByZero),
        // i64::MIN % -1 is 0, which wrapping_rem yields without overflowing
        BinaryOp::Mod => Ok(Value::Int((x as i64).wrapping_rem(y as i64))),
        _ => Err(ExprError::Runtime(format!("{:?} is not arithmetic", op))),
    }
}

/// Steps charged up front for helpers whose output grows with their
/// arguments, so oversized results fail before anything is allocated
fn output_cost(name: &str, args: &[Value]) -> u64 {
    match (name, args) {
        ("str_repeat", [value, times]) => match times.as_number() {
            Some(times) => (value.to_string().len() as u64).saturating_mul(times.as_f64().max(0.0) as u64),
            None => 0,
        },
        ("range", [start, end]) => match (start.as_number(), end.as_number()) {
            (Some(start), Some(end)) => (end.as_f64() - start.as_f64()).abs() as u64,
            _ => 0,
        },
        _ => 0,
    }
}

fn expect_string<'v>(function: &str, value: &'v Value) -> Result<&'v str, ExprError> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(ExprError::bad_arguments(function, "a string")),
    }
}

fn expect_int(function: &str, value: &Value) -> Result<i64, ExprError> {
    match value.as_number() {
        Some(Number::Int(n)) => Ok(n),
        Some(Number::Float(f)) if f.fract() == 0.0 => Ok(f as i64),
        _ => Err(ExprError::bad_arguments(function, "an integer")),
    }
}

/// The helper allow-list. Names not listed here are errors.
fn call_helper(name: &str, args: &[Value], helpers: &dyn Helpers) -> Result<Value, ExprError> {
    match (name, args) {
        ("e" | "escape", [value]) => Ok(Value::String(escape_html(&value.to_string()))),
        ("json_encode", [value]) => Ok(Value::String(value.to_json_string())),
        ("auth_check", []) => Ok(Value::Bool(helpers.is_authenticated())),
        ("csrf_token", []) => Ok(Value::String(helpers.csrf_token())),
        ("has_section", [section]) => Ok(Value::Bool(helpers.has_section(&section.to_string()))),
        ("count", [value]) => match value {
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            Value::Map(entries) => Ok(Value::Int(entries.len() as i64)),
            _ => Err(ExprError::bad_arguments(name, "a list or map")),
        },
        ("strtoupper", [value]) => Ok(Value::String(expect_string(name, value)?.to_uppercase())),
        ("strtolower", [value]) => Ok(Value::String(expect_string(name, value)?.to_lowercase())),
        ("trim", [value]) => Ok(Value::String(expect_string(name, value)?.trim().to_string())),
        ("ucfirst", [value]) => {
            let s = expect_string(name, value)?;
            let mut chars = s.chars();
            Ok(Value::String(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }))
        }
        ("implode", [separator, Value::List(items)]) => Ok(Value::String(
            items
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(&separator.to_string()),
        )),
        ("in_array", [needle, Value::List(items)]) => {
            Ok(Value::Bool(items.iter().any(|item| item.loose_eq(needle))))
        }
        ("str_repeat", [value, times]) => {
            let times = expect_int(name, times)?;
            if times < 0 {
                return Err(ExprError::bad_arguments(name, "a non-negative count"));
            }
            Ok(Value::String(value.to_string().repeat(times as usize)))
        }
        ("number_format", [value]) => number_format(value, 0),
        ("number_format", [value, decimals]) => {
            let decimals = expect_int(name, decimals)?;
            number_format(value, decimals.clamp(0, 20) as usize)
        }
        ("range", [start, end]) => {
            let start = expect_int(name, start)?;
            let end = expect_int(name, end)?;
            let items: Vec<Value> = if start <= end {
                (start..=end).map(Value::Int).collect()
            } else {
                (end..=start).rev().map(Value::Int).collect()
            };
            Ok(Value::List(items))
        }
        (
            "e" | "escape" | "json_encode" | "auth_check" | "csrf_token" | "has_section" | "count"
            | "strtoupper" | "strtolower" | "trim" | "ucfirst" | "implode" | "in_array"
            | "str_repeat" | "number_format" | "range",
            _,
        ) => Err(ExprError::bad_arguments(name, "different arguments")),
        _ => Err(ExprError::UnknownFunction {
            name: name.to_string(),
        }),
    }
}

/// Format a number with a fixed number of decimals and `,` thousands
/// separators
fn number_format(value: &Value, decimals: usize) -> Result<Value, ExprError> {
    let Some(number) = value.as_number() else {
        return Err(ExprError::bad_arguments("number_format", "a number"));
    };
    let formatted = format!("{:.*}", decimals, number.as_f64().abs());
    let (whole, fraction) = match formatted.split_once('.') {
        Some((w, f)) => (w.to_string(), Some(f.to_string())),
        None => (formatted, None),
    };

    let mut grouped = String::new();
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if number.as_f64() < 0.0 && grouped.chars().any(|c| c != '0' && c != ',') {
        "-"
    } else {
        ""
    };
    Ok(Value::String(match fraction {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }))
}

/// Parse and evaluate `source` against a render context with no session
/// behind it
pub fn evaluate_detached(
    source: &str,
    context: &RenderContext,
    step_budget: u64,
) -> Result<Value, ExprError> {
    let expr = crate::expr::grammar::parse_expression(source)?;
    let scope = Scope::from(context);
    let mut budget = Budget::new(step_budget);
    Evaluator::new(&scope, &Detached, &mut budget).eval(&expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::grammar::parse_expression;

    struct TestHelpers;

    impl Helpers for TestHelpers {
        fn csrf_token(&self) -> String {
            "tok-123".to_string()
        }

        fn is_authenticated(&self) -> bool {
            true
        }

        fn has_section(&self, name: &str) -> bool {
            name == "title"
        }
    }

    fn eval_with(source: &str, ctx: &RenderContext) -> Result<Value, ExprError> {
        let expr = parse_expression(source).unwrap();
        let scope = Scope::from(ctx);
        let mut budget = Budget::new(10_000);
        Evaluator::new(&scope, &TestHelpers, &mut budget).eval(&expr)
    }

    fn eval(source: &str) -> Value {
        eval_with(source, &RenderContext::new()).unwrap()
    }

    #[test]
    fn test_arithmetic_keeps_int_and_float_apart() {
        assert_eq!(eval("1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval("7 / 2"), Value::Float(3.5));
        assert_eq!(eval("6 / 2"), Value::Int(3));
        assert_eq!(eval("1.5 + 1"), Value::Float(2.5));
        assert_eq!(eval("7 % 3"), Value::Int(1));
    }

    #[test]
    fn test_division_by_zero() {
        let err = eval_with("1 / 0", &RenderContext::new()).unwrap_err();
        assert_eq!(err, ExprError::DivisionByZero);
    }

    #[test]
    fn test_comparisons_and_logic() {
        let ctx = RenderContext::new().with("count", 3);
        assert_eq!(eval_with("$count > 0", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(eval_with("$count === '3'", &ctx).unwrap(), Value::Bool(false));
        assert_eq!(eval_with("$count == '3'", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(eval_with("!$count || false", &ctx).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_undefined_variable_is_an_error() {
        let err = eval_with("$missing", &RenderContext::new()).unwrap_err();
        assert_eq!(
            err,
            ExprError::UndefinedVariable {
                name: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_isset_empty_and_coalesce_tolerate_missing() {
        assert_eq!(eval("isset($missing)"), Value::Bool(false));
        assert_eq!(eval("empty($missing)"), Value::Bool(true));
        assert_eq!(eval("$missing ?? 'fallback'"), Value::from("fallback"));
        assert_eq!(eval("$missing->name ?? 'anon'"), Value::from("anon"));
    }

    #[test]
    fn test_member_and_index_access() {
        let user: serde_json::Value =
            serde_json::from_str(r#"{"name": "Ada", "roles": ["admin", "dev"]}"#).unwrap();
        let ctx = RenderContext::new().with("user", Value::from(user));
        assert_eq!(eval_with("$user->name", &ctx).unwrap(), Value::from("Ada"));
        assert_eq!(eval_with("$user.roles[1]", &ctx).unwrap(), Value::from("dev"));
        assert_eq!(eval_with("$user['missing']", &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn test_concat() {
        let ctx = RenderContext::new().with("name", "Ada");
        assert_eq!(
            eval_with("'Hello, ' . $name . '!'", &ctx).unwrap(),
            Value::from("Hello, Ada!")
        );
    }

    #[test]
    fn test_helpers() {
        assert_eq!(eval("csrf_token()"), Value::from("tok-123"));
        assert_eq!(eval("auth_check()"), Value::Bool(true));
        assert_eq!(eval("has_section('title')"), Value::Bool(true));
        assert_eq!(eval("count([1, 2, 3])"), Value::Int(3));
        assert_eq!(eval("e('<b>')"), Value::from("&lt;b&gt;"));
        assert_eq!(eval("json_encode(['a' => 1])"), Value::from(r#"{"a":1}"#));
        assert_eq!(eval("implode(', ', range(1, 3))"), Value::from("1, 2, 3"));
        assert_eq!(eval("number_format(1234567.891, 2)"), Value::from("1,234,567.89"));
        assert_eq!(eval("ucfirst('hello')"), Value::from("Hello"));
    }

    #[test]
    fn test_unknown_function_is_rejected() {
        let err = eval_with("system('ls')", &RenderContext::new()).unwrap_err();
        assert_eq!(
            err,
            ExprError::UnknownFunction {
                name: "system".to_string()
            }
        );
    }

    #[test]
    fn test_budget_is_enforced() {
        let expr = parse_expression("1 + 2 + 3 + 4").unwrap();
        let scope = Scope::new();
        let mut budget = Budget::new(3);
        let err = Evaluator::new(&scope, &Detached, &mut budget)
            .eval(&expr)
            .unwrap_err();
        assert_eq!(err, ExprError::BudgetExhausted { limit: 3 });
    }

    #[test]
    fn test_integer_edges_do_not_overflow() {
        assert_eq!(eval("(-9223372036854775807 - 1) % -1"), Value::Int(0));
        assert_eq!(eval("-100000000000000000000.0 % -1"), Value::Int(0));
        assert_eq!(
            eval("-(-9223372036854775807 - 1)"),
            Value::Float(9223372036854775808.0)
        );
        assert_eq!(eval("9223372036854775807 + 1"), Value::Float(9223372036854775808.0));
    }

    #[test]
    fn test_oversized_helper_output_exhausts_budget() {
        let err = eval_with("str_repeat('abc', 9223372036854775807)", &RenderContext::new())
            .unwrap_err();
        assert_eq!(err, ExprError::BudgetExhausted { limit: 10_000 });

        let err = eval_with("range(0, 9223372036854775807)", &RenderContext::new()).unwrap_err();
        assert_eq!(err, ExprError::BudgetExhausted { limit: 10_000 });

        assert_eq!(eval("str_repeat('ab', 3)"), Value::from("ababab"));
    }
}
