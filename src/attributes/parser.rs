//! Attribute-list parsing with literal coercion and binding prefixes

use crate::attributes::AttributeBag;
use crate::context::RenderContext;
use crate::error::{ExprError, ViewError};
use crate::expr::evaluate_detached;
use crate::value::{parse_numeric, Value};

/// Default step budget for `$expression` attribute values
const ATTRIBUTE_STEP_BUDGET: u64 = 10_000;

/// One `name[=value]` pair as written in the tag
#[derive(Debug, Clone, PartialEq)]
struct RawAttribute<'a> {
    name: &'a str,
    value: Option<&'a str>,
}

/// Parses the attribute list of a component tag
///
/// Bound attributes (`:name` or `bind:name`) are coerced: `null`, `true`
/// and `false` literals, then numbers, then JSON objects and arrays, and
/// `$expressions` are evaluated against the render context, keeping their
/// source on the bag. Everything
/// else stays a string.
#[derive(Debug, Clone)]
pub struct AttributeParser<'a> {
    context: &'a RenderContext,
    step_budget: u64,
}

impl<'a> AttributeParser<'a> {
    pub fn new(context: &'a RenderContext) -> Self {
        Self {
            context,
            step_budget: ATTRIBUTE_STEP_BUDGET,
        }
    }

    pub fn with_step_budget(mut self, step_budget: u64) -> Self {
        self.step_budget = step_budget;
        self
    }

    /// Parse the raw text between a tag name and its closing `>` or `/>`
    pub fn parse(&self, raw: &str) -> Result<AttributeBag, ViewError> {
        let mut bag = AttributeBag::new();

        for attr in scan(raw) {
            if let Some(rest) = attr.name.strip_prefix("@prop") {
                let name = prop_name(rest).ok_or_else(|| ViewError::MalformedProp {
                    attribute: attr.name.to_string(),
                })?;
                match attr.value {
                    Some(value) => self.bind(&mut bag, name, value, true)?,
                    None => bag.insert_prop(name, true),
                }
                continue;
            }

            let bound = attr
                .name
                .strip_prefix("bind:")
                .or_else(|| attr.name.strip_prefix(':'));
            match (bound, attr.value) {
                (Some(name), Some(value)) if !name.is_empty() => {
                    self.bind(&mut bag, name, value, false)?
                }
                (Some(name), None) if !name.is_empty() => bag.insert(name, true),
                (None, Some(value)) => bag.insert(attr.name, value),
                (None, None) => bag.insert(attr.name, true),
                // A lone `:` or `bind:` carries no name
                (Some(_), _) => {}
            }
        }

        Ok(bag)
    }

    fn bind(
        &self,
        bag: &mut AttributeBag,
        name: &str,
        value: &str,
        prop: bool,
    ) -> Result<(), ViewError> {
        let stripped = value.trim();
        let resolved = if stripped.starts_with('$') {
            bag.bind_expression(name, stripped);
            match evaluate_detached(stripped, self.context, self.step_budget) {
                Ok(v) => v,
                Err(ExprError::UndefinedVariable { .. }) => {
                    // Not known yet, e.g. a loop variable
                    log::trace!("attribute {} = {} resolves at render time", name, stripped);
                    Value::Null
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            coerce_bound(value)
        };

        if prop {
            bag.insert_prop(name, resolved);
        } else {
            bag.insert(name, resolved);
        }
        Ok(())
    }
}

/// Parse an attribute list against a render context
pub fn parse_attributes(raw: &str, context: &RenderContext) -> Result<AttributeBag, ViewError> {
    AttributeParser::new(context).parse(raw)
}

/// Coerce the value of a bound attribute
pub fn coerce_bound(value: &str) -> Value {
    let stripped = value.trim();
    if stripped.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if stripped.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if stripped.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Some(number) = parse_numeric(stripped) {
        return number.into();
    }
    if stripped.starts_with('{') || stripped.starts_with('[') {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(stripped) {
            return Value::from(json);
        }
    }
    Value::String(value.to_string())
}

/// Name of a `@prop(name)` or `@prop:name` attribute, given the text after
/// `@prop`
fn prop_name(rest: &str) -> Option<&str> {
    let name = if let Some(inner) = rest.strip_prefix('(') {
        inner.strip_suffix(')')?
    } else {
        rest.strip_prefix(':')?
    };
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(name)
}

/// Split an attribute list into name/value pairs
fn scan(raw: &str) -> Vec<RawAttribute<'_>> {
    let mut attrs = Vec::new();
    let mut rest = raw;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        let name_len = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '>')
            .unwrap_or(rest.len());
        let name = rest[..name_len].trim_end_matches('/');
        rest = &rest[name_len..];

        if name.is_empty() {
            // Stray `=`, `>` or quote; skip one character
            let skip = rest.chars().next().map(char::len_utf8).unwrap_or(0);
            rest = &rest[skip..];
            continue;
        }

        let after_ws = rest.trim_start();
        let value = match after_ws.strip_prefix('=') {
            Some(after_eq) => {
                let after_eq = after_eq.trim_start();
                let (value, consumed) = take_value(after_eq);
                rest = &after_eq[consumed..];
                Some(value)
            }
            None => None,
        };

        attrs.push(RawAttribute { name, value });
    }

    attrs
}

/// Read a quoted or bare value, returning it and the bytes consumed
fn take_value(input: &str) -> (&str, usize) {
    match input.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let body = &input[1..];
            match body.find(quote) {
                Some(end) => (&body[..end], end + 2),
                None => (body, input.len()),
            }
        }
        _ => {
            let end = input
                .find(|c: char| c.is_whitespace() || c == '>')
                .unwrap_or(input.len());
            (&input[..end], end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> AttributeBag {
        parse_attributes(raw, &RenderContext::new()).unwrap()
    }

    #[test]
    fn test_bound_literals_are_coerced() {
        let bag = parse(r#":on="true" :ratio="3.5" :count="3" :missing="null" :off="FALSE""#);
        assert_eq!(bag.get("on"), Some(&Value::Bool(true)));
        assert_eq!(bag.get("ratio"), Some(&Value::Float(3.5)));
        assert_eq!(bag.get("count"), Some(&Value::Int(3)));
        assert_eq!(bag.get("missing"), Some(&Value::Null));
        assert_eq!(bag.get("off"), Some(&Value::Bool(false)));
        assert_eq!(bag.render(), r#"on ratio="3.5" count="3""#);
    }

    #[test]
    fn test_unbound_values_stay_strings() {
        let bag = parse(r#"count="3" flag="true""#);
        assert_eq!(bag.get("count"), Some(&Value::from("3")));
        assert_eq!(bag.get("flag"), Some(&Value::from("true")));
    }

    #[test]
    fn test_bare_name_is_true() {
        let bag = parse("disabled required");
        assert_eq!(bag.get("disabled"), Some(&Value::Bool(true)));
        assert_eq!(bag.render(), "disabled required");
    }

    #[test]
    fn test_bind_prefix_and_json() {
        let bag = parse(r#"bind:items='[1, 2]' :opts='{"a": 1}' :broken="{nope""#);
        assert_eq!(
            bag.get("items"),
            Some(&Value::List(vec![Value::Int(1), Value::Int(2)]))
        );
        assert!(matches!(bag.get("opts"), Some(Value::Map(_))));
        assert_eq!(bag.get("broken"), Some(&Value::from("{nope")));
    }

    #[test]
    fn test_quotes_and_bare_values() {
        let bag = parse(r#"a='single "q"' b=bare c = "spaced""#);
        assert_eq!(bag.get("a"), Some(&Value::from(r#"single "q""#)));
        assert_eq!(bag.get("b"), Some(&Value::from("bare")));
        assert_eq!(bag.get("c"), Some(&Value::from("spaced")));
    }

    #[test]
    fn test_variable_is_resolved_from_context() {
        let ctx = RenderContext::new().with("title", "Hello");
        let bag = parse_attributes(r#":heading="$title" @prop(size)="$title""#, &ctx).unwrap();
        assert_eq!(bag.get("heading"), Some(&Value::from("Hello")));
        assert_eq!(bag.prop("size"), Some(&Value::from("Hello")));
    }

    #[test]
    fn test_unknown_variable_keeps_its_expression() {
        let bag = parse(r#":user="$user->name""#);
        assert_eq!(bag.get("user"), Some(&Value::Null));
        assert_eq!(bag.expression("user"), Some("$user->name"));
    }

    #[test]
    fn test_props_are_routed_separately() {
        let bag = parse(r#"@prop(level)="2" @prop:tone="warm" id="x""#);
        assert_eq!(bag.prop("level"), Some(&Value::Int(2)));
        assert_eq!(bag.prop("tone"), Some(&Value::from("warm")));
        assert!(!bag.has("level"));
        assert_eq!(bag.render(), r#"id="x""#);
    }

    #[test]
    fn test_malformed_prop_is_rejected() {
        for raw in [r#"@prop="x""#, r#"@prop()="x""#, r#"@prop(a="x""#, r#"@propx="1""#] {
            let err = parse_attributes(raw, &RenderContext::new()).unwrap_err();
            assert!(
                matches!(err, ViewError::MalformedProp { .. }),
                "{raw} gave {err:?}"
            );
        }
    }
}
