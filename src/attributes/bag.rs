//! Ordered attribute collection handed to components

use std::fmt;

use indexmap::IndexMap;

use crate::value::{escape_html, Value};

/// Reserved key the slot body is stored under; never rendered as an
/// attribute
pub const SLOT_KEY: &str = "slot";

/// Attributes of one component tag, in source order
///
/// `true` renders as a bare attribute name, `false` and `null` are left out
/// entirely, everything else renders as `name="escaped value"`. Values
/// passed through `@prop` live in a separate map and are never rendered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeBag {
    attrs: IndexMap<String, Value>,
    props: IndexMap<String, Value>,
    /// Source of attributes bound to a `$expression`
    expressions: IndexMap<String, String>,
}

impl AttributeBag {
    /// Create an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute, builder style
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set an attribute; a repeated name overwrites in place
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attrs.insert(name.into(), value.into());
    }

    /// Set a typed prop
    pub fn insert_prop(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.props.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    pub fn props(&self) -> &IndexMap<String, Value> {
        &self.props
    }

    /// Attribute or prop by name; attributes win
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name).or_else(|| self.props.get(name))
    }

    /// Record that `name` is bound to `expression`, so template components
    /// can evaluate it at render time instead of pasting its value
    pub fn bind_expression(&mut self, name: impl Into<String>, expression: impl Into<String>) {
        self.expressions.insert(name.into(), expression.into());
    }

    /// Source expression of a `$`-bound attribute or prop
    pub fn expression(&self, name: &str) -> Option<&str> {
        self.expressions.get(name).map(String::as_str)
    }

    /// Store the slot body under the reserved key
    pub fn set_slot(&mut self, slot: impl Into<String>) {
        self.attrs
            .insert(SLOT_KEY.to_string(), Value::String(slot.into()));
    }

    /// The slot body, empty for self-closing tags
    pub fn slot(&self) -> &str {
        match self.attrs.get(SLOT_KEY) {
            Some(Value::String(s)) => s,
            _ => "",
        }
    }

    /// Visible attributes, without the slot
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attrs
            .iter()
            .filter(|(k, _)| k.as_str() != SLOT_KEY)
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Combine with component defaults
    ///
    /// `class` values are joined, defaults first; for every other name the
    /// value on the tag wins and defaults only fill gaps.
    pub fn merge<I, K, V>(&self, defaults: I) -> AttributeBag
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut attrs: IndexMap<String, Value> = defaults
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        for (name, value) in &self.attrs {
            match attrs.get_mut(name) {
                Some(existing) if name == "class" => {
                    *existing = Value::String(join_words(&existing.to_string(), &value.to_string()));
                }
                _ => {
                    attrs.insert(name.clone(), value.clone());
                }
            }
        }
        AttributeBag {
            attrs,
            props: self.props.clone(),
            expressions: self.expressions.clone(),
        }
    }

    /// Add `value` after the current value of `name`, space separated
    pub fn append(&mut self, name: &str, value: impl fmt::Display) {
        let current = self.attrs.get(name).map(Value::to_string).unwrap_or_default();
        let joined = join_words(&current, &value.to_string());
        self.attrs.insert(name.to_string(), Value::String(joined));
    }

    /// Add `value` before the current value of `name`, space separated
    pub fn prepend(&mut self, name: &str, value: impl fmt::Display) {
        let current = self.attrs.get(name).map(Value::to_string).unwrap_or_default();
        let joined = join_words(&value.to_string(), &current);
        self.attrs.insert(name.to_string(), Value::String(joined));
    }

    /// A bag holding only the listed attributes
    pub fn only(&self, names: &[&str]) -> AttributeBag {
        self.filtered(|name| names.contains(&name))
    }

    /// A bag without the listed attributes
    pub fn except(&self, names: &[&str]) -> AttributeBag {
        self.filtered(|name| !names.contains(&name))
    }

    fn filtered(&self, keep: impl Fn(&str) -> bool) -> AttributeBag {
        AttributeBag {
            attrs: self
                .attrs
                .iter()
                .filter(|(k, _)| k.as_str() == SLOT_KEY || keep(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            props: self.props.clone(),
            expressions: self.expressions.clone(),
        }
    }

    /// Render as an HTML attribute list, without leading whitespace
    pub fn render(&self) -> String {
        self.to_string()
    }
}

fn join_words(first: &str, second: &str) -> String {
    match (first.trim().is_empty(), second.trim().is_empty()) {
        (true, _) => second.trim().to_string(),
        (false, true) => first.trim().to_string(),
        (false, false) => format!("{} {}", first.trim(), second.trim()),
    }
}

/// Escape a runtime value so the rendered attribute cannot be read back as
/// interpolation or directive syntax
fn escape_inert(value: &str) -> String {
    escape_html(value)
        .replace('{', "&#123;")
        .replace('}', "&#125;")
        .replace('@', "&#64;")
}

impl fmt::Display for AttributeBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            let rendered = match value {
                Value::Null | Value::Bool(false) => continue,
                Value::Bool(true) => name.to_string(),
                other if self.expressions.contains_key(name) => {
                    format!("{}=\"{}\"", name, escape_inert(&other.to_string()))
                }
                other => format!("{}=\"{}\"", name, escape_html(&other.to_string())),
            };
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(&rendered)?;
            first = false;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for AttributeBag {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut bag = AttributeBag::new();
        for (k, v) in iter {
            bag.insert(k, v);
        }
        bag
    }
}
