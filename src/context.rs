//! Render context: the key/value data bag a render call is given

use indexmap::IndexMap;

use crate::value::Value;

/// Variables visible to a template, keyed by name without the `$` sigil
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderContext {
    vars: IndexMap<String, Value>,
}

impl RenderContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable, builder style
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Union of this context with `overrides`; keys in `overrides` win
    pub fn merged(&self, overrides: &RenderContext) -> RenderContext {
        let mut vars = self.vars.clone();
        for (k, v) in &overrides.vars {
            vars.insert(k.clone(), v.clone());
        }
        RenderContext { vars }
    }

    /// Take the underlying map
    pub fn into_vars(self) -> IndexMap<String, Value> {
        self.vars
    }

    /// Build a context from a JSON object; any other JSON value yields
    /// `None`
    pub fn from_json(json: serde_json::Value) -> Option<Self> {
        match Value::from(json) {
            Value::Map(vars) => Some(Self { vars }),
            _ => None,
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for RenderContext {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut ctx = RenderContext::new();
        for (k, v) in iter {
            ctx.insert(k, v);
        }
        ctx
    }
}
