//! Component registry: maps tag aliases to renderable components

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::attributes::AttributeBag;
use crate::error::ViewError;
use crate::scan;
use crate::value::escape_html;

/// A component that can be expanded from an `<x-name>` tag
pub trait Renderable: Send + Sync {
    fn render(&self, attributes: &AttributeBag, slot: &str) -> Result<String, ViewError>;

    /// Whether the rendered text is template source to compile again, with
    /// its own component tags, directives and interpolations. When `false`
    /// the text is final HTML and only the slot inside it is compiled.
    fn output_is_source(&self) -> bool {
        true
    }
}

/// A component defined by template text
///
/// Inside the text, `{{ name }}` or `{{ $name }}` refer to the tag's
/// attributes and props (escaped), `{!! name !!}` inserts them raw,
/// `{{ slot }}` inserts the slot body and `{{ attributes }}` the rendered
/// attribute list. Placeholders naming nothing on the tag are kept for the
/// evaluation phase.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateComponent {
    source: String,
}

impl TemplateComponent {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Load a component from a file
    pub fn from_file(path: &Path) -> Result<Self, ViewError> {
        let source = std::fs::read_to_string(path).map_err(|e| ViewError::io(path, e))?;
        Ok(Self::new(source))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Replace one placeholder body, or return `None` to keep it
    fn substitute(&self, inner: &str, raw: bool, attributes: &AttributeBag, slot: &str) -> Option<String> {
        let name = inner.trim();
        let name = name.strip_prefix('$').unwrap_or(name);
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return None;
        }

        match name {
            "slot" => return Some(slot.to_string()),
            "attributes" => return Some(attributes.render()),
            _ => {}
        }

        // Bound expressions are evaluated at render time so runtime data is
        // never read back as template syntax
        if let Some(expression) = attributes.expression(name) {
            return Some(if raw {
                format!("{{!! {} !!}}", expression)
            } else {
                format!("{{{{ {} }}}}", expression)
            });
        }

        attributes.lookup(name).map(|value| {
            if raw {
                value.to_string()
            } else {
                escape_html(&value.to_string())
            }
        })
    }
}

impl Renderable for TemplateComponent {
    fn render(&self, attributes: &AttributeBag, slot: &str) -> Result<String, ViewError> {
        let escaped = scan::escape_markers(&self.source);
        let source = escaped.as_str();
        let mut out = String::with_capacity(source.len() + slot.len());
        let mut i = 0;

        while i < source.len() {
            let rest = &source[i..];
            let (open, close, raw) = if rest.starts_with("{!!") {
                ("{!!", "!!}", true)
            } else if rest.starts_with("{{") && !rest.starts_with("{{--") {
                ("{{", "}}", false)
            } else {
                let step = rest.chars().next().map(char::len_utf8).unwrap_or(1);
                out.push_str(&rest[..step]);
                i += step;
                continue;
            };

            let Some(end) = rest[open.len()..].find(close) else {
                out.push_str(rest);
                break;
            };
            let inner = &rest[open.len()..open.len() + end];
            let whole = open.len() + end + close.len();
            match self.substitute(inner, raw, attributes, slot) {
                Some(replacement) => out.push_str(&replacement),
                None => out.push_str(&rest[..whole]),
            }
            i += whole;
        }

        Ok(out)
    }
}

/// A component backed by a closure
///
/// Closures see runtime data through the attribute bag, so what they return
/// is emitted as it is; only the slot inside it is compiled.
pub struct FnComponent<F> {
    render: F,
}

impl<F> FnComponent<F>
where
    F: Fn(&AttributeBag, &str) -> Result<String, ViewError> + Send + Sync,
{
    pub fn new(render: F) -> Self {
        Self { render }
    }
}

impl<F> Renderable for FnComponent<F>
where
    F: Fn(&AttributeBag, &str) -> Result<String, ViewError> + Send + Sync,
{
    fn render(&self, attributes: &AttributeBag, slot: &str) -> Result<String, ViewError> {
        (self.render)(attributes, slot)
    }

    fn output_is_source(&self) -> bool {
        false
    }
}

/// Registry of components by alias
///
/// Read-only once rendering starts; shared between concurrent renders
/// behind an `Arc`.
#[derive(Default, Clone)]
pub struct ComponentRegistry {
    components: HashMap<String, Arc<dyn Renderable>>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut aliases: Vec<&String> = self.components.keys().collect();
        aliases.sort();
        f.debug_struct("ComponentRegistry")
            .field("aliases", &aliases)
            .finish()
    }
}

impl ComponentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component; an existing alias is overwritten
    pub fn register(&mut self, alias: impl Into<String>, component: impl Renderable + 'static) {
        self.components.insert(alias.into(), Arc::new(component));
    }

    /// Register a template component from source text
    pub fn register_template(&mut self, alias: impl Into<String>, source: impl Into<String>) {
        self.register(alias, TemplateComponent::new(source));
    }

    /// Register a closure as a component
    pub fn register_fn<F>(&mut self, alias: impl Into<String>, render: F)
    where
        F: Fn(&AttributeBag, &str) -> Result<String, ViewError> + Send + Sync + 'static,
    {
        self.register(alias, FnComponent::new(render));
    }

    /// Check if an alias is registered exactly
    pub fn contains(&self, alias: &str) -> bool {
        self.components.contains_key(alias)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Resolve a tag name to a component
    ///
    /// Tries the name as written, then with dots and colons turned into
    /// dashes, lowercased, and both; a dotted name finally falls back to its
    /// part before the first dot.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Renderable>> {
        self.resolve_alias(name)
            .and_then(|alias| self.components.get(&alias).cloned())
    }

    /// The registered alias a tag name resolves to
    pub fn resolve_alias(&self, name: &str) -> Option<String> {
        let lower = name.to_lowercase();
        let candidates = [
            name.to_string(),
            name.replace('.', "-"),
            name.replace(':', "-"),
            lower.clone(),
            lower.replace(['.', ':'], "-"),
        ];
        if let Some(found) = candidates.into_iter().find(|c| self.components.contains_key(c)) {
            return Some(found);
        }

        match name.split_once('.') {
            Some((prefix, _)) if !prefix.is_empty() => self.resolve_alias(prefix),
            _ => None,
        }
    }

    /// Register every file with `extension` under `dir` as a template
    /// component; `dir/forms/input.html` becomes `forms.input`
    pub fn load_dir(&mut self, dir: &Path, extension: &str) -> Result<usize, ViewError> {
        let mut files = Vec::new();
        collect_files(dir, extension, &mut files)?;
        files.sort();

        for path in &files {
            let Some(alias) = alias_for(dir, path) else {
                continue;
            };
            log::debug!("registering component {} from {}", alias, path.display());
            self.register(alias, TemplateComponent::from_file(path)?);
        }
        Ok(files.len())
    }
}

fn collect_files(dir: &Path, extension: &str, files: &mut Vec<PathBuf>) -> Result<(), ViewError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ViewError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| ViewError::io(dir, e))?.path();
        if path.is_dir() {
            collect_files(&path, extension, files)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(path);
        }
    }
    Ok(())
}

/// Dotted alias of a component file relative to its root
fn alias_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?.with_extension("");
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    (!parts.is_empty()).then(|| parts.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn registry_with(aliases: &[&str]) -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        for alias in aliases {
            registry.register_template(*alias, *alias);
        }
        registry
    }

    #[test]
    fn test_resolve_exact_first() {
        let registry = registry_with(&["foo.bar", "foo-bar"]);
        assert_eq!(registry.resolve_alias("foo.bar").as_deref(), Some("foo.bar"));
    }

    #[test]
    fn test_resolve_dotted_name_falls_back() {
        let registry = registry_with(&["foo-bar", "foo"]);
        assert_eq!(registry.resolve_alias("foo.bar").as_deref(), Some("foo-bar"));

        let registry = registry_with(&["foo"]);
        assert_eq!(registry.resolve_alias("foo.bar").as_deref(), Some("foo"));

        let registry = registry_with(&["other"]);
        assert_eq!(registry.resolve_alias("foo.bar"), None);
    }

    #[test]
    fn test_resolve_colon_and_case_variants() {
        let registry = registry_with(&["forms-input", "alert"]);
        assert_eq!(registry.resolve_alias("forms:input").as_deref(), Some("forms-input"));
        assert_eq!(registry.resolve_alias("Alert").as_deref(), Some("alert"));
        assert_eq!(registry.resolve_alias("Forms.Input").as_deref(), Some("forms-input"));
    }

    #[test]
    fn test_register_overwrites() {
        let mut registry = registry_with(&["alert"]);
        registry.register_template("alert", "second");
        let component = registry.resolve("alert").unwrap();
        assert_eq!(component.render(&AttributeBag::new(), "").unwrap(), "second");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_template_component_substitution() {
        let component = TemplateComponent::new(r#"<div class="alert-{{type}}">{{slot}}</div>"#);
        let bag = AttributeBag::new().with("type", "success");
        assert_eq!(
            component.render(&bag, "Saved!").unwrap(),
            r#"<div class="alert-success">Saved!</div>"#
        );
    }

    #[test]
    fn test_template_component_escapes_and_keeps_unknown() {
        let component = TemplateComponent::new("{{ $label }}|{!! label !!}|{{ $user->name }}|{{-- note --}}");
        let bag = AttributeBag::new().with("label", "<b>");
        assert_eq!(
            component.render(&bag, "").unwrap(),
            "&lt;b&gt;|<b>|{{ $user->name }}|{{-- note --}}"
        );
    }

    #[test]
    fn test_template_component_defers_bound_expressions() {
        let component = TemplateComponent::new("<li>{{ name }}</li>");
        let mut bag = AttributeBag::new().with("name", Value::Null);
        bag.bind_expression("name", "$user->name");
        assert_eq!(component.render(&bag, "").unwrap(), "<li>{{ $user->name }}</li>");
    }

    #[test]
    fn test_template_component_renders_attribute_bag() {
        let component = TemplateComponent::new("<button {{ attributes }}>{{ slot }}</button>");
        let bag = AttributeBag::new().with("type", "submit").with("disabled", true);
        assert_eq!(
            component.render(&bag, "Go").unwrap(),
            r#"<button type="submit" disabled>Go</button>"#
        );
    }

    #[test]
    fn test_fn_component() {
        let mut registry = ComponentRegistry::new();
        registry.register_fn("badge", |attrs, slot| {
            Ok(format!("<span>{}:{}</span>", attrs.get("n").map(|v| v.to_string()).unwrap_or_default(), slot))
        });
        let component = registry.resolve("badge").unwrap();
        let bag = AttributeBag::new().with("n", 2);
        assert_eq!(component.render(&bag, "x").unwrap(), "<span>2:x</span>");
        assert!(!component.output_is_source());
        assert!(TemplateComponent::new("t").output_is_source());
    }

    #[test]
    fn test_load_dir_registers_dotted_aliases() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("forms")).unwrap();
        std::fs::write(dir.path().join("alert.html"), "<div>{{ slot }}</div>").unwrap();
        std::fs::write(dir.path().join("forms/input.html"), "<input {{ attributes }}>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut registry = ComponentRegistry::new();
        let count = registry.load_dir(dir.path(), "html").unwrap();
        assert_eq!(count, 2);
        assert!(registry.contains("alert"));
        assert!(registry.contains("forms.input"));
        assert!(!registry.contains("notes"));
    }
}
