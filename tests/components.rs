//! Component tags through the full pipeline

use std::fs;

use insta::assert_snapshot;
use pretty_assertions::assert_eq;
use view_compiler::value::escape_html;
use view_compiler::{
    AttributeBag, ComponentRegistry, EngineConfig, RenderContext, ViewEngine, ViewError,
};

fn engine(registry: ComponentRegistry) -> ViewEngine {
    ViewEngine::new(EngineConfig::default()).with_registry(registry)
}

fn fixed(
    text: &'static str,
) -> impl Fn(&AttributeBag, &str) -> Result<String, ViewError> + Send + Sync + 'static {
    move |_, _| Ok(text.to_string())
}

#[test]
fn test_alert_component() {
    let mut registry = ComponentRegistry::new();
    registry.register_template("alert", r#"<div class="alert-{{type}}">{{slot}}</div>"#);
    let out = engine(registry)
        .render_source(r#"<x-alert type="success">Saved!</x-alert>"#, &RenderContext::new())
        .unwrap();
    assert_eq!(out, r#"<div class="alert-success">Saved!</div>"#);
}

#[test]
fn test_name_resolution_fallback() {
    let ctx = RenderContext::new();

    let mut registry = ComponentRegistry::new();
    registry.register_fn("foo-bar", fixed("dashed"));
    registry.register_fn("foo", fixed("prefix"));
    assert_eq!(engine(registry).render_source("<x-foo.bar />", &ctx).unwrap(), "dashed");

    let mut registry = ComponentRegistry::new();
    registry.register_fn("foo", fixed("prefix"));
    assert_eq!(engine(registry).render_source("<x-foo.bar />", &ctx).unwrap(), "prefix");

    let err = engine(ComponentRegistry::new())
        .render_source("<x-foo.bar />", &ctx)
        .unwrap_err();
    assert!(matches!(err, ViewError::ComponentNotFound { ref name } if name == "foo.bar"));
}

#[test]
fn test_namespaced_tag() {
    let mut registry = ComponentRegistry::new();
    registry.register_fn("button", |attrs: &AttributeBag, slot: &str| {
        Ok(format!("<button {}>{}</button>", attrs, slot))
    });
    let out = engine(registry)
        .render_source(r#"<x:button type="submit" disabled>Go</x:button>"#, &RenderContext::new())
        .unwrap();
    assert_snapshot!(out, @r#"<button type="submit" disabled>Go</button>"#);
}

#[test]
fn test_bound_attribute_coercion() {
    let mut registry = ComponentRegistry::new();
    registry.register_fn("probe", |attrs: &AttributeBag, _: &str| {
        let types: Vec<String> = attrs
            .iter()
            .map(|(name, value)| format!("{}:{}", name, value.type_name()))
            .collect();
        Ok(format!("{} | {}", types.join(" "), attrs))
    });
    let out = engine(registry)
        .render_source(
            r#"<x-probe :on="true" :ratio="3.5" :n="3" :gone="null" plain="3" :list="[1, 2]" />"#,
            &RenderContext::new(),
        )
        .unwrap();
    assert_eq!(
        out,
        r#"on:bool ratio:float n:int gone:null plain:string list:list | on ratio="3.5" n="3" plain="3" list="[1,2]""#
    );
}

#[test]
fn test_nested_same_component() {
    let mut registry = ComponentRegistry::new();
    registry.register_template("box", "<div>{{ slot }}</div>");
    let out = engine(registry)
        .render_source("<x-box><x-box>inner</x-box></x-box>", &RenderContext::new())
        .unwrap();
    assert_eq!(out, "<div><div>inner</div></div>");
}

#[test]
fn test_component_with_directives_in_slot() {
    let mut registry = ComponentRegistry::new();
    registry.register_template("list", "<ul>{{ slot }}</ul>");
    let ctx = RenderContext::new().with("xs", vec!["a", "b"]);
    let out = engine(registry)
        .render_source("<x-list>@foreach($xs as $x)<li>{{ $x }}</li>@endforeach</x-list>", &ctx)
        .unwrap();
    assert_eq!(out, "<ul><li>a</li><li>b</li></ul>");
}

#[test]
fn test_loop_variable_bound_at_render_time() {
    let mut registry = ComponentRegistry::new();
    registry.register_template("badge", "<b>{{ label }}</b>");
    let ctx = RenderContext::new().with("items", vec!["a", "{{ $secret }}"]);
    let out = engine(registry)
        .render_source(
            r#"@foreach($items as $item)<x-badge :label="$item" />@endforeach"#,
            &ctx,
        )
        .unwrap();
    assert_eq!(out, "<b>a</b><b>{{ $secret }}</b>");
}

#[test]
fn test_prop_from_context() {
    let mut registry = ComponentRegistry::new();
    registry.register_template("hello", "Hello {{ who }}");
    let ctx = RenderContext::new().with("user", "Ann");
    let out = engine(registry)
        .render_source(r#"<x-hello @prop(who)="$user" />"#, &ctx)
        .unwrap();
    assert_eq!(out, "Hello Ann");
}

#[test]
fn test_malformed_prop() {
    let mut registry = ComponentRegistry::new();
    registry.register_template("hello", "hi");
    let err = engine(registry)
        .render_source(r#"<x-hello @prop(who="x" />"#, &RenderContext::new())
        .unwrap_err();
    assert!(matches!(err, ViewError::MalformedProp { .. }), "{err}");
}

#[test]
fn test_self_rendering_component_hits_limit() {
    let mut registry = ComponentRegistry::new();
    registry.register_template("loop", "<x-loop />");
    let engine = ViewEngine::new(EngineConfig::new().with_max_component_depth(5)).with_registry(registry);
    let err = engine
        .render_source("<x-loop />", &RenderContext::new())
        .unwrap_err();
    assert!(matches!(err, ViewError::ComponentRecursionLimit { limit: 5, .. }), "{err}");
}

#[test]
fn test_unclosed_component() {
    let mut registry = ComponentRegistry::new();
    registry.register_template("box", "<div>{{ slot }}</div>");
    let err = engine(registry)
        .render_source("<x-box>never closed", &RenderContext::new())
        .unwrap_err();
    assert!(matches!(err, ViewError::UnclosedComponent { ref name, offset: 0 } if name == "box"));
}

#[test]
fn test_components_loaded_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    let components = dir.path().join("components");
    fs::create_dir_all(components.join("forms")).unwrap();
    fs::write(components.join("forms/input.html"), r#"<input name="{{ name }}">"#).unwrap();
    fs::write(dir.path().join("page.html"), r#"<x-forms.input name="email" />"#).unwrap();

    let config = EngineConfig::new()
        .with_view_path(dir.path())
        .with_component_path(&components);
    let engine = ViewEngine::from_config(config).unwrap();
    assert!(engine.registry().contains("forms.input"));
    let out = engine.render("page", &RenderContext::new()).unwrap();
    assert_eq!(out, r#"<input name="email">"#);
}

#[test]
fn test_closure_output_with_runtime_data_is_not_compiled() {
    let mut registry = ComponentRegistry::new();
    registry.register_fn("greet", |attrs: &AttributeBag, _: &str| {
        let name = attrs.get("name").map(|v| v.to_string()).unwrap_or_default();
        Ok(format!("<p>Hi {}</p>", escape_html(&name)))
    });
    let ctx = RenderContext::new()
        .with("user", "{{ $secret }} @csrf <x-greet />")
        .with("secret", "TOPSECRET");
    let out = engine(registry)
        .render_source(r#"<x-greet :name="$user" />"#, &ctx)
        .unwrap();
    assert_eq!(out, "<p>Hi {{ $secret }} @csrf &lt;x-greet /&gt;</p>");
}

#[test]
fn test_closure_slot_is_still_compiled() {
    let mut registry = ComponentRegistry::new();
    registry.register_fn("panel", |_: &AttributeBag, slot: &str| {
        Ok(format!("<section>{}</section>", slot))
    });
    let ctx = RenderContext::new().with("xs", vec!["a", "b"]);
    let out = engine(registry)
        .render_source("<x-panel>@foreach($xs as $x){{ $x }}@endforeach</x-panel>", &ctx)
        .unwrap();
    assert_eq!(out, "<section>ab</section>");
}
