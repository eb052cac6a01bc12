//! `{@include}` resolution and its sandbox

use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use view_compiler::{EngineConfig, RenderContext, ViewEngine, ViewError};

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn test_include_with_parameters() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "partials/card.html", "<div>{{ $title }} by {{ $author }}</div>");
    write(
        dir.path(),
        "page.html",
        r#"<main>{@include "partials.card" title="Hello" author=$user}</main>"#,
    );
    let engine = ViewEngine::new(EngineConfig::new().with_view_path(dir.path()));
    let ctx = RenderContext::new().with("user", "Ann");
    assert_eq!(
        engine.render("page", &ctx).unwrap(),
        "<main><div>Hello by Ann</div></main>"
    );
}

#[test]
fn test_include_pushes_reach_page_stack() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "partials/widget.html", "w @push('scripts')<script>w</script>@endpush");
    write(
        dir.path(),
        "page.html",
        r#"[@stack('scripts')]{@include "partials.widget"}"#,
    );
    let engine = ViewEngine::new(EngineConfig::new().with_view_path(dir.path()));
    assert_eq!(
        engine.render("page", &RenderContext::new()).unwrap(),
        "[<script>w</script>]w "
    );
}

#[test]
fn test_parent_directory_include_is_unsafe() {
    let dir = tempfile::tempdir().unwrap();
    let views = dir.path().join("views");
    write(dir.path(), "secret.html", "top secret");
    write(&views, "page.html", r#"{@include "../secret"}"#);
    let engine = ViewEngine::new(EngineConfig::new().with_view_path(&views));
    let err = engine.render("page", &RenderContext::new()).unwrap_err();
    assert!(matches!(err, ViewError::UnsafeIncludePath { .. }), "{err}");
}

#[test]
fn test_include_outside_allow_list_is_unsafe() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "partials/ok.html", "ok");
    write(dir.path(), "private/key.html", "key");
    write(dir.path(), "page.html", r#"{@include "private.key"}"#);
    write(dir.path(), "fine.html", r#"{@include "partials.ok"}"#);
    let engine = ViewEngine::new(
        EngineConfig::new()
            .with_view_path(dir.path())
            .with_include_root(dir.path().join("partials")),
    );
    let err = engine.render("page", &RenderContext::new()).unwrap_err();
    assert!(matches!(err, ViewError::UnsafeIncludePath { .. }), "{err}");
    assert_eq!(engine.render("fine", &RenderContext::new()).unwrap(), "ok");
}

#[cfg(unix)]
#[test]
fn test_symlink_out_of_root_is_unsafe() {
    let outside = tempfile::tempdir().unwrap();
    write(outside.path(), "evil.html", "evil");
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "page.html", r#"{@include "evil"}"#);
    std::os::unix::fs::symlink(outside.path().join("evil.html"), dir.path().join("evil.html")).unwrap();
    let engine = ViewEngine::new(EngineConfig::new().with_view_path(dir.path()));
    let err = engine.render("page", &RenderContext::new()).unwrap_err();
    assert!(matches!(err, ViewError::UnsafeIncludePath { .. }), "{err}");
}

#[test]
fn test_include_output_is_not_recompiled() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "partials/show.html", "{!! $v !!}");
    write(dir.path(), "page.html", r#"{@include "partials.show" v=$payload}"#);
    let engine = ViewEngine::new(EngineConfig::new().with_view_path(dir.path()));
    let ctx = RenderContext::new()
        .with("payload", "{{ $secret }} @csrf")
        .with("secret", "leaked");
    assert_eq!(
        engine.render("page", &ctx).unwrap(),
        "{{ $secret }} @csrf"
    );
}

#[test]
fn test_recursive_include_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "again.html", r#"x{@include "again"}"#);
    let engine = ViewEngine::new(
        EngineConfig::new()
            .with_view_path(dir.path())
            .with_max_include_depth(3),
    );
    let err = engine.render("again", &RenderContext::new()).unwrap_err();
    assert!(matches!(err, ViewError::IncludeRecursionLimit { limit: 3, .. }), "{err}");
}
