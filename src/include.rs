//! `{@include "name" key="value"}` resolution
//!
//! Included views are translated and evaluated in the caller's render
//! session with the caller's variables plus the include parameters. Their
//! output is kept as a session fragment and the reference is replaced with
//! a `{% fragment N %}` marker, so text produced by an include is never
//! translated or evaluated again.

use std::path::{Path, PathBuf};

use crate::attributes::coerce_bound;
use crate::context::RenderContext;
use crate::directive::{parse_program, DirectiveTranslator, Interpreter};
use crate::error::ViewError;
use crate::expr::{parse_expression, Scope};
use crate::provider::ViewResolver;
use crate::scan::{self, marker};
use crate::session::RenderSession;
use crate::value::Value;

const INCLUDE_OPEN: &str = "{@include";

/// Default nesting limit for includes within includes
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 16;

/// A parsed include reference
#[derive(Debug, Clone, PartialEq)]
struct IncludeRef<'a> {
    name: &'a str,
    params: Vec<IncludeParam<'a>>,
}

#[derive(Debug, Clone, PartialEq)]
struct IncludeParam<'a> {
    key: &'a str,
    value: &'a str,
    quoted: bool,
}

/// Resolves include references against an allow-list of directories
pub struct IncludeResolver<'a> {
    resolver: &'a dyn ViewResolver,
    /// Canonical allowed directories
    roots: Vec<PathBuf>,
    max_depth: usize,
}

impl<'a> IncludeResolver<'a> {
    /// Roots that do not exist are dropped; nothing under them could be
    /// included anyway.
    pub fn new(resolver: &'a dyn ViewResolver, roots: &[PathBuf]) -> Self {
        let roots = roots
            .iter()
            .filter_map(|root| match root.canonicalize() {
                Ok(canonical) => Some(canonical),
                Err(err) => {
                    log::warn!("include root {} is unusable: {}", root.display(), err);
                    None
                }
            })
            .collect();
        Self {
            resolver,
            roots,
            max_depth: DEFAULT_MAX_INCLUDE_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Replace every include reference in `text` with the evaluated output
    /// of the included view
    ///
    /// The output is kept in the session as a fragment and `text` only gets
    /// a `{% fragment N %}` reference to it. Evaluating the document then
    /// gives the same text as splicing the output in and translating again,
    /// except that included output is never read as template syntax.
    pub fn resolve(
        &self,
        text: &str,
        context: &RenderContext,
        session: &mut RenderSession,
    ) -> Result<String, ViewError> {
        self.resolve_at(text, context, session, 0)
    }

    fn resolve_at(
        &self,
        text: &str,
        context: &RenderContext,
        session: &mut RenderSession,
        depth: usize,
    ) -> Result<String, ViewError> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for (start, end) in include_spans(text) {
            out.push_str(&text[last..start]);
            let body = &text[start + INCLUDE_OPEN.len()..end - 1];
            let Some(reference) = parse_reference(body) else {
                // Not a well-formed reference; leave it as text
                out.push_str(&text[start..end]);
                last = end;
                continue;
            };
            let index = self.include(&reference, context, session, depth)?;
            out.push_str(&marker("fragment", &index.to_string()));
            last = end;
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    fn include(
        &self,
        reference: &IncludeRef<'_>,
        context: &RenderContext,
        session: &mut RenderSession,
        depth: usize,
    ) -> Result<usize, ViewError> {
        if depth >= self.max_depth {
            return Err(ViewError::IncludeRecursionLimit {
                name: reference.name.to_string(),
                limit: self.max_depth,
            });
        }
        let path = self.safe_path(reference.name)?;
        log::debug!("including {} from {}", reference.name, path.display());

        let caller = Scope::from(context);
        let mut params = RenderContext::new();
        for param in &reference.params {
            params.insert(param.key, self.param_value(param, &caller, session)?);
        }
        let merged = context.merged(&params);

        let source = std::fs::read_to_string(&path).map_err(|e| ViewError::io(&path, e))?;
        let translated = DirectiveTranslator::new().translate(&scan::escape_markers(&source));
        let nested = self.resolve_at(&translated, &merged, session, depth + 1)?;
        let placed = session.insert_stack_placeholders(&nested);
        let program = parse_program(&placed)?;
        let output = Interpreter::new(session, Scope::from(&merged))
            .without_extends()
            .run(&program)?;
        Ok(session.add_fragment(output))
    }

    fn param_value(
        &self,
        param: &IncludeParam<'_>,
        caller: &Scope,
        session: &mut RenderSession,
    ) -> Result<Value, ViewError> {
        if param.quoted {
            return Ok(Value::String(param.value.to_string()));
        }
        if param.value.starts_with('$') {
            let expr = parse_expression(param.value)?;
            return session.evaluate(&expr, caller);
        }
        Ok(coerce_bound(param.value))
    }

    /// Resolve a name to a file inside one of the allowed directories
    pub fn safe_path(&self, name: &str) -> Result<PathBuf, ViewError> {
        check_name(name)?;
        let path = self
            .resolver
            .resolve(name)
            .ok_or_else(|| ViewError::view_not_found(name))?;
        let canonical = path.canonicalize().map_err(|e| ViewError::io(&path, e))?;
        if !self.roots.iter().any(|root| canonical.starts_with(root)) {
            return Err(ViewError::unsafe_include(
                name,
                "resolved path is outside the allowed directories",
            ));
        }
        Ok(canonical)
    }
}

/// Reject names that climb out of a directory or are absolute
fn check_name(name: &str) -> Result<(), ViewError> {
    let path = Path::new(name);
    if path.is_absolute() || name.starts_with(['/', '\\']) {
        return Err(ViewError::unsafe_include(name, "absolute paths are not allowed"));
    }
    if name.contains("..") {
        return Err(ViewError::unsafe_include(name, "parent directory segments are not allowed"));
    }
    Ok(())
}

/// Byte spans of `{@include ...}` references outside protected regions
fn include_spans(text: &str) -> Vec<(usize, usize)> {
    let regions = scan::regions(text);
    let mut spans = Vec::new();
    let mut pos = 0;
    while let Some(rel) = text[pos..].find(INCLUDE_OPEN) {
        let start = pos + rel;
        pos = start + INCLUDE_OPEN.len();
        if regions.iter().any(|r| r.range.contains(&start)) {
            continue;
        }
        let rest = &text[pos..];
        if !rest.starts_with(char::is_whitespace) {
            continue;
        }
        let Some(close) = scan::find_unquoted(text, pos, "}") else {
            break;
        };
        spans.push((start, close + 1));
        pos = close + 1;
    }
    spans
}

/// Parse the text between `{@include` and `}`
fn parse_reference(body: &str) -> Option<IncludeRef<'_>> {
    let (name, _, mut rest) = take_token(body.trim_start())?;
    if name.is_empty() {
        return None;
    }
    let mut params = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let eq = rest.find('=')?;
        let key = rest[..eq].trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return None;
        }
        let (value, quoted, after) = take_token(rest[eq + 1..].trim_start())?;
        params.push(IncludeParam { key, value, quoted });
        rest = after;
    }
    Some(IncludeRef { name, params })
}

/// A quoted or bare token: its text, whether it was quoted, and the rest
fn take_token(input: &str) -> Option<(&str, bool, &str)> {
    match input.chars().next()? {
        quote @ ('"' | '\'') => {
            let body = &input[1..];
            let end = body.find(quote)?;
            Some((&body[..end], true, &body[end + 1..]))
        }
        _ => {
            let end = input.find(char::is_whitespace).unwrap_or(input.len());
            Some((&input[..end], false, &input[end..]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FileViewResolver, StaticAuth};
    use std::fs;
    use std::sync::Arc;

    fn session() -> RenderSession {
        RenderSession::new(Arc::new(StaticAuth::guest()), 100_000)
    }

    fn fragments(text: &str, session: &RenderSession) -> String {
        let program = parse_program(text).unwrap();
        program
            .nodes
            .iter()
            .map(|node| match node {
                crate::directive::Node::Fragment(i) => session.fragment(*i).unwrap().to_string(),
                crate::directive::Node::Text(t) => t.clone(),
                other => panic!("unexpected node {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_parse_reference() {
        let r = parse_reference(r#" "partials.card" title="Hi there" n=3 user=$user"#).unwrap();
        assert_eq!(r.name, "partials.card");
        assert_eq!(
            r.params,
            vec![
                IncludeParam { key: "title", value: "Hi there", quoted: true },
                IncludeParam { key: "n", value: "3", quoted: false },
                IncludeParam { key: "user", value: "$user", quoted: false },
            ]
        );
        assert_eq!(parse_reference(" bare.name").unwrap().name, "bare.name");
        assert_eq!(parse_reference(r#" "x" broken"#), None);
    }

    #[test]
    fn test_include_with_params() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("partials")).unwrap();
        fs::write(
            dir.path().join("partials/greet.html"),
            "Hello {{ $name }}, {{ $n + 1 }} from {{ $site }}",
        )
        .unwrap();

        let views = FileViewResolver::new(vec![dir.path().to_path_buf()], "html");
        let includes = IncludeResolver::new(&views, &[dir.path().to_path_buf()]);
        let ctx = RenderContext::new().with("site", "home").with("who", "Ann");
        let mut session = session();
        let out = includes
            .resolve(r#"<p>{@include "partials.greet" name=$who n=2}</p>"#, &ctx, &mut session)
            .unwrap();
        assert_eq!(fragments(&out, &session), "<p>Hello Ann, 3 from home</p>");
    }

    #[test]
    fn test_included_text_is_not_evaluated_again() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("echo.html"), "{{ $v }}").unwrap();
        let views = FileViewResolver::new(vec![dir.path().to_path_buf()], "html");
        let includes = IncludeResolver::new(&views, &[dir.path().to_path_buf()]);
        let mut session = session();
        let out = includes
            .resolve(r#"{@include "echo" v="{{ $secret }}"}"#, &RenderContext::new(), &mut session)
            .unwrap();
        assert_eq!(fragments(&out, &session), "{{ $secret }}");
    }

    #[test]
    fn test_parent_segments_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let views = FileViewResolver::new(vec![dir.path().to_path_buf()], "html");
        let includes = IncludeResolver::new(&views, &[dir.path().to_path_buf()]);
        for name in ["../etc/passwd", "a/../../b", "/etc/passwd"] {
            let err = includes.safe_path(name).unwrap_err();
            assert!(matches!(err, ViewError::UnsafeIncludePath { .. }), "{name}: {err}");
        }
    }

    #[test]
    fn test_path_outside_allow_list_is_rejected() {
        let views_dir = tempfile::tempdir().unwrap();
        let allowed = tempfile::tempdir().unwrap();
        fs::write(views_dir.path().join("secret.html"), "s").unwrap();
        let views = FileViewResolver::new(vec![views_dir.path().to_path_buf()], "html");
        let includes = IncludeResolver::new(&views, &[allowed.path().to_path_buf()]);
        let err = includes.safe_path("secret").unwrap_err();
        assert!(matches!(err, ViewError::UnsafeIncludePath { .. }));
    }

    #[test]
    fn test_missing_include() {
        let dir = tempfile::tempdir().unwrap();
        let views = FileViewResolver::new(vec![dir.path().to_path_buf()], "html");
        let includes = IncludeResolver::new(&views, &[dir.path().to_path_buf()]);
        let err = includes
            .resolve(r#"{@include "nope"}"#, &RenderContext::new(), &mut session())
            .unwrap_err();
        assert!(matches!(err, ViewError::ViewNotFound { .. }));
    }

    #[test]
    fn test_self_include_hits_depth_limit() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("loop.html"), r#"x{@include "loop"}"#).unwrap();
        let views = FileViewResolver::new(vec![dir.path().to_path_buf()], "html");
        let includes = IncludeResolver::new(&views, &[dir.path().to_path_buf()]).with_max_depth(4);
        let err = includes
            .resolve(r#"{@include "loop"}"#, &RenderContext::new(), &mut session())
            .unwrap_err();
        assert!(matches!(err, ViewError::IncludeRecursionLimit { limit: 4, .. }));
    }

    #[test]
    fn test_include_inside_verbatim_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let views = FileViewResolver::new(vec![dir.path().to_path_buf()], "html");
        let includes = IncludeResolver::new(&views, &[dir.path().to_path_buf()]);
        let text = r#"{% verbatim %}{@include "nope"}{% endverbatim %}"#;
        let out = includes
            .resolve(text, &RenderContext::new(), &mut session())
            .unwrap();
        assert_eq!(out, text);
    }
}
