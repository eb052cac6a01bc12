//! The render pipeline
//!
//! `ViewEngine::render` takes a view through the stages of a render
//! session: resolve the file, compile component tags and directives to a
//! fixed point, resolve includes, evaluate, follow `@extends` layouts and
//! finally substitute stack placeholders.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::component::{ComponentRegistry, TagCompiler};
use crate::config::EngineConfig;
use crate::context::RenderContext;
use crate::directive::{parse_program, DirectiveTranslator, Interpreter};
use crate::error::ViewError;
use crate::expr::Scope;
use crate::include::IncludeResolver;
use crate::provider::{AuthProvider, FileViewResolver, StaticAuth, ViewResolver};
use crate::scan;
use crate::session::{RenderSession, RenderStage};

/// Template source with its compiled form, computed on first use
#[derive(Debug)]
pub struct Template {
    name: String,
    source: String,
    compiled: OnceCell<String>,
}

impl Template {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            compiled: OnceCell::new(),
        }
    }

    pub fn from_file(name: impl Into<String>, path: &Path) -> Result<Self, ViewError> {
        let source = std::fs::read_to_string(path).map_err(|e| ViewError::io(path, e))?;
        Ok(Self::new(name, source))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The compiled form, running `compile` the first time
    pub fn compiled<F>(&self, compile: F) -> Result<&str, ViewError>
    where
        F: FnOnce(&str) -> Result<String, ViewError>,
    {
        if let Some(compiled) = self.compiled.get() {
            return Ok(compiled);
        }
        let compiled = compile(&self.source)?;
        Ok(self.compiled.get_or_init(|| compiled))
    }
}

/// Renders views; shareable across threads, with all per-render state kept
/// in a `RenderSession`
#[derive(Clone)]
pub struct ViewEngine {
    config: EngineConfig,
    registry: Arc<ComponentRegistry>,
    resolver: Arc<dyn ViewResolver>,
    auth: Arc<dyn AuthProvider>,
    include_roots: Vec<PathBuf>,
}

impl std::fmt::Debug for ViewEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

impl ViewEngine {
    /// An engine resolving views from the configured view paths, with no
    /// components and a guest auth provider
    pub fn new(config: EngineConfig) -> Self {
        let resolver = FileViewResolver::new(config.view_paths.clone(), config.extension.clone());
        let include_roots = config.effective_include_roots().to_vec();
        Self {
            config,
            registry: Arc::new(ComponentRegistry::new()),
            resolver: Arc::new(resolver),
            auth: Arc::new(StaticAuth::guest()),
            include_roots,
        }
    }

    /// Like `new`, also registering every component under the configured
    /// component paths
    pub fn from_config(config: EngineConfig) -> Result<Self, ViewError> {
        let mut registry = ComponentRegistry::new();
        for dir in &config.component_paths {
            let count = registry.load_dir(dir, &config.extension)?;
            log::debug!("loaded {} components from {}", count, dir.display());
        }
        Ok(Self::new(config).with_registry(registry))
    }

    pub fn with_registry(mut self, registry: ComponentRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_resolver(mut self, resolver: impl ViewResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_auth(mut self, auth: impl AuthProvider + 'static) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Render a view by name
    pub fn render(&self, view: &str, context: &RenderContext) -> Result<String, ViewError> {
        let mut session = self.session();
        let result = self
            .load(view)
            .and_then(|template| self.run(&template, context, &mut session));
        self.finish(result, &mut session)
    }

    /// Render template source that does not come from a view file
    pub fn render_source(&self, source: &str, context: &RenderContext) -> Result<String, ViewError> {
        let mut session = self.session();
        let template = Template::new("<inline>", source);
        let result = self.run(&template, context, &mut session);
        self.finish(result, &mut session)
    }

    /// Compile template source: component tags and directives until a pass
    /// changes nothing
    ///
    /// Literal `{%` in `source` is kept as text, so the result is only
    /// meant to be evaluated, not compiled again.
    pub fn compile(&self, source: &str, context: &RenderContext) -> Result<String, ViewError> {
        self.compile_to_fixpoint(&scan::escape_markers(source), context)
    }

    fn compile_to_fixpoint(&self, text: &str, context: &RenderContext) -> Result<String, ViewError> {
        let tags = TagCompiler::new(&self.registry, context)
            .with_max_depth(self.config.max_component_depth)
            .with_step_budget(self.config.eval_step_budget);
        let translator = DirectiveTranslator::new();

        let mut current = text.to_string();
        for pass in 1..=self.config.max_compile_passes {
            let next = translator.translate(&tags.compile(&current)?);
            if next == current {
                log::debug!("compilation converged after {} passes", pass);
                return Ok(next);
            }
            current = next;
        }
        Err(ViewError::CompilationDidNotConverge {
            passes: self.config.max_compile_passes,
        })
    }

    fn session(&self) -> RenderSession {
        RenderSession::new(Arc::clone(&self.auth), self.config.eval_step_budget)
    }

    fn finish(
        &self,
        result: Result<String, ViewError>,
        session: &mut RenderSession,
    ) -> Result<String, ViewError> {
        match result {
            Ok(output) => {
                session.enter(RenderStage::Done);
                Ok(output)
            }
            Err(err) => {
                session.fail(&err);
                Err(err)
            }
        }
    }

    fn load(&self, view: &str) -> Result<Template, ViewError> {
        let path = self
            .resolver
            .resolve(view)
            .ok_or_else(|| ViewError::view_not_found(view))?;
        log::debug!("resolved view {} to {}", view, path.display());
        Template::from_file(view, &path)
    }

    fn run(
        &self,
        template: &Template,
        context: &RenderContext,
        session: &mut RenderSession,
    ) -> Result<String, ViewError> {
        let mut output = self.evaluate(template, context, session)?;

        let mut depth = 0;
        while let Some(layout) = session.take_extends() {
            if session.is_halted() {
                break;
            }
            depth += 1;
            if depth > self.config.max_layout_depth {
                return Err(ViewError::LayoutRecursionLimit {
                    name: layout,
                    limit: self.config.max_layout_depth,
                });
            }
            session.enter(RenderStage::Resolving);
            let parent = self.load(&layout)?;
            // The child's own text outside sections is dropped
            output = self.evaluate(&parent, context, session)?;
        }

        session.enter(RenderStage::PlaceholderSubstitution);
        Ok(session.substitute_placeholders(&output))
    }

    /// Compile, resolve includes and evaluate one template
    fn evaluate(
        &self,
        template: &Template,
        context: &RenderContext,
        session: &mut RenderSession,
    ) -> Result<String, ViewError> {
        session.enter(RenderStage::Compiling);
        let compiled = template.compiled(|source| self.compile(source, context))?;
        session.reserve_nonce(compiled);

        session.enter(RenderStage::IncludeResolving);
        let includes = IncludeResolver::new(self.resolver.as_ref(), &self.include_roots)
            .with_max_depth(self.config.max_include_depth);
        let included = includes.resolve(compiled, context, session)?;
        let placed = session.insert_stack_placeholders(&included);

        session.enter(RenderStage::Evaluating);
        log::debug!("evaluating {}", template.name());
        let program = parse_program(&placed)?;
        Interpreter::new(session, Scope::from(context)).run(&program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_template_compiles_once() {
        let template = Template::new("t", "src");
        let calls = Cell::new(0);
        let compile = |s: &str| {
            calls.set(calls.get() + 1);
            Ok::<_, ViewError>(s.to_uppercase())
        };
        assert_eq!(template.compiled(compile).unwrap(), "SRC");
        assert_eq!(template.compiled(compile).unwrap(), "SRC");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_compile_reaches_fixed_point() {
        let mut registry = ComponentRegistry::new();
        registry.register_template("badge", "<span>@if($on) on @endif</span>");
        let engine = ViewEngine::new(EngineConfig::default()).with_registry(registry);
        let ctx = RenderContext::new();
        let once = engine.compile("<x-badge />", &ctx).unwrap();
        assert_eq!(once, "<span>{% if $on %} on {% endif %}</span>");
        assert_eq!(engine.compile_to_fixpoint(&once, &ctx).unwrap(), once);
    }

    #[test]
    fn test_pass_cap() {
        let engine = ViewEngine::new(EngineConfig::default().with_max_compile_passes(1));
        let err = engine.compile("{{ $x }}", &RenderContext::new()).unwrap_err();
        assert!(matches!(err, ViewError::CompilationDidNotConverge { passes: 1 }));
        assert_eq!(engine.compile("plain", &RenderContext::new()).unwrap(), "plain");
    }

    #[test]
    fn test_render_source() {
        let engine = ViewEngine::new(EngineConfig::default());
        let ctx = RenderContext::new().with("name", "<b>");
        assert_eq!(
            engine.render_source("Hi {{ $name }}", &ctx).unwrap(),
            "Hi &lt;b&gt;"
        );
    }

    #[test]
    fn test_missing_view() {
        let engine = ViewEngine::new(EngineConfig::default());
        let err = engine.render("nope", &RenderContext::new()).unwrap_err();
        assert!(matches!(err, ViewError::ViewNotFound { ref name } if name == "nope"));
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ViewEngine>();
    }
}
