//! View Compiler - a component-aware view template compiler
//!
//! Templates mix HTML with `<x-name>` component tags, `@directives` and
//! `{{ }}` interpolations. Rendering compiles them to a fixed point,
//! resolves `{@include}` references, and evaluates the result with a
//! sandboxed expression interpreter.
//!
//! # Example
//!
//! ```rust
//! use view_compiler::{render_str, RenderContext};
//!
//! let ctx = RenderContext::new().with("count", 3);
//! let html = render_str("@if($count > 0) {{ $count }} items @else None @endif", &ctx).unwrap();
//! assert_eq!(html, " 3 items ");
//! ```

pub mod attributes;
pub mod component;
pub mod config;
pub mod context;
pub mod directive;
pub mod error;
pub mod expr;
pub mod include;
pub mod provider;
pub mod renderer;
pub mod scan;
pub mod session;
pub mod stack;
pub mod value;

pub use attributes::{AttributeBag, AttributeParser};
pub use component::{ComponentRegistry, FnComponent, Renderable, TagCompiler, TemplateComponent};
pub use config::{ConfigError, EngineConfig};
pub use context::RenderContext;
pub use directive::DirectiveTranslator;
pub use error::{ExprError, ViewError};
pub use include::IncludeResolver;
pub use provider::{AuthProvider, FileViewResolver, StaticAuth, ViewResolver};
pub use renderer::{Template, ViewEngine};
pub use session::{RenderSession, RenderStage};
pub use stack::{SectionManager, StackManager};
pub use value::Value;

/// Render template source with the default configuration
///
/// No views, includes or components are available; use a `ViewEngine`
/// for those.
///
/// # Example
///
/// ```rust
/// use view_compiler::{render_str, RenderContext};
///
/// let ctx = RenderContext::new().with("name", "<World>");
/// assert_eq!(render_str("Hello {{ $name }}", &ctx).unwrap(), "Hello &lt;World&gt;");
/// ```
pub fn render_str(source: &str, context: &RenderContext) -> Result<String, ViewError> {
    ViewEngine::new(EngineConfig::default()).render_source(source, context)
}
