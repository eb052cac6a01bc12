//! Components: the alias registry and the tag compiler that expands them

mod compiler;
mod registry;

pub use compiler::{TagCompiler, DEFAULT_MAX_DEPTH};
pub use registry::{ComponentRegistry, FnComponent, Renderable, TemplateComponent};
