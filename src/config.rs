//! Engine configuration
//!
//! Limits and search paths for a `ViewEngine`, built in code or loaded from
//! a TOML file:
//!
//! ```toml
//! view_paths = ["views"]
//! component_paths = ["views/components"]
//! extension = "html"
//! max_compile_passes = 10
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Directories searched, in order, for views
    pub view_paths: Vec<PathBuf>,
    /// Directories whose files are registered as components
    pub component_paths: Vec<PathBuf>,
    /// Directories includes may read from; empty means `view_paths`
    pub include_roots: Vec<PathBuf>,
    /// View file extension, without the dot
    pub extension: String,
    /// Compile passes before giving up on reaching a fixed point
    pub max_compile_passes: usize,
    pub max_component_depth: usize,
    pub max_include_depth: usize,
    /// `@extends` chain length
    pub max_layout_depth: usize,
    /// Evaluation steps allowed per render
    pub eval_step_budget: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            view_paths: Vec::new(),
            component_paths: Vec::new(),
            include_roots: Vec::new(),
            extension: "html".to_string(),
            max_compile_passes: 10,
            max_component_depth: 32,
            max_include_depth: 16,
            max_layout_depth: 8,
            eval_step_budget: 1_000_000,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file; relative paths in it are taken relative to
    /// the file's directory
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_str(&content)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    /// Load from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn rebase(&mut self, base: &Path) {
        let lists = [
            &mut self.view_paths,
            &mut self.component_paths,
            &mut self.include_roots,
        ];
        for list in lists {
            for path in list.iter_mut() {
                if path.is_relative() {
                    *path = base.join(&*path);
                }
            }
        }
    }

    pub fn with_view_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.view_paths.push(path.into());
        self
    }

    pub fn with_component_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.component_paths.push(path.into());
        self
    }

    pub fn with_include_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_roots.push(path.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_max_compile_passes(mut self, passes: usize) -> Self {
        self.max_compile_passes = passes;
        self
    }

    pub fn with_max_component_depth(mut self, depth: usize) -> Self {
        self.max_component_depth = depth;
        self
    }

    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    pub fn with_max_layout_depth(mut self, depth: usize) -> Self {
        self.max_layout_depth = depth;
        self
    }

    pub fn with_eval_step_budget(mut self, budget: u64) -> Self {
        self.eval_step_budget = budget;
        self
    }

    /// Directories includes are confined to
    pub fn effective_include_roots(&self) -> &[PathBuf] {
        if self.include_roots.is_empty() {
            &self.view_paths
        } else {
            &self.include_roots
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.extension, "html");
        assert_eq!(config.max_compile_passes, 10);
        assert_eq!(config.max_component_depth, 32);
        assert_eq!(config.max_include_depth, 16);
        assert_eq!(config.eval_step_budget, 1_000_000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_str(
            r#"
view_paths = ["views"]
max_compile_passes = 3
"#,
        )
        .expect("Should parse");
        assert_eq!(config.view_paths, vec![PathBuf::from("views")]);
        assert_eq!(config.max_compile_passes, 3);
        assert_eq!(config.extension, "html");
    }

    #[test]
    fn test_unknown_key_is_an_error() {
        let result = EngineConfig::from_str("max_passes = 3");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_include_roots_fall_back_to_view_paths() {
        let config = EngineConfig::new().with_view_path("views");
        assert_eq!(config.effective_include_roots(), &[PathBuf::from("views")]);
        let config = config.with_include_root("partials");
        assert_eq!(config.effective_include_roots(), &[PathBuf::from("partials")]);
    }

    #[test]
    fn test_from_file_rebases_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("views.toml");
        std::fs::write(&path, "view_paths = [\"views\", \"/abs\"]\n").unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(
            config.view_paths,
            vec![dir.path().join("views"), PathBuf::from("/abs")]
        );
    }

    #[test]
    fn test_missing_file() {
        let result = EngineConfig::from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
