//! Collaborators the engine consumes: view lookup and auth state

use std::path::{Path, PathBuf};

/// Maps a view name to a file
pub trait ViewResolver: Send + Sync {
    /// Path of the view, or `None` if there is no such view
    fn resolve(&self, name: &str) -> Option<PathBuf>;
}

/// Provides the CSRF token and authentication state for `@csrf`, `@auth`
/// and `@guest`
pub trait AuthProvider: Send + Sync {
    fn csrf_token(&self) -> String;
    fn is_authenticated(&self) -> bool;
}

/// Resolves dotted view names against directories on disk
///
/// `layouts.app` becomes `<root>/layouts/app.<extension>`; roots are tried
/// in order. Names with empty segments (which covers `..`), absolute names
/// and names with backslashes or drive colons never resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct FileViewResolver {
    roots: Vec<PathBuf>,
    extension: String,
}

impl FileViewResolver {
    pub fn new(roots: Vec<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            roots,
            extension: extension.into(),
        }
    }

    /// Add a root searched after the existing ones
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Relative file path for a view name
    pub fn relative_path(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.starts_with('/') || name.contains(['\\', ':']) {
            return None;
        }
        let segments: Vec<&str> = name.split(['.', '/']).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        let mut path: PathBuf = segments.iter().collect();
        path.set_extension(&self.extension);
        Some(path)
    }

    fn candidate(&self, root: &Path, relative: &Path) -> Option<PathBuf> {
        let path = root.join(relative);
        path.is_file().then_some(path)
    }
}

impl ViewResolver for FileViewResolver {
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = self.relative_path(name)?;
        self.roots
            .iter()
            .find_map(|root| self.candidate(root, &relative))
    }
}

/// Fixed auth state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticAuth {
    token: String,
    authenticated: bool,
}

impl StaticAuth {
    /// An anonymous visitor with no token
    pub fn guest() -> Self {
        Self::default()
    }

    /// A signed-in user
    pub fn authenticated() -> Self {
        Self {
            token: String::new(),
            authenticated: true,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }
}

impl AuthProvider for StaticAuth {
    fn csrf_token(&self) -> String {
        self.token.clone()
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}
