//! Deferred content: named stacks and layout sections

use indexmap::IndexMap;

/// Named, append-only stacks of pushed content
///
/// Stacks are read once, after evaluation finished, so a `@stack` sees
/// every push of the document wherever it appears.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackManager {
    stacks: IndexMap<String, Vec<String>>,
}

impl StackManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment; pushing the same content twice keeps both
    pub fn push(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.stacks
            .entry(name.into())
            .or_default()
            .push(content.into());
    }

    /// Put a fragment in front of everything pushed so far
    pub fn prepend(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.stacks
            .entry(name.into())
            .or_default()
            .insert(0, content.into());
    }

    /// Fragments joined with newlines; empty for an unknown stack
    pub fn yield_stack(&self, name: &str) -> String {
        self.stacks
            .get(name)
            .map(|fragments| fragments.join("\n"))
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stacks.contains_key(name)
    }

    /// Stack names in order of first push
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stacks.keys().map(String::as_str)
    }
}

/// Named section buffers for layout inheritance; the last writer wins
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionManager {
    sections: IndexMap<String, String>,
}

impl SectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.sections.insert(name.into(), content.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.sections.get(name).map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }
}
