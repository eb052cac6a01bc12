//! Tag compiler: expands `<x-name>` component tags
//!
//! Tags are found with a scanner that tracks open and close depth, so a
//! slot may contain another instance of the same component. Rendered
//! component output is compiled again one level deeper, up to a limit.

use crate::attributes::AttributeParser;
use crate::component::ComponentRegistry;
use crate::context::RenderContext;
use crate::error::ViewError;
use crate::scan::{self, Region};

/// Default limit on nested component expansion
pub const DEFAULT_MAX_DEPTH: usize = 32;

const TAG_PREFIXES: [&str; 2] = ["<x-", "<x:"];

/// An opening component tag
#[derive(Debug, Clone, PartialEq)]
struct OpenTag<'a> {
    name: &'a str,
    attributes: &'a str,
    self_closing: bool,
    start: usize,
    /// Offset just past the closing `>`
    end: usize,
}

/// Expands component tags against a registry
#[derive(Debug, Clone)]
pub struct TagCompiler<'a> {
    registry: &'a ComponentRegistry,
    context: &'a RenderContext,
    max_depth: usize,
    step_budget: u64,
}

impl<'a> TagCompiler<'a> {
    pub fn new(registry: &'a ComponentRegistry, context: &'a RenderContext) -> Self {
        Self {
            registry,
            context,
            max_depth: DEFAULT_MAX_DEPTH,
            step_budget: 10_000,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_step_budget(mut self, step_budget: u64) -> Self {
        self.step_budget = step_budget;
        self
    }

    /// Expand every component tag in `text`
    pub fn compile(&self, text: &str) -> Result<String, ViewError> {
        self.compile_at(text, 0)
    }

    fn compile_at(&self, text: &str, depth: usize) -> Result<String, ViewError> {
        let protected = scan::regions(text);
        let mut out = String::with_capacity(text.len());
        let mut pos = 0;

        while let Some(start) = next_tag_start(text, pos, &protected) {
            out.push_str(&text[pos..start]);
            let Some(tag) = open_tag_at(text, start)? else {
                out.push('<');
                pos = start + 1;
                continue;
            };

            let (slot, after) = if tag.self_closing {
                ("", tag.end)
            } else {
                let (close_start, close_end) = find_closing_tag(text, &tag, &protected)?;
                (&text[tag.end..close_start], close_end)
            };

            out.push_str(&self.expand(&tag, slot, depth)?);
            pos = after;
        }

        out.push_str(&text[pos..]);
        Ok(out)
    }

    fn expand(&self, tag: &OpenTag<'_>, slot: &str, depth: usize) -> Result<String, ViewError> {
        if depth >= self.max_depth {
            return Err(ViewError::ComponentRecursionLimit {
                name: tag.name.to_string(),
                limit: self.max_depth,
            });
        }

        let component = self
            .registry
            .resolve(tag.name)
            .ok_or_else(|| ViewError::ComponentNotFound {
                name: tag.name.to_string(),
            })?;

        let mut attributes = AttributeParser::new(self.context)
            .with_step_budget(self.step_budget)
            .parse(tag.attributes)?;
        let slot = self.compile_at(slot, depth)?;
        attributes.set_slot(slot.as_str());

        log::trace!("expanding <x-{}> at depth {}", tag.name, depth);
        let rendered = component.render(&attributes, &slot)?;
        if component.output_is_source() {
            self.compile_at(&rendered, depth + 1)
        } else {
            Ok(literal_around_slot(&rendered, &slot))
        }
    }
}

/// `rendered` as literal text, except for the first occurrence of `slot`,
/// which stays template source
fn literal_around_slot(rendered: &str, slot: &str) -> String {
    let literal = |text: &str| {
        if text.is_empty() {
            String::new()
        } else {
            scan::text_marker(text)
        }
    };
    match rendered.find(slot).filter(|_| !slot.is_empty()) {
        Some(at) => {
            let after = at + slot.len();
            format!("{}{}{}", literal(&rendered[..at]), slot, literal(&rendered[after..]))
        }
        None => literal(rendered),
    }
}

fn region_containing(protected: &[Region], at: usize) -> Option<&Region> {
    protected
        .iter()
        .find(|r| r.range.start <= at && at < r.range.end)
}

/// Next `<x-` or `<x:` at or after `from` outside protected regions
fn next_tag_start(text: &str, from: usize, protected: &[Region]) -> Option<usize> {
    let mut pos = from;
    loop {
        let start = TAG_PREFIXES
            .iter()
            .filter_map(|p| text[pos..].find(p).map(|i| pos + i))
            .min()?;
        match region_containing(protected, start) {
            Some(region) => pos = region.range.end,
            None => return Some(start),
        }
    }
}

/// Parse an opening tag at `start`; `None` when the text there only looks
/// like one
fn open_tag_at(text: &str, start: usize) -> Result<Option<OpenTag<'_>>, ViewError> {
    if !TAG_PREFIXES.iter().any(|p| text[start..].starts_with(p)) {
        return Ok(None);
    }
    let name_start = start + 3;
    let name_len = text[name_start..]
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(text.len() - name_start);
    let name = &text[name_start..name_start + name_len];
    if !name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return Ok(None);
    }

    let attrs_start = name_start + name_len;
    let gt = scan::find_unquoted(text, attrs_start, ">").ok_or_else(|| {
        ViewError::UnclosedComponent {
            name: name.to_string(),
            offset: start,
        }
    })?;
    let inner = text[attrs_start..gt].trim_end();
    let (attributes, self_closing) = match inner.strip_suffix('/') {
        Some(attrs) => (attrs, true),
        None => (inner, false),
    };

    Ok(Some(OpenTag {
        name,
        attributes,
        self_closing,
        start,
        end: gt + 1,
    }))
}

/// `</x-name>` or `</x:name>` at `at`, returning the offset past it
fn closing_tag_at(text: &str, at: usize, name: &str) -> Option<usize> {
    let rest = &text[at..];
    let after_prefix = rest
        .strip_prefix("</x-")
        .or_else(|| rest.strip_prefix("</x:"))?;
    let after_name = after_prefix.strip_prefix(name)?;
    let trimmed = after_name.trim_start();
    trimmed
        .starts_with('>')
        .then(|| text.len() - trimmed.len() + 1)
}

/// Find the tag closing `tag`, counting nested tags of the same name
fn find_closing_tag(
    text: &str,
    tag: &OpenTag<'_>,
    protected: &[Region],
) -> Result<(usize, usize), ViewError> {
    let mut depth = 1usize;
    let mut pos = tag.end;

    while let Some(rel) = text[pos..].find('<') {
        let at = pos + rel;
        if let Some(region) = region_containing(protected, at) {
            pos = region.range.end;
            continue;
        }
        if let Some(close_end) = closing_tag_at(text, at, tag.name) {
            depth -= 1;
            if depth == 0 {
                return Ok((at, close_end));
            }
            pos = close_end;
            continue;
        }
        if let Some(nested) = open_tag_at(text, at)? {
            if nested.name == tag.name && !nested.self_closing {
                depth += 1;
            }
            pos = nested.end;
            continue;
        }
        pos = at + 1;
    }

    Err(ViewError::UnclosedComponent {
        name: tag.name.to_string(),
        offset: tag.start,
    })
}
