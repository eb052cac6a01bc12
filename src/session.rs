//! Per-render state
//!
//! A `RenderSession` is created for every `render()` call and passed by
//! reference through every stage, so concurrent renders never share stacks,
//! sections or placeholders.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use rand::Rng;

use crate::error::ViewError;
use crate::expr::{Budget, Evaluator, Expr, Helpers, Scope};
use crate::provider::AuthProvider;
use crate::scan::{self, RegionKind};
use crate::stack::{SectionManager, StackManager};
use crate::value::Value;

const PLACEHOLDER_PREFIX: &str = "___STACK_PLACEHOLDER_";

/// Pipeline stage of a render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Resolving,
    Compiling,
    IncludeResolving,
    Evaluating,
    PlaceholderSubstitution,
    Done,
    Failed,
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenderStage::Resolving => "resolving",
            RenderStage::Compiling => "compiling",
            RenderStage::IncludeResolving => "include-resolving",
            RenderStage::Evaluating => "evaluating",
            RenderStage::PlaceholderSubstitution => "placeholder-substitution",
            RenderStage::Done => "done",
            RenderStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Helper services seen by expressions during a render
pub struct SessionHelpers<'a> {
    auth: &'a dyn AuthProvider,
    sections: &'a SectionManager,
}

impl Helpers for SessionHelpers<'_> {
    fn csrf_token(&self) -> String {
        self.auth.csrf_token()
    }

    fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    fn has_section(&self, name: &str) -> bool {
        self.sections.has(name)
    }
}

/// State owned by a single render call
pub struct RenderSession {
    stacks: StackManager,
    sections: SectionManager,
    /// Evaluated include output, referenced by `{% fragment N %}`
    fragments: Vec<String>,
    /// Stack name to the placeholder token issued for it
    placeholders: IndexMap<String, String>,
    nonce: String,
    auth: Arc<dyn AuthProvider>,
    budget: Budget,
    extends: Option<String>,
    halted: bool,
    stage: RenderStage,
}

impl fmt::Debug for RenderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderSession")
            .field("stage", &self.stage)
            .field("stacks", &self.stacks)
            .field("sections", &self.sections)
            .field("fragments", &self.fragments.len())
            .field("extends", &self.extends)
            .field("halted", &self.halted)
            .finish()
    }
}

impl RenderSession {
    pub fn new(auth: Arc<dyn AuthProvider>, step_budget: u64) -> Self {
        Self {
            stacks: StackManager::new(),
            sections: SectionManager::new(),
            fragments: Vec::new(),
            placeholders: IndexMap::new(),
            nonce: new_nonce(),
            auth,
            budget: Budget::new(step_budget),
            extends: None,
            halted: false,
            stage: RenderStage::Resolving,
        }
    }

    pub fn stage(&self) -> RenderStage {
        self.stage
    }

    /// Move to the next pipeline stage
    pub fn enter(&mut self, stage: RenderStage) {
        log::debug!("render stage {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    /// Record a failure; the session is not used again
    pub fn fail(&mut self, err: &ViewError) {
        log::debug!("render failed during {}: {}", self.stage, err);
        self.stage = RenderStage::Failed;
    }

    pub fn stacks(&self) -> &StackManager {
        &self.stacks
    }

    pub fn stacks_mut(&mut self) -> &mut StackManager {
        &mut self.stacks
    }

    pub fn sections(&self) -> &SectionManager {
        &self.sections
    }

    pub fn sections_mut(&mut self) -> &mut SectionManager {
        &mut self.sections
    }

    /// Tick the evaluation budget outside expression evaluation, e.g. once
    /// per loop iteration
    pub fn tick(&mut self) -> Result<(), ViewError> {
        Ok(self.budget.tick()?)
    }

    /// Evaluate an expression with this session's helpers and budget
    pub fn evaluate(&mut self, expr: &Expr, scope: &Scope) -> Result<Value, ViewError> {
        let helpers = SessionHelpers {
            auth: self.auth.as_ref(),
            sections: &self.sections,
        };
        Ok(Evaluator::new(scope, &helpers, &mut self.budget).eval(expr)?)
    }

    /// Store evaluated include output, returning its index
    pub fn add_fragment(&mut self, output: String) -> usize {
        self.fragments.push(output);
        self.fragments.len() - 1
    }

    pub fn fragment(&self, index: usize) -> Option<&str> {
        self.fragments.get(index).map(String::as_str)
    }

    /// Record the layout named by `@extends`
    pub fn set_extends(&mut self, layout: impl Into<String>) {
        self.extends = Some(layout.into());
    }

    pub fn take_extends(&mut self) -> Option<String> {
        self.extends.take()
    }

    /// Stop evaluation after `@dd`
    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Pick a new nonce while `text` contains the current one, so tokens
    /// can never collide with literal template text. Only possible before
    /// the first token is issued.
    pub fn reserve_nonce(&mut self, text: &str) {
        if !self.placeholders.is_empty() {
            return;
        }
        while text.contains(&self.nonce) {
            self.nonce = new_nonce();
        }
    }

    /// The placeholder token for a stack, issued once per name
    pub fn placeholder(&mut self, stack: &str) -> String {
        let nonce = &self.nonce;
        self.placeholders
            .entry(stack.to_string())
            .or_insert_with(|| format!("{}{}_{}___", PLACEHOLDER_PREFIX, stack, nonce))
            .clone()
    }

    /// Replace `{% stack "name" %}` markers naming a literal stack with
    /// placeholder tokens; stacks named by expressions get theirs during
    /// evaluation
    pub fn insert_stack_placeholders(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for region in scan::regions(text) {
            if region.kind != RegionKind::Marker {
                continue;
            }
            let Some(marker) = scan::parse_marker(text, region.range.start) else {
                continue;
            };
            let Some(name) = literal_name(marker.keyword, marker.args) else {
                continue;
            };
            out.push_str(&text[last..region.range.start]);
            out.push_str(&self.placeholder(&name));
            last = region.range.end;
        }
        out.push_str(&text[last..]);
        out
    }

    /// Replace every issued placeholder with its stack's content
    ///
    /// One left-to-right scan. Stack content is expanded the same way, so a
    /// `@stack` inside a push resolves too; a stack reached again through
    /// its own content expands to nothing.
    pub fn substitute_placeholders(&self, output: &str) -> String {
        let mut result = String::with_capacity(output.len());
        self.expand_placeholders(output, &mut Vec::new(), &mut result);
        result
    }

    fn expand_placeholders<'s>(&'s self, text: &str, active: &mut Vec<&'s str>, out: &mut String) {
        let mut rest = text;
        while let Some(start) = rest.find(PLACEHOLDER_PREFIX) {
            out.push_str(&rest[..start]);
            let candidate = &rest[start..];
            let issued = self
                .placeholders
                .iter()
                .find(|(_, token)| candidate.starts_with(token.as_str()));
            match issued {
                Some((name, token)) => {
                    if !active.contains(&name.as_str()) {
                        active.push(name.as_str());
                        self.expand_placeholders(&self.stacks.yield_stack(name), active, out);
                        active.pop();
                    }
                    rest = &candidate[token.len()..];
                }
                None => {
                    out.push_str(PLACEHOLDER_PREFIX);
                    rest = &candidate[PLACEHOLDER_PREFIX.len()..];
                }
            }
        }
        out.push_str(rest);
    }
}

/// Name of a `{% stack "name" %}` marker whose argument is a plain string
fn literal_name(keyword: &str, args: &str) -> Option<String> {
    if keyword != "stack" {
        return None;
    }
    let expr = crate::expr::parse_expression(args).ok()?;
    expr.as_str_literal().map(str::to_string)
}

fn new_nonce() -> String {
    format!("{:016x}", rand::rng().random::<u64>())
}
