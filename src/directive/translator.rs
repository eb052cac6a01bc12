//! Directive translation: `@if`, `{{ }}` and friends into markers
//!
//! Every pass rewrites text outside protected regions only, and its output
//! is protected, so translating twice gives the same text as translating
//! once.

use crate::scan::{self, marker, RegionKind};

/// Whether a directive takes a parenthesised argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Args {
    None,
    Optional,
    Required,
}

/// Directives translated by the last pass, with their argument rules
const DIRECTIVES: &[(&str, Args)] = &[
    ("yield", Args::Required),
    ("csrf", Args::None),
    ("method", Args::Required),
    ("auth", Args::None),
    ("endauth", Args::None),
    ("guest", Args::None),
    ("endguest", Args::None),
    ("if", Args::Required),
    ("elseif", Args::Required),
    ("else", Args::None),
    ("endif", Args::None),
    ("unless", Args::Required),
    ("endunless", Args::None),
    ("isset", Args::Required),
    ("endisset", Args::None),
    ("empty", Args::Optional),
    ("endempty", Args::None),
    ("hasSection", Args::Required),
    ("foreach", Args::Required),
    ("endforeach", Args::None),
    ("forelse", Args::Required),
    ("endforelse", Args::None),
    ("for", Args::Required),
    ("endfor", Args::None),
    ("while", Args::Required),
    ("endwhile", Args::None),
    ("continue", Args::Optional),
    ("break", Args::Optional),
    ("php", Args::Required),
    ("dd", Args::Required),
    ("dump", Args::Required),
    ("json", Args::Required),
    ("push", Args::Required),
    ("endpush", Args::None),
    ("prepend", Args::Required),
    ("endprepend", Args::None),
    ("section", Args::Required),
    ("endsection", Args::None),
    ("stop", Args::None),
    ("extends", Args::Required),
    ("stack", Args::Required),
];

type Pass = fn(&str) -> String;

/// Translation passes, in the order they run
const PASSES: &[(&str, Pass)] = &[
    ("comments", strip_comments),
    ("raw-blocks", translate_raw_blocks),
    ("escapes", translate_escapes),
    ("raw-echo", translate_raw_echoes),
    ("echo", translate_echoes),
    ("directives", translate_directives),
];

/// Stateless text-to-text directive translator
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectiveTranslator;

impl DirectiveTranslator {
    pub fn new() -> Self {
        Self
    }

    /// Run every pass over `text`
    pub fn translate(&self, text: &str) -> String {
        let mut current = text.to_string();
        for (name, pass) in PASSES {
            let next = pass(&current);
            if next != current {
                log::trace!("directive pass {} rewrote the template", name);
            }
            current = next;
        }
        current
    }
}

/// Drop `{{-- ... --}}` comments
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for region in scan::regions(text) {
        if region.kind == RegionKind::Comment {
            out.push_str(&text[last..region.range.start]);
            last = region.range.end;
        }
    }
    out.push_str(&text[last..]);
    out
}

/// `@verbatim` and `@php` blocks into raw marker blocks
fn translate_raw_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for region in scan::regions(text) {
        let (keyword, opener, closer) = match region.kind {
            RegionKind::RawVerbatim => ("verbatim", "@verbatim", "@endverbatim"),
            RegionKind::RawPhp => ("php", "@php", "@endphp"),
            _ => continue,
        };
        let block = &text[region.range.clone()];
        let body = &block[opener.len()..block.len() - closer.len()];
        out.push_str(&text[last..region.range.start]);
        out.push_str(&marker(keyword, ""));
        out.push_str(body);
        out.push_str(&marker(&format!("end{}", keyword), ""));
        last = region.range.end;
    }
    out.push_str(&text[last..]);
    out
}

/// `@@` into a literal `@`, `@{{ ... }}` into verbatim text
fn translate_escapes(text: &str) -> String {
    scan::map_unprotected(text, |chunk| {
        let mut out = String::with_capacity(chunk.len());
        let mut i = 0;
        while i < chunk.len() {
            let rest = &chunk[i..];
            if rest.starts_with("@@") {
                out.push_str(&marker("at", ""));
                i += 2;
                continue;
            }
            if let Some(after) = rest.strip_prefix('@') {
                let close = if after.starts_with("{{") {
                    Some("}}")
                } else if after.starts_with("{!!") {
                    Some("!!}")
                } else {
                    None
                };
                if let Some(end) = close.and_then(|c| after.find(c).map(|e| e + c.len())) {
                    out.push_str(&marker("verbatim", ""));
                    out.push_str(&after[..end]);
                    out.push_str(&marker("endverbatim", ""));
                    i += 1 + end;
                    continue;
                }
            }
            let step = rest.chars().next().map(char::len_utf8).unwrap_or(1);
            out.push_str(&rest[..step]);
            i += step;
        }
        out
    })
}

/// Replace `open expr close` with a marker, leaving unterminated openers
fn translate_delimited(text: &str, open: &str, close: &str, keyword: &str) -> String {
    scan::map_unprotected(text, |chunk| {
        let mut out = String::with_capacity(chunk.len());
        let mut pos = 0;
        while let Some(rel) = chunk[pos..].find(open) {
            let start = pos + rel;
            let body_start = start + open.len();
            let Some(end) = scan::find_unquoted(chunk, body_start, close) else {
                break;
            };
            out.push_str(&chunk[pos..start]);
            out.push_str(&marker(keyword, &chunk[body_start..end]));
            pos = end + close.len();
        }
        out.push_str(&chunk[pos..]);
        out
    })
}

/// `{!! expr !!}` into raw output
fn translate_raw_echoes(text: &str) -> String {
    translate_delimited(text, "{!!", "!!}", "raw")
}

/// `{{ expr }}` into escaped output
fn translate_echoes(text: &str) -> String {
    translate_delimited(text, "{{", "}}", "echo")
}

fn directive_args(name: &str) -> Option<Args> {
    DIRECTIVES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, args)| *args)
}

/// Arguments of a directive whose name ends at `at`, with the offset just
/// past them
fn take_args(text: &str, at: usize) -> Option<(&str, usize)> {
    let rest = &text[at..];
    let trimmed = rest.trim_start_matches([' ', '\t']);
    let open = at + (rest.len() - trimmed.len());
    let close = scan::matching_paren(text, open)?;
    Some((&text[open + 1..close], close + 1))
}

/// All `@name(...)` directives
fn translate_directives(text: &str) -> String {
    scan::map_unprotected(text, |chunk| {
        let mut out = String::with_capacity(chunk.len());
        let mut pos = 0;
        // End of the last translated directive; one may follow another
        // directly, as in `@endif@endforeach`
        let mut last_end = None;
        while let Some(rel) = chunk[pos..].find('@') {
            let at = pos + rel;
            out.push_str(&chunk[pos..at]);
            pos = at + 1;

            let word = if last_end == Some(at) {
                scan::word_after_at(chunk, at)
            } else {
                scan::directive_word(chunk, at)
            };
            let Some(name) = word else {
                out.push('@');
                continue;
            };
            let Some(rule) = directive_args(name) else {
                out.push('@');
                continue;
            };
            let name_end = at + 1 + name.len();
            let args = match rule {
                Args::None => None,
                Args::Optional | Args::Required => take_args(chunk, name_end),
            };
            if rule == Args::Required && args.is_none() {
                out.push('@');
                continue;
            }

            let (args, end) = match args {
                Some((args, end)) => (Some(args), end),
                None => (None, name_end),
            };
            out.push_str(&expand(name, args));
            pos = end;
            last_end = Some(end);
        }
        out.push_str(&chunk[pos..]);
        out
    })
}

/// The marker text for one directive
fn expand(name: &str, args: Option<&str>) -> String {
    let a = args.unwrap_or("").trim();
    match name {
        "csrf" => format!(
            r#"<input type="hidden" name="_token" value="{}">"#,
            marker("echo", "csrf_token()")
        ),
        "method" => format!(
            r#"<input type="hidden" name="_method" value="{}">"#,
            marker("echo", &format!("strtoupper({})", a))
        ),
        "auth" => marker("if", "auth_check()"),
        "guest" => marker("if", "!auth_check()"),
        "unless" => marker("if", &format!("!({})", a)),
        "isset" => marker("if", &format!("isset({})", a)),
        "empty" if args.is_some() => marker("if", &format!("empty({})", a)),
        "hasSection" => marker("if", &format!("has_section({})", a)),
        "endauth" | "endguest" | "endunless" | "endisset" | "endempty" => marker("endif", ""),
        "php" => format!("{}{}{}", marker("php", ""), a, marker("endphp", "")),
        "stop" => marker("endsection", ""),
        other => marker(other, a),
    }
}
