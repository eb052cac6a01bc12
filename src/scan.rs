//! Low-level text scanning shared by the tag compiler, the directive
//! translator and the program parser
//!
//! Directives are translated into markers of the form `{% keyword args %}`.
//! Markers, `php` and `verbatim` blocks and `{{-- --}}` comments are
//! protected regions: later passes copy them through untouched, which is
//! what keeps every pass idempotent.

use std::ops::Range;

pub const MARKER_OPEN: &str = "{%";
pub const MARKER_CLOSE: &str = "%}";

/// Keywords the program parser understands; `{% other %}` is plain text
const MARKER_KEYWORDS: &[&str] = &[
    "echo",
    "raw",
    "json",
    "dump",
    "dd",
    "if",
    "elseif",
    "else",
    "endif",
    "foreach",
    "endforeach",
    "forelse",
    "empty",
    "endforelse",
    "for",
    "endfor",
    "while",
    "endwhile",
    "break",
    "continue",
    "php",
    "endphp",
    "push",
    "endpush",
    "prepend",
    "endprepend",
    "section",
    "endsection",
    "yield",
    "extends",
    "stack",
    "verbatim",
    "endverbatim",
    "fragment",
    "at",
];

/// Marker keywords whose body is raw text up to the matching end marker
const RAW_MARKERS: &[&str] = &["php", "verbatim"];

/// Format a marker
pub fn marker(keyword: &str, args: &str) -> String {
    let args = args.trim();
    if args.is_empty() {
        format!("{} {} {}", MARKER_OPEN, keyword, MARKER_CLOSE)
    } else {
        format!("{} {} {} {}", MARKER_OPEN, keyword, args, MARKER_CLOSE)
    }
}

/// A marker that evaluates to exactly `text`; nothing inside it is compiled
/// or translated again
pub fn text_marker(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('\'');
    for c in text.chars() {
        if c == '\\' || c == '\'' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    marker("raw", &quoted)
}

/// Make every `{%` in authored source literal text
///
/// Runs once over view, include and component source before translation,
/// so the only markers ever executed are the ones translation produced.
/// A `@verbatim` block holding `{%` becomes one literal text marker;
/// comments and `@php` blocks are left as they are.
pub fn escape_markers(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    while i < source.len() {
        let rest = &source[i..];
        if rest.starts_with(MARKER_OPEN) {
            out.push_str(&text_marker(MARKER_OPEN));
            i += MARKER_OPEN.len();
            continue;
        }
        if let Some((end, kind)) = source_block_at(source, i) {
            let block = &source[i..end];
            if kind == RegionKind::RawVerbatim && block.contains(MARKER_OPEN) {
                let body = &block["@verbatim".len()..block.len() - "@endverbatim".len()];
                out.push_str(&text_marker(body));
            } else {
                out.push_str(block);
            }
            i = end;
            continue;
        }
        let step = rest.chars().next().map(char::len_utf8).unwrap_or(1);
        out.push_str(&rest[..step]);
        i += step;
    }
    out
}

/// A marker found in text
#[derive(Debug, Clone, PartialEq)]
pub struct Marker<'a> {
    pub keyword: &'a str,
    pub args: &'a str,
    /// Byte offset just past the closing `%}`
    pub end: usize,
}

/// Parse the marker starting at `at`, if there is a known one
pub fn parse_marker(text: &str, at: usize) -> Option<Marker<'_>> {
    if !text[at..].starts_with(MARKER_OPEN) {
        return None;
    }
    let body_start = at + MARKER_OPEN.len();
    let close = find_unquoted(text, body_start, MARKER_CLOSE)?;
    let body = text[body_start..close].trim();
    let keyword_len = body
        .find(|c: char| !c.is_ascii_lowercase())
        .unwrap_or(body.len());
    let keyword = &body[..keyword_len];
    if !MARKER_KEYWORDS.contains(&keyword) {
        return None;
    }
    Some(Marker {
        keyword,
        args: body[keyword_len..].trim(),
        end: close + MARKER_CLOSE.len(),
    })
}

/// Offset of the `{% end<keyword> %}` closing a raw marker block whose body
/// starts at `from`, with the offset just past it
pub fn raw_block_end(text: &str, from: usize, keyword: &str) -> Option<(usize, usize)> {
    let closer = marker(&format!("end{}", keyword), "");
    text[from..]
        .find(&closer)
        .map(|i| (from + i, from + i + closer.len()))
}

/// Find `needle` at or after `from`, skipping over quoted strings
pub fn find_unquoted(text: &str, from: usize, needle: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = from;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if text[i..].starts_with(needle) {
                    return Some(i);
                }
                if b == b'"' || b == b'\'' {
                    quote = Some(b);
                }
            }
        }
        i += 1;
    }
    None
}

/// Given `text[open] == '('`, the offset of the matching `)`
pub fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'(') {
        return None;
    }
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = open;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Whether an `@` at `at` may start a directive: it must not follow a word
/// character, so e-mail addresses are left alone
pub fn directive_boundary(text: &str, at: usize) -> bool {
    text[..at]
        .chars()
        .next_back()
        .map(|c| !(c.is_alphanumeric() || c == '_' || c == '@'))
        .unwrap_or(true)
}

/// The directive word after the `@` at `at`, if `at` is a directive boundary
pub fn directive_word(text: &str, at: usize) -> Option<&str> {
    if !directive_boundary(text, at) {
        return None;
    }
    word_after_at(text, at)
}

/// The alphabetic word following the `@` at `at`
pub fn word_after_at(text: &str, at: usize) -> Option<&str> {
    if !text[at..].starts_with('@') {
        return None;
    }
    let rest = &text[at + 1..];
    let len = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    (len > 0).then(|| &rest[..len])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// `{{-- ... --}}`
    Comment,
    /// A single `{% ... %}` marker
    Marker,
    /// `{% php %}`/`{% verbatim %}` marker through its end marker
    MarkerBlock,
    /// `@verbatim ... @endverbatim` before translation
    RawVerbatim,
    /// `@php ... @endphp` before translation
    RawPhp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub range: Range<usize>,
    pub kind: RegionKind,
}

/// Locate all protected regions, in order
pub fn regions(text: &str) -> Vec<Region> {
    let mut regions = Vec::new();
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];

        if rest.starts_with("{{--") {
            if let Some((end, kind)) = source_block_at(text, i) {
                regions.push(Region { range: i..end, kind });
                i = end;
                continue;
            }
        }

        if let Some(found) = parse_marker(text, i) {
            let (end, kind) = if RAW_MARKERS.contains(&found.keyword) {
                let end = raw_block_end(text, found.end, found.keyword)
                    .map(|(_, after)| after)
                    .unwrap_or(text.len());
                (end, RegionKind::MarkerBlock)
            } else {
                (found.end, RegionKind::Marker)
            };
            regions.push(Region {
                range: i..end,
                kind,
            });
            i = end;
            continue;
        }

        if rest.starts_with('@') {
            if let Some((end, kind)) = source_block_at(text, i) {
                regions.push(Region { range: i..end, kind });
                i = end;
                continue;
            }
        }

        i += rest.chars().next().map(char::len_utf8).unwrap_or(1);
    }

    regions
}

/// A comment, `@verbatim` or `@php` block starting at `at`, with the offset
/// just past it
fn source_block_at(text: &str, at: usize) -> Option<(usize, RegionKind)> {
    let rest = &text[at..];
    if let Some(body) = rest.strip_prefix("{{--") {
        let end = body
            .find("--}}")
            .map(|e| at + 4 + e + 4)
            .unwrap_or(text.len());
        return Some((end, RegionKind::Comment));
    }
    let (closer, kind) = match directive_word(text, at)? {
        "verbatim" => ("@endverbatim", RegionKind::RawVerbatim),
        "php" if !is_inline_php(text, at) => ("@endphp", RegionKind::RawPhp),
        _ => return None,
    };
    rest.find(closer).map(|e| (at + e + closer.len(), kind))
}

/// `@php(...)` with an argument is the inline statement form
pub fn is_inline_php(text: &str, at: usize) -> bool {
    text[at + "@php".len()..]
        .trim_start_matches([' ', '\t'])
        .starts_with('(')
}

/// Rebuild `text`, passing every stretch outside protected regions through
/// `f` and copying protected regions as they are
pub fn map_unprotected(text: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for region in regions(text) {
        out.push_str(&f(&text[last..region.range.start]));
        out.push_str(&text[region.range.clone()]);
        last = region.range.end;
    }
    out.push_str(&f(&text[last..]));
    out
}
