//! Multilingual tag parser: extract source text and per-language variants
//! from legacy inline-multilingual syntaxes.
//!
//! Two independent syntaxes may co-occur in one fragment:
//!
//! - span form: `<span lang="xx" class="multilingual">...</span>`
//! - block form: `{lang xx} ... {lang}`
//!
//! Span tags are resolved first, block tags second over the rewritten text.
//! Language codes are validated case-insensitively against the installation's
//! language registry; content in unrecognized languages is dropped.
//!
//! This component is pure: no side effects, deterministic given the same
//! input and the same installation language set.

use crate::i18n::LanguageRegistry;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

static SPAN_REGEX: OnceLock<Regex> = OnceLock::new();
static LANG_ATTR_REGEX: OnceLock<Regex> = OnceLock::new();
static CLASS_ATTR_REGEX: OnceLock<Regex> = OnceLock::new();
static BLOCK_REGEX: OnceLock<Regex> = OnceLock::new();

fn span_regex() -> &'static Regex {
    SPAN_REGEX.get_or_init(|| Regex::new(r"(?is)<span\s+([^>]*)>(.*?)</span\s*>").unwrap())
}

fn lang_attr_regex() -> &'static Regex {
    LANG_ATTR_REGEX.get_or_init(|| Regex::new(r#"(?i)\blang\s*=\s*"([^"]+)""#).unwrap())
}

fn class_attr_regex() -> &'static Regex {
    CLASS_ATTR_REGEX
        .get_or_init(|| Regex::new(r#"(?i)\bclass\s*=\s*"[^"]*\bmultilingual\b[^"]*""#).unwrap())
}

fn block_regex() -> &'static Regex {
    BLOCK_REGEX
        .get_or_init(|| Regex::new(r"(?s)\{lang\s+([A-Za-z][A-Za-z0-9-]*)\}(.*?)\{lang\}").unwrap())
}

/// Result of parsing one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedContent {
    /// Canonical source text of the fragment
    pub source_text: String,
    /// Text to show while rendering in the source language
    pub display_text: String,
    /// Per-language variants discovered inline, keyed by registry code
    pub translations: BTreeMap<String, String>,
}

/// Accumulation state shared by the span and block passes.
struct Accumulator {
    translations: BTreeMap<String, String>,
    found_source: bool,
    first_foreign: Option<String>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            translations: BTreeMap::new(),
            found_source: false,
            first_foreign: None,
        }
    }

    /// Fold one tagged region into the state. Returns the text the region
    /// contributes to the rewritten fragment: its content for the canonical
    /// language, nothing otherwise.
    fn accumulate<'a>(&mut self, lang_code: &str, content: &'a str) -> &'a str {
        let registry = LanguageRegistry::get();

        match registry.get_by_code(lang_code) {
            Some(config) if config.is_canonical => {
                self.found_source = true;
                content
            }
            Some(config) => {
                if self.first_foreign.is_none() {
                    self.first_foreign = Some(content.to_string());
                }
                self.translations
                    .entry(config.code.to_string())
                    .and_modify(|existing| {
                        existing.push(' ');
                        existing.push_str(content);
                    })
                    .or_insert_with(|| content.to_string());
                ""
            }
            // Unrecognized language: dropped
            None => "",
        }
    }
}

/// Parse a fragment containing zero or more inline-multilingual regions.
///
/// Text outside any recognized region passes through unchanged. When no
/// canonical-language content was found via either syntax and nothing else
/// remains, the first encountered foreign region becomes the source/display
/// text so no content is silently dropped.
pub fn parse(text: &str) -> ParsedContent {
    let mut acc = Accumulator::new();

    // Span-style tags first
    let rewritten = rewrite_spans(text, &mut acc);

    // Block-style tags over the (possibly already rewritten) text
    let rewritten = rewrite_blocks(&rewritten, &mut acc);

    let mut display = rewritten;
    if !acc.found_source && display.trim().is_empty() {
        if let Some(foreign) = acc.first_foreign.take() {
            display = foreign;
        }
    }

    ParsedContent {
        source_text: display.clone(),
        display_text: display,
        translations: acc.translations,
    }
}

/// Resolve every multilingual span, leaving other spans untouched.
fn rewrite_spans(text: &str, acc: &mut Accumulator) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for caps in span_regex().captures_iter(text) {
        let whole = caps.get(0).expect("match always has group 0");
        out.push_str(&text[cursor..whole.start()]);
        cursor = whole.end();

        let attrs = &caps[1];
        let content = caps.get(2).expect("content group").as_str();

        let lang = lang_attr_regex()
            .captures(attrs)
            .map(|c| c.get(1).expect("lang value").as_str());

        match lang {
            Some(code) if class_attr_regex().is_match(attrs) => {
                out.push_str(acc.accumulate(code, content));
            }
            // Not a multilingual span: pass through verbatim
            _ => out.push_str(whole.as_str()),
        }
    }

    out.push_str(&text[cursor..]);
    out
}

/// Resolve every `{lang xx}...{lang}` block; requires the closing marker.
fn rewrite_blocks(text: &str, acc: &mut Accumulator) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for caps in block_regex().captures_iter(text) {
        let whole = caps.get(0).expect("match always has group 0");
        out.push_str(&text[cursor..whole.start()]);
        cursor = whole.end();

        let code = &caps[1];
        let content = caps.get(2).expect("content group").as_str();
        out.push_str(acc.accumulate(code, content));
    }

    out.push_str(&text[cursor..]);
    out
}
