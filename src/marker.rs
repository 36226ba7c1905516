//! Marker codec: embed, detect and extract `{t:<hash>}` content markers.
//!
//! A marker is a literal, human-readable token appended to a stored field
//! value, carrying the 10-character content hash of the fragment it follows.
//! It is the persisted wire format between tagging time and render time and
//! must survive arbitrary HTML/rich-text storage without escaping.
//!
//! Pure string/regex logic, no I/O.

use regex::Regex;
use std::sync::OnceLock;

/// Length of a content hash.
pub const HASH_LEN: usize = 10;

static TAIL_REGEX: OnceLock<Regex> = OnceLock::new();
static SCAN_REGEX: OnceLock<Regex> = OnceLock::new();

/// Marker at the end of a value, tolerating a single trailing block-level
/// closing tag and trailing whitespace. A marker anywhere else is not
/// recognised, so user-typed literal braces in the middle of content never
/// count as tags.
fn tail_regex() -> &'static Regex {
    TAIL_REGEX.get_or_init(|| {
        Regex::new(r"(?s)^(?P<body>.*?)\s*\{t:(?P<hash>[0-9A-Za-z]{10})\}\s*(?P<close></[A-Za-z][A-Za-z0-9]*\s*>)?\s*$")
            .unwrap()
    })
}

/// Every well-formed marker occurrence, wherever it appears. Used by the
/// resolver, which processes blobs assembled from many tagged fields.
fn scan_regex() -> &'static Regex {
    SCAN_REGEX.get_or_init(|| Regex::new(r"\{t:([0-9A-Za-z]{10})\}").unwrap())
}

/// One marker occurrence inside a larger blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatch {
    /// Text between the previous marker (or start of blob) and this marker
    pub preceding: String,
    /// The 10-character hash the marker carries
    pub hash: String,
}

/// Check that a string is a well-formed hash: exactly 10 ASCII alphanumerics.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == HASH_LEN && hash.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Append a marker encoding `hash` to `text`, separated by a single space.
pub fn embed(text: &str, hash: &str) -> String {
    format!("{} {{t:{}}}", text, hash)
}

/// True iff a well-formed marker appears at the tail of `text`.
pub fn is_tagged(text: &str) -> bool {
    tail_regex().is_match(text)
}

/// Extract the hash from a tail marker, or `None` when no well-formed
/// marker is present.
pub fn extract_hash(text: &str) -> Option<String> {
    tail_regex()
        .captures(text)
        .map(|caps| caps["hash"].to_string())
}

/// Remove the tail marker token, trimming whitespace left behind. A trailing
/// closing tag after the marker is preserved. Text without a tail marker is
/// returned unchanged.
pub fn strip_marker(text: &str) -> String {
    match tail_regex().captures(text) {
        Some(caps) => {
            let body = caps["body"].trim_end();
            match caps.name("close") {
                Some(close) => format!("{}{}", body, close.as_str()),
                None => body.to_string(),
            }
        }
        None => text.to_string(),
    }
}

/// Scan a blob for every marker occurrence, pairing each hash with the text
/// that precedes it. Returns an empty vector for marker-free blobs.
pub fn scan(blob: &str) -> Vec<MarkerMatch> {
    let mut matches = Vec::new();
    let mut cursor = 0;

    for caps in scan_regex().captures_iter(blob) {
        let whole = caps.get(0).expect("match always has group 0");
        matches.push(MarkerMatch {
            preceding: blob[cursor..whole.start()].to_string(),
            hash: caps[1].to_string(),
        });
        cursor = whole.end();
    }

    matches
}

/// Replace every `preceding + marker` run in `blob` with the value returned
/// by `resolve(preceding, hash)`; text after the final marker passes through
/// unchanged.
pub fn substitute<F>(blob: &str, mut resolve: F) -> String
where
    F: FnMut(&str, &str) -> String,
{
    let mut out = String::with_capacity(blob.len());
    let mut cursor = 0;

    for caps in scan_regex().captures_iter(blob) {
        let whole = caps.get(0).expect("match always has group 0");
        let preceding = &blob[cursor..whole.start()];
        out.push_str(&resolve(preceding, &caps[1]));
        cursor = whole.end();
    }

    out.push_str(&blob[cursor..]);
    out
}
