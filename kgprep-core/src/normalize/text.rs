//! Character whitelist and punctuation canonicalization.

use regex::Regex;
use std::sync::LazyLock;

/// Separator glyphs, canonicalized to `，`.
pub const SEPARATORS: &str = ",;，；";
/// Sentence-terminal glyphs, canonicalized to `。`.
pub const TERMINALS: &str = ".!?。！？";

pub const CANONICAL_SEPARATOR: char = '，';
pub const CANONICAL_TERMINAL: char = '。';

// CJK Unified Ideographs (basic block), the punctuation set and newline
static NON_WHITELISTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\x{4e00}-\x{9fa5},;，；.!?。！？\n]+").expect("valid whitelist pattern")
});

static PUNCTUATION_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,;，；.!?。！？]+").expect("valid punctuation pattern"));

pub fn is_punctuation(c: char) -> bool {
    SEPARATORS.contains(c) || TERMINALS.contains(c)
}

pub fn is_terminal(c: char) -> bool {
    TERMINALS.contains(c)
}

/// Remove every character outside the whitelist.
pub fn filter_whitelist(text: &str) -> String {
    NON_WHITELISTED.replace_all(text, "").into_owned()
}

/// Collapse each maximal punctuation run to one canonical glyph: `。` if
/// the run holds any terminal, `，` otherwise.
pub fn canonicalize_punctuation(text: &str) -> String {
    PUNCTUATION_RUN
        .replace_all(text, |caps: &regex::Captures| {
            if caps[0].chars().any(is_terminal) {
                CANONICAL_TERMINAL.to_string()
            } else {
                CANONICAL_SEPARATOR.to_string()
            }
        })
        .into_owned()
}

pub fn strip_leading_punctuation(text: &str) -> &str {
    text.trim_start_matches(is_punctuation)
}
