//! Deterministic text normalization.
//!
//! A pure function of its input and [`NormalizeConfig`]. Applying it to its
//! own output changes nothing.

pub mod dedup;
pub mod similarity;
pub mod text;

use crate::config::NormalizeConfig;
use crate::types::NormalizedText;
use dedup::{compress_chars, dedup_sentences};
use text::{canonicalize_punctuation, filter_whitelist, strip_leading_punctuation, CANONICAL_TERMINAL};

pub use similarity::similarity_ratio;

/// Normalization bound to one configuration.
#[derive(Debug, Clone, Default)]
pub struct NormalizationPipeline {
    config: NormalizeConfig,
}

impl NormalizationPipeline {
    pub fn new(config: NormalizeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizeConfig {
        &self.config
    }

    pub fn normalize(&self, text: &str) -> String {
        normalize(text, &self.config)
    }

    /// Normalize and count the characters of the result.
    pub fn normalize_counted(&self, text: &str) -> NormalizedText {
        NormalizedText::new(self.normalize(text))
    }
}

/// Whitelist, canonicalize, compress, split into paragraphs, deduplicate
/// sentences, then drop short paragraphs.
pub fn normalize(text: &str, config: &NormalizeConfig) -> String {
    let text = filter_whitelist(text);
    let text = canonicalize_punctuation(&text);
    let text = compress_chars(&text, config.char_repeat_threshold);

    let paragraphs: Vec<String> = split_paragraphs(&text)
        .into_iter()
        .map(|paragraph| clean_paragraph(paragraph, config))
        .filter(|paragraph| {
            !paragraph.is_empty() && paragraph.chars().count() >= config.min_paragraph_length
        })
        .collect();

    paragraphs.join("\n").trim().to_string()
}

/// Split after every newline that directly follows a terminal glyph.
fn split_paragraphs(text: &str) -> Vec<&str> {
    let boundary = format!("{CANONICAL_TERMINAL}\n");
    text.split_inclusive(boundary.as_str()).collect()
}

fn clean_paragraph(paragraph: &str, config: &NormalizeConfig) -> String {
    let joined: String = paragraph.chars().filter(|&c| c != '\n').collect();
    // Removing newlines can bring punctuation or repeated characters together
    let joined = canonicalize_punctuation(&joined);
    let joined = compress_chars(&joined, config.char_repeat_threshold);
    let joined = strip_leading_punctuation(&joined);

    let sentences: Vec<&str> = joined.split_inclusive(CANONICAL_TERMINAL).collect();
    let kept = dedup_sentences(
        &sentences,
        config.sentence_similarity_threshold,
        config.min_sentence_length,
    );

    let cleaned = kept.concat();
    strip_leading_punctuation(cleaned.trim()).to_string()
}
