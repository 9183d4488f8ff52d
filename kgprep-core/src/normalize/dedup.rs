//! Run-length character compression and near-duplicate sentence removal.

use super::similarity::similarity_ratio;
use tracing::debug;

/// Paragraphs with more sentences than this are reported at debug level;
/// deduplication is quadratic in the sentence count.
const LARGE_PARAGRAPH_SENTENCES: usize = 512;

/// Collapse every run of one character longer than `threshold` to a single
/// occurrence. Runs of length `<= threshold` are left alone.
pub fn compress_chars(text: &str, threshold: usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        let mut run = 1;
        while chars.next_if_eq(&c).is_some() {
            run += 1;
        }
        if run > threshold {
            out.push(c);
        } else {
            out.extend(std::iter::repeat(c).take(run));
        }
    }
    out
}

/// Drop sentences that are near-duplicates of an earlier kept sentence.
///
/// Scans left to right: a sentence already marked as a duplicate is
/// skipped; otherwise it is kept and every later unmarked sentence whose
/// similarity ratio with it reaches `threshold` is marked. Sentences
/// shorter than `min_len` characters are dropped without comparison.
pub fn dedup_sentences<'a>(sentences: &[&'a str], threshold: f64, min_len: usize) -> Vec<&'a str> {
    let count = sentences.len();
    if count > LARGE_PARAGRAPH_SENTENCES {
        debug!(sentences = count, "deduplicating a very long paragraph");
    }

    let lengths: Vec<usize> = sentences.iter().map(|s| s.chars().count()).collect();
    let mut duplicate = vec![false; count];
    let mut kept = Vec::with_capacity(count);

    for i in 0..count {
        if duplicate[i] || lengths[i] < min_len || lengths[i] == 0 {
            continue;
        }
        kept.push(sentences[i]);

        for j in (i + 1)..count {
            if duplicate[j] || lengths[j] < min_len || lengths[j] == 0 {
                continue;
            }
            if similarity_ratio(sentences[i], sentences[j]) >= threshold {
                duplicate[j] = true;
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_runs_collapse() {
        assert_eq!(compress_chars("aaaaa", 2), "a");
        assert_eq!(compress_chars("啊啊啊", 2), "啊");
    }

    #[test]
    fn short_runs_survive() {
        assert_eq!(compress_chars("ab", 2), "ab");
        assert_eq!(compress_chars("好好学习", 2), "好好学习");
    }

    #[test]
    fn threshold_zero_collapses_every_run() {
        assert_eq!(compress_chars("aabccc", 0), "abc");
    }

    #[test]
    fn compress_empty() {
        assert_eq!(compress_chars("", 2), "");
    }

    #[test]
    fn first_occurrence_wins() {
        let kept = dedup_sentences(&["甲乙丙丁。", "戊己庚辛。", "甲乙丙丁。"], 0.9, 0);
        assert_eq!(kept, vec!["甲乙丙丁。", "戊己庚辛。"]);
    }

    #[test]
    fn marked_sentences_do_not_mark_others() {
        // b is close to a and c is close to b, but c is not close to a
        let a = "一二三四五六七八九十";
        let b = "一二三四五六七八九拾";
        let c = "一二三四五六七捌玖拾";
        assert!(similarity_ratio(a, b) >= 0.85);
        assert!(similarity_ratio(b, c) >= 0.8);
        assert!(similarity_ratio(a, c) < 0.8);
        assert_eq!(dedup_sentences(&[a, b, c], 0.8, 0), vec![a, c]);
    }

    #[test]
    fn short_sentences_are_dropped_when_configured() {
        let kept = dedup_sentences(&["好。", "这是完整的句子。"], 0.9, 5);
        assert_eq!(kept, vec!["这是完整的句子。"]);
    }
}
