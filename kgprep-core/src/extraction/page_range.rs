use crate::error::{ExtractError, ExtractResult};
use std::ops::RangeInclusive;

/// Resolve a requested 1-based inclusive page range against a document's
/// page count. `last` is clamped to the page count; an empty document or a
/// range starting past the end is rejected.
pub fn resolve_page_range(
    first: u32,
    last: Option<u32>,
    total_pages: u32,
) -> ExtractResult<RangeInclusive<u32>> {
    if first < 1 {
        return Err(ExtractError::config("first_page must be at least 1"));
    }
    if let Some(last) = last {
        if last < first {
            return Err(ExtractError::config(format!(
                "last_page {last} is before first_page {first}"
            )));
        }
    }
    if total_pages == 0 {
        return Err(ExtractError::config("document has no pages"));
    }
    if first > total_pages {
        return Err(ExtractError::config(format!(
            "first_page {first} is past the last page ({total_pages})"
        )));
    }

    let last = last.map_or(total_pages, |l| l.min(total_pages));
    Ok(first..=last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_ended_range_runs_to_last_page() {
        assert_eq!(resolve_page_range(1, None, 12).unwrap(), 1..=12);
        assert_eq!(resolve_page_range(5, None, 12).unwrap(), 5..=12);
    }

    #[test]
    fn last_page_is_clamped() {
        assert_eq!(resolve_page_range(2, Some(99), 3).unwrap(), 2..=3);
    }

    #[test]
    fn single_page_range() {
        let range = resolve_page_range(3, Some(3), 3).unwrap();
        assert_eq!(range.collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        assert!(resolve_page_range(0, None, 3).is_err());
        assert!(resolve_page_range(3, Some(2), 5).is_err());
        assert!(resolve_page_range(4, None, 3).is_err());
        assert!(resolve_page_range(1, None, 0).is_err());
    }
}
