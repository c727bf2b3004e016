// src/ingest/dedup.rs
//! Drops candidates whose link is already in the active ledger or the archive.

use std::collections::HashSet;

use crate::model::CandidateItem;

const TRAILING_PUNCT: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '>', '\'', '"'];

/// Dedup form of a link: trimmed, trailing punctuation stripped, case kept.
pub fn normalize_link(link: &str) -> String {
    link.trim().trim_end_matches(TRAILING_PUNCT).to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    pub new_items: Vec<CandidateItem>,
    pub duplicate_count: usize,
}

/// Keep candidates not present in `existing` (normalized links). Within the batch the
/// first occurrence wins. Candidates without a link always pass.
pub fn filter(candidates: Vec<CandidateItem>, existing: &HashSet<String>) -> DedupOutcome {
    let mut seen: HashSet<String> = HashSet::with_capacity(candidates.len());
    let mut out = DedupOutcome {
        new_items: Vec::with_capacity(candidates.len()),
        duplicate_count: 0,
    };

    for c in candidates {
        let key = normalize_link(&c.post_link);
        if key.is_empty() {
            out.new_items.push(c);
            continue;
        }
        if existing.contains(&key) || !seen.insert(key) {
            out.duplicate_count += 1;
            continue;
        }
        out.new_items.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn cand(link: &str, n: u32) -> CandidateItem {
        CandidateItem {
            timestamp: Utc.with_ymd_and_hms(2025, 5, 1, 10, n, 0).unwrap(),
            content: format!("post {n}"),
            post_link: link.into(),
            author: "bob".into(),
            author_link: "https://discord.com/users/2".into(),
        }
    }

    #[test]
    fn normalize_strips_trailing_punct_only() {
        assert_eq!(normalize_link("  https://x.com/a/status/9?s=20). "), "https://x.com/a/status/9?s=20");
        assert_eq!(normalize_link("https://x.com/Ab/status/9\"'>"), "https://x.com/Ab/status/9");
        assert_eq!(normalize_link("   "), "");
    }

    #[test]
    fn batch_duplicates_count_and_first_wins() {
        let existing: HashSet<String> = ["https://x.com/a/status/1".to_string()].into();
        let out = filter(
            vec![
                cand("https://x.com/a/status/1.", 1),
                cand("https://x.com/a/status/2", 2),
                cand("https://x.com/a/status/2,", 3),
                cand("", 4),
                cand("https://x.com/a/status/3", 5),
            ],
            &existing,
        );
        assert_eq!(out.duplicate_count, 2);
        let contents: Vec<_> = out.new_items.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["post 2", "post 4", "post 5"]);
    }
}
