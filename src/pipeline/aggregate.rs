//! Result aggregation: merge per-page candidates into one author list.
//!
//! Candidates are visited in `(source_page, confidence_rank)` order, so the
//! first time a person is seen is also their earliest appearance. The dedup
//! key is the credential-free, lower-cased name, which makes
//! `"Jane Doe"` and `"Jane Doe, CFA"` the same person; the merged record
//! carries the union of their credentials.
//!
//! Conflict rules for title and e-mail:
//!
//! * default: the earliest page wins; fields it lacks are filled from later
//!   pages.
//! * `prioritize_first_page`: a record first seen on page 1 keeps exactly
//!   the page-1 title and e-mail. Later pages never fill or override it.

use crate::output::{AuthorRecord, CandidateAuthor, PageExtraction};
use crate::pipeline::classify::name_token_count;
use crate::pipeline::postprocess::{credentials_of, name_key, strip_credentials, with_credentials};
use std::collections::HashMap;
use tracing::debug;

struct Merged {
    record: AuthorRecord,
    credentials: Vec<&'static str>,
}

/// Merge every page's candidates into the final records of `document_id`.
pub fn merge(document_id: &str, pages: &[PageExtraction], prioritize_first_page: bool) -> Vec<AuthorRecord> {
    let mut candidates: Vec<&CandidateAuthor> = pages.iter().flat_map(|p| p.candidates.iter()).collect();
    candidates.sort_by_key(|c| (c.source_page, c.confidence_rank));

    let mut merged: Vec<Merged> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for candidate in candidates {
        if name_token_count(&candidate.name) < 2 {
            debug!("Dropping single-token name '{}'", candidate.name);
            continue;
        }
        let key = name_key(&candidate.name);
        if key.is_empty() {
            continue;
        }

        let Some(&slot) = index.get(&key) else {
            index.insert(key, merged.len());
            merged.push(Merged {
                record: AuthorRecord {
                    document_id: document_id.to_string(),
                    name: candidate.name.clone(),
                    title: candidate.title.clone(),
                    email: candidate.email.clone(),
                    page_found: candidate.source_page,
                },
                credentials: credentials_of(&candidate.name),
            });
            continue;
        };

        let entry = &mut merged[slot];
        let mut grew = false;
        for cred in credentials_of(&candidate.name) {
            if !entry.credentials.contains(&cred) {
                entry.credentials.push(cred);
                grew = true;
            }
        }
        if grew {
            entry.record.name = with_credentials(&strip_credentials(&entry.record.name), &entry.credentials);
        }

        let locked = prioritize_first_page
            && entry.record.page_found == 1
            && candidate.source_page != 1;
        if locked {
            continue;
        }
        if entry.record.title.is_none() {
            entry.record.title = candidate.title.clone();
        }
        if entry.record.email.is_none() {
            entry.record.email = candidate.email.clone();
        }
    }

    merged.into_iter().map(|m| m.record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(name: &str, title: Option<&str>, email: Option<&str>, page: usize, rank: usize) -> CandidateAuthor {
        CandidateAuthor {
            name: name.into(),
            title: title.map(Into::into),
            email: email.map(Into::into),
            source_page: page,
            confidence_rank: rank,
        }
    }

    fn page(index: usize, candidates: Vec<CandidateAuthor>) -> PageExtraction {
        PageExtraction {
            page_index: index,
            candidates,
            error: None,
        }
    }

    #[test]
    fn test_duplicate_names_merge_case_insensitively() {
        let pages = vec![
            page(1, vec![cand("John Campbell", Some("Analyst"), None, 1, 0)]),
            page(2, vec![cand("JOHN  CAMPBELL", Some("Director"), Some("jc@stephens.com"), 2, 0)]),
        ];
        let out = merge("key_1", &pages, false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "John Campbell");
        assert_eq!(out[0].title.as_deref(), Some("Analyst"));
        // Missing e-mail is filled from the later page.
        assert_eq!(out[0].email.as_deref(), Some("jc@stephens.com"));
        assert_eq!(out[0].page_found, 1);
        assert_eq!(out[0].document_id, "key_1");
    }

    #[test]
    fn test_first_page_is_authoritative_when_prioritized() {
        let pages = vec![
            page(3, vec![cand("Jane Doe", Some("Senior Analyst"), Some("jane@x.com"), 3, 0)]),
            page(1, vec![cand("Jane Doe", Some("Analyst"), None, 1, 0)]),
        ];
        let out = merge("key_2", &pages, true);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title.as_deref(), Some("Analyst"));
        assert_eq!(out[0].email, None);
        assert_eq!(out[0].page_found, 1);
    }

    #[test]
    fn test_earliest_page_wins_without_page_one() {
        let pages = vec![
            page(2, vec![cand("Jane Doe", Some("Analyst"), None, 2, 0)]),
            page(4, vec![cand("Jane Doe", Some("Strategist"), Some("jd@x.com"), 4, 0)]),
        ];
        let out = merge("key_3", &pages, true);
        assert_eq!(out[0].title.as_deref(), Some("Analyst"));
        assert_eq!(out[0].email.as_deref(), Some("jd@x.com"));
    }

    #[test]
    fn test_credentials_union() {
        let pages = vec![
            page(1, vec![cand("Jane Doe", None, None, 1, 0)]),
            page(2, vec![cand("Jane Doe, CFA", None, None, 2, 0)]),
        ];
        let out = merge("key_4", &pages, false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "Jane Doe, CFA");
    }

    #[test]
    fn test_order_by_page_then_rank_and_single_tokens_dropped() {
        let pages = vec![
            page(2, vec![cand("Carl Young", None, None, 2, 0)]),
            page(
                1,
                vec![
                    cand("Bob Stone", None, None, 1, 1),
                    cand("Madonna", None, None, 1, 2),
                    cand("Ann Lee", None, None, 1, 0),
                ],
            ),
        ];
        let names: Vec<String> = merge("key_5", &pages, false).into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Ann Lee", "Bob Stone", "Carl Young"]);
    }

    #[test]
    fn test_no_candidates_no_records() {
        assert!(merge("key_6", &[page(1, vec![])], true).is_empty());
        assert!(merge("key_6", &[], false).is_empty());
    }
}
