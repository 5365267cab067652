//! Text classifiers: document type, publishing institution, termination
//! headlines, non-person names and byline fallbacks.
//!
//! Everything here is a pure function over already-extracted text. No I/O,
//! no model calls, so each rule is unit-testable on its own.

use crate::config::FeatureToggles;
use crate::output::MetadataFlags;
use crate::pipeline::parse::RawAuthor;
use crate::pipeline::postprocess::strip_credentials;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

// ── Document type ────────────────────────────────────────────────────────────

/// Layout family of a report, as far as author placement is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// 1–3 authors at the top of the first page.
    #[default]
    Standard,
    /// Several independently authored sections, each with its own byline.
    Compilation,
    /// Announces the end of coverage; may carry only a department attribution.
    Termination,
}

static RE_COMPILATION: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)Page\s+Headline\s+Analyst",
        r"(?is)Table of Contents.*Analyst",
        r"(?is)SECTION.*AUTHOR",
        r"(?is)Contents.*Author",
        r"(?i)\|\s*Analyst\s*\|",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static RE_ANALYST_BYLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i:Analyst):\s*[A-Z][a-z]+").unwrap());

static RE_TERMINATION: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)Termination of Coverage",
        r"(?i)owing to the (?:primary )?analyst's departure",
        r"(?i)we are terminating coverage",
        r"(?i)terminating coverage for the following names",
        r"(?i)terminating our coverage of",
        r"(?i)terminating research coverage",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Classify a document from its opening text.
///
/// Table-of-contents cues or at least two `Analyst: Name` bylines mean a
/// compilation; the termination phrases are checked only afterwards.
pub fn detect_document_type(text: &str) -> DocumentType {
    if text.trim().is_empty() {
        return DocumentType::Standard;
    }
    if RE_COMPILATION.iter().any(|re| re.is_match(text))
        || RE_ANALYST_BYLINE.find_iter(text).take(2).count() >= 2
    {
        return DocumentType::Compilation;
    }
    if RE_TERMINATION.iter().any(|re| re.is_match(text)) {
        return DocumentType::Termination;
    }
    DocumentType::Standard
}

// ── Institutions ─────────────────────────────────────────────────────────────

/// A publisher with a known e-mail domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Institution {
    /// Lower-case key used for prompt addenda (`credit suisse`).
    pub key: &'static str,
    pub display_name: &'static str,
    pub email_domain: &'static str,
}

/// Known publishers, checked in this order.
pub const INSTITUTIONS: &[Institution] = &[
    Institution { key: "stephens", display_name: "Stephens", email_domain: "stephens.com" },
    Institution { key: "wells fargo", display_name: "Wells Fargo", email_domain: "wellsfargo.com" },
    Institution { key: "morgan stanley", display_name: "Morgan Stanley", email_domain: "morganstanley.com" },
    Institution { key: "goldman sachs", display_name: "Goldman Sachs", email_domain: "gs.com" },
    Institution { key: "jp morgan", display_name: "JP Morgan", email_domain: "jpmorgan.com" },
    Institution { key: "credit suisse", display_name: "Credit Suisse", email_domain: "credit-suisse.com" },
    Institution { key: "ubs", display_name: "UBS", email_domain: "ubs.com" },
    Institution { key: "barclays", display_name: "Barclays", email_domain: "barclays.com" },
    Institution { key: "citigroup", display_name: "Citigroup", email_domain: "citi.com" },
    Institution { key: "deutsche bank", display_name: "Deutsche Bank", email_domain: "db.com" },
    Institution { key: "bank of america", display_name: "Bank of America", email_domain: "bofa.com" },
    Institution { key: "jefferies", display_name: "Jefferies", email_domain: "jefferies.com" },
    Institution { key: "cowen", display_name: "Cowen", email_domain: "cowen.com" },
];

static RE_INSTITUTIONS: Lazy<Vec<Regex>> = Lazy::new(|| {
    INSTITUTIONS
        .iter()
        .map(|inst| {
            let words: Vec<String> = inst.key.split(' ').map(regex::escape).collect();
            Regex::new(&format!(r"(?i)\b{}\b", words.join(r"\s+"))).unwrap()
        })
        .collect()
});

/// First known institution named in `text`, matched on word boundaries.
pub fn detect_institution(text: &str) -> Option<Institution> {
    INSTITUTIONS
        .iter()
        .zip(RE_INSTITUTIONS.iter())
        .find(|(_, re)| re.is_match(text))
        .map(|(inst, _)| *inst)
}

// ── Document signals ─────────────────────────────────────────────────────────

/// Everything the prompt selector and the validator need to know about a
/// document, computed once from its opening text and metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DocumentSignals {
    pub doc_type: DocumentType,
    pub institution: Option<Institution>,
    /// Flagged by metadata headline or by in-text termination phrases.
    pub termination: bool,
}

impl DocumentSignals {
    pub fn detect(text: &str, flags: &MetadataFlags, features: &FeatureToggles) -> Self {
        let detected = detect_document_type(text);
        let doc_type = if features.document_type_detection {
            detected
        } else {
            DocumentType::Standard
        };
        let institution = if features.institution_detection {
            detect_institution(text)
        } else {
            None
        };
        Self {
            doc_type,
            institution,
            termination: flags.termination || detected == DocumentType::Termination,
        }
    }
}

/// The first configured skip term contained in `headline`, case-insensitively.
pub fn matching_skip_term<'a>(headline: &str, skip_terms: &'a [String]) -> Option<&'a str> {
    let headline = headline.to_lowercase();
    skip_terms
        .iter()
        .find(|term| !term.is_empty() && headline.contains(&term.to_lowercase()))
        .map(String::as_str)
}

// ── Non-person heuristic ─────────────────────────────────────────────────────

static RE_INSTITUTIONAL_NAME: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)Research\s+(?:Analysts|Department)",
        r"(?i)[A-Z]{2,}\s+(?:US\s+)?Eq\.\s+Res",
        r"(?i)Equity\s+Research",
        r"(?i)Securities\s+Research",
        r"(?i)Investment\s+Research",
        r"(?i)Global\s+Research",
        r"(?i)Research\s+Team",
        r"(?i)Research\s+Desk",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const INSTITUTIONAL_PHRASES: &[&str] = &[
    "us eq. res",
    "eq. res",
    "research team",
    "research dept",
    "equity research",
    "global research",
    "research division",
    "research analysts",
    "credit suisse research",
];

static RE_GENERIC_MAILBOX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:equity\.research|research|info|contact)@").unwrap());

static RE_DEPARTMENT_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:Department|Team|Group)$").unwrap());

const ORGANISATION_WORDS: &[&str] = &[
    "securities", "equity", "research", "capital", "markets", "group", "llc", "inc.",
    "limited", "advisors", "asset", "management", "financial", "bank", "investment",
    "corporation", "department", "contents", "disclaimer", "publication", "report",
];

const ROLE_WORDS: &[&str] = &["CFA", "PHD", "MD", "ANALYST", "AUTHOR", "CONTACT", "TEAM"];

/// Why `name` looks like a department, desk or publisher rather than a person.
///
/// `None` means the candidate may be a person. Token count is checked
/// separately by the validator.
pub fn non_person_reason(name: &str, title: Option<&str>, email: Option<&str>) -> Option<&'static str> {
    if RE_INSTITUTIONAL_NAME.iter().any(|re| re.is_match(name)) {
        return Some("institutional name pattern");
    }
    let lower = name.to_lowercase();
    if INSTITUTIONAL_PHRASES.iter().any(|p| lower.contains(p)) {
        return Some("institutional phrase");
    }
    if email.is_some_and(|e| RE_GENERIC_MAILBOX.is_match(e.trim())) {
        return Some("department mailbox");
    }
    if title.is_some_and(|t| RE_DEPARTMENT_TITLE.is_match(t.trim())) {
        return Some("department title");
    }
    if ROLE_WORDS.contains(&name.trim().to_uppercase().as_str()) {
        return Some("bare role word");
    }

    let words: Vec<&str> = name.split_whitespace().collect();
    let has_credential_comma = words.iter().any(|w| w.ends_with(','));
    if words.len() <= 3
        && !has_credential_comma
        && words
            .iter()
            .any(|w| ORGANISATION_WORDS.contains(&w.to_lowercase().as_str()))
    {
        return Some("organisation keyword");
    }
    None
}

/// Number of name tokens once credentials are removed.
pub fn name_token_count(name: &str) -> usize {
    strip_credentials(name).split_whitespace().count()
}

// ── Byline fallbacks ─────────────────────────────────────────────────────────

/// `Name / Title / Phone / Email`, one author per match.
static RE_SLASH_BYLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"([A-Z][a-z]+[ \t]+[A-Z][a-zA-Z\-']+)\s*/\s*([^/\n]+?)\s*/\s*([\d\s+\-.()]+?)\s*/\s*([a-zA-Z0-9.\-_]+@[a-zA-Z0-9\-_.]+\.[a-zA-Z]{2,})",
    )
    .unwrap()
});

static RE_FORMER_ANALYST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i:former|previous)\s+(?i:analyst|author|coverage)\s+(?:(?i:was|by)\s+)?([A-Z][a-z]+\s+[A-Z][a-zA-Z\-']+)",
    )
    .unwrap()
});

/// Recover authors from plain text when no page produced a candidate.
///
/// Only layouts that are reliable in text form are tried: the slash-separated
/// Credit Suisse byline and former-analyst attributions in termination notes.
pub fn authors_from_text(text: &str, signals: &DocumentSignals) -> Vec<RawAuthor> {
    let mut out = Vec::new();

    if signals.institution.is_some_and(|i| i.key == "credit suisse") {
        for caps in RE_SLASH_BYLINE.captures_iter(text) {
            out.push(RawAuthor {
                name: caps[1].trim().to_string(),
                title: Some(caps[2].trim().to_string()),
                email: Some(caps[4].trim().to_string()),
            });
        }
    }

    if signals.doc_type == DocumentType::Termination || signals.termination {
        for caps in RE_FORMER_ANALYST.captures_iter(text) {
            out.push(RawAuthor {
                name: caps[1].trim().to_string(),
                title: Some("Former Analyst".to_string()),
                email: None,
            });
        }
    }

    out
}
