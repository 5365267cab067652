//! Post-processing: deterministic cleanup of model-reported author fields.
//!
//! Vision models read bylines well but report them with the page furniture
//! still attached: `"JOHN SMITH, CFA  WELLS FARGO SECURITIES, LLC"`,
//! titles carrying phone numbers, two e-mail addresses glued together, and so
//! on. Every rule here is a pure `&str → String` pass over a single field so
//! it can be tested without a model.
//!
//! ## Rule order (names)
//!
//! Collapse whitespace before length checks, cut boilerplate before
//! normalising credentials (the boilerplate list contains words that look like
//! credentials in other contexts), and strip digits last so a generational
//! suffix can still protect them.

use once_cell::sync::Lazy;
use regex::Regex;

/// Names longer than this are treated as page furniture and cut down.
pub const MAX_NAME_LENGTH: usize = 70;

/// Professional credentials recognised in names, in canonical spelling.
pub const CREDENTIALS: [&str; 3] = ["CFA", "PhD", "MD"];

// ── Names ────────────────────────────────────────────────────────────────────

/// Clean a raw author name.
///
/// 1. Collapse whitespace
/// 2. Shorten over-long names at a parenthesis or a non-credential comma
/// 3. Cut everything from the first organisational keyword onwards
/// 4. Trim stray punctuation and normalise credentials
/// 5. Keep only the first five tokens if still over-long
/// 6. Drop digits unless a generational suffix (`Jr`, `III`, …) is present
pub fn clean_name(raw: &str) -> String {
    let mut name = collapse_whitespace(raw);

    if name.chars().count() > MAX_NAME_LENGTH {
        name = shorten_long_name(&name);
    }

    name = RE_NAME_BOILERPLATE.replace(&name, "").into_owned();
    name = trim_name_punctuation(&name);
    name = normalize_credentials(&name);

    if name.chars().count() > MAX_NAME_LENGTH {
        let first_five: Vec<&str> = name.split_whitespace().take(5).collect();
        name = normalize_credentials(&trim_name_punctuation(&first_five.join(" ")));
    }

    if !RE_GENERATIONAL_SUFFIX.is_match(&name) {
        name = RE_DIGITS.replace_all(&name, "").into_owned();
    }

    collapse_whitespace(&name)
}

static RE_NAME_BOILERPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:SECURITIES|LLC|EQUITY|RESEARCH|DEPARTMENT|NEWSLETTER|WELLS FARGO|CORPORATION|CORP|INC|LTD|COMPANY|SECTION|CONTENTS|DISCLAIMER|DISCLOSURES|PUBLICATION|PAGE|REPORT|TMT|EDITION|CONFERENCE|MARKET|GLOBAL|STRATEGY|INVESTMENT|BANKING|GROUP|ASSOCIATES|ANALYSIS|CONTACT|INFORMATION|APPENDIX|INDEX)\b.*$",
    )
    .unwrap()
});

static RE_GENERATIONAL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:Jr\.?|Sr\.?|I{2,3}|IV|V)\b").unwrap());

static RE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

static RE_LONG_NAME_CUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s\(").unwrap());

fn shorten_long_name(name: &str) -> String {
    if let Some(m) = RE_LONG_NAME_CUT.find(name) {
        return name[..m.start()].to_string();
    }
    if let Some((head, tail)) = name.split_once(',') {
        let tail_lower = tail.to_lowercase();
        let keeps_tail = ["cfa", "phd", "md", "analyst", "director"]
            .iter()
            .any(|w| tail_lower.contains(w));
        if !keeps_tail {
            return head.trim().to_string();
        }
    }
    name.to_string()
}

fn trim_name_punctuation(name: &str) -> String {
    name.trim_matches(|c: char| c == '.' || c == ',' || c.is_whitespace())
        .to_string()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Credentials ──────────────────────────────────────────────────────────────

static RE_COMMA_SPACING: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*,\s*").unwrap());
static RE_CFA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bcfa\b").unwrap());
static RE_PHD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bph\.?d\b\.?").unwrap());
static RE_MD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bmd\b").unwrap());

/// `"jane doe ,cfa, phd"` → `"jane doe, CFA, PhD"`.
pub fn normalize_credentials(name: &str) -> String {
    let s = RE_COMMA_SPACING.replace_all(name, ", ");
    let s = RE_CFA.replace_all(&s, "CFA");
    let s = RE_PHD.replace_all(&s, "PhD");
    let s = RE_MD.replace_all(&s, "MD");
    s.trim().to_string()
}

static RE_CREDENTIAL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i),?\s*\b(?:CFA|PhD|Ph\.D|MD)\b\.?").unwrap());

/// Credentials present in `name`, in [`CREDENTIALS`] order.
pub fn credentials_of(name: &str) -> Vec<&'static str> {
    let normalized = normalize_credentials(name);
    let words: Vec<&str> = normalized
        .split(|c: char| c == ',' || c.is_whitespace())
        .collect();
    CREDENTIALS
        .iter()
        .copied()
        .filter(|cred| words.contains(cred))
        .collect()
}

/// `name` without credentials and without anything after a remaining comma.
pub fn strip_credentials(name: &str) -> String {
    let stripped = RE_CREDENTIAL_SUFFIX.replace_all(name, "");
    let head = stripped.split(',').next().unwrap_or_default();
    collapse_whitespace(head)
}

/// Dedup key: credential-free, lower-cased, whitespace-collapsed.
pub fn name_key(name: &str) -> String {
    strip_credentials(name).to_lowercase()
}

/// Rebuild a display name from its base and a credential set.
pub fn with_credentials(base: &str, credentials: &[&str]) -> String {
    if credentials.is_empty() {
        base.to_string()
    } else {
        format!("{}, {}", base, credentials.join(", "))
    }
}

// ── Titles ───────────────────────────────────────────────────────────────────

static RE_PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\([^)]*\)").unwrap());
static RE_PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+\d{1,2}\s?)?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}").unwrap()
});
static RE_EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());

/// Clean a title and move any credential it carries onto the name.
///
/// Returns the (possibly extended) name and the title, `None` when nothing
/// meaningful is left.
pub fn clean_title(name: &str, raw_title: &str) -> (String, Option<String>) {
    // Phones first: "(212) 555-1234" would otherwise lose its area code as a parenthetical.
    let title = RE_PHONE.replace_all(raw_title, "");
    let title = RE_EMAIL.replace_all(&title, "");
    let title = RE_PARENTHETICAL.replace_all(&title, "");
    let mut title = collapse_whitespace(&title);
    let mut name = name.to_string();

    let in_title = credentials_of(&title);
    let in_name = credentials_of(&name);
    for cred in in_title {
        if !in_name.contains(&cred) {
            name = format!("{name}, {cred}");
        }
    }
    if !credentials_of(&title).is_empty() {
        title = collapse_whitespace(&RE_CREDENTIAL_SUFFIX.replace_all(&title, ""));
    }

    let name = normalize_credentials(&name);
    let title = title
        .trim_matches(|c: char| c == ',' || c == '/' || c == '|' || c.is_whitespace())
        .to_string();
    (name, (!title.is_empty()).then_some(title))
}

// ── E-mail ───────────────────────────────────────────────────────────────────

static RE_LOCAL_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z0-9._-]+)(?:@[^\s]*)?$").unwrap());

/// First syntactically valid address in `raw`, if any.
pub fn clean_email(raw: &str) -> Option<String> {
    RE_EMAIL.find(raw).map(|m| m.as_str().to_string())
}

/// Rewrite an address whose domain is missing or malformed.
///
/// `jsmith` and `jsmith@wellsfargo` become `jsmith@wellsfargo.com`; an address
/// that already has a dotted domain is returned unchanged.
pub fn correct_email_domain(raw: &str, institution_domain: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(valid) = clean_email(raw) {
        return Some(valid);
    }
    RE_LOCAL_PART
        .captures(raw)
        .map(|caps| format!("{}@{}", &caps[1], institution_domain))
}
