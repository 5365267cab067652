//! Prompt templates for author extraction, and the selector that fills them.
//!
//! Every template is plain text with `{placeholder}` slots:
//!
//! | placeholder              | value                                             |
//! |--------------------------|---------------------------------------------------|
//! | `{page_num}`             | 1-based page number                               |
//! | `{total_pages}`          | pages in the document                             |
//! | `{institution_specific}` | institution addendum, or empty                    |
//! | `{first_page_emphasis}`  | first-page addendum on page 1, or empty           |
//! | `{termination_specific}` | termination addendum for coverage drops, or empty |
//! | `{supporting_text}`      | truncated support text for the page               |
//!
//! Substitution is pure string replacement; unknown placeholders are left
//! untouched so a custom template cannot fail at run time.

use crate::output::PageUnit;
use crate::pipeline::classify::{DocumentSignals, DocumentType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Template for reports with several independently authored sections.
pub const COMPILATION_REPORT_PROMPT: &str = r#"You are reading page {page_num} of {total_pages} of a financial research compilation. Each section of this document may have its own author byline.

Identify only the TRUE AUTHORS of the research sections on this page: the analysts named in section bylines or in an author/analyst column of a table of contents.
{institution_specific}{first_page_emphasis}{termination_specific}
Rules:
- Report individual people only. Never report a department, desk, team or firm name (for example "Equity Research" or "Research Analysts").
- Do not report people who are only mentioned, quoted or thanked.
- Copy names exactly as printed, including credentials such as CFA.
- Use null for a title or e-mail that is not printed next to the name.

Text extracted from this part of the document, for reference:
"""{supporting_text}"""

Respond with JSON only, in exactly this shape:
{"authors": [{"name": "First Last", "title": "Job title or null", "email": "address or null"}]}
If there are no authors on this page respond with {"authors": []}."#;

/// Template for ordinary single-report documents.
pub const STANDARD_REPORT_PROMPT: &str = r#"You are reading page {page_num} of {total_pages} of a financial analyst research report.

Identify only the true authors of the report. Authors are usually listed at the top of the first page or in a contact block, typically one to three analysts with a title, phone number and e-mail address.
{institution_specific}{first_page_emphasis}{termination_specific}
Rules:
- Report individual people only. Never report a department, desk, team or firm name (for example "Equity Research" or "Research Analysts").
- Do not report people from disclaimers, distribution lists or company management quoted in the report.
- Copy names exactly as printed, including credentials such as CFA.
- Use null for a title or e-mail that is not printed next to the name.

Text extracted from this part of the document, for reference:
"""{supporting_text}"""

Respond with JSON only, in exactly this shape:
{"authors": [{"name": "First Last", "title": "Job title or null", "email": "address or null"}]}
If there are no authors on this page respond with {"authors": []}."#;

/// Added on page 1, where bylines usually sit.
pub const FIRST_PAGE_EMPHASIS: &str = "\nTHIS IS THE FIRST PAGE. Authors normally appear in the header area or the side bar at the very top; focus there first.\n";

/// Added for termination / coverage-drop documents.
pub const TERMINATION_ADDENDUM: &str = "\nThis appears to be a termination-of-coverage notice. Such notices are often attributed to a research department rather than to a person. Return an empty authors list unless an individual analyst is explicitly named as the author; a department attribution is NOT an author.\n";

/// Credit Suisse prints bylines as `Name / Title / Phone / Email`.
pub const CREDIT_SUISSE_ADDENDUM: &str = "\nThis is a Credit Suisse research report. Credit Suisse lists authors in the format `Name / Title / Phone / Email`, often under the heading \"Research Analysts\". Each such line is one author. The heading itself and entries like \"Credit Suisse US Eq. Res\" are not authors.\n";

/// Configurable prompt set. Missing keys in a config file keep the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    pub compilation_report: String,
    pub standard_report: String,
    pub first_page_emphasis: String,
    pub termination_specific: String,
    /// Addendum used for a detected institution without its own entry.
    /// `{institution}` is replaced by the institution's display name.
    pub institution_generic: String,
    /// Per-institution addenda keyed by institution key (`credit suisse`).
    pub institutions: BTreeMap<String, String>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        let mut institutions = BTreeMap::new();
        institutions.insert("credit suisse".to_string(), CREDIT_SUISSE_ADDENDUM.to_string());
        Self {
            compilation_report: COMPILATION_REPORT_PROMPT.to_string(),
            standard_report: STANDARD_REPORT_PROMPT.to_string(),
            first_page_emphasis: FIRST_PAGE_EMPHASIS.to_string(),
            termination_specific: TERMINATION_ADDENDUM.to_string(),
            institution_generic: "\nThis is a research report from {institution}.\n".to_string(),
            institutions,
        }
    }
}

/// Where in the document a prompt is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePosition {
    /// 1-based.
    pub page_num: usize,
    pub total_pages: usize,
    /// Gets the first-page emphasis addendum.
    pub is_first_page: bool,
}

impl PagePosition {
    /// Position of a rendered page within a document of `total_pages`.
    pub fn of(unit: &PageUnit, total_pages: usize) -> Self {
        Self {
            page_num: unit.page_index,
            total_pages,
            is_first_page: unit.is_first_page,
        }
    }
}

/// Build the prompt for one page.
///
/// `supporting_text` is cut to `max_support_chars` characters and whitespace
/// runs are collapsed, so a noisy text layer cannot crowd out the
/// instructions.
pub fn select(
    templates: &PromptTemplates,
    signals: &DocumentSignals,
    position: PagePosition,
    supporting_text: &str,
    max_support_chars: usize,
) -> String {
    let template = match signals.doc_type {
        DocumentType::Compilation => &templates.compilation_report,
        DocumentType::Standard | DocumentType::Termination => &templates.standard_report,
    };

    let institution_specific = match signals.institution {
        Some(inst) => templates
            .institutions
            .get(inst.key)
            .cloned()
            .unwrap_or_else(|| {
                templates
                    .institution_generic
                    .replace("{institution}", inst.display_name)
            }),
        None => String::new(),
    };

    let first_page_emphasis = if position.is_first_page {
        templates.first_page_emphasis.as_str()
    } else {
        ""
    };

    let termination_specific = if signals.termination {
        templates.termination_specific.as_str()
    } else {
        ""
    };

    let support: String = supporting_text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_support_chars)
        .collect();

    // Supporting text goes last: it comes from the PDF and may itself
    // contain something that looks like a placeholder.
    template
        .replace("{page_num}", &position.page_num.to_string())
        .replace("{total_pages}", &position.total_pages.to_string())
        .replace("{institution_specific}", &institution_specific)
        .replace("{first_page_emphasis}", first_page_emphasis)
        .replace("{termination_specific}", termination_specific)
        .replace("{supporting_text}", &support)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classify::detect_institution;

    fn pos(page_num: usize) -> PagePosition {
        PagePosition {
            page_num,
            total_pages: 7,
            is_first_page: page_num == 1,
        }
    }

    #[test]
    fn position_of_unit_carries_first_page_flag() {
        let unit = |page_index, is_first_page| PageUnit {
            page_index,
            image_bytes: vec![0xFF, 0xD8],
            support_text: String::new(),
            is_first_page,
        };
        let signals = DocumentSignals::default();
        let templates = PromptTemplates::default();

        let first = PagePosition::of(&unit(1, true), 4);
        assert_eq!(first.page_num, 1);
        assert_eq!(first.total_pages, 4);
        assert!(select(&templates, &signals, first, "", 100).contains("THIS IS THE FIRST PAGE"));

        let later = PagePosition::of(&unit(3, false), 4);
        assert!(!select(&templates, &signals, later, "", 100).contains("THIS IS THE FIRST PAGE"));
    }

    #[test]
    fn test_standard_template_is_default() {
        let p = select(
            &PromptTemplates::default(),
            &DocumentSignals::default(),
            pos(2),
            "",
            300,
        );
        assert!(p.contains("page 2 of 7"));
        assert!(p.contains("financial analyst research report"));
        assert!(!p.contains("THIS IS THE FIRST PAGE"));
        assert!(!p.contains("{page_num}") && !p.contains("{supporting_text}"));
    }

    #[test]
    fn test_compilation_template_selected() {
        let signals = DocumentSignals {
            doc_type: DocumentType::Compilation,
            ..DocumentSignals::default()
        };
        let p = select(&PromptTemplates::default(), &signals, pos(1), "", 300);
        assert!(p.contains("compilation"));
        assert!(p.contains("THIS IS THE FIRST PAGE"));
    }

    #[test]
    fn test_institution_addenda() {
        let t = PromptTemplates::default();
        let cs = DocumentSignals {
            institution: detect_institution("Credit Suisse"),
            ..DocumentSignals::default()
        };
        assert!(select(&t, &cs, pos(3), "", 300).contains("Name / Title / Phone / Email"));

        let ubs = DocumentSignals {
            institution: detect_institution("UBS Securities"),
            ..DocumentSignals::default()
        };
        assert!(select(&t, &ubs, pos(3), "", 300).contains("research report from UBS."));
    }

    #[test]
    fn test_termination_addendum() {
        let signals = DocumentSignals {
            termination: true,
            ..DocumentSignals::default()
        };
        let p = select(&PromptTemplates::default(), &signals, pos(1), "", 300);
        assert!(p.contains("termination-of-coverage notice"));
    }

    #[test]
    fn test_supporting_text_truncated_and_inert() {
        let text = format!("{{page_num}}  {}", "x".repeat(1000));
        let p = select(
            &PromptTemplates::default(),
            &DocumentSignals::default(),
            pos(4),
            &text,
            20,
        );
        assert!(p.contains(r#""""{page_num} xxxxxxxxx""""#));
        assert!(!p.contains(&"x".repeat(21)));
    }

    #[test]
    fn test_templates_deserialize_partially() {
        let t: PromptTemplates =
            serde_json::from_str(r#"{"standard_report": "page {page_num}: {supporting_text}"}"#)
                .unwrap();
        assert_eq!(t.compilation_report, COMPILATION_REPORT_PROMPT);
        let p = select(&t, &DocumentSignals::default(), pos(5), "Jane Doe", 300);
        assert_eq!(p, "page 5: Jane Doe");
    }
}
