//! Data model shared by the pipeline stages and the batch coordinator.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One PDF to process. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTask {
    pub file_path: PathBuf,
    /// Id extracted from the file name by the configured pattern, or the file stem.
    pub document_id: String,
    pub metadata_flags: MetadataFlags,
}

impl DocumentTask {
    /// File name used as the output key (`report_key_123.pdf`).
    pub fn pdf_filename(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_path.display().to_string())
    }
}

/// What the metadata source says about a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFlags {
    /// Whether the document id was found in the metadata source.
    pub in_metadata: bool,
    /// Lower-cased headline, when known.
    pub headline: Option<String>,
    /// Headline contains a configured skip term.
    pub termination: bool,
}

/// One rendered page plus its textual context. Consumed once.
#[derive(Debug, Clone, PartialEq)]
pub struct PageUnit {
    /// 1-based page number, unique within a document.
    pub page_index: usize,
    /// Encoded image (JPEG or PNG), never empty.
    pub image_bytes: Vec<u8>,
    /// This page's text followed by the text of up to K following pages.
    pub support_text: String,
    pub is_first_page: bool,
}

/// One author candidate parsed from a single page's model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateAuthor {
    pub name: String,
    pub title: Option<String>,
    pub email: Option<String>,
    /// 1-based page the candidate came from.
    pub source_page: usize,
    /// Position within that page's response; lower is earlier.
    pub confidence_rank: usize,
}

/// A final, merged author of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub document_id: String,
    pub name: String,
    pub title: Option<String>,
    pub email: Option<String>,
    pub page_found: usize,
}

/// Everything extracted from one page, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct PageExtraction {
    pub page_index: usize,
    pub candidates: Vec<CandidateAuthor>,
    pub error: Option<PageError>,
}

/// Terminal result of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    /// Aggregation ran. `failed_pages` is non-empty for a partial success.
    Success {
        authors: Vec<AuthorRecord>,
        failed_pages: Vec<PageError>,
    },
    Skipped { reason: String },
    Failed { error: String },
}

impl ExtractionOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        ExtractionOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        ExtractionOutcome::Failed {
            error: error.to_string(),
        }
    }

    /// The terminal state this outcome corresponds to.
    pub fn state(&self) -> DocumentState {
        match self {
            ExtractionOutcome::Success { failed_pages, .. } if failed_pages.is_empty() => {
                DocumentState::Succeeded
            }
            ExtractionOutcome::Success { .. } => DocumentState::PartiallyFailed,
            ExtractionOutcome::Skipped { .. } => DocumentState::Skipped,
            ExtractionOutcome::Failed { .. } => DocumentState::Failed,
        }
    }

    /// Authors of a successful outcome; empty otherwise.
    pub fn authors(&self) -> &[AuthorRecord] {
        match self {
            ExtractionOutcome::Success { authors, .. } => authors,
            _ => &[],
        }
    }
}

/// Per-document state machine.
///
/// `Pending → Rendering → Extracting → Aggregating → terminal`. Nothing is
/// persisted before a terminal state, so every non-`Pending` state can be
/// retried on the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Pending,
    Rendering,
    Extracting { page: usize, of: usize },
    Aggregating,
    Succeeded,
    PartiallyFailed,
    Failed,
    Skipped,
}

impl DocumentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentState::Succeeded
                | DocumentState::PartiallyFailed
                | DocumentState::Failed
                | DocumentState::Skipped
        )
    }

    /// Label written to the `status` column of the output CSV.
    pub fn label(&self) -> &'static str {
        match self {
            DocumentState::Pending => "pending",
            DocumentState::Rendering => "rendering",
            DocumentState::Extracting { .. } => "extracting",
            DocumentState::Aggregating => "aggregating",
            DocumentState::Succeeded => "succeeded",
            DocumentState::PartiallyFailed => "partially_failed",
            DocumentState::Failed => "failed",
            DocumentState::Skipped => "skipped",
        }
    }
}

/// Counts reported at the end of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub partially_failed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub authors: usize,
    pub duration_ms: u64,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: &ExtractionOutcome) {
        match outcome.state() {
            DocumentState::Succeeded => self.succeeded += 1,
            DocumentState::PartiallyFailed => self.partially_failed += 1,
            DocumentState::Failed => self.failed += 1,
            DocumentState::Skipped => self.skipped += 1,
            _ => {}
        }
        self.authors += outcome.authors().len();
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.partially_failed + self.failed + self.skipped
    }
}

/// A document paired with its terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub task: DocumentTask,
    pub outcome: ExtractionOutcome,
}

/// Everything a batch run produced, in completion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub documents: Vec<DocumentReport>,
    pub summary: BatchSummary,
}
