//! Error types for the report-authors library.
//!
//! Failures are split by how far they are allowed to travel:
//!
//! * [`ExtractError`]: **Fatal** for a document or for the whole run
//!   (unreadable PDF, no inference endpoint left, output file not writable).
//!   Document-level variants end up inside an
//!   [`crate::output::ExtractionOutcome::Failed`]; only
//!   [`ExtractError::NoEndpointsAvailable`] and sink/config errors abort a run.
//!
//! * [`PageError`]: **Non-fatal**: one page could not be rendered or its
//!   inference call failed after all retries. Stored next to the document's
//!   results so the remaining pages still count.
//!
//! * [`InferenceError`]: the result of a single request to an endpoint.
//!   The extraction client turns exhausted retries into a [`PageError`].
//!
//! * [`ParseError`]: the model answered but not with the expected JSON.
//!   Absorbed as "zero candidates" for that page.
//!
//! * [`Rejection`]: why a parsed candidate was dropped. Logged, never
//!   surfaced.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned by the report-authors library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file or directory was not found at the given path.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF could not be opened or parsed. Terminal for that document only.
    #[error("PDF '{path}' is unreadable: {detail}")]
    UnreadablePdf { path: PathBuf, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first run.\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Endpoint errors ───────────────────────────────────────────────────
    /// No inference endpoint answered the liveness probe. Nothing can proceed.
    #[error("No inference endpoints available ({probed} candidate(s) probed)")]
    NoEndpointsAvailable { probed: usize },

    // ── Metadata errors ───────────────────────────────────────────────────
    /// The metadata CSV could not be read.
    #[error("Failed to load metadata from '{path}': {detail}")]
    MetadataLoad { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or append to the output CSV.
    #[error("Failed to write output file '{path}': {detail}")]
    OutputWriteFailed { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Configuration file exists but could not be read or parsed.
    #[error("Failed to load configuration from '{path}': {detail}")]
    ConfigFile { path: PathBuf, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// The document keeps going unless every selected page ends up here.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation or image encoding failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Every attempt timed out.
    #[error("Page {page}: inference timed out after {attempts} attempt(s) of {secs}s")]
    InferenceTimeout {
        page: usize,
        attempts: u32,
        secs: u64,
    },

    /// Every attempt failed with a transport or server error.
    #[error("Page {page}: inference failed after {attempts} attempt(s): {detail}")]
    InferenceUnreachable {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// The endpoint pool had no healthy endpoint left to hand out.
    #[error("Page {page}: no inference endpoint available")]
    NoEndpoints { page: usize },
}

impl PageError {
    /// 1-based page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::InferenceTimeout { page, .. }
            | PageError::InferenceUnreachable { page, .. }
            | PageError::NoEndpoints { page } => *page,
        }
    }
}

/// Failure of one request to one endpoint. Every variant is retriable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    /// The request exceeded the configured timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection refused, DNS failure, reset, …
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// The service answered with a non-success HTTP status.
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    /// The response envelope was not `{"response": "..."}`.
    #[error("undecodable response envelope: {0}")]
    Decode(String),
}

/// The model's text did not contain the expected `{"authors": [...]}` object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// No balanced `{ ... }` block anywhere in the text.
    #[error("no JSON object in model output")]
    NoJsonObject,

    /// A balanced block was found but it is not valid JSON.
    #[error("invalid JSON in model output: {0}")]
    InvalidJson(String),

    /// Valid JSON, but no `authors` array of objects.
    #[error("model output does not match the authors schema: {0}")]
    SchemaMismatch(String),
}

/// Why a parsed candidate was dropped before aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Name empty after cleaning.
    EmptyName,
    /// Fewer than two space-separated tokens.
    SingleToken(String),
    /// Matches a configured skip-domain.
    SkipDomain { name: String, domain: String },
    /// Department, desk, institution boilerplate or a bare role word.
    NonPerson(String),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::EmptyName => write!(f, "empty name"),
            Rejection::SingleToken(n) => write!(f, "'{n}' is not a first/last name"),
            Rejection::SkipDomain { name, domain } => {
                write!(f, "'{name}' matches skip-domain '{domain}'")
            }
            Rejection::NonPerson(n) => write!(f, "'{n}' looks like an institution"),
        }
    }
}
