//! # report-authors
//!
//! Extract analyst author metadata (name, title, e-mail) from research-report
//! PDFs with a vision language model served by a pool of inference endpoints.
//!
//! ## Why render pages instead of parsing text?
//!
//! Analyst bylines live in side bars, header blocks and contact boxes whose
//! reading order a text extractor scrambles, and many reports are scans with
//! no usable text layer at all. Each selected page is rasterised and shown to
//! a VLM; the page's own text is only passed along as supporting context.
//!
//! ## Pipeline Overview
//!
//! ```text
//! folder of PDFs
//!  │
//!  ├─ 1. Plan      resume, max_files cap, metadata filtering
//!  ├─ 2. Pool      probe endpoints, hand them out least-recently-used
//!  ├─ 3. Render    rasterise selected pages via pdfium (spawn_blocking)
//!  ├─ 4. Classify  compilation / termination / institution signals
//!  ├─ 5. Extract   prompt → VLM → lenient JSON → validated candidates
//!  ├─ 6. Merge     dedup by name, page-1 priority, credential union
//!  └─ 7. Persist   one CSV row per author, flushed per document
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use report_authors::{BatchCoordinator, CsvSink, ExtractionConfig, OllamaClient, PdfiumRenderer};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::default();
//!     let sink = Arc::new(CsvSink::open(&config.output_csv)?);
//!     let coordinator = BatchCoordinator::new(
//!         config,
//!         Arc::new(OllamaClient::new()),
//!         Arc::new(PdfiumRenderer),
//!         sink,
//!     );
//!     let report = coordinator.run(Path::new("reports/")).await?;
//!     eprintln!("{} author(s) found", report.summary.authors);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `report-authors` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! report-authors = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod prompts;
pub mod sink;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{BatchCoordinator, BatchPlan};
pub use config::{
    DiscoveryMode, EndpointDiscovery, ExtractionConfig, ExtractionConfigBuilder, FeatureToggles,
    ImageEncoding, PagePolicy, PageSelection,
};
pub use document::{process_document, DocumentContext};
pub use error::{ExtractError, InferenceError, PageError, ParseError, Rejection};
pub use metadata::MetadataIndex;
pub use output::{
    AuthorRecord, BatchReport, BatchSummary, CandidateAuthor, DocumentReport, DocumentState,
    DocumentTask, ExtractionOutcome, MetadataFlags, PageExtraction, PageUnit,
};
pub use pipeline::inference::{InferenceBackend, InferenceRequest, OllamaClient};
pub use pipeline::render::{DocumentRenderer, PdfiumRenderer, RenderOptions, RenderedDocument};
pub use pool::{Endpoint, EndpointPool, HealthState};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use prompts::PromptTemplates;
pub use sink::{CsvSink, MemorySink, OutcomeSink, OutputRow};
