//! Per-document extraction: one PDF in, one terminal outcome out.
//!
//! ```text
//! Pending ──▶ Rendering ──▶ Extracting(1..N) ──▶ Aggregating ──▶ Succeeded
//!                 │                 │                         ├─▶ PartiallyFailed
//!                 └──── Failed ◀────┘ (no page survived)
//! ```
//!
//! Pages of one document are sent one after another on the endpoint the
//! document was assigned; parallelism comes from running many documents at
//! once. Page failures are collected, not propagated. The only error that
//! leaves this module is [`ExtractError::NoEndpointsAvailable`], because the
//! batch must react to it (re-discover or abort) rather than record it.

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, PageError};
use crate::output::{DocumentState, DocumentTask, ExtractionOutcome, PageExtraction};
use crate::pipeline::aggregate::merge;
use crate::pipeline::classify::{authors_from_text, DocumentSignals};
use crate::pipeline::extract::{validate_all, ExtractionClient, ValidationRules};
use crate::pipeline::inference::InferenceBackend;
use crate::pipeline::input::check_pdf_magic;
use crate::pipeline::render::{render_document, DocumentRenderer, RenderOptions};
use crate::pool::EndpointPool;
use crate::prompts::{self, PagePosition};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Shared collaborators for every document of a batch.
pub struct DocumentContext<'a> {
    pub config: &'a ExtractionConfig,
    pub backend: &'a dyn InferenceBackend,
    pub pool: &'a EndpointPool,
    pub renderer: Arc<dyn DocumentRenderer>,
}

fn transition(task: &DocumentTask, state: DocumentState) {
    debug!("{}: → {:?}", task.pdf_filename(), state);
}

/// Run one document through render → extract → aggregate.
///
/// # Errors
/// Only [`ExtractError::NoEndpointsAvailable`], when the pool has nothing to
/// hand out as extraction starts. A pool drained by this document's own
/// retries fails the document, not the batch; every other failure is an
/// [`ExtractionOutcome::Failed`] too.
pub async fn process_document(
    ctx: &DocumentContext<'_>,
    task: &DocumentTask,
) -> Result<ExtractionOutcome, ExtractError> {
    let start = Instant::now();
    let config = ctx.config;
    let filename = task.pdf_filename();
    info!("Processing {} (id {})", filename, task.document_id);

    // ── Rendering ────────────────────────────────────────────────────────
    transition(task, DocumentState::Rendering);
    if let Err(e) = check_pdf_magic(&task.file_path) {
        warn!("{}: {}", filename, e);
        return Ok(ExtractionOutcome::failed(e));
    }
    let options = RenderOptions::from_config(config);
    let rendered = match render_document(Arc::clone(&ctx.renderer), &task.file_path, &options).await {
        Ok(r) => r,
        Err(e) => {
            warn!("{}: {}", filename, e);
            return Ok(ExtractionOutcome::failed(e));
        }
    };
    if rendered.pages.is_empty() {
        let detail = rendered
            .page_errors
            .first()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no pages selected".into());
        return Ok(ExtractionOutcome::failed(format!(
            "no page of {} could be rendered: {}",
            rendered.total_pages, detail
        )));
    }

    let signals = DocumentSignals::detect(&rendered.opening_text, &task.metadata_flags, &config.features);
    debug!(
        "{}: type {:?}, institution {:?}, termination {}",
        filename,
        signals.doc_type,
        signals.institution.map(|i| i.display_name),
        signals.termination
    );

    // ── Extracting ───────────────────────────────────────────────────────
    let mut endpoint = ctx.pool.acquire()?;
    let rules = ValidationRules {
        skip_domains: &config.skip_domains,
        email_validation: config.features.email_validation,
        institution: signals.institution,
    };
    let client = ExtractionClient {
        backend: ctx.backend,
        pool: ctx.pool,
        model: &config.model,
        timeout: config.request_timeout(),
        retry: config.retry_policy(),
    };

    let of = rendered.pages.len();
    let mut extractions: Vec<PageExtraction> = Vec::with_capacity(of);
    for (i, unit) in rendered.pages.iter().enumerate() {
        transition(task, DocumentState::Extracting { page: i + 1, of });
        let prompt = prompts::select(
            &config.prompts,
            &signals,
            PagePosition::of(unit, rendered.total_pages),
            &unit.support_text,
            config.support_text_chars,
        );
        extractions.push(client.extract(unit, prompt, &mut endpoint, &rules).await);
    }

    let mut failed_pages: Vec<PageError> = rendered.page_errors.clone();
    failed_pages.extend(extractions.iter().filter_map(|e| e.error.clone()));
    failed_pages.sort_by_key(PageError::page);

    let succeeded = extractions.iter().filter(|e| e.error.is_none()).count();
    if succeeded == 0 {
        let first = failed_pages.first().map(|e| e.to_string()).unwrap_or_default();
        warn!("{}: every page failed", filename);
        return Ok(ExtractionOutcome::failed(format!(
            "all {} selected page(s) failed; first: {}",
            rendered.selected_pages(),
            first
        )));
    }

    // Nothing from the model: try byline patterns in the opening text.
    if extractions.iter().all(|e| e.candidates.is_empty()) {
        let raw = authors_from_text(&rendered.opening_text, &signals);
        if !raw.is_empty() {
            let candidates = validate_all(&raw, 1, &rules);
            info!("{}: {} author(s) recovered from text", filename, candidates.len());
            extractions.push(PageExtraction {
                page_index: 1,
                candidates,
                error: None,
            });
        }
    }

    // ── Aggregating ──────────────────────────────────────────────────────
    transition(task, DocumentState::Aggregating);
    let authors = merge(
        &task.document_id,
        &extractions,
        config.features.prioritize_first_page,
    );

    let outcome = ExtractionOutcome::Success {
        authors,
        failed_pages,
    };
    info!(
        "{}: {} author(s), {} in {}ms",
        filename,
        outcome.authors().len(),
        outcome.state().label(),
        start.elapsed().as_millis()
    );
    Ok(outcome)
}
