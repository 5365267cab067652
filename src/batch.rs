//! Batch coordinator: from a folder of PDFs to one persisted outcome per
//! document.
//!
//! ## Order of decisions
//!
//! 1. **Resume**: files the sink already holds a non-failed outcome for are
//!    reported as `Skipped("already processed")` and not written again.
//! 2. **Cap**: `max_files` bounds the remaining documents, in file-name order.
//! 3. **Metadata**: with filtering on and a metadata source loaded, a
//!    document absent from the source or whose headline contains a skip term
//!    is `Skipped` and recorded.
//! 4. **Discovery**: the endpoint pool is probed before any document runs.
//!    No healthy endpoint means the run fails without attempting anything.
//! 5. **Dispatch**: documents run concurrently, at most
//!    `healthy endpoints × per_endpoint_concurrency` at a time. Outcomes are
//!    written by this single consumer as documents finish.
//!
//! If the pool runs dry mid-run, the affected document triggers one
//! re-discovery and is retried once; when no endpoint comes back the run
//! stops with [`ExtractError::NoEndpointsAvailable`]. Outcomes already
//! recorded stay on disk and the unfinished documents are picked up by the
//! next run.

use crate::config::ExtractionConfig;
use crate::document::{process_document, DocumentContext};
use crate::error::ExtractError;
use crate::metadata::MetadataIndex;
use crate::output::{BatchReport, BatchSummary, DocumentReport, DocumentTask, ExtractionOutcome};
use crate::pipeline::inference::InferenceBackend;
use crate::pipeline::input::{discover_documents, document_id};
use crate::pipeline::render::DocumentRenderer;
use crate::pool::EndpointPool;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::sink::OutcomeSink;
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Documents split by what the coordinator decided before dispatch.
#[derive(Debug, Default)]
pub struct BatchPlan {
    /// Already processed in an earlier run; reported, not re-recorded.
    pub resumed: Vec<DocumentTask>,
    /// Skipped by metadata filtering, with the reason.
    pub filtered: Vec<(DocumentTask, String)>,
    /// Sent through the pipeline.
    pub dispatch: Vec<DocumentTask>,
}

impl BatchPlan {
    /// Documents that get an outcome this run.
    pub fn total(&self) -> usize {
        self.resumed.len() + self.filtered.len() + self.dispatch.len()
    }
}

/// Drives a whole batch. Owns the endpoint pool.
pub struct BatchCoordinator {
    config: ExtractionConfig,
    backend: Arc<dyn InferenceBackend>,
    renderer: Arc<dyn DocumentRenderer>,
    sink: Arc<dyn OutcomeSink>,
    progress: ProgressCallback,
    pool: EndpointPool,
}

impl BatchCoordinator {
    pub fn new(
        config: ExtractionConfig,
        backend: Arc<dyn InferenceBackend>,
        renderer: Arc<dyn DocumentRenderer>,
        sink: Arc<dyn OutcomeSink>,
    ) -> Self {
        let pool = EndpointPool::new(config.discovery.clone(), config.failure_threshold);
        Self {
            config,
            backend,
            renderer,
            sink,
            progress: Arc::new(NoopProgressCallback),
            pool,
        }
    }

    /// Attach a progress callback.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Process a single PDF or every PDF in a directory.
    pub async fn run(&self, input: &Path) -> Result<BatchReport, ExtractError> {
        let files = discover_documents(input)?;
        info!("Found {} PDF file(s) under {}", files.len(), input.display());
        self.run_files(files).await
    }

    /// Process an explicit list of PDFs, in the given order.
    pub async fn run_files(&self, files: Vec<PathBuf>) -> Result<BatchReport, ExtractError> {
        let start = Instant::now();
        let plan = self.plan(files)?;
        info!(
            "Batch plan: {} to process, {} already processed, {} filtered by metadata",
            plan.dispatch.len(),
            plan.resumed.len(),
            plan.filtered.len()
        );

        if !plan.dispatch.is_empty() {
            let healthy = self.pool.discover(self.backend.as_ref()).await;
            if healthy.is_empty() {
                return Err(ExtractError::NoEndpointsAvailable {
                    probed: self.pool.candidate_count(),
                });
            }
        }

        self.progress.on_batch_start(plan.total());
        let mut report = BatchReport::default();

        for task in plan.resumed {
            let outcome = ExtractionOutcome::skipped("already processed");
            self.finish(&mut report, task, outcome, false)?;
        }
        for (task, reason) in plan.filtered {
            self.finish(&mut report, task, ExtractionOutcome::skipped(reason), true)?;
        }

        if !plan.dispatch.is_empty() {
            let parallelism = (self.pool.healthy_count() * self.config.per_endpoint_concurrency).max(1);
            debug!("Dispatching with parallelism {}", parallelism);

            let ctx = DocumentContext {
                config: &self.config,
                backend: self.backend.as_ref(),
                pool: &self.pool,
                renderer: Arc::clone(&self.renderer),
            };
            let ctx = &ctx;

            let mut outcomes = stream::iter(plan.dispatch.into_iter().map(|task| async move {
                self.progress.on_document_start(&task);
                let result = self.process_with_rediscovery(ctx, &task).await;
                (task, result)
            }))
            .buffer_unordered(parallelism);

            while let Some((task, result)) = outcomes.next().await {
                let outcome = result?;
                self.finish(&mut report, task, outcome, true)?;
            }
        }

        report.summary.duration_ms = start.elapsed().as_millis() as u64;
        log_summary(&report.summary);
        self.progress.on_batch_complete(&report.summary);
        Ok(report)
    }

    /// Decide, without touching the network, what happens to each file.
    pub fn plan(&self, files: Vec<PathBuf>) -> Result<BatchPlan, ExtractError> {
        let id_pattern = Regex::new(&self.config.id_pattern)
            .map_err(|e| ExtractError::InvalidConfig(format!("id_pattern: {}", e)))?;
        let metadata = self.load_metadata()?;

        let mut plan = BatchPlan::default();
        let mut pending = Vec::new();
        for file_path in files {
            let id = document_id(&file_path, &id_pattern);
            let metadata_flags = metadata
                .as_ref()
                .map(|m| m.flags_for(&id, &self.config.skip_terms))
                .unwrap_or_default();
            let task = DocumentTask {
                file_path,
                document_id: id,
                metadata_flags,
            };
            if self.config.skip_processed_files && self.sink.is_processed(&task.pdf_filename()) {
                debug!("{}: already processed", task.pdf_filename());
                plan.resumed.push(task);
            } else {
                pending.push(task);
            }
        }

        if self.config.max_files > 0 && pending.len() > self.config.max_files {
            info!(
                "Limiting this run to {} of {} remaining file(s)",
                self.config.max_files,
                pending.len()
            );
            pending.truncate(self.config.max_files);
        }

        for task in pending {
            match metadata.as_ref().and_then(|_| skip_reason(&task)) {
                Some(reason) => {
                    info!("Skipping {}: {}", task.pdf_filename(), reason);
                    plan.filtered.push((task, reason.to_string()));
                }
                None => plan.dispatch.push(task),
            }
        }
        Ok(plan)
    }

    fn load_metadata(&self) -> Result<Option<MetadataIndex>, ExtractError> {
        if !self.config.features.metadata_filtering {
            return Ok(None);
        }
        match &self.config.metadata_csv {
            Some(path) => MetadataIndex::from_csv(path).map(Some),
            None => {
                warn!("Metadata filtering is enabled but no metadata CSV is configured; not filtering");
                Ok(None)
            }
        }
    }

    async fn process_with_rediscovery(
        &self,
        ctx: &DocumentContext<'_>,
        task: &DocumentTask,
    ) -> Result<ExtractionOutcome, ExtractError> {
        match process_document(ctx, task).await {
            Err(ExtractError::NoEndpointsAvailable { .. }) => {
                warn!("{}: endpoint pool exhausted; re-discovering", task.pdf_filename());
                if self.pool.discover(self.backend.as_ref()).await.is_empty() {
                    return Err(ExtractError::NoEndpointsAvailable {
                        probed: self.pool.candidate_count(),
                    });
                }
                process_document(ctx, task).await
            }
            other => other,
        }
    }

    fn finish(
        &self,
        report: &mut BatchReport,
        task: DocumentTask,
        outcome: ExtractionOutcome,
        persist: bool,
    ) -> Result<(), ExtractError> {
        if persist {
            self.sink.record(&task, &outcome)?;
        }
        report.summary.record(&outcome);
        self.progress.on_document_complete(&task, &outcome);
        report.documents.push(DocumentReport { task, outcome });
        Ok(())
    }
}

/// Metadata skip reason for a task, given that a source is loaded.
fn skip_reason(task: &DocumentTask) -> Option<&'static str> {
    if !task.metadata_flags.in_metadata {
        Some("metadata: not found")
    } else if task.metadata_flags.termination {
        Some("metadata: termination")
    } else {
        None
    }
}

fn log_summary(summary: &BatchSummary) {
    info!(
        "Batch complete: {} succeeded, {} partially failed, {} failed, {} skipped, {} author(s) in {}ms",
        summary.succeeded,
        summary.partially_failed,
        summary.failed,
        summary.skipped,
        summary.authors,
        summary.duration_ms
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MetadataFlags;
    use crate::pipeline::render::PdfiumRenderer;
    use crate::pipeline::inference::OllamaClient;
    use crate::sink::MemorySink;

    fn coordinator(config: ExtractionConfig, sink: Arc<dyn OutcomeSink>) -> BatchCoordinator {
        BatchCoordinator::new(
            config,
            Arc::new(OllamaClient::new()),
            Arc::new(PdfiumRenderer),
            sink,
        )
    }

    fn files(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from(format!("/in/{n}"))).collect()
    }

    #[test]
    fn test_plan_resume_then_cap() {
        let config = ExtractionConfig::builder().max_files(2).build().unwrap();
        let sink = Arc::new(MemorySink::with_processed(["a_key_1.pdf"]));
        let plan = coordinator(config, sink)
            .plan(files(&["a_key_1.pdf", "b_key_2.pdf", "c_key_3.pdf", "d_key_4.pdf"]))
            .unwrap();

        assert_eq!(plan.resumed.len(), 1);
        let ids: Vec<&str> = plan.dispatch.iter().map(|t| t.document_id.as_str()).collect();
        assert_eq!(ids, vec!["key_2", "key_3"]);
        assert_eq!(plan.total(), 3);
    }

    #[test]
    fn test_plan_without_resume_keeps_processed_files() {
        let config = ExtractionConfig::builder()
            .skip_processed_files(false)
            .build()
            .unwrap();
        let sink = Arc::new(MemorySink::with_processed(["a_key_1.pdf"]));
        let plan = coordinator(config, sink).plan(files(&["a_key_1.pdf"])).unwrap();
        assert!(plan.resumed.is_empty());
        assert_eq!(plan.dispatch.len(), 1);
    }

    #[test]
    fn test_plan_without_metadata_source_does_not_filter() {
        let config = ExtractionConfig::default();
        let plan = coordinator(config, Arc::new(MemorySink::new()))
            .plan(files(&["x.pdf"]))
            .unwrap();
        assert_eq!(plan.dispatch.len(), 1);
        assert_eq!(plan.dispatch[0].document_id, "x");
        assert_eq!(plan.dispatch[0].metadata_flags, MetadataFlags::default());
    }

    #[test]
    fn test_skip_reason() {
        let mut task = DocumentTask {
            file_path: PathBuf::from("key_1.pdf"),
            document_id: "key_1".into(),
            metadata_flags: MetadataFlags::default(),
        };
        assert_eq!(skip_reason(&task), Some("metadata: not found"));
        task.metadata_flags.in_metadata = true;
        assert_eq!(skip_reason(&task), None);
        task.metadata_flags.termination = true;
        assert_eq!(skip_reason(&task), Some("metadata: termination"));
    }
}
