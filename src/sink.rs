//! Output sinks: where terminal document outcomes are persisted.
//!
//! A sink is written by a single consumer in the batch coordinator, one
//! document at a time, and only after the document reached a terminal
//! state. Nothing for a document is on disk before that, so an interrupted
//! run can simply be restarted.
//!
//! ## Resume
//!
//! A file counts as processed when the sink holds any row for it whose
//! status is not `failed`. Failed documents are therefore retried by the
//! next run, and their earlier `failed` row stays as history.

use crate::error::ExtractError;
use crate::output::{DocumentTask, ExtractionOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// One row of the output CSV.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRow {
    pub pdf_filename: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_title: String,
    #[serde(default)]
    pub author_email: String,
    /// 1-based page, or empty when the row carries no author.
    #[serde(default)]
    pub page_found: String,
    /// Terminal state label; rows written by older tools may leave it empty.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub detail: String,
}

impl OutputRow {
    fn counts_as_processed(&self) -> bool {
        self.status != "failed"
    }
}

/// Rows persisted for one document.
///
/// One row per author; a single author-less row when there is nothing else
/// to show, so every document stays visible in the output.
pub fn rows_for(task: &DocumentTask, outcome: &ExtractionOutcome) -> Vec<OutputRow> {
    let pdf_filename = task.pdf_filename();
    let status = outcome.state().label().to_string();
    let bare = |detail: String| OutputRow {
        pdf_filename: pdf_filename.clone(),
        status: status.clone(),
        detail,
        ..OutputRow::default()
    };

    match outcome {
        ExtractionOutcome::Success {
            authors,
            failed_pages,
        } => {
            let detail = if failed_pages.is_empty() {
                String::new()
            } else {
                let pages: Vec<String> = failed_pages.iter().map(|e| e.page().to_string()).collect();
                format!("failed pages: {}", pages.join(" "))
            };
            if authors.is_empty() {
                let detail = if detail.is_empty() {
                    "no authors found".to_string()
                } else {
                    format!("no authors found; {detail}")
                };
                return vec![bare(detail)];
            }
            authors
                .iter()
                .map(|a| OutputRow {
                    pdf_filename: pdf_filename.clone(),
                    author_name: a.name.clone(),
                    author_title: a.title.clone().unwrap_or_default(),
                    author_email: a.email.clone().unwrap_or_default(),
                    page_found: a.page_found.to_string(),
                    status: status.clone(),
                    detail: detail.clone(),
                })
                .collect()
        }
        ExtractionOutcome::Skipped { reason } => vec![bare(reason.clone())],
        // Error messages may carry a multi-line hint; keep the first line.
        ExtractionOutcome::Failed { error } => {
            vec![bare(error.lines().next().unwrap_or_default().to_string())]
        }
    }
}

/// Destination of terminal outcomes.
pub trait OutcomeSink: Send + Sync {
    /// Whether `pdf_filename` already has a non-failed outcome.
    fn is_processed(&self, pdf_filename: &str) -> bool;

    /// Persist one document's outcome. Must be durable when it returns.
    fn record(&self, task: &DocumentTask, outcome: &ExtractionOutcome) -> Result<(), ExtractError>;
}

/// Appends rows to a CSV file and flushes after every document.
pub struct CsvSink {
    path: PathBuf,
    writer: Mutex<csv::Writer<std::fs::File>>,
    processed: Mutex<HashSet<String>>,
}

impl CsvSink {
    /// Open `path` for appending, loading already-processed file names.
    ///
    /// The header is written only when the file is new or empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ExtractError> {
        let path = path.as_ref().to_path_buf();
        let write_err = |detail: String| ExtractError::OutputWriteFailed {
            path: path.clone(),
            detail,
        };

        let existing_len = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let processed = if existing_len > 0 {
            load_processed(&path)?
        } else {
            HashSet::new()
        };
        if !processed.is_empty() {
            info!(
                "{} file(s) already processed according to {}",
                processed.len(),
                path.display()
            );
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| write_err(e.to_string()))?;
        let writer = csv::WriterBuilder::new()
            .has_headers(existing_len == 0)
            .from_writer(file);

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            processed: Mutex::new(processed),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// File names with at least one non-failed row in an existing output CSV.
fn load_processed(path: &Path) -> Result<HashSet<String>, ExtractError> {
    let read_err = |detail: String| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        detail: format!("cannot read existing results: {detail}"),
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| read_err(e.to_string()))?;

    let mut processed = HashSet::new();
    for row in reader.deserialize::<OutputRow>() {
        let row = row.map_err(|e| read_err(e.to_string()))?;
        if row.counts_as_processed() {
            processed.insert(row.pdf_filename);
        }
    }
    Ok(processed)
}

impl OutcomeSink for CsvSink {
    fn is_processed(&self, pdf_filename: &str) -> bool {
        self.processed
            .lock()
            .map(|set| set.contains(pdf_filename))
            .unwrap_or(false)
    }

    fn record(&self, task: &DocumentTask, outcome: &ExtractionOutcome) -> Result<(), ExtractError> {
        let write_err = |detail: String| ExtractError::OutputWriteFailed {
            path: self.path.clone(),
            detail,
        };
        let rows = rows_for(task, outcome);
        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| ExtractError::Internal("output writer lock poisoned".into()))?;
            for row in &rows {
                writer.serialize(row).map_err(|e| write_err(e.to_string()))?;
            }
            writer.flush().map_err(|e| write_err(e.to_string()))?;
        }
        debug!("Wrote {} row(s) for {}", rows.len(), task.pdf_filename());

        if rows.iter().any(OutputRow::counts_as_processed) {
            if let Ok(mut set) = self.processed.lock() {
                set.insert(task.pdf_filename());
            }
        }
        Ok(())
    }
}

/// Keeps rows in memory. Used by library callers that post-process results
/// themselves, and by tests.
#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<Vec<OutputRow>>,
    processed: Mutex<HashSet<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that already considers `files` processed.
    pub fn with_processed<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rows: Mutex::new(Vec::new()),
            processed: Mutex::new(files.into_iter().map(Into::into).collect()),
        }
    }

    /// Snapshot of every row recorded so far.
    pub fn rows(&self) -> Vec<OutputRow> {
        self.rows.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl OutcomeSink for MemorySink {
    fn is_processed(&self, pdf_filename: &str) -> bool {
        self.processed
            .lock()
            .map(|set| set.contains(pdf_filename))
            .unwrap_or(false)
    }

    fn record(&self, task: &DocumentTask, outcome: &ExtractionOutcome) -> Result<(), ExtractError> {
        let rows = rows_for(task, outcome);
        let processed = rows.iter().any(OutputRow::counts_as_processed);
        self.rows
            .lock()
            .map_err(|_| ExtractError::Internal("memory sink lock poisoned".into()))?
            .extend(rows);
        if processed {
            if let Ok(mut set) = self.processed.lock() {
                set.insert(task.pdf_filename());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;
    use crate::output::{AuthorRecord, MetadataFlags};

    fn task(name: &str) -> DocumentTask {
        DocumentTask {
            file_path: PathBuf::from(format!("/in/{name}")),
            document_id: name.trim_end_matches(".pdf").to_string(),
            metadata_flags: MetadataFlags::default(),
        }
    }

    fn success(names: &[&str]) -> ExtractionOutcome {
        ExtractionOutcome::Success {
            authors: names
                .iter()
                .map(|n| AuthorRecord {
                    document_id: "d".into(),
                    name: n.to_string(),
                    title: Some("Analyst".into()),
                    email: None,
                    page_found: 1,
                })
                .collect(),
            failed_pages: vec![],
        }
    }

    #[test]
    fn test_rows_one_per_author() {
        let rows = rows_for(&task("a.pdf"), &success(&["Jane Doe", "John Roe"]));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].author_name, "Jane Doe");
        assert_eq!(rows[0].author_title, "Analyst");
        assert_eq!(rows[0].page_found, "1");
        assert_eq!(rows[0].status, "succeeded");
    }

    #[test]
    fn test_rows_for_authorless_outcomes() {
        let none = rows_for(&task("a.pdf"), &success(&[]));
        assert_eq!(none.len(), 1);
        assert_eq!(none[0].detail, "no authors found");

        let partial = rows_for(
            &task("a.pdf"),
            &ExtractionOutcome::Success {
                authors: vec![],
                failed_pages: vec![PageError::NoEndpoints { page: 3 }],
            },
        );
        assert_eq!(partial[0].status, "partially_failed");
        assert!(partial[0].detail.contains("failed pages: 3"));

        let failed = rows_for(&task("a.pdf"), &ExtractionOutcome::failed("line one\nhint"));
        assert_eq!(failed[0].status, "failed");
        assert_eq!(failed[0].detail, "line one");
    }

    #[test]
    fn test_csv_sink_appends_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("results.csv");

        {
            let sink = CsvSink::open(&path).unwrap();
            sink.record(&task("a.pdf"), &success(&["Jane Doe"])).unwrap();
            sink.record(&task("b.pdf"), &ExtractionOutcome::failed("boom")).unwrap();
            sink.record(&task("c.pdf"), &ExtractionOutcome::skipped("metadata: termination"))
                .unwrap();
            assert!(sink.is_processed("a.pdf"));
            assert!(!sink.is_processed("b.pdf"));
        }

        let reopened = CsvSink::open(&path).unwrap();
        assert!(reopened.is_processed("a.pdf"));
        assert!(!reopened.is_processed("b.pdf"));
        assert!(reopened.is_processed("c.pdf"));
        reopened.record(&task("b.pdf"), &success(&["John Roe"])).unwrap();
        drop(reopened);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("pdf_filename").count(), 1, "header written once");
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn test_legacy_rows_without_status_count_as_processed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.csv");
        std::fs::write(
            &path,
            "pdf_filename,author_name,author_title,author_email\nold.pdf,Jane Doe,Analyst,\n",
        )
        .unwrap();
        let sink = CsvSink::open(&path).unwrap();
        assert!(sink.is_processed("old.pdf"));
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::with_processed(["x.pdf"]);
        assert!(sink.is_processed("x.pdf"));
        sink.record(&task("y.pdf"), &success(&["Jane Doe"])).unwrap();
        assert!(sink.is_processed("y.pdf"));
        assert_eq!(sink.rows().len(), 1);
    }
}
