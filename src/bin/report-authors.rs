//! CLI binary for report-authors.
//!
//! A thin shim over the library crate that maps CLI flags onto
//! `ExtractionConfig`, runs one batch and prints the summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use report_authors::{
    BatchCoordinator, BatchProgressCallback, BatchSummary, CsvSink, DiscoveryMode, DocumentTask,
    ExtractionConfig, ExtractionOutcome, OllamaClient, PageSelection, PdfiumRenderer,
    ProgressCallback,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per document.
/// Documents finish out of order, so start times are keyed by file name.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_batch_start` tells us how many documents there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Probing inference endpoints…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} documents  \
             ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_for(&self, filename: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(filename))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.activate_bar(total_documents);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting authors from {total_documents} document(s)…"))
        ));
    }

    fn on_document_start(&self, task: &DocumentTask) {
        let name = task.pdf_filename();
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(name.clone(), Instant::now());
        }
        self.bar.set_message(name);
    }

    fn on_document_complete(&self, task: &DocumentTask, outcome: &ExtractionOutcome) {
        let name = task.pdf_filename();
        let secs = self.elapsed_for(&name);
        let line = match outcome {
            ExtractionOutcome::Success {
                authors,
                failed_pages,
            } => {
                let names: Vec<&str> = authors.iter().map(|a| a.name.as_str()).collect();
                let mark = if failed_pages.is_empty() {
                    green("✓")
                } else {
                    yellow("⚠")
                };
                format!(
                    "  {} {:<40}  {}  {}",
                    mark,
                    name,
                    if names.is_empty() {
                        dim("no authors")
                    } else {
                        names.join("; ")
                    },
                    dim(&format!("{secs:.1}s")),
                )
            }
            ExtractionOutcome::Skipped { reason } => {
                format!("  {} {:<40}  {}", dim("–"), name, dim(reason))
            }
            ExtractionOutcome::Failed { error } => {
                let first = error.lines().next().unwrap_or_default();
                let msg: String = if first.chars().count() > 80 {
                    format!("{}\u{2026}", first.chars().take(79).collect::<String>())
                } else {
                    first.to_string()
                };
                format!("  {} {:<40}  {}", red("✗"), name, red(&msg))
            }
        };
        self.bar.println(line);
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        self.bar.finish_and_clear();
        let mark = if summary.failed == 0 { green("✔") } else { cyan("⚠") };
        eprintln!(
            "{} {} author(s) from {} document(s)",
            mark,
            bold(&summary.authors.to_string()),
            summary.total()
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Every PDF in a folder, endpoints auto-discovered on 127.0.0.1:11434-11465
  report-authors reports/

  # Only the first two pages of each report, at most 50 new files
  report-authors --page-mode first-n --first-n 2 --max-files 50 reports/

  # Pages 3-6 plus page 1, against one fixed endpoint
  report-authors --endpoint http://gpu-node:11434 --page-mode range --page-range 3 6 reports/

  # Skip coverage-drop reports listed in a metadata file
  report-authors --metadata-filtering --metadata-csv reports_metadata.csv reports/

  # Start over instead of resuming
  report-authors --no-skip-processed -o fresh.csv reports/

  # Machine-readable batch report on stdout
  report-authors --json reports/ > report.json

OUTPUT:
  One CSV row per author:
    pdf_filename, author_name, author_title, author_email, page_found, status, detail
  Skipped, failed and author-less documents get a single row with empty
  author fields. Files with a non-failed row are skipped on the next run.

CONFIGURATION FILE (--config):
  JSON with any subset of the options, e.g.
    {"model": "gemma3:27b",
     "discovery": {"mode": "auto", "port_start": 11434, "port_end": 11465},
     "pages": {"selection": {"mode": "first_n", "n": 3}},
     "features": {"prioritize_first_page": true},
     "skip_terms": ["termination", "dropping"]}
  Command-line flags override values from the file.

ENVIRONMENT VARIABLES:
  RUST_LOG                Override the log filter (e.g. report_authors=debug)
  PDFIUM_LIB_PATH         Path to an existing libpdfium: skips auto-download
  PDFIUM_AUTO_CACHE_DIR   Override the default pdfium cache directory
"#;

/// Extract analyst authors from research-report PDFs using a vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "report-authors",
    version,
    about = "Extract analyst authors from research-report PDFs using a vision LLM",
    long_about = "Render each selected page of every PDF in a folder, ask a vision language model \
served by one or more Ollama-compatible endpoints who wrote the report, and append the merged \
author list to a CSV file. Runs are resumable.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// A PDF file or a folder of PDFs.
    input: PathBuf,

    /// JSON configuration file.
    #[arg(short, long, env = "REPORT_AUTHORS_CONFIG")]
    config: Option<PathBuf>,

    /// Output CSV (appended to).
    #[arg(short, long, env = "REPORT_AUTHORS_OUTPUT")]
    output: Option<PathBuf>,

    /// Model name sent to the endpoints.
    #[arg(long, env = "REPORT_AUTHORS_MODEL")]
    model: Option<String>,

    /// Use this single endpoint instead of scanning ports.
    #[arg(long, env = "REPORT_AUTHORS_ENDPOINT")]
    endpoint: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "REPORT_AUTHORS_TIMEOUT")]
    timeout: Option<u64>,

    /// Retries per page on inference failure.
    #[arg(long, env = "REPORT_AUTHORS_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Which pages to process.
    #[arg(long, value_enum)]
    page_mode: Option<PageModeArg>,

    /// Inclusive 1-based page range for `--page-mode range`.
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    page_range: Option<Vec<usize>>,

    /// Page count for `--page-mode first-n`.
    #[arg(long, value_name = "N")]
    first_n: Option<usize>,

    /// Always include page 1, whatever the page mode.
    #[arg(long, overrides_with = "no_always_first")]
    always_first: bool,

    /// Do not force page 1 into the selection.
    #[arg(long)]
    no_always_first: bool,

    /// Skip documents by metadata headline.
    #[arg(long, overrides_with = "no_metadata_filtering")]
    metadata_filtering: bool,

    /// Disable metadata filtering.
    #[arg(long)]
    no_metadata_filtering: bool,

    /// Metadata CSV with `document_id` and `headline` columns.
    #[arg(long, value_name = "FILE", env = "REPORT_AUTHORS_METADATA_CSV")]
    metadata_csv: Option<PathBuf>,

    /// Maximum documents processed this run (0 = no limit).
    #[arg(long, value_name = "N")]
    max_files: Option<usize>,

    /// Skip files that already have an outcome in the output CSV.
    #[arg(long, overrides_with = "no_skip_processed")]
    skip_processed: bool,

    /// Process every file, even those already in the output CSV.
    #[arg(long)]
    no_skip_processed: bool,

    /// Print the batch report as JSON on stdout.
    #[arg(long, env = "REPORT_AUTHORS_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "REPORT_AUTHORS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, visible_alias = "debug", env = "REPORT_AUTHORS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "REPORT_AUTHORS_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PageModeArg {
    All,
    Range,
    #[value(alias = "first_n")]
    FirstN,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries per-document feedback, so library INFO logs
    // are suppressed while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Ensure PDFium engine is available ───────────────────────────────────
    // First run downloads the library once; later runs only check the cache.
    if !pdfium_auto::is_pdfium_cached() {
        if !cli.quiet {
            let dl_bar = ProgressBar::new(0);
            dl_bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  \
                     [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(TICKS),
            );
            dl_bar.set_prefix("PDF engine");
            dl_bar.enable_steady_tick(Duration::from_millis(80));

            let bar = dl_bar.clone();
            tokio::task::block_in_place(|| {
                pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
                    if let Some(t) = total {
                        if bar.length().unwrap_or(0) != t {
                            bar.set_length(t);
                        }
                    }
                    bar.set_position(downloaded);
                }))
            })
            .context("Failed to download PDFium engine")?;

            dl_bar.finish_with_message("ready ✓");
        } else {
            tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
                .context("Failed to download PDFium engine")?;
        }
    }

    // ── Build config and collaborators ───────────────────────────────────
    let config = build_config(&cli)?;
    let sink = CsvSink::open(&config.output_csv)
        .with_context(|| format!("Cannot open output file {}", config.output_csv.display()))?;
    let output_path = config.output_csv.clone();

    let mut coordinator = BatchCoordinator::new(
        config,
        Arc::new(OllamaClient::new()),
        Arc::new(PdfiumRenderer),
        Arc::new(sink),
    );
    if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        coordinator = coordinator.with_progress(cb as ProgressCallback);
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let report = coordinator
        .run(&cli.input)
        .await
        .context("Author extraction failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        let s = &report.summary;
        eprintln!(
            "{}  {} succeeded, {} partial, {} failed, {} skipped  {}ms  →  {}",
            if s.failed == 0 { green("✔") } else { cyan("⚠") },
            s.succeeded,
            s.partially_failed,
            s.failed,
            s.skipped,
            s.duration_ms,
            bold(&output_path.display().to_string()),
        );
        let healthy = coordinator.pool().healthy_count();
        eprintln!(
            "   {} author(s)  /  {} healthy endpoint(s) at exit",
            dim(&s.authors.to_string()),
            dim(&healthy.to_string()),
        );
    }

    Ok(())
}

/// Resolve a `--x` / `--no-x` pair; `None` when neither was given.
fn flag_pair(yes: bool, no: bool) -> Option<bool> {
    match (yes, no) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

/// Load the config file (if any) and apply CLI overrides on top.
fn build_config(cli: &Cli) -> Result<ExtractionConfig> {
    let mut config = match &cli.config {
        Some(path) => ExtractionConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ExtractionConfig::default(),
    };

    if let Some(ref output) = cli.output {
        config.output_csv = output.clone();
    }
    if let Some(ref model) = cli.model {
        config.model = model.clone();
    }
    if let Some(ref endpoint) = cli.endpoint {
        config.discovery.mode = DiscoveryMode::Fixed;
        config.discovery.fallback_url = endpoint.clone();
    }
    if let Some(secs) = cli.timeout {
        config.request_timeout_secs = secs;
    }
    if let Some(n) = cli.max_retries {
        config.max_retries = n;
    }
    if let Some(mode) = cli.page_mode {
        config.pages.selection = parse_page_mode(mode, cli.page_range.as_deref(), cli.first_n)?;
    }
    if let Some(v) = flag_pair(cli.always_first, cli.no_always_first) {
        config.pages.always_include_first = v;
    }
    if let Some(v) = flag_pair(cli.metadata_filtering, cli.no_metadata_filtering) {
        config.features.metadata_filtering = v;
    }
    if let Some(ref path) = cli.metadata_csv {
        config.metadata_csv = Some(path.clone());
    }
    if let Some(n) = cli.max_files {
        config.max_files = n;
    }
    if let Some(v) = flag_pair(cli.skip_processed, cli.no_skip_processed) {
        config.skip_processed_files = v;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Turn `--page-mode` and its companion flags into a `PageSelection`.
fn parse_page_mode(
    mode: PageModeArg,
    range: Option<&[usize]>,
    first_n: Option<usize>,
) -> Result<PageSelection> {
    match mode {
        PageModeArg::All => Ok(PageSelection::All),
        PageModeArg::FirstN => {
            let n = first_n.context("--page-mode first-n requires --first-n N")?;
            Ok(PageSelection::FirstN { n })
        }
        PageModeArg::Range => {
            let Some(&[start, end]) = range else {
                anyhow::bail!("--page-mode range requires --page-range START END");
            };
            if start < 1 {
                anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
            }
            if start > end {
                anyhow::bail!(
                    "Invalid page range '{}-{}': start must be <= end",
                    start,
                    end
                );
            }
            Ok(PageSelection::Range { start, end })
        }
    }
}
