//! Configuration types for author extraction.
//!
//! Every recognised option lives in [`ExtractionConfig`]. It can be built in
//! code through [`ExtractionConfigBuilder`] or loaded from a JSON file with
//! [`ExtractionConfig::from_json_file`]; keys missing from the file keep their
//! defaults, so a config file only needs to name what it changes.

use crate::error::ExtractError;
use crate::pipeline::extract::RetryPolicy;
use crate::prompts::PromptTemplates;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest accepted `support_pages`; reports never need more context.
pub const MAX_SUPPORT_PAGES: usize = 100;

/// Largest accepted `max_rendered_pixels`.
pub const MAX_RENDERED_PIXELS: u32 = 20_000;

/// Configuration for a batch extraction run.
///
/// # Example
/// ```rust
/// use report_authors::{ExtractionConfig, PageSelection};
///
/// let config = ExtractionConfig::builder()
///     .model("gemma3:27b")
///     .pages(PageSelection::FirstN { n: 2 })
///     .max_files(100)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_files, 100);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// How inference endpoints are found.
    pub discovery: EndpointDiscovery,

    /// Model name sent with every inference request. Default: `gemma3:27b`.
    pub model: String,

    /// Per-request timeout in seconds. Default: 180.
    ///
    /// A 27B vision model on a busy GPU can take well over a minute for a
    /// 2× scaled page. Exceeding the timeout counts as one failed attempt.
    pub request_timeout_secs: u64,

    /// Attempts per page after the first one. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Consecutive failures after which an endpoint is marked unreachable. Default: 2.
    pub failure_threshold: u32,

    /// Documents in flight per healthy endpoint. Default: 1.
    ///
    /// One in-flight request per GPU-backed instance keeps latency
    /// predictable; raise it only for endpoints that batch internally.
    pub per_endpoint_concurrency: usize,

    /// Which pages of each document are sent to the model.
    pub pages: PagePolicy,

    /// Number of following pages whose text is appended to a page's own
    /// text as support context. Default: 3.
    pub support_pages: usize,

    /// Maximum characters of support text inserted into a prompt. Default: 300.
    pub support_text_chars: usize,

    /// Rasterisation scale factor relative to the PDF's native size. Default: 2.0.
    pub image_scale: f32,

    /// Cap on either rendered image dimension in pixels. Default: 3000.
    pub max_rendered_pixels: u32,

    /// Image encoding sent to the model. Default: JPEG.
    pub image_format: ImageEncoding,

    /// Feature toggles.
    pub features: FeatureToggles,

    /// Names or e-mail domains that are never authors (e.g. a vendor's
    /// distribution address).
    pub skip_domains: Vec<String>,

    /// Terms that mark a termination / coverage-drop document when found in
    /// a metadata headline or in the document text.
    pub skip_terms: Vec<String>,

    /// Regex that extracts the document id from a PDF file name. The whole
    /// match becomes the id. Default: `key_(\d+)`.
    pub id_pattern: String,

    /// Metadata CSV with `document_id` and `headline` columns.
    pub metadata_csv: Option<PathBuf>,

    /// Prompt templates and addenda.
    pub prompts: PromptTemplates,

    /// Maximum documents processed per run; 0 means no limit.
    pub max_files: usize,

    /// Skip documents that already have an outcome in the output CSV. Default: true.
    pub skip_processed_files: bool,

    /// Output CSV path. Default: `author_extraction_results.csv`.
    pub output_csv: PathBuf,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            discovery: EndpointDiscovery::default(),
            model: "gemma3:27b".to_string(),
            request_timeout_secs: 180,
            max_retries: 3,
            retry_backoff_ms: 500,
            failure_threshold: 2,
            per_endpoint_concurrency: 1,
            pages: PagePolicy::default(),
            support_pages: 3,
            support_text_chars: 300,
            image_scale: 2.0,
            max_rendered_pixels: 3000,
            image_format: ImageEncoding::default(),
            features: FeatureToggles::default(),
            skip_domains: Vec::new(),
            skip_terms: [
                "termination",
                "dropping",
                "terminate",
                "drop coverage",
                "discontinue coverage",
                "discontinuing coverage",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            id_pattern: r"key_(\d+)".to_string(),
            metadata_csv: None,
            prompts: PromptTemplates::default(),
            max_files: 0,
            skip_processed_files: true,
            output_csv: PathBuf::from("author_extraction_results.csv"),
        }
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load a JSON configuration file, keeping defaults for absent keys.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ExtractError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ExtractError::ConfigFile {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let config: ExtractionConfig =
            serde_json::from_str(&raw).map_err(|e| ExtractError::ConfigFile {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Per-request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Bounded retry policy handed to the extraction client.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_secs(30),
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ExtractError> {
        if self.model.trim().is_empty() {
            return Err(ExtractError::InvalidConfig("model must not be empty".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "request timeout must be ≥ 1s".into(),
            ));
        }
        if !(self.image_scale > 0.0 && self.image_scale <= 10.0) {
            return Err(ExtractError::InvalidConfig(format!(
                "image scale must be in (0, 10], got {}",
                self.image_scale
            )));
        }
        if self.support_pages > MAX_SUPPORT_PAGES {
            return Err(ExtractError::InvalidConfig(format!(
                "support pages must be ≤ {MAX_SUPPORT_PAGES}, got {}",
                self.support_pages
            )));
        }
        if self.max_rendered_pixels == 0 || self.max_rendered_pixels > MAX_RENDERED_PIXELS {
            return Err(ExtractError::InvalidConfig(format!(
                "max rendered pixels must be in 1..={MAX_RENDERED_PIXELS}, got {}",
                self.max_rendered_pixels
            )));
        }
        if self.per_endpoint_concurrency == 0 {
            return Err(ExtractError::InvalidConfig(
                "per-endpoint concurrency must be ≥ 1".into(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ExtractError::InvalidConfig(
                "failure threshold must be ≥ 1".into(),
            ));
        }
        if let PageSelection::Range { start, end } = self.pages.selection {
            if start < 1 || start > end {
                return Err(ExtractError::InvalidConfig(format!(
                    "page range {start}-{end} is invalid (1-based, start ≤ end)"
                )));
            }
        }
        if self.discovery.port_start > self.discovery.port_end {
            return Err(ExtractError::InvalidConfig(format!(
                "discovery port range {}-{} is empty",
                self.discovery.port_start, self.discovery.port_end
            )));
        }
        regex::Regex::new(&self.id_pattern).map_err(|e| {
            ExtractError::InvalidConfig(format!("id pattern '{}': {e}", self.id_pattern))
        })?;
        Ok(())
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn discovery(mut self, discovery: EndpointDiscovery) -> Self {
        self.config.discovery = discovery;
        self
    }

    /// Use a single endpoint and disable port scanning.
    pub fn fixed_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.discovery.mode = DiscoveryMode::Fixed;
        self.config.discovery.fallback_url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.config.failure_threshold = n.max(1);
        self
    }

    pub fn per_endpoint_concurrency(mut self, n: usize) -> Self {
        self.config.per_endpoint_concurrency = n.max(1);
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages.selection = selection;
        self
    }

    pub fn always_include_first(mut self, v: bool) -> Self {
        self.config.pages.always_include_first = v;
        self
    }

    pub fn support_pages(mut self, n: usize) -> Self {
        self.config.support_pages = n;
        self
    }

    pub fn image_scale(mut self, scale: f32) -> Self {
        self.config.image_scale = scale.clamp(0.25, 10.0);
        self
    }

    pub fn image_format(mut self, format: ImageEncoding) -> Self {
        self.config.image_format = format;
        self
    }

    pub fn features(mut self, features: FeatureToggles) -> Self {
        self.config.features = features;
        self
    }

    pub fn skip_domains(mut self, domains: Vec<String>) -> Self {
        self.config.skip_domains = domains;
        self
    }

    pub fn skip_terms(mut self, terms: Vec<String>) -> Self {
        self.config.skip_terms = terms;
        self
    }

    pub fn id_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.id_pattern = pattern.into();
        self
    }

    pub fn metadata_csv(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.metadata_csv = Some(path.into());
        self
    }

    pub fn prompts(mut self, prompts: PromptTemplates) -> Self {
        self.config.prompts = prompts;
        self
    }

    pub fn max_files(mut self, n: usize) -> Self {
        self.config.max_files = n;
        self
    }

    pub fn skip_processed_files(mut self, v: bool) -> Self {
        self.config.skip_processed_files = v;
        self
    }

    pub fn output_csv(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_csv = path.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Endpoint discovery ───────────────────────────────────────────────────

/// Whether endpoints are found by scanning ports or taken from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Probe every port in `port_start..=port_end` on `host`; the fallback
    /// is probed only when no port in the range answers.
    #[default]
    Auto,
    /// Only the fallback URL.
    Fixed,
}

/// Where to look for inference endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointDiscovery {
    pub mode: DiscoveryMode,
    pub host: String,
    pub port_start: u16,
    pub port_end: u16,
    /// Single endpoint used in `fixed` mode, and in `auto` mode when the
    /// scanned range has no live instance.
    pub fallback_url: String,
    /// Liveness probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for EndpointDiscovery {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::Auto,
            host: "127.0.0.1".to_string(),
            port_start: 11434,
            port_end: 11465,
            fallback_url: "http://localhost:11434".to_string(),
            probe_timeout_ms: 500,
        }
    }
}

impl EndpointDiscovery {
    /// Candidate base URLs probed on every discovery, in probe order.
    ///
    /// `auto` scans the port range only; `fixed` is the fallback URL alone.
    pub fn candidates(&self) -> Vec<String> {
        match self.mode {
            DiscoveryMode::Auto => (self.port_start..=self.port_end)
                .map(|port| format!("http://{}:{}", self.host, port))
                .collect(),
            DiscoveryMode::Fixed => {
                let fallback = normalize_endpoint(&self.fallback_url);
                if fallback.is_empty() {
                    Vec::new()
                } else {
                    vec![fallback]
                }
            }
        }
    }

    /// In `auto` mode, the address to try when nothing in the range answers.
    ///
    /// `None` in `fixed` mode, when unset, or when it is already one of the
    /// scanned candidates.
    pub fn auto_fallback(&self) -> Option<String> {
        if self.mode != DiscoveryMode::Auto {
            return None;
        }
        let fallback = normalize_endpoint(&self.fallback_url);
        if fallback.is_empty() || self.candidates().contains(&fallback) {
            None
        } else {
            Some(fallback)
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Reduce a configured URL to the service base (`http://host:port`).
///
/// Accepts the full generate URL as older configs store it.
pub fn normalize_endpoint(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    url.strip_suffix("/api/generate")
        .unwrap_or(url)
        .trim_end_matches('/')
        .to_string()
}

// ── Page selection ───────────────────────────────────────────────────────

/// Which pages of a document are rendered and sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PageSelection {
    /// Every page (default).
    #[default]
    All,
    /// The first `n` pages; `n = 0` means every page.
    FirstN { n: usize },
    /// Inclusive 1-based range, clipped to the document.
    Range { start: usize, end: usize },
}

/// Page selection plus the first-page override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagePolicy {
    pub selection: PageSelection,
    /// Force page 1 into the selection regardless of mode. Default: true.
    pub always_include_first: bool,
}

impl Default for PagePolicy {
    fn default() -> Self {
        Self {
            selection: PageSelection::All,
            always_include_first: true,
        }
    }
}

impl PagePolicy {
    /// Expand the policy into a sorted, deduplicated list of 0-indexed pages.
    ///
    /// A range that falls entirely outside the document selects page 1 only.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        if total_pages == 0 {
            return Vec::new();
        }
        let mut indices: Vec<usize> = match self.selection {
            PageSelection::All | PageSelection::FirstN { n: 0 } => (0..total_pages).collect(),
            PageSelection::FirstN { n } => (0..n.min(total_pages)).collect(),
            PageSelection::Range { start, end } => {
                let s = start.max(1) - 1;
                let e = end.min(total_pages);
                if s < e {
                    (s..e).collect()
                } else {
                    vec![0]
                }
            }
        };
        if self.always_include_first && !indices.contains(&0) {
            indices.push(0);
        }
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Image container sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageEncoding {
    /// Lossless, larger payloads.
    Png,
    /// Smaller payloads; scanned reports lose nothing readable. (default)
    #[default]
    Jpeg,
}

/// Optional behaviours, all enabled by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    /// Classify compilation vs. standard reports to pick the prompt.
    pub document_type_detection: bool,
    /// Detect the publishing institution for prompt addenda and e-mail repair.
    pub institution_detection: bool,
    /// Rewrite e-mail addresses whose domain is missing.
    pub email_validation: bool,
    /// Page-1 candidates are authoritative for title and e-mail.
    pub prioritize_first_page: bool,
    /// Skip documents by metadata headline.
    pub metadata_filtering: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            document_type_detection: true,
            institution_detection: true,
            email_validation: true,
            prioritize_first_page: true,
            metadata_filtering: true,
        }
    }
}
