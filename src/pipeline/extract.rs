//! Extraction client: one page unit in, validated candidates out.
//!
//! ## Retry Strategy
//!
//! Inference endpoints are GPU-backed and go away under load (model reloads,
//! OOM restarts). Every failed attempt is reported to the pool and the next
//! attempt re-acquires an endpoint, so a retry lands on another instance
//! when one is free. Waits grow as `initial_backoff * 2^(attempt-1)`: with
//! 500 ms and 3 retries the sequence is 500 ms → 1 s → 2 s.
//!
//! ## Return Value
//!
//! Always returns a [`PageExtraction`]. Transport failures become a
//! [`PageError`] on that page; unparseable output becomes zero candidates.
//! Neither is propagated, so one bad page never fails its document.

use crate::error::{InferenceError, PageError, Rejection};
use crate::output::{CandidateAuthor, PageExtraction, PageUnit};
use crate::pipeline::classify::{name_token_count, non_person_reason, Institution};
use crate::pipeline::inference::{InferenceBackend, InferenceRequest};
use crate::pipeline::parse::{parse_authors, RawAuthor};
use crate::pipeline::postprocess::{clean_email, clean_name, clean_title, correct_email_domain};
use crate::pool::{Endpoint, EndpointPool};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Bounded retry schedule for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Total attempts including the first.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before attempt number `attempt` (0-based). Zero for the first.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Per-document rules applied to every parsed candidate.
#[derive(Debug, Clone, Copy)]
pub struct ValidationRules<'a> {
    pub skip_domains: &'a [String],
    pub email_validation: bool,
    pub institution: Option<Institution>,
}

/// Shared, read-only collaborators of a page extraction.
pub struct ExtractionClient<'a> {
    pub backend: &'a dyn InferenceBackend,
    pub pool: &'a EndpointPool,
    pub model: &'a str,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ExtractionClient<'_> {
    /// Run one page through the model, retrying transient failures.
    ///
    /// `endpoint` is the document's current assignment; it is replaced when
    /// an attempt fails and another healthy endpoint is available.
    pub async fn extract(
        &self,
        unit: &PageUnit,
        prompt: String,
        endpoint: &mut Endpoint,
        rules: &ValidationRules<'_>,
    ) -> PageExtraction {
        let page = unit.page_index;
        let start = Instant::now();
        let request = InferenceRequest {
            model: self.model.to_string(),
            prompt,
            image: unit.image_bytes.clone(),
            timeout: self.timeout,
        };

        let mut last_err: Option<InferenceError> = None;
        let attempts = self.retry.attempts();

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = self.retry.delay_for(attempt);
                debug!(
                    "Page {}: retry {}/{} after {:?}",
                    page, attempt, self.retry.max_retries, backoff
                );
                sleep(backoff).await;
                match self.pool.acquire() {
                    Ok(next) => *endpoint = next,
                    Err(_) => {
                        warn!("Page {}: no healthy endpoint left for retry", page);
                        return failed(page, PageError::NoEndpoints { page });
                    }
                }
            }

            match self.call(&endpoint.address, &request).await {
                Ok(text) => {
                    self.pool.report_success(&endpoint.address);
                    let candidates = candidates_from_response(&text, page, rules);
                    debug!(
                        "Page {}: {} candidate(s) from {} in {:?}",
                        page,
                        candidates.len(),
                        endpoint.address,
                        start.elapsed()
                    );
                    return PageExtraction {
                        page_index: page,
                        candidates,
                        error: None,
                    };
                }
                Err(e) => {
                    warn!(
                        "Page {}: attempt {} on {} failed: {}",
                        page,
                        attempt + 1,
                        endpoint.address,
                        e
                    );
                    self.pool.report_failure(&endpoint.address);
                    last_err = Some(e);
                }
            }
        }

        let error = match last_err {
            Some(InferenceError::Timeout { secs }) => PageError::InferenceTimeout {
                page,
                attempts,
                secs,
            },
            Some(e) => PageError::InferenceUnreachable {
                page,
                attempts,
                detail: e.to_string(),
            },
            None => PageError::InferenceUnreachable {
                page,
                attempts,
                detail: "no attempt was made".into(),
            },
        };
        failed(page, error)
    }

    async fn call(&self, endpoint: &str, request: &InferenceRequest) -> Result<String, InferenceError> {
        match tokio::time::timeout(request.timeout, self.backend.generate(endpoint, request)).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout {
                secs: request.timeout.as_secs(),
            }),
        }
    }
}

fn failed(page: usize, error: PageError) -> PageExtraction {
    PageExtraction {
        page_index: page,
        candidates: Vec::new(),
        error: Some(error),
    }
}

/// Parse a model response and validate every entry.
///
/// Malformed output is logged and yields no candidates.
pub fn candidates_from_response(
    text: &str,
    page: usize,
    rules: &ValidationRules<'_>,
) -> Vec<CandidateAuthor> {
    match parse_authors(text) {
        Ok(raw) => validate_all(&raw, page, rules),
        Err(e) => {
            let snippet: String = text.chars().take(200).collect();
            warn!("Page {}: {} (response starts: {:?})", page, e, snippet);
            Vec::new()
        }
    }
}

/// Validate raw entries, keeping the survivors in response order.
pub fn validate_all(raw: &[RawAuthor], page: usize, rules: &ValidationRules<'_>) -> Vec<CandidateAuthor> {
    raw.iter()
        .enumerate()
        .filter_map(|(rank, r)| match validate_candidate(r, page, rank, rules) {
            Ok(c) => Some(c),
            Err(rejection) => {
                debug!("Page {}: rejected candidate: {}", page, rejection);
                None
            }
        })
        .collect()
}

/// Clean one raw entry and decide whether it names a person.
pub fn validate_candidate(
    raw: &RawAuthor,
    page: usize,
    rank: usize,
    rules: &ValidationRules<'_>,
) -> Result<CandidateAuthor, Rejection> {
    let name = clean_name(&raw.name);
    if name.is_empty() {
        return Err(Rejection::EmptyName);
    }
    let (name, title) = clean_title(&name, raw.title.as_deref().unwrap_or_default());

    let email = raw.email.as_deref().and_then(|e| {
        match (rules.email_validation, rules.institution) {
            (true, Some(inst)) => correct_email_domain(e, inst.email_domain),
            _ => clean_email(e),
        }
    });

    if let Some(domain) = skip_domain_match(&name, email.as_deref(), rules.skip_domains) {
        return Err(Rejection::SkipDomain {
            name,
            domain: domain.to_string(),
        });
    }
    if let Some(reason) = non_person_reason(&name, title.as_deref(), email.as_deref()) {
        debug!("'{}' rejected: {}", name, reason);
        return Err(Rejection::NonPerson(name));
    }
    if name_token_count(&name) < 2 {
        return Err(Rejection::SingleToken(name));
    }

    Ok(CandidateAuthor {
        name,
        title,
        email,
        source_page: page,
        confidence_rank: rank,
    })
}

/// A skip-domain entry contained in the name or matching the e-mail domain.
fn skip_domain_match<'a>(name: &str, email: Option<&str>, skip_domains: &'a [String]) -> Option<&'a str> {
    let name = name.to_lowercase();
    let email_domain = email
        .and_then(|e| e.rsplit_once('@'))
        .map(|(_, d)| d.to_lowercase());
    skip_domains
        .iter()
        .map(|d| d.trim())
        .find(|d| {
            let d = d.to_lowercase();
            !d.is_empty()
                && (name.contains(&d) || email_domain.as_deref().is_some_and(|ed| ed.ends_with(&d)))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscoveryMode, EndpointDiscovery};
    use crate::pipeline::classify::detect_institution;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed script of responses; probes always succeed.
    struct Scripted {
        replies: Mutex<VecDeque<Result<String, InferenceError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, InferenceError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl InferenceBackend for Scripted {
        async fn generate(&self, endpoint: &str, _r: &InferenceRequest) -> Result<String, InferenceError> {
            self.calls.lock().unwrap().push(endpoint.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(InferenceError::Unreachable("script exhausted".into())))
        }

        async fn probe(&self, _endpoint: &str, _timeout: Duration) -> bool {
            true
        }
    }

    fn rules() -> ValidationRules<'static> {
        ValidationRules {
            skip_domains: &[],
            email_validation: true,
            institution: None,
        }
    }

    fn raw(name: &str, title: Option<&str>, email: Option<&str>) -> RawAuthor {
        RawAuthor {
            name: name.into(),
            title: title.map(Into::into),
            email: email.map(Into::into),
        }
    }

    fn unit() -> PageUnit {
        PageUnit {
            page_index: 1,
            image_bytes: vec![0xFF, 0xD8, 0xFF],
            support_text: String::new(),
            is_first_page: true,
        }
    }

    async fn pool_of(n: u16, backend: &dyn InferenceBackend) -> EndpointPool {
        let pool = EndpointPool::new(
            EndpointDiscovery {
                mode: DiscoveryMode::Auto,
                host: "gpu".into(),
                port_start: 1,
                port_end: n,
                fallback_url: "http://gpu:1".into(),
                probe_timeout_ms: 10,
            },
            2,
        );
        pool.discover(backend).await;
        pool
    }

    fn client<'a>(backend: &'a dyn InferenceBackend, pool: &'a EndpointPool, retries: u32) -> ExtractionClient<'a> {
        ExtractionClient {
            backend,
            pool,
            model: "m",
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries: retries,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(4),
            },
        }
    }

    #[test]
    fn test_retry_policy_backoff() {
        let p = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(3),
        };
        assert_eq!(p.attempts(), 6);
        assert_eq!(p.delay_for(0), Duration::ZERO);
        assert_eq!(p.delay_for(1), Duration::from_millis(500));
        assert_eq!(p.delay_for(2), Duration::from_secs(1));
        assert_eq!(p.delay_for(3), Duration::from_secs(2));
        assert_eq!(p.delay_for(4), Duration::from_secs(3));
    }

    #[test]
    fn test_validate_accepts_person() {
        let c = validate_candidate(
            &raw("John Campbell", Some("Analyst"), Some("john.campbell@stephens.com")),
            1,
            0,
            &rules(),
        )
        .unwrap();
        assert_eq!(c.name, "John Campbell");
        assert_eq!(c.title.as_deref(), Some("Analyst"));
        assert_eq!(c.email.as_deref(), Some("john.campbell@stephens.com"));
    }

    #[test]
    fn test_validate_rejections() {
        let r = rules();
        assert_eq!(validate_candidate(&raw("  ", None, None), 1, 0, &r), Err(Rejection::EmptyName));
        assert!(matches!(
            validate_candidate(&raw("Credit Suisse US Eq. Res", None, None), 1, 0, &r),
            Err(Rejection::NonPerson(_))
        ));
        assert!(matches!(
            validate_candidate(&raw("Campbell", None, None), 1, 0, &r),
            Err(Rejection::SingleToken(_))
        ));
        let skip = vec!["acme.com".to_string()];
        let r = ValidationRules {
            skip_domains: &skip,
            ..rules()
        };
        assert!(matches!(
            validate_candidate(&raw("Jane Doe", None, Some("jane@acme.com")), 1, 0, &r),
            Err(Rejection::SkipDomain { .. })
        ));
    }

    #[test]
    fn test_validate_repairs_email_domain() {
        let r = ValidationRules {
            institution: detect_institution("Wells Fargo Securities"),
            ..rules()
        };
        let c = validate_candidate(&raw("Jane Doe", None, Some("jane.doe@wellsfargo")), 1, 0, &r).unwrap();
        assert_eq!(c.email.as_deref(), Some("jane.doe@wellsfargo.com"));

        let off = ValidationRules {
            email_validation: false,
            ..r
        };
        let c = validate_candidate(&raw("Jane Doe", None, Some("jane.doe@wellsfargo")), 1, 0, &off).unwrap();
        assert_eq!(c.email, None);
    }

    #[test]
    fn test_malformed_response_yields_no_candidates() {
        assert!(candidates_from_response("I could not find any authors.", 1, &rules()).is_empty());
        assert!(candidates_from_response(r#"{"authors": "none"}"#, 1, &rules()).is_empty());
    }

    #[test]
    fn test_confidence_rank_follows_response_order() {
        let text = r#"{"authors": [{"name": "Research Team"}, {"name": "Ann Lee"}, {"name": "Bo Chan"}]}"#;
        let c = candidates_from_response(text, 2, &rules());
        assert_eq!(c.len(), 2);
        assert_eq!((c[0].confidence_rank, c[1].confidence_rank), (1, 2));
        assert!(c.iter().all(|c| c.source_page == 2));
    }

    #[tokio::test]
    async fn test_extract_retries_on_next_endpoint() {
        let backend = Scripted::new(vec![
            Err(InferenceError::Unreachable("connection refused".into())),
            Ok(r#"{"authors": [{"name": "Ann Lee", "title": "Analyst"}]}"#.into()),
        ]);
        let pool = pool_of(2, &backend).await;
        let mut endpoint = pool.acquire().unwrap();
        let out = client(&backend, &pool, 2)
            .extract(&unit(), "p".into(), &mut endpoint, &rules())
            .await;

        assert!(out.error.is_none());
        assert_eq!(out.candidates.len(), 1);
        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["http://gpu:1", "http://gpu:2"]);
        assert_eq!(endpoint.address, "http://gpu:2");
    }

    #[tokio::test]
    async fn test_extract_exhausts_retries_into_page_error() {
        let backend = Scripted::new(vec![
            Err(InferenceError::Timeout { secs: 5 }),
            Err(InferenceError::Timeout { secs: 5 }),
        ]);
        // High threshold so the endpoint stays eligible for the retry.
        let pool = EndpointPool::new(
            EndpointDiscovery {
                mode: DiscoveryMode::Fixed,
                fallback_url: "http://gpu:1".into(),
                ..EndpointDiscovery::default()
            },
            10,
        );
        pool.discover(&backend).await;
        let mut endpoint = pool.acquire().unwrap();
        let out = client(&backend, &pool, 1)
            .extract(&unit(), "p".into(), &mut endpoint, &rules())
            .await;

        assert!(out.candidates.is_empty());
        assert_eq!(
            out.error,
            Some(PageError::InferenceTimeout {
                page: 1,
                attempts: 2,
                secs: 5
            })
        );
    }

    #[tokio::test]
    async fn test_extract_stops_when_pool_is_exhausted() {
        let backend = Scripted::new(vec![
            Err(InferenceError::Unreachable("reset".into())),
            Err(InferenceError::Unreachable("reset".into())),
        ]);
        let pool = EndpointPool::new(
            EndpointDiscovery {
                mode: DiscoveryMode::Fixed,
                fallback_url: "http://gpu:1".into(),
                ..EndpointDiscovery::default()
            },
            1,
        );
        pool.discover(&backend).await;
        let mut endpoint = pool.acquire().unwrap();
        let out = client(&backend, &pool, 3)
            .extract(&unit(), "p".into(), &mut endpoint, &rules())
            .await;

        assert_eq!(out.error, Some(PageError::NoEndpoints { page: 1 }));
        assert_eq!(backend.calls.lock().unwrap().len(), 1);
    }
}
