//! Inference service client: one request, one response, no retries.
//!
//! Retry, endpoint rotation and parsing live in [`super::extract`]; this module
//! only speaks the wire protocol so it can be swapped for a scripted backend
//! in tests.

use crate::error::InferenceError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A single text+image generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub model: String,
    pub prompt: String,
    /// Encoded page image (JPEG/PNG bytes, not base64).
    pub image: Vec<u8>,
    pub timeout: Duration,
}

/// Anything that can answer generation requests and liveness probes.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Send `request` to `endpoint` and return the model's raw text.
    async fn generate(
        &self,
        endpoint: &str,
        request: &InferenceRequest,
    ) -> Result<String, InferenceError>;

    /// `true` when `endpoint` is ready to accept work.
    async fn probe(&self, endpoint: &str, timeout: Duration) -> bool;
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
    format: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Ollama-compatible HTTP backend (`POST /api/generate`, `GET /`).
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait]
impl InferenceBackend for OllamaClient {
    async fn generate(
        &self,
        endpoint: &str,
        request: &InferenceRequest,
    ) -> Result<String, InferenceError> {
        let body = GenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            images: vec![STANDARD.encode(&request.image)],
            stream: false,
            format: "json",
        };
        let url = format!("{endpoint}/api/generate");
        debug!("POST {} ({} image bytes)", url, request.image.len());

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, request.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                code: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| classify_transport_error(e, request.timeout))?;
        Ok(parsed.response)
    }

    async fn probe(&self, endpoint: &str, timeout: Duration) -> bool {
        match self.client.get(endpoint).timeout(timeout).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Probe {} failed: {}", endpoint, e);
                false
            }
        }
    }
}

fn classify_transport_error(e: reqwest::Error, timeout: Duration) -> InferenceError {
    if e.is_timeout() {
        InferenceError::Timeout {
            secs: timeout.as_secs(),
        }
    } else if e.is_decode() {
        InferenceError::Decode(e.to_string())
    } else {
        InferenceError::Unreachable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_matches_wire_contract() {
        let body = GenerateBody {
            model: "gemma3:27b",
            prompt: "find authors",
            images: vec![STANDARD.encode([1u8, 2, 3])],
            stream: false,
            format: "json",
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["model"], "gemma3:27b");
        assert_eq!(v["stream"], false);
        assert_eq!(v["images"][0], "AQID");
        assert_eq!(v["format"], "json");
    }

    #[test]
    fn response_envelope_ignores_extra_fields() {
        let r: GenerateResponse = serde_json::from_str(
            r#"{"model":"m","response":"{\"authors\":[]}","done":true,"eval_count":12}"#,
        )
        .unwrap();
        assert_eq!(r.response, r#"{"authors":[]}"#);
    }

    #[tokio::test]
    async fn probe_of_closed_port_is_false() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = OllamaClient::new();
        assert!(
            !client
                .probe(&format!("http://{addr}"), Duration::from_millis(200))
                .await
        );
    }
}
