//! External call adapter.
//!
//! Issues exactly one HTTP request per interaction. There is no retry: a
//! timeout, a transport error or a non-success status is reported once and the
//! caller decides what to tell the user.

use super::guard::redirect_policy;
use super::{HttpMethod, RelayRequest};
use crate::utils::truncate_str;
use reqwest::Client as HttpClient;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Longest upstream error body kept in a [`UpstreamError::Status`].
const ERROR_BODY_MAX_CHARS: usize = 300;

const USER_AGENT: &str = concat!("relay-bot/", env!("CARGO_PKG_VERSION"));

/// Failure classification for the single upstream attempt.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// No response within the configured timeout.
    #[error("upstream did not answer within {} ms", .0.as_millis())]
    Timeout(Duration),
    /// Connection or protocol failure.
    #[error("network error: {0}")]
    Network(String),
    /// Upstream answered with a non-success status.
    ///
    /// The body is kept for logs only and never shown to the chat.
    #[error("upstream returned {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Cleaned, truncated response body.
        body: String,
    },
    /// The response body could not be read.
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

/// Successful upstream response, body fully read.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code (always a success code).
    pub status: u16,
    /// `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// Response body as text.
    pub body: String,
}

impl RawResponse {
    /// Whether the upstream declared a JSON body.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("json"))
    }
}

/// Thin wrapper over a shared `reqwest` client.
#[derive(Clone, Debug)]
pub struct ExternalCallAdapter {
    client: HttpClient,
}

impl Default for ExternalCallAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalCallAdapter {
    /// Creates an adapter. Timeouts are applied per request.
    #[must_use]
    pub fn new() -> Self {
        let client = HttpClient::builder()
            .user_agent(USER_AGENT)
            .redirect(redirect_policy())
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self { client }
    }

    /// Performs the call described by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Timeout`] when the deadline passes,
    /// [`UpstreamError::Status`] on a non-success status,
    /// [`UpstreamError::Network`] on transport failures and
    /// [`UpstreamError::Malformed`] when the body cannot be read.
    pub async fn call(&self, request: &RelayRequest) -> Result<RawResponse, UpstreamError> {
        let started = Instant::now();
        let builder = match request.method {
            HttpMethod::Get => self
                .client
                .get(request.endpoint.clone())
                .query(&request.params),
            HttpMethod::Post => self
                .client
                .post(request.endpoint.clone())
                .json(&request.params),
        };

        let response = builder
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| classify(&e, request.timeout))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        if !status.is_success() {
            let body = clean_error_body(&response.text().await.unwrap_or_default());
            warn!(
                endpoint = %request.endpoint,
                status = status.as_u16(),
                body = %body,
                "Upstream returned non-success status"
            );
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(request.timeout)
            } else {
                UpstreamError::Malformed(e.to_string())
            }
        })?;

        debug!(
            endpoint = %request.endpoint,
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Upstream call completed"
        );

        Ok(RawResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

fn classify(err: &reqwest::Error, timeout: Duration) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout(timeout)
    } else if err.is_decode() || err.is_body() {
        UpstreamError::Malformed(err.to_string())
    } else {
        UpstreamError::Network(err.to_string())
    }
}

/// Strips HTML error pages and truncates long bodies.
fn clean_error_body(text: &str) -> String {
    let trimmed = text.trim_start();
    let is_html = trimmed.starts_with("<!DOCTYPE")
        || trimmed.starts_with("<html")
        || trimmed.starts_with("<HTML");

    if is_html {
        "(server returned an HTML error page)".to_string()
    } else if text.chars().count() > ERROR_BODY_MAX_CHARS {
        format!("{}... (truncated)", truncate_str(text, ERROR_BODY_MAX_CHARS))
    } else {
        text.to_string()
    }
}
