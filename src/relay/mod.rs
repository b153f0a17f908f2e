//! Relay core: the single upstream call and everything derived from it.
//!
//! The [`adapter`] issues exactly one HTTP request, the [`extract`] module turns
//! the raw payload into a [`RelayResult`], and [`media`] downloads binary media
//! under a size limit.

/// External call adapter (one outbound HTTP request).
pub mod adapter;
/// Response extractor (JSON answers and HTML scraping strategies).
pub mod extract;
/// Public-host screening for user and scraped links.
pub mod guard;
/// Size-bounded media downloads.
pub mod media;

use crate::utils::truncate_str;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use adapter::{ExternalCallAdapter, RawResponse, UpstreamError};
pub use extract::{ExtractionError, ExpectedShape};
pub use media::{FetchError, MediaFetcher, MediaFile};

/// Maximum length of the diagnostic appended to user-facing error messages.
const DIAGNOSTIC_MAX_CHARS: usize = 200;

/// A text message received from the chat transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Conversation the reply goes to.
    pub chat_id: i64,
    /// Raw message text.
    pub text: String,
    /// When the transport received the message.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Create a message stamped with the current time.
    #[must_use]
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// HTTP method used for the upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    /// Parameters go into the query string.
    #[default]
    #[serde(alias = "GET")]
    Get,
    /// Parameters go into a JSON object body.
    #[serde(alias = "POST")]
    Post,
}

/// One outbound call, built per interaction.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    /// Fully qualified endpoint.
    pub endpoint: Url,
    /// Query or body parameters.
    pub params: BTreeMap<String, String>,
    /// GET or POST.
    pub method: HttpMethod,
    /// Abandon the call after this long.
    pub timeout: Duration,
}

/// The semantic answer extracted from an upstream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayResult {
    /// Plain text answer.
    TextAnswer(String),
    /// Ordered image URLs.
    ImageSet(Vec<Url>),
    /// A single downloadable media resource.
    MediaLink {
        /// Direct media URL.
        url: Url,
        /// Optional title used as caption.
        title: Option<String>,
    },
}

/// Stage of an interaction, used for logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Message arrived.
    Received,
    /// Input accepted.
    Validated,
    /// Provisional reply sent (or attempted).
    Acknowledged,
    /// Upstream call in flight.
    Calling,
    /// Parsing the upstream payload.
    Extracting,
    /// Downloading media.
    Fetching,
    /// Sending the final reply.
    Replying,
    /// Finished successfully.
    Done,
    /// Failed; the error reply has been sent (or attempted).
    Error,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Acknowledged => "acknowledged",
            Self::Calling => "calling",
            Self::Extracting => "extracting",
            Self::Fetching => "fetching",
            Self::Replying => "replying",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Every failure an interaction can end with.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Empty, command-like or otherwise unusable input.
    #[error("invalid input: {0}")]
    Validation(String),
    /// Upstream call failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// Upstream answered but the expected data was missing.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// Media exceeded the configured limit.
    #[error("media is too large ({size} bytes, limit {limit} bytes)")]
    SizeLimit {
        /// Observed or declared size.
        size: u64,
        /// Configured limit.
        limit: u64,
    },
    /// Media download failed for another reason.
    #[error("media download failed: {0}")]
    Media(String),
    /// The final reply could not be delivered.
    #[error("reply could not be delivered: {0}")]
    Delivery(String),
}

impl From<FetchError> for RelayError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::TooLarge { size, limit } => Self::SizeLimit { size, limit },
            other => Self::Media(other.to_string()),
        }
    }
}

impl RelayError {
    /// Short diagnostic suitable for the chat.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        truncate_str(self.to_string(), DIAGNOSTIC_MAX_CHARS)
    }
}
