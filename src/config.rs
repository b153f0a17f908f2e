//! Configuration and settings management
//!
//! Loads settings from environment variables (and optional `config/*` files)
//! and resolves the relay variant preset.

use crate::relay::guard::is_public_url;
use crate::relay::{ExpectedShape, HttpMethod, RelayError, RelayRequest};
use config::{Config, ConfigError, Environment, File};
use reqwest::Url;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Upstream used by the Q&A variant when `UPSTREAM_URL` is not set.
pub const DEFAULT_QA_UPSTREAM_URL: &str = "https://ar-api-08uk.onrender.com/ava";
/// Default upstream timeout.
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 30_000;
/// Default media limit (Telegram bots cannot upload more than 50 MB).
pub const DEFAULT_MEDIA_MAX_BYTES: u64 = 50 * 1024 * 1024;
/// Default media download timeout.
pub const DEFAULT_MEDIA_TIMEOUT_SECS: u64 = 120;
/// Default wait for in-flight relays at shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 60;

/// Which upstream family the bot relays to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayVariant {
    /// Q&A endpoint answering with text.
    #[default]
    Qa,
    /// Image generation endpoint answering with image URLs.
    Image,
    /// Video page or downloader answering with HTML.
    Video,
}

/// How image results are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDelivery {
    /// Pass the URL to Telegram.
    #[default]
    Url,
    /// Download each image first and upload the file.
    Upload,
}

/// Inbound transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// axum server receiving Telegram webhook POSTs.
    #[default]
    Webhook,
    /// teloxide long polling, for local runs.
    Polling,
}

/// What kind of text the user is expected to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Any non-empty text.
    FreeText,
    /// An absolute http(s) link.
    Link,
}

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Relay preset
    #[serde(default)]
    pub relay_variant: RelayVariant,
    /// Upstream endpoint; variant default when unset
    pub upstream_url: Option<String>,
    /// Name of the parameter carrying the user's text
    pub upstream_param: Option<String>,
    /// GET or POST
    #[serde(default)]
    pub upstream_method: HttpMethod,
    /// Upstream timeout in milliseconds
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// Largest media file that will be sent
    #[serde(default = "default_media_max_bytes")]
    pub media_max_bytes: u64,
    /// Media download timeout in seconds
    #[serde(default = "default_media_timeout_secs")]
    pub media_timeout_secs: u64,
    /// Directory for temporary media files
    pub media_dir: Option<PathBuf>,
    /// How image results are delivered
    #[serde(default)]
    pub image_delivery: ImageDelivery,
    /// Fetch links that point at loopback or private hosts (local runs only)
    #[serde(default)]
    pub allow_private_links: bool,

    /// Persist chat ids to R2
    #[serde(default)]
    pub record_chats: bool,
    /// R2 Storage access key ID
    pub r2_access_key_id: Option<String>,
    /// R2 Storage secret access key
    pub r2_secret_access_key: Option<String>,
    /// R2 Storage endpoint URL
    pub r2_endpoint_url: Option<String>,
    /// R2 Storage bucket name
    pub r2_bucket_name: Option<String>,

    /// Webhook server or long polling
    #[serde(default)]
    pub transport: TransportMode,
    /// Listen address for the webhook server
    #[serde(default = "default_webhook_bind")]
    pub webhook_bind: String,
    /// Route receiving updates
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    /// Public URL registered with Telegram at startup
    pub webhook_url: Option<String>,
    /// Seconds to wait for in-flight relays after a shutdown signal
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

const fn default_upstream_timeout_ms() -> u64 {
    DEFAULT_UPSTREAM_TIMEOUT_MS
}

const fn default_media_max_bytes() -> u64 {
    DEFAULT_MEDIA_MAX_BYTES
}

const fn default_media_timeout_secs() -> u64 {
    DEFAULT_MEDIA_TIMEOUT_SECS
}

const fn default_shutdown_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}

fn default_webhook_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_webhook_path() -> String {
    "/".to_string()
}

/// Build the layered configuration source.
///
/// # Errors
///
/// Returns a `ConfigError` if a source cannot be read.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Local overrides, not checked into git
        .add_source(File::with_name("config/local").required(false))
        // Eg.. `APP__WEBHOOK_BIND=127.0.0.1:9000 ./target/relay-bot`
        .add_source(Environment::with_prefix("APP").separator("__"))
        // UPPER_SNAKE_CASE env vars map to snake_case keys; empty values count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use relay_bot::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails, the token is missing, or the
    /// settings are inconsistent (see [`Settings::validate`]).
    pub fn new() -> Result<Self, ConfigError> {
        let settings: Self = build_config()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks mandatory values and cross-field requirements.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram_token.trim().is_empty() {
            return Err(ConfigError::Message("TELEGRAM_TOKEN is not set".into()));
        }

        if self.relay_variant == RelayVariant::Image && self.upstream_url.is_none() {
            return Err(ConfigError::Message(
                "UPSTREAM_URL is required for the image variant".into(),
            ));
        }
        self.upstream_endpoint()?;

        if let Some(url) = &self.webhook_url {
            Url::parse(url)
                .map_err(|e| ConfigError::Message(format!("WEBHOOK_URL is invalid: {e}")))?;
        }

        if self.record_chats {
            let missing: Vec<&str> = [
                ("R2_ENDPOINT_URL", &self.r2_endpoint_url),
                ("R2_ACCESS_KEY_ID", &self.r2_access_key_id),
                ("R2_SECRET_ACCESS_KEY", &self.r2_secret_access_key),
                ("R2_BUCKET_NAME", &self.r2_bucket_name),
            ]
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect();

            if !missing.is_empty() {
                return Err(ConfigError::Message(format!(
                    "RECORD_CHATS requires {}",
                    missing.join(", ")
                )));
            }
        }

        Ok(())
    }

    /// The configured endpoint, or the variant default.
    ///
    /// `None` means the video variant fetches the submitted link itself.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` if the URL does not parse.
    pub fn upstream_endpoint(&self) -> Result<Option<Url>, ConfigError> {
        let raw = match (&self.upstream_url, self.relay_variant) {
            (Some(url), _) => url.as_str(),
            (None, RelayVariant::Qa) => DEFAULT_QA_UPSTREAM_URL,
            (None, _) => return Ok(None),
        };
        Url::parse(raw)
            .map(Some)
            .map_err(|e| ConfigError::Message(format!("UPSTREAM_URL is invalid: {e}")))
    }

    /// Parameter name carrying the user's text.
    #[must_use]
    pub fn upstream_param(&self) -> String {
        self.upstream_param.clone().unwrap_or_else(|| {
            match self.relay_variant {
                RelayVariant::Qa => "q",
                RelayVariant::Image => "prompt",
                RelayVariant::Video => "url",
            }
            .to_string()
        })
    }

    /// Upstream timeout as a `Duration`.
    #[must_use]
    pub const fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    /// Media download timeout as a `Duration`.
    #[must_use]
    pub const fn media_timeout(&self) -> Duration {
        Duration::from_secs(self.media_timeout_secs)
    }

    /// Shutdown grace period as a `Duration`.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Directory for temporary media files.
    #[must_use]
    pub fn media_dir(&self) -> PathBuf {
        self.media_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("relay-bot"))
    }

    /// Resolve the relay preset for the configured variant.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` if the upstream URL does not parse.
    pub fn profile(&self) -> Result<RelayProfile, ConfigError> {
        Ok(RelayProfile {
            variant: self.relay_variant,
            endpoint: self.upstream_endpoint()?,
            param: self.upstream_param(),
            method: self.upstream_method,
            timeout: self.upstream_timeout(),
            media_max_bytes: self.media_max_bytes,
            image_delivery: self.image_delivery,
            allow_private_links: self.allow_private_links,
            texts: RelayTexts::for_variant(self.relay_variant),
        })
    }
}

/// User-facing texts of a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTexts {
    /// Reply to `/start`.
    pub welcome: &'static str,
    /// Provisional reply sent before the upstream call.
    pub acknowledgement: &'static str,
    /// Reply to unusable input.
    pub usage: &'static str,
    /// Lead line of the error reply.
    pub failure: &'static str,
}

impl RelayTexts {
    /// Texts for `variant`.
    #[must_use]
    pub const fn for_variant(variant: RelayVariant) -> Self {
        match variant {
            RelayVariant::Qa => Self {
                welcome: "Ask your question, and I’ll get you an answer! 🧠",
                acknowledgement: "Thinking... 🤔",
                usage: "Send me a question as plain text and I’ll look up an answer.",
                failure: "Sorry, I couldn’t get an answer. Try again later.",
            },
            RelayVariant::Image => Self {
                welcome: "Describe a picture and I’ll generate it for you! 🎨",
                acknowledgement: "Generating images... 🖌️",
                usage: "Send me a text prompt describing the image you want.",
                failure: "Sorry, I couldn’t generate images. Try again later.",
            },
            RelayVariant::Video => Self {
                welcome: "Send me a video link and I’ll download it for you! 🎬",
                acknowledgement: "Fetching your video... ⏳",
                usage: "Send me a full video link, starting with https://",
                failure: "Sorry, I couldn’t download that video.",
            },
        }
    }
}

/// Everything the interaction handler needs to know about the variant.
#[derive(Debug, Clone)]
pub struct RelayProfile {
    /// Variant preset.
    pub variant: RelayVariant,
    /// Upstream endpoint; `None` fetches the submitted link directly.
    pub endpoint: Option<Url>,
    /// Parameter name carrying the input.
    pub param: String,
    /// GET or POST.
    pub method: HttpMethod,
    /// Upstream timeout.
    pub timeout: Duration,
    /// Media size limit.
    pub media_max_bytes: u64,
    /// Image delivery mode.
    pub image_delivery: ImageDelivery,
    /// Skip the public-host check on fetched links.
    pub allow_private_links: bool,
    /// User-facing texts.
    pub texts: RelayTexts,
}

impl RelayProfile {
    /// Shape the upstream payload is expected to have.
    #[must_use]
    pub const fn expected_shape(&self) -> ExpectedShape {
        match self.variant {
            RelayVariant::Qa => ExpectedShape::Text,
            RelayVariant::Image => ExpectedShape::ImageSet,
            RelayVariant::Video => ExpectedShape::MediaLink,
        }
    }

    /// Kind of input the variant accepts.
    #[must_use]
    pub const fn input_kind(&self) -> InputKind {
        match self.variant {
            RelayVariant::Video => InputKind::Link,
            RelayVariant::Qa | RelayVariant::Image => InputKind::FreeText,
        }
    }

    /// Refuses links to loopback, private and link-local hosts unless
    /// private links are allowed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Validation`] naming the refused host.
    pub fn screen_link(&self, url: &Url) -> Result<(), RelayError> {
        if self.allow_private_links || is_public_url(url) {
            return Ok(());
        }
        Err(RelayError::Validation(format!(
            "links to {} are not fetched",
            url.host_str().unwrap_or("this host")
        )))
    }

    /// Build the upstream request for a validated input.
    ///
    /// Without a configured endpoint the input itself must be a URL and is
    /// fetched as-is.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Validation`] if the input has to be used as a URL
    /// and is not one, or points at a non-public host.
    pub fn build_request(&self, input: &str) -> Result<RelayRequest, RelayError> {
        let (endpoint, params) = match &self.endpoint {
            Some(endpoint) => {
                let mut params = BTreeMap::new();
                params.insert(self.param.clone(), input.to_string());
                (endpoint.clone(), params)
            }
            None => {
                let url = Url::parse(input)
                    .map_err(|e| RelayError::Validation(format!("not a link: {e}")))?;
                self.screen_link(&url)?;
                (url, BTreeMap::new())
            }
        };
        Ok(RelayRequest {
            endpoint,
            params,
            method: self.method,
            timeout: self.timeout,
        })
    }
}
