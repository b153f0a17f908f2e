//! Chat identity storage.
//!
//! One JSON object per chat in Cloudflare R2 / AWS S3, keyed by chat id.
//! A PUT replaces the object, so concurrent upserts resolve last-write-wins.

use crate::config::Settings;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Error putting object into S3
    #[error("S3 put error: {0}")]
    S3Put(String),
    /// Error during JSON serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Configuration error (missing credentials, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Last time a chat talked to the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    /// Telegram chat id (the key).
    pub chat_id: i64,
    /// Time of the latest interaction.
    pub last_interaction: DateTime<Utc>,
}

/// Document store holding one record per chat.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Insert or replace the record for `record.chat_id`.
    async fn upsert_chat(&self, record: &ChatRecord) -> Result<(), StorageError>;
    /// Check connection to storage
    async fn check_connection(&self) -> Result<(), String>;
}

/// R2-backed chat store.
pub struct R2ChatStore {
    client: Client,
    bucket: String,
}

impl R2ChatStore {
    /// Create a new R2 chat store
    ///
    /// # Errors
    ///
    /// Returns an error if R2 configuration is missing.
    pub async fn new(settings: &Settings) -> Result<Self, StorageError> {
        let endpoint_url = settings
            .r2_endpoint_url
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ENDPOINT_URL is missing".into()))?;
        let access_key = settings
            .r2_access_key_id
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ACCESS_KEY_ID is missing".into()))?;
        let secret_key = settings
            .r2_secret_access_key
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_SECRET_ACCESS_KEY is missing".into()))?;
        let bucket = settings
            .r2_bucket_name
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_BUCKET_NAME is missing".into()))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "r2-storage");

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("auto"))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(endpoint_url)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.clone(),
        })
    }
}

#[async_trait]
impl ChatStore for R2ChatStore {
    async fn upsert_chat(&self, record: &ChatRecord) -> Result<(), StorageError> {
        let body = serde_json::to_vec_pretty(record)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(chat_record_key(record.chat_id))
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StorageError::S3Put(e.to_string()))?;

        Ok(())
    }

    async fn check_connection(&self) -> Result<(), String> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!("Successfully connected to R2 storage.");
                Ok(())
            }
            Err(e) => {
                let err_msg = format!("R2 connectivity test failed: {e:#?}");
                error!("{}", err_msg);
                Err(err_msg)
            }
        }
    }
}

/// Returns the R2 key for a chat record
#[must_use]
pub fn chat_record_key(chat_id: i64) -> String {
    format!("chats/{chat_id}.json")
}

/// Records chat visits without ever blocking the reply path.
#[derive(Clone)]
pub struct ChatIdentityRecorder {
    store: Arc<dyn ChatStore>,
}

impl ChatIdentityRecorder {
    /// Wraps a store handle created at startup.
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Upserts `{chat_id, now}` in the background.
    ///
    /// Failures are logged and otherwise ignored. The handle is returned for
    /// callers that want to observe completion; dropping it detaches the task.
    pub fn record_visit(&self, chat_id: i64) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let record = ChatRecord {
                chat_id,
                last_interaction: Utc::now(),
            };
            match store.upsert_chat(&record).await {
                Ok(()) => debug!(chat_id, "Chat visit recorded"),
                Err(e) => warn!(chat_id, error = %e, "Failed to record chat visit"),
            }
        })
    }
}
