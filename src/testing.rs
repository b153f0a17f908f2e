//! Shared test fixtures: local HTTP servers and a recording reply surface.

use crate::bot::replies::{PhotoSource, ReplySurface};
use crate::config::{RelayVariant, Settings};
use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Path as UrlPath;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;
use tokio::net::TcpListener;

/// Serves `router` on an ephemeral local port.
pub async fn spawn_server(router: Router) -> SocketAddr {
    spawn_server_with(move |_| router).await
}

/// Like [`spawn_server`], for routers that need to link back to themselves.
pub async fn spawn_server_with(make: impl FnOnce(SocketAddr) -> Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let router = make(addr);
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

/// `4096.mp4` -> 4096
fn size_from(name: &str) -> usize {
    name.split('.').next().unwrap_or_default().parse().unwrap_or(0)
}

/// Media host with sized files.
///
/// - `/video/{n}.mp4` and `/image/{n}.png` return `n` bytes with Content-Length
/// - `/chunked/{n}` streams `n` bytes without Content-Length
/// - anything else is 404
pub fn media_host() -> Router {
    async fn sized(UrlPath(name): UrlPath<String>) -> Vec<u8> {
        vec![0u8; size_from(&name)]
    }

    async fn chunked(UrlPath(name): UrlPath<String>) -> impl IntoResponse {
        let total = size_from(&name);
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = (0..total)
            .step_by(1024)
            .map(|start| Ok(vec![0u8; (total - start).min(1024)]))
            .collect();
        Body::from_stream(futures_util::stream::iter(chunks))
    }

    Router::new()
        .route("/video/:name", get(sized))
        .route("/image/:name", get(sized))
        .route("/chunked/:name", get(chunked))
        .fallback(|| async { StatusCode::NOT_FOUND })
}

/// Settings with defaults filled in, as `Settings::new` would produce them.
pub fn test_settings(variant: RelayVariant) -> Settings {
    let mut settings: Settings = config::Config::builder()
        .set_override("telegram_token", "dummy")
        .and_then(|b| b.build())
        .and_then(|c| c.try_deserialize())
        .expect("settings");
    settings.relay_variant = variant;
    // Test upstreams all listen on 127.0.0.1.
    settings.allow_private_links = true;
    settings
}

/// One outbound reply observed by [`RecordingReplies`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    /// `send_text`
    Text(i64, String),
    /// `send_photo`
    Photo(i64, PhotoSource),
    /// `send_video`; `size` is what was on disk at send time
    Video {
        /// Target chat.
        chat_id: i64,
        /// File size, 0 if the file was missing.
        size: u64,
        /// Caption passed along.
        caption: Option<String>,
    },
}

/// Reply surface that records everything and can be told to fail.
#[derive(Default)]
pub struct RecordingReplies {
    sent: Mutex<Vec<Sent>>,
    fail_texts_containing: Option<String>,
    fail_videos: bool,
}

impl RecordingReplies {
    /// Fails every text containing `needle`.
    pub fn failing_texts_containing(needle: &str) -> Self {
        Self {
            fail_texts_containing: Some(needle.to_string()),
            ..Self::default()
        }
    }

    /// Fails every video upload.
    pub fn failing_videos() -> Self {
        Self {
            fail_videos: true,
            ..Self::default()
        }
    }

    /// Successfully delivered replies, in order.
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("lock").clone()
    }

    /// Only the delivered texts.
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(_, text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn push(&self, sent: Sent) {
        self.sent.lock().expect("lock").push(sent);
    }
}

#[async_trait]
impl ReplySurface for RecordingReplies {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        if let Some(needle) = &self.fail_texts_containing {
            if text.contains(needle.as_str()) {
                bail!("simulated send failure");
            }
        }
        self.push(Sent::Text(chat_id, text.to_string()));
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: &PhotoSource,
        _caption: Option<&str>,
    ) -> Result<()> {
        if let PhotoSource::File(path) = photo {
            if !path.exists() {
                bail!("photo file missing");
            }
        }
        self.push(Sent::Photo(chat_id, photo.clone()));
        Ok(())
    }

    async fn send_video(&self, chat_id: i64, path: &Path, caption: Option<&str>) -> Result<()> {
        if self.fail_videos {
            bail!("simulated upload failure");
        }
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        self.push(Sent::Video {
            chat_id,
            size,
            caption: caption.map(str::to_string),
        });
        Ok(())
    }
}
