//! Outbound reply surface.
//!
//! The interaction handler only talks to [`ReplySurface`]; [`TelegramReplies`]
//! is the production implementation on top of `teloxide`.

use crate::utils::{split_long_message, truncate_str};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use std::path::{Path, PathBuf};
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile};
use tracing::debug;

/// Maximum message length for Telegram with safety margin.
/// Telegram's official limit is 4096.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;

/// Longest photo or video caption Telegram accepts.
pub const TELEGRAM_CAPTION_LIMIT: usize = 1024;

/// Cuts a caption down to [`TELEGRAM_CAPTION_LIMIT`] characters.
#[must_use]
pub fn fit_caption(caption: &str) -> String {
    truncate_str(caption, TELEGRAM_CAPTION_LIMIT)
}

/// Where a photo comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoSource {
    /// Telegram fetches the URL itself.
    Url(Url),
    /// A local file is uploaded.
    File(PathBuf),
}

/// The three reply primitives the relay needs.
#[async_trait]
pub trait ReplySurface: Send + Sync {
    /// Send a text message.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;
    /// Send a photo with an optional caption.
    async fn send_photo(
        &self,
        chat_id: i64,
        photo: &PhotoSource,
        caption: Option<&str>,
    ) -> Result<()>;
    /// Send a local video file with an optional caption.
    async fn send_video(&self, chat_id: i64, path: &Path, caption: Option<&str>) -> Result<()>;
}

/// Telegram Bot API implementation of [`ReplySurface`].
#[derive(Clone)]
pub struct TelegramReplies {
    bot: Bot,
}

impl TelegramReplies {
    /// Wraps a bot handle.
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ReplySurface for TelegramReplies {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        // Long answers still count as one reply; Telegram just needs them in pieces.
        for part in split_long_message(text, TELEGRAM_MESSAGE_LIMIT) {
            self.bot.send_message(ChatId(chat_id), part).await?;
        }
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: &PhotoSource,
        caption: Option<&str>,
    ) -> Result<()> {
        let file = match photo {
            PhotoSource::Url(url) => InputFile::url(url.clone()),
            PhotoSource::File(path) => InputFile::file(path.clone()),
        };
        let mut req = self.bot.send_photo(ChatId(chat_id), file);
        if let Some(caption) = caption {
            req = req.caption(fit_caption(caption));
        }
        req.await?;
        Ok(())
    }

    async fn send_video(&self, chat_id: i64, path: &Path, caption: Option<&str>) -> Result<()> {
        debug!(chat_id, path = %path.display(), "Uploading video");
        let mut req = self
            .bot
            .send_video(ChatId(chat_id), InputFile::file(path.to_path_buf()))
            .supports_streaming(true);
        if let Some(caption) = caption {
            req = req.caption(fit_caption(caption));
        }
        req.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_caption() {
        assert_eq!(fit_caption("short title"), "short title");

        let long = "é".repeat(3000);
        let fitted = fit_caption(&long);
        assert_eq!(fitted.chars().count(), TELEGRAM_CAPTION_LIMIT);
        assert!(long.starts_with(&fitted));
    }
}
