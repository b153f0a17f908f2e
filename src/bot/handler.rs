//! Interaction handler: one inbound text message, one relay.
//!
//! Validation and the provisional acknowledgement happen inline; the upstream
//! call and the final reply run in a tracked task with its own error boundary.
//! Every failure inside that task ends as exactly one chat message, and
//! [`InteractionHandler::drain`] lets shutdown wait for tasks still running.

use crate::bot::replies::{fit_caption, PhotoSource, ReplySurface};
use crate::config::{ImageDelivery, InputKind, RelayProfile};
use crate::relay::extract::extract;
use crate::relay::{
    ExternalCallAdapter, InboundMessage, MediaFetcher, RelayError, RelayRequest, RelayResult,
    Stage,
};
use crate::storage::ChatIdentityRecorder;
use crate::utils::truncate_str;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use teloxide::utils::command::BotCommands;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show the welcome message
    #[command(description = "Start the bot.")]
    Start,
    /// Show usage help
    #[command(description = "Show how to use the bot.")]
    Help,
}

/// Recognises `/start` and `/help`, including the `/cmd@BotName` form.
#[must_use]
pub fn parse_command(text: &str) -> Option<Command> {
    let first = text.split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    match name.to_ascii_lowercase().as_str() {
        "start" => Some(Command::Start),
        "help" => Some(Command::Help),
        _ => None,
    }
}

/// Trims the input and rejects anything the upstream should never see.
///
/// # Errors
///
/// Returns [`RelayError::Validation`] for empty or command-prefixed text, and
/// for non-links when `kind` is [`InputKind::Link`].
pub fn validate_input(raw: &str, kind: InputKind) -> Result<String, RelayError> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(RelayError::Validation("empty message".into()));
    }
    if input.starts_with('/') {
        return Err(RelayError::Validation("commands are not relayed".into()));
    }
    if kind == InputKind::Link {
        match Url::parse(input) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(RelayError::Validation("not a link".into())),
        }
    }
    Ok(input.to_string())
}

/// Per-interaction progress, logged on every transition.
struct Interaction {
    chat_id: i64,
    stage: Stage,
}

impl Interaction {
    fn enter(&mut self, stage: Stage) {
        debug!(chat_id = self.chat_id, from = %self.stage, to = %stage, "Interaction stage");
        self.stage = stage;
    }
}

/// Dispatch unit bound to inbound text messages.
pub struct InteractionHandler {
    profile: RelayProfile,
    adapter: ExternalCallAdapter,
    fetcher: MediaFetcher,
    replies: Arc<dyn ReplySurface>,
    recorder: Option<ChatIdentityRecorder>,
    tasks: TaskTracker,
}

impl InteractionHandler {
    /// Assemble a handler from its collaborators.
    #[must_use]
    pub fn new(
        profile: RelayProfile,
        adapter: ExternalCallAdapter,
        fetcher: MediaFetcher,
        replies: Arc<dyn ReplySurface>,
        recorder: Option<ChatIdentityRecorder>,
    ) -> Self {
        Self {
            profile,
            adapter,
            fetcher,
            replies,
            recorder,
            tasks: TaskTracker::new(),
        }
    }

    /// Waits up to `grace` for relay tasks that are still running.
    ///
    /// Returns `false` if some were still unfinished when the time ran out.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tasks.close();
        let pending = self.tasks.len();
        if pending > 0 {
            info!(pending, grace_secs = grace.as_secs(), "Waiting for in-flight relays");
        }
        tokio::time::timeout(grace, self.tasks.wait()).await.is_ok()
    }

    /// Reply surface used by this handler.
    #[must_use]
    pub fn replies(&self) -> &Arc<dyn ReplySurface> {
        &self.replies
    }

    /// Active relay preset.
    #[must_use]
    pub const fn profile(&self) -> &RelayProfile {
        &self.profile
    }

    /// Handles `/start`: records the visit and returns the welcome text.
    #[must_use]
    pub fn on_start(&self, msg: &InboundMessage) -> String {
        info!(chat_id = msg.chat_id, "Chat started the bot");
        self.record_visit(msg.chat_id);
        self.profile.texts.welcome.to_string()
    }

    /// Handles `/help`.
    #[must_use]
    pub fn on_help(&self) -> String {
        format!("{}\n\n{}", self.profile.texts.usage, Command::descriptions())
    }

    /// Handles a text message.
    ///
    /// Returns `None` when the input was rejected (a usage hint has been sent),
    /// otherwise the handle of the relay task, which resolves to the final
    /// stage. Callers are free to drop the handle; the task delivers its own
    /// reply and stays tracked for [`InteractionHandler::drain`].
    pub async fn on_text(self: &Arc<Self>, msg: InboundMessage) -> Option<JoinHandle<Stage>> {
        let mut interaction = Interaction {
            chat_id: msg.chat_id,
            stage: Stage::Received,
        };
        self.record_visit(msg.chat_id);

        let request = match validate_input(&msg.text, self.profile.input_kind())
            .and_then(|input| self.profile.build_request(&input))
        {
            Ok(request) => request,
            Err(e) => {
                info!(chat_id = msg.chat_id, reason = %e, "Rejected input");
                if let Err(send_err) = self
                    .replies
                    .send_text(msg.chat_id, self.profile.texts.usage)
                    .await
                {
                    warn!(chat_id = msg.chat_id, error = %send_err, "Failed to send usage hint");
                }
                return None;
            }
        };
        interaction.enter(Stage::Validated);

        // Best effort: the relay continues even if this does not arrive.
        if let Err(e) = self
            .replies
            .send_text(msg.chat_id, self.profile.texts.acknowledgement)
            .await
        {
            warn!(chat_id = msg.chat_id, error = %e, "Failed to send acknowledgement");
        }
        interaction.enter(Stage::Acknowledged);

        let this = Arc::clone(self);
        Some(
            self.tasks
                .spawn(async move { this.complete(interaction, request).await }),
        )
    }

    async fn complete(&self, mut interaction: Interaction, request: RelayRequest) -> Stage {
        let chat_id = interaction.chat_id;
        match self.relay(&mut interaction, &request).await {
            Ok(()) => {
                interaction.enter(Stage::Done);
                info!(chat_id, "Relay completed");
            }
            Err(e) => {
                let failed_at = interaction.stage;
                interaction.enter(Stage::Error);
                error!(chat_id, stage = %failed_at, error = %e, "Relay failed");
                let text = self.error_message(&e);
                if let Err(send_err) = self.replies.send_text(chat_id, &text).await {
                    error!(chat_id, error = %send_err, "Failed to send error reply");
                }
            }
        }
        interaction.stage
    }

    async fn relay(
        &self,
        interaction: &mut Interaction,
        request: &RelayRequest,
    ) -> Result<(), RelayError> {
        let chat_id = interaction.chat_id;

        interaction.enter(Stage::Calling);
        let raw = self.adapter.call(request).await?;

        interaction.enter(Stage::Extracting);
        let result = extract(&raw, self.profile.expected_shape())?;

        match result {
            RelayResult::TextAnswer(answer) => {
                interaction.enter(Stage::Replying);
                self.replies
                    .send_text(chat_id, &answer)
                    .await
                    .map_err(|e| RelayError::Delivery(e.to_string()))
            }
            RelayResult::ImageSet(urls) => {
                interaction.enter(Stage::Replying);
                self.deliver_images(chat_id, &urls).await;
                Ok(())
            }
            RelayResult::MediaLink { url, title } => {
                // Scraped from a page the user chose.
                self.profile.screen_link(&url)?;
                interaction.enter(Stage::Fetching);
                let media = self
                    .fetcher
                    .fetch(&url, self.profile.media_max_bytes)
                    .await?;
                info!(chat_id, size = media.size_bytes(), "Media ready to send");

                interaction.enter(Stage::Replying);
                let caption = title.as_deref().map(fit_caption);
                let sent = self
                    .replies
                    .send_video(chat_id, media.path(), caption.as_deref())
                    .await;
                // Removes the file whatever the send outcome was.
                drop(media);
                sent.map_err(|e| RelayError::Delivery(e.to_string()))
            }
        }
    }

    /// Sends each image separately; one failure never stops the rest.
    async fn deliver_images(&self, chat_id: i64, urls: &[Url]) {
        let total = urls.len();
        for (index, url) in urls.iter().enumerate() {
            if let Err(e) = self.send_image(chat_id, url).await {
                warn!(chat_id, %url, error = %e, "Failed to send image");
                let note = format!(
                    "⚠️ Image {}/{total} could not be sent: {}",
                    index + 1,
                    truncate_str(e.to_string(), 120)
                );
                if let Err(send_err) = self.replies.send_text(chat_id, &note).await {
                    warn!(chat_id, error = %send_err, "Failed to report image failure");
                }
            }
        }
    }

    async fn send_image(&self, chat_id: i64, url: &Url) -> anyhow::Result<()> {
        match self.profile.image_delivery {
            ImageDelivery::Url => {
                self.replies
                    .send_photo(chat_id, &PhotoSource::Url(url.clone()), None)
                    .await
            }
            ImageDelivery::Upload => {
                self.profile.screen_link(url)?;
                let media = self.fetcher.fetch(url, self.profile.media_max_bytes).await?;
                self.replies
                    .send_photo(chat_id, &PhotoSource::File(media.path().to_path_buf()), None)
                    .await
            }
        }
    }

    fn error_message(&self, err: &RelayError) -> String {
        format!("❌ {}\n{}", self.profile.texts.failure, err.diagnostic())
    }

    fn record_visit(&self, chat_id: i64) {
        if let Some(recorder) = &self.recorder {
            // Detached: replies never wait on storage.
            drop(recorder.record_visit(chat_id));
        }
    }
}
