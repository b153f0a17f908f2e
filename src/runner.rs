//! Wiring: builds the handler from settings and feeds it updates, either from
//! the webhook server or from long polling.

use crate::bot::handler::{parse_command, Command, InteractionHandler};
use crate::bot::replies::{ReplySurface, TelegramReplies};
use crate::config::{Settings, TransportMode};
use crate::relay::{ExternalCallAdapter, InboundMessage, MediaFetcher, Stage};
use crate::storage::{ChatIdentityRecorder, ChatStore, R2ChatStore};
use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use reqwest::Url;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{Update, UpdateKind};
use teloxide::utils::command::BotCommands;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Body of `GET` (or any non-`POST`) requests.
pub const LIVENESS_TEXT: &str = "Bot is running.";

/// Start the bot and block until shutdown.
///
/// # Errors
///
/// Returns an error if the webhook listener cannot be bound or the server fails.
pub async fn run(settings: Arc<Settings>) -> Result<()> {
    let bot = Bot::new(settings.telegram_token.clone());
    let handler = Arc::new(build_handler(&settings, bot.clone()).await?);

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!(error = %e, "Failed to register bot commands");
    }

    let served = match settings.transport {
        TransportMode::Webhook => serve_webhook(&settings, &bot, Arc::clone(&handler)).await,
        TransportMode::Polling => {
            run_polling(bot, Arc::clone(&handler)).await;
            Ok(())
        }
    };

    drain_relays(&handler, settings.shutdown_grace()).await;
    served
}

/// Lets relays accepted before the shutdown signal deliver their replies.
async fn drain_relays(handler: &InteractionHandler, grace: Duration) {
    if handler.drain(grace).await {
        info!("All in-flight relays finished");
    } else {
        warn!(
            grace_secs = grace.as_secs(),
            "Shutdown grace period elapsed with relays still running"
        );
    }
}

async fn build_handler(settings: &Settings, bot: Bot) -> Result<InteractionHandler> {
    let profile = settings.profile()?;
    info!(
        variant = ?profile.variant,
        endpoint = profile.endpoint.as_ref().map_or("<submitted link>", Url::as_str),
        "Relay profile loaded"
    );

    let recorder = if settings.record_chats {
        Some(init_recorder(settings).await?)
    } else {
        info!("Chat recording disabled.");
        None
    };

    let replies: Arc<dyn ReplySurface> = Arc::new(TelegramReplies::new(bot));
    Ok(InteractionHandler::new(
        profile,
        ExternalCallAdapter::new(),
        MediaFetcher::new(settings.media_dir(), settings.media_timeout()),
        replies,
        recorder,
    ))
}

async fn init_recorder(settings: &Settings) -> Result<ChatIdentityRecorder> {
    let store = R2ChatStore::new(settings)
        .await
        .context("Failed to initialize R2 storage")?;
    info!("R2 Storage initialized.");
    if store.check_connection().await.is_err() {
        // Recording is best effort; the bot still answers.
        error!("R2 Storage connection check returned error.");
    }
    Ok(ChatIdentityRecorder::new(Arc::new(store)))
}

async fn serve_webhook(
    settings: &Settings,
    bot: &Bot,
    handler: Arc<InteractionHandler>,
) -> Result<()> {
    if let Some(url) = &settings.webhook_url {
        let url = Url::parse(url).context("WEBHOOK_URL is invalid")?;
        match bot.set_webhook(url.clone()).await {
            Ok(_) => info!(%url, "Webhook registered"),
            Err(e) => error!(error = %e, "Failed to register webhook"),
        }
    }

    let listener = TcpListener::bind(&settings.webhook_bind)
        .await
        .with_context(|| format!("Failed to bind {}", settings.webhook_bind))?;
    info!(
        addr = %settings.webhook_bind,
        path = %settings.webhook_path,
        "Webhook server listening"
    );

    axum::serve(listener, router(handler, &settings.webhook_path))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Webhook server failed")?;

    info!("Webhook server stopped");
    Ok(())
}

async fn run_polling(bot: Bot, handler: Arc<InteractionHandler>) {
    info!("Bot is running in polling mode...");
    let mut dispatcher =
        Dispatcher::builder(bot, Update::filter_message().endpoint(handle_message))
            .dependencies(dptree::deps![handler])
            .build();

    // Same signals as the webhook server, SIGTERM included.
    let token = dispatcher.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        match token.shutdown() {
            Ok(stopped) => stopped.await,
            Err(e) => warn!(error = %e, "Dispatcher was not running"),
        }
    });

    dispatcher.dispatch().await;
    info!("Polling stopped");
}

async fn handle_message(
    msg: Message,
    handler: Arc<InteractionHandler>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = dispatch_message(&handler, &msg).await {
        error!(chat_id = msg.chat.id.0, error = %e, "Message handler error");
    }
    respond(())
}

/// HTTP surface for Telegram webhook deliveries.
///
/// `POST <path>` takes one update; any other request gets [`LIVENESS_TEXT`].
pub fn router(handler: Arc<InteractionHandler>, path: &str) -> Router {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Router::new()
        .route(&path, post(receive_update).fallback(liveness))
        .fallback(liveness)
        .with_state(handler)
}

async fn liveness() -> &'static str {
    LIVENESS_TEXT
}

async fn receive_update(
    State(handler): State<Arc<InteractionHandler>>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    match handle_update_body(&handler, &body).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))),
        Err(e) => {
            error!(error = %e, "Failed to handle update");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": e.to_string() })),
            )
        }
    }
}

async fn handle_update_body(handler: &Arc<InteractionHandler>, body: &[u8]) -> Result<()> {
    let update: Update = serde_json::from_slice(body).context("Malformed update")?;
    match &update.kind {
        UpdateKind::Message(msg) => dispatch_message(handler, msg).await,
        _ => {
            debug!(update_id = update.id.0, "Ignoring non-message update");
            Ok(())
        }
    }
}

/// Routes one Telegram message. Non-text messages are ignored.
///
/// # Errors
///
/// Returns an error if a command reply could not be sent.
pub async fn dispatch_message(handler: &Arc<InteractionHandler>, msg: &Message) -> Result<()> {
    let Some(text) = msg.text() else {
        debug!(chat_id = msg.chat.id.0, "Ignoring non-text message");
        return Ok(());
    };
    let inbound = InboundMessage {
        chat_id: msg.chat.id.0,
        text: text.to_string(),
        received_at: msg.date,
    };
    route_inbound(handler, inbound).await.map(|_| ())
}

/// Routes `/start` and `/help` to their replies and everything else to the relay.
///
/// Returns the relay task handle when one was started.
///
/// # Errors
///
/// Returns an error if a command reply could not be sent.
pub async fn route_inbound(
    handler: &Arc<InteractionHandler>,
    inbound: InboundMessage,
) -> Result<Option<JoinHandle<Stage>>> {
    let chat_id = inbound.chat_id;
    match parse_command(&inbound.text) {
        Some(Command::Start) => {
            let reply = handler.on_start(&inbound);
            handler.replies().send_text(chat_id, &reply).await?;
            Ok(None)
        }
        Some(Command::Help) => {
            let reply = handler.on_help();
            handler.replies().send_text(chat_id, &reply).await?;
            Ok(None)
        }
        None => Ok(handler.on_text(inbound).await),
    }
}

/// Wait for SIGINT (ctrl-c) or SIGTERM, then return.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .unwrap_or_else(|e| error!(error = %e, "ctrl-c handler failed"));
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM handler unavailable, relying on ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received ctrl-c, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
