#![deny(missing_docs)]
//! Relay bot library.
//!
//! Telegram webhook relay: one inbound text message, one upstream call,
//! one reply.

/// Telegram-facing handlers and reply surface.
pub mod bot;
/// Configuration management.
pub mod config;
/// Log redaction for the tracing subscriber.
pub mod logging;
/// Upstream call adapter, response extraction and media download.
pub mod relay;
/// Process entrypoint: webhook server and polling dispatcher.
pub mod runner;
/// Chat identity storage (R2/S3).
pub mod storage;
/// Utility functions.
pub mod utils;

/// Test fixtures.
#[cfg(test)]
pub mod testing;
