/// Interaction handler and command parsing
pub mod handler;
/// Outbound reply surface
pub mod replies;

pub use handler::{Command, InteractionHandler};
pub use replies::{ReplySurface, TelegramReplies};
