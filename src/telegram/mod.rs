//! Everything that talks to the Bot API.

pub mod bot;
pub mod gate;
pub mod handlers;
pub mod notifications;

pub use bot::{create_bot, setup_bot_commands, Command};
pub use handlers::schema::schema;
pub use handlers::types::{HandlerDeps, HandlerError};
pub use teloxide::Bot;
