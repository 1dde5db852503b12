//! Handler types and shared dependencies

use std::sync::Arc;

use teloxide::types::Message;

use crate::ai::OpenAIClient;
use crate::core::session::SessionStore;
use crate::storage::db::DbPool;

/// Boxed error every dptree endpoint returns.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared state injected into every handler instead of globals.
#[derive(Clone)]
pub struct HandlerDeps {
    pub db_pool: Arc<DbPool>,
    pub sessions: Arc<SessionStore>,
    pub ai: Arc<OpenAIClient>,
    pub bot_username: Option<String>,
}

impl HandlerDeps {
    pub fn new(
        db_pool: Arc<DbPool>,
        sessions: Arc<SessionStore>,
        ai: Arc<OpenAIClient>,
        bot_username: Option<String>,
    ) -> Self {
        Self {
            db_pool,
            sessions,
            ai,
            bot_username,
        }
    }
}

/// Sender identity extracted from a message
#[derive(Clone)]
pub struct UserInfo {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

impl UserInfo {
    /// Reads the sender out of a message. Channel posts have no sender,
    /// there the chat id stands in.
    pub fn from_message(msg: &Message) -> Self {
        Self {
            user_id: msg
                .from
                .as_ref()
                .and_then(|u| i64::try_from(u.id.0).ok())
                .unwrap_or(msg.chat.id.0),
            username: msg.from.as_ref().and_then(|u| u.username.clone()),
            first_name: msg.from.as_ref().map(|u| u.first_name.clone()),
        }
    }

    /// Display name for messages about this user
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("Foydalanuvchi")
    }
}
