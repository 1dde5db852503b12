//! Per-user session state
//!
//! Keeps the active tutor mode and a short rolling chat history for every
//! user. State lives in memory only; a restart simply drops everyone back
//! into the default mode with a fresh conversation.

use dashmap::DashMap;

use crate::ai::client::ChatMessage;
use crate::core::config;

/// What the bot does with the user's next message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TutorMode {
    /// Free-form tutoring questions
    #[default]
    Chat,
    /// Translate incoming text to Uzbek
    Translate,
    /// English conversation practice, replies in English only
    Speak,
}

impl TutorMode {
    /// System prompt that drives the model in this mode.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            TutorMode::Chat => {
                "You are a helpful English tutor. Answer questions clearly in the user's language (Uzbek or English)."
            }
            TutorMode::Translate => "You are a translator. Translate the text to Uzbek clearly and accurately.",
            TutorMode::Speak => {
                "You are an English teacher. Reply only in English. Correct any mistakes briefly and encourage the learner."
            }
        }
    }

    /// Reply-keyboard button for this mode.
    pub fn label(&self) -> &'static str {
        match self {
            TutorMode::Chat => "🧠 Chat AI",
            TutorMode::Translate => "📘 Tarjima",
            TutorMode::Speak => "🗣 Speak English",
        }
    }

    /// Maps a pressed keyboard button back to a mode.
    pub fn from_label(text: &str) -> Option<Self> {
        match text {
            "🧠 Chat AI" => Some(TutorMode::Chat),
            "📘 Tarjima" => Some(TutorMode::Translate),
            "🗣 Speak English" => Some(TutorMode::Speak),
            _ => None,
        }
    }
}

/// Thread-safe store of per-user mode and history, shared across handlers.
#[derive(Debug, Default)]
pub struct SessionStore {
    modes: DashMap<i64, TutorMode>,
    history: DashMap<i64, Vec<ChatMessage>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active mode for the user, `Chat` until they pick one.
    pub fn mode(&self, user_id: i64) -> TutorMode {
        self.modes.get(&user_id).map(|m| *m).unwrap_or_default()
    }

    /// Switches the mode. A switch starts a fresh conversation.
    pub fn set_mode(&self, user_id: i64, mode: TutorMode) {
        self.modes.insert(user_id, mode);
        self.history.remove(&user_id);
    }

    /// Snapshot of the rolling history, oldest first.
    pub fn history(&self, user_id: i64) -> Vec<ChatMessage> {
        self.history.get(&user_id).map(|h| h.clone()).unwrap_or_default()
    }

    /// Appends one question/answer pair, trimming the oldest pair when the
    /// history runs past the configured window.
    pub fn push_exchange(&self, user_id: i64, question: &str, answer: &str) {
        let mut entry = self.history.entry(user_id).or_default();
        entry.push(ChatMessage::user(question));
        entry.push(ChatMessage::assistant(answer));

        let max = config::ai::HISTORY_MAX_TURNS * 2;
        if entry.len() > max {
            let excess = entry.len() - max;
            entry.drain(..excess);
        }
    }

    pub fn clear_history(&self, user_id: i64) {
        self.history.remove(&user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_mode_is_chat() {
        let store = SessionStore::new();
        assert_eq!(store.mode(42), TutorMode::Chat);
    }

    #[test]
    fn test_set_mode_switches_and_resets_history() {
        let store = SessionStore::new();
        store.push_exchange(42, "hello", "hi there");
        assert_eq!(store.history(42).len(), 2);

        store.set_mode(42, TutorMode::Speak);
        assert_eq!(store.mode(42), TutorMode::Speak);
        assert!(store.history(42).is_empty());
    }

    #[test]
    fn test_history_keeps_only_recent_turns() {
        let store = SessionStore::new();
        for n in 1..=6 {
            store.push_exchange(1, &format!("q{}", n), &format!("a{}", n));
        }

        let history = store.history(1);
        assert_eq!(history.len(), config::ai::HISTORY_MAX_TURNS * 2);

        // Oldest turns were dropped, the window starts at q3
        assert_eq!(history[0].role, "user");
        assert_eq!(history[0].text(), Some("q3"));
        assert_eq!(history.last().unwrap().text(), Some("a6"));
    }

    #[test]
    fn test_histories_are_per_user() {
        let store = SessionStore::new();
        store.push_exchange(1, "salom", "hello");
        assert!(store.history(2).is_empty());

        store.clear_history(1);
        assert!(store.history(1).is_empty());
    }

    #[test]
    fn test_mode_labels_round_trip() {
        for mode in [TutorMode::Chat, TutorMode::Translate, TutorMode::Speak] {
            assert_eq!(TutorMode::from_label(mode.label()), Some(mode));
        }
        assert_eq!(TutorMode::from_label("random text"), None);
    }
}
