//! OpenAI integration: chat completions, Whisper transcription and speech
//! synthesis, plus the speaking-practice pipeline built on top of them.

pub mod client;
pub mod voice;

pub use client::{ChatMessage, OpenAIClient};
pub use voice::{review_speech, SpeechReview, VoiceOutcome};
