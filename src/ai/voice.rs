//! Speaking-practice pipeline: transcribe, review, synthesize.
//!
//! A voice message runs through three stages. Whisper turns it into text,
//! the examiner model corrects it and estimates a CEFR level, and TTS reads
//! the review back. The stages are isolated: a transcript too short to
//! grade stops the pipeline early without burning a completion call, and a
//! failed synthesis degrades to a text-only review instead of failing the
//! whole message.

use crate::ai::client::{ChatMessage, OpenAIClient};
use crate::core::config;
use crate::core::error::AppResult;

/// System prompt for the speaking examiner.
pub const EXAMINER_PROMPT: &str = "You are an English speaking examiner.\n\
Analyze the text and provide:\n\
1. Corrections (if needed)\n\
2. Brief explanation\n\
3. CEFR level (A1, A2, B1, B2)\n\
4. Score 1-10\n\n\
Keep response SHORT and encouraging.\n\
Answer in English.";

/// Anything shorter than this is treated as noise, not speech
const MIN_TRANSCRIPT_CHARS: usize = 5;

/// Finished review of one voice message.
#[derive(Debug, Clone)]
pub struct SpeechReview {
    /// What Whisper heard
    pub transcript: String,
    /// Examiner's corrections and level estimate
    pub feedback: String,
    /// Estimated speaking pace
    pub wpm: u32,
    pub pace_hint: &'static str,
    /// Spoken version of the feedback, `None` when synthesis failed
    pub speech: Option<Vec<u8>>,
}

/// Result of running a voice message through the pipeline.
#[derive(Debug, Clone)]
pub enum VoiceOutcome {
    Review(SpeechReview),
    /// Transcript too short to grade, the user should try again
    TooShort,
}

/// Runs one voice message through transcription, review and synthesis.
pub async fn review_speech(client: &OpenAIClient, audio: Vec<u8>, duration_secs: u32) -> AppResult<VoiceOutcome> {
    let transcript = client
        .transcribe(audio, "voice.ogg", config::ai::SPEECH_LANGUAGE)
        .await?;
    let transcript = transcript.trim().to_string();

    if transcript.chars().count() < MIN_TRANSCRIPT_CHARS {
        return Ok(VoiceOutcome::TooShort);
    }

    let messages = vec![ChatMessage::system(EXAMINER_PROMPT), ChatMessage::user(&transcript)];
    let feedback = client
        .chat_completion(
            messages,
            &config::ai::CHAT_MODEL,
            config::ai::CHAT_TEMPERATURE,
            config::ai::REVIEW_MAX_TOKENS,
        )
        .await?;

    let wpm = words_per_minute(&transcript, duration_secs);

    // Losing the voice reply is not worth losing the review itself
    let speech = match client.synthesize(&spoken_text(&feedback), &config::ai::TTS_VOICE).await {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            log::warn!("⚠️ Speech synthesis failed, sending text review only: {}", e);
            None
        }
    };

    Ok(VoiceOutcome::Review(SpeechReview {
        transcript,
        feedback,
        wpm,
        pace_hint: pace_hint(wpm),
        speech,
    }))
}

/// Words per minute, rounded. Zero duration reads as zero pace.
pub fn words_per_minute(transcript: &str, duration_secs: u32) -> u32 {
    if duration_secs == 0 {
        return 0;
    }
    let words = transcript.split_whitespace().count() as f64;
    ((words / duration_secs as f64) * 60.0).round() as u32
}

/// One-line verdict on the speaking pace.
pub fn pace_hint(wpm: u32) -> &'static str {
    if wpm < 100 {
        "🐢 Try to speak a bit faster"
    } else if wpm > 180 {
        "🚀 Too fast! Slow down a bit"
    } else {
        "✅ Perfect speed!"
    }
}

/// Flattens the review into one line so TTS does not pause on newlines.
fn spoken_text(feedback: &str) -> String {
    feedback
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(". ")
}
