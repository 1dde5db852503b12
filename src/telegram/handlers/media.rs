//! Photo and voice message handlers.
//!
//! Photos go to the vision model for text extraction and translation. Voice
//! messages run through the speaking-practice pipeline and come back as a
//! spoken review. Both cost one request from the daily quota.

use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, ParseMode};
use teloxide::utils::html;

use super::chat::consume_or_notify;
use super::types::{HandlerDeps, HandlerError, UserInfo};
use crate::ai::voice::{review_speech, VoiceOutcome};
use crate::ai::ChatMessage;
use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::session::TutorMode;
use crate::telegram::gate::ensure_channel_member;

const VISION_PROMPT: &str = "Extract any text from this image and translate it to Uzbek.";

/// Handles an incoming photo: extract and translate whatever text is on it.
pub async fn handle_photo_message(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let user = UserInfo::from_message(msg);
    if !ensure_channel_member(bot, msg.chat.id, UserId(user.user_id as u64)).await? {
        return Ok(());
    }
    if !consume_or_notify(bot, msg, deps, &user).await? {
        return Ok(());
    }

    let Some(photo) = msg.photo().and_then(|sizes| sizes.iter().max_by_key(|p| p.file.size)) else {
        return Ok(());
    };

    let image_url = match telegram_file_url(bot, photo.file.id.clone()).await {
        Ok(url) => url,
        Err(e) => {
            log::error!("❌ Failed to resolve photo file for user {}: {}", user.user_id, e);
            bot.send_message(msg.chat.id, "❌ Rasmni qayta ishlashda xatolik yuz berdi.")
                .await?;
            return Ok(());
        }
    };

    let messages = vec![ChatMessage::user_with_image(VISION_PROMPT, &image_url)];
    match deps
        .ai
        .chat_completion(
            messages,
            &config::ai::CHAT_MODEL,
            config::ai::CHAT_TEMPERATURE,
            config::ai::VISION_MAX_TOKENS,
        )
        .await
    {
        Ok(answer) => {
            bot.send_message(msg.chat.id, answer).await?;
        }
        Err(e) => {
            log::error!("❌ Vision request failed for user {}: {}", user.user_id, e);
            bot.send_message(msg.chat.id, "❌ Rasmni qayta ishlashda xatolik yuz berdi.")
                .await?;
        }
    }

    Ok(())
}

/// Handles an incoming voice message in speaking-practice mode.
pub async fn handle_voice_message(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let user = UserInfo::from_message(msg);
    if !ensure_channel_member(bot, msg.chat.id, UserId(user.user_id as u64)).await? {
        return Ok(());
    }

    if deps.sessions.mode(user.user_id) != TutorMode::Speak {
        bot.send_message(msg.chat.id, "🗣 Avval \"Speak English\" rejimini tanlang!")
            .await?;
        return Ok(());
    }

    if !consume_or_notify(bot, msg, deps, &user).await? {
        return Ok(());
    }

    let Some(voice) = msg.voice() else {
        return Ok(());
    };
    let duration_secs = voice.duration.seconds();

    let audio = match download_telegram_file(bot, voice.file.id.clone()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!("❌ Failed to download voice file for user {}: {}", user.user_id, e);
            bot.send_message(msg.chat.id, "❌ Ovozni qayta ishlashda xatolik yuz berdi.")
                .await?;
            return Ok(());
        }
    };

    match review_speech(&deps.ai, audio, duration_secs).await {
        Ok(VoiceOutcome::TooShort) => {
            bot.send_message(msg.chat.id, "❌ Ovoz aniq eshitilmadi. Qaytadan urinib ko'ring!")
                .await?;
        }
        Ok(VoiceOutcome::Review(review)) => {
            match review.speech {
                Some(bytes) => {
                    // The feedback itself is in the audio, the caption carries
                    // the transcript and pace
                    let caption = format!(
                        "🎤 <b>You said:</b>\n\"{}\"\n\n🎵 Speed: {} WPM\n{}",
                        html::escape(&review.transcript),
                        review.wpm,
                        review.pace_hint
                    );
                    bot.send_voice(msg.chat.id, InputFile::memory(bytes).file_name("review.mp3"))
                        .caption(caption)
                        .parse_mode(ParseMode::Html)
                        .await?;
                }
                None => {
                    let text = format!(
                        "🎤 <b>You said:</b>\n\"{}\"\n\n📝 {}\n\n🎵 Speed: {} WPM\n{}",
                        html::escape(&review.transcript),
                        html::escape(&review.feedback),
                        review.wpm,
                        review.pace_hint
                    );
                    bot.send_message(msg.chat.id, text).parse_mode(ParseMode::Html).await?;
                }
            }
        }
        Err(e) => {
            log::error!("❌ Voice review failed for user {}: {}", user.user_id, e);
            bot.send_message(msg.chat.id, "❌ Ovozni qayta ishlashda xatolik yuz berdi.")
                .await?;
        }
    }

    Ok(())
}

/// Resolves a Telegram file id into a downloadable URL.
async fn telegram_file_url(bot: &Bot, file_id: FileId) -> Result<String, teloxide::RequestError> {
    let file = bot.get_file(file_id).await?;
    Ok(file_download_url(bot.token(), &file.path))
}

/// Downloads a Telegram file into memory.
async fn download_telegram_file(bot: &Bot, file_id: FileId) -> AppResult<Vec<u8>> {
    let url = telegram_file_url(bot, file_id).await?;

    let client = reqwest::Client::builder().timeout(config::network::timeout()).build()?;
    let response = client.get(&url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::Validation(format!(
            "Telegram file download failed with status {}",
            status
        )));
    }

    Ok(response.bytes().await?.to_vec())
}

/// File endpoint of the Bot API server, respecting a custom BOT_API_URL.
fn file_download_url(token: &str, file_path: &str) -> String {
    let base = std::env::var("BOT_API_URL").unwrap_or_else(|_| "https://api.telegram.org".to_string());
    build_file_url(&base, token, file_path)
}

fn build_file_url(base: &str, token: &str, file_path: &str) -> String {
    format!("{}/file/bot{}/{}", base.trim_end_matches('/'), token, file_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_file_url_shape() {
        assert_eq!(
            build_file_url("https://api.telegram.org", "123:ABC", "voice/file_7.oga"),
            "https://api.telegram.org/file/bot123:ABC/voice/file_7.oga"
        );
        // Trailing slash on the base must not double up
        assert_eq!(
            build_file_url("http://localhost:8081/", "123:ABC", "voice/file_7.oga"),
            "http://localhost:8081/file/bot123:ABC/voice/file_7.oga"
        );
    }
}
