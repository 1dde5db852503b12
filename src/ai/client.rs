//! OpenAI API client for the tutoring modes.
//!
//! One small hand-rolled client instead of an SDK: chat completions (text
//! and vision), Whisper transcription and TTS, which is everything the bot
//! needs. Audio moves as in-memory bytes in both directions because voice
//! messages arrive from and return to Telegram without touching disk.

use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use crate::core::config;
use crate::core::error::{AppError, AppResult};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI client, cheap to clone and share between handlers.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    http: Client,
    api_key: String,
    // Overridden in tests to point at a local mock server
    pub(crate) base_url: String,
}

impl OpenAIClient {
    /// Creates a client from the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> AppResult<Self> {
        Self::new(config::ai::OPENAI_API_KEY.clone())
    }

    pub fn new(api_key: impl Into<String>) -> AppResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AppError::Validation("OPENAI_API_KEY is not set".to_string()));
        }

        let http = Client::builder().timeout(config::network::timeout()).build()?;

        Ok(Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    fn authorized_post(&self, endpoint: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, endpoint))
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    /// Chat completion, returns the first choice's text.
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> AppResult<String> {
        let request = CompletionRequest {
            model: model.to_string(),
            messages,
            temperature,
            max_tokens,
        };

        let response = self.authorized_post("/chat/completions").json(&request).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Ai(format!("chat completion returned {}: {}", status, body)));
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&body).map_err(|e| AppError::Ai(format!("unreadable completion: {}", e)))?;

        parsed
            .choices
            .first()
            .and_then(|choice| choice.message.text())
            .map(str::to_string)
            .ok_or_else(|| AppError::Ai("completion carried no text".to_string()))
    }

    /// Transcribes audio with Whisper.
    pub async fn transcribe(&self, audio: Vec<u8>, file_name: &str, language: &str) -> AppResult<String> {
        let form = Form::new()
            .text("model", "whisper-1")
            .text("language", language.to_string())
            .part("file", Part::bytes(audio).file_name(file_name.to_string()));

        let response = self.authorized_post("/audio/transcriptions").multipart(form).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Ai(format!("transcription returned {}: {}", status, body)));
        }

        let parsed: Transcription =
            serde_json::from_str(&body).map_err(|e| AppError::Ai(format!("unreadable transcription: {}", e)))?;
        Ok(parsed.text)
    }

    /// Synthesizes speech, returns the audio bytes (mp3).
    pub async fn synthesize(&self, text: &str, voice: &str) -> AppResult<Vec<u8>> {
        let request = SpeechRequest {
            model: "tts-1".to_string(),
            voice: voice.to_string(),
            input: text.to_string(),
        };

        let response = self.authorized_post("/audio/speech").json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Ai(format!("speech synthesis returned {}: {}", status, body)));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Chat message. Content is either plain text or, for vision requests,
/// a list of parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
}

impl ChatMessage {
    pub fn system(text: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(MessageContent::Text(text.to_string())),
        }
    }

    pub fn user(text: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(MessageContent::Text(text.to_string())),
        }
    }

    pub fn assistant(text: &str) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(MessageContent::Text(text.to_string())),
        }
    }

    /// User message carrying a prompt plus an image URL for the vision model.
    pub fn user_with_image(text: &str, image_url: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(MessageContent::Parts(vec![
                ContentPart::Text {
                    text: text.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_url.to_string(),
                    },
                },
            ])),
        }
    }

    /// Plain-text content, `None` for part lists and empty messages.
    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().and_then(|c| c.as_text())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Parts(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    text: String,
}

#[derive(Debug, Serialize)]
struct SpeechRequest {
    model: String,
    voice: String,
    input: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OpenAIClient {
        let mut client = OpenAIClient::new("sk-test").expect("client");
        client.base_url = server.uri();
        client
    }

    #[test]
    fn test_blank_api_key_is_rejected() {
        let err = OpenAIClient::new("  ").unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_chat_completion_returns_first_choice() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "Salom!" } }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client(&server)
            .chat_completion(vec![ChatMessage::user("Hi")], "gpt-4o-mini", 0.6, 64)
            .await
            .unwrap();

        assert_eq!(reply, "Salom!");
    }

    #[tokio::test]
    async fn test_chat_completion_reports_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .mount(&server)
            .await;

        let err = client(&server)
            .chat_completion(vec![ChatMessage::user("Hi")], "gpt-4o-mini", 0.6, 64)
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("chat completion returned 429"));
        assert!(msg.contains("Too Many Requests"));
    }

    #[tokio::test]
    async fn test_chat_completion_rejects_empty_choices() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = client(&server)
            .chat_completion(vec![ChatMessage::user("Hi")], "gpt-4o-mini", 0.6, 64)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("completion carried no text"));
    }

    #[tokio::test]
    async fn test_vision_message_serializes_as_parts() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [{
                    "role": "user",
                    "content": [
                        { "type": "text", "text": "What is on this photo?" },
                        { "type": "image_url", "image_url": { "url": "http://files.test/photo.jpg" } }
                    ]
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "A cat" } }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client(&server)
            .chat_completion(
                vec![ChatMessage::user_with_image(
                    "What is on this photo?",
                    "http://files.test/photo.jpg",
                )],
                "gpt-4o-mini",
                0.6,
                64,
            )
            .await
            .unwrap();

        assert_eq!(reply, "A cat");
    }

    #[tokio::test]
    async fn test_transcribe_sends_multipart_and_returns_text() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_string_contains("whisper-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "I go to school every day" })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client(&server)
            .transcribe(b"fake-ogg-bytes".to_vec(), "voice.ogg", "en")
            .await
            .unwrap();

        assert_eq!(text, "I go to school every day");
    }

    #[tokio::test]
    async fn test_synthesize_returns_audio_bytes() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp3-bytes".to_vec()))
            .mount(&server)
            .await;

        let bytes = client(&server).synthesize("Well done!", "alloy").await.unwrap();
        assert_eq!(bytes, b"mp3-bytes");
    }

    #[tokio::test]
    async fn test_synthesize_reports_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad voice"))
            .mount(&server)
            .await;

        let err = client(&server).synthesize("hi", "nope").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("speech synthesis returned 400"));
        assert!(msg.contains("bad voice"));
    }
}
