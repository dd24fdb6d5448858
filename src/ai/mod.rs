//! Typed wrapper over the remote speech/LLM provider.
//!
//! The client is stateless beyond its credentials: concurrent calls are
//! permitted and independent (`reqwest::Client` + base URL + credentials,
//! no interior mutable state of its own).

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Compiled-in model identifiers.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TTS_MODEL: &str = "tts-1";
pub const DEFAULT_TTS_VOICE: &str = "nova";
pub const DEFAULT_STT_MODEL: &str = "whisper-1";

/// One turn of a chat conversation, used for the structured `classify_json`
/// variant (message collection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// Operations exposed to the rest of the engine.
///
/// Exposed as a trait so the dialog engine can be tested against a fake
/// implementation instead of a live provider: the state machine's
/// invariants are worth testing in isolation from any real network call.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Synthesize `text` to speech, returning WAV bytes. One call per unique
    /// text; callers are expected to go through the TTS cache (C2).
    async fn synthesize(&self, text: &str) -> AppResult<Vec<u8>>;

    /// Transcribe the audio file at `audio_path`, in `language`.
    async fn transcribe(&self, audio_path: &Path, language: &str) -> AppResult<String>;

    /// Free-text chat completion.
    async fn classify(&self, system_prompt: &str, user_text: &str, temperature: f32) -> AppResult<String>;

    /// JSON-only chat completion. `schema_hint` is folded into the system
    /// prompt describing the expected shape; the response is parsed as JSON.
    async fn classify_json(&self, messages: &[ChatMessage], schema_hint: &str) -> AppResult<Value>;
}

/// HTTP-backed implementation talking to an OpenAI-compatible provider.
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    tts_model: String,
    tts_voice: String,
    stt_model: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com/v1")
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            tts_voice: DEFAULT_TTS_VOICE.to_string(),
            stt_model: DEFAULT_STT_MODEL.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    /// Map a non-success HTTP response to a transient/permanent [`AppError`].
    async fn map_error(context: &str, status: StatusCode, body: String) -> AppError {
        if status.is_client_error() {
            error!(%context, %status, %body, "AI provider rejected request");
            AppError::AiBadRequest(format!("{context}: {status}: {body}"))
        } else {
            warn!(%context, %status, %body, "AI provider transient failure");
            AppError::AiTransient(format!("{context}: {status}: {body}"))
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    #[serde(rename = "response_format")]
    format: &'static str,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl AiClient for OpenAiClient {
    async fn synthesize(&self, text: &str) -> AppResult<Vec<u8>> {
        debug!(chars = text.len(), "synthesizing speech");

        let response = self
            .http
            .post(self.endpoint("audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&SpeechRequest { model: &self.tts_model, input: text, voice: &self.tts_voice, format: "wav" })
            .send()
            .await
            .map_err(|e| AppError::AiTransient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_error("synthesize", status, body).await);
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| AppError::AiTransient(e.to_string()))
    }

    async fn transcribe(&self, audio_path: &Path, language: &str) -> AppResult<String> {
        let bytes = tokio::fs::read(audio_path).await?;
        let filename = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str("audio/wav")
            .map_err(|e| AppError::Internal(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .text("model", self.stt_model.clone())
            .text("language", language.to_string())
            .part("file", part);

        let response = self
            .http
            .post(self.endpoint("audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::AiTransient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Transcription(
                Self::map_error("transcribe", status, body).await.to_string(),
            ));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Transcription(e.to_string()))?;
        Ok(parsed.text)
    }

    async fn classify(&self, system_prompt: &str, user_text: &str, temperature: f32) -> AppResult<String> {
        let messages = [ChatMessage::system(system_prompt), ChatMessage::user(user_text)];
        let request = ChatCompletionRequest {
            model: &self.chat_model,
            messages: &messages,
            temperature,
            response_format: None,
        };

        let response = self
            .http
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::AiTransient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_error("classify", status, body).await);
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Classification(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::Classification("empty choices array".into()))
    }

    async fn classify_json(&self, messages: &[ChatMessage], schema_hint: &str) -> AppResult<Value> {
        let mut full = Vec::with_capacity(messages.len() + 1);
        full.push(ChatMessage::system(schema_hint));
        full.extend_from_slice(messages);

        let request = ChatCompletionRequest {
            model: &self.chat_model,
            messages: &full,
            temperature: 0.0,
            response_format: Some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .http
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::AiTransient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_error("classify_json", status, body).await);
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Classification(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::Classification("empty choices array".into()))?;

        serde_json::from_str(&content).map_err(|e| AppError::Classification(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_constructors_set_role() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
        assert_eq!(ChatMessage::assistant("a").role, "assistant");
    }

    #[test]
    fn endpoint_joins_base_and_path() {
        let client = OpenAiClient::with_base_url("key", "http://localhost:1234/v1/");
        assert_eq!(client.endpoint("/chat/completions"), "http://localhost:1234/v1/chat/completions");
        assert_eq!(client.endpoint("chat/completions"), "http://localhost:1234/v1/chat/completions");
    }
}
