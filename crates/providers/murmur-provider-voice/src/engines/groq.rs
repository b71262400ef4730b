//! Groq hosted Whisper STT
//!
//! Posts the WAV as `multipart/form-data` to the OpenAI-compatible
//! transcription endpoint and reads `{ "text": ... }` back.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::types::*;

/// Groq transcription endpoint
pub const GROQ_TRANSCRIPTION_ENDPOINT: &str =
    "https://api.groq.com/openai/v1/audio/transcriptions";

/// Model requested when none is configured
pub const DEFAULT_GROQ_MODEL: &str = "whisper-large-v3";

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: Option<String>,
}

/// Groq Whisper provider
#[derive(Clone)]
pub struct GroqProvider {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl std::fmt::Debug for GroqProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroqProvider")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .finish()
    }
}

impl GroqProvider {
    /// Create a provider with the default endpoint and model
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key: api_key.into(),
            endpoint: GROQ_TRANSCRIPTION_ENDPOINT.to_string(),
            model: DEFAULT_GROQ_MODEL.to_string(),
        }
    }

    /// Override the endpoint; blank values keep the default
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        if !endpoint.trim().is_empty() {
            self.endpoint = endpoint;
        }
        self
    }

    /// Override the model; blank values keep the default
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    /// Endpoint requests are posted to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Model requested
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl SpeechProvider for GroqProvider {
    fn name(&self) -> &str {
        "groq"
    }

    fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn transcribe(&self, audio: &AudioData) -> Result<String, VoiceError> {
        if audio.format != AudioFormat::Wav {
            return Err(VoiceError::UnsupportedFormat(format!(
                "Groq expects wav input, got {}",
                audio.format.as_str()
            )));
        }

        let file = Part::bytes(audio.data.to_vec())
            .file_name("audio.wav")
            .mime_str(AudioFormat::Wav.mime_type())?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone());

        debug!(endpoint = %self.endpoint, model = %self.model, bytes = audio.len(), "Groq transcribe");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::TranscriptionError(format!(
                "Groq STT failed ({}): {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: TranscriptionResponse = response.json().await?;
        Ok(parsed.text.unwrap_or_default())
    }
}
