//! Voice plugin configuration
//!
//! Read from the host's plugin settings (`camelCase` JSON, usually under a
//! `voice` key) or from the environment.

use murmur_core::{get_env_bool, get_env_float, get_env_int, get_env_opt, get_env_or, MurmurError, Result};
use murmur_provider_voice::{
    EnergyVad, FfmpegTranscoder, GroqProvider, PiperSynthesizer, SpeechProvider, SpeechRouter,
    WhisperCppProvider, DEFAULT_FFMPEG_PATH, DEFAULT_GROQ_MODEL, DEFAULT_PIPER_SAMPLE_RATE,
    DEFAULT_VAD_THRESHOLD, GROQ_TRANSCRIPTION_ENDPOINT,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::history::DEFAULT_HISTORY_LIMIT;

/// Silence that ends a speaker's stream
pub const DEFAULT_SILENCE_DURATION_MS: u64 = 800;

/// Bound on waiting for a new connection to become ready
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 30_000;

/// Agent API the bundled reply backend talks to
pub const DEFAULT_AGENT_API_URL: &str = "http://127.0.0.1:9090/agent";

/// Discord voice configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VoiceConfig {
    /// Master switch; when off every voice action is refused
    pub enabled: bool,
    /// Piper binary
    pub piper_path: String,
    /// Piper `.onnx` voice model
    pub piper_model_path: String,
    /// Sample rate the Piper voice emits
    pub piper_sample_rate: u32,
    /// ffmpeg binary
    pub ffmpeg_path: String,
    /// Deafen the bot after joining
    pub auto_deaf: bool,
    /// Mute the bot after joining
    pub auto_mute: bool,
    /// Listen to callers and run the reply pipeline
    pub stt_enabled: bool,
    /// Groq API key for hosted Whisper
    pub groq_api_key: String,
    /// Groq transcription endpoint
    pub groq_api_endpoint: String,
    /// Groq transcription model
    pub groq_model: String,
    /// whisper.cpp binary
    pub whisper_cpp_path: String,
    /// whisper.cpp ggml model
    pub whisper_cpp_model_path: String,
    /// RMS threshold for the energy VAD
    pub vad_energy_threshold: f64,
    /// Silence that ends a speaker's stream
    pub silence_duration_ms: u64,
    /// Turns of history kept per call
    pub history_limit: usize,
    /// Bound on the connection ready wait
    pub ready_timeout_ms: u64,
    /// Reply model override, `provider/model` or bare `model`
    pub response_model: Option<String>,
    /// Reply system prompt override
    pub response_system_prompt: Option<String>,
    /// Reply timeout override; unset or zero uses the backend default
    pub response_timeout_ms: Option<u64>,
    /// Name the agent introduces itself with in the default prompt
    pub agent_name: Option<String>,
    /// Agent API base URL
    pub agent_api_url: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            piper_path: "voices/piper/piper".to_string(),
            piper_model_path: "voices/models/en_US-lessac-medium.onnx".to_string(),
            piper_sample_rate: DEFAULT_PIPER_SAMPLE_RATE,
            ffmpeg_path: DEFAULT_FFMPEG_PATH.to_string(),
            auto_deaf: false,
            auto_mute: false,
            stt_enabled: true,
            groq_api_key: String::new(),
            groq_api_endpoint: GROQ_TRANSCRIPTION_ENDPOINT.to_string(),
            groq_model: DEFAULT_GROQ_MODEL.to_string(),
            whisper_cpp_path: String::new(),
            whisper_cpp_model_path: String::new(),
            vad_energy_threshold: DEFAULT_VAD_THRESHOLD,
            silence_duration_ms: DEFAULT_SILENCE_DURATION_MS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            response_model: None,
            response_system_prompt: None,
            response_timeout_ms: None,
            agent_name: None,
            agent_api_url: DEFAULT_AGENT_API_URL.to_string(),
        }
    }
}

impl VoiceConfig {
    /// Parse plugin settings. Accepts the voice object itself or a settings
    /// object with a `voice` key; `null` yields defaults.
    pub fn from_settings(settings: &serde_json::Value) -> Result<Self> {
        let voice = match settings.get("voice") {
            Some(voice) => voice,
            None => settings,
        };
        if voice.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(voice.clone())
            .map_err(|e| MurmurError::config(format!("Invalid voice settings: {}", e)))
    }

    /// Build from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            enabled: get_env_bool("DISCORD_VOICE_ENABLED", d.enabled),
            piper_path: get_env_or("PIPER_PATH", &d.piper_path),
            piper_model_path: get_env_or("PIPER_MODEL_PATH", &d.piper_model_path),
            piper_sample_rate: get_env_int("PIPER_SAMPLE_RATE", d.piper_sample_rate),
            ffmpeg_path: get_env_or("FFMPEG_PATH", &d.ffmpeg_path),
            auto_deaf: get_env_bool("DISCORD_VOICE_AUTO_DEAF", d.auto_deaf),
            auto_mute: get_env_bool("DISCORD_VOICE_AUTO_MUTE", d.auto_mute),
            stt_enabled: get_env_bool("DISCORD_VOICE_STT_ENABLED", d.stt_enabled),
            groq_api_key: get_env_opt("GROQ_API_KEY").unwrap_or(d.groq_api_key),
            groq_api_endpoint: get_env_or("GROQ_API_ENDPOINT", &d.groq_api_endpoint),
            groq_model: get_env_or("GROQ_STT_MODEL", &d.groq_model),
            whisper_cpp_path: get_env_or("WHISPER_CPP_PATH", &d.whisper_cpp_path),
            whisper_cpp_model_path: get_env_or("WHISPER_CPP_MODEL_PATH", &d.whisper_cpp_model_path),
            vad_energy_threshold: get_env_float("DISCORD_VOICE_VAD_THRESHOLD", d.vad_energy_threshold),
            silence_duration_ms: get_env_int("DISCORD_VOICE_SILENCE_MS", d.silence_duration_ms),
            history_limit: get_env_int("DISCORD_VOICE_HISTORY_LIMIT", d.history_limit),
            ready_timeout_ms: get_env_int("DISCORD_VOICE_READY_TIMEOUT_MS", d.ready_timeout_ms),
            response_model: get_env_opt("DISCORD_VOICE_RESPONSE_MODEL"),
            response_system_prompt: get_env_opt("DISCORD_VOICE_SYSTEM_PROMPT"),
            response_timeout_ms: get_env_opt("DISCORD_VOICE_RESPONSE_TIMEOUT_MS")
                .and_then(|v| v.parse().ok()),
            agent_name: get_env_opt("AGENT_NAME"),
            agent_api_url: get_env_or("AGENT_API_URL", &d.agent_api_url),
        }
    }

    /// Use the host's Groq credential when none is configured here
    pub fn with_fallback_groq_key(mut self, key: Option<&str>) -> Self {
        if self.groq_api_key.trim().is_empty() {
            if let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) {
                self.groq_api_key = key.to_string();
            }
        }
        self
    }

    /// Configuration problems worth a start-up warning. Empty when the config
    /// can run every feature it enables.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.piper_path.trim().is_empty() {
            problems.push("piperPath is required".to_string());
        }
        if self.piper_model_path.trim().is_empty() {
            problems.push("piperModelPath is required".to_string());
        }
        if self.ffmpeg_path.trim().is_empty() {
            problems.push("ffmpegPath is required".to_string());
        }
        if self.stt_enabled && !self.speech_router().has_available_provider() {
            problems.push(
                "sttEnabled is set but neither groqApiKey nor whisperCppPath/whisperCppModelPath is configured"
                    .to_string(),
            );
        }

        problems
    }

    /// STT providers in priority order: hosted Groq first, local whisper.cpp second
    pub fn speech_router(&self) -> SpeechRouter {
        let groq = GroqProvider::new(self.groq_api_key.clone())
            .with_endpoint(self.groq_api_endpoint.clone())
            .with_model(self.groq_model.clone());
        let whisper = WhisperCppProvider::new(
            self.whisper_cpp_path.clone(),
            self.whisper_cpp_model_path.clone(),
        );

        let providers: Vec<Arc<dyn SpeechProvider>> = vec![Arc::new(groq), Arc::new(whisper)];
        SpeechRouter::new(providers)
    }

    /// Piper synthesizer for replies and `speak`
    pub fn synthesizer(&self) -> PiperSynthesizer {
        PiperSynthesizer::new(self.piper_path.clone(), self.piper_model_path.clone())
            .with_sample_rate(self.piper_sample_rate)
    }

    /// ffmpeg transcoder
    pub fn transcoder(&self) -> FfmpegTranscoder {
        FfmpegTranscoder::new(self.ffmpeg_path.clone())
    }

    /// Energy VAD at the configured threshold
    pub fn vad(&self) -> EnergyVad {
        EnergyVad::new(self.vad_energy_threshold)
    }

    /// Silence that ends a speaker's stream
    pub fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.silence_duration_ms.max(1))
    }

    /// Bound on the connection ready wait
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms.max(1))
    }

    /// Reply timeout override, if a positive one is set
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = VoiceConfig::default();
        assert!(config.enabled);
        assert!(config.stt_enabled);
        assert_eq!(config.vad_energy_threshold, 0.01);
        assert_eq!(config.silence_duration(), Duration::from_millis(800));
        assert_eq!(config.ready_timeout(), Duration::from_secs(30));
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.response_timeout(), None);
    }

    #[test]
    fn test_from_settings_camel_case_under_voice_key() {
        let settings = json!({
            "voice": {
                "piperPath": "/opt/piper/piper",
                "autoDeaf": true,
                "groqApiKey": "gsk_abc",
                "vadEnergyThreshold": 0.05,
                "responseModel": "anthropic/claude-3-5-haiku",
                "responseTimeoutMs": 12000
            }
        });
        let config = VoiceConfig::from_settings(&settings).unwrap();

        assert_eq!(config.piper_path, "/opt/piper/piper");
        assert!(config.auto_deaf);
        assert_eq!(config.groq_api_key, "gsk_abc");
        assert_eq!(config.vad_energy_threshold, 0.05);
        assert_eq!(config.response_model.as_deref(), Some("anthropic/claude-3-5-haiku"));
        assert_eq!(config.response_timeout(), Some(Duration::from_secs(12)));
        // untouched fields keep defaults
        assert_eq!(config.ffmpeg_path, "ffmpeg");
    }

    #[test]
    fn test_from_settings_null_and_invalid() {
        assert_eq!(
            VoiceConfig::from_settings(&serde_json::Value::Null).unwrap(),
            VoiceConfig::default()
        );
        assert!(VoiceConfig::from_settings(&json!({ "enabled": "sometimes" })).is_err());
    }

    #[test]
    fn test_zero_response_timeout_means_default() {
        let config = VoiceConfig {
            response_timeout_ms: Some(0),
            ..Default::default()
        };
        assert_eq!(config.response_timeout(), None);
    }

    #[test]
    fn test_fallback_groq_key() {
        let config = VoiceConfig::default().with_fallback_groq_key(Some(" gsk_host "));
        assert_eq!(config.groq_api_key, "gsk_host");

        let config = VoiceConfig {
            groq_api_key: "gsk_own".into(),
            ..Default::default()
        }
        .with_fallback_groq_key(Some("gsk_host"));
        assert_eq!(config.groq_api_key, "gsk_own");
    }

    #[test]
    fn test_validate_reports_problems() {
        let config = VoiceConfig {
            piper_path: String::new(),
            ffmpeg_path: " ".into(),
            ..Default::default()
        };
        let problems = config.validate();
        assert!(problems.iter().any(|p| p.contains("piperPath")));
        assert!(problems.iter().any(|p| p.contains("ffmpegPath")));
        assert!(problems.iter().any(|p| p.contains("sttEnabled")));

        let config = VoiceConfig {
            whisper_cpp_path: "/opt/whisper/whisper-cli".into(),
            whisper_cpp_model_path: "/opt/whisper/ggml-base.en.bin".into(),
            ..Default::default()
        };
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_router_order() {
        let router = VoiceConfig::default().speech_router();
        assert_eq!(router.provider_names(), vec!["groq", "whisper.cpp"]);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("DISCORD_VOICE_AUTO_MUTE", "true");
        std::env::set_var("DISCORD_VOICE_SILENCE_MS", "1200");
        std::env::set_var("DISCORD_VOICE_RESPONSE_TIMEOUT_MS", "5000");

        let config = VoiceConfig::from_env();
        assert!(config.auto_mute);
        assert_eq!(config.silence_duration_ms, 1200);
        assert_eq!(config.response_timeout(), Some(Duration::from_secs(5)));

        std::env::remove_var("DISCORD_VOICE_AUTO_MUTE");
        std::env::remove_var("DISCORD_VOICE_SILENCE_MS");
        std::env::remove_var("DISCORD_VOICE_RESPONSE_TIMEOUT_MS");
    }
}
