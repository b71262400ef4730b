//! Core types for the voice provider

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Container of an [`AudioData`] payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// Headerless signed 16-bit little-endian PCM
    Pcm,
    /// RIFF/WAVE wrapping 16-bit PCM
    Wav,
}

impl AudioFormat {
    /// Get format as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm => "pcm",
            Self::Wav => "wav",
        }
    }

    /// MIME type used when uploading
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pcm => "audio/pcm",
            Self::Wav => "audio/wav",
        }
    }
}

/// Sample layout of 16-bit PCM audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcmSpec {
    /// Samples per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

impl PcmSpec {
    /// Discord voice: 48 kHz interleaved stereo
    pub const DISCORD: PcmSpec = PcmSpec::new(48_000, 2);

    /// Canonical speech-to-text input: 16 kHz mono
    pub const SPEECH_TO_TEXT: PcmSpec = PcmSpec::new(16_000, 1);

    /// Create a spec
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Mono spec at the given rate
    pub const fn mono(sample_rate: u32) -> Self {
        Self::new(sample_rate, 1)
    }

    /// Bytes of 16-bit audio per second
    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * 2
    }
}

/// Audio payload with its format and sample layout
#[derive(Debug, Clone, PartialEq)]
pub struct AudioData {
    /// Raw bytes (PCM samples or a complete WAV file)
    pub data: Bytes,
    /// Container format
    pub format: AudioFormat,
    /// Sample layout
    pub spec: PcmSpec,
}

impl AudioData {
    /// Raw PCM payload
    pub fn pcm(data: impl Into<Bytes>, spec: PcmSpec) -> Self {
        Self {
            data: data.into(),
            format: AudioFormat::Pcm,
            spec,
        }
    }

    /// WAV payload
    pub fn wav(data: impl Into<Bytes>, spec: PcmSpec) -> Self {
        Self {
            data: data.into(),
            format: AudioFormat::Wav,
            spec,
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether there is no audio at all
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Approximate playback length. WAV headers are ignored, so this is only
    /// exact for PCM.
    pub fn duration_ms(&self) -> u64 {
        let bps = self.spec.bytes_per_second();
        if bps == 0 {
            return 0;
        }
        self.data.len() as u64 * 1000 / bps
    }

    /// Whether this payload is already in the given format and layout
    pub fn matches(&self, format: AudioFormat, spec: PcmSpec) -> bool {
        self.format == format && self.spec == spec
    }
}

/// Converts audio between sample layouts and containers
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Transcoder name
    fn name(&self) -> &str;

    /// Convert `audio` into `format` with sample layout `spec`
    async fn transcode(
        &self,
        audio: &AudioData,
        format: AudioFormat,
        spec: PcmSpec,
    ) -> Result<AudioData, VoiceError>;
}

/// Text-to-speech synthesizer
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesizer name
    fn name(&self) -> &str;

    /// Whether the synthesizer is configured well enough to try
    fn is_available(&self) -> bool;

    /// Sample layout of synthesized audio
    fn output_spec(&self) -> PcmSpec;

    /// Synthesize text to audio
    async fn synthesize(&self, text: &str) -> Result<AudioData, VoiceError>;
}

/// Speech-to-text provider
///
/// Providers receive audio in [`PcmSpec::SPEECH_TO_TEXT`] WAV form.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Whether the provider has the configuration it needs
    fn is_available(&self) -> bool;

    /// Transcribe audio to text
    async fn transcribe(&self, audio: &AudioData) -> Result<String, VoiceError>;
}

/// Voice provider errors
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Audio processing error
    #[error("Audio processing error: {0}")]
    AudioError(String),

    /// Engine not ready (missing binary, model or key)
    #[error("Voice engine not ready: {0}")]
    NotReady(String),

    /// Unsupported format
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Transcoding failed
    #[error("Transcoding failed: {0}")]
    TranscodeError(String),

    /// Synthesis failed
    #[error("Synthesis failed: {0}")]
    SynthesisError(String),

    /// Transcription failed
    #[error("Transcription failed: {0}")]
    TranscriptionError(String),

    /// Every configured STT provider was unavailable, failed, or heard nothing
    #[error("No STT provider available")]
    NoProviderAvailable,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for VoiceError {
    fn from(err: reqwest::Error) -> Self {
        VoiceError::NetworkError(err.to_string())
    }
}

impl From<VoiceError> for murmur_core::MurmurError {
    fn from(err: VoiceError) -> Self {
        match err {
            VoiceError::Io(e) => murmur_core::MurmurError::Io(e),
            other => murmur_core::MurmurError::provider(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_spec_rates() {
        assert_eq!(PcmSpec::DISCORD.bytes_per_second(), 192_000);
        assert_eq!(PcmSpec::SPEECH_TO_TEXT.bytes_per_second(), 32_000);
        assert_eq!(PcmSpec::mono(22_050), PcmSpec::new(22_050, 1));
    }

    #[test]
    fn test_audio_duration() {
        let one_second = AudioData::pcm(vec![0u8; 192_000], PcmSpec::DISCORD);
        assert_eq!(one_second.duration_ms(), 1000);

        let empty = AudioData::pcm(Bytes::new(), PcmSpec::mono(22_050));
        assert!(empty.is_empty());
        assert_eq!(empty.duration_ms(), 0);
    }

    #[test]
    fn test_audio_matches() {
        let audio = AudioData::wav(vec![1u8, 2, 3], PcmSpec::SPEECH_TO_TEXT);
        assert!(audio.matches(AudioFormat::Wav, PcmSpec::SPEECH_TO_TEXT));
        assert!(!audio.matches(AudioFormat::Pcm, PcmSpec::SPEECH_TO_TEXT));
        assert!(!audio.matches(AudioFormat::Wav, PcmSpec::DISCORD));
    }

    #[test]
    fn test_error_into_murmur_error() {
        let err: murmur_core::MurmurError = VoiceError::NoProviderAvailable.into();
        assert_eq!(err.to_string(), "Provider error: No STT provider available");
    }
}
