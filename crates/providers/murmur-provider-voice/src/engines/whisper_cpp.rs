//! whisper.cpp STT engine
//!
//! Each request gets a private scratch directory holding `audio.wav` and the
//! `out.txt` transcript; the directory is removed whether or not the run
//! succeeds.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

use super::process::exit_message;
use crate::types::*;

/// Local whisper.cpp CLI provider
#[derive(Debug, Clone)]
pub struct WhisperCppProvider {
    binary_path: PathBuf,
    model_path: PathBuf,
}

impl WhisperCppProvider {
    /// Create a provider for the given `whisper-cli`/`main` binary and ggml model
    pub fn new(binary_path: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            model_path: model_path.into(),
        }
    }
}

#[async_trait]
impl SpeechProvider for WhisperCppProvider {
    fn name(&self) -> &str {
        "whisper.cpp"
    }

    fn is_available(&self) -> bool {
        !self.binary_path.as_os_str().is_empty() && !self.model_path.as_os_str().is_empty()
    }

    async fn transcribe(&self, audio: &AudioData) -> Result<String, VoiceError> {
        if audio.format != AudioFormat::Wav {
            return Err(VoiceError::UnsupportedFormat(format!(
                "whisper.cpp expects wav input, got {}",
                audio.format.as_str()
            )));
        }

        let scratch = tempfile::Builder::new().prefix("whisper-").tempdir()?;
        let wav_path = scratch.path().join("audio.wav");
        let out_prefix = scratch.path().join("out");
        let out_path = scratch.path().join("out.txt");

        tokio::fs::write(&wav_path, &audio.data).await?;

        debug!(
            model = %self.model_path.display(),
            bytes = audio.len(),
            "whisper.cpp transcribe"
        );

        let output = Command::new(&self.binary_path)
            .arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg(&wav_path)
            .arg("-otxt")
            .arg("-of")
            .arg(&out_prefix)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| VoiceError::NotReady(format!("Failed to start whisper.cpp: {}", e)))?;

        if !output.status.success() {
            return Err(VoiceError::TranscriptionError(exit_message(
                "whisper.cpp",
                &output.status,
                &output.stderr,
            )));
        }

        let text = tokio::fs::read_to_string(&out_path).await?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav() -> AudioData {
        let wav = crate::audio::pcm_to_wav(&[0u8; 320], PcmSpec::SPEECH_TO_TEXT).unwrap();
        AudioData::wav(wav, PcmSpec::SPEECH_TO_TEXT)
    }

    #[test]
    fn test_availability_requires_both_paths() {
        assert!(WhisperCppProvider::new("whisper-cli", "ggml-base.en.bin").is_available());
        assert!(!WhisperCppProvider::new("whisper-cli", "").is_available());
        assert!(!WhisperCppProvider::new("", "ggml-base.en.bin").is_available());
    }

    #[tokio::test]
    async fn test_rejects_raw_pcm() {
        let provider = WhisperCppProvider::new("whisper-cli", "ggml-base.en.bin");
        let pcm = AudioData::pcm(vec![0u8; 320], PcmSpec::SPEECH_TO_TEXT);
        assert!(matches!(
            provider.transcribe(&pcm).await,
            Err(VoiceError::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_ready() {
        let provider = WhisperCppProvider::new("/nonexistent/whisper-cli", "ggml-base.en.bin");
        assert!(matches!(
            provider.transcribe(&wav()).await,
            Err(VoiceError::NotReady(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_transcription_error() {
        // `false` ignores its arguments and exits 1 with empty stderr
        let provider = WhisperCppProvider::new("false", "ggml-base.en.bin");
        match provider.transcribe(&wav()).await {
            Err(VoiceError::TranscriptionError(msg)) => {
                assert_eq!(msg, "whisper.cpp exited with code 1")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
