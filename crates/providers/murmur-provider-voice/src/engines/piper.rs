//! Piper TTS engine
//!
//! Runs the native Piper binary directly: text on stdin, raw 16-bit mono PCM
//! on stdout (`--output-raw`).
//!
//! ```bash
//! echo 'Hello!' | ./piper --model en_US-lessac-medium.onnx --output-raw | aplay -r 22050 -f S16_LE
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use super::process::{run_piped, ProcessFailure};
use crate::types::*;

/// Sample rate of the medium-quality Piper voices
pub const DEFAULT_PIPER_SAMPLE_RATE: u32 = 22_050;

/// Local Piper synthesizer
#[derive(Debug, Clone)]
pub struct PiperSynthesizer {
    piper_path: PathBuf,
    model_path: PathBuf,
    sample_rate: u32,
}

impl PiperSynthesizer {
    /// Create a synthesizer for the given binary and `.onnx` voice model
    pub fn new(piper_path: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            piper_path: piper_path.into(),
            model_path: model_path.into(),
            sample_rate: DEFAULT_PIPER_SAMPLE_RATE,
        }
    }

    /// Override the output sample rate declared by the voice model
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        if sample_rate > 0 {
            self.sample_rate = sample_rate;
        }
        self
    }

    /// Binary path
    pub fn piper_path(&self) -> &Path {
        &self.piper_path
    }

    fn command(&self) -> Command {
        // Piper release bundles ship their shared libraries next to the binary.
        let lib_dir = self.piper_path.parent().unwrap_or(&self.piper_path);
        let ld_path = match std::env::var("LD_LIBRARY_PATH") {
            Ok(existing) if !existing.is_empty() => format!("{}:{}", lib_dir.display(), existing),
            _ => lib_dir.display().to_string(),
        };

        let mut cmd = Command::new(&self.piper_path);
        cmd.arg("--model")
            .arg(&self.model_path)
            .arg("--output-raw")
            .env("LD_LIBRARY_PATH", ld_path);
        cmd
    }
}

#[async_trait]
impl SpeechSynthesizer for PiperSynthesizer {
    fn name(&self) -> &str {
        "piper"
    }

    fn is_available(&self) -> bool {
        !self.piper_path.as_os_str().is_empty() && !self.model_path.as_os_str().is_empty()
    }

    fn output_spec(&self) -> PcmSpec {
        PcmSpec::mono(self.sample_rate)
    }

    async fn synthesize(&self, text: &str) -> Result<AudioData, VoiceError> {
        if !self.is_available() {
            return Err(VoiceError::NotReady(
                "Piper binary and model paths must be configured".to_string(),
            ));
        }

        debug!(chars = text.len(), model = %self.model_path.display(), "Piper synthesize");

        let pcm = run_piped(self.command(), text.as_bytes().to_vec())
            .await
            .map_err(|e| match e {
                ProcessFailure::Spawn(err) => {
                    VoiceError::NotReady(format!("Failed to start Piper: {}", err))
                }
                other => VoiceError::SynthesisError(format!("Piper error: {}", other)),
            })?;

        Ok(AudioData::pcm(Bytes::from(pcm), self.output_spec()))
    }
}
