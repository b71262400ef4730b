//! ffmpeg transcoder
//!
//! Raw PCM goes in on stdin and raw PCM comes out on stdout. WAV output is
//! framed locally so the header always carries exact sizes.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tracing::debug;

use super::process::{run_piped, ProcessFailure};
use crate::audio::{pcm_to_wav, wav_to_pcm};
use crate::types::*;

/// Default ffmpeg binary, resolved through `PATH`
pub const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";

/// Transcoder backed by an `ffmpeg` child process per conversion
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG_PATH)
    }
}

impl FfmpegTranscoder {
    /// Create a transcoder using the given binary
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        let ffmpeg_path = ffmpeg_path.into();
        let ffmpeg_path = if ffmpeg_path.trim().is_empty() {
            DEFAULT_FFMPEG_PATH.to_string()
        } else {
            ffmpeg_path
        };
        Self { ffmpeg_path }
    }

    /// Binary path
    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    /// Arguments converting s16le `from` into s16le `to` over stdin/stdout
    pub fn pcm_args(from: PcmSpec, to: PcmSpec) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "s16le".into(),
            "-ar".into(),
            from.sample_rate.to_string(),
            "-ac".into(),
            from.channels.to_string(),
            "-i".into(),
            "pipe:0".into(),
            "-f".into(),
            "s16le".into(),
            "-ar".into(),
            to.sample_rate.to_string(),
            "-ac".into(),
            to.channels.to_string(),
            "pipe:1".into(),
        ]
    }

    async fn resample(&self, pcm: &Bytes, from: PcmSpec, to: PcmSpec) -> Result<Bytes, VoiceError> {
        if from == to {
            return Ok(pcm.clone());
        }

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(Self::pcm_args(from, to));

        debug!(
            from_rate = from.sample_rate,
            from_channels = from.channels,
            to_rate = to.sample_rate,
            to_channels = to.channels,
            bytes = pcm.len(),
            "ffmpeg resample"
        );

        let out = run_piped(cmd, pcm.to_vec()).await.map_err(|e| match e {
            ProcessFailure::Spawn(err) => {
                VoiceError::NotReady(format!("Failed to start ffmpeg: {}", err))
            }
            other => VoiceError::TranscodeError(other.to_string()),
        })?;

        Ok(Bytes::from(out))
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn transcode(
        &self,
        audio: &AudioData,
        format: AudioFormat,
        spec: PcmSpec,
    ) -> Result<AudioData, VoiceError> {
        if audio.matches(format, spec) {
            return Ok(audio.clone());
        }

        let source = match audio.format {
            AudioFormat::Pcm => audio.clone(),
            AudioFormat::Wav => wav_to_pcm(&audio.data)?,
        };

        let pcm = self.resample(&source.data, source.spec, spec).await?;

        match format {
            AudioFormat::Pcm => Ok(AudioData::pcm(pcm, spec)),
            AudioFormat::Wav => Ok(AudioData::wav(pcm_to_wav(&pcm, spec)?, spec)),
        }
    }
}
