//! Per-call audio output

use murmur_provider_voice::{AudioData, AudioFormat, PcmSpec, Transcoder};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SessionError;
use crate::transport::{CallId, VoiceConnection};

/// Plays audio into one call, one clip at a time.
///
/// Pipeline replies and explicit `speak` requests share the same player, so
/// clips never overlap. Transcoding happens before waiting for the output.
pub struct AudioOutputPlayer {
    call_id: CallId,
    connection: Arc<dyn VoiceConnection>,
    transcoder: Arc<dyn Transcoder>,
    output: Mutex<()>,
}

impl AudioOutputPlayer {
    /// Player for `call_id` over an open connection
    pub fn new(
        call_id: CallId,
        connection: Arc<dyn VoiceConnection>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            call_id,
            connection,
            transcoder,
            output: Mutex::new(()),
        }
    }

    /// Transcode to 48 kHz stereo PCM and play, resolving once playback is idle
    pub async fn play(&self, audio: AudioData) -> Result<(), SessionError> {
        if audio.is_empty() {
            debug!(guild_id = %self.call_id, "Skipping empty clip");
            return Ok(());
        }

        let audio = if audio.matches(AudioFormat::Pcm, PcmSpec::DISCORD) {
            audio
        } else {
            self.transcoder
                .transcode(&audio, AudioFormat::Pcm, PcmSpec::DISCORD)
                .await?
        };

        let _output = self.output.lock().await;
        debug!(
            guild_id = %self.call_id,
            duration_ms = audio.duration_ms(),
            "Playing clip"
        );
        self.connection.play(audio).await?;
        Ok(())
    }
}
