//! Live state of one voice call
//!
//! A [`CallSession`] owns the connection, the output player, the segmenter
//! and a single turn worker. Utterances reach the worker through one channel
//! and are processed strictly in arrival order:
//!
//! ```text
//! transcode -> transcribe -> user turn -> reply -> assistant turn -> synthesize -> play
//! ```
//!
//! A failing stage ends only its own turn. Closing the session stops capture,
//! drops queued utterances and discards whatever a running turn produces
//! after the close.

use murmur_provider_voice::{AudioFormat, PcmSpec, SpeechRouter, SpeechSynthesizer, Transcoder, VoiceError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::VoiceConfig;
use crate::error::SessionError;
use crate::history::{History, TranscriptTurn};
use crate::player::AudioOutputPlayer;
use crate::reply::{ReplyContext, ReplyGenerator};
use crate::runtime::VoiceServices;
use crate::segmenter::{Utterance, UtteranceSegmenter};
use crate::transport::{CallId, VoiceConnection};

/// Capacity of the per-call utterance queue
const TURN_QUEUE_CAPACITY: usize = 32;

/// One connected call
pub struct CallSession {
    call_id: CallId,
    channel_id: String,
    connection: Arc<dyn VoiceConnection>,
    player: Arc<AudioOutputPlayer>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    history: Arc<Mutex<History>>,
    segmenter: Mutex<Option<UtteranceSegmenter>>,
    closed: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("call_id", &self.call_id)
            .field("channel_id", &self.channel_id)
            .field("capturing", &self.is_capturing())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl CallSession {
    /// Start a session over a ready connection. With `capture` set, speaker
    /// audio is segmented and fed through the turn pipeline.
    pub fn start(
        call_id: CallId,
        channel_id: impl Into<String>,
        connection: Arc<dyn VoiceConnection>,
        services: &VoiceServices,
        config: &VoiceConfig,
        capture: bool,
    ) -> Arc<Self> {
        let channel_id = channel_id.into();
        let player = Arc::new(AudioOutputPlayer::new(
            call_id.clone(),
            connection.clone(),
            services.transcoder.clone(),
        ));
        let history = Arc::new(Mutex::new(History::new(config.history_limit)));
        let (closed, closed_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(TURN_QUEUE_CAPACITY);

        let worker = TurnWorker {
            call_id: call_id.clone(),
            channel_id: channel_id.clone(),
            transcoder: services.transcoder.clone(),
            router: services.router.clone(),
            replies: services.replies.clone(),
            synthesizer: services.synthesizer.clone(),
            player: player.clone(),
            history: history.clone(),
            closed: closed_rx,
        };
        let worker = tokio::spawn(worker.run(rx));

        let segmenter = capture.then(|| {
            UtteranceSegmenter::start(
                call_id.clone(),
                connection.clone(),
                config.vad(),
                config.silence_duration(),
                services.names.clone(),
                tx,
            )
        });

        info!(
            guild_id = %call_id,
            channel_id = %channel_id,
            capture,
            "Voice session started"
        );

        Arc::new(Self {
            call_id,
            channel_id,
            connection,
            player,
            synthesizer: services.synthesizer.clone(),
            history,
            segmenter: Mutex::new(segmenter),
            closed,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Call id
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Voice channel of the call
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Whether speaker audio is being captured
    pub fn is_capturing(&self) -> bool {
        self.segmenter.lock().is_some()
    }

    /// Whether the session was closed
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Conversation so far, oldest first
    pub fn history(&self) -> Vec<TranscriptTurn> {
        self.history.lock().iter().cloned().collect()
    }

    /// Synthesize `text` and play it through the call's player
    pub async fn speak(&self, text: &str) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::NotConnected(self.call_id.clone()));
        }
        let audio = self.synthesizer.synthesize(text).await?;
        self.player.play(audio).await
    }

    /// Stop capture, drop queued turns and destroy the connection. Safe to
    /// call more than once.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        if let Some(segmenter) = self.segmenter.lock().take() {
            segmenter.stop();
        }
        // The worker exits once its running turn notices the close.
        self.worker.lock().take();

        self.connection.destroy().await;
        info!(guild_id = %self.call_id, channel_id = %self.channel_id, "Voice session closed");
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        let _ = self.closed.send_replace(true);
    }
}

struct TurnWorker {
    call_id: CallId,
    channel_id: String,
    transcoder: Arc<dyn Transcoder>,
    router: SpeechRouter,
    replies: ReplyGenerator,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    player: Arc<AudioOutputPlayer>,
    history: Arc<Mutex<History>>,
    closed: watch::Receiver<bool>,
}

impl TurnWorker {
    async fn run(mut self, mut utterances: mpsc::Receiver<Utterance>) {
        loop {
            let utterance = tokio::select! {
                biased;
                _ = self.closed.wait_for(|closed| *closed) => break,
                next = utterances.recv() => match next {
                    Some(utterance) => utterance,
                    None => break,
                },
            };
            self.process(utterance).await;
        }
        debug!(guild_id = %self.call_id, "Turn worker stopped");
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn process(&self, utterance: Utterance) {
        if self.is_closed() {
            return;
        }
        let call_id = &self.call_id;
        let speaker = &utterance.speaker_id;

        let stt_audio = match self
            .transcoder
            .transcode(&utterance.audio, AudioFormat::Wav, PcmSpec::SPEECH_TO_TEXT)
            .await
        {
            Ok(audio) => audio,
            Err(e) => {
                warn!(guild_id = %call_id, user_id = %speaker, error = %e, "Resample for STT failed, dropping turn");
                return;
            }
        };

        let text = match self.router.transcribe(&stt_audio).await {
            Ok(text) => text,
            Err(VoiceError::NoProviderAvailable) => {
                debug!(guild_id = %call_id, user_id = %speaker, "No transcript, dropping turn");
                return;
            }
            Err(e) => {
                warn!(guild_id = %call_id, user_id = %speaker, error = %e, "Transcription failed, dropping turn");
                return;
            }
        };
        if self.is_closed() {
            return;
        }
        info!(
            guild_id = %call_id,
            user_id = %speaker,
            display_name = %utterance.display_name,
            transcript = %text,
            "Heard"
        );

        let history = {
            let mut history = self.history.lock();
            history.push_user(text.clone());
            history.clone()
        };

        let context = ReplyContext {
            call_id: call_id.clone(),
            channel_id: self.channel_id.clone(),
            speaker_id: speaker.clone(),
        };
        let reply = match self.replies.generate(&context, &history, &text).await {
            Ok(reply) => reply,
            Err(reason) => {
                warn!(guild_id = %call_id, user_id = %speaker, reason = %reason, "No reply, dropping turn");
                return;
            }
        };
        if self.is_closed() {
            return;
        }
        self.history.lock().push_assistant(reply.clone());

        let audio = match self.synthesizer.synthesize(&reply).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(guild_id = %call_id, error = %e, "Reply synthesis failed");
                return;
            }
        };
        if self.is_closed() {
            return;
        }

        if let Err(e) = self.player.play(audio).await {
            warn!(guild_id = %call_id, error = %e, "Reply playback failed");
        }
    }
}
