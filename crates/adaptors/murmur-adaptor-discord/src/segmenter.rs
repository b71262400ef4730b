//! Per-speaker utterance capture
//!
//! Each speaker moves through `Idle -> Capturing -> Finalizing -> Idle`.
//! While capturing, every decoded frame is buffered and run through the VAD;
//! nothing is dropped before the stream ends. A stream that ends without a
//! single speech frame is discarded. A stream that breaks is logged and
//! discarded without touching other speakers. A speaker who starts again
//! while their previous stream is still finalizing gets a fresh capture.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use murmur_provider_voice::{AudioData, EnergyVad, PcmSpec};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::transport::{CallId, NameResolver, SpeakerAudio, SpeakerId, VoiceConnection};

/// Where a speaker is in the capture cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Not speaking
    Idle,
    /// Buffering frames
    Capturing,
    /// Stream ended, deciding whether to emit
    Finalizing,
}

/// One speaker's speech segment, bounded by silence
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Who spoke
    pub speaker_id: SpeakerId,
    /// Best-effort display name, the speaker id when lookup fails
    pub display_name: String,
    /// Everything captured, 48 kHz stereo PCM
    pub audio: AudioData,
    /// When the stream ended
    pub ended_at: DateTime<Utc>,
}

/// Frame buffer plus the VAD verdict for one capture
#[derive(Debug)]
struct SpeakerBuffer {
    vad: EnergyVad,
    pcm: Vec<u8>,
    speech_detected: bool,
}

impl SpeakerBuffer {
    fn new(vad: EnergyVad) -> Self {
        Self {
            vad,
            pcm: Vec::new(),
            speech_detected: false,
        }
    }

    fn push(&mut self, frame: &[u8]) {
        if !self.speech_detected && self.vad.has_speech(frame) {
            self.speech_detected = true;
        }
        self.pcm.extend_from_slice(frame);
    }

    /// The captured audio, if any frame contained speech
    fn finish(self) -> Option<Vec<u8>> {
        self.speech_detected.then_some(self.pcm)
    }
}

struct SpeakerCapture {
    state: CaptureState,
    generation: u64,
}

struct Shared {
    call_id: CallId,
    connection: Arc<dyn VoiceConnection>,
    vad: EnergyVad,
    silence: Duration,
    names: Option<Arc<dyn NameResolver>>,
    utterances: mpsc::Sender<Utterance>,
    captures: Mutex<HashMap<SpeakerId, SpeakerCapture>>,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
    generations: AtomicU64,
}

impl Shared {
    fn begin(self: &Arc<Self>, speaker: SpeakerId) {
        let mut captures = self.captures.lock();
        if captures
            .get(&speaker)
            .is_some_and(|c| c.state == CaptureState::Capturing)
        {
            debug!(guild_id = %self.call_id, user_id = %speaker, "Already capturing, ignoring start");
            return;
        }

        let generation = self.generations.fetch_add(1, Ordering::SeqCst);
        debug!(guild_id = %self.call_id, user_id = %speaker, generation, "Speaker started");
        let stream = self.connection.subscribe(&speaker, self.silence);
        captures.insert(
            speaker.clone(),
            SpeakerCapture {
                state: CaptureState::Capturing,
                generation,
            },
        );

        let mut tasks = self.tasks.lock();
        let task = tokio::spawn(Arc::clone(self).capture(speaker, generation, stream));
        tasks.insert(generation, task);
    }

    async fn capture(self: Arc<Self>, speaker: SpeakerId, generation: u64, mut stream: SpeakerAudio) {
        let mut buffer = SpeakerBuffer::new(self.vad);
        let mut failure = None;

        while let Some(frame) = stream.recv().await {
            match frame {
                Ok(frame) => buffer.push(&frame),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        drop(stream);

        if let Some(capture) = self
            .captures
            .lock()
            .get_mut(&speaker)
            .filter(|c| c.generation == generation)
        {
            capture.state = CaptureState::Finalizing;
        }

        if let Some(e) = failure {
            warn!(guild_id = %self.call_id, user_id = %speaker, error = %e, "Speaker stream failed, dropping capture");
        } else if let Some(pcm) = buffer.finish() {
            self.emit(&speaker, pcm).await;
        } else {
            debug!(guild_id = %self.call_id, user_id = %speaker, "No speech detected, discarding");
        }

        {
            let mut captures = self.captures.lock();
            if captures
                .get(&speaker)
                .is_some_and(|c| c.generation == generation)
            {
                captures.remove(&speaker);
            }
        }
        self.tasks.lock().remove(&generation);
    }

    async fn emit(&self, speaker: &SpeakerId, pcm: Vec<u8>) {
        let display_name = self.display_name(speaker).await;
        let audio = AudioData::pcm(Bytes::from(pcm), PcmSpec::DISCORD);
        info!(
            guild_id = %self.call_id,
            user_id = %speaker,
            display_name = %display_name,
            duration_ms = audio.duration_ms(),
            "Utterance captured"
        );

        let utterance = Utterance {
            speaker_id: speaker.clone(),
            display_name,
            audio,
            ended_at: Utc::now(),
        };
        if self.utterances.send(utterance).await.is_err() {
            debug!(guild_id = %self.call_id, "Turn queue closed, dropping utterance");
        }
    }

    async fn display_name(&self, speaker: &SpeakerId) -> String {
        let Some(names) = &self.names else {
            return speaker.to_string();
        };
        match names.display_name(speaker).await {
            Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
            Ok(_) => speaker.to_string(),
            Err(e) => {
                debug!(user_id = %speaker, error = %e, "Display name lookup failed");
                speaker.to_string()
            }
        }
    }
}

/// Turns a connection's speaker streams into [`Utterance`]s
pub struct UtteranceSegmenter {
    shared: Arc<Shared>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl UtteranceSegmenter {
    /// Start listening for speakers on `connection`, sending utterances to
    /// `utterances` in the order their streams end.
    pub fn start(
        call_id: CallId,
        connection: Arc<dyn VoiceConnection>,
        vad: EnergyVad,
        silence: Duration,
        names: Option<Arc<dyn NameResolver>>,
        utterances: mpsc::Sender<Utterance>,
    ) -> Self {
        let mut starts = connection.speaking_starts();
        let shared = Arc::new(Shared {
            call_id,
            connection,
            vad,
            silence,
            names,
            utterances,
            captures: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        });

        let listener = tokio::spawn({
            let shared = shared.clone();
            async move {
                loop {
                    match starts.recv().await {
                        Ok(speaker) => shared.begin(speaker),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(guild_id = %shared.call_id, missed, "Speaking events lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                debug!(guild_id = %shared.call_id, "Speaking listener stopped");
            }
        });

        Self {
            shared,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Capture state of one speaker
    pub fn state(&self, speaker: &SpeakerId) -> CaptureState {
        self.shared
            .captures
            .lock()
            .get(speaker)
            .map(|c| c.state)
            .unwrap_or(CaptureState::Idle)
    }

    /// Speakers currently capturing or finalizing
    pub fn active_speakers(&self) -> usize {
        self.shared.captures.lock().len()
    }

    /// Stop listening and abandon every in-flight capture
    pub fn stop(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        self.shared.captures.lock().clear();
        for (_, task) in self.shared.tasks.lock().drain() {
            task.abort();
        }
    }
}

impl Drop for UtteranceSegmenter {
    fn drop(&mut self) {
        self.stop();
    }
}
