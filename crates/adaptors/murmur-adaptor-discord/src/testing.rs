//! In-memory fakes for driving the voice runtime in tests
//!
//! Every fake can share an [`EventLog`] so tests can assert how stages of
//! different turns interleave.

use async_trait::async_trait;
use bytes::Bytes;
use murmur_core::Result as MurmurResult;
use murmur_provider_voice::{
    samples_to_pcm, AudioData, AudioFormat, PcmSpec, SpeechProvider, SpeechSynthesizer,
    Transcoder, VoiceError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::reply::{BackendReply, ReplyBackend, ReplyPayload, ReplyRequest};
use crate::transport::{
    CallId, ConnectRequest, ResolvedChannel, SpeakerAudio, SpeakerId, TransportError,
    VoiceConnection, VoiceGateway,
};

/// Samples in one 20 ms frame of 48 kHz stereo audio
const FRAME_SAMPLES: usize = 960 * 2;

/// 20 ms of digital silence
pub fn quiet_frame() -> Vec<u8> {
    vec![0u8; FRAME_SAMPLES * 2]
}

/// 20 ms of a loud square wave
pub fn loud_frame() -> Vec<u8> {
    loud_frame_of(8_000)
}

/// 20 ms square wave at `amplitude`; distinct amplitudes give distinct bytes
pub fn loud_frame_of(amplitude: i16) -> Vec<u8> {
    let samples: Vec<i16> = (0..FRAME_SAMPLES)
        .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
        .collect();
    samples_to_pcm(&samples)
}

/// Poll `condition` until it holds, for up to about five seconds
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Ordered record of what the fakes did
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    /// Events so far
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Position of the first event equal to `event`
    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == event)
    }
}

#[derive(Default)]
struct ConnectionState {
    senders: HashMap<SpeakerId, mpsc::Sender<Result<Bytes, TransportError>>>,
    pending: HashMap<SpeakerId, SpeakerAudio>,
    subscriptions: HashMap<SpeakerId, usize>,
    played: Vec<AudioData>,
    playing: usize,
    max_playing: usize,
    play_delay: Duration,
    playback_error: Option<String>,
}

/// Voice connection driven by the test
pub struct FakeConnection {
    call_id: CallId,
    speaking: broadcast::Sender<SpeakerId>,
    state: Mutex<ConnectionState>,
    never_ready: AtomicBool,
    destroyed: AtomicBool,
    log: Option<EventLog>,
}

impl FakeConnection {
    /// Ready connection for call `g1`
    pub fn new() -> Arc<Self> {
        Self::for_call("g1".into(), None)
    }

    fn for_call(call_id: CallId, log: Option<EventLog>) -> Arc<Self> {
        let (speaking, _) = broadcast::channel(64);
        Arc::new(Self {
            call_id,
            speaking,
            state: Mutex::new(ConnectionState::default()),
            never_ready: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            log,
        })
    }

    /// Call this connection belongs to
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Make `ready` hang forever
    pub fn set_never_ready(&self, never_ready: bool) {
        self.never_ready.store(never_ready, Ordering::SeqCst);
    }

    /// Make every `play` take this long
    pub fn set_play_delay(&self, delay: Duration) {
        self.state.lock().play_delay = delay;
    }

    /// Make every `play` fail
    pub fn fail_playback(&self, message: &str) {
        self.state.lock().playback_error = Some(message.to_string());
    }

    /// A speaker starts talking: opens their stream and announces them
    pub fn start_speaking(&self, speaker: impl Into<SpeakerId>) {
        let speaker = speaker.into();
        let (tx, rx) = mpsc::channel(256);
        {
            let mut state = self.state.lock();
            state.senders.insert(speaker.clone(), tx);
            state.pending.insert(speaker.clone(), rx);
        }
        let _ = self.speaking.send(speaker);
    }

    /// Deliver a decoded frame for a speaker
    pub fn push_frame(&self, speaker: impl Into<SpeakerId>, frame: Vec<u8>) {
        let speaker = speaker.into();
        if let Some(tx) = self.state.lock().senders.get(&speaker) {
            let _ = tx.try_send(Ok(Bytes::from(frame)));
        }
    }

    /// End a speaker's stream as if the silence gap elapsed
    pub fn end_stream(&self, speaker: impl Into<SpeakerId>) {
        self.state.lock().senders.remove(&speaker.into());
    }

    /// Break a speaker's stream
    pub fn fail_stream(&self, speaker: impl Into<SpeakerId>, error: TransportError) {
        if let Some(tx) = self.state.lock().senders.remove(&speaker.into()) {
            let _ = tx.try_send(Err(error));
        }
    }

    /// Start, fill and end a speaker's stream in one go
    pub fn speak_utterance(&self, speaker: impl Into<SpeakerId>, frames: Vec<Vec<u8>>) {
        let speaker = speaker.into();
        self.start_speaking(speaker.clone());
        for frame in frames {
            self.push_frame(speaker.clone(), frame);
        }
        self.end_stream(speaker);
    }

    /// How often `subscribe` was called for a speaker
    pub fn subscriptions(&self, speaker: impl Into<SpeakerId>) -> usize {
        self.state
            .lock()
            .subscriptions
            .get(&speaker.into())
            .copied()
            .unwrap_or(0)
    }

    /// Clips played so far
    pub fn played(&self) -> Vec<AudioData> {
        self.state.lock().played.clone()
    }

    /// Highest number of overlapping `play` calls
    pub fn max_concurrent_plays(&self) -> usize {
        self.state.lock().max_playing
    }

    /// Whether `destroy` was called
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    async fn ready(&self) -> Result<(), TransportError> {
        if self.never_ready.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn speaking_starts(&self) -> broadcast::Receiver<SpeakerId> {
        self.speaking.subscribe()
    }

    fn subscribe(&self, speaker: &SpeakerId, _end_after_silence: Duration) -> SpeakerAudio {
        let mut state = self.state.lock();
        *state.subscriptions.entry(speaker.clone()).or_default() += 1;
        match state.pending.remove(speaker) {
            Some(rx) => rx,
            None => mpsc::channel(1).1,
        }
    }

    async fn play(&self, audio: AudioData) -> Result<(), TransportError> {
        let delay = {
            let mut state = self.state.lock();
            if let Some(message) = &state.playback_error {
                return Err(TransportError::Playback(message.clone()));
            }
            state.playing += 1;
            state.max_playing = state.max_playing.max(state.playing);
            if let Some(log) = &self.log {
                log.push(format!("play:{}", String::from_utf8_lossy(&audio.data)));
            }
            state.played.push(audio);
            state.play_delay
        };

        tokio::time::sleep(delay).await;
        self.state.lock().playing -= 1;
        Ok(())
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.senders.clear();
        state.pending.clear();
    }
}

/// Gateway with a fixed channel table
#[derive(Default)]
pub struct FakeGateway {
    channels: Mutex<HashMap<String, ResolvedChannel>>,
    connections: Mutex<Vec<(ConnectRequest, Arc<FakeConnection>)>>,
    never_ready: AtomicBool,
    log: Option<EventLog>,
}

impl FakeGateway {
    /// Gateway without channels
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Gateway whose connections write to `log`
    pub fn with_log(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: Some(log),
            ..Default::default()
        })
    }

    /// Register a joinable voice channel
    pub fn add_voice_channel(&self, channel_id: &str) {
        self.add_channel(ResolvedChannel {
            id: channel_id.to_string(),
            voice_capable: true,
            adapter_available: true,
        });
    }

    /// Register any channel
    pub fn add_channel(&self, channel: ResolvedChannel) {
        self.channels.lock().insert(channel.id.clone(), channel);
    }

    /// New connections never become ready
    pub fn set_never_ready(&self, never_ready: bool) {
        self.never_ready.store(never_ready, Ordering::SeqCst);
    }

    /// Connect requests seen so far
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.connections.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    /// Every connection opened for a call, oldest first
    pub fn connections_for(&self, call_id: &str) -> Vec<Arc<FakeConnection>> {
        self.connections
            .lock()
            .iter()
            .filter(|(r, _)| r.call_id.as_str() == call_id)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Most recent connection for a call
    pub fn connection(&self, call_id: &str) -> Option<Arc<FakeConnection>> {
        self.connections_for(call_id).pop()
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn resolve_channel(
        &self,
        _call_id: &CallId,
        channel_id: &str,
    ) -> Result<Option<ResolvedChannel>, TransportError> {
        Ok(self.channels.lock().get(channel_id).cloned())
    }

    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Arc<dyn VoiceConnection>, TransportError> {
        let connection = FakeConnection::for_call(request.call_id.clone(), self.log.clone());
        connection.set_never_ready(self.never_ready.load(Ordering::SeqCst));
        self.connections.lock().push((request, connection.clone()));
        Ok(connection)
    }
}

/// Transcoder that relabels audio without touching the bytes
#[derive(Debug, Default)]
pub struct FakeTranscoder {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl FakeTranscoder {
    /// Make every transcode fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Transcodes so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    fn name(&self) -> &str {
        "fake"
    }

    async fn transcode(
        &self,
        audio: &AudioData,
        format: AudioFormat,
        spec: PcmSpec,
    ) -> Result<AudioData, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(VoiceError::TranscodeError("fake transcoder failure".into()));
        }
        Ok(AudioData {
            data: audio.data.clone(),
            format,
            spec,
        })
    }
}

/// Synthesizer whose audio is the UTF-8 bytes of the text
#[derive(Debug, Default)]
pub struct FakeSynthesizer {
    spoken: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    /// Texts synthesized so far
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    fn name(&self) -> &str {
        "fake"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn output_spec(&self) -> PcmSpec {
        PcmSpec::mono(22_050)
    }

    async fn synthesize(&self, text: &str) -> Result<AudioData, VoiceError> {
        self.spoken.lock().push(text.to_string());
        Ok(AudioData::pcm(text.as_bytes().to_vec(), self.output_spec()))
    }
}

/// STT provider with per-clip scripted transcripts
pub struct FakeSpeechProvider {
    available: bool,
    scripts: Mutex<HashMap<Vec<u8>, (String, Duration)>>,
    fallback: Mutex<Option<String>>,
    calls: AtomicUsize,
    log: Option<EventLog>,
}

impl FakeSpeechProvider {
    /// Available provider that hears nothing until scripted
    pub fn new() -> Arc<Self> {
        Self::build(true, None)
    }

    /// Provider sharing `log`
    pub fn with_log(log: EventLog) -> Arc<Self> {
        Self::build(true, Some(log))
    }

    /// Provider reporting itself unavailable
    pub fn unavailable() -> Arc<Self> {
        Self::build(false, None)
    }

    fn build(available: bool, log: Option<EventLog>) -> Arc<Self> {
        Arc::new(Self {
            available,
            scripts: Mutex::new(HashMap::new()),
            fallback: Mutex::new(None),
            calls: AtomicUsize::new(0),
            log,
        })
    }

    /// Transcript for any clip containing `frame`, after `delay`
    pub fn script(&self, frame: Vec<u8>, text: &str, delay: Duration) {
        self.scripts.lock().insert(frame, (text.to_string(), delay));
    }

    /// Transcript for clips that match no script
    pub fn set_fallback(&self, text: &str) {
        *self.fallback.lock() = Some(text.to_string());
    }

    /// Transcriptions attempted so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, audio: &[u8]) -> Option<(String, Duration)> {
        let scripts = self.scripts.lock();
        scripts
            .iter()
            .find(|(frame, _)| {
                !frame.is_empty() && audio.windows(frame.len()).any(|w| w == frame.as_slice())
            })
            .map(|(_, script)| script.clone())
            .or_else(|| self.fallback.lock().clone().map(|t| (t, Duration::ZERO)))
    }
}

#[async_trait]
impl SpeechProvider for FakeSpeechProvider {
    fn name(&self) -> &str {
        "fake-stt"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn transcribe(&self, audio: &AudioData) -> Result<String, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some((text, delay)) = self.lookup(&audio.data) else {
            return Err(VoiceError::TranscriptionError("nothing scripted".into()));
        };

        if let Some(log) = &self.log {
            log.push(format!("stt:start:{}", text));
        }
        tokio::time::sleep(delay).await;
        if let Some(log) = &self.log {
            log.push(format!("stt:end:{}", text));
        }
        Ok(text)
    }
}

/// Reply backend that answers `You said: <prompt>`
#[derive(Default)]
pub struct FakeReplyBackend {
    requests: Mutex<Vec<ReplyRequest>>,
    fixed_reply: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    aborted: AtomicBool,
    log: Option<EventLog>,
}

impl FakeReplyBackend {
    /// Echoing backend
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Echoing backend sharing `log`
    pub fn with_log(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: Some(log),
            ..Default::default()
        })
    }

    /// Answer with `reply` instead of echoing; an empty string answers nothing
    pub fn set_reply(&self, reply: &str) {
        *self.fixed_reply.lock() = Some(reply.to_string());
    }

    /// Take this long per generation
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Report runs as aborted
    pub fn set_aborted(&self, aborted: bool) {
        self.aborted.store(aborted, Ordering::SeqCst);
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<ReplyRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ReplyBackend for FakeReplyBackend {
    fn name(&self) -> &str {
        "fake-agent"
    }

    async fn generate(&self, request: &ReplyRequest) -> MurmurResult<BackendReply> {
        self.requests.lock().push(request.clone());
        if let Some(log) = &self.log {
            log.push(format!("reply:{}", request.prompt));
        }

        let delay = *self.delay.lock();
        tokio::time::sleep(delay).await;

        let text = self
            .fixed_reply
            .lock()
            .clone()
            .unwrap_or_else(|| format!("You said: {}", request.prompt));
        let payloads = if text.is_empty() {
            Vec::new()
        } else {
            vec![ReplyPayload::text(text)]
        };
        Ok(BackendReply {
            payloads,
            aborted: self.aborted.load(Ordering::SeqCst),
        })
    }
}
