//! Serenity + songbird implementation of the voice transport
//!
//! Songbird must be configured with `DecodeMode::Decode` so `VoiceTick`
//! events carry decoded 48 kHz stereo audio. Speakers are mapped from SSRC to
//! user id through `SpeakingStateUpdate`; a speaker's stream opens on their
//! first decoded tick and closes once no audio arrived for the silence gap.

use async_trait::async_trait;
use bytes::Bytes;
use murmur_provider_voice::{pcm_to_wav, samples_to_pcm, AudioData};
use parking_lot::Mutex;
use serenity::http::Http;
use serenity::model::channel::{Channel, ChannelType};
use serenity::model::id::{ChannelId, GuildId, UserId};
use songbird::events::context_data::VoiceTick;
use songbird::input::Input;
use songbird::{CoreEvent, Event, EventContext, EventHandler, Songbird, TrackEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_SILENCE_DURATION_MS;
use crate::transport::{
    CallId, ConnectRequest, NameResolver, ResolvedChannel, SpeakerAudio, SpeakerId,
    TransportError, VoiceConnection, VoiceGateway,
};

/// Decoded frames buffered per speaker before the oldest are dropped
const SPEAKER_BUFFER_FRAMES: usize = 512;

fn parse_id(kind: &str, raw: &str) -> Result<u64, TransportError> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| TransportError::Lookup(format!("invalid {} id '{}'", kind, raw)))
}

/// Gateway over a serenity HTTP client and a songbird manager
pub struct SongbirdGateway {
    http: Arc<Http>,
    manager: Arc<Songbird>,
}

impl SongbirdGateway {
    /// Create a gateway. `manager` must be the instance registered with the
    /// serenity client.
    pub fn new(http: Arc<Http>, manager: Arc<Songbird>) -> Self {
        Self { http, manager }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn resolve_channel(
        &self,
        call_id: &CallId,
        channel_id: &str,
    ) -> Result<Option<ResolvedChannel>, TransportError> {
        let guild = parse_id("guild", call_id.as_str())?;
        let Ok(channel) = parse_id("channel", channel_id) else {
            return Ok(None);
        };

        let channel = match self.http.get_channel(ChannelId::new(channel)).await {
            Ok(channel) => channel,
            Err(serenity::Error::Http(e)) if e.status_code().map(|s| s.as_u16()) == Some(404) => {
                return Ok(None);
            }
            Err(e) => return Err(TransportError::Lookup(e.to_string())),
        };

        let resolved = match channel {
            Channel::Guild(gc) => ResolvedChannel {
                id: channel_id.to_string(),
                voice_capable: matches!(gc.kind, ChannelType::Voice | ChannelType::Stage),
                adapter_available: gc.guild_id.get() == guild,
            },
            _ => ResolvedChannel {
                id: channel_id.to_string(),
                voice_capable: false,
                adapter_available: false,
            },
        };
        Ok(Some(resolved))
    }

    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Arc<dyn VoiceConnection>, TransportError> {
        let guild = GuildId::new(parse_id("guild", request.call_id.as_str())?);
        let channel = ChannelId::new(parse_id("channel", &request.channel_id)?);

        let receiver = Arc::new(ReceiveState::new());
        let call = self.manager.get_or_insert(guild);
        {
            let mut call = call.lock().await;
            call.remove_all_global_events();
            call.add_global_event(
                Event::Core(CoreEvent::SpeakingStateUpdate),
                ReceiveHandler(receiver.clone()),
            );
            call.add_global_event(
                Event::Core(CoreEvent::VoiceTick),
                ReceiveHandler(receiver.clone()),
            );
        }

        debug!(guild_id = %guild, channel_id = %channel, "Voice connection created");
        Ok(Arc::new(SongbirdConnection {
            manager: self.manager.clone(),
            guild,
            channel,
            self_mute: request.self_mute,
            self_deaf: request.self_deaf,
            receiver,
        }))
    }
}

struct LiveStream {
    tx: mpsc::Sender<Result<Bytes, TransportError>>,
    last_audio: Instant,
    end_after: Duration,
}

struct ReceiveState {
    speaking: broadcast::Sender<SpeakerId>,
    ssrc_users: Mutex<HashMap<u32, u64>>,
    streams: Mutex<HashMap<SpeakerId, LiveStream>>,
    pending: Mutex<HashMap<SpeakerId, SpeakerAudio>>,
}

impl ReceiveState {
    fn new() -> Self {
        let (speaking, _) = broadcast::channel(64);
        Self {
            speaking,
            ssrc_users: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn tick(&self, tick: &VoiceTick) {
        if self.speaking.receiver_count() == 0 {
            return;
        }
        let now = Instant::now();
        let mut started = Vec::new();

        {
            let users = self.ssrc_users.lock();
            let mut streams = self.streams.lock();

            for (ssrc, data) in tick.speaking.iter() {
                let Some(samples) = data.decoded_voice.as_ref().filter(|s| !s.is_empty()) else {
                    continue;
                };
                let Some(user) = users.get(ssrc) else {
                    continue;
                };
                let speaker = SpeakerId::from(*user);

                let stream = streams.entry(speaker.clone()).or_insert_with(|| {
                    let (tx, rx) = mpsc::channel(SPEAKER_BUFFER_FRAMES);
                    self.pending.lock().insert(speaker.clone(), rx);
                    started.push(speaker.clone());
                    LiveStream {
                        tx,
                        last_audio: now,
                        end_after: Duration::from_millis(DEFAULT_SILENCE_DURATION_MS),
                    }
                });
                stream.last_audio = now;
                if stream.tx.try_send(Ok(Bytes::from(samples_to_pcm(samples)))).is_err() {
                    debug!(user_id = %speaker, "Speaker buffer full, dropping frame");
                }
            }

            let ended: Vec<SpeakerId> = streams
                .iter()
                .filter(|(_, s)| now.duration_since(s.last_audio) >= s.end_after)
                .map(|(id, _)| id.clone())
                .collect();
            for speaker in ended {
                streams.remove(&speaker);
                self.pending.lock().remove(&speaker);
            }
        }

        for speaker in started {
            let _ = self.speaking.send(speaker);
        }
    }

    fn subscribe(&self, speaker: &SpeakerId, end_after: Duration) -> SpeakerAudio {
        if let Some(stream) = self.streams.lock().get_mut(speaker) {
            stream.end_after = end_after;
        }
        match self.pending.lock().remove(speaker) {
            Some(rx) => rx,
            None => mpsc::channel(1).1,
        }
    }

    fn clear(&self) {
        self.streams.lock().clear();
        self.pending.lock().clear();
        self.ssrc_users.lock().clear();
    }
}

struct ReceiveHandler(Arc<ReceiveState>);

#[async_trait]
impl EventHandler for ReceiveHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::SpeakingStateUpdate(update) => {
                if let Some(user) = update.user_id {
                    self.0.ssrc_users.lock().insert(update.ssrc, user.0);
                }
            }
            EventContext::VoiceTick(tick) => self.0.tick(tick),
            _ => {}
        }
        None
    }
}

struct TrackDone {
    notify: Arc<Mutex<Option<oneshot::Sender<bool>>>>,
    ok: bool,
}

#[async_trait]
impl EventHandler for TrackDone {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        if let Some(tx) = self.notify.lock().take() {
            let _ = tx.send(self.ok);
        }
        Some(Event::Cancel)
    }
}

/// One songbird call
pub struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild: GuildId,
    channel: ChannelId,
    self_mute: bool,
    self_deaf: bool,
    receiver: Arc<ReceiveState>,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn ready(&self) -> Result<(), TransportError> {
        let call = self
            .manager
            .join(self.guild, self.channel)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let mut call = call.lock().await;
        if self.self_mute {
            call.mute(true)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        }
        if self.self_deaf {
            call.deafen(true)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        }

        info!(guild_id = %self.guild, channel_id = %self.channel, "Voice connection ready");
        Ok(())
    }

    fn speaking_starts(&self) -> broadcast::Receiver<SpeakerId> {
        self.receiver.speaking.subscribe()
    }

    fn subscribe(&self, speaker: &SpeakerId, end_after_silence: Duration) -> SpeakerAudio {
        self.receiver.subscribe(speaker, end_after_silence)
    }

    async fn play(&self, audio: AudioData) -> Result<(), TransportError> {
        let wav = pcm_to_wav(&audio.data, audio.spec)
            .map_err(|e| TransportError::Playback(e.to_string()))?;
        let call = self.manager.get(self.guild).ok_or(TransportError::Closed)?;

        let (tx, rx) = oneshot::channel();
        let notify = Arc::new(Mutex::new(Some(tx)));
        {
            let mut call = call.lock().await;
            let handle = call.play_input(Input::from(wav));
            let end = handle.add_event(
                Event::Track(TrackEvent::End),
                TrackDone {
                    notify: notify.clone(),
                    ok: true,
                },
            );
            let error = handle.add_event(
                Event::Track(TrackEvent::Error),
                TrackDone {
                    notify,
                    ok: false,
                },
            );
            if let Err(e) = end.and(error) {
                return Err(TransportError::Playback(e.to_string()));
            }
        }

        match rx.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(TransportError::Playback("track errored".to_string())),
            Err(_) => Err(TransportError::Closed),
        }
    }

    async fn destroy(&self) {
        self.receiver.clear();
        if let Err(e) = self.manager.remove(self.guild).await {
            debug!(guild_id = %self.guild, error = %e, "Voice connection already gone");
        }
    }
}

/// Display names through the serenity HTTP client
pub struct SerenityNames {
    http: Arc<Http>,
}

impl SerenityNames {
    /// Create a resolver
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NameResolver for SerenityNames {
    async fn display_name(&self, speaker: &SpeakerId) -> Result<String, TransportError> {
        let id = parse_id("user", speaker.as_str())?;
        match self.http.get_user(UserId::new(id)).await {
            Ok(user) => Ok(user.display_name().to_string()),
            Err(e) => {
                warn!(user_id = %speaker, error = %e, "User lookup failed");
                Err(TransportError::Lookup(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("guild", " 1234 ").unwrap(), 1234);
        assert!(parse_id("guild", "0").is_err());
        assert!(parse_id("guild", "general").is_err());
    }

    #[test]
    fn test_subscribe_without_stream_is_closed() {
        let state = ReceiveState::new();
        let mut rx = state.subscribe(&"42".into(), Duration::from_millis(800));
        assert!(rx.try_recv().is_err());
    }
}
