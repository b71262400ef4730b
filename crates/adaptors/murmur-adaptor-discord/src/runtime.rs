//! Voice runtime: one [`CallSession`] per connected call
//!
//! `join` resolves the channel, opens a connection, waits (bounded) for it to
//! become ready and registers the session. `leave` is idempotent and also
//! cancels a join that is still connecting, tearing down its half-open
//! connection. The call table is only locked
//! for bookkeeping, never across an await.

use futures_util::future::join_all;
use murmur_provider_voice::{SpeechRouter, SpeechSynthesizer, Transcoder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::VoiceConfig;
use crate::error::SessionError;
use crate::reply::{ReplyBackend, ReplyGenerator};
use crate::session::CallSession;
use crate::transport::{CallId, ConnectRequest, NameResolver, VoiceConnection, VoiceGateway};

/// Audio and reply collaborators shared by every call
#[derive(Clone)]
pub struct VoiceServices {
    /// Resampling and container conversion
    pub transcoder: Arc<dyn Transcoder>,
    /// Text to speech
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Speech to text, in fallback order
    pub router: SpeechRouter,
    /// Reply generation
    pub replies: ReplyGenerator,
    /// Speaker display names
    pub names: Option<Arc<dyn NameResolver>>,
}

impl VoiceServices {
    /// Engines described by `config`: ffmpeg, Piper, Groq then whisper.cpp
    pub fn from_config(
        config: &VoiceConfig,
        backend: Option<Arc<dyn ReplyBackend>>,
        names: Option<Arc<dyn NameResolver>>,
    ) -> Self {
        Self {
            transcoder: Arc::new(config.transcoder()),
            synthesizer: Arc::new(config.synthesizer()),
            router: config.speech_router(),
            replies: ReplyGenerator::new(backend, config),
            names,
        }
    }
}

enum CallSlot {
    Connecting { attempt: u64, cancel: Arc<Notify> },
    Connected(Arc<CallSession>),
}

impl CallSlot {
    fn cancel(&self) {
        if let CallSlot::Connecting { cancel, .. } = self {
            cancel.notify_one();
        }
    }
}

/// Entry point for join / leave / speak / status
pub struct VoiceRuntime {
    config: VoiceConfig,
    gateway: Arc<dyn VoiceGateway>,
    services: VoiceServices,
    calls: Mutex<HashMap<CallId, CallSlot>>,
    attempts: AtomicU64,
}

impl VoiceRuntime {
    /// Build a runtime. Fails when there is no gateway to talk to; other
    /// configuration problems are logged and degrade features instead.
    pub fn new(
        config: VoiceConfig,
        gateway: Option<Arc<dyn VoiceGateway>>,
        services: VoiceServices,
    ) -> Result<Self, SessionError> {
        let gateway = gateway.ok_or_else(|| {
            SessionError::TransportUnavailable("Discord client not available".to_string())
        })?;

        let problems = config.validate();
        if !problems.is_empty() {
            warn!(issues = %problems.join("; "), "[discord-voice] Config issues");
        }
        if config.stt_enabled && !services.router.has_available_provider() {
            warn!("Speech capture enabled but no STT provider is available; calls will be speak-only");
        }

        info!(
            enabled = config.enabled,
            stt_providers = ?services.router.provider_names(),
            reply_backend = services.replies.has_backend(),
            "Voice runtime ready"
        );

        Ok(Self {
            config,
            gateway,
            services,
            calls: Mutex::new(HashMap::new()),
            attempts: AtomicU64::new(0),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    /// Whether voice actions are allowed
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Whether new sessions capture speaker audio
    pub fn capture_enabled(&self) -> bool {
        self.config.stt_enabled && self.services.router.has_available_provider()
    }

    fn ensure_enabled(&self) -> Result<(), SessionError> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(SessionError::Disabled)
        }
    }

    /// Join `channel_id` in `call_id`. An existing session for the call is
    /// left first.
    pub async fn join(&self, call_id: &CallId, channel_id: &str) -> Result<(), SessionError> {
        self.ensure_enabled()?;

        let channel = self
            .gateway
            .resolve_channel(call_id, channel_id)
            .await?
            .ok_or_else(|| SessionError::ChannelNotFound(channel_id.to_string()))?;
        if !channel.voice_capable {
            return Err(SessionError::NotVoiceCapable(channel_id.to_string()));
        }
        if !channel.adapter_available {
            return Err(SessionError::AdapterUnavailable(channel_id.to_string()));
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let cancel = Arc::new(Notify::new());
        let previous = {
            let mut calls = self.calls.lock();
            if let Some(CallSlot::Connecting { .. }) = calls.get(call_id) {
                return Err(SessionError::Busy(call_id.clone()));
            }
            calls.insert(
                call_id.clone(),
                CallSlot::Connecting {
                    attempt,
                    cancel: cancel.clone(),
                },
            )
        };
        if let Some(CallSlot::Connected(session)) = previous {
            info!(guild_id = %call_id, channel_id = %session.channel_id(), "Leaving previous voice channel");
            session.close().await;
        }

        let request = ConnectRequest {
            call_id: call_id.clone(),
            channel_id: channel_id.to_string(),
            self_mute: self.config.auto_mute,
            self_deaf: self.config.auto_deaf,
        };
        let connection = match self.gateway.connect(request).await {
            Ok(connection) => connection,
            Err(e) => {
                self.release(call_id, attempt);
                return Err(e.into());
            }
        };

        let ready_timeout = self.config.ready_timeout();
        let ready = tokio::select! {
            ready = tokio::time::timeout(ready_timeout, connection.ready()) => ready,
            _ = cancel.notified() => {
                debug!(guild_id = %call_id, "Join cancelled before the connection was ready");
                self.abandon(call_id, attempt, &connection).await;
                return Err(SessionError::Cancelled(call_id.clone()));
            }
        };
        match ready {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.abandon(call_id, attempt, &connection).await;
                return Err(e.into());
            }
            Err(_) => {
                warn!(guild_id = %call_id, timeout_ms = ready_timeout.as_millis() as u64, "Voice connection not ready in time");
                self.abandon(call_id, attempt, &connection).await;
                return Err(SessionError::ReadyTimeout {
                    call_id: call_id.clone(),
                    timeout_ms: ready_timeout.as_millis() as u64,
                });
            }
        }

        let session = CallSession::start(
            call_id.clone(),
            channel_id,
            connection,
            &self.services,
            &self.config,
            self.capture_enabled(),
        );

        let registered = {
            let mut calls = self.calls.lock();
            match calls.get(call_id) {
                Some(CallSlot::Connecting { attempt: current, .. }) if *current == attempt => {
                    calls.insert(call_id.clone(), CallSlot::Connected(session.clone()));
                    true
                }
                _ => false,
            }
        };
        if !registered {
            debug!(guild_id = %call_id, "Join cancelled while connecting");
            session.close().await;
            return Err(SessionError::Cancelled(call_id.clone()));
        }

        info!(guild_id = %call_id, channel_id = %channel_id, "Joined voice channel");
        Ok(())
    }

    fn release(&self, call_id: &CallId, attempt: u64) {
        let mut calls = self.calls.lock();
        if let Some(CallSlot::Connecting { attempt: current, .. }) = calls.get(call_id) {
            if *current == attempt {
                calls.remove(call_id);
            }
        }
    }

    async fn abandon(&self, call_id: &CallId, attempt: u64, connection: &Arc<dyn VoiceConnection>) {
        connection.destroy().await;
        self.release(call_id, attempt);
    }

    /// Leave the call. Leaving a call that is not connected does nothing.
    pub async fn leave(&self, call_id: &CallId) -> Result<(), SessionError> {
        self.ensure_enabled()?;

        let slot = self.calls.lock().remove(call_id);
        match slot {
            Some(CallSlot::Connected(session)) => session.close().await,
            Some(slot @ CallSlot::Connecting { .. }) => {
                debug!(guild_id = %call_id, "Cancelling pending join");
                slot.cancel();
            }
            None => debug!(guild_id = %call_id, "Not connected, nothing to leave"),
        }
        Ok(())
    }

    /// Speak `text` into the call. Blank text is ignored.
    pub async fn speak(&self, call_id: &CallId, text: &str) -> Result<(), SessionError> {
        self.ensure_enabled()?;

        let session = self
            .session(call_id)
            .ok_or_else(|| SessionError::NotConnected(call_id.clone()))?;
        let text = text.trim();
        if text.is_empty() {
            warn!(guild_id = %call_id, "Ignoring empty speak request");
            return Ok(());
        }

        session.speak(text).await
    }

    /// Connected call ids, sorted
    pub fn status(&self) -> Vec<CallId> {
        let mut ids: Vec<CallId> = self
            .calls
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, CallSlot::Connected(_)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Session of a connected call
    pub fn session(&self, call_id: &CallId) -> Option<Arc<CallSession>> {
        match self.calls.lock().get(call_id) {
            Some(CallSlot::Connected(session)) => Some(session.clone()),
            _ => None,
        }
    }

    /// Leave every call
    pub async fn shutdown(&self) {
        let slots: Vec<(CallId, CallSlot)> = self.calls.lock().drain().collect();
        let sessions: Vec<Arc<CallSession>> = slots
            .into_iter()
            .filter_map(|(_, slot)| match slot {
                CallSlot::Connected(session) => Some(session),
                pending @ CallSlot::Connecting { .. } => {
                    pending.cancel();
                    None
                }
            })
            .collect();

        info!(calls = sessions.len(), "Shutting down voice runtime");
        join_all(sessions.iter().map(|s| s.close())).await;
    }
}
