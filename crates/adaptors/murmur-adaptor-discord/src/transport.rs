//! Voice transport seam
//!
//! The runtime only talks to the gateway through these traits. Audio crossing
//! the seam is signed 16-bit little-endian PCM at 48 kHz stereo in both
//! directions.

use async_trait::async_trait;
use bytes::Bytes;
use murmur_provider_voice::AudioData;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw id
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Raw id
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// One voice call. Discord allows one call per guild, so this is the guild id.
    CallId
);

string_id!(
    /// A participant whose audio arrives as its own stream
    SpeakerId
);

/// Decoded frames for one speaker; the channel closing marks end of speech
pub type SpeakerAudio = mpsc::Receiver<Result<Bytes, TransportError>>;

/// What the gateway knows about a channel before connecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    /// Channel id
    pub id: String,
    /// Whether the channel carries voice (voice or stage)
    pub voice_capable: bool,
    /// Whether the gateway can open a voice connection for it
    pub adapter_available: bool,
}

/// Parameters for opening a voice connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Call to connect
    pub call_id: CallId,
    /// Target voice channel
    pub channel_id: String,
    /// Join muted
    pub self_mute: bool,
    /// Join deafened
    pub self_deaf: bool,
}

/// Transport failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Channel lookup failed for a reason other than "not found"
    #[error("Channel lookup failed: {0}")]
    Lookup(String),

    /// Opening or readying the connection failed
    #[error("Voice connection failed: {0}")]
    Connect(String),

    /// A speaker's raw stream broke
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// Playback failed
    #[error("Playback failed: {0}")]
    Playback(String),

    /// The connection is gone
    #[error("Voice connection closed")]
    Closed,
}

/// Entry point into the voice gateway
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Look up a channel; `Ok(None)` when it does not exist
    async fn resolve_channel(
        &self,
        call_id: &CallId,
        channel_id: &str,
    ) -> Result<Option<ResolvedChannel>, TransportError>;

    /// Open a connection. The returned handle may not be ready yet.
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Arc<dyn VoiceConnection>, TransportError>;
}

/// One open voice connection, owned by its call session
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Resolves once the connection can send and receive audio
    async fn ready(&self) -> Result<(), TransportError>;

    /// Speaker ids as they start speaking
    fn speaking_starts(&self) -> broadcast::Receiver<SpeakerId>;

    /// Decoded audio for a speaker that just started speaking. The stream
    /// ends after `end_after_silence` without audio from that speaker.
    fn subscribe(&self, speaker: &SpeakerId, end_after_silence: Duration) -> SpeakerAudio;

    /// Play 48 kHz stereo PCM, resolving when playback goes idle
    async fn play(&self, audio: AudioData) -> Result<(), TransportError>;

    /// Tear the connection down. Safe to call more than once.
    async fn destroy(&self);
}

/// Best-effort display-name lookup for speakers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Human-readable name for a speaker
    async fn display_name(&self, speaker: &SpeakerId) -> Result<String, TransportError>;
}
