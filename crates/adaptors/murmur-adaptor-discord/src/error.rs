//! Errors surfaced by the voice runtime

use murmur_core::MurmurError;
use murmur_provider_voice::VoiceError;
use thiserror::Error;

use crate::transport::{CallId, TransportError};

/// Failures of join / leave / speak
#[derive(Debug, Error)]
pub enum SessionError {
    /// Channel does not exist
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// Channel exists but carries no voice
    #[error("Channel {0} is not a voice-based channel")]
    NotVoiceCapable(String),

    /// The gateway cannot open a voice connection for the channel
    #[error("Unable to resolve voice adapter for channel {0}")]
    AdapterUnavailable(String),

    /// The connection never became ready
    #[error("Voice connection for guild {call_id} was not ready within {timeout_ms}ms")]
    ReadyTimeout {
        /// Call being joined
        call_id: CallId,
        /// Bound that elapsed
        timeout_ms: u64,
    },

    /// No session for the call
    #[error("Not connected to a voice channel for guild {0}")]
    NotConnected(CallId),

    /// A join for this call is still waiting on the connection
    #[error("Voice connection for guild {0} is still being established")]
    Busy(CallId),

    /// The call was left while its join was still connecting
    #[error("Join for guild {0} was cancelled by leave")]
    Cancelled(CallId),

    /// Voice is switched off in configuration
    #[error("Discord voice is disabled")]
    Disabled,

    /// The runtime was built without a voice transport
    #[error("Voice transport not available: {0}")]
    TransportUnavailable(String),

    /// Audio processing failed
    #[error(transparent)]
    Voice(#[from] VoiceError),

    /// Gateway failure
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<SessionError> for MurmurError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::ReadyTimeout { .. } => MurmurError::timeout(err.to_string()),
            SessionError::ChannelNotFound(_) | SessionError::NotConnected(_) => {
                MurmurError::not_found(err.to_string())
            }
            SessionError::Disabled | SessionError::TransportUnavailable(_) => {
                MurmurError::config(err.to_string())
            }
            SessionError::Voice(e) => e.into(),
            other => MurmurError::voice(other.to_string()),
        }
    }
}
