//! Discord voice-channel adapter
//!
//! Joins guild voice calls and runs a conversational loop per call:
//!
//! ```text
//! gateway audio -> UtteranceSegmenter -> SpeechRouter -> ReplyGenerator -> AudioOutputPlayer -> gateway
//! ```
//!
//! Explicit `speak` requests enter at the [`AudioOutputPlayer`] and share its
//! per-call serialization with pipeline replies.
//!
//! The gateway itself sits behind [`VoiceGateway`] / [`VoiceConnection`]; the
//! `voice` feature provides the serenity + songbird implementation and the
//! `voice-agent` binary.

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod history;
pub mod player;
pub mod reply;
pub mod runtime;
pub mod segmenter;
pub mod session;
pub mod tool;
pub mod transport;

#[cfg(feature = "voice")]
pub mod discord;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::VoiceConfig;
pub use error::SessionError;
pub use history::{History, Role, TranscriptTurn, DEFAULT_HISTORY_LIMIT};
pub use player::AudioOutputPlayer;
pub use reply::{
    AgentApiBackend, BackendReply, ReplyBackend, ReplyContext, ReplyFailure, ReplyGenerator,
    ReplyOutcome, ReplyPayload, ReplyRequest,
};
pub use runtime::{VoiceRuntime, VoiceServices};
pub use segmenter::{CaptureState, Utterance, UtteranceSegmenter};
pub use session::CallSession;
pub use tool::VoiceChannelAction;
pub use transport::{
    CallId, ConnectRequest, NameResolver, ResolvedChannel, SpeakerAudio, SpeakerId,
    TransportError, VoiceConnection, VoiceGateway,
};
