//! Voice provider for Murmur
//!
//! Audio building blocks used by the call pipeline:
//!
//! ## Detection
//! - [`EnergyVad`] - RMS energy voice activity detection over 16-bit PCM
//!
//! ## Transcoding
//! - [`FfmpegTranscoder`] - resamples/remixes PCM through an `ffmpeg` child process
//!
//! ## TTS
//! - [`PiperSynthesizer`] - local Piper binary, raw 16-bit mono output
//!
//! ## STT
//! - [`GroqProvider`] - hosted Whisper via the Groq transcription API
//! - [`WhisperCppProvider`] - local whisper.cpp binary
//! - [`SpeechRouter`] - ordered fallback across providers
//!
//! Every STT provider receives the same canonical input: 16 kHz mono 16-bit WAV
//! ([`PcmSpec::SPEECH_TO_TEXT`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

mod audio;
mod engines;
mod router;
mod types;
mod vad;

pub use audio::*;
pub use engines::*;
pub use router::*;
pub use types::*;
pub use vad::*;
