//! Process- and HTTP-backed audio engines

mod process;

pub mod ffmpeg;
pub mod groq;
pub mod piper;
pub mod whisper_cpp;

pub use ffmpeg::{FfmpegTranscoder, DEFAULT_FFMPEG_PATH};
pub use groq::{GroqProvider, DEFAULT_GROQ_MODEL, GROQ_TRANSCRIPTION_ENDPOINT};
pub use piper::{PiperSynthesizer, DEFAULT_PIPER_SAMPLE_RATE};
pub use whisper_cpp::WhisperCppProvider;
