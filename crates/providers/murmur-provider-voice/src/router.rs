//! Ordered STT fallback
//!
//! Providers are tried in configuration order. Unavailable providers are
//! skipped without being called, failures and blank transcripts fall through
//! to the next provider, and the first non-blank transcript wins.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::types::*;

/// Fallback router over [`SpeechProvider`]s
#[derive(Clone, Default)]
pub struct SpeechRouter {
    providers: Vec<Arc<dyn SpeechProvider>>,
}

impl std::fmt::Debug for SpeechRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechRouter")
            .field("providers", &self.provider_names())
            .finish()
    }
}

impl SpeechRouter {
    /// Create a router over providers in priority order
    pub fn new(providers: Vec<Arc<dyn SpeechProvider>>) -> Self {
        Self { providers }
    }

    /// Append a lower-priority provider
    pub fn with_provider(mut self, provider: Arc<dyn SpeechProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Provider names in priority order
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Whether at least one provider reports itself available
    pub fn has_available_provider(&self) -> bool {
        self.providers.iter().any(|p| p.is_available())
    }

    /// Transcribe canonical 16 kHz mono WAV, returning the trimmed transcript
    pub async fn transcribe(&self, audio: &AudioData) -> Result<String, VoiceError> {
        if !audio.matches(AudioFormat::Wav, PcmSpec::SPEECH_TO_TEXT) {
            return Err(VoiceError::UnsupportedFormat(format!(
                "STT input must be {} Hz mono wav, got {} Hz x{} {}",
                PcmSpec::SPEECH_TO_TEXT.sample_rate,
                audio.spec.sample_rate,
                audio.spec.channels,
                audio.format.as_str()
            )));
        }

        for provider in &self.providers {
            if !provider.is_available() {
                debug!(provider = provider.name(), "STT provider unavailable, skipping");
                continue;
            }

            match provider.transcribe(audio).await {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(provider = provider.name(), chars = text.len(), "STT transcript");
                    return Ok(text.trim().to_string());
                }
                Ok(_) => {
                    debug!(provider = provider.name(), "STT provider returned empty transcript");
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "STT provider failed, trying next");
                }
            }
        }

        Err(VoiceError::NoProviderAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Reply {
        Text(&'static str),
        Fail,
    }

    struct StubProvider {
        name: &'static str,
        available: bool,
        reply: Reply,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(name: &'static str, available: bool, reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                name,
                available,
                reply,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SpeechProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn transcribe(&self, _audio: &AudioData) -> Result<String, VoiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Reply::Text(text) => Ok(text.to_string()),
                Reply::Fail => Err(VoiceError::TranscriptionError("boom".into())),
            }
        }
    }

    fn dyns(providers: &[&Arc<StubProvider>]) -> Vec<Arc<dyn SpeechProvider>> {
        providers
            .iter()
            .map(|p| Arc::clone(*p) as Arc<dyn SpeechProvider>)
            .collect()
    }

    fn canonical() -> AudioData {
        AudioData::wav(vec![0u8; 48], PcmSpec::SPEECH_TO_TEXT)
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let first = StubProvider::new("first", true, Reply::Text(" hello there "));
        let second = StubProvider::new("second", true, Reply::Text("ignored"));
        let router = SpeechRouter::new(dyns(&[&first, &second]));

        assert_eq!(router.transcribe(&canonical()).await.unwrap(), "hello there");
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_is_never_called() {
        let off = StubProvider::new("off", false, Reply::Text("never"));
        let on = StubProvider::new("on", true, Reply::Text("heard"));
        let router = SpeechRouter::new(dyns(&[&off, &on]));

        assert_eq!(router.transcribe(&canonical()).await.unwrap(), "heard");
        assert_eq!(off.calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_and_blank_fall_through() {
        let failing = StubProvider::new("failing", true, Reply::Fail);
        let blank = StubProvider::new("blank", true, Reply::Text("   "));
        let last = StubProvider::new("last", true, Reply::Text("third time"));
        let router = SpeechRouter::new(dyns(&[&failing, &blank])).with_provider(last.clone());

        assert_eq!(router.transcribe(&canonical()).await.unwrap(), "third time");
        assert_eq!(failing.calls(), 1);
        assert_eq!(blank.calls(), 1);
        assert_eq!(last.calls(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_is_no_provider_available() {
        let off = StubProvider::new("off", false, Reply::Text("x"));
        let failing = StubProvider::new("failing", true, Reply::Fail);
        let router = SpeechRouter::new(dyns(&[&off, &failing]));
        assert!(matches!(
            router.transcribe(&canonical()).await,
            Err(VoiceError::NoProviderAvailable)
        ));

        assert!(matches!(
            SpeechRouter::default().transcribe(&canonical()).await,
            Err(VoiceError::NoProviderAvailable)
        ));
    }

    #[tokio::test]
    async fn test_non_canonical_input_rejected() {
        let provider = StubProvider::new("on", true, Reply::Text("x"));
        let router = SpeechRouter::new(dyns(&[&provider]));
        let raw = AudioData::pcm(vec![0u8; 48], PcmSpec::DISCORD);

        assert!(matches!(
            router.transcribe(&raw).await,
            Err(VoiceError::UnsupportedFormat(_))
        ));
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn test_has_available_provider() {
        let off = StubProvider::new("off", false, Reply::Fail);
        let router = SpeechRouter::new(dyns(&[&off]));
        assert!(!router.has_available_provider());
        let router = router.with_provider(StubProvider::new("on", true, Reply::Fail));
        assert!(router.has_available_provider());
        assert_eq!(router.provider_names(), vec!["off", "on"]);
    }
}
