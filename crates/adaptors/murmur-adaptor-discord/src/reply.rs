//! Reply generation for voice turns
//!
//! [`ReplyGenerator`] builds the request (session key, system prompt with the
//! rendered history, model choice, timeout) and hands it to a [`ReplyBackend`].
//! Every failure comes back as a [`ReplyFailure`] value; nothing propagates
//! past [`ReplyGenerator::generate`].

use async_trait::async_trait;
use murmur_core::{string_to_uuid, MurmurError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::VoiceConfig;
use crate::history::History;
use crate::transport::{CallId, SpeakerId};

/// Provider used when the model override has no `provider/` prefix
pub const DEFAULT_PROVIDER: &str = "anthropic";

/// Model used when no override is configured
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

/// Backend timeout when neither the backend nor the config names one
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_AGENT_NAME: &str = "assistant";

/// Who said what, where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyContext {
    /// Call (guild)
    pub call_id: CallId,
    /// Voice channel of the call
    pub channel_id: String,
    /// Speaker being answered
    pub speaker_id: SpeakerId,
}

impl ReplyContext {
    /// Session key stable per call, channel and speaker
    pub fn session_key(&self) -> String {
        format!(
            "voice:discord:{}:{}:{}",
            self.call_id, self.channel_id, self.speaker_id
        )
    }
}

/// Request handed to a [`ReplyBackend`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    /// Stable per-call, per-speaker session key
    pub session_key: String,
    /// Unique id for this generation
    pub run_id: String,
    /// What the speaker said
    pub prompt: String,
    /// System instruction including the rendered history
    pub system_prompt: String,
    /// Model provider
    pub provider: String,
    /// Model name
    pub model: String,
    /// Bound on the whole generation
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// One piece of backend output
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplyPayload {
    /// Text content
    pub text: String,
    /// Whether this payload reports an error rather than a reply
    pub is_error: bool,
}

impl ReplyPayload {
    /// Reply text
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    /// Error report
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// What a backend produced
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackendReply {
    /// Output payloads in order
    pub payloads: Vec<ReplyPayload>,
    /// The run was aborted before completing
    pub aborted: bool,
}

impl BackendReply {
    /// Non-error payload text, trimmed and joined with single spaces
    pub fn reply_text(&self) -> String {
        self.payloads
            .iter()
            .filter(|p| !p.is_error)
            .map(|p| p.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Why no reply was produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyFailure {
    /// No backend is wired in
    BackendUnavailable,
    /// Generation exceeded its bound
    Timeout,
    /// The backend aborted the run
    Aborted,
    /// The backend answered with nothing speakable
    EmptyResponse,
    /// The backend failed
    Backend(String),
}

impl std::fmt::Display for ReplyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BackendUnavailable => f.write_str("reply backend unavailable"),
            Self::Timeout => f.write_str("reply generation timed out"),
            Self::Aborted => f.write_str("Response generation was aborted"),
            Self::EmptyResponse => f.write_str("reply backend returned no text"),
            Self::Backend(msg) => write!(f, "reply backend failed: {}", msg),
        }
    }
}

/// Reply text, or why there is none
pub type ReplyOutcome = std::result::Result<String, ReplyFailure>;

/// Agent backend that turns a request into payloads
#[async_trait]
pub trait ReplyBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Timeout used when the config sets none
    fn default_timeout(&self) -> Duration {
        DEFAULT_REPLY_TIMEOUT
    }

    /// Run one generation
    async fn generate(&self, request: &ReplyRequest) -> Result<BackendReply>;
}

/// Builds reply requests and normalizes backend results
#[derive(Clone)]
pub struct ReplyGenerator {
    backend: Option<Arc<dyn ReplyBackend>>,
    provider: String,
    model: String,
    system_prompt: Option<String>,
    timeout_override: Option<Duration>,
    agent_name: String,
}

impl std::fmt::Debug for ReplyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyGenerator")
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("provider", &self.provider)
            .field("model", &self.model)
            .finish()
    }
}

impl ReplyGenerator {
    /// Create a generator from config. `backend` is `None` when the host
    /// has no agent to talk to.
    pub fn new(backend: Option<Arc<dyn ReplyBackend>>, config: &VoiceConfig) -> Self {
        let (provider, model) = parse_model_ref(config.response_model.as_deref());
        Self {
            backend,
            provider,
            model,
            system_prompt: config
                .response_system_prompt
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            timeout_override: config.response_timeout(),
            agent_name: config
                .agent_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(DEFAULT_AGENT_NAME)
                .to_string(),
        }
    }

    /// Whether a backend is wired in
    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Build the request for one turn
    pub fn build_request(
        &self,
        context: &ReplyContext,
        history: &History,
        text: &str,
        timeout: Duration,
    ) -> ReplyRequest {
        let base_prompt = self.system_prompt.clone().unwrap_or_else(|| {
            format!(
                "You are {}, a helpful voice assistant in a Discord voice channel. \
                 Keep responses concise and conversational (1-2 sentences max). \
                 Be natural and friendly. You have access to tools - use them when helpful.",
                self.agent_name
            )
        });

        let system_prompt = if history.is_empty() {
            base_prompt
        } else {
            format!("{}\n\nConversation so far:\n{}", base_prompt, history.render())
        };

        ReplyRequest {
            session_key: context.session_key(),
            run_id: format!(
                "voice:discord:{}:{}",
                context.channel_id,
                chrono::Utc::now().timestamp_millis()
            ),
            prompt: text.to_string(),
            system_prompt,
            provider: self.provider.clone(),
            model: self.model.clone(),
            timeout,
        }
    }

    /// Generate a reply to `text`. `history` already holds the user turn.
    pub async fn generate(
        &self,
        context: &ReplyContext,
        history: &History,
        text: &str,
    ) -> ReplyOutcome {
        let Some(backend) = &self.backend else {
            return Err(ReplyFailure::BackendUnavailable);
        };

        let timeout = self
            .timeout_override
            .unwrap_or_else(|| backend.default_timeout());
        let request = self.build_request(context, history, text, timeout);

        debug!(
            backend = backend.name(),
            session_key = %request.session_key,
            model = %request.model,
            timeout_ms = timeout.as_millis() as u64,
            "Generating voice reply"
        );

        let reply = match tokio::time::timeout(timeout, backend.generate(&request)).await {
            Err(_) => return Err(ReplyFailure::Timeout),
            Ok(Err(e)) if e.is_timeout() => return Err(ReplyFailure::Timeout),
            Ok(Err(e)) => {
                warn!(backend = backend.name(), error = %e, "Reply backend failed");
                return Err(ReplyFailure::Backend(e.to_string()));
            }
            Ok(Ok(reply)) => reply,
        };

        let text = reply.reply_text();
        if !text.is_empty() {
            return Ok(text);
        }
        if reply.aborted {
            return Err(ReplyFailure::Aborted);
        }
        if let Some(error) = reply.payloads.iter().find(|p| p.is_error) {
            return Err(ReplyFailure::Backend(error.text.trim().to_string()));
        }
        Err(ReplyFailure::EmptyResponse)
    }
}

/// Split `provider/model`; a bare name keeps the default provider
pub fn parse_model_ref(model_ref: Option<&str>) -> (String, String) {
    let model_ref = model_ref.map(str::trim).filter(|m| !m.is_empty());
    match model_ref {
        None => (DEFAULT_PROVIDER.to_string(), DEFAULT_MODEL.to_string()),
        Some(m) => match m.split_once('/') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                (provider.to_string(), model.to_string())
            }
            _ => (DEFAULT_PROVIDER.to_string(), m.to_string()),
        },
    }
}

/// Pull the reply out of `<text>…</text>` when the agent answers in its XML
/// envelope; otherwise the trimmed content.
pub fn extract_final_text_from_xml(content: &str) -> String {
    if let Some(start) = content.find("<text>") {
        let after_tag = &content[start + "<text>".len()..];
        if let Some(end) = after_tag.find("</text>") {
            return after_tag[..end].trim().to_string();
        }
        return after_tag.trim().to_string();
    }
    content.trim().to_string()
}

/// Incremental parser for the agent API's `data: {json}` event stream
///
/// Bytes are buffered until a newline so a character split across chunks
/// is decoded whole.
#[derive(Debug, Default)]
struct SseReply {
    buffer: Vec<u8>,
    assembled: String,
    errors: Vec<String>,
    aborted: bool,
    finished: bool,
}

impl SseReply {
    /// Feed a chunk; returns true once a `final` event was seen
    fn push(&mut self, chunk: &[u8]) -> bool {
        self.buffer.extend_from_slice(chunk);
        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return self.finished;
        };
        let complete: Vec<u8> = self.buffer.drain(..=last_newline).collect();
        for line in String::from_utf8_lossy(&complete).lines() {
            self.line(line);
        }
        self.finished
    }

    fn line(&mut self, line: &str) {
        let Some(payload) = line.trim().strip_prefix("data:") else {
            return;
        };
        let payload = payload.trim();
        if payload.is_empty() || self.finished {
            return;
        }
        let Ok(event) = serde_json::from_str::<StreamEvent>(payload) else {
            return;
        };

        if let Some(error) = event.error {
            self.errors.push(error);
            return;
        }
        if let Some(text) = event.text {
            self.assembled.push_str(&text);
        }
        self.aborted |= event.aborted;
        self.finished |= event.is_final;
    }

    fn finish(mut self) -> BackendReply {
        let rest = std::mem::take(&mut self.buffer);
        self.line(&String::from_utf8_lossy(&rest));

        let mut payloads: Vec<ReplyPayload> = self.errors.into_iter().map(ReplyPayload::error).collect();
        let text = extract_final_text_from_xml(&self.assembled);
        if !text.is_empty() {
            payloads.push(ReplyPayload::text(text));
        }
        BackendReply {
            payloads,
            aborted: self.aborted,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "final")]
    is_final: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    aborted: bool,
}

/// Backend that streams replies from the agent HTTP API (`POST {base}/chat/stream`)
#[derive(Debug, Clone)]
pub struct AgentApiBackend {
    client: reqwest::Client,
    api_base: String,
}

impl AgentApiBackend {
    /// Create a backend for the agent API at `api_base`
    pub fn new(api_base: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// API base URL
    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

#[async_trait]
impl ReplyBackend for AgentApiBackend {
    fn name(&self) -> &str {
        "agent-api"
    }

    async fn generate(&self, request: &ReplyRequest) -> Result<BackendReply> {
        let body = serde_json::json!({
            "text": request.prompt,
            "roomId": string_to_uuid(&request.session_key),
            "entityId": string_to_uuid(&format!("{}:speaker", request.session_key)),
            "runId": request.run_id,
            "systemPrompt": request.system_prompt,
            "modelProvider": request.provider,
            "model": request.model,
            "stream": true,
        });

        let mut resp = self
            .client
            .post(format!("{}/chat/stream", self.api_base))
            .header("accept", "text/event-stream")
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(MurmurError::provider(format!(
                "Agent API returned {}: {}",
                status,
                text.trim()
            )));
        }

        let mut sse = SseReply::default();
        while let Some(chunk) = resp.chunk().await.map_err(map_request_error)? {
            if sse.push(&chunk) {
                break;
            }
        }
        Ok(sse.finish())
    }
}

fn map_request_error(e: reqwest::Error) -> MurmurError {
    if e.is_timeout() {
        MurmurError::timeout(e.to_string())
    } else {
        MurmurError::Network(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::TranscriptTurn;
    use parking_lot::Mutex;

    struct ScriptedBackend {
        reply: Result<BackendReply>,
        delay: Duration,
        seen: Mutex<Vec<ReplyRequest>>,
    }

    impl ScriptedBackend {
        fn new(reply: Result<BackendReply>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReplyBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, request: &ReplyRequest) -> Result<BackendReply> {
            self.seen.lock().push(request.clone());
            tokio::time::sleep(self.delay).await;
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(e) => Err(MurmurError::provider(e.to_string())),
            }
        }
    }

    fn context() -> ReplyContext {
        ReplyContext {
            call_id: "g1".into(),
            channel_id: "c1".into(),
            speaker_id: "u1".into(),
        }
    }

    fn history_with(text: &str) -> History {
        let mut history = History::new(20);
        history.push(TranscriptTurn::user(text));
        history
    }

    fn generator(backend: Arc<ScriptedBackend>, config: &VoiceConfig) -> ReplyGenerator {
        ReplyGenerator::new(Some(backend as Arc<dyn ReplyBackend>), config)
    }

    #[test]
    fn test_session_key() {
        assert_eq!(context().session_key(), "voice:discord:g1:c1:u1");
    }

    #[test]
    fn test_parse_model_ref() {
        assert_eq!(
            parse_model_ref(Some("openai/gpt-4o-mini")),
            ("openai".to_string(), "gpt-4o-mini".to_string())
        );
        assert_eq!(
            parse_model_ref(Some("gpt-4o-mini")),
            (DEFAULT_PROVIDER.to_string(), "gpt-4o-mini".to_string())
        );
        assert_eq!(
            parse_model_ref(Some("  ")),
            (DEFAULT_PROVIDER.to_string(), DEFAULT_MODEL.to_string())
        );
        assert_eq!(
            parse_model_ref(None),
            (DEFAULT_PROVIDER.to_string(), DEFAULT_MODEL.to_string())
        );
    }

    #[test]
    fn test_extract_final_text_from_xml() {
        assert_eq!(extract_final_text_from_xml("<response><text> Hi! </text></response>"), "Hi!");
        assert_eq!(extract_final_text_from_xml("<text>unterminated "), "unterminated");
        assert_eq!(extract_final_text_from_xml("  plain  "), "plain");
    }

    #[test]
    fn test_default_prompt_and_history_block() {
        let config = VoiceConfig {
            agent_name: Some("Murmur".into()),
            ..Default::default()
        };
        let generator = ReplyGenerator::new(None, &config);
        let mut history = history_with("what's up");
        history.push(TranscriptTurn::assistant("not much"));

        let request = generator.build_request(&context(), &history, "cool", Duration::from_secs(5));

        assert!(request.system_prompt.starts_with("You are Murmur, a helpful voice assistant"));
        assert!(request
            .system_prompt
            .ends_with("\n\nConversation so far:\nUser: what's up\nYou: not much"));
        assert_eq!(request.prompt, "cool");
        assert!(request.run_id.starts_with("voice:discord:c1:"));
    }

    #[test]
    fn test_prompt_override_and_default_agent_name() {
        let generator = ReplyGenerator::new(None, &VoiceConfig::default());
        let request = generator.build_request(&context(), &History::new(5), "hi", DEFAULT_REPLY_TIMEOUT);
        assert!(request.system_prompt.starts_with("You are assistant,"));

        let config = VoiceConfig {
            response_system_prompt: Some("Talk like a pirate.".into()),
            ..Default::default()
        };
        let generator = ReplyGenerator::new(None, &config);
        let request = generator.build_request(&context(), &History::new(5), "hi", DEFAULT_REPLY_TIMEOUT);
        assert_eq!(request.system_prompt, "Talk like a pirate.");
    }

    #[tokio::test]
    async fn test_no_backend() {
        let generator = ReplyGenerator::new(None, &VoiceConfig::default());
        assert!(!generator.has_backend());
        assert_eq!(
            generator.generate(&context(), &history_with("hi"), "hi").await,
            Err(ReplyFailure::BackendUnavailable)
        );
    }

    #[tokio::test]
    async fn test_payloads_joined_and_errors_skipped() {
        let backend = ScriptedBackend::new(Ok(BackendReply {
            payloads: vec![
                ReplyPayload::text(" Sure. "),
                ReplyPayload::error("tool failed"),
                ReplyPayload::text("Done!"),
            ],
            aborted: false,
        }));
        let generator = generator(backend.clone(), &VoiceConfig::default());

        let reply = generator.generate(&context(), &history_with("do it"), "do it").await;
        assert_eq!(reply, Ok("Sure. Done!".to_string()));

        let seen = backend.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].session_key, "voice:discord:g1:c1:u1");
        assert_eq!(seen[0].timeout, DEFAULT_REPLY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_empty_aborted_and_error_outcomes() {
        let empty = ScriptedBackend::new(Ok(BackendReply::default()));
        assert_eq!(
            generator(empty, &VoiceConfig::default())
                .generate(&context(), &history_with("x"), "x")
                .await,
            Err(ReplyFailure::EmptyResponse)
        );

        let aborted = ScriptedBackend::new(Ok(BackendReply {
            payloads: vec![],
            aborted: true,
        }));
        let outcome = generator(aborted, &VoiceConfig::default())
            .generate(&context(), &history_with("x"), "x")
            .await;
        assert_eq!(outcome, Err(ReplyFailure::Aborted));
        assert_eq!(
            ReplyFailure::Aborted.to_string(),
            "Response generation was aborted"
        );

        let only_error = ScriptedBackend::new(Ok(BackendReply {
            payloads: vec![ReplyPayload::error("rate limited")],
            aborted: false,
        }));
        assert_eq!(
            generator(only_error, &VoiceConfig::default())
                .generate(&context(), &history_with("x"), "x")
                .await,
            Err(ReplyFailure::Backend("rate limited".into()))
        );

        let failing = ScriptedBackend::new(Err(MurmurError::provider("down")));
        assert!(matches!(
            generator(failing, &VoiceConfig::default())
                .generate(&context(), &history_with("x"), "x")
                .await,
            Err(ReplyFailure::Backend(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_override() {
        let backend = Arc::new(ScriptedBackend {
            reply: Ok(BackendReply {
                payloads: vec![ReplyPayload::text("late")],
                aborted: false,
            }),
            delay: Duration::from_secs(10),
            seen: Mutex::new(Vec::new()),
        });
        let config = VoiceConfig {
            response_timeout_ms: Some(2_000),
            ..Default::default()
        };

        let outcome = generator(backend.clone(), &config)
            .generate(&context(), &history_with("x"), "x")
            .await;
        assert_eq!(outcome, Err(ReplyFailure::Timeout));
        assert_eq!(backend.seen.lock()[0].timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_sse_reply_across_chunks() {
        let mut sse = SseReply::default();
        assert!(!sse.push(b"data: {\"text\":\"<text>Hel"));
        assert!(!sse.push(b"lo\"}\n\ndata: {\"text\":\" there</text>\"}\n"));
        assert!(sse.push(b"data: {\"final\":true}\n\n"));

        let reply = sse.finish();
        assert_eq!(reply.reply_text(), "Hello there");
        assert!(!reply.aborted);
    }

    #[test]
    fn test_sse_reply_multibyte_split_across_chunks() {
        let event = "data: {\"text\":\"café olé\"}\n".as_bytes();
        let split = event.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut sse = SseReply::default();
        sse.push(&event[..split]);
        sse.push(&event[split..]);

        assert_eq!(sse.finish().reply_text(), "café olé");
    }

    #[test]
    fn test_sse_reply_errors_and_unterminated_tail() {
        let mut sse = SseReply::default();
        sse.push(b"event: ping\ndata: {\"error\":\"tool exploded\"}\n");
        sse.push(b"data: not-json\n");
        sse.push(b"data: {\"text\":\"partial\",\"aborted\":true}");

        let reply = sse.finish();
        assert_eq!(
            reply.payloads,
            vec![ReplyPayload::error("tool exploded"), ReplyPayload::text("partial")]
        );
        assert!(reply.aborted);
    }

    #[tokio::test]
    async fn test_agent_api_unreachable_is_error() {
        let backend = AgentApiBackend::new("http://127.0.0.1:9/agent/");
        assert_eq!(backend.api_base(), "http://127.0.0.1:9/agent");

        let generator = ReplyGenerator::new(
            Some(Arc::new(backend) as Arc<dyn ReplyBackend>),
            &VoiceConfig::default(),
        );
        let outcome = generator.generate(&context(), &history_with("x"), "x").await;
        assert!(matches!(
            outcome,
            Err(ReplyFailure::Backend(_)) | Err(ReplyFailure::Timeout)
        ));
    }
}
