//! End-to-end runtime behaviour over the in-memory transport

use murmur_adaptor_discord::testing::{
    loud_frame, loud_frame_of, quiet_frame, wait_for, EventLog, FakeGateway, FakeReplyBackend,
    FakeSpeechProvider, FakeSynthesizer, FakeTranscoder,
};
use murmur_adaptor_discord::{
    CallId, ReplyBackend, ReplyGenerator, Role, SessionError, VoiceChannelAction, VoiceConfig,
    VoiceGateway, VoiceRuntime, VoiceServices,
};
use murmur_provider_voice::{AudioFormat, PcmSpec, SpeechProvider, SpeechRouter};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    runtime: Arc<VoiceRuntime>,
    gateway: Arc<FakeGateway>,
    stt: Arc<FakeSpeechProvider>,
    backend: Arc<FakeReplyBackend>,
    synthesizer: Arc<FakeSynthesizer>,
    log: EventLog,
}

fn harness(config: VoiceConfig) -> Harness {
    let log = EventLog::new();
    let gateway = FakeGateway::with_log(log.clone());
    gateway.add_voice_channel("c1");
    gateway.add_voice_channel("c2");

    let stt = FakeSpeechProvider::with_log(log.clone());
    let backend = FakeReplyBackend::with_log(log.clone());
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let services = VoiceServices {
        transcoder: Arc::new(FakeTranscoder::default()),
        synthesizer: synthesizer.clone(),
        router: SpeechRouter::new(vec![stt.clone() as Arc<dyn SpeechProvider>]),
        replies: ReplyGenerator::new(Some(backend.clone() as Arc<dyn ReplyBackend>), &config),
        names: None,
    };
    let runtime = VoiceRuntime::new(
        config,
        Some(gateway.clone() as Arc<dyn VoiceGateway>),
        services,
    )
    .unwrap();

    Harness {
        runtime: Arc::new(runtime),
        gateway,
        stt,
        backend,
        synthesizer,
        log,
    }
}

#[tokio::test]
async fn test_join_speak_status_leave() {
    let h = harness(VoiceConfig::default());
    let g1 = CallId::from("g1");

    h.runtime.join(&g1, "c1").await.unwrap();
    h.runtime.speak(&g1, "hello").await.unwrap();

    let connection = h.gateway.connection("g1").unwrap();
    let played = connection.played();
    assert_eq!(played.len(), 1);
    assert_eq!(&played[0].data[..], b"hello");
    assert!(played[0].matches(AudioFormat::Pcm, PcmSpec::DISCORD));
    assert_eq!(h.synthesizer.spoken(), vec!["hello"]);

    assert_eq!(h.runtime.status(), vec![g1.clone()]);

    h.runtime.leave(&g1).await.unwrap();
    assert!(h.runtime.status().is_empty());
    assert!(connection.is_destroyed());
}

#[tokio::test]
async fn test_double_leave_is_a_noop() {
    let h = harness(VoiceConfig::default());
    let g1 = CallId::from("g1");

    h.runtime.join(&g1, "c1").await.unwrap();
    h.runtime.leave(&g1).await.unwrap();
    h.runtime.leave(&g1).await.unwrap();

    assert!(h.runtime.status().is_empty());
    assert_eq!(h.gateway.connections_for("g1").len(), 1);
    assert!(matches!(
        h.runtime.speak(&g1, "anyone?").await,
        Err(SessionError::NotConnected(_))
    ));
}

#[tokio::test]
async fn test_calls_are_independent() {
    let h = harness(VoiceConfig::default());
    let (g1, g2) = (CallId::from("g1"), CallId::from("g2"));

    h.runtime.join(&g1, "c1").await.unwrap();
    h.runtime.join(&g2, "c2").await.unwrap();
    h.runtime.leave(&g1).await.unwrap();

    assert_eq!(h.runtime.status(), vec![g2.clone()]);
    h.runtime.speak(&g2, "still here").await.unwrap();
    assert_eq!(h.gateway.connection("g2").unwrap().played().len(), 1);
}

#[tokio::test]
async fn test_captured_speech_is_answered() {
    let h = harness(VoiceConfig::default());
    h.stt.set_fallback("what's the weather");
    let g1 = CallId::from("g1");
    h.runtime.join(&g1, "c1").await.unwrap();

    let connection = h.gateway.connection("g1").unwrap();
    connection.speak_utterance("u1", vec![quiet_frame(), loud_frame(), quiet_frame()]);

    assert!(wait_for(|| connection.played().len() == 1).await);
    assert_eq!(
        &connection.played()[0].data[..],
        b"You said: what's the weather"
    );

    let request = &h.backend.requests()[0];
    assert_eq!(request.session_key, "voice:discord:g1:c1:u1");
    assert_eq!(request.prompt, "what's the weather");

    let history = h.runtime.session(&g1).unwrap().history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Assistant);
}

#[tokio::test]
async fn test_silence_never_reaches_stt() {
    let h = harness(VoiceConfig::default());
    h.stt.set_fallback("ghost");
    h.runtime.join(&"g1".into(), "c1").await.unwrap();

    let connection = h.gateway.connection("g1").unwrap();
    connection.speak_utterance("u1", vec![quiet_frame(), quiet_frame()]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.stt.calls(), 0);
    assert!(connection.played().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_turns_run_in_arrival_order() {
    let h = harness(VoiceConfig::default());
    let first = loud_frame_of(8_000);
    let second = loud_frame_of(12_000);
    h.stt.script(first.clone(), "first", Duration::from_secs(2));
    h.stt.script(second.clone(), "second", Duration::ZERO);

    h.runtime.join(&"g1".into(), "c1").await.unwrap();
    let connection = h.gateway.connection("g1").unwrap();

    connection.speak_utterance("u1", vec![first]);
    assert!(wait_for(|| h.stt.calls() == 1).await);
    connection.speak_utterance("u2", vec![second]);

    assert!(wait_for(|| connection.played().len() == 2).await);

    let first_played = h.log.position("play:You said: first").unwrap();
    let second_started = h.log.position("stt:start:second").unwrap();
    assert!(
        first_played < second_started,
        "second turn started before the first finished: {:?}",
        h.log.entries()
    );
    assert_eq!(connection.max_concurrent_plays(), 1);
}

#[tokio::test]
async fn test_leave_drops_running_turn_results() {
    let h = harness(VoiceConfig::default());
    h.stt.set_fallback("tell me a story");
    h.backend.set_delay(Duration::from_millis(200));
    let g1 = CallId::from("g1");
    h.runtime.join(&g1, "c1").await.unwrap();

    let connection = h.gateway.connection("g1").unwrap();
    connection.speak_utterance("u1", vec![loud_frame()]);
    assert!(wait_for(|| h.backend.requests().len() == 1).await);

    h.runtime.leave(&g1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(connection.played().is_empty());
    assert!(h.runtime.status().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ready_timeout_is_fatal() {
    let h = harness(VoiceConfig::default());
    h.gateway.set_never_ready(true);

    let err = h.runtime.join(&"g1".into(), "c1").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::ReadyTimeout {
            timeout_ms: 30_000,
            ..
        }
    ));
    assert!(h.gateway.connection("g1").unwrap().is_destroyed());
    assert!(h.runtime.status().is_empty());
}

#[tokio::test]
async fn test_unknown_channel() {
    let h = harness(VoiceConfig::default());
    let err = h.runtime.join(&"g1".into(), "nope").await.unwrap_err();
    assert_eq!(err.to_string(), "Channel not found: nope");
}

#[tokio::test]
async fn test_tool_actions() {
    let h = harness(VoiceConfig::default());

    let join = VoiceChannelAction::from_value(json!({
        "action": "join", "guildId": "g1", "channelId": "c1"
    }))
    .unwrap();
    assert_eq!(join.execute(&h.runtime).await.unwrap(), json!({ "ok": true }));

    let speak = VoiceChannelAction::Speak {
        guild_id: "g1".into(),
        text: "hi".into(),
    };
    assert_eq!(speak.execute(&h.runtime).await.unwrap(), json!({ "ok": true }));

    assert_eq!(
        VoiceChannelAction::Status.execute(&h.runtime).await.unwrap(),
        json!({ "connectedGuilds": ["g1"] })
    );

    let leave = VoiceChannelAction::Leave {
        guild_id: "g1".into(),
    };
    leave.execute(&h.runtime).await.unwrap();
    assert_eq!(
        VoiceChannelAction::Status.execute(&h.runtime).await.unwrap(),
        json!({ "connectedGuilds": [] })
    );
}

#[tokio::test]
async fn test_tool_refuses_when_disabled() {
    let h = harness(VoiceConfig {
        enabled: false,
        ..Default::default()
    });

    let err = VoiceChannelAction::Status
        .execute(&h.runtime)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Disabled));
    assert_eq!(err.to_string(), "Discord voice is disabled");

    let join = VoiceChannelAction::Join {
        guild_id: "g1".into(),
        channel_id: "c1".into(),
    };
    assert!(matches!(
        join.execute(&h.runtime).await,
        Err(SessionError::Disabled)
    ));
    let speak = VoiceChannelAction::Speak {
        guild_id: "g1".into(),
        text: "hi".into(),
    };
    assert!(matches!(
        speak.execute(&h.runtime).await,
        Err(SessionError::Disabled)
    ));
    assert!(h.gateway.requests().is_empty());
}
