//! Discord voice agent
//!
//! Logs in with a bot token, optionally joins a voice channel once the
//! gateway is ready, and runs the listen/reply loop until Ctrl-C.
//!
//! ## Usage
//! ```bash
//! DISCORD_TOKEN=... voice-agent --guild-id 1234 --channel-id 5678
//!
//! # voice settings from a JSON file instead of the environment
//! voice-agent --config voice.json
//! ```

use anyhow::Context as _;
use clap::Parser;
use murmur_adaptor_discord::discord::{SerenityNames, SongbirdGateway};
use murmur_adaptor_discord::{
    AgentApiBackend, CallId, NameResolver, ReplyBackend, VoiceConfig, VoiceGateway, VoiceRuntime,
    VoiceServices,
};
use serenity::async_trait;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use songbird::driver::DecodeMode;
use songbird::serenity::SerenityInit;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

/// Discord voice agent
#[derive(Parser, Debug)]
#[command(name = "voice-agent")]
#[command(about = "Join Discord voice channels and talk back")]
struct Args {
    /// Bot token
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    token: String,

    /// Guild to join on start-up
    #[arg(long, env = "DISCORD_VOICE_GUILD_ID")]
    guild_id: Option<u64>,

    /// Voice channel to join on start-up
    #[arg(long, env = "DISCORD_VOICE_CHANNEL_ID", requires = "guild_id")]
    channel_id: Option<u64>,

    /// Voice settings JSON (plugin settings format); environment otherwise
    #[arg(long)]
    config: Option<PathBuf>,
}

struct Handler {
    runtime: Arc<OnceLock<Arc<VoiceRuntime>>>,
    auto_join: Option<(u64, u64)>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "Connected to Discord");

        let Some((guild_id, channel_id)) = self.auto_join else {
            return;
        };
        let Some(runtime) = self.runtime.get() else {
            warn!("Voice runtime not initialised yet, skipping auto-join");
            return;
        };
        if let Err(e) = runtime
            .join(&CallId::from(guild_id), &channel_id.to_string())
            .await
        {
            error!(guild_id, channel_id, error = %e, "Auto-join failed");
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<VoiceConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let settings: serde_json::Value =
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
            VoiceConfig::from_settings(&settings)?
        }
        None => VoiceConfig::from_env(),
    };
    let groq_key = std::env::var("GROQ_API_KEY").ok();
    Ok(config.with_fallback_groq_key(groq_key.as_deref()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = murmur_core::load_env();
    murmur_core::init_logging();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let songbird = songbird::Songbird::serenity_from_config(
        songbird::Config::default().decode_mode(DecodeMode::Decode),
    );
    let runtime_slot = Arc::new(OnceLock::new());
    let handler = Handler {
        runtime: runtime_slot.clone(),
        auto_join: args.guild_id.zip(args.channel_id),
    };

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let mut client = Client::builder(&args.token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird.clone())
        .await
        .context("creating Discord client")?;

    let gateway: Arc<dyn VoiceGateway> =
        Arc::new(SongbirdGateway::new(client.http.clone(), songbird));
    let names: Arc<dyn NameResolver> = Arc::new(SerenityNames::new(client.http.clone()));
    let backend: Arc<dyn ReplyBackend> = Arc::new(AgentApiBackend::new(config.agent_api_url.clone()));
    let services = VoiceServices::from_config(&config, Some(backend), Some(names));

    let runtime = Arc::new(VoiceRuntime::new(config, Some(gateway), services)?);
    let _ = runtime_slot.set(runtime.clone());

    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                error!(error = %e, "Discord client stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, leaving voice channels");
        }
    }

    runtime.shutdown().await;
    client.shard_manager.shutdown_all().await;
    Ok(())
}
