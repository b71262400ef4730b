//! `voice_channel` tool surface
//!
//! Hosts expose the runtime to agents as one tool taking a tagged action.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::SessionError;
use crate::runtime::VoiceRuntime;
use crate::transport::CallId;

/// Tool name registered with the host
pub const TOOL_NAME: &str = "voice_channel";

/// Tool description shown to the agent
pub const TOOL_DESCRIPTION: &str = "Join, leave, speak, or check status for Discord voice channels";

/// One tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum VoiceChannelAction {
    /// Join a voice channel
    Join {
        /// Discord server ID
        #[serde(rename = "guildId")]
        guild_id: String,
        /// Voice channel ID
        #[serde(rename = "channelId")]
        channel_id: String,
    },
    /// Leave the server's voice channel
    Leave {
        /// Discord server ID
        #[serde(rename = "guildId")]
        guild_id: String,
    },
    /// Speak text into the server's voice channel
    Speak {
        /// Discord server ID
        #[serde(rename = "guildId")]
        guild_id: String,
        /// Text to speak
        text: String,
    },
    /// List connected servers
    Status,
}

impl VoiceChannelAction {
    /// Parse tool arguments
    pub fn from_value(params: Value) -> murmur_core::Result<Self> {
        serde_json::from_value(params).map_err(|e| {
            murmur_core::MurmurError::validation(format!("Invalid voice_channel arguments: {}", e))
        })
    }

    /// Run the action against `runtime`
    pub async fn execute(&self, runtime: &VoiceRuntime) -> Result<Value, SessionError> {
        match self {
            Self::Join {
                guild_id,
                channel_id,
            } => {
                runtime.join(&CallId::from(guild_id.as_str()), channel_id).await?;
                Ok(json!({ "ok": true }))
            }
            Self::Leave { guild_id } => {
                runtime.leave(&CallId::from(guild_id.as_str())).await?;
                Ok(json!({ "ok": true }))
            }
            Self::Speak { guild_id, text } => {
                runtime.speak(&CallId::from(guild_id.as_str()), text).await?;
                Ok(json!({ "ok": true }))
            }
            Self::Status if !runtime.is_enabled() => Err(SessionError::Disabled),
            Self::Status => Ok(json!({ "connectedGuilds": runtime.status() })),
        }
    }
}

/// JSON schema of the tool arguments
pub fn parameters_schema() -> Value {
    let guild_id = json!({ "type": "string", "description": "Discord server ID" });
    json!({
        "oneOf": [
            {
                "type": "object",
                "properties": {
                    "action": { "const": "join" },
                    "guildId": guild_id,
                    "channelId": { "type": "string", "description": "Voice channel ID" }
                },
                "required": ["action", "guildId", "channelId"]
            },
            {
                "type": "object",
                "properties": {
                    "action": { "const": "leave" },
                    "guildId": guild_id
                },
                "required": ["action", "guildId"]
            },
            {
                "type": "object",
                "properties": {
                    "action": { "const": "speak" },
                    "guildId": guild_id,
                    "text": { "type": "string", "description": "Text to speak" }
                },
                "required": ["action", "guildId", "text"]
            },
            {
                "type": "object",
                "properties": {
                    "action": { "const": "status" }
                },
                "required": ["action"]
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actions() {
        let join = VoiceChannelAction::from_value(json!({
            "action": "join",
            "guildId": "g1",
            "channelId": "c1"
        }))
        .unwrap();
        assert_eq!(
            join,
            VoiceChannelAction::Join {
                guild_id: "g1".into(),
                channel_id: "c1".into()
            }
        );

        assert_eq!(
            VoiceChannelAction::from_value(json!({ "action": "status" })).unwrap(),
            VoiceChannelAction::Status
        );
    }

    #[test]
    fn test_reject_unknown_or_incomplete() {
        assert!(VoiceChannelAction::from_value(json!({ "action": "dance" })).is_err());
        assert!(VoiceChannelAction::from_value(json!({ "action": "speak", "guildId": "g1" })).is_err());
    }

    #[test]
    fn test_schema_lists_every_action() {
        let schema = parameters_schema();
        let actions: Vec<&str> = schema["oneOf"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["properties"]["action"]["const"].as_str().unwrap())
            .collect();
        assert_eq!(actions, vec!["join", "leave", "speak", "status"]);
    }
}
