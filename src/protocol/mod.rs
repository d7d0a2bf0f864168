//! Wire vocabulary shared by the broker and the client session.
//!
//! Every WebSocket text frame carries exactly one JSON object with a `type`
//! tag. Unknown tags are ignored by both ends; unknown fields within a known
//! tag are ignored by serde's default behavior.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Agent id → that agent's reservation. Agents without an active reservation
/// are absent from the map.
pub type ReservationMap = BTreeMap<String, Reservation>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
    Done,
}

/// Externally visible identity of a connected agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub cwd: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub channels: BTreeSet<String>,
    pub interactive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub last_activity_at: String,
}

/// An agent's advisory claim on a set of normalized paths.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reservation {
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Channel summary returned by `list_channels`, member ids resolved to names
/// at listing time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    pub name: String,
    pub members: Vec<String>,
    pub created_by: String,
}

// ─── Agent → Broker ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentRecord {
    Register {
        id: String,
        name: String,
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        cwd: String,
        interactive: bool,
    },
    Dm {
        to: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    DmResponse {
        to: String,
        correlation_id: String,
        content: String,
    },
    Broadcast {
        content: String,
    },
    ChannelCreate {
        channel: String,
    },
    ChannelJoin {
        channel: String,
    },
    ChannelLeave {
        channel: String,
    },
    ChannelSend {
        channel: String,
        content: String,
    },
    ListAgents,
    ListChannels,
    Reserve {
        paths: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Release {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        paths: Option<Vec<String>>,
    },
    Rename {
        name: String,
    },
    PresenceUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_message: Option<String>,
        last_activity_at: String,
    },
    StatusUpdate {
        status: AgentStatus,
    },
    Heartbeat,
}

impl AgentRecord {
    /// Every tag the broker understands, in wire form.
    pub const TAGS: &'static [&'static str] = &[
        "register",
        "dm",
        "dm_response",
        "broadcast",
        "channel_create",
        "channel_join",
        "channel_leave",
        "channel_send",
        "list_agents",
        "list_channels",
        "reserve",
        "release",
        "rename",
        "presence_update",
        "status_update",
        "heartbeat",
    ];
}

// ─── Broker → Agent ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BrokerRecord {
    Registered {
        id: String,
        agents: Vec<AgentInfo>,
        reservations: ReservationMap,
    },
    AgentJoined {
        agent: AgentInfo,
    },
    AgentLeft {
        id: String,
        name: String,
    },
    AgentRenamed {
        id: String,
        old_name: String,
        new_name: String,
    },
    Dm {
        from: String,
        from_name: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    DmResponse {
        from: String,
        from_name: String,
        correlation_id: String,
        content: String,
    },
    Broadcast {
        from: String,
        from_name: String,
        content: String,
    },
    ChannelCreated {
        channel: String,
        by: String,
    },
    ChannelJoined {
        channel: String,
        agent_id: String,
        agent_name: String,
    },
    ChannelLeft {
        channel: String,
        agent_id: String,
        agent_name: String,
    },
    ChannelMessage {
        channel: String,
        from: String,
        from_name: String,
        content: String,
    },
    ChannelSent {
        channel: String,
    },
    AgentList {
        agents: Vec<AgentInfo>,
    },
    ChannelList {
        channels: Vec<ChannelSummary>,
    },
    ReservationsUpdated {
        reservations: ReservationMap,
    },
    StatusChanged {
        id: String,
        name: String,
        status: AgentStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_activity_at: Option<String>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    HeartbeatAck,
}

impl BrokerRecord {
    pub const TAGS: &'static [&'static str] = &[
        "registered",
        "agent_joined",
        "agent_left",
        "agent_renamed",
        "dm",
        "dm_response",
        "broadcast",
        "channel_created",
        "channel_joined",
        "channel_left",
        "channel_message",
        "channel_sent",
        "agent_list",
        "channel_list",
        "reservations_updated",
        "status_changed",
        "error",
        "heartbeat_ack",
    ];

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            correlation_id: None,
        }
    }

    pub fn error_with_correlation(
        message: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self::Error {
            message: message.into(),
            correlation_id,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","message":"serialization failed"}"#.to_string())
    }
}

impl AgentRecord {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"heartbeat"}"#.to_string())
    }
}

// ─── Frame decoding ─────────────────────────────────────────────────────────

/// Outcome of decoding one inbound text frame.
#[derive(Debug)]
pub enum Decoded<T> {
    Record(T),
    /// Valid JSON carrying a tag this end does not know. Ignored.
    UnknownTag(String),
    /// Known tag whose fields failed to decode.
    Malformed { tag: String, message: String },
    /// Not a JSON object at all.
    InvalidJson(String),
}

/// Decode one frame, distinguishing undecodable payloads (rejected with
/// "Invalid JSON"), unknown tags (ignored) and malformed known records.
pub fn decode_frame<T: DeserializeOwned>(text: &str, known_tags: &[&str]) -> Decoded<T> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => return Decoded::InvalidJson(err.to_string()),
    };

    let Some(tag) = value.get("type").and_then(|t| t.as_str()).map(str::to_owned) else {
        return Decoded::InvalidJson("missing type tag".to_string());
    };

    if !known_tags.contains(&tag.as_str()) {
        return Decoded::UnknownTag(tag);
    }

    match serde_json::from_value(value) {
        Ok(record) => Decoded::Record(record),
        Err(err) => Decoded::Malformed {
            tag,
            message: err.to_string(),
        },
    }
}
