//! Wire DTOs for the support chat HTTP API.
//!
//! DESIGN
//! ======
//! These types mirror the server's JSON payloads field for field so serde
//! round-trips stay lossless. The server emits `null` for empty lists and
//! omits `assigned_agent_id` on unassigned rosters; both decode to defaults
//! here so session code never sees a half-populated value.

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

pub type ChannelId = u64;
pub type MessageId = u64;
pub type UserId = u64;

/// `assigned_agent_id` value meaning "nobody has claimed this channel".
pub const UNASSIGNED: UserId = 0;

/// Lifecycle status of a channel. Transitions are server-owned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Open,
    Assigned,
    Closed,
}

impl ChannelStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Assigned => "assigned",
            Self::Closed => "closed",
        }
    }

    /// Render a status filter for `?status=` query parameters.
    #[must_use]
    pub fn query(statuses: &[ChannelStatus]) -> String {
        statuses.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",")
    }
}

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    Customer,
    Agent,
}

/// Account role, which decides the dashboard and which widget a user may run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Agent,
    User,
}

impl Role {
    /// Landing route after login.
    #[must_use]
    pub fn dashboard_path(self) -> &'static str {
        match self {
            Self::Admin => "/account/admin/dashboard",
            Self::Agent => "/account/agent/dashboard",
            Self::User => "/account/user/dashboard",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "agent" => Ok(Self::Agent),
            "user" => Ok(Self::User),
            other => Err(format!("invalid role '{other}' (expected admin, agent, or user)")),
        }
    }
}

/// A single customer-agent conversation thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub status: ChannelStatus,
    /// Agent who claimed the channel, or [`UNASSIGNED`].
    #[serde(default)]
    pub assigned_agent_id: UserId,
    #[serde(default)]
    pub customer_id: UserId,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    /// Newest message summary; present on agent rosters only.
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    /// Server-side unread estimate; present on agent rosters only.
    #[serde(default)]
    pub unread_count: Option<u64>,
}

impl Channel {
    #[must_use]
    pub fn is_unassigned(&self) -> bool {
        self.assigned_agent_id == UNASSIGNED
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status == ChannelStatus::Closed
    }
}

/// Compact newest-message summary embedded in roster entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    #[serde(default)]
    pub id: MessageId,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sender_type: Option<SenderKind>,
}

/// A chat message. Immutable once created except for `is_read`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Monotonically increasing; doubles as the high-water mark.
    pub id: MessageId,
    #[serde(rename = "conversation_id")]
    pub channel_id: ChannelId,
    #[serde(rename = "sender_type")]
    pub sender: SenderKind,
    #[serde(rename = "message")]
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub is_read: bool,
}

/// Response of `GET /user/channels/{id}` and `GET /agent/channels/{id}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelDetail {
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Message>,
}

/// Response of `POST /user/channels`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedChannel {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

/// Response of `PATCH /agent/channels/{id}/assign`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub channel_id: ChannelId,
    pub assigned_agent_id: UserId,
    pub status: ChannelStatus,
}

/// Response of `GET /agent/channels/stats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    #[serde(default)]
    pub open: u64,
    #[serde(default)]
    pub assigned: u64,
    #[serde(default)]
    pub closed: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub unread: u64,
}

/// Account details returned by login and registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub tenant_id: Option<u64>,
}

/// Payload of a successful `POST /auth/login`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Older deployments call this field `token`.
    #[serde(alias = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry as a Unix timestamp in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub user: UserProfile,
}

/// Standard `{success, data, message}` response envelope.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
