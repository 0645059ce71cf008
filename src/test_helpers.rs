//! Shared fixtures for unit tests: message and channel builders, an
//! in-memory chat server behind [`ChatApi`], and a recording [`AlertSink`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use time::macros::datetime;

use crate::error::ChatError;
use crate::net::api::ChatApi;
use crate::net::types::{
    Assignment, Channel, ChannelDetail, ChannelId, ChannelStats, ChannelStatus, CreatedChannel, Message, MessageId,
    Role, SenderKind, UNASSIGNED, UserId, UserProfile,
};
use crate::services::alerts::AlertSink;
use crate::state::auth::{AuthContext, AuthToken};

// =============================================================================
// BUILDERS
// =============================================================================

#[must_use]
pub fn fixed_time() -> OffsetDateTime {
    datetime!(2024-05-01 09:30 UTC)
}

fn message(id: MessageId, channel_id: ChannelId, sender: SenderKind, text: &str) -> Message {
    Message { id, channel_id, sender, text: text.to_owned(), created_at: fixed_time(), is_read: false }
}

#[must_use]
pub fn customer_msg(id: MessageId, channel_id: ChannelId, text: &str) -> Message {
    message(id, channel_id, SenderKind::Customer, text)
}

#[must_use]
pub fn agent_msg(id: MessageId, channel_id: ChannelId, text: &str) -> Message {
    message(id, channel_id, SenderKind::Agent, text)
}

#[must_use]
pub fn channel(id: ChannelId, status: ChannelStatus, assigned_agent_id: UserId) -> Channel {
    Channel {
        id,
        status,
        assigned_agent_id,
        customer_id: 42,
        customer_name: Some("Budi".to_owned()),
        customer_email: None,
        last_message: None,
        unread_count: None,
    }
}

#[must_use]
pub fn detail(channel: Channel, messages: Vec<Message>) -> ChannelDetail {
    ChannelDetail { channel: Some(channel), messages }
}

#[must_use]
pub fn auth_for(id: UserId, role: Role) -> AuthContext {
    let user = UserProfile {
        id,
        email: format!("user{id}@example.test"),
        full_name: format!("User {id}"),
        role,
        tenant_id: Some(1),
    };
    AuthContext::new(AuthToken::new(format!("token-{id}")), user)
}

// =============================================================================
// ALERTS
// =============================================================================

#[derive(Default)]
pub struct RecordingAlertSink {
    notifications: Mutex<Vec<(String, String)>>,
    sounds: AtomicUsize,
    permission_requests: AtomicUsize,
}

impl RecordingAlertSink {
    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn sounds(&self) -> usize {
        self.sounds.load(Ordering::SeqCst)
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }
}

impl AlertSink for RecordingAlertSink {
    fn notify(&self, title: &str, body: &str) {
        self.notifications.lock().unwrap().push((title.to_owned(), body.to_owned()));
    }

    fn play_sound(&self) {
        self.sounds.fetch_add(1, Ordering::SeqCst);
    }

    fn request_permission(&self) {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// FAKE SERVER
// =============================================================================

/// Server-side data behind [`FakeChatApi`].
pub struct FakeServer {
    pub channels: BTreeMap<ChannelId, Channel>,
    pub messages: BTreeMap<ChannelId, Vec<Message>>,
    pub customer_id: UserId,
    pub agent_id: UserId,
    next_channel_id: ChannelId,
    next_message_id: MessageId,
    calls: Vec<(String, String)>,
    failures: HashMap<&'static str, ChatError>,
    delays: HashMap<&'static str, Duration>,
}

impl FakeServer {
    fn detail(&self, channel_id: ChannelId) -> Result<ChannelDetail, ChatError> {
        let channel = self
            .channels
            .get(&channel_id)
            .cloned()
            .ok_or(ChatError::Api { status: 404, message: Some("Channel not found".to_owned()) })?;
        let messages = self.messages.get(&channel_id).cloned().unwrap_or_default();
        Ok(ChannelDetail { channel: Some(channel), messages })
    }

    fn push(&mut self, channel_id: ChannelId, sender: SenderKind, text: &str) -> Message {
        self.next_message_id += 1;
        let msg = message(self.next_message_id, channel_id, sender, text);
        self.messages.entry(channel_id).or_default().push(msg.clone());
        msg
    }
}

/// In-memory [`ChatApi`] with call recording, failure injection, and
/// per-endpoint latency.
pub struct FakeChatApi {
    server: Mutex<FakeServer>,
}

impl FakeChatApi {
    pub fn new(customer_id: UserId, agent_id: UserId) -> Self {
        Self {
            server: Mutex::new(FakeServer {
                channels: BTreeMap::new(),
                messages: BTreeMap::new(),
                customer_id,
                agent_id,
                next_channel_id: 100,
                next_message_id: 1000,
                calls: Vec::new(),
                failures: HashMap::new(),
                delays: HashMap::new(),
            }),
        }
    }

    pub fn server(&self) -> MutexGuard<'_, FakeServer> {
        self.server.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_channel(&self, channel: Channel) {
        let mut server = self.server();
        server.messages.entry(channel.id).or_default();
        server.channels.insert(channel.id, channel);
    }

    /// Store a message as if the other side had sent it.
    pub fn push_message(&self, channel_id: ChannelId, sender: SenderKind, text: &str) -> Message {
        self.server().push(channel_id, sender, text)
    }

    pub fn set_channel(&self, channel_id: ChannelId, status: ChannelStatus, assigned_agent_id: UserId) {
        if let Some(ch) = self.server().channels.get_mut(&channel_id) {
            ch.status = status;
            ch.assigned_agent_id = assigned_agent_id;
        }
    }

    pub fn fail(&self, endpoint: &'static str, error: ChatError) {
        self.server().failures.insert(endpoint, error);
    }

    pub fn recover(&self, endpoint: &'static str) {
        self.server().failures.remove(endpoint);
    }

    pub fn delay(&self, endpoint: &'static str, by: Duration) {
        self.server().delays.insert(endpoint, by);
    }

    /// Endpoint names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.server().calls.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn count(&self, endpoint: &str) -> usize {
        self.server().calls.iter().filter(|(name, _)| name == endpoint).count()
    }

    /// Bearer tokens seen, in call order.
    pub fn tokens(&self) -> Vec<String> {
        self.server().calls.iter().map(|(_, token)| token.clone()).collect()
    }

    async fn enter(&self, endpoint: &'static str, token: &AuthToken) -> Result<(), ChatError> {
        let delay = {
            let mut server = self.server();
            server.calls.push((endpoint.to_owned(), token.as_str().to_owned()));
            if let Some(err) = server.failures.get(endpoint) {
                return Err(err.clone());
            }
            server.delays.get(endpoint).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChatApi for FakeChatApi {
    async fn customer_channels(&self, token: &AuthToken, statuses: &[ChannelStatus]) -> Result<Vec<Channel>, ChatError> {
        self.enter("customer_channels", token).await?;
        let server = self.server();
        Ok(server
            .channels
            .values()
            .filter(|c| c.customer_id == server.customer_id && statuses.contains(&c.status))
            .cloned()
            .collect())
    }

    async fn customer_channel(&self, token: &AuthToken, channel_id: ChannelId) -> Result<ChannelDetail, ChatError> {
        self.enter("customer_channel", token).await?;
        self.server().detail(channel_id)
    }

    async fn create_channel(&self, token: &AuthToken, _tenant_id: u64, text: &str) -> Result<CreatedChannel, ChatError> {
        self.enter("create_channel", token).await?;
        let mut server = self.server();
        server.next_channel_id += 1;
        let id = server.next_channel_id;
        let customer_id = server.customer_id;
        let mut ch = channel(id, ChannelStatus::Open, UNASSIGNED);
        ch.customer_id = customer_id;
        server.channels.insert(id, ch);
        let msg = server.push(id, SenderKind::Customer, text);
        Ok(CreatedChannel { channel_id: id, message_id: msg.id })
    }

    async fn send_customer_message(
        &self,
        token: &AuthToken,
        channel_id: ChannelId,
        text: &str,
    ) -> Result<Message, ChatError> {
        self.enter("send_customer_message", token).await?;
        Ok(self.server().push(channel_id, SenderKind::Customer, text))
    }

    async fn available_channels(&self, token: &AuthToken) -> Result<Vec<Channel>, ChatError> {
        self.enter("available_channels", token).await?;
        Ok(self.server().channels.values().filter(|c| c.is_unassigned() && !c.is_closed()).cloned().collect())
    }

    async fn agent_channels(&self, token: &AuthToken, statuses: &[ChannelStatus]) -> Result<Vec<Channel>, ChatError> {
        self.enter("agent_channels", token).await?;
        let server = self.server();
        Ok(server
            .channels
            .values()
            .filter(|c| c.assigned_agent_id == server.agent_id && statuses.contains(&c.status))
            .cloned()
            .collect())
    }

    async fn agent_channel(&self, token: &AuthToken, channel_id: ChannelId) -> Result<ChannelDetail, ChatError> {
        self.enter("agent_channel", token).await?;
        self.server().detail(channel_id)
    }

    async fn assign_channel(&self, token: &AuthToken, channel_id: ChannelId) -> Result<Assignment, ChatError> {
        self.enter("assign_channel", token).await?;
        let mut server = self.server();
        let agent_id = server.agent_id;
        let ch = server
            .channels
            .get_mut(&channel_id)
            .ok_or(ChatError::Api { status: 404, message: Some("Channel not found".to_owned()) })?;
        if ch.assigned_agent_id != UNASSIGNED && ch.assigned_agent_id != agent_id {
            return Err(ChatError::Api { status: 400, message: Some("Channel already assigned".to_owned()) });
        }
        ch.assigned_agent_id = agent_id;
        ch.status = ChannelStatus::Assigned;
        Ok(Assignment { channel_id, assigned_agent_id: agent_id, status: ChannelStatus::Assigned })
    }

    async fn mark_read(&self, token: &AuthToken, _channel_id: ChannelId) -> Result<(), ChatError> {
        self.enter("mark_read", token).await
    }

    async fn send_agent_message(&self, token: &AuthToken, channel_id: ChannelId, text: &str) -> Result<Message, ChatError> {
        self.enter("send_agent_message", token).await?;
        Ok(self.server().push(channel_id, SenderKind::Agent, text))
    }

    async fn close_channel(&self, token: &AuthToken, channel_id: ChannelId) -> Result<(), ChatError> {
        self.enter("close_channel", token).await?;
        if let Some(ch) = self.server().channels.get_mut(&channel_id) {
            ch.status = ChannelStatus::Closed;
        }
        Ok(())
    }

    async fn channel_stats(&self, token: &AuthToken) -> Result<ChannelStats, ChatError> {
        self.enter("channel_stats", token).await?;
        let server = self.server();
        let mut stats = ChannelStats::default();
        for ch in server.channels.values() {
            match ch.status {
                ChannelStatus::Open => stats.open += 1,
                ChannelStatus::Assigned => stats.assigned += 1,
                ChannelStatus::Closed => stats.closed += 1,
            }
            stats.total += 1;
        }
        Ok(stats)
    }
}
