//! Customer widget state.
//!
//! SYSTEM CONTEXT
//! ==============
//! Pure state for one customer's support conversation. The session service
//! feeds it API results; nothing here performs I/O, so every transition can
//! be tested directly.
//!
//! DESIGN
//! ======
//! The server is the source of truth. A poll only overwrites the local list
//! when the fetched list is strictly longer, which keeps the local sequence a
//! prefix-extended view of the server's. Unread is derived from the read
//! watermark, so it cannot go negative or count a message twice.

#[cfg(test)]
#[path = "customer_test.rs"]
mod customer_test;

use std::collections::HashSet;

use time::OffsetDateTime;

use super::unread::compute_unread;
use crate::error::ChatError;
use crate::net::types::{
    Channel, ChannelDetail, ChannelId, ChannelStatus, CreatedChannel, Message, MessageId, SenderKind, UNASSIGNED,
    UserId,
};

/// Lifecycle of the customer widget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CustomerPhase {
    Unauthenticated,
    NoChannel,
    AwaitingAgent,
    Connected,
    Closed,
}

/// What a poll tick changed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollDelta {
    /// Messages that were not held before this tick.
    pub appended: Vec<Message>,
    /// Number of agent-authored messages among `appended`.
    pub agent_messages: usize,
    /// Text of the first new agent message, for the notification body.
    pub alert: Option<String>,
    /// The channel is closed after this tick.
    pub channel_closed: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CustomerChatState {
    pub authenticated: bool,
    pub customer_id: UserId,
    pub channel: Option<Channel>,
    pub messages: Vec<Message>,
    /// High-water mark: id of the newest held message.
    pub last_message_id: Option<MessageId>,
    /// Agent messages at or below this id have been read.
    pub read_through: MessageId,
    /// Agent messages above this id render highlighted.
    pub highlight_floor: MessageId,
    pub draft: String,
    pub sending: bool,
    pub view_open: bool,
    pub last_error: Option<ChatError>,
}

impl CustomerChatState {
    #[must_use]
    pub fn new(authenticated: bool, customer_id: UserId) -> Self {
        Self {
            authenticated,
            customer_id,
            channel: None,
            messages: Vec::new(),
            last_message_id: None,
            read_through: 0,
            highlight_floor: 0,
            draft: String::new(),
            sending: false,
            view_open: false,
            last_error: None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> CustomerPhase {
        if !self.authenticated {
            return CustomerPhase::Unauthenticated;
        }
        match &self.channel {
            None => CustomerPhase::NoChannel,
            Some(ch) if ch.is_closed() => CustomerPhase::Closed,
            Some(ch) if ch.assigned_agent_id == UNASSIGNED => CustomerPhase::AwaitingAgent,
            Some(_) => CustomerPhase::Connected,
        }
    }

    #[must_use]
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel.as_ref().map(|c| c.id)
    }

    /// Compose is disabled once the conversation ends.
    #[must_use]
    pub fn can_compose(&self) -> bool {
        self.authenticated && self.phase() != CustomerPhase::Closed
    }

    /// Polling runs while a channel exists and is not closed.
    #[must_use]
    pub fn wants_polling(&self) -> bool {
        matches!(self.phase(), CustomerPhase::AwaitingAgent | CustomerPhase::Connected)
    }

    #[must_use]
    pub fn unread(&self) -> usize {
        compute_unread(&self.messages, self.read_through, SenderKind::Agent)
    }

    /// Agent message the user has not acknowledged by opening the widget.
    #[must_use]
    pub fn is_highlighted(&self, message: &Message) -> bool {
        message.sender == SenderKind::Agent && message.id > self.highlight_floor
    }

    fn newest_id(&self) -> MessageId {
        self.messages.iter().map(|m| m.id).max().unwrap_or(0)
    }

    fn mark_all_read(&mut self) {
        self.read_through = self.read_through.max(self.newest_id());
    }

    /// Adopt an existing channel found on mount. History counts as read.
    pub fn hydrate(&mut self, listed: Channel, detail: ChannelDetail) {
        let channel = detail.channel.filter(|c| c.id == listed.id).unwrap_or(listed);
        self.channel = Some(channel);
        self.messages = detail.messages;
        self.last_message_id = self.messages.last().map(|m| m.id);
        self.mark_all_read();
        self.highlight_floor = self.read_through;
    }

    /// Local view of a channel that the first message just created.
    pub fn seed_created_channel(&mut self, created: CreatedChannel, text: &str, now: OffsetDateTime) {
        self.channel = Some(Channel {
            id: created.channel_id,
            status: ChannelStatus::Open,
            assigned_agent_id: UNASSIGNED,
            customer_id: self.customer_id,
            customer_name: None,
            customer_email: None,
            last_message: None,
            unread_count: None,
        });
        self.messages = vec![Message {
            id: created.message_id,
            channel_id: created.channel_id,
            sender: SenderKind::Customer,
            text: text.to_owned(),
            created_at: now,
            is_read: false,
        }];
        self.last_message_id = Some(created.message_id);
        self.read_through = created.message_id;
        self.highlight_floor = created.message_id;
        self.draft.clear();
        self.last_error = None;
    }

    /// Apply one poll result. `None` when it belongs to another channel.
    pub fn apply_poll(&mut self, channel_id: ChannelId, detail: ChannelDetail) -> Option<PollDelta> {
        if self.channel_id() != Some(channel_id) {
            return None;
        }
        if let Some(channel) = detail.channel.filter(|c| c.id == channel_id) {
            self.channel = Some(channel);
        }

        let mut delta = PollDelta::default();
        let held = self.messages.len();
        if detail.messages.len() > held {
            // Usually the suffix past `held`; a locally appended send can
            // shift an earlier arrival into the prefix, so match on ids.
            let known: HashSet<MessageId> = self.messages.iter().map(|m| m.id).collect();
            delta.appended = detail.messages.iter().filter(|m| !known.contains(&m.id)).cloned().collect();
            let from_agent: Vec<&Message> =
                delta.appended.iter().filter(|m| m.sender == SenderKind::Agent).collect();
            delta.agent_messages = from_agent.len();
            delta.alert = from_agent.first().map(|m| m.text.clone());
            self.messages = detail.messages;
            self.last_message_id = self.messages.last().map(|m| m.id);
        }
        delta.channel_closed = self.phase() == CustomerPhase::Closed;
        Some(delta)
    }

    /// Record a message the API confirmed. Returns `false` if already held.
    pub fn append_sent(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.last_message_id = Some(self.last_message_id.map_or(message.id, |id| id.max(message.id)));
        self.messages.push(message);
        self.mark_all_read();
        self.draft.clear();
        self.last_error = None;
        true
    }

    pub fn open_view(&mut self) {
        self.view_open = true;
        self.highlight_floor = self.read_through;
        self.mark_all_read();
    }

    pub fn close_view(&mut self) {
        self.view_open = false;
        self.highlight_floor = self.read_through;
    }

    pub fn sign_out(&mut self) {
        *self = Self::new(false, 0);
    }
}
