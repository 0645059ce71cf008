//! Agent inbox state.
//!
//! SYSTEM CONTEXT
//! ==============
//! Pure state behind the agent inbox: the merged channel roster, the selected
//! channel and its messages, and per-channel unread watermarks. The session
//! service owns one of these behind a mutex and applies API results to it.
//!
//! DESIGN
//! ======
//! Every selection bumps `selection_epoch`. Message fetches carry the channel
//! id and epoch they were issued under, and results from a superseded
//! selection are dropped. Roster checks for the selected channel are dropped
//! the same way, since the message poller owns that channel's read state.
//! Roster fetches carry a generation, and only the most recently started
//! fetch may replace the roster.

#[cfg(test)]
#[path = "agent_test.rs"]
mod agent_test;

use std::collections::{BTreeSet, HashSet};

use super::unread::{Observation, UnreadLedger};
use crate::error::ChatError;
use crate::net::types::{Channel, ChannelDetail, ChannelId, ChannelStatus, Message, SenderKind, UNASSIGNED, UserId};

/// Merge the unassigned queue with the agent's own channels.
///
/// Unassigned channels come first. A channel present in both lists keeps the
/// assigned copy, which carries the newer status.
#[must_use]
pub fn merge_roster(available: Vec<Channel>, assigned: Vec<Channel>) -> Vec<Channel> {
    let mut merged: Vec<Channel> = Vec::with_capacity(available.len() + assigned.len());
    for channel in available {
        if !assigned.iter().any(|c| c.id == channel.id) && !merged.iter().any(|c| c.id == channel.id) {
            merged.push(channel);
        }
    }
    for channel in assigned {
        if !merged.iter().any(|c| c.id == channel.id) {
            merged.push(channel);
        }
    }
    merged
}

/// How a claim request should proceed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimPlan {
    /// This agent already owns the channel; just select it.
    AlreadyMine,
    /// Send the assign request.
    Claim,
}

/// Outcome of applying a selected-channel fetch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelectedUpdate {
    /// The message list differed and was overwritten.
    pub changed: bool,
    /// The channel is closed after this fetch.
    pub closed: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AgentChatState {
    pub agent_id: UserId,
    pub inbox_open: bool,
    pub roster: Vec<Channel>,
    pub selected: Option<ChannelId>,
    /// Latest metadata for the selected channel, which may have left the roster.
    pub active: Option<Channel>,
    pub selection_epoch: u64,
    pub roster_generation: u64,
    pub messages: Vec<Message>,
    pub ledger: UnreadLedger,
    pub draft: String,
    pub sending: bool,
    pub claiming: BTreeSet<ChannelId>,
    pub last_error: Option<ChatError>,
}

impl AgentChatState {
    #[must_use]
    pub fn new(agent_id: UserId) -> Self {
        Self {
            agent_id,
            inbox_open: false,
            roster: Vec::new(),
            selected: None,
            active: None,
            selection_epoch: 0,
            roster_generation: 0,
            messages: Vec::new(),
            ledger: UnreadLedger::new(SenderKind::Customer),
            draft: String::new(),
            sending: false,
            claiming: BTreeSet::new(),
            last_error: None,
        }
    }

    #[must_use]
    pub fn channel(&self, channel_id: ChannelId) -> Option<&Channel> {
        self.roster.iter().find(|c| c.id == channel_id)
    }

    /// Start a roster fetch. Returns its generation.
    pub fn begin_roster_fetch(&mut self) -> u64 {
        self.roster_generation += 1;
        self.roster_generation
    }

    /// Whether a roster fetch started under `generation` is still the newest.
    #[must_use]
    pub fn is_current_roster(&self, generation: u64) -> bool {
        self.roster_generation == generation
    }

    /// Replace the roster. Returns the channel to auto-select, if any.
    pub fn apply_roster(&mut self, available: Vec<Channel>, assigned: Vec<Channel>) -> Option<ChannelId> {
        let auto_select = if self.selected.is_none() { assigned.first().map(|c| c.id) } else { None };
        self.roster = merge_roster(available, assigned);

        let mut keep: HashSet<ChannelId> = self.roster.iter().map(|c| c.id).collect();
        keep.extend(self.selected);
        self.ledger.retain(&keep);

        if let (Some(id), Some(active)) = (self.selected, self.active.as_mut()) {
            if let Some(fresh) = self.roster.iter().find(|c| c.id == id) {
                *active = fresh.clone();
            }
        }
        auto_select
    }

    /// Channels whose unread state the roster tick should refresh.
    #[must_use]
    pub fn channels_to_check(&self) -> Vec<ChannelId> {
        self.roster.iter().map(|c| c.id).filter(|id| Some(*id) != self.selected).collect()
    }

    /// Fold a roster check into the ledger. `None` when the result is stale.
    pub fn apply_channel_check(&mut self, channel_id: ChannelId, messages: &[Message]) -> Option<Observation> {
        if self.selected == Some(channel_id) || self.channel(channel_id).is_none() {
            return None;
        }
        Some(self.ledger.observe(channel_id, messages))
    }

    /// Make `channel_id` the selected channel and zero its unread count.
    /// Returns the new selection epoch.
    pub fn select(&mut self, channel_id: ChannelId) -> u64 {
        if self.selected != Some(channel_id) {
            self.messages.clear();
            self.draft.clear();
        }
        self.selected = Some(channel_id);
        self.active = self.channel(channel_id).cloned();
        self.selection_epoch += 1;
        let seen = self.ledger.marks(channel_id).map_or(0, |m| m.last_seen_id);
        self.ledger.mark_read(channel_id, seen);
        self.selection_epoch
    }

    /// Whether a fetch issued under (`channel_id`, `epoch`) is still relevant.
    #[must_use]
    pub fn is_current(&self, channel_id: ChannelId, epoch: u64) -> bool {
        self.selected == Some(channel_id) && self.selection_epoch == epoch
    }

    /// Apply a fetch of the selected channel. `None` when superseded.
    pub fn apply_selected_detail(
        &mut self,
        channel_id: ChannelId,
        epoch: u64,
        detail: ChannelDetail,
    ) -> Option<SelectedUpdate> {
        if !self.is_current(channel_id, epoch) {
            return None;
        }
        if let Some(channel) = detail.channel.filter(|c| c.id == channel_id) {
            if let Some(entry) = self.roster.iter_mut().find(|c| c.id == channel_id) {
                *entry = channel.clone();
            }
            self.active = Some(channel);
        }

        let changed = detail.messages != self.messages;
        if changed {
            self.messages = detail.messages;
        }
        let newest = self.messages.iter().map(|m| m.id).max().unwrap_or(0);
        self.ledger.mark_read(channel_id, newest);
        Some(SelectedUpdate { changed, closed: self.selected_is_closed() })
    }

    #[must_use]
    pub fn selected_is_closed(&self) -> bool {
        self.active.as_ref().is_some_and(Channel::is_closed)
    }

    #[must_use]
    pub fn can_compose(&self) -> bool {
        self.selected.is_some() && !self.selected_is_closed()
    }

    /// Decide whether claiming `channel_id` is allowed.
    ///
    /// # Errors
    ///
    /// `UnknownChannel` if it is not on the roster, `AlreadyClaimed` if another
    /// agent owns it, `Busy` if a claim for it is already in flight.
    pub fn plan_claim(&mut self, channel_id: ChannelId) -> Result<ClaimPlan, ChatError> {
        let channel = self.channel(channel_id).ok_or(ChatError::UnknownChannel(channel_id))?;
        if channel.assigned_agent_id == self.agent_id {
            return Ok(ClaimPlan::AlreadyMine);
        }
        if channel.assigned_agent_id != UNASSIGNED {
            return Err(ChatError::AlreadyClaimed(channel_id));
        }
        if !self.claiming.insert(channel_id) {
            return Err(ChatError::Busy);
        }
        Ok(ClaimPlan::Claim)
    }

    pub fn finish_claim(&mut self, channel_id: ChannelId) {
        self.claiming.remove(&channel_id);
    }

    /// Record a claim the server confirmed for this agent.
    pub fn apply_claim(&mut self, channel_id: ChannelId, status: ChannelStatus) {
        let agent_id = self.agent_id;
        if let Some(entry) = self.roster.iter_mut().find(|c| c.id == channel_id) {
            entry.assigned_agent_id = agent_id;
            entry.status = status;
        }
    }

    /// Record a message the API confirmed. Returns `false` if it is a
    /// duplicate or belongs to a channel that is no longer selected.
    pub fn append_sent(&mut self, message: Message) -> bool {
        if self.selected != Some(message.channel_id) || self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.ledger.mark_read(message.channel_id, message.id);
        self.messages.push(message);
        self.draft.clear();
        self.last_error = None;
        true
    }

    pub fn mark_closed(&mut self, channel_id: ChannelId) {
        if let Some(entry) = self.roster.iter_mut().find(|c| c.id == channel_id) {
            entry.status = ChannelStatus::Closed;
        }
        if let Some(active) = self.active.as_mut().filter(|c| c.id == channel_id) {
            active.status = ChannelStatus::Closed;
        }
    }

    #[must_use]
    pub fn unread(&self, channel_id: ChannelId) -> usize {
        self.ledger.unread(channel_id)
    }

    #[must_use]
    pub fn total_unread(&self) -> usize {
        self.ledger.total()
    }
}
