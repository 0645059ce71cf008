//! Per-channel read watermarks.
//!
//! DESIGN
//! ======
//! Unread counts are derived, never incremented by hand: a channel's count is
//! the number of counterpart messages above its read watermark. Two marks are
//! kept per channel:
//!
//! - `last_read_id`: everything at or below this id has been seen by the user.
//! - `last_seen_id`: everything at or below this id has already been reported
//!   as fresh, so a message alerts at most once.
//!
//! The server's `is_read` flag is only consulted when seeding a channel seen
//! for the first time; fetching a channel may flip it server-side.

#[cfg(test)]
#[path = "unread_test.rs"]
mod unread_test;

use std::collections::{BTreeMap, HashSet};

use crate::net::types::{ChannelId, Message, MessageId, SenderKind};

/// Count messages from `from` newer than `last_read_id`.
#[must_use]
pub fn compute_unread(messages: &[Message], last_read_id: MessageId, from: SenderKind) -> usize {
    messages.iter().filter(|m| m.sender == from && m.id > last_read_id).count()
}

/// Initial read watermark for a channel: the newest message that is either
/// own-side or already flagged read by the server.
#[must_use]
pub fn seed_watermark(messages: &[Message], from: SenderKind) -> MessageId {
    messages.iter().filter(|m| m.sender != from || m.is_read).map(|m| m.id).max().unwrap_or(0)
}

fn newest_id(messages: &[Message]) -> MessageId {
    messages.iter().map(|m| m.id).max().unwrap_or(0)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelMarks {
    pub last_read_id: MessageId,
    pub last_seen_id: MessageId,
    pub unread: usize,
}

/// Result of observing one fetched channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observation {
    /// Unread count after the observation.
    pub unread: usize,
    /// Counterpart messages not reported before, oldest first.
    pub fresh: Vec<Message>,
}

/// Watermarks for every channel on a roster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnreadLedger {
    counterpart: SenderKind,
    marks: BTreeMap<ChannelId, ChannelMarks>,
}

impl UnreadLedger {
    /// `counterpart` is the sender whose messages count as unread.
    #[must_use]
    pub fn new(counterpart: SenderKind) -> Self {
        Self { counterpart, marks: BTreeMap::new() }
    }

    #[must_use]
    pub fn counterpart(&self) -> SenderKind {
        self.counterpart
    }

    /// Fold a freshly fetched message list into the channel's marks.
    pub fn observe(&mut self, channel_id: ChannelId, messages: &[Message]) -> Observation {
        let counterpart = self.counterpart;
        let marks = self.marks.entry(channel_id).or_insert_with(|| {
            let seeded = seed_watermark(messages, counterpart);
            ChannelMarks { last_read_id: seeded, last_seen_id: seeded, unread: 0 }
        });

        let fresh: Vec<Message> =
            messages.iter().filter(|m| m.sender == counterpart && m.id > marks.last_seen_id).cloned().collect();
        marks.last_seen_id = marks.last_seen_id.max(newest_id(messages));
        marks.unread = compute_unread(messages, marks.last_read_id, counterpart);

        Observation { unread: marks.unread, fresh }
    }

    /// Everything up to `through` has been read.
    pub fn mark_read(&mut self, channel_id: ChannelId, through: MessageId) {
        let marks = self.marks.entry(channel_id).or_default();
        marks.last_read_id = marks.last_read_id.max(through);
        marks.last_seen_id = marks.last_seen_id.max(through);
        marks.unread = 0;
    }

    #[must_use]
    pub fn unread(&self, channel_id: ChannelId) -> usize {
        self.marks.get(&channel_id).map_or(0, |m| m.unread)
    }

    #[must_use]
    pub fn marks(&self, channel_id: ChannelId) -> Option<ChannelMarks> {
        self.marks.get(&channel_id).copied()
    }

    /// Sum across all channels.
    #[must_use]
    pub fn total(&self) -> usize {
        self.marks.values().map(|m| m.unread).sum()
    }

    /// Per-channel counts, for rendering.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<ChannelId, usize> {
        self.marks.iter().map(|(id, m)| (*id, m.unread)).collect()
    }

    /// Drop channels that are no longer on the roster.
    pub fn retain(&mut self, ids: &HashSet<ChannelId>) {
        self.marks.retain(|id, _| ids.contains(id));
    }

    pub fn clear(&mut self) {
        self.marks.clear();
    }
}
