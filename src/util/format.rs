//! Display formatting for chat views.

#[cfg(test)]
#[path = "format_test.rs"]
mod format_test;

use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::net::types::Channel;
use crate::state::customer::CustomerPhase;

const CLOCK: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]");

/// 24-hour `HH:MM` in the timestamp's own offset.
#[must_use]
pub fn format_time(at: OffsetDateTime) -> String {
    at.format(CLOCK).unwrap_or_else(|_| format!("{:02}:{:02}", at.hour(), at.minute()))
}

/// Unread badge text: empty at zero, capped at `9+`.
#[must_use]
pub fn badge_label(unread: usize) -> String {
    match unread {
        0 => String::new(),
        1..=9 => unread.to_string(),
        _ => "9+".to_owned(),
    }
}

/// Avatar letter for a customer, `C` when the name is missing.
#[must_use]
pub fn initial(name: Option<&str>) -> char {
    name.and_then(|n| n.trim().chars().next()).map_or('C', |c| c.to_uppercase().next().unwrap_or(c))
}

#[must_use]
pub fn customer_status_line(phase: CustomerPhase) -> &'static str {
    match phase {
        CustomerPhase::Unauthenticated => "Please sign in",
        CustomerPhase::NoChannel => "Start a conversation",
        CustomerPhase::AwaitingAgent => "Waiting for an agent...",
        CustomerPhase::Connected => "Connected to an agent",
        CustomerPhase::Closed => "Conversation ended",
    }
}

/// Short roster label for an agent's channel list.
#[must_use]
pub fn roster_status_label(channel: &Channel) -> &'static str {
    if channel.is_closed() {
        "Closed"
    } else if channel.is_unassigned() {
        "Waiting"
    } else {
        "Connected"
    }
}
