//! Notification and audio-cue capability.
//!
//! Sessions never touch a desktop notification API directly; the host
//! injects an [`AlertSink`]. Tests record calls, the terminal front end rings
//! the bell, and headless callers log.

#[cfg(test)]
#[path = "alerts_test.rs"]
mod alerts_test;

/// Title of the customer-side notification for a new agent reply.
pub const AGENT_MESSAGE_TITLE: &str = "New message from agent";
/// Title of the agent-side notification for a new customer message.
pub const CUSTOMER_MESSAGE_TITLE: &str = "New message from customer";

/// Longest notification body before it is cut with an ellipsis.
pub const MAX_BODY_CHARS: usize = 120;

pub trait AlertSink: Send + Sync {
    fn notify(&self, title: &str, body: &str);

    fn play_sound(&self);

    /// Ask the host for permission to notify. Called once per session.
    fn request_permission(&self) {}
}

/// Shorten a message body for display in a notification.
#[must_use]
pub fn notification_body(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_BODY_CHARS {
        return trimmed.to_owned();
    }
    let mut cut: String = trimmed.chars().take(MAX_BODY_CHARS - 1).collect();
    cut.push('…');
    cut
}

/// Emits alerts as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn notify(&self, title: &str, body: &str) {
        tracing::info!(title, body, "notification");
    }

    fn play_sound(&self) {
        tracing::debug!("notification sound");
    }
}

/// Discards every alert.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAlertSink;

impl AlertSink for NoopAlertSink {
    fn notify(&self, _title: &str, _body: &str) {}

    fn play_sound(&self) {}
}
