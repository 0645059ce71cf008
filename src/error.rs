//! Error taxonomy shared by the API client and the chat sessions.
//!
//! DESIGN
//! ======
//! One enum covers transport, protocol, and session-precondition failures so
//! callers can branch on a single type: redirect on `Unauthenticated`, show a
//! cooldown on `RateLimited`, inline validation on `Validation`, and the
//! server's own message for everything else.

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

use crate::net::types::ChannelId;

/// Route the host should navigate to when a session is unauthenticated.
pub const LOGIN_PATH: &str = "/auth/login";

/// Errors produced by chat API calls and session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// No credentials are present, or the server rejected them (HTTP 401).
    #[error("not authenticated")]
    Unauthenticated,

    /// The server refused the request for this role (HTTP 403).
    #[error("access denied: {0}")]
    Forbidden(String),

    /// The server is throttling this client (HTTP 429).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// No response arrived: connect failure or timeout.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// Input rejected locally before any API call.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The server returned a non-success status.
    #[error("API error: status {status}")]
    Api { status: u16, message: Option<String> },

    /// The response body did not match the expected shape.
    #[error("response parse failed: {0}")]
    Parse(String),

    /// The HTTP request failed for a reason other than connectivity.
    #[error("request failed: {0}")]
    Request(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// A configuration value could not be parsed.
    #[error("config parse failed: {0}")]
    Config(String),

    /// The operation needs an active channel and there is none.
    #[error("no active channel")]
    NoChannel,

    /// The channel is closed; composing is disabled.
    #[error("channel {0} is closed")]
    ChannelClosed(ChannelId),

    /// The channel is not part of the current roster.
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    /// Another agent owns the channel.
    #[error("channel {0} is already claimed by another agent")]
    AlreadyClaimed(ChannelId),

    /// The same operation is already in flight.
    #[error("operation already in progress")]
    Busy,
}

impl ChatError {
    /// Stable machine-readable code for logs and tests.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "E_UNAUTHENTICATED",
            Self::Forbidden(_) => "E_FORBIDDEN",
            Self::RateLimited(_) => "E_RATE_LIMITED",
            Self::Unreachable(_) => "E_UNREACHABLE",
            Self::Validation(_) => "E_VALIDATION",
            Self::Api { .. } => "E_API",
            Self::Parse(_) => "E_PARSE",
            Self::Request(_) => "E_REQUEST",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::Config(_) => "E_CONFIG",
            Self::NoChannel => "E_NO_CHANNEL",
            Self::ChannelClosed(_) => "E_CHANNEL_CLOSED",
            Self::UnknownChannel(_) => "E_UNKNOWN_CHANNEL",
            Self::AlreadyClaimed(_) => "E_ALREADY_CLAIMED",
            Self::Busy => "E_BUSY",
        }
    }

    /// Whether a later attempt can succeed without the user changing anything.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Request(_) | Self::RateLimited(_) | Self::Api { status: 500..=599, .. }
        )
    }

    /// Text suitable for showing to the user next to the failed control.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthenticated => "Please sign in to continue.".to_owned(),
            Self::Forbidden(message) => message.clone(),
            Self::RateLimited(_) => "Too many attempts. Please wait a few minutes and try again.".to_owned(),
            Self::Unreachable(_) => "Cannot reach the server.".to_owned(),
            Self::Validation(message) => message.clone(),
            Self::Api { message: Some(message), .. } if !message.is_empty() => message.clone(),
            Self::Api { .. } | Self::Parse(_) | Self::Request(_) => {
                "Something went wrong, please try again.".to_owned()
            }
            Self::HttpClientBuild(_) | Self::Config(_) => self.to_string(),
            Self::NoChannel => "Start a conversation first.".to_owned(),
            Self::ChannelClosed(_) => "This conversation has ended.".to_owned(),
            Self::UnknownChannel(_) => "That conversation is no longer available.".to_owned(),
            Self::AlreadyClaimed(_) => "Another agent already took this conversation.".to_owned(),
            Self::Busy => "Still working on the previous request.".to_owned(),
        }
    }
}
