//! Client configuration parsed from environment variables.
//!
//! Every knob has a default so a bare `supportdesk customer` works against a
//! local API server. Parsing goes through a lookup closure so tests can feed
//! values without touching the process environment.

use std::time::Duration;

use crate::error::ChatError;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CUSTOMER_POLL_MS: u64 = 5000;
pub const DEFAULT_ROSTER_POLL_MS: u64 = 5000;
pub const DEFAULT_MESSAGE_POLL_MS: u64 = 3000;
pub const DEFAULT_TENANT_ID: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

/// Polling cadence for the chat sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    /// Customer widget: refetch the open channel.
    pub customer: Duration,
    /// Agent inbox: refetch the channel roster.
    pub roster: Duration,
    /// Agent inbox: refetch the selected channel's messages.
    pub messages: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            customer: Duration::from_millis(DEFAULT_CUSTOMER_POLL_MS),
            roster: Duration::from_millis(DEFAULT_ROSTER_POLL_MS),
            messages: Duration::from_millis(DEFAULT_MESSAGE_POLL_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub timeouts: HttpTimeouts,
    pub poll: PollIntervals,
    pub tenant_id: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_owned(),
            timeouts: HttpTimeouts {
                request_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
                connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            },
            poll: PollIntervals::default(),
            tenant_id: DEFAULT_TENANT_ID,
        }
    }
}

impl ClientConfig {
    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `SUPPORTDESK_API_BASE_URL`: default `http://localhost:8080/api`
    /// - `SUPPORTDESK_REQUEST_TIMEOUT_SECS`: default 15
    /// - `SUPPORTDESK_CONNECT_TIMEOUT_SECS`: default 5
    /// - `SUPPORTDESK_CUSTOMER_POLL_MS`: default 5000
    /// - `SUPPORTDESK_ROSTER_POLL_MS`: default 5000
    /// - `SUPPORTDESK_MESSAGE_POLL_MS`: default 3000
    /// - `SUPPORTDESK_TENANT_ID`: default 1
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] when a value is present but malformed.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] when a value is present but malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base_url = normalize_base_url(
            &lookup("SUPPORTDESK_API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_owned()),
        )?;
        let timeouts = HttpTimeouts {
            request_secs: parse_u64(&lookup, "SUPPORTDESK_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            connect_secs: parse_u64(&lookup, "SUPPORTDESK_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        };
        let poll = PollIntervals {
            customer: parse_interval(&lookup, "SUPPORTDESK_CUSTOMER_POLL_MS", DEFAULT_CUSTOMER_POLL_MS)?,
            roster: parse_interval(&lookup, "SUPPORTDESK_ROSTER_POLL_MS", DEFAULT_ROSTER_POLL_MS)?,
            messages: parse_interval(&lookup, "SUPPORTDESK_MESSAGE_POLL_MS", DEFAULT_MESSAGE_POLL_MS)?,
        };
        let tenant_id = parse_u64(&lookup, "SUPPORTDESK_TENANT_ID", DEFAULT_TENANT_ID)?;

        Ok(Self { api_base_url, timeouts, poll, tenant_id })
    }
}

/// Trim trailing slashes and reject anything that is not http(s).
///
/// # Errors
///
/// Returns [`ChatError::Config`] for a non-http(s) URL.
pub fn normalize_base_url(raw: &str) -> Result<String, ChatError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ChatError::Config(format!("base URL must start with http:// or https://: {raw}")));
    }
    Ok(trimmed.to_owned())
}

fn parse_u64<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ChatError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ChatError::Config(format!("{key} must be an unsigned integer, got '{raw}'"))),
    }
}

fn parse_interval<F>(lookup: &F, key: &str, default_ms: u64) -> Result<Duration, ChatError>
where
    F: Fn(&str) -> Option<String>,
{
    let ms = parse_u64(lookup, key, default_ms)?;
    if ms == 0 {
        return Err(ChatError::Config(format!("{key} must be greater than zero")));
    }
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
