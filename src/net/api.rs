//! Chat REST API: the [`ChatApi`] seam and its reqwest implementation.
//!
//! Every method takes the caller's [`AuthToken`] explicitly; the HTTP client
//! carries no default credentials. Responses arrive wrapped in the
//! `{success, data, message}` envelope and are unwrapped by
//! [`decode_envelope`], which is pure so status mapping can be tested without
//! a server.
//!
//! ERROR HANDLING
//! ==============
//! Status codes map onto [`ChatError`]: 401 → `Unauthenticated`,
//! 403 → `Forbidden`, 429 → `RateLimited`, anything else non-2xx → `Api`.
//! Connect failures and timeouts become `Unreachable`.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use std::time::Duration;

use reqwest::Method;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;

use super::types::{
    Assignment, Channel, ChannelDetail, ChannelId, ChannelStats, ChannelStatus, CreatedChannel, Envelope, Message,
};
use crate::config::{ClientConfig, HttpTimeouts};
use crate::error::ChatError;
use crate::state::auth::AuthToken;

// =============================================================================
// TRAIT
// =============================================================================

/// Provider-neutral chat API. Sessions depend on this trait so tests can swap
/// in an in-memory server.
#[async_trait::async_trait]
pub trait ChatApi: Send + Sync {
    /// `GET /user/channels?status=...`
    async fn customer_channels(&self, token: &AuthToken, statuses: &[ChannelStatus])
    -> Result<Vec<Channel>, ChatError>;

    /// `GET /user/channels/{id}`
    async fn customer_channel(&self, token: &AuthToken, channel_id: ChannelId) -> Result<ChannelDetail, ChatError>;

    /// `POST /user/channels` with the first message.
    async fn create_channel(&self, token: &AuthToken, tenant_id: u64, text: &str) -> Result<CreatedChannel, ChatError>;

    /// `POST /user/channels/{id}/messages`
    async fn send_customer_message(
        &self,
        token: &AuthToken,
        channel_id: ChannelId,
        text: &str,
    ) -> Result<Message, ChatError>;

    /// `GET /agent/channels/available`
    async fn available_channels(&self, token: &AuthToken) -> Result<Vec<Channel>, ChatError>;

    /// `GET /agent/conversations?status=...`
    async fn agent_channels(&self, token: &AuthToken, statuses: &[ChannelStatus]) -> Result<Vec<Channel>, ChatError>;

    /// `GET /agent/channels/{id}`
    async fn agent_channel(&self, token: &AuthToken, channel_id: ChannelId) -> Result<ChannelDetail, ChatError>;

    /// `PATCH /agent/channels/{id}/assign`
    async fn assign_channel(&self, token: &AuthToken, channel_id: ChannelId) -> Result<Assignment, ChatError>;

    /// `PUT /agent/channels/{id}/read`
    async fn mark_read(&self, token: &AuthToken, channel_id: ChannelId) -> Result<(), ChatError>;

    /// `POST /agent/channels/{id}/messages`
    async fn send_agent_message(
        &self,
        token: &AuthToken,
        channel_id: ChannelId,
        text: &str,
    ) -> Result<Message, ChatError>;

    /// `POST /agent/channels/{id}/close`
    async fn close_channel(&self, token: &AuthToken, channel_id: ChannelId) -> Result<(), ChatError>;

    /// `GET /agent/channels/stats`
    async fn channel_stats(&self, token: &AuthToken) -> Result<ChannelStats, ChatError>;
}

// =============================================================================
// ENDPOINTS
// =============================================================================

fn customer_channels_path(statuses: &[ChannelStatus]) -> String {
    format!("/user/channels?status={}", ChannelStatus::query(statuses))
}

fn customer_channel_path(channel_id: ChannelId) -> String {
    format!("/user/channels/{channel_id}")
}

fn customer_messages_path(channel_id: ChannelId) -> String {
    format!("/user/channels/{channel_id}/messages")
}

fn agent_channels_path(statuses: &[ChannelStatus]) -> String {
    format!("/agent/conversations?status={}", ChannelStatus::query(statuses))
}

fn agent_channel_path(channel_id: ChannelId) -> String {
    format!("/agent/channels/{channel_id}")
}

fn agent_channel_action_path(channel_id: ChannelId, action: &str) -> String {
    format!("/agent/channels/{channel_id}/{action}")
}

// =============================================================================
// DECODING
// =============================================================================

/// Map a non-success HTTP status and body onto [`ChatError`].
pub(crate) fn status_error(status: u16, body: &str) -> ChatError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(serde_json::Value::as_str).map(ToOwned::to_owned));
    match status {
        401 => ChatError::Unauthenticated,
        403 => ChatError::Forbidden(message.unwrap_or_else(|| "access denied".to_owned())),
        429 => ChatError::RateLimited(message.unwrap_or_else(|| "too many requests".to_owned())),
        _ => ChatError::Api { status, message },
    }
}

/// Unwrap `{success, data}` into `Option<T>`; `data: null` yields `None`.
pub(crate) fn decode_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<Option<T>, ChatError> {
    if !(200..300).contains(&status) {
        return Err(status_error(status, body));
    }
    if body.trim().is_empty() {
        return Ok(None);
    }
    let envelope: Envelope<T> = serde_json::from_str(body).map_err(|e| ChatError::Parse(e.to_string()))?;
    if !envelope.success {
        return Err(ChatError::Api { status, message: envelope.message });
    }
    Ok(envelope.data)
}

/// Envelope whose `data` must be present.
pub(crate) fn decode_required<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, ChatError> {
    decode_envelope(status, body)?.ok_or_else(|| ChatError::Parse("response envelope has no data".to_owned()))
}

/// Envelope whose `data` is a list that the server may render as `null`.
pub(crate) fn decode_list<T: DeserializeOwned>(status: u16, body: &str) -> Result<Vec<T>, ChatError> {
    Ok(decode_envelope::<Vec<T>>(status, body)?.unwrap_or_default())
}

pub(crate) fn transport_error(e: &reqwest::Error) -> ChatError {
    if e.is_connect() || e.is_timeout() {
        ChatError::Unreachable(e.to_string())
    } else {
        ChatError::Request(e.to_string())
    }
}

pub(crate) fn build_http(timeouts: HttpTimeouts) -> Result<reqwest::Client, ChatError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeouts.request_secs))
        .connect_timeout(Duration::from_secs(timeouts.connect_secs))
        .build()
        .map_err(|e| ChatError::HttpClientBuild(e.to_string()))
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

/// reqwest-backed [`ChatApi`].
#[derive(Clone)]
pub struct HttpChatApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpChatApi {
    /// # Errors
    ///
    /// Returns [`ChatError::HttpClientBuild`] if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ChatError> {
        Ok(Self { http: build_http(config.timeouts)?, base_url: config.api_base_url.clone() })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        token: &AuthToken,
        body: Option<serde_json::Value>,
    ) -> Result<(u16, String), ChatError> {
        let url = format!("{}{}", self.base_url, path);
        let request = self.http.request(method.clone(), &url).header(AUTHORIZATION, token.bearer());
        let request = if let Some(json) = body { request.json(&json) } else { request };

        let response = request.send().await.map_err(|e| {
            tracing::debug!(%method, path, error = %e, "chat API request failed");
            transport_error(&e)
        })?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| transport_error(&e))?;
        tracing::trace!(%method, path, status, "chat API response");
        Ok((status, text))
    }
}

#[async_trait::async_trait]
impl ChatApi for HttpChatApi {
    async fn customer_channels(
        &self,
        token: &AuthToken,
        statuses: &[ChannelStatus],
    ) -> Result<Vec<Channel>, ChatError> {
        let (status, body) = self.send(Method::GET, &customer_channels_path(statuses), token, None).await?;
        decode_list(status, &body)
    }

    async fn customer_channel(&self, token: &AuthToken, channel_id: ChannelId) -> Result<ChannelDetail, ChatError> {
        let (status, body) = self.send(Method::GET, &customer_channel_path(channel_id), token, None).await?;
        decode_required(status, &body)
    }

    async fn create_channel(&self, token: &AuthToken, tenant_id: u64, text: &str) -> Result<CreatedChannel, ChatError> {
        let payload = serde_json::json!({ "tenant_id": tenant_id, "message": text });
        let (status, body) = self.send(Method::POST, "/user/channels", token, Some(payload)).await?;
        decode_required(status, &body)
    }

    async fn send_customer_message(
        &self,
        token: &AuthToken,
        channel_id: ChannelId,
        text: &str,
    ) -> Result<Message, ChatError> {
        let payload = serde_json::json!({ "message": text });
        let (status, body) = self.send(Method::POST, &customer_messages_path(channel_id), token, Some(payload)).await?;
        decode_required(status, &body)
    }

    async fn available_channels(&self, token: &AuthToken) -> Result<Vec<Channel>, ChatError> {
        let (status, body) = self.send(Method::GET, "/agent/channels/available", token, None).await?;
        decode_list(status, &body)
    }

    async fn agent_channels(&self, token: &AuthToken, statuses: &[ChannelStatus]) -> Result<Vec<Channel>, ChatError> {
        let (status, body) = self.send(Method::GET, &agent_channels_path(statuses), token, None).await?;
        decode_list(status, &body)
    }

    async fn agent_channel(&self, token: &AuthToken, channel_id: ChannelId) -> Result<ChannelDetail, ChatError> {
        let (status, body) = self.send(Method::GET, &agent_channel_path(channel_id), token, None).await?;
        decode_required(status, &body)
    }

    async fn assign_channel(&self, token: &AuthToken, channel_id: ChannelId) -> Result<Assignment, ChatError> {
        let path = agent_channel_action_path(channel_id, "assign");
        let (status, body) = self.send(Method::PATCH, &path, token, None).await?;
        decode_required(status, &body)
    }

    async fn mark_read(&self, token: &AuthToken, channel_id: ChannelId) -> Result<(), ChatError> {
        let path = agent_channel_action_path(channel_id, "read");
        let (status, body) = self.send(Method::PUT, &path, token, None).await?;
        decode_envelope::<serde_json::Value>(status, &body).map(|_| ())
    }

    async fn send_agent_message(
        &self,
        token: &AuthToken,
        channel_id: ChannelId,
        text: &str,
    ) -> Result<Message, ChatError> {
        let payload = serde_json::json!({ "message": text });
        let path = agent_channel_action_path(channel_id, "messages");
        let (status, body) = self.send(Method::POST, &path, token, Some(payload)).await?;
        decode_required(status, &body)
    }

    async fn close_channel(&self, token: &AuthToken, channel_id: ChannelId) -> Result<(), ChatError> {
        let path = agent_channel_action_path(channel_id, "close");
        let (status, body) = self.send(Method::POST, &path, token, None).await?;
        decode_envelope::<serde_json::Value>(status, &body).map(|_| ())
    }

    async fn channel_stats(&self, token: &AuthToken) -> Result<ChannelStats, ChatError> {
        let (status, body) = self.send(Method::GET, "/agent/channels/stats", token, None).await?;
        decode_required(status, &body)
    }
}
