//! Session bootstrap: login, registration, logout.
//!
//! Input is validated locally first; an empty email or password never
//! reaches the server. A successful login yields an [`AuthContext`] that the
//! caller hands to the chat sessions.

#[cfg(test)]
#[path = "auth_test.rs"]
mod auth_test;

use reqwest::header::AUTHORIZATION;

use super::api::{build_http, decode_envelope, decode_required, transport_error};
use super::types::{LoginResponse, Role, UserProfile};
use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::state::auth::{AuthContext, AuthToken};

/// New-account form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
}

fn validate_login(email: &str, password: &str) -> Result<(), ChatError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(ChatError::Validation("Email and password are required.".to_owned()));
    }
    Ok(())
}

fn validate_registration(form: &Registration) -> Result<(), ChatError> {
    validate_login(&form.email, &form.password)?;
    if form.full_name.trim().is_empty() {
        return Err(ChatError::Validation("Full name is required.".to_owned()));
    }
    if !form.email.contains('@') {
        return Err(ChatError::Validation("Enter a valid email address.".to_owned()));
    }
    Ok(())
}

pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    /// # Errors
    ///
    /// Returns [`ChatError::HttpClientBuild`] if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ChatError> {
        Ok(Self { http: build_http(config.timeouts)?, base_url: config.api_base_url.clone() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /auth/login`.
    ///
    /// # Errors
    ///
    /// `Validation` for empty fields, `RateLimited` after too many failures,
    /// `Unreachable` when the server does not answer, `Api` otherwise.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthContext, ChatError> {
        validate_login(email, password)?;
        let payload = serde_json::json!({ "email": email.trim(), "password": password });
        let response = self
            .http
            .post(self.url("/auth/login"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| transport_error(&e))?;

        // A 401 here means bad credentials, not an expired session.
        if status == 401 {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(serde_json::Value::as_str).map(ToOwned::to_owned))
                .unwrap_or_else(|| "Invalid email or password".to_owned());
            return Err(ChatError::Api { status, message: Some(message) });
        }

        let login: LoginResponse = decode_required(status, &body)?;
        tracing::info!(user_id = login.user.id, role = ?login.user.role, "logged in");
        Ok(AuthContext::from(login))
    }

    /// `POST /auth/register`.
    ///
    /// # Errors
    ///
    /// `Validation` for incomplete forms; `Api` with the server's message otherwise.
    pub async fn register(&self, form: &Registration) -> Result<UserProfile, ChatError> {
        validate_registration(form)?;
        let payload = serde_json::json!({
            "email": form.email.trim(),
            "password": form.password,
            "full_name": form.full_name.trim(),
            "role": form.role,
        });
        let response = self
            .http
            .post(self.url("/auth/register"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| transport_error(&e))?;
        decode_required(status, &body)
    }

    /// `POST /auth/logout`; the server blacklists the token.
    ///
    /// # Errors
    ///
    /// Transport and status errors as for any API call.
    pub async fn logout(&self, token: &AuthToken) -> Result<(), ChatError> {
        let response = self
            .http
            .post(self.url("/auth/logout"))
            .header(AUTHORIZATION, token.bearer())
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| transport_error(&e))?;
        decode_envelope::<serde_json::Value>(status, &body).map(|_| ())
    }
}
