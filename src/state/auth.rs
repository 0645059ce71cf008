//! Auth-session state for the signed-in user.
//!
//! SYSTEM CONTEXT
//! ==============
//! Sessions receive an [`AuthContext`] from their host and pass its token into
//! every API call explicitly. Nothing installs a process-wide default header,
//! so two sessions with different users can run side by side.

#[cfg(test)]
#[path = "auth_test.rs"]
mod auth_test;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::net::types::{LoginResponse, Role, UserId, UserProfile};

pub const DEFAULT_SESSION_FILE: &str = "supportdesk-session.json";

/// Opaque bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

/// Token plus the identity it belongs to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    pub token: AuthToken,
    pub user: UserProfile,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl AuthContext {
    #[must_use]
    pub fn new(token: AuthToken, user: UserProfile) -> Self {
        Self { token, user, refresh_token: None }
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.user.role
    }

    #[must_use]
    pub fn is_agent(&self) -> bool {
        self.user.role == Role::Agent
    }
}

impl From<LoginResponse> for AuthContext {
    fn from(login: LoginResponse) -> Self {
        Self { token: AuthToken::new(login.access_token), user: login.user, refresh_token: login.refresh_token }
    }
}

/// JSON file holding the last login, so a terminal session survives restarts.
#[derive(Clone, Debug)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored session. A missing file means "signed out".
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Option<AuthContext>, ChatError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChatError::Config(format!("read {}: {e}", self.path.display()))),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ChatError::Config(format!("parse {}: {e}", self.path.display())))
    }

    /// Persist the session, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] if the file cannot be written.
    pub fn save(&self, auth: &AuthContext) -> Result<(), ChatError> {
        let rendered = serde_json::to_string_pretty(auth).map_err(|e| ChatError::Config(e.to_string()))?;
        std::fs::write(&self.path, rendered)
            .map_err(|e| ChatError::Config(format!("write {}: {e}", self.path.display())))
    }

    /// Forget the stored session. Clearing an absent file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<(), ChatError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ChatError::Config(format!("remove {}: {e}", self.path.display()))),
        }
    }
}
