//! Networking modules for the support chat HTTP API.
//!
//! SYSTEM CONTEXT
//! ==============
//! `api` handles the chat REST calls, `auth` bootstraps a session, and
//! `types` defines the shared wire schema.

pub mod api;
pub mod auth;
pub mod types;
