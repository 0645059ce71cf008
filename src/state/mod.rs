//! Client-side chat state.
//!
//! SYSTEM CONTEXT
//! ==============
//! `auth` holds credentials and their on-disk copy, `customer` and `agent`
//! are the pure widget states, and `unread` derives unread counts from
//! per-channel watermarks.

pub mod agent;
pub mod auth;
pub mod customer;
pub mod unread;
