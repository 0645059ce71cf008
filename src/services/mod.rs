//! Session services that drive chat state against the API.
//!
//! SYSTEM CONTEXT
//! ==============
//! `customer_session` and `agent_session` own the widget state and its poll
//! tasks, `poller` provides the cancellable timer loop both use, and
//! `alerts` is the injected notification capability.

pub mod agent_session;
pub mod alerts;
pub mod customer_session;
pub mod poller;
