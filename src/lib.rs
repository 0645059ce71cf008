//! Support chat client: the customer widget and agent inbox as testable
//! state machines with polling drivers.
//!
//! SYSTEM CONTEXT
//! ==============
//! `net` talks to the HTTP API, `state` holds pure per-view state,
//! `services` runs the sessions and their poll tasks, and `util` formats
//! values for display. The `supportdesk` binary is a terminal front end over
//! these pieces.

pub mod config;
pub mod error;
pub mod net;
pub mod services;
pub mod state;
pub mod util;

#[cfg(test)]
pub mod test_helpers;

pub use config::ClientConfig;
pub use error::ChatError;
