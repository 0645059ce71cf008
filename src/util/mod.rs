//! Presentation helpers shared by the terminal views.

pub mod format;
