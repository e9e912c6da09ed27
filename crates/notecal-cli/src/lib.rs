//! notecal command-line interface.
//!
//! Links a Google Calendar account through the browser and lists the
//! account's events for a day.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
