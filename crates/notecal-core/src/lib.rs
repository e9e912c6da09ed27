//! Core types: credentials, escaping, tracing

pub mod credentials;
pub mod html;
pub mod tracing;

pub use credentials::{CredentialSet, CredentialUpdate};
pub use html::html_escape;
pub use tracing::{init_tracing, TracingConfig, TracingError, TracingOutputFormat};
