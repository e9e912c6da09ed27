//! Error types for the authorization flow and credential lifecycle.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// A specialized Result type for authorization operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors produced while acquiring, refreshing or persisting credentials.
///
/// Every variant is terminal for the attempt it belongs to; nothing in this
/// crate retries automatically.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Client identifier or secret missing, or the flow is misconfigured.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The loopback port could not be bound.
    #[error("failed to bind loopback listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    /// The redirect's state parameter did not match the attempt's correlator.
    #[error("state validation failed")]
    CsrfMismatch,

    /// The provider reported an authorization failure.
    #[error("authorization failed: {reason}")]
    Provider { reason: String },

    /// The redirect carried neither a code nor an error.
    #[error("no authorization code received")]
    MissingCode,

    /// The code-for-token exchange failed.
    #[error("token exchange failed: {message}")]
    Exchange { message: String },

    /// No redirect arrived before the callback timeout.
    #[error("timed out after {after:?} waiting for the authorization redirect")]
    Timeout { after: Duration },

    /// Another authorization attempt is still in progress.
    #[error("an authorization flow is already in progress")]
    FlowInProgress,

    /// The attempt was shut down before it completed.
    #[error("authorization flow was cancelled")]
    Cancelled,

    /// A silent token refresh failed.
    #[error("token refresh failed: {message}")]
    Refresh { message: String },

    /// The settings store could not be read or written.
    #[error("credential storage error: {message}")]
    Storage { message: String },
}

impl AuthError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a provider error carrying the provider's reason verbatim.
    pub fn provider(reason: impl Into<String>) -> Self {
        Self::Provider {
            reason: reason.into(),
        }
    }

    /// Creates an exchange error.
    pub fn exchange(message: impl Into<String>) -> Self {
        Self::Exchange {
            message: message.into(),
        }
    }

    /// Creates a refresh error.
    pub fn refresh(message: impl Into<String>) -> Self {
        Self::Refresh {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Returns a stable machine-readable name for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Bind { .. } => "bind_error",
            Self::CsrfMismatch => "csrf_mismatch",
            Self::Provider { .. } => "provider_error",
            Self::MissingCode => "missing_code",
            Self::Exchange { .. } => "exchange_error",
            Self::Timeout { .. } => "timeout",
            Self::FlowInProgress => "flow_in_progress",
            Self::Cancelled => "cancelled",
            Self::Refresh { .. } => "refresh_error",
            Self::Storage { .. } => "storage_error",
        }
    }

    /// Returns the provider's reason text for [`AuthError::Provider`].
    pub fn provider_reason(&self) -> Option<&str> {
        match self {
            Self::Provider { reason } => Some(reason),
            _ => None,
        }
    }
}
