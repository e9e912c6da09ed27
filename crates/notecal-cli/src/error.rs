//! Client error types.

use std::fmt;

use notecal_google::{AuthError, CalendarError};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration error.
    Config(String),
    /// Linking, refreshing or storing credentials failed.
    Auth(AuthError),
    /// A calendar query failed.
    Calendar(CalendarError),
    /// No linked account.
    AuthRequired(String),
    /// IO error.
    Io(std::io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Auth(err) => write!(f, "{}", err),
            Self::Calendar(err) => write!(f, "{}", err),
            Self::AuthRequired(msg) => write!(f, "authentication required: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Auth(err) => Some(err),
            Self::Calendar(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<AuthError> for ClientError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<CalendarError> for ClientError {
    fn from(err: CalendarError) -> Self {
        match err {
            CalendarError::Auth(err) => Self::Auth(err),
            other => Self::Calendar(other),
        }
    }
}
