//! Client credentials and flow configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AuthError, AuthResult};
use crate::oauth::{GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL};

/// OAuth 2.0 client credentials registered with Google Cloud Console.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    /// The OAuth 2.0 client ID.
    pub client_id: String,
    /// The OAuth 2.0 client secret.
    pub client_secret: String,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Shape of the credentials JSON downloaded from Google Cloud Console.
///
/// Either an `installed`/`web` section or a flat object.
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: Option<SectionCredentials>,
    web: Option<SectionCredentials>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SectionCredentials {
    client_id: String,
    client_secret: String,
}

impl OAuthCredentials {
    /// Creates new OAuth credentials.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Loads credentials from a Google Cloud Console JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> AuthResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuthError::configuration(format!(
                "failed to read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parses credentials from a Google Cloud Console JSON string.
    pub fn from_json(json: &str) -> AuthResult<Self> {
        let file: CredentialsFile = serde_json::from_str(json).map_err(|e| {
            AuthError::configuration(format!("failed to parse credentials JSON: {}", e))
        })?;

        if let Some(section) = file.installed.or(file.web) {
            return Ok(Self::new(section.client_id, section.client_secret));
        }

        match (file.client_id, file.client_secret) {
            (Some(id), Some(secret)) => Ok(Self::new(id, secret)),
            _ => Err(AuthError::configuration(
                "credentials file must contain an 'installed'/'web' section or 'client_id'/'client_secret'",
            )),
        }
    }

    /// Checks that both values are present.
    pub fn validate(&self) -> AuthResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::configuration("client ID is required"));
        }
        if self.client_secret.trim().is_empty() {
            return Err(AuthError::configuration("client secret is required"));
        }
        Ok(())
    }
}

/// Configuration for the loopback authorization flow.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Fixed local port the redirect listener binds.
    pub port: u16,

    /// Path the provider redirects to.
    pub callback_path: String,

    /// Host name placed in the registered redirect URI.
    pub redirect_host: String,

    /// Timeout for requests to the token endpoint.
    pub request_timeout: Duration,

    /// How long to wait for the browser redirect. `None` waits forever.
    pub callback_timeout: Option<Duration>,

    /// Authorization endpoint.
    pub auth_url: String,

    /// Token endpoint.
    pub token_url: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            port: Self::DEFAULT_PORT,
            callback_path: Self::DEFAULT_CALLBACK_PATH.to_string(),
            redirect_host: "localhost".to_string(),
            request_timeout: Duration::from_secs(Self::DEFAULT_REQUEST_TIMEOUT_SECS),
            callback_timeout: Some(Duration::from_secs(Self::DEFAULT_CALLBACK_TIMEOUT_SECS)),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }
}

impl FlowConfig {
    /// Default loopback port.
    pub const DEFAULT_PORT: u16 = 8080;

    /// Default callback path.
    pub const DEFAULT_CALLBACK_PATH: &'static str = "/callback";

    /// Default token endpoint timeout in seconds.
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

    /// Default wait for the redirect, in seconds.
    pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 300;

    /// Sets the loopback port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the redirect wait.
    pub fn with_callback_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Sets the token endpoint timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Overrides the provider endpoints.
    pub fn with_endpoints(mut self, auth_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self.token_url = token_url.into();
        self
    }

    /// The redirect URI registered with the provider.
    pub fn redirect_uri(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.redirect_host, self.port, self.callback_path
        )
    }

    /// Validates the configuration.
    pub fn validate(&self) -> AuthResult<()> {
        if self.port == 0 {
            return Err(AuthError::configuration("loopback port must be fixed and non-zero"));
        }
        if !self.callback_path.starts_with('/') {
            return Err(AuthError::configuration("callback path must start with '/'"));
        }
        if self.callback_timeout.is_some_and(|t| t.is_zero()) {
            return Err(AuthError::configuration("callback timeout must be positive"));
        }
        Ok(())
    }
}
