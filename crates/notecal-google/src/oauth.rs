//! OAuth 2.0 authorization-code primitives for Google APIs.
//!
//! This module builds the consent URL and talks to the token endpoint. The
//! interactive part of the flow (listener, browser, state machine) lives in
//! [`crate::flow`].

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Duration, Utc};
use notecal_core::{CredentialSet, CredentialUpdate};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{FlowConfig, OAuthCredentials};
use crate::error::{AuthError, AuthResult};

/// Google authorization endpoint.
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Google token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Read-only access to the user's calendars.
pub const CALENDAR_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/calendar.readonly";

/// A boxed future for trait methods used through `dyn`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Parameters of the consent URL the user is sent to.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    auth_url: &'a str,
    client_id: &'a str,
    redirect_uri: &'a str,
    state: &'a str,
    code_challenge: &'a str,
    scope: &'a str,
}

impl<'a> AuthorizationRequest<'a> {
    /// Creates a request for the calendar read-only scope.
    pub fn new(
        auth_url: &'a str,
        client_id: &'a str,
        redirect_uri: &'a str,
        state: &'a str,
        code_challenge: &'a str,
    ) -> Self {
        Self {
            auth_url,
            client_id,
            redirect_uri,
            state,
            code_challenge,
            scope: CALENDAR_READONLY_SCOPE,
        }
    }

    /// Overrides the requested scope.
    pub fn with_scope(mut self, scope: &'a str) -> Self {
        self.scope = scope;
        self
    }

    /// Builds the full authorization URL.
    ///
    /// Offline access and forced consent make the provider return a
    /// refresh token on every link.
    pub fn url(&self) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&\
            access_type=offline&prompt=consent&state={}&\
            code_challenge={}&code_challenge_method=S256",
            self.auth_url,
            urlencoding::encode(self.client_id),
            urlencoding::encode(self.redirect_uri),
            urlencoding::encode(self.scope),
            urlencoding::encode(self.state),
            urlencoding::encode(self.code_challenge),
        )
    }
}

/// The provider's token endpoint.
pub trait TokenEndpoint: Send + Sync {
    /// Trades an authorization code for a full credential set.
    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        verifier: &'a str,
    ) -> BoxFuture<'a, AuthResult<CredentialSet>>;

    /// Mints a new access token from a refresh token.
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, AuthResult<CredentialUpdate>>;
}

/// Token endpoint client over HTTPS.
#[derive(Debug)]
pub struct OAuthClient {
    credentials: OAuthCredentials,
    token_url: String,
    redirect_uri: String,
    http_client: reqwest::Client,
}

impl OAuthClient {
    /// Creates a client for the given application credentials.
    pub fn new(credentials: OAuthCredentials, config: &FlowConfig) -> AuthResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            credentials,
            token_url: config.token_url.clone(),
            redirect_uri: config.redirect_uri(),
            http_client,
        })
    }

    async fn exchange(&self, code: &str, verifier: &str) -> AuthResult<CredentialSet> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("code_verifier", verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let token = self
            .post_form(&params)
            .await
            .map_err(|e| AuthError::exchange(e.to_string()))?;

        let expiry = token
            .expiry()
            .map_err(|e| AuthError::exchange(e.to_string()))?;

        info!(
            has_refresh_token = token.refresh_token.is_some(),
            "obtained tokens"
        );

        Ok(CredentialSet::new(
            token.access_token,
            token.refresh_token,
            expiry,
        ))
    }

    async fn refresh_access(&self, refresh_token: &str) -> AuthResult<CredentialUpdate> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let token = self
            .post_form(&params)
            .await
            .map_err(|e| AuthError::refresh(e.to_string()))?;

        let expiry = token
            .expiry()
            .map_err(|e| AuthError::refresh(e.to_string()))?;

        info!("refreshed access token");

        let update = CredentialUpdate::new(token.access_token, expiry);
        Ok(match token.refresh_token {
            Some(rotated) => update.with_refresh_token(rotated),
            None => update,
        })
    }

    async fn post_form(&self, params: &[(&str, &str)]) -> Result<TokenResponse, TokenRequestError> {
        debug!(url = %self.token_url, "posting to token endpoint");

        let response = self
            .http_client
            .post(&self.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| TokenRequestError(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TokenRequestError(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(TokenRequestError(format!("{status}: {body}")));
        }

        serde_json::from_str(&body)
            .map_err(|e| TokenRequestError(format!("invalid token response: {e}")))
    }
}

impl TokenEndpoint for OAuthClient {
    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        verifier: &'a str,
    ) -> BoxFuture<'a, AuthResult<CredentialSet>> {
        Box::pin(self.exchange(code, verifier))
    }

    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, AuthResult<CredentialUpdate>> {
        Box::pin(self.refresh_access(refresh_token))
    }
}

/// Transport or protocol failure, mapped by the caller.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct TokenRequestError(String);

/// Response from Google's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    /// Absolute expiry from `expires_in`; `None` when the lifetime is not given.
    fn expiry(&self) -> Result<Option<DateTime<Utc>>, TokenRequestError> {
        let Some(secs) = self.expires_in else {
            return Ok(None);
        };
        if secs < 0 {
            return Err(TokenRequestError(format!("negative expires_in: {secs}")));
        }
        Duration::try_seconds(secs)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .map(Some)
            .ok_or_else(|| TokenRequestError(format!("expires_in out of range: {secs}")))
    }
}
