//! Flow coordinator for linking an account.
//!
//! One call to [`FlowCoordinator::start_flow`] runs one authorization attempt
//! end to end:
//!
//! 1. Bind the loopback listener on the configured fixed port
//! 2. Generate a fresh correlator and PKCE pair
//! 3. Send the user's browser to the consent page
//! 4. Wait for the redirect, validate it and answer the browser
//! 5. Exchange the code for a credential set
//!
//! At most one attempt runs at a time; a second caller is turned away with
//! [`AuthError::FlowInProgress`] instead of queueing or replacing the first.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use notecal_core::CredentialSet;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::browser::{SystemBrowser, UrlLauncher};
use crate::config::{FlowConfig, OAuthCredentials};
use crate::correlator::{Correlator, PkcePair};
use crate::error::{AuthError, AuthResult};
use crate::listener::{CallbackParams, LoopbackListener};
use crate::oauth::{AuthorizationRequest, OAuthClient, TokenEndpoint};
use crate::session::TokenSession;
use crate::store::CredentialStore;

/// Lifecycle of the current (or most recent) attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttemptState {
    /// No attempt has run yet.
    #[default]
    Idle,
    /// Listener bound, waiting for the browser redirect.
    AwaitingRedirect,
    /// Code received, talking to the token endpoint.
    Exchanging,
    /// A credential set was obtained.
    Succeeded,
    /// The attempt ended with an error or was shut down.
    Failed,
}

impl AttemptState {
    /// Returns true once the attempt can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

type EndpointFactory =
    dyn Fn(&OAuthCredentials, &FlowConfig) -> AuthResult<Arc<dyn TokenEndpoint>> + Send + Sync;

#[derive(Debug)]
struct ActiveAttempt {
    generation: u64,
    cancel: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct Slot {
    active: Option<ActiveAttempt>,
    state: AttemptState,
}

/// Runs authorization attempts and hands out refreshing sessions.
pub struct FlowCoordinator {
    config: FlowConfig,
    launcher: Arc<dyn UrlLauncher>,
    endpoint_factory: Box<EndpointFactory>,
    slot: Mutex<Slot>,
    next_generation: AtomicU64,
}

impl fmt::Debug for FlowCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowCoordinator")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl FlowCoordinator {
    /// Creates a coordinator using the system browser and Google's token endpoint.
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            launcher: Arc::new(SystemBrowser),
            endpoint_factory: Box::new(|credentials: &OAuthCredentials, config: &FlowConfig| {
                let client = OAuthClient::new(credentials.clone(), config)?;
                Ok(Arc::new(client) as Arc<dyn TokenEndpoint>)
            }),
            slot: Mutex::new(Slot::default()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Replaces the browser launcher.
    pub fn with_launcher(mut self, launcher: Arc<dyn UrlLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Replaces how token endpoints are built from client credentials.
    pub fn with_endpoint_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&OAuthCredentials, &FlowConfig) -> AuthResult<Arc<dyn TokenEndpoint>>
            + Send
            + Sync
            + 'static,
    {
        self.endpoint_factory = Box::new(factory);
        self
    }

    /// Uses one token endpoint for every attempt and session.
    pub fn with_token_endpoint(self, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        self.with_endpoint_factory(move |_, _| Ok(endpoint.clone()))
    }

    /// The flow configuration.
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// State of the current or most recent attempt.
    pub fn state(&self) -> AttemptState {
        self.lock_slot().state
    }

    /// Returns true while an attempt is running.
    pub fn is_active(&self) -> bool {
        self.lock_slot().active.is_some()
    }

    /// Runs one authorization attempt and returns the linked credentials.
    ///
    /// The returned set is not persisted here; callers store it.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Configuration`] for missing client credentials
    /// - [`AuthError::FlowInProgress`] if another attempt is running
    /// - [`AuthError::Bind`] if the loopback port is taken
    /// - [`AuthError::CsrfMismatch`], [`AuthError::Provider`] or
    ///   [`AuthError::MissingCode`] for a rejected redirect
    /// - [`AuthError::Exchange`] if the token endpoint refuses the code
    /// - [`AuthError::Timeout`] or [`AuthError::Cancelled`]
    pub async fn start_flow(&self, credentials: &OAuthCredentials) -> AuthResult<CredentialSet> {
        credentials.validate()?;
        self.config.validate()?;

        let (mut admission, cancel) = self.admit()?;
        let generation = admission.generation;

        let result = self.run_attempt(credentials, generation, cancel).await;
        match &result {
            Ok(_) => {
                admission.outcome = AttemptState::Succeeded;
                info!(generation, "authorization succeeded");
            }
            Err(e) => warn!(generation, error = %e, "authorization failed"),
        }
        result
    }

    /// Cancels the running attempt, if any.
    ///
    /// The attempt's listener is closed and its caller receives
    /// [`AuthError::Cancelled`]. Returns false when nothing was running.
    pub fn shutdown(&self) -> bool {
        let mut slot = self.lock_slot();
        let Some(active) = slot.active.take() else {
            return false;
        };
        let _ = active.cancel.send(true);
        slot.state = AttemptState::Failed;
        info!(generation = active.generation, "authorization attempt shut down");
        true
    }

    /// Builds a refreshing session for linked credentials.
    ///
    /// The store is registered as the session's refresh hook, so every
    /// silent refresh is persisted before the new token is used.
    pub fn connect_session(
        &self,
        credentials: CredentialSet,
        store: Arc<CredentialStore>,
    ) -> AuthResult<Arc<TokenSession>> {
        let client = store
            .client_credentials()?
            .ok_or_else(|| AuthError::configuration("client ID and client secret are not set"))?;
        let endpoint = (self.endpoint_factory)(&client, &self.config)?;

        let session = Arc::new(TokenSession::new(endpoint, credentials));
        session.add_refresh_hook(store);
        Ok(session)
    }

    async fn run_attempt(
        &self,
        credentials: &OAuthCredentials,
        generation: u64,
        mut cancel: watch::Receiver<bool>,
    ) -> AuthResult<CredentialSet> {
        let endpoint = (self.endpoint_factory)(credentials, &self.config)?;
        let listener =
            LoopbackListener::bind(self.config.port, self.config.callback_path.clone()).await?;

        let correlator = Correlator::generate();
        let pkce = PkcePair::generate();
        let redirect_uri = self.config.redirect_uri();
        let auth_url = AuthorizationRequest::new(
            &self.config.auth_url,
            &credentials.client_id,
            &redirect_uri,
            correlator.as_str(),
            pkce.challenge(),
        )
        .url();

        self.set_state(generation, AttemptState::AwaitingRedirect);
        info!(generation, port = self.config.port, "waiting for authorization redirect");

        if let Err(e) = self.launcher.launch(&auth_url) {
            warn!(error = %e, "browser launch failed, the user must open the URL manually");
        }

        let callback = listener.accept_callback(|params| validate_callback(&correlator, params));
        let limit = self.config.callback_timeout;
        let deadline = async {
            match limit {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending().await,
            }
        };

        let code = tokio::select! {
            result = callback => result?,
            _ = cancelled(&mut cancel) => return Err(AuthError::Cancelled),
            _ = deadline => {
                return Err(AuthError::Timeout {
                    after: limit.unwrap_or_default(),
                });
            }
        };

        self.set_state(generation, AttemptState::Exchanging);
        info!(generation, "received authorization code, exchanging for tokens");

        let linked = endpoint.exchange_code(&code, pkce.verifier()).await?;

        if !self.is_current(generation) {
            debug!(generation, "discarding result of a superseded attempt");
            return Err(AuthError::Cancelled);
        }
        Ok(linked)
    }

    fn admit(&self) -> AuthResult<(Admission<'_>, watch::Receiver<bool>)> {
        let mut slot = self.lock_slot();
        if slot.active.is_some() {
            return Err(AuthError::FlowInProgress);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (cancel, receiver) = watch::channel(false);
        slot.active = Some(ActiveAttempt { generation, cancel });
        slot.state = AttemptState::Idle;
        debug!(generation, "authorization attempt admitted");

        Ok((
            Admission {
                coordinator: self,
                generation,
                outcome: AttemptState::Failed,
            },
            receiver,
        ))
    }

    fn release(&self, generation: u64, outcome: AttemptState) {
        let mut slot = self.lock_slot();
        if slot.active.as_ref().is_some_and(|a| a.generation == generation) {
            slot.active = None;
            slot.state = outcome;
        }
    }

    fn set_state(&self, generation: u64, state: AttemptState) {
        let mut slot = self.lock_slot();
        if slot.active.as_ref().is_some_and(|a| a.generation == generation) {
            slot.state = state;
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_slot()
            .active
            .as_ref()
            .is_some_and(|a| a.generation == generation)
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FlowCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Holds the coordinator's single slot for one attempt.
///
/// Dropping it frees the slot, including when the attempt's future is
/// dropped mid-flight.
struct Admission<'a> {
    coordinator: &'a FlowCoordinator,
    generation: u64,
    outcome: AttemptState,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.coordinator.release(self.generation, self.outcome);
    }
}

async fn cancelled(receiver: &mut watch::Receiver<bool>) {
    loop {
        if *receiver.borrow_and_update() {
            return;
        }
        if receiver.changed().await.is_err() {
            return;
        }
    }
}

/// Checks a redirect against the attempt's correlator.
///
/// The state is checked first, so a forged redirect can neither report an
/// error nor deliver a code.
pub(crate) fn validate_callback(
    correlator: &Correlator,
    params: &CallbackParams,
) -> AuthResult<String> {
    match params.state.as_deref() {
        Some(state) if correlator.matches(state) => {}
        _ => {
            warn!("redirect state did not match the attempt");
            return Err(AuthError::CsrfMismatch);
        }
    }

    if let Some(error) = &params.error {
        return Err(AuthError::provider(error.clone()));
    }

    params.code.clone().ok_or(AuthError::MissingCode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(code: Option<&str>, state: Option<&str>, error: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(String::from),
            state: state.map(String::from),
            error: error.map(String::from),
        }
    }

    #[test]
    fn state_is_checked_before_error_and_code() {
        let correlator = Correlator::generate();

        let forged = params(Some("code"), Some("forged"), Some("access_denied"));
        assert!(matches!(
            validate_callback(&correlator, &forged),
            Err(AuthError::CsrfMismatch)
        ));

        let missing = params(Some("code"), None, None);
        assert!(matches!(
            validate_callback(&correlator, &missing),
            Err(AuthError::CsrfMismatch)
        ));
    }

    #[test]
    fn provider_error_wins_over_code() {
        let correlator = Correlator::generate();
        let denied = params(Some("code"), Some(correlator.as_str()), Some("access_denied"));

        let err = validate_callback(&correlator, &denied).unwrap_err();
        assert_eq!(err.provider_reason(), Some("access_denied"));
    }

    #[test]
    fn code_or_missing_code() {
        let correlator = Correlator::generate();

        let ok = params(Some("4/abc"), Some(correlator.as_str()), None);
        assert_eq!(validate_callback(&correlator, &ok).unwrap(), "4/abc");

        let empty = params(None, Some(correlator.as_str()), None);
        assert!(matches!(
            validate_callback(&correlator, &empty),
            Err(AuthError::MissingCode)
        ));
    }

    #[test]
    fn idle_coordinator() {
        let coordinator = FlowCoordinator::new(FlowConfig::default());
        assert_eq!(coordinator.state(), AttemptState::Idle);
        assert!(!coordinator.is_active());
        assert!(!coordinator.shutdown());
    }

    #[tokio::test]
    async fn missing_client_credentials_fail_before_admission() {
        let coordinator = FlowCoordinator::new(FlowConfig::default());
        let err = coordinator
            .start_flow(&OAuthCredentials::new("", "secret"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Configuration { .. }));
        assert_eq!(coordinator.state(), AttemptState::Idle);
    }

    #[tokio::test]
    async fn connect_session_requires_stored_client_credentials() {
        use crate::store::MemoryBackend;

        let coordinator = FlowCoordinator::new(FlowConfig::default());
        let store = Arc::new(CredentialStore::new(MemoryBackend::default()));
        let set = CredentialSet::new("a1", Some("r1".into()), None);

        let err = coordinator.connect_session(set.clone(), store.clone()).unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));

        store
            .set_client_credentials(&OAuthCredentials::new("id", "secret"))
            .await
            .unwrap();
        let session = coordinator.connect_session(set.clone(), store).unwrap();
        assert_eq!(session.credentials().await, set);
    }

    #[test]
    fn terminal_states() {
        assert!(AttemptState::Succeeded.is_terminal());
        assert!(AttemptState::Failed.is_terminal());
        assert!(!AttemptState::AwaitingRedirect.is_terminal());
    }
}
