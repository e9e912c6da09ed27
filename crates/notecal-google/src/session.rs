//! Refreshing token session.
//!
//! A [`TokenSession`] owns the live credentials of a linked account and hands
//! out access tokens, refreshing them through the token endpoint when they are
//! about to expire. Every refresh is reported to the registered
//! [`RefreshHook`]s before the new token is returned, which is how refreshed
//! credentials reach durable storage.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Duration;
use notecal_core::{CredentialSet, CredentialUpdate};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AuthError, AuthResult};
use crate::oauth::{BoxFuture, TokenEndpoint};

/// Receives credential updates produced by silent refreshes.
pub trait RefreshHook: Send + Sync {
    /// Called once per refresh, before the refreshed token is handed out.
    fn credentials_refreshed<'a>(
        &'a self,
        update: &'a CredentialUpdate,
    ) -> BoxFuture<'a, AuthResult<()>>;
}

/// Live credentials with silent refresh.
pub struct TokenSession {
    endpoint: Arc<dyn TokenEndpoint>,
    credentials: Mutex<CredentialSet>,
    hooks: RwLock<Vec<Arc<dyn RefreshHook>>>,
    skew: Duration,
}

impl fmt::Debug for TokenSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSession")
            .field("skew", &self.skew)
            .finish_non_exhaustive()
    }
}

impl TokenSession {
    /// Refresh this long before the recorded expiry.
    pub const DEFAULT_SKEW_SECS: i64 = 60;

    /// Creates a session over an already linked credential set.
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, credentials: CredentialSet) -> Self {
        Self {
            endpoint,
            credentials: Mutex::new(credentials),
            hooks: RwLock::new(Vec::new()),
            skew: Duration::seconds(Self::DEFAULT_SKEW_SECS),
        }
    }

    /// Sets how early before expiry a refresh happens.
    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    /// Registers a hook invoked after every refresh.
    pub fn add_refresh_hook(&self, hook: Arc<dyn RefreshHook>) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    /// Returns a snapshot of the current credentials.
    pub async fn credentials(&self) -> CredentialSet {
        self.credentials.lock().await.clone()
    }

    /// Returns a usable access token, refreshing first if needed.
    ///
    /// Concurrent callers wait for a single in-flight refresh.
    pub async fn access_token(&self) -> AuthResult<String> {
        let mut current = self.credentials.lock().await;
        if current.is_expired_within(self.skew) {
            debug!("access token expired or about to expire");
            self.refresh_locked(&mut current).await?;
        }
        Ok(current.access_token.clone())
    }

    /// Refreshes unconditionally and returns the new access token.
    pub async fn force_refresh(&self) -> AuthResult<String> {
        let mut current = self.credentials.lock().await;
        self.refresh_locked(&mut current).await?;
        Ok(current.access_token.clone())
    }

    async fn refresh_locked(&self, current: &mut CredentialSet) -> AuthResult<()> {
        let Some(refresh_token) = current.refresh_token.clone() else {
            return Err(AuthError::refresh(
                "no refresh token available, the account must be linked again",
            ));
        };

        let update = self.endpoint.refresh(&refresh_token).await?;
        current.merge(&update);
        info!(expiry = ?current.expiry, "access token refreshed");

        let hooks = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            if let Err(e) = hook.credentials_refreshed(&update).await {
                warn!(error = %e, "refresh hook failed");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingEndpoint {
        refreshes: AtomicUsize,
    }

    impl TokenEndpoint for CountingEndpoint {
        fn exchange_code<'a>(
            &'a self,
            _code: &'a str,
            _verifier: &'a str,
        ) -> BoxFuture<'a, AuthResult<CredentialSet>> {
            Box::pin(async { Err(AuthError::exchange("not used")) })
        }

        fn refresh<'a>(
            &'a self,
            refresh_token: &'a str,
        ) -> BoxFuture<'a, AuthResult<CredentialUpdate>> {
            Box::pin(async move {
                let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                assert_eq!(refresh_token, "r1");
                Ok(CredentialUpdate::new(
                    format!("a{}", n + 1),
                    Some(Utc::now() + Duration::hours(1)),
                ))
            })
        }
    }

    #[derive(Default)]
    struct RecordingHook {
        updates: std::sync::Mutex<Vec<CredentialUpdate>>,
        fail: bool,
    }

    impl RefreshHook for RecordingHook {
        fn credentials_refreshed<'a>(
            &'a self,
            update: &'a CredentialUpdate,
        ) -> BoxFuture<'a, AuthResult<()>> {
            Box::pin(async move {
                self.updates.lock().unwrap().push(update.clone());
                if self.fail {
                    Err(AuthError::storage("disk full"))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn expired() -> CredentialSet {
        CredentialSet::new(
            "a1",
            Some("r1".to_string()),
            Some(Utc::now() - Duration::minutes(5)),
        )
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refresh() {
        let endpoint = Arc::new(CountingEndpoint::default());
        let set = CredentialSet::new("a1", Some("r1".into()), Some(Utc::now() + Duration::hours(1)));
        let session = TokenSession::new(endpoint.clone(), set);

        assert_eq!(session.access_token().await.unwrap(), "a1");
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn token_inside_skew_is_refreshed() {
        let endpoint = Arc::new(CountingEndpoint::default());
        let set = CredentialSet::new("a1", Some("r1".into()), Some(Utc::now() + Duration::seconds(30)));
        let session = TokenSession::new(endpoint.clone(), set);

        assert_eq!(session.access_token().await.unwrap(), "a2");
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_invokes_hooks_and_keeps_refresh_token() {
        let endpoint = Arc::new(CountingEndpoint::default());
        let hook = Arc::new(RecordingHook::default());
        let session = TokenSession::new(endpoint, expired());
        session.add_refresh_hook(hook.clone());

        assert_eq!(session.access_token().await.unwrap(), "a2");

        let updates = hook.updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].access_token, "a2");
        assert!(updates[0].refresh_token.is_none());

        let current = session.credentials().await;
        assert_eq!(current.refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let endpoint = Arc::new(CountingEndpoint::default());
        let session = Arc::new(TokenSession::new(endpoint.clone(), expired()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.access_token().await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "a2");
        }

        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_refresh_token_is_a_refresh_error() {
        let endpoint = Arc::new(CountingEndpoint::default());
        let set = CredentialSet::new("a1", None, Some(Utc::now() - Duration::minutes(1)));
        let session = TokenSession::new(endpoint.clone(), set);

        let err = session.access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Refresh { .. }));
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_hook_does_not_fail_the_query() {
        let endpoint = Arc::new(CountingEndpoint::default());
        let hook = Arc::new(RecordingHook {
            fail: true,
            ..Default::default()
        });
        let session = TokenSession::new(endpoint, expired());
        session.add_refresh_hook(hook.clone());

        assert_eq!(session.access_token().await.unwrap(), "a2");
        assert_eq!(hook.updates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn force_refresh_ignores_expiry() {
        let endpoint = Arc::new(CountingEndpoint::default());
        let set = CredentialSet::new("a1", Some("r1".into()), Some(Utc::now() + Duration::hours(1)));
        let session = TokenSession::new(endpoint.clone(), set);

        assert_eq!(session.force_refresh().await.unwrap(), "a2");
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);
    }
}
