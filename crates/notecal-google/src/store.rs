//! Durable credential store.
//!
//! Settings are kept as one flat JSON object with camelCase keys. Token
//! fields use empty strings and a zero expiry for "absent", and keys this
//! crate does not know about are carried through unchanged.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex as StdMutex, PoisonError};

use chrono::DateTime;
use notecal_core::{CredentialSet, CredentialUpdate};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::OAuthCredentials;
use crate::error::{AuthError, AuthResult};
use crate::oauth::BoxFuture;
use crate::session::RefreshHook;

/// The persisted settings document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredSettings {
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    /// Empty when no refresh token was ever issued.
    pub refresh_token: String,
    /// Epoch milliseconds, 0 when unknown.
    pub token_expiry: i64,
    /// Keys owned by other parts of the application.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StoredSettings {
    /// The stored credential set, if an account is linked.
    pub fn credentials(&self) -> Option<CredentialSet> {
        if self.access_token.is_empty() {
            return None;
        }
        let refresh_token = Some(self.refresh_token.clone()).filter(|t| !t.is_empty());
        let expiry = match self.token_expiry {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        };
        Some(CredentialSet::new(
            self.access_token.clone(),
            refresh_token,
            expiry,
        ))
    }

    /// Replaces all token fields with `set`.
    pub fn apply_credentials(&mut self, set: &CredentialSet) {
        self.access_token = set.access_token.clone();
        self.refresh_token = set.refresh_token.clone().unwrap_or_default();
        self.token_expiry = set.expiry.map_or(0, |e| e.timestamp_millis());
    }

    /// Applies a refresh result; the refresh token is only replaced if present.
    pub fn apply_update(&mut self, update: &CredentialUpdate) {
        self.access_token = update.access_token.clone();
        self.token_expiry = update.expiry.map_or(0, |e| e.timestamp_millis());
        if let Some(refresh_token) = &update.refresh_token {
            self.refresh_token = refresh_token.clone();
        }
    }

    /// Forgets the linked account, keeping client credentials.
    pub fn clear_tokens(&mut self) {
        self.access_token.clear();
        self.refresh_token.clear();
        self.token_expiry = 0;
    }

    /// The stored client credentials, if both halves are set.
    pub fn client_credentials(&self) -> Option<OAuthCredentials> {
        if self.client_id.trim().is_empty() || self.client_secret.trim().is_empty() {
            return None;
        }
        Some(OAuthCredentials::new(
            self.client_id.clone(),
            self.client_secret.clone(),
        ))
    }
}

/// Where settings are loaded from and saved to.
pub trait SettingsBackend: Send + Sync {
    /// Loads the settings; a missing document yields the defaults.
    fn load(&self) -> AuthResult<StoredSettings>;

    /// Saves the full settings document.
    fn save(&self, settings: &StoredSettings) -> AuthResult<()>;
}

/// Settings stored in a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    /// Creates a backend for the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The settings file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsBackend for JsonFileBackend {
    fn load(&self) -> AuthResult<StoredSettings> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no settings file");
            return Ok(StoredSettings::default());
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| AuthError::storage(format!("failed to read settings file: {e}")))?;

        serde_json::from_str(&content)
            .map_err(|e| AuthError::storage(format!("failed to parse settings file: {e}")))
    }

    fn save(&self, settings: &StoredSettings) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AuthError::storage(format!("failed to create settings directory: {e}"))
            })?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| AuthError::storage(format!("failed to serialize settings: {e}")))?;

        fs::write(&temp_path, content)
            .map_err(|e| AuthError::storage(format!("failed to write settings file: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600));
        }

        fs::rename(&temp_path, &self.path)
            .map_err(|e| AuthError::storage(format!("failed to rename settings file: {e}")))?;

        debug!(path = %self.path.display(), "saved settings");
        Ok(())
    }
}

/// Settings held in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    settings: StdMutex<StoredSettings>,
}

impl MemoryBackend {
    /// Creates a backend seeded with `settings`.
    pub fn new(settings: StoredSettings) -> Self {
        Self {
            settings: StdMutex::new(settings),
        }
    }

    /// A copy of what is currently stored.
    pub fn snapshot(&self) -> StoredSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SettingsBackend for MemoryBackend {
    fn load(&self) -> AuthResult<StoredSettings> {
        Ok(self.snapshot())
    }

    fn save(&self, settings: &StoredSettings) -> AuthResult<()> {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        Ok(())
    }
}

/// Credential persistence with serialized read-modify-write cycles.
pub struct CredentialStore {
    backend: Box<dyn SettingsBackend>,
    write_lock: Mutex<()>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Creates a store over `backend`.
    pub fn new(backend: impl SettingsBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a store backed by the JSON file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(JsonFileBackend::new(path))
    }

    /// Loads the whole settings document.
    pub fn settings(&self) -> AuthResult<StoredSettings> {
        self.backend.load()
    }

    /// The linked account's credentials, if any.
    pub fn credentials(&self) -> AuthResult<Option<CredentialSet>> {
        Ok(self.backend.load()?.credentials())
    }

    /// The stored client credentials, if any.
    pub fn client_credentials(&self) -> AuthResult<Option<OAuthCredentials>> {
        Ok(self.backend.load()?.client_credentials())
    }

    /// Stores the client credentials.
    pub async fn set_client_credentials(&self, credentials: &OAuthCredentials) -> AuthResult<()> {
        self.modify(|settings| {
            settings.client_id = credentials.client_id.clone();
            settings.client_secret = credentials.client_secret.clone();
        })
        .await
    }

    /// Stores a freshly linked credential set, replacing all token fields.
    pub async fn replace_credentials(&self, set: &CredentialSet) -> AuthResult<()> {
        self.modify(|settings| settings.apply_credentials(set)).await?;
        info!("stored new credentials");
        Ok(())
    }

    /// Merges a refresh result into the stored credentials.
    pub async fn merge_update(&self, update: &CredentialUpdate) -> AuthResult<()> {
        self.modify(|settings| settings.apply_update(update)).await?;
        debug!("persisted refreshed credentials");
        Ok(())
    }

    /// Removes the linked account's tokens.
    pub async fn clear_credentials(&self) -> AuthResult<()> {
        self.modify(StoredSettings::clear_tokens).await?;
        info!("cleared stored tokens");
        Ok(())
    }

    async fn modify<F>(&self, change: F) -> AuthResult<()>
    where
        F: FnOnce(&mut StoredSettings),
    {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.backend.load()?;
        change(&mut settings);
        self.backend.save(&settings)
    }
}

impl RefreshHook for CredentialStore {
    fn credentials_refreshed<'a>(
        &'a self,
        update: &'a CredentialUpdate,
    ) -> BoxFuture<'a, AuthResult<()>> {
        Box::pin(self.merge_update(update))
    }
}
