//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/notecal/config.toml` by default. Linked-account tokens are not
//! part of it; they live in the settings store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notecal_google::{CredentialStore, FlowConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Configuration for the notecal client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Authorization flow settings.
    pub auth: AuthSettings,

    /// Where credentials are stored.
    pub storage: StorageSettings,
}

/// Authorization flow settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Loopback port; must match the redirect URI registered with Google.
    pub port: u16,

    /// Seconds to wait for the browser redirect. 0 waits forever.
    pub callback_timeout_secs: u64,

    /// Timeout for token and calendar requests, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            port: FlowConfig::DEFAULT_PORT,
            callback_timeout_secs: FlowConfig::DEFAULT_CALLBACK_TIMEOUT_SECS,
            request_timeout_secs: FlowConfig::DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl AuthSettings {
    /// Converts to the flow configuration.
    pub fn flow_config(&self) -> FlowConfig {
        let callback_timeout = match self.callback_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        FlowConfig::default()
            .with_port(self.port)
            .with_callback_timeout(callback_timeout)
            .with_request_timeout(self.request_timeout())
    }

    /// Timeout for outgoing HTTP requests.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Credential storage settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path to the settings JSON file.
    pub settings_path: Option<PathBuf>,
}

impl ClientConfig {
    /// Loads configuration from the default path.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            ClientError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would only fail later, mid-flow.
    pub fn validate(&self) -> ClientResult<()> {
        self.auth
            .flow_config()
            .validate()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        if self.auth.request_timeout_secs == 0 {
            return Err(ClientError::Config(
                "auth.request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the settings JSON file.
    pub fn settings_path(&self) -> PathBuf {
        self.storage
            .settings_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("settings.json"))
    }

    /// Opens the credential store.
    pub fn open_store(&self) -> CredentialStore {
        CredentialStore::open(self.settings_path())
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notecal")
    }

    /// Returns the default data directory path.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notecal")
    }
}
