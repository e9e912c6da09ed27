//! Google account linking for notecal.
//!
//! This crate runs the installed-app OAuth 2.0 flow against Google: a
//! loopback listener on a fixed local port receives the browser redirect,
//! a per-attempt correlator guards it against forgery, and the resulting
//! credentials are stored and refreshed silently afterwards.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use notecal_google::{CredentialStore, FlowConfig, FlowCoordinator, OAuthCredentials};
//!
//! # async fn link() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(CredentialStore::open("/tmp/settings.json"));
//! let client = OAuthCredentials::new("id.apps.googleusercontent.com", "secret");
//! store.set_client_credentials(&client).await?;
//!
//! let coordinator = FlowCoordinator::new(FlowConfig::default());
//! let linked = coordinator.start_flow(&client).await?;
//! store.replace_credentials(&linked).await?;
//!
//! let session = coordinator.connect_session(linked, store)?;
//! let token = session.access_token().await?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod calendar;
pub mod config;
pub mod correlator;
pub mod error;
pub mod flow;
pub mod listener;
pub mod oauth;
pub mod page;
pub mod session;
pub mod store;

pub use browser::{SystemBrowser, UrlLauncher};
pub use calendar::{CalendarClient, CalendarError, CalendarEvent, CalendarResult, EventTime};
pub use config::{FlowConfig, OAuthCredentials};
pub use correlator::{Correlator, PkcePair};
pub use error::{AuthError, AuthResult};
pub use flow::{AttemptState, FlowCoordinator};
pub use listener::{CallbackParams, LoopbackListener};
pub use oauth::{AuthorizationRequest, BoxFuture, OAuthClient, TokenEndpoint};
pub use session::{RefreshHook, TokenSession};
pub use store::{CredentialStore, JsonFileBackend, MemoryBackend, SettingsBackend, StoredSettings};
