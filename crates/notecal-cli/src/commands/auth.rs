//! Authentication commands.

use std::path::PathBuf;
use std::sync::Arc;

use notecal_google::{FlowCoordinator, OAuthCredentials};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Run the Google account linking flow.
///
/// Resolves client credentials from CLI flags, a `--credentials-file`, or
/// the settings store, stores them, then runs the browser flow and stores
/// the resulting tokens. Ctrl-C cancels the attempt and releases the port.
pub async fn google(
    client_id: Option<String>,
    client_secret: Option<String>,
    credentials_file: Option<PathBuf>,
    force: bool,
    config: &ClientConfig,
) -> ClientResult<()> {
    let store = config.open_store();
    let (credentials, source) = resolve_credentials(
        client_id,
        client_secret,
        credentials_file,
        store.client_credentials()?,
    )?;
    credentials.validate()?;

    if source == CredentialSource::Cli {
        store.set_client_credentials(&credentials).await?;
        println!("Client credentials saved to {}", config.settings_path().display());
    }

    if store.credentials()?.is_some() && !force {
        println!("A Google Calendar account is already linked.");
        println!("Use --force to link again.");
        return Ok(());
    }

    let coordinator = Arc::new(FlowCoordinator::new(config.auth.flow_config()));

    println!("Starting Google Calendar authorization...");
    println!();
    println!("A browser window will open for you to authorize access.");
    println!("If the browser doesn't open, check the terminal for a URL to copy.");
    println!();

    let interrupt = tokio::spawn({
        let coordinator = coordinator.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupted, shutting down authorization attempt");
                coordinator.shutdown();
            }
        }
    });
    let result = coordinator.start_flow(&credentials).await;
    interrupt.abort();

    let linked = result?;
    store.replace_credentials(&linked).await?;

    info!("Google account linked");
    println!("Authorization successful!");
    println!("Your tokens have been saved to {}", config.settings_path().display());

    Ok(())
}

/// Where the client credentials were resolved from.
#[derive(Debug, PartialEq)]
enum CredentialSource {
    /// From CLI flags (--client-id/--client-secret or --credentials-file)
    Cli,
    /// From the settings store (already persisted)
    Store,
}

/// Resolves client credentials from multiple sources.
///
/// Priority (highest to lowest):
/// 1. CLI `--client-id` + `--client-secret`
/// 2. CLI `--credentials-file` (Google Cloud Console JSON)
/// 3. Client credentials already in the settings store
fn resolve_credentials(
    cli_client_id: Option<String>,
    cli_client_secret: Option<String>,
    cli_credentials_file: Option<PathBuf>,
    stored: Option<OAuthCredentials>,
) -> ClientResult<(OAuthCredentials, CredentialSource)> {
    if let (Some(id), Some(secret)) = (&cli_client_id, &cli_client_secret) {
        return Ok((OAuthCredentials::new(id, secret), CredentialSource::Cli));
    }

    if let Some(ref path) = cli_credentials_file {
        let credentials = OAuthCredentials::from_file(path).map_err(|e| {
            ClientError::Config(format!(
                "failed to load credentials from {}: {}",
                path.display(),
                e
            ))
        })?;
        return Ok((credentials, CredentialSource::Cli));
    }

    if cli_client_id.is_some() || cli_client_secret.is_some() {
        return Err(ClientError::Config(
            "both --client-id and --client-secret are required when providing credentials directly"
                .to_string(),
        ));
    }

    if let Some(credentials) = stored {
        return Ok((credentials, CredentialSource::Store));
    }

    Err(ClientError::Config(
        "Google client credentials are required. Provide via:\n  \
         - --client-id and --client-secret flags\n  \
         - --credentials-file flag (path to Google Cloud Console JSON)\n  \
         - GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET env vars"
            .to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_credentials_from_cli() {
        let (credentials, source) = resolve_credentials(
            Some("cli-id.apps.googleusercontent.com".to_string()),
            Some("cli-secret".to_string()),
            None,
            None,
        )
        .unwrap();
        assert_eq!(credentials.client_id, "cli-id.apps.googleusercontent.com");
        assert_eq!(credentials.client_secret, "cli-secret");
        assert_eq!(source, CredentialSource::Cli);
    }

    #[test]
    fn resolve_credentials_from_store() {
        let stored = OAuthCredentials::new("stored-id", "stored-secret");
        let (credentials, source) =
            resolve_credentials(None, None, None, Some(stored.clone())).unwrap();
        assert_eq!(credentials, stored);
        assert_eq!(source, CredentialSource::Store);
    }

    #[test]
    fn resolve_credentials_cli_overrides_store() {
        let stored = OAuthCredentials::new("stored-id", "stored-secret");
        let (credentials, source) = resolve_credentials(
            Some("cli-id".to_string()),
            Some("cli-secret".to_string()),
            None,
            Some(stored),
        )
        .unwrap();
        assert_eq!(credentials.client_id, "cli-id");
        assert_eq!(source, CredentialSource::Cli);
    }

    #[test]
    fn resolve_credentials_partial_cli_fails() {
        let stored = OAuthCredentials::new("stored-id", "stored-secret");
        let result = resolve_credentials(Some("id".to_string()), None, None, Some(stored));
        assert!(result.is_err());

        let result = resolve_credentials(None, Some("secret".to_string()), None, None);
        assert!(result.is_err());
    }

    #[test]
    fn resolve_credentials_no_credentials_fails() {
        assert!(resolve_credentials(None, None, None, None).is_err());
    }

    #[test]
    fn resolve_credentials_from_cli_credentials_file() {
        let tmp = tempfile::tempdir().unwrap();
        let creds_path = tmp.path().join("creds.json");
        std::fs::write(
            &creds_path,
            r#"{
                "installed": {
                    "client_id": "file-id.apps.googleusercontent.com",
                    "client_secret": "file-secret"
                }
            }"#,
        )
        .unwrap();

        let (credentials, source) =
            resolve_credentials(None, None, Some(creds_path), None).unwrap();
        assert_eq!(credentials.client_id, "file-id.apps.googleusercontent.com");
        assert_eq!(credentials.client_secret, "file-secret");
        assert_eq!(source, CredentialSource::Cli);
    }

    #[test]
    fn unreadable_credentials_file_is_config_error() {
        let err = resolve_credentials(None, None, Some(PathBuf::from("/nonexistent.json")), None)
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
