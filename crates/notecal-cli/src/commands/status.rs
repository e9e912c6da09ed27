//! Linked-account status.

use chrono::{DateTime, Local, Utc};
use notecal_google::{CalendarClient, FlowCoordinator, StoredSettings};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Prints whether an account is linked and, with `check`, verifies access.
pub async fn run(check: bool, config: &ClientConfig) -> ClientResult<()> {
    let store = std::sync::Arc::new(config.open_store());
    let settings = store.settings()?;

    println!("settings: {}", config.settings_path().display());
    for line in describe(&settings, Utc::now()) {
        println!("{line}");
    }

    if check {
        let linked = settings.credentials().ok_or_else(|| {
            ClientError::AuthRequired("no linked account, run `notecal auth` first".to_string())
        })?;
        let coordinator = FlowCoordinator::new(config.auth.flow_config());
        let session = coordinator.connect_session(linked, store)?;
        let calendars = CalendarClient::new(session, config.auth.request_timeout())?
            .test_connection()
            .await?;
        println!("connection: ok ({calendars} calendars)");
    }

    Ok(())
}

fn describe(settings: &StoredSettings, now: DateTime<Utc>) -> Vec<String> {
    let mut lines = Vec::new();

    lines.push(format!(
        "client credentials: {}",
        if settings.client_credentials().is_some() {
            "configured"
        } else {
            "missing"
        }
    ));

    let Some(linked) = settings.credentials() else {
        lines.push("account: not linked".to_string());
        return lines;
    };

    lines.push("account: linked".to_string());
    lines.push(format!(
        "refresh token: {}",
        if linked.refresh_token.is_some() {
            "present"
        } else {
            "absent"
        }
    ));

    let expiry = match linked.expiry {
        None => "unknown".to_string(),
        Some(at) => {
            let local = at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
            if linked.is_expired_at(now) {
                format!("{local} (expired, will refresh on next use)")
            } else {
                local.to_string()
            }
        }
    };
    lines.push(format!("access token expires: {expiry}"));

    lines
}
