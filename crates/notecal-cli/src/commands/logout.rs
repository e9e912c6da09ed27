//! Forgetting the linked account.

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Clears stored tokens; client credentials are kept.
pub async fn run(config: &ClientConfig) -> ClientResult<()> {
    let store = config.open_store();
    if store.credentials()?.is_none() {
        println!("No Google Calendar account is linked.");
        return Ok(());
    }

    store.clear_credentials().await?;
    println!("Tokens cleared. Run `notecal auth` to link an account again.");
    Ok(())
}
