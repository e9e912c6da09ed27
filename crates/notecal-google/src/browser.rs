//! Opening the consent page in the user's browser.

use std::io;

use tracing::{debug, warn};

/// Sends the user to a URL.
pub trait UrlLauncher: Send + Sync {
    /// Opens `url`. Errors are reported but never abort an attempt.
    fn launch(&self, url: &str) -> io::Result<()>;
}

/// Launches the platform's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl UrlLauncher for SystemBrowser {
    fn launch(&self, url: &str) -> io::Result<()> {
        debug!("opening browser");
        open::that(url).inspect_err(|e| {
            warn!(error = %e, "failed to open browser");
            eprintln!("\nPlease open this URL in your browser:\n\n{url}\n");
        })
    }
}
