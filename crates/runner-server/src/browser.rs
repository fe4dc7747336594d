//! Best-effort browser launch.

use std::sync::Arc;

use runner_protocol::{RunnerError, Url};

/// Shows the effective base URI once the server is running. A failure is
/// logged and never stops the server.
pub type BrowserOpener = Arc<dyn Fn(&Url) -> Result<(), RunnerError> + Send + Sync>;

/// Ask the platform opener to show `uri`. Returns without waiting for the viewer.
pub fn open_in_browser(uri: &Url) -> Result<(), RunnerError> {
    open::that_detached(uri.as_str())
        .map_err(|e| RunnerError::browser_launch(format!("{uri}: {e}")))
}

pub(crate) fn system_opener() -> BrowserOpener {
    Arc::new(open_in_browser)
}
