//! Runner error types and their propagation classes.

use thiserror::Error;

/// Broad classification of a [`RunnerError`], used when deciding whether a
/// failure is propagated to the caller or contained and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration or registry state, detected before any network action.
    Configuration,
    /// The engine or the shutdown listener could not bind.
    Startup,
    /// The shutdown transport misbehaved (refused, timed out, malformed reply).
    ShutdownSignal,
    /// The environment could not open a browser.
    BrowserLaunch,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Startup => "startup",
            Self::ShutdownSignal => "shutdown-signal",
            Self::BrowserLaunch => "browser-launch",
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to start server at {address}: {source}")]
    Startup {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shutdown signal error: {0}")]
    ShutdownSignal(String),

    #[error("failed to open browser: {0}")]
    BrowserLaunch(String),
}

impl RunnerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn startup(address: impl Into<String>, source: std::io::Error) -> Self {
        Self::Startup {
            address: address.into(),
            source,
        }
    }

    pub fn shutdown_signal(message: impl Into<String>) -> Self {
        Self::ShutdownSignal(message.into())
    }

    pub fn browser_launch(message: impl Into<String>) -> Self {
        Self::BrowserLaunch(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Startup { .. } => ErrorKind::Startup,
            Self::ShutdownSignal(_) => ErrorKind::ShutdownSignal,
            Self::BrowserLaunch(_) => ErrorKind::BrowserLaunch,
        }
    }

    /// Whether the error leaves the server unable to run.
    ///
    /// Shutdown-signal and browser failures are always contained.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration | ErrorKind::Startup)
    }
}
