//! Lifecycle states and the outcome of a completed run.

use crate::error::RunnerError;

/// Lifecycle state of a managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No engine is bound.
    Stopped,
    /// The start sequence is running; the engine may or may not be bound yet.
    Starting,
    /// The engine is bound and serving.
    Running,
}

impl ServerState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a `start()` call ended once it got past its precondition checks.
#[derive(Debug)]
pub enum RunOutcome {
    /// The server ran and was shut down.
    Stopped,
    /// The server could not start. The error has already been logged.
    Failed(RunnerError),
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn error(&self) -> Option<&RunnerError> {
        match self {
            Self::Stopped => None,
            Self::Failed(e) => Some(e),
        }
    }
}
