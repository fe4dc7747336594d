//! Runner protocol types
//!
//! Shared vocabulary of the managed server: configuration, lifecycle
//! states, the error taxonomy, and the messages spoken on the loopback
//! shutdown channel.

pub mod config;
pub mod error;
pub mod shutdown;
pub mod status;

pub use config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_GRACE_PERIOD, DEFAULT_SHUTDOWN_PORT,
    DEFAULT_SHUTDOWN_TOKEN, DEFAULT_STOP_TIMEOUT, DESCRIPTION_DOCUMENT,
    ServerConfig, ShutdownConfig,
};
pub use error::{ErrorKind, RunnerError};
pub use shutdown::{ShutdownCommand, ShutdownRequest, ShutdownResponse, ShutdownStatus};
pub use status::{RunOutcome, ServerState};

/// Re-exported so collaborators agree on the URI type.
pub use url::Url;
