//! Wire messages of the loopback shutdown channel.
//!
//! Protocol flow (one JSON object per line):
//!   1. Requester connects to the shutdown port
//!   2. Requester sends: { "command": "shutdown", "token": "..." }
//!   3. Listener replies { "status": "accepted" } or { "status": "rejected", "reason": "..." }
//!   4. After the instance has stopped, the listener sends { "status": "stopped" } and closes

use serde::{Deserialize, Serialize};

/// Commands a requester can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownCommand {
    Shutdown,
}

/// Requester → listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownRequest {
    pub command: ShutdownCommand,
    /// The shared secret
    pub token: String,
}

impl ShutdownRequest {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            command: ShutdownCommand::Shutdown,
            token: token.into(),
        }
    }

    /// Serialize as a single newline-terminated line.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        encode_line(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownStatus {
    /// The request was valid; the instance is stopping.
    Accepted,
    /// The instance has fully stopped and released its ports.
    Stopped,
    /// The request was refused.
    Rejected,
}

/// Listener → requester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownResponse {
    pub status: ShutdownStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ShutdownResponse {
    pub fn accepted() -> Self {
        Self {
            status: ShutdownStatus::Accepted,
            reason: None,
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: ShutdownStatus::Stopped,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: ShutdownStatus::Rejected,
            reason: Some(reason.into()),
        }
    }

    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        encode_line(self)
    }
}

fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
