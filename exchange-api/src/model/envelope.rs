//! Wire envelope vocabulary shared by every command/response channel.

use serde::{Deserialize, Serialize};

/// Outcome of a command carried in a reply envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ready,
    Error,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Ready => "ready",
            ResponseStatus::Error => "error",
        }
    }
}
