//! Page → worker messages.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Messages the worker understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    /// Activate the waiting version now.
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
}

impl WorkerMessage {
    /// Parse a posted message. Anything unrecognised is `None`.
    pub fn parse(data: &serde_json::Value) -> Option<Self> {
        match serde_json::from_value(data.clone()) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(error = %e, "Ignoring unrecognised message");
                None
            }
        }
    }

    /// Parse a message posted as a JSON string.
    pub fn parse_str(raw: &str) -> Option<Self> {
        serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .and_then(|value| Self::parse(&value))
    }
}
