//! Change notifications pushed by the store.

use serde::{Deserialize, Serialize};

use crate::JobId;

/// Errors decoding values received from the store.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed notification payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Unknown job status: {0}")]
    UnknownStatus(String),
}

/// A parsed change notification. Ephemeral, consumed once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Store-defined event label, e.g. `job_inserted`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub job_id: JobId,
}

impl ChangeEvent {
    /// Decode a raw notification payload.
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        format!("Job {} {}", self.job_id, self.event_type)
    }
}
