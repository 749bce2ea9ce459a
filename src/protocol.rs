//! Control API wire format
//!
//! | Method | Path      | Response body                          |
//! |--------|-----------|----------------------------------------|
//! | POST   | `/start`  | `{"message": "..."}` (+ `"error"` on driver failure) |
//! | POST   | `/stop`   | `{"message": "..."}`                   |
//! | GET    | `/status` | `{"streaming": bool}`                  |

use serde::{Deserialize, Serialize};

pub const MSG_STARTED: &str = "Stream started.";
pub const MSG_ALREADY_RUNNING: &str = "Stream is already running.";
pub const MSG_STOPPED: &str = "Stream stopped.";
pub const MSG_NOT_RUNNING: &str = "No stream to stop.";
pub const MSG_START_FAILED: &str = "Failed to start stream.";
pub const MSG_STOP_FAILED: &str = "Failed to stop stream.";

/// Body of `POST /start` and `POST /stop`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub message: String,
    /// Present only when the server-side pipeline failed to start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Body of `GET /status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub streaming: bool,
}
