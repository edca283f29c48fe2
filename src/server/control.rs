//! Pass-through of device commands to an external controller.
//!
//! The relay only routes `/torch/*`, `/camera/*`, `/recording/*`, `/audio/*`
//! and `/alarm/*` requests; what the commands do is up to the controller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Path prefixes forwarded to the device controller.
pub const DEVICE_GROUPS: [&str; 5] = ["torch", "camera", "recording", "audio", "alarm"];

/// A command addressed to the device, e.g. `torch` / `toggle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub group: String,
    /// Remainder of the path after the group, e.g. `zoom/set`.
    pub action: String,
    /// JSON request body, if any.
    pub payload: Option<Value>,
}

impl DeviceCommand {
    /// Split a request path such as `/camera/zoom/set` into a command.
    ///
    /// Returns `None` for paths outside the forwarded groups or without an
    /// action.
    pub fn from_path(path: &str, payload: Option<Value>) -> Option<Self> {
        let (group, action) = path.trim_start_matches('/').split_once('/')?;
        let action = action.trim_end_matches('/');
        if !DEVICE_GROUPS.contains(&group) || action.is_empty() {
            return None;
        }
        Some(Self {
            group: group.to_string(),
            action: action.to_string(),
            payload,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("device rejected command: {0}")]
    Rejected(String),

    #[error("device unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported command: {0}")]
    Unsupported(String),
}

/// Executes device commands on behalf of HTTP clients.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Run the command and return a JSON result for the client.
    async fn execute(&self, command: &DeviceCommand) -> Result<Value, ControlError>;
}
