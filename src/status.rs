//! Session state and the status events published to UI shells.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
    Error,
}

/// What a presentation layer needs to show: connection progress, whether the
/// remote side is speaking, and failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    Listening,
    Talking(bool),
    Error(String),
    Closed,
}
