//! Async operation status state machine.
//!
//! The remote system owns every transition. This side only observes the
//! status and decides two things: whether a watch is over, and whether a
//! job may be resumed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of an async operation record, as stored by the remote system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AsyncOperationStatus {
    /// Initial state, also assumed when the remote leaves the field unset.
    #[default]
    #[serde(rename = "In Progress")]
    InProgress,
    /// Terminal, success.
    Completed,
    /// Terminal, failure.
    Error,
    /// Terminal, nothing was done.
    Ignored,
}

impl AsyncOperationStatus {
    /// Wire name used by the remote system.
    pub fn as_str(&self) -> &'static str {
        match self {
            AsyncOperationStatus::InProgress => "In Progress",
            AsyncOperationStatus::Completed => "Completed",
            AsyncOperationStatus::Error => "Error",
            AsyncOperationStatus::Ignored => "Ignored",
        }
    }

    /// Is this a terminal state?
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AsyncOperationStatus::Completed
                | AsyncOperationStatus::Error
                | AsyncOperationStatus::Ignored
        )
    }

    /// Does an event carrying this status end a watch?
    ///
    /// Only `Completed` and `Error` do; an `Ignored` event keeps the
    /// subscription open.
    pub fn ends_watch(&self) -> bool {
        matches!(
            self,
            AsyncOperationStatus::Completed | AsyncOperationStatus::Error
        )
    }

    /// Lenient parse for remote payloads. Missing or unrecognised values
    /// fall back to `InProgress`.
    pub fn from_remote(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for AsyncOperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AsyncOperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "In Progress" | "InProgress" => Ok(AsyncOperationStatus::InProgress),
            "Completed" => Ok(AsyncOperationStatus::Completed),
            "Error" => Ok(AsyncOperationStatus::Error),
            "Ignored" => Ok(AsyncOperationStatus::Ignored),
            other => Err(format!("unknown async operation status: {}", other)),
        }
    }
}

/// A job whose status is terminal cannot be resumed. An unset status is
/// treated as in progress.
pub fn is_not_resumable(status: Option<AsyncOperationStatus>) -> bool {
    status.map(|s| s.is_terminal()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_resumable_exactly_for_terminal_states() {
        assert!(is_not_resumable(Some(AsyncOperationStatus::Completed)));
        assert!(is_not_resumable(Some(AsyncOperationStatus::Error)));
        assert!(is_not_resumable(Some(AsyncOperationStatus::Ignored)));

        assert!(!is_not_resumable(Some(AsyncOperationStatus::InProgress)));
        assert!(!is_not_resumable(None));
    }

    #[test]
    fn test_ends_watch() {
        assert!(AsyncOperationStatus::Completed.ends_watch());
        assert!(AsyncOperationStatus::Error.ends_watch());
        assert!(!AsyncOperationStatus::Ignored.ends_watch());
        assert!(!AsyncOperationStatus::InProgress.ends_watch());
    }

    #[test]
    fn test_from_remote() {
        assert_eq!(
            AsyncOperationStatus::from_remote(Some("Completed")),
            AsyncOperationStatus::Completed
        );
        assert_eq!(
            AsyncOperationStatus::from_remote(Some("In Progress")),
            AsyncOperationStatus::InProgress
        );
        assert_eq!(
            AsyncOperationStatus::from_remote(None),
            AsyncOperationStatus::InProgress
        );
        assert_eq!(
            AsyncOperationStatus::from_remote(Some("Queued")),
            AsyncOperationStatus::InProgress
        );
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_string(&AsyncOperationStatus::InProgress).unwrap();
        assert_eq!(json, r#""In Progress""#);

        let status: AsyncOperationStatus = serde_json::from_str(r#""Error""#).unwrap();
        assert_eq!(status, AsyncOperationStatus::Error);
        assert_eq!(status.to_string(), "Error");
    }
}
