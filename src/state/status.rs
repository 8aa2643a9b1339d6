/// Crawl session status definitions
///
/// This module defines the lifecycle of a crawl session and the transitions
/// the checkpoint store accepts between its states.
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Represents the current state of a crawl session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    // ===== Resumable States =====
    /// Session has been enqueued but no executor has picked it up yet
    Pending,

    /// An executor is (or was, before a crash) working through the session
    InProgress,

    /// Session stopped at a chunk boundary, page limit, or page failure
    Paused,

    /// Session stopped on an unrecoverable error
    Failed,

    // ===== Terminal States =====
    /// Pagination reached its natural end
    Completed,

    /// An operator abandoned the session
    Cancelled,
}

/// Error returned when a status change violates the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid state transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

impl SessionStatus {
    /// Returns true if the session can never be mutated again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Returns true if a session in this state may be matched for resume
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::InProgress | Self::Paused | Self::Failed
        )
    }

    /// Returns true if an executor may move this session to `InProgress`
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Pending | Self::Paused | Self::Failed)
    }

    /// Checks a transition against the session state machine
    ///
    /// | From | To |
    /// |------|----|
    /// | Pending, Paused, Failed | InProgress |
    /// | InProgress | Paused, Failed, Completed |
    /// | any non-terminal | Cancelled |
    pub fn check_transition(self, to: SessionStatus) -> Result<(), InvalidTransition> {
        let allowed = match (self, to) {
            (from, Self::Cancelled) => !from.is_terminal(),
            (Self::Pending | Self::Paused | Self::Failed, Self::InProgress) => true,
            (Self::InProgress, Self::Paused | Self::Failed | Self::Completed) => true,
            _ => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "paused" => Some(Self::Paused),
            "failed" => Some(Self::Failed),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Statuses matched by resume-by-source lookups
    pub fn resumable_states() -> [Self; 4] {
        [Self::Pending, Self::InProgress, Self::Paused, Self::Failed]
    }

    /// Returns all possible session statuses
    pub fn all_states() -> [Self; 6] {
        [
            Self::Pending,
            Self::InProgress,
            Self::Paused,
            Self::Failed,
            Self::Completed,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
