// Error taxonomy for draft operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::draft::candidate::CandidateId;
use crate::draft::registry::TeamSlot;

/// Broad classification reported to clients alongside every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input. Nothing was written.
    Validation,
    /// The intent is well-formed but conflicts with the current state.
    /// The caller should re-read state and retry with a corrected intent.
    Conflict,
    /// The shared store could not be reached or rejected the write.
    Storage,
}

/// Every way a draft intent can fail. No variant is ever returned after a
/// partial write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("invalid `{field}`: {message}")]
    Validation { field: &'static str, message: String },

    #[error("unknown candidate `{0}`")]
    UnknownCandidate(CandidateId),

    #[error("team slot {0} is not registered")]
    TeamNotRegistered(TeamSlot),

    #[error("the team count has not been configured")]
    TeamCountUnset,

    #[error("all {0} team slots are taken")]
    SlotsExhausted(usize),

    #[error("team name `{0}` is already registered")]
    DuplicateName(String),

    #[error("slot {0} cannot be reclaimed without its registration token")]
    ReclaimRejected(TeamSlot),

    #[error("cannot set team count to {requested}: {registered} teams are already registered")]
    InvalidResize { requested: usize, registered: usize },

    #[error("registration is still open ({registered} of {total} teams registered)")]
    RegistrationIncomplete { registered: usize, total: usize },

    #[error("team slot {slot} has already picked in round {round}")]
    AlreadyPicked { slot: TeamSlot, round: u32 },

    #[error("candidate `{0}` has been claimed by every team")]
    CandidateUnavailable(CandidateId),

    #[error("round cannot be finalized: {picked} of {needed} picks submitted")]
    QuorumNotReached { picked: usize, needed: usize },

    #[error("the draft is closed")]
    DraftClosed,

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("the draft room is no longer running")]
    Unavailable,
}

impl DraftError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        DraftError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Classify this error for the client.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DraftError::Validation { .. }
            | DraftError::UnknownCandidate(_)
            | DraftError::TeamNotRegistered(_) => ErrorKind::Validation,
            DraftError::TeamCountUnset
            | DraftError::SlotsExhausted(_)
            | DraftError::DuplicateName(_)
            | DraftError::ReclaimRejected(_)
            | DraftError::InvalidResize { .. }
            | DraftError::RegistrationIncomplete { .. }
            | DraftError::AlreadyPicked { .. }
            | DraftError::CandidateUnavailable(_)
            | DraftError::QuorumNotReached { .. }
            | DraftError::DraftClosed => ErrorKind::Conflict,
            DraftError::Storage(_) | DraftError::Unavailable => ErrorKind::Storage,
        }
    }

    /// Stable machine-readable code, e.g. `SLOTS_EXHAUSTED`.
    pub fn code(&self) -> &'static str {
        match self {
            DraftError::Validation { .. } => "VALIDATION",
            DraftError::UnknownCandidate(_) => "UNKNOWN_CANDIDATE",
            DraftError::TeamNotRegistered(_) => "TEAM_NOT_REGISTERED",
            DraftError::TeamCountUnset => "TEAM_COUNT_UNSET",
            DraftError::SlotsExhausted(_) => "SLOTS_EXHAUSTED",
            DraftError::DuplicateName(_) => "DUPLICATE_NAME",
            DraftError::ReclaimRejected(_) => "RECLAIM_REJECTED",
            DraftError::InvalidResize { .. } => "INVALID_RESIZE",
            DraftError::RegistrationIncomplete { .. } => "REGISTRATION_INCOMPLETE",
            DraftError::AlreadyPicked { .. } => "ALREADY_PICKED",
            DraftError::CandidateUnavailable(_) => "CANDIDATE_UNAVAILABLE",
            DraftError::QuorumNotReached { .. } => "QUORUM_NOT_REACHED",
            DraftError::DraftClosed => "DRAFT_CLOSED",
            DraftError::Storage(_) => "STORAGE",
            DraftError::Unavailable => "UNAVAILABLE",
        }
    }

    /// Whether replaying the same intent unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DraftError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_not_retryable() {
        let err = DraftError::SlotsExhausted(2);
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "SLOTS_EXHAUSTED");
    }

    #[test]
    fn storage_failures_are_retryable() {
        let err = DraftError::Storage("disk I/O error".into());
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "storage failure: disk I/O error");
    }

    #[test]
    fn unknown_candidate_is_a_validation_error() {
        let err = DraftError::UnknownCandidate(CandidateId::from("c9"));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "unknown candidate `c9`");
    }
}
