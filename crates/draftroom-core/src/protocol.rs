// Snapshot and intent messages exchanged with presentation clients.
//
// Wire format: JSON text frames, internally tagged by `type`. Clients may
// attach a `request_id`, which is echoed on the direct reply.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::draft::candidate::{Candidate, CandidateId};
use crate::draft::coordinator::{ConfigureOutcome, DraftPhase, NominationOutcome};
use crate::draft::registry::TeamSlot;
use crate::error::{DraftError, ErrorKind};

/// Everything a client needs to render the draft. Published after every
/// committed change; `version` increases by one per publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSnapshot {
    pub version: u64,
    pub phase: DraftPhase,
    pub current_round: u32,
    pub max_rounds: u32,
    pub total_team_count: Option<usize>,
    pub registered_teams: BTreeMap<TeamSlot, String>,
    pub pending_picks: BTreeMap<TeamSlot, CandidateId>,
    pub candidates: Vec<Candidate>,
}

impl DraftSnapshot {
    /// Candidates that can still be offered: fewer nominations than there
    /// are teams (or none at all while the count is unset).
    pub fn available_candidates(&self) -> impl Iterator<Item = &Candidate> + '_ {
        let quorum = self.total_team_count.unwrap_or(1);
        self.candidates
            .iter()
            .filter(move |c| c.nomination_count() < quorum)
    }

    /// Registered slots that have not picked yet this round.
    pub fn waiting_on(&self) -> Vec<TeamSlot> {
        self.registered_teams
            .keys()
            .filter(|s| !self.pending_picks.contains_key(s))
            .copied()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    /// `slot` and `token` come from an earlier `REGISTERED` reply and reclaim
    /// that identity after a reload. A `slot` without its token is refused.
    RegisterTeam {
        name: String,
        #[serde(default)]
        slot: Option<TeamSlot>,
        #[serde(default)]
        token: Option<String>,
    },
    ConfigureTeamCount {
        count: usize,
    },
    Nominate {
        team_slot: TeamSlot,
        candidate_id: CandidateId,
    },
    FinalizeRound,
    ResetParticipants,
    ResetAll,
    AdminLogin {
        password: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub intent: Intent,
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&DraftError> for ErrorPayload {
    fn from(err: &DraftError) -> Self {
        ErrorPayload {
            kind: err.kind(),
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reply {
    Snapshot {
        snapshot: DraftSnapshot,
    },
    /// Sent only to the registering connection, so `token` stays private.
    Registered {
        slot: TeamSlot,
        name: String,
        token: String,
    },
    Configured {
        outcome: ConfigureOutcome,
    },
    Nominated {
        outcome: NominationOutcome,
    },
    Ack {
        detail: String,
    },
    Error {
        error: ErrorPayload,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub reply: Reply,
}

impl ServerMessage {
    /// An unsolicited push, e.g. a snapshot broadcast.
    pub fn push(reply: Reply) -> Self {
        ServerMessage {
            request_id: None,
            reply,
        }
    }

    pub fn reply_to(request_id: Option<u64>, reply: Reply) -> Self {
        ServerMessage { request_id, reply }
    }
}
