// Persisted record shapes and the storage seam used by the draft room.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::draft::candidate::{Candidate, CandidateId, NominationEvent};
use crate::draft::registry::TeamSlot;

fn first_round() -> u32 {
    1
}

/// The single `draft_state` record. Field names follow the stored document
/// layout so existing exports can be imported unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftStateRecord {
    #[serde(default = "first_round")]
    pub current_rank: u32,
    #[serde(default)]
    pub temporary_drafts: BTreeMap<TeamSlot, CandidateId>,
    #[serde(default)]
    pub total_teams: Option<usize>,
    #[serde(default)]
    pub registered_teams: BTreeMap<TeamSlot, String>,
    /// Reclaim tokens of registered slots. Never part of a snapshot.
    #[serde(default)]
    pub team_tokens: BTreeMap<TeamSlot, String>,
    /// Participant resets so far; stamped on every nomination event.
    #[serde(default)]
    pub epoch: u32,
}

impl Default for DraftStateRecord {
    fn default() -> Self {
        DraftStateRecord {
            current_rank: first_round(),
            temporary_drafts: BTreeMap::new(),
            total_teams: None,
            registered_teams: BTreeMap::new(),
            team_tokens: BTreeMap::new(),
            epoch: 0,
        }
    }
}

/// A nomination event to append to a candidate's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NominationRecord {
    pub candidate_id: CandidateId,
    pub event: NominationEvent,
}

/// Everything one accepted intent changed, applied by the store as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// The full `draft_state` record after the change.
    pub state: DraftStateRecord,
    /// New history events. Applied after `clear_history`.
    pub nominations: Vec<NominationRecord>,
    /// Wipe every candidate's history first.
    pub clear_history: bool,
}

/// What a store hands back on startup.
#[derive(Debug, Clone, Default)]
pub struct StoredDraft {
    /// `None` when no draft has been saved yet.
    pub state: Option<DraftStateRecord>,
    pub candidates: Vec<Candidate>,
}

/// Durable backing for a draft room.
///
/// `commit` must be all-or-nothing: after an error, a subsequent `load` must
/// return exactly what it returned before the failed call.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<StoredDraft>;

    async fn commit(&self, commit: &Commit) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_state_record_defaults_missing_fields() {
        let record: DraftStateRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(record, DraftStateRecord::default());
        assert_eq!(record.current_rank, 1);
    }

    #[test]
    fn draft_state_record_reads_stored_layout() {
        let json = r#"{
            "current_rank": 3,
            "temporary_drafts": {"1": "c4"},
            "total_teams": 2,
            "registered_teams": {"1": "Alpha", "2": "Bob"}
        }"#;
        let record: DraftStateRecord = serde_json::from_str(json).unwrap();
        let one = TeamSlot::new(1).unwrap();
        assert_eq!(record.current_rank, 3);
        assert_eq!(record.temporary_drafts[&one], CandidateId::from("c4"));
        assert_eq!(record.total_teams, Some(2));
        assert_eq!(record.registered_teams.len(), 2);
        assert!(record.team_tokens.is_empty());
        assert_eq!(record.epoch, 0);
    }

    #[test]
    fn slot_zero_in_stored_record_is_rejected() {
        let res: Result<DraftStateRecord, _> =
            serde_json::from_str(r#"{"total_teams": 2, "registered_teams": {"0": "Ghost"}}"#);
        assert!(res.is_err());
    }

    #[test]
    fn null_total_teams_means_unset() {
        let record: DraftStateRecord =
            serde_json::from_str(r#"{"current_rank": 1, "total_teams": null}"#).unwrap();
        assert_eq!(record.total_teams, None);
    }
}
