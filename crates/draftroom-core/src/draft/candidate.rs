// Candidate records and the shared candidate pool.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::registry::TeamSlot;
use crate::error::DraftError;

/// Unique identifier of a candidate in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for CandidateId {
    fn from(s: &str) -> Self {
        CandidateId(s.to_string())
    }
}

impl From<String> for CandidateId {
    fn from(s: String) -> Self {
        CandidateId(s)
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One committed nomination of a candidate by a team in a round.
///
/// Serialized with the field name `rank` to match the stored document layout.
/// `epoch` counts participant resets, so round 1 of a later draft is a
/// different round from round 1 of an earlier one. Records without it belong
/// to epoch 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NominationEvent {
    #[serde(default)]
    pub epoch: u32,
    pub team: TeamSlot,
    #[serde(rename = "rank")]
    pub round: u32,
    pub timestamp: DateTime<Utc>,
}

/// A draftable candidate and its permanent nomination history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
    /// Distinct teams that have nominated this candidate, in first-pick order.
    #[serde(default)]
    pub drafted_by: Vec<TeamSlot>,
    /// Every committed nomination, in commit order.
    #[serde(default)]
    pub draft_info: Vec<NominationEvent>,
}

impl Candidate {
    pub fn new(id: impl Into<CandidateId>, name: impl Into<String>) -> Self {
        Candidate {
            id: id.into(),
            name: name.into(),
            drafted_by: Vec::new(),
            draft_info: Vec::new(),
        }
    }

    pub fn nomination_count(&self) -> usize {
        self.draft_info.len()
    }

    fn has_event(&self, epoch: u32, team: TeamSlot, round: u32) -> bool {
        self.draft_info
            .iter()
            .any(|e| e.epoch == epoch && e.team == team && e.round == round)
    }

    fn push_event(&mut self, event: NominationEvent) {
        if !self.drafted_by.contains(&event.team) {
            self.drafted_by.push(event.team);
        }
        self.draft_info.push(event);
    }

    fn clear_history(&mut self) {
        self.drafted_by.clear();
        self.draft_info.clear();
    }
}

/// All candidates, in seeding order, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    candidates: Vec<Candidate>,
    index: HashMap<CandidateId, usize>,
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool from already-loaded candidates (seed data or a store).
    pub fn from_candidates(
        candidates: impl IntoIterator<Item = Candidate>,
    ) -> Result<Self, DraftError> {
        let mut pool = Self::new();
        for candidate in candidates {
            pool.insert(candidate)?;
        }
        Ok(pool)
    }

    /// Add a candidate. Ids must be unique and non-empty.
    pub fn insert(&mut self, mut candidate: Candidate) -> Result<(), DraftError> {
        if candidate.id.is_empty() {
            return Err(DraftError::validation("id", "candidate id must not be empty"));
        }
        if self.index.contains_key(&candidate.id) {
            return Err(DraftError::validation(
                "id",
                format!("duplicate candidate id `{}`", candidate.id),
            ));
        }
        // drafted_by is derived; rebuild it so loaded records can't disagree.
        candidate.drafted_by.clear();
        for event in &candidate.draft_info {
            if !candidate.drafted_by.contains(&event.team) {
                candidate.drafted_by.push(event.team);
            }
        }
        self.index.insert(candidate.id.clone(), self.candidates.len());
        self.candidates.push(candidate);
        Ok(())
    }

    pub fn get(&self, id: &CandidateId) -> Option<&Candidate> {
        self.index.get(id).map(|&i| &self.candidates[i])
    }

    pub fn contains(&self, id: &CandidateId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> + Clone + '_ {
        self.candidates.iter()
    }

    /// Candidates that can still be offered this round: fewer than `quorum`
    /// nominations. The iterator is lazy and can be cloned to restart it.
    pub fn list_available(&self, quorum: usize) -> impl Iterator<Item = &Candidate> + Clone + '_ {
        self.candidates
            .iter()
            .filter(move |c| c.nomination_count() < quorum)
    }

    /// Append a nomination event. Replaying the same
    /// `(epoch, candidate, team, round)` is a no-op and returns `false`.
    pub fn record_nomination(
        &mut self,
        id: &CandidateId,
        epoch: u32,
        team: TeamSlot,
        round: u32,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, DraftError> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| DraftError::UnknownCandidate(id.clone()))?;
        let candidate = &mut self.candidates[idx];
        if candidate.has_event(epoch, team, round) {
            return Ok(false);
        }
        candidate.push_event(NominationEvent {
            epoch,
            team,
            round,
            timestamp,
        });
        Ok(true)
    }

    /// Clear the nomination history of every candidate. Irreversible.
    pub fn reset_all(&mut self) {
        for candidate in &mut self.candidates {
            candidate.clear_history();
        }
    }
}
