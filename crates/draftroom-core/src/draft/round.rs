// Current round number and the tentative picks made in it.

use std::collections::BTreeMap;

use super::candidate::CandidateId;
use super::registry::{TeamRegistry, TeamSlot};
use crate::error::DraftError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundState {
    current_round: u32,
    pending_picks: BTreeMap<TeamSlot, CandidateId>,
}

impl Default for RoundState {
    fn default() -> Self {
        RoundState {
            current_round: 1,
            pending_picks: BTreeMap::new(),
        }
    }
}

impl RoundState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a persisted round. Round numbers below 1 are treated as 1.
    pub fn from_parts(current_round: u32, pending_picks: BTreeMap<TeamSlot, CandidateId>) -> Self {
        RoundState {
            current_round: current_round.max(1),
            pending_picks,
        }
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn pending_picks(&self) -> &BTreeMap<TeamSlot, CandidateId> {
        &self.pending_picks
    }

    pub fn picked_count(&self) -> usize {
        self.pending_picks.len()
    }

    pub fn has_picked(&self, slot: TeamSlot) -> bool {
        self.pending_picks.contains_key(&slot)
    }

    /// How many teams hold `candidate` as their tentative pick this round.
    pub fn pending_count_for(&self, candidate: &CandidateId) -> usize {
        self.pending_picks.values().filter(|c| *c == candidate).count()
    }

    /// Record a team's pick for the current round. Entries are merged by slot;
    /// a second pick from the same slot is rejected, never overwritten.
    pub fn insert_pick(&mut self, slot: TeamSlot, candidate: CandidateId) -> Result<(), DraftError> {
        if self.pending_picks.contains_key(&slot) {
            return Err(DraftError::AlreadyPicked {
                slot,
                round: self.current_round,
            });
        }
        self.pending_picks.insert(slot, candidate);
        Ok(())
    }

    /// Remove and return every pending pick.
    pub fn take_picks(&mut self) -> BTreeMap<TeamSlot, CandidateId> {
        std::mem::take(&mut self.pending_picks)
    }

    pub fn advance(&mut self) {
        self.current_round += 1;
    }

    /// Drop picks whose slot is no longer registered.
    pub fn retain_registered(&mut self, registry: &TeamRegistry) {
        self.pending_picks.retain(|slot, _| registry.contains(*slot));
    }

    pub fn reset(&mut self) {
        *self = RoundState::default();
    }
}
