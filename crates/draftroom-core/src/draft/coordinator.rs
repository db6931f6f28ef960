// The draft state machine: registration, nominations, round finalization and
// resets. This is the only place RoundState advances or candidate history is
// written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::candidate::{Candidate, CandidateId, CandidatePool};
use super::registry::{Registration, TeamRegistry, TeamSlot};
use super::round::RoundState;
use crate::error::DraftError;
use crate::protocol::DraftSnapshot;
use crate::store::{Commit, DraftStateRecord, NominationRecord};

/// Default number of rounds in a draft.
pub const DEFAULT_MAX_ROUNDS: u32 = 7;

/// Default upper bound accepted for the team count.
pub const DEFAULT_MAX_TEAMS: usize = 32;

/// Fixed per-draft limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSettings {
    pub max_rounds: u32,
    pub max_teams: usize,
}

impl Default for DraftSettings {
    fn default() -> Self {
        DraftSettings {
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_teams: DEFAULT_MAX_TEAMS,
        }
    }
}

/// Observable phase of the draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DraftPhase {
    /// Team count unset, or not every slot is bound yet.
    Registering,
    /// Accepting one pick per team for `round`.
    Nominating { round: u32 },
    /// Every round has been finalized.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureOutcome {
    /// The count changed and existing registrations were discarded.
    pub registrations_cleared: bool,
}

/// Result of a finalize: which round was committed and what comes next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedRound {
    pub round: u32,
    pub picks: Vec<(TeamSlot, CandidateId)>,
    pub next_round: u32,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NominationOutcome {
    /// Pick stored; waiting for the rest of the teams.
    Pending { picked: usize, needed: usize },
    /// This pick completed the quorum and the round was finalized.
    RoundFinalized(FinalizedRound),
}

/// Changes made since the last `take_commit`.
#[derive(Debug, Clone, Default)]
struct Journal {
    nominations: Vec<NominationRecord>,
    clear_history: bool,
}

#[derive(Debug, Clone)]
pub struct DraftCoordinator {
    settings: DraftSettings,
    registry: TeamRegistry,
    pool: CandidatePool,
    round: RoundState,
    /// Bumped by each reset so a new draft's rounds never collide with
    /// history kept from an earlier one.
    epoch: u32,
    journal: Journal,
}

impl DraftCoordinator {
    /// A fresh draft over `pool`.
    pub fn new(settings: DraftSettings, pool: CandidatePool) -> Self {
        DraftCoordinator {
            settings,
            registry: TeamRegistry::new(),
            pool,
            round: RoundState::new(),
            epoch: 0,
            journal: Journal::default(),
        }
    }

    /// Rebuild a draft from its stored record. Pending picks must belong to
    /// registered slots and name known candidates.
    pub fn restore(
        settings: DraftSettings,
        record: DraftStateRecord,
        pool: CandidatePool,
    ) -> Result<Self, DraftError> {
        let registry = TeamRegistry::from_parts(
            record.total_teams,
            record.registered_teams,
            record.team_tokens,
        )?;
        for (slot, candidate) in &record.temporary_drafts {
            if !registry.contains(*slot) {
                return Err(DraftError::TeamNotRegistered(*slot));
            }
            if !pool.contains(candidate) {
                return Err(DraftError::UnknownCandidate(candidate.clone()));
            }
        }
        let round = RoundState::from_parts(record.current_rank, record.temporary_drafts);
        Ok(DraftCoordinator {
            settings,
            registry,
            pool,
            round,
            epoch: record.epoch,
            journal: Journal::default(),
        })
    }

    pub fn settings(&self) -> DraftSettings {
        self.settings
    }

    pub fn registry(&self) -> &TeamRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &CandidatePool {
        &self.pool
    }

    pub fn round(&self) -> &RoundState {
        &self.round
    }

    pub fn current_round(&self) -> u32 {
        self.round.current_round()
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn phase(&self) -> DraftPhase {
        if self.round.current_round() > self.settings.max_rounds {
            DraftPhase::Closed
        } else if !self.registry.is_full() {
            DraftPhase::Registering
        } else {
            DraftPhase::Nominating {
                round: self.round.current_round(),
            }
        }
    }

    /// Nomination ceiling per candidate; 1 while the team count is unset.
    pub fn quorum(&self) -> usize {
        self.registry.total().unwrap_or(1)
    }

    /// Whether every team has a pending pick for the current round.
    pub fn quorum_reached(&self) -> bool {
        self.registry
            .total()
            .is_some_and(|total| total > 0 && self.round.picked_count() == total)
    }

    pub fn list_available(&self) -> impl Iterator<Item = &Candidate> + Clone + '_ {
        self.pool.list_available(self.quorum())
    }

    /// Register a team, or reclaim an earlier registration with its
    /// `(slot, token)`.
    pub fn register_team(
        &mut self,
        name: &str,
        reclaim: Option<(TeamSlot, &str)>,
    ) -> Result<Registration, DraftError> {
        let before = self.registry.len();
        let registration = self.registry.register(name, reclaim)?;
        if self.registry.len() != before {
            info!(
                "Registered team '{}' as slot {} ({}/{})",
                registration.name,
                registration.slot,
                self.registry.len(),
                self.quorum()
            );
        } else {
            debug!("Slot {} reclaimed by '{}'", registration.slot, registration.name);
        }
        Ok(registration)
    }

    /// Set the number of teams. Changing an existing count discards every
    /// registration and pending pick; the outcome reports when that happened.
    pub fn configure_team_count(&mut self, count: usize) -> Result<ConfigureOutcome, DraftError> {
        if count == 0 || count > self.settings.max_teams {
            return Err(DraftError::validation(
                "count",
                format!("team count must be between 1 and {}", self.settings.max_teams),
            ));
        }
        let registrations_cleared = self.registry.configure(count)?;
        self.round.retain_registered(&self.registry);
        if registrations_cleared {
            info!("Team count changed to {count}; registrations cleared");
        } else {
            info!("Team count set to {count}");
        }
        Ok(ConfigureOutcome {
            registrations_cleared,
        })
    }

    /// Accept `slot`'s pick for the current round. When this pick completes
    /// the quorum, the round is finalized before returning.
    pub fn nominate(
        &mut self,
        slot: TeamSlot,
        candidate: &CandidateId,
        now: DateTime<Utc>,
    ) -> Result<NominationOutcome, DraftError> {
        if candidate.is_empty() {
            return Err(DraftError::validation("candidate_id", "no candidate selected"));
        }
        let total = match self.phase() {
            DraftPhase::Closed => return Err(DraftError::DraftClosed),
            DraftPhase::Registering => {
                let total = self.registry.total().ok_or(DraftError::TeamCountUnset)?;
                return Err(DraftError::RegistrationIncomplete {
                    registered: self.registry.len(),
                    total,
                });
            }
            DraftPhase::Nominating { .. } => self.quorum(),
        };
        if !self.registry.contains(slot) {
            return Err(DraftError::TeamNotRegistered(slot));
        }
        if self.round.has_picked(slot) {
            return Err(DraftError::AlreadyPicked {
                slot,
                round: self.round.current_round(),
            });
        }
        let committed = self
            .pool
            .get(candidate)
            .ok_or_else(|| DraftError::UnknownCandidate(candidate.clone()))?
            .nomination_count();
        if committed + self.round.pending_count_for(candidate) >= total {
            return Err(DraftError::CandidateUnavailable(candidate.clone()));
        }

        self.round.insert_pick(slot, candidate.clone())?;
        debug!(
            "Slot {} picked '{}' in round {} ({}/{})",
            slot,
            candidate,
            self.round.current_round(),
            self.round.picked_count(),
            total
        );

        if self.quorum_reached() {
            let finalized = self.finalize_round(now)?;
            return Ok(NominationOutcome::RoundFinalized(finalized));
        }
        Ok(NominationOutcome::Pending {
            picked: self.round.picked_count(),
            needed: total,
        })
    }

    /// Commit every pending pick to candidate history, clear the picks and
    /// advance the round, as one step.
    pub fn finalize_round(&mut self, now: DateTime<Utc>) -> Result<FinalizedRound, DraftError> {
        if self.phase() == DraftPhase::Closed {
            return Err(DraftError::DraftClosed);
        }
        if !self.quorum_reached() {
            return Err(DraftError::QuorumNotReached {
                picked: self.round.picked_count(),
                needed: self.quorum(),
            });
        }

        // Validate every pick before touching the pool so a bad one can't
        // leave the round half-recorded.
        let round = self.round.current_round();
        if let Some(missing) = self
            .round
            .pending_picks()
            .values()
            .find(|c| !self.pool.contains(c))
        {
            return Err(DraftError::UnknownCandidate(missing.clone()));
        }

        let picks = self.round.take_picks();
        for (slot, candidate) in &picks {
            if self
                .pool
                .record_nomination(candidate, self.epoch, *slot, round, now)?
            {
                if let Some(event) = self
                    .pool
                    .get(candidate)
                    .and_then(|c| c.draft_info.last())
                {
                    self.journal.nominations.push(NominationRecord {
                        candidate_id: candidate.clone(),
                        event: event.clone(),
                    });
                }
            }
        }
        self.round.advance();

        let next_round = self.round.current_round();
        let closed = next_round > self.settings.max_rounds;
        if closed {
            info!("Round {round} finalized; draft closed");
        } else {
            info!("Round {round} finalized; round {next_round} open");
        }
        Ok(FinalizedRound {
            round,
            picks: picks.into_iter().collect(),
            next_round,
            closed,
        })
    }

    /// Clear teams, team count and pending picks and return to round 1.
    /// Candidate history is kept.
    pub fn reset_participants(&mut self) {
        self.registry.unconfigure();
        self.round.reset();
        self.epoch += 1;
        info!("Participants reset; nomination history preserved (epoch {})", self.epoch);
    }

    /// Reset participants and wipe every candidate's history.
    pub fn reset_all(&mut self) {
        self.registry.unconfigure();
        self.round.reset();
        self.epoch += 1;
        self.pool.reset_all();
        self.journal.nominations.clear();
        self.journal.clear_history = true;
        info!("Draft fully reset");
    }

    /// The persisted `draft_state` record for the current state.
    pub fn state_record(&self) -> DraftStateRecord {
        DraftStateRecord {
            current_rank: self.round.current_round(),
            temporary_drafts: self.round.pending_picks().clone(),
            total_teams: self.registry.total(),
            registered_teams: self.registry.teams().clone(),
            team_tokens: self.registry.tokens().clone(),
            epoch: self.epoch,
        }
    }

    /// Drain the journal into a commit describing every change since the
    /// previous call.
    pub fn take_commit(&mut self) -> Commit {
        let journal = std::mem::take(&mut self.journal);
        Commit {
            state: self.state_record(),
            nominations: journal.nominations,
            clear_history: journal.clear_history,
        }
    }

    pub fn snapshot(&self, version: u64) -> DraftSnapshot {
        DraftSnapshot {
            version,
            phase: self.phase(),
            current_round: self.round.current_round(),
            max_rounds: self.settings.max_rounds,
            total_team_count: self.registry.total(),
            registered_teams: self.registry.teams().clone(),
            pending_picks: self.round.pending_picks().clone(),
            candidates: self.pool.iter().cloned().collect(),
        }
    }
}
