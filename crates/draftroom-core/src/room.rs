// The draft room: a single task that owns the DraftCoordinator and applies
// intents one at a time.
//
// Each intent runs against a staged copy of the coordinator. The staged
// changes are written to the store as one commit; only when that succeeds is
// the copy swapped in and a new snapshot published. A failed write leaves
// both the live state and the stored state exactly as they were.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use futures_util::Stream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::draft::candidate::{CandidateId, CandidatePool};
use crate::draft::coordinator::{
    ConfigureOutcome, DraftCoordinator, DraftPhase, DraftSettings, FinalizedRound,
    NominationOutcome,
};
use crate::draft::registry::{Registration, TeamSlot};
use crate::error::DraftError;
use crate::protocol::DraftSnapshot;
use crate::store::DraftStore;

/// Queue depth for intents waiting on the room task.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

type Reply<T> = oneshot::Sender<Result<T, DraftError>>;

enum Command {
    RegisterTeam {
        name: String,
        reclaim: Option<(TeamSlot, String)>,
        reply: Reply<Registration>,
    },
    ConfigureTeamCount {
        count: usize,
        reply: Reply<ConfigureOutcome>,
    },
    Nominate {
        slot: TeamSlot,
        candidate: CandidateId,
        reply: Reply<NominationOutcome>,
    },
    FinalizeRound {
        reply: Reply<FinalizedRound>,
    },
    ResetParticipants {
        reply: Reply<()>,
    },
    ResetAll {
        reply: Reply<()>,
    },
}

pub struct DraftRoom {
    coordinator: DraftCoordinator,
    store: Arc<dyn DraftStore>,
    version: u64,
    snapshot_tx: watch::Sender<Arc<DraftSnapshot>>,
}

impl DraftRoom {
    /// Load the draft from `store`.
    ///
    /// If the stored round already holds a pick from every team (the process
    /// stopped between the last pick and the finalize), that round is
    /// finalized and written back before the room starts.
    pub async fn open(settings: DraftSettings, store: Arc<dyn DraftStore>) -> anyhow::Result<Self> {
        let stored = store.load().await.context("failed to load stored draft")?;
        let pool = CandidatePool::from_candidates(stored.candidates)
            .context("stored candidate list is invalid")?;

        let mut coordinator = match stored.state {
            Some(record) => {
                info!(
                    "Restoring draft at round {} ({} teams registered, {} pending picks)",
                    record.current_rank,
                    record.registered_teams.len(),
                    record.temporary_drafts.len()
                );
                DraftCoordinator::restore(settings, record, pool)
                    .context("stored draft state is inconsistent")?
            }
            None => {
                info!("No stored draft state, starting fresh");
                DraftCoordinator::new(settings, pool)
            }
        };

        if coordinator.phase() != DraftPhase::Closed && coordinator.quorum_reached() {
            warn!(
                "Round {} has a full set of stored picks; finalizing during recovery",
                coordinator.current_round()
            );
            coordinator
                .finalize_round(Utc::now())
                .context("failed to finalize recovered round")?;
            let commit = coordinator.take_commit();
            store
                .commit(&commit)
                .await
                .context("failed to persist recovered round")?;
        } else {
            coordinator.take_commit();
        }

        let (snapshot_tx, _) = watch::channel(Arc::new(coordinator.snapshot(0)));
        Ok(DraftRoom {
            coordinator,
            store,
            version: 0,
            snapshot_tx,
        })
    }

    /// Start the room task. The returned handle is the only way to reach it;
    /// the task exits once every handle has been dropped.
    pub fn spawn(self) -> (DraftHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = DraftHandle {
            cmd_tx,
            snapshot_rx: self.snapshot_tx.subscribe(),
        };
        let task = tokio::spawn(self.run(cmd_rx));
        (handle, task)
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        info!(
            "Draft room started at round {} (phase {:?})",
            self.coordinator.current_round(),
            self.coordinator.phase()
        );
        while let Some(cmd) = cmd_rx.recv().await {
            self.handle_command(cmd).await;
        }
        info!("Draft room command channel closed, shutting down");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::RegisterTeam {
                name,
                reclaim,
                reply,
            } => {
                let reclaim = reclaim.as_ref().map(|(slot, token)| (*slot, token.as_str()));
                let result = self.apply(|c| c.register_team(&name, reclaim)).await;
                let _ = reply.send(result);
            }
            Command::ConfigureTeamCount { count, reply } => {
                let result = self.apply(|c| c.configure_team_count(count)).await;
                let _ = reply.send(result);
            }
            Command::Nominate {
                slot,
                candidate,
                reply,
            } => {
                let now = Utc::now();
                let result = self.apply(|c| c.nominate(slot, &candidate, now)).await;
                let _ = reply.send(result);
            }
            Command::FinalizeRound { reply } => {
                let now = Utc::now();
                let result = self.apply(|c| c.finalize_round(now)).await;
                let _ = reply.send(result);
            }
            Command::ResetParticipants { reply } => {
                let result = self
                    .apply(|c| {
                        c.reset_participants();
                        Ok(())
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::ResetAll { reply } => {
                let result = self
                    .apply(|c| {
                        c.reset_all();
                        Ok(())
                    })
                    .await;
                let _ = reply.send(result);
            }
        }
    }

    /// Run `op` on a staged copy, persist its changes, then swap it in.
    async fn apply<T>(
        &mut self,
        op: impl FnOnce(&mut DraftCoordinator) -> Result<T, DraftError>,
    ) -> Result<T, DraftError> {
        let mut staged = self.coordinator.clone();
        let value = op(&mut staged)?;
        let commit = staged.take_commit();
        if let Err(e) = self.store.commit(&commit).await {
            error!("Failed to persist draft change: {e:#}");
            return Err(DraftError::Storage(format!("{e:#}")));
        }
        self.coordinator = staged;
        self.publish();
        Ok(value)
    }

    fn publish(&mut self) {
        self.version += 1;
        let snapshot = Arc::new(self.coordinator.snapshot(self.version));
        debug!("Publishing snapshot v{}", self.version);
        // send_replace never fails, even with no subscribers.
        self.snapshot_tx.send_replace(snapshot);
    }
}

/// Cloneable client of a running [`DraftRoom`].
#[derive(Clone)]
pub struct DraftHandle {
    cmd_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<Arc<DraftSnapshot>>,
}

impl DraftHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, DraftError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| DraftError::Unavailable)?;
        reply_rx.await.map_err(|_| DraftError::Unavailable)?
    }

    /// Register a team. Pass the `(slot, token)` of an earlier
    /// [`Registration`] to reclaim it instead.
    pub async fn register_team(
        &self,
        name: impl Into<String>,
        reclaim: Option<(TeamSlot, String)>,
    ) -> Result<Registration, DraftError> {
        let name = name.into();
        self.request(|reply| Command::RegisterTeam {
            name,
            reclaim,
            reply,
        })
        .await
    }

    pub async fn configure_team_count(&self, count: usize) -> Result<ConfigureOutcome, DraftError> {
        self.request(|reply| Command::ConfigureTeamCount { count, reply })
            .await
    }

    pub async fn nominate(
        &self,
        slot: TeamSlot,
        candidate: CandidateId,
    ) -> Result<NominationOutcome, DraftError> {
        self.request(|reply| Command::Nominate {
            slot,
            candidate,
            reply,
        })
        .await
    }

    pub async fn finalize_round(&self) -> Result<FinalizedRound, DraftError> {
        self.request(|reply| Command::FinalizeRound { reply }).await
    }

    pub async fn reset_participants(&self) -> Result<(), DraftError> {
        self.request(|reply| Command::ResetParticipants { reply })
            .await
    }

    pub async fn reset_all(&self) -> Result<(), DraftError> {
        self.request(|reply| Command::ResetAll { reply }).await
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<DraftSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DraftSnapshot>> {
        self.snapshot_rx.clone()
    }

    /// Stream of snapshots: the current one first, then one per published
    /// change. Intermediate versions may be skipped under load; the latest
    /// is always delivered. Ends when the room stops.
    pub fn observe_state(&self) -> impl Stream<Item = Arc<DraftSnapshot>> + Send + 'static {
        let mut rx = self.snapshot_rx.clone();
        rx.mark_changed();
        futures_util::stream::unfold(rx, |mut rx| async move {
            rx.changed().await.ok()?;
            let snapshot = rx.borrow_and_update().clone();
            Some((snapshot, rx))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::draft::candidate::Candidate;
    use crate::store::{Commit, DraftStateRecord, StoredDraft};
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn slot(n: u32) -> TeamSlot {
        TeamSlot::new(n).unwrap()
    }

    fn id(s: &str) -> CandidateId {
        CandidateId::from(s)
    }

    fn seeded_db(n: usize) -> Arc<Database> {
        let db = Database::open(":memory:").unwrap();
        let candidates: Vec<_> = (1..=n)
            .map(|i| Candidate::new(format!("c{i}"), format!("Candidate {i}")))
            .collect();
        db.seed_candidates(&candidates).unwrap();
        Arc::new(db)
    }

    /// Database wrapper whose commits can be made to fail on demand.
    struct FlakyStore {
        inner: Database,
        fail: AtomicBool,
    }

    #[async_trait]
    impl DraftStore for FlakyStore {
        async fn load(&self) -> anyhow::Result<StoredDraft> {
            self.inner.load().await
        }

        async fn commit(&self, commit: &Commit) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("disk unavailable");
            }
            self.inner.commit(commit).await
        }
    }

    async fn open(store: Arc<dyn DraftStore>) -> DraftHandle {
        let room = DraftRoom::open(DraftSettings::default(), store).await.unwrap();
        room.spawn().0
    }

    async fn two_teams(handle: &DraftHandle) {
        handle.configure_team_count(2).await.unwrap();
        handle.register_team("Alpha", None).await.unwrap();
        handle.register_team("Bob", None).await.unwrap();
    }

    #[tokio::test]
    async fn full_round_is_persisted() {
        let db = seeded_db(4);
        let handle = open(db.clone()).await;
        two_teams(&handle).await;

        handle.nominate(slot(1), id("c1")).await.unwrap();
        let outcome = handle.nominate(slot(2), id("c2")).await.unwrap();
        assert!(matches!(outcome, NominationOutcome::RoundFinalized(_)));

        let snap = handle.snapshot();
        assert_eq!(snap.current_round, 2);
        assert_eq!(snap.phase, DraftPhase::Nominating { round: 2 });

        let stored = db.load_draft_state().unwrap().unwrap();
        assert_eq!(stored.current_rank, 2);
        assert!(stored.temporary_drafts.is_empty());
        let candidates = db.load_candidates().unwrap();
        assert_eq!(candidates[0].draft_info[0].team, slot(1));
        assert_eq!(candidates[1].draft_info[0].team, slot(2));
    }

    #[tokio::test]
    async fn second_draft_picks_are_persisted_after_reset() {
        let db = seeded_db(3);
        let handle = open(db.clone()).await;
        two_teams(&handle).await;
        handle.nominate(slot(1), id("c1")).await.unwrap();
        handle.nominate(slot(2), id("c2")).await.unwrap();

        handle.reset_participants().await.unwrap();
        handle.configure_team_count(2).await.unwrap();
        handle.register_team("Xeno", None).await.unwrap();
        handle.register_team("Yuki", None).await.unwrap();
        handle.nominate(slot(1), id("c1")).await.unwrap();
        handle.nominate(slot(2), id("c3")).await.unwrap();

        let c1 = &db.load_candidates().unwrap()[0];
        assert_eq!(c1.nomination_count(), 2);
        let keys: Vec<_> = c1
            .draft_info
            .iter()
            .map(|e| (e.epoch, e.team.get(), e.round))
            .collect();
        assert_eq!(keys, vec![(0, 1, 1), (1, 1, 1)]);
        assert_eq!(db.load_draft_state().unwrap().unwrap().epoch, 1);

        // A reopened room carries on in the same epoch.
        drop(handle);
        let handle = open(db).await;
        let c1 = &handle.snapshot().candidates[0];
        assert_eq!(c1.nomination_count(), 2);
    }

    #[tokio::test]
    async fn snapshot_version_increases_per_change() {
        let handle = open(seeded_db(2)).await;
        assert_eq!(handle.snapshot().version, 0);
        handle.configure_team_count(2).await.unwrap();
        assert_eq!(handle.snapshot().version, 1);
        handle.register_team("Alpha", None).await.unwrap();
        assert_eq!(handle.snapshot().version, 2);

        // Rejected intents publish nothing.
        assert!(handle.configure_team_count(0).await.is_err());
        assert_eq!(handle.snapshot().version, 2);
    }

    #[tokio::test]
    async fn failed_commit_leaves_state_untouched() {
        let store = Arc::new(FlakyStore {
            inner: Database::open(":memory:").unwrap(),
            fail: AtomicBool::new(false),
        });
        store
            .inner
            .seed_candidates(&[Candidate::new("c1", "A"), Candidate::new("c2", "B")])
            .unwrap();
        let handle = open(store.clone()).await;
        two_teams(&handle).await;
        handle.nominate(slot(1), id("c1")).await.unwrap();
        let before = handle.snapshot();

        store.fail.store(true, Ordering::SeqCst);
        let err = handle.nominate(slot(2), id("c2")).await.unwrap_err();
        assert!(matches!(err, DraftError::Storage(_)));
        assert!(err.is_retryable());

        assert_eq!(handle.snapshot(), before);
        let stored = store.inner.load_draft_state().unwrap().unwrap();
        assert_eq!(stored.current_rank, 1);
        assert_eq!(stored.temporary_drafts.len(), 1);
        assert!(store
            .inner
            .load_candidates()
            .unwrap()
            .iter()
            .all(|c| c.draft_info.is_empty()));

        // Retry once storage recovers.
        store.fail.store(false, Ordering::SeqCst);
        let outcome = handle.nominate(slot(2), id("c2")).await.unwrap();
        assert!(matches!(outcome, NominationOutcome::RoundFinalized(_)));
        assert_eq!(handle.snapshot().current_round, 2);
    }

    #[tokio::test]
    async fn concurrent_nominations_finalize_exactly_once() {
        let teams = 8;
        let handle = open(seeded_db(teams)).await;
        handle.configure_team_count(teams).await.unwrap();
        for i in 1..=teams {
            handle.register_team(format!("Team {i}"), None).await.unwrap();
        }

        let mut tasks = Vec::new();
        for i in 1..=teams {
            let h = handle.clone();
            tasks.push(tokio::spawn(async move {
                h.nominate(slot(i as u32), id(&format!("c{i}"))).await
            }));
        }
        let mut finalized = 0;
        for task in tasks {
            if let NominationOutcome::RoundFinalized(f) = task.await.unwrap().unwrap() {
                assert_eq!(f.picks.len(), teams);
                finalized += 1;
            }
        }
        assert_eq!(finalized, 1);
        let snap = handle.snapshot();
        assert_eq!(snap.current_round, 2);
        assert!(snap.pending_picks.is_empty());
        assert!(snap.candidates.iter().all(|c| c.nomination_count() == 1));
    }

    #[tokio::test]
    async fn concurrent_picks_of_last_seat_admit_one() {
        let handle = open(seeded_db(3)).await;
        handle.configure_team_count(3).await.unwrap();
        for name in ["A", "B", "C"] {
            handle.register_team(name, None).await.unwrap();
        }
        // Round 1: c1 taken twice, leaving one seat.
        handle.nominate(slot(1), id("c1")).await.unwrap();
        handle.nominate(slot(2), id("c1")).await.unwrap();
        handle.nominate(slot(3), id("c2")).await.unwrap();

        let a = handle.clone();
        let b = handle.clone();
        let (ra, rb) = tokio::join!(
            a.nominate(slot(1), id("c1")),
            b.nominate(slot(2), id("c1"))
        );
        let ok = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        let err = if ra.is_err() { ra } else { rb };
        assert_eq!(err.unwrap_err(), DraftError::CandidateUnavailable(id("c1")));
    }

    #[tokio::test]
    async fn reopen_restores_pending_picks() {
        let db = seeded_db(3);
        {
            let handle = open(db.clone()).await;
            two_teams(&handle).await;
            handle.nominate(slot(1), id("c3")).await.unwrap();
        }

        let handle = open(db).await;
        let snap = handle.snapshot();
        assert_eq!(snap.phase, DraftPhase::Nominating { round: 1 });
        assert_eq!(snap.pending_picks[&slot(1)], id("c3"));
        assert_eq!(
            handle.nominate(slot(1), id("c2")).await,
            Err(DraftError::AlreadyPicked {
                slot: slot(1),
                round: 1
            })
        );
    }

    #[tokio::test]
    async fn open_finalizes_stored_full_quorum() {
        let db = seeded_db(3);
        db.apply_commit(&Commit {
            state: DraftStateRecord {
                current_rank: 1,
                temporary_drafts: BTreeMap::from([(slot(1), id("c1")), (slot(2), id("c2"))]),
                total_teams: Some(2),
                registered_teams: BTreeMap::from([
                    (slot(1), "Alpha".into()),
                    (slot(2), "Bob".into()),
                ]),
                ..DraftStateRecord::default()
            },
            nominations: vec![],
            clear_history: false,
        })
        .unwrap();

        let handle = open(db.clone()).await;
        let snap = handle.snapshot();
        assert_eq!(snap.current_round, 2);
        assert!(snap.pending_picks.is_empty());

        let stored = db.load_draft_state().unwrap().unwrap();
        assert_eq!(stored.current_rank, 2);
        assert_eq!(db.load_candidates().unwrap()[0].nomination_count(), 1);
    }

    #[tokio::test]
    async fn open_rejects_inconsistent_state() {
        let db = seeded_db(1);
        db.apply_commit(&Commit {
            state: DraftStateRecord {
                current_rank: 1,
                temporary_drafts: BTreeMap::from([(slot(1), id("c1"))]),
                total_teams: Some(2),
                registered_teams: BTreeMap::new(),
                ..DraftStateRecord::default()
            },
            nominations: vec![],
            clear_history: false,
        })
        .unwrap();
        assert!(DraftRoom::open(DraftSettings::default(), db).await.is_err());
    }

    #[tokio::test]
    async fn reset_all_survives_reopen() {
        let db = seeded_db(2);
        {
            let handle = open(db.clone()).await;
            two_teams(&handle).await;
            handle.nominate(slot(1), id("c1")).await.unwrap();
            handle.nominate(slot(2), id("c2")).await.unwrap();
            handle.reset_all().await.unwrap();
        }
        let handle = open(db).await;
        let snap = handle.snapshot();
        assert_eq!(snap.phase, DraftPhase::Registering);
        assert_eq!(snap.total_team_count, None);
        assert!(snap.candidates.iter().all(|c| c.draft_info.is_empty()));
    }

    #[tokio::test]
    async fn observe_state_yields_current_then_updates() {
        let handle = open(seeded_db(2)).await;
        let mut stream = Box::pin(handle.observe_state());
        assert_eq!(stream.next().await.unwrap().version, 0);

        handle.configure_team_count(2).await.unwrap();
        let next = stream.next().await.unwrap();
        assert_eq!(next.version, 1);
        assert_eq!(next.total_team_count, Some(2));
    }

    #[tokio::test]
    async fn stopped_room_is_unavailable() {
        let room = DraftRoom::open(DraftSettings::default(), seeded_db(1))
            .await
            .unwrap();
        let (handle, task) = room.spawn();
        task.abort();
        let _ = task.await;
        assert_eq!(
            handle.configure_team_count(2).await,
            Err(DraftError::Unavailable)
        );
    }
}
