// SQLite persistence layer for draft state.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use serde::Deserialize;

use crate::draft::candidate::{Candidate, NominationEvent};
use crate::draft::registry::TeamSlot;
use crate::store::{Commit, DraftStateRecord, DraftStore, StoredDraft};

/// SQLite-backed persistence for candidates, nomination history, and
/// key-value draft state.
pub struct Database {
    conn: Mutex<Connection>,
}

/// A JSON export of the original document store: one `draft_state` record
/// and a map of candidate documents keyed by document id.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyExport {
    #[serde(default)]
    pub draft_state: Option<DraftStateRecord>,
    #[serde(default)]
    pub candidates: BTreeMap<String, LegacyCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyCandidate {
    pub name: String,
    #[serde(default)]
    pub draft_info: Vec<NominationEvent>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS candidates (
                id   TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                seq  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS nominations (
                candidate_id TEXT NOT NULL REFERENCES candidates(id),
                epoch        INTEGER NOT NULL DEFAULT 0,
                team         INTEGER NOT NULL,
                rank         INTEGER NOT NULL,
                timestamp    TEXT NOT NULL,
                PRIMARY KEY (candidate_id, epoch, team, rank)
            );

            CREATE TABLE IF NOT EXISTS draft_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Self::migrate_nominations_add_epoch(&conn)?;

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_nominations_order
                 ON nominations(epoch, rank, team);",
        )
        .context("failed to create nominations index")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Rebuild a `nominations` table created before draft epochs existed.
    /// The primary key changes, which ALTER TABLE cannot do, so the table is
    /// renamed, recreated and copied. Existing rows land in epoch 0.
    fn migrate_nominations_add_epoch(conn: &Connection) -> Result<()> {
        let has_epoch = conn
            .prepare("SELECT epoch FROM nominations LIMIT 0")
            .is_ok();
        if has_epoch {
            return Ok(());
        }

        conn.execute_batch(
            "
            ALTER TABLE nominations RENAME TO nominations_old;

            CREATE TABLE nominations (
                candidate_id TEXT NOT NULL REFERENCES candidates(id),
                epoch        INTEGER NOT NULL DEFAULT 0,
                team         INTEGER NOT NULL,
                rank         INTEGER NOT NULL,
                timestamp    TEXT NOT NULL,
                PRIMARY KEY (candidate_id, epoch, team, rank)
            );

            INSERT INTO nominations (candidate_id, epoch, team, rank, timestamp)
                SELECT candidate_id, 0, team, rank, timestamp FROM nominations_old;

            DROP TABLE nominations_old;
            ",
        )
        .context("failed to migrate nominations table for draft epochs")?;

        Ok(())
    }

    /// Acquire the database connection.
    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    /// Write the `draft_state` record on `conn`, which is normally an open
    /// transaction. INSERT OR REPLACE overwrites the previous record.
    fn put_draft_state(conn: &Connection, state: &DraftStateRecord) -> Result<()> {
        let json_str = serde_json::to_string(state).context("failed to serialize draft state")?;
        conn.execute(
            "INSERT OR REPLACE INTO draft_state (key, value) VALUES (?1, ?2)",
            params![Self::DRAFT_STATE_KEY, json_str],
        )
        .context("failed to save draft state")?;
        Ok(())
    }

    /// Load a previously saved JSON value by `key`. Returns `None` if the key
    /// does not exist.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT value FROM draft_state WHERE key = ?1")
            .context("failed to prepare load_state query")?;

        let mut rows = stmt
            .query_map(params![key], |row| {
                let json_str: String = row.get(0)?;
                Ok(json_str)
            })
            .context("failed to query draft state")?;

        match rows.next() {
            Some(row_result) => {
                let json_str = row_result.context("failed to read state row")?;
                let value: serde_json::Value = serde_json::from_str(&json_str)
                    .context("failed to deserialize state value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Key of the single `draft_state` record in the key-value table.
    const DRAFT_STATE_KEY: &'static str = "draft_state";

    /// Load the stored `draft_state` record, if one was ever saved.
    pub fn load_draft_state(&self) -> Result<Option<DraftStateRecord>> {
        match self.load_state(Self::DRAFT_STATE_KEY)? {
            Some(value) => {
                let record = serde_json::from_value(value)
                    .context("stored draft_state record is malformed")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Insert candidates or rename existing ones, in a single transaction.
    /// New candidates are appended after the existing ones in display order;
    /// nomination history is untouched.
    pub fn seed_candidates(&self, candidates: &[Candidate]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("failed to begin seed transaction")?;

        let next_seq: i64 = tx
            .query_row("SELECT COALESCE(MAX(seq), -1) + 1 FROM candidates", [], |row| {
                row.get(0)
            })
            .context("failed to read candidate sequence")?;

        for (offset, candidate) in candidates.iter().enumerate() {
            tx.execute(
                "INSERT INTO candidates (id, name, seq) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![candidate.id.as_str(), candidate.name, next_seq + offset as i64],
            )
            .context("failed to upsert candidate")?;
        }

        tx.commit().context("failed to commit candidate seed")?;
        Ok(())
    }

    /// Number of candidates in the pool.
    pub fn candidate_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM candidates", [], |row| row.get(0))
            .context("failed to count candidates")?;
        Ok(count as usize)
    }

    /// Load every candidate with its nomination history, in seeding order.
    /// History is ordered by round, then team.
    pub fn load_candidates(&self) -> Result<Vec<Candidate>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT id, name FROM candidates ORDER BY seq, id")
            .context("failed to prepare load_candidates query")?;
        let mut candidates = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let name: String = row.get(1)?;
                Ok(Candidate::new(id, name))
            })
            .context("failed to query candidates")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map candidate rows")?;

        let index: HashMap<String, usize> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.as_str().to_string(), i))
            .collect();

        let mut stmt = conn
            .prepare(
                "SELECT candidate_id, epoch, team, rank, timestamp
                 FROM nominations ORDER BY epoch, rank, team",
            )
            .context("failed to prepare nominations query")?;
        let rows = stmt
            .query_map([], |row| {
                let candidate_id: String = row.get(0)?;
                let epoch: u32 = row.get(1)?;
                let team: u32 = row.get(2)?;
                let round: u32 = row.get(3)?;
                let timestamp: String = row.get(4)?;
                let team = TeamSlot::new(team).ok_or_else(|| {
                    rusqlite::Error::IntegralValueOutOfRange(2, i64::from(team))
                })?;
                let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
                    })?;
                Ok((
                    candidate_id,
                    NominationEvent {
                        epoch,
                        team,
                        round,
                        timestamp,
                    },
                ))
            })
            .context("failed to query nominations")?;

        for row in rows {
            let (candidate_id, event) = row.context("failed to map nomination row")?;
            let Some(&i) = index.get(&candidate_id) else {
                continue;
            };
            let candidate = &mut candidates[i];
            if !candidate.drafted_by.contains(&event.team) {
                candidate.drafted_by.push(event.team);
            }
            candidate.draft_info.push(event);
        }

        Ok(candidates)
    }

    /// Apply one accepted intent's changes in a single transaction: optional
    /// history wipe, new nomination events, then the `draft_state` record.
    ///
    /// Nomination inserts use INSERT OR IGNORE keyed by
    /// `(candidate_id, epoch, team, rank)`, so replaying a commit is harmless.
    pub fn apply_commit(&self, commit: &Commit) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("failed to begin commit transaction")?;

        if commit.clear_history {
            tx.execute("DELETE FROM nominations", [])
                .context("failed to clear nomination history")?;
        }

        for record in &commit.nominations {
            tx.execute(
                "INSERT OR IGNORE INTO nominations (candidate_id, epoch, team, rank, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.candidate_id.as_str(),
                    record.event.epoch,
                    record.event.team.get(),
                    record.event.round,
                    record
                        .event
                        .timestamp
                        .to_rfc3339_opts(SecondsFormat::Millis, true),
                ],
            )
            .context("failed to record nomination")?;
        }

        Self::put_draft_state(&tx, &commit.state)?;

        tx.commit().context("failed to commit draft changes")?;
        Ok(())
    }

    /// Delete all nomination history and draft state. The candidate list is
    /// preserved. Uses a proper transaction with automatic rollback on error.
    pub fn clear_draft(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute("DELETE FROM nominations", [])
            .context("failed to delete nominations")?;
        tx.execute("DELETE FROM draft_state", [])
            .context("failed to delete draft state")?;
        tx.commit().context("failed to commit clear_draft")?;
        Ok(())
    }

    /// Parse a JSON export (see [`LegacyExport`]) and import it.
    pub fn import_legacy_json(&self, json: &str) -> Result<usize> {
        let export: LegacyExport =
            serde_json::from_str(json).context("failed to parse legacy export")?;
        self.import_legacy(&export)
    }

    /// Replace the stored draft with a JSON export of the original document
    /// store. Candidates are upserted by document id; their history and the
    /// `draft_state` record are replaced. Returns the number of candidates.
    pub fn import_legacy(&self, export: &LegacyExport) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("failed to begin import transaction")?;

        let next_seq: i64 = tx
            .query_row("SELECT COALESCE(MAX(seq), -1) + 1 FROM candidates", [], |row| {
                row.get(0)
            })
            .context("failed to read candidate sequence")?;

        tx.execute("DELETE FROM nominations", [])
            .context("failed to clear nomination history")?;

        for (offset, (id, candidate)) in export.candidates.iter().enumerate() {
            tx.execute(
                "INSERT INTO candidates (id, name, seq) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![id, candidate.name, next_seq + offset as i64],
            )
            .context("failed to upsert imported candidate")?;

            for event in &candidate.draft_info {
                tx.execute(
                    "INSERT OR IGNORE INTO nominations (candidate_id, epoch, team, rank, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        id,
                        event.epoch,
                        event.team.get(),
                        event.round,
                        event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                    ],
                )
                .context("failed to import nomination")?;
            }
        }

        let state = export.draft_state.clone().unwrap_or_default();
        Self::put_draft_state(&tx, &state)?;

        tx.commit().context("failed to commit import")?;
        Ok(export.candidates.len())
    }
}

#[async_trait]
impl DraftStore for Database {
    async fn load(&self) -> Result<StoredDraft> {
        Ok(StoredDraft {
            state: self.load_draft_state()?,
            candidates: self.load_candidates()?,
        })
    }

    async fn commit(&self, commit: &Commit) -> Result<()> {
        self.apply_commit(commit)
    }
}
