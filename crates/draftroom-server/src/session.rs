// Per-connection session: decodes client intents, enforces slot binding and
// admin gating, and forwards accepted intents to the draft room.

use std::sync::Arc;

use draftroom_core::error::ErrorKind;
use draftroom_core::protocol::{ClientMessage, DraftSnapshot, ErrorPayload, Intent, Reply, ServerMessage};
use draftroom_core::{DraftError, DraftHandle, TeamSlot};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("register a team before nominating")]
    Unbound,

    #[error("this connection holds slot {bound}, not slot {requested}")]
    SlotMismatch { bound: TeamSlot, requested: TeamSlot },

    #[error("admin login required")]
    AdminRequired,

    #[error("incorrect admin password")]
    BadPassword,

    #[error(transparent)]
    Draft(#[from] DraftError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Malformed(_) => "MALFORMED_MESSAGE",
            SessionError::Unbound => "SESSION_UNBOUND",
            SessionError::SlotMismatch { .. } => "SLOT_MISMATCH",
            SessionError::AdminRequired => "ADMIN_REQUIRED",
            SessionError::BadPassword => "BAD_PASSWORD",
            SessionError::Draft(e) => e.code(),
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        let kind = match self {
            SessionError::Draft(e) => return ErrorPayload::from(e),
            SessionError::AdminRequired => ErrorKind::Conflict,
            _ => ErrorKind::Validation,
        };
        ErrorPayload {
            kind,
            code: self.code().to_string(),
            message: self.to_string(),
            retryable: false,
        }
    }
}

/// The registration this connection holds.
struct Binding {
    slot: TeamSlot,
    name: String,
    token: String,
}

/// Identity and privileges of one connected client.
pub struct Session {
    handle: DraftHandle,
    admin_password: Option<Arc<str>>,
    addr: String,
    bound: Option<Binding>,
    admin: bool,
}

impl Session {
    pub fn new(handle: DraftHandle, admin_password: Option<Arc<str>>, addr: impl Into<String>) -> Self {
        Session {
            handle,
            admin_password,
            addr: addr.into(),
            bound: None,
            admin: false,
        }
    }

    pub fn slot(&self) -> Option<TeamSlot> {
        self.bound.as_ref().map(|b| b.slot)
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DraftSnapshot>> {
        self.handle.subscribe()
    }

    /// Drop the slot binding once the slot no longer belongs to this
    /// session's team (participants reset, team count changed).
    pub fn observe(&mut self, snapshot: &DraftSnapshot) {
        let Some(b) = &self.bound else {
            return;
        };
        if snapshot.registered_teams.get(&b.slot) != Some(&b.name) {
            info!("{}: slot {} is no longer registered to '{}'", self.addr, b.slot, b.name);
            self.bound = None;
        }
    }

    /// Handle one text frame and build the direct reply.
    pub async fn handle_text(&mut self, text: &str) -> ServerMessage {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("{}: malformed message: {}", self.addr, e);
                let err = SessionError::Malformed(e.to_string());
                return ServerMessage::reply_to(None, Reply::Error { error: err.payload() });
            }
        };
        let request_id = msg.request_id;
        match self.dispatch(msg.intent).await {
            Ok(reply) => ServerMessage::reply_to(request_id, reply),
            Err(err) => {
                debug!("{}: intent rejected: {}", self.addr, err);
                ServerMessage::reply_to(request_id, Reply::Error { error: err.payload() })
            }
        }
    }

    async fn dispatch(&mut self, intent: Intent) -> Result<Reply, SessionError> {
        match intent {
            Intent::RegisterTeam { name, slot, token } => {
                let explicit = slot.map(|slot| (slot, token.unwrap_or_default()));
                let held = self.bound.as_ref().map(|b| (b.slot, b.token.clone()));
                let registration = match (explicit, held) {
                    (Some(reclaim), _) => {
                        self.handle.register_team(name.as_str(), Some(reclaim)).await?
                    }
                    (None, Some(held)) => {
                        match self.handle.register_team(name.as_str(), Some(held)).await {
                            // The held slot was cleared by a reset this
                            // session has not observed yet.
                            Err(DraftError::ReclaimRejected(_)) => {
                                self.bound = None;
                                self.handle.register_team(name.as_str(), None).await?
                            }
                            other => other?,
                        }
                    }
                    (None, None) => self.handle.register_team(name.as_str(), None).await?,
                };
                self.bound = Some(Binding {
                    slot: registration.slot,
                    name: registration.name.clone(),
                    token: registration.token.clone(),
                });
                Ok(Reply::Registered {
                    slot: registration.slot,
                    name: registration.name,
                    token: registration.token,
                })
            }
            Intent::ConfigureTeamCount { count } => {
                self.require_admin()?;
                let outcome = self.handle.configure_team_count(count).await?;
                Ok(Reply::Configured { outcome })
            }
            Intent::Nominate {
                team_slot,
                candidate_id,
            } => {
                let bound = self.slot().ok_or(SessionError::Unbound)?;
                if bound != team_slot {
                    return Err(SessionError::SlotMismatch {
                        bound,
                        requested: team_slot,
                    });
                }
                let outcome = self.handle.nominate(team_slot, candidate_id).await?;
                Ok(Reply::Nominated { outcome })
            }
            Intent::FinalizeRound => {
                self.require_admin()?;
                let finalized = self.handle.finalize_round().await?;
                Ok(Reply::Ack {
                    detail: format!("round {} finalized", finalized.round),
                })
            }
            Intent::ResetParticipants => {
                self.require_admin()?;
                self.handle.reset_participants().await?;
                Ok(Reply::Ack {
                    detail: "participants reset".into(),
                })
            }
            Intent::ResetAll => {
                self.require_admin()?;
                self.handle.reset_all().await?;
                Ok(Reply::Ack {
                    detail: "draft reset".into(),
                })
            }
            Intent::AdminLogin { password } => self.admin_login(&password),
        }
    }

    fn admin_login(&mut self, password: &str) -> Result<Reply, SessionError> {
        match self.admin_password.as_deref() {
            None => {
                self.admin = true;
                Ok(Reply::Ack {
                    detail: "admin login not required".into(),
                })
            }
            Some(expected) if expected == password => {
                info!("{}: admin login accepted", self.addr);
                self.admin = true;
                Ok(Reply::Ack {
                    detail: "admin login accepted".into(),
                })
            }
            Some(_) => {
                warn!("{}: admin login rejected", self.addr);
                Err(SessionError::BadPassword)
            }
        }
    }

    fn require_admin(&self) -> Result<(), SessionError> {
        if self.admin_password.is_some() && !self.admin {
            return Err(SessionError::AdminRequired);
        }
        Ok(())
    }
}
