// Library root for the draft round-coordination core: the state machine,
// its persistence, the client protocol and the serialized draft-room actor.

pub mod db;
pub mod draft;
pub mod error;
pub mod protocol;
pub mod room;
pub mod store;

pub use draft::candidate::{Candidate, CandidateId, CandidatePool, NominationEvent};
pub use draft::coordinator::{DraftCoordinator, DraftPhase, DraftSettings};
pub use draft::registry::{Registration, TeamSlot};
pub use error::{DraftError, ErrorKind};
pub use room::{DraftHandle, DraftRoom};
