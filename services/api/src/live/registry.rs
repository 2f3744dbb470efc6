//! services/api/src/live/registry.rs
//!
//! The session registry: the authoritative, in-memory mapping from session
//! id to live state (current page, active checkpoint, deadline, tally,
//! ended flag). Every mutation takes the registry lock once, so each
//! check-and-set is atomic and all transitions for one session are totally
//! ordered; there is no read-then-write window for a stop/expire race.
//! The lock is never held across an await point.

use crate::live::aggregator::Tally;
use crate::live::LiveError;
use checkpoint_core::domain::Checkpoint;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

//=========================================================================================
// Live Session State
//=========================================================================================

struct ActiveCheckpoint {
    checkpoint: Checkpoint,
    deadline: DateTime<Utc>,
    watcher: CancellationToken,
    tally: Tally,
}

struct LiveSession {
    presentation_id: Uuid,
    current_page: u32,
    active: Option<ActiveCheckpoint>,
    ended: bool,
}

/// The outcome of an activation attempt.
pub enum Activation {
    /// The checkpoint transitioned Idle -> Active.
    Started,
    /// The same checkpoint was already active: a presenter double-start is
    /// idempotent and reuses the running deadline.
    AlreadyActive { deadline: DateTime<Utc> },
}

/// A point-in-time copy of the live tally, taken under the registry lock.
#[derive(Debug, Clone)]
pub struct TallySnapshot {
    pub counts: Vec<u32>,
    pub total_responses: u32,
}

/// The session state a late joiner or reconnecting client needs to catch up.
#[derive(Debug, Clone)]
pub struct SyncState {
    pub page: u32,
    pub checkpoint: Option<Checkpoint>,
    pub deadline: Option<DateTime<Utc>>,
}

//=========================================================================================
// Registry
//=========================================================================================

/// Tracks every live session on this instance. Ended sessions keep a
/// tombstone entry so operations against them keep failing with
/// `SessionEnded` instead of being mistaken for unknown sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, LiveSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new live session at page 1 with no active checkpoint.
    pub fn open(&self, session_id: Uuid, presentation_id: Uuid) -> Result<(), LiveError> {
        let mut sessions = self.sessions.lock().expect("registry lock poisoned");
        if sessions.contains_key(&session_id) {
            return Err(LiveError::AlreadyOpen(session_id));
        }
        sessions.insert(
            session_id,
            LiveSession {
                presentation_id,
                current_page: 1,
                active: None,
                ended: false,
            },
        );
        info!("Session {} opened for presentation {}", session_id, presentation_id);
        Ok(())
    }

    /// True for a session that is registered and not yet ended.
    pub fn is_open(&self, session_id: Uuid) -> bool {
        let sessions = self.sessions.lock().expect("registry lock poisoned");
        sessions.get(&session_id).is_some_and(|s| !s.ended)
    }

    pub fn set_page(&self, session_id: Uuid, page: u32) -> Result<(), LiveError> {
        let mut sessions = self.sessions.lock().expect("registry lock poisoned");
        let session = live_session(&mut sessions, session_id)?;
        session.current_page = page;
        Ok(())
    }

    /// Atomically transitions Idle -> Active. Re-activating the checkpoint
    /// that is already active is idempotent; activating a different one
    /// while Active fails, preserving the single-active-checkpoint invariant.
    pub fn activate_checkpoint(
        &self,
        session_id: Uuid,
        checkpoint: Checkpoint,
        deadline: DateTime<Utc>,
        watcher: CancellationToken,
    ) -> Result<Activation, LiveError> {
        let mut sessions = self.sessions.lock().expect("registry lock poisoned");
        let session = live_session(&mut sessions, session_id)?;
        if let Some(active) = &session.active {
            if active.checkpoint.id == checkpoint.id {
                return Ok(Activation::AlreadyActive { deadline: active.deadline });
            }
            return Err(LiveError::CheckpointAlreadyActive(session_id));
        }
        let option_count = checkpoint.options.len();
        session.active = Some(ActiveCheckpoint {
            checkpoint,
            deadline,
            watcher,
            tally: Tally::new(option_count),
        });
        Ok(Activation::Started)
    }

    /// Atomically transitions Active -> Idle, cancelling the deadline
    /// watcher under the lock so a racing expiry cannot double-fire.
    ///
    /// Returns the closed checkpoint's id, or `None` when there was nothing
    /// to close (already Idle, already ended, or `expected` no longer the
    /// active checkpoint); those are all idempotent no-ops.
    pub fn deactivate_checkpoint(
        &self,
        session_id: Uuid,
        expected: Option<Uuid>,
    ) -> Option<Uuid> {
        let mut sessions = self.sessions.lock().expect("registry lock poisoned");
        let session = sessions.get_mut(&session_id)?;
        let matches = match (&session.active, expected) {
            (Some(active), Some(id)) => active.checkpoint.id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return None;
        }
        let active = session.active.take()?;
        active.watcher.cancel();
        Some(active.checkpoint.id)
    }

    /// Marks the session ended: terminal. Any active checkpoint is closed
    /// and its watcher cancelled. Returns the previously active checkpoint
    /// id (if any), or `None` as a whole if the session had already ended
    /// (idempotent).
    pub fn end(&self, session_id: Uuid) -> Result<Option<Option<Uuid>>, LiveError> {
        let mut sessions = self.sessions.lock().expect("registry lock poisoned");
        let Some(session) = sessions.get_mut(&session_id) else {
            return Err(LiveError::SessionEnded(session_id));
        };
        if session.ended {
            return Ok(None);
        }
        session.ended = true;
        let closed = session.active.take().map(|active| {
            active.watcher.cancel();
            active.checkpoint.id
        });
        info!("Session {} ended", session_id);
        Ok(Some(closed))
    }

    /// Returns the state a (re)joining client needs: current page plus the
    /// active checkpoint and its absolute deadline, if one is open.
    pub fn sync(&self, session_id: Uuid) -> Result<SyncState, LiveError> {
        let mut sessions = self.sessions.lock().expect("registry lock poisoned");
        let session = live_session(&mut sessions, session_id)?;
        Ok(SyncState {
            page: session.current_page,
            checkpoint: session.active.as_ref().map(|a| a.checkpoint.clone()),
            deadline: session.active.as_ref().map(|a| a.deadline),
        })
    }

    /// Records a submission against the active checkpoint and returns the
    /// updated tally. The whole check-update sequence runs under the
    /// registry lock, so two submissions can never interleave their
    /// decrement/increment pairs.
    pub fn submit(
        &self,
        session_id: Uuid,
        checkpoint_id: Uuid,
        participant_id: Uuid,
        chosen: BTreeSet<u16>,
    ) -> Result<TallySnapshot, LiveError> {
        if chosen.is_empty() {
            return Err(LiveError::EmptySelection);
        }
        let mut sessions = self.sessions.lock().expect("registry lock poisoned");
        let session = live_session(&mut sessions, session_id)?;
        let Some(active) = session.active.as_mut().filter(|a| a.checkpoint.id == checkpoint_id)
        else {
            // Covers both "nothing active" and "a different checkpoint is
            // active": the server-side window is authoritative, so a late
            // submission racing network delay lands here.
            return Err(LiveError::NoActiveCheckpoint(checkpoint_id));
        };
        let option_count = active.checkpoint.options.len() as u16;
        if let Some(&ordinal) = chosen.iter().find(|&&ordinal| ordinal >= option_count) {
            return Err(LiveError::SelectionOutOfBounds(ordinal));
        }
        active.tally.record(participant_id, chosen);
        Ok(TallySnapshot {
            counts: active.tally.counts().to_vec(),
            total_responses: active.tally.total_responses(),
        })
    }
}

/// Looks up a session that must still be live. Unknown sessions report as
/// ended: their live state was torn down, which is indistinguishable to
/// callers and yields the same recovery.
fn live_session<'a>(
    sessions: &'a mut HashMap<Uuid, LiveSession>,
    session_id: Uuid,
) -> Result<&'a mut LiveSession, LiveError> {
    match sessions.get_mut(&session_id) {
        Some(session) if !session.ended => Ok(session),
        _ => Err(LiveError::SessionEnded(session_id)),
    }
}

//=========================================================================================
// Tests
//=========================================================================================
