//! services/api/src/live/coordinator.rs
//!
//! The session coordinator drives the per-session checkpoint state machine
//! (Idle -> Active -> Idle) over the registry, fans events out through the
//! hub, and persists responses through the store port. All state checks are
//! delegated to the registry's atomic operations, so activate, stop and
//! expiry transitions are totally ordered per session no matter how handler
//! tasks interleave.

use crate::live::hub::{Hub, MemberSender};
use crate::live::registry::{Activation, SessionRegistry, SyncState, TallySnapshot};
use crate::live::LiveError;
use crate::web::protocol::{CheckpointView, ServerMessage};
use checkpoint_core::domain::{ResponseRecord, Role, SessionRecord};
use checkpoint_core::ports::StoreService;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Why a checkpoint left the Active state. Both paths share one close
/// routine; the registry's conditional deactivate guarantees only one of a
/// racing stop/expire pair actually transitions.
#[derive(Debug, Clone, Copy)]
enum CloseReason {
    Stopped,
    Expired,
}

pub struct SessionCoordinator {
    hub: Arc<Hub>,
    registry: Arc<SessionRegistry>,
    store: Arc<dyn StoreService>,
}

impl SessionCoordinator {
    pub fn new(hub: Arc<Hub>, registry: Arc<SessionRegistry>, store: Arc<dyn StoreService>) -> Self {
        Self { hub, registry, store }
    }

    //=====================================================================================
    // Session Lifecycle
    //=====================================================================================

    /// Starts a live session for a presentation: durable record, registry
    /// entry and hub room.
    pub async fn start_session(&self, presentation_id: Uuid) -> Result<SessionRecord, LiveError> {
        let presentation = self.store.get_presentation(presentation_id).await?;
        let session_id = Uuid::new_v4();
        let record = self
            .store
            .create_session_record(session_id, presentation.id)
            .await?;
        self.registry.open(session_id, presentation.id)?;
        self.hub.create_room(session_id);
        Ok(record)
    }

    /// Ends a session: terminal. Cancels any pending deadline watcher,
    /// closes the active checkpoint, notifies the room and tears it down.
    /// A second end is a no-op.
    pub async fn end_session(&self, session_id: Uuid) -> Result<(), LiveError> {
        let Some(closed) = self.registry.end(session_id)? else {
            // Already ended live-side, but an earlier attempt may have
            // failed the durable write. The update is idempotent, so retry
            // it rather than leaving ended_at unset forever.
            self.store.end_session_record(session_id).await?;
            return Ok(());
        };
        if let Some(checkpoint_id) = closed {
            self.hub
                .broadcast(session_id, ServerMessage::CheckpointStopped { checkpoint_id }, None);
        }
        self.hub.broadcast(session_id, ServerMessage::SessionEnded, None);
        self.hub.remove_room(session_id);
        self.store.end_session_record(session_id).await?;
        Ok(())
    }

    /// Moves the session to a new page and tells the room.
    pub fn set_page(&self, session_id: Uuid, page: u32) -> Result<(), LiveError> {
        self.registry.set_page(session_id, page)?;
        self.hub.broadcast(session_id, ServerMessage::PageChanged { page }, None);
        Ok(())
    }

    /// The catch-up view for a late joiner or reconnecting client.
    pub fn sync(&self, session_id: Uuid) -> Result<SyncState, LiveError> {
        self.registry.sync(session_id)
    }

    //=====================================================================================
    // Checkpoint State Machine
    //=====================================================================================

    /// Transitions Idle -> Active: computes the absolute deadline, registers
    /// the checkpoint with a fresh tally, schedules the deadline watcher and
    /// announces the checkpoint (correct answers withheld) to viewers.
    ///
    /// A double-start of the already-active checkpoint is idempotent and
    /// returns the running deadline without re-announcing.
    pub async fn activate_checkpoint(
        self: &Arc<Self>,
        session_id: Uuid,
        checkpoint_id: Uuid,
    ) -> Result<DateTime<Utc>, LiveError> {
        let checkpoint = self.store.get_checkpoint(checkpoint_id).await?;
        let time_limit_secs = checkpoint.time_limit_secs;
        let deadline = Utc::now() + Duration::seconds(time_limit_secs as i64);
        let watcher = CancellationToken::new();
        let view = CheckpointView::from_checkpoint(&checkpoint);

        match self
            .registry
            .activate_checkpoint(session_id, checkpoint, deadline, watcher.clone())?
        {
            Activation::AlreadyActive { deadline } => return Ok(deadline),
            Activation::Started => {}
        }
        info!(
            "Checkpoint {} active in session {} until {}",
            checkpoint_id, session_id, deadline
        );

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = watcher.cancelled() => {}
                _ = tokio::time::sleep(std::time::Duration::from_secs(time_limit_secs as u64)) => {
                    coordinator.close_checkpoint(session_id, Some(checkpoint_id), CloseReason::Expired);
                }
            }
        });

        self.hub.send_to_role(
            session_id,
            Role::Student,
            ServerMessage::CheckpointStarted { checkpoint: view, deadline },
        );
        Ok(deadline)
    }

    /// Presenter-triggered Active -> Idle. A stop with nothing active is a
    /// no-op, not an error.
    pub fn stop_checkpoint(&self, session_id: Uuid) -> Result<(), LiveError> {
        self.close_checkpoint(session_id, None, CloseReason::Stopped);
        Ok(())
    }

    /// The single close path shared by explicit stop and watcher expiry.
    /// The registry cancels the watcher token and clears the active slot in
    /// one atomic step; only the caller that actually performed the
    /// transition broadcasts, so a stop/expire race closes exactly once.
    fn close_checkpoint(&self, session_id: Uuid, expected: Option<Uuid>, reason: CloseReason) {
        let Some(checkpoint_id) = self.registry.deactivate_checkpoint(session_id, expected) else {
            return;
        };
        info!(
            "Checkpoint {} in session {} closed ({:?})",
            checkpoint_id, session_id, reason
        );
        self.hub
            .broadcast(session_id, ServerMessage::CheckpointStopped { checkpoint_id }, None);
    }

    //=====================================================================================
    // Response Intake
    //=====================================================================================

    /// Accepts one participant's answer to the active checkpoint.
    ///
    /// The tally update and its snapshot are atomic in the registry; the
    /// presenter-only `TallyUpdate` goes out before the durable write, so a
    /// slow or failing store never stalls the live count. A persist failure
    /// is returned to the submitting participant as retryable: the overwrite
    /// semantics make a retry safe.
    pub async fn submit_response(
        &self,
        session_id: Uuid,
        checkpoint_id: Uuid,
        participant_id: Uuid,
        chosen: BTreeSet<u16>,
    ) -> Result<TallySnapshot, LiveError> {
        let snapshot = self
            .registry
            .submit(session_id, checkpoint_id, participant_id, chosen.clone())?;

        self.hub.send_to_role(
            session_id,
            Role::Teacher,
            ServerMessage::TallyUpdate {
                checkpoint_id,
                counts: snapshot.counts.clone(),
                total_responses: snapshot.total_responses,
            },
        );

        let record = ResponseRecord {
            session_id,
            checkpoint_id,
            participant_id,
            chosen,
            submitted_at: Utc::now(),
        };
        if let Err(e) = self.store.upsert_response(record).await {
            error!(
                "Failed to persist response from {} for checkpoint {}: {}",
                participant_id, checkpoint_id, e
            );
            return Err(LiveError::Port(e));
        }
        Ok(snapshot)
    }

    //=====================================================================================
    // Membership
    //=====================================================================================

    /// Registers a connection with the session's room. Joins against an
    /// ended or unknown session are rejected.
    pub fn join(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        role: Role,
        tx: MemberSender,
    ) -> Result<(), LiveError> {
        if !self.registry.is_open(session_id) {
            return Err(LiveError::SessionEnded(session_id));
        }
        if !self.hub.join(session_id, participant_id, role, tx) {
            warn!("Room missing for open session {}", session_id);
            return Err(LiveError::SessionEnded(session_id));
        }
        Ok(())
    }

    pub fn leave(&self, session_id: Uuid, participant_id: Uuid) {
        self.hub.leave(session_id, participant_id);
    }
}
