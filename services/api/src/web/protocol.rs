//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between presenter/viewer clients
//! and the API server for live checkpoint sessions.

use checkpoint_core::domain::{option_letter, Checkpoint, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Joins a session's room. This must be the first message sent on the
    /// connection; it is also how a reconnecting client re-registers.
    Join {
        session_id: Uuid,
        participant_id: Uuid,
        role: Role,
    },

    /// Presenter-only: moves the session to a new page.
    SetPage { page: u32 },

    /// Presenter-only: opens a checkpoint for answering.
    ActivateCheckpoint { checkpoint_id: Uuid },

    /// Presenter-only: closes the active checkpoint before its deadline.
    StopCheckpoint,

    /// A viewer's answer to the active checkpoint. `chosen` holds option
    /// ordinals (0 = A, 1 = B, ...).
    SubmitResponse {
        checkpoint_id: Uuid,
        chosen: BTreeSet<u16>,
    },

    /// Requests the current session state. Used by late joiners and
    /// reconnecting clients to catch up without having observed the original
    /// broadcasts.
    Sync,

    /// Presenter-only: ends the session. Terminal.
    EndSession,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

/// Represents the structured text messages the server can send to a client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the connection joined the session's room.
    Joined { session_id: Uuid },

    /// The current session state, sent in reply to `Sync`. Clients derive
    /// remaining answer time from the absolute `deadline` timestamp, never
    /// from a server-pushed countdown, so delivery jitter cannot drift it.
    SessionSync {
        page: u32,
        checkpoint: Option<CheckpointView>,
        deadline: Option<DateTime<Utc>>,
    },

    /// The presenter moved to a new page.
    PageChanged { page: u32 },

    /// A checkpoint opened for answering. Sent to viewers only.
    CheckpointStarted {
        checkpoint: CheckpointView,
        deadline: DateTime<Utc>,
    },

    /// The active checkpoint closed (explicit stop or deadline expiry).
    CheckpointStopped { checkpoint_id: Uuid },

    /// Live per-option counts. Sent to the presenter only.
    TallyUpdate {
        checkpoint_id: Uuid,
        counts: Vec<u32>,
        total_responses: u32,
    },

    /// The submitting participant's answer was recorded.
    ResponseAccepted { checkpoint_id: Uuid },

    /// The submission arrived after the checkpoint closed; the client should
    /// show a "time's up" state rather than a generic failure.
    SubmissionClosed { checkpoint_id: Uuid },

    /// The presenter ended the session. Terminal.
    SessionEnded,

    /// Reports an error to the client. `retryable` signals that the same
    /// request may be retried (e.g. the durable write behind a submission
    /// failed while the live tally already moved on).
    Error { message: String, retryable: bool },
}

//=========================================================================================
// Wire Views
//=========================================================================================

/// One answer option as shown to participants: the display letter derived
/// from the ordinal position, plus the option text.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OptionView {
    pub letter: char,
    pub text: String,
}

/// A checkpoint as announced to viewers. The correct-answer set is withheld;
/// only the editor and the report compiler ever see it.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CheckpointView {
    pub id: Uuid,
    pub page: u32,
    pub prompt: String,
    pub options: Vec<OptionView>,
    pub time_limit_secs: u32,
}

impl CheckpointView {
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            id: checkpoint.id,
            page: checkpoint.page,
            prompt: checkpoint.prompt.clone(),
            options: checkpoint
                .options
                .iter()
                .enumerate()
                .map(|(ordinal, option)| OptionView {
                    letter: option_letter(ordinal as u16),
                    text: option.text.clone(),
                })
                .collect(),
            time_limit_secs: checkpoint.time_limit_secs,
        }
    }
}
