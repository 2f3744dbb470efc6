//! services/api/src/live/mod.rs
//!
//! The live coordination path: the realtime hub, the session registry, the
//! in-memory response tally and the coordinator that drives the checkpoint
//! state machine over them.

pub mod aggregator;
pub mod coordinator;
pub mod hub;
pub mod registry;

use checkpoint_core::ports::PortError;
use uuid::Uuid;

/// Errors surfaced by live-path operations. State-machine violations are
/// recovered locally (rejected replies or no-ops), never crash a session.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("Session {0} is already open")]
    AlreadyOpen(Uuid),

    #[error("Session {0} has ended")]
    SessionEnded(Uuid),

    #[error("Session {0} already has an active checkpoint")]
    CheckpointAlreadyActive(Uuid),

    #[error("Checkpoint {0} is not the active checkpoint")]
    NoActiveCheckpoint(Uuid),

    #[error("A submission must choose at least one option")]
    EmptySelection,

    #[error("Chosen option {0} does not exist on this checkpoint")]
    SelectionOutOfBounds(u16),

    #[error("Only the presenter may perform this operation")]
    Forbidden,

    #[error(transparent)]
    Port(#[from] PortError),
}

pub use coordinator::SessionCoordinator;
pub use hub::Hub;
pub use registry::SessionRegistry;
