//! crates/checkpoint_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of specific external implementations like databases.

use crate::domain::{AnswerOption, Checkpoint, Presentation, ResponseRecord, SessionRecord};
use async_trait::async_trait;
use std::collections::BTreeSet;
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid input: {0}")]
    Invalid(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Durable Store Port
//=========================================================================================

/// The contract the live path relies on for durable state: presentations and
/// their checkpoint definitions, session records, and response records.
/// Each call is individually atomic; no cross-call transaction semantics are
/// assumed.
#[async_trait]
pub trait StoreService: Send + Sync {
    // --- Presentations ---
    async fn create_presentation(
        &self,
        owner_id: Uuid,
        title: &str,
        page_count: u32,
        source_file: &str,
    ) -> PortResult<Presentation>;

    async fn get_presentation(&self, presentation_id: Uuid) -> PortResult<Presentation>;

    // --- Checkpoint Definitions ---
    async fn get_checkpoint(&self, checkpoint_id: Uuid) -> PortResult<Checkpoint>;

    async fn checkpoints_for_presentation(
        &self,
        presentation_id: Uuid,
    ) -> PortResult<Vec<Checkpoint>>;

    /// Creates or replaces the single checkpoint defined for a page.
    async fn upsert_checkpoint_for_page(
        &self,
        presentation_id: Uuid,
        page: u32,
        prompt: &str,
        options: Vec<AnswerOption>,
        correct: BTreeSet<u16>,
        time_limit_secs: u32,
    ) -> PortResult<Checkpoint>;

    async fn delete_checkpoint_for_page(
        &self,
        presentation_id: Uuid,
        page: u32,
    ) -> PortResult<()>;

    // --- Session Records ---
    async fn create_session_record(
        &self,
        session_id: Uuid,
        presentation_id: Uuid,
    ) -> PortResult<SessionRecord>;

    async fn get_session_record(&self, session_id: Uuid) -> PortResult<SessionRecord>;

    async fn end_session_record(&self, session_id: Uuid) -> PortResult<()>;

    async fn sessions_for_presentation(
        &self,
        presentation_id: Uuid,
    ) -> PortResult<Vec<SessionRecord>>;

    // --- Responses ---
    /// Persists a response, overwriting any earlier response by the same
    /// participant for the same checkpoint within the same session.
    async fn upsert_response(&self, response: ResponseRecord) -> PortResult<()>;

    async fn responses_for_session(&self, session_id: Uuid) -> PortResult<Vec<ResponseRecord>>;
}
