//! services/api/tests/live_session.rs
//!
//! Integration tests for the live coordination path: coordinator, registry,
//! hub and tally driven together against an in-memory store, with tokio's
//! paused clock standing in for the deadline watcher's timer.

use api_lib::live::{Hub, LiveError, SessionCoordinator, SessionRegistry};
use api_lib::web::protocol::ServerMessage;
use async_trait::async_trait;
use checkpoint_core::domain::{
    AnswerOption, Checkpoint, Presentation, ResponseRecord, Role, SessionRecord,
};
use checkpoint_core::ports::{PortError, PortResult, StoreService};
use checkpoint_core::report::compile_report;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use uuid::Uuid;

//=========================================================================================
// In-Memory Store
//=========================================================================================

#[derive(Default)]
struct Tables {
    presentations: HashMap<Uuid, Presentation>,
    checkpoints: HashMap<Uuid, Checkpoint>,
    sessions: HashMap<Uuid, SessionRecord>,
    responses: HashMap<(Uuid, Uuid, Uuid), ResponseRecord>,
}

/// A `StoreService` over hash maps, with a switch to make response persists
/// fail for the durability/liveness tests.
#[derive(Default)]
struct MemStore {
    tables: Mutex<Tables>,
    fail_upserts: AtomicBool,
    fail_ends: AtomicBool,
}

impl MemStore {
    fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    fn fail_ends(&self, fail: bool) {
        self.fail_ends.store(fail, Ordering::SeqCst);
    }

    fn response_count(&self, session_id: Uuid) -> usize {
        let tables = self.tables.lock().unwrap();
        tables
            .responses
            .values()
            .filter(|r| r.session_id == session_id)
            .count()
    }
}

#[async_trait]
impl StoreService for MemStore {
    async fn create_presentation(
        &self,
        owner_id: Uuid,
        title: &str,
        page_count: u32,
        source_file: &str,
    ) -> PortResult<Presentation> {
        let presentation = Presentation {
            id: Uuid::new_v4(),
            owner_id,
            title: title.to_string(),
            page_count,
            source_file: source_file.to_string(),
        };
        let mut tables = self.tables.lock().unwrap();
        tables.presentations.insert(presentation.id, presentation.clone());
        Ok(presentation)
    }

    async fn get_presentation(&self, presentation_id: Uuid) -> PortResult<Presentation> {
        let tables = self.tables.lock().unwrap();
        tables
            .presentations
            .get(&presentation_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Presentation {} not found", presentation_id)))
    }

    async fn get_checkpoint(&self, checkpoint_id: Uuid) -> PortResult<Checkpoint> {
        let tables = self.tables.lock().unwrap();
        tables
            .checkpoints
            .get(&checkpoint_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Checkpoint {} not found", checkpoint_id)))
    }

    async fn checkpoints_for_presentation(
        &self,
        presentation_id: Uuid,
    ) -> PortResult<Vec<Checkpoint>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .checkpoints
            .values()
            .filter(|c| c.presentation_id == presentation_id)
            .cloned()
            .collect())
    }

    async fn upsert_checkpoint_for_page(
        &self,
        presentation_id: Uuid,
        page: u32,
        prompt: &str,
        options: Vec<AnswerOption>,
        correct: BTreeSet<u16>,
        time_limit_secs: u32,
    ) -> PortResult<Checkpoint> {
        let mut checkpoint = Checkpoint::new(
            presentation_id,
            page,
            prompt.to_string(),
            options,
            correct,
            time_limit_secs,
        )
        .map_err(|e| PortError::Invalid(e.to_string()))?;

        let mut tables = self.tables.lock().unwrap();
        let existing = tables
            .checkpoints
            .values()
            .find(|c| c.presentation_id == presentation_id && c.page == page)
            .map(|c| c.id);
        if let Some(id) = existing {
            checkpoint.id = id;
        }
        tables.checkpoints.insert(checkpoint.id, checkpoint.clone());
        Ok(checkpoint)
    }

    async fn delete_checkpoint_for_page(
        &self,
        presentation_id: Uuid,
        page: u32,
    ) -> PortResult<()> {
        let mut tables = self.tables.lock().unwrap();
        tables
            .checkpoints
            .retain(|_, c| !(c.presentation_id == presentation_id && c.page == page));
        Ok(())
    }

    async fn create_session_record(
        &self,
        session_id: Uuid,
        presentation_id: Uuid,
    ) -> PortResult<SessionRecord> {
        let record = SessionRecord {
            id: session_id,
            presentation_id,
            started_at: Utc::now(),
            ended_at: None,
        };
        let mut tables = self.tables.lock().unwrap();
        tables.sessions.insert(session_id, record.clone());
        Ok(record)
    }

    async fn get_session_record(&self, session_id: Uuid) -> PortResult<SessionRecord> {
        let tables = self.tables.lock().unwrap();
        tables
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))
    }

    async fn end_session_record(&self, session_id: Uuid) -> PortResult<()> {
        if self.fail_ends.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("store unavailable".to_string()));
        }
        let mut tables = self.tables.lock().unwrap();
        if let Some(session) = tables.sessions.get_mut(&session_id) {
            session.ended_at.get_or_insert_with(Utc::now);
        }
        Ok(())
    }

    async fn sessions_for_presentation(
        &self,
        presentation_id: Uuid,
    ) -> PortResult<Vec<SessionRecord>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.presentation_id == presentation_id)
            .cloned()
            .collect())
    }

    async fn upsert_response(&self, response: ResponseRecord) -> PortResult<()> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("store unavailable".to_string()));
        }
        let key = (response.session_id, response.checkpoint_id, response.participant_id);
        let mut tables = self.tables.lock().unwrap();
        tables.responses.insert(key, response);
        Ok(())
    }

    async fn responses_for_session(&self, session_id: Uuid) -> PortResult<Vec<ResponseRecord>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .responses
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }
}

//=========================================================================================
// Test Harness
//=========================================================================================

struct Harness {
    store: Arc<MemStore>,
    coordinator: Arc<SessionCoordinator>,
}

fn harness() -> Harness {
    let store = Arc::new(MemStore::default());
    let hub = Arc::new(Hub::new());
    let registry = Arc::new(SessionRegistry::new());
    let coordinator = Arc::new(SessionCoordinator::new(hub, registry, store.clone()));
    Harness { store, coordinator }
}

impl Harness {
    /// Creates a presentation with one checkpoint and starts a session for it.
    async fn presentation_with_checkpoint(
        &self,
        page: u32,
        options: &[&str],
        correct: &[u16],
        time_limit_secs: u32,
    ) -> (Uuid, Checkpoint) {
        let presentation = self
            .store
            .create_presentation(Uuid::new_v4(), "Intro to Coordination", 3, "intro.pdf")
            .await
            .unwrap();
        let checkpoint = self
            .store
            .upsert_checkpoint_for_page(
                presentation.id,
                page,
                "Which options apply?",
                options.iter().map(|t| AnswerOption { text: t.to_string() }).collect(),
                correct.iter().copied().collect(),
                time_limit_secs,
            )
            .await
            .unwrap();
        (presentation.id, checkpoint)
    }

    fn join(&self, session_id: Uuid, role: Role) -> (Uuid, UnboundedReceiver<ServerMessage>) {
        let participant_id = Uuid::new_v4();
        let (tx, rx) = unbounded_channel();
        self.coordinator.join(session_id, participant_id, role, tx).unwrap();
        (participant_id, rx)
    }
}

fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        messages.push(msg);
    }
    messages
}

fn count_stopped(messages: &[ServerMessage]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, ServerMessage::CheckpointStopped { .. }))
        .count()
}

//=========================================================================================
// Scenarios
//=========================================================================================

#[tokio::test(start_paused = true)]
async fn end_to_end_session_flow() {
    let h = harness();
    let (presentation_id, checkpoint) =
        h.presentation_with_checkpoint(2, &["A", "B", "C", "D"], &[0, 2], 30).await;

    let session = h.coordinator.start_session(presentation_id).await.unwrap();
    let (_, mut teacher_rx) = h.join(session.id, Role::Teacher);
    let (v1, mut v1_rx) = h.join(session.id, Role::Student);

    // A fresh joiner syncs to page 1 with nothing active.
    let sync = h.coordinator.sync(session.id).unwrap();
    assert_eq!(sync.page, 1);
    assert!(sync.checkpoint.is_none());

    // Presenter advances to the checkpoint's page and opens it.
    h.coordinator.set_page(session.id, 2).unwrap();
    let deadline = h
        .coordinator
        .activate_checkpoint(session.id, checkpoint.id)
        .await
        .unwrap();

    let v1_messages = drain(&mut v1_rx);
    assert!(v1_messages.iter().any(|m| matches!(
        m,
        ServerMessage::CheckpointStarted { deadline: d, .. } if *d == deadline
    )));
    // The announcement is viewer-only.
    assert!(!drain(&mut teacher_rx)
        .iter()
        .any(|m| matches!(m, ServerMessage::CheckpointStarted { .. })));

    // V1 answers correctly; the presenter sees the tally move.
    let snapshot = h
        .coordinator
        .submit_response(session.id, checkpoint.id, v1, BTreeSet::from([0, 2]))
        .await
        .unwrap();
    assert_eq!(snapshot.counts, vec![1, 0, 1, 0]);
    assert_eq!(snapshot.total_responses, 1);
    assert!(drain(&mut teacher_rx).iter().any(|m| matches!(
        m,
        ServerMessage::TallyUpdate { counts, total_responses: 1, .. } if counts == &[1, 0, 1, 0]
    )));

    // A late joiner syncs to the same absolute deadline; its remaining time
    // is whatever is left, computed client-side from that timestamp.
    let (v2, _v2_rx) = h.join(session.id, Role::Student);
    let sync = h.coordinator.sync(session.id).unwrap();
    assert_eq!(sync.page, 2);
    assert_eq!(sync.checkpoint.as_ref().map(|c| c.id), Some(checkpoint.id));
    assert_eq!(sync.deadline, Some(deadline));

    // The deadline watcher fires at t+30s; the checkpoint closes on its own.
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(count_stopped(&drain(&mut v1_rx)), 1);

    // A submission racing past the closed window is rejected.
    let late = h
        .coordinator
        .submit_response(session.id, checkpoint.id, v2, BTreeSet::from([1]))
        .await;
    assert!(matches!(late, Err(LiveError::NoActiveCheckpoint(_))));
    assert_eq!(h.store.response_count(session.id), 1);

    // End and compile the report.
    h.coordinator.end_session(session.id).await.unwrap();
    assert!(drain(&mut v1_rx).iter().any(|m| matches!(m, ServerMessage::SessionEnded)));

    let checkpoints = h.store.checkpoints_for_presentation(presentation_id).await.unwrap();
    let responses = h.store.responses_for_session(session.id).await.unwrap();
    let report = compile_report(session.id, presentation_id, &checkpoints, &responses);

    assert_eq!(report.checkpoints.len(), 1);
    let breakdown = &report.checkpoints[0];
    assert_eq!(breakdown.total_responses, 1);
    assert_eq!(breakdown.option_counts, vec![1, 0, 1, 0]);
    assert_eq!(breakdown.participant_results[0].participant_id, v1);
    assert!(breakdown.participant_results[0].is_correct);
}

#[tokio::test(start_paused = true)]
async fn explicit_stop_and_expiry_close_exactly_once() {
    let h = harness();
    let (presentation_id, checkpoint) =
        h.presentation_with_checkpoint(1, &["yes", "no"], &[0], 10).await;
    let session = h.coordinator.start_session(presentation_id).await.unwrap();
    let (_, mut student_rx) = h.join(session.id, Role::Student);

    h.coordinator
        .activate_checkpoint(session.id, checkpoint.id)
        .await
        .unwrap();

    // Explicit stop cancels the watcher before acknowledging.
    h.coordinator.stop_checkpoint(session.id).unwrap();
    // A second stop is a no-op...
    h.coordinator.stop_checkpoint(session.id).unwrap();
    // ...and so is the already-cancelled watcher's deadline passing.
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(count_stopped(&drain(&mut student_rx)), 1);
}

#[tokio::test(start_paused = true)]
async fn expiry_then_stop_closes_exactly_once() {
    let h = harness();
    let (presentation_id, checkpoint) =
        h.presentation_with_checkpoint(1, &["yes", "no"], &[0], 10).await;
    let session = h.coordinator.start_session(presentation_id).await.unwrap();
    let (_, mut student_rx) = h.join(session.id, Role::Student);

    h.coordinator
        .activate_checkpoint(session.id, checkpoint.id)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(11)).await;
    // The watcher already closed it; a trailing stop must not re-close.
    h.coordinator.stop_checkpoint(session.id).unwrap();

    assert_eq!(count_stopped(&drain(&mut student_rx)), 1);
}

#[tokio::test(start_paused = true)]
async fn double_activation_reuses_the_active_checkpoint() {
    let h = harness();
    let (presentation_id, checkpoint) =
        h.presentation_with_checkpoint(1, &["yes", "no"], &[0], 30).await;
    let other = h
        .store
        .upsert_checkpoint_for_page(
            presentation_id,
            2,
            "Another?",
            vec![AnswerOption { text: "ok".to_string() }],
            BTreeSet::from([0]),
            30,
        )
        .await
        .unwrap();
    let session = h.coordinator.start_session(presentation_id).await.unwrap();
    let (_, mut student_rx) = h.join(session.id, Role::Student);

    let first = h
        .coordinator
        .activate_checkpoint(session.id, checkpoint.id)
        .await
        .unwrap();
    let second = h
        .coordinator
        .activate_checkpoint(session.id, checkpoint.id)
        .await
        .unwrap();
    assert_eq!(first, second);

    // Only one announcement went out.
    let announcements = drain(&mut student_rx)
        .iter()
        .filter(|m| matches!(m, ServerMessage::CheckpointStarted { .. }))
        .count();
    assert_eq!(announcements, 1);

    // A different checkpoint cannot preempt the active one.
    let preempt = h.coordinator.activate_checkpoint(session.id, other.id).await;
    assert!(matches!(preempt, Err(LiveError::CheckpointAlreadyActive(_))));
}

#[tokio::test(start_paused = true)]
async fn resubmission_overwrites_the_persisted_response() {
    let h = harness();
    let (presentation_id, checkpoint) =
        h.presentation_with_checkpoint(1, &["a", "b", "c"], &[1], 30).await;
    let session = h.coordinator.start_session(presentation_id).await.unwrap();
    let (participant, _rx) = h.join(session.id, Role::Student);

    h.coordinator
        .activate_checkpoint(session.id, checkpoint.id)
        .await
        .unwrap();

    h.coordinator
        .submit_response(session.id, checkpoint.id, participant, BTreeSet::from([0]))
        .await
        .unwrap();
    let snapshot = h
        .coordinator
        .submit_response(session.id, checkpoint.id, participant, BTreeSet::from([1, 2]))
        .await
        .unwrap();

    // Live tally reflects only the latest selection.
    assert_eq!(snapshot.counts, vec![0, 1, 1]);
    assert_eq!(snapshot.total_responses, 1);

    // So does the durable record.
    assert_eq!(h.store.response_count(session.id), 1);
    let responses = h.store.responses_for_session(session.id).await.unwrap();
    assert_eq!(responses[0].chosen, BTreeSet::from([1, 2]));
}

#[tokio::test(start_paused = true)]
async fn failed_persist_keeps_the_live_tally_and_is_retryable() {
    let h = harness();
    let (presentation_id, checkpoint) =
        h.presentation_with_checkpoint(1, &["a", "b"], &[0], 30).await;
    let session = h.coordinator.start_session(presentation_id).await.unwrap();
    let (_, mut teacher_rx) = h.join(session.id, Role::Teacher);
    let (participant, _rx) = h.join(session.id, Role::Student);

    h.coordinator
        .activate_checkpoint(session.id, checkpoint.id)
        .await
        .unwrap();

    h.store.fail_upserts(true);
    let result = h
        .coordinator
        .submit_response(session.id, checkpoint.id, participant, BTreeSet::from([0]))
        .await;
    assert!(matches!(result, Err(LiveError::Port(_))));

    // The presenter still saw the count move; durability is retried by the
    // participant, whose overwrite makes the retry safe.
    assert!(drain(&mut teacher_rx)
        .iter()
        .any(|m| matches!(m, ServerMessage::TallyUpdate { total_responses: 1, .. })));
    assert_eq!(h.store.response_count(session.id), 0);

    h.store.fail_upserts(false);
    h.coordinator
        .submit_response(session.id, checkpoint.id, participant, BTreeSet::from([0]))
        .await
        .unwrap();
    assert_eq!(h.store.response_count(session.id), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_end_write_is_retried_by_the_next_end() {
    let h = harness();
    let (presentation_id, _checkpoint) =
        h.presentation_with_checkpoint(1, &["a", "b"], &[0], 30).await;
    let session = h.coordinator.start_session(presentation_id).await.unwrap();

    // The live teardown happens but the durable write fails.
    h.store.fail_ends(true);
    let result = h.coordinator.end_session(session.id).await;
    assert!(matches!(result, Err(LiveError::Port(_))));
    let record = h.store.get_session_record(session.id).await.unwrap();
    assert!(record.ended_at.is_none());

    // The session is already ended live-side, so the retry takes the
    // idempotent path; it must still land the write.
    h.store.fail_ends(false);
    h.coordinator.end_session(session.id).await.unwrap();
    let record = h.store.get_session_record(session.id).await.unwrap();
    assert!(record.ended_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn ended_session_rejects_all_further_operations() {
    let h = harness();
    let (presentation_id, checkpoint) =
        h.presentation_with_checkpoint(1, &["a", "b"], &[0], 30).await;
    let session = h.coordinator.start_session(presentation_id).await.unwrap();
    let (_, mut student_rx) = h.join(session.id, Role::Student);

    h.coordinator
        .activate_checkpoint(session.id, checkpoint.id)
        .await
        .unwrap();
    h.coordinator.end_session(session.id).await.unwrap();

    let messages = drain(&mut student_rx);
    assert_eq!(count_stopped(&messages), 1);
    assert!(messages.iter().any(|m| matches!(m, ServerMessage::SessionEnded)));

    // Ending again is a no-op, not an error.
    h.coordinator.end_session(session.id).await.unwrap();

    // Everything else is rejected terminally.
    assert!(matches!(
        h.coordinator.activate_checkpoint(session.id, checkpoint.id).await,
        Err(LiveError::SessionEnded(_))
    ));
    let (tx, _rx) = unbounded_channel();
    assert!(matches!(
        h.coordinator.join(session.id, Uuid::new_v4(), Role::Student, tx),
        Err(LiveError::SessionEnded(_))
    ));
    // The pending watcher was cancelled with the session: nothing fires later.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(count_stopped(&drain(&mut student_rx)), 0);

    let record = h.store.get_session_record(session.id).await.unwrap();
    assert!(record.ended_at.is_some());
}
