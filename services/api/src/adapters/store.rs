//! services/api/src/adapters/store.rs
//!
//! This module contains the database adapter, which is the concrete
//! implementation of the `StoreService` port from the `core` crate. It
//! handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use checkpoint_core::domain::{
    AnswerOption, Checkpoint, Presentation, ResponseRecord, SessionRecord,
};
use checkpoint_core::ports::{PortError, PortResult, StoreService};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeSet;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `StoreService` port.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new `PgStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found(what: &str, id: Uuid) -> impl FnOnce(sqlx::Error) -> PortError + '_ {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{} {} not found", what, id)),
        other => unexpected(other),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct PresentationRecord {
    id: Uuid,
    owner_id: Uuid,
    title: String,
    page_count: i32,
    source_file: String,
}
impl PresentationRecord {
    fn to_domain(self) -> Presentation {
        Presentation {
            id: self.id,
            owner_id: self.owner_id,
            title: self.title,
            page_count: self.page_count as u32,
            source_file: self.source_file,
        }
    }
}

#[derive(FromRow)]
struct CheckpointRecord {
    id: Uuid,
    presentation_id: Uuid,
    page: i32,
    prompt: String,
    options: Json<Vec<AnswerOption>>,
    correct: Json<Vec<u16>>,
    time_limit_secs: i32,
}
impl CheckpointRecord {
    fn to_domain(self) -> Checkpoint {
        Checkpoint {
            id: self.id,
            presentation_id: self.presentation_id,
            page: self.page as u32,
            prompt: self.prompt,
            options: self.options.0,
            correct: self.correct.0.into_iter().collect(),
            time_limit_secs: self.time_limit_secs as u32,
        }
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    presentation_id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}
impl SessionRow {
    fn to_domain(self) -> SessionRecord {
        SessionRecord {
            id: self.id,
            presentation_id: self.presentation_id,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

#[derive(FromRow)]
struct ResponseRow {
    session_id: Uuid,
    checkpoint_id: Uuid,
    participant_id: Uuid,
    chosen: Json<Vec<u16>>,
    submitted_at: DateTime<Utc>,
}
impl ResponseRow {
    fn to_domain(self) -> ResponseRecord {
        ResponseRecord {
            session_id: self.session_id,
            checkpoint_id: self.checkpoint_id,
            participant_id: self.participant_id,
            chosen: self.chosen.0.into_iter().collect(),
            submitted_at: self.submitted_at,
        }
    }
}

//=========================================================================================
// `StoreService` Trait Implementation
//=========================================================================================

#[async_trait]
impl StoreService for PgStore {
    async fn create_presentation(
        &self,
        owner_id: Uuid,
        title: &str,
        page_count: u32,
        source_file: &str,
    ) -> PortResult<Presentation> {
        let record = sqlx::query_as::<_, PresentationRecord>(
            "INSERT INTO presentations (id, owner_id, title, page_count, source_file) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, owner_id, title, page_count, source_file",
        )
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(title)
        .bind(page_count as i32)
        .bind(source_file)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_presentation(&self, presentation_id: Uuid) -> PortResult<Presentation> {
        let record = sqlx::query_as::<_, PresentationRecord>(
            "SELECT id, owner_id, title, page_count, source_file \
             FROM presentations WHERE id = $1",
        )
        .bind(presentation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found("Presentation", presentation_id))?;
        Ok(record.to_domain())
    }

    async fn get_checkpoint(&self, checkpoint_id: Uuid) -> PortResult<Checkpoint> {
        let record = sqlx::query_as::<_, CheckpointRecord>(
            "SELECT id, presentation_id, page, prompt, options, correct, time_limit_secs \
             FROM checkpoints WHERE id = $1",
        )
        .bind(checkpoint_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found("Checkpoint", checkpoint_id))?;
        Ok(record.to_domain())
    }

    async fn checkpoints_for_presentation(
        &self,
        presentation_id: Uuid,
    ) -> PortResult<Vec<Checkpoint>> {
        let records = sqlx::query_as::<_, CheckpointRecord>(
            "SELECT id, presentation_id, page, prompt, options, correct, time_limit_secs \
             FROM checkpoints WHERE presentation_id = $1 ORDER BY page ASC",
        )
        .bind(presentation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
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
        // Validate through the domain constructor before anything touches
        // the table; the generated id is only used if this page had no
        // checkpoint yet (a replace keeps the stable row id).
        let validated = Checkpoint::new(
            presentation_id,
            page,
            prompt.to_string(),
            options,
            correct,
            time_limit_secs,
        )
        .map_err(|e| PortError::Invalid(e.to_string()))?;

        let record = sqlx::query_as::<_, CheckpointRecord>(
            "INSERT INTO checkpoints (id, presentation_id, page, prompt, options, correct, time_limit_secs) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (presentation_id, page) DO UPDATE SET \
                 prompt = EXCLUDED.prompt, \
                 options = EXCLUDED.options, \
                 correct = EXCLUDED.correct, \
                 time_limit_secs = EXCLUDED.time_limit_secs \
             RETURNING id, presentation_id, page, prompt, options, correct, time_limit_secs",
        )
        .bind(validated.id)
        .bind(validated.presentation_id)
        .bind(validated.page as i32)
        .bind(&validated.prompt)
        .bind(Json(validated.options.clone()))
        .bind(Json(validated.correct.iter().copied().collect::<Vec<u16>>()))
        .bind(validated.time_limit_secs as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn delete_checkpoint_for_page(
        &self,
        presentation_id: Uuid,
        page: u32,
    ) -> PortResult<()> {
        sqlx::query("DELETE FROM checkpoints WHERE presentation_id = $1 AND page = $2")
            .bind(presentation_id)
            .bind(page as i32)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn create_session_record(
        &self,
        session_id: Uuid,
        presentation_id: Uuid,
    ) -> PortResult<SessionRecord> {
        let record = sqlx::query_as::<_, SessionRow>(
            "INSERT INTO sessions (id, presentation_id) VALUES ($1, $2) \
             RETURNING id, presentation_id, started_at, ended_at",
        )
        .bind(session_id)
        .bind(presentation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_session_record(&self, session_id: Uuid) -> PortResult<SessionRecord> {
        let record = sqlx::query_as::<_, SessionRow>(
            "SELECT id, presentation_id, started_at, ended_at FROM sessions WHERE id = $1",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found("Session", session_id))?;
        Ok(record.to_domain())
    }

    async fn end_session_record(&self, session_id: Uuid) -> PortResult<()> {
        sqlx::query("UPDATE sessions SET ended_at = now() WHERE id = $1 AND ended_at IS NULL")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn sessions_for_presentation(
        &self,
        presentation_id: Uuid,
    ) -> PortResult<Vec<SessionRecord>> {
        let records = sqlx::query_as::<_, SessionRow>(
            "SELECT id, presentation_id, started_at, ended_at \
             FROM sessions WHERE presentation_id = $1 ORDER BY started_at DESC",
        )
        .bind(presentation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn upsert_response(&self, response: ResponseRecord) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO responses (session_id, checkpoint_id, participant_id, chosen, submitted_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (session_id, checkpoint_id, participant_id) DO UPDATE SET \
                 chosen = EXCLUDED.chosen, \
                 submitted_at = EXCLUDED.submitted_at",
        )
        .bind(response.session_id)
        .bind(response.checkpoint_id)
        .bind(response.participant_id)
        .bind(Json(response.chosen.iter().copied().collect::<Vec<u16>>()))
        .bind(response.submitted_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn responses_for_session(&self, session_id: Uuid) -> PortResult<Vec<ResponseRecord>> {
        let records = sqlx::query_as::<_, ResponseRow>(
            "SELECT session_id, checkpoint_id, participant_id, chosen, submitted_at \
             FROM responses WHERE session_id = $1 ORDER BY submitted_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }
}
