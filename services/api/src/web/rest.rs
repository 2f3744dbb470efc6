//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints (the presentation
//! editor surface, session lifecycle and the post-session report) and the
//! master definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use checkpoint_core::domain::{
    option_letter, AnswerOption, SessionReport, DEFAULT_TIME_LIMIT_SECS,
};
use checkpoint_core::ports::PortError;
use checkpoint_core::report::compile_report;
use crate::live::LiveError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_presentation_handler,
        upsert_checkpoint_handler,
        delete_checkpoint_handler,
        start_session_handler,
        list_sessions_handler,
        end_session_handler,
        get_report_handler,
    ),
    components(
        schemas(
            CreatePresentationRequest,
            PresentationResponse,
            UpsertCheckpointRequest,
            CheckpointResponse,
            CheckpointOptionResponse,
            StartSessionResponse,
            SessionSummary,
        )
    ),
    tags(
        (name = "Live Checkpoint API", description = "Presentation editor, session lifecycle and report endpoints.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Request and Response Payloads
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreatePresentationRequest {
    pub owner_id: Uuid,
    pub title: String,
    pub page_count: u32,
    pub source_file: String,
}

#[derive(Serialize, ToSchema)]
pub struct PresentationResponse {
    pub presentation_id: Uuid,
    pub title: String,
    pub page_count: u32,
}

/// The editor's create-or-replace payload for a page's checkpoint. Correct
/// answers are ordinal positions into `options`; the letters shown to
/// participants are derived from position and never stored.
#[derive(Deserialize, ToSchema)]
pub struct UpsertCheckpointRequest {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct: BTreeSet<u16>,
    pub time_limit_secs: Option<u32>,
}

#[derive(Serialize, ToSchema)]
pub struct CheckpointOptionResponse {
    pub letter: String,
    pub text: String,
}

#[derive(Serialize, ToSchema)]
pub struct CheckpointResponse {
    pub checkpoint_id: Uuid,
    pub page: u32,
    pub prompt: String,
    pub options: Vec<CheckpointOptionResponse>,
    pub correct: BTreeSet<u16>,
    pub time_limit_secs: u32,
}

#[derive(Serialize, ToSchema)]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub presentation_id: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

//=========================================================================================
// Editor Handlers
//=========================================================================================

/// Create a presentation.
#[utoipa::path(
    post,
    path = "/presentations",
    request_body = CreatePresentationRequest,
    responses(
        (status = 201, description = "Presentation created", body = PresentationResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_presentation_handler(
    State(app_state): State<AppState>,
    Json(payload): Json<CreatePresentationRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let presentation = app_state
        .store
        .create_presentation(
            payload.owner_id,
            &payload.title,
            payload.page_count,
            &payload.source_file,
        )
        .await
        .map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(PresentationResponse {
            presentation_id: presentation.id,
            title: presentation.title,
            page_count: presentation.page_count,
        }),
    ))
}

/// Create or replace the checkpoint defined for one page.
#[utoipa::path(
    put,
    path = "/presentations/{presentation_id}/pages/{page}/checkpoint",
    request_body = UpsertCheckpointRequest,
    responses(
        (status = 200, description = "Checkpoint saved", body = CheckpointResponse),
        (status = 400, description = "Invalid checkpoint definition"),
        (status = 404, description = "Presentation not found")
    ),
    params(
        ("presentation_id" = Uuid, Path, description = "The presentation to edit."),
        ("page" = u32, Path, description = "The page the checkpoint is bound to.")
    )
)]
pub async fn upsert_checkpoint_handler(
    State(app_state): State<AppState>,
    Path((presentation_id, page)): Path<(Uuid, u32)>,
    Json(payload): Json<UpsertCheckpointRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // Presentation must exist before a checkpoint can hang off one of its pages.
    app_state
        .store
        .get_presentation(presentation_id)
        .await
        .map_err(port_error)?;

    let options: Vec<AnswerOption> = payload
        .options
        .into_iter()
        .map(|text| AnswerOption { text })
        .collect();
    let time_limit_secs = payload.time_limit_secs.unwrap_or(DEFAULT_TIME_LIMIT_SECS);

    let checkpoint = app_state
        .store
        .upsert_checkpoint_for_page(
            presentation_id,
            page,
            &payload.prompt,
            options,
            payload.correct,
            time_limit_secs,
        )
        .await
        .map_err(port_error)?;

    Ok(Json(CheckpointResponse {
        checkpoint_id: checkpoint.id,
        page: checkpoint.page,
        prompt: checkpoint.prompt,
        options: checkpoint
            .options
            .iter()
            .enumerate()
            .map(|(ordinal, option)| CheckpointOptionResponse {
                letter: option_letter(ordinal as u16).to_string(),
                text: option.text.clone(),
            })
            .collect(),
        correct: checkpoint.correct,
        time_limit_secs: checkpoint.time_limit_secs,
    }))
}

/// Delete the checkpoint defined for one page.
#[utoipa::path(
    delete,
    path = "/presentations/{presentation_id}/pages/{page}/checkpoint",
    responses(
        (status = 204, description = "Checkpoint removed"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("presentation_id" = Uuid, Path, description = "The presentation to edit."),
        ("page" = u32, Path, description = "The page whose checkpoint is removed.")
    )
)]
pub async fn delete_checkpoint_handler(
    State(app_state): State<AppState>,
    Path((presentation_id, page)): Path<(Uuid, u32)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .store
        .delete_checkpoint_for_page(presentation_id, page)
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Session Lifecycle Handlers
//=========================================================================================

/// Start a live session for a presentation.
#[utoipa::path(
    post,
    path = "/presentations/{presentation_id}/sessions",
    responses(
        (status = 201, description = "Session started", body = StartSessionResponse),
        (status = 404, description = "Presentation not found")
    ),
    params(
        ("presentation_id" = Uuid, Path, description = "The presentation to present.")
    )
)]
pub async fn start_session_handler(
    State(app_state): State<AppState>,
    Path(presentation_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let session = app_state
        .coordinator
        .start_session(presentation_id)
        .await
        .map_err(live_error)?;

    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_id: session.id,
            presentation_id: session.presentation_id,
        }),
    ))
}

/// End a live session. Terminal; also reachable over the socket.
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/end",
    responses(
        (status = 204, description = "Session ended"),
        (status = 404, description = "Session not found")
    ),
    params(
        ("session_id" = Uuid, Path, description = "The session to end.")
    )
)]
pub async fn end_session_handler(
    State(app_state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .coordinator
        .end_session(session_id)
        .await
        .map_err(live_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// List the sessions that were held for a presentation.
#[utoipa::path(
    get,
    path = "/presentations/{presentation_id}/sessions",
    responses(
        (status = 200, description = "Past and live sessions", body = [SessionSummary]),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("presentation_id" = Uuid, Path, description = "The presentation to list sessions for.")
    )
)]
pub async fn list_sessions_handler(
    State(app_state): State<AppState>,
    Path(presentation_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let sessions = app_state
        .store
        .sessions_for_presentation(presentation_id)
        .await
        .map_err(internal_error)?;

    let summaries: Vec<SessionSummary> = sessions
        .into_iter()
        .map(|s| SessionSummary {
            session_id: s.id,
            started_at: s.started_at,
            ended_at: s.ended_at,
        })
        .collect();
    Ok(Json(summaries))
}

//=========================================================================================
// Report Handler
//=========================================================================================

/// Compile the post-session report for an ended session.
#[utoipa::path(
    get,
    path = "/sessions/{session_id}/report",
    responses(
        (status = 200, description = "The compiled per-checkpoint report"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session is still live")
    ),
    params(
        ("session_id" = Uuid, Path, description = "The ended session to report on.")
    )
)]
pub async fn get_report_handler(
    State(app_state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionReport>, (StatusCode, String)> {
    let session = app_state
        .store
        .get_session_record(session_id)
        .await
        .map_err(port_error)?;
    if session.ended_at.is_none() {
        return Err((
            StatusCode::CONFLICT,
            "Session is still live; end it before requesting the report".to_string(),
        ));
    }

    let checkpoints = app_state
        .store
        .checkpoints_for_presentation(session.presentation_id)
        .await
        .map_err(internal_error)?;
    let responses = app_state
        .store
        .responses_for_session(session_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(compile_report(
        session_id,
        session.presentation_id,
        &checkpoints,
        &responses,
    )))
}

//=========================================================================================
// Error Mapping
//=========================================================================================

fn internal_error(error: PortError) -> (StatusCode, String) {
    error!("Store operation failed: {}", error);
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
}

fn port_error(error: PortError) -> (StatusCode, String) {
    match error {
        PortError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        PortError::Invalid(message) => (StatusCode::BAD_REQUEST, message),
        PortError::Conflict(message) => (StatusCode::CONFLICT, message),
        other => internal_error(other),
    }
}

fn live_error(error: LiveError) -> (StatusCode, String) {
    match error {
        LiveError::Port(port) => port_error(port),
        LiveError::AlreadyOpen(_) => (StatusCode::CONFLICT, error.to_string()),
        LiveError::SessionEnded(_) => (StatusCode::NOT_FOUND, error.to_string()),
        other => (StatusCode::CONFLICT, other.to_string()),
    }
}
