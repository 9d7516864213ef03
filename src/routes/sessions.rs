use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, post},
    Json, Router,
};
use tracing::info;

use crate::middleware::CurrentSession;
use crate::models::{AppState, SessionCreated};
use crate::types::AppResult;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/current", delete(end_session))
        .with_state(state)
}

async fn create_session(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let session = state.sessions.create().await?;
    info!(session = %session.id, "session created");
    Ok((
        StatusCode::CREATED,
        Json(SessionCreated {
            session_id: session.id,
            created_at: session.created_at,
        }),
    ))
}

async fn end_session(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> StatusCode {
    state.sessions.remove(&session.id).await;
    info!(session = %session.id, "session ended");
    StatusCode::NO_CONTENT
}
