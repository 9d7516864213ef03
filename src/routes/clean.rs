//! Cleaning endpoints. Both commit to the target dataset's `clean` snapshot
//! only on success.

use axum::{
    extract::State,
    middleware,
    routing::post,
    Json, Router,
};

use crate::cleaning::{self, CleaningReport};
use crate::middleware::{rate_limiter_middleware, CurrentSession};
use crate::models::{AppState, CodeRequest, OperatorRequest};
use crate::types::AppResult;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/clean/code",
            post(run_code).route_layer(middleware::from_fn_with_state(state.clone(), rate_limiter_middleware)),
        )
        .route("/api/clean/operator", post(run_operator))
        .with_state(state)
}

/// POST /api/clean/code
async fn run_code(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(request): Json<CodeRequest>,
) -> AppResult<Json<CleaningReport>> {
    let mut registry = session.registry.lock().await;
    let report = cleaning::run_code(
        &mut registry,
        request.dataset.as_deref(),
        request.code,
        state.config.sandbox.limits(),
    )
    .await?;
    Ok(Json(report))
}

/// POST /api/clean/operator
async fn run_operator(
    CurrentSession(session): CurrentSession,
    Json(request): Json<OperatorRequest>,
) -> AppResult<Json<CleaningReport>> {
    let mut registry = session.registry.lock().await;
    let report = cleaning::apply_operator(&mut registry, request.dataset.as_deref(), &request.operator)?;
    Ok(Json(report))
}
