// Session extraction from the `x-session-id` header

use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use super::SESSION_HEADER;
use crate::models::AppState;
use crate::session::Session;
use crate::types::AppError;

/// The caller's session, resolved (and touched) from the request header.
pub struct CurrentSession(pub Arc<Session>);

impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::BadRequest(format!("missing {} header", SESSION_HEADER)))?;
        let id = Uuid::parse_str(raw.trim())
            .map_err(|_| AppError::BadRequest(format!("invalid session id: {}", raw)))?;
        Ok(CurrentSession(state.sessions.get(&id).await?))
    }
}
