// Shared HTTP-facing error type

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::cleaning::CleaningError;
use crate::data_registry::RegistryError;
use crate::fetch::FetchError;
use crate::session::SessionError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Cleaning(#[from] CleaningError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Session(SessionError::SessionNotFound(_)) => StatusCode::UNAUTHORIZED,
            AppError::Session(SessionError::MaxSessionsReached) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Cleaning(CleaningError::EmptyInput(_)) => StatusCode::BAD_REQUEST,
            AppError::Cleaning(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Fetch(FetchError::InvalidToken) => StatusCode::UNAUTHORIZED,
            AppError::Fetch(FetchError::DatabaseNotFound) => StatusCode::NOT_FOUND,
            AppError::Fetch(FetchError::Http(_) | FetchError::Api { .. }) => StatusCode::BAD_GATEWAY,
            AppError::Fetch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Registry(RegistryError::LastDataset) => StatusCode::CONFLICT,
            AppError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Session(_) => "session",
            AppError::Cleaning(e) => e.kind(),
            AppError::Fetch(_) => "fetch",
            AppError::Registry(_) => "registry",
            AppError::TooManyRequests => "rate_limited",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.kind(), "{}", self);
        }
        let mut body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        if let AppError::Cleaning(e) = &self {
            body["log"] = json!(e.log());
            if let CleaningError::ValidationRejected { rule, .. } = e {
                body["rule"] = json!(rule);
            }
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleaning_errors_map_to_422_except_empty_input() {
        let fault = AppError::from(CleaningError::ExecutionFault {
            message: "KeyError: 'x'".to_string(),
            log: "partial".to_string(),
        });
        assert_eq!(fault.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(fault.kind(), "execution_fault");

        let empty = AppError::from(CleaningError::EmptyInput("no active dataset".to_string()));
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_fetch_and_session_statuses() {
        assert_eq!(AppError::from(FetchError::InvalidToken).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::from(FetchError::Undecodable).status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            AppError::from(SessionError::MaxSessionsReached).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(AppError::from(RegistryError::LastDataset).status(), StatusCode::CONFLICT);
    }
}
