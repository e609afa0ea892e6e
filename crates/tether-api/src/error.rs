use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use tether_db::ChatError;
use tether_types::api::ErrorBody;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error(transparent)]
    Chat(#[from] ChatError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Chat(e) => match e {
                ChatError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                ChatError::NotAParticipant => (StatusCode::FORBIDDEN, "not_a_participant"),
                ChatError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
                ChatError::Blocked => (StatusCode::FORBIDDEN, "blocked"),
                ChatError::SelfConversation => (StatusCode::BAD_REQUEST, "self_conversation"),
                ChatError::EmptyContent => (StatusCode::BAD_REQUEST, "empty_content"),
                ChatError::Validation { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
                ChatError::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
                ChatError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
                ChatError::Database(_) | ChatError::Internal(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!("Request failed: {}", self);
            "internal server error".to_string()
        } else {
            if status == StatusCode::SERVICE_UNAVAILABLE {
                warn!("Request failed: {}", self);
            }
            self.to_string()
        };

        let field = match &self {
            ApiError::Chat(ChatError::Validation { field, .. }) => Some(field.to_string()),
            _ => None,
        };

        (
            status,
            Json(ErrorBody {
                error: code.to_string(),
                message,
                field,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(e: ChatError) -> StatusCode {
        ApiError::from(e).into_response().status()
    }

    #[test]
    fn chat_errors_map_to_statuses() {
        assert_eq!(status(ChatError::NotFound("conversation")), StatusCode::NOT_FOUND);
        assert_eq!(status(ChatError::NotAParticipant), StatusCode::FORBIDDEN);
        assert_eq!(status(ChatError::Blocked), StatusCode::FORBIDDEN);
        assert_eq!(status(ChatError::SelfConversation), StatusCode::BAD_REQUEST);
        assert_eq!(status(ChatError::EmptyContent), StatusCode::BAD_REQUEST);
        assert_eq!(status(ChatError::validation("reason", "required")), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status(ChatError::Transient("busy".into())), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(ChatError::Internal("boom".into())), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::Unauthorized.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn only_retryable_errors_are_503() {
        assert!(ChatError::Transient("locked".into()).is_retryable());
        assert!(!ChatError::Blocked.is_retryable());
    }
}
