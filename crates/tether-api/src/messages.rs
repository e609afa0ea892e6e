use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use tether_db::ChatError;
use tether_db::message_log::HistoryCursor;
use tether_types::api::{Claims, EditMessageRequest, SendMessageRequest};
use tether_types::models::MessageId;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: pass `created_at` and `id` of the oldest message from the
    /// previous page to fetch older messages.
    pub before_created_at: Option<DateTime<Utc>>,
    pub before_id: Option<MessageId>,
}

fn default_limit() -> u32 {
    50
}

impl MessageQuery {
    fn cursor(&self) -> Result<Option<HistoryCursor>, ChatError> {
        match (self.before_created_at, self.before_id) {
            (Some(created_at), Some(id)) => Ok(Some(HistoryCursor { created_at, id })),
            (None, None) => Ok(None),
            _ => Err(ChatError::validation(
                "before_id",
                "before_created_at and before_id go together",
            )),
        }
    }
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state.service.append_message(claims.sub, conversation_id, req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let before = query.cursor()?;
    let messages = state
        .service
        .messages(claims.sub, conversation_id, query.limit, before)
        .await?;
    Ok(Json(messages))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state.service.edit_message(claims.sub, message_id, req.content).await?;
    Ok(Json(message))
}

pub async fn mark_delivered(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let message = state.service.mark_delivered(claims.sub, message_id).await?;
    Ok(Json(message))
}
