use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tether_db::search::DEFAULT_SEARCH_LIMIT;
use tether_types::api::{
    Claims, ConversationCreated, DirectConversationRequest, GroupConversationRequest, MarkReadRequest,
    MuteResponse, ToggleMuteRequest,
};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn create_direct(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<DirectConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let conversation_id = state
        .service
        .get_or_create_direct_conversation(claims.sub, req.other_user_id)
        .await?;
    Ok(Json(ConversationCreated { conversation_id }))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GroupConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let conversation_id = state
        .service
        .create_group_conversation(claims.sub, req.participant_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(ConversationCreated { conversation_id })))
}

pub async fn list(State(state): State<AppState>, Extension(claims): Extension<Claims>) -> ApiResult<impl IntoResponse> {
    let conversations = state.service.list_conversations(claims.sub).await?;
    Ok(Json(conversations))
}

pub async fn participants(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let participants = state.service.participants(claims.sub, conversation_id).await?;
    Ok(Json(participants))
}

pub async fn hide(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    state.service.hide_conversation(claims.sub, conversation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reopen(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    state.service.reopen_conversation(claims.sub, conversation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    state.service.delete_conversation(claims.sub, conversation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_mute(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleMuteRequest>,
) -> ApiResult<impl IntoResponse> {
    let mute = state.service.toggle_mute(claims.sub, conversation_id, req).await?;
    Ok(Json(MuteResponse { mute }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    req: Option<Json<MarkReadRequest>>,
) -> ApiResult<StatusCode> {
    let at = req.and_then(|Json(r)| r.at);
    state.service.mark_read(claims.sub, conversation_id, at).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<u32>,
}

pub async fn search(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    // Cancelled if the client goes away mid-search.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let results = state
        .service
        .search_messages(
            claims.sub,
            conversation_id,
            query.q,
            query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
            cancel,
        )
        .await?;
    Ok(Json(results))
}
