use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use tether_types::api::{BlockRequest, Claims, ReportRequest};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list_blocks(State(state): State<AppState>, Extension(claims): Extension<Claims>) -> ApiResult<impl IntoResponse> {
    let blocks = state.service.blocked_users(claims.sub).await?;
    Ok(Json(blocks))
}

/// Idempotent; blocking someone twice is not an error.
pub async fn block(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<BlockRequest>,
) -> ApiResult<StatusCode> {
    state.service.block_user(claims.sub, req.blocked_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unblock(
    State(state): State<AppState>,
    Path(blocked_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    state.service.unblock_user(claims.sub, blocked_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn report(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReportRequest>,
) -> ApiResult<impl IntoResponse> {
    let report = state.service.report_user(claims.sub, req).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn block_and_report(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReportRequest>,
) -> ApiResult<impl IntoResponse> {
    let report = state.service.block_and_report(claims.sub, req).await?;
    Ok((StatusCode::CREATED, Json(report)))
}
