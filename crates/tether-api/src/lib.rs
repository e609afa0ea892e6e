//! REST surface and async facade of the messaging core.

pub mod conversations;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod middleware;
pub mod moderation;
pub mod service;
pub mod state;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, patch, post, put},
};

pub use error::{ApiError, ApiResult};
pub use service::ChatService;
pub use state::{AppState, AppStateInner};

/// All routes. Everything except `/health` requires a bearer token,
/// including the WebSocket upgrade.
pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/conversations", get(conversations::list))
        .route("/conversations/direct", post(conversations::create_direct))
        .route("/conversations/group", post(conversations::create_group))
        .route("/conversations/{conversation_id}", delete(conversations::delete))
        .route("/conversations/{conversation_id}/participants", get(conversations::participants))
        .route("/conversations/{conversation_id}/hide", post(conversations::hide).delete(conversations::reopen))
        .route("/conversations/{conversation_id}/mute", put(conversations::toggle_mute))
        .route("/conversations/{conversation_id}/read", post(conversations::mark_read))
        .route("/conversations/{conversation_id}/search", get(conversations::search))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/messages/{message_id}", patch(messages::edit_message))
        .route("/messages/{message_id}/delivered", post(messages::mark_delivered))
        .route("/blocks", get(moderation::list_blocks).post(moderation::block))
        .route("/blocks/{user_id}", delete(moderation::unblock))
        .route("/reports", post(moderation::report))
        .route("/moderation/block-and-report", post(moderation::block_and_report))
        .route("/gateway", get(gateway::upgrade))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().route("/health", get(health)).merge(protected_routes)
}

async fn health() -> &'static str {
    "ok"
}
