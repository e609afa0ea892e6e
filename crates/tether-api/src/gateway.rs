use std::future;

use axum::{
    Extension,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use tether_client::{ConversationFetcher, EventSource};
use tether_gateway::{Dispatcher, connection};
use tether_types::api::Claims;
use tether_types::events::GatewayEvent;
use tether_types::models::{ConversationSummary, UserId};

use crate::service::ChatService;
use crate::state::AppState;

/// `GET /gateway`. The auth middleware has already validated the token.
pub async fn upgrade(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let dispatcher = state.service.dispatcher().clone();
    let db = state.service.database().clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, db, claims.sub, claims.username))
}

/// Event source for clients living in the same process as the server.
#[derive(Clone)]
pub struct InProcessSource {
    dispatcher: Dispatcher,
}

impl InProcessSource {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl EventSource for InProcessSource {
    fn connect(
        &self,
        user_id: UserId,
    ) -> impl future::Future<Output = anyhow::Result<BoxStream<'static, GatewayEvent>>> + Send {
        future::ready(Ok(self.dispatcher.subscribe(user_id).boxed()))
    }
}

impl ConversationFetcher for ChatService {
    async fn fetch_conversations(&self, user_id: UserId) -> anyhow::Result<Vec<ConversationSummary>> {
        Ok(self.list_conversations(user_id).await?)
    }
}
