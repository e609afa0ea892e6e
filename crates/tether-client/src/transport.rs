use std::future::{self, Future};

use anyhow::Context;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, info, warn};

use tether_types::events::GatewayEvent;
use tether_types::models::{ConversationSummary, UserId};

/// A live event channel for one user. The stream ending means the channel
/// is gone and a new one has to be opened.
pub trait EventSource: Send + Sync + 'static {
    fn connect(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = anyhow::Result<BoxStream<'static, GatewayEvent>>> + Send;
}

/// Full snapshot of a user's conversation list.
pub trait ConversationFetcher: Send + Sync + 'static {
    fn fetch_conversations(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = anyhow::Result<Vec<ConversationSummary>>> + Send;
}

/// Gateway WebSocket, authenticated with a bearer token on the upgrade.
#[derive(Debug, Clone)]
pub struct WsEventSource {
    url: String,
    token: String,
}

impl WsEventSource {
    /// `url` is the full gateway URL, e.g. `ws://localhost:3000/gateway`.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }
}

impl EventSource for WsEventSource {
    async fn connect(&self, user_id: UserId) -> anyhow::Result<BoxStream<'static, GatewayEvent>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid gateway url {}", self.url))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token)).context("invalid token")?;
        request.headers_mut().insert("authorization", bearer);

        let (ws, _) = connect_async(request)
            .await
            .with_context(|| format!("WebSocket connect to {} failed", self.url))?;
        info!("Gateway connected for {}", user_id);

        // tungstenite answers pings while the stream is polled.
        let events = ws
            .take_while(|msg| future::ready(matches!(msg, Ok(m) if !m.is_close())))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                        Ok(event) => Some(event),
                        Err(e) => {
                            warn!("Undecodable gateway event: {}", e);
                            None
                        }
                    },
                    _ => None,
                })
            })
            .boxed();
        Ok(events)
    }
}

/// REST `GET /conversations` with the same bearer token.
#[derive(Debug, Clone)]
pub struct HttpConversationFetcher {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpConversationFetcher {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

impl ConversationFetcher for HttpConversationFetcher {
    async fn fetch_conversations(&self, user_id: UserId) -> anyhow::Result<Vec<ConversationSummary>> {
        let url = format!("{}/conversations", self.base_url);
        let body = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()?
            .bytes()
            .await?;

        let conversations: Vec<ConversationSummary> =
            serde_json::from_slice(&body).context("malformed conversation list")?;
        debug!("Fetched {} conversations for {}", conversations.len(), user_id);
        Ok(conversations)
    }
}
