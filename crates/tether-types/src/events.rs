use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ConversationId, Message, MessageId};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection is live
    Ready { user_id: Uuid, username: String },

    /// A message was appended to a conversation the recipient belongs to.
    /// `notify` is false when the recipient muted the conversation.
    MessageCreate { message: Message, notify: bool },

    /// A message was edited by its sender
    MessageUpdate { message: Message },

    /// A message reached at least one recipient device
    MessageDelivered {
        conversation_id: ConversationId,
        message_id: MessageId,
        delivered_at: DateTime<Utc>,
    },

    /// The recipient was added to a new conversation
    ConversationCreate { conversation_id: ConversationId },

    /// A conversation was removed for every participant
    ConversationDelete { conversation_id: ConversationId },

    /// The recipient read a conversation on another device
    ReadStateUpdate {
        conversation_id: ConversationId,
        last_read_at: DateTime<Utc>,
    },
}

impl GatewayEvent {
    /// Returns the conversation this event concerns, if any.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Self::Ready { .. } => None,
            Self::MessageCreate { message, .. } => Some(message.conversation_id),
            Self::MessageUpdate { message } => Some(message.conversation_id),
            Self::MessageDelivered { conversation_id, .. } => Some(*conversation_id),
            Self::ConversationCreate { conversation_id } => Some(*conversation_id),
            Self::ConversationDelete { conversation_id } => Some(*conversation_id),
            Self::ReadStateUpdate { conversation_id, .. } => Some(*conversation_id),
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Acknowledge that a message reached this device
    MarkDelivered { message_id: MessageId },

    /// Mark a conversation read up to now
    MarkRead { conversation_id: ConversationId },
}
