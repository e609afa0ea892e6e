//! Fixtures shared by the unit tests.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use tether_types::models::{
    Conversation, ConversationId, ConversationSummary, Message, MessageId, MessageType, MuteState, UserId,
};

pub fn summary(created_at: DateTime<Utc>) -> ConversationSummary {
    ConversationSummary {
        conversation: Conversation {
            id: Uuid::new_v4(),
            created_at,
            updated_at: created_at,
            last_message_at: None,
        },
        participant_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
        is_group: false,
        last_message: None,
        unread_count: 0,
        mute: MuteState::Unmuted,
    }
}

pub fn message(conversation_id: ConversationId, sender_id: UserId, id: MessageId, at: DateTime<Utc>) -> Message {
    Message {
        id,
        conversation_id,
        sender_id,
        content: Some(format!("message {}", id)),
        message_type: MessageType::Text,
        file_url: None,
        file_name: None,
        file_size: None,
        created_at: at,
        edited_at: None,
        delivered_at: None,
        updated_at: at,
    }
}
