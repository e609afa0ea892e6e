use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachment, MuteState};

// -- JWT Claims --

/// JWT claims shared across tether-api (REST middleware) and the gateway
/// upgrade. Tokens are issued by the identity service; this side only
/// validates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DirectConversationRequest {
    pub other_user_id: Uuid,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConversationRequest {
    pub participant_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationCreated {
    pub conversation_id: Uuid,
}

/// `duration_hours` absent and `indefinite` false means unmute.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleMuteRequest {
    pub duration_hours: Option<u32>,
    #[serde(default)]
    pub indefinite: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MuteResponse {
    pub mute: MuteState,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub at: Option<DateTime<Utc>>,
}

// -- Messages --

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

// -- Moderation --

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BlockRequest {
    pub blocked_id: Uuid,
}

/// `reason` is optional on the wire so that a missing reason surfaces as a
/// field-level validation error instead of a generic body rejection.
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReportRequest {
    pub reported_id: Uuid,
    pub reason: Option<String>,
    pub description: Option<String>,
    pub conversation_id: Option<Uuid>,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}
