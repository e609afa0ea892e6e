use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type ConversationId = Uuid;
pub type MessageId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Timestamp used to order conversation lists: the latest message, or
    /// creation time for a conversation nobody has written in yet.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

/// Notification suppression for one participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "muted_until", rename_all = "snake_case")]
pub enum MuteState {
    #[default]
    Unmuted,
    MutedUntil(DateTime<Utc>),
    MutedIndefinitely,
}

impl MuteState {
    pub fn is_muted(&self, now: DateTime<Utc>) -> bool {
        match self {
            MuteState::Unmuted => false,
            MuteState::MutedUntil(until) => now < *until,
            MuteState::MutedIndefinitely => true,
        }
    }
}

/// The mute choices offered to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuteDuration {
    OneHour,
    EightHours,
    OneDay,
    OneWeek,
    Indefinitely,
    Unmute,
}

impl MuteDuration {
    /// Maps an hour count from the API onto one of the offered durations.
    pub fn from_hours(hours: u32) -> Option<Self> {
        match hours {
            1 => Some(Self::OneHour),
            8 => Some(Self::EightHours),
            24 => Some(Self::OneDay),
            168 => Some(Self::OneWeek),
            _ => None,
        }
    }

    pub fn resolve(self, now: DateTime<Utc>) -> MuteState {
        match self {
            Self::OneHour => MuteState::MutedUntil(now + Duration::hours(1)),
            Self::EightHours => MuteState::MutedUntil(now + Duration::hours(8)),
            Self::OneDay => MuteState::MutedUntil(now + Duration::hours(24)),
            Self::OneWeek => MuteState::MutedUntil(now + Duration::hours(168)),
            Self::Indefinitely => MuteState::MutedIndefinitely,
            Self::Unmute => MuteState::Unmuted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub mute: MuteState,
    pub notifications_enabled: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn is_hidden(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether a new message should raise a notification for this participant.
    pub fn wants_notification(&self, now: DateTime<Utc>) -> bool {
        self.notifications_enabled && !self.mute.is_muted(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    File,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::System => "system",
        }
    }
}

impl FromStr for MessageType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            "system" => Ok(MessageType::System),
            other => Err(UnknownVariant::new("message_type", other)),
        }
    }
}

/// Opaque reference to a blob stored elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Attachment {
    pub url: String,
    pub name: Option<String>,
    pub size: Option<i64>,
    #[serde(default)]
    pub kind: AttachmentKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    #[default]
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Total order of messages within a conversation.
    pub fn sort_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub blocker_id: UserId,
    pub blocked_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportReason {
    Spam,
    Harassment,
    InappropriateContent,
    FakeProfile,
    Threats,
    Other,
}

impl ReportReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportReason::Spam => "spam",
            ReportReason::Harassment => "harassment",
            ReportReason::InappropriateContent => "inappropriate_content",
            ReportReason::FakeProfile => "fake_profile",
            ReportReason::Threats => "threats",
            ReportReason::Other => "other",
        }
    }
}

impl FromStr for ReportReason {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spam" => Ok(ReportReason::Spam),
            "harassment" => Ok(ReportReason::Harassment),
            "inappropriate_content" => Ok(ReportReason::InappropriateContent),
            "fake_profile" => Ok(ReportReason::FakeProfile),
            "threats" => Ok(ReportReason::Threats),
            "other" => Ok(ReportReason::Other),
            other => Err(UnknownVariant::new("reason", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Reviewed,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Reviewed => "reviewed",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Dismissed => "dismissed",
        }
    }
}

impl FromStr for ReportStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReportStatus::Pending),
            "reviewed" => Ok(ReportStatus::Reviewed),
            "resolved" => Ok(ReportStatus::Resolved),
            "dismissed" => Ok(ReportStatus::Dismissed),
            other => Err(UnknownVariant::new("status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub reporter_id: UserId,
    pub reported_id: UserId,
    pub reason: ReportReason,
    pub description: Option<String>,
    pub conversation_id: Option<ConversationId>,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

/// One row of a user's conversation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub participant_ids: Vec<UserId>,
    pub is_group: bool,
    pub last_message: Option<Message>,
    pub unread_count: u32,
    pub mute: MuteState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMessage {
    pub message: Message,
    pub rank: f64,
}

/// A string column or field did not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.field, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mute_until_expires_lazily() {
        let now = Utc::now();
        let state = MuteDuration::OneHour.resolve(now);
        assert!(state.is_muted(now + Duration::minutes(59)));
        assert!(!state.is_muted(now + Duration::minutes(61)));
    }

    #[test]
    fn indefinite_mute_never_expires() {
        let now = Utc::now();
        let state = MuteDuration::Indefinitely.resolve(now);
        assert!(state.is_muted(now + Duration::days(365 * 50)));
        assert!(!MuteDuration::Unmute.resolve(now).is_muted(now));
    }

    #[test]
    fn only_offered_hour_counts_map() {
        assert_eq!(MuteDuration::from_hours(8), Some(MuteDuration::EightHours));
        assert_eq!(MuteDuration::from_hours(168), Some(MuteDuration::OneWeek));
        assert_eq!(MuteDuration::from_hours(2), None);
    }

    #[test]
    fn mute_state_wire_shape() {
        let json = serde_json::to_value(MuteState::MutedIndefinitely).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "muted_indefinitely" }));

        let json = serde_json::to_value(MuteState::Unmuted).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "unmuted" }));

        let until: DateTime<Utc> = "2030-01-02T03:04:05.123456Z".parse().unwrap();
        let json = serde_json::to_value(MuteState::MutedUntil(until)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "state": "muted_until", "muted_until": "2030-01-02T03:04:05.123456Z" })
        );
        assert_eq!(serde_json::from_value::<MuteState>(json).unwrap(), MuteState::MutedUntil(until));
    }

    #[test]
    fn report_reason_parses_closed_set() {
        assert_eq!("fake_profile".parse::<ReportReason>(), Ok(ReportReason::FakeProfile));
        let err = "rude".parse::<ReportReason>().unwrap_err();
        assert_eq!(err.field, "reason");
    }
}
