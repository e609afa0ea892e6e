use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use tether_types::models::{
    Attachment, AttachmentKind, ConversationId, Message, MessageId, MessageType, UserId,
};

use crate::directory::load_conversation;
use crate::models::{MESSAGE_COLUMNS, message_from_row, now, opt_ts, ts};
use crate::moderation::blocked_between;
use crate::participants::{load_participants, missing_participant, require_participant};
use crate::{ChatError, ChatResult, Database, HidePolicy};

pub const MAX_CONTENT_CHARS: usize = 4000;
pub const MAX_PAGE_SIZE: u32 = 200;

/// What a sender wants to post: text, an attachment, or both.
#[derive(Debug, Clone, Default)]
pub struct MessageBody {
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
}

impl MessageBody {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            attachment: None,
        }
    }

    /// Trim the content and reject bodies with nothing to deliver.
    fn validate(self) -> ChatResult<(Option<String>, MessageType, Option<Attachment>)> {
        let content = normalize_content(self.content)?;

        let attachment = match self.attachment {
            Some(a) if a.url.trim().is_empty() => {
                return Err(ChatError::validation("attachment.url", "must not be empty"));
            }
            Some(a) if a.size.is_some_and(|s| s < 0) => {
                return Err(ChatError::validation("attachment.size", "must not be negative"));
            }
            other => other,
        };

        let message_type = match &attachment {
            Some(a) if a.kind == AttachmentKind::Image => MessageType::Image,
            Some(_) => MessageType::File,
            None => MessageType::Text,
        };

        if content.is_none() && attachment.is_none() {
            return Err(ChatError::EmptyContent);
        }
        Ok((content, message_type, attachment))
    }
}

fn normalize_content(content: Option<String>) -> ChatResult<Option<String>> {
    let Some(content) = content else {
        return Ok(None);
    };
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_CONTENT_CHARS {
        return Err(ChatError::validation(
            "content",
            format!("at most {} characters", MAX_CONTENT_CHARS),
        ));
    }
    Ok(Some(trimmed.to_string()))
}

/// A participant that should receive the realtime event for a new message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: UserId,
    pub notify: bool,
}

#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub message: Message,
    /// Visible participants after the append, sender included (for their
    /// other devices, never notified).
    pub recipients: Vec<Recipient>,
}

/// Position in a conversation's history; pages are read strictly before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryCursor {
    pub created_at: DateTime<Utc>,
    pub id: MessageId,
}

impl Database {
    /// Append a message. Membership, block checks, ordering and the parent
    /// conversation update all happen in one write transaction.
    pub fn append(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        body: MessageBody,
    ) -> ChatResult<AppendOutcome> {
        let (content, message_type, attachment) = body.validate()?;
        let hide_policy = self.hide_policy;

        let outcome = self.transact(|tx| {
            let conversation = load_conversation(tx, conversation_id)?;
            let participants = load_participants(tx, conversation_id)?;

            let sender = participants
                .iter()
                .find(|p| p.user_id == sender_id)
                .ok_or(ChatError::NotAParticipant)?;
            if sender.is_hidden() {
                return Err(ChatError::NotAParticipant);
            }

            for other in participants.iter().filter(|p| p.user_id != sender_id) {
                if blocked_between(tx, sender_id, other.user_id)? {
                    return Err(ChatError::Blocked);
                }
            }

            // Never earlier than the previous message, even if the clock steps back.
            let now = now();
            let created_at = match conversation.last_message_at {
                Some(last) if last > now => last,
                _ => now,
            };

            tx.execute(
                "INSERT INTO messages
                    (conversation_id, sender_id, content, message_type,
                     file_url, file_name, file_size, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    conversation_id.to_string(),
                    sender_id.to_string(),
                    content,
                    message_type.as_str(),
                    attachment.as_ref().map(|a| a.url.clone()),
                    attachment.as_ref().and_then(|a| a.name.clone()),
                    attachment.as_ref().and_then(|a| a.size),
                    ts(created_at),
                    ts(now),
                ],
            )?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE conversations SET last_message_at = ?2, updated_at = ?3 WHERE id = ?1",
                (conversation_id.to_string(), ts(created_at), ts(now)),
            )?;

            if hide_policy == HidePolicy::UnhideOnNewMessage {
                tx.execute(
                    "UPDATE participants SET deleted_at = NULL
                     WHERE conversation_id = ?1 AND deleted_at IS NOT NULL",
                    [conversation_id.to_string()],
                )?;
            }

            let recipients = participants
                .iter()
                .filter(|p| hide_policy == HidePolicy::UnhideOnNewMessage || !p.is_hidden())
                .map(|p| Recipient {
                    user_id: p.user_id,
                    notify: p.user_id != sender_id && p.wants_notification(now),
                })
                .collect();

            let message = load_message(tx, id)?;
            Ok(AppendOutcome { message, recipients })
        })?;

        debug!(
            "Appended message {} to {} ({} recipients)",
            outcome.message.id,
            conversation_id,
            outcome.recipients.len()
        );
        Ok(outcome)
    }

    /// Replace the content of one's own message.
    pub fn edit(&self, message_id: MessageId, sender_id: UserId, new_content: String) -> ChatResult<Message> {
        let content = normalize_content(Some(new_content))?;

        self.transact(|tx| {
            let message = load_message(tx, message_id)?;
            if message.sender_id != sender_id {
                return Err(ChatError::Forbidden("only the sender can edit a message"));
            }
            if message.message_type == MessageType::System {
                return Err(ChatError::Forbidden("system messages cannot be edited"));
            }
            if content.is_none() && message.file_url.is_none() {
                return Err(ChatError::EmptyContent);
            }

            let now = ts(now());
            tx.execute(
                "UPDATE messages SET content = ?2, edited_at = ?3, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![message_id, content, now],
            )?;
            load_message(tx, message_id)
        })
    }

    /// Record first delivery. Returns the message and whether this call set it.
    pub fn mark_delivered(&self, message_id: MessageId) -> ChatResult<(Message, bool)> {
        self.transact(|tx| {
            let now = ts(now());
            let changed = tx.execute(
                "UPDATE messages SET delivered_at = ?2 WHERE id = ?1 AND delivered_at IS NULL",
                rusqlite::params![message_id, now],
            )?;
            let message = load_message(tx, message_id)?;
            Ok((message, changed == 1))
        })
    }

    pub fn message(&self, message_id: MessageId) -> ChatResult<Message> {
        self.with_conn(|conn| load_message(conn, message_id))
    }

    /// A page of history, newest first. `reader` must belong to the conversation.
    pub fn messages(
        &self,
        conversation_id: ConversationId,
        reader_id: UserId,
        limit: u32,
        before: Option<HistoryCursor>,
    ) -> ChatResult<Vec<Message>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        self.with_conn(|conn| {
            require_participant(conn, conversation_id, reader_id)?;

            let sql = format!(
                "SELECT {} FROM messages
                 WHERE conversation_id = ?1
                   AND (?2 IS NULL OR created_at < ?2 OR (created_at = ?2 AND id < ?3))
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?4",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![
                        conversation_id.to_string(),
                        opt_ts(before.map(|c| c.created_at)),
                        before.map(|c| c.id),
                        limit,
                    ],
                    message_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Membership check used by callers that act on a message by id.
    pub fn require_member_of_message(&self, message_id: MessageId, user_id: UserId) -> ChatResult<Message> {
        self.with_conn(|conn| {
            let message = load_message(conn, message_id)?;
            let participants = load_participants(conn, message.conversation_id)?;
            if !participants.iter().any(|p| p.user_id == user_id) {
                return Err(missing_participant(conn, message.conversation_id)?);
            }
            Ok(message)
        })
    }
}

pub(crate) fn load_message(conn: &Connection, id: MessageId) -> ChatResult<Message> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
    conn.query_row(&sql, [id], message_from_row)
        .optional()?
        .ok_or(ChatError::NotFound("message"))
}

pub(crate) fn latest_message(conn: &Connection, conversation_id: ConversationId) -> ChatResult<Option<Message>> {
    let sql = format!(
        "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
        MESSAGE_COLUMNS
    );
    Ok(conn
        .query_row(&sql, [conversation_id.to_string()], message_from_row)
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn setup() -> (Database, ConversationId, UserId, UserId) {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let cid = db.get_or_create_direct(a, b).unwrap();
        (db, cid, a, b)
    }

    #[test]
    fn append_orders_by_created_at_then_id() {
        let (db, cid, a, b) = setup();

        let mut appended = Vec::new();
        for i in 0..20 {
            let sender = if i % 2 == 0 { a } else { b };
            appended.push(db.append(cid, sender, MessageBody::text(format!("msg {}", i))).unwrap().message);
        }

        for pair in appended.windows(2) {
            assert!(pair[0].sort_key() < pair[1].sort_key());
            assert!(pair[0].created_at <= pair[1].created_at);
        }

        let conversation = db.conversation(cid).unwrap();
        assert_eq!(conversation.last_message_at, Some(appended[19].created_at));
    }

    #[test]
    fn append_rejects_empty_bodies() {
        let (db, cid, a, _) = setup();
        assert!(matches!(db.append(cid, a, MessageBody::default()), Err(ChatError::EmptyContent)));
        assert!(matches!(db.append(cid, a, MessageBody::text("   ")), Err(ChatError::EmptyContent)));
    }

    #[test]
    fn attachment_only_message_has_no_content() {
        let (db, cid, a, _) = setup();
        let body = MessageBody {
            content: None,
            attachment: Some(Attachment {
                url: "blob://cards/42.png".into(),
                name: Some("card.png".into()),
                size: Some(2048),
                kind: AttachmentKind::Image,
            }),
        };

        let message = db.append(cid, a, body).unwrap().message;
        assert_eq!(message.message_type, MessageType::Image);
        assert_eq!(message.content, None);
        assert_eq!(message.file_size, Some(2048));
    }

    #[test]
    fn outsiders_cannot_append() {
        let (db, cid, _, _) = setup();
        let err = db.append(cid, Uuid::new_v4(), MessageBody::text("hi")).unwrap_err();
        assert!(matches!(err, ChatError::NotAParticipant));

        let err = db.append(Uuid::new_v4(), Uuid::new_v4(), MessageBody::text("hi")).unwrap_err();
        assert!(matches!(err, ChatError::NotFound("conversation")));
    }

    #[test]
    fn hidden_group_member_must_reopen_before_posting() {
        for policy in [HidePolicy::UnhideOnNewMessage, HidePolicy::StayHidden] {
            let db = Database::open_in_memory().unwrap().with_hide_policy(policy);
            let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
            let cid = db.create_group(a, &[b, c]).unwrap();

            db.hide(cid, b).unwrap();
            let err = db.append(cid, b, MessageBody::text("I'm back")).unwrap_err();
            assert!(matches!(err, ChatError::NotAParticipant), "{:?}", policy);

            assert!(db.reopen(cid, b).unwrap());
            let outcome = db.append(cid, b, MessageBody::text("I'm back")).unwrap();
            assert_eq!(outcome.message.sender_id, b);
            assert_eq!(outcome.recipients.len(), 3);
            assert_eq!(db.list_conversations(b).unwrap().len(), 1);
        }
    }

    #[test]
    fn only_sender_can_edit() {
        let (db, cid, a, b) = setup();
        let message = db.append(cid, a, MessageBody::text("helo")).unwrap().message;

        assert!(matches!(
            db.edit(message.id, b, "hijack".into()),
            Err(ChatError::Forbidden(_))
        ));

        let edited = db.edit(message.id, a, "hello".into()).unwrap();
        assert_eq!(edited.content.as_deref(), Some("hello"));
        assert!(edited.edited_at.is_some());
        assert_eq!(edited.created_at, message.created_at);
    }

    #[test]
    fn mark_delivered_sets_once() {
        let (db, cid, a, _) = setup();
        let message = db.append(cid, a, MessageBody::text("ping")).unwrap().message;

        let (first, changed) = db.mark_delivered(message.id).unwrap();
        assert!(changed);
        let (second, changed) = db.mark_delivered(message.id).unwrap();
        assert!(!changed);
        assert_eq!(first.delivered_at, second.delivered_at);

        assert!(matches!(db.mark_delivered(999_999), Err(ChatError::NotFound("message"))));
    }

    #[test]
    fn recipients_carry_mute_state() {
        let (db, cid, a, b) = setup();
        db.mute(cid, b, tether_types::models::MuteDuration::Indefinitely, now()).unwrap();

        let outcome = db.append(cid, a, MessageBody::text("you there?")).unwrap();
        let to_b = outcome.recipients.iter().find(|r| r.user_id == b).unwrap();
        let to_a = outcome.recipients.iter().find(|r| r.user_id == a).unwrap();
        assert!(!to_b.notify);
        assert!(!to_a.notify);
    }

    #[test]
    fn history_pages_backwards() {
        let (db, cid, a, b) = setup();
        for i in 0..5 {
            db.append(cid, a, MessageBody::text(format!("m{}", i))).unwrap();
        }

        let page = db.messages(cid, b, 2, None).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content.as_deref(), Some("m4"));

        let last = &page[1];
        let cursor = HistoryCursor { created_at: last.created_at, id: last.id };
        let older = db.messages(cid, b, 10, Some(cursor)).unwrap();
        let contents: Vec<_> = older.iter().filter_map(|m| m.content.as_deref()).collect();
        assert_eq!(contents, vec!["m2", "m1", "m0"]);
    }
}
