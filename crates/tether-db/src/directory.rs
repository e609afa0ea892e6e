use std::collections::BTreeSet;

use rusqlite::{Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use tether_types::models::{Conversation, ConversationId, ConversationSummary, Participant, UserId};

use crate::message_log::latest_message;
use crate::models::{CONVERSATION_COLUMNS, conversation_from_row, get_uuid, mute_from_columns, now, ts};
use crate::participants::{
    count_unread, insert_participant, load_participants, missing_participant, unhide,
};
use crate::{ChatError, ChatResult, Database};

/// Groups need the creator plus at least this many others.
pub const MIN_GROUP_INVITEES: usize = 2;

impl Database {
    /// Find the direct conversation between two users, creating it on first use.
    ///
    /// The lookup and insert share one IMMEDIATE transaction and the pair is
    /// keyed by its canonical (smaller, larger) order, so concurrent callers
    /// always converge on a single conversation. Reopening clears the
    /// caller's hidden marker.
    pub fn get_or_create_direct(&self, user_id: UserId, other_id: UserId) -> ChatResult<ConversationId> {
        if user_id == other_id {
            return Err(ChatError::SelfConversation);
        }
        let (lo, hi) = canonical_pair(user_id, other_id);

        let (conversation_id, created) = self.transact(|tx| {
            let existing = tx
                .query_row(
                    "SELECT conversation_id FROM direct_pairs WHERE user_lo = ?1 AND user_hi = ?2",
                    [lo.to_string(), hi.to_string()],
                    |row| get_uuid(row, 0),
                )
                .optional()?;

            if let Some(conversation_id) = existing {
                unhide(tx, conversation_id, user_id)?;
                return Ok((conversation_id, false));
            }

            let conversation_id = Uuid::new_v4();
            let now = now();
            insert_conversation(tx, conversation_id, now)?;
            tx.execute(
                "INSERT INTO direct_pairs (user_lo, user_hi, conversation_id) VALUES (?1, ?2, ?3)",
                (lo.to_string(), hi.to_string(), conversation_id.to_string()),
            )?;
            insert_participant(tx, conversation_id, user_id, now)?;
            insert_participant(tx, conversation_id, other_id, now)?;
            Ok((conversation_id, true))
        })?;

        if created {
            info!("Created direct conversation {} ({} <-> {})", conversation_id, user_id, other_id);
        }
        Ok(conversation_id)
    }

    /// Create a group of the creator plus `participant_ids` in one transaction.
    pub fn create_group(&self, creator_id: UserId, participant_ids: &[UserId]) -> ChatResult<ConversationId> {
        let invitees: BTreeSet<UserId> = participant_ids
            .iter()
            .copied()
            .filter(|id| *id != creator_id)
            .collect();

        if invitees.len() < MIN_GROUP_INVITEES {
            return Err(ChatError::validation(
                "participant_ids",
                format!("a group needs at least {} other members", MIN_GROUP_INVITEES),
            ));
        }

        let conversation_id = Uuid::new_v4();
        self.transact(|tx| {
            let now = now();
            insert_conversation(tx, conversation_id, now)?;
            insert_participant(tx, conversation_id, creator_id, now)?;
            for user_id in &invitees {
                insert_participant(tx, conversation_id, *user_id, now)?;
            }
            Ok(())
        })?;

        info!(
            "Created group conversation {} by {} with {} members",
            conversation_id,
            creator_id,
            invitees.len() + 1
        );
        Ok(conversation_id)
    }

    pub fn conversation(&self, conversation_id: ConversationId) -> ChatResult<Conversation> {
        self.with_conn(|conn| load_conversation(conn, conversation_id))
    }

    pub fn participants(&self, conversation_id: ConversationId) -> ChatResult<Vec<Participant>> {
        self.with_conn(|conn| {
            let participants = load_participants(conn, conversation_id)?;
            if participants.is_empty() {
                // Every conversation has members, so this id is unknown.
                return Err(ChatError::NotFound("conversation"));
            }
            Ok(participants)
        })
    }

    /// Derived from the member count; never stored.
    pub fn is_group(&self, conversation_id: ConversationId) -> ChatResult<bool> {
        self.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM participants WHERE conversation_id = ?1",
                [conversation_id.to_string()],
                |r| r.get(0),
            )?;
            if count == 0 {
                return Err(ChatError::NotFound("conversation"));
            }
            Ok(count > 2)
        })
    }

    /// The user's visible conversations, most recently active first.
    pub fn list_conversations(&self, user_id: UserId) -> ChatResult<Vec<ConversationSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.created_at, c.updated_at, c.last_message_at, p.mute_kind, p.muted_until
                 FROM participants p
                 JOIN conversations c ON c.id = p.conversation_id
                 WHERE p.user_id = ?1 AND p.deleted_at IS NULL
                 ORDER BY COALESCE(c.last_message_at, c.created_at) DESC, c.id",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok((conversation_from_row(row)?, mute_from_columns(row, 4, 5)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            // One round of lookups per conversation; lists are short.
            let mut summaries = Vec::with_capacity(rows.len());
            for (conversation, mute) in rows {
                let participants = load_participants(conn, conversation.id)?;
                let me = participants
                    .iter()
                    .find(|p| p.user_id == user_id)
                    .ok_or(ChatError::NotAParticipant)?;
                let unread_count = count_unread(conn, me)?;
                let last_message = latest_message(conn, conversation.id)?;

                summaries.push(ConversationSummary {
                    is_group: participants.len() > 2,
                    participant_ids: participants.iter().map(|p| p.user_id).collect(),
                    conversation,
                    last_message,
                    unread_count,
                    mute,
                });
            }
            Ok(summaries)
        })
    }

    /// Irreversibly delete a conversation with all its messages for every
    /// participant. Any participant may do this. Returns the former members.
    pub fn delete_for_everyone(&self, conversation_id: ConversationId, actor_id: UserId) -> ChatResult<Vec<UserId>> {
        let members = self.transact(|tx| {
            let participants = load_participants(tx, conversation_id)?;
            if !participants.iter().any(|p| p.user_id == actor_id) {
                return Err(missing_participant(tx, conversation_id)?);
            }
            tx.execute(
                "DELETE FROM conversations WHERE id = ?1",
                [conversation_id.to_string()],
            )?;
            Ok(participants.into_iter().map(|p| p.user_id).collect::<Vec<_>>())
        })?;

        info!(
            "Conversation {} deleted for {} participants by {}",
            conversation_id,
            members.len(),
            actor_id
        );
        Ok(members)
    }
}

fn canonical_pair(a: UserId, b: UserId) -> (UserId, UserId) {
    if a < b { (a, b) } else { (b, a) }
}

fn insert_conversation(conn: &Connection, id: ConversationId, now: chrono::DateTime<chrono::Utc>) -> ChatResult<()> {
    let now = ts(now);
    conn.execute(
        "INSERT INTO conversations (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
        (id.to_string(), now),
    )?;
    Ok(())
}

pub(crate) fn load_conversation(conn: &Connection, id: ConversationId) -> ChatResult<Conversation> {
    let sql = format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS);
    conn.query_row(&sql, [id.to_string()], conversation_from_row)
        .optional()?
        .ok_or(ChatError::NotFound("conversation"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_conversation_is_unique_per_unordered_pair() {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let first = db.get_or_create_direct(a, b).unwrap();
        let again = db.get_or_create_direct(a, b).unwrap();
        let reversed = db.get_or_create_direct(b, a).unwrap();
        assert_eq!(first, again);
        assert_eq!(first, reversed);
        assert!(!db.is_group(first).unwrap());
    }

    #[test]
    fn self_conversation_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        assert!(matches!(db.get_or_create_direct(a, a), Err(ChatError::SelfConversation)));
    }

    #[test]
    fn group_needs_two_others_after_dedup() {
        let db = Database::open_in_memory().unwrap();
        let creator = Uuid::new_v4();
        let b = Uuid::new_v4();

        let err = db.create_group(creator, &[b, b, creator]).unwrap_err();
        assert!(matches!(err, ChatError::Validation { field: "participant_ids", .. }));

        // Nothing half-created.
        let count: u32 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM conversations", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn group_includes_creator() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let cid = db.create_group(a, &[b, c]).unwrap();
        let members: BTreeSet<UserId> = db.participants(cid).unwrap().iter().map(|p| p.user_id).collect();
        assert_eq!(members, BTreeSet::from([a, b, c]));
        assert!(db.is_group(cid).unwrap());
    }

    #[test]
    fn reopening_a_hidden_direct_chat_unhides_it() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let cid = db.get_or_create_direct(a, b).unwrap();

        db.hide(cid, a).unwrap();
        assert!(db.list_conversations(a).unwrap().is_empty());

        db.get_or_create_direct(a, b).unwrap();
        assert_eq!(db.list_conversations(a).unwrap().len(), 1);
    }

    #[test]
    fn delete_for_everyone_requires_membership() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let cid = db.get_or_create_direct(a, b).unwrap();

        assert!(matches!(
            db.delete_for_everyone(cid, Uuid::new_v4()),
            Err(ChatError::NotAParticipant)
        ));

        let members = db.delete_for_everyone(cid, b).unwrap();
        assert_eq!(members.len(), 2);
        assert!(matches!(db.participants(cid), Err(ChatError::NotFound(_))));

        // The pair can start over with a fresh conversation.
        let fresh = db.get_or_create_direct(a, b).unwrap();
        assert_ne!(fresh, cid);
    }
}
