use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use tether_types::models::{ConversationId, MuteDuration, MuteState, Participant, UserId};

use crate::models::{PARTICIPANT_COLUMNS, mute_to_columns, now, participant_from_row, ts};
use crate::{ChatError, ChatResult, Database};

impl Database {
    // -- Membership --

    pub fn participant(&self, conversation_id: ConversationId, user_id: UserId) -> ChatResult<Participant> {
        self.with_conn(|conn| require_participant(conn, conversation_id, user_id))
    }

    // -- Mute --

    /// Set or clear the mute for one participant. Re-muting overwrites.
    pub fn mute(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        duration: MuteDuration,
        now: DateTime<Utc>,
    ) -> ChatResult<MuteState> {
        let state = duration.resolve(now);
        let (kind, until) = mute_to_columns(&state);

        self.transact(|tx| {
            let changed = tx.execute(
                "UPDATE participants SET mute_kind = ?3, muted_until = ?4
                 WHERE conversation_id = ?1 AND user_id = ?2",
                rusqlite::params![conversation_id.to_string(), user_id.to_string(), kind, until],
            )?;
            if changed == 0 {
                return Err(missing_participant(tx, conversation_id)?);
            }
            Ok(())
        })?;

        debug!("{} set mute {:?} on {}", user_id, state, conversation_id);
        Ok(state)
    }

    pub fn is_muted(&self, conversation_id: ConversationId, user_id: UserId, now: DateTime<Utc>) -> ChatResult<bool> {
        let participant = self.participant(conversation_id, user_id)?;
        Ok(participant.mute.is_muted(now))
    }

    pub fn set_notifications_enabled(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        enabled: bool,
    ) -> ChatResult<()> {
        self.transact(|tx| {
            let changed = tx.execute(
                "UPDATE participants SET notifications_enabled = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2",
                rusqlite::params![conversation_id.to_string(), user_id.to_string(), enabled],
            )?;
            if changed == 0 {
                return Err(missing_participant(tx, conversation_id)?);
            }
            Ok(())
        })
    }

    // -- Read state --

    /// Advance `last_read_at`. Returns false when `at` is not newer than the
    /// stored value, in which case nothing changes.
    pub fn mark_read(&self, conversation_id: ConversationId, user_id: UserId, at: DateTime<Utc>) -> ChatResult<bool> {
        let at = ts(at);
        self.transact(|tx| {
            let changed = tx.execute(
                "UPDATE participants SET last_read_at = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2
                   AND (last_read_at IS NULL OR last_read_at < ?3)",
                rusqlite::params![conversation_id.to_string(), user_id.to_string(), at],
            )?;
            if changed == 0 {
                // Either not a participant, or an older timestamp.
                require_participant(tx, conversation_id, user_id)?;
                return Ok(false);
            }
            Ok(true)
        })
    }

    pub fn unread_count(&self, conversation_id: ConversationId, user_id: UserId) -> ChatResult<u32> {
        self.with_conn(|conn| {
            let participant = require_participant(conn, conversation_id, user_id)?;
            count_unread(conn, &participant)
        })
    }

    // -- Visibility --

    /// Hide the conversation from one participant's list. Idempotent.
    pub fn hide(&self, conversation_id: ConversationId, user_id: UserId) -> ChatResult<()> {
        let now = ts(now());
        self.transact(|tx| {
            let changed = tx.execute(
                "UPDATE participants SET deleted_at = COALESCE(deleted_at, ?3)
                 WHERE conversation_id = ?1 AND user_id = ?2",
                rusqlite::params![conversation_id.to_string(), user_id.to_string(), now],
            )?;
            if changed == 0 {
                return Err(missing_participant(tx, conversation_id)?);
            }
            Ok(())
        })?;

        debug!("{} hid conversation {}", user_id, conversation_id);
        Ok(())
    }

    /// Undo `hide` for one participant, direct or group. Returns false if the
    /// conversation was not hidden.
    pub fn reopen(&self, conversation_id: ConversationId, user_id: UserId) -> ChatResult<bool> {
        let reopened = self.transact(|tx| {
            require_participant(tx, conversation_id, user_id)?;
            unhide(tx, conversation_id, user_id)
        })?;

        if reopened {
            debug!("{} reopened conversation {}", user_id, conversation_id);
        }
        Ok(reopened)
    }
}

pub(crate) fn insert_participant(
    conn: &Connection,
    conversation_id: ConversationId,
    user_id: UserId,
    joined_at: DateTime<Utc>,
) -> ChatResult<()> {
    conn.execute(
        "INSERT INTO participants (id, conversation_id, user_id, joined_at) VALUES (?1, ?2, ?3, ?4)",
        (
            Uuid::new_v4().to_string(),
            conversation_id.to_string(),
            user_id.to_string(),
            ts(joined_at),
        ),
    )?;
    Ok(())
}

pub(crate) fn load_participants(conn: &Connection, conversation_id: ConversationId) -> ChatResult<Vec<Participant>> {
    let sql = format!(
        "SELECT {} FROM participants WHERE conversation_id = ?1 ORDER BY joined_at, user_id",
        PARTICIPANT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([conversation_id.to_string()], participant_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Fetch one participant row; distinguishes an unknown conversation from a
/// known conversation the user is not part of.
pub(crate) fn require_participant(
    conn: &Connection,
    conversation_id: ConversationId,
    user_id: UserId,
) -> ChatResult<Participant> {
    let sql = format!(
        "SELECT {} FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
        PARTICIPANT_COLUMNS
    );
    let row = conn
        .query_row(
            &sql,
            [conversation_id.to_string(), user_id.to_string()],
            participant_from_row,
        )
        .optional()?;

    match row {
        Some(participant) => Ok(participant),
        None => Err(missing_participant(conn, conversation_id)?),
    }
}

/// The error for a participant lookup that matched nothing.
pub(crate) fn missing_participant(conn: &Connection, conversation_id: ConversationId) -> ChatResult<ChatError> {
    if conversation_exists(conn, conversation_id)? {
        Ok(ChatError::NotAParticipant)
    } else {
        Ok(ChatError::NotFound("conversation"))
    }
}

pub(crate) fn conversation_exists(conn: &Connection, conversation_id: ConversationId) -> ChatResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM conversations WHERE id = ?1",
            [conversation_id.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Clear a participant's hidden marker. True if it was set.
pub(crate) fn unhide(conn: &Connection, conversation_id: ConversationId, user_id: UserId) -> ChatResult<bool> {
    let changed = conn.execute(
        "UPDATE participants SET deleted_at = NULL
         WHERE conversation_id = ?1 AND user_id = ?2 AND deleted_at IS NOT NULL",
        [conversation_id.to_string(), user_id.to_string()],
    )?;
    Ok(changed > 0)
}

/// Messages from other senders newer than the participant's read marker.
pub(crate) fn count_unread(conn: &Connection, participant: &Participant) -> ChatResult<u32> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM messages
         WHERE conversation_id = ?1 AND sender_id != ?2
           AND (?3 IS NULL OR created_at > ?3)",
        rusqlite::params![
            participant.conversation_id.to_string(),
            participant.user_id.to_string(),
            participant.last_read_at.map(ts),
        ],
        |r| r.get(0),
    )?;
    Ok(count)
}
