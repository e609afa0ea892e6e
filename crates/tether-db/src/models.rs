//! Row mapping between SQLite columns and the shared tether-types models.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings with microsecond
//! precision, so string comparison in SQL matches chronological order.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use tether_types::models::{Block, Conversation, Message, MuteState, Participant, Report};

/// Current time at storage precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn ts(dt: DateTime<Utc>) -> String {
    dt.trunc_subsecs(6).to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn opt_ts(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(ts)
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => get_ts(row, idx).map(Some),
        None => Ok(None),
    }
}

pub fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

pub fn get_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => get_uuid(row, idx).map(Some),
        None => Ok(None),
    }
}

fn get_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

pub const CONVERSATION_COLUMNS: &str = "id, created_at, updated_at, last_message_at";

pub fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: get_uuid(row, 0)?,
        created_at: get_ts(row, 1)?,
        updated_at: get_ts(row, 2)?,
        last_message_at: get_opt_ts(row, 3)?,
    })
}

pub const PARTICIPANT_COLUMNS: &str = "id, conversation_id, user_id, joined_at, last_read_at, \
     mute_kind, muted_until, notifications_enabled, deleted_at";

pub fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: get_uuid(row, 0)?,
        conversation_id: get_uuid(row, 1)?,
        user_id: get_uuid(row, 2)?,
        joined_at: get_ts(row, 3)?,
        last_read_at: get_opt_ts(row, 4)?,
        mute: mute_from_columns(row, 5, 6)?,
        notifications_enabled: row.get(7)?,
        deleted_at: get_opt_ts(row, 8)?,
    })
}

/// Decode the (mute_kind, muted_until) column pair.
pub fn mute_from_columns(row: &Row<'_>, kind_idx: usize, until_idx: usize) -> rusqlite::Result<MuteState> {
    let kind: String = row.get(kind_idx)?;
    match kind.as_str() {
        "none" => Ok(MuteState::Unmuted),
        "indefinite" => Ok(MuteState::MutedIndefinitely),
        "until" => get_ts(row, until_idx).map(MuteState::MutedUntil),
        other => Err(rusqlite::Error::InvalidColumnType(
            kind_idx,
            format!("mute_kind={}", other),
            Type::Text,
        )),
    }
}

pub fn mute_to_columns(mute: &MuteState) -> (&'static str, Option<String>) {
    match mute {
        MuteState::Unmuted => ("none", None),
        MuteState::MutedUntil(until) => ("until", Some(ts(*until))),
        MuteState::MutedIndefinitely => ("indefinite", None),
    }
}

pub const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, message_type, \
     file_url, file_name, file_size, created_at, edited_at, delivered_at, updated_at";

pub fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: get_uuid(row, 1)?,
        sender_id: get_uuid(row, 2)?,
        content: row.get(3)?,
        message_type: get_parsed(row, 4)?,
        file_url: row.get(5)?,
        file_name: row.get(6)?,
        file_size: row.get(7)?,
        created_at: get_ts(row, 8)?,
        edited_at: get_opt_ts(row, 9)?,
        delivered_at: get_opt_ts(row, 10)?,
        updated_at: get_ts(row, 11)?,
    })
}

pub fn block_from_row(row: &Row<'_>) -> rusqlite::Result<Block> {
    Ok(Block {
        blocker_id: get_uuid(row, 0)?,
        blocked_id: get_uuid(row, 1)?,
        created_at: get_ts(row, 2)?,
    })
}

pub const REPORT_COLUMNS: &str =
    "id, reporter_id, reported_id, reason, description, conversation_id, status, created_at";

pub fn report_from_row(row: &Row<'_>) -> rusqlite::Result<Report> {
    Ok(Report {
        id: get_uuid(row, 0)?,
        reporter_id: get_uuid(row, 1)?,
        reported_id: get_uuid(row, 2)?,
        reason: get_parsed(row, 3)?,
        description: row.get(4)?,
        conversation_id: get_opt_uuid(row, 5)?,
        status: get_parsed(row, 6)?,
        created_at: get_ts(row, 7)?,
    })
}
