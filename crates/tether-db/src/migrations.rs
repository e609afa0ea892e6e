use rusqlite::Connection;
use tracing::info;

use crate::ChatResult;

pub fn run(conn: &Connection) -> ChatResult<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (conversations, participants, messages)");
        conn.execute_batch(
            "
            CREATE TABLE conversations (
                id              TEXT PRIMARY KEY,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                last_message_at TEXT
            );

            -- One row per unordered user pair; user_lo < user_hi.
            CREATE TABLE direct_pairs (
                user_lo         TEXT NOT NULL,
                user_hi         TEXT NOT NULL,
                conversation_id TEXT NOT NULL UNIQUE
                                REFERENCES conversations(id) ON DELETE CASCADE,
                PRIMARY KEY (user_lo, user_hi),
                CHECK (user_lo < user_hi)
            );

            CREATE TABLE participants (
                id                    TEXT PRIMARY KEY,
                conversation_id       TEXT NOT NULL
                                      REFERENCES conversations(id) ON DELETE CASCADE,
                user_id               TEXT NOT NULL,
                joined_at             TEXT NOT NULL,
                last_read_at          TEXT,
                mute_kind             TEXT NOT NULL DEFAULT 'none'
                                      CHECK (mute_kind IN ('none', 'until', 'indefinite')),
                muted_until           TEXT,
                notifications_enabled INTEGER NOT NULL DEFAULT 1,
                deleted_at            TEXT,
                UNIQUE (conversation_id, user_id)
            );

            CREATE INDEX idx_participants_user
                ON participants(user_id);

            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL
                                REFERENCES conversations(id) ON DELETE CASCADE,
                sender_id       TEXT NOT NULL,
                content         TEXT,
                message_type    TEXT NOT NULL
                                CHECK (message_type IN ('text', 'image', 'file', 'system')),
                file_url        TEXT,
                file_name       TEXT,
                file_size       INTEGER,
                created_at      TEXT NOT NULL,
                edited_at       TEXT,
                delivered_at    TEXT,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at, id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (blocks, reports)");
        conn.execute_batch(
            "
            CREATE TABLE blocks (
                blocker_id  TEXT NOT NULL,
                blocked_id  TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (blocker_id, blocked_id)
            );

            CREATE INDEX idx_blocks_blocked
                ON blocks(blocked_id);

            CREATE TABLE reports (
                id              TEXT PRIMARY KEY,
                reporter_id     TEXT NOT NULL,
                reported_id     TEXT NOT NULL,
                reason          TEXT NOT NULL
                                CHECK (reason IN ('spam', 'harassment', 'inappropriate_content',
                                                  'fake_profile', 'threats', 'other')),
                description     TEXT,
                conversation_id TEXT
                                REFERENCES conversations(id) ON DELETE SET NULL,
                status          TEXT NOT NULL DEFAULT 'pending',
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_reports_status
                ON reports(status, created_at);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }
}
