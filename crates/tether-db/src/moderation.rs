use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use tether_types::models::{Block, ConversationId, Report, ReportReason, ReportStatus, UserId};

use crate::models::{REPORT_COLUMNS, block_from_row, now, report_from_row, ts};
use crate::participants::conversation_exists;
use crate::{ChatError, ChatResult, Database};

pub const MAX_REPORT_DESCRIPTION_CHARS: usize = 1000;

/// A report as submitted, before validation.
#[derive(Debug, Clone, Default)]
pub struct NewReport {
    pub reported_id: UserId,
    pub reason: Option<String>,
    pub description: Option<String>,
    pub conversation_id: Option<ConversationId>,
}

impl Database {
    /// Returns true when a new block row was written.
    pub fn block(&self, blocker_id: UserId, blocked_id: UserId) -> ChatResult<bool> {
        if blocker_id == blocked_id {
            return Err(ChatError::validation("blocked_id", "cannot block yourself"));
        }

        let inserted = self.transact(|tx| {
            let changed = tx.execute(
                "INSERT OR IGNORE INTO blocks (blocker_id, blocked_id, created_at) VALUES (?1, ?2, ?3)",
                (blocker_id.to_string(), blocked_id.to_string(), ts(now())),
            )?;
            Ok(changed == 1)
        })?;

        if inserted {
            info!("{} blocked {}", blocker_id, blocked_id);
        }
        Ok(inserted)
    }

    pub fn unblock(&self, blocker_id: UserId, blocked_id: UserId) -> ChatResult<bool> {
        let removed = self.transact(|tx| {
            let changed = tx.execute(
                "DELETE FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
                [blocker_id.to_string(), blocked_id.to_string()],
            )?;
            Ok(changed == 1)
        })?;

        if removed {
            info!("{} unblocked {}", blocker_id, blocked_id);
        }
        Ok(removed)
    }

    pub fn blocked_users(&self, blocker_id: UserId) -> ChatResult<Vec<Block>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT blocker_id, blocked_id, created_at FROM blocks
                 WHERE blocker_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map([blocker_id.to_string()], block_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// True if either user has blocked the other.
    pub fn is_blocked_between(&self, a: UserId, b: UserId) -> ChatResult<bool> {
        self.with_conn(|conn| blocked_between(conn, a, b))
    }

    /// File a report. New reports always start out pending.
    pub fn report(&self, reporter_id: UserId, report: NewReport) -> ChatResult<Report> {
        let reason = parse_reason(report.reason.as_deref())?;
        let description = normalize_description(report.description)?;
        if reporter_id == report.reported_id {
            return Err(ChatError::validation("reported_id", "cannot report yourself"));
        }

        let id = Uuid::new_v4();
        let created = self.transact(|tx| {
            if let Some(cid) = report.conversation_id {
                if !conversation_exists(tx, cid)? {
                    return Err(ChatError::NotFound("conversation"));
                }
            }

            tx.execute(
                "INSERT INTO reports
                    (id, reporter_id, reported_id, reason, description, conversation_id, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    id.to_string(),
                    reporter_id.to_string(),
                    report.reported_id.to_string(),
                    reason.as_str(),
                    description,
                    report.conversation_id.map(|c| c.to_string()),
                    ReportStatus::Pending.as_str(),
                    ts(now()),
                ],
            )?;

            let sql = format!("SELECT {} FROM reports WHERE id = ?1", REPORT_COLUMNS);
            Ok(tx.query_row(&sql, [id.to_string()], report_from_row)?)
        })?;

        info!(
            "Report {} filed by {} against {} ({})",
            created.id,
            reporter_id,
            created.reported_id,
            created.reason.as_str()
        );
        Ok(created)
    }

    /// Block first, then report. The block stands even if the report fails.
    pub fn block_and_report(&self, reporter_id: UserId, report: NewReport) -> ChatResult<Report> {
        self.block(reporter_id, report.reported_id)?;
        self.report(reporter_id, report).inspect_err(|e| {
            warn!("Report after block failed for {}: {}", reporter_id, e);
        })
    }
}

pub(crate) fn blocked_between(conn: &Connection, a: UserId, b: UserId) -> ChatResult<bool> {
    let found: bool = conn.query_row(
        "SELECT EXISTS (
             SELECT 1 FROM blocks
             WHERE (blocker_id = ?1 AND blocked_id = ?2)
                OR (blocker_id = ?2 AND blocked_id = ?1)
         )",
        [a.to_string(), b.to_string()],
        |r| r.get(0),
    )?;
    Ok(found)
}

pub fn parse_reason(reason: Option<&str>) -> ChatResult<ReportReason> {
    let raw = reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ChatError::validation("reason", "a reason is required"))?;
    raw.parse()
        .map_err(|_| ChatError::validation("reason", format!("unknown reason '{}'", raw)))
}

fn normalize_description(description: Option<String>) -> ChatResult<Option<String>> {
    let Some(description) = description else {
        return Ok(None);
    };
    let trimmed = description.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_REPORT_DESCRIPTION_CHARS {
        return Err(ChatError::validation(
            "description",
            format!("at most {} characters", MAX_REPORT_DESCRIPTION_CHARS),
        ));
    }
    Ok(Some(trimmed.to_string()))
}
