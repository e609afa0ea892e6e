use std::cmp::Ordering;

use tracing::debug;

use tether_types::models::{ConversationId, Message, RankedMessage, UserId};

use crate::models::{MESSAGE_COLUMNS, message_from_row};
use crate::participants::require_participant;
use crate::{ChatResult, Database};

pub const DEFAULT_SEARCH_LIMIT: u32 = 50;
pub const MAX_SEARCH_LIMIT: u32 = 200;

const WHOLE_WORD_BONUS: f64 = 0.5;

impl Database {
    /// Case-insensitive substring search within one conversation, best
    /// matches first.
    pub fn search(
        &self,
        conversation_id: ConversationId,
        reader_id: UserId,
        query: &str,
        limit: u32,
    ) -> ChatResult<Vec<RankedMessage>> {
        let needle = query.trim().to_lowercase();
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT) as usize;

        let candidates = self.with_conn(|conn| {
            require_participant(conn, conversation_id, reader_id)?;
            if needle.is_empty() {
                return Ok(Vec::new());
            }

            // SQLite's LIKE only folds ASCII case, so non-ASCII queries scan
            // every text message and are matched below.
            let prefilter = needle.is_ascii().then(|| format!("%{}%", escape_like(&needle)));
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE conversation_id = ?1 AND content IS NOT NULL
                   AND (?2 IS NULL OR content LIKE ?2 ESCAPE '\\')",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id.to_string(), prefilter],
                    message_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let scanned = candidates.len();
        let mut results: Vec<RankedMessage> = candidates
            .into_iter()
            .filter_map(|message| {
                let rank = score(message.content.as_deref()?, &needle)?;
                Some(RankedMessage { message, rank })
            })
            .collect();

        results.sort_by(compare_ranked);
        results.truncate(limit);

        debug!(
            "Search in {} matched {} of {} candidates",
            conversation_id,
            results.len(),
            scanned
        );
        Ok(results)
    }
}

/// Rank of `content` against an already lowercased needle, or None when it
/// does not contain it.
fn score(content: &str, needle: &str) -> Option<f64> {
    let haystack = content.to_lowercase();

    let mut occurrences = 0u32;
    let mut whole_words = 0u32;
    for (start, matched) in haystack.match_indices(needle) {
        occurrences += 1;
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + matched.len()..].chars().next();
        if !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric) {
            whole_words += 1;
        }
    }
    if occurrences == 0 {
        return None;
    }

    let words = haystack.split_whitespace().count().max(1) as f64;
    let density = f64::from(occurrences) / (1.0 + words.ln());
    Some(density + WHOLE_WORD_BONUS * f64::from(whole_words))
}

/// Rank descending, then newest first.
fn compare_ranked(a: &RankedMessage, b: &RankedMessage) -> Ordering {
    b.rank
        .partial_cmp(&a.rank)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.message.sort_key().cmp(&a.message.sort_key()))
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Steps through a result set; both directions wrap around.
#[derive(Debug, Clone)]
pub struct SearchCursor {
    results: Vec<RankedMessage>,
    position: usize,
}

impl SearchCursor {
    pub fn new(results: Vec<RankedMessage>) -> Self {
        Self { results, position: 0 }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn position(&self) -> Option<usize> {
        (!self.results.is_empty()).then_some(self.position)
    }

    pub fn current(&self) -> Option<&Message> {
        self.results.get(self.position).map(|r| &r.message)
    }

    pub fn next(&mut self) -> Option<&Message> {
        if self.results.is_empty() {
            return None;
        }
        self.position = (self.position + 1) % self.results.len();
        self.current()
    }

    pub fn previous(&mut self) -> Option<&Message> {
        if self.results.is_empty() {
            return None;
        }
        self.position = self.position.checked_sub(1).unwrap_or(self.results.len() - 1);
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatError;
    use crate::message_log::MessageBody;
    use uuid::Uuid;

    fn seeded() -> (Database, ConversationId, UserId) {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let cid = db.get_or_create_direct(a, b).unwrap();
        for text in [
            "Are we still on for coffee tomorrow?",
            "coffee coffee COFFEE",
            "I had a long day, decaffeinated everything",
            "Coffeehouse on 5th is closed",
            "no match here",
        ] {
            db.append(cid, a, MessageBody::text(text)).unwrap();
        }
        (db, cid, b)
    }

    #[test]
    fn results_contain_query_and_are_ranked() {
        let (db, cid, reader) = seeded();

        let results = db.search(cid, reader, "  Coffee ", 10).unwrap();
        assert_eq!(results.len(), 3);
        for r in &results {
            assert!(r.message.content.as_deref().unwrap().to_lowercase().contains("coffee"));
        }
        for pair in results.windows(2) {
            assert!(pair[0].rank >= pair[1].rank);
        }
        assert_eq!(results[0].message.content.as_deref(), Some("coffee coffee COFFEE"));
    }

    #[test]
    fn empty_query_returns_nothing() {
        let (db, cid, reader) = seeded();
        assert!(db.search(cid, reader, "   ", 10).unwrap().is_empty());
    }

    #[test]
    fn like_wildcards_are_literal() {
        let (db, cid, reader) = seeded();
        assert!(db.search(cid, reader, "%", 10).unwrap().is_empty());
        assert!(db.search(cid, reader, "_", 10).unwrap().is_empty());
    }

    #[test]
    fn non_ascii_queries_fold_case() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let cid = db.get_or_create_direct(a, b).unwrap();
        db.append(cid, a, MessageBody::text("ÜBER alles")).unwrap();

        let results = db.search(cid, b, "über", 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn limit_is_applied_after_ranking() {
        let (db, cid, reader) = seeded();
        let results = db.search(cid, reader, "coffee", 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message.content.as_deref(), Some("coffee coffee COFFEE"));
    }

    #[test]
    fn outsiders_cannot_search() {
        let (db, cid, _) = seeded();
        assert!(matches!(
            db.search(cid, Uuid::new_v4(), "coffee", 10),
            Err(ChatError::NotAParticipant)
        ));
    }

    #[test]
    fn whole_word_beats_partial_match() {
        let word = score("see you at the cafe", "cafe").unwrap();
        let partial = score("see you at the cafeteria", "cafe").unwrap();
        assert!(word > partial);
        assert_eq!(score("nothing", "cafe"), None);
    }

    #[test]
    fn cursor_wraps_both_ways() {
        let (db, cid, reader) = seeded();
        let results = db.search(cid, reader, "coffee", 10).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.message.id).collect();
        let mut cursor = SearchCursor::new(results);

        assert_eq!(cursor.position(), Some(0));
        assert_eq!(cursor.previous().map(|m| m.id), Some(ids[2]));
        assert_eq!(cursor.next().map(|m| m.id), Some(ids[0]));
        cursor.next();
        cursor.next();
        assert_eq!(cursor.position(), Some(2));
        assert_eq!(cursor.next().map(|m| m.id), Some(ids[0]));
    }

    #[test]
    fn empty_cursor_yields_nothing() {
        let mut cursor = SearchCursor::new(Vec::new());
        assert!(cursor.is_empty());
        assert_eq!(cursor.position(), None);
        assert!(cursor.next().is_none());
        assert!(cursor.previous().is_none());
    }
}
