pub mod directory;
pub mod error;
pub mod message_log;
pub mod migrations;
pub mod models;
pub mod moderation;
pub mod participants;
pub mod search;

pub use error::{ChatError, ChatResult};

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

const READER_POOL_SIZE: usize = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// What happens to a participant's hidden conversation when someone posts in it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HidePolicy {
    /// A new message puts the conversation back in the hider's list.
    #[default]
    UnhideOnNewMessage,
    /// The conversation stays hidden until the hider reopens it.
    StayHidden,
}

/// Messaging store with reader/writer split.
///
/// Every mutation goes through the single writer connection inside an
/// IMMEDIATE transaction, which serializes find-or-insert operations such as
/// direct conversation creation. Reads are spread across read-only
/// connections; WAL lets them run alongside the writer.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
    hide_policy: HidePolicy,
}

impl Database {
    pub fn open(path: &Path) -> ChatResult<Self> {
        let writer = Connection::open(path)?;

        // WAL mode for concurrent reads
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        writer.busy_timeout(BUSY_TIMEOUT)?;

        migrations::run(&writer)?;

        let mut readers = Vec::with_capacity(READER_POOL_SIZE);
        for _ in 0..READER_POOL_SIZE {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Database opened at {} (1 writer + {} readers)",
            path.display(),
            READER_POOL_SIZE
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
            hide_policy: HidePolicy::default(),
        })
    }

    /// Private in-memory store. Reads share the writer connection.
    pub fn open_in_memory() -> ChatResult<Self> {
        let writer = Connection::open_in_memory()?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&writer)?;

        Ok(Self {
            writer: Mutex::new(writer),
            readers: Vec::new(),
            reader_idx: AtomicUsize::new(0),
            hide_policy: HidePolicy::default(),
        })
    }

    pub fn with_hide_policy(mut self, policy: HidePolicy) -> Self {
        self.hide_policy = policy;
        self
    }

    pub fn hide_policy(&self) -> HidePolicy {
        self.hide_policy
    }

    pub fn with_conn<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Connection) -> ChatResult<T>,
    {
        if self.readers.is_empty() {
            return self.with_conn_mut(|conn| f(conn));
        }

        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .lock()
            .map_err(|e| ChatError::Internal(format!("Reader lock poisoned: {}", e)))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&mut Connection) -> ChatResult<T>,
    {
        let mut conn = self
            .writer
            .lock()
            .map_err(|e| ChatError::Internal(format!("Writer lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Run `f` in an IMMEDIATE transaction on the writer. Any error rolls back.
    pub fn transact<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> ChatResult<T>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }
}
