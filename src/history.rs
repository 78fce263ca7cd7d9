//! History store (spec §2, §3): append-only `(user, assistant, timestamp)`
//! triples plus the final persisted conversation record (spec §6).

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::Mutex;

/// One completed conversational turn.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    /// User utterance text.
    pub user: String,
    /// Assistant reply text.
    pub assistant: String,
    /// Tool invoked to produce this turn, if any (spec §4.7).
    pub tool_name: Option<String>,
    /// When the turn was recorded.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Status of a persisted call record (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Still in progress (not a terminal state; used only for in-flight reads).
    InProgress,
    /// Ended normally (spec §4.6 `Ending`).
    Completed,
    /// The transport closed unexpectedly.
    Disconnected,
    /// A fatal error ended the session (spec §4.8).
    Failed,
    /// The inactivity watchdog elapsed (spec §5).
    Timeout,
}

impl CallStatus {
    fn as_str(self) -> &'static str {
        match self {
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Disconnected => "disconnected",
            CallStatus::Failed => "failed",
            CallStatus::Timeout => "timeout",
        }
    }
}

/// Append-only record of turns, plus final persistence of the whole call.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one completed turn to `call_id`'s transcript.
    ///
    /// # Errors
    ///
    /// Returns an error if the append fails.
    async fn append_turn(&self, call_id: &str, turn: &TurnRecord) -> Result<()>;

    /// Persist the final call record (spec §6).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn finalize_call(
        &self,
        call_id: &str,
        agent_id: &str,
        status: CallStatus,
        started_at: chrono::DateTime<chrono::Utc>,
        ended_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()>;
}

/// Default [`HistoryStore`] adapter: a bundled SQLite database guarded by a
/// mutex, matching the teacher's single-connection persistence idiom.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl SqliteHistoryStore {
    /// Open (or create) the history database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CoreError::History(format!("open failed: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS turns (
                call_id TEXT NOT NULL,
                user_text TEXT NOT NULL,
                assistant_text TEXT NOT NULL,
                tool_name TEXT,
                ts TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS calls (
                call_id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT NOT NULL
            );",
        )
        .map_err(|e| CoreError::History(format!("migration failed: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append_turn(&self, call_id: &str, turn: &TurnRecord) -> Result<()> {
        let conn = self.conn.lock().expect("history mutex poisoned");
        conn.execute(
            "INSERT INTO turns (call_id, user_text, assistant_text, tool_name, ts) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                call_id,
                turn.user,
                turn.assistant,
                turn.tool_name,
                turn.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| CoreError::History(format!("append failed: {e}")))?;
        Ok(())
    }

    async fn finalize_call(
        &self,
        call_id: &str,
        agent_id: &str,
        status: CallStatus,
        started_at: chrono::DateTime<chrono::Utc>,
        ended_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("history mutex poisoned");
        conn.execute(
            "INSERT INTO calls (call_id, agent_id, status, started_at, ended_at) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(call_id) DO UPDATE SET status = excluded.status, ended_at = excluded.ended_at",
            rusqlite::params![
                call_id,
                agent_id,
                status.as_str(),
                started_at.to_rfc3339(),
                ended_at.to_rfc3339(),
            ],
        )
        .map_err(|e| CoreError::History(format!("finalize failed: {e}")))?;
        Ok(())
    }
}
