//! Unified `Database` trait — single async interface for session persistence.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::session::model::{Message, Session, SessionStatus};

/// Backend-agnostic database trait covering sessions and their message logs.
///
/// `get_session` returns the session with its ordered message log loaded;
/// `list_sessions` and `search_sessions` return sessions without messages.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Sessions ────────────────────────────────────────────────────

    /// Insert a new session (config, status, counters).
    async fn insert_session(&self, session: &Session) -> Result<(), DatabaseError>;

    /// Get a session by ID, message log included.
    async fn get_session(&self, id: &str) -> Result<Option<Session>, DatabaseError>;

    /// Persist a session's config, status, counters, and `updated_at`.
    /// The message log is append-only and written via `insert_message`.
    async fn update_session(&self, session: &Session) -> Result<(), DatabaseError>;

    /// List sessions, most recent first, optionally filtered by status.
    async fn list_sessions(
        &self,
        limit: usize,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>, DatabaseError>;

    /// The currently active session, if any.
    async fn find_active_session(&self) -> Result<Option<Session>, DatabaseError>;

    /// Case-insensitive substring search over subject, summary, and raw
    /// message text.
    async fn search_sessions(&self, query: &str) -> Result<Vec<Session>, DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Append a message to its session's log.
    async fn insert_message(&self, message: &Message) -> Result<(), DatabaseError>;

    /// Ordered message log for a session.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, DatabaseError>;
}
