//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are stored as
//! RFC 3339 text; structured fields (config, counters, envelope, metadata)
//! are stored as JSON columns.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::session::model::{Message, Session, SessionStatus};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn collect_sessions(&self, mut rows: libsql::Rows) -> Result<Vec<Session>, DatabaseError> {
        let mut sessions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to read session row: {e}")))?
        {
            sessions.push(row_to_session(&row)?);
        }
        Ok(sessions)
    }
}

// ── Helper functions ────────────────────────────────────────────────

const SESSION_COLUMNS: &str = "id, config, status, stats, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, session_id, sender, addressee, envelope, raw_text, \
     is_human, detected_questions, metadata, created_at";

/// Parse an RFC 3339 datetime string, falling back to the epoch minimum.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn json_err(context: &str, e: serde_json::Error) -> DatabaseError {
    DatabaseError::Serialization(format!("{context}: {e}"))
}

/// Map a libsql row to a Session (message log not loaded).
///
/// Column order matches SESSION_COLUMNS.
fn row_to_session(row: &libsql::Row) -> Result<Session, DatabaseError> {
    let read = |i: i32| -> Result<String, DatabaseError> {
        row.get::<String>(i)
            .map_err(|e| DatabaseError::Query(format!("Failed to read session column {i}: {e}")))
    };

    let status_str = read(2)?;
    Ok(Session {
        id: read(0)?,
        config: serde_json::from_str(&read(1)?).map_err(|e| json_err("session config", e))?,
        status: status_str.parse().unwrap_or(SessionStatus::Active),
        stats: serde_json::from_str(&read(3)?).map_err(|e| json_err("session stats", e))?,
        messages: Vec::new(),
        created_at: parse_datetime(&read(4)?),
        updated_at: parse_datetime(&read(5)?),
    })
}

/// Map a libsql row to a Message.
///
/// Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<Message, DatabaseError> {
    let read = |i: i32| -> Result<String, DatabaseError> {
        row.get::<String>(i)
            .map_err(|e| DatabaseError::Query(format!("Failed to read message column {i}: {e}")))
    };

    let addressee: Option<String> = row.get(3).ok();
    let envelope_json: Option<String> = row.get(4).ok();
    let envelope = match envelope_json {
        Some(json) => Some(serde_json::from_str(&json).map_err(|e| json_err("envelope", e))?),
        None => None,
    };
    let is_human: i64 = row
        .get(6)
        .map_err(|e| DatabaseError::Query(format!("Failed to read is_human: {e}")))?;

    Ok(Message {
        id: read(0)?,
        session_id: read(1)?,
        sender: read(2)?,
        addressee,
        envelope,
        raw_text: read(5)?,
        is_human: is_human != 0,
        detected_questions: serde_json::from_str(&read(7)?)
            .map_err(|e| json_err("detected questions", e))?,
        metadata: serde_json::from_str(&read(8)?).map_err(|e| json_err("metadata", e))?,
        created_at: parse_datetime(&read(9)?),
    })
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_session(&self, session: &Session) -> Result<(), DatabaseError> {
        let config = serde_json::to_string(&session.config)
            .map_err(|e| json_err("session config", e))?;
        let stats =
            serde_json::to_string(&session.stats).map_err(|e| json_err("session stats", e))?;
        self.conn()
            .execute(
                "INSERT INTO sessions (id, config, subject, summary, status, stats, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session.id.clone(),
                    config,
                    session.config.subject.clone(),
                    session.config.summary.clone(),
                    session.status.as_str(),
                    stats,
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to insert session: {e}")))?;
        debug!(id = %session.id, "Session inserted");
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to query session: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to read session row: {e}")))?;

        match row {
            Some(row) => {
                let mut session = row_to_session(&row)?;
                session.messages = self.list_messages(id).await?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn update_session(&self, session: &Session) -> Result<(), DatabaseError> {
        let config = serde_json::to_string(&session.config)
            .map_err(|e| json_err("session config", e))?;
        let stats =
            serde_json::to_string(&session.stats).map_err(|e| json_err("session stats", e))?;
        self.conn()
            .execute(
                "UPDATE sessions SET config = ?1, subject = ?2, summary = ?3, status = ?4,
                     stats = ?5, updated_at = ?6 WHERE id = ?7",
                params![
                    config,
                    session.config.subject.clone(),
                    session.config.summary.clone(),
                    session.status.as_str(),
                    stats,
                    session.updated_at.to_rfc3339(),
                    session.id.clone(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to update session: {e}")))?;
        Ok(())
    }

    async fn list_sessions(
        &self,
        limit: usize,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>, DatabaseError> {
        let rows = match status {
            Some(status) => self
                .conn()
                .query(
                    &format!(
                        "SELECT {SESSION_COLUMNS} FROM sessions WHERE status = ?1
                         ORDER BY created_at DESC LIMIT ?2"
                    ),
                    params![status.as_str(), limit as i64],
                )
                .await,
            None => self
                .conn()
                .query(
                    &format!(
                        "SELECT {SESSION_COLUMNS} FROM sessions
                         ORDER BY created_at DESC LIMIT ?1"
                    ),
                    params![limit as i64],
                )
                .await,
        }
        .map_err(|e| DatabaseError::Query(format!("Failed to list sessions: {e}")))?;

        self.collect_sessions(rows).await
    }

    async fn find_active_session(&self) -> Result<Option<Session>, DatabaseError> {
        let sessions = self.list_sessions(1, Some(SessionStatus::Active)).await?;
        match sessions.into_iter().next() {
            Some(session) => self.get_session(&session.id).await,
            None => Ok(None),
        }
    }

    async fn search_sessions(&self, query: &str) -> Result<Vec<Session>, DatabaseError> {
        let pattern = format!("%{}%", query.to_lowercase());
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT DISTINCT s.id, s.config, s.status, s.stats, s.created_at, s.updated_at
                     FROM sessions s
                     LEFT JOIN messages m ON m.session_id = s.id
                     WHERE lower(s.subject) LIKE ?1
                        OR lower(s.summary) LIKE ?1
                        OR lower(m.raw_text) LIKE ?1
                     ORDER BY s.created_at DESC"
                ),
                params![pattern],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to search sessions: {e}")))?;

        self.collect_sessions(rows).await
    }

    async fn insert_message(&self, message: &Message) -> Result<(), DatabaseError> {
        let envelope = match &message.envelope {
            Some(envelope) => {
                Some(serde_json::to_string(envelope).map_err(|e| json_err("envelope", e))?)
            }
            None => None,
        };
        let questions = serde_json::to_string(&message.detected_questions)
            .map_err(|e| json_err("detected questions", e))?;
        let metadata =
            serde_json::to_string(&message.metadata).map_err(|e| json_err("metadata", e))?;

        self.conn()
            .execute(
                "INSERT INTO messages (id, session_id, sender, addressee, envelope, raw_text,
                     is_human, detected_questions, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    message.id.clone(),
                    message.session_id.clone(),
                    message.sender.clone(),
                    message.addressee.clone(),
                    envelope,
                    message.raw_text.clone(),
                    message.is_human as i64,
                    questions,
                    metadata,
                    message.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to insert message: {e}")))?;
        debug!(id = %message.id, session_id = %message.session_id, "Message inserted");
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE session_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to list messages: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to read message row: {e}")))?
        {
            messages.push(row_to_message(&row)?);
        }
        Ok(messages)
    }
}
