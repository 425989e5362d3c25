// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! SQLite-backed conversation store

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::chat::continuation::ContinuationStore;
use crate::error::{Result, TallyError};
use crate::store::{
    Completion, Conversation, ConversationRepository, ConversationSummary, Role, Turn,
};

/// Parse a UUID from a database string, converting errors to rusqlite errors
fn parse_uuid_from_db(id: &str, column: usize) -> std::result::Result<Uuid, rusqlite::Error> {
    Uuid::parse_str(id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parse a DateTime from a database RFC3339 string, converting errors to rusqlite errors
fn parse_datetime_from_db(
    timestamp: &str,
    column: usize,
) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

/// Fixed-width timestamps so text ordering matches time ordering
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn storage_err(context: &'static str) -> impl Fn(rusqlite::Error) -> TallyError {
    move |e| TallyError::Storage(format!("{}: {}", context, e))
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(Conversation {
        id: parse_uuid_from_db(&id, 0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        continuation_token: row.get(3)?,
        created_at: parse_datetime_from_db(&created_at, 4)?,
        updated_at: parse_datetime_from_db(&updated_at, 5)?,
    })
}

fn turn_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Turn> {
    let id: String = row.get(0)?;
    let role: String = row.get(1)?;
    let tool_activity: String = row.get(3)?;
    let files: String = row.get(4)?;
    let completion: String = row.get(6)?;
    let created_at: String = row.get(7)?;

    Ok(Turn {
        id: parse_uuid_from_db(&id, 0)?,
        role: Role::parse(&role).unwrap_or(Role::Assistant),
        content: row.get(2)?,
        tool_activity: serde_json::from_str(&tool_activity).unwrap_or_default(),
        files: serde_json::from_str(&files).unwrap_or_default(),
        model: row.get(5)?,
        completion: Completion::parse(&completion).unwrap_or(Completion::Complete),
        created_at: parse_datetime_from_db(&created_at, 7)?,
    })
}

/// Conversation and continuation storage in one SQLite database
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(storage_err("Failed to open database"))?;
        tracing::debug!(path = %path.display(), "Opened conversation database");
        Self::with_connection(conn)
    }

    /// A private in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err("Failed to open database"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Database lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                "PRAGMA foreign_keys = ON;
                CREATE TABLE IF NOT EXISTS conversations (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    continuation_token TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_conversations_user
                    ON conversations(user_id, updated_at);
                CREATE TABLE IF NOT EXISTS turns (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL
                        REFERENCES conversations(id) ON DELETE CASCADE,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    tool_activity TEXT NOT NULL,
                    files TEXT NOT NULL,
                    model TEXT,
                    completion TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_turns_conversation
                    ON turns(conversation_id);",
            )
            .map_err(storage_err("Failed to create schema"))
    }

    /// Touch `updated_at`; false if the conversation does not exist
    fn touch(conn: &Connection, conversation_id: Uuid) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![format_timestamp(Utc::now()), conversation_id.to_string()],
            )
            .map_err(storage_err("Failed to update conversation"))?;
        Ok(changed > 0)
    }

    /// Number of stored turns across all conversations
    pub fn turn_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM turns", [], |row| row.get(0))
            .map_err(storage_err("Failed to count turns"))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl ConversationRepository for SqliteStore {
    async fn create_conversation(&self, user_id: &str, title: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = format_timestamp(Utc::now());
        self.conn()
            .execute(
                "INSERT INTO conversations (id, user_id, title, continuation_token, created_at, updated_at)
                VALUES (?1, ?2, ?3, NULL, ?4, ?4)",
                params![id.to_string(), user_id, title, now],
            )
            .map_err(storage_err("Failed to create conversation"))?;
        tracing::debug!(conversation_id = %id, user_id, "Created conversation");
        Ok(id)
    }

    async fn conversation(&self, id: Uuid, user_id: &str) -> Result<Option<Conversation>> {
        self.conn()
            .query_row(
                "SELECT id, user_id, title, continuation_token, created_at, updated_at
                FROM conversations WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), user_id],
                conversation_from_row,
            )
            .optional()
            .map_err(storage_err("Failed to load conversation"))
    }

    async fn append_turn(&self, conversation_id: Uuid, turn: &Turn) -> Result<()> {
        let tool_activity = serde_json::to_string(&turn.tool_activity)?;
        let files = serde_json::to_string(&turn.files)?;

        let conn = self.conn();
        if !Self::touch(&conn, conversation_id)? {
            return Err(TallyError::NotFound(format!(
                "conversation {}",
                conversation_id
            )));
        }
        conn.execute(
            "INSERT INTO turns
            (id, conversation_id, role, content, tool_activity, files, model, completion, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                turn.id.to_string(),
                conversation_id.to_string(),
                turn.role.as_str(),
                &turn.content,
                tool_activity,
                files,
                &turn.model,
                turn.completion.as_str(),
                format_timestamp(turn.created_at),
            ],
        )
        .map_err(storage_err("Failed to store turn"))?;
        Ok(())
    }

    async fn update_continuation_token(&self, conversation_id: Uuid, token: &str) -> Result<()> {
        let changed = self
            .conn()
            .execute(
                "UPDATE conversations SET continuation_token = ?1 WHERE id = ?2",
                params![token, conversation_id.to_string()],
            )
            .map_err(storage_err("Failed to store continuation token"))?;
        if changed == 0 {
            return Err(TallyError::NotFound(format!(
                "conversation {}",
                conversation_id
            )));
        }
        Ok(())
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, title, continuation_token, created_at, updated_at
                FROM conversations WHERE user_id = ?1
                ORDER BY updated_at DESC, rowid DESC",
            )
            .map_err(storage_err("Failed to prepare query"))?;
        let rows = stmt
            .query_map(params![user_id], conversation_from_row)
            .map_err(storage_err("Failed to list conversations"))?;

        let mut summaries = Vec::new();
        for row in rows {
            let conversation = row.map_err(storage_err("Failed to read conversation"))?;
            summaries.push(ConversationSummary::from(conversation));
        }
        Ok(summaries)
    }

    async fn turns(&self, conversation_id: Uuid, user_id: &str) -> Result<Vec<Turn>> {
        if self.conversation(conversation_id, user_id).await?.is_none() {
            return Err(TallyError::NotFound(format!(
                "conversation {}",
                conversation_id
            )));
        }

        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, role, content, tool_activity, files, model, completion, created_at
                FROM turns WHERE conversation_id = ?1 ORDER BY rowid",
            )
            .map_err(storage_err("Failed to prepare query"))?;
        let rows = stmt
            .query_map(params![conversation_id.to_string()], turn_from_row)
            .map_err(storage_err("Failed to load turns"))?;

        let mut turns = Vec::new();
        for row in rows {
            turns.push(row.map_err(storage_err("Failed to read turn"))?);
        }
        Ok(turns)
    }

    async fn delete_conversation(&self, id: Uuid, user_id: &str) -> Result<bool> {
        let changed = self
            .conn()
            .execute(
                "DELETE FROM conversations WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), user_id],
            )
            .map_err(storage_err("Failed to delete conversation"))?;
        Ok(changed > 0)
    }
}

#[async_trait]
impl ContinuationStore for SqliteStore {
    async fn get(&self, conversation_id: Uuid) -> Result<Option<String>> {
        let token: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT continuation_token FROM conversations WHERE id = ?1",
                params![conversation_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("Failed to load continuation token"))?;
        Ok(token.flatten())
    }

    async fn set(&self, conversation_id: Uuid, token: &str) -> Result<()> {
        self.update_continuation_token(conversation_id, token).await
    }
}
