//! Database module for the buy assistant
//!
//! Persists conversation snapshots. The `messages` table mirrors the chat
//! log and is only ever appended to.

mod schema;

pub use schema::*;
use schema::{datetime_column, enum_column, enum_text, format_datetime, json_column};

use crate::conversation::{
    ChatLog, ChatMessage, Conversation, ConversationMetadata, ConversationStatus, OrderStatus,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Refusing to rewrite chat log of {id}: snapshot ending at {offered} does not extend the stored log ending at {stored}")]
    LogRewrite { id: String, stored: i64, offered: i64 },
    #[error("Database lock poisoned")]
    LockPoisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        self.lock()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // ==================== Snapshot Operations ====================

    /// Store a snapshot.
    ///
    /// Upserts the conversation row and inserts the chat entries newer than
    /// what is stored. A snapshot whose log does not extend the stored one,
    /// because it is shorter or diverges from it, is refused.
    pub fn save_snapshot(&self, conversation: &Conversation) -> DbResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = format_datetime(&Utc::now());

        let stored: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) FROM messages WHERE conversation_id = ?1",
            params![conversation.id],
            |row| row.get(0),
        )?;
        let offered = conversation.chat_log.last_sequence_id();
        if stored > offered {
            tracing::error!(
                conv_id = %conversation.id,
                stored,
                offered,
                "Snapshot would shrink the stored chat log"
            );
            return Err(DbError::LogRewrite {
                id: conversation.id.clone(),
                stored,
                offered,
            });
        }

        // The stored entries must be a prefix of the snapshot's log
        let persisted = load_messages(&tx, &conversation.id)?;
        let extends = conversation
            .chat_log
            .iter()
            .take(persisted.len())
            .eq(persisted.iter());
        if !extends {
            tracing::error!(
                conv_id = %conversation.id,
                stored,
                offered,
                "Snapshot forks from the stored chat log"
            );
            return Err(DbError::LogRewrite {
                id: conversation.id.clone(),
                stored,
                offered,
            });
        }

        tx.execute(
            "INSERT INTO conversations (id, status, order_status, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                order_status = excluded.order_status,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at",
            params![
                conversation.id,
                enum_text(&conversation.status)?,
                enum_text(&conversation.order_status)?,
                serde_json::to_string(&conversation.metadata)?,
                now,
            ],
        )?;

        let fresh = conversation.chat_log.since(stored);
        {
            let mut insert = tx.prepare(
                "INSERT INTO messages (conversation_id, sequence_id, sender, text, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for message in fresh {
                insert.execute(params![
                    conversation.id,
                    message.sequence_id,
                    enum_text(&message.sender)?,
                    message.text,
                    serde_json::to_string(&message.data)?,
                    format_datetime(&message.created_at),
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!(
            conv_id = %conversation.id,
            status = %conversation.status,
            new_messages = fresh.len(),
            "Saved snapshot"
        );
        Ok(())
    }

    /// Load a snapshot by conversation ID
    pub fn load_snapshot(&self, id: &str) -> DbResult<Conversation> {
        let conn = self.lock()?;

        let header = conn
            .query_row(
                "SELECT status, order_status, metadata FROM conversations WHERE id = ?1",
                params![id],
                |row| -> rusqlite::Result<(ConversationStatus, OrderStatus, ConversationMetadata)> {
                    Ok((
                        enum_column(row, 0)?,
                        enum_column(row, 1)?,
                        json_column(row, 2)?,
                    ))
                },
            )
            .optional()?;
        let Some((status, order_status, metadata)) = header else {
            return Err(DbError::ConversationNotFound(id.to_string()));
        };

        Ok(Conversation {
            id: id.to_string(),
            status,
            order_status,
            chat_log: ChatLog::from_messages(load_messages(&conn, id)?),
            metadata,
        })
    }

    /// Check whether a conversation is stored
    pub fn conversation_exists(&self, id: &str) -> DbResult<bool> {
        let conn = self.lock()?;
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// List stored conversations, most recently updated first
    pub fn list_conversations(&self) -> DbResult<Vec<ConversationSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.status, c.order_status, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) as message_count
             FROM conversations c
             ORDER BY c.updated_at DESC, c.id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(ConversationSummary {
                id: row.get(0)?,
                status: enum_column(row, 1)?,
                order_status: enum_column(row, 2)?,
                created_at: datetime_column(row, 3)?,
                updated_at: datetime_column(row, 4)?,
                message_count: row.get(5)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Delete a conversation and all its messages
    pub fn delete_conversation(&self, id: &str) -> DbResult<()> {
        let conn = self.lock()?;

        // Messages are deleted by CASCADE
        let deleted = conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;

        if deleted == 0 {
            return Err(DbError::ConversationNotFound(id.to_string()));
        }
        Ok(())
    }
}

/// Stored chat entries of a conversation, oldest first
fn load_messages(conn: &Connection, id: &str) -> DbResult<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(
        "SELECT sequence_id, sender, text, data, created_at
         FROM messages WHERE conversation_id = ?1 ORDER BY sequence_id ASC",
    )?;
    let messages = stmt
        .query_map(params![id], |row| {
            Ok(ChatMessage {
                sequence_id: row.get(0)?,
                sender: enum_column(row, 1)?,
                text: row.get(2)?,
                data: json_column(row, 3)?,
                created_at: datetime_column(row, 4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}
