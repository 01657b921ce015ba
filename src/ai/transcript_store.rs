//! Append-only transcript of AI calls, independent of the prompt window.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use tokio_rusqlite::Connection;

use crate::ai::conversation::{ConversationTurn, TurnRole};
use crate::core::config::StorageConfig;
use crate::core::errors::{VoxError, VoxResult};
use crate::core::ids::RoomId;
use crate::session::store::StoreFuture;

/// One stored utterance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TranscriptRecord {
    /// AI room the turn belongs to.
    pub room_id: RoomId,
    /// When the turn was recorded.
    pub timestamp: DateTime<Utc>,
    /// The turn.
    pub turn: ConversationTurn,
}

/// Transcript store trait.
pub trait TranscriptStore: Send + Sync {
    /// Append one turn.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn append(
        &self,
        room_id: RoomId,
        turn: ConversationTurn,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, VoxResult<()>>;

    /// Every turn of a room, oldest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn load(&self, room_id: RoomId) -> StoreFuture<'_, VoxResult<Vec<TranscriptRecord>>>;
}

/// `SQLite` implementation of transcript storage.
pub struct SqliteTranscriptStore {
    conn: Connection,
}

impl SqliteTranscriptStore {
    /// Open the store at the configured path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> VoxResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        Self::from_connection(conn).await
    }

    /// Use an already opened connection.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn from_connection(conn: Connection) -> VoxResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS ai_chat_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    room_id INTEGER NOT NULL,
                    ts INTEGER NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_ai_chat_messages_room
                    ON ai_chat_messages (room_id, id);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

impl TranscriptStore for SqliteTranscriptStore {
    fn append(
        &self,
        room_id: RoomId,
        turn: ConversationTurn,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, VoxResult<()>> {
        Box::pin(async move {
            let room = room_id.get();
            let ts = at.timestamp_millis();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO ai_chat_messages (room_id, ts, role, content)
                         VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![room, ts, turn.role.as_str(), turn.text],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn load(&self, room_id: RoomId) -> StoreFuture<'_, VoxResult<Vec<TranscriptRecord>>> {
        Box::pin(async move {
            let room = room_id.get();
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT ts, role, content FROM ai_chat_messages
                         WHERE room_id = ?1
                         ORDER BY id",
                    )?;
                    let rows = stmt
                        .query_map(rusqlite::params![room], |row| {
                            let ts: i64 = row.get(0)?;
                            let role: String = row.get(1)?;
                            let content: String = row.get(2)?;
                            Ok((ts, role, content))
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            let mut records = Vec::with_capacity(rows.len());
            for (ts, role, content) in rows {
                let timestamp = Utc
                    .timestamp_millis_opt(ts)
                    .single()
                    .ok_or_else(|| VoxError::InvalidData("invalid timestamp".to_string()))?;
                let role = TurnRole::from_str(&role)
                    .map_err(|err| VoxError::InvalidData(format!("invalid role: {err}")))?;
                records.push(TranscriptRecord {
                    room_id,
                    timestamp,
                    turn: ConversationTurn {
                        role,
                        text: content,
                    },
                });
            }
            Ok(records)
        })
    }
}
