//! Identity directory: user profiles, presence flags and connection tokens.
//!
//! The directory is owned by the wider platform. The engine only reads
//! profiles, mirrors the `online`/`searching` flags and resolves the opaque
//! tokens clients present when opening a socket.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::core::config::StorageConfig;
use crate::core::errors::VoxResult;
use crate::core::ids::UserId;

/// Boxed future type for directory operations.
pub type DirectoryFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Profile fields the engine reads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserProfile {
    /// Stable numeric id.
    pub id: UserId,
    /// Login name.
    pub username: String,
    /// Optional given name.
    pub first_name: Option<String>,
    /// Presence flag.
    pub online: bool,
    /// Mirror of queue membership. Best effort only.
    pub searching: bool,
}

impl UserProfile {
    /// Name shown to the partner: the trimmed first name, else the username.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.first_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.username.trim())
            .to_string()
    }
}

/// Identity directory trait.
pub trait IdentityDirectory: Send + Sync {
    /// Load a profile.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn profile(&self, user_id: UserId) -> DirectoryFuture<'_, VoxResult<Option<UserProfile>>>;

    /// Set the `searching` flag. Always marks the user online as well.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn set_searching(&self, user_id: UserId, searching: bool)
    -> DirectoryFuture<'_, VoxResult<()>>;

    /// Set the `online` flag. Going offline also clears `searching`.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn set_online(&self, user_id: UserId, online: bool) -> DirectoryFuture<'_, VoxResult<()>>;

    /// Resolve a client token to a user. Single-use tokens are consumed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn resolve_token(&self, token: String) -> DirectoryFuture<'_, VoxResult<Option<UserId>>>;

    /// Clear `searching` for every user not in `queued`. Returns the number of
    /// flags cleared.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn clear_stale_searching(&self, queued: Vec<UserId>) -> DirectoryFuture<'_, VoxResult<usize>>;
}

/// `SQLite` implementation of the identity directory.
pub struct SqliteIdentityDirectory {
    conn: Connection,
}

impl SqliteIdentityDirectory {
    /// Open the directory at the configured path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> VoxResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        Self::from_connection(conn).await
    }

    /// Use an already opened connection (in-memory databases in tests).
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn from_connection(conn: Connection) -> VoxResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY,
                    username TEXT NOT NULL UNIQUE,
                    first_name TEXT,
                    is_online INTEGER NOT NULL DEFAULT 0,
                    searching_partner INTEGER NOT NULL DEFAULT 0
                );
                CREATE TABLE IF NOT EXISTS ws_tokens (
                    token TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id),
                    single_use INTEGER NOT NULL DEFAULT 1,
                    expires_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_users_searching
                    ON users (searching_partner);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Insert or update a user row. Used by the platform when its user
    /// table is shared with this database, and by tests.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn upsert_user(
        &self,
        user_id: UserId,
        username: &str,
        first_name: Option<&str>,
    ) -> VoxResult<()> {
        let id = user_id.get();
        let username = username.to_string();
        let first_name = first_name.map(str::to_string);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, username, first_name) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET
                        username = excluded.username,
                        first_name = excluded.first_name",
                    rusqlite::params![id, username, first_name],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Store a token for a user.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn issue_token(
        &self,
        user_id: UserId,
        token: &str,
        single_use: bool,
        expires_at: DateTime<Utc>,
    ) -> VoxResult<()> {
        let id = user_id.get();
        let token = token.to_string();
        let expires = expires_at.timestamp_millis();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO ws_tokens (token, user_id, single_use, expires_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![token, id, single_use, expires],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

impl IdentityDirectory for SqliteIdentityDirectory {
    fn profile(&self, user_id: UserId) -> DirectoryFuture<'_, VoxResult<Option<UserProfile>>> {
        Box::pin(async move {
            let id = user_id.get();
            let profile = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            "SELECT username, first_name, is_online, searching_partner
                             FROM users WHERE id = ?1",
                            rusqlite::params![id],
                            |row| {
                                Ok(UserProfile {
                                    id: UserId::new(id),
                                    username: row.get(0)?,
                                    first_name: row.get(1)?,
                                    online: row.get(2)?,
                                    searching: row.get(3)?,
                                })
                            },
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            Ok(profile)
        })
    }

    fn set_searching(
        &self,
        user_id: UserId,
        searching: bool,
    ) -> DirectoryFuture<'_, VoxResult<()>> {
        Box::pin(async move {
            let id = user_id.get();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "UPDATE users SET searching_partner = ?2, is_online = 1 WHERE id = ?1",
                        rusqlite::params![id, searching],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn set_online(&self, user_id: UserId, online: bool) -> DirectoryFuture<'_, VoxResult<()>> {
        Box::pin(async move {
            let id = user_id.get();
            self.conn
                .call(move |conn| {
                    if online {
                        conn.execute(
                            "UPDATE users SET is_online = 1 WHERE id = ?1",
                            rusqlite::params![id],
                        )?;
                    } else {
                        conn.execute(
                            "UPDATE users SET is_online = 0, searching_partner = 0 WHERE id = ?1",
                            rusqlite::params![id],
                        )?;
                    }
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn resolve_token(&self, token: String) -> DirectoryFuture<'_, VoxResult<Option<UserId>>> {
        Box::pin(async move {
            let now = Utc::now().timestamp_millis();
            let user = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let row = tx
                        .query_row(
                            "SELECT user_id, single_use, expires_at FROM ws_tokens WHERE token = ?1",
                            rusqlite::params![token],
                            |row| {
                                Ok((
                                    row.get::<_, i64>(0)?,
                                    row.get::<_, bool>(1)?,
                                    row.get::<_, i64>(2)?,
                                ))
                            },
                        )
                        .optional()?;

                    let resolved = match row {
                        Some((user_id, single_use, expires_at)) => {
                            if single_use || expires_at <= now {
                                tx.execute(
                                    "DELETE FROM ws_tokens WHERE token = ?1",
                                    rusqlite::params![token],
                                )?;
                            }
                            (expires_at > now).then_some(user_id)
                        }
                        None => None,
                    };
                    tx.commit()?;
                    Ok(resolved)
                })
                .await?;
            Ok(user.map(UserId::new))
        })
    }

    fn clear_stale_searching(&self, queued: Vec<UserId>) -> DirectoryFuture<'_, VoxResult<usize>> {
        Box::pin(async move {
            let keep: Vec<i64> = queued.into_iter().map(UserId::get).collect();
            let cleared = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let stale: Vec<i64> = {
                        let mut stmt =
                            tx.prepare("SELECT id FROM users WHERE searching_partner = 1")?;
                        let ids = stmt
                            .query_map([], |row| row.get::<_, i64>(0))?
                            .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                        ids.into_iter().filter(|id| !keep.contains(id)).collect()
                    };
                    {
                        let mut update =
                            tx.prepare("UPDATE users SET searching_partner = 0 WHERE id = ?1")?;
                        for id in &stale {
                            update.execute(rusqlite::params![id])?;
                        }
                    }
                    tx.commit()?;
                    Ok(stale.len())
                })
                .await?;
            Ok(cleared)
        })
    }
}
