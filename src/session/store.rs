//! Room and rating persistence.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use rusqlite::types::Type;
use tokio_rusqlite::Connection;

use crate::core::config::StorageConfig;
use crate::core::errors::{VoxError, VoxResult};
use crate::core::ids::{RatingId, RoomId, UserId};
use crate::core::kinds::{GenderFilter, Level, PartnerKind, RoomStatus};
use crate::session::rating::{NewRating, Rating, RatingScore};
use crate::session::room::Room;

/// Boxed future type for room store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Room about to be created. Rooms are born `active`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NewRoom {
    /// First participant (the caller in human rooms).
    pub participant_a: UserId,
    /// Second participant, `None` for AI rooms.
    pub participant_b: Option<UserId>,
    /// Partner kind.
    pub partner_kind: PartnerKind,
    /// Gender filter at search time.
    pub gender_filter: GenderFilter,
    /// Level at search time.
    pub level: Level,
}

impl NewRoom {
    /// Two-human room.
    #[must_use]
    pub const fn human(
        caller: UserId,
        callee: UserId,
        gender_filter: GenderFilter,
        level: Level,
    ) -> Self {
        Self {
            participant_a: caller,
            participant_b: Some(callee),
            partner_kind: PartnerKind::Human,
            gender_filter,
            level,
        }
    }

    /// Room between a user and the AI coach.
    #[must_use]
    pub const fn ai(user: UserId) -> Self {
        Self {
            participant_a: user,
            participant_b: None,
            partner_kind: PartnerKind::Ai,
            gender_filter: GenderFilter::Any,
            level: Level::Any,
        }
    }
}

/// Result of the conditional close.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CloseOutcome {
    /// This call performed the transition.
    Closed(Room),
    /// The room was already ended; nothing was written.
    AlreadyEnded(Room),
}

impl CloseOutcome {
    /// The room as stored after the call.
    #[must_use]
    pub const fn room(&self) -> &Room {
        match self {
            Self::Closed(room) | Self::AlreadyEnded(room) => room,
        }
    }

    /// Whether this call performed the transition.
    #[must_use]
    pub const fn transitioned(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// Result of a rating insert.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RatingInsert {
    /// New row written.
    Created(Rating),
    /// A rating for (room, rater) already exists.
    Duplicate,
}

/// Room store trait.
pub trait RoomStore: Send + Sync {
    /// Create an active room. Human rooms also bump both participants'
    /// call counters in the same transaction.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn create_room(&self, room: NewRoom, now: DateTime<Utc>) -> StoreFuture<'_, VoxResult<Room>>;

    /// Load a room.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn room(&self, room_id: RoomId) -> StoreFuture<'_, VoxResult<Option<Room>>>;

    /// Move the room to `ended` only if it is still `active`, writing
    /// `ended_at` and the duration. `None` when the room does not exist.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn close_room(
        &self,
        room_id: RoomId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, VoxResult<Option<CloseOutcome>>>;

    /// Active rooms the user participates in.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn active_rooms_for(&self, user_id: UserId) -> StoreFuture<'_, VoxResult<Vec<Room>>>;

    /// Most recent rooms for the user, newest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn rooms_for(&self, user_id: UserId, limit: usize)
    -> StoreFuture<'_, VoxResult<Vec<Room>>>;

    /// Insert a rating; uniqueness of (room, rater) is enforced here.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn insert_rating(
        &self,
        rating: NewRating,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, VoxResult<RatingInsert>>;

    /// Rating given by `rater` for `room_id`.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn rating_for(
        &self,
        room_id: RoomId,
        rater: UserId,
    ) -> StoreFuture<'_, VoxResult<Option<Rating>>>;

    /// Rooms the user has already rated.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn rated_rooms(&self, rater: UserId) -> StoreFuture<'_, VoxResult<Vec<RoomId>>>;

    /// Human calls the user has taken part in.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn call_count(&self, user_id: UserId) -> StoreFuture<'_, VoxResult<u64>>;
}

const ROOM_COLUMNS: &str = "id, user1_id, user2_id, partner_type, status, gender_filter, level,
     started_at, connected_at, ended_at, duration_seconds";

const RATING_COLUMNS: &str = "id, room_id, rater_id, rated_user_id, rating, comment, created_at";

/// `SQLite` implementation of room storage.
pub struct SqliteRoomStore {
    conn: Connection,
}

impl SqliteRoomStore {
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
                "CREATE TABLE IF NOT EXISTS voice_rooms (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user1_id INTEGER NOT NULL,
                    user2_id INTEGER,
                    partner_type TEXT NOT NULL,
                    status TEXT NOT NULL,
                    gender_filter TEXT NOT NULL DEFAULT 'any',
                    level TEXT NOT NULL DEFAULT 'any',
                    started_at INTEGER NOT NULL,
                    connected_at INTEGER,
                    ended_at INTEGER,
                    duration_seconds INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_voice_rooms_user1
                    ON voice_rooms (user1_id, status);
                CREATE INDEX IF NOT EXISTS idx_voice_rooms_user2
                    ON voice_rooms (user2_id, status);
                CREATE TABLE IF NOT EXISTS voice_ratings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    room_id INTEGER NOT NULL REFERENCES voice_rooms(id),
                    rater_id INTEGER NOT NULL,
                    rated_user_id INTEGER,
                    rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                    comment TEXT NOT NULL DEFAULT '',
                    created_at INTEGER NOT NULL,
                    UNIQUE (room_id, rater_id)
                );
                CREATE TABLE IF NOT EXISTS call_counters (
                    user_id INTEGER PRIMARY KEY,
                    call_count INTEGER NOT NULL DEFAULT 0
                );",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

fn millis_to_datetime(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn parse_column<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    T::from_str(value)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn room_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    let partner_kind: String = row.get(3)?;
    let status: String = row.get(4)?;
    let gender_filter: String = row.get(5)?;
    let level: String = row.get(6)?;
    let connected_at: Option<i64> = row.get(8)?;
    let ended_at: Option<i64> = row.get(9)?;
    let duration: Option<i64> = row.get(10)?;
    Ok(Room {
        id: RoomId::new(row.get(0)?),
        participant_a: UserId::new(row.get(1)?),
        participant_b: row.get::<_, Option<i64>>(2)?.map(UserId::new),
        partner_kind: parse_column::<PartnerKind>(3, &partner_kind)?,
        status: parse_column::<RoomStatus>(4, &status)?,
        gender_filter: parse_column::<GenderFilter>(5, &gender_filter)?,
        level: parse_column::<Level>(6, &level)?,
        started_at: millis_to_datetime(7, row.get(7)?)?,
        connected_at: connected_at.map(|ms| millis_to_datetime(8, ms)).transpose()?,
        ended_at: ended_at.map(|ms| millis_to_datetime(9, ms)).transpose()?,
        duration_seconds: duration
            .map(|secs| {
                u64::try_from(secs).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(10, secs))
            })
            .transpose()?,
    })
}

fn rating_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Rating> {
    let score: i64 = row.get(4)?;
    Ok(Rating {
        id: RatingId::new(row.get(0)?),
        room_id: RoomId::new(row.get(1)?),
        rater: UserId::new(row.get(2)?),
        rated_user: row.get::<_, Option<i64>>(3)?.map(UserId::new),
        score: RatingScore::try_from(score)
            .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(4, score))?,
        comment: row.get(5)?,
        created_at: millis_to_datetime(6, row.get(6)?)?,
    })
}

fn load_room(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<Room>> {
    conn.query_row(
        &format!("SELECT {ROOM_COLUMNS} FROM voice_rooms WHERE id = ?1"),
        rusqlite::params![id],
        room_from_row,
    )
    .optional()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn limit_param(limit: usize) -> VoxResult<i64> {
    i64::try_from(limit).map_err(|_| VoxError::InvalidData("limit exceeds i64".to_string()))
}

impl RoomStore for SqliteRoomStore {
    fn create_room(&self, room: NewRoom, now: DateTime<Utc>) -> StoreFuture<'_, VoxResult<Room>> {
        Box::pin(async move {
            let started = now.timestamp_millis();
            let created = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(
                        "INSERT INTO voice_rooms
                         (user1_id, user2_id, partner_type, status, gender_filter, level,
                          started_at, connected_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                        rusqlite::params![
                            room.participant_a.get(),
                            room.participant_b.map(UserId::get),
                            room.partner_kind.as_str(),
                            RoomStatus::Active.as_str(),
                            room.gender_filter.as_str(),
                            room.level.as_str(),
                            started,
                        ],
                    )?;
                    let id = tx.last_insert_rowid();

                    if room.partner_kind == PartnerKind::Human {
                        let mut bump = tx.prepare(
                            "INSERT INTO call_counters (user_id, call_count) VALUES (?1, 1)
                             ON CONFLICT(user_id) DO UPDATE SET call_count = call_count + 1",
                        )?;
                        bump.execute(rusqlite::params![room.participant_a.get()])?;
                        if let Some(other) = room.participant_b {
                            bump.execute(rusqlite::params![other.get()])?;
                        }
                    }

                    let created = load_room(&tx, id)?;
                    tx.commit()?;
                    Ok(created)
                })
                .await?;
            created.ok_or_else(|| VoxError::InvalidData("created room vanished".to_string()))
        })
    }

    fn room(&self, room_id: RoomId) -> StoreFuture<'_, VoxResult<Option<Room>>> {
        Box::pin(async move {
            let id = room_id.get();
            let room = self.conn.call(move |conn| Ok(load_room(conn, id)?)).await?;
            Ok(room)
        })
    }

    fn close_room(
        &self,
        room_id: RoomId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, VoxResult<Option<CloseOutcome>>> {
        Box::pin(async move {
            let id = room_id.get();
            let outcome = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let Some(mut room) = load_room(&tx, id)? else {
                        return Ok(None);
                    };
                    let Some(closing) = room.close_at(now) else {
                        return Ok(Some(CloseOutcome::AlreadyEnded(room)));
                    };
                    let duration = i64::try_from(closing.duration_seconds).unwrap_or(i64::MAX);
                    let changed = tx.execute(
                        "UPDATE voice_rooms
                         SET status = ?2, ended_at = ?3, duration_seconds = ?4
                         WHERE id = ?1 AND status = ?5",
                        rusqlite::params![
                            id,
                            RoomStatus::Ended.as_str(),
                            closing.ended_at.timestamp_millis(),
                            duration,
                            RoomStatus::Active.as_str(),
                        ],
                    )?;
                    tx.commit()?;
                    if changed == 1 {
                        room.apply_closing(closing);
                        Ok(Some(CloseOutcome::Closed(room)))
                    } else {
                        Ok(load_room(conn, id)?.map(CloseOutcome::AlreadyEnded))
                    }
                })
                .await?;
            Ok(outcome)
        })
    }

    fn active_rooms_for(&self, user_id: UserId) -> StoreFuture<'_, VoxResult<Vec<Room>>> {
        Box::pin(async move {
            let id = user_id.get();
            let rooms = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {ROOM_COLUMNS} FROM voice_rooms
                         WHERE status = ?2 AND (user1_id = ?1 OR user2_id = ?1)
                         ORDER BY started_at"
                    ))?;
                    let rows = stmt
                        .query_map(
                            rusqlite::params![id, RoomStatus::Active.as_str()],
                            room_from_row,
                        )?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(rooms)
        })
    }

    fn rooms_for(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> StoreFuture<'_, VoxResult<Vec<Room>>> {
        Box::pin(async move {
            let id = user_id.get();
            let limit = limit_param(limit)?;
            let rooms = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {ROOM_COLUMNS} FROM voice_rooms
                         WHERE user1_id = ?1 OR user2_id = ?1
                         ORDER BY started_at DESC, id DESC
                         LIMIT ?2"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![id, limit], room_from_row)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(rooms)
        })
    }

    fn insert_rating(
        &self,
        rating: NewRating,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, VoxResult<RatingInsert>> {
        Box::pin(async move {
            let created = now.timestamp_millis();
            let outcome = self
                .conn
                .call(move |conn| {
                    let inserted = conn.execute(
                        "INSERT INTO voice_ratings
                         (room_id, rater_id, rated_user_id, rating, comment, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        rusqlite::params![
                            rating.room_id.get(),
                            rating.rater.get(),
                            rating.rated_user.map(UserId::get),
                            rating.score.get(),
                            rating.comment,
                            created,
                        ],
                    );
                    match inserted {
                        Ok(_) => {
                            let id = conn.last_insert_rowid();
                            let row = conn.query_row(
                                &format!("SELECT {RATING_COLUMNS} FROM voice_ratings WHERE id = ?1"),
                                rusqlite::params![id],
                                rating_from_row,
                            )?;
                            Ok(RatingInsert::Created(row))
                        }
                        Err(err) if is_unique_violation(&err) => Ok(RatingInsert::Duplicate),
                        Err(err) => Err(err.into()),
                    }
                })
                .await?;
            Ok(outcome)
        })
    }

    fn rating_for(
        &self,
        room_id: RoomId,
        rater: UserId,
    ) -> StoreFuture<'_, VoxResult<Option<Rating>>> {
        Box::pin(async move {
            let room = room_id.get();
            let rater = rater.get();
            let rating = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!(
                                "SELECT {RATING_COLUMNS} FROM voice_ratings
                                 WHERE room_id = ?1 AND rater_id = ?2"
                            ),
                            rusqlite::params![room, rater],
                            rating_from_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            Ok(rating)
        })
    }

    fn rated_rooms(&self, rater: UserId) -> StoreFuture<'_, VoxResult<Vec<RoomId>>> {
        Box::pin(async move {
            let rater = rater.get();
            let ids = self
                .conn
                .call(move |conn| {
                    let mut stmt =
                        conn.prepare("SELECT room_id FROM voice_ratings WHERE rater_id = ?1")?;
                    let rows = stmt
                        .query_map(rusqlite::params![rater], |row| row.get::<_, i64>(0))?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(ids.into_iter().map(RoomId::new).collect())
        })
    }

    fn call_count(&self, user_id: UserId) -> StoreFuture<'_, VoxResult<u64>> {
        Box::pin(async move {
            let id = user_id.get();
            let count = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            "SELECT call_count FROM call_counters WHERE user_id = ?1",
                            rusqlite::params![id],
                            |row| row.get::<_, i64>(0),
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            let count = count.unwrap_or(0);
            let count = u64::try_from(count)
                .map_err(|_| VoxError::InvalidData("invalid call count".to_string()))?;
            Ok(count)
        })
    }
}
