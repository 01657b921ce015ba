//! Room lifecycle: opening rooms, the single close funnel and ratings.
//!
//! Every path that ends a call (socket `end_call`, socket disconnect, HTTP
//! end, the AI `end` message, a new search abandoning an old room) goes
//! through [`SessionLifecycle::end_room`]. Only the caller that performs the
//! `active -> ended` transition broadcasts `call_ended`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::core::errors::{VoxError, VoxResult};
use crate::core::ids::{RoomId, UserId};
use crate::protocol::messages::ServerMessage;
use crate::queue::SearchCriteria;
use crate::relay::hub::RoomHub;
use crate::session::rating::{NewRating, Rating, RatingScore};
use crate::session::room::Room;
use crate::session::store::{CloseOutcome, NewRoom, RatingInsert, RoomStore};

/// One row of a user's call history.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HistoryEntry {
    /// The room.
    pub room: Room,
    /// The other participant, `None` for AI rooms.
    pub partner: Option<UserId>,
    /// Whether the user already rated this room.
    pub has_rated: bool,
}

/// Room lifecycle service shared by the coordinator, the relay and HTTP.
pub struct SessionLifecycle {
    rooms: Arc<dyn RoomStore>,
    hub: Arc<RoomHub>,
}

impl SessionLifecycle {
    /// Build over a store and the room hub used for `call_ended`.
    #[must_use]
    pub fn new(rooms: Arc<dyn RoomStore>, hub: Arc<RoomHub>) -> Self {
        Self { rooms, hub }
    }

    /// Room hub shared with the relay.
    #[must_use]
    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.hub
    }

    /// Create an active human room; both counters are bumped with it.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn open_human_room(
        &self,
        caller: UserId,
        callee: UserId,
        criteria: SearchCriteria,
        now: DateTime<Utc>,
    ) -> VoxResult<Room> {
        let room = self
            .rooms
            .create_room(
                NewRoom::human(caller, callee, criteria.gender_filter, criteria.level),
                now,
            )
            .await?;
        info!(room_id = %room.id, caller = %caller, callee = %callee, "human room created");
        Ok(room)
    }

    /// Create an active AI room.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn open_ai_room(&self, user: UserId, now: DateTime<Utc>) -> VoxResult<Room> {
        let room = self.rooms.create_room(NewRoom::ai(user), now).await?;
        info!(room_id = %room.id, user = %user, "ai room created");
        Ok(room)
    }

    /// Load a room or fail with `RoomNotFound`.
    ///
    /// # Errors
    /// Returns `RoomNotFound` or a storage error.
    pub async fn room(&self, room_id: RoomId) -> VoxResult<Room> {
        self.rooms
            .room(room_id)
            .await?
            .ok_or(VoxError::RoomNotFound(room_id))
    }

    /// Close the room on behalf of one participant.
    ///
    /// `ended_by` is the name carried by `call_ended`. Repeated calls return
    /// `AlreadyEnded` and broadcast nothing.
    ///
    /// # Errors
    /// Returns `RoomNotFound`, `Forbidden` for non-participants, or a storage
    /// error.
    pub async fn end_room(
        &self,
        room_id: RoomId,
        user: UserId,
        ended_by: &str,
        now: DateTime<Utc>,
    ) -> VoxResult<CloseOutcome> {
        let room = self.room(room_id).await?;
        if !room.is_participant(user) {
            return Err(VoxError::Forbidden(format!(
                "user {user} is not a participant of room {room_id}"
            )));
        }
        let outcome = self
            .rooms
            .close_room(room_id, now)
            .await?
            .ok_or(VoxError::RoomNotFound(room_id))?;

        if let CloseOutcome::Closed(closed) = &outcome {
            let notified = self
                .hub
                .broadcast_all(
                    room_id,
                    ServerMessage::CallEnded {
                        ended_by: ended_by.to_string(),
                    }
                    .into(),
                )
                .await;
            info!(
                room_id = %room_id,
                user = %user,
                duration_seconds = closed.duration_seconds.unwrap_or(0),
                notified,
                "room ended"
            );
        } else {
            debug!(room_id = %room_id, user = %user, "room already ended");
        }
        Ok(outcome)
    }

    /// Close every room the user still has active. Returns the rooms this
    /// call closed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn close_abandoned(
        &self,
        user: UserId,
        ended_by: &str,
        now: DateTime<Utc>,
    ) -> VoxResult<Vec<Room>> {
        let mut closed = Vec::new();
        for room in self.rooms.active_rooms_for(user).await? {
            match self.end_room(room.id, user, ended_by, now).await? {
                CloseOutcome::Closed(room) => closed.push(room),
                CloseOutcome::AlreadyEnded(_) => {}
            }
        }
        if !closed.is_empty() {
            info!(user = %user, rooms = closed.len(), "closed abandoned rooms");
        }
        Ok(closed)
    }

    /// Record a rating for a room.
    ///
    /// # Errors
    /// `InvalidRating` (checked first), `RoomNotFound`, `Forbidden` for
    /// non-participants, `AlreadyRated`, or a storage error.
    pub async fn submit_rating(
        &self,
        room_id: RoomId,
        rater: UserId,
        score: i64,
        comment: String,
        now: DateTime<Utc>,
    ) -> VoxResult<Rating> {
        let score = RatingScore::try_from(score)?;
        let room = self.room(room_id).await?;
        if !room.is_participant(rater) {
            return Err(VoxError::Forbidden(format!(
                "user {rater} is not a participant of room {room_id}"
            )));
        }
        if self.rooms.rating_for(room_id, rater).await?.is_some() {
            return Err(VoxError::AlreadyRated { room_id, rater });
        }

        let rating = NewRating {
            room_id,
            rater,
            rated_user: room.partner_of(rater),
            score,
            comment,
        };
        match self.rooms.insert_rating(rating, now).await? {
            RatingInsert::Created(rating) => {
                info!(room_id = %room_id, rater = %rater, score = rating.score.get(), "rating saved");
                Ok(rating)
            }
            RatingInsert::Duplicate => Err(VoxError::AlreadyRated { room_id, rater }),
        }
    }

    /// The user's most recent rooms with their rating status.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn history(&self, user: UserId, limit: usize) -> VoxResult<Vec<HistoryEntry>> {
        let rated: HashSet<RoomId> = self.rooms.rated_rooms(user).await?.into_iter().collect();
        let rooms = self.rooms.rooms_for(user, limit).await?;
        Ok(rooms
            .into_iter()
            .map(|room| HistoryEntry {
                partner: room.partner_of(user),
                has_rated: rated.contains(&room.id),
                room,
            })
            .collect())
    }

    /// Human calls the user has taken part in.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn call_count(&self, user: UserId) -> VoxResult<u64> {
        self.rooms.call_count(user).await
    }
}
