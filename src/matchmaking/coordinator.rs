//! Matchmaking coordinator: pairs searching users and creates their room.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::core::errors::VoxResult;
use crate::core::ids::{RoomId, UserId};
use crate::core::kinds::CallRole;
use crate::identity::directory::{IdentityDirectory, UserProfile};
use crate::protocol::handle::PeerHandle;
use crate::protocol::messages::{MatchRequest, ServerMessage};
use crate::queue::{ClaimOutcome, MatchQueue, QueueEntry, SearchCriteria};
use crate::session::lifecycle::SessionLifecycle;
use crate::session::room::Room;

/// Claims tried per search when room creation fails after a claim.
const PAIR_ATTEMPTS: usize = 2;

/// Where a matchmaking connection stands, as far as its own requests go.
///
/// The phase only follows what this connection initiated. A connection
/// paired as the callee stays at `Searching`, as does one whose entry was
/// removed by the sweeper or an AI call. The queue is the authority on
/// membership.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionPhase {
    /// Connected, not searching.
    Idle,
    /// Queued by this connection.
    Searching,
    /// Paired into a room by this connection, as the caller.
    Matched(RoomId),
}

/// Per-connection matchmaking state.
#[derive(Debug)]
pub struct MatchSession {
    handle: PeerHandle,
    profile: UserProfile,
    phase: SessionPhase,
}

impl MatchSession {
    /// Fresh session for an authenticated connection.
    #[must_use]
    pub const fn new(handle: PeerHandle, profile: UserProfile) -> Self {
        Self {
            handle,
            profile,
            phase: SessionPhase::Idle,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Authenticated user.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.profile.id
    }
}

/// Coordinates the queue, the directory flags and room creation.
pub struct MatchCoordinator {
    queue: Arc<dyn MatchQueue>,
    directory: Arc<dyn IdentityDirectory>,
    lifecycle: Arc<SessionLifecycle>,
}

impl MatchCoordinator {
    /// Coordinator over shared services.
    #[must_use]
    pub fn new(
        queue: Arc<dyn MatchQueue>,
        directory: Arc<dyn IdentityDirectory>,
        lifecycle: Arc<SessionLifecycle>,
    ) -> Self {
        Self {
            queue,
            directory,
            lifecycle,
        }
    }

    /// Dispatch one client request.
    ///
    /// # Errors
    /// Returns an error if the queue or the stores fail.
    pub async fn handle(&self, session: &mut MatchSession, request: MatchRequest) -> VoxResult<()> {
        match request {
            MatchRequest::Search {
                gender_filter,
                level,
            } => {
                self.search(session, SearchCriteria::new(gender_filter, level))
                    .await
            }
            MatchRequest::Cancel => self.cancel(session).await,
        }
    }

    /// Queue the user and try to pair them.
    ///
    /// A failed room creation is not an error: both users go back to the
    /// front of the queue and the claim is tried once more.
    ///
    /// # Errors
    /// Returns an error if the queue fails or an abandoned room cannot be
    /// closed.
    pub async fn search(&self, session: &mut MatchSession, criteria: SearchCriteria) -> VoxResult<()> {
        let user = session.user_id();
        let username = session.profile.username.clone();
        self.lifecycle
            .close_abandoned(user, &username, Utc::now())
            .await?;

        let entry = QueueEntry::new(
            session.handle.clone(),
            criteria,
            session.profile.display_name(),
            username,
        );
        let written = self.queue.enqueue(entry).await?;
        self.mirror_searching(user, true).await;
        debug!(user = %user, outcome = ?written, ?criteria, "search queued");

        for attempt in 1..=PAIR_ATTEMPTS {
            match self.queue.claim_match(user, criteria).await? {
                ClaimOutcome::Matched {
                    own,
                    partner,
                    partner_first,
                } => {
                    if self.pair(session, own, partner, partner_first, criteria).await {
                        return Ok(());
                    }
                    debug!(user = %user, attempt, "pairing failed, entries restored");
                }
                ClaimOutcome::NoCandidate => break,
                ClaimOutcome::NotQueued => {
                    debug!(user = %user, "entry already consumed, awaiting notification");
                    return Ok(());
                }
            }
        }
        session.phase = SessionPhase::Searching;
        session.handle.send(ServerMessage::Searching).await;
        Ok(())
    }

    /// Open the room for a claimed pair and notify both sides. `false` when
    /// the room could not be created and both entries went back to the queue.
    async fn pair(
        &self,
        session: &mut MatchSession,
        own: QueueEntry,
        partner: QueueEntry,
        partner_first: bool,
        criteria: SearchCriteria,
    ) -> bool {
        let user = own.user_id;
        let room = match self.open_room(user, &partner, criteria).await {
            Ok(room) => room,
            Err(err) => {
                warn!(user = %user, partner = %partner.user_id, error = %err, "room creation failed");
                let restored = if partner_first {
                    vec![partner, own]
                } else {
                    vec![own, partner]
                };
                if let Err(err) = self.queue.restore(restored).await {
                    warn!(user = %user, error = %err, "queue restore failed");
                }
                return false;
            }
        };

        self.mirror_searching(user, false).await;
        self.mirror_searching(partner.user_id, false).await;

        let delivered = partner
            .handle
            .send(ServerMessage::Matched {
                room_id: room.id,
                role: CallRole::Callee,
                partner: own.partner_info(),
            })
            .await;
        if !delivered {
            warn!(room_id = %room.id, partner = %partner.user_id, "callee connection already closed");
        }
        session.phase = SessionPhase::Matched(room.id);
        session
            .handle
            .send(ServerMessage::Matched {
                room_id: room.id,
                role: CallRole::Caller,
                partner: partner.partner_info(),
            })
            .await;
        info!(room_id = %room.id, caller = %user, callee = %partner.user_id, "users matched");
        true
    }

    /// The callee may have opened another room after queueing; it is closed
    /// before the new one exists.
    async fn open_room(
        &self,
        caller: UserId,
        callee: &QueueEntry,
        criteria: SearchCriteria,
    ) -> VoxResult<Room> {
        let now = Utc::now();
        self.lifecycle
            .close_abandoned(callee.user_id, &callee.username, now)
            .await?;
        self.lifecycle
            .open_human_room(caller, callee.user_id, criteria, now)
            .await
    }

    /// Leave the queue.
    ///
    /// # Errors
    /// Returns an error if the queue fails.
    pub async fn cancel(&self, session: &mut MatchSession) -> VoxResult<()> {
        let user = session.user_id();
        let removed = self.queue.remove(user).await?;
        self.mirror_searching(user, false).await;
        session.phase = SessionPhase::Idle;
        session.handle.send(ServerMessage::Cancelled).await;
        debug!(user = %user, removed = removed.is_some(), "search cancelled");
        Ok(())
    }

    /// Take the user out of the queue because another surface claimed them,
    /// such as an AI call. The queued connection gets `cancelled`. Returns
    /// whether an entry was removed.
    ///
    /// # Errors
    /// Returns an error if the queue fails.
    pub async fn withdraw(&self, user: UserId) -> VoxResult<bool> {
        let Some(entry) = self.queue.remove(user).await? else {
            return Ok(false);
        };
        self.mirror_searching(user, false).await;
        entry.handle.send(ServerMessage::Cancelled).await;
        debug!(user = %user, "withdrawn from queue");
        Ok(true)
    }

    /// Connection closed: drop this connection's entry, if it still owns one.
    pub async fn disconnect(&self, session: MatchSession) {
        let user = session.user_id();
        match self
            .queue
            .remove_if_owned(user, session.handle.connection_id())
            .await
        {
            Ok(Some(_)) => {
                self.mirror_searching(user, false).await;
                debug!(user = %user, "queue entry dropped on disconnect");
            }
            Ok(None) => {}
            Err(err) => warn!(user = %user, error = %err, "dequeue on disconnect failed"),
        }
    }

    async fn mirror_searching(&self, user: UserId, searching: bool) {
        if let Err(err) = self.directory.set_searching(user, searching).await {
            warn!(user = %user, searching, error = %err, "searching flag not mirrored");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::DateTime;
    use tokio::sync::mpsc;
    use tokio_rusqlite::Connection;

    use super::*;
    use crate::core::errors::VoxError;
    use crate::core::kinds::{GenderFilter, Level};
    use crate::identity::directory::SqliteIdentityDirectory;
    use crate::protocol::messages::Outbound;
    use crate::queue::InMemoryMatchQueue;
    use crate::relay::hub::RoomHub;
    use crate::session::rating::{NewRating, Rating};
    use crate::session::store::{
        CloseOutcome, NewRoom, RatingInsert, RoomStore, SqliteRoomStore, StoreFuture,
    };

    /// Room store whose first `failures` room creations are refused.
    struct FailingRooms {
        inner: Arc<SqliteRoomStore>,
        failures: AtomicUsize,
    }

    impl RoomStore for FailingRooms {
        fn create_room(&self, room: NewRoom, now: DateTime<Utc>) -> StoreFuture<'_, VoxResult<Room>> {
            let refused = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if refused {
                return Box::pin(async {
                    Err(VoxError::InvalidData("room insert refused".to_string()))
                });
            }
            self.inner.create_room(room, now)
        }

        fn room(&self, room_id: RoomId) -> StoreFuture<'_, VoxResult<Option<Room>>> {
            self.inner.room(room_id)
        }

        fn close_room(
            &self,
            room_id: RoomId,
            now: DateTime<Utc>,
        ) -> StoreFuture<'_, VoxResult<Option<CloseOutcome>>> {
            self.inner.close_room(room_id, now)
        }

        fn active_rooms_for(&self, user_id: UserId) -> StoreFuture<'_, VoxResult<Vec<Room>>> {
            self.inner.active_rooms_for(user_id)
        }

        fn rooms_for(
            &self,
            user_id: UserId,
            limit: usize,
        ) -> StoreFuture<'_, VoxResult<Vec<Room>>> {
            self.inner.rooms_for(user_id, limit)
        }

        fn insert_rating(
            &self,
            rating: NewRating,
            now: DateTime<Utc>,
        ) -> StoreFuture<'_, VoxResult<RatingInsert>> {
            self.inner.insert_rating(rating, now)
        }

        fn rating_for(
            &self,
            room_id: RoomId,
            rater: UserId,
        ) -> StoreFuture<'_, VoxResult<Option<Rating>>> {
            self.inner.rating_for(room_id, rater)
        }

        fn rated_rooms(&self, rater: UserId) -> StoreFuture<'_, VoxResult<Vec<RoomId>>> {
            self.inner.rated_rooms(rater)
        }

        fn call_count(&self, user_id: UserId) -> StoreFuture<'_, VoxResult<u64>> {
            self.inner.call_count(user_id)
        }
    }

    struct Harness {
        coordinator: Arc<MatchCoordinator>,
        directory: Arc<SqliteIdentityDirectory>,
        queue: Arc<InMemoryMatchQueue>,
        rooms: Arc<SqliteRoomStore>,
        lifecycle: Arc<SessionLifecycle>,
    }

    async fn harness() -> Harness {
        harness_refusing(0).await
    }

    async fn harness_refusing(failures: usize) -> Harness {
        let directory =
            SqliteIdentityDirectory::from_connection(Connection::open_in_memory().await.unwrap())
                .await
                .unwrap();
        for (id, name, first) in [(1, "alice", Some("Alice")), (2, "bob", None), (3, "carol", None)]
        {
            directory.upsert_user(UserId::new(id), name, first).await.unwrap();
        }
        let rooms = SqliteRoomStore::from_connection(Connection::open_in_memory().await.unwrap())
            .await
            .unwrap();
        let directory = Arc::new(directory);
        let rooms = Arc::new(rooms);
        let queue = Arc::new(InMemoryMatchQueue::new());
        let store = Arc::new(FailingRooms {
            inner: rooms.clone(),
            failures: AtomicUsize::new(failures),
        });
        let lifecycle = Arc::new(SessionLifecycle::new(store, Arc::new(RoomHub::new())));
        Harness {
            coordinator: Arc::new(MatchCoordinator::new(
                queue.clone(),
                directory.clone(),
                lifecycle.clone(),
            )),
            directory,
            queue,
            rooms,
            lifecycle,
        }
    }

    async fn session(h: &Harness, id: i64) -> (MatchSession, mpsc::Receiver<Outbound>) {
        let profile = h.directory.profile(UserId::new(id)).await.unwrap().unwrap();
        let (handle, rx) = PeerHandle::channel(profile.id, 16);
        (MatchSession::new(handle, profile), rx)
    }

    fn search() -> MatchRequest {
        MatchRequest::Search {
            gender_filter: GenderFilter::Any,
            level: Level::Intermediate,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Message(message) = item {
                out.push(message);
            }
        }
        out
    }

    fn matched(messages: &[ServerMessage]) -> Vec<(RoomId, CallRole, String)> {
        messages
            .iter()
            .filter_map(|message| match message {
                ServerMessage::Matched {
                    room_id,
                    role,
                    partner,
                } => Some((*room_id, *role, partner.name.clone())),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_two_users_are_paired() {
        let h = harness().await;
        let (mut a, mut rx_a) = session(&h, 1).await;
        let (mut b, mut rx_b) = session(&h, 2).await;

        h.coordinator.handle(&mut a, search()).await.unwrap();
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::Searching]);
        assert_eq!(a.phase(), SessionPhase::Searching);
        assert!(h.directory.profile(UserId::new(1)).await.unwrap().unwrap().searching);

        h.coordinator.handle(&mut b, search()).await.unwrap();
        let to_b = matched(&drain(&mut rx_b));
        let to_a = matched(&drain(&mut rx_a));
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_a.len(), 1);
        assert_eq!(to_b[0].0, to_a[0].0);
        assert_eq!(to_b[0].1, CallRole::Caller);
        assert_eq!(to_b[0].2, "Alice");
        assert_eq!(to_a[0].1, CallRole::Callee);
        assert_eq!(to_a[0].2, "bob");
        assert_eq!(b.phase(), SessionPhase::Matched(to_b[0].0));

        assert_eq!(h.queue.len().await.unwrap(), 0);
        assert!(!h.directory.profile(UserId::new(1)).await.unwrap().unwrap().searching);
        assert!(!h.directory.profile(UserId::new(2)).await.unwrap().unwrap().searching);
        assert_eq!(h.rooms.call_count(UserId::new(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_level_mismatch_keeps_both_waiting() {
        let h = harness().await;
        let (mut a, mut rx_a) = session(&h, 1).await;
        let (mut b, mut rx_b) = session(&h, 2).await;

        h.coordinator
            .search(&mut a, SearchCriteria::new(GenderFilter::Any, Level::Beginner))
            .await
            .unwrap();
        h.coordinator
            .search(&mut b, SearchCriteria::new(GenderFilter::Any, Level::Advanced))
            .await
            .unwrap();
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::Searching]);
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::Searching]);
        assert_eq!(h.queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancel_leaves_queue() {
        let h = harness().await;
        let (mut a, mut rx_a) = session(&h, 1).await;
        h.coordinator.handle(&mut a, search()).await.unwrap();
        h.coordinator.handle(&mut a, MatchRequest::Cancel).await.unwrap();

        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::Searching, ServerMessage::Cancelled]
        );
        assert_eq!(a.phase(), SessionPhase::Idle);
        assert!(!h.queue.contains(UserId::new(1)).await.unwrap());
        assert!(!h.directory.profile(UserId::new(1)).await.unwrap().unwrap().searching);

        let (mut b, mut rx_b) = session(&h, 2).await;
        h.coordinator.handle(&mut b, search()).await.unwrap();
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::Searching]);
    }

    #[tokio::test]
    async fn test_stale_connection_does_not_dequeue_newer_one() {
        let h = harness().await;
        let (mut old, _rx_old) = session(&h, 1).await;
        let (mut new, _rx_new) = session(&h, 1).await;
        h.coordinator.handle(&mut old, search()).await.unwrap();
        h.coordinator.handle(&mut new, search()).await.unwrap();
        assert_eq!(h.queue.len().await.unwrap(), 1);

        h.coordinator.disconnect(old).await;
        assert!(h.queue.contains(UserId::new(1)).await.unwrap());

        h.coordinator.disconnect(new).await;
        assert!(!h.queue.contains(UserId::new(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_new_search_closes_abandoned_room() {
        let h = harness().await;
        let (mut a, mut rx_a) = session(&h, 1).await;
        let (mut b, _rx_b) = session(&h, 2).await;
        h.coordinator.handle(&mut a, search()).await.unwrap();
        h.coordinator.handle(&mut b, search()).await.unwrap();
        let room = matched(&drain(&mut rx_a))[0].0;

        h.coordinator.handle(&mut a, search()).await.unwrap();
        let stored = h.rooms.room(room).await.unwrap().unwrap();
        assert!(!stored.is_active());
        assert!(h.rooms.active_rooms_for(UserId::new(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_room_restores_both_in_order() {
        let h = harness_refusing(usize::MAX).await;
        let (mut a, mut rx_a) = session(&h, 1).await;
        let (mut b, mut rx_b) = session(&h, 2).await;
        let (mut c, _rx_c) = session(&h, 3).await;

        h.coordinator
            .search(&mut c, SearchCriteria::new(GenderFilter::Any, Level::Beginner))
            .await
            .unwrap();
        h.coordinator.handle(&mut a, search()).await.unwrap();
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::Searching]);

        h.coordinator.handle(&mut b, search()).await.unwrap();
        assert_eq!(
            h.queue.queued_users().await.unwrap(),
            vec![UserId::new(1), UserId::new(2), UserId::new(3)]
        );
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::Searching]);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(b.phase(), SessionPhase::Searching);
        assert!(h.rooms.active_rooms_for(UserId::new(1)).await.unwrap().is_empty());
        assert!(h.directory.profile(UserId::new(1)).await.unwrap().unwrap().searching);
    }

    #[tokio::test]
    async fn test_failed_room_is_retried_once() {
        let h = harness_refusing(1).await;
        let (mut a, mut rx_a) = session(&h, 1).await;
        let (mut b, mut rx_b) = session(&h, 2).await;
        h.coordinator.handle(&mut a, search()).await.unwrap();
        drain(&mut rx_a);

        h.coordinator.handle(&mut b, search()).await.unwrap();
        let to_b = drain(&mut rx_b);
        assert_eq!(to_b.len(), 1);
        assert_eq!(matched(&to_b)[0].1, CallRole::Caller);
        assert_eq!(matched(&drain(&mut rx_a))[0].1, CallRole::Callee);
        assert_eq!(h.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_callee_other_room_closed_before_pairing() {
        let h = harness().await;
        let (mut a, _rx_a) = session(&h, 1).await;
        let (mut b, mut rx_b) = session(&h, 2).await;
        h.coordinator.handle(&mut a, search()).await.unwrap();
        let ai_room = h.lifecycle.open_ai_room(UserId::new(1), Utc::now()).await.unwrap();

        h.coordinator.handle(&mut b, search()).await.unwrap();
        let room = matched(&drain(&mut rx_b))[0].0;
        let active = h.rooms.active_rooms_for(UserId::new(1)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, room);
        assert!(!h.rooms.room(ai_room.id).await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn test_callee_phase_is_left_to_the_queue() {
        let h = harness().await;
        let (mut a, _rx_a) = session(&h, 1).await;
        let (mut b, _rx_b) = session(&h, 2).await;
        h.coordinator.handle(&mut a, search()).await.unwrap();
        h.coordinator.handle(&mut b, search()).await.unwrap();

        assert_eq!(a.phase(), SessionPhase::Searching);
        assert!(!h.queue.contains(UserId::new(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_withdraw_cancels_queued_connection() {
        let h = harness().await;
        let (mut a, mut rx_a) = session(&h, 1).await;
        h.coordinator.handle(&mut a, search()).await.unwrap();
        drain(&mut rx_a);

        assert!(h.coordinator.withdraw(UserId::new(1)).await.unwrap());
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::Cancelled]);
        assert!(!h.queue.contains(UserId::new(1)).await.unwrap());
        assert!(!h.directory.profile(UserId::new(1)).await.unwrap().unwrap().searching);
        assert!(!h.coordinator.withdraw(UserId::new(1)).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_searches_never_double_match() {
        let h = harness().await;
        let (a, rx_a) = session(&h, 1).await;
        let (b, rx_b) = session(&h, 2).await;
        let (c, rx_c) = session(&h, 3).await;

        let mut tasks = Vec::new();
        for mut session in [a, b, c] {
            let coordinator = h.coordinator.clone();
            tasks.push(tokio::spawn(async move {
                coordinator.handle(&mut session, search()).await.unwrap();
                session
            }));
        }
        let mut sessions = Vec::new();
        for task in tasks {
            sessions.push(task.await.unwrap());
        }

        let mut receivers = [rx_a, rx_b, rx_c];
        let per_user: Vec<_> = receivers
            .iter_mut()
            .map(|rx| matched(&drain(rx)))
            .collect();
        let matched_users = per_user.iter().filter(|m| !m.is_empty()).count();
        assert_eq!(matched_users, 2);
        assert!(per_user.iter().all(|m| m.len() <= 1));
        assert_eq!(h.queue.len().await.unwrap(), 1);

        let rooms = per_user.iter().flatten().map(|m| m.0).collect::<Vec<_>>();
        assert_eq!(rooms[0], rooms[1]);
        let roles = per_user.iter().flatten().map(|m| m.1).collect::<Vec<_>>();
        assert!(roles.contains(&CallRole::Caller));
        assert!(roles.contains(&CallRole::Callee));
        drop(sessions);
    }
}
