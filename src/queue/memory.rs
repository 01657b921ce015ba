//! Single-process match queue.
//!
//! Entries live in insertion order behind one async mutex. Every trait method
//! takes the lock exactly once, which makes check-and-remove a single atomic
//! step for all connections of this process.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::errors::VoxResult;
use crate::core::ids::{ConnectionId, UserId};
use crate::queue::entry::{ClaimOutcome, EnqueueOutcome, QueueEntry, SearchCriteria};
use crate::queue::{MatchQueue, QueueFuture};

/// In-memory `MatchQueue`.
#[derive(Debug, Default)]
pub struct InMemoryMatchQueue {
    entries: Mutex<Vec<QueueEntry>>,
    enforce_gender: bool,
}

impl InMemoryMatchQueue {
    /// Queue matching on level only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue that also requires compatible gender filters.
    #[must_use]
    pub fn with_gender_filter(enforce_gender: bool) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            enforce_gender,
        }
    }
}

fn position(entries: &[QueueEntry], user_id: UserId) -> Option<usize> {
    entries.iter().position(|entry| entry.user_id == user_id)
}

impl MatchQueue for InMemoryMatchQueue {
    fn enqueue(&self, entry: QueueEntry) -> QueueFuture<'_, VoxResult<EnqueueOutcome>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let outcome = if let Some(idx) = position(&entries, entry.user_id) {
                entries[idx] = entry;
                EnqueueOutcome::Replaced
            } else {
                entries.push(entry);
                EnqueueOutcome::Inserted
            };
            debug!(queued = entries.len(), ?outcome, "Queue entry written");
            Ok(outcome)
        })
    }

    fn find_compatible(
        &self,
        user_id: UserId,
        criteria: SearchCriteria,
    ) -> QueueFuture<'_, VoxResult<Option<QueueEntry>>> {
        Box::pin(async move {
            let entries = self.entries.lock().await;
            Ok(entries
                .iter()
                .find(|entry| {
                    entry.user_id != user_id
                        && criteria.compatible_with(&entry.criteria, self.enforce_gender)
                })
                .cloned())
        })
    }

    fn claim_match(
        &self,
        user_id: UserId,
        criteria: SearchCriteria,
    ) -> QueueFuture<'_, VoxResult<ClaimOutcome>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let Some(own_idx) = position(&entries, user_id) else {
                return Ok(ClaimOutcome::NotQueued);
            };
            let Some(partner_idx) = entries.iter().position(|entry| {
                entry.user_id != user_id
                    && criteria.compatible_with(&entry.criteria, self.enforce_gender)
            }) else {
                return Ok(ClaimOutcome::NoCandidate);
            };

            // Remove the higher index first so the lower one stays valid.
            let (own, partner) = if own_idx > partner_idx {
                let own = entries.remove(own_idx);
                (own, entries.remove(partner_idx))
            } else {
                let partner = entries.remove(partner_idx);
                (entries.remove(own_idx), partner)
            };
            debug!(
                user = %own.user_id,
                partner = %partner.user_id,
                queued = entries.len(),
                "Claimed match"
            );
            Ok(ClaimOutcome::Matched {
                own,
                partner,
                partner_first: partner_idx < own_idx,
            })
        })
    }

    fn remove(&self, user_id: UserId) -> QueueFuture<'_, VoxResult<Option<QueueEntry>>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            Ok(position(&entries, user_id).map(|idx| entries.remove(idx)))
        })
    }

    fn remove_if_owned(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> QueueFuture<'_, VoxResult<Option<QueueEntry>>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let idx = entries.iter().position(|entry| {
                entry.user_id == user_id && entry.handle.connection_id() == connection_id
            });
            Ok(idx.map(|idx| entries.remove(idx)))
        })
    }

    fn restore(&self, restored: Vec<QueueEntry>) -> QueueFuture<'_, VoxResult<()>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            for entry in restored.into_iter().rev() {
                // A newer search written meanwhile wins over the restored copy.
                if position(&entries, entry.user_id).is_none() {
                    entries.insert(0, entry);
                }
            }
            Ok(())
        })
    }

    fn contains(&self, user_id: UserId) -> QueueFuture<'_, VoxResult<bool>> {
        Box::pin(async move {
            let entries = self.entries.lock().await;
            Ok(position(&entries, user_id).is_some())
        })
    }

    fn queued_users(&self) -> QueueFuture<'_, VoxResult<Vec<UserId>>> {
        Box::pin(async move {
            let entries = self.entries.lock().await;
            Ok(entries.iter().map(|entry| entry.user_id).collect())
        })
    }

    fn evict_stale(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> QueueFuture<'_, VoxResult<Vec<QueueEntry>>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let (stale, fresh): (Vec<QueueEntry>, Vec<QueueEntry>) =
                entries.drain(..).partition(|entry| {
                    entry.handle.is_closed() || now - entry.enqueued_at > max_age
                });
            *entries = fresh;
            Ok(stale)
        })
    }

    fn len(&self) -> QueueFuture<'_, VoxResult<usize>> {
        Box::pin(async move { Ok(self.entries.lock().await.len()) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::kinds::{GenderFilter, Level};
    use crate::protocol::handle::PeerHandle;
    use crate::protocol::messages::Outbound;

    fn entry(id: i64, level: Level) -> (QueueEntry, tokio::sync::mpsc::Receiver<Outbound>) {
        let (handle, rx) = PeerHandle::channel(UserId::new(id), 8);
        let criteria = SearchCriteria::new(GenderFilter::Any, level);
        (
            QueueEntry::new(handle, criteria, format!("user{id}"), format!("u{id}")),
            rx,
        )
    }

    #[tokio::test]
    async fn test_enqueue_replaces_instead_of_duplicating() {
        let queue = InMemoryMatchQueue::new();
        let (first, _rx1) = entry(1, Level::Any);
        let (second, _rx2) = entry(1, Level::Advanced);

        assert_eq!(queue.enqueue(first).await.unwrap(), EnqueueOutcome::Inserted);
        assert_eq!(queue.enqueue(second).await.unwrap(), EnqueueOutcome::Replaced);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_keeps_queue_position() {
        let queue = InMemoryMatchQueue::new();
        let (a, _ra) = entry(1, Level::Any);
        let (b, _rb) = entry(2, Level::Any);
        let (a2, _ra2) = entry(1, Level::Any);
        queue.enqueue(a).await.unwrap();
        queue.enqueue(b).await.unwrap();
        queue.enqueue(a2).await.unwrap();

        let found = queue
            .find_compatible(UserId::new(3), SearchCriteria::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.user_id, UserId::new(1));
    }

    #[tokio::test]
    async fn test_find_compatible_is_first_come_first_served() {
        let queue = InMemoryMatchQueue::new();
        let (beginner, _r1) = entry(1, Level::Beginner);
        let (intermediate, _r2) = entry(2, Level::Intermediate);
        let (any, _r3) = entry(3, Level::Any);
        queue.enqueue(beginner).await.unwrap();
        queue.enqueue(intermediate).await.unwrap();
        queue.enqueue(any).await.unwrap();

        let criteria = SearchCriteria::new(GenderFilter::Any, Level::Intermediate);
        let found = queue
            .find_compatible(UserId::new(9), criteria)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.user_id, UserId::new(2));

        let found = queue
            .find_compatible(UserId::new(2), criteria)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.user_id, UserId::new(3));
    }

    #[tokio::test]
    async fn test_claim_requires_own_entry() {
        let queue = InMemoryMatchQueue::new();
        let (a, _ra) = entry(1, Level::Any);
        queue.enqueue(a).await.unwrap();

        let outcome = queue
            .claim_match(UserId::new(2), SearchCriteria::default())
            .await
            .unwrap();
        assert!(matches!(outcome, ClaimOutcome::NotQueued));
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_claim_removes_both_entries() {
        let queue = InMemoryMatchQueue::new();
        let (a, _ra) = entry(1, Level::Any);
        let (b, _rb) = entry(2, Level::Any);
        queue.enqueue(a).await.unwrap();
        queue.enqueue(b).await.unwrap();

        let outcome = queue
            .claim_match(UserId::new(2), SearchCriteria::default())
            .await
            .unwrap();
        let ClaimOutcome::Matched {
            own,
            partner,
            partner_first,
        } = outcome
        else {
            panic!("expected a match");
        };
        assert_eq!(own.user_id, UserId::new(2));
        assert_eq!(partner.user_id, UserId::new(1));
        assert!(partner_first);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claim_without_candidate_keeps_entry() {
        let queue = InMemoryMatchQueue::new();
        let (a, _ra) = entry(1, Level::Beginner);
        let (b, _rb) = entry(2, Level::Advanced);
        queue.enqueue(a).await.unwrap();
        queue.enqueue(b).await.unwrap();

        let criteria = SearchCriteria::new(GenderFilter::Any, Level::Advanced);
        let outcome = queue.claim_match(UserId::new(2), criteria).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::NoCandidate));
        assert!(queue.contains(UserId::new(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_gender_filter_enforced_when_configured() {
        let queue = InMemoryMatchQueue::with_gender_filter(true);
        let (handle, _rx) = PeerHandle::channel(UserId::new(1), 8);
        let male = QueueEntry::new(
            handle,
            SearchCriteria::new(GenderFilter::Male, Level::Any),
            "a",
            "a",
        );
        queue.enqueue(male).await.unwrap();

        let female = SearchCriteria::new(GenderFilter::Female, Level::Any);
        assert!(queue.find_compatible(UserId::new(2), female).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let queue = InMemoryMatchQueue::new();
        let (a, _ra) = entry(1, Level::Any);
        queue.enqueue(a).await.unwrap();
        assert!(queue.remove(UserId::new(1)).await.unwrap().is_some());
        assert!(queue.remove(UserId::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_if_owned_ignores_other_connections() {
        let queue = InMemoryMatchQueue::new();
        let (old, _r_old) = entry(1, Level::Any);
        let old_conn = old.handle.connection_id();
        let (new, _r_new) = entry(1, Level::Any);
        let new_conn = new.handle.connection_id();
        queue.enqueue(old).await.unwrap();
        queue.enqueue(new).await.unwrap();

        assert!(queue.remove_if_owned(UserId::new(1), old_conn).await.unwrap().is_none());
        assert!(queue.contains(UserId::new(1)).await.unwrap());
        assert!(queue.remove_if_owned(UserId::new(1), new_conn).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restore_puts_entries_back_in_front() {
        let queue = InMemoryMatchQueue::new();
        let (a, _ra) = entry(1, Level::Any);
        let (b, _rb) = entry(2, Level::Any);
        let (c, _rc) = entry(3, Level::Any);
        queue.enqueue(c).await.unwrap();
        queue.restore(vec![a, b]).await.unwrap();

        assert_eq!(
            queue.queued_users().await.unwrap(),
            vec![UserId::new(1), UserId::new(2), UserId::new(3)]
        );
    }

    #[tokio::test]
    async fn test_evict_stale_drops_dead_and_expired() {
        let queue = InMemoryMatchQueue::new();
        let (dead, dead_rx) = entry(1, Level::Any);
        let (mut old, _old_rx) = entry(2, Level::Any);
        let (fresh, _fresh_rx) = entry(3, Level::Any);
        old.enqueued_at = Utc::now() - Duration::seconds(700);
        queue.enqueue(dead).await.unwrap();
        queue.enqueue(old).await.unwrap();
        queue.enqueue(fresh).await.unwrap();
        drop(dead_rx);

        let evicted = queue
            .evict_stale(Utc::now(), Duration::seconds(600))
            .await
            .unwrap();
        let mut ids: Vec<i64> = evicted.iter().map(|e| e.user_id.get()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(queue.queued_users().await.unwrap(), vec![UserId::new(3)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueue_same_user_keeps_one_entry() {
        let queue = Arc::new(InMemoryMatchQueue::new());
        let mut tasks = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..32 {
            let (e, rx) = entry(7, Level::Any);
            receivers.push(rx);
            let queue = Arc::clone(&queue);
            tasks.push(tokio::spawn(async move { queue.enqueue(e).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(queue.len().await.unwrap(), 1);
    }
}
