//! Match queue: users currently waiting for a partner.
//!
//! The queue sits behind the `MatchQueue` trait so that the single-process
//! implementation can be swapped for a shared store with compare-and-swap
//! semantics. Either way `claim_match` must check own membership, find a
//! candidate and remove both entries as one atomic step.

pub mod entry;
pub mod memory;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Duration, Utc};

use crate::core::errors::VoxResult;
use crate::core::ids::{ConnectionId, UserId};

pub use entry::{ClaimOutcome, EnqueueOutcome, QueueEntry, SearchCriteria};
pub use memory::InMemoryMatchQueue;

/// Boxed future type for queue operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Shared directory of searching users.
pub trait MatchQueue: Send + Sync {
    /// Insert the entry, or replace the user's existing one.
    ///
    /// # Errors
    /// Returns an error if the backing store fails.
    fn enqueue(&self, entry: QueueEntry) -> QueueFuture<'_, VoxResult<EnqueueOutcome>>;

    /// First compatible entry other than `user_id`, in insertion order.
    ///
    /// # Errors
    /// Returns an error if the backing store fails.
    fn find_compatible(
        &self,
        user_id: UserId,
        criteria: SearchCriteria,
    ) -> QueueFuture<'_, VoxResult<Option<QueueEntry>>>;

    /// Atomically re-check own membership, pick the first compatible
    /// candidate and remove both entries.
    ///
    /// # Errors
    /// Returns an error if the backing store fails.
    fn claim_match(
        &self,
        user_id: UserId,
        criteria: SearchCriteria,
    ) -> QueueFuture<'_, VoxResult<ClaimOutcome>>;

    /// Remove the user's entry. Safe when absent.
    ///
    /// # Errors
    /// Returns an error if the backing store fails.
    fn remove(&self, user_id: UserId) -> QueueFuture<'_, VoxResult<Option<QueueEntry>>>;

    /// Remove the user's entry only if it belongs to `connection_id`.
    ///
    /// # Errors
    /// Returns an error if the backing store fails.
    fn remove_if_owned(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> QueueFuture<'_, VoxResult<Option<QueueEntry>>>;

    /// Put claimed entries back at the front, keeping their order. Users that
    /// searched again meanwhile keep their newer entry.
    ///
    /// # Errors
    /// Returns an error if the backing store fails.
    fn restore(&self, entries: Vec<QueueEntry>) -> QueueFuture<'_, VoxResult<()>>;

    /// Whether the user currently has an entry.
    ///
    /// # Errors
    /// Returns an error if the backing store fails.
    fn contains(&self, user_id: UserId) -> QueueFuture<'_, VoxResult<bool>>;

    /// Ids of all queued users in queue order.
    ///
    /// # Errors
    /// Returns an error if the backing store fails.
    fn queued_users(&self) -> QueueFuture<'_, VoxResult<Vec<UserId>>>;

    /// Remove entries whose connection is gone or that waited longer than
    /// `max_age`.
    ///
    /// # Errors
    /// Returns an error if the backing store fails.
    fn evict_stale(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> QueueFuture<'_, VoxResult<Vec<QueueEntry>>>;

    /// Number of queued users.
    ///
    /// # Errors
    /// Returns an error if the backing store fails.
    fn len(&self) -> QueueFuture<'_, VoxResult<usize>>;
}
