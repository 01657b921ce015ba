//! Background sweeper for the match queue.
//!
//! Periodically evicts entries whose connection is gone or that waited too
//! long, then clears `searching` flags that no longer match queue membership.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::config::MatchmakingConfig;
use crate::core::errors::VoxResult;
use crate::identity::directory::IdentityDirectory;
use crate::protocol::messages::ServerMessage;
use crate::queue::MatchQueue;

/// Configuration for the queue sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Interval between sweeps (in seconds).
    pub interval_seconds: u64,
    /// Maximum time an entry may wait.
    pub max_search_age: chrono::Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::from(&MatchmakingConfig::default())
    }
}

impl From<&MatchmakingConfig> for SweeperConfig {
    fn from(config: &MatchmakingConfig) -> Self {
        Self {
            interval_seconds: config.sweep_interval_seconds,
            max_search_age: config.max_search_age(),
        }
    }
}

/// Statistics from one sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    /// Entries removed because their connection was closed.
    pub dead_evicted: usize,
    /// Entries removed because they waited too long.
    pub expired_evicted: usize,
    /// Directory flags cleared for users not in the queue.
    pub flags_cleared: usize,
    /// Sweep duration in milliseconds.
    pub duration_ms: u64,
}

/// Background queue sweeper.
pub struct QueueSweeper {
    queue: Arc<dyn MatchQueue>,
    directory: Arc<dyn IdentityDirectory>,
    config: SweeperConfig,
    shutdown: Arc<Notify>,
}

impl QueueSweeper {
    /// Create a sweeper.
    #[must_use]
    pub fn new(
        queue: Arc<dyn MatchQueue>,
        directory: Arc<dyn IdentityDirectory>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            queue,
            directory,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Notifier that stops the sweeper.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the sweeper as a tokio task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        let interval = Duration::from_secs(self.config.interval_seconds.max(1));
        info!(?interval, "Starting queue sweeper");

        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    match self.run_sweep().await {
                        Ok(stats) => {
                            if stats.dead_evicted + stats.expired_evicted + stats.flags_cleared > 0 {
                                info!(
                                    dead = stats.dead_evicted,
                                    expired = stats.expired_evicted,
                                    flags = stats.flags_cleared,
                                    duration_ms = stats.duration_ms,
                                    "Sweep completed"
                                );
                            } else {
                                debug!("Sweep completed with nothing to remove");
                            }
                        }
                        Err(err) => {
                            warn!(?err, "Sweep failed");
                        }
                    }
                }
                () = self.shutdown.notified() => {
                    info!("Queue sweeper shutting down");
                    break;
                }
            }
        }
    }

    /// Run a single sweep.
    ///
    /// Expired users still connected are told their search stopped with a
    /// `cancelled` message.
    ///
    /// # Errors
    /// Returns an error if queue or directory operations fail.
    pub async fn run_sweep(&self) -> VoxResult<SweepStats> {
        let start = std::time::Instant::now();
        let mut stats = SweepStats::default();

        for entry in self
            .queue
            .evict_stale(Utc::now(), self.config.max_search_age)
            .await?
        {
            if entry.handle.is_closed() {
                stats.dead_evicted += 1;
            } else {
                stats.expired_evicted += 1;
                entry.handle.send(ServerMessage::Cancelled).await;
            }
        }

        let queued = self.queue.queued_users().await?;
        stats.flags_cleared = self.directory.clear_stale_searching(queued).await?;

        #[allow(clippy::cast_possible_truncation)]
        {
            stats.duration_ms = start.elapsed().as_millis() as u64;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use tokio_rusqlite::Connection;

    use super::*;
    use crate::core::ids::UserId;
    use crate::identity::directory::SqliteIdentityDirectory;
    use crate::protocol::handle::PeerHandle;
    use crate::protocol::messages::Outbound;
    use crate::queue::{InMemoryMatchQueue, QueueEntry, SearchCriteria};

    #[test]
    fn test_config_default() {
        let config = SweeperConfig::default();
        assert_eq!(config.interval_seconds, 30);
        assert_eq!(config.max_search_age, chrono::Duration::seconds(600));
    }

    #[test]
    fn test_config_from_matchmaking() {
        let matchmaking = MatchmakingConfig {
            sweep_interval_seconds: 5,
            max_search_seconds: 60,
            ..MatchmakingConfig::default()
        };
        let config = SweeperConfig::from(&matchmaking);
        assert_eq!(config.interval_seconds, 5);
        assert_eq!(config.max_search_age, chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_sweep_evicts_and_reconciles_flags() {
        let directory =
            SqliteIdentityDirectory::from_connection(Connection::open_in_memory().await.unwrap())
                .await
                .unwrap();
        for (id, name) in [(1, "alive"), (2, "dead"), (3, "old"), (4, "ghost")] {
            directory.upsert_user(UserId::new(id), name, None).await.unwrap();
            directory.set_searching(UserId::new(id), true).await.unwrap();
        }
        let directory = Arc::new(directory);
        let queue = Arc::new(InMemoryMatchQueue::new());

        let (alive, _rx_alive) = PeerHandle::channel(UserId::new(1), 4);
        let (dead, rx_dead) = PeerHandle::channel(UserId::new(2), 4);
        let (old, mut rx_old) = PeerHandle::channel(UserId::new(3), 4);
        drop(rx_dead);
        let criteria = SearchCriteria::default();
        queue.enqueue(QueueEntry::new(alive, criteria, "alive", "alive")).await.unwrap();
        queue.enqueue(QueueEntry::new(dead, criteria, "dead", "dead")).await.unwrap();
        let mut stale = QueueEntry::new(old, criteria, "old", "old");
        stale.enqueued_at = Utc::now() - chrono::Duration::seconds(700);
        queue.enqueue(stale).await.unwrap();

        let sweeper = QueueSweeper::new(
            queue.clone(),
            directory.clone(),
            SweeperConfig::default(),
        );
        let stats = sweeper.run_sweep().await.unwrap();
        assert_eq!(stats.dead_evicted, 1);
        assert_eq!(stats.expired_evicted, 1);
        assert_eq!(stats.flags_cleared, 3);
        assert_eq!(rx_old.recv().await, Some(Outbound::Message(ServerMessage::Cancelled)));

        assert_eq!(queue.queued_users().await.unwrap(), vec![UserId::new(1)]);
        assert!(directory.profile(UserId::new(1)).await.unwrap().unwrap().searching);
        assert!(!directory.profile(UserId::new(4)).await.unwrap().unwrap().searching);
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let directory =
            SqliteIdentityDirectory::from_connection(Connection::open_in_memory().await.unwrap())
                .await
                .unwrap();
        let sweeper = QueueSweeper::new(
            Arc::new(InMemoryMatchQueue::new()),
            Arc::new(directory),
            SweeperConfig {
                interval_seconds: 3600,
                ..SweeperConfig::default()
            },
        );
        let shutdown = sweeper.shutdown_notifier();
        let handle = sweeper.spawn();
        tokio::task::yield_now().await;
        shutdown.notify_one();
        handle.await.unwrap();
    }
}
