//! Background maintenance tasks.

pub mod queue_sweeper;

pub use queue_sweeper::{QueueSweeper, SweepStats, SweeperConfig};
